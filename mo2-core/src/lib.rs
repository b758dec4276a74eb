//! Core library for the MO2 agent toolchain.
//!
//! Two byte-level operations live here: building a sealed MO2 container
//! out of code bytes and a serialized manifest ([`builder`]), and
//! grafting a manifest-bearing load command onto an existing 64-bit
//! Mach-O file while keeping its declared file offsets consistent
//! ([`inject`]). Toolchain orchestration and console I/O belong to the
//! `mo2cc` binary, not here.

pub mod builder;
pub mod error;
pub mod format;
pub mod inject;
pub mod manifest;
pub mod seal;

pub use error::Mo2Error;
pub use manifest::{AgentManifest, ManifestFields};

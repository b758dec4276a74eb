use thiserror::Error;

/// Every failure is terminal for the current invocation: no retries, and
/// no partial output, since output buffers are fully assembled in memory
/// before a single write.
#[derive(Error, Debug)]
pub enum Mo2Error {
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),
    #[error("input too small: need at least {needed} bytes, got {got}")]
    InputTooSmall { needed: usize, got: usize },
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("corrupt load command at table offset {offset:#x}: {reason}")]
    CorruptCommand { offset: usize, reason: String },
    #[error("toolchain failure: {0}")]
    ToolchainFailure(String),
}

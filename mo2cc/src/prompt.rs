//! Interactive manifest collection. Console I/O lives here; all
//! validation is delegated to `AgentManifest::collect`.

use std::io::{self, BufRead, Write};

use anyhow::Result;
use mo2_core::{AgentManifest, ManifestFields};

fn ask(label: &str) -> Result<String> {
    print!("{}: ", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

pub fn prompt_manifest() -> Result<AgentManifest> {
    let fields = ManifestFields {
        name: ask("Agent name")?,
        kind: ask("Agent type")?,
        version: ask("Version")?,
        entry: ask("Entry symbol")?,
        privileges: ask("Required privileges (comma separated)")?,
        resources: vec![],
    };

    Ok(AgentManifest::collect(fields)?)
}

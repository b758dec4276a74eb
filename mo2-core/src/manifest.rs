use serde::{Deserialize, Serialize};

use crate::error::Mo2Error;

/// A named byte range bundled with an agent (icons, blobs, etc).
/// The core never interprets resource contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEntry {
    pub name: String,
    pub offset: u64,
    pub size: u64,
}

/// Descriptor of a privileged executable unit as understood by the agent
/// loader. Immutable once constructed; build one with [`AgentManifest::collect`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentManifest {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    version: String,
    entry: String,
    required_privileges: Vec<String>,
    resources: Vec<ResourceEntry>,
}

/// Raw, unvalidated field values as collected from a console prompt or a
/// config file. Privileges arrive as a single comma-separated string.
#[derive(Debug, Clone, Default)]
pub struct ManifestFields {
    pub name: String,
    pub kind: String,
    pub version: String,
    pub entry: String,
    pub privileges: String,
    pub resources: Vec<ResourceEntry>,
}

impl AgentManifest {
    /// Validate raw fields into a manifest.
    ///
    /// Name, type, version and entry are mandatory. The privilege list is
    /// split on commas; tokens are trimmed, empties discarded and
    /// duplicates collapsed (first occurrence wins).
    pub fn collect(fields: ManifestFields) -> Result<Self, Mo2Error> {
        let mandatory = [
            ("name", &fields.name),
            ("type", &fields.kind),
            ("version", &fields.version),
            ("entry", &fields.entry),
        ];
        for (label, value) in mandatory {
            if value.trim().is_empty() {
                return Err(Mo2Error::InvalidManifest(format!(
                    "missing mandatory field `{}`",
                    label
                )));
            }
        }

        let mut privileges: Vec<String> = Vec::new();
        for token in fields.privileges.split(',') {
            let token = token.trim();
            if token.is_empty() || privileges.iter().any(|p| p == token) {
                continue;
            }
            privileges.push(token.to_string());
        }

        Ok(Self {
            name: fields.name.trim().to_string(),
            kind: fields.kind.trim().to_string(),
            version: fields.version.trim().to_string(),
            entry: fields.entry.trim().to_string(),
            required_privileges: privileges,
            resources: fields.resources,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry_symbol(&self) -> &str {
        &self.entry
    }

    pub fn required_privileges(&self) -> &[String] {
        &self.required_privileges
    }

    /// Serialize to the on-disk encoding: pretty-printed JSON with a fixed
    /// field order, so identical manifests always yield identical bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        // field order is the struct declaration order; serde_json keeps it
        serde_json::to_vec_pretty(self).expect("manifest serialization cannot fail")
    }

    /// Parse manifest bytes back, re-applying the `collect` validation.
    pub fn from_bytes(data: &[u8]) -> Result<Self, Mo2Error> {
        let parsed: AgentManifest = serde_json::from_slice(data)
            .map_err(|e| Mo2Error::InvalidManifest(e.to_string()))?;

        Self::collect(ManifestFields {
            name: parsed.name,
            kind: parsed.kind,
            version: parsed.version,
            entry: parsed.entry,
            privileges: parsed.required_privileges.join(","),
            resources: parsed.resources,
        })
    }
}

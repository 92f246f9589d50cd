use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::validate::validate_name;

/// An immutable, content-addressable workload spec.
///
/// The raw YAML text is preserved byte-for-byte so the digest is stable no
/// matter how many times the manifest round-trips through the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Pod id this manifest deploys, taken from the YAML `id` key.
    pub id: String,
    /// The manifest source text.
    pub raw: String,
}

impl Manifest {
    /// Parse a manifest from YAML text. The document must be a mapping with
    /// a valid `id` key; everything else is opaque to the control plane.
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let doc: BTreeMap<String, serde_yaml::Value> =
            serde_yaml::from_str(raw).context("manifest is not a YAML mapping")?;
        let id = match doc.get("id") {
            Some(serde_yaml::Value::String(id)) => id.clone(),
            Some(_) => bail!("manifest 'id' must be a string"),
            None => bail!("manifest has no 'id' key"),
        };
        validate_name(&id)?;
        Ok(Self {
            id,
            raw: raw.to_string(),
        })
    }

    /// Read and parse a manifest file.
    pub fn from_file(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest {}", path))?;
        Self::from_yaml_str(&raw)
    }

    /// Hex SHA-256 of the manifest source text.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.raw.as_bytes());
        hex::encode(hasher.finalize())
    }
}

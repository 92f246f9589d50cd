use serde::{Deserialize, Serialize};

/// Deploy driver configuration file (YAML).
///
/// Example `config.yaml`:
/// ```yaml
/// data-dir: /var/lib/podrep/data
/// selector: app=helloworld
/// replicas: 2
/// status-port: 8080
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployConfigFile {
    #[serde(default, alias = "data-dir")]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub replicas: Option<u32>,
    #[serde(default, alias = "status-port")]
    pub status_port: Option<u16>,
    #[serde(default, alias = "node-endpoint")]
    pub node_endpoint: Option<String>,
    #[serde(default)]
    pub retries: Option<u32>,
}

/// Load a YAML config file, returning the default if the file doesn't exist.
pub fn load_config_file<T: serde::de::DeserializeOwned + Default>(path: &str) -> anyhow::Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };
    let config: T = serde_yaml::from_str(&content)?;
    Ok(config)
}

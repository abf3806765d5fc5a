use serde::Deserialize;

/// Configuration of the metadata store and lock backend.
#[derive(Debug, Deserialize)]
pub struct StateConfig {
    /// Which backend to use: `"memory"` or `"etcd"`.
    #[serde(default = "default_backend")]
    pub backend: String,

    /// etcd endpoint URLs.
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<String>,

    /// Key prefix of every stored entry.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Timeout for connecting to the backend (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            endpoints: default_endpoints(),
            prefix: default_prefix(),
            connect_timeout_seconds: default_connect_timeout(),
        }
    }
}

impl StateConfig {
    pub(crate) fn validate(&self) -> Result<(), String> {
        match self.backend.as_str() {
            "memory" => Ok(()),
            "etcd" => {
                if self.endpoints.is_empty() {
                    return Err("state.endpoints must not be empty for the etcd backend".into());
                }
                if self.prefix.is_empty() {
                    return Err("state.prefix must not be empty".into());
                }
                Ok(())
            }
            other => Err(format!(
                "unknown state backend \"{other}\", expected \"memory\" or \"etcd\""
            )),
        }
    }
}

fn default_backend() -> String {
    "memory".to_owned()
}

fn default_endpoints() -> Vec<String> {
    vec!["http://localhost:2379".to_owned()]
}

fn default_prefix() -> String {
    "sinkbridge".to_owned()
}

fn default_connect_timeout() -> u64 {
    5
}

use serde::Deserialize;

/// Remote Storage API, the `[storage_api]` table.
#[derive(Debug, Deserialize)]
pub struct StorageApiConfig {
    /// Base URL of the Storage API.
    #[serde(default = "default_host")]
    pub host: String,
    /// Token authorizing maintenance commands such as `migrate-tokens`.
    pub token: Option<String>,
    /// Timeout of a single request (seconds).
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for StorageApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            token: None,
            timeout_seconds: default_timeout(),
        }
    }
}

impl StorageApiConfig {
    pub(crate) fn validate(&self) -> Result<(), String> {
        let url = url::Url::parse(&self.host)
            .map_err(|e| format!("storage_api.host is not a valid URL: {e}"))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(format!(
                "storage_api.host must be an http(s) URL, got \"{}\"",
                self.host
            ));
        }
        if self.timeout_seconds == 0 {
            return Err("storage_api.timeout_seconds must be positive".into());
        }
        Ok(())
    }
}

fn default_host() -> String {
    "https://connection.keboola.com".to_owned()
}

fn default_timeout() -> u64 {
    60
}

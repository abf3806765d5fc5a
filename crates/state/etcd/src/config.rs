use std::time::Duration;

/// Configuration for the etcd metadata store and distributed lock backends.
#[derive(Debug, Clone)]
pub struct EtcdConfig {
    /// etcd endpoint URLs (e.g. `["http://localhost:2379"]`).
    pub endpoints: Vec<String>,

    /// Key prefix applied to every etcd key to avoid collisions.
    pub prefix: String,

    /// Timeout for establishing a connection to etcd.
    pub connect_timeout: Duration,
}

impl Default for EtcdConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![String::from("http://localhost:2379")],
            prefix: String::from("sinkbridge"),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl EtcdConfig {
    /// Build the full etcd key of a store entry.
    ///
    /// Format: `{prefix}/{key}`
    pub(crate) fn render_key(&self, key: &str) -> String {
        format!("{}/{}", self.prefix, key)
    }

    /// Strip the store prefix from a key returned by etcd.
    pub(crate) fn strip_key<'a>(&self, etcd_key: &'a str) -> &'a str {
        etcd_key
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(etcd_key)
    }

    /// Build the full etcd key for a lock entry.
    ///
    /// Format: `{prefix}/_locks/{name}`
    pub(crate) fn lock_key(&self, name: &str) -> String {
        format!("{}/_locks/{}", self.prefix, name)
    }
}

use std::collections::BTreeMap;

/// A single backend server inside an upstream block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamServer {
    pub address: String,
    pub port: String,
    pub max_fails: i64,
    pub fail_timeout: String,
    pub slow_start: Option<String>,
}

pub const DEFAULT_SERVER_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_SERVER_PORT: &str = "8181";

impl UpstreamServer {
    /// The server the proxy falls back to when a backend has zero resolved
    /// endpoints, so the proxy can still be rendered and reloaded (spec.md
    /// §3 invariants, §8 "Default-server fallback").
    pub fn default_server() -> Self {
        UpstreamServer {
            address: DEFAULT_SERVER_ADDRESS.to_string(),
            port: DEFAULT_SERVER_PORT.to_string(),
            max_fails: 1,
            fail_timeout: "10s".to_string(),
            slow_start: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    pub name: String,
    pub servers: Vec<UpstreamServer>,
}

impl Upstream {
    pub fn with_default_server(name: impl Into<String>) -> Self {
        Upstream {
            name: name.into(),
            servers: vec![UpstreamServer::default_server()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub path: String,
    pub upstream: String,
    pub rewrite: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HeaderPolicy {
    pub set: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Server {
    pub name: String,
    pub status_zone: String,
    pub locations: Vec<Location>,
    pub tls: bool,
    pub headers: HeaderPolicy,
}

/// The typed input to the template executor (spec.md §3 `ProxyConfig`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub upstreams: Vec<Upstream>,
    pub servers: Vec<Server>,
    pub keepalive: u32,
    pub ingress_namespace: String,
    pub ingress_name: String,
}

impl ProxyConfig {
    /// spec.md §8 "Upstream closure": every location's upstream must exist
    /// among `self.upstreams`.
    pub fn upstream_closure_holds(&self) -> bool {
        self.servers.iter().all(|s| {
            s.locations
                .iter()
                .all(|l| self.upstreams.iter().any(|u| u.name == l.upstream))
        })
    }
}

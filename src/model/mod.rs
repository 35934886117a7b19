pub mod ingress;
pub mod nginx;

pub use ingress::{Backend, IngressDef, IngressEx, ModelError, PortRef, Rule, RulePath};
pub use nginx::{HeaderPolicy, Location, ProxyConfig, Server, Upstream, UpstreamServer};

/// Builds the `namespace/name` identifier that is the sole key the cache and
/// queue use for a resource.
pub fn resource_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

/// Splits a `namespace/name` key back into its parts.
pub fn split_key(key: &str) -> Option<(&str, &str)> {
    key.split_once('/')
}

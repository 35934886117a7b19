pub mod store;

use std::sync::Arc;

use k8s_openapi::api::core::v1::{Endpoints, Pod, Service};
use k8s_openapi::api::networking::v1::Ingress as NetIngress;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ListParams;
use kube::Api;
use thiserror::Error;

use crate::model::{split_key, Backend, IngressDef, PortRef};

pub use store::Store;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("service {0} doesn't exist")]
    ServiceNotFound(String),
    #[error("no matching service port for backend on service {0}")]
    PortNotFound(String),
    #[error("no endpoints for target port on service {0}")]
    NoEndpoints(String),
    #[error("platform I/O error: {0}")]
    PlatformIo(#[from] kube::Error),
}

impl ResolveError {
    /// Transient platform I/O (the pod list call) is requeued with backoff;
    /// every other variant degrades the backend to an empty endpoint list
    /// and the reconcile continues (spec.md §7).
    pub fn is_transient(&self) -> bool {
        matches!(self, ResolveError::PlatformIo(_))
    }
}

/// Three typed local stores mirroring ingresses, services and endpoints,
/// plus the cross-kind indexes and the backend-port-resolution algorithm
/// that sit on top of them (spec.md §4.4).
pub struct ResourceCache {
    pub ingresses: Store<NetIngress>,
    pub services: Store<Service>,
    pub endpoints: Store<Endpoints>,
    client: kube::Client,
}

impl ResourceCache {
    pub fn new(client: kube::Client) -> Self {
        ResourceCache {
            ingresses: Store::new(),
            services: Store::new(),
            endpoints: Store::new(),
            client,
        }
    }

    /// Every ingress whose default backend or any rule backend references
    /// `service_name` in `namespace`. Computed on demand by linear scan;
    /// acceptable at this scale per spec.md §4.4.
    pub fn ingresses_by_service(&self, namespace: &str, service_name: &str) -> Vec<Arc<NetIngress>> {
        self.ingresses
            .list()
            .into_iter()
            .filter(|ing| {
                let Ok(def) = IngressDef::from_k8s(ing) else {
                    return false;
                };
                def.namespace == namespace && references_service(&def, service_name)
            })
            .collect()
    }

    /// Given an endpoints key, looks up the service of the same key, then
    /// applies `ingresses_by_service` (spec.md §4.4).
    pub fn ingresses_by_endpoints_key(&self, key: &str) -> Vec<Arc<NetIngress>> {
        let Some((namespace, name)) = split_key(key) else {
            return Vec::new();
        };
        self.ingresses_by_service(namespace, name)
    }

    /// The port-resolution algorithm of spec.md §4.4: locate the service
    /// port, derive the target port, and scan endpoint subsets for
    /// matching `{ip:port}` pairs.
    pub async fn resolve_backend_endpoints(
        &self,
        namespace: &str,
        backend: &Backend,
    ) -> Result<Vec<String>, ResolveError> {
        let svc_key = crate::model::resource_key(namespace, &backend.service_name);
        let svc = self
            .services
            .get_by_key(&svc_key)
            .ok_or_else(|| ResolveError::ServiceNotFound(svc_key.clone()))?;
        let svc_spec = svc
            .spec
            .as_ref()
            .ok_or_else(|| ResolveError::ServiceNotFound(svc_key.clone()))?;
        let ports = svc_spec.ports.as_deref().unwrap_or(&[]);

        let matched =
            find_service_port(ports, backend).ok_or_else(|| ResolveError::PortNotFound(svc_key.clone()))?;

        let target_port: i32 = match &matched.target_port {
            None => matched.port,
            Some(IntOrString::Int(n)) => *n,
            Some(IntOrString::String(name)) => {
                self.resolve_named_container_port(namespace, svc_spec, name).await?
            }
        };

        let endp = self
            .endpoints
            .get_by_key(&svc_key)
            .ok_or_else(|| ResolveError::NoEndpoints(svc_key.clone()))?;

        let result = addresses_for_target_port(&endp, target_port);
        if result.is_empty() {
            return Err(ResolveError::NoEndpoints(svc_key));
        }

        Ok(result)
    }

    async fn resolve_named_container_port(
        &self,
        namespace: &str,
        svc_spec: &k8s_openapi::api::core::v1::ServiceSpec,
        name: &str,
    ) -> Result<i32, ResolveError> {
        let selector = svc_spec
            .selector
            .as_ref()
            .ok_or_else(|| ResolveError::PortNotFound(name.to_string()))?;
        let label_selector = selector
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = pods
            .list(&ListParams::default().labels(&label_selector))
            .await?;

        // Source-ambiguous: only the first pod returned is consulted, which
        // is racy when pods are heterogeneous. Preserved verbatim; see
        // spec.md §9.
        let pod = list
            .items
            .first()
            .ok_or_else(|| ResolveError::PortNotFound(name.to_string()))?;

        let port = pod
            .spec
            .iter()
            .flat_map(|s| s.containers.iter())
            .flat_map(|c| c.ports.iter().flatten())
            .find(|p| p.name.as_deref() == Some(name))
            .ok_or_else(|| ResolveError::PortNotFound(name.to_string()))?;

        Ok(port.container_port)
    }
}

fn references_service(def: &IngressDef, service_name: &str) -> bool {
    let default_matches = def
        .default_backend
        .as_ref()
        .map_or(false, |b| b.service_name == service_name);
    let rule_matches = def
        .rules
        .iter()
        .flat_map(|r| r.paths.iter())
        .any(|p| p.backend.service_name == service_name);
    default_matches || rule_matches
}

/// Matches `backend.service_port` against a service's port list: by number
/// or by name, spec.md §4.4 port-resolution rules (a) and (b).
fn find_service_port<'a>(
    ports: &'a [k8s_openapi::api::core::v1::ServicePort],
    backend: &Backend,
) -> Option<&'a k8s_openapi::api::core::v1::ServicePort> {
    ports.iter().find(|p| match &backend.service_port {
        PortRef::Number(n) => p.port == *n,
        PortRef::Name(name) => p.name.as_deref() == Some(name.as_str()),
    })
}

/// Every `{ip}:{target_port}` pair advertised by a subset that lists
/// `target_port` among its ports.
fn addresses_for_target_port(endpoints: &Endpoints, target_port: i32) -> Vec<String> {
    let mut result = Vec::new();
    for subset in endpoints.subsets.iter().flatten() {
        let has_target_port = subset.ports.iter().flatten().any(|p| p.port == target_port);
        if !has_target_port {
            continue;
        }
        for addr in subset.addresses.iter().flatten() {
            result.push(format!("{}:{}", addr.ip, target_port));
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{EndpointAddress, EndpointPort, EndpointSubset, ServicePort};

    fn service_port(name: Option<&str>, port: i32, target_port: Option<IntOrString>) -> ServicePort {
        ServicePort {
            name: name.map(str::to_string),
            port,
            target_port,
            ..Default::default()
        }
    }

    fn endpoints_with(port: i32, ips: &[&str]) -> Endpoints {
        Endpoints {
            subsets: Some(vec![EndpointSubset {
                addresses: Some(
                    ips.iter()
                        .map(|ip| EndpointAddress {
                            ip: ip.to_string(),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ports: Some(vec![EndpointPort {
                    port,
                    ..Default::default()
                }]),
                ..Default::default()
            }]),
            ..Default::default()
        }
    }

    #[test]
    fn integer_service_port_matches_by_number() {
        let ports = vec![service_port(Some("http"), 80, None), service_port(Some("https"), 443, None)];
        let backend = Backend {
            service_name: "svc".to_string(),
            service_port: PortRef::Number(80),
        };
        let matched = find_service_port(&ports, &backend).expect("port 80 matches");
        assert_eq!(matched.port, 80);
        assert_eq!(matched.name.as_deref(), Some("http"));
    }

    #[test]
    fn symbolic_service_port_matches_by_name() {
        let ports = vec![service_port(Some("http"), 80, None)];
        let backend = Backend {
            service_name: "svc".to_string(),
            service_port: PortRef::Name("http".to_string()),
        };
        assert!(find_service_port(&ports, &backend).is_some());

        let backend = Backend {
            service_name: "svc".to_string(),
            service_port: PortRef::Name("missing".to_string()),
        };
        assert!(find_service_port(&ports, &backend).is_none());
    }

    #[test]
    fn target_port_unset_falls_back_to_service_port_for_address_lookup() {
        // `target_port: None` means the caller uses `matched.port` directly
        // as the target port (spec.md §4.4 rule), so this is what the
        // endpoint-matching side of the algorithm sees.
        let port = service_port(Some("http"), 80, None);
        assert_eq!(port.target_port, None);

        let endpoints = endpoints_with(80, &["10.0.0.1", "10.0.0.2"]);
        let addrs = addresses_for_target_port(&endpoints, port.port);
        assert_eq!(addrs, vec!["10.0.0.1:80".to_string(), "10.0.0.2:80".to_string()]);
    }

    #[test]
    fn explicit_integer_target_port_is_used_for_address_lookup() {
        let port = service_port(Some("http"), 80, Some(IntOrString::Int(8080)));
        let target_port = match port.target_port {
            None => port.port,
            Some(IntOrString::Int(n)) => n,
            Some(IntOrString::String(_)) => panic!("not this case"),
        };
        assert_eq!(target_port, 8080);

        let endpoints = endpoints_with(8080, &["10.0.0.1"]);
        assert_eq!(addresses_for_target_port(&endpoints, target_port), vec!["10.0.0.1:8080".to_string()]);
    }

    #[test]
    fn no_subset_advertises_target_port_yields_no_addresses() {
        let endpoints = endpoints_with(80, &["10.0.0.1"]);
        assert!(addresses_for_target_port(&endpoints, 8080).is_empty());
    }
}

use std::collections::BTreeSet;

use k8s_openapi::api::core::v1::{Service, ServicePort};
use kube::ResourceExt;

use crate::cache::ResourceCache;
use crate::model::resource_key;
use crate::queue::Task;

use super::{unwrap_delete, Delivery};

fn key_of(svc: &Service) -> String {
    resource_key(&svc.namespace().unwrap_or_default(), &svc.name_any())
}

/// On add/delete, or on a port-set change, enumerates the ingresses that
/// reference the service and returns one task per ingress (spec.md §4.5
/// Service handlers).
pub fn enqueue_tasks(event: &Delivery<Service>, cache: &ResourceCache) -> Vec<Task> {
    let (namespace, name) = match event {
        Delivery::Add(svc) => (svc.namespace().unwrap_or_default(), svc.name_any()),
        Delivery::Delete(del) => {
            let svc = unwrap_delete(del);
            (svc.namespace().unwrap_or_default(), svc.name_any())
        }
        Delivery::Update { old, new } => {
            if port_set(old) == port_set(new) {
                return Vec::new();
            }
            (new.namespace().unwrap_or_default(), new.name_any())
        }
    };

    cache
        .ingresses_by_service(&namespace, &name)
        .into_iter()
        .map(|ing| Task::ingress(resource_key(&ing.namespace().unwrap_or_default(), &ing.name_any())))
        .collect()
}

/// Order-insensitive comparison by `(name, port)` (spec.md §4.5).
fn port_set(svc: &Service) -> BTreeSet<(Option<String>, i32)> {
    svc.spec
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .into_iter()
        .flatten()
        .map(|p: &ServicePort| (p.name.clone(), p.port))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ServiceSpec;

    fn service_with_ports(ports: Vec<(Option<&str>, i32)>) -> Service {
        Service {
            spec: Some(ServiceSpec {
                ports: Some(
                    ports
                        .into_iter()
                        .map(|(name, port)| ServicePort {
                            name: name.map(|n| n.to_string()),
                            port,
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn reordered_identical_ports_do_not_count_as_changed() {
        let old = service_with_ports(vec![(Some("http"), 80), (Some("https"), 443)]);
        let new = service_with_ports(vec![(Some("https"), 443), (Some("http"), 80)]);
        assert_eq!(port_set(&old), port_set(&new));
    }

    #[test]
    fn adding_a_port_counts_as_changed() {
        let old = service_with_ports(vec![(Some("http"), 80)]);
        let new = service_with_ports(vec![(Some("http"), 80), (Some("https"), 443)]);
        assert_ne!(port_set(&old), port_set(&new));
    }
}

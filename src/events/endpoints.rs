use k8s_openapi::api::core::v1::Endpoints;
use kube::ResourceExt;

use crate::model::resource_key;
use crate::queue::Task;

use super::{unwrap_delete, Delivery};

fn key_of(e: &Endpoints) -> String {
    resource_key(&e.namespace().unwrap_or_default(), &e.name_any())
}

/// On add/delete/update, enqueues an `Endpoints`-kind task keyed by the
/// endpoints key if the resolved subsets differ from the previous value —
/// the concrete form of the source's `reflect.DeepEqual(old, cur)` check,
/// narrowed to the subset data so that metadata/resourceVersion churn alone
/// does not trigger a requeue (spec.md §4.5; DESIGN.md Open Question 3).
pub fn classify(event: &Delivery<Endpoints>) -> Option<Task> {
    match event {
        Delivery::Add(e) => Some(Task::endpoints(key_of(e))),
        Delivery::Delete(del) => {
            let e = unwrap_delete(del);
            Some(Task::endpoints(key_of(e)))
        }
        Delivery::Update { old, new } => {
            if old.subsets == new.subsets {
                None
            } else {
                Some(Task::endpoints(key_of(new)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{EndpointAddress, EndpointSubset};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::sync::Arc;

    fn endpoints_with_ips(ips: &[&str]) -> Endpoints {
        Endpoints {
            metadata: ObjectMeta {
                name: Some("svc".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            subsets: Some(vec![EndpointSubset {
                addresses: Some(
                    ips.iter()
                        .map(|ip| EndpointAddress {
                            ip: ip.to_string(),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }]),
        }
    }

    #[test]
    fn unchanged_subsets_do_not_enqueue() {
        let old = Arc::new(endpoints_with_ips(&["10.0.0.1"]));
        let new = old.clone();
        assert!(classify(&Delivery::Update { old, new }).is_none());
    }

    #[test]
    fn growing_subset_enqueues() {
        let old = Arc::new(endpoints_with_ips(&["10.0.0.1"]));
        let new = Arc::new(endpoints_with_ips(&["10.0.0.1", "10.0.0.2"]));
        let task = classify(&Delivery::Update { old, new }).expect("task");
        assert_eq!(task.key, "default/svc");
    }
}

use k8s_openapi::api::networking::v1::Ingress as NetIngress;
use kube::ResourceExt;

use crate::model::resource_key;
use crate::queue::Task;

use super::{class_matches, unwrap_delete, DeleteObj, Delivery};

fn key_of(ing: &NetIngress) -> String {
    resource_key(&ing.namespace().unwrap_or_default(), &ing.name_any())
}

fn matches(ing: &NetIngress, ingress_class: &str) -> bool {
    class_matches(ing.metadata.annotations.as_ref(), ingress_class)
}

/// Filters by ingress class and, for updates, by "has meaningful changes",
/// and returns the task to enqueue, if any (spec.md §4.5 Ingress handlers).
pub fn classify(event: &Delivery<NetIngress>, ingress_class: &str) -> Option<Task> {
    match event {
        Delivery::Add(ing) => {
            if !matches(ing, ingress_class) {
                log::info!("ignoring ingress {} based on ingress-class annotation", key_of(ing));
                return None;
            }
            Some(Task::ingress(key_of(ing)))
        }
        Delivery::Delete(del) => {
            let ing = unwrap_delete(del);
            if del.is_tombstone() {
                log::debug!("deletion of ingress {} arrived as a tombstone", key_of(ing));
            }
            if !matches(ing, ingress_class) {
                return None;
            }
            Some(Task::ingress(key_of(ing)))
        }
        Delivery::Update { old, new } => {
            if !matches(new, ingress_class) {
                return None;
            }
            if has_meaningful_change(old, new) {
                Some(Task::ingress(key_of(new)))
            } else {
                None
            }
        }
    }
}

/// Ignores server-populated status and resource-version churn; only `spec`
/// and non-status annotations matter (spec.md §4.5).
fn has_meaningful_change(old: &NetIngress, new: &NetIngress) -> bool {
    if old.spec != new.spec {
        return true;
    }
    relevant_annotations(old) != relevant_annotations(new)
}

fn relevant_annotations(ing: &NetIngress) -> std::collections::BTreeMap<String, String> {
    ing.metadata
        .annotations
        .clone()
        .unwrap_or_default()
        .into_iter()
        .filter(|(k, _)| k != "kubectl.kubernetes.io/last-applied-configuration")
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn ingress_with_class(class: Option<&str>) -> NetIngress {
        let mut annotations = BTreeMap::new();
        if let Some(c) = class {
            annotations.insert("kubernetes.io/ingress.class".to_string(), c.to_string());
        }
        NetIngress {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                namespace: Some("default".to_string()),
                annotations: if annotations.is_empty() { None } else { Some(annotations) },
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn empty_class_annotation_adopts() {
        let ing = ingress_with_class(Some(""));
        let task = classify(&Delivery::Add(Arc::new(ing)), "mini-ingress-nginx.controller");
        assert!(task.is_some());
    }

    #[test]
    fn absent_class_annotation_adopts() {
        let ing = ingress_with_class(None);
        let task = classify(&Delivery::Add(Arc::new(ing)), "mini-ingress-nginx.controller");
        assert!(task.is_some());
    }

    #[test]
    fn mismatched_class_is_ignored() {
        let ing = ingress_with_class(Some("other"));
        let task = classify(&Delivery::Add(Arc::new(ing)), "mini-ingress-nginx.controller");
        assert!(task.is_none());
    }

    #[test]
    fn tombstone_delete_is_unwrapped_and_enqueued() {
        let ing = Arc::new(ingress_with_class(Some("mini-ingress-nginx.controller")));
        let event = Delivery::Delete(DeleteObj::Tombstone(ing.clone()));
        let task = classify(&event, "mini-ingress-nginx.controller").expect("task");
        assert_eq!(task.key, "default/web");
    }

    #[test]
    fn update_with_no_spec_or_annotation_change_is_dropped() {
        let old = Arc::new(ingress_with_class(Some("mini-ingress-nginx.controller")));
        let new = old.clone();
        let task = classify(
            &Delivery::Update { old, new },
            "mini-ingress-nginx.controller",
        );
        assert!(task.is_none());
    }
}

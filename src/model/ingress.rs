use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fmt;

use k8s_openapi::api::core::v1::Probe;
use k8s_openapi::api::networking::v1::{Ingress as NetIngress, IngressBackend};
use kube::ResourceExt;
use thiserror::Error;

use super::resource_key;

/// A service port reference, either numeric or symbolic. See spec.md §3.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PortRef {
    Number(i32),
    Name(String),
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortRef::Number(n) => write!(f, "{n}"),
            PortRef::Name(n) => write!(f, "{n}"),
        }
    }
}

/// A `(serviceName, servicePort)` pair, as referenced by an ingress rule or
/// default backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    pub service_name: String,
    pub service_port: PortRef,
}

impl Backend {
    /// The key used to look up resolved endpoints in `IngressEx::endpoints`:
    /// `serviceName + portKey` (spec.md §3's `serviceName+portKey`).
    pub fn endpoints_key(&self) -> String {
        format!("{}{}", self.service_name, self.service_port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RulePath {
    pub path: Option<String>,
    pub backend: Backend,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub host: String,
    pub paths: Vec<RulePath>,
}

/// The parsed, typed view of an `Ingress` resource's spec, independent of the
/// raw k8s-openapi type. Built fresh from the cached object on every
/// reconcile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressDef {
    pub namespace: String,
    pub name: String,
    pub annotations: BTreeMap<String, String>,
    pub default_backend: Option<Backend>,
    pub rules: Vec<Rule>,
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("ingress {0} has no spec")]
    MissingSpec(String),
    #[error("ingress {0} backend is missing a service reference or port")]
    MissingBackendService(String),
}

impl IngressDef {
    pub fn key(&self) -> String {
        resource_key(&self.namespace, &self.name)
    }

    pub fn from_k8s(ing: &NetIngress) -> Result<Self, ModelError> {
        let namespace = ing.namespace().unwrap_or_default();
        let name = ing.name_any();
        let annotations = ing
            .metadata
            .annotations
            .clone()
            .unwrap_or_default()
            .into_iter()
            .collect();

        let spec = ing
            .spec
            .as_ref()
            .ok_or_else(|| ModelError::MissingSpec(name.clone()))?;

        let default_backend = spec
            .default_backend
            .as_ref()
            .map(|b| backend_from(&name, b))
            .transpose()?;

        let mut rules = Vec::new();
        for rule in spec.rules.iter().flatten() {
            let Some(http) = rule.http.as_ref() else {
                continue;
            };
            let host = rule.host.clone().unwrap_or_default();
            let mut paths = Vec::with_capacity(http.paths.len());
            for p in &http.paths {
                let backend = backend_from(&name, &p.backend)?;
                paths.push(RulePath {
                    path: p.path.clone(),
                    backend,
                });
            }
            rules.push(Rule { host, paths });
        }

        Ok(IngressDef {
            namespace,
            name,
            annotations,
            default_backend,
            rules,
        })
    }

    /// spec.md §4.7 syncIngress step 3: an ingress is structurally invalid if
    /// it has neither a default backend nor a rule with a non-empty host and
    /// at least one path.
    pub fn has_valid_rules(&self) -> bool {
        self.default_backend.is_some()
            || self
                .rules
                .iter()
                .any(|r| !r.host.is_empty() && !r.paths.is_empty())
    }
}

fn backend_from(ing_name: &str, b: &IngressBackend) -> Result<Backend, ModelError> {
    let svc = b
        .service
        .as_ref()
        .ok_or_else(|| ModelError::MissingBackendService(ing_name.to_string()))?;
    let port_ref = match &svc.port {
        Some(p) => {
            if let Some(n) = p.number {
                PortRef::Number(n)
            } else if let Some(name) = p.name.as_ref() {
                PortRef::Name(name.clone())
            } else {
                return Err(ModelError::MissingBackendService(ing_name.to_string()));
            }
        }
        None => return Err(ModelError::MissingBackendService(ing_name.to_string())),
    };
    Ok(Backend {
        service_name: svc.name.clone(),
        service_port: port_ref,
    })
}

/// The derived join consumed by the config generator: an ingress plus the
/// resolved endpoint lists for every backend it references. Constructed
/// fresh on each reconciliation, never stored (spec.md §3).
#[derive(Debug, Clone)]
pub struct IngressEx {
    pub ingress: IngressDef,
    pub endpoints: HashMap<String, Vec<String>>,
    pub health_checks: HashMap<String, Probe>,
}

impl IngressEx {
    pub fn new(ingress: IngressDef) -> Self {
        Self {
            ingress,
            endpoints: HashMap::new(),
            health_checks: HashMap::new(),
        }
    }

    pub fn key(&self) -> String {
        self.ingress.key()
    }
}

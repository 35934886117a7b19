use std::collections::BTreeMap;

use crate::model::{
    Backend, HeaderPolicy, IngressEx, Location, ProxyConfig, Rule, Server, Upstream,
    UpstreamServer,
};

const REWRITES_ANNOTATION: &str = "nginx.org/rewrites";

/// Folds an ingress plus its resolved endpoints into a typed proxy
/// configuration (spec.md §4.3). Pure and synchronous: no I/O, no logging
/// decisions beyond the malformed-rewrite warning spec.md calls for.
///
/// Grounded on `original_source/internal/nginx/ngx_config.go`'s
/// `generateNginxCfg`/`createUpstream`/`upstreamMapToSlice`; the rewrites
/// annotation and default-server fallback are spec-only additions with no
/// Go precedent, implemented in the same style.
pub fn generate(ing_ex: &IngressEx) -> ProxyConfig {
    let ing = &ing_ex.ingress;
    let rewrites = parse_rewrites(ing.annotations.get(REWRITES_ANNOTATION).map(String::as_str));

    // BTreeMap<name, Upstream> keeps upstreams sorted by name for free,
    // matching spec.md's "upstreams are emitted sorted by name" invariant.
    let mut upstreams: BTreeMap<String, Upstream> = BTreeMap::new();

    if let Some(default_backend) = &ing.default_backend {
        let name = upstream_name(&ing.namespace, &ing.name, "", default_backend);
        let upstream = create_upstream(ing_ex, &name, default_backend);
        upstreams.insert(name, upstream);
    }

    let mut servers = Vec::with_capacity(ing.rules.len());

    for rule in &ing.rules {
        if rule.paths.is_empty() {
            continue;
        }

        let mut locations = Vec::with_capacity(rule.paths.len());
        let mut has_root_location = false;

        for rule_path in &rule.paths {
            let ups_name = upstream_name(&ing.namespace, &ing.name, &rule.host, &rule_path.backend);
            upstreams
                .entry(ups_name.clone())
                .or_insert_with(|| create_upstream(ing_ex, &ups_name, &rule_path.backend));

            let path = path_or_default(rule_path.path.as_deref());
            if path == "/" {
                has_root_location = true;
            }
            locations.push(Location {
                rewrite: rewrites.get(&rule_path.backend.service_name).cloned(),
                path,
                upstream: ups_name,
            });
        }

        if !has_root_location {
            if let Some(default_backend) = &ing.default_backend {
                let ups_name = upstream_name(&ing.namespace, &ing.name, "", default_backend);
                locations.push(Location {
                    path: "/".to_string(),
                    upstream: ups_name,
                    rewrite: None,
                });
            }
        }

        servers.push(Server {
            name: rule.host.clone(),
            status_zone: rule.host.clone(),
            locations,
            tls: false,
            headers: HeaderPolicy::default(),
        });
    }

    ProxyConfig {
        upstreams: upstreams.into_values().collect(),
        servers,
        keepalive: 0,
        ingress_namespace: ing.namespace.clone(),
        ingress_name: ing.name.clone(),
    }
}

/// Deterministic upstream naming: `<ns>-<ing>-<host>-<svc>-<port>`, empty
/// host for the default backend (spec.md §3, §8).
fn upstream_name(namespace: &str, ingress_name: &str, host: &str, backend: &Backend) -> String {
    format!(
        "{namespace}-{ingress_name}-{host}-{}-{}",
        backend.service_name, backend.service_port
    )
}

fn create_upstream(ing_ex: &IngressEx, name: &str, backend: &Backend) -> Upstream {
    let mut upstream = Upstream::with_default_server(name);

    if let Some(endpoints) = ing_ex.endpoints.get(&backend.endpoints_key()) {
        let servers: Vec<UpstreamServer> = endpoints
            .iter()
            .filter_map(|endpoint| {
                let (address, port) = endpoint.rsplit_once(':')?;
                Some(UpstreamServer {
                    address: address.to_string(),
                    port: port.to_string(),
                    max_fails: 1,
                    fail_timeout: "10s".to_string(),
                    slow_start: None,
                })
            })
            .collect();
        if !servers.is_empty() {
            upstream.servers = servers;
        }
    }

    upstream
}

fn path_or_default(path: Option<&str>) -> String {
    match path {
        Some(p) if !p.is_empty() => p.to_string(),
        _ => "/".to_string(),
    }
}

/// Parses `"serviceName=<n> rewrite=<p>; serviceName=<n2> rewrite=<p2>"`.
/// Malformed entries are logged and skipped; valid entries in the same
/// annotation still apply (spec.md §4.3, §6, §8 "Rewrites parse").
fn parse_rewrites(annotation: Option<&str>) -> BTreeMap<String, String> {
    let mut result = BTreeMap::new();
    let Some(annotation) = annotation else {
        return result;
    };

    for raw_entry in annotation.split(';') {
        let entry = raw_entry.trim();
        if entry.is_empty() {
            continue;
        }

        let mut service_name = None;
        let mut rewrite = None;
        for token in entry.split_whitespace() {
            if let Some(v) = token.strip_prefix("serviceName=") {
                service_name = Some(v.to_string());
            } else if let Some(v) = token.strip_prefix("rewrite=") {
                rewrite = Some(v.to_string());
            }
        }

        match (service_name, rewrite) {
            (Some(name), Some(path)) => {
                result.insert(name, path);
            }
            _ => log::warn!("malformed {REWRITES_ANNOTATION} entry, skipping: {entry:?}"),
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{IngressDef, PortRef, RulePath};
    use std::collections::BTreeMap as StdBTreeMap;

    fn backend(svc: &str, port: i32) -> Backend {
        Backend {
            service_name: svc.to_string(),
            service_port: PortRef::Number(port),
        }
    }

    fn base_ingress_def() -> IngressDef {
        IngressDef {
            namespace: "default".to_string(),
            name: "web".to_string(),
            annotations: StdBTreeMap::new(),
            default_backend: None,
            rules: Vec::new(),
        }
    }

    #[test]
    fn single_rule_two_endpoints() {
        let mut ing = base_ingress_def();
        ing.rules.push(Rule {
            host: "ex.com".to_string(),
            paths: vec![RulePath {
                path: Some("/".to_string()),
                backend: backend("svc", 80),
            }],
        });
        let mut ing_ex = IngressEx::new(ing);
        ing_ex.endpoints.insert(
            "svc80".to_string(),
            vec!["10.0.0.1:8080".to_string(), "10.0.0.2:8080".to_string()],
        );

        let pc = generate(&ing_ex);
        assert_eq!(pc.upstreams.len(), 1);
        assert_eq!(pc.upstreams[0].name, "default-web-ex.com-svc-80");
        assert_eq!(pc.upstreams[0].servers.len(), 2);
        assert_eq!(pc.servers.len(), 1);
        assert_eq!(pc.servers[0].name, "ex.com");
        assert_eq!(pc.servers[0].locations.len(), 1);
        assert_eq!(pc.servers[0].locations[0].path, "/");
        assert_eq!(pc.servers[0].locations[0].upstream, "default-web-ex.com-svc-80");
    }

    #[test]
    fn default_backend_only_has_no_servers() {
        let mut ing = base_ingress_def();
        ing.default_backend = Some(backend("def", 80));
        let ing_ex = IngressEx::new(ing);

        let pc = generate(&ing_ex);
        assert_eq!(pc.upstreams.len(), 1);
        assert_eq!(pc.upstreams[0].name, "default-web--def-80");
        assert_eq!(pc.upstreams[0].servers, vec![UpstreamServer::default_server()]);
        assert!(pc.servers.is_empty());
    }

    #[test]
    fn missing_service_falls_back_to_default_server() {
        let mut ing = base_ingress_def();
        ing.rules.push(Rule {
            host: "ex.com".to_string(),
            paths: vec![RulePath {
                path: None,
                backend: backend("nope", 80),
            }],
        });
        let ing_ex = IngressEx::new(ing);

        let pc = generate(&ing_ex);
        assert_eq!(pc.upstreams[0].servers, vec![UpstreamServer::default_server()]);
    }

    #[test]
    fn non_root_path_falls_back_to_default_backend_for_root() {
        let mut ing = base_ingress_def();
        ing.default_backend = Some(backend("def", 80));
        ing.rules.push(Rule {
            host: "ex.com".to_string(),
            paths: vec![RulePath {
                path: Some("/api".to_string()),
                backend: backend("svc", 80),
            }],
        });
        let ing_ex = IngressEx::new(ing);

        let pc = generate(&ing_ex);
        assert_eq!(pc.servers[0].locations.len(), 2);
        assert!(pc.servers[0].locations.iter().any(|l| l.path == "/api"));
        let root = pc.servers[0]
            .locations
            .iter()
            .find(|l| l.path == "/")
            .expect("synthetic root location");
        assert_eq!(root.upstream, "default-web--def-80");
    }

    #[test]
    fn upstream_closure_holds_for_generated_config() {
        let mut ing = base_ingress_def();
        ing.default_backend = Some(backend("def", 80));
        ing.rules.push(Rule {
            host: "ex.com".to_string(),
            paths: vec![RulePath {
                path: Some("/api".to_string()),
                backend: backend("svc", 80),
            }],
        });
        let ing_ex = IngressEx::new(ing);
        assert!(generate(&ing_ex).upstream_closure_holds());
    }

    #[test]
    fn rewrites_parse_valid_entries_and_skip_malformed() {
        let rewrites = parse_rewrites(Some("serviceName=api rewrite=/v1; serviceName=web rewrite=/"));
        let mut expected = BTreeMap::new();
        expected.insert("api".to_string(), "/v1".to_string());
        expected.insert("web".to_string(), "/".to_string());
        assert_eq!(rewrites, expected);

        let malformed = parse_rewrites(Some("serviceName=api"));
        assert!(malformed.is_empty());
    }

    #[test]
    fn rewrite_applies_to_location_for_matching_service() {
        let mut ing = base_ingress_def();
        ing.annotations.insert(
            "nginx.org/rewrites".to_string(),
            "serviceName=svc rewrite=/v2".to_string(),
        );
        ing.rules.push(Rule {
            host: "ex.com".to_string(),
            paths: vec![RulePath {
                path: Some("/".to_string()),
                backend: backend("svc", 80),
            }],
        });
        let ing_ex = IngressEx::new(ing);
        let pc = generate(&ing_ex);
        assert_eq!(pc.servers[0].locations[0].rewrite.as_deref(), Some("/v2"));
    }

    #[test]
    fn generation_is_deterministic_across_runs() {
        let mut ing = base_ingress_def();
        ing.rules.push(Rule {
            host: "ex.com".to_string(),
            paths: vec![
                RulePath { path: Some("/a".to_string()), backend: backend("a", 80) },
                RulePath { path: Some("/b".to_string()), backend: backend("b", 80) },
            ],
        });
        let ing_ex = IngressEx::new(ing);
        let first = generate(&ing_ex);
        let second = generate(&ing_ex);
        assert_eq!(first, second);

        // upstream order must be lexical regardless of rule-path order.
        let names: Vec<&str> = first.upstreams.iter().map(|u| u.name.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }
}

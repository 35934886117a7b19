use std::path::Path;

use crate::error::Error;
use crate::model::ProxyConfig;

/// Loads the main and ingress config templates once at startup and renders
/// them against typed input. Grounded on
/// `original_source/internal/nginx/template_executor.go`'s
/// `TemplateExecutor`: same load-once/execute-many shape, but the Go
/// `html/template` engine is replaced by the minimal placeholder
/// substitution spec.md's nginx output actually needs (spec.md §4.2).
pub struct TemplateExecutor {
    main_template: String,
    ingress_template: String,
}

impl TemplateExecutor {
    pub async fn new(main_template_path: &Path, ingress_template_path: &Path) -> Result<Self, Error> {
        let main_template = tokio::fs::read_to_string(main_template_path).await?;
        let ingress_template = tokio::fs::read_to_string(ingress_template_path).await?;
        Ok(TemplateExecutor {
            main_template,
            ingress_template,
        })
    }

    /// Lets the ingress template be swapped at runtime, mirroring the Go
    /// source's `UpdateIngressTemplate`.
    pub fn update_ingress_template(&mut self, template_string: String) {
        self.ingress_template = template_string;
    }

    pub fn render_main(&self) -> String {
        self.main_template.clone()
    }

    /// Fails closed if `cfg` violates the upstream closure invariant
    /// (spec.md §8 "Upstream closure") rather than silently emitting a
    /// `proxy_pass` to an upstream block that was never written — the
    /// renderer's one genuine failure mode (spec.md §7 "Render failure").
    pub fn render_ingress(&self, cfg: &ProxyConfig) -> Result<String, Error> {
        if !cfg.upstream_closure_holds() {
            return Err(Error::Render(format!(
                "{}/{}: a location references an upstream missing from PC.Upstreams",
                cfg.ingress_namespace, cfg.ingress_name
            )));
        }

        let upstreams = render_upstreams(cfg);
        let servers = render_servers(cfg);
        Ok(self
            .ingress_template
            .replace("{{NAMESPACE}}", &cfg.ingress_namespace)
            .replace("{{NAME}}", &cfg.ingress_name)
            .replace("{{UPSTREAMS}}", &upstreams)
            .replace("{{SERVERS}}", &servers))
    }
}

fn render_upstreams(cfg: &ProxyConfig) -> String {
    let mut out = String::new();
    for upstream in &cfg.upstreams {
        out.push_str(&format!("upstream {} {{\n", upstream.name));
        for server in &upstream.servers {
            out.push_str(&format!(
                "    server {}:{} max_fails={} fail_timeout={};\n",
                server.address, server.port, server.max_fails, server.fail_timeout
            ));
        }
        out.push_str("}\n\n");
    }
    out
}

fn render_servers(cfg: &ProxyConfig) -> String {
    let mut out = String::new();
    for server in &cfg.servers {
        out.push_str("server {\n");
        out.push_str("    listen 80;\n");
        out.push_str(&format!("    server_name {};\n", server.name));
        out.push_str(&format!("    status_zone {};\n\n", server.status_zone));
        for (name, value) in &server.headers.set {
            out.push_str(&format!("    add_header {name} {value};\n"));
        }
        for location in &server.locations {
            out.push_str(&format!("    location {} {{\n", location.path));
            if let Some(rewrite) = &location.rewrite {
                out.push_str(&format!("        rewrite ^ {rewrite} break;\n"));
            }
            out.push_str(&format!("        proxy_pass http://{};\n", location.upstream));
            out.push_str("    }\n");
        }
        out.push_str("}\n\n");
    }
    out
}

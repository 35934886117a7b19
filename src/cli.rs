use std::path::PathBuf;

use clap::Parser;

pub const DEFAULT_NAMESPACE: &str = "mini-nginx-ingress";
pub const DEFAULT_INGRESS_CLASS: &str = "mini-ingress-nginx.controller";
const DEFAULT_MAIN_TEMPLATE_PATH: &str = "/etc/nginx/templates/nginx.tmpl";
const DEFAULT_INGRESS_TEMPLATE_PATH: &str = "/etc/nginx/templates/ingress.tmpl";
const DEFAULT_MAIN_CONFIG_PATH: &str = "/etc/nginx/nginx.conf";
const DEFAULT_CONFD_PATH: &str = "/etc/nginx";
const DEFAULT_NGINX_BINARY_PATH: &str = "/usr/sbin/nginx";

/// Command-line configuration (spec.md §6). Injected into the top-level
/// constructor rather than read from process globals anywhere downstream
/// (spec.md §9 "Configuration as globals"), generalizing the teacher's
/// `clap`-free, env-driven config in the direction the `cloudflared-ingress-rs`
/// example repo takes with `clap::Parser` derive.
#[derive(Debug, Parser)]
#[command(name = "mini-ingress-nginx", version, about)]
pub struct Cli {
    /// If non-empty, build the platform client from this URL (test mode; no
    /// proxy process is started).
    #[arg(long, default_value = "")]
    pub proxy: String,

    /// Namespace to watch.
    #[arg(long, default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Value compared against the `kubernetes.io/ingress.class` annotation.
    #[arg(long = "ingress-class", default_value = DEFAULT_INGRESS_CLASS)]
    pub ingress_class: String,

    /// Override the default main nginx config template.
    #[arg(long = "main-template-path", default_value = DEFAULT_MAIN_TEMPLATE_PATH)]
    pub main_template_path: PathBuf,

    /// Override the default per-ingress config template.
    #[arg(long = "ingress-template-path", default_value = DEFAULT_INGRESS_TEMPLATE_PATH)]
    pub ingress_template_path: PathBuf,

    /// Path to the rendered main nginx config file.
    #[arg(long = "main-config-path", default_value = DEFAULT_MAIN_CONFIG_PATH)]
    pub main_config_path: PathBuf,

    /// Root directory nginx's `conf.d` lives under.
    #[arg(long = "confd-path", default_value = DEFAULT_CONFD_PATH)]
    pub confd_path: PathBuf,

    /// Path to the nginx binary.
    #[arg(long = "nginx-binary-path", default_value = DEFAULT_NGINX_BINARY_PATH)]
    pub nginx_binary_path: String,
}

impl Cli {
    pub fn is_local(&self) -> bool {
        !self.proxy.is_empty()
    }
}

pub mod config_gen;
pub mod proxy_controller;
pub mod state;
pub mod template_executor;

pub use proxy_controller::ProxyController;
pub use state::NginxState;
pub use template_executor::TemplateExecutor;

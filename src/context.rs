use crate::cli::Cli;

/// Shared, read-only state handed to every informer task and the queue
/// worker. Generalizes the teacher's `Context { client }` (`context.rs`
/// is absent from the teacher as a standalone file — it constructs the
/// struct inline in `controllers/mod.rs::run` — widened here to also carry
/// the parsed CLI config so downstream code never reads process globals
/// (spec.md §9).
pub struct Context {
    pub client: kube::Client,
    pub config: Cli,
}

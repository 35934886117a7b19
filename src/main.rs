mod cache;
mod cli;
mod context;
mod controller;
mod error;
mod events;
mod model;
mod nginx;
mod queue;

use std::sync::Arc;

use clap::Parser;
use log::{error, info};
use tokio::sync::watch;

use cli::Cli;
use context::Context;

pub const OPERATOR_MANAGER: &str = "mini-ingress-nginx";

async fn build_client(cli: &Cli) -> anyhow::Result<kube::Client> {
    if !cli.is_local() {
        return Ok(kube::Client::try_default().await?);
    }

    info!("test mode: building platform client from {}", cli.proxy);
    let mut config = kube::Config::infer().await?;
    config.cluster_url = cli.proxy.parse()?;
    Ok(kube::Client::try_from(config)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    info!(
        "starting {OPERATOR_MANAGER}, namespace={}, ingress-class={}",
        cli.namespace, cli.ingress_class
    );

    let client = build_client(&cli).await?;
    let ctx = Arc::new(Context { client, config: cli });

    let local = ctx.config.is_local();
    let namespace = ctx.config.namespace.clone();
    let ingress_class = ctx.config.ingress_class.clone();

    let proxy = nginx::ProxyController::new(
        ctx.config.confd_path.clone(),
        ctx.config.nginx_binary_path.clone(),
        local,
    );
    let templates =
        nginx::TemplateExecutor::new(&ctx.config.main_template_path, &ctx.config.ingress_template_path).await?;
    let mut nginx_state = nginx::NginxState::new(proxy, templates);
    nginx_state.write_main_config(&ctx.config.main_config_path).await?;
    nginx_state.proxy_mut().start().await?;

    let cache = Arc::new(cache::ResourceCache::new(ctx.client.clone()));
    let queue = Arc::new(queue::TaskQueue::new());
    let engine = Arc::new(controller::ReconcileEngine::new(cache, queue, ingress_class));

    let (stop_tx, stop_rx) = watch::channel(false);

    let informers_engine = engine.clone();
    let informers_client = ctx.client.clone();
    let informers_stop = stop_rx.clone();
    let informers_fut = tokio::spawn(async move {
        informers_engine.run_informers(informers_client, &namespace, informers_stop).await;
    });

    let worker_engine = engine.clone();
    let worker_stop = stop_rx.clone();
    let mut worker_fut = tokio::spawn(async move {
        let result = worker_engine.run_worker(&mut nginx_state, worker_stop).await;
        (nginx_state, result)
    });

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    // Races operator-requested shutdown against the worker ending on its
    // own, which only happens if the nginx child exits unexpectedly
    // (spec.md §7: "child crash -> process-fatal, exit 1"). `worker_fut`
    // is polled at most once to completion across both branches below, so
    // its output is only ever taken a single time.
    let early_outcome = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received interrupt, shutting down");
            None
        }
        _ = sigterm.recv() => {
            info!("received terminate, shutting down");
            None
        }
        outcome = &mut worker_fut => {
            error!("nginx proxy exited before a shutdown signal was received");
            Some(outcome)
        }
    };

    let _ = stop_tx.send(true);
    let _ = informers_fut.await;

    let outcome = match early_outcome {
        Some(outcome) => outcome,
        None => worker_fut.await,
    };

    let (mut nginx_state, worker_result) = match outcome {
        Ok(outcome) => outcome,
        Err(err) => {
            error!("worker task panicked: {err}");
            std::process::exit(1);
        }
    };

    let _ = nginx_state.proxy_mut().quit().await;

    if let Err(err) = worker_result {
        error!("nginx exited unexpectedly: {err}");
        std::process::exit(1);
    }

    info!("shutdown complete");
    Ok(())
}

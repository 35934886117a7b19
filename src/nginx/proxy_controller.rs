use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::anyhow;
use log::info;
use tokio::fs;
use tokio::process::{Child, Command};

use crate::error::Error;

/// Owns the nginx config directory, the child nginx process, and the reload
/// counter. Shaped after the Go source's `nginx.Controller`
/// (`nginx.go`'s `nginxConfdPath`/`local`/`nginxBinaryPath`/`configVersion`
/// fields); the actual spawn/reload mechanics are grounded on the teacher's
/// `frpc/mod.rs` (`run`/`reload`, which shell out to a managed binary via
/// `tokio::process::Command`).
pub struct ProxyController {
    confd_path: PathBuf,
    nginx_binary_path: String,
    local: bool,
    config_version: u64,
    child: Option<Child>,
}

impl ProxyController {
    pub fn new(conf_path: impl Into<PathBuf>, nginx_binary_path: impl Into<String>, local: bool) -> Self {
        ProxyController {
            confd_path: conf_path.into().join("conf.d"),
            nginx_binary_path: nginx_binary_path.into(),
            local,
            config_version: 0,
            child: None,
        }
    }

    pub fn confd_path(&self) -> &Path {
        &self.confd_path
    }

    async fn ensure_confd(&self) -> Result<(), Error> {
        fs::create_dir_all(&self.confd_path).await?;
        Ok(())
    }

    /// Writes the top-level nginx config. Called once at startup, before the
    /// process is spawned.
    pub async fn update_main_config(&self, conf_path: &Path, contents: &str) -> Result<(), Error> {
        fs::write(conf_path, contents).await?;
        info!("wrote main nginx config to {}", conf_path.display());
        Ok(())
    }

    /// Writes (or overwrites) `<confd>/<key>.conf` for one ingress. `key`
    /// must already be filesystem-safe (spec.md §4.1 `<namespace>-<name>.conf`
    /// naming; callers pass `namespace-name`, never the raw `namespace/name`
    /// key used elsewhere).
    pub async fn update_ingress_config(&self, key: &str, contents: &str) -> Result<(), Error> {
        self.ensure_confd().await?;
        let path = self.confd_path.join(format!("{key}.conf"));
        fs::write(&path, contents).await?;
        info!("wrote ingress config {} to {}", key, path.display());
        Ok(())
    }

    pub async fn delete_ingress(&self, key: &str) -> Result<(), Error> {
        let path = self.confd_path.join(format!("{key}.conf"));
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("removed ingress config {}", path.display());
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Spawns nginx in the foreground. In `local` mode (spec.md §6's `--proxy
    /// local` test mode) no process is started at all, matching the Go
    /// source's `local` escape hatch for running outside a real cluster.
    pub async fn start(&mut self) -> Result<(), Error> {
        if self.local {
            info!("local mode: not starting nginx binary");
            return Ok(());
        }

        let child = Command::new(&self.nginx_binary_path)
            .args(["-g", "daemon off;"])
            .stdin(Stdio::null())
            .spawn()
            .map_err(|err| anyhow!("failed to spawn {}: {err}", self.nginx_binary_path))?;
        self.child = Some(child);
        info!("started nginx ({})", self.nginx_binary_path);
        Ok(())
    }

    /// Blocks until the child process exits, returning its exit status. A
    /// caller should treat any non-success exit as fatal (spec.md §7).
    pub async fn wait(&mut self) -> Result<std::process::ExitStatus, Error> {
        match self.child.as_mut() {
            Some(child) => child
                .wait()
                .await
                .map_err(|err| anyhow!("nginx process error: {err}").into()),
            None => std::future::pending().await,
        }
    }

    /// Signals nginx to reload its config without dropping connections.
    /// Grounded on the teacher's `frpc::reload`, which spawns the binary a
    /// second time with a `reload` subcommand; nginx instead takes `-s
    /// reload` against the same binary.
    pub async fn reload(&mut self) -> Result<(), Error> {
        self.config_version += 1;
        if self.local {
            info!("local mode: skipping reload (version {})", self.config_version);
            return Ok(());
        }

        let status = Command::new(&self.nginx_binary_path)
            .args(["-s", "reload"])
            .stdin(Stdio::null())
            .spawn()
            .map_err(|err| anyhow!("failed to spawn reload: {err}"))?
            .wait()
            .await
            .map_err(|err| anyhow!("nginx reload output error: {err}"))?;

        if !status.success() {
            return Err(anyhow!("nginx reload exited with status: {status:?}").into());
        }

        info!("reloaded nginx (version {})", self.config_version);
        Ok(())
    }

    pub fn config_version(&self) -> u64 {
        self.config_version
    }

    /// Gracefully stops nginx via `-s quit`, then reaps the child.
    pub async fn quit(&mut self) -> Result<(), Error> {
        if self.local || self.child.is_none() {
            return Ok(());
        }

        let _ = Command::new(&self.nginx_binary_path)
            .args(["-s", "quit"])
            .stdin(Stdio::null())
            .spawn()
            .map_err(|err| anyhow!("failed to spawn quit: {err}"))?
            .wait()
            .await;

        if let Some(mut child) = self.child.take() {
            let _ = child.wait().await;
        }
        info!("nginx stopped");
        Ok(())
    }
}

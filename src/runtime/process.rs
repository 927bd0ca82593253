//! External-process server runtime.
//!
//! Launches an OPC UA server executable with the configuration path as its
//! last argument. The executable owns configuration loading, certificates and
//! the network stack.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, info, instrument, warn};

use super::ServerRuntime;
use crate::config::ServerConfig;

/// Runtime that runs the OPC UA server as a child process.
#[derive(Debug, Clone)]
pub struct ProcessRuntime {
    exec: Option<String>,
    args: Vec<String>,
    startup_grace: Duration,
}

impl ProcessRuntime {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            exec: config.exec.clone(),
            args: config.args.clone(),
            startup_grace: config.startup_grace(),
        }
    }
}

/// A running server process. Killed when dropped.
#[derive(Debug)]
pub struct ServerProcess {
    child: Child,
}

impl ServerProcess {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Exit status if the server has already stopped.
    pub fn try_status(&mut self) -> Result<Option<ExitStatus>> {
        self.child.try_wait().context("Failed to poll OPC UA server")
    }
}

#[async_trait]
impl ServerRuntime for ProcessRuntime {
    type Handle = ServerProcess;

    #[instrument(skip(self, config_path), fields(exec = ?self.exec, config = %config_path.display()))]
    async fn start(&self, config_path: &Path) -> Result<ServerProcess> {
        let exec = self
            .exec
            .as_deref()
            .context("No OPC UA server executable configured")?;

        anyhow::ensure!(
            config_path.is_file(),
            "Server configuration not found: {}",
            config_path.display()
        );

        debug!(args = ?self.args, "Spawning OPC UA server");

        // stdout belongs to the line channel; route the server's output to stderr.
        let mut child = Command::new(exec)
            .args(&self.args)
            .arg(config_path)
            .stdin(Stdio::null())
            .stdout(std::io::stderr())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn OPC UA server: {exec}"))?;

        if let Ok(status) = tokio::time::timeout(self.startup_grace, child.wait()).await {
            let status = status.context("Failed to wait for OPC UA server")?;
            anyhow::bail!("OPC UA server exited during startup ({status})");
        }

        info!(pid = child.id(), "OPC UA server started");
        Ok(ServerProcess { child })
    }

    async fn shutdown(&self, mut handle: ServerProcess) -> Result<()> {
        if let Some(status) = handle.try_status()? {
            warn!(%status, "OPC UA server had already exited");
            return Ok(());
        }

        handle
            .child
            .kill()
            .await
            .context("Failed to stop OPC UA server")?;

        debug!("OPC UA server stopped");
        Ok(())
    }
}

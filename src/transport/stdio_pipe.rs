//! Parent-side handle to a test server process.
//!
//! Owns the harness child process and talks to it over its stdin (control
//! messages) and stdout (status messages). Test runners use this to bring a
//! server up, wait for `Ready`, and shut it down again.

use std::ffi::OsStr;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::protocol::{InMessage, OutMessage};
use super::{listen, ChannelError, Sender, MAX_LINE_LENGTH};

/// A running test server child process.
///
/// The child is killed if this handle is dropped without `shutdown()`.
pub struct TestServerProcess {
    child: Child,
    stdin: Option<Sender<InMessage, ChildStdin>>,
    messages: BoxStream<'static, Result<OutMessage, ChannelError>>,
}

impl TestServerProcess {
    /// Spawn the server and wait for its `Ready` message.
    ///
    /// `Log` and `Payload` messages sent before `Ready` are skipped. An
    /// `Error` message, end of output, or `ready_timeout` elapsing fails.
    pub async fn spawn<I, S>(
        exec: impl AsRef<OsStr>,
        args: I,
        ready_timeout: Duration,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let exec = exec.as_ref();
        debug!(exec = ?exec, "Spawning test server");

        let mut child = Command::new(exec)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn test server: {}", exec.to_string_lossy()))?;

        let stdin = child.stdin.take().context("Failed to take server stdin")?;
        let stdout = child.stdout.take().context("Failed to take server stdout")?;

        let mut server = Self {
            child,
            stdin: Some(Sender::new(stdin)),
            messages: listen::<OutMessage, _>(stdout, MAX_LINE_LENGTH, CancellationToken::new()).boxed(),
        };

        tokio::time::timeout(ready_timeout, server.wait_for_ready())
            .await
            .map_err(|_| anyhow::anyhow!("Server did not send Ready within {ready_timeout:?}"))??;

        Ok(server)
    }

    async fn wait_for_ready(&mut self) -> Result<()> {
        loop {
            match self.receive_message().await? {
                Some(OutMessage::Ready) => {
                    debug!("Server is ready");
                    return Ok(());
                }
                Some(OutMessage::Error { message }) => {
                    anyhow::bail!("Server failed to start: {message}");
                }
                Some(OutMessage::Log { message }) => debug!(%message, "Server log"),
                Some(OutMessage::Payload { .. }) => debug!("Skipping payload sent before Ready"),
                None => anyhow::bail!("Server exited before sending Ready"),
            }
        }
    }

    /// Next status message from the server, or `None` once its output ends.
    pub async fn receive_message(&mut self) -> Result<Option<OutMessage>> {
        self.messages
            .next()
            .await
            .transpose()
            .context("Failed to read message from server")
    }

    /// Send a control message to the server.
    pub async fn send(&self, message: InMessage) -> Result<()> {
        let stdin = self.stdin.as_ref().context("Server stdin is already closed")?;
        stdin
            .send(message)
            .await
            .context("Failed to send message to server")
    }

    /// Check whether the server process is still running.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Ask the server to shut down and wait for it to exit.
    ///
    /// Sends `Shutdown`, closes the server's stdin, and drains its remaining
    /// output. The process is killed if it has not exited within `timeout`.
    pub async fn shutdown(mut self, timeout: Duration) -> Result<ExitStatus> {
        if let Err(e) = self.send(InMessage::Shutdown).await {
            warn!(error = %e, "Graceful shutdown request failed");
        }
        // Closing stdin also unblocks a server still waiting on a read.
        self.stdin = None;

        let messages = &mut self.messages;
        let child = &mut self.child;
        let drain = async {
            while let Some(message) = messages.next().await {
                match message {
                    Ok(message) => debug!(?message, "Server message during shutdown"),
                    Err(e) => {
                        warn!(error = %e, "Unreadable server output during shutdown");
                        break;
                    }
                }
            }
            child.wait().await
        };

        if let Ok(status) = tokio::time::timeout(timeout, drain).await {
            let status = status.context("Failed to wait for server")?;
            debug!(%status, "Server exited");
            return Ok(status);
        }

        warn!(?timeout, "Server did not exit in time, killing it");
        self.child.kill().await.context("Failed to kill server")?;
        self.child.wait().await.context("Failed to wait for server")
    }
}

//! Harness control loop.
//!
//! Starts the OPC UA server, reports `Ready` (or a fatal `Error`), then waits
//! on the inbound channel until the parent asks for a shutdown. Transitions:
//!
//! ```text
//! Starting -> Running -> ShuttingDown -> Stopped
//! Starting -> Failed
//! ```

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::runtime::ServerRuntime;
use crate::transport::{listen, ChannelError, InMessage, OutMessage, Sender};

/// Lifecycle state of the harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarnessState {
    Starting,
    Running,
    ShuttingDown,
    Stopped,
    Failed,
}

impl fmt::Display for HarnessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::ShuttingDown => "shutting_down",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// How a harness run finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Shut down after a request, end of input or cancellation.
    Clean,
    /// The server never started.
    StartupFailed,
}

impl Outcome {
    /// Process exit code for this outcome.
    pub const fn code(self) -> u8 {
        match self {
            Self::Clean => 0,
            Self::StartupFailed => 1,
        }
    }
}

/// Drives one server through its lifecycle over a line channel.
pub struct Harness<R, W> {
    runtime: R,
    config_path: PathBuf,
    max_line_length: usize,
    outbound: Arc<Sender<OutMessage, W>>,
    cancel: CancellationToken,
    state: HarnessState,
}

impl<R, W> Harness<R, W>
where
    R: ServerRuntime,
    W: AsyncWrite + Unpin,
{
    /// Create a harness that reports to `writer`.
    pub fn new(runtime: R, config: &Config, writer: W) -> Self {
        Self {
            runtime,
            config_path: config.resolved_config_path(),
            max_line_length: config.channel.max_line_length,
            outbound: Arc::new(Sender::new(writer)),
            cancel: CancellationToken::new(),
            state: HarnessState::Starting,
        }
    }

    pub const fn state(&self) -> HarnessState {
        self.state
    }

    /// Token that stops the run loop when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Shared handle for emitting extra `Log`/`Payload` messages.
    pub fn outbound(&self) -> Arc<Sender<OutMessage, W>> {
        Arc::clone(&self.outbound)
    }

    fn transition(&mut self, next: HarnessState) {
        debug!(from = %self.state, to = %next, "Harness state change");
        self.state = next;
    }

    /// Run the harness until the server is stopped.
    ///
    /// Returns `Outcome::StartupFailed` if the server could not be started
    /// (after reporting an `Error` message). Channel faults while running are
    /// reported as an `Error` message and returned as errors.
    pub async fn run<I>(mut self, input: I) -> Result<Outcome>
    where
        I: AsyncRead + Unpin,
    {
        info!(config = %self.config_path.display(), "Starting OPC UA server");

        let server = match self.runtime.start(&self.config_path).await {
            Ok(server) => server,
            Err(e) => {
                error!(error = %format!("{e:#}"), "Server failed to start");
                self.outbound
                    .send(OutMessage::error(format!("Fatal error: {e:#}")))
                    .await?;
                self.transition(HarnessState::Failed);
                return Ok(Outcome::StartupFailed);
            }
        };

        self.outbound.send(OutMessage::Ready).await?;
        self.transition(HarnessState::Running);
        info!("Server is ready");

        let fault = self.serve(input).await;

        if self.state == HarnessState::Running {
            self.transition(HarnessState::ShuttingDown);
        }
        self.cancel.cancel();

        if let Err(e) = self.runtime.shutdown(server).await {
            warn!(error = %format!("{e:#}"), "Error shutting down server");
        }
        self.transition(HarnessState::Stopped);

        if let Some(e) = fault {
            error!(error = %e, "Inbound channel failed");
            self.outbound
                .send(OutMessage::error(format!("Inbound channel fault: {e}")))
                .await?;
            return Err(e.into());
        }

        info!("Server stopped");
        Ok(Outcome::Clean)
    }

    /// Consume inbound messages until shutdown, end of input or cancellation.
    async fn serve<I>(&mut self, input: I) -> Option<ChannelError>
    where
        I: AsyncRead + Unpin,
    {
        let inbound = listen::<InMessage, _>(input, self.max_line_length, self.cancel.clone());
        tokio::pin!(inbound);

        while let Some(message) = inbound.next().await {
            match message {
                Ok(InMessage::Shutdown) => {
                    info!("Shutdown requested");
                    self.transition(HarnessState::ShuttingDown);
                    return self.outbound.send(OutMessage::log("Shutting down")).await.err();
                }
                Err(e) => return Some(e),
            }
        }

        if self.cancel.is_cancelled() {
            info!("Harness cancelled");
        } else {
            warn!("Input closed without a shutdown request");
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::io::{AsyncReadExt, DuplexStream};

    #[derive(Default)]
    struct Counters {
        started: AtomicUsize,
        stopped: AtomicUsize,
    }

    struct MockRuntime {
        fail: bool,
        counters: Arc<Counters>,
    }

    impl MockRuntime {
        fn new(fail: bool) -> (Self, Arc<Counters>) {
            let counters = Arc::new(Counters::default());
            (
                Self {
                    fail,
                    counters: Arc::clone(&counters),
                },
                counters,
            )
        }
    }

    #[async_trait]
    impl ServerRuntime for MockRuntime {
        type Handle = ();

        async fn start(&self, config_path: &Path) -> Result<()> {
            if self.fail {
                anyhow::bail!("cannot load {}", config_path.display());
            }
            self.counters.started.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn shutdown(&self, _handle: ()) -> Result<()> {
            self.counters.stopped.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn harness(fail: bool) -> (Harness<MockRuntime, DuplexStream>, DuplexStream, Arc<Counters>) {
        let (runtime, counters) = MockRuntime::new(fail);
        let (writer, reader) = tokio::io::duplex(4096);
        let config = Config::from_json(r#"{"server": {"config_path": "/srv/test.conf"}}"#).unwrap();
        (Harness::new(runtime, &config, writer), reader, counters)
    }

    async fn read_messages(mut reader: DuplexStream) -> Vec<OutMessage> {
        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        out.lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn startup_failure_reports_error() {
        let (harness, output, counters) = harness(true);
        let outcome = harness.run(&b""[..]).await.unwrap();
        assert_eq!(outcome, Outcome::StartupFailed);
        assert_eq!(outcome.code(), 1);

        let messages = read_messages(output).await;
        assert_eq!(messages.len(), 1);
        let OutMessage::Error { message } = &messages[0] else {
            panic!("expected error, got {messages:?}");
        };
        assert!(message.starts_with("Fatal error: "));
        assert!(message.contains("/srv/test.conf"));
        assert_eq!(counters.stopped.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn ready_then_shutdown() {
        let (harness, output, counters) = harness(false);
        assert_eq!(harness.state(), HarnessState::Starting);

        let outcome = harness.run(&b"{\"type\":\"shutdown\"}\n"[..]).await.unwrap();
        assert_eq!(outcome, Outcome::Clean);
        assert_eq!(outcome.code(), 0);

        let messages = read_messages(output).await;
        assert_eq!(messages, vec![OutMessage::Ready, OutMessage::log("Shutting down")]);
        assert_eq!(counters.started.load(Ordering::SeqCst), 1);
        assert_eq!(counters.stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn messages_after_shutdown_are_not_read() {
        let (harness, output, _counters) = harness(false);
        let outcome = harness
            .run(&b"{\"type\":\"shutdown\"}\n{\"type\":\"bogus\"}\n"[..])
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Clean);
        assert_eq!(read_messages(output).await.len(), 2);
    }

    #[tokio::test]
    async fn end_of_input_shuts_down_cleanly() {
        let (harness, output, counters) = harness(false);
        let outcome = harness.run(&b"\n"[..]).await.unwrap();
        assert_eq!(outcome, Outcome::Clean);
        assert_eq!(read_messages(output).await, vec![OutMessage::Ready]);
        assert_eq!(counters.stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn bad_line_is_fatal() {
        let (harness, output, counters) = harness(false);
        let err = harness
            .run(&b"{\"type\":\"bogus\"}\n{\"type\":\"shutdown\"}\n"[..])
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<ChannelError>().is_some());

        let messages = read_messages(output).await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], OutMessage::Ready);
        assert!(matches!(&messages[1], OutMessage::Error { message } if message.contains("bogus")));
        assert_eq!(counters.stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_while_waiting_for_input() {
        let (harness, output, counters) = harness(false);
        let cancel = harness.cancellation_token();
        // Input that never delivers anything.
        let (_input_writer, input) = tokio::io::duplex(64);

        let run = tokio::spawn(harness.run(input));
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("harness did not stop after cancellation")
            .unwrap()
            .unwrap();
        assert_eq!(outcome, Outcome::Clean);
        assert_eq!(read_messages(output).await, vec![OutMessage::Ready]);
        assert_eq!(counters.stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn outbound_handle_emits_payloads() {
        let (harness, output, _counters) = harness(false);
        let outbound = harness.outbound();
        let (mut input_writer, input) = tokio::io::duplex(64);

        let run = tokio::spawn(harness.run(input));
        outbound
            .send(OutMessage::payload(&serde_json::json!({"port": 62546})).unwrap())
            .await
            .unwrap();
        drop(outbound);

        tokio::io::AsyncWriteExt::write_all(&mut input_writer, b"{\"type\":\"shutdown\"}\n")
            .await
            .unwrap();
        assert_eq!(run.await.unwrap().unwrap(), Outcome::Clean);

        let messages = read_messages(output).await;
        assert!(messages.contains(&OutMessage::Ready));
        assert!(messages.contains(&OutMessage::Payload {
            payload: serde_json::json!({"port": 62546})
        }));
    }
}

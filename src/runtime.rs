//! OPC UA server runtime trait and implementations.
//!
//! The harness treats the server as an opaque collaborator: it can be started
//! from a configuration file and shut down again. Protocol, certificate and
//! network details stay inside the runtime.

mod process;

pub use process::{ProcessRuntime, ServerProcess};

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

/// Trait for OPC UA server runtimes.
///
/// `start` either returns a running server or one descriptive error; there is
/// no half-started state. Dropping a handle must also stop the server.
#[async_trait]
pub trait ServerRuntime: Send + Sync {
    /// Owned handle to a running server.
    type Handle: Send;

    /// Load configuration from `config_path` and begin serving.
    async fn start(&self, config_path: &Path) -> Result<Self::Handle>;

    /// Stop the server and release its resources.
    async fn shutdown(&self, handle: Self::Handle) -> Result<()>;
}

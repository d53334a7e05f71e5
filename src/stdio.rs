//! Process stdio entry points.
//!
//! A worker process reads commands from stdin and writes responses to
//! stdout. Nothing else may write to stdout: logs belong on stderr, and
//! `println!` must not be used anywhere in a worker.
//!
//! # Example
//!
//! ```no_run
//! use serde_json::{json, Value};
//!
//! fn main() -> cmdpipe::Result<()> {
//!     cmdpipe::start(|cmd: Value| json!({ "seen": cmd }))?;
//!     Ok(())
//! }
//! ```

use tokio::io::{Stdin, Stdout};

use crate::dispatcher::{Dispatcher, DispatcherBuilder, Shutdown};
use crate::error::Result;
use crate::handler::Processor;

impl DispatcherBuilder {
    /// Bind the configuration to the process's stdin and stdout.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build_stdio<P: Processor>(self, processor: P) -> Dispatcher<Stdin, Stdout> {
        self.build(tokio::io::stdin(), tokio::io::stdout(), processor)
    }
}

/// Run a dispatcher on stdin/stdout with default settings, blocking the
/// calling thread until a termination envelope arrives or stdin closes.
///
/// # Errors
///
/// Returns an error if the runtime cannot be started or stdin fails.
pub fn start<P: Processor>(processor: P) -> Result<Shutdown> {
    start_with(DispatcherBuilder::new(), processor)
}

/// Like [`start`], with explicit configuration.
///
/// Builds its own multi-threaded tokio runtime. When the run ends the
/// runtime is shut down in the background: without
/// [`drain_on_terminate`](DispatcherBuilder::drain_on_terminate), commands
/// still in flight are abandoned.
pub fn start_with<P: Processor>(builder: DispatcherBuilder, processor: P) -> Result<Shutdown> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let result = runtime.block_on(async move { builder.build_stdio(processor).run().await });

    // A pending stdin read holds a blocking-pool thread that would stall a
    // regular drop.
    runtime.shutdown_background();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[tokio::test]
    async fn test_build_stdio_does_not_panic() {
        // We can't drive the real stdin in tests, only check construction.
        let _dispatcher = DispatcherBuilder::new().build_stdio(|cmd: Value| cmd);
        let _dispatcher = Dispatcher::stdio(|cmd: Value| cmd);
    }
}

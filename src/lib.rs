//! # cmdpipe
//!
//! Line-oriented JSON command dispatcher for worker (child) processes.
//!
//! A host process writes command envelopes to the worker's stdin; the worker
//! runs each command through a single [`Processor`] and writes one response
//! line per command to stdout, correlated by id.
//!
//! ## Protocol
//!
//! - **Inbound** (whitespace-delimited tokens):
//!   `{"Id":7,"Cmd":{"op":"double","n":21},"Signal":-1}`
//! - **Outbound** (one line each): `{"id":7,"data":{"result":42}}`
//! - Signal `-1` runs the command, `1` stops the worker, anything else is
//!   ignored.
//!
//! Commands run concurrently, so responses may arrive in any order. All
//! output goes through a single writer task, one envelope per line.
//!
//! ## Example
//!
//! ```no_run
//! use serde_json::{json, Value};
//!
//! fn main() -> cmdpipe::Result<()> {
//!     let shutdown = cmdpipe::start(|cmd: Value| {
//!         let n = cmd["n"].as_i64().unwrap_or(0);
//!         json!({ "result": 2 * n })
//!     })?;
//!
//!     eprintln!("stopped: {:?}", shutdown.reason);
//!     Ok(())
//! }
//! ```

pub mod diagnostics;
pub mod error;
pub mod handler;
pub mod protocol;

mod dispatcher;
mod stdio;
mod writer;

pub use dispatcher::{Dispatcher, DispatcherBuilder, Shutdown, ShutdownReason};
pub use error::{DispatchError, Result};
pub use handler::{PanicPolicy, Processor};
pub use stdio::{start, start_with};

//! Double Worker - simple command/response example.
//!
//! This example demonstrates:
//! - Running a worker on stdin/stdout with `cmdpipe::start_with`
//! - A processor that reads its arguments from the command payload
//! - Logging to stderr so stdout stays reserved for responses
//!
//! # Running by hand
//!
//! ```text
//! $ RUST_LOG=debug cargo run --example double
//! {"Id":7,"Cmd":{"op":"double","n":21},"Signal":-1}
//! {"id":7,"data":{"result":42}}
//! {"Id":8,"Cmd":{},"Signal":1}
//! ```

use cmdpipe::{DispatcherBuilder, PanicPolicy};
use serde_json::{json, Value};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn process(cmd: Value) -> Value {
    match cmd["op"].as_str() {
        Some("double") => json!({ "result": 2 * cmd["n"].as_i64().unwrap_or(0) }),
        Some(op) => json!({ "error": format!("unknown op: {}", op) }),
        None => json!({}),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr; stdout carries responses only.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let builder = DispatcherBuilder::new()
        .drain_on_terminate(true)
        .panic_policy(PanicPolicy::ErrorPayload);

    let shutdown = cmdpipe::start_with(builder, process)?;
    tracing::info!(reason = ?shutdown.reason, dispatched = shutdown.dispatched, "Worker exiting");

    Ok(())
}

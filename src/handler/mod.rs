//! Handler module - the processor capability and per-command tasks.
//!
//! Provides:
//! - [`Processor`] - the application's `Value -> Value` command handler
//! - [`PanicPolicy`] - what a panicking processor puts on the wire
//!
//! The dispatcher spawns one handler task per command; see
//! [`Dispatcher`](crate::Dispatcher).

mod processor;
mod task;

pub use processor::Processor;
pub use task::PanicPolicy;

pub(crate) use task::HandlerContext;

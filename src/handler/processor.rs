//! The processor capability supplied by the embedding application.
//!
//! A processor maps one command payload to one result payload. It is called
//! synchronously on the blocking worker pool, so it may do CPU-bound or
//! blocking work, and many calls may run in parallel.
//!
//! Any `Fn(Value) -> Value + Send + Sync + 'static` is a processor.
//!
//! # Example
//!
//! ```
//! use cmdpipe::handler::Processor;
//! use serde_json::{json, Value};
//!
//! let double = |cmd: Value| json!({ "result": cmd["n"].as_i64().unwrap_or(0) * 2 });
//! assert_eq!(double.process(json!({"n": 21})), json!({"result": 42}));
//! ```

use serde_json::Value;

/// Maps a command payload to its result payload.
///
/// There is no "no result": return `Value::Null` or an empty object when a
/// command has nothing to report.
pub trait Processor: Send + Sync + 'static {
    /// Process one command payload.
    fn process(&self, cmd: Value) -> Value;
}

impl<F> Processor for F
where
    F: Fn(Value) -> Value + Send + Sync + 'static,
{
    #[inline]
    fn process(&self, cmd: Value) -> Value {
        self(cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    struct Echo;

    impl Processor for Echo {
        fn process(&self, cmd: Value) -> Value {
            json!({ "echo": cmd })
        }
    }

    #[test]
    fn test_closure_processor() {
        let processor = |cmd: Value| json!({ "keys": cmd.as_object().map_or(0, |m| m.len()) });

        assert_eq!(processor.process(json!({"a": 1, "b": 2})), json!({"keys": 2}));
        assert_eq!(processor.process(Value::Null), json!({"keys": 0}));
    }

    #[test]
    fn test_struct_processor_as_trait_object() {
        let processor: Arc<dyn Processor> = Arc::new(Echo);

        assert_eq!(
            processor.process(json!({"test": "a"})),
            json!({"echo": {"test": "a"}})
        );
    }
}

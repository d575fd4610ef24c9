//! Reporting interface for user-facing replies.

use std::sync::Arc;

use serde_json::Value;

use crate::{MessageCode, Reply};

/// Sink for replies produced while serving a command.
///
/// Implementations must be cheap to call and must not block; replies are
/// emitted from inside fan-out futures.
pub trait Reporter: Send + Sync {
    /// Emits one reply.
    fn report(&self, reply: Reply);

    /// Emits a debug `text` reply.
    fn debug(&self, text: &str) {
        self.report(Reply::text(MessageCode::Debug, text));
    }

    /// Emits an info `text` reply.
    fn info(&self, text: &str) {
        self.report(Reply::text(MessageCode::Info, text));
    }

    /// Emits a warning `text` reply.
    fn warning(&self, text: &str) {
        self.report(Reply::text(MessageCode::Warning, text));
    }

    /// Emits a reply with one keyword.
    fn keyword(&self, code: MessageCode, key: &str, values: Vec<Value>) {
        self.report(Reply::keyword(code, key, values));
    }
}

impl<R: Reporter + ?Sized> Reporter for Arc<R> {
    fn report(&self, reply: Reply) {
        (**self).report(reply);
    }
}

impl<R: Reporter + ?Sized> Reporter for &R {
    fn report(&self, reply: Reply) {
        (**self).report(reply);
    }
}

/// Reporter that drops every reply.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn report(&self, _reply: Reply) {}
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Collect(Mutex<Vec<Reply>>);

    impl Reporter for Collect {
        fn report(&self, reply: Reply) {
            self.0.lock().unwrap().push(reply);
        }
    }

    #[test]
    fn test_default_methods_build_text_replies() {
        let sink = Collect::default();
        sink.warning("gfa1: not pinging back");
        sink.debug("gfa1: pulling image");

        let replies = sink.0.lock().unwrap();
        assert_eq!(replies[0].code, MessageCode::Warning);
        assert_eq!(replies[0].text_value(), Some("gfa1: not pinging back"));
        assert_eq!(replies[1].code, MessageCode::Debug);
    }

    #[test]
    fn test_arc_dyn_forwards() {
        let sink = Arc::new(Collect::default());
        let dynamic: Arc<dyn Reporter> = sink.clone();
        dynamic.info("hello");
        assert_eq!(sink.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_null_reporter_accepts_everything() {
        let sink = NullReporter;
        sink.warning("ignored");
        sink.keyword(MessageCode::Info, "node", vec![Value::Bool(true)]);
    }
}

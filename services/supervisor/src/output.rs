//! Reply output for the binary.

use std::io::Write;
use std::sync::Mutex;

use convoy_protocol::{Reply, Reporter};
use tracing::warn;

/// Writes every reply as one JSON object per line.
pub struct JsonLinesReporter<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesReporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl JsonLinesReporter<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> Reporter for JsonLinesReporter<W> {
    fn report(&self, reply: Reply) {
        let line = match serde_json::to_string(&reply) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to serialize reply");
                return;
            }
        };

        let mut out = self
            .out
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
            warn!(error = %e, "Failed to write reply");
        }
    }
}

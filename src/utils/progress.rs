// erpload/src/utils/progress.rs
use std::sync::{Arc, Mutex};

/// Destination for operator-facing progress lines.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, line: &str);
}

/// Writes every line to stderr so stdout stays usable for listings.
pub struct ConsoleSink;

impl ProgressSink for ConsoleSink {
    fn emit(&self, line: &str) {
        eprintln!("{}", line);
    }
}

/// Forwards progress lines into the tracing pipeline.
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn emit(&self, line: &str) {
        tracing::info!(target: "erpload::progress", "{}", line);
    }
}

/// Keeps every line in memory, for posting to a remote log server and for tests.
#[derive(Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(lines) => lines.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ProgressSink for MemorySink {
    fn emit(&self, line: &str) {
        match self.lines.lock() {
            Ok(mut lines) => lines.push(line.to_string()),
            Err(poisoned) => poisoned.into_inner().push(line.to_string()),
        }
    }
}

/// Cheap, clonable handle passed into every component call.
#[derive(Clone, Default)]
pub struct Reporter {
    sinks: Vec<Arc<dyn ProgressSink>>,
}

impl Reporter {
    /// A reporter that discards everything.
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn say(&self, line: impl AsRef<str>) {
        let line = line.as_ref();
        for sink in &self.sinks {
            sink.emit(line);
        }
    }
}

/// Reports progress over a byte stream at each 10% boundary.
pub struct ProgressMeter {
    reporter: Reporter,
    label: String,
    total: Option<u64>,
    done: u64,
    next: u64,
    finished: bool,
}

impl ProgressMeter {
    pub fn new(reporter: Reporter, label: impl Into<String>, total: Option<u64>) -> Self {
        let label = label.into();
        // A zero-sized payload gives no usable percentage either.
        let total = total.filter(|t| *t > 0);
        if total.is_none() {
            reporter.say(format!("Note: no progress percentage available for {}.", label));
        }
        Self {
            reporter,
            label,
            total,
            done: 0,
            next: 10,
            finished: false,
        }
    }

    pub fn advance(&mut self, bytes: usize) {
        self.done += bytes as u64;
        let Some(total) = self.total else {
            return;
        };
        let pct = (self.done.saturating_mul(100) / total).min(100);
        if pct >= self.next && pct < 100 {
            let boundary = pct / 10 * 10;
            self.reporter.say(format!("{}: {}%", self.label, boundary));
            self.next = boundary + 10;
        }
    }

    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if self.total.is_some() {
            self.reporter.say(format!("{}: 100%", self.label));
        } else {
            self.reporter.say(format!("{}: {} bytes done", self.label, self.done));
        }
    }
}

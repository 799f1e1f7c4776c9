//! Progress Reporting
//!
//! Progress events emitted by the executor, waiter, orchestrator and bulk
//! runner, plus the sinks that render them.

use chrono::Local;
use std::time::Duration;

/// Type of operation being performed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationType {
    Start,
    Stop,
    Delete,
    Enable,
    Disable,
    Redeploy,
    Other(String),
}

impl OperationType {
    pub fn from_verb(verb: &str) -> Self {
        match verb {
            "start" => Self::Start,
            "stop" => Self::Stop,
            "enable" => Self::Enable,
            "disable" => Self::Disable,
            "redeploy" => Self::Redeploy,
            v if v.starts_with("delete") => Self::Delete,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            Self::Start => "Start",
            Self::Stop => "Stop",
            Self::Delete => "Delete",
            Self::Enable => "Enable",
            Self::Disable => "Disable",
            Self::Redeploy => "Redeploy",
            Self::Other(name) => name,
        }
    }

    pub fn past_tense(&self) -> &str {
        match self {
            Self::Start => "Started",
            Self::Stop => "Stopped",
            Self::Delete => "Deleted",
            Self::Enable => "Enabled",
            Self::Disable => "Disabled",
            Self::Redeploy => "Redeployed",
            Self::Other(_) => "Completed",
        }
    }
}

/// A single progress event
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// A batch of `count` items of one kind is about to run
    StageStarted { stage: String, count: usize },
    /// One item finished
    ItemFinished {
        operation: OperationType,
        item: String,
        error: Option<String>,
        elapsed: Duration,
    },
    /// A waited condition was polled and is not yet reached
    WaitTick {
        description: String,
        elapsed: Duration,
        status: String,
    },
    /// Dry-run listing entry
    Planned { item: String, action: String },
}

/// Receiver of progress events. Implementations must be cheap and non-blocking.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Human-readable progress lines on stderr
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn emit(&self, event: ProgressEvent) {
        eprintln!("[{}] {}", Local::now().format("%H:%M:%S"), render(&event));
    }
}

/// Format a progress event as a single line
pub fn render(event: &ProgressEvent) -> String {
    match event {
        ProgressEvent::StageStarted { stage, count } => {
            format!("▸ {} ({} item{})", stage, count, if *count == 1 { "" } else { "s" })
        }
        ProgressEvent::ItemFinished {
            operation,
            item,
            error: None,
            elapsed,
        } => format!(
            "✓ {} {} ({})",
            operation.past_tense(),
            item,
            duration_display(*elapsed)
        ),
        ProgressEvent::ItemFinished {
            operation,
            item,
            error: Some(err),
            ..
        } => format!("✗ {} {} failed - {}", operation.display_name(), item, err),
        ProgressEvent::WaitTick {
            description,
            elapsed,
            status,
        } => format!(
            "↻ {} [{}] {}",
            description,
            duration_display(*elapsed),
            status
        ),
        ProgressEvent::Planned { item, action } => format!("◯ {} {}", action, item),
    }
}

/// Format a duration for display
pub fn duration_display(d: Duration) -> String {
    if d.as_secs() < 1 {
        format!("{}ms", d.as_millis())
    } else if d.as_secs() < 60 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}m{}s", d.as_secs() / 60, d.as_secs() % 60)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Sink that records every event for assertions
    #[derive(Default)]
    pub struct RecordingProgress {
        pub events: Mutex<Vec<ProgressEvent>>,
    }

    impl RecordingProgress {
        pub fn events(&self) -> Vec<ProgressEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl ProgressSink for RecordingProgress {
        fn emit(&self, event: ProgressEvent) {
            self.events.lock().unwrap().push(event);
        }
    }
}

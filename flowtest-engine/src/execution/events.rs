// Execution Events
// Progress reporting and event types for suite runs

use crate::model::{ExecutionStatus, RunStats};

use std::time::Duration;
use tokio::sync::mpsc;

/// Sender for execution progress events
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiver for execution progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Events emitted during a run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// Run started with the number of discovered suites
    RunStarted { total_suites: usize },

    /// Run completed
    RunCompleted {
        success: bool,
        stats: RunStats,
        duration: Duration,
    },

    /// Suite execution started
    SuiteStarted {
        node_id: String,
        suite_name: String,
        total_steps: usize,
    },

    /// Suite execution completed
    SuiteCompleted {
        node_id: String,
        suite_name: String,
        status: ExecutionStatus,
        duration: Duration,
    },

    /// Suite was not executed (failed dependency, fail-fast, cycle)
    SuiteSkipped { node_id: String, reason: String },

    /// Suite outcome was served from the dependency cache
    SuiteCached { node_id: String },

    /// Step execution started
    StepStarted {
        node_id: String,
        step_name: String,
        step_index: usize,
    },

    /// Step execution completed
    StepCompleted {
        node_id: String,
        step_name: String,
        step_index: usize,
        status: ExecutionStatus,
        duration: Duration,
    },

    /// Step was skipped after an earlier failure
    StepSkipped {
        node_id: String,
        step_name: String,
        step_index: usize,
        reason: String,
    },

    /// A suite published an exported variable
    VariableExported {
        node_id: String,
        name: String,
        value: String,
    },

    /// Log message (info, warning, error)
    Log {
        level: LogLevel,
        message: String,
        node_id: Option<String>,
    },
}

/// Log level for log events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl ExecutionEvent {
    pub fn run_started(total_suites: usize) -> Self {
        Self::RunStarted { total_suites }
    }

    pub fn run_completed(success: bool, stats: RunStats, duration: Duration) -> Self {
        Self::RunCompleted {
            success,
            stats,
            duration,
        }
    }

    pub fn suite_started(
        node_id: impl Into<String>,
        suite_name: impl Into<String>,
        total_steps: usize,
    ) -> Self {
        Self::SuiteStarted {
            node_id: node_id.into(),
            suite_name: suite_name.into(),
            total_steps,
        }
    }

    pub fn suite_completed(
        node_id: impl Into<String>,
        suite_name: impl Into<String>,
        status: ExecutionStatus,
        duration: Duration,
    ) -> Self {
        Self::SuiteCompleted {
            node_id: node_id.into(),
            suite_name: suite_name.into(),
            status,
            duration,
        }
    }

    pub fn suite_skipped(node_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SuiteSkipped {
            node_id: node_id.into(),
            reason: reason.into(),
        }
    }

    pub fn suite_cached(node_id: impl Into<String>) -> Self {
        Self::SuiteCached {
            node_id: node_id.into(),
        }
    }

    pub fn step_started(
        node_id: impl Into<String>,
        step_name: impl Into<String>,
        step_index: usize,
    ) -> Self {
        Self::StepStarted {
            node_id: node_id.into(),
            step_name: step_name.into(),
            step_index,
        }
    }

    pub fn step_completed(
        node_id: impl Into<String>,
        step_name: impl Into<String>,
        step_index: usize,
        status: ExecutionStatus,
        duration: Duration,
    ) -> Self {
        Self::StepCompleted {
            node_id: node_id.into(),
            step_name: step_name.into(),
            step_index,
            status,
            duration,
        }
    }

    pub fn step_skipped(
        node_id: impl Into<String>,
        step_name: impl Into<String>,
        step_index: usize,
        reason: impl Into<String>,
    ) -> Self {
        Self::StepSkipped {
            node_id: node_id.into(),
            step_name: step_name.into(),
            step_index,
            reason: reason.into(),
        }
    }

    pub fn variable_exported(
        node_id: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::VariableExported {
            node_id: node_id.into(),
            name: name.into(),
            value: value.into(),
        }
    }

    /// Create an info log event
    pub fn info(message: impl Into<String>, node_id: Option<String>) -> Self {
        Self::Log {
            level: LogLevel::Info,
            message: message.into(),
            node_id,
        }
    }

    /// Create a warning log event
    pub fn warning(message: impl Into<String>, node_id: Option<String>) -> Self {
        Self::Log {
            level: LogLevel::Warning,
            message: message.into(),
            node_id,
        }
    }

    /// Create an error log event
    pub fn error(message: impl Into<String>, node_id: Option<String>) -> Self {
        Self::Log {
            level: LogLevel::Error,
            message: message.into(),
            node_id,
        }
    }
}

/// Helper trait for sending events, ignoring errors (fire-and-forget)
pub trait EventSender {
    fn send_event(&self, event: ExecutionEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: ExecutionEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: ExecutionEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_progress_channel() {
        let (tx, mut rx) = progress_channel();

        tx.send_event(ExecutionEvent::run_started(2));
        tx.send_event(ExecutionEvent::suite_started("auth", "Auth", 3));

        let event1 = rx.recv().await.unwrap();
        assert!(matches!(event1, ExecutionEvent::RunStarted { total_suites: 2 }));

        let event2 = rx.recv().await.unwrap();
        assert!(matches!(event2, ExecutionEvent::SuiteStarted { .. }));
    }

    #[test]
    fn test_event_construction() {
        let event = ExecutionEvent::step_completed(
            "auth",
            "Login",
            0,
            ExecutionStatus::Success,
            Duration::from_millis(120),
        );

        if let ExecutionEvent::StepCompleted {
            node_id,
            step_name,
            step_index,
            status,
            duration,
        } = event
        {
            assert_eq!(node_id, "auth");
            assert_eq!(step_name, "Login");
            assert_eq!(step_index, 0);
            assert_eq!(status, ExecutionStatus::Success);
            assert_eq!(duration, Duration::from_millis(120));
        } else {
            panic!("wrong event type");
        }
    }

    #[test]
    fn test_optional_sender() {
        let sender: Option<ProgressSender> = None;
        // Should not panic
        sender.send_event(ExecutionEvent::info("test", None));
    }
}

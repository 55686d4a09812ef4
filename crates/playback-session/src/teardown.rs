//! Best-effort step sequencing for native teardown.
//!
//! Every step runs even if earlier ones failed or panicked. Failures are
//! logged and collected, never propagated.

use std::panic::{self, AssertUnwindSafe};

use playback_types::SessionId;

use crate::error::EngineError;

/// One failed teardown step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TeardownFailure {
    pub step: &'static str,
    pub reason: String,
}

/// Outcome of a teardown sequence.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub steps_run: usize,
    pub failures: Vec<TeardownFailure>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed(&self, step: &str) -> bool {
        self.failures.iter().any(|f| f.step == step)
    }
}

/// Runs teardown steps one after another, isolating each one's failure.
pub struct BestEffort {
    session: Option<SessionId>,
    report: TeardownReport,
}

impl BestEffort {
    pub fn new(session: Option<SessionId>) -> Self {
        Self {
            session,
            report: TeardownReport::default(),
        }
    }

    /// Run one step. Errors and panics are recorded and the sequence continues.
    pub fn step<F>(&mut self, step: &'static str, f: F) -> &mut Self
    where
        F: FnOnce() -> Result<(), EngineError>,
    {
        self.report.steps_run += 1;
        let reason = match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(payload) => Some(panic_message(payload.as_ref())),
        };
        if let Some(reason) = reason {
            tracing::warn!(
                session = ?self.session,
                step,
                reason = %reason,
                "teardown step failed"
            );
            self.report.failures.push(TeardownFailure { step, reason });
        }
        self
    }

    pub fn finish(self) -> TeardownReport {
        self.report
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

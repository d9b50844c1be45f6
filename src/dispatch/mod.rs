use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use log::{error, info};

use crate::pipeline::{Job, JobOutcome};
use crate::report;
use crate::telegram::{Notifier, TriggerEvent};

/// What to do with an incoming message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDecision {
    Blank,
    Mismatch,
    Start,
}

/// Only an exact (trimmed) match of the trigger token starts a job.
pub fn classify(text: Option<&str>, trigger: &str) -> TriggerDecision {
    match text.map(str::trim) {
        None | Some("") => TriggerDecision::Blank,
        Some(t) if t == trigger => TriggerDecision::Start,
        Some(_) => TriggerDecision::Mismatch,
    }
}

/// A job that ended by panicking instead of returning an outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPanic(pub String);

impl JobPanic {
    pub fn from_payload(payload: Box<dyn std::any::Any + Send>) -> Self {
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Self(format!("panic: {msg}"))
    }
}

/// Runs `job`, turning a panic into [`JobPanic`].
pub fn run_guarded(job: &dyn Job) -> Result<JobOutcome, JobPanic> {
    panic::catch_unwind(AssertUnwindSafe(|| job.run_once())).map_err(JobPanic::from_payload)
}

/// Ties a trigger to the job and sends every notice back to the chat.
pub struct Dispatcher {
    job: Arc<dyn Job>,
    notifier: Arc<dyn Notifier>,
    trigger: String,
}

impl Dispatcher {
    pub fn new(job: Arc<dyn Job>, notifier: Arc<dyn Notifier>, trigger: impl Into<String>) -> Self {
        Self {
            job,
            notifier,
            trigger: trigger.into(),
        }
    }

    fn notify(&self, chat_id: i64, text: &str) {
        info!("{}", text);
        self.notifier.send(chat_id, text);
    }

    pub fn decide(&self, event: &TriggerEvent) -> TriggerDecision {
        classify(event.text.as_deref(), &self.trigger)
    }

    /// Answer non-triggers; returns `true` when a job should run.
    pub fn screen(&self, event: &TriggerEvent) -> bool {
        match self.decide(event) {
            TriggerDecision::Blank => {
                self.notify(event.chat_id, report::BLANK_TRIGGER);
                false
            }
            TriggerDecision::Mismatch => {
                self.notify(event.chat_id, report::TRIGGER_MISMATCH);
                false
            }
            TriggerDecision::Start => {
                self.notify(event.chat_id, report::JOB_STARTED);
                true
            }
        }
    }

    pub fn run(&self) -> Result<JobOutcome, JobPanic> {
        run_guarded(self.job.as_ref())
    }

    pub fn report(&self, chat_id: i64, result: Result<JobOutcome, JobPanic>) {
        let text = match result {
            Ok(outcome) => report::render(&outcome),
            Err(JobPanic(status)) => {
                error!("job aborted: {}", status);
                report::unknown_status(&status)
            }
        };
        self.notify(chat_id, &text);
    }

    /// Screen, run and report on the calling thread.
    pub fn handle(&self, event: &TriggerEvent) {
        info!("new request from chat {}", event.chat_id);
        if self.screen(event) {
            let result = self.run();
            self.report(event.chat_id, result);
        }
    }
}

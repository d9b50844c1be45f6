use std::thread;
use std::time::Duration;

use log::{error, info};

use crate::config;
use crate::dispatch::Dispatcher;
use crate::telegram::{TelegramClient, TelegramError, Update};

const RETRY_DELAY: Duration = Duration::from_secs(1);
const BATCH_DELAY: Duration = Duration::from_millis(500);

/// Long-polling bot. Triggers are handled one at a time on the polling
/// thread, so the next update is fetched only after the current job ends.
pub struct Poller<'a> {
    telegram: &'a TelegramClient,
    dispatcher: &'a Dispatcher,
    offset: Option<i64>,
    timeout_secs: u64,
}

impl<'a> Poller<'a> {
    pub fn new(telegram: &'a TelegramClient, dispatcher: &'a Dispatcher) -> Self {
        Self {
            telegram,
            dispatcher,
            offset: None,
            timeout_secs: config::POLL_TIMEOUT_SECS,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn offset(&self) -> Option<i64> {
        self.offset
    }

    /// Drop any webhook so `getUpdates` is allowed. A failure is logged and
    /// polling goes ahead anyway.
    pub fn drop_webhook(&self) -> bool {
        match self.telegram.delete_webhook(true) {
            Ok(()) => true,
            Err(e) => {
                error!("deleteWebhook failed: {}", e);
                false
            }
        }
    }

    pub fn run(&mut self) -> ! {
        self.drop_webhook();
        info!("polling for updates");
        loop {
            match self.poll_once() {
                Ok(_) => thread::sleep(BATCH_DELAY),
                Err(e) => {
                    error!("getUpdates failed: {}", e);
                    thread::sleep(RETRY_DELAY);
                }
            }
        }
    }

    /// Fetch one batch and handle it. Returns the number of updates seen.
    pub fn poll_once(&mut self) -> Result<usize, TelegramError> {
        let updates = self.telegram.get_updates(self.offset, self.timeout_secs)?;
        let n = updates.len();
        if let Some(next) = process_updates(self.dispatcher, &updates) {
            self.offset = Some(next);
        }
        Ok(n)
    }
}

/// Handle `updates` in order; returns the next offset to ask for.
pub fn process_updates(dispatcher: &Dispatcher, updates: &[Update]) -> Option<i64> {
    let mut next = None;
    for upd in updates {
        next = Some(upd.update_id + 1);
        match upd.event() {
            Some(event) => dispatcher.handle(&event),
            None => error!("update {} has no chat id, skipping", upd.update_id),
        }
    }
    next
}

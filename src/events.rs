// Session event hooks
//
// The front end registers one handler per event kind; registering again
// replaces the previous handler. Handlers run on the poller or transport
// task and must not call back into the session on the same stack.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Why the target stopped, when the poller can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopReason {
    Exception,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Exception => "exception",
        }
    }
}

pub type StopHandler = Box<dyn Fn(Option<StopReason>) + Send + Sync>;
pub type StdoutHandler = Box<dyn Fn(&str) + Send + Sync>;
pub type ErrorHandler = Box<dyn Fn() + Send + Sync>;
pub type CloseHandler = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
pub struct EventHooks {
    stop: Mutex<Option<StopHandler>>,
    stdout: Mutex<Option<StdoutHandler>>,
    error: Mutex<Option<ErrorHandler>>,
    close: Mutex<Option<CloseHandler>>,
}

impl EventHooks {
    pub fn on_stop(&self, handler: StopHandler) {
        if let Ok(mut slot) = self.stop.lock() {
            *slot = Some(handler);
        }
    }

    pub fn on_stdout(&self, handler: StdoutHandler) {
        if let Ok(mut slot) = self.stdout.lock() {
            *slot = Some(handler);
        }
    }

    pub fn on_error(&self, handler: ErrorHandler) {
        if let Ok(mut slot) = self.error.lock() {
            *slot = Some(handler);
        }
    }

    pub fn on_close(&self, handler: CloseHandler) {
        if let Ok(mut slot) = self.close.lock() {
            *slot = Some(handler);
        }
    }

    pub fn emit_stop(&self, reason: Option<StopReason>) {
        debug!("emitting stop, reason: {:?}", reason);
        if let Ok(slot) = self.stop.lock() {
            if let Some(handler) = slot.as_ref() {
                handler(reason);
            }
        }
    }

    pub fn emit_stdout(&self, text: &str) {
        if let Ok(slot) = self.stdout.lock() {
            if let Some(handler) = slot.as_ref() {
                handler(text);
            }
        }
    }

    pub fn emit_error(&self) {
        if let Ok(slot) = self.error.lock() {
            if let Some(handler) = slot.as_ref() {
                handler();
            }
        }
    }

    pub fn emit_close(&self) {
        if let Ok(slot) = self.close.lock() {
            if let Some(handler) = slot.as_ref() {
                handler();
            }
        }
    }
}

impl std::fmt::Debug for EventHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHooks").finish_non_exhaustive()
    }
}

// Target status polling
//
// Two fixed-delay tasks share the command gate with user-initiated work:
// READ_STATUS on a short cadence and READ_CONSOLE on a longer one. Each
// task sleeps after a poll completes rather than on a fixed rate, so a slow
// exchange never stacks polls behind itself.

use std::sync::Arc;

use tokio::time::sleep;
use tracing::{debug, info, trace};

use crate::commands::opcodes;
use crate::events::StopReason;
use crate::protocol::status;
use crate::session::{DebugSession, SessionShared};

impl DebugSession {
    /// Start both poll tasks. Subsequent calls are no-ops; the tasks stop on
    /// [`disconnect`](Self::disconnect) or when the transport drops.
    pub async fn start_status_polling(&self) {
        {
            let mut state = self.shared.state.lock().await;
            if state.polling {
                return;
            }
            state.polling = true;
        }

        tokio::spawn(status_loop(self.shared.clone()));
        tokio::spawn(console_loop(self.shared.clone()));
    }
}

async fn status_loop(shared: Arc<SessionShared>) {
    let mut shutdown = shared.shutdown.subscribe();
    info!("status poll started");

    loop {
        if *shutdown.borrow() || !shared.transport.is_connected() {
            break;
        }
        poll_status_once(&shared).await;

        tokio::select! {
            _ = sleep(shared.config.status_interval) => {}
            _ = shutdown.changed() => break,
        }
    }

    info!("status poll stopped");
}

async fn console_loop(shared: Arc<SessionShared>) {
    let mut shutdown = shared.shutdown.subscribe();
    info!("console poll started");

    loop {
        if *shutdown.borrow() || !shared.transport.is_connected() {
            break;
        }
        poll_console_once(&shared).await;

        tokio::select! {
            _ = sleep(shared.config.console_interval) => {}
            _ = shutdown.changed() => break,
        }
    }

    info!("console poll stopped");
}

pub(crate) async fn poll_status_once(shared: &Arc<SessionShared>) {
    let Some(resp) = shared
        .gate
        .send_cmd(opcodes::READ_STATUS, &[], shared.config.reply_timeout)
        .await
    else {
        return;
    };
    if !resp.is_ok() || resp.data.is_empty() {
        return;
    }

    let new = resp.data[0];
    if new & status::RESET != 0 {
        debug!("target mid-reset, status discarded");
        return;
    }

    let stop_event = {
        let mut state = shared.state.lock().await;
        let old = state.status;
        state.status = new;

        let stopped_now = new & status::STOP != 0;
        let stopped_before = old & status::STOP != 0;

        let event = if new & status::STOP_SET != 0 && stopped_now {
            let reason = (new & status::EXCP != 0).then_some(StopReason::Exception);
            Some(reason)
        } else if stopped_now != stopped_before && stopped_now {
            Some(None)
        } else {
            None
        };

        if event.is_some() {
            state.frames = None;
        }
        event
    };

    trace!("status polled: {:#04x}", new);
    if let Some(reason) = stop_event {
        shared.hooks.emit_stop(reason);
    }
}

pub(crate) async fn poll_console_once(shared: &Arc<SessionShared>) {
    let console_pending = shared.state.lock().await.status & status::CONSOLE != 0;
    if !console_pending {
        return;
    }

    let Some(resp) = shared
        .gate
        .send_cmd(opcodes::READ_CONSOLE, &[], shared.config.reply_timeout)
        .await
    else {
        return;
    };
    if !resp.is_ok() || resp.data.is_empty() {
        return;
    }

    // Device consoles flush mid-sequence; decode lossily rather than drop
    let text = String::from_utf8_lossy(&resp.data);
    shared.hooks.emit_stdout(&text);
}

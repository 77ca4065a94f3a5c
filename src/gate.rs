// Single-inflight command gate
//
// Serializes every request/response exchange on the wire: holding the gate
// lock is holding the wire. The gate owns the transport's receive channel
// and the frame decoder, so a reply that lost its race with the timeout is
// flushed before the next command writes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::{self, Instant};
use tracing::{debug, error, warn};

use crate::events::EventHooks;
use crate::protocol::{encode_frame, DataResponse, FrameDecoder};
use crate::transport::{Transport, TransportEvent};

pub struct CommandGate {
    transport: Arc<dyn Transport>,
    hooks: Arc<EventHooks>,
    wire: Mutex<Wire>,
}

struct Wire {
    events: mpsc::Receiver<TransportEvent>,
    decoder: FrameDecoder,
}

impl CommandGate {
    pub fn new(
        transport: Arc<dyn Transport>,
        events: mpsc::Receiver<TransportEvent>,
        hooks: Arc<EventHooks>,
    ) -> Self {
        Self {
            transport,
            hooks,
            wire: Mutex::new(Wire {
                events,
                decoder: FrameDecoder::new(),
            }),
        }
    }

    /// Send one command and wait for its response.
    ///
    /// Requests are paired 1:1 with responses in send order; a second caller
    /// parks on the gate until the first exchange retires via response or
    /// timeout. Returns `None` on write failure, timeout, or transport loss.
    pub async fn send_cmd(
        &self,
        cmd: u8,
        payload: &[u8],
        timeout: Duration,
    ) -> Option<DataResponse> {
        let mut wire = self.wire.lock().await;

        // Flush anything a timed-out exchange left behind so a late frame
        // cannot be taken for this command's reply.
        wire.decoder.reset();
        loop {
            match wire.events.try_recv() {
                Ok(TransportEvent::Data(chunk)) => {
                    debug!("discarding stale chunk of {} bytes", chunk.len());
                }
                Ok(TransportEvent::Error(e)) => {
                    error!("transport error: {e}");
                    self.hooks.emit_error();
                    return None;
                }
                Ok(TransportEvent::Closed) => {
                    self.hooks.emit_close();
                    return None;
                }
                Err(_) => break,
            }
        }

        let frame = encode_frame(cmd, payload);
        debug!("sending command {:#04x} ({} bytes)", cmd, frame.len());
        if !self.transport.write(&frame).await {
            warn!("write failed for command {:#04x}", cmd);
            return None;
        }

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let event = match time::timeout(remaining, wire.events.recv()).await {
                Err(_) => {
                    debug!("command {:#04x} timed out waiting for response", cmd);
                    return None;
                }
                Ok(None) => {
                    self.hooks.emit_close();
                    return None;
                }
                Ok(Some(event)) => event,
            };

            match event {
                TransportEvent::Data(chunk) => {
                    for resp in wire.decoder.push(&chunk) {
                        if resp.cmd == cmd {
                            return Some(resp);
                        }
                        // Single-inflight discipline makes this unreachable
                        // with a conforming agent; drop and keep waiting.
                        warn!(
                            "response echoes command {:#04x} while waiting for {:#04x}, dropped",
                            resp.cmd, cmd
                        );
                    }
                }
                TransportEvent::Error(e) => {
                    error!("transport error: {e}");
                    self.hooks.emit_error();
                    return None;
                }
                TransportEvent::Closed => {
                    self.hooks.emit_close();
                    return None;
                }
            }
        }
    }
}

impl std::fmt::Debug for CommandGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandGate").finish_non_exhaustive()
    }
}

// Debug session facade
//
// Public operations for execution control plus the shared state every other
// component works against: last polled status, the breakpoint set the
// target has acknowledged, the stack-frame cache, and the variable-ref
// table.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

use crate::breakpoint::Breakpoint;
use crate::commands::opcodes;
use crate::events::{CloseHandler, ErrorHandler, EventHooks, StdoutHandler, StopHandler};
use crate::gate::CommandGate;
use crate::loader::ClassResolver;
use crate::protocol::{put_wire_string, status, wire_string_len, MdwpError, MdwpResult};
use crate::stackframe::StackFrame;
use crate::transport::Transport;
use crate::variables::ValueInfo;

/// Timeout for RESTART and TERMINATE, which reboot the target.
const CONTROL_TIMEOUT: Duration = Duration::from_secs(5);

/// Session timing knobs. Defaults match the on-device agent's cadence.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a normal command waits for its response.
    pub reply_timeout: Duration,
    /// Delay between READ_STATUS polls (after each completes).
    pub status_interval: Duration,
    /// Delay between READ_CONSOLE polls.
    pub console_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reply_timeout: Duration::from_millis(200),
            status_interval: Duration::from_millis(100),
            console_interval: Duration::from_millis(300),
        }
    }
}

pub(crate) struct SessionState {
    pub(crate) status: u8,
    pub(crate) breakpoints: Vec<Breakpoint>,
    pub(crate) frames: Option<Vec<StackFrame>>,
    pub(crate) var_refs: HashMap<u32, ValueInfo>,
    pub(crate) polling: bool,
}

pub(crate) struct SessionShared {
    pub(crate) gate: CommandGate,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) resolver: Arc<dyn ClassResolver>,
    pub(crate) hooks: Arc<EventHooks>,
    pub(crate) config: SessionConfig,
    pub(crate) state: Mutex<SessionState>,
    pub(crate) shutdown: watch::Sender<bool>,
}

impl SessionShared {
    pub(crate) async fn invalidate_frames(&self) {
        self.state.lock().await.frames = None;
    }
}

/// One debug session over one transport.
pub struct DebugSession {
    pub(crate) shared: Arc<SessionShared>,
}

impl DebugSession {
    pub fn new(
        transport: Arc<dyn Transport>,
        resolver: Arc<dyn ClassResolver>,
    ) -> MdwpResult<Self> {
        Self::with_config(transport, resolver, SessionConfig::default())
    }

    pub fn with_config(
        transport: Arc<dyn Transport>,
        resolver: Arc<dyn ClassResolver>,
        config: SessionConfig,
    ) -> MdwpResult<Self> {
        let events = transport.take_events().ok_or_else(|| {
            MdwpError::Protocol("transport receive side already claimed".to_string())
        })?;

        let hooks = Arc::new(EventHooks::default());
        let gate = CommandGate::new(transport.clone(), events, hooks.clone());
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            shared: Arc::new(SessionShared {
                gate,
                transport,
                resolver,
                hooks,
                config,
                state: Mutex::new(SessionState {
                    status: 0,
                    breakpoints: Vec::new(),
                    frames: None,
                    var_refs: HashMap::new(),
                    polling: false,
                }),
                shutdown,
            }),
        })
    }

    /// Open the transport. Polling starts separately via
    /// [`start_status_polling`](Self::start_status_polling).
    pub async fn connect(&self) -> MdwpResult<()> {
        self.shared.transport.connect().await
    }

    /// Cancel the poll tasks and close the transport. Inflight commands
    /// resolve as failures once the stream drops.
    pub async fn disconnect(&self) {
        info!("disconnecting session");
        self.shared.shutdown.send(true).ok();
        self.shared.transport.disconnect().await;
    }

    // Event registration: one handler per kind, latest wins.

    pub fn on_stop(&self, handler: StopHandler) {
        self.shared.hooks.on_stop(handler);
    }

    pub fn on_stdout(&self, handler: StdoutHandler) {
        self.shared.hooks.on_stdout(handler);
    }

    pub fn on_error(&self, handler: ErrorHandler) {
        self.shared.hooks.on_error(handler);
    }

    pub fn on_close(&self, handler: CloseHandler) {
        self.shared.hooks.on_close(handler);
    }

    /// Whether the last polled status had the STOP bit set.
    pub async fn is_stopped(&self) -> bool {
        self.shared.state.lock().await.status & status::STOP != 0
    }

    /// Resume execution. A target that is already running is left alone.
    pub async fn run(&self) -> bool {
        if !self.is_stopped().await {
            return true;
        }
        self.shared.invalidate_frames().await;
        let ok = self.send_ok(opcodes::RUN, &[]).await;
        if ok {
            self.clear_stop_bits().await;
        }
        ok
    }

    /// Halt execution. A target that is already stopped is left alone.
    pub async fn stop(&self) -> bool {
        if self.is_stopped().await {
            return true;
        }
        self.shared.invalidate_frames().await;
        self.send_ok(opcodes::STOP, &[]).await
    }

    pub async fn step_in(&self) -> bool {
        let hint = self.top_code_length().await;
        self.step(opcodes::STEP_IN, hint).await
    }

    pub async fn step_over(&self) -> bool {
        let hint = self.top_code_length().await;
        self.step(opcodes::STEP_OVER, hint).await
    }

    pub async fn step_out(&self) -> bool {
        self.step(opcodes::STEP_OUT, 0).await
    }

    async fn step(&self, opcode: u8, code_length_hint: u32) -> bool {
        self.shared.invalidate_frames().await;
        let ok = self
            .send_ok(opcode, &code_length_hint.to_le_bytes())
            .await;
        if ok {
            self.clear_stop_bits().await;
        }
        ok
    }

    /// Restart the program from `main_class`.
    pub async fn restart(&self, main_class: &str) -> bool {
        // The payload is exactly one wire string: 5 + main_class.len() bytes
        let mut payload = BytesMut::with_capacity(wire_string_len(main_class));
        put_wire_string(&mut payload, main_class);

        self.shared.invalidate_frames().await;
        matches!(
            self.shared
                .gate
                .send_cmd(opcodes::RESTART, &payload, CONTROL_TIMEOUT)
                .await,
            Some(resp) if resp.is_ok()
        )
    }

    /// Terminate the program; `include_debugger` also shuts the agent down.
    pub async fn terminate(&self, include_debugger: bool) -> bool {
        matches!(
            self.shared
                .gate
                .send_cmd(opcodes::TERMINATE, &[u8::from(include_debugger)], CONTROL_TIMEOUT)
                .await,
            Some(resp) if resp.is_ok()
        )
    }

    /// Breakpoints currently acknowledged by the target.
    pub async fn breakpoints(&self) -> Vec<Breakpoint> {
        self.shared.state.lock().await.breakpoints.clone()
    }

    /// Issue a command with the default reply timeout; true on an OK response.
    pub(crate) async fn send_ok(&self, opcode: u8, payload: &[u8]) -> bool {
        matches!(
            self.shared
                .gate
                .send_cmd(opcode, payload, self.shared.config.reply_timeout)
                .await,
            Some(resp) if resp.is_ok()
        )
    }

    /// Code length of the current top frame, 0 when unknown.
    async fn top_code_length(&self) -> u32 {
        let cached = {
            let state = self.shared.state.lock().await;
            state
                .frames
                .as_ref()
                .and_then(|frames| frames.first())
                .map(|frame| frame.line_info.code_length)
        };
        if let Some(len) = cached {
            return len;
        }
        match self.read_stack_frame(0).await {
            Some(frame) => frame.line_info.code_length,
            None => {
                debug!("no top frame available for the step hint");
                0
            }
        }
    }

    /// The target clears its stop state on RUN/STEP; mirror that locally so
    /// the poller sees the next stop as an edge.
    async fn clear_stop_bits(&self) {
        let mut state = self.shared.state.lock().await;
        state.status &= !(status::STOP | status::STOP_SET | status::EXCP);
    }
}

impl std::fmt::Debug for DebugSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugSession").finish_non_exhaustive()
    }
}

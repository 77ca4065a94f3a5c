// MDWP client library for on-device debugging
//
// Implements the debug-session client core for the micro debug wire
// protocol spoken by the on-device agent:
// - Framed request/response transport with checksummed packets
// - Polled run/stop/exception/console state with edge-detected events
// - Line-level breakpoint reconciliation
// - Stack and variable inspection with lazy object/array expansion
// - Chunked file install

pub mod breakpoint;
pub mod commands;
pub mod events;
pub mod gate;
pub mod installer;
pub mod loader;
pub mod poller;
pub mod protocol;
pub mod reader;
pub mod session;
pub mod stackframe;
pub mod transport;
pub mod value;
pub mod variables;

pub use breakpoint::{Breakpoint, ExceptionInfo};
pub use events::StopReason;
pub use loader::{ClassResolver, FieldInfo, LineInfo, LocalVar};
pub use protocol::{DataResponse, MdwpError, MdwpResult};
pub use session::{DebugSession, SessionConfig};
pub use stackframe::FrontendStackFrame;
pub use transport::{TcpTransport, Transport, TransportEvent};
pub use variables::Variable;

// Stack walking and frame display
//
// One READ_STACK_TRACE exchange per frame, walked from the top until the
// agent flags the end frame. The walk result is cached until execution
// state changes.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::commands::opcodes;
use crate::loader::{LineInfo, LocalVar};
use crate::reader::{read_sized_string, read_u32};
use crate::session::DebugSession;
use crate::value;

/// The top bit of the echoed frame index marks the last frame.
const END_FRAME_BIT: u32 = 0x8000_0000;

/// One resolved frame of the suspended target.
#[derive(Debug, Clone)]
pub struct StackFrame {
    pub frame_id: u32,
    pub line_info: LineInfo,
    pub is_end_frame: bool,
    /// Local-variable table entries whose scope covers the frame's pc.
    pub local_variables: Option<Vec<LocalVar>>,
}

/// Adapter-facing frame shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontendStackFrame {
    pub id: u32,
    /// `Short.method(param, param)` display name.
    pub name: String,
    pub source_name: String,
    pub source_path: String,
    pub line: u32,
    pub instruction_pointer_reference: String,
}

impl DebugSession {
    /// Fetch and resolve a single frame. `None` when the agent has no such
    /// frame, echoes a different index, or the pc resolves to no line info.
    pub(crate) async fn read_stack_frame(&self, frame_id: u32) -> Option<StackFrame> {
        let resp = self
            .shared
            .gate
            .send_cmd(
                opcodes::READ_STACK_TRACE,
                &frame_id.to_le_bytes(),
                self.shared.config.reply_timeout,
            )
            .await?;
        if !resp.is_ok() {
            return None;
        }

        let mut data = resp.data.as_slice();
        let idx = read_u32(&mut data).ok()?;
        let pc = read_u32(&mut data).ok()?;
        let class_name = read_sized_string(&mut data).ok()?;
        let method_name = read_sized_string(&mut data).ok()?;
        let descriptor = read_sized_string(&mut data).ok()?;

        if idx & !END_FRAME_BIT != frame_id {
            warn!(
                "stack trace response for frame {}, expected {}",
                idx & !END_FRAME_BIT,
                frame_id
            );
            return None;
        }
        let is_end_frame = idx & END_FRAME_BIT != 0;

        let line_info = self
            .shared
            .resolver
            .line_from_pc(pc, &class_name, &method_name, &descriptor)?;

        let in_scope: Vec<LocalVar> = line_info
            .locals
            .iter()
            .filter(|var| var.in_scope(pc))
            .cloned()
            .collect();

        Some(StackFrame {
            frame_id,
            line_info,
            is_end_frame,
            local_variables: (!in_scope.is_empty()).then_some(in_scope),
        })
    }

    /// Walk all frames of the suspended target, top first, and return the
    /// adapter-facing stack trace. Cached until run/stop/step or the next
    /// stop edge.
    pub async fn stack_frames(&self) -> Vec<FrontendStackFrame> {
        {
            let state = self.shared.state.lock().await;
            if let Some(frames) = state.frames.as_ref() {
                return frames.iter().map(to_frontend).collect();
            }
        }

        let mut frames = Vec::new();
        let mut frame_id = 0u32;
        loop {
            let Some(frame) = self.read_stack_frame(frame_id).await else {
                break;
            };
            if frame.line_info.source_path.is_none() {
                // Nothing to show for synthetic code; the walk ends here
                debug!("frame {} has no source, stopping walk", frame_id);
                break;
            }
            let end = frame.is_end_frame;
            frames.push(frame);
            if end {
                break;
            }
            frame_id += 1;
        }

        let shaped: Vec<FrontendStackFrame> = frames.iter().map(to_frontend).collect();
        self.shared.state.lock().await.frames = Some(frames);
        shaped
    }

    /// Frame lookup used by the variable readers: serve from the cache, or
    /// fetch the single frame when the cache is cold.
    pub(crate) async fn frame_by_id(&self, frame_id: u32) -> Option<StackFrame> {
        {
            let state = self.shared.state.lock().await;
            if let Some(frames) = state.frames.as_ref() {
                if let Some(frame) = frames.iter().find(|f| f.frame_id == frame_id) {
                    return Some(frame.clone());
                }
            }
        }
        self.read_stack_frame(frame_id).await
    }
}

fn to_frontend(frame: &StackFrame) -> FrontendStackFrame {
    let info = &frame.line_info;
    let short_class = value::short_class_name(&info.class_name);

    let params: Vec<String> = value::method_params(&info.descriptor)
        .iter()
        .map(|p| value::simple_type_name(p))
        .collect();

    FrontendStackFrame {
        id: frame.frame_id,
        name: format!("{}.{}({})", short_class, info.method_name, params.join(", ")),
        source_name: format!("{short_class}.java"),
        source_path: info.source_path.clone().unwrap_or_default(),
        line: info.line,
        instruction_pointer_reference: info.pc.to_string(),
    }
}

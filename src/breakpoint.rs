// Breakpoint reconciliation
//
// The front end hands over the complete line set for one source file; the
// session diffs it against what the target has acknowledged and issues the
// REMOVE/ADD pairs. `breakpoints` in the session state only ever changes on
// a target ACK.

use std::collections::HashSet;

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::commands::opcodes;
use crate::loader::LineInfo;
use crate::protocol::{put_wire_string, wire_string_len};
use crate::reader::read_sized_string;
use crate::session::DebugSession;

/// A breakpoint the target has acknowledged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Breakpoint {
    pub line: u32,
    pub source_path: String,
    pub class_name: String,
    pub method_name: String,
    pub descriptor: String,
    pub pc: u32,
}

/// Type and message of the pending exception.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    pub type_name: String,
    pub message: String,
}

impl DebugSession {
    /// Reconcile the target's breakpoints for `source_path` against `lines`.
    ///
    /// Stale breakpoints are removed first, then missing lines are resolved
    /// and added. Any resolver miss or NAK short-circuits with false; the
    /// acknowledged set keeps whatever the target confirmed up to that
    /// point.
    pub async fn set_breakpoints(&self, lines: &[u32], source_path: &str) -> bool {
        let (to_remove, existing) = {
            let state = self.shared.state.lock().await;
            let to_remove: Vec<Breakpoint> = state
                .breakpoints
                .iter()
                .filter(|bp| bp.source_path == source_path && !lines.contains(&bp.line))
                .cloned()
                .collect();
            let existing: HashSet<u32> = state
                .breakpoints
                .iter()
                .filter(|bp| bp.source_path == source_path)
                .map(|bp| bp.line)
                .collect();
            (to_remove, existing)
        };

        // Resolve everything up front; an unknown line fails the request
        // before the target set is touched.
        let mut to_add: Vec<(u32, LineInfo)> = Vec::new();
        let mut seen = existing;
        for &line in lines {
            if !seen.insert(line) {
                continue;
            }
            match self.shared.resolver.line_from_source(line, source_path) {
                Some(info) => to_add.push((line, info)),
                None => {
                    warn!("no line info for {}:{}, breakpoint rejected", source_path, line);
                    return false;
                }
            }
        }

        for bp in &to_remove {
            if !self
                .send_breakpoint(opcodes::REMOVE_BKP, &bp.class_name, &bp.method_name, &bp.descriptor, bp.pc)
                .await
            {
                return false;
            }
            let mut state = self.shared.state.lock().await;
            state
                .breakpoints
                .retain(|b| !(b.source_path == bp.source_path && b.line == bp.line));
            debug!("breakpoint removed at {}:{}", source_path, bp.line);
        }

        for (line, info) in to_add {
            if !self
                .send_breakpoint(opcodes::ADD_BKP, &info.class_name, &info.method_name, &info.descriptor, info.pc)
                .await
            {
                return false;
            }
            let mut state = self.shared.state.lock().await;
            state.breakpoints.push(Breakpoint {
                line,
                source_path: source_path.to_string(),
                class_name: info.class_name,
                method_name: info.method_name,
                descriptor: info.descriptor,
                pc: info.pc,
            });
            debug!("breakpoint added at {}:{}", source_path, line);
        }

        true
    }

    /// Clear the device-side breakpoint set unconditionally.
    pub async fn remove_all_breakpoints(&self) -> bool {
        let ok = self.send_ok(opcodes::REMOVE_ALL_BKP, &[]).await;
        if ok {
            self.shared.state.lock().await.breakpoints.clear();
        }
        ok
    }

    /// Toggle break-on-exception on the target.
    pub async fn set_exception_breakpoints(&self, enabled: bool) -> bool {
        self.send_ok(opcodes::SET_EXCP_MODE, &[u8::from(enabled)]).await
    }

    /// Read type and message of the exception the target stopped on.
    pub async fn read_exception_info(&self) -> Option<ExceptionInfo> {
        let resp = self
            .shared
            .gate
            .send_cmd(opcodes::READ_EXCP_INFO, &[], self.shared.config.reply_timeout)
            .await?;
        if !resp.is_ok() {
            return None;
        }

        let mut data = resp.data.as_slice();
        let type_name = read_sized_string(&mut data).ok()?;
        let message = read_sized_string(&mut data).ok()?;
        Some(ExceptionInfo { type_name, message })
    }

    async fn send_breakpoint(
        &self,
        opcode: u8,
        class_name: &str,
        method_name: &str,
        descriptor: &str,
        pc: u32,
    ) -> bool {
        // Class names may arrive in path form on Windows hosts
        let class_name = class_name.replace('\\', "/");

        let mut payload = BytesMut::with_capacity(
            4 + wire_string_len(&class_name) + wire_string_len(method_name) + wire_string_len(descriptor),
        );
        payload.put_u32_le(pc);
        put_wire_string(&mut payload, &class_name);
        put_wire_string(&mut payload, method_name);
        put_wire_string(&mut payload, descriptor);

        self.send_ok(opcode, &payload).await
    }
}

// Chunked file install
//
// Three-step handshake: INSTALL_FILE names the target file, WRITE_FILE_DATA
// streams it in acknowledged chunks, COMPLETE_INSTALL commits. Every step
// runs on a longer timeout than normal commands; flash writes are slow.

use std::time::Duration;

use bytes::BytesMut;
use tracing::{info, warn};

use crate::commands::opcodes;
use crate::protocol::{put_wire_string, wire_string_len};
use crate::session::DebugSession;

/// Largest WRITE_FILE_DATA payload the agent accepts.
pub const INSTALL_CHUNK_SIZE: usize = 512;

const INSTALL_TIMEOUT: Duration = Duration::from_secs(2);

impl DebugSession {
    /// Upload `data` as `file_name` on the target. `progress` is invoked
    /// with `(bytes_sent, total)` after every acknowledged chunk and once
    /// more on completion. Any failed step aborts with false.
    pub async fn install_file(
        &self,
        file_name: &str,
        data: &[u8],
        progress: Option<&(dyn Fn(usize, usize) + Sync)>,
    ) -> bool {
        let mut name_payload = BytesMut::with_capacity(wire_string_len(file_name));
        put_wire_string(&mut name_payload, file_name);
        if !self.send_install_step(opcodes::INSTALL_FILE, &name_payload).await {
            warn!("install of {} rejected", file_name);
            return false;
        }

        let total = data.len();
        let mut offset = 0;
        while offset < total {
            let end = (offset + INSTALL_CHUNK_SIZE).min(total);
            if !self
                .send_install_step(opcodes::WRITE_FILE_DATA, &data[offset..end])
                .await
            {
                warn!("chunk write at offset {} failed, aborting install of {}", offset, file_name);
                return false;
            }
            offset = end;
            if let Some(cb) = progress {
                cb(offset, total);
            }
        }

        if !self.send_install_step(opcodes::COMPLETE_INSTALL, &[]).await {
            warn!("install completion failed for {}", file_name);
            return false;
        }
        if let Some(cb) = progress {
            cb(total, total);
        }

        info!("installed {} ({} bytes)", file_name, total);
        true
    }

    async fn send_install_step(&self, opcode: u8, payload: &[u8]) -> bool {
        matches!(
            self.shared.gate.send_cmd(opcode, payload, INSTALL_TIMEOUT).await,
            Some(resp) if resp.is_ok()
        )
    }
}

// Local, field, and array reads plus the variable-reference table
//
// Decoded batches register their object and array entries in a flat
// `reference -> ValueInfo` map; the front end expands a handle on demand
// through `read_variable`. Handles live until the next locals read clears
// the table. String-like objects are materialized eagerly and returned as
// leaves, so they never enter the table.

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::commands::opcodes;
use crate::loader::{FieldInfo, LocalVar};
use crate::protocol::{put_wire_string, wire_string_len};
use crate::reader::{read_sized_string, read_u32, read_u64};
use crate::session::DebugSession;
use crate::value;

const NOT_AVAILABLE: &str = "not available";

/// Bit 31 of the READ_LOCAL frame word requests a 64-bit value.
const WIDE_BIT: u32 = 0x8000_0000;

const STRING_CLASS: &str = "java/lang/String";
const BUILDER_CLASS: &str = "java/lang/AbstractStringBuilder";

/// Adapter-facing variable shape; `variables_reference == 0` marks a leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub value: String,
    pub variables_reference: u32,
}

impl Variable {
    pub fn not_available(name: &str) -> Self {
        Self {
            name: name.to_string(),
            value: NOT_AVAILABLE.to_string(),
            variables_reference: 0,
        }
    }
}

/// A decoded slot as tracked in the reference table.
#[derive(Debug, Clone)]
pub struct ValueInfo {
    pub name: String,
    /// Descriptor, or the runtime class name the agent reported.
    pub ty: String,
    pub value: String,
    pub size: u32,
    pub reference: u32,
}

/// Raw READ_LOCAL / READ_FIELD response: `size:u32 | value | [type name]`.
struct RawSlot {
    size: u32,
    raw: u64,
    type_name: Option<String>,
}

fn parse_slot(data: &[u8], wide: bool) -> Option<RawSlot> {
    let mut buf = data;
    let size = read_u32(&mut buf).ok()?;
    let raw = if wide {
        read_u64(&mut buf).ok()?
    } else {
        u64::from(read_u32(&mut buf).ok()?)
    };
    // The agent appends the runtime type for 4-byte reference slots when the
    // response has room for it
    let type_name = if buf.len() >= 4 {
        read_sized_string(&mut buf).ok()
    } else {
        None
    };
    Some(RawSlot { size, raw, type_name })
}

impl DebugSession {
    /// Read every in-scope local of a frame. The reference table is cleared
    /// first: handles from earlier reads are dead afterwards.
    ///
    /// A local that fails to decode becomes a `"not available"` placeholder
    /// instead of failing the batch.
    pub async fn read_local_variables(&self, frame_id: u32) -> Option<Vec<Variable>> {
        self.shared.state.lock().await.var_refs.clear();

        let frame = self.frame_by_id(frame_id).await?;
        let locals = frame.local_variables.unwrap_or_default();

        let mut out = Vec::with_capacity(locals.len());
        for var in &locals {
            match self.read_local_value(frame_id, var).await {
                Some(info) => out.push(self.register_value(info).await),
                None => {
                    debug!("local {} in frame {} not readable", var.name, frame_id);
                    out.push(Variable::not_available(&var.name));
                }
            }
        }
        Some(out)
    }

    /// Expand a handle from the reference table into its children: array
    /// elements or instance fields. `None` for unknown or leaf handles.
    pub async fn read_variable(&self, reference: u32) -> Option<Vec<Variable>> {
        let info = {
            let state = self.shared.state.lock().await;
            state.var_refs.get(&reference).cloned()
        }?;

        if value::is_primitive(&info.ty) {
            return None;
        }
        if info.ty.starts_with('[') {
            self.expand_array(&info).await
        } else {
            self.expand_object(&info).await
        }
    }

    async fn read_local_value(&self, frame_id: u32, var: &LocalVar) -> Option<ValueInfo> {
        let wide = value::is_wide(&var.descriptor);

        let mut payload = BytesMut::with_capacity(8);
        payload.put_u32_le(frame_id | if wide { WIDE_BIT } else { 0 });
        payload.put_u32_le(var.index);

        let resp = self
            .shared
            .gate
            .send_cmd(opcodes::READ_LOCAL, &payload, self.shared.config.reply_timeout)
            .await?;
        if !resp.is_ok() {
            return None;
        }

        let slot = parse_slot(&resp.data, wide)?;
        Some(self.finish_value(&var.name, &var.descriptor, slot).await)
    }

    async fn read_field_value(&self, reference: u32, field: &FieldInfo) -> Option<ValueInfo> {
        let slot = self
            .read_field_slot(reference, &field.name, value::is_wide(&field.descriptor))
            .await?;
        Some(self.finish_value(&field.name, &field.descriptor, slot).await)
    }

    async fn read_field_slot(
        &self,
        reference: u32,
        field_name: &str,
        wide: bool,
    ) -> Option<RawSlot> {
        let mut payload = BytesMut::with_capacity(4 + wire_string_len(field_name));
        payload.put_u32_le(reference);
        put_wire_string(&mut payload, field_name);

        let resp = self
            .shared
            .gate
            .send_cmd(opcodes::READ_FIELD, &payload, self.shared.config.reply_timeout)
            .await?;
        if !resp.is_ok() {
            return None;
        }
        parse_slot(&resp.data, wide)
    }

    /// Turn a raw slot into its display form, materializing string-like
    /// objects along the way.
    async fn finish_value(&self, name: &str, descriptor: &str, slot: RawSlot) -> ValueInfo {
        if !value::is_reference_type(descriptor) {
            let decoded = value::decode_primitive(descriptor, slot.raw);
            return ValueInfo {
                name: name.to_string(),
                ty: descriptor.to_string(),
                value: decoded.display(),
                size: slot.size,
                reference: 0,
            };
        }

        let reference = slot.raw as u32;
        if reference == 0 {
            return ValueInfo {
                name: name.to_string(),
                ty: descriptor.to_string(),
                value: "null".to_string(),
                size: slot.size,
                reference: 0,
            };
        }

        // Runtime type beats the declared descriptor when reported
        let ty = slot
            .type_name
            .clone()
            .unwrap_or_else(|| descriptor.to_string());

        if !ty.starts_with('[') {
            let class_name = value::class_name_of(&ty).to_string();
            if let Some(text) = self.materialize_string(reference, &class_name).await {
                // Strings are leaves; the handle is dropped on purpose
                return ValueInfo {
                    name: name.to_string(),
                    ty,
                    value: text,
                    size: slot.size,
                    reference: 0,
                };
            }
        }

        ValueInfo {
            name: name.to_string(),
            ty,
            value: "0".to_string(),
            size: slot.size,
            reference,
        }
    }

    /// Render a String or StringBuilder-like object by reading its backing
    /// byte array. Any failed substep means "treat as a plain object".
    async fn materialize_string(&self, reference: u32, class_name: &str) -> Option<String> {
        let is_string = self.shared.resolver.is_class_of(class_name, STRING_CLASS);
        let is_builder = self.shared.resolver.is_class_of(class_name, BUILDER_CLASS);
        if !is_string && !is_builder {
            return None;
        }

        let coder = self.read_field_slot(reference, "coder", false).await?.raw as u8;
        let backing = self.read_field_slot(reference, "value", false).await?;
        let backing_ref = backing.raw as u32;
        if backing_ref == 0 {
            return None;
        }

        // Builders over-allocate; only `count << coder` bytes are live
        let byte_len = if is_builder {
            let count = self.read_field_slot(reference, "count", false).await?.raw as u32;
            count << u32::from(coder)
        } else {
            backing.size
        };

        let bytes = self.read_array_raw(backing_ref, byte_len).await?;
        let text = match coder {
            0 => bytes.iter().map(|&b| char::from(b)).collect::<String>(),
            _ => {
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                    .collect();
                String::from_utf16_lossy(&units)
            }
        };

        Some(format!("\"{}\"", escape_string(&text)))
    }

    async fn expand_array(&self, info: &ValueInfo) -> Option<Vec<Variable>> {
        let elem_desc = info.ty[1..].to_string();
        let elem_size = value::element_size(&elem_desc) as usize;
        let count = info.size / elem_size as u32;

        let data = self.read_array_raw(info.reference, count).await?;
        let actual = data.len() / elem_size;

        let mut out = Vec::with_capacity(actual);
        for i in 0..actual {
            let chunk = &data[i * elem_size..(i + 1) * elem_size];
            let name = format!("[{i}]");

            if value::is_reference_type(&elem_desc) {
                out.push(self.expand_array_slot(&name, chunk).await);
            } else {
                let decoded = value::decode_element(&elem_desc, chunk);
                out.push(Variable {
                    name,
                    value: decoded.display(),
                    variables_reference: 0,
                });
            }
        }
        Some(out)
    }

    /// One reference slot of an object array: resolve its runtime type,
    /// materialize strings, register everything else for expansion.
    async fn expand_array_slot(&self, name: &str, chunk: &[u8]) -> Variable {
        let Ok(bytes) = <[u8; 4]>::try_from(chunk) else {
            return Variable::not_available(name);
        };
        let reference = u32::from_le_bytes(bytes);
        if reference == 0 {
            return Variable {
                name: name.to_string(),
                value: "null".to_string(),
                variables_reference: 0,
            };
        }

        let Some((size, type_name)) = self.read_size_and_type(reference).await else {
            warn!("size-and-type lookup failed for array slot reference {:#x}", reference);
            return Variable::not_available(name);
        };

        if !type_name.starts_with('[') {
            let class_name = value::class_name_of(&type_name).to_string();
            if let Some(text) = self.materialize_string(reference, &class_name).await {
                return Variable {
                    name: name.to_string(),
                    value: text,
                    variables_reference: 0,
                };
            }
        }

        self.register_value(ValueInfo {
            name: name.to_string(),
            ty: type_name,
            value: "0".to_string(),
            size,
            reference,
        })
        .await
    }

    async fn expand_object(&self, info: &ValueInfo) -> Option<Vec<Variable>> {
        let class_name = value::class_name_of(&info.ty).to_string();
        let fields = self.shared.resolver.field_list(&class_name, true)?;

        let mut out = Vec::new();
        for field in fields.iter().filter(|f| !f.is_static()) {
            match self.read_field_value(info.reference, field).await {
                Some(decoded) => out.push(self.register_value(decoded).await),
                None => {
                    debug!("field {} of {} not readable", field.name, class_name);
                    out.push(Variable::not_available(&field.name));
                }
            }
        }
        Some(out)
    }

    /// READ_ARRAY: `length:u32 | start:u32 | reference:u32`, returning the
    /// raw element bytes.
    async fn read_array_raw(&self, reference: u32, length: u32) -> Option<Vec<u8>> {
        let mut payload = BytesMut::with_capacity(12);
        payload.put_u32_le(length);
        payload.put_u32_le(0);
        payload.put_u32_le(reference);

        let resp = self
            .shared
            .gate
            .send_cmd(opcodes::READ_ARRAY, &payload, self.shared.config.reply_timeout)
            .await?;
        resp.is_ok().then_some(resp.data)
    }

    async fn read_size_and_type(&self, reference: u32) -> Option<(u32, String)> {
        let resp = self
            .shared
            .gate
            .send_cmd(
                opcodes::READ_SIZE_AND_TYPE,
                &reference.to_le_bytes(),
                self.shared.config.reply_timeout,
            )
            .await?;
        if !resp.is_ok() {
            return None;
        }

        let mut data = resp.data.as_slice();
        let size = read_u32(&mut data).ok()?;
        let type_name = read_sized_string(&mut data).ok()?;
        Some((size, type_name))
    }

    /// Track expandable values in the reference table and shape the entry
    /// for the front end.
    async fn register_value(&self, info: ValueInfo) -> Variable {
        let expandable = info.reference != 0 && !value::is_primitive(&info.ty);
        if expandable {
            self.shared
                .state
                .lock()
                .await
                .var_refs
                .insert(info.reference, info.clone());
        }

        Variable {
            name: info.name,
            value: info.value,
            variables_reference: if expandable { info.reference } else { 0 },
        }
    }
}

fn escape_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

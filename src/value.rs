// Descriptor handling and value rendering
//
// Descriptors follow the class-file grammar: B, C, S, I, F, Z primitives,
// J and D wide primitives, L<name>; references, [X arrays (nestable).

/// A decoded slot value, carrying the raw representation alongside the
/// rendering rules the front end expects.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Char(u16),
    Reference(u32),
    Str(String),
    Null,
}

impl Value {
    /// Render for the variables view.
    pub fn display(&self) -> String {
        match self {
            Value::Bool(v) => v.to_string(),
            Value::Int32(v) => v.to_string(),
            Value::Int64(v) => v.to_string(),
            Value::Float32(v) => v.to_string(),
            Value::Float64(v) => v.to_string(),
            Value::Char(code) => {
                format!("'{}'", char::from_u32(u32::from(*code)).unwrap_or('?'))
            }
            // Plain object references have no textual value of their own;
            // the front end expands them through the reference handle.
            Value::Reference(_) => "0".to_string(),
            Value::Str(s) => s.clone(),
            Value::Null => "null".to_string(),
        }
    }
}

/// Whether `descriptor` names a reference (object or array) type.
pub fn is_reference_type(descriptor: &str) -> bool {
    descriptor.starts_with('L') || descriptor.starts_with('[')
}

/// Whether `ty` is a bare primitive descriptor. Class names and array
/// descriptors are not primitive.
pub fn is_primitive(ty: &str) -> bool {
    matches!(ty, "Z" | "B" | "C" | "S" | "I" | "F" | "J" | "D")
}

/// Whether the slot is read as a 64-bit value.
pub fn is_wide(descriptor: &str) -> bool {
    matches!(descriptor.as_bytes().first(), Some(b'J') | Some(b'D'))
}

/// Storage size of one array element of the given element descriptor.
pub fn element_size(descriptor: &str) -> u32 {
    match descriptor.as_bytes().first() {
        Some(b'Z') | Some(b'B') => 1,
        Some(b'C') | Some(b'S') => 2,
        Some(b'J') | Some(b'D') => 8,
        _ => 4,
    }
}

/// Decode a primitive slot from its raw wire representation. 32-bit slots
/// arrive already widened; 64-bit slots are taken verbatim.
pub fn decode_primitive(descriptor: &str, raw: u64) -> Value {
    match descriptor.as_bytes().first() {
        Some(b'Z') => Value::Bool(raw != 0),
        Some(b'C') => Value::Char(raw as u16),
        Some(b'F') => Value::Float32(f32::from_bits(raw as u32)),
        Some(b'D') => Value::Float64(f64::from_bits(raw)),
        Some(b'J') => Value::Int64(raw as i64),
        // B, S, I: signed 32-bit
        _ => Value::Int32(raw as u32 as i32),
    }
}

/// Decode one array element from its storage bytes. One- and two-byte
/// integer kinds widen with sign; `C` stays an unsigned code unit.
pub fn decode_element(descriptor: &str, bytes: &[u8]) -> Value {
    match (descriptor.as_bytes().first(), bytes.len()) {
        (Some(b'Z'), 1) => Value::Bool(bytes[0] != 0),
        (Some(b'B'), 1) => Value::Int32(i32::from(bytes[0] as i8)),
        (Some(b'C'), 2) => Value::Char(u16::from_le_bytes([bytes[0], bytes[1]])),
        (Some(b'S'), 2) => Value::Int32(i32::from(i16::from_le_bytes([bytes[0], bytes[1]]))),
        (Some(b'J'), 8) => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(bytes);
            Value::Int64(i64::from_le_bytes(raw))
        }
        (Some(b'D'), 8) => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(bytes);
            Value::Float64(f64::from_le_bytes(raw))
        }
        (Some(b'F'), 4) => {
            Value::Float32(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }
        (_, 4) => Value::Int32(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        _ => Value::Null,
    }
}

/// Extract the class name from a type as it appears on the wire: either a
/// descriptor (`Ljava/lang/String;`) or an already-bare class name.
pub fn class_name_of(ty: &str) -> &str {
    ty.strip_prefix('L')
        .and_then(|rest| rest.strip_suffix(';'))
        .unwrap_or(ty)
}

/// Human-readable short name of a descriptor fragment: array dimensions
/// become `[]` suffixes, primitives map to their keyword, class names keep
/// only the segment after the last `/` or `.`.
pub fn simple_type_name(descriptor: &str) -> String {
    let mut dims = 0;
    let mut rest = descriptor;
    while let Some(inner) = rest.strip_prefix('[') {
        dims += 1;
        rest = inner;
    }

    let base = match rest.as_bytes().first() {
        Some(b'Z') => "boolean".to_string(),
        Some(b'C') => "char".to_string(),
        Some(b'F') => "float".to_string(),
        Some(b'D') => "double".to_string(),
        Some(b'B') => "byte".to_string(),
        Some(b'S') => "short".to_string(),
        Some(b'I') => "int".to_string(),
        Some(b'J') => "long".to_string(),
        Some(b'L') => {
            let name = rest[1..].split(';').next().unwrap_or("");
            short_class_name(name).to_string()
        }
        _ => short_class_name(rest).to_string(),
    };

    let mut out = base;
    for _ in 0..dims {
        out.push_str("[]");
    }
    out
}

/// Keep only the segment after the last `/` or `.`.
pub fn short_class_name(name: &str) -> &str {
    name.rsplit(['/', '.']).next().unwrap_or(name)
}

/// Split the parameter fragments out of a method descriptor like `(I[BLFoo;)V`.
pub fn method_params(descriptor: &str) -> Vec<String> {
    let inner = descriptor
        .strip_prefix('(')
        .and_then(|rest| rest.split(')').next())
        .unwrap_or("");

    let mut params = Vec::new();
    let bytes = inner.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let start = i;
        while i < bytes.len() && bytes[i] == b'[' {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }
        if bytes[i] == b'L' {
            while i < bytes.len() && bytes[i] != b';' {
                i += 1;
            }
            // past the ';'
            i = (i + 1).min(bytes.len());
        } else {
            i += 1;
        }
        params.push(inner[start..i].to_string());
    }
    params
}

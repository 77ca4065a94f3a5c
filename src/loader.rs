// Class metadata consumed by the session
//
// Line resolution and field lists come from a class-file service owned by
// the embedding tool. The session only reads; implementations must tolerate
// concurrent lookups.

use serde::{Deserialize, Serialize};

/// Binding from a source position to a code position, with the method's
/// local-variable table riding along.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineInfo {
    pub class_name: String,
    pub method_name: String,
    pub descriptor: String,
    pub pc: u32,
    pub line: u32,
    pub source_path: Option<String>,
    pub code_length: u32,
    pub locals: Vec<LocalVar>,
}

/// One entry of a method's local-variable table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalVar {
    pub name: String,
    pub descriptor: String,
    pub index: u32,
    pub start_pc: u32,
    pub length: u32,
}

impl LocalVar {
    /// Whether `pc` falls inside this entry's scope.
    pub fn in_scope(&self, pc: u32) -> bool {
        pc >= self.start_pc && pc < self.start_pc.saturating_add(self.length)
    }
}

/// One field of a class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    pub descriptor: String,
    pub access_flags: u16,
}

pub const ACC_STATIC: u16 = 0x0008;

impl FieldInfo {
    pub fn is_static(&self) -> bool {
        self.access_flags & ACC_STATIC != 0
    }
}

/// Class-file lookups the session depends on.
pub trait ClassResolver: Send + Sync {
    /// Resolve a source line to its code position.
    fn line_from_source(&self, line: u32, source_path: &str) -> Option<LineInfo>;

    /// Resolve a code position back to its line.
    fn line_from_pc(
        &self,
        pc: u32,
        class_name: &str,
        method_name: &str,
        descriptor: &str,
    ) -> Option<LineInfo>;

    /// Fields of `class_name`, optionally including inherited ones.
    fn field_list(&self, class_name: &str, include_inherited: bool) -> Option<Vec<FieldInfo>>;

    /// Whether `class_name` is `ancestor` or descends from it.
    fn is_class_of(&self, class_name: &str, ancestor: &str) -> bool;
}

//! Structured, read-only view of a decoded class, the input to reference
//! extraction and access indexing.
//!
//! The view is deliberately flat: instead of a visitor over dozens of
//! traversal sites, a class is one value and its method bodies are plain
//! lists of the reference-bearing instructions. Visible, invisible and
//! type-use annotations are collected into a single list per target, since
//! the organizer treats every annotation flavor identically.

use serde::Serialize;

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_PRIVATE: u16 = 0x0002;
pub const ACC_PROTECTED: u16 = 0x0004;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Visibility {
    Public,
    Protected,
    PackagePrivate,
    Private,
}

impl Visibility {
    pub fn from_flags(flags: u16) -> Self {
        if flags & ACC_PUBLIC != 0 {
            Visibility::Public
        } else if flags & ACC_PRIVATE != 0 {
            Visibility::Private
        } else if flags & ACC_PROTECTED != 0 {
            Visibility::Protected
        } else {
            Visibility::PackagePrivate
        }
    }

    pub fn is_package_private(self) -> bool {
        self == Visibility::PackagePrivate
    }
}

/// One input class. Names are internal (slash-separated) class names.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassModel {
    pub name: String,
    pub visibility: Visibility,
    pub super_class: Option<String>,
    pub interfaces: Vec<String>,
    pub signature: Option<String>,
    pub annotations: Vec<Annotation>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    pub record_components: Vec<RecordComponent>,
    pub inner_classes: Vec<InnerClass>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub descriptor: String,
    pub visibility: Visibility,
    pub signature: Option<String>,
    pub constant_value: Option<ConstOperand>,
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Method {
    pub name: String,
    pub descriptor: String,
    pub visibility: Visibility,
    pub signature: Option<String>,
    pub exceptions: Vec<String>,
    pub annotations: Vec<Annotation>,
    pub parameter_annotations: Vec<Vec<Annotation>>,
    pub local_variables: Vec<LocalVariable>,
    pub instructions: Vec<Insn>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalVariable {
    pub name: String,
    pub descriptor: Option<String>,
    pub signature: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordComponent {
    pub name: String,
    pub descriptor: String,
    pub signature: Option<String>,
    pub annotations: Vec<Annotation>,
}

/// One InnerClasses table row, reduced to the two class names it references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerClass {
    pub inner: String,
    pub outer: Option<String>,
}

/// The reference-bearing instructions of a method body. Everything else
/// (arithmetic, stack shuffling, branches) names no other class and is
/// dropped during decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Insn {
    Field { owner: String, name: String, descriptor: String },
    Invoke { owner: String, name: String, descriptor: String },
    /// new / checkcast / instanceof / anewarray. The operand may be an
    /// internal class name or an array descriptor.
    TypeOp { class: String },
    MultiNewArray { descriptor: String, dimensions: u8 },
    InvokeDynamic { name: String, descriptor: String, bootstrap: Handle, args: Vec<ConstOperand> },
    LoadConst(ConstOperand),
    /// try/catch handler entry with an explicit exception type.
    Catch { class: String },
}

/// A method-handle constant, reduced to the member it points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Handle {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

/// A loadable constant operand (ldc family, bootstrap static arguments,
/// field ConstantValue). Dynamic constants carry their bootstrap method and
/// its static arguments, recursively.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstOperand {
    Int(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Str(String),
    /// A class literal: an internal class name or an array descriptor.
    Class(String),
    MethodType(String),
    MethodHandle(Handle),
    Dynamic { name: String, descriptor: String, bootstrap: Handle, args: Vec<ConstOperand> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub type_descriptor: String,
    pub elements: Vec<(String, ElementValue)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElementValue {
    /// Primitive or string constant. Byte/char/short/boolean values arrive
    /// as their underlying Int constant; the payload is never inspected.
    Const(ConstOperand),
    Enum { type_descriptor: String, const_name: String },
    /// Class literal, as a return descriptor (possibly `V` or a primitive).
    Class(String),
    Annotation(Box<Annotation>),
    Array(Vec<ElementValue>),
}

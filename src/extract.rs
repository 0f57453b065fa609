//! Reference extraction: one class model in, the flat set of symbolic
//! references it makes out.
//!
//! Every reference site of a class body is visited here — supertypes,
//! signatures, descriptors, exceptions, annotations and their nested values,
//! record components, inner-class entries, and the reference-bearing
//! instructions. Missing a site silently loosens the inferred partition, so
//! this module errs on the side of walking everything; the resolver discards
//! whatever turns out to be untracked.

use serde::Serialize;

use crate::access::MemberKey;
use crate::model::{
    Annotation, ClassModel, ConstOperand, ElementValue, Handle, Insn, Method,
};

/// A symbolic reference made by one class to another class or to another
/// class's member.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Reference {
    Type(String),
    Member(MemberKey),
}

/// Extracts every cross-class reference in `model`. Duplicates are kept;
/// resolution is idempotent.
pub fn class_references(model: &ClassModel) -> Vec<Reference> {
    let mut out = Vec::new();

    if let Some(super_class) = &model.super_class {
        out.push(Reference::Type(super_class.clone()));
    }
    for interface in &model.interfaces {
        out.push(Reference::Type(interface.clone()));
    }
    if let Some(signature) = &model.signature {
        scan_signature(signature, &mut out);
    }
    for annotation in &model.annotations {
        annotation_refs(annotation, &mut out);
    }
    for inner in &model.inner_classes {
        out.push(Reference::Type(inner.inner.clone()));
        if let Some(outer) = &inner.outer {
            out.push(Reference::Type(outer.clone()));
        }
    }
    for component in &model.record_components {
        scan_descriptor(&component.descriptor, &mut out);
        if let Some(signature) = &component.signature {
            scan_signature(signature, &mut out);
        }
        for annotation in &component.annotations {
            annotation_refs(annotation, &mut out);
        }
    }

    for field in &model.fields {
        scan_descriptor(&field.descriptor, &mut out);
        if let Some(signature) = &field.signature {
            scan_signature(signature, &mut out);
        }
        if let Some(value) = &field.constant_value {
            const_operand_refs(value, &mut out);
        }
        for annotation in &field.annotations {
            annotation_refs(annotation, &mut out);
        }
    }

    for method in &model.methods {
        method_refs(method, &mut out);
    }

    out
}

fn method_refs(method: &Method, out: &mut Vec<Reference>) {
    scan_descriptor(&method.descriptor, out);
    if let Some(signature) = &method.signature {
        scan_signature(signature, out);
    }
    for exception in &method.exceptions {
        out.push(Reference::Type(exception.clone()));
    }
    for annotation in &method.annotations {
        annotation_refs(annotation, out);
    }
    for parameter in &method.parameter_annotations {
        for annotation in parameter {
            annotation_refs(annotation, out);
        }
    }
    for local in &method.local_variables {
        if let Some(descriptor) = &local.descriptor {
            scan_descriptor(descriptor, out);
        }
        if let Some(signature) = &local.signature {
            scan_signature(signature, out);
        }
    }
    for insn in &method.instructions {
        insn_refs(insn, out);
    }
}

fn insn_refs(insn: &Insn, out: &mut Vec<Reference>) {
    match insn {
        Insn::Field { owner, name, descriptor } | Insn::Invoke { owner, name, descriptor } => {
            out.push(Reference::Member(MemberKey::new(
                owner.clone(),
                name.clone(),
                descriptor.clone(),
            )));
        }
        Insn::TypeOp { class } => class_or_array(class, out),
        Insn::MultiNewArray { descriptor, .. } => class_or_array(descriptor, out),
        Insn::InvokeDynamic { descriptor, bootstrap, args, .. } => {
            scan_descriptor(descriptor, out);
            handle_refs(bootstrap, out);
            for arg in args {
                const_operand_refs(arg, out);
            }
        }
        Insn::LoadConst(operand) => const_operand_refs(operand, out),
        Insn::Catch { class } => out.push(Reference::Type(class.clone())),
    }
}

fn const_operand_refs(operand: &ConstOperand, out: &mut Vec<Reference>) {
    match operand {
        ConstOperand::Class(name) => class_or_array(name, out),
        ConstOperand::MethodType(descriptor) => scan_descriptor(descriptor, out),
        ConstOperand::MethodHandle(handle) => handle_refs(handle, out),
        ConstOperand::Dynamic { descriptor, bootstrap, args, .. } => {
            scan_descriptor(descriptor, out);
            handle_refs(bootstrap, out);
            for arg in args {
                const_operand_refs(arg, out);
            }
        }
        ConstOperand::Int(_)
        | ConstOperand::Float(_)
        | ConstOperand::Long(_)
        | ConstOperand::Double(_)
        | ConstOperand::Str(_) => {}
    }
}

fn handle_refs(handle: &Handle, out: &mut Vec<Reference>) {
    out.push(Reference::Member(MemberKey::new(
        handle.owner.clone(),
        handle.name.clone(),
        handle.descriptor.clone(),
    )));
}

fn annotation_refs(annotation: &Annotation, out: &mut Vec<Reference>) {
    scan_descriptor(&annotation.type_descriptor, out);
    for (_, value) in &annotation.elements {
        element_value_refs(value, out);
    }
}

fn element_value_refs(value: &ElementValue, out: &mut Vec<Reference>) {
    match value {
        ElementValue::Const(operand) => const_operand_refs(operand, out),
        ElementValue::Enum { type_descriptor, const_name } => {
            // The constant is a member of the enum class; resolving it also
            // covers the reference to the class itself.
            if let Some(owner) = descriptor_to_internal(type_descriptor) {
                out.push(Reference::Member(MemberKey::new(
                    owner,
                    const_name.clone(),
                    type_descriptor.clone(),
                )));
            }
        }
        ElementValue::Class(descriptor) => scan_descriptor(descriptor, out),
        ElementValue::Annotation(nested) => annotation_refs(nested, out),
        ElementValue::Array(values) => {
            for v in values {
                element_value_refs(v, out);
            }
        }
    }
}

/// An operand that is either an internal class name or (for array types) a
/// descriptor.
fn class_or_array(name: &str, out: &mut Vec<Reference>) {
    if name.starts_with('[') {
        scan_descriptor(name, out);
    } else {
        out.push(Reference::Type(name.to_string()));
    }
}

fn descriptor_to_internal(descriptor: &str) -> Option<&str> {
    descriptor.strip_prefix('L')?.strip_suffix(';')
}

/// Emits the object types named by a field or method descriptor. Array
/// nesting and method parentheses are structural noise here; only the
/// `L...;` spans matter.
fn scan_descriptor(descriptor: &str, out: &mut Vec<Reference>) {
    let bytes = descriptor.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'L' => {
                let start = i + 1;
                let Some(end) = descriptor[start..].find(';').map(|e| start + e) else {
                    return;
                };
                out.push(Reference::Type(descriptor[start..end].to_string()));
                i = end + 1;
            }
            b'(' | b')' | b'[' | b'V' | b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S'
            | b'Z' => i += 1,
            _ => return,
        }
    }
}

/// Emits the class types named by a generic signature (class, method, or
/// field-type form). Best effort: a malformed signature stops the scan with
/// whatever was collected so far. Inner-class suffixes after `.` are not
/// emitted, only the package-qualified outer name.
fn scan_signature(signature: &str, out: &mut Vec<Reference>) {
    SignatureScanner { bytes: signature.as_bytes(), pos: 0, out }.scan();
}

struct SignatureScanner<'a, 'o> {
    bytes: &'a [u8],
    pos: usize,
    out: &'o mut Vec<Reference>,
}

impl SignatureScanner<'_, '_> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn eat(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn scan(&mut self) {
        if self.eat(b'<') {
            self.type_params();
        }
        if self.eat(b'(') {
            while self.peek().is_some_and(|b| b != b')') {
                if !self.type_signature() {
                    return;
                }
            }
            self.eat(b')');
            self.type_signature();
            while self.eat(b'^') {
                if !self.type_signature() {
                    return;
                }
            }
        } else {
            // Class signature (superclass + interfaces) or a lone field
            // type signature: a run of type signatures either way.
            while self.peek().is_some() {
                if !self.type_signature() {
                    return;
                }
            }
        }
    }

    fn type_params(&mut self) {
        loop {
            match self.peek() {
                None => return,
                Some(b'>') => {
                    self.pos += 1;
                    return;
                }
                _ => {}
            }
            while self.peek().is_some_and(|b| b != b':') {
                self.pos += 1;
            }
            while self.eat(b':') {
                if matches!(self.peek(), Some(b'L' | b'[' | b'T')) && !self.type_signature() {
                    return;
                }
            }
        }
    }

    fn type_signature(&mut self) -> bool {
        match self.peek() {
            Some(b'L') => self.class_type(),
            Some(b'[') => {
                self.pos += 1;
                self.type_signature()
            }
            Some(b'T') => {
                self.pos += 1;
                while let Some(b) = self.bump() {
                    if b == b';' {
                        break;
                    }
                }
                true
            }
            Some(b'*') => {
                self.pos += 1;
                true
            }
            Some(b'+') | Some(b'-') => {
                self.pos += 1;
                self.type_signature()
            }
            Some(b'V' | b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z') => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn class_type(&mut self) -> bool {
        self.pos += 1; // 'L'
        let start = self.pos;
        while self.peek().is_some_and(|b| !matches!(b, b'<' | b';' | b'.')) {
            self.pos += 1;
        }
        if self.pos > start {
            self.out.push(Reference::Type(
                String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned(),
            ));
        }
        loop {
            match self.peek() {
                Some(b'<') => {
                    self.pos += 1;
                    while self.peek().is_some_and(|b| b != b'>') {
                        if !self.type_signature() {
                            return false;
                        }
                    }
                    if !self.eat(b'>') {
                        return false;
                    }
                }
                Some(b'.') => {
                    self.pos += 1;
                    while self.peek().is_some_and(|b| !matches!(b, b'<' | b';' | b'.')) {
                        self.pos += 1;
                    }
                }
                Some(b';') => {
                    self.pos += 1;
                    return true;
                }
                _ => return false,
            }
        }
    }
}

//! Class-file decoding: bytes in, [`ClassModel`] out.
//!
//! This is a structural decoder, not a verifier. It resolves exactly the
//! structures the organizer needs — names, flags, descriptors, signatures,
//! annotations of every flavor, record components, inner-class entries, and
//! the reference-bearing instructions of each Code attribute — and skips
//! everything else (stack maps, line numbers, unknown attributes).
//!
//! `BootstrapMethods` is a class-level attribute but is referenced from Code
//! attributes parsed earlier in the stream, so members are first collected
//! with raw attribute bytes and interpreted in a second pass once the
//! bootstrap table is known.

use anyhow::{Context, Result, bail};

use crate::model::{
    Annotation, ClassModel, ConstOperand, ElementValue, Field, InnerClass, Insn, LocalVariable,
    Method, RecordComponent, Visibility,
};
use crate::pool::{ConstantPool, CpEntry};
use crate::reader::Reader;

struct RawAttr<'a> {
    name: String,
    data: &'a [u8],
}

struct RawMember<'a> {
    access_flags: u16,
    name: String,
    descriptor: String,
    attrs: Vec<RawAttr<'a>>,
}

struct RawBootstrap {
    method_ref: u16,
    args: Vec<u16>,
}

pub fn decode_class(bytes: &[u8]) -> Result<ClassModel> {
    let mut reader = Reader::new(bytes);
    let magic = reader.read_u4()?;
    if magic != 0xCAFE_BABE {
        bail!("invalid class file magic 0x{magic:08x}");
    }
    let _minor = reader.read_u2()?;
    let _major = reader.read_u2()?;
    let cp = ConstantPool::parse(&mut reader).context("malformed constant pool")?;

    let access_flags = reader.read_u2()?;
    let name = cp.class_name(reader.read_u2()?)?;
    let super_index = reader.read_u2()?;
    let super_class = if super_index == 0 {
        None
    } else {
        Some(cp.class_name(super_index)?)
    };

    let interface_count = reader.read_u2()? as usize;
    let mut interfaces = Vec::with_capacity(interface_count);
    for _ in 0..interface_count {
        interfaces.push(cp.class_name(reader.read_u2()?)?);
    }

    let raw_fields = read_raw_members(&mut reader, &cp)?;
    let raw_methods = read_raw_members(&mut reader, &cp)?;
    let class_attrs = read_raw_attrs(&mut reader, &cp)?;
    reader.ensure_empty()?;

    let bootstraps = parse_raw_bootstraps(&class_attrs)?;

    let mut signature = None;
    let mut annotations = Vec::new();
    let mut inner_classes = Vec::new();
    let mut record_components = Vec::new();
    for attr in &class_attrs {
        let mut r = Reader::new(attr.data);
        match attr.name.as_str() {
            "Signature" => signature = Some(cp.utf8(r.read_u2()?)?.to_string()),
            "RuntimeVisibleAnnotations" | "RuntimeInvisibleAnnotations" => {
                parse_annotations(&mut r, &cp, &mut annotations)?;
            }
            "RuntimeVisibleTypeAnnotations" | "RuntimeInvisibleTypeAnnotations" => {
                parse_type_annotations(&mut r, &cp, &mut annotations)?;
            }
            "InnerClasses" => {
                let count = r.read_u2()? as usize;
                for _ in 0..count {
                    let inner_index = r.read_u2()?;
                    let outer_index = r.read_u2()?;
                    let _inner_name = r.read_u2()?;
                    let _inner_flags = r.read_u2()?;
                    inner_classes.push(InnerClass {
                        inner: cp.class_name(inner_index)?,
                        outer: if outer_index == 0 {
                            None
                        } else {
                            Some(cp.class_name(outer_index)?)
                        },
                    });
                }
            }
            "Record" => {
                parse_record(&mut r, &cp, &mut record_components)?;
            }
            _ => {}
        }
    }

    let fields = raw_fields
        .iter()
        .map(|raw| build_field(raw, &cp, &bootstraps))
        .collect::<Result<Vec<_>>>()?;
    let methods = raw_methods
        .iter()
        .map(|raw| build_method(raw, &cp, &bootstraps))
        .collect::<Result<Vec<_>>>()?;

    Ok(ClassModel {
        name,
        visibility: Visibility::from_flags(access_flags),
        super_class,
        interfaces,
        signature,
        annotations,
        fields,
        methods,
        record_components,
        inner_classes,
    })
}

fn read_raw_members<'a>(reader: &mut Reader<'a>, cp: &ConstantPool) -> Result<Vec<RawMember<'a>>> {
    let count = reader.read_u2()? as usize;
    let mut members = Vec::with_capacity(count);
    for _ in 0..count {
        let access_flags = reader.read_u2()?;
        let name = cp.utf8(reader.read_u2()?)?.to_string();
        let descriptor = cp.utf8(reader.read_u2()?)?.to_string();
        let attrs = read_raw_attrs(reader, cp)?;
        members.push(RawMember { access_flags, name, descriptor, attrs });
    }
    Ok(members)
}

fn read_raw_attrs<'a>(reader: &mut Reader<'a>, cp: &ConstantPool) -> Result<Vec<RawAttr<'a>>> {
    let count = reader.read_u2()? as usize;
    let mut attrs = Vec::with_capacity(count);
    for _ in 0..count {
        let name = cp.utf8(reader.read_u2()?)?.to_string();
        let length = reader.read_u4()? as usize;
        let data = reader.read_bytes(length)?;
        attrs.push(RawAttr { name, data });
    }
    Ok(attrs)
}

fn parse_raw_bootstraps(attrs: &[RawAttr<'_>]) -> Result<Vec<RawBootstrap>> {
    let Some(attr) = attrs.iter().find(|a| a.name == "BootstrapMethods") else {
        return Ok(Vec::new());
    };
    let mut r = Reader::new(attr.data);
    let count = r.read_u2()? as usize;
    let mut bootstraps = Vec::with_capacity(count);
    for _ in 0..count {
        let method_ref = r.read_u2()?;
        let arg_count = r.read_u2()? as usize;
        let mut args = Vec::with_capacity(arg_count);
        for _ in 0..arg_count {
            args.push(r.read_u2()?);
        }
        bootstraps.push(RawBootstrap { method_ref, args });
    }
    Ok(bootstraps)
}

fn build_field(raw: &RawMember<'_>, cp: &ConstantPool, bootstraps: &[RawBootstrap]) -> Result<Field> {
    let mut signature = None;
    let mut constant_value = None;
    let mut annotations = Vec::new();
    for attr in &raw.attrs {
        let mut r = Reader::new(attr.data);
        match attr.name.as_str() {
            "Signature" => signature = Some(cp.utf8(r.read_u2()?)?.to_string()),
            "ConstantValue" => {
                constant_value =
                    Some(loadable_constant(cp, bootstraps, r.read_u2()?, &mut Vec::new())?);
            }
            "RuntimeVisibleAnnotations" | "RuntimeInvisibleAnnotations" => {
                parse_annotations(&mut r, cp, &mut annotations)?;
            }
            "RuntimeVisibleTypeAnnotations" | "RuntimeInvisibleTypeAnnotations" => {
                parse_type_annotations(&mut r, cp, &mut annotations)?;
            }
            _ => {}
        }
    }
    Ok(Field {
        name: raw.name.clone(),
        descriptor: raw.descriptor.clone(),
        visibility: Visibility::from_flags(raw.access_flags),
        signature,
        constant_value,
        annotations,
    })
}

fn build_method(raw: &RawMember<'_>, cp: &ConstantPool, bootstraps: &[RawBootstrap]) -> Result<Method> {
    let mut signature = None;
    let mut exceptions = Vec::new();
    let mut annotations = Vec::new();
    let mut parameter_annotations: Vec<Vec<Annotation>> = Vec::new();
    let mut local_variables = Vec::new();
    let mut instructions = Vec::new();
    for attr in &raw.attrs {
        let mut r = Reader::new(attr.data);
        match attr.name.as_str() {
            "Signature" => signature = Some(cp.utf8(r.read_u2()?)?.to_string()),
            "Exceptions" => {
                let count = r.read_u2()? as usize;
                for _ in 0..count {
                    exceptions.push(cp.class_name(r.read_u2()?)?);
                }
            }
            "RuntimeVisibleAnnotations" | "RuntimeInvisibleAnnotations" => {
                parse_annotations(&mut r, cp, &mut annotations)?;
            }
            "RuntimeVisibleTypeAnnotations" | "RuntimeInvisibleTypeAnnotations" => {
                parse_type_annotations(&mut r, cp, &mut annotations)?;
            }
            "RuntimeVisibleParameterAnnotations" | "RuntimeInvisibleParameterAnnotations" => {
                let num_params = r.read_u1()? as usize;
                if parameter_annotations.len() < num_params {
                    parameter_annotations.resize_with(num_params, Vec::new);
                }
                for slot in parameter_annotations.iter_mut().take(num_params) {
                    parse_annotations(&mut r, cp, slot)?;
                }
            }
            "Code" => {
                parse_code(
                    &mut r,
                    cp,
                    bootstraps,
                    &mut instructions,
                    &mut local_variables,
                    &mut annotations,
                )
                .with_context(|| format!("in Code attribute of {}{}", raw.name, raw.descriptor))?;
            }
            _ => {}
        }
    }
    Ok(Method {
        name: raw.name.clone(),
        descriptor: raw.descriptor.clone(),
        visibility: Visibility::from_flags(raw.access_flags),
        signature,
        exceptions,
        annotations,
        parameter_annotations,
        local_variables,
        instructions,
    })
}

fn parse_record(
    reader: &mut Reader<'_>,
    cp: &ConstantPool,
    out: &mut Vec<RecordComponent>,
) -> Result<()> {
    let count = reader.read_u2()? as usize;
    for _ in 0..count {
        let name = cp.utf8(reader.read_u2()?)?.to_string();
        let descriptor = cp.utf8(reader.read_u2()?)?.to_string();
        let attrs = read_raw_attrs(reader, cp)?;

        let mut signature = None;
        let mut annotations = Vec::new();
        for attr in &attrs {
            let mut r = Reader::new(attr.data);
            match attr.name.as_str() {
                "Signature" => signature = Some(cp.utf8(r.read_u2()?)?.to_string()),
                "RuntimeVisibleAnnotations" | "RuntimeInvisibleAnnotations" => {
                    parse_annotations(&mut r, cp, &mut annotations)?;
                }
                "RuntimeVisibleTypeAnnotations" | "RuntimeInvisibleTypeAnnotations" => {
                    parse_type_annotations(&mut r, cp, &mut annotations)?;
                }
                _ => {}
            }
        }
        out.push(RecordComponent { name, descriptor, signature, annotations });
    }
    Ok(())
}

fn parse_code(
    reader: &mut Reader<'_>,
    cp: &ConstantPool,
    bootstraps: &[RawBootstrap],
    instructions: &mut Vec<Insn>,
    local_variables: &mut Vec<LocalVariable>,
    annotations: &mut Vec<Annotation>,
) -> Result<()> {
    let _max_stack = reader.read_u2()?;
    let _max_locals = reader.read_u2()?;
    let code_length = reader.read_u4()? as usize;
    let code = reader.read_bytes(code_length)?;
    scan_instructions(code, cp, bootstraps, instructions)?;

    let handler_count = reader.read_u2()? as usize;
    for _ in 0..handler_count {
        reader.skip(6)?;
        let catch_type = reader.read_u2()?;
        if catch_type != 0 {
            instructions.push(Insn::Catch { class: cp.class_name(catch_type)? });
        }
    }

    // (start_pc, slot index) keys a local variable across the two tables.
    let mut lvt: Vec<(u16, u16, LocalVariable)> = Vec::new();
    let mut lvtt: Vec<(u16, u16, String, String)> = Vec::new();
    let attrs = read_raw_attrs(reader, cp)?;
    for attr in &attrs {
        let mut r = Reader::new(attr.data);
        match attr.name.as_str() {
            "LocalVariableTable" => {
                let count = r.read_u2()? as usize;
                for _ in 0..count {
                    let start = r.read_u2()?;
                    let _length = r.read_u2()?;
                    let name = cp.utf8(r.read_u2()?)?.to_string();
                    let descriptor = cp.utf8(r.read_u2()?)?.to_string();
                    let index = r.read_u2()?;
                    lvt.push((
                        start,
                        index,
                        LocalVariable { name, descriptor: Some(descriptor), signature: None },
                    ));
                }
            }
            "LocalVariableTypeTable" => {
                let count = r.read_u2()? as usize;
                for _ in 0..count {
                    let start = r.read_u2()?;
                    let _length = r.read_u2()?;
                    let name = cp.utf8(r.read_u2()?)?.to_string();
                    let sig = cp.utf8(r.read_u2()?)?.to_string();
                    let index = r.read_u2()?;
                    lvtt.push((start, index, name, sig));
                }
            }
            "RuntimeVisibleTypeAnnotations" | "RuntimeInvisibleTypeAnnotations" => {
                parse_type_annotations(&mut r, cp, annotations)?;
            }
            _ => {}
        }
    }
    for (start, index, name, sig) in lvtt {
        match lvt.iter_mut().find(|(s, i, _)| *s == start && *i == index) {
            Some((_, _, lv)) => lv.signature = Some(sig),
            None => lvt.push((
                start,
                index,
                LocalVariable { name, descriptor: None, signature: Some(sig) },
            )),
        }
    }
    local_variables.extend(lvt.into_iter().map(|(_, _, lv)| lv));
    Ok(())
}

/// Walks the bytecode stream collecting the reference-bearing instructions.
/// Operand widths follow the class-file format; the two switch instructions
/// and `wide` are the only variable-length cases.
fn scan_instructions(
    code: &[u8],
    cp: &ConstantPool,
    bootstraps: &[RawBootstrap],
    out: &mut Vec<Insn>,
) -> Result<()> {
    let mut r = Reader::new(code);
    while r.remaining() > 0 {
        let opcode = r.read_u1()?;
        match opcode {
            // ldc / ldc_w / ldc2_w
            0x12 => {
                let index = r.read_u1()? as u16;
                out.push(Insn::LoadConst(loadable_constant(cp, bootstraps, index, &mut Vec::new())?));
            }
            0x13 | 0x14 => {
                let index = r.read_u2()?;
                out.push(Insn::LoadConst(loadable_constant(cp, bootstraps, index, &mut Vec::new())?));
            }
            // getstatic / putstatic / getfield / putfield
            0xb2..=0xb5 => {
                let (owner, name, descriptor) = cp.member_ref(r.read_u2()?)?;
                out.push(Insn::Field { owner, name, descriptor });
            }
            // invokevirtual / invokespecial / invokestatic
            0xb6..=0xb8 => {
                let (owner, name, descriptor) = cp.member_ref(r.read_u2()?)?;
                out.push(Insn::Invoke { owner, name, descriptor });
            }
            // invokeinterface
            0xb9 => {
                let (owner, name, descriptor) = cp.member_ref(r.read_u2()?)?;
                r.skip(2)?;
                out.push(Insn::Invoke { owner, name, descriptor });
            }
            // invokedynamic
            0xba => {
                let index = r.read_u2()?;
                r.skip(2)?;
                let (bootstrap, name_and_type) = match cp.get(index)? {
                    CpEntry::InvokeDynamic { bootstrap, name_and_type } => (*bootstrap, *name_and_type),
                    other => bail!("invokedynamic operand {index} is {}", other.kind()),
                };
                let (name, descriptor) = cp.name_and_type(name_and_type)?;
                let bsm = bootstraps
                    .get(bootstrap as usize)
                    .with_context(|| format!("missing bootstrap method entry {bootstrap}"))?;
                let handle = cp.handle(bsm.method_ref)?;
                let args = bsm
                    .args
                    .iter()
                    .map(|&arg| loadable_constant(cp, bootstraps, arg, &mut Vec::new()))
                    .collect::<Result<Vec<_>>>()?;
                out.push(Insn::InvokeDynamic { name, descriptor, bootstrap: handle, args });
            }
            // new / anewarray / checkcast / instanceof
            0xbb | 0xbd | 0xc0 | 0xc1 => {
                out.push(Insn::TypeOp { class: cp.class_name(r.read_u2()?)? });
            }
            // multianewarray
            0xc5 => {
                let descriptor = cp.class_name(r.read_u2()?)?;
                let dimensions = r.read_u1()?;
                out.push(Insn::MultiNewArray { descriptor, dimensions });
            }
            // tableswitch
            0xaa => {
                r.skip((4 - r.pos() % 4) % 4)?;
                let _default = r.read_i4()?;
                let low = r.read_i4()?;
                let high = r.read_i4()?;
                if high < low {
                    bail!("malformed tableswitch bounds {low}..{high}");
                }
                r.skip(((high - low) as usize + 1) * 4)?;
            }
            // lookupswitch
            0xab => {
                r.skip((4 - r.pos() % 4) % 4)?;
                let _default = r.read_i4()?;
                let npairs = r.read_i4()?;
                if npairs < 0 {
                    bail!("malformed lookupswitch pair count {npairs}");
                }
                r.skip(npairs as usize * 8)?;
            }
            // wide
            0xc4 => {
                let widened = r.read_u1()?;
                r.skip(if widened == 0x84 { 4 } else { 2 })?;
            }
            // one-byte operand: bipush, loads/stores with index, ret, newarray
            0x10 | 0x15..=0x19 | 0x36..=0x3a | 0xa9 | 0xbc => r.skip(1)?,
            // two-byte operand: sipush, iinc, branches, ifnull/ifnonnull
            0x11 | 0x84 | 0x99..=0xa8 | 0xc6 | 0xc7 => r.skip(2)?,
            // four-byte operand: goto_w, jsr_w
            0xc8 | 0xc9 => r.skip(4)?,
            // everything else carries no operands
            0x00..=0x0f | 0x1a..=0x35 | 0x3b..=0x83 | 0x85..=0x98 | 0xac..=0xb1 | 0xbe | 0xbf
            | 0xc2 | 0xc3 => {}
            other => bail!("unrecognized opcode 0x{other:02x} at offset {}", r.pos() - 1),
        }
    }
    Ok(())
}

/// Resolves a loadable constant-pool entry. Dynamic constants pull in their
/// bootstrap method and static arguments recursively; `visiting` guards
/// against reference cycles in malformed pools.
fn loadable_constant(
    cp: &ConstantPool,
    bootstraps: &[RawBootstrap],
    index: u16,
    visiting: &mut Vec<u16>,
) -> Result<ConstOperand> {
    match cp.get(index)? {
        CpEntry::Integer(v) => Ok(ConstOperand::Int(*v)),
        CpEntry::Float(v) => Ok(ConstOperand::Float(*v)),
        CpEntry::Long(v) => Ok(ConstOperand::Long(*v)),
        CpEntry::Double(v) => Ok(ConstOperand::Double(*v)),
        CpEntry::Str(utf8) => Ok(ConstOperand::Str(cp.utf8(*utf8)?.to_string())),
        CpEntry::Class(utf8) => Ok(ConstOperand::Class(cp.utf8(*utf8)?.to_string())),
        CpEntry::MethodType(utf8) => Ok(ConstOperand::MethodType(cp.utf8(*utf8)?.to_string())),
        CpEntry::MethodHandle { .. } => Ok(ConstOperand::MethodHandle(cp.handle(index)?)),
        CpEntry::Dynamic { bootstrap, name_and_type } => {
            if visiting.contains(&index) {
                bail!("cyclic dynamic constant at pool index {index}");
            }
            visiting.push(index);
            let (name, descriptor) = cp.name_and_type(*name_and_type)?;
            let bsm = bootstraps
                .get(*bootstrap as usize)
                .with_context(|| format!("missing bootstrap method entry {bootstrap}"))?;
            let handle = cp.handle(bsm.method_ref)?;
            let args = bsm
                .args
                .iter()
                .map(|&arg| loadable_constant(cp, bootstraps, arg, visiting))
                .collect::<Result<Vec<_>>>()?;
            visiting.pop();
            Ok(ConstOperand::Dynamic { name, descriptor, bootstrap: handle, args })
        }
        other => bail!("pool index {index} is {}, not a loadable constant", other.kind()),
    }
}

fn parse_annotations(
    reader: &mut Reader<'_>,
    cp: &ConstantPool,
    out: &mut Vec<Annotation>,
) -> Result<()> {
    let count = reader.read_u2()? as usize;
    for _ in 0..count {
        out.push(parse_annotation(reader, cp)?);
    }
    Ok(())
}

/// Type annotations prefix each annotation with a target and a type path;
/// neither names a class, so both are skipped and the payload is collected
/// like any other annotation.
fn parse_type_annotations(
    reader: &mut Reader<'_>,
    cp: &ConstantPool,
    out: &mut Vec<Annotation>,
) -> Result<()> {
    let count = reader.read_u2()? as usize;
    for _ in 0..count {
        let target_type = reader.read_u1()?;
        match target_type {
            0x00 | 0x01 | 0x16 => reader.skip(1)?,
            0x10..=0x12 | 0x17 | 0x42..=0x46 => reader.skip(2)?,
            0x13..=0x15 => {}
            0x40 | 0x41 => {
                let table_length = reader.read_u2()? as usize;
                reader.skip(table_length * 6)?;
            }
            0x47..=0x4b => reader.skip(3)?,
            other => bail!("unknown type annotation target 0x{other:02x}"),
        }
        let path_length = reader.read_u1()? as usize;
        reader.skip(path_length * 2)?;
        out.push(parse_annotation(reader, cp)?);
    }
    Ok(())
}

fn parse_annotation(reader: &mut Reader<'_>, cp: &ConstantPool) -> Result<Annotation> {
    let type_descriptor = cp.utf8(reader.read_u2()?)?.to_string();
    let pair_count = reader.read_u2()? as usize;
    let mut elements = Vec::with_capacity(pair_count);
    for _ in 0..pair_count {
        let name = cp.utf8(reader.read_u2()?)?.to_string();
        elements.push((name, parse_element_value(reader, cp)?));
    }
    Ok(Annotation { type_descriptor, elements })
}

fn parse_element_value(reader: &mut Reader<'_>, cp: &ConstantPool) -> Result<ElementValue> {
    let tag = reader.read_u1()? as char;
    match tag {
        'B' | 'C' | 'I' | 'S' | 'Z' => {
            let index = reader.read_u2()?;
            match cp.get(index)? {
                CpEntry::Integer(v) => Ok(ElementValue::Const(ConstOperand::Int(*v))),
                other => bail!("element value index {index} is {}, expected Integer", other.kind()),
            }
        }
        'D' => match cp.get(reader.read_u2()?)? {
            CpEntry::Double(v) => Ok(ElementValue::Const(ConstOperand::Double(*v))),
            other => bail!("element value is {}, expected Double", other.kind()),
        },
        'F' => match cp.get(reader.read_u2()?)? {
            CpEntry::Float(v) => Ok(ElementValue::Const(ConstOperand::Float(*v))),
            other => bail!("element value is {}, expected Float", other.kind()),
        },
        'J' => match cp.get(reader.read_u2()?)? {
            CpEntry::Long(v) => Ok(ElementValue::Const(ConstOperand::Long(*v))),
            other => bail!("element value is {}, expected Long", other.kind()),
        },
        's' => Ok(ElementValue::Const(ConstOperand::Str(
            cp.utf8(reader.read_u2()?)?.to_string(),
        ))),
        'e' => {
            let type_descriptor = cp.utf8(reader.read_u2()?)?.to_string();
            let const_name = cp.utf8(reader.read_u2()?)?.to_string();
            Ok(ElementValue::Enum { type_descriptor, const_name })
        }
        'c' => Ok(ElementValue::Class(cp.utf8(reader.read_u2()?)?.to_string())),
        '@' => Ok(ElementValue::Annotation(Box::new(parse_annotation(reader, cp)?))),
        '[' => {
            let count = reader.read_u2()? as usize;
            let mut values = Vec::with_capacity(count);
            for _ in 0..count {
                values.push(parse_element_value(reader, cp)?);
            }
            Ok(ElementValue::Array(values))
        }
        other => bail!("invalid element value tag {other:?}"),
    }
}

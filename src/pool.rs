//! Class-file constant pool parsing and typed accessors.

use anyhow::{Result, bail};

use crate::model::Handle;
use crate::reader::Reader;

#[derive(Debug, Clone, PartialEq)]
pub enum CpEntry {
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class(u16),
    Str(u16),
    FieldRef { class: u16, name_and_type: u16 },
    MethodRef { class: u16, name_and_type: u16 },
    InterfaceMethodRef { class: u16, name_and_type: u16 },
    NameAndType { name: u16, descriptor: u16 },
    MethodHandle { kind: u8, reference: u16 },
    MethodType(u16),
    Dynamic { bootstrap: u16, name_and_type: u16 },
    InvokeDynamic { bootstrap: u16, name_and_type: u16 },
    Module(u16),
    Package(u16),
    /// Index 0 and the phantom slot following a Long or Double entry.
    Unusable,
}

#[derive(Debug)]
pub struct ConstantPool {
    entries: Vec<CpEntry>,
}

impl ConstantPool {
    pub fn parse(reader: &mut Reader<'_>) -> Result<Self> {
        let count = reader.read_u2()? as usize;
        let mut entries = Vec::with_capacity(count);
        entries.push(CpEntry::Unusable);

        while entries.len() < count {
            let tag = reader.read_u1()?;
            let entry = match tag {
                1 => {
                    let len = reader.read_u2()? as usize;
                    CpEntry::Utf8(decode_modified_utf8(reader.read_bytes(len)?)?)
                }
                3 => CpEntry::Integer(reader.read_u4()? as i32),
                4 => CpEntry::Float(f32::from_bits(reader.read_u4()?)),
                5 => CpEntry::Long(((reader.read_u4()? as u64) << 32 | reader.read_u4()? as u64) as i64),
                6 => CpEntry::Double(f64::from_bits((reader.read_u4()? as u64) << 32 | reader.read_u4()? as u64)),
                7 => CpEntry::Class(reader.read_u2()?),
                8 => CpEntry::Str(reader.read_u2()?),
                9 => CpEntry::FieldRef { class: reader.read_u2()?, name_and_type: reader.read_u2()? },
                10 => CpEntry::MethodRef { class: reader.read_u2()?, name_and_type: reader.read_u2()? },
                11 => CpEntry::InterfaceMethodRef { class: reader.read_u2()?, name_and_type: reader.read_u2()? },
                12 => CpEntry::NameAndType { name: reader.read_u2()?, descriptor: reader.read_u2()? },
                15 => CpEntry::MethodHandle { kind: reader.read_u1()?, reference: reader.read_u2()? },
                16 => CpEntry::MethodType(reader.read_u2()?),
                17 => CpEntry::Dynamic { bootstrap: reader.read_u2()?, name_and_type: reader.read_u2()? },
                18 => CpEntry::InvokeDynamic { bootstrap: reader.read_u2()?, name_and_type: reader.read_u2()? },
                19 => CpEntry::Module(reader.read_u2()?),
                20 => CpEntry::Package(reader.read_u2()?),
                other => bail!("invalid constant pool tag {other} at index {}", entries.len()),
            };
            let two_slots = matches!(entry, CpEntry::Long(_) | CpEntry::Double(_));
            entries.push(entry);
            if two_slots {
                entries.push(CpEntry::Unusable);
            }
        }

        Ok(Self { entries })
    }

    pub fn get(&self, index: u16) -> Result<&CpEntry> {
        match self.entries.get(index as usize) {
            None | Some(CpEntry::Unusable) => bail!("invalid constant pool index {index}"),
            Some(entry) => Ok(entry),
        }
    }

    pub fn utf8(&self, index: u16) -> Result<&str> {
        match self.get(index)? {
            CpEntry::Utf8(s) => Ok(s),
            other => bail!("constant pool index {index} is {}, expected Utf8", other.kind()),
        }
    }

    pub fn class_name(&self, index: u16) -> Result<String> {
        match self.get(index)? {
            CpEntry::Class(name) => Ok(self.utf8(*name)?.to_string()),
            other => bail!("constant pool index {index} is {}, expected Class", other.kind()),
        }
    }

    pub fn name_and_type(&self, index: u16) -> Result<(String, String)> {
        match self.get(index)? {
            CpEntry::NameAndType { name, descriptor } => {
                Ok((self.utf8(*name)?.to_string(), self.utf8(*descriptor)?.to_string()))
            }
            other => bail!("constant pool index {index} is {}, expected NameAndType", other.kind()),
        }
    }

    /// Resolves a Fieldref, Methodref or InterfaceMethodref entry to
    /// `(owner, name, descriptor)`.
    pub fn member_ref(&self, index: u16) -> Result<(String, String, String)> {
        let (class, name_and_type) = match self.get(index)? {
            CpEntry::FieldRef { class, name_and_type }
            | CpEntry::MethodRef { class, name_and_type }
            | CpEntry::InterfaceMethodRef { class, name_and_type } => (*class, *name_and_type),
            other => bail!("constant pool index {index} is {}, expected a member reference", other.kind()),
        };
        let owner = self.class_name(class)?;
        let (name, descriptor) = self.name_and_type(name_and_type)?;
        Ok((owner, name, descriptor))
    }

    /// Resolves a MethodHandle entry to the member it points at.
    pub fn handle(&self, index: u16) -> Result<Handle> {
        match self.get(index)? {
            CpEntry::MethodHandle { reference, .. } => {
                let (owner, name, descriptor) = self.member_ref(*reference)?;
                Ok(Handle { owner, name, descriptor })
            }
            other => bail!("constant pool index {index} is {}, expected MethodHandle", other.kind()),
        }
    }
}

impl CpEntry {
    pub fn kind(&self) -> &'static str {
        match self {
            CpEntry::Utf8(_) => "Utf8",
            CpEntry::Integer(_) => "Integer",
            CpEntry::Float(_) => "Float",
            CpEntry::Long(_) => "Long",
            CpEntry::Double(_) => "Double",
            CpEntry::Class(_) => "Class",
            CpEntry::Str(_) => "String",
            CpEntry::FieldRef { .. } => "Fieldref",
            CpEntry::MethodRef { .. } => "Methodref",
            CpEntry::InterfaceMethodRef { .. } => "InterfaceMethodref",
            CpEntry::NameAndType { .. } => "NameAndType",
            CpEntry::MethodHandle { .. } => "MethodHandle",
            CpEntry::MethodType(_) => "MethodType",
            CpEntry::Dynamic { .. } => "Dynamic",
            CpEntry::InvokeDynamic { .. } => "InvokeDynamic",
            CpEntry::Module(_) => "Module",
            CpEntry::Package(_) => "Package",
            CpEntry::Unusable => "unusable slot",
        }
    }
}

/// Decodes the JVM's modified UTF-8: a two-byte encoding for NUL, no
/// four-byte sequences, supplementary characters as surrogate pairs.
fn decode_modified_utf8(bytes: &[u8]) -> Result<String> {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0usize;
    while i < bytes.len() {
        let b0 = bytes[i];
        if b0 & 0x80 == 0 {
            units.push(b0 as u16);
            i += 1;
        } else if b0 & 0xe0 == 0xc0 {
            if i + 1 >= bytes.len() {
                bail!("truncated modified UTF-8 sequence");
            }
            let b1 = bytes[i + 1];
            units.push(((b0 as u16 & 0x1f) << 6) | (b1 as u16 & 0x3f));
            i += 2;
        } else if b0 & 0xf0 == 0xe0 {
            if i + 2 >= bytes.len() {
                bail!("truncated modified UTF-8 sequence");
            }
            let (b1, b2) = (bytes[i + 1], bytes[i + 2]);
            units.push(((b0 as u16 & 0x0f) << 12) | ((b1 as u16 & 0x3f) << 6) | (b2 as u16 & 0x3f));
            i += 3;
        } else {
            bail!("invalid modified UTF-8 byte 0x{b0:02x}");
        }
    }
    Ok(String::from_utf16_lossy(&units))
}

//! Hand-rolled JVM class-file codec: constant pool, fields, methods, and
//! the `Code` attribute, decoded into a mutable model and re-encoded after
//! rewriting.
//!
//! The core must both read arbitrary host-supplied class files and write
//! patched ones back out, so the codec lives in-process rather than behind
//! a third-party parser: see `DESIGN.md` for why no published crate's
//! surface was assumed here. The encoding follows the byte layout the
//! ancestor analyzer's own test fixtures build by hand (big-endian cursor
//! writes of a constant pool, `this_class`/`super_class`, fields, methods,
//! and a `Code` attribute), generalized to a full reader and to the
//! constant-pool tag set rewriting needs.

use anyhow::{Context, Result, anyhow, bail};

use crate::scan;

const MAGIC: u32 = 0xCAFE_BABE;

/// One constant-pool entry. `Other` preserves tags this crate never
/// rewrites (`MethodHandle`, `MethodType`, `Dynamic`, `InvokeDynamic`,
/// `Module`, `Package`) byte-for-byte.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum ConstantPoolEntry {
    Utf8(String),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class { name_index: u16 },
    String { string_index: u16 },
    Fieldref { class_index: u16, name_and_type_index: u16 },
    Methodref { class_index: u16, name_and_type_index: u16 },
    InterfaceMethodref { class_index: u16, name_and_type_index: u16 },
    NameAndType { name_index: u16, descriptor_index: u16 },
    Other { tag: u8, bytes: Vec<u8> },
}

impl ConstantPoolEntry {
    fn tag(&self) -> u8 {
        match self {
            ConstantPoolEntry::Utf8(_) => 1,
            ConstantPoolEntry::Integer(_) => 3,
            ConstantPoolEntry::Float(_) => 4,
            ConstantPoolEntry::Long(_) => 5,
            ConstantPoolEntry::Double(_) => 6,
            ConstantPoolEntry::Class { .. } => 7,
            ConstantPoolEntry::String { .. } => 8,
            ConstantPoolEntry::Fieldref { .. } => 9,
            ConstantPoolEntry::Methodref { .. } => 10,
            ConstantPoolEntry::InterfaceMethodref { .. } => 11,
            ConstantPoolEntry::NameAndType { .. } => 12,
            ConstantPoolEntry::Other { tag, .. } => *tag,
        }
    }

    /// `true` for the two wide entries (`Long`, `Double`) that occupy two
    /// consecutive constant-pool slots, per the JVM specification's own
    /// historical quirk.
    fn is_wide(&self) -> bool {
        matches!(self, ConstantPoolEntry::Long(_) | ConstantPoolEntry::Double(_))
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.push(self.tag());
        match self {
            ConstantPoolEntry::Utf8(value) => {
                write_u16(out, value.len() as u16);
                out.extend_from_slice(value.as_bytes());
            }
            ConstantPoolEntry::Integer(value) => out.extend_from_slice(&value.to_be_bytes()),
            ConstantPoolEntry::Float(bits) => out.extend_from_slice(&bits.to_be_bytes()),
            ConstantPoolEntry::Long(value) => out.extend_from_slice(&value.to_be_bytes()),
            ConstantPoolEntry::Double(bits) => out.extend_from_slice(&bits.to_be_bytes()),
            ConstantPoolEntry::Class { name_index } => write_u16(out, *name_index),
            ConstantPoolEntry::String { string_index } => write_u16(out, *string_index),
            ConstantPoolEntry::Fieldref { class_index, name_and_type_index }
            | ConstantPoolEntry::Methodref { class_index, name_and_type_index }
            | ConstantPoolEntry::InterfaceMethodref { class_index, name_and_type_index } => {
                write_u16(out, *class_index);
                write_u16(out, *name_and_type_index);
            }
            ConstantPoolEntry::NameAndType { name_index, descriptor_index } => {
                write_u16(out, *name_index);
                write_u16(out, *descriptor_index);
            }
            ConstantPoolEntry::Other { bytes, .. } => out.extend_from_slice(bytes),
        }
    }
}

/// 1-indexed constant pool (slot 0 is unused, matching the class-file
/// format); `Long`/`Double` entries consume their successor slot.
#[derive(Clone, Debug, Default)]
pub(crate) struct ConstantPool {
    entries: Vec<Option<ConstantPoolEntry>>,
}

impl ConstantPool {
    fn with_capacity(count: u16) -> Self {
        let mut entries = Vec::with_capacity(count as usize);
        entries.push(None); // slot 0, unused
        Self { entries }
    }

    fn push(&mut self, entry: ConstantPoolEntry) -> u16 {
        let is_wide = entry.is_wide();
        let index = self.entries.len() as u16;
        self.entries.push(Some(entry));
        if is_wide {
            self.entries.push(None);
        }
        index
    }

    pub(crate) fn get(&self, index: u16) -> Option<&ConstantPoolEntry> {
        self.entries.get(index as usize).and_then(|e| e.as_ref())
    }

    pub(crate) fn utf8(&self, index: u16) -> Result<&str> {
        match self.get(index) {
            Some(ConstantPoolEntry::Utf8(value)) => Ok(value.as_str()),
            _ => Err(anyhow!("constant pool index {index} is not Utf8")),
        }
    }

    pub(crate) fn class_name(&self, index: u16) -> Result<&str> {
        match self.get(index) {
            Some(ConstantPoolEntry::Class { name_index }) => self.utf8(*name_index),
            _ => Err(anyhow!("constant pool index {index} is not Class")),
        }
    }

    pub(crate) fn name_and_type(&self, index: u16) -> Result<(&str, &str)> {
        match self.get(index) {
            Some(ConstantPoolEntry::NameAndType { name_index, descriptor_index }) => {
                Ok((self.utf8(*name_index)?, self.utf8(*descriptor_index)?))
            }
            _ => Err(anyhow!("constant pool index {index} is not NameAndType")),
        }
    }

    /// Resolves any of the three "ref" kinds into `(owner, name, descriptor)`.
    pub(crate) fn resolve_ref(&self, index: u16) -> Result<(String, String, String)> {
        let (class_index, nat_index) = match self.get(index) {
            Some(ConstantPoolEntry::Fieldref { class_index, name_and_type_index })
            | Some(ConstantPoolEntry::Methodref { class_index, name_and_type_index })
            | Some(ConstantPoolEntry::InterfaceMethodref { class_index, name_and_type_index }) => {
                (*class_index, *name_and_type_index)
            }
            _ => bail!("constant pool index {index} is not a ref entry"),
        };
        let owner = self.class_name(class_index)?.to_string();
        let (name, descriptor) = self.name_and_type(nat_index)?;
        Ok((owner, name.to_string(), descriptor.to_string()))
    }

    pub(crate) fn get_or_insert_utf8(&mut self, value: &str) -> u16 {
        if let Some(index) = self.find_utf8(value) {
            return index;
        }
        self.push(ConstantPoolEntry::Utf8(value.to_string()))
    }

    fn find_utf8(&self, value: &str) -> Option<u16> {
        self.entries.iter().enumerate().find_map(|(index, entry)| match entry {
            Some(ConstantPoolEntry::Utf8(existing)) if existing == value => Some(index as u16),
            _ => None,
        })
    }

    pub(crate) fn get_or_insert_class(&mut self, internal_name: &str) -> u16 {
        if let Some(index) = self.entries.iter().enumerate().find_map(|(index, entry)| match entry {
            Some(ConstantPoolEntry::Class { name_index })
                if self.utf8(*name_index).ok() == Some(internal_name) =>
            {
                Some(index as u16)
            }
            _ => None,
        }) {
            return index;
        }
        let name_index = self.get_or_insert_utf8(internal_name);
        self.push(ConstantPoolEntry::Class { name_index })
    }

    pub(crate) fn get_or_insert_name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.get_or_insert_utf8(name);
        let descriptor_index = self.get_or_insert_utf8(descriptor);
        if let Some(index) = self.entries.iter().enumerate().find_map(|(index, entry)| match entry {
            Some(ConstantPoolEntry::NameAndType { name_index: n, descriptor_index: d })
                if *n == name_index && *d == descriptor_index =>
            {
                Some(index as u16)
            }
            _ => None,
        }) {
            return index;
        }
        self.push(ConstantPoolEntry::NameAndType { name_index, descriptor_index })
    }

    pub(crate) fn get_or_insert_methodref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.get_or_insert_class(owner);
        let name_and_type_index = self.get_or_insert_name_and_type(name, descriptor);
        self.push(ConstantPoolEntry::Methodref { class_index, name_and_type_index })
    }

    pub(crate) fn get_or_insert_fieldref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.get_or_insert_class(owner);
        let name_and_type_index = self.get_or_insert_name_and_type(name, descriptor);
        self.push(ConstantPoolEntry::Fieldref { class_index, name_and_type_index })
    }

    pub(crate) fn get_or_insert_string(&mut self, value: &str) -> u16 {
        let string_index = self.get_or_insert_utf8(value);
        if let Some(index) = self.entries.iter().enumerate().find_map(|(index, entry)| match entry {
            Some(ConstantPoolEntry::String { string_index: s }) if *s == string_index => Some(index as u16),
            _ => None,
        }) {
            return index;
        }
        self.push(ConstantPoolEntry::String { string_index })
    }

    /// Inserts a numeric-literal entry (`Integer`/`Float`/`Long`/`Double`)
    /// verbatim, deduping on exact value, as needed when remapping an
    /// `LDC`/`LDC2_W` operand across constant pools.
    pub(crate) fn get_or_insert_literal(&mut self, entry: ConstantPoolEntry) -> u16 {
        if let Some(index) = self
            .entries
            .iter()
            .enumerate()
            .find_map(|(index, existing)| (existing.as_ref() == Some(&entry)).then_some(index as u16))
        {
            return index;
        }
        self.push(entry)
    }

    fn parse(cursor: &mut Cursor) -> Result<Self> {
        let count = cursor.read_u16().context("constant pool count")?;
        let mut pool = Self::with_capacity(count);
        let mut index = 1u16;
        while index < count {
            let tag = cursor.read_u8().context("constant pool tag")?;
            let entry = match tag {
                1 => {
                    let length = cursor.read_u16()?;
                    let bytes = cursor.read_bytes(length as usize)?;
                    ConstantPoolEntry::Utf8(cesu8_to_string(bytes))
                }
                3 => ConstantPoolEntry::Integer(cursor.read_u32()? as i32),
                4 => ConstantPoolEntry::Float(cursor.read_u32()?),
                5 => ConstantPoolEntry::Long(cursor.read_u64()? as i64),
                6 => ConstantPoolEntry::Double(cursor.read_u64()?),
                7 => ConstantPoolEntry::Class { name_index: cursor.read_u16()? },
                8 => ConstantPoolEntry::String { string_index: cursor.read_u16()? },
                9 => ConstantPoolEntry::Fieldref {
                    class_index: cursor.read_u16()?,
                    name_and_type_index: cursor.read_u16()?,
                },
                10 => ConstantPoolEntry::Methodref {
                    class_index: cursor.read_u16()?,
                    name_and_type_index: cursor.read_u16()?,
                },
                11 => ConstantPoolEntry::InterfaceMethodref {
                    class_index: cursor.read_u16()?,
                    name_and_type_index: cursor.read_u16()?,
                },
                12 => ConstantPoolEntry::NameAndType {
                    name_index: cursor.read_u16()?,
                    descriptor_index: cursor.read_u16()?,
                },
                15 => ConstantPoolEntry::Other { tag, bytes: cursor.read_bytes(3)?.to_vec() },
                16 => ConstantPoolEntry::Other { tag, bytes: cursor.read_bytes(2)?.to_vec() },
                17 | 18 => ConstantPoolEntry::Other { tag, bytes: cursor.read_bytes(4)?.to_vec() },
                19 | 20 => ConstantPoolEntry::Other { tag, bytes: cursor.read_bytes(2)?.to_vec() },
                other => bail!("unsupported constant pool tag {other}"),
            };
            let is_wide = entry.is_wide();
            pool.entries.push(Some(entry));
            index += 1;
            if is_wide {
                pool.entries.push(None);
                index += 1;
            }
        }
        Ok(pool)
    }

    fn write(&self, out: &mut Vec<u8>) {
        write_u16(out, self.entries.len() as u16);
        for entry in self.entries.iter().skip(1).flatten() {
            entry.write(out);
        }
    }
}

fn cesu8_to_string(bytes: &[u8]) -> String {
    // Modified UTF-8 coincides with ordinary UTF-8 for the BMP subset this
    // toolkit generates (ASCII class/method names); fall back to a lossy
    // decode for anything else rather than failing the whole class.
    String::from_utf8(bytes.to_vec()).unwrap_or_else(|_| String::from_utf8_lossy(bytes).into_owned())
}

/// One exception-table entry inside a `Code` attribute.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct ExceptionTableEntry {
    pub(crate) start_pc: u16,
    pub(crate) end_pc: u16,
    pub(crate) handler_pc: u16,
    pub(crate) catch_type: u16,
}

/// An opaque class/field/method attribute this crate does not interpret.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct RawAttribute {
    pub(crate) name_index: u16,
    pub(crate) info: Vec<u8>,
}

/// Decoded `Code` attribute: everything a rewriter needs to touch.
#[derive(Clone, Debug, Eq, PartialEq, Default)]
pub(crate) struct CodeAttribute {
    pub(crate) max_stack: u16,
    pub(crate) max_locals: u16,
    pub(crate) code: Vec<u8>,
    pub(crate) exception_table: Vec<ExceptionTableEntry>,
    /// Attributes of the `Code` attribute other than `StackMapTable`
    /// (`LineNumberTable`, `LocalVariableTable`, …), preserved opaquely.
    /// `StackMapTable` is dropped here unconditionally and recomputed by
    /// `crate::stackmap` whenever a rewriter touches this method.
    pub(crate) other_attributes: Vec<RawAttribute>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct RawMember {
    pub(crate) access_flags: u16,
    pub(crate) name_index: u16,
    pub(crate) descriptor_index: u16,
    pub(crate) attributes: Vec<RawAttribute>,
}

pub(crate) type RawField = RawMember;
pub(crate) type RawMethod = RawMember;

impl RawMember {
    /// Decodes the `Code` attribute, if the member (a method) has one.
    pub(crate) fn code(&self, pool: &ConstantPool) -> Result<Option<CodeAttribute>> {
        for attribute in &self.attributes {
            if pool.utf8(attribute.name_index)? == "Code" {
                return Ok(Some(decode_code_attribute(&attribute.info)?));
            }
        }
        Ok(None)
    }

    /// Replaces (or adds) the `Code` attribute with `code`.
    pub(crate) fn set_code(&mut self, code: &CodeAttribute, pool: &mut ConstantPool) {
        let code_name_index = pool.get_or_insert_utf8("Code");
        let info = encode_code_attribute(code);
        if let Some(existing) = self
            .attributes
            .iter_mut()
            .find(|attribute| attribute.name_index == code_name_index)
        {
            existing.info = info;
        } else {
            self.attributes.push(RawAttribute { name_index: code_name_index, info });
        }
    }

    pub(crate) fn has_attribute(&self, pool: &ConstantPool, name: &str) -> Result<bool> {
        for attribute in &self.attributes {
            if pool.utf8(attribute.name_index)? == name {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn decode_code_attribute(info: &[u8]) -> Result<CodeAttribute> {
    let mut cursor = Cursor::new(info);
    let max_stack = cursor.read_u16()?;
    let max_locals = cursor.read_u16()?;
    let code_length = cursor.read_u32()? as usize;
    let code = cursor.read_bytes(code_length)?.to_vec();
    let exception_count = cursor.read_u16()?;
    let mut exception_table = Vec::with_capacity(exception_count as usize);
    for _ in 0..exception_count {
        exception_table.push(ExceptionTableEntry {
            start_pc: cursor.read_u16()?,
            end_pc: cursor.read_u16()?,
            handler_pc: cursor.read_u16()?,
            catch_type: cursor.read_u16()?,
        });
    }
    let attribute_count = cursor.read_u16()?;
    let mut other_attributes = Vec::with_capacity(attribute_count as usize);
    for _ in 0..attribute_count {
        let name_index = cursor.read_u16()?;
        let length = cursor.read_u32()? as usize;
        let bytes = cursor.read_bytes(length)?.to_vec();
        other_attributes.push(RawAttribute { name_index, info: bytes });
    }
    Ok(CodeAttribute { max_stack, max_locals, code, exception_table, other_attributes })
}

fn encode_code_attribute(code: &CodeAttribute) -> Vec<u8> {
    let mut out = Vec::new();
    write_u16(&mut out, code.max_stack);
    write_u16(&mut out, code.max_locals);
    write_u32(&mut out, code.code.len() as u32);
    out.extend_from_slice(&code.code);
    write_u16(&mut out, code.exception_table.len() as u16);
    for entry in &code.exception_table {
        write_u16(&mut out, entry.start_pc);
        write_u16(&mut out, entry.end_pc);
        write_u16(&mut out, entry.handler_pc);
        write_u16(&mut out, entry.catch_type);
    }
    write_u16(&mut out, code.other_attributes.len() as u16);
    for attribute in &code.other_attributes {
        write_u16(&mut out, attribute.name_index);
        write_u32(&mut out, attribute.info.len() as u32);
        out.extend_from_slice(&attribute.info);
    }
    out
}

/// The full structural model of one class file.
#[derive(Clone, Debug)]
pub(crate) struct RawClassFile {
    pub(crate) minor_version: u16,
    pub(crate) major_version: u16,
    pub(crate) constant_pool: ConstantPool,
    pub(crate) access_flags: u16,
    pub(crate) this_class: u16,
    pub(crate) super_class: u16,
    pub(crate) interfaces: Vec<u16>,
    pub(crate) fields: Vec<RawField>,
    pub(crate) methods: Vec<RawMethod>,
    pub(crate) attributes: Vec<RawAttribute>,
}

impl RawClassFile {
    pub(crate) fn parse(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let magic = cursor.read_u32().context("magic")?;
        if magic != MAGIC {
            bail!("not a class file: bad magic {magic:#x}");
        }
        let minor_version = cursor.read_u16()?;
        let major_version = cursor.read_u16()?;
        let constant_pool = ConstantPool::parse(&mut cursor)?;
        let access_flags = cursor.read_u16()?;
        let this_class = cursor.read_u16()?;
        let super_class = cursor.read_u16()?;
        let interface_count = cursor.read_u16()?;
        let mut interfaces = Vec::with_capacity(interface_count as usize);
        for _ in 0..interface_count {
            interfaces.push(cursor.read_u16()?);
        }
        let fields = read_members(&mut cursor)?;
        let methods = read_members(&mut cursor)?;
        let attributes = read_attributes(&mut cursor)?;
        Ok(Self {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_u32(&mut out, MAGIC);
        write_u16(&mut out, self.minor_version);
        write_u16(&mut out, self.major_version);
        self.constant_pool.write(&mut out);
        write_u16(&mut out, self.access_flags);
        write_u16(&mut out, self.this_class);
        write_u16(&mut out, self.super_class);
        write_u16(&mut out, self.interfaces.len() as u16);
        for interface in &self.interfaces {
            write_u16(&mut out, *interface);
        }
        write_members(&mut out, &self.fields);
        write_members(&mut out, &self.methods);
        write_u16(&mut out, self.attributes.len() as u16);
        for attribute in &self.attributes {
            write_u16(&mut out, attribute.name_index);
            write_u32(&mut out, attribute.info.len() as u32);
            out.extend_from_slice(&attribute.info);
        }
        out
    }

    pub(crate) fn this_class_name(&self) -> Result<&str> {
        self.constant_pool.class_name(self.this_class)
    }
}

fn read_members(cursor: &mut Cursor) -> Result<Vec<RawMember>> {
    let count = cursor.read_u16()?;
    let mut members = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let access_flags = cursor.read_u16()?;
        let name_index = cursor.read_u16()?;
        let descriptor_index = cursor.read_u16()?;
        let attributes = read_attributes(cursor)?;
        members.push(RawMember { access_flags, name_index, descriptor_index, attributes });
    }
    Ok(members)
}

fn write_members(out: &mut Vec<u8>, members: &[RawMember]) {
    write_u16(out, members.len() as u16);
    for member in members {
        write_u16(out, member.access_flags);
        write_u16(out, member.name_index);
        write_u16(out, member.descriptor_index);
        write_u16(out, member.attributes.len() as u16);
        for attribute in &member.attributes {
            write_u16(out, attribute.name_index);
            write_u32(out, attribute.info.len() as u32);
            out.extend_from_slice(&attribute.info);
        }
    }
}

fn read_attributes(cursor: &mut Cursor) -> Result<Vec<RawAttribute>> {
    let count = cursor.read_u16()?;
    let mut attributes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name_index = cursor.read_u16()?;
        let length = cursor.read_u32()? as usize;
        let info = cursor.read_bytes(length)?.to_vec();
        attributes.push(RawAttribute { name_index, info });
    }
    Ok(attributes)
}

fn write_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Minimal big-endian byte cursor used while decoding a class file.
struct Cursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let slice = self
            .bytes
            .get(self.offset..self.offset + len)
            .ok_or_else(|| anyhow!("unexpected end of class file at offset {}", self.offset))?;
        self.offset += len;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        scan::read_u16(self.read_bytes(2)?, 0)
    }

    fn read_u32(&mut self) -> Result<u32> {
        scan::read_u32(self.read_bytes(4)?, 0)
    }

    fn read_u64(&mut self) -> Result<u64> {
        let hi = self.read_u32()? as u64;
        let lo = self.read_u32()? as u64;
        Ok((hi << 32) | lo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_class_bytes() -> Vec<u8> {
        let mut pool = ConstantPool::with_capacity(0);
        let object_init = pool.get_or_insert_methodref("java/lang/Object", "<init>", "()V");
        let this_class = pool.get_or_insert_class("com/example/Foo");
        let super_class = pool.get_or_insert_class("java/lang/Object");
        let code_name = pool.get_or_insert_utf8("Code");
        let init_name = pool.get_or_insert_utf8("<init>");
        let init_descriptor = pool.get_or_insert_utf8("()V");

        let code = CodeAttribute {
            max_stack: 1,
            max_locals: 1,
            code: vec![
                crate::opcodes::ALOAD_0,
                crate::opcodes::INVOKESPECIAL,
                (object_init >> 8) as u8,
                (object_init & 0xff) as u8,
                crate::opcodes::RETURN,
            ],
            exception_table: Vec::new(),
            other_attributes: Vec::new(),
        };
        let info = encode_code_attribute(&code);

        let class = RawClassFile {
            minor_version: 0,
            major_version: 52,
            constant_pool: pool,
            access_flags: 0x0021,
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: vec![RawMember {
                access_flags: 0x0001,
                name_index: init_name,
                descriptor_index: init_descriptor,
                attributes: vec![RawAttribute { name_index: code_name, info }],
            }],
            attributes: Vec::new(),
        };
        class.to_bytes()
    }

    #[test]
    fn round_trips_a_minimal_class_file() {
        let bytes = minimal_class_bytes();
        let parsed = RawClassFile::parse(&bytes).expect("parse minimal class");
        assert_eq!(parsed.major_version, 52);
        assert_eq!(parsed.this_class_name().unwrap(), "com/example/Foo");
        assert_eq!(parsed.methods.len(), 1);

        let method = &parsed.methods[0];
        assert_eq!(parsed.constant_pool.utf8(method.name_index).unwrap(), "<init>");
        let code = method.code(&parsed.constant_pool).unwrap().expect("code attribute");
        assert_eq!(code.max_stack, 1);
        assert_eq!(code.code.last().copied(), Some(crate::opcodes::RETURN));

        let re_encoded = parsed.to_bytes();
        let reparsed = RawClassFile::parse(&re_encoded).expect("re-parse");
        assert_eq!(reparsed.this_class_name().unwrap(), "com/example/Foo");
    }

    #[test]
    fn constant_pool_dedups_repeated_inserts() {
        let mut pool = ConstantPool::with_capacity(0);
        let first = pool.get_or_insert_class("com/example/Foo");
        let second = pool.get_or_insert_class("com/example/Foo");
        assert_eq!(first, second);
    }

    #[test]
    fn set_code_replaces_existing_code_attribute() {
        let bytes = minimal_class_bytes();
        let mut class = RawClassFile::parse(&bytes).unwrap();
        let mut new_code = class.methods[0].code(&class.constant_pool).unwrap().unwrap();
        new_code.max_stack = 3;
        class.methods[0].set_code(&new_code, &mut class.constant_pool);

        let reread = class.methods[0].code(&class.constant_pool).unwrap().unwrap();
        assert_eq!(reread.max_stack, 3);
        assert_eq!(
            class.methods[0]
                .attributes
                .iter()
                .filter(|a| class.constant_pool.utf8(a.name_index).unwrap() == "Code")
                .count(),
            1
        );
    }
}

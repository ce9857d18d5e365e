//! `AddField` — §4.5.1. Adds one field to every class whose name is in a
//! fixed target-class set; skips classes that already declare a field of
//! that name.

use crate::classfile::RawClassFile;
use crate::error::PatchError;

const ACC_STATIC: u16 = 0x0008;
const ACC_FINAL: u16 = 0x0010;

#[derive(Clone, Debug)]
pub struct AddFieldScript {
    target_classes: Vec<String>,
    access_flags: u16,
    field_name: String,
    field_descriptor: String,
    constant_value: Option<ConstantValue>,
    reload_classes: Vec<String>,
}

/// A field's `ConstantValue` attribute payload, restricted to the
/// primitive/`String` forms the `ConstantValue` attribute actually allows.
#[derive(Clone, Copy, Debug)]
pub enum ConstantValue {
    Int(i32),
    Long(i64),
    Float(u32),
    Double(u64),
}

impl AddFieldScript {
    pub fn builder() -> AddFieldScriptBuilder {
        AddFieldScriptBuilder::default()
    }

    pub(crate) fn reload_classes(&self) -> &[String] {
        &self.reload_classes
    }

    pub(crate) fn apply(&self, class: &mut RawClassFile) -> anyhow::Result<bool> {
        let this_name = class.this_class_name()?.to_string();
        if !self.target_classes.iter().any(|t| crate::descriptor::class_spec_match(&this_name, t)) {
            return Ok(false);
        }

        let name_index = class.constant_pool.get_or_insert_utf8(&self.field_name);
        let descriptor_index = class.constant_pool.get_or_insert_utf8(&self.field_descriptor);
        let already_exists = class
            .fields
            .iter()
            .any(|f| f.name_index == name_index && f.descriptor_index == descriptor_index);
        if already_exists {
            return Ok(false);
        }

        let mut attributes = Vec::new();
        if let Some(value) = self.constant_value {
            let value_index = match value {
                ConstantValue::Int(v) => class.constant_pool.get_or_insert_literal(
                    crate::classfile::ConstantPoolEntry::Integer(v),
                ),
                ConstantValue::Long(v) => class.constant_pool.get_or_insert_literal(
                    crate::classfile::ConstantPoolEntry::Long(v),
                ),
                ConstantValue::Float(v) => class.constant_pool.get_or_insert_literal(
                    crate::classfile::ConstantPoolEntry::Float(v),
                ),
                ConstantValue::Double(v) => class.constant_pool.get_or_insert_literal(
                    crate::classfile::ConstantPoolEntry::Double(v),
                ),
            };
            let mut info = Vec::with_capacity(2);
            info.extend_from_slice(&value_index.to_be_bytes());
            let attribute_name = class.constant_pool.get_or_insert_utf8("ConstantValue");
            attributes.push(crate::classfile::RawAttribute { name_index: attribute_name, info });
        }

        class.fields.push(crate::classfile::RawField {
            access_flags: self.access_flags,
            name_index,
            descriptor_index,
            attributes,
        });
        Ok(true)
    }
}

/// Scoped visibility for a new field's access flags — at most one of these
/// may be set, enforced at build time.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Visibility {
    Public,
    Private,
    Protected,
    Package,
}

impl Visibility {
    fn flag(self) -> u16 {
        match self {
            Visibility::Public => 0x0001,
            Visibility::Private => 0x0002,
            Visibility::Protected => 0x0004,
            Visibility::Package => 0x0000,
        }
    }
}

#[derive(Default)]
pub struct AddFieldScriptBuilder {
    target_classes: Vec<String>,
    visibility: Option<Visibility>,
    is_static: bool,
    is_final: bool,
    is_volatile: bool,
    is_transient: bool,
    access_flags_override: Option<u16>,
    field_name: Option<String>,
    field_descriptor: Option<String>,
    constant_value: Option<ConstantValue>,
    reload_classes: Vec<String>,
}

impl AddFieldScriptBuilder {
    pub fn target_classes(mut self, classes: impl IntoIterator<Item = String>) -> Self {
        self.target_classes = classes.into_iter().collect();
        self
    }

    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = Some(visibility);
        self
    }

    pub fn is_static(mut self, value: bool) -> Self {
        self.is_static = value;
        self
    }

    pub fn is_final(mut self, value: bool) -> Self {
        self.is_final = value;
        self
    }

    pub fn is_volatile(mut self, value: bool) -> Self {
        self.is_volatile = value;
        self
    }

    pub fn is_transient(mut self, value: bool) -> Self {
        self.is_transient = value;
        self
    }

    /// Raw escape hatch used by callers (and this crate's tests) that
    /// already have a composed access-flags value.
    pub fn access_flags(mut self, flags: u16) -> Self {
        self.access_flags_override = Some(flags);
        self
    }

    pub fn field_name(mut self, name: impl Into<String>) -> Self {
        self.field_name = Some(name.into());
        self
    }

    pub fn field_descriptor(mut self, descriptor: impl Into<String>) -> Self {
        self.field_descriptor = Some(descriptor.into());
        self
    }

    pub fn constant_value(mut self, value: ConstantValue) -> Self {
        self.constant_value = Some(value);
        self
    }

    pub fn reload_classes(mut self, classes: impl IntoIterator<Item = String>) -> Self {
        self.reload_classes = classes.into_iter().collect();
        self
    }

    pub fn build(self) -> Result<AddFieldScript, PatchError> {
        let field_name = self
            .field_name
            .ok_or_else(|| PatchError::InvalidConfiguration("AddField requires a field name".into()))?;
        let field_descriptor = self
            .field_descriptor
            .ok_or_else(|| PatchError::InvalidConfiguration("AddField requires a field type".into()))?;
        if self.target_classes.is_empty() {
            return Err(PatchError::InvalidConfiguration(
                "AddField requires at least one target class".into(),
            ));
        }

        let access_flags = if let Some(flags) = self.access_flags_override {
            flags
        } else {
            let mut flags = self.visibility.unwrap_or(Visibility::Package).flag();
            if self.is_static {
                flags |= ACC_STATIC;
            }
            if self.is_final {
                flags |= ACC_FINAL;
            }
            if self.is_volatile {
                flags |= 0x0040;
            }
            if self.is_transient {
                flags |= 0x0080;
            }
            flags
        };

        let access_flags = if self.constant_value.is_some() {
            access_flags | ACC_STATIC | ACC_FINAL
        } else {
            access_flags
        };

        Ok(AddFieldScript {
            target_classes: self.target_classes,
            access_flags,
            field_name,
            field_descriptor,
            constant_value: self.constant_value,
            reload_classes: self.reload_classes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::ConstantPool;

    fn target_class(name: &str) -> RawClassFile {
        let mut pool = ConstantPool::default();
        let this_class = pool.get_or_insert_class(name);
        let super_class = pool.get_or_insert_class("java/lang/Object");
        RawClassFile {
            minor_version: 0,
            major_version: 52,
            constant_pool: pool,
            access_flags: 0x0021,
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
        }
    }

    #[test]
    fn adds_field_once_and_skips_second_patch() {
        let script = AddFieldScript::builder()
            .target_classes(["com/example/Foo".to_string()])
            .visibility(Visibility::Private)
            .is_static(true)
            .field_name("marker")
            .field_descriptor("Z")
            .build()
            .unwrap();

        let mut class = target_class("com/example/Foo");
        assert!(script.apply(&mut class).unwrap());
        assert_eq!(class.fields.len(), 1);
        assert!(!script.apply(&mut class).unwrap(), "second apply must be a no-op");
        assert_eq!(class.fields.len(), 1);
    }

    #[test]
    fn ignores_non_matching_classes() {
        let script = AddFieldScript::builder()
            .target_classes(["com/example/Foo".to_string()])
            .field_name("marker")
            .field_descriptor("Z")
            .build()
            .unwrap();
        let mut class = target_class("com/example/Bar");
        assert!(!script.apply(&mut class).unwrap());
        assert!(class.fields.is_empty());
    }

    #[test]
    fn constant_value_forces_static_final() {
        let script = AddFieldScript::builder()
            .target_classes(["com/example/Foo".to_string()])
            .field_name("VERSION")
            .field_descriptor("I")
            .constant_value(ConstantValue::Int(3))
            .build()
            .unwrap();
        assert_eq!(script.access_flags & (ACC_STATIC | ACC_FINAL), ACC_STATIC | ACC_FINAL);
    }

    #[test]
    fn build_requires_name_and_type() {
        assert!(AddFieldScript::builder().target_classes(["com/example/Foo".to_string()]).build().is_err());
    }
}

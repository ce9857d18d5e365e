//! Resolving a [`Hook`] against a classpath, and the `Transplant`/`Insert`
//! hook-delivery modes that physically copy a hook method's bytecode into
//! (or inline into) a target class — §4.4.
//!
//! `Call` delivery needs none of this: it only ever emits an `INVOKESTATIC`
//! against the hook's own class and leaves the hook method where it is.
//! `Transplant` and `Insert` both need the hook method's actual bytecode in
//! hand, which means locating the `.class` it lives in on a classpath —
//! the same kind of directory/jar walk `mokapot`'s own dependency list
//! pairs `walkdir` and an optional `zip` feature for.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use crate::classfile::{CodeAttribute, ExceptionTableEntry, RawClassFile, RawMethod};
use crate::descriptor::decompose_method_descriptor;
use crate::error::PatchError;
use crate::hook::Hook;
use crate::remap;

/// Resolves a [`Hook`] to the class file that defines it. Implementations
/// may read from a directory tree, a jar, a running host's own
/// classloader, or a test fixture held in memory.
pub trait HookLocator: Send + Sync {
    /// Maps an internal class name to the classpath-relative resource path
    /// that should hold its bytecode for the given class-file major
    /// version — overridable so a multi-release jar host can route version
    /// 61 lookups under `META-INF/versions/17/...` while the default
    /// implementation ignores `class_file_version` entirely.
    fn resource_path(&self, class_file_version: u16, internal_name: &str) -> String {
        let _ = class_file_version;
        format!("{internal_name}.class")
    }

    /// Returns the raw bytes of the `.class` file declaring `internal_name`.
    fn load(&self, internal_name: &str) -> Result<Vec<u8>>;
}

/// Default [`HookLocator`]: scans an ordered list of classpath roots, each
/// either a directory of `.class` files or (with the `jar` feature) a
/// `.jar`/`.zip` archive.
pub struct ClasspathHookLocator {
    roots: Vec<PathBuf>,
}

impl ClasspathHookLocator {
    pub fn new(roots: impl IntoIterator<Item = PathBuf>) -> Self {
        Self { roots: roots.into_iter().collect() }
    }
}

impl HookLocator for ClasspathHookLocator {
    fn load(&self, internal_name: &str) -> Result<Vec<u8>> {
        let relative = self.resource_path(0, internal_name);
        for root in &self.roots {
            if root.is_dir() {
                if let Some(bytes) = find_in_directory(root, &relative)? {
                    return Ok(bytes);
                }
            } else if is_archive(root) {
                #[cfg(feature = "jar")]
                if let Some(bytes) = find_in_archive(root, &relative)? {
                    return Ok(bytes);
                }
                #[cfg(not(feature = "jar"))]
                {
                    tracing::warn!(root = %root.display(), "skipping archive classpath entry: build without the `jar` feature");
                }
            }
        }
        Err(anyhow!("{internal_name} was not found on any classpath root"))
    }
}

fn is_archive(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("jar") | Some("zip")
    )
}

fn find_in_directory(root: &Path, relative: &str) -> Result<Option<Vec<u8>>> {
    for entry in walkdir::WalkDir::new(root).into_iter() {
        let entry = entry.with_context(|| format!("walking classpath root {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry
            .path()
            .strip_prefix(root)
            .ok()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .as_deref()
            == Some(relative)
        {
            return Ok(Some(fs::read(entry.path())?));
        }
    }
    Ok(None)
}

#[cfg(feature = "jar")]
fn find_in_archive(archive_path: &Path, relative: &str) -> Result<Option<Vec<u8>>> {
    use std::io::Read as _;

    let file = fs::File::open(archive_path)
        .with_context(|| format!("opening classpath archive {}", archive_path.display()))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("reading zip central directory of {}", archive_path.display()))?;
    let Ok(mut entry) = archive.by_name(relative) else {
        return Ok(None);
    };
    let mut bytes = Vec::new();
    entry.read_to_end(&mut bytes)?;
    Ok(Some(bytes))
}

/// Resolves `hook` against `locator` and finds the declared method inside
/// it whose name and descriptor match.
pub(crate) fn resolve_hook_method(
    hook: &Hook,
    locator: &dyn HookLocator,
) -> Result<(RawClassFile, RawMethod), PatchError> {
    let owner = hook.owner_internal().map_err(|_| PatchError::InvalidConfiguration(
        format!("hook owner {:?} is not in internal form", hook.owner_internal_name),
    ))?;

    let bytes = locator.load(owner).map_err(|source| PatchError::UnresolvableHook {
        internal_name: owner.to_string(),
        source,
    })?;
    let class = RawClassFile::parse(&bytes).map_err(|source| PatchError::UnresolvableHook {
        internal_name: owner.to_string(),
        source,
    })?;

    for method in &class.methods {
        let name = class
            .constant_pool
            .utf8(method.name_index)
            .map_err(|source| PatchError::UnresolvableHook { internal_name: owner.to_string(), source })?;
        if name != hook.method_name {
            continue;
        }
        let descriptor = class
            .constant_pool
            .utf8(method.descriptor_index)
            .map_err(|source| PatchError::UnresolvableHook { internal_name: owner.to_string(), source })?;
        let decomposed = decompose_method_descriptor(descriptor)?;
        if decomposed.parameter_types.len() != hook.parameter_types.len() {
            continue;
        }
        let matches_return = crate::descriptor::type_spec_match(&decomposed.return_type, &hook.return_type);
        let matches_params = decomposed
            .parameter_types
            .iter()
            .zip(&hook.parameter_types)
            .all(|(actual, expected)| crate::descriptor::type_spec_match(actual, expected));
        if matches_return && matches_params {
            let found = method.clone();
            return Ok((class, found));
        }
    }

    Err(PatchError::UnresolvableHook {
        internal_name: owner.to_string(),
        source: anyhow!("no method matching {} found on {owner}", hook.human_signature()),
    })
}

/// Physically copies `hook_method` (body, exception table, access flags)
/// into `target`, remapping every constant-pool-indexed operand into
/// `target`'s own pool. No-op if the target already declares a method with
/// the same name and descriptor — §4.4 "skip if the method already exists".
pub(crate) fn transplant_method(
    target: &mut RawClassFile,
    hook_class: &RawClassFile,
    hook_method: &RawMethod,
) -> Result<(), PatchError> {
    let name = hook_class
        .constant_pool
        .utf8(hook_method.name_index)
        .map_err(to_unresolvable(hook_class))?
        .to_string();
    let descriptor = hook_class
        .constant_pool
        .utf8(hook_method.descriptor_index)
        .map_err(to_unresolvable(hook_class))?
        .to_string();

    let already_present = target.methods.iter().any(|existing| {
        target.constant_pool.utf8(existing.name_index).ok() == Some(name.as_str())
            && target.constant_pool.utf8(existing.descriptor_index).ok() == Some(descriptor.as_str())
    });
    if already_present {
        return Ok(());
    }

    let code = hook_method
        .code(&hook_class.constant_pool)
        .map_err(to_unresolvable(hook_class))?
        .ok_or_else(|| PatchError::UnresolvableHook {
            internal_name: hook_class.this_class_name().unwrap_or_default().to_string(),
            source: anyhow!("hook method {name}{descriptor} has no Code attribute (is it abstract or native?)"),
        })?;

    let remapped_code = remap::remap_code(&code.code, &hook_class.constant_pool, &mut target.constant_pool)?;
    let mut remapped_exceptions = Vec::with_capacity(code.exception_table.len());
    for entry in &code.exception_table {
        let catch_type = if entry.catch_type == 0 {
            0
        } else {
            remap::remap_class_index(entry.catch_type, &hook_class.constant_pool, &mut target.constant_pool)?
        };
        remapped_exceptions.push(ExceptionTableEntry {
            start_pc: entry.start_pc,
            end_pc: entry.end_pc,
            handler_pc: entry.handler_pc,
            catch_type,
        });
    }

    let name_index = target.constant_pool.get_or_insert_utf8(&name);
    let descriptor_index = target.constant_pool.get_or_insert_utf8(&descriptor);
    let mut transplanted = RawMethod {
        access_flags: hook_method.access_flags,
        name_index,
        descriptor_index,
        attributes: Vec::new(),
    };
    transplanted.set_code(
        &CodeAttribute {
            max_stack: code.max_stack,
            max_locals: code.max_locals,
            code: remapped_code,
            exception_table: remapped_exceptions,
            other_attributes: Vec::new(),
        },
        &mut target.constant_pool,
    );
    target.methods.push(transplanted);
    Ok(())
}

/// Produces the hook method's body, remapped into `target`'s constant
/// pool and with its terminal `return` instruction stripped, ready to be
/// spliced inline at a call site — §4.4 "Insert".
pub(crate) fn inline_hook_body(
    target_pool: &mut crate::classfile::ConstantPool,
    hook_class: &RawClassFile,
    hook_method: &RawMethod,
) -> Result<Vec<u8>, PatchError> {
    let code = hook_method
        .code(&hook_class.constant_pool)
        .map_err(to_unresolvable(hook_class))?
        .ok_or_else(|| PatchError::UnresolvableHook {
            internal_name: hook_class.this_class_name().unwrap_or_default().to_string(),
            source: anyhow!("hook method has no Code attribute to inline"),
        })?;

    if !code.exception_table.is_empty() {
        return Err(PatchError::UnresolvableHook {
            internal_name: hook_class.this_class_name().unwrap_or_default().to_string(),
            source: anyhow!("hook method has a try/catch region and cannot be inlined; use Transplant instead"),
        });
    }

    let mut remapped = remap::remap_code(&code.code, &hook_class.constant_pool, target_pool)?;
    strip_terminal_return(&mut remapped)?;
    Ok(remapped)
}

/// Like [`inline_hook_body`], but also shifts every local-variable slot
/// the hook body touches by `locals_base`, so the pasted-in body reads
/// its own parameters/locals from freshly allocated slots in the host
/// method instead of colliding with the host's own locals.
pub(crate) fn inline_hook_body_remapped(
    target_pool: &mut crate::classfile::ConstantPool,
    hook_class: &RawClassFile,
    hook_method: &RawMethod,
    locals_base: u16,
) -> Result<Vec<u8>, PatchError> {
    let code = hook_method
        .code(&hook_class.constant_pool)
        .map_err(to_unresolvable(hook_class))?
        .ok_or_else(|| PatchError::UnresolvableHook {
            internal_name: hook_class.this_class_name().unwrap_or_default().to_string(),
            source: anyhow!("hook method has no Code attribute to inline"),
        })?;
    if !code.exception_table.is_empty() {
        return Err(PatchError::UnresolvableHook {
            internal_name: hook_class.this_class_name().unwrap_or_default().to_string(),
            source: anyhow!("hook method has a try/catch region and cannot be inlined; use Transplant instead"),
        });
    }

    let mut remapped =
        remap::remap_code_for_insert(&code.code, &hook_class.constant_pool, target_pool, locals_base)?;
    strip_terminal_return(&mut remapped)?;
    Ok(remapped)
}

fn strip_terminal_return(code: &mut Vec<u8>) -> Result<(), PatchError> {
    let instructions = crate::scan::decode_instructions(code).map_err(|source| PatchError::UnresolvableHook {
        internal_name: String::new(),
        source,
    })?;
    let Some(last) = instructions.last() else {
        return Ok(());
    };
    if crate::opcodes::is_return(last.opcode) {
        code.truncate(last.offset as usize);
        Ok(())
    } else {
        Err(PatchError::UnresolvableHook {
            internal_name: String::new(),
            source: anyhow!("hook body does not end in a return instruction and cannot be inlined"),
        })
    }
}

fn to_unresolvable(hook_class: &RawClassFile) -> impl Fn(anyhow::Error) -> PatchError + '_ {
    move |source| PatchError::UnresolvableHook {
        internal_name: hook_class.this_class_name().unwrap_or_default().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::ConstantPool;

    fn hook_class_with_method(name: &str, descriptor: &str, code_bytes: Vec<u8>) -> (RawClassFile, RawMethod) {
        let mut pool = ConstantPool::default();
        let this_class = pool.get_or_insert_class("com/example/Hooks");
        let super_class = pool.get_or_insert_class("java/lang/Object");
        let name_index = pool.get_or_insert_utf8(name);
        let descriptor_index = pool.get_or_insert_utf8(descriptor);
        let code = CodeAttribute {
            max_stack: 1,
            max_locals: 1,
            code: code_bytes,
            exception_table: Vec::new(),
            other_attributes: Vec::new(),
        };
        let mut method = RawMethod { access_flags: 0x0009, name_index, descriptor_index, attributes: Vec::new() };
        method.set_code(&code, &mut pool);
        let class = RawClassFile {
            minor_version: 0,
            major_version: 52,
            constant_pool: pool,
            access_flags: 0x0021,
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: vec![method.clone()],
            attributes: Vec::new(),
        };
        (class, method)
    }

    fn empty_target() -> RawClassFile {
        let mut pool = ConstantPool::default();
        let this_class = pool.get_or_insert_class("com/example/Target");
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
    fn transplant_copies_method_and_skips_if_already_present() {
        let (hook_class, hook_method) =
            hook_class_with_method("beforeSleep", "()V", vec![crate::opcodes::RETURN]);
        let mut target = empty_target();

        transplant_method(&mut target, &hook_class, &hook_method).unwrap();
        assert_eq!(target.methods.len(), 1);

        transplant_method(&mut target, &hook_class, &hook_method).unwrap();
        assert_eq!(target.methods.len(), 1, "second transplant must be a no-op");
    }

    #[test]
    fn inline_hook_body_strips_terminal_return() {
        let (hook_class, hook_method) =
            hook_class_with_method("beforeSleep", "()V", vec![crate::opcodes::NOP, crate::opcodes::RETURN]);
        let mut target_pool = ConstantPool::default();
        let body = inline_hook_body(&mut target_pool, &hook_class, &hook_method).unwrap();
        assert_eq!(body, vec![crate::opcodes::NOP]);
    }

    #[test]
    fn inline_hook_body_rejects_missing_terminal_return() {
        let (hook_class, hook_method) =
            hook_class_with_method("beforeSleep", "()V", vec![crate::opcodes::NOP]);
        let mut target_pool = ConstantPool::default();
        assert!(inline_hook_body(&mut target_pool, &hook_class, &hook_method).is_err());
    }
}

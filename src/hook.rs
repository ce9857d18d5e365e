//! A `Hook` identifies the user-supplied method that a script calls into,
//! transplants, or inserts — §3/§4.4.

use crate::error::PatchError;

/// A fully-qualified hook method: owner, name, and the human-form
/// signature used to resolve it via [`crate::transplant::HookLocator`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Hook {
    pub owner_internal_name: String,
    pub method_name: String,
    pub return_type: String,
    pub parameter_types: Vec<String>,
}

impl Hook {
    pub fn new(
        owner_internal_name: impl Into<String>,
        method_name: impl Into<String>,
        return_type: impl Into<String>,
        parameter_types: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            owner_internal_name: owner_internal_name.into(),
            method_name: method_name.into(),
            return_type: return_type.into(),
            parameter_types: parameter_types.into_iter().collect(),
        }
    }

    /// The descriptor this hook's own method must carry on the classpath
    /// it was compiled into — dotted human parameter/return types joined
    /// into `(p1,p2,...)return`, the form an error message should show a
    /// user, not a JVM-wire descriptor.
    pub fn human_signature(&self) -> String {
        format!(
            "{}({}){}",
            self.method_name,
            self.parameter_types.join(", "),
            self.return_type
        )
    }

    /// Internal form of the hook owner for constant-pool lookups, failing
    /// if it was given in dotted form by mistake at construction time.
    pub(crate) fn owner_internal(&self) -> Result<&str, PatchError> {
        if self.owner_internal_name.contains('.') {
            return Err(PatchError::InvalidConfiguration(format!(
                "hook owner must be in internal form (a/b/C), got {:?}",
                self.owner_internal_name
            )));
        }
        Ok(&self.owner_internal_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_signature_renders_hook_for_error_messages() {
        let hook = Hook::new(
            "com/example/Hooks",
            "beforeSleep",
            "void",
            ["long".to_string(), "int".to_string()],
        );
        assert_eq!(hook.human_signature(), "beforeSleep(long, int)void");
    }

    #[test]
    fn owner_internal_rejects_dotted_form() {
        let hook = Hook::new("com.example.Hooks", "x", "void", []);
        assert!(hook.owner_internal().is_err());
    }
}

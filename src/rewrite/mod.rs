//! The six composable rewrite primitives of §4.5, plus the shared
//! `HookDelivery` machinery they all build on.

pub mod add_field;
pub mod delivery;
pub mod exit_early;
pub mod replace_method_call;
pub mod set_symbol_during_method_call;
pub mod wrap_method_call;
pub mod wrap_return_values;

use crate::classfile::RawClassFile;
use crate::error::PatchError;
use crate::transplant::HookLocator;

use add_field::AddFieldScript;
use exit_early::ExitEarlyScript;
use replace_method_call::ReplaceMethodCallScript;
use set_symbol_during_method_call::SetSymbolDuringMethodCallScript;
use wrap_method_call::WrapMethodCallScript;
use wrap_return_values::WrapReturnValuesScript;

/// One configured rewrite, as produced by any of the six primitive
/// builders. A [`crate::manager::ScriptManager`] holds an ordered list of
/// these and applies each in turn to every loaded class.
#[derive(Clone, Debug)]
pub enum PatchScript {
    AddField(AddFieldScript),
    ExitEarly(ExitEarlyScript),
    WrapReturnValues(WrapReturnValuesScript),
    WrapMethodCall(WrapMethodCallScript),
    ReplaceMethodCall(ReplaceMethodCallScript),
    SetSymbolDuringMethodCall(SetSymbolDuringMethodCallScript),
}

impl PatchScript {
    /// The human name used in log fields and `TransformFailure` messages.
    pub(crate) fn name(&self) -> &'static str {
        match self {
            PatchScript::AddField(_) => "AddField",
            PatchScript::ExitEarly(_) => "ExitEarly",
            PatchScript::WrapReturnValues(_) => "WrapReturnValues",
            PatchScript::WrapMethodCall(_) => "WrapMethodCall",
            PatchScript::ReplaceMethodCall(_) => "ReplaceMethodCall",
            PatchScript::SetSymbolDuringMethodCall(_) => "SetSymbolDuringMethodCall",
        }
    }

    /// Applies this script to `class` in place, returning whether it
    /// changed anything. `locator` resolves hook classes for scripts that
    /// need `Transplant`/`Insert` delivery; scripts that never reference a
    /// user hook (`AddField`, `SetSymbolDuringMethodCall`) ignore it.
    ///
    /// Contract: an `apply` that returns `Err` must leave `class`
    /// unmodified — any method it already patched before hitting the
    /// error must be rolled back, not left half-applied. [`ScriptManager`]
    /// runs scripts in sequence over one `RawClassFile` and stops the
    /// whole pipeline on the first error, but it has no way to undo a
    /// partial mutation a failing script made to its `&mut RawClassFile`
    /// before erroring, nor to tell a caller which parts of `class` came
    /// from the failed script versus scripts that ran cleanly before it.
    /// A script whose `apply` loops per-method (`wrap_method_call`,
    /// `exit_early`, `wrap_return_values`) and calls `set_code` inside
    /// that loop must therefore either validate every matched method
    /// up front before mutating any of them, or buffer its changes and
    /// commit them only once the whole method set has succeeded.
    ///
    /// [`ScriptManager`]: crate::manager::ScriptManager
    pub(crate) fn apply(&self, class: &mut RawClassFile, locator: &dyn HookLocator) -> Result<bool, PatchError> {
        match self {
            PatchScript::AddField(script) => script.apply(class).map_err(|source| PatchError::TransformFailure {
                script: self.name().to_string(),
                class_name: class.this_class_name().unwrap_or("<unknown>").to_string(),
                source,
            }),
            PatchScript::ExitEarly(script) => script.apply(class, locator),
            PatchScript::WrapReturnValues(script) => script.apply(class, locator),
            PatchScript::WrapMethodCall(script) => script.apply(class, locator),
            PatchScript::ReplaceMethodCall(script) => script.apply(class, locator),
            PatchScript::SetSymbolDuringMethodCall(script) => script.apply(class),
        }
    }

    /// The extra classes that must be reloaded alongside whatever class
    /// this script patched directly — §4.7.
    pub(crate) fn reload_classes(&self) -> &[String] {
        match self {
            PatchScript::AddField(script) => script.reload_classes(),
            PatchScript::ExitEarly(script) => script.reload_classes(),
            PatchScript::WrapReturnValues(script) => script.reload_classes(),
            PatchScript::WrapMethodCall(script) => script.reload_classes(),
            PatchScript::ReplaceMethodCall(script) => script.reload_classes(),
            PatchScript::SetSymbolDuringMethodCall(script) => script.reload_classes(),
        }
    }
}

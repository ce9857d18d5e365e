//! `MethodTarget`: the predicate deciding whether an owner/name/descriptor
//! triple belongs to a script's target set — §4.2.

use crate::descriptor::{class_spec_match, decompose_method_descriptor, type_spec_match};
use crate::error::PatchError;

/// Exact signature to match against, when a target is not loose about arity.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Signature {
    pub return_type: String,
    pub parameter_types: Vec<String>,
}

/// An immutable specification of a set of methods — §3/§4.2.
///
/// When `signature` is `None` the target matches any overload of
/// `method_name` on `owner`; when present, the descriptor must match
/// exactly (same arity, each type matching pairwise, no variadic
/// leniency).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MethodTarget {
    pub owner: String,
    pub method_name: String,
    pub signature: Option<Signature>,
}

impl MethodTarget {
    /// Builds a target with loose (any-overload) matching.
    pub fn any_overload(owner: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self { owner: owner.into(), method_name: method_name.into(), signature: None }
    }

    /// Builds a target that matches exactly one signature, given in dotted
    /// human form (`"java.lang.String"`, `"int"`, …).
    pub fn exact(
        owner: impl Into<String>,
        method_name: impl Into<String>,
        return_type: impl Into<String>,
        parameter_types: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            method_name: method_name.into(),
            signature: Some(Signature {
                return_type: return_type.into(),
                parameter_types: parameter_types.into_iter().collect(),
            }),
        }
    }

    /// Tests whether `(owner_internal, method_name, descriptor)` — all in
    /// JVM internal form — belongs to this target's set.
    pub(crate) fn matches(
        &self,
        owner_internal: &str,
        method_name: &str,
        descriptor: &str,
    ) -> Result<bool, PatchError> {
        if method_name != self.method_name {
            return Ok(false);
        }
        if !class_spec_match(owner_internal, &self.owner) {
            return Ok(false);
        }
        let Some(signature) = &self.signature else {
            return Ok(true);
        };

        let decomposed = decompose_method_descriptor(descriptor)?;
        if decomposed.parameter_types.len() != signature.parameter_types.len() {
            return Ok(false);
        }
        if !type_spec_match(&decomposed.return_type, &signature.return_type) {
            return Ok(false);
        }
        for (actual, expected) in decomposed.parameter_types.iter().zip(&signature.parameter_types) {
            if !type_spec_match(actual, expected) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// The dotted class name(s) this target may affect — used by the
    /// script manager to short-circuit per-class filtering.
    pub(crate) fn affected_classes(&self) -> Vec<String> {
        vec![self.owner.clone()]
    }
}

/// An identifier of an argument a rewriter must push for a hook: the
/// tentative return value, the receiver, or the n-th parameter of the
/// outer method — §3. Canonical argument order is
/// `RETURN_VALUE, THIS, PARAM1..PARAM6`, per the public-contract ordering
/// in §3.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum StackRequest {
    ReturnValue,
    This,
    Param(u8), // 1..=6
}

impl StackRequest {
    fn rank(self) -> (u8, u8) {
        match self {
            StackRequest::ReturnValue => (0, 0),
            StackRequest::This => (1, 0),
            StackRequest::Param(n) => (2, n),
        }
    }
}

/// Orders a set of stack requests into the canonical public-contract order.
pub(crate) fn canonical_order(mut requests: Vec<StackRequest>) -> Vec<StackRequest> {
    requests.sort_by_key(|request| request.rank());
    requests.dedup();
    requests
}

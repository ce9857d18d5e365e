//! JVM type/method descriptor grammar, decomposition, and human-form matching.
//!
//! `classgraft` accepts two spellings of a type at its entry points: the
//! *dotted* human form callers write scripts in (`java.lang.String[]`,
//! `int`, `boolean`) and the *internal* JVM form class files actually
//! contain (`Ljava/lang/String;`, `I`, `Z`). This module is the only place
//! that translates between them. Descriptor syntax validation is
//! delegated to [`jdescriptor`], the same crate the parsing boundary of
//! this crate's ancestor analyzer used; decomposition into
//! return-type/parameter-types order is done here directly against the
//! descriptor grammar in the spec, since that ordering (not just
//! syntactic validity) is the part every matcher downstream depends on.

use std::str::FromStr;

use jdescriptor::MethodDescriptor;

use crate::error::PatchError;

/// Ordered decomposition of a method descriptor: return type first, then
/// parameters in declaration order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DecomposedDescriptor {
    pub return_type: String,
    pub parameter_types: Vec<String>,
}

/// Validates `descriptor` against the method-descriptor grammar and
/// decomposes it into return type and parameter types, each still in
/// internal (JVM) form.
pub fn decompose_method_descriptor(descriptor: &str) -> Result<DecomposedDescriptor, PatchError> {
    // Round-trip through jdescriptor first: it is the authoritative parser
    // for whether this string is a legal method descriptor at all.
    MethodDescriptor::from_str(descriptor)
        .map_err(|_| PatchError::MalformedDescriptor(descriptor.to_string()))?;

    let body = descriptor
        .strip_prefix('(')
        .ok_or_else(|| PatchError::MalformedDescriptor(descriptor.to_string()))?;
    let (params_part, return_part) = body
        .split_once(')')
        .ok_or_else(|| PatchError::MalformedDescriptor(descriptor.to_string()))?;

    let mut parameter_types = Vec::new();
    let mut rest = params_part;
    while !rest.is_empty() {
        let (token, remainder) = take_one_type(rest, descriptor)?;
        parameter_types.push(token);
        rest = remainder;
    }

    let return_type = if return_part == "V" {
        "V".to_string()
    } else {
        let (token, remainder) = take_one_type(return_part, descriptor)?;
        if !remainder.is_empty() {
            return Err(PatchError::MalformedDescriptor(descriptor.to_string()));
        }
        token
    };

    Ok(DecomposedDescriptor {
        return_type,
        parameter_types,
    })
}

/// Consumes exactly one type descriptor token from the front of `input`,
/// returning the token and whatever remains.
fn take_one_type<'a>(input: &'a str, whole: &str) -> Result<(String, &'a str), PatchError> {
    let bad = || PatchError::MalformedDescriptor(whole.to_string());
    let mut chars = input.char_indices();
    let mut array_dims = 0usize;
    loop {
        match chars.next() {
            Some((_, '[')) => {
                array_dims += 1;
            }
            Some((idx, c)) if "BCDFIJSZ".contains(c) => {
                let end = idx + 1;
                let _ = array_dims;
                return Ok((input[..end].to_string(), &input[end..]));
            }
            Some((idx, 'L')) => {
                let semi = input[idx..]
                    .find(';')
                    .map(|offset| idx + offset)
                    .ok_or_else(bad)?;
                let end = semi + 1;
                return Ok((input[..end].to_string(), &input[end..]));
            }
            _ => return Err(bad()),
        }
    }
}

/// Human-readable names for the eight primitive type tags, in the order
/// §8 property 2 iterates them: `BCDFIJSZ`.
const PRIMITIVE_NAMES: [(char, &str); 8] = [
    ('B', "byte"),
    ('C', "char"),
    ('D', "double"),
    ('F', "float"),
    ('I', "int"),
    ('J', "long"),
    ('S', "short"),
    ('Z', "boolean"),
];

/// Tests whether a JVM type descriptor matches a dotted human-readable form.
///
/// Rules, applied in order: `V` matches only the literal `void`; leading
/// `[` dimensions on the descriptor must be matched by an equal number of
/// trailing `[]` pairs on the human form; the remaining base token is
/// matched either as a primitive tag against its well-known name, or as
/// `L<name>;` against the human form with `/` and `$` normalized to `.`.
pub fn type_spec_match(descriptor: &str, human: &str) -> bool {
    if descriptor == "V" {
        return human == "void";
    }

    let array_dims = descriptor.chars().take_while(|&c| c == '[').count();
    let base_descriptor = &descriptor[array_dims..];

    let mut remaining_human = human;
    for _ in 0..array_dims {
        match remaining_human.strip_suffix("[]") {
            Some(rest) => remaining_human = rest,
            None => return false,
        }
    }

    if let Some(primitive_human) = primitive_human_name(base_descriptor) {
        return primitive_human == remaining_human;
    }

    match base_descriptor
        .strip_prefix('L')
        .and_then(|rest| rest.strip_suffix(';'))
    {
        Some(internal_name) => class_spec_match(internal_name, remaining_human),
        None => false,
    }
}

fn primitive_human_name(tag: &str) -> Option<&'static str> {
    if tag.len() != 1 {
        return None;
    }
    let c = tag.chars().next()?;
    PRIMITIVE_NAMES
        .iter()
        .find(|(primitive, _)| *primitive == c)
        .map(|(_, name)| *name)
}

/// Tests whether a class-file internal name matches a dotted human class
/// name: both sides compare equal after replacing `/` and `$` with `.`.
pub fn class_spec_match(internal_name: &str, human: &str) -> bool {
    normalize_class_name(internal_name) == normalize_class_name(human)
}

fn normalize_class_name(name: &str) -> String {
    name.replace(['/', '$'], ".")
}

/// Converts one dotted human-form type (`"java.lang.String[]"`, `"int"`,
/// `"void"`) into its internal JVM type descriptor — the inverse direction
/// of [`type_spec_match`], needed whenever a [`crate::hook::Hook`]'s
/// human-form signature must become a real constant-pool descriptor.
pub fn to_internal_type(human: &str) -> String {
    let mut array_dims = 0usize;
    let mut base = human;
    while let Some(rest) = base.strip_suffix("[]") {
        array_dims += 1;
        base = rest;
    }

    let base_descriptor = if base == "void" {
        "V".to_string()
    } else if let Some((tag, _)) = PRIMITIVE_NAMES.iter().find(|(_, name)| *name == base) {
        tag.to_string()
    } else {
        format!("L{};", base.replace('.', "/"))
    };

    format!("{}{}", "[".repeat(array_dims), base_descriptor)
}

/// Builds a method descriptor from dotted human-form parameter and return
/// types, in declaration order.
pub fn to_internal_method_descriptor(parameter_types: &[String], return_type: &str) -> String {
    let params: String = parameter_types.iter().map(|t| to_internal_type(t)).collect();
    format!("({}){}", params, to_internal_type(return_type))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decompose_round_trips_a_simple_descriptor() {
        let decomposed = decompose_method_descriptor("(JI)V").unwrap();
        assert_eq!(decomposed.return_type, "V");
        assert_eq!(decomposed.parameter_types, vec!["J", "I"]);
    }

    #[test]
    fn decompose_handles_arrays_and_objects() {
        let decomposed =
            decompose_method_descriptor("([Ljava/lang/String;I)Ljava/util/List;").unwrap();
        assert_eq!(decomposed.return_type, "Ljava/util/List;");
        assert_eq!(decomposed.parameter_types, vec!["[Ljava/lang/String;", "I"]);
    }

    #[test]
    fn decompose_rejects_malformed_descriptors() {
        assert!(decompose_method_descriptor("(J").is_err());
        assert!(decompose_method_descriptor("(Q)V").is_err());
        assert!(decompose_method_descriptor("()X").is_err());
    }

    #[test]
    fn type_match_totality_for_every_primitive_s2() {
        for (tag, name) in PRIMITIVE_NAMES {
            assert!(type_spec_match(&tag.to_string(), name));
            for (_, other_name) in PRIMITIVE_NAMES {
                if other_name != name {
                    assert!(!type_spec_match(&tag.to_string(), other_name));
                }
            }
            assert!(!type_spec_match(&tag.to_string(), "void"));
        }
        assert!(type_spec_match("V", "void"));
        assert!(!type_spec_match("V", "int"));
    }

    #[test]
    fn type_match_respects_array_dimensions_s4() {
        assert!(type_spec_match(
            "[[Ljava/lang/String;",
            "java.lang.String[][]"
        ));
        assert!(!type_spec_match(
            "[[Ljava/lang/String;",
            "java.lang.String[]"
        ));
        assert!(!type_spec_match(
            "[[Ljava/lang/String;",
            "java.lang.String[][][]"
        ));
    }

    #[test]
    fn type_match_normalizes_inner_classes_s5() {
        assert!(type_spec_match(
            "[Ljava/util/Map$Entry;",
            "java.util.Map.Entry[]"
        ));
    }

    #[test]
    fn to_internal_type_round_trips_through_type_spec_match() {
        for human in ["int", "void", "java.lang.String", "java.lang.String[]", "java.util.Map.Entry[][]"] {
            let internal = to_internal_type(human);
            assert!(type_spec_match(&internal, human), "{internal} should match {human}");
        }
    }

    #[test]
    fn to_internal_method_descriptor_builds_a_full_signature() {
        let descriptor = to_internal_method_descriptor(
            &["long".to_string(), "int".to_string()],
            "void",
        );
        assert_eq!(descriptor, "(JI)V");
    }

    #[test]
    fn class_spec_match_normalizes_slashes_and_dollars() {
        assert!(class_spec_match(
            "java/util/Map$Entry",
            "java.util.Map.Entry"
        ));
        assert!(!class_spec_match(
            "java/util/Map$Entry",
            "java.util.MapEntry"
        ));
    }
}

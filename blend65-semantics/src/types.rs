//! The Blend65 type system: built-ins, constructed types, compatibility.
//!
//! Built-ins are plain enum variants, so their identities are stable by
//! construction. Array and function types are structural values; two
//! `byte[10]` built independently compare equal but are never interned.

use std::collections::BTreeMap;

use blend65_ast::{BinaryOp, UnaryOp};
use hashbrown::HashMap;
use itertools::Itertools;

/// A semantic type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// 8-bit unsigned integer.
    Byte,
    /// 16-bit unsigned integer.
    Word,
    /// Byte-valued boolean: 0 is false, anything else true.
    Bool,
    /// No value.
    Void,
    /// Compile-time string literal; never a runtime value.
    StringLit,
    /// Error-recovery type; compatible with everything so one error does
    /// not cascade.
    Unknown,
    /// Pseudo-type of intrinsic parameters that accept any argument
    /// (`sizeof` takes a type name).
    Any,
    /// Fixed-element array, optionally sized.
    Array {
        /// Element type.
        element: Box<Type>,
        /// Declared length; `None` for unsized views.
        length: Option<u32>,
    },
    /// Function signature; values of this type are 16-bit pointers.
    Function {
        /// Parameter types in order.
        params: Vec<Type>,
        /// Return type.
        ret: Box<Type>,
    },
    /// Named enumeration with byte/word-valued members.
    Enum {
        /// Declared name.
        name: String,
        /// Member name to value, in name order.
        members: BTreeMap<String, u16>,
    },
}

/// How a `from` type relates to a `to` type for assignment purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum Compatibility {
    /// Same type.
    Identical,
    /// Implicitly convertible: `byte`↔`bool`, widening to `word`.
    Compatible,
    /// Needs an explicit conversion: narrowing `word`→`byte`.
    RequiresConversion,
    /// No conversion exists.
    Incompatible,
}

impl Compatibility {
    /// True when assignment is allowed without an explicit conversion.
    pub const fn is_assignable(self) -> bool {
        matches!(self, Self::Identical | Self::Compatible)
    }
}

impl Type {
    /// Array type factory.
    pub fn array(element: Type, length: Option<u32>) -> Self {
        Self::Array {
            element: Box::new(element),
            length,
        }
    }

    /// Function type factory.
    pub fn function(params: Vec<Type>, ret: Type) -> Self {
        Self::Function {
            params,
            ret: Box::new(ret),
        }
    }

    /// Storage footprint in bytes; 0 for types with no runtime value.
    pub fn size_in_bytes(&self) -> u32 {
        match self {
            Self::Byte | Self::Bool => 1,
            Self::Word => 2,
            Self::Void | Self::StringLit | Self::Unknown | Self::Any => 0,
            Self::Array { element, length } => {
                element.size_in_bytes() * length.unwrap_or(0)
            }
            // Function values are 16-bit code pointers.
            Self::Function { .. } => 2,
            Self::Enum { members, .. } => {
                if members.values().all(|v| *v <= u16::from(u8::MAX)) {
                    1
                } else {
                    2
                }
            }
        }
    }

    /// Canonical name, used as the compatibility-cache key.
    pub fn name(&self) -> String {
        match self {
            Self::Byte => "byte".into(),
            Self::Word => "word".into(),
            Self::Bool => "bool".into(),
            Self::Void => "void".into(),
            Self::StringLit => "string".into(),
            Self::Unknown => "unknown".into(),
            Self::Any => "any".into(),
            Self::Array { element, length } => match length {
                Some(n) => format!("{}[{n}]", element.name()),
                None => format!("{}[]", element.name()),
            },
            Self::Function { params, ret } => {
                format!(
                    "fn({}) -> {}",
                    params.iter().map(Type::name).join(", "),
                    ret.name()
                )
            }
            Self::Enum { name, .. } => format!("enum {name}"),
        }
    }

    /// `byte`, `word`, `bool`, or enum: anything arithmetic accepts.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Byte | Self::Word | Self::Bool | Self::Enum { .. } | Self::Unknown | Self::Any
        )
    }

    /// The numeric width this type behaves as in arithmetic.
    pub fn numeric_width(&self) -> Option<u32> {
        match self {
            Self::Byte | Self::Bool => Some(1),
            Self::Word => Some(2),
            Self::Enum { .. } => Some(self.size_in_bytes()),
            _ => None,
        }
    }
}

impl core::fmt::Display for Type {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.name())
    }
}

/// Compatibility oracle with a `(from-id, to-id)` memo cache.
///
/// Type names get monotonically increasing numeric ids on first sight;
/// repeated assignability queries hit the cache.
#[derive(Debug, Default)]
pub struct TypeTable {
    ids: HashMap<String, u32>,
    cache: HashMap<(u32, u32), Compatibility>,
}

impl TypeTable {
    /// Fresh table with empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Numeric id of `ty`, assigned on first use.
    pub fn type_id(&mut self, ty: &Type) -> u32 {
        let next = u32::try_from(self.ids.len()).expect("type id space exhausted");
        *self.ids.entry(ty.name()).or_insert(next)
    }

    /// Compatibility of assigning a `from` value into a `to` slot.
    pub fn compatibility(&mut self, from: &Type, to: &Type) -> Compatibility {
        let key = (self.type_id(from), self.type_id(to));
        if let Some(hit) = self.cache.get(&key) {
            return *hit;
        }
        let computed = compute_compatibility(from, to);
        self.cache.insert(key, computed);
        computed
    }

    /// True when `from` may be assigned to `to` without explicit conversion.
    pub fn can_assign(&mut self, from: &Type, to: &Type) -> bool {
        self.compatibility(from, to).is_assignable()
    }

    /// Number of distinct compatibility queries answered so far.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

fn compute_compatibility(from: &Type, to: &Type) -> Compatibility {
    use Type::*;

    if from == to {
        return Compatibility::Identical;
    }
    // Error recovery and intrinsic wildcards accept everything.
    if matches!(from, Unknown | Any) || matches!(to, Unknown | Any) {
        return Compatibility::Compatible;
    }
    match (from, to) {
        // byte and bool interchange freely; both widen into word.
        (Byte, Bool) | (Bool, Byte) => Compatibility::Compatible,
        (Byte, Word) | (Bool, Word) => Compatibility::Compatible,
        (Word, Byte) | (Word, Bool) => Compatibility::RequiresConversion,
        // An enum narrows to its underlying width implicitly; the reverse
        // direction needs an explicit conversion.
        (Enum { .. }, Byte | Bool) if from.size_in_bytes() == 1 => Compatibility::Compatible,
        (Enum { .. }, Word) => Compatibility::Compatible,
        (Byte | Bool | Word, Enum { .. }) => Compatibility::RequiresConversion,
        (
            Array {
                element: fe,
                length: fl,
            },
            Array {
                element: te,
                length: tl,
            },
        ) => {
            let elements_identical = compute_compatibility(fe, te) == Compatibility::Identical;
            match (elements_identical, tl) {
                (true, None) => Compatibility::Compatible,
                (true, Some(tn)) if *fl == Some(*tn) => Compatibility::Identical,
                _ => Compatibility::Incompatible,
            }
        }
        (
            Function {
                params: fp,
                ret: fr,
            },
            Function {
                params: tp,
                ret: tr,
            },
        ) => {
            if fp.len() != tp.len() {
                return Compatibility::Incompatible;
            }
            // Contravariant parameters, covariant return.
            let params_ok = tp
                .iter()
                .zip(fp)
                .all(|(t, f)| compute_compatibility(t, f).is_assignable());
            let ret_ok = compute_compatibility(fr, tr).is_assignable();
            if params_ok && ret_ok {
                Compatibility::Compatible
            } else {
                Compatibility::Incompatible
            }
        }
        _ => Compatibility::Incompatible,
    }
}

/// Result type of a binary expression, or `None` when the operands are not
/// acceptable for the operator.
pub fn binary_result_type(op: BinaryOp, lhs: &Type, rhs: &Type) -> Option<Type> {
    if !lhs.is_numeric() || !rhs.is_numeric() {
        return None;
    }
    if op.is_comparison() || op.is_logical() {
        return Some(Type::Bool);
    }
    // Arithmetic and bitwise promote to word if either side is word-wide.
    let width = lhs
        .numeric_width()
        .unwrap_or(1)
        .max(rhs.numeric_width().unwrap_or(1));
    Some(if width == 2 { Type::Word } else { Type::Byte })
}

/// Result type of a unary expression, or `None` for bad operands.
pub fn unary_result_type(op: UnaryOp, operand: &Type) -> Option<Type> {
    match op {
        UnaryOp::Neg | UnaryOp::BitNot => {
            operand.is_numeric().then(|| {
                if operand.numeric_width() == Some(2) {
                    Type::Word
                } else {
                    Type::Byte
                }
            })
        }
        UnaryOp::Not => operand.is_numeric().then_some(Type::Bool),
        // Address-of always yields a 16-bit pointer value.
        UnaryOp::AddressOf => Some(Type::Word),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(Type::Byte, Type::Byte => true; "byte to byte")]
    #[test_case(Type::Byte, Type::Word => true; "byte widens to word")]
    #[test_case(Type::Word, Type::Byte => false; "word does not narrow")]
    #[test_case(Type::Bool, Type::Byte => true; "bool to byte")]
    #[test_case(Type::Byte, Type::Bool => true; "byte to bool")]
    #[test_case(Type::array(Type::Byte, Some(10)), Type::array(Type::Byte, Some(10)) => true; "same arrays")]
    #[test_case(Type::array(Type::Byte, Some(10)), Type::array(Type::Byte, Some(20)) => false; "length mismatch")]
    #[test_case(Type::array(Type::Byte, Some(10)), Type::array(Type::Byte, None) => true; "unsized target")]
    #[test_case(Type::array(Type::Byte, Some(4)), Type::array(Type::Word, Some(4)) => false; "element mismatch")]
    fn can_assign_matrix(from: Type, to: Type) -> bool {
        TypeTable::new().can_assign(&from, &to)
    }

    #[test]
    fn identical_beats_compatible() {
        let mut table = TypeTable::new();
        assert_eq!(
            table.compatibility(&Type::Word, &Type::Word),
            Compatibility::Identical
        );
        assert_eq!(
            table.compatibility(&Type::Byte, &Type::Word),
            Compatibility::Compatible
        );
        assert_eq!(
            table.compatibility(&Type::Word, &Type::Byte),
            Compatibility::RequiresConversion
        );
    }

    #[test]
    fn cache_is_hit_on_repeat_queries() {
        let mut table = TypeTable::new();
        table.can_assign(&Type::Byte, &Type::Word);
        let after_first = table.cache_len();
        table.can_assign(&Type::Byte, &Type::Word);
        assert_eq!(table.cache_len(), after_first);
    }

    #[test]
    fn function_compatibility_is_contravariant_in_params() {
        let mut table = TypeTable::new();
        // A function taking word can stand in where one taking byte is
        // expected: every byte argument widens.
        let takes_word = Type::function(vec![Type::Word], Type::Byte);
        let takes_byte = Type::function(vec![Type::Byte], Type::Byte);
        assert!(table.can_assign(&takes_word, &takes_byte));
        assert!(!table.can_assign(&takes_byte, &takes_word));
    }

    #[test]
    fn function_compatibility_is_covariant_in_return() {
        let mut table = TypeTable::new();
        let returns_byte = Type::function(vec![], Type::Byte);
        let returns_word = Type::function(vec![], Type::Word);
        assert!(table.can_assign(&returns_byte, &returns_word));
        assert!(!table.can_assign(&returns_word, &returns_byte));
    }

    #[test]
    fn arithmetic_promotes_to_word() {
        assert_eq!(
            binary_result_type(BinaryOp::Add, &Type::Byte, &Type::Word),
            Some(Type::Word)
        );
        assert_eq!(
            binary_result_type(BinaryOp::Add, &Type::Byte, &Type::Byte),
            Some(Type::Byte)
        );
        assert_eq!(
            binary_result_type(BinaryOp::Lt, &Type::Byte, &Type::Word),
            Some(Type::Bool)
        );
        assert_eq!(binary_result_type(BinaryOp::Add, &Type::Void, &Type::Byte), None);
    }

    #[test]
    fn sizes_match_the_machine() {
        assert_eq!(Type::Byte.size_in_bytes(), 1);
        assert_eq!(Type::Word.size_in_bytes(), 2);
        assert_eq!(Type::Bool.size_in_bytes(), 1);
        assert_eq!(Type::Void.size_in_bytes(), 0);
        assert_eq!(Type::array(Type::Word, Some(12)).size_in_bytes(), 24);
        assert_eq!(Type::function(vec![Type::Byte], Type::Void).size_in_bytes(), 2);
    }
}

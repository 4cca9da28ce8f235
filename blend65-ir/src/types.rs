//! IL types: the semantic types reduced to what codegen needs.

use blend65_semantics::Type;

/// Type of a virtual register or global.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IlType {
    /// 8-bit unsigned.
    Byte,
    /// 16-bit unsigned.
    Word,
    /// Byte-valued boolean.
    Bool,
    /// No value.
    Void,
    /// 16-bit pointer to `T`.
    Pointer(Box<IlType>),
    /// Array of `T`, optionally sized.
    Array {
        /// Element type.
        element: Box<IlType>,
        /// Length, when statically known.
        length: Option<u32>,
    },
    /// Function signature.
    Function {
        /// Parameter types.
        params: Vec<IlType>,
        /// Return type.
        ret: Box<IlType>,
    },
}

impl IlType {
    /// Pointer type factory.
    pub fn pointer(pointee: IlType) -> Self {
        Self::Pointer(Box::new(pointee))
    }

    /// Storage footprint in bytes.
    pub fn size_in_bytes(&self) -> u32 {
        match self {
            Self::Byte | Self::Bool => 1,
            Self::Word | Self::Pointer(_) | Self::Function { .. } => 2,
            Self::Void => 0,
            Self::Array { element, length } => element.size_in_bytes() * length.unwrap_or(0),
        }
    }

    /// True for `Byte`, `Word`, and `Bool`.
    pub const fn is_scalar(&self) -> bool {
        matches!(self, Self::Byte | Self::Word | Self::Bool)
    }
}

impl From<&Type> for IlType {
    fn from(ty: &Type) -> Self {
        match ty {
            Type::Byte => Self::Byte,
            Type::Word => Self::Word,
            Type::Bool => Self::Bool,
            Type::Void => Self::Void,
            // Strings and unresolved types carry no runtime value; a byte
            // slot is the safest degenerate lowering for recovery paths.
            Type::StringLit | Type::Unknown | Type::Any => Self::Byte,
            Type::Array { element, length } => Self::Array {
                element: Box::new(Self::from(element.as_ref())),
                length: *length,
            },
            Type::Function { params, ret } => Self::Function {
                params: params.iter().map(Self::from).collect(),
                ret: Box::new(Self::from(ret.as_ref())),
            },
            Type::Enum { .. } => {
                if ty.size_in_bytes() == 1 {
                    Self::Byte
                } else {
                    Self::Word
                }
            }
        }
    }
}

impl core::fmt::Display for IlType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Byte => write!(f, "byte"),
            Self::Word => write!(f, "word"),
            Self::Bool => write!(f, "bool"),
            Self::Void => write!(f, "void"),
            Self::Pointer(p) => write!(f, "*{p}"),
            Self::Array { element, length } => match length {
                Some(n) => write!(f, "{element}[{n}]"),
                None => write!(f, "{element}[]"),
            },
            Self::Function { params, ret } => {
                write!(f, "fn(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, ") -> {ret}")
            }
        }
    }
}

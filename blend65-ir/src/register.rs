//! Virtual registers.

use core::fmt;

use crate::types::IlType;

/// Handle of a virtual register inside its owning function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegId(pub u32);

impl RegId {
    /// Index form for table lookups.
    pub const fn to_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for RegId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// One virtual register: unlimited supply, typed, optionally carrying the
/// source variable name it was created for.
///
/// Before SSA a named register may be redefined along a path; after SSA
/// every register has exactly one definition.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VirtualRegister {
    /// Handle, unique per function.
    pub id: RegId,
    /// Value type.
    pub ty: IlType,
    /// Source variable this register models, if any.
    pub name: Option<String>,
}

impl fmt::Display for VirtualRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}:{} ({name})", self.id, self.ty),
            None => write!(f, "{}:{}", self.id, self.ty),
        }
    }
}

//! IL modules: functions, globals, and the linking surface.

use core::fmt;
use std::collections::BTreeMap;

use blend65_ast::StorageClass;

use crate::function::Function;
use crate::types::IlType;

/// One module-level variable.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Global {
    /// Name.
    pub name: String,
    /// Value type.
    pub ty: IlType,
    /// Requested storage class.
    pub storage: StorageClass,
    /// Fixed address for `@zp`/`@map` declarations.
    pub address: Option<u16>,
    /// Compile-time initial value, when constant.
    pub initial_value: Option<u32>,
    /// Exported from the module.
    pub exported: bool,
    /// Declared `const`.
    pub constant: bool,
}

/// One import edge recorded for the linker.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ImportRecord {
    /// Source module path.
    pub module: String,
    /// Imported names; empty means wildcard.
    pub names: Vec<String>,
}

/// One source module lowered to IL.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Module {
    /// Dot-joined module path.
    pub name: String,
    /// Functions by name, stubs included.
    pub functions: BTreeMap<String, Function>,
    /// Globals by name.
    pub globals: BTreeMap<String, Global>,
    /// Import edges.
    pub imports: Vec<ImportRecord>,
    /// Exported names.
    pub exports: Vec<String>,
    /// Entry-point function, when this module defines one.
    pub entry_point: Option<String>,
}

impl Module {
    /// Empty module named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Borrow a function by name.
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "module {}", self.name)?;
        for global in self.globals.values() {
            write!(f, "global {}: {}", global.name, global.ty)?;
            if let Some(addr) = global.address {
                write!(f, " @ ${addr:04X}")?;
            }
            if let Some(init) = global.initial_value {
                write!(f, " = {init}")?;
            }
            writeln!(f)?;
        }
        for function in self.functions.values() {
            writeln!(f, "{function}")?;
        }
        Ok(())
    }
}

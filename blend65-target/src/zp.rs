//! Validation of `@zp` and `@map` placements against a target.

use blend65_ast::{Diagnostic, DiagnosticCode, StorageClass};
use blend65_ir::Module;
use itertools::Itertools;

use crate::arith::{checked_range_end, ranges_overlap};
use crate::config::TargetConfig;

/// Check every addressed global of `modules` against `config`.
///
/// Rules: a `@zp` address must fall in the safe zero-page range; a `@map`
/// address may point anywhere *outside* the zero page (hardware I/O), but
/// inside page zero it must respect the reserved ranges. Two addressed
/// declarations whose byte ranges overlap are rejected.
pub fn validate_placements(modules: &[Module], config: &TargetConfig) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    let mut placed: Vec<(String, u16, u16)> = Vec::new();

    for module in modules {
        for global in module.globals.values() {
            let Some(address) = global.address else {
                continue;
            };
            let size = u16::try_from(global.ty.size_in_bytes().max(1)).unwrap_or(u16::MAX);
            let Some(end) = checked_range_end(address, size) else {
                diagnostics.push(Diagnostic::error(
                    DiagnosticCode::InvalidMapAddress,
                    format!(
                        "`{}` at ${address:04X} runs past the end of memory",
                        global.name
                    ),
                ));
                continue;
            };

            let in_zero_page = address <= 0x00FF;
            match global.storage {
                StorageClass::ZeroPage => {
                    if !config.zero_page.is_safe(address) || !config.zero_page.is_safe(end) {
                        let reason = config
                            .zero_page
                            .reserved_reason(address)
                            .unwrap_or("outside the safe range");
                        diagnostics.push(Diagnostic::error(
                            DiagnosticCode::AddressInReservedRange,
                            format!(
                                "`@zp {}` at ${address:04X} is not allocatable: {reason}",
                                global.name
                            ),
                        ));
                    }
                }
                StorageClass::Map => {
                    if in_zero_page
                        && (config.zero_page.is_reserved(address)
                            || config.zero_page.is_reserved(end))
                    {
                        let reason = config
                            .zero_page
                            .reserved_reason(address)
                            .or_else(|| config.zero_page.reserved_reason(end))
                            .unwrap_or("reserved");
                        diagnostics.push(Diagnostic::error(
                            DiagnosticCode::AddressInReservedRange,
                            format!(
                                "`@map {}` at ${address:04X} hits a reserved range: {reason}",
                                global.name
                            ),
                        ));
                    }
                }
                _ => {}
            }

            placed.push((format!("{}::{}", module.name, global.name), address, end));
        }
    }

    // Overlap check across all addressed declarations.
    for ((a_name, a_start, a_end), (b_name, b_start, b_end)) in
        placed.iter().tuple_combinations::<(_, _)>()
    {
        if ranges_overlap(*a_start, *a_end, *b_start, *b_end) {
            diagnostics.push(Diagnostic::error(
                DiagnosticCode::OverlappingAddresses,
                format!(
                    "`{a_name}` (${a_start:04X}..=${a_end:04X}) overlaps `{b_name}` (${b_start:04X}..=${b_end:04X})"
                ),
            ));
        }
    }

    diagnostics
}

#[cfg(test)]
mod tests {
    use super::*;
    use blend65_ir::{Global, IlType};

    fn module_with(globals: Vec<Global>) -> Module {
        let mut module = Module::new("main");
        for global in globals {
            module.globals.insert(global.name.clone(), global);
        }
        module
    }

    fn global(name: &str, storage: StorageClass, address: u16, size: u32) -> Global {
        Global {
            name: name.into(),
            ty: if size == 1 {
                IlType::Byte
            } else {
                IlType::Array {
                    element: Box::new(IlType::Byte),
                    length: Some(size),
                }
            },
            storage,
            address: Some(address),
            initial_value: None,
            exported: false,
            constant: false,
        }
    }

    #[test]
    fn safe_zp_address_passes() {
        let m = module_with(vec![global("counter", StorageClass::ZeroPage, 0x0010, 1)]);
        assert!(validate_placements(&[m], &TargetConfig::c64()).is_empty());
    }

    #[test]
    fn reserved_zp_address_is_rejected() {
        let m = module_with(vec![global("bad", StorageClass::ZeroPage, 0x0001, 1)]);
        let diags = validate_placements(&[m], &TargetConfig::c64());
        assert!(diags
            .iter()
            .any(|d| d.code == DiagnosticCode::AddressInReservedRange));
    }

    #[test]
    fn io_map_outside_zero_page_passes() {
        let m = module_with(vec![global("border", StorageClass::Map, 0xD020, 1)]);
        assert!(validate_placements(&[m], &TargetConfig::c64()).is_empty());
    }

    #[test]
    fn map_into_reserved_zero_page_is_rejected() {
        let m = module_with(vec![global("port", StorageClass::Map, 0x0000, 1)]);
        let diags = validate_placements(&[m], &TargetConfig::c64());
        assert!(diags
            .iter()
            .any(|d| d.code == DiagnosticCode::AddressInReservedRange));
    }

    #[test]
    fn overlapping_declarations_are_rejected() {
        let m = module_with(vec![
            global("screen", StorageClass::Map, 0x0400, 1024),
            global("sprites", StorageClass::Map, 0x07F8, 8),
        ]);
        let diags = validate_placements(&[m], &TargetConfig::c64());
        assert!(diags
            .iter()
            .any(|d| d.code == DiagnosticCode::OverlappingAddresses));
    }

    #[test]
    fn zp_range_spilling_out_of_safe_is_rejected() {
        // 4 bytes starting at $8D spill past $8F.
        let m = module_with(vec![global("buf", StorageClass::ZeroPage, 0x008D, 4)]);
        let diags = validate_placements(&[m], &TargetConfig::c64());
        assert!(diags
            .iter()
            .any(|d| d.code == DiagnosticCode::AddressInReservedRange));
    }
}

//! Zero-page priority, register preference, and cycle annotation.
//!
//! Walks the IL once per function. Usage counts weighted by the
//! execution-frequency band become a zero-page priority score per source
//! variable; each instruction gets an addressing-mode hint and a cycle
//! estimate from the target tables.

use blend65_ast::{Diagnostic, DiagnosticCode, DiagnosticSink, PassResult, StorageClass};
use blend65_ir::{
    AddressingMode, FrequencyBand, Function, Instruction, Module, Mos6502Register, Opcode,
    Operand, RegId,
};
use hashbrown::HashSet;
use itertools::Itertools;
use std::collections::BTreeMap;
use tracing::debug_span;

use crate::config::TargetConfig;
use crate::cycles::estimate_cycles;

/// One variable scored for zero-page placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZpCandidate {
    /// Source variable name.
    pub symbol: String,
    /// Weighted usage score; higher wants zero page more.
    pub score: u32,
}

/// Score at which a candidate is worth a hint diagnostic: one use inside
/// a loop already clears it.
const HINT_THRESHOLD: u32 = 10;

/// The hint analysis pass.
pub struct HintAnalyzer;

impl HintAnalyzer {
    /// Annotate `modules` in place and return the ranked ZP candidates.
    pub fn annotate(modules: &mut [Module], config: &TargetConfig) -> PassResult<Vec<ZpCandidate>> {
        let span = debug_span!("hint_analyzer", target = %config.architecture);
        let _guard = span.enter();

        let mut sink = DiagnosticSink::default();
        let mut scores: BTreeMap<String, u32> = BTreeMap::new();

        for module in modules.iter_mut() {
            // Hardware-mapped names have a fixed home; never ZP candidates.
            let mapped: HashSet<String> = module
                .globals
                .values()
                .filter(|g| g.storage == StorageClass::Map)
                .map(|g| g.name.clone())
                .collect();

            for function in module.functions.values_mut() {
                annotate_function(function, &mapped, &mut scores);
            }
        }

        let candidates: Vec<ZpCandidate> = scores
            .into_iter()
            .map(|(symbol, score)| ZpCandidate { symbol, score })
            .sorted_by(|a, b| b.score.cmp(&a.score).then(a.symbol.cmp(&b.symbol)))
            .collect();

        for candidate in candidates.iter().filter(|c| c.score >= HINT_THRESHOLD) {
            sink.push(Diagnostic::hint(
                DiagnosticCode::ZeroPageCandidate,
                format!(
                    "`{}` scores {} for zero-page placement",
                    candidate.symbol, candidate.score
                ),
            ));
        }
        tracing::debug!(candidates = candidates.len(), "hints annotated");
        PassResult::from_sink(candidates, sink)
    }
}

fn annotate_function(
    function: &mut Function,
    mapped: &HashSet<String>,
    scores: &mut BTreeMap<String, u32>,
) {
    // Index registers: anything used to index a range access.
    let mut index_regs: HashSet<RegId> = HashSet::new();
    for (_, instruction) in function.instructions() {
        if matches!(
            instruction.opcode,
            Opcode::MapLoadRange | Opcode::MapStoreRange
        ) {
            if let Some(Operand::Reg(reg)) = instruction.operands.first() {
                index_regs.insert(*reg);
            }
        }
    }

    let register_names: Vec<Option<String>> = function
        .registers
        .iter()
        .map(|r| r.name.clone())
        .collect();
    let register_widths: Vec<u32> = function
        .registers
        .iter()
        .map(|r| r.ty.size_in_bytes())
        .collect();

    for block in &mut function.blocks {
        for instruction in &mut block.instructions {
            let band = instruction
                .meta
                .frequency
                .unwrap_or(FrequencyBand::Cold);
            let weight = band.weight();

            for reg in touched_registers(instruction) {
                if let Some(Some(name)) = register_names.get(reg.to_usize()) {
                    if !mapped.contains(name) {
                        *scores.entry(name.clone()).or_insert(0) += weight;
                    }
                }
            }

            let wide = instruction
                .dest
                .map(|d| register_widths.get(d.to_usize()).copied().unwrap_or(1) == 2)
                .unwrap_or(false);
            let mode = pick_addressing_mode(instruction);
            instruction.meta.addressing_mode = Some(mode);
            if instruction.meta.cycle_estimate.is_none() {
                instruction.meta.cycle_estimate = Some(estimate_cycles(instruction, wide, mode));
            }
            if instruction.meta.register_preference.is_none() {
                instruction.meta.register_preference =
                    pick_register(instruction, &index_regs, &register_widths);
            }
        }
    }
}

fn touched_registers(instruction: &Instruction) -> Vec<RegId> {
    let mut regs = instruction.uses();
    regs.extend(instruction.dest);
    regs
}

fn pick_addressing_mode(instruction: &Instruction) -> AddressingMode {
    match instruction.opcode {
        Opcode::Branch => AddressingMode::Relative,
        Opcode::Jump | Opcode::Call | Opcode::Return => AddressingMode::Absolute,
        Opcode::Unreachable | Opcode::Phi => AddressingMode::Implied,
        Opcode::MapLoadField | Opcode::MapStoreField => {
            match instruction.meta.map_base {
                Some(base) if base <= 0x00FF => AddressingMode::ZeroPage,
                _ => AddressingMode::Absolute,
            }
        }
        Opcode::MapLoadRange | Opcode::MapStoreRange => {
            match instruction.meta.map_base {
                Some(base) if base <= 0x00FF => AddressingMode::ZeroPageX,
                _ => AddressingMode::AbsoluteX,
            }
        }
        _ => {
            if instruction
                .operands
                .iter()
                .all(|op| matches!(op, Operand::Imm(_)))
            {
                AddressingMode::Immediate
            } else {
                AddressingMode::ZeroPage
            }
        }
    }
}

fn pick_register(
    instruction: &Instruction,
    index_regs: &HashSet<RegId>,
    register_widths: &[u32],
) -> Option<Mos6502Register> {
    let dest = instruction.dest?;
    let byte_wide = register_widths.get(dest.to_usize()).copied() == Some(1);
    if !byte_wide {
        return None;
    }
    if index_regs.contains(&dest) {
        return Some(Mos6502Register::X);
    }
    match instruction.opcode {
        Opcode::Add
        | Opcode::Sub
        | Opcode::And
        | Opcode::Or
        | Opcode::Xor
        | Opcode::Shl
        | Opcode::Shr
        | Opcode::Neg
        | Opcode::Not
        | Opcode::BitNot
        | Opcode::Lo
        | Opcode::Hi => Some(Mos6502Register::A),
        Opcode::MapLoadRange => Some(Mos6502Register::A),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blend65_ir::{IlType, InstructionMeta};

    fn loop_heavy_function() -> Function {
        let mut f = Function::new("f", IlType::Void);
        let entry = f.new_block("entry");
        let header = f.new_block("header");
        let body = f.new_block("body");
        let exit = f.new_block("exit");
        let i = f.new_register(IlType::Byte, Some("i"));
        let cond = f.new_register(IlType::Bool, None);
        let hot = InstructionMeta {
            frequency: Some(FrequencyBand::Warm),
            loop_depth: Some(1),
            ..InstructionMeta::default()
        };

        f.push(entry, Instruction::const_value(i, 0));
        f.push(entry, Instruction::jump(header));
        f.add_edge(entry, header);
        f.push(
            header,
            Instruction::binary(Opcode::CmpLt, cond, Operand::Reg(i), Operand::Imm(10))
                .with_meta(hot.clone()),
        );
        f.push(header, Instruction::branch(Operand::Reg(cond), body, exit));
        f.add_edge(header, body);
        f.add_edge(header, exit);
        f.push(
            body,
            Instruction::binary(Opcode::Add, i, Operand::Reg(i), Operand::Imm(1))
                .with_meta(hot),
        );
        f.push(body, Instruction::jump(header));
        f.add_edge(body, header);
        f.push(exit, Instruction::ret(None));
        f
    }

    fn one_module() -> Vec<Module> {
        let mut module = Module::new("main");
        module.functions.insert("f".into(), loop_heavy_function());
        vec![module]
    }

    #[test]
    fn loop_variables_outrank_cold_ones() {
        let mut modules = one_module();
        let result = HintAnalyzer::annotate(&mut modules, &TargetConfig::c64());
        assert!(result.success);
        let candidates = result.data;
        assert_eq!(candidates.first().map(|c| c.symbol.as_str()), Some("i"));
        assert!(candidates[0].score >= HINT_THRESHOLD);
        assert!(result
            .diagnostics
            .iter()
            .any(|d| d.code == DiagnosticCode::ZeroPageCandidate));
    }

    #[test]
    fn every_instruction_gets_cycles_and_mode() {
        let mut modules = one_module();
        HintAnalyzer::annotate(&mut modules, &TargetConfig::c64());
        let function = modules[0].function("f").unwrap();
        for (_, instruction) in function.instructions() {
            assert!(instruction.meta.addressing_mode.is_some());
            assert!(instruction.meta.cycle_estimate.is_some());
        }
    }

    #[test]
    fn byte_arithmetic_prefers_the_accumulator() {
        let mut modules = one_module();
        HintAnalyzer::annotate(&mut modules, &TargetConfig::c64());
        let function = modules[0].function("f").unwrap();
        let add = function
            .instructions()
            .find(|(_, i)| i.opcode == Opcode::Add)
            .map(|(_, i)| i.clone())
            .unwrap();
        assert_eq!(add.meta.register_preference, Some(Mos6502Register::A));
    }
}

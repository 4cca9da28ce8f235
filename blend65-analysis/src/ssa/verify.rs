//! SSA invariant verification.
//!
//! Checks single assignment, dominance of uses, φ well-formedness, and
//! straight-line use-before-definition. Violations carry a stable code,
//! the offending register, and the blocks involved.

use std::collections::BTreeMap;

use blend65_ast::DiagnosticCode;
use blend65_ir::{BlockId, Function, Opcode, RegId};
use hashbrown::HashMap;

use crate::graph::Dominators;
use crate::ssa::FunctionGraph;

/// One broken invariant.
#[derive(Debug, Clone, PartialEq)]
pub struct SsaViolation {
    /// Stable error code.
    pub code: DiagnosticCode,
    /// Offending register, when one exists.
    pub register: Option<RegId>,
    /// Block the violation was observed in.
    pub block: Option<BlockId>,
    /// Human-readable description.
    pub message: String,
}

impl SsaViolation {
    fn new(
        code: DiagnosticCode,
        register: Option<RegId>,
        block: Option<BlockId>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            register,
            block,
            message: message.into(),
        }
    }
}

/// Verification verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct SsaVerification {
    /// True when no invariant broke.
    pub valid: bool,
    /// φ instructions that passed every check.
    pub phis_verified: usize,
    /// All violations found.
    pub violations: Vec<SsaViolation>,
}

/// Definition coordinates of a register.
#[derive(Debug, Clone, Copy)]
struct DefSite {
    block: BlockId,
    position: usize,
}

/// Check `function` against the SSA invariants.
pub fn verify(function: &Function) -> SsaVerification {
    let mut violations = Vec::new();
    let mut phis_total = 0usize;
    let mut phi_failures = 0usize;

    if function.is_stub() {
        return SsaVerification {
            valid: true,
            phis_verified: 0,
            violations,
        };
    }

    let graph = FunctionGraph(function);
    let dominators = Dominators::compute(&graph);
    let entry = function.entry.expect("non-stub function has an entry");

    // Single assignment, and a def table for the dominance checks.
    let mut defs: HashMap<RegId, DefSite> = HashMap::new();
    for &param in function.parameters.iter().map(|p| &p.reg) {
        defs.insert(
            param,
            DefSite {
                block: entry,
                position: 0,
            },
        );
    }
    // Renaming only walks the dominator tree, so unreachable blocks keep
    // their pre-SSA registers; they are excluded from the global count.
    let mut def_counts: BTreeMap<RegId, usize> = BTreeMap::new();
    for block in &function.blocks {
        if !dominators.is_reachable(block.id.to_usize()) {
            continue;
        }
        for (position, instruction) in block.instructions.iter().enumerate() {
            if let Some(dest) = instruction.dest {
                *def_counts.entry(dest).or_default() += 1;
                defs.entry(dest).or_insert(DefSite {
                    block: block.id,
                    position,
                });
            }
        }
    }
    for (&reg, &count) in &def_counts {
        if count > 1 {
            violations.push(SsaViolation::new(
                DiagnosticCode::MultipleDefinitions,
                Some(reg),
                None,
                format!("{reg} has {count} definitions"),
            ));
        }
    }

    for block in &function.blocks {
        let reachable = dominators.is_reachable(block.id.to_usize());
        let mut seen_non_phi = false;
        for (position, instruction) in block.instructions.iter().enumerate() {
            if instruction.opcode == Opcode::Phi {
                phis_total += 1;
                let mut ok = true;

                if seen_non_phi {
                    ok = false;
                    violations.push(SsaViolation::new(
                        DiagnosticCode::PhiNotAtBlockStart,
                        instruction.dest,
                        Some(block.id),
                        format!("φ at position {position} follows a non-φ instruction"),
                    ));
                }
                if block.id == entry {
                    ok = false;
                    violations.push(SsaViolation::new(
                        DiagnosticCode::PhiInEntryBlock,
                        instruction.dest,
                        Some(block.id),
                        "φ in the entry block",
                    ));
                }
                if instruction.incoming.len() != block.predecessors.len() {
                    ok = false;
                    violations.push(SsaViolation::new(
                        DiagnosticCode::PhiOperandCountMismatch,
                        instruction.dest,
                        Some(block.id),
                        format!(
                            "φ has {} operand(s) for {} predecessor(s)",
                            instruction.incoming.len(),
                            block.predecessors.len()
                        ),
                    ));
                }
                for (incoming_block, _) in &instruction.incoming {
                    if !block.predecessors.contains(incoming_block) {
                        ok = false;
                        violations.push(SsaViolation::new(
                            DiagnosticCode::PhiInvalidPredecessor,
                            instruction.dest,
                            Some(block.id),
                            format!("φ operand names {incoming_block}, not a predecessor"),
                        ));
                    }
                }
                for &pred in &block.predecessors {
                    if !instruction.incoming.iter().any(|(b, _)| *b == pred) {
                        ok = false;
                        violations.push(SsaViolation::new(
                            DiagnosticCode::PhiMissingOperand,
                            instruction.dest,
                            Some(block.id),
                            format!("φ lacks an operand for predecessor {pred}"),
                        ));
                    }
                }
                // φ operand defs must dominate the matching predecessor.
                if reachable {
                    for (incoming_block, operand) in &instruction.incoming {
                        let Some(reg) = operand.reg() else {
                            continue;
                        };
                        match defs.get(&reg) {
                            Some(def)
                                if dominators.dominates(
                                    def.block.to_usize(),
                                    incoming_block.to_usize(),
                                ) => {}
                            Some(def) => {
                                ok = false;
                                violations.push(SsaViolation::new(
                                    DiagnosticCode::DominanceViolation,
                                    Some(reg),
                                    Some(*incoming_block),
                                    format!(
                                        "φ operand {reg} defined in {} does not dominate edge {incoming_block}",
                                        def.block
                                    ),
                                ));
                            }
                            None => {
                                ok = false;
                                violations.push(SsaViolation::new(
                                    DiagnosticCode::UseBeforeDefinition,
                                    Some(reg),
                                    Some(block.id),
                                    format!("φ operand {reg} has no definition"),
                                ));
                            }
                        }
                    }
                }
                if !ok {
                    phi_failures += 1;
                }
                continue;
            }

            seen_non_phi = true;
            if !reachable {
                continue;
            }
            for reg in instruction.uses() {
                match defs.get(&reg) {
                    None => {
                        violations.push(SsaViolation::new(
                            DiagnosticCode::UseBeforeDefinition,
                            Some(reg),
                            Some(block.id),
                            format!("{reg} is used but never defined"),
                        ));
                    }
                    Some(def) if def.block == block.id => {
                        let param = function.parameters.iter().any(|p| p.reg == reg);
                        if def.position >= position && !param {
                            violations.push(SsaViolation::new(
                                DiagnosticCode::UseBeforeDefinition,
                                Some(reg),
                                Some(block.id),
                                format!("{reg} is used at {position} before its definition"),
                            ));
                        }
                    }
                    Some(def) => {
                        if !dominators.dominates(def.block.to_usize(), block.id.to_usize()) {
                            violations.push(SsaViolation::new(
                                DiagnosticCode::DominanceViolation,
                                Some(reg),
                                Some(block.id),
                                format!(
                                    "{reg} defined in {} does not dominate its use in {}",
                                    def.block, block.id
                                ),
                            ));
                        }
                    }
                }
            }
        }
    }

    SsaVerification {
        valid: violations.is_empty(),
        phis_verified: phis_total - phi_failures,
        violations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blend65_ir::{IlType, Instruction, Operand};

    /// Hand-built valid diamond with a φ (scenario S3).
    fn ssa_diamond() -> Function {
        let mut f = Function::new("diamond", IlType::Byte);
        let entry = f.new_block("entry");
        let left = f.new_block("left");
        let right = f.new_block("right");
        let merge = f.new_block("merge");
        let cond = f.new_register(IlType::Bool, Some("cond"));
        let r0 = f.new_register(IlType::Byte, None);
        let r1 = f.new_register(IlType::Byte, None);
        let r2 = f.new_register(IlType::Byte, None);

        f.push(entry, Instruction::const_value(cond, 1));
        f.push(entry, Instruction::branch(Operand::Reg(cond), left, right));
        f.add_edge(entry, left);
        f.add_edge(entry, right);
        f.push(left, Instruction::const_value(r0, 10));
        f.push(left, Instruction::jump(merge));
        f.add_edge(left, merge);
        f.push(right, Instruction::const_value(r1, 20));
        f.push(right, Instruction::jump(merge));
        f.add_edge(right, merge);
        f.push(
            merge,
            Instruction::phi(
                r2,
                vec![
                    (left, Operand::Reg(r0)),
                    (right, Operand::Reg(r1)),
                ],
            ),
        );
        f.push(merge, Instruction::ret(Some(Operand::Reg(r2))));
        f
    }

    #[test]
    fn valid_diamond_passes() {
        let verification = verify(&ssa_diamond());
        assert!(verification.valid, "{:?}", verification.violations);
        assert_eq!(verification.phis_verified, 1);
    }

    #[test]
    fn missing_phi_operand_is_reported() {
        let mut f = ssa_diamond();
        let merge = f.blocks.iter_mut().find(|b| b.label == "merge").unwrap();
        merge.instructions[0].incoming.pop();
        let verification = verify(&f);
        assert!(!verification.valid);
        assert!(verification.violations.iter().any(|v| matches!(
            v.code,
            DiagnosticCode::PhiMissingOperand | DiagnosticCode::PhiOperandCountMismatch
        )));
    }

    #[test]
    fn phi_after_non_phi_is_reported() {
        let mut f = ssa_diamond();
        let merge = f.blocks.iter_mut().find(|b| b.label == "merge").unwrap();
        let phi = merge.instructions.remove(0);
        merge.instructions.insert(1, phi);
        let verification = verify(&f);
        assert!(verification
            .violations
            .iter()
            .any(|v| v.code == DiagnosticCode::PhiNotAtBlockStart));
    }

    #[test]
    fn phi_in_entry_is_reported() {
        let mut f = ssa_diamond();
        let extra = f.new_register(IlType::Byte, None);
        let entry = f.entry.unwrap();
        f.block_mut(entry)
            .instructions
            .insert(0, Instruction::phi(extra, vec![]));
        let verification = verify(&f);
        assert!(verification
            .violations
            .iter()
            .any(|v| v.code == DiagnosticCode::PhiInEntryBlock));
    }

    #[test]
    fn double_definition_is_reported() {
        let mut f = ssa_diamond();
        let left = f.blocks.iter_mut().find(|b| b.label == "left").unwrap();
        // r0 gets a second definition.
        let r0 = left.instructions[0].dest.unwrap();
        left.instructions
            .insert(1, Instruction::const_value(r0, 11));
        let verification = verify(&f);
        assert!(verification
            .violations
            .iter()
            .any(|v| v.code == DiagnosticCode::MultipleDefinitions));
    }

    #[test]
    fn sibling_use_violates_dominance() {
        let mut f = ssa_diamond();
        // right uses r0, which only left defines.
        let (r0, right_id) = {
            let left = f.blocks.iter().find(|b| b.label == "left").unwrap();
            let r0 = left.instructions[0].dest.unwrap();
            let right = f.blocks.iter().find(|b| b.label == "right").unwrap();
            (r0, right.id)
        };
        let copy_dest = f.new_register(IlType::Byte, None);
        f.block_mut(right_id)
            .instructions
            .insert(1, Instruction::copy(copy_dest, Operand::Reg(r0)));
        let verification = verify(&f);
        assert!(verification
            .violations
            .iter()
            .any(|v| v.code == DiagnosticCode::DominanceViolation));
    }

    #[test]
    fn invalid_predecessor_is_reported() {
        let mut f = ssa_diamond();
        let entry = f.entry.unwrap();
        let merge = f.blocks.iter_mut().find(|b| b.label == "merge").unwrap();
        merge.instructions[0].incoming[0].0 = entry;
        let verification = verify(&f);
        assert!(verification
            .violations
            .iter()
            .any(|v| v.code == DiagnosticCode::PhiInvalidPredecessor));
    }
}

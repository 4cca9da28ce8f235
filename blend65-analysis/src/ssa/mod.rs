//! SSA construction over the IL.
//!
//! Minimal SSA: dominance-frontier φ placement followed by a renaming walk
//! over the dominator tree. Source variables are the named registers the
//! IL builder reuses across assignments; temporaries are already
//! single-assignment and pass through untouched.

pub mod verify;

use std::collections::{BTreeMap, BTreeSet};

use blend65_ir::{BlockId, Function, Instruction, Operand, RegId};
use hashbrown::HashMap;
use tracing::{debug_span, trace};

use crate::graph::{Dominators, FlowGraph};

pub use verify::{verify, SsaVerification, SsaViolation};

/// What construction did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SsaStats {
    /// φ instructions inserted.
    pub phis_inserted: usize,
    /// Source variables renamed.
    pub variables_renamed: usize,
}

/// Index-graph view of an IL function.
pub(crate) struct FunctionGraph<'a>(pub &'a Function);

impl FlowGraph for FunctionGraph<'_> {
    fn len(&self) -> usize {
        self.0.blocks.len()
    }
    fn entry(&self) -> usize {
        self.0.entry.map(|b| b.to_usize()).unwrap_or(0)
    }
    fn successors(&self, node: usize) -> Vec<usize> {
        self.0.blocks[node]
            .successors
            .iter()
            .map(|b| b.to_usize())
            .collect()
    }
    fn predecessors(&self, node: usize) -> Vec<usize> {
        self.0.blocks[node]
            .predecessors
            .iter()
            .map(|b| b.to_usize())
            .collect()
    }
}

/// Rewrite `function` into minimal SSA form.
pub fn construct(function: &mut Function) -> SsaStats {
    let span = debug_span!("ssa_construct", function = %function.name);
    let _guard = span.enter();

    if function.is_stub() {
        return SsaStats::default();
    }
    let entry = match function.entry {
        Some(entry) => entry,
        None => return SsaStats::default(),
    };

    // Variables: named registers. Parameters define theirs at entry.
    let variables: BTreeSet<RegId> = function
        .registers
        .iter()
        .filter(|r| r.name.is_some())
        .map(|r| r.id)
        .collect();
    let params: BTreeSet<RegId> = function.parameters.iter().map(|p| p.reg).collect();

    let mut def_blocks: BTreeMap<RegId, BTreeSet<BlockId>> = BTreeMap::new();
    for &param in &params {
        def_blocks.entry(param).or_default().insert(entry);
    }
    for block in &function.blocks {
        for instruction in &block.instructions {
            if let Some(dest) = instruction.dest {
                if variables.contains(&dest) {
                    def_blocks.entry(dest).or_default().insert(block.id);
                }
            }
        }
    }

    let graph = FunctionGraph(function);
    let dominators = Dominators::compute(&graph);
    let frontiers = dominators.frontiers(&graph);
    drop(graph);

    // Iterated dominance-frontier closure per variable.
    let mut phi_sites: BTreeMap<BlockId, Vec<RegId>> = BTreeMap::new();
    for (&var, blocks) in &def_blocks {
        let mut placed: BTreeSet<BlockId> = BTreeSet::new();
        let mut worklist: Vec<BlockId> = blocks.iter().copied().collect();
        while let Some(block) = worklist.pop() {
            for &frontier in &frontiers[block.to_usize()] {
                let frontier = BlockId(frontier as u32);
                if placed.insert(frontier) {
                    phi_sites.entry(frontier).or_default().push(var);
                    if !blocks.contains(&frontier) {
                        worklist.push(frontier);
                    }
                }
            }
        }
    }

    // Insert placeholder φs; destinations get real registers while
    // renaming. `phi_vars[block]` pairs with the φ prefix by position.
    let mut phis_inserted = 0;
    let mut phi_vars: HashMap<BlockId, Vec<RegId>> = HashMap::new();
    for (&block, vars) in &phi_sites {
        for &var in vars {
            let phi = Instruction::phi(var, Vec::new());
            function.block_mut(block).instructions.insert(0, phi);
            phis_inserted += 1;
        }
        // Insertion at the front reverses; keep positions aligned.
        phi_vars.insert(block, vars.iter().rev().copied().collect());
    }

    let mut renamer = Renamer {
        function,
        variables: &variables,
        phi_vars: &phi_vars,
        stacks: HashMap::new(),
        children: dominators.children(),
    };
    for &param in &params {
        renamer.stacks.entry(param).or_default().push(param);
    }
    renamer.rename_block(entry.to_usize());

    trace!(phis = phis_inserted, variables = variables.len(), "SSA built");
    SsaStats {
        phis_inserted,
        variables_renamed: variables.len(),
    }
}

struct Renamer<'a> {
    function: &'a mut Function,
    variables: &'a BTreeSet<RegId>,
    phi_vars: &'a HashMap<BlockId, Vec<RegId>>,
    /// Per-variable stack of current SSA names.
    stacks: HashMap<RegId, Vec<RegId>>,
    children: Vec<Vec<usize>>,
}

impl Renamer<'_> {
    fn current(&self, var: RegId) -> RegId {
        self.stacks
            .get(&var)
            .and_then(|stack| stack.last().copied())
            // Use before any definition: keep the original register; the
            // verifier reports it.
            .unwrap_or(var)
    }

    fn fresh_version(&mut self, var: RegId) -> RegId {
        let (ty, name) = {
            let r = self.function.register(var);
            (r.ty.clone(), r.name.clone())
        };
        let fresh = self.function.new_register(ty, name.as_deref());
        self.stacks.entry(var).or_default().push(fresh);
        fresh
    }

    fn rename_block(&mut self, block_index: usize) {
        let block_id = BlockId(block_index as u32);
        let mut pushed: Vec<RegId> = Vec::new();

        let phi_count = self
            .phi_vars
            .get(&block_id)
            .map(|v| v.len())
            .unwrap_or(0);
        for position in 0..self.function.block(block_id).instructions.len() {
            if position < phi_count {
                // φ prefix: only the destination is renamed here; operands
                // fill in from the predecessors' walks.
                let var = self.phi_vars[&block_id][position];
                let fresh = self.fresh_version(var);
                self.function.block_mut(block_id).instructions[position].dest = Some(fresh);
                pushed.push(var);
                continue;
            }
            // Ordinary instruction: sources first, then the destination.
            let mut instruction =
                self.function.block_mut(block_id).instructions[position].clone();
            for operand in &mut instruction.operands {
                if let Operand::Reg(reg) = operand {
                    if self.variables.contains(reg) {
                        *operand = Operand::Reg(self.current(*reg));
                    }
                }
            }
            if let Some(dest) = instruction.dest {
                if self.variables.contains(&dest) {
                    let fresh = self.fresh_version(dest);
                    instruction.dest = Some(fresh);
                    pushed.push(dest);
                }
            }
            self.function.block_mut(block_id).instructions[position] = instruction;
        }

        // Fill φ operands of successors for the edge from this block.
        let successors = self.function.block(block_id).successors.clone();
        for succ in successors {
            let Some(vars) = self.phi_vars.get(&succ) else {
                continue;
            };
            for (position, &var) in vars.clone().iter().enumerate() {
                // A variable with no definition on this path contributes an
                // undef value; minimal SSA still places the φ.
                let operand = match self.stacks.get(&var).and_then(|s| s.last().copied()) {
                    Some(name) => Operand::Reg(name),
                    None => Operand::Imm(0),
                };
                self.function.block_mut(succ).instructions[position]
                    .incoming
                    .push((block_id, operand));
            }
        }

        for child in self.children[block_index].clone() {
            self.rename_block(child);
        }

        for var in pushed.into_iter().rev() {
            if let Some(stack) = self.stacks.get_mut(&var) {
                stack.pop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blend65_ir::{IlType, Opcode};

    /// entry: cond, branch → (left: x=10) / (right: x=20) → merge: use x.
    fn diamond() -> Function {
        let mut f = Function::new("diamond", IlType::Byte);
        let entry = f.new_block("entry");
        let left = f.new_block("left");
        let right = f.new_block("right");
        let merge = f.new_block("merge");
        let cond = f.new_register(IlType::Bool, Some("cond"));
        let x = f.new_register(IlType::Byte, Some("x"));

        f.push(entry, Instruction::const_value(cond, 1));
        f.push(entry, Instruction::branch(Operand::Reg(cond), left, right));
        f.add_edge(entry, left);
        f.add_edge(entry, right);
        f.push(left, Instruction::const_value(x, 10));
        f.push(left, Instruction::jump(merge));
        f.add_edge(left, merge);
        f.push(right, Instruction::const_value(x, 20));
        f.push(right, Instruction::jump(merge));
        f.add_edge(right, merge);
        f.push(merge, Instruction::ret(Some(Operand::Reg(x))));
        f
    }

    #[test]
    fn diamond_gets_one_phi() {
        let mut f = diamond();
        let stats = construct(&mut f);
        assert_eq!(stats.phis_inserted, 1);
        let merge = f.blocks.iter().find(|b| b.label == "merge").unwrap();
        let phi = merge.instructions.first().expect("phi at block start");
        assert_eq!(phi.opcode, Opcode::Phi);
        assert_eq!(phi.incoming.len(), 2);
        // The return now uses the φ destination.
        let ret = merge.terminator().unwrap();
        assert_eq!(ret.operands.first().and_then(|o| o.reg()), phi.dest);
    }

    #[test]
    fn construction_verifies() {
        let mut f = diamond();
        construct(&mut f);
        let verification = verify(&f);
        assert!(verification.valid, "{:?}", verification.violations);
        assert_eq!(verification.phis_verified, 1);
    }

    #[test]
    fn single_assignment_after_construction() {
        let mut f = diamond();
        construct(&mut f);
        let mut defs: BTreeMap<RegId, usize> = BTreeMap::new();
        for block in &f.blocks {
            for instruction in &block.instructions {
                if let Some(dest) = instruction.dest {
                    *defs.entry(dest).or_default() += 1;
                }
            }
        }
        for (reg, count) in defs {
            assert_eq!(count, 1, "{reg} defined {count} times");
        }
    }

    #[test]
    fn straight_line_code_needs_no_phis() {
        let mut f = Function::new("straight", IlType::Void);
        let entry = f.new_block("entry");
        let x = f.new_register(IlType::Byte, Some("x"));
        f.push(entry, Instruction::const_value(x, 1));
        f.push(entry, Instruction::const_value(x, 2));
        f.push(entry, Instruction::ret(None));
        let stats = construct(&mut f);
        assert_eq!(stats.phis_inserted, 0);
        let verification = verify(&f);
        assert!(verification.valid, "{:?}", verification.violations);
    }

    #[test]
    fn loop_carried_variable_gets_a_header_phi() {
        // entry: i=0 → header: cmp/branch → body: i=i+1 → header; exit.
        let mut f = Function::new("count", IlType::Void);
        let entry = f.new_block("entry");
        let header = f.new_block("header");
        let body = f.new_block("body");
        let exit = f.new_block("exit");
        let i = f.new_register(IlType::Byte, Some("i"));
        let cond = f.new_register(IlType::Bool, None);

        f.push(entry, Instruction::const_value(i, 0));
        f.push(entry, Instruction::jump(header));
        f.add_edge(entry, header);
        f.push(
            header,
            Instruction::binary(Opcode::CmpLt, cond, Operand::Reg(i), Operand::Imm(10)),
        );
        f.push(header, Instruction::branch(Operand::Reg(cond), body, exit));
        f.add_edge(header, body);
        f.add_edge(header, exit);
        f.push(
            body,
            Instruction::binary(Opcode::Add, i, Operand::Reg(i), Operand::Imm(1)),
        );
        f.push(body, Instruction::jump(header));
        f.add_edge(body, header);
        f.push(exit, Instruction::ret(None));

        let stats = construct(&mut f);
        assert!(stats.phis_inserted >= 1);
        let header_block = f.blocks.iter().find(|b| b.label == "header").unwrap();
        assert!(header_block.instructions[0].is_phi());
        let verification = verify(&f);
        assert!(verification.valid, "{:?}", verification.violations);
    }
}

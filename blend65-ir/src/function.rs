//! IL functions: block and register arenas plus the graph edges.

use core::fmt;
use std::fmt::Write as _;

use crate::block::{BasicBlock, BlockId};
use crate::instruction::Instruction;
use crate::register::{RegId, VirtualRegister};
use crate::types::IlType;

/// One formal parameter of an IL function.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Parameter {
    /// Source name.
    pub name: String,
    /// Value type.
    pub ty: IlType,
    /// Register the parameter arrives in.
    pub reg: RegId,
}

/// One function in IL form.
///
/// Owns its blocks and registers; edges and operands refer by id, so the
/// cyclic flow graph needs no shared ownership. Stub functions (declared
/// without a body) have no blocks and `entry = None`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Function {
    /// Function name.
    pub name: String,
    /// Formal parameters.
    pub parameters: Vec<Parameter>,
    /// Return type.
    pub return_type: IlType,
    /// Entry block; `None` for stubs.
    pub entry: Option<BlockId>,
    /// Block arena.
    pub blocks: Vec<BasicBlock>,
    /// Register arena.
    pub registers: Vec<VirtualRegister>,
}

impl Function {
    /// Empty function (a stub until blocks are added).
    pub fn new(name: impl Into<String>, return_type: IlType) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
            return_type,
            entry: None,
            blocks: Vec::new(),
            registers: Vec::new(),
        }
    }

    /// True when declared without a body.
    pub fn is_stub(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Allocate a block.
    pub fn new_block(&mut self, label: impl Into<String>) -> BlockId {
        let id = BlockId(u32::try_from(self.blocks.len()).expect("block count exceeds u32"));
        self.blocks.push(BasicBlock::new(id, label));
        if self.entry.is_none() {
            self.entry = Some(id);
        }
        id
    }

    /// Allocate a register of `ty`, optionally named after a source
    /// variable.
    pub fn new_register(&mut self, ty: IlType, name: Option<&str>) -> RegId {
        let id = RegId(u32::try_from(self.registers.len()).expect("register count exceeds u32"));
        self.registers.push(VirtualRegister {
            id,
            ty,
            name: name.map(str::to_string),
        });
        id
    }

    /// Borrow a block.
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.to_usize()]
    }

    /// Mutably borrow a block.
    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.to_usize()]
    }

    /// Borrow a register.
    pub fn register(&self, id: RegId) -> &VirtualRegister {
        &self.registers[id.to_usize()]
    }

    /// Append `instruction` to `block`.
    pub fn push(&mut self, block: BlockId, instruction: Instruction) {
        self.block_mut(block).push(instruction);
    }

    /// Record a control-flow edge.
    pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
        if !self.block(from).successors.contains(&to) {
            self.block_mut(from).successors.push(to);
        }
        if !self.block(to).predecessors.contains(&from) {
            self.block_mut(to).predecessors.push(from);
        }
    }

    /// Blocks in allocation order.
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        (0..self.blocks.len()).map(|i| BlockId(i as u32))
    }

    /// Every instruction with its owning block, in block order.
    pub fn instructions(&self) -> impl Iterator<Item = (BlockId, &Instruction)> {
        self.blocks
            .iter()
            .flat_map(|b| b.instructions.iter().map(move |i| (b.id, i)))
    }

    /// Reverse post-order over reachable blocks from the entry.
    pub fn reverse_postorder(&self) -> Vec<BlockId> {
        let Some(entry) = self.entry else {
            return Vec::new();
        };
        let mut visited = vec![false; self.blocks.len()];
        let mut order = Vec::with_capacity(self.blocks.len());
        self.postorder_from(entry, &mut visited, &mut order);
        order.reverse();
        order
    }

    fn postorder_from(&self, block: BlockId, visited: &mut [bool], order: &mut Vec<BlockId>) {
        if visited[block.to_usize()] {
            return;
        }
        visited[block.to_usize()] = true;
        let successors = self.block(block).successors.clone();
        for succ in successors {
            self.postorder_from(succ, visited, order);
        }
        order.push(block);
    }

    /// GraphViz rendering of the flow graph, deterministic for golden
    /// tests.
    pub fn to_dot(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "digraph \"{}\" {{", self.name);
        for block in &self.blocks {
            let _ = writeln!(
                out,
                "  {} [shape=box,label=\"{} ({})\"];",
                block.id.to_usize(),
                block.label,
                block.id
            );
        }
        for block in &self.blocks {
            for succ in &block.successors {
                let _ = writeln!(out, "  {} -> {};", block.id.to_usize(), succ.to_usize());
            }
        }
        out.push_str("}\n");
        out
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn {}(", self.name)?;
        for (i, p) in self.parameters.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {} ({})", p.name, p.ty, p.reg)?;
        }
        writeln!(f, ") -> {} {{", self.return_type)?;
        if self.is_stub() {
            return writeln!(f, "  ; stub\n}}");
        }
        for block in &self.blocks {
            write!(f, "{} [{}]:", block.id, block.label)?;
            if !block.predecessors.is_empty() {
                write!(f, "  ; preds:")?;
                for p in &block.predecessors {
                    write!(f, " {p}")?;
                }
            }
            writeln!(f)?;
            for instruction in &block.instructions {
                writeln!(f, "  {instruction}")?;
            }
        }
        writeln!(f, "}}")
    }
}

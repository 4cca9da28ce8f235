//! Lowering: type-checked AST → three-address IL.
//!
//! One walker per function threads a *current block* and a register
//! factory. Expressions yield an [`Operand`]; statements yield nothing and
//! may split blocks. Loops keep their continue/break targets on a stack.
//! Mapped hardware turns into `map_*` instructions carrying the literal
//! base and offset in their metadata.

use blend65_ast::{
    Ast, DiagnosticSink, LiteralValue, NodeId, NodeKind, PassResult, StorageClass, UnaryOp,
};
use blend65_semantics::{
    const_eval, CallTarget, MemberRef, ModuleId, ModuleTypes, NodeRef, SymbolId, SymbolKind,
    SymbolTable, Type,
};
use hashbrown::{HashMap, HashSet};
use tracing::debug_span;

use crate::block::BlockId;
use crate::function::{Function, Parameter};
use crate::instruction::{Instruction, Operand};
use crate::meta::{AliasRegion, FrequencyBand, InstructionMeta};
use crate::module::{Global, ImportRecord, Module};
use crate::opcode::{intrinsic_def, IntrinsicFlags, Opcode};
use crate::register::RegId;
use crate::types::IlType;

/// Pass entry point: lower every module.
pub struct IlBuilder;

impl IlBuilder {
    /// Lower `asts` into one IL module per source module.
    pub fn build(
        asts: &[Ast],
        table: &SymbolTable,
        types: &[ModuleTypes],
    ) -> PassResult<Vec<Module>> {
        let span = debug_span!("il_builder");
        let _guard = span.enter();

        let sink = DiagnosticSink::default();
        let mut modules = Vec::with_capacity(asts.len());
        for (index, ast) in asts.iter().enumerate() {
            let module_id = ModuleId(index as u32);
            let module_types = &types[index];
            modules.push(lower_module(asts, ast, table, module_id, module_types));
        }
        tracing::debug!(modules = modules.len(), "IL built");
        PassResult::from_sink(modules, sink)
    }
}

fn lower_module(
    asts: &[Ast],
    ast: &Ast,
    table: &SymbolTable,
    module_id: ModuleId,
    types: &ModuleTypes,
) -> Module {
    let mut module = Module::new(table.module_path(module_id));
    let Some(root) = ast.root() else {
        return module;
    };
    let NodeKind::Program { declarations, .. } = ast.kind(root) else {
        return module;
    };

    for &decl in declarations {
        let (decl, exported) = match ast.kind(decl) {
            NodeKind::Export { declaration } => (*declaration, true),
            _ => (decl, false),
        };
        match ast.kind(decl) {
            NodeKind::Import { module_path, names } => {
                module.imports.push(ImportRecord {
                    module: module_path.join("."),
                    names: match names {
                        blend65_ast::ImportNames::Named(list) => list.clone(),
                        blend65_ast::ImportNames::Wildcard => Vec::new(),
                    },
                });
            }
            NodeKind::FunctionDecl { name, .. } => {
                let function = lower_function(asts, ast, table, module_id, types, decl);
                if exported {
                    module.exports.push(name.clone());
                }
                if name == "main" {
                    module.entry_point = Some(name.clone());
                }
                module.functions.insert(name.clone(), function);
            }
            NodeKind::VariableDecl {
                name,
                constant,
                initializer,
                storage,
                ..
            } => {
                let symbol = table
                    .declaration_at(module_id, decl)
                    .map(|id| table.symbol(id));
                let ty = symbol
                    .and_then(|s| s.ty.as_ref())
                    .map(IlType::from)
                    .unwrap_or(IlType::Byte);
                module.globals.insert(
                    name.clone(),
                    Global {
                        name: name.clone(),
                        ty,
                        storage: *storage,
                        address: symbol.and_then(|s| s.address),
                        initial_value: initializer.as_ref().and_then(|&init| const_eval(ast, init)),
                        exported,
                        constant: *constant,
                    },
                );
                if exported {
                    module.exports.push(name.clone());
                }
            }
            NodeKind::SimpleMapDecl { name, .. }
            | NodeKind::RangeMapDecl { name, .. }
            | NodeKind::SequentialStructMapDecl { name, .. }
            | NodeKind::ExplicitStructMapDecl { name, .. } => {
                let Some(symbol_id) = table.declaration_at(module_id, decl) else {
                    continue;
                };
                let symbol = table.symbol(symbol_id);
                let ty = match types.map_layouts.get(&symbol_id) {
                    Some(layout) => IlType::Array {
                        element: Box::new(IlType::Byte),
                        length: Some(u32::from(layout.size)),
                    },
                    None => symbol
                        .ty
                        .as_ref()
                        .map(IlType::from)
                        .unwrap_or(IlType::Byte),
                };
                module.globals.insert(
                    name.clone(),
                    Global {
                        name: name.clone(),
                        ty,
                        storage: StorageClass::Map,
                        address: symbol.address,
                        initial_value: None,
                        exported,
                        constant: false,
                    },
                );
                if exported {
                    module.exports.push(name.clone());
                }
            }
            _ => {}
        }
    }
    module
}

fn lower_function(
    asts: &[Ast],
    ast: &Ast,
    table: &SymbolTable,
    module_id: ModuleId,
    types: &ModuleTypes,
    decl: NodeId,
) -> Function {
    let NodeKind::FunctionDecl {
        name,
        parameters,
        body,
        ..
    } = ast.kind(decl)
    else {
        return Function::new("error", IlType::Void);
    };

    let symbol = table.declaration_at(module_id, decl).map(|id| table.symbol(id));
    let return_type = match symbol.and_then(|s| s.ty.clone()) {
        Some(Type::Function { ret, .. }) => IlType::from(ret.as_ref()),
        _ => IlType::Void,
    };
    let mut func = Function::new(name.clone(), return_type);

    let Some(body) = body else {
        // Stubs carry only a signature; no blocks are produced.
        for &param in parameters {
            if let NodeKind::Parameter { name, .. } = ast.kind(param) {
                let ty = table
                    .declaration_at(module_id, param)
                    .and_then(|id| table.symbol(id).ty.as_ref().map(IlType::from))
                    .unwrap_or(IlType::Byte);
                let reg = func.new_register(ty.clone(), Some(name));
                func.parameters.push(Parameter {
                    name: name.clone(),
                    ty,
                    reg,
                });
            }
        }
        return func;
    };

    let entry = func.new_block("entry");
    // Everything declared inside the body lives in a register; anything
    // else a function touches is memory or a link-time constant.
    let mut locals: HashSet<SymbolId> = HashSet::new();
    ast.walk(*body, &mut |n| {
        if matches!(n.kind, NodeKind::VariableDecl { .. }) {
            if let Some(symbol) = table.declaration_at(module_id, n.id) {
                locals.insert(symbol);
            }
        }
    });
    let mut lowering = FunctionLowering {
        asts,
        ast,
        table,
        module_id,
        types,
        func,
        current: Some(entry),
        vars: HashMap::new(),
        locals,
        loop_stack: Vec::new(),
    };
    for &param in parameters {
        lowering.declare_parameter(param);
    }
    lowering.lower_statement(*body);
    if lowering.current.is_some() {
        // Implicit return; a missing value on non-void paths is reported by
        // the control-flow pass.
        lowering.terminate(Instruction::ret(None), *body);
    }
    lowering.func
}

struct LoopBlocks {
    continue_target: BlockId,
    break_target: BlockId,
}

struct FunctionLowering<'a> {
    asts: &'a [Ast],
    ast: &'a Ast,
    table: &'a SymbolTable,
    module_id: ModuleId,
    types: &'a ModuleTypes,
    func: Function,
    current: Option<BlockId>,
    vars: HashMap<SymbolId, RegId>,
    locals: HashSet<SymbolId>,
    loop_stack: Vec<LoopBlocks>,
}

/// Where a named value lives at this use site.
enum Place {
    /// Function-local; modeled by a named virtual register.
    Register,
    /// Compile-time constant value.
    Constant(u32),
    /// Memory-mapped hardware at a fixed address.
    Hardware { address: u16, ty: IlType },
    /// Static memory whose address the linker assigns (module globals).
    Memory {
        name: String,
        address: Option<u16>,
        ty: IlType,
    },
    /// A function's code address; a link-time constant.
    FunctionAddress(String),
}

impl FunctionLowering<'_> {
    fn declare_parameter(&mut self, param: NodeId) {
        let NodeKind::Parameter { name, .. } = self.ast.kind(param) else {
            return;
        };
        let Some(symbol_id) = self.table.declaration_at(self.module_id, param) else {
            return;
        };
        let ty = self
            .table
            .symbol(symbol_id)
            .ty
            .as_ref()
            .map(IlType::from)
            .unwrap_or(IlType::Byte);
        let reg = self.func.new_register(ty.clone(), Some(name));
        self.vars.insert(symbol_id, reg);
        self.locals.insert(symbol_id);
        self.func.parameters.push(Parameter {
            name: name.clone(),
            ty,
            reg,
        });
    }

    fn meta_for(&self, node: NodeId) -> InstructionMeta {
        let depth = self.loop_stack.len() as u32;
        InstructionMeta {
            location: Some(self.ast.location(node).clone()),
            loop_depth: Some(depth),
            frequency: Some(FrequencyBand::from_loop_depth(depth)),
            ..InstructionMeta::default()
        }
    }

    /// Current insertion block, reviving a dead cursor with an unreachable
    /// continuation block (trailing statements after `return` land there).
    fn cursor(&mut self) -> BlockId {
        match self.current {
            Some(block) => block,
            None => {
                let block = self.func.new_block("dead");
                self.current = Some(block);
                block
            }
        }
    }

    fn emit(&mut self, instruction: Instruction, node: NodeId) {
        let meta_base = self.meta_for(node);
        let block = self.cursor();
        let mut instruction = instruction;
        // Lowering-specific fields survive; context fields come from here.
        instruction.meta.location = meta_base.location;
        instruction.meta.loop_depth = meta_base.loop_depth;
        instruction.meta.frequency = meta_base.frequency;
        self.func.push(block, instruction);
    }

    /// Emit a terminator, wire its edges, and close the current block.
    fn terminate(&mut self, instruction: Instruction, node: NodeId) {
        let targets = instruction.targets.clone();
        let block = self.cursor();
        self.emit(instruction, node);
        for target in targets {
            self.func.add_edge(block, target);
        }
        self.current = None;
    }

    fn var_reg(&mut self, symbol_id: SymbolId) -> RegId {
        if let Some(&reg) = self.vars.get(&symbol_id) {
            return reg;
        }
        let symbol = self.table.symbol(symbol_id);
        let ty = symbol.ty.as_ref().map(IlType::from).unwrap_or(IlType::Byte);
        let reg = self.func.new_register(ty, Some(&symbol.name));
        self.vars.insert(symbol_id, reg);
        reg
    }

    fn expr_type(&self, node: NodeId) -> IlType {
        IlType::from(&self.types.type_of(node))
    }

    fn resolved(&self, node: NodeId) -> Option<SymbolId> {
        self.table.resolution(NodeRef::new(self.module_id, node))
    }

    fn classify(&self, symbol_id: SymbolId) -> Place {
        let symbol = self.table.symbol(symbol_id);
        if symbol.kind == SymbolKind::Import {
            if let Some(target) = symbol.imported_from {
                return self.classify(target);
            }
        }
        let ty = symbol.ty.as_ref().map(IlType::from).unwrap_or(IlType::Byte);
        match symbol.kind {
            SymbolKind::Function => Place::FunctionAddress(symbol.name.clone()),
            _ => {
                if symbol.storage == StorageClass::Map {
                    if let Some(address) = symbol.address {
                        return Place::Hardware { address, ty };
                    }
                }
                if self.locals.contains(&symbol_id) {
                    // Scalars live in registers; arrays are memory even when
                    // declared locally.
                    if ty.is_scalar() {
                        return Place::Register;
                    }
                    return Place::Memory {
                        name: symbol.name.clone(),
                        address: symbol.address,
                        ty,
                    };
                }
                // Module-scope constant with a foldable initializer.
                if symbol.kind == SymbolKind::Constant {
                    if let (Some(decl), Some(init)) = (symbol.decl, symbol.initializer) {
                        if let Some(value) = const_eval(&self.asts[decl.module.to_usize()], init) {
                            return Place::Constant(value);
                        }
                    }
                }
                Place::Memory {
                    name: symbol.name.clone(),
                    address: symbol.address,
                    ty,
                }
            }
        }
    }

    // ---- statements ------------------------------------------------------

    fn lower_statement(&mut self, node: NodeId) {
        match self.ast.kind(node).clone() {
            NodeKind::Block { statements } => {
                for stmt in statements {
                    self.lower_statement(stmt);
                }
            }
            NodeKind::VariableDecl { initializer, .. } => {
                let Some(symbol_id) = self.table.declaration_at(self.module_id, node) else {
                    return;
                };
                let Some(init) = initializer else {
                    return;
                };
                if matches!(self.classify(symbol_id), Place::Register) {
                    let dest = self.var_reg(symbol_id);
                    self.eval_into(dest, init);
                } else {
                    // Memory-resident local; lower the initializer for its
                    // effects only, the data segment carries the value.
                    self.eval(init);
                }
            }
            NodeKind::ExpressionStmt { expression } => {
                self.eval(expression);
            }
            NodeKind::If {
                condition,
                then_branch,
                else_branch,
            } => self.lower_if(node, condition, then_branch, else_branch),
            NodeKind::While { condition, body } => self.lower_while(node, condition, body),
            NodeKind::DoWhile { body, condition } => self.lower_do_while(node, body, condition),
            NodeKind::For {
                init,
                condition,
                update,
                body,
            } => self.lower_for(node, init, condition, update, body),
            NodeKind::Match { scrutinee, arms } => self.lower_match(node, scrutinee, &arms),
            NodeKind::Return { value } => {
                let operand = value.map(|v| self.eval(v));
                self.terminate(Instruction::ret(operand), node);
            }
            NodeKind::Break => {
                if let Some(target) = self.loop_stack.last().map(|l| l.break_target) {
                    self.terminate(Instruction::jump(target), node);
                }
            }
            NodeKind::Continue => {
                if let Some(target) = self.loop_stack.last().map(|l| l.continue_target) {
                    self.terminate(Instruction::jump(target), node);
                }
            }
            NodeKind::Error => {}
            other if other.is_expression() => {
                self.eval(node);
            }
            _ => {}
        }
    }

    fn lower_if(
        &mut self,
        node: NodeId,
        condition: NodeId,
        then_branch: NodeId,
        else_branch: Option<NodeId>,
    ) {
        let cond = self.eval(condition);
        let then_block = self.func.new_block("if.then");
        let merge = self.func.new_block("if.merge");
        let else_block = else_branch.map(|_| self.func.new_block("if.else"));

        self.terminate(
            Instruction::branch(cond, then_block, else_block.unwrap_or(merge)),
            node,
        );

        self.current = Some(then_block);
        self.lower_statement(then_branch);
        if self.current.is_some() {
            self.terminate(Instruction::jump(merge), node);
        }

        if let (Some(else_block), Some(else_branch)) = (else_block, else_branch) {
            self.current = Some(else_block);
            self.lower_statement(else_branch);
            if self.current.is_some() {
                self.terminate(Instruction::jump(merge), node);
            }
        }
        self.current = Some(merge);
    }

    fn lower_while(&mut self, node: NodeId, condition: NodeId, body: NodeId) {
        let header = self.func.new_block("while.header");
        self.terminate(Instruction::jump(header), node);

        self.current = Some(header);
        let body_block = self.func.new_block("while.body");
        let exit = self.func.new_block("while.exit");
        // The guard re-runs every iteration, so it sits inside the loop
        // context; the loop may not run at all, hence the edge to exit.
        self.loop_stack.push(LoopBlocks {
            continue_target: header,
            break_target: exit,
        });
        let cond = self.eval(condition);
        self.terminate(Instruction::branch(cond, body_block, exit), node);

        self.current = Some(body_block);
        self.lower_statement(body);
        if self.current.is_some() {
            self.terminate(Instruction::jump(header), node);
        }
        self.loop_stack.pop();
        self.current = Some(exit);
    }

    fn lower_do_while(&mut self, node: NodeId, body: NodeId, condition: NodeId) {
        let body_block = self.func.new_block("do.body");
        let cond_block = self.func.new_block("do.cond");
        let exit = self.func.new_block("do.exit");
        self.terminate(Instruction::jump(body_block), node);

        self.loop_stack.push(LoopBlocks {
            continue_target: cond_block,
            break_target: exit,
        });
        self.current = Some(body_block);
        self.lower_statement(body);
        if self.current.is_some() {
            self.terminate(Instruction::jump(cond_block), node);
        }

        self.current = Some(cond_block);
        let cond = self.eval(condition);
        self.terminate(Instruction::branch(cond, body_block, exit), node);
        self.loop_stack.pop();
        self.current = Some(exit);
    }

    fn lower_for(
        &mut self,
        node: NodeId,
        init: Option<NodeId>,
        condition: Option<NodeId>,
        update: Option<NodeId>,
        body: NodeId,
    ) {
        if let Some(init) = init {
            self.lower_statement(init);
        }
        let header = self.func.new_block("for.header");
        self.terminate(Instruction::jump(header), node);

        self.current = Some(header);
        let body_block = self.func.new_block("for.body");
        let update_block = self.func.new_block("for.update");
        let exit = self.func.new_block("for.exit");
        self.loop_stack.push(LoopBlocks {
            continue_target: update_block,
            break_target: exit,
        });
        match condition {
            Some(condition) => {
                let cond = self.eval(condition);
                self.terminate(Instruction::branch(cond, body_block, exit), node);
            }
            None => self.terminate(Instruction::jump(body_block), node),
        }

        self.current = Some(body_block);
        self.lower_statement(body);
        if self.current.is_some() {
            self.terminate(Instruction::jump(update_block), node);
        }

        self.current = Some(update_block);
        if let Some(update) = update {
            self.lower_statement(update);
        }
        self.terminate(Instruction::jump(header), node);
        self.loop_stack.pop();
        self.current = Some(exit);
    }

    fn lower_match(&mut self, node: NodeId, scrutinee: NodeId, arms: &[blend65_ast::MatchArm]) {
        let scrutinee_op = self.eval(scrutinee);
        let merge = self.func.new_block("match.merge");
        for arm in arms {
            match arm.pattern {
                Some(pattern) => {
                    let pattern_op = self.eval(pattern);
                    let cmp = self.func.new_register(IlType::Bool, None);
                    self.emit(
                        Instruction::binary(Opcode::CmpEq, cmp, scrutinee_op, pattern_op),
                        pattern,
                    );
                    let arm_block = self.func.new_block("match.arm");
                    let next = self.func.new_block("match.next");
                    self.terminate(
                        Instruction::branch(Operand::Reg(cmp), arm_block, next),
                        node,
                    );
                    self.current = Some(arm_block);
                    self.lower_statement(arm.body);
                    if self.current.is_some() {
                        self.terminate(Instruction::jump(merge), node);
                    }
                    self.current = Some(next);
                }
                None => {
                    // Default arm runs on the fall-through path.
                    self.lower_statement(arm.body);
                }
            }
        }
        if self.current.is_some() {
            self.terminate(Instruction::jump(merge), node);
        }
        self.current = Some(merge);
    }

    // ---- expressions -----------------------------------------------------

    /// Lower `node` into a fresh operand.
    fn eval(&mut self, node: NodeId) -> Operand {
        match self.ast.kind(node).clone() {
            NodeKind::Literal(LiteralValue::Number(n)) => Operand::Imm(n),
            NodeKind::Literal(LiteralValue::Bool(b)) => Operand::Imm(u32::from(b)),
            NodeKind::Literal(LiteralValue::Str(_)) => Operand::Imm(0),
            NodeKind::Identifier(_) => match self.resolved(node) {
                Some(symbol_id) => match self.classify(symbol_id) {
                    Place::Register => Operand::Reg(self.var_reg(symbol_id)),
                    Place::Constant(value) => Operand::Imm(value),
                    // Reads of a mapped cell go to the hardware every time.
                    Place::Hardware { address, ty } => {
                        let dest = self.func.new_register(ty, None);
                        let mut instruction = Instruction::map_load_field(dest, address, 0);
                        instruction.meta.alias_region = Some(AliasRegion::MappedHardware);
                        self.emit(instruction, node);
                        Operand::Reg(dest)
                    }
                    Place::Memory { name, address, ty } => {
                        let dest = self.func.new_register(ty, None);
                        let mut instruction =
                            Instruction::map_load_field(dest, address.unwrap_or(0), 0);
                        instruction.meta.alias_region = Some(AliasRegion::Regular);
                        instruction.meta.map_symbol = Some(name);
                        self.emit(instruction, node);
                        Operand::Reg(dest)
                    }
                    Place::FunctionAddress(name) => {
                        let dest = self.func.new_register(IlType::Word, None);
                        let mut instruction = Instruction::const_value(dest, 0);
                        instruction.meta.map_symbol = Some(name);
                        self.emit(instruction, node);
                        Operand::Reg(dest)
                    }
                },
                None => Operand::Imm(0),
            },
            NodeKind::Member { .. } => self.eval_member(node),
            NodeKind::Index { base, index } => self.eval_index(node, base, index),
            NodeKind::Binary { op, lhs, rhs } => {
                let dest = self.func.new_register(self.expr_type(node), None);
                self.lower_binary(dest, node, op, lhs, rhs);
                Operand::Reg(dest)
            }
            NodeKind::Unary { op, operand } => {
                let dest = self.func.new_register(self.expr_type(node), None);
                self.lower_unary(dest, node, op, operand);
                Operand::Reg(dest)
            }
            NodeKind::Assignment { target, value } => self.lower_assignment(node, target, value),
            NodeKind::Call { .. } => {
                let dest_ty = self.expr_type(node);
                let dest = match dest_ty {
                    IlType::Void => None,
                    ty => Some(self.func.new_register(ty, None)),
                };
                self.lower_call(dest, node);
                dest.map(Operand::Reg).unwrap_or(Operand::Imm(0))
            }
            NodeKind::Error => Operand::Imm(0),
            _ => Operand::Imm(0),
        }
    }

    /// Lower `node`, steering the result into `dest`.
    fn eval_into(&mut self, dest: RegId, node: NodeId) {
        match self.ast.kind(node).clone() {
            NodeKind::Literal(LiteralValue::Number(n)) => {
                self.emit(Instruction::const_value(dest, n), node);
            }
            NodeKind::Literal(LiteralValue::Bool(b)) => {
                self.emit(Instruction::const_value(dest, u32::from(b)), node);
            }
            NodeKind::Binary { op, lhs, rhs } => self.lower_binary(dest, node, op, lhs, rhs),
            NodeKind::Unary { op, operand } => self.lower_unary(dest, node, op, operand),
            NodeKind::Call { .. } => self.lower_call(Some(dest), node),
            _ => {
                let value = self.eval(node);
                self.emit(Instruction::copy(dest, value), node);
            }
        }
    }

    fn lower_binary(
        &mut self,
        dest: RegId,
        node: NodeId,
        op: blend65_ast::BinaryOp,
        lhs: NodeId,
        rhs: NodeId,
    ) {
        use blend65_ast::BinaryOp as B;
        let lhs_op = self.eval(lhs);
        let rhs_op = self.eval(rhs);
        let opcode = match op {
            B::Add => Opcode::Add,
            B::Sub => Opcode::Sub,
            B::Mul => Opcode::Mul,
            B::Div => Opcode::Div,
            B::Mod => Opcode::Mod,
            B::BitAnd | B::LogicalAnd => Opcode::And,
            B::BitOr | B::LogicalOr => Opcode::Or,
            B::BitXor => Opcode::Xor,
            B::Shl => Opcode::Shl,
            B::Shr => Opcode::Shr,
            B::Eq => Opcode::CmpEq,
            B::Ne => Opcode::CmpNe,
            B::Lt => Opcode::CmpLt,
            B::Le => Opcode::CmpLe,
            B::Gt => Opcode::CmpGt,
            B::Ge => Opcode::CmpGe,
        };
        self.emit(Instruction::binary(opcode, dest, lhs_op, rhs_op), node);
    }

    fn lower_unary(
        &mut self,
        dest: RegId,
        node: NodeId,
        op: UnaryOp,
        operand: NodeId,
    ) {
        match op {
            UnaryOp::AddressOf => {
                // No address-of opcode exists: the address is a link-time
                // constant, so lower to a symbol-relocated Const.
                let mut instruction = Instruction::const_value(dest, 0);
                if let Some(symbol_id) = self.resolved(operand) {
                    instruction.meta.map_symbol =
                        Some(self.table.symbol(symbol_id).name.clone());
                }
                self.emit(instruction, node);
            }
            UnaryOp::Neg | UnaryOp::Not | UnaryOp::BitNot => {
                let src = self.eval(operand);
                let opcode = match op {
                    UnaryOp::Neg => Opcode::Neg,
                    UnaryOp::Not => Opcode::Not,
                    _ => Opcode::BitNot,
                };
                self.emit(Instruction::unary(opcode, dest, src), node);
            }
        }
    }

    fn lower_assignment(&mut self, node: NodeId, target: NodeId, value: NodeId) -> Operand {
        match self.ast.kind(target).clone() {
            NodeKind::Identifier(_) => {
                let Some(symbol_id) = self.resolved(target) else {
                    return Operand::Imm(0);
                };
                match self.classify(symbol_id) {
                    Place::Hardware { address, .. } => {
                        let value_op = self.eval(value);
                        let mut instruction = Instruction::map_store_field(address, 0, value_op);
                        instruction.meta.alias_region = Some(AliasRegion::MappedHardware);
                        self.emit(instruction, node);
                        value_op
                    }
                    Place::Memory { name, address, .. } => {
                        let value_op = self.eval(value);
                        let mut instruction =
                            Instruction::map_store_field(address.unwrap_or(0), 0, value_op);
                        instruction.meta.alias_region = Some(AliasRegion::Regular);
                        instruction.meta.map_symbol = Some(name);
                        self.emit(instruction, node);
                        value_op
                    }
                    // Assignments to constants or functions were rejected by
                    // the checker; lower the value for its effects.
                    Place::Constant(_) | Place::FunctionAddress(_) => self.eval(value),
                    Place::Register => {
                        let dest = self.var_reg(symbol_id);
                        self.eval_into(dest, value);
                        Operand::Reg(dest)
                    }
                }
            }
            NodeKind::Member { .. } => {
                let value_op = self.eval(value);
                if let Some(MemberRef::MapField { symbol, offset, .. }) = self
                    .types
                    .member_refs
                    .get(&target)
                    .cloned()
                {
                    let base = self.table.symbol(symbol).address.unwrap_or(0);
                    let mut instruction = Instruction::map_store_field(base, offset, value_op);
                    instruction.meta.alias_region = Some(AliasRegion::MappedHardware);
                    self.emit(instruction, node);
                }
                value_op
            }
            NodeKind::Index { base, index } => {
                let value_op = self.eval(value);
                let index_op = self.eval(index);
                if let Some(symbol_id) = self.resolved(base) {
                    let symbol = self.table.symbol(symbol_id);
                    let len = symbol
                        .ty
                        .as_ref()
                        .map(|t| t.size_in_bytes().min(u32::from(u16::MAX)) as u16)
                        .unwrap_or(0);
                    let mut instruction = Instruction::map_store_range(
                        symbol.address.unwrap_or(0),
                        len,
                        index_op,
                        value_op,
                    );
                    if symbol.storage == StorageClass::Map {
                        instruction.meta.alias_region = Some(AliasRegion::MappedHardware);
                    } else {
                        // Static array; the base resolves at link time.
                        instruction.meta.alias_region = Some(AliasRegion::Regular);
                        instruction.meta.map_symbol = Some(symbol.name.clone());
                    }
                    self.emit(instruction, node);
                }
                value_op
            }
            _ => self.eval(value),
        }
    }

    fn eval_member(&mut self, node: NodeId) -> Operand {
        match self.types.member_refs.get(&node).cloned() {
            Some(MemberRef::EnumValue { value, .. }) => Operand::Imm(u32::from(value)),
            Some(MemberRef::MapField { symbol, offset, ty, .. }) => {
                let base = self.table.symbol(symbol).address.unwrap_or(0);
                let dest = self.func.new_register(IlType::from(&ty), None);
                let mut instruction = Instruction::map_load_field(dest, base, offset);
                instruction.meta.alias_region = Some(AliasRegion::MappedHardware);
                self.emit(instruction, node);
                Operand::Reg(dest)
            }
            None => Operand::Imm(0),
        }
    }

    fn eval_index(&mut self, node: NodeId, base: NodeId, index: NodeId) -> Operand {
        let index_op = self.eval(index);
        let Some(symbol_id) = self.resolved(base) else {
            return Operand::Imm(0);
        };
        let symbol = self.table.symbol(symbol_id);
        let len = symbol
            .ty
            .as_ref()
            .map(|t| t.size_in_bytes().min(u32::from(u16::MAX)) as u16)
            .unwrap_or(0);
        let dest = self.func.new_register(self.expr_type(node), None);
        let mut instruction =
            Instruction::map_load_range(dest, symbol.address.unwrap_or(0), len, index_op);
        if symbol.storage == StorageClass::Map {
            instruction.meta.alias_region = Some(AliasRegion::MappedHardware);
        } else {
            instruction.meta.alias_region = Some(AliasRegion::Regular);
            instruction.meta.map_symbol = Some(symbol.name.clone());
        }
        self.emit(instruction, node);
        Operand::Reg(dest)
    }

    fn lower_call(&mut self, dest: Option<RegId>, node: NodeId) {
        let NodeKind::Call { callee, arguments } = self.ast.kind(node).clone() else {
            return;
        };
        match self.types.call_targets.get(&node).cloned() {
            Some(CallTarget::Intrinsic(name)) => {
                self.lower_intrinsic(dest, node, &name, &arguments);
            }
            Some(CallTarget::Function(symbol_id)) => {
                let args: Vec<Operand> = arguments.iter().map(|&a| self.eval(a)).collect();
                let name = self.table.symbol(symbol_id).name.clone();
                self.emit(Instruction::call(dest, name, args), node);
            }
            None => {
                // Unresolved callee; keep the call by source name so later
                // passes see the side effect.
                let args: Vec<Operand> = arguments.iter().map(|&a| self.eval(a)).collect();
                let name = match self.ast.kind(callee) {
                    NodeKind::Identifier(name) => name.clone(),
                    _ => "indirect".to_string(),
                };
                self.emit(Instruction::call(dest, name, args), node);
            }
        }
    }

    fn lower_intrinsic(
        &mut self,
        dest: Option<RegId>,
        node: NodeId,
        name: &str,
        arguments: &[NodeId],
    ) {
        match name {
            "lo" | "hi" => {
                let src = arguments.first().map(|&a| self.eval(a)).unwrap_or(Operand::Imm(0));
                let dest = dest.unwrap_or_else(|| self.func.new_register(IlType::Byte, None));
                let opcode = if name == "lo" { Opcode::Lo } else { Opcode::Hi };
                self.emit(Instruction::unary(opcode, dest, src), node);
            }
            "sizeof" => {
                let size = arguments
                    .first()
                    .and_then(|&a| self.annotation_size(a))
                    .unwrap_or(0);
                let dest = dest.unwrap_or_else(|| self.func.new_register(IlType::Word, None));
                self.emit(Instruction::const_value(dest, size), node);
            }
            _ => {
                let args: Vec<Operand> = arguments.iter().map(|&a| self.eval(a)).collect();
                let mut instruction = Instruction::intrinsic(dest, name, args);
                if let Some(def) = intrinsic_def(name) {
                    instruction.meta.cycle_estimate = def.cycle_count;
                    if def.flags.contains(IntrinsicFlags::VOLATILE) {
                        instruction.meta.alias_region = Some(AliasRegion::Volatile);
                    }
                    if def.flags.contains(IntrinsicFlags::BARRIER) {
                        instruction.meta.raster_critical = true;
                    }
                }
                self.emit(instruction, node);
            }
        }
    }

    /// Size of the type named by a `sizeof` argument.
    fn annotation_size(&self, node: NodeId) -> Option<u32> {
        let NodeKind::Identifier(name) = self.ast.kind(node) else {
            return None;
        };
        match name.as_str() {
            "byte" | "bool" => Some(1),
            "word" => Some(2),
            _ => self
                .resolved(node)
                .and_then(|id| self.table.symbol(id).ty.as_ref())
                .map(Type::size_in_bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blend65_ast::{AstBuilder, BinaryOp, TypeAnnotation};
    use blend65_semantics::{SymbolTableBuilder, TypeChecker, TypeResolver};

    fn lower(asts: Vec<Ast>) -> Vec<Module> {
        let built = SymbolTableBuilder::build(&asts);
        assert!(built.success, "{:?}", built.diagnostics);
        let mut table = built.data;
        let resolved = TypeResolver::run(&asts, &mut table);
        assert!(resolved.success, "{:?}", resolved.diagnostics);
        let checked = TypeChecker::run(&asts, &mut table);
        assert!(checked.success, "{:?}", checked.diagnostics);
        let result = IlBuilder::build(&asts, &table, &checked.data);
        assert!(result.success, "{:?}", result.diagnostics);
        result.data
    }

    fn counter_loop() -> Vec<Ast> {
        // let i: byte = 0; while i < 10 { i = i + 1; }
        let mut b = AstBuilder::new("main.b65");
        let module = b.module(&["main"]);
        let zero = b.number(0);
        let decl = b.let_decl("i", Some(TypeAnnotation::named("byte")), Some(zero));
        let i1 = b.ident("i");
        let ten = b.number(10);
        let cond = b.binary(BinaryOp::Lt, i1, ten);
        let i2 = b.ident("i");
        let one = b.number(1);
        let inc = b.binary(BinaryOp::Add, i2, one);
        let assign = b.assign_stmt("i", inc);
        let body = b.block(vec![assign]);
        let while_stmt = b.while_stmt(cond, body);
        let fn_body = b.block(vec![decl, while_stmt]);
        let f = b.function("count", vec![], None, Some(fn_body));
        b.program(Some(module), vec![f]);
        vec![b.finish()]
    }

    #[test]
    fn while_loop_has_header_body_exit() {
        let modules = lower(counter_loop());
        let func = modules[0].function("count").expect("function");
        let labels: Vec<&str> = func.blocks.iter().map(|b| b.label.as_str()).collect();
        assert!(labels.contains(&"while.header"));
        assert!(labels.contains(&"while.body"));
        assert!(labels.contains(&"while.exit"));
        // Back edge: body → header.
        let header = func.blocks.iter().find(|b| b.label == "while.header").unwrap();
        let body = func.blocks.iter().find(|b| b.label == "while.body").unwrap();
        assert!(body.successors.contains(&header.id));
        assert!(header.predecessors.contains(&body.id));
    }

    #[test]
    fn every_block_ends_in_one_terminator() {
        let modules = lower(counter_loop());
        let func = modules[0].function("count").expect("function");
        for block in &func.blocks {
            assert!(block.is_terminated(), "{} is unterminated", block.label);
            let terminators = block
                .instructions
                .iter()
                .filter(|i| i.is_terminator())
                .count();
            assert_eq!(terminators, 1, "{} has {terminators} terminators", block.label);
        }
    }

    #[test]
    fn named_registers_model_source_variables() {
        let modules = lower(counter_loop());
        let func = modules[0].function("count").expect("function");
        assert!(func
            .registers
            .iter()
            .any(|r| r.name.as_deref() == Some("i") && r.ty == IlType::Byte));
    }

    #[test]
    fn map_field_store_carries_base_and_offset() {
        let mut b = AstBuilder::new("main.b65");
        let module = b.module(&["main"]);
        let addr = b.number(0xD020);
        let map = b.simple_map("border", TypeAnnotation::named("byte"), addr);
        // border is a simple cell: assign through the identifier, which the
        // checker types as byte; stores go through the variable register.
        let one = b.number(1);
        let assign = b.assign_stmt("border", one);
        let body = b.block(vec![assign]);
        let f = b.function("flash", vec![], None, Some(body));
        b.program(Some(module), vec![map, f]);
        let modules = lower(vec![b.finish()]);
        assert_eq!(modules[0].globals["border"].address, Some(0xD020));
        let func = modules[0].function("flash").expect("function");
        let store = func
            .instructions()
            .find(|(_, i)| i.opcode == Opcode::MapStoreField)
            .map(|(_, i)| i.clone())
            .expect("store to hardware");
        assert_eq!(store.meta.map_base, Some(0xD020));
        assert_eq!(store.meta.map_offset, Some(0));
        assert_eq!(store.meta.alias_region, Some(AliasRegion::MappedHardware));
    }

    #[test]
    fn stub_function_produces_no_blocks() {
        let mut b = AstBuilder::new("main.b65");
        let module = b.module(&["main"]);
        let p = b.parameter("n", TypeAnnotation::named("byte"));
        let stub = b.function("external", vec![p], Some(TypeAnnotation::named("byte")), None);
        b.program(Some(module), vec![stub]);
        let modules = lower(vec![b.finish()]);
        let func = modules[0].function("external").expect("stub recorded");
        assert!(func.is_stub());
        assert_eq!(func.parameters.len(), 1);
        assert_eq!(func.entry, None);
    }

    #[test]
    fn lo_intrinsic_lowers_to_byte_extract() {
        let mut b = AstBuilder::new("main.b65");
        let module = b.module(&["main"]);
        let big = b.number(0x1234);
        let w = b.let_decl("w", Some(TypeAnnotation::named("word")), Some(big));
        let lo = b.ident("lo");
        let wr = b.ident("w");
        let call = b.call(lo, vec![wr]);
        let l = b.let_decl("l", Some(TypeAnnotation::named("byte")), Some(call));
        let body = b.block(vec![w, l]);
        let f = b.function("split", vec![], None, Some(body));
        b.program(Some(module), vec![f]);
        let modules = lower(vec![b.finish()]);
        let func = modules[0].function("split").expect("function");
        let lo_instr = func
            .instructions()
            .find(|(_, i)| i.opcode == Opcode::Lo)
            .map(|(_, i)| i.clone())
            .expect("lo instruction");
        let dest = lo_instr.dest.expect("destination");
        assert_eq!(func.register(dest).ty, IlType::Byte);
    }
}

//! Global value numbering over one function body.
//!
//! Expressions hash to canonical strings over their opcode and operand
//! value numbers; commutative operators sort operand hashes first, so
//! `a + b` and `b + a` agree. Branch arms are numbered independently and
//! re-merged conservatively; loop bodies freshen every variable they
//! assign. Expressions whose hash is already bound are flagged redundant
//! with the variable that holds the value.

use std::collections::BTreeMap;

use blend65_ast::{Ast, LiteralValue, NodeId, NodeKind};
use blend65_semantics::{ModuleId, NodeRef, SymbolId, SymbolTable};
use hashbrown::HashMap;

/// Value-numbering results for one function.
#[derive(Debug, Default, Clone)]
pub struct GvnResult {
    /// Value number of every numbered expression node.
    pub value_numbers: HashMap<NodeId, u32>,
    /// Redundant expression → name of the variable holding the value.
    pub redundant: HashMap<NodeId, String>,
}

struct Gvn<'a> {
    ast: &'a Ast,
    table: &'a SymbolTable,
    module: ModuleId,
    next: u32,
    /// Current value number of each variable.
    var_numbers: BTreeMap<SymbolId, u32>,
    /// Canonical hash → (value number, variable holding it).
    expressions: BTreeMap<String, (u32, Option<String>)>,
    out: GvnResult,
}

/// Run GVN over the body of the function declared at `function`.
pub fn analyze(
    ast: &Ast,
    table: &SymbolTable,
    module: ModuleId,
    function: NodeId,
) -> GvnResult {
    let NodeKind::FunctionDecl { body: Some(body), .. } = ast.kind(function) else {
        return GvnResult::default();
    };
    let mut gvn = Gvn {
        ast,
        table,
        module,
        next: 0,
        var_numbers: BTreeMap::new(),
        expressions: BTreeMap::new(),
        out: GvnResult::default(),
    };
    gvn.visit_statement(*body);
    gvn.out
}

impl Gvn<'_> {
    fn fresh(&mut self) -> u32 {
        let n = self.next;
        self.next += 1;
        n
    }

    fn var_number(&mut self, symbol: SymbolId) -> u32 {
        if let Some(&n) = self.var_numbers.get(&symbol) {
            return n;
        }
        let n = self.fresh();
        self.var_numbers.insert(symbol, n);
        n
    }

    fn visit_statement(&mut self, node: NodeId) {
        match self.ast.kind(node).clone() {
            NodeKind::Block { statements } => {
                for stmt in statements {
                    self.visit_statement(stmt);
                }
            }
            NodeKind::VariableDecl { initializer, .. } => {
                let Some(symbol) = self.table.declaration_at(self.module, node) else {
                    return;
                };
                if let Some(init) = initializer {
                    let (vn, hash) = self.number_expr(init);
                    self.assign(symbol, vn, Some(hash));
                }
            }
            NodeKind::ExpressionStmt { expression } => {
                self.number_expr(expression);
            }
            NodeKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.number_expr(condition);
                // Each arm numbers independently; the merge keeps only what
                // both arms agree on.
                let saved_vars = self.var_numbers.clone();
                let saved_exprs = self.expressions.clone();

                self.visit_statement(then_branch);
                let then_vars = std::mem::replace(&mut self.var_numbers, saved_vars.clone());
                let then_exprs = std::mem::replace(&mut self.expressions, saved_exprs.clone());

                if let Some(else_branch) = else_branch {
                    self.visit_statement(else_branch);
                }
                let else_vars = std::mem::take(&mut self.var_numbers);
                let else_exprs = std::mem::take(&mut self.expressions);

                self.var_numbers = merge_maps(then_vars, else_vars, || self.next_and_bump());
                self.expressions = intersect_exprs(then_exprs, else_exprs);
            }
            NodeKind::While { condition, body }
            | NodeKind::DoWhile { body, condition } => {
                // Anything the body assigns differs across iterations.
                self.freshen_assigned(body);
                self.number_expr(condition);
                self.visit_statement(body);
                self.freshen_assigned(body);
            }
            NodeKind::For {
                init,
                condition,
                update,
                body,
            } => {
                if let Some(init) = init {
                    self.visit_statement(init);
                }
                self.freshen_assigned(body);
                if let Some(update) = update {
                    self.freshen_assigned(update);
                }
                if let Some(condition) = condition {
                    self.number_expr(condition);
                }
                self.visit_statement(body);
                if let Some(update) = update {
                    self.visit_statement(update);
                }
                self.freshen_assigned(body);
            }
            NodeKind::Match { scrutinee, arms } => {
                self.number_expr(scrutinee);
                let saved_vars = self.var_numbers.clone();
                let saved_exprs = self.expressions.clone();
                for arm in arms {
                    self.var_numbers = saved_vars.clone();
                    self.expressions = saved_exprs.clone();
                    self.visit_statement(arm.body);
                }
                // Conservative join: drop everything the arms touched.
                self.var_numbers = saved_vars;
                self.expressions = saved_exprs;
                self.freshen_assigned(node);
            }
            NodeKind::Return { value } => {
                if let Some(value) = value {
                    self.number_expr(value);
                }
            }
            kind if kind.is_expression() => {
                self.number_expr(node);
            }
            _ => {}
        }
    }

    fn next_and_bump(&mut self) -> u32 {
        self.fresh()
    }

    /// Give fresh numbers to every variable assigned under `node`.
    fn freshen_assigned(&mut self, node: NodeId) {
        let mut assigned = Vec::new();
        collect_assigned(self.ast, self.table, self.module, node, &mut assigned);
        for symbol in assigned {
            let fresh = self.fresh();
            let old = self.var_numbers.insert(symbol, fresh);
            if let Some(old) = old {
                self.invalidate(old);
            }
        }
    }

    /// Record an assignment: variable takes the value number, table entries
    /// mentioning the old number die, and the value hash learns its holder.
    fn assign(&mut self, symbol: SymbolId, vn: u32, hash: Option<String>) {
        if let Some(&old) = self.var_numbers.get(&symbol) {
            self.invalidate(old);
        }
        self.var_numbers.insert(symbol, vn);
        if let Some(hash) = hash {
            if let Some(entry) = self.expressions.get_mut(&hash) {
                if entry.1.is_none() {
                    entry.1 = Some(self.table.symbol(symbol).name.clone());
                }
            }
        }
    }

    fn invalidate(&mut self, value_number: u32) {
        let token = format!("v{value_number}");
        self.expressions
            .retain(|hash, _| !hash_mentions(hash, &token));
    }

    /// Number one expression; returns `(value number, canonical hash)`.
    fn number_expr(&mut self, node: NodeId) -> (u32, String) {
        let (vn, hash) = match self.ast.kind(node).clone() {
            NodeKind::Literal(LiteralValue::Number(n)) => {
                self.lookup_or_insert(format!("lit:num:{n}"))
            }
            NodeKind::Literal(LiteralValue::Bool(b)) => {
                self.lookup_or_insert(format!("lit:bool:{b}"))
            }
            NodeKind::Literal(LiteralValue::Str(s)) => {
                self.lookup_or_insert(format!("lit:str:{s}"))
            }
            NodeKind::Identifier(_) => {
                match self
                    .table
                    .resolution(NodeRef::new(self.module, node))
                {
                    Some(symbol) => {
                        let vn = self.var_number(symbol);
                        (vn, format!("v{vn}"))
                    }
                    None => {
                        let vn = self.fresh();
                        (vn, format!("v{vn}"))
                    }
                }
            }
            NodeKind::Binary { op, lhs, rhs } => {
                let (_, lh) = self.number_expr(lhs);
                let (_, rh) = self.number_expr(rhs);
                let (a, b) = if op.is_commutative() && rh < lh {
                    (rh, lh)
                } else {
                    (lh, rh)
                };
                let hash = format!("{op}({a},{b})");
                let (vn, hash) = self.lookup_or_insert(hash);
                if let Some((_, Some(holder))) = self.expressions.get(&hash) {
                    self.out.redundant.insert(node, holder.clone());
                }
                (vn, hash)
            }
            NodeKind::Unary { op, operand } => {
                let (_, oh) = self.number_expr(operand);
                let hash = format!("{op}({oh})");
                let (vn, hash) = self.lookup_or_insert(hash);
                if let Some((_, Some(holder))) = self.expressions.get(&hash) {
                    self.out.redundant.insert(node, holder.clone());
                }
                (vn, hash)
            }
            NodeKind::Assignment { target, value } => {
                let (vn, hash) = self.number_expr(value);
                if let NodeKind::Identifier(_) = self.ast.kind(target) {
                    if let Some(symbol) =
                        self.table.resolution(NodeRef::new(self.module, target))
                    {
                        self.assign(symbol, vn, Some(hash.clone()));
                    }
                }
                (vn, hash)
            }
            NodeKind::Call { arguments, .. } => {
                for arg in arguments {
                    self.number_expr(arg);
                }
                // Calls are opaque: a unique number every time.
                let vn = self.fresh();
                (vn, format!("call:{vn}"))
            }
            NodeKind::Index { index, .. } => {
                self.number_expr(index);
                let vn = self.fresh();
                (vn, format!("idx:{vn}"))
            }
            NodeKind::Member { .. } => {
                let vn = self.fresh();
                (vn, format!("mem:{vn}"))
            }
            _ => {
                let vn = self.fresh();
                (vn, format!("opaque:{vn}"))
            }
        };
        self.out.value_numbers.insert(node, vn);
        (vn, hash)
    }

    fn lookup_or_insert(&mut self, hash: String) -> (u32, String) {
        if let Some(&(vn, _)) = self.expressions.get(&hash) {
            return (vn, hash);
        }
        let vn = self.fresh();
        self.expressions.insert(hash.clone(), (vn, None));
        (vn, hash)
    }
}

/// Token-aware containment: `v1` must not match inside `v12`.
fn hash_mentions(hash: &str, token: &str) -> bool {
    let bytes = hash.as_bytes();
    let mut from = 0;
    while let Some(at) = hash[from..].find(token) {
        let start = from + at;
        let end = start + token.len();
        let boundary_after = end >= bytes.len() || !bytes[end].is_ascii_digit();
        if boundary_after {
            return true;
        }
        from = start + 1;
    }
    false
}

fn merge_maps(
    a: BTreeMap<SymbolId, u32>,
    b: BTreeMap<SymbolId, u32>,
    mut fresh: impl FnMut() -> u32,
) -> BTreeMap<SymbolId, u32> {
    let mut out = BTreeMap::new();
    for (symbol, vn) in &a {
        match b.get(symbol) {
            Some(other) if other == vn => {
                out.insert(*symbol, *vn);
            }
            Some(_) => {
                // Arms disagree: the merge sees a new value.
                out.insert(*symbol, fresh());
            }
            None => {
                out.insert(*symbol, *vn);
            }
        }
    }
    for (symbol, vn) in b {
        out.entry(symbol).or_insert(vn);
    }
    out
}

fn intersect_exprs(
    a: BTreeMap<String, (u32, Option<String>)>,
    b: BTreeMap<String, (u32, Option<String>)>,
) -> BTreeMap<String, (u32, Option<String>)> {
    a.into_iter()
        .filter(|(hash, (vn, _))| b.get(hash).map(|(other, _)| other == vn).unwrap_or(false))
        .collect()
}

fn collect_assigned(
    ast: &Ast,
    table: &SymbolTable,
    module: ModuleId,
    node: NodeId,
    out: &mut Vec<SymbolId>,
) {
    match ast.kind(node) {
        NodeKind::Assignment { target, value } => {
            if let NodeKind::Identifier(_) = ast.kind(*target) {
                if let Some(symbol) = table.resolution(NodeRef::new(module, *target)) {
                    out.push(symbol);
                }
            }
            collect_assigned(ast, table, module, *value, out);
        }
        NodeKind::VariableDecl { .. } => {
            if let Some(symbol) = table.declaration_at(module, node) {
                out.push(symbol);
            }
        }
        _ => {
            for child in ast.children(node) {
                collect_assigned(ast, table, module, child, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blend65_ast::{AstBuilder, BinaryOp, TypeAnnotation};
    use blend65_semantics::{SymbolTableBuilder, TypeResolver};

    fn run(
        make: impl FnOnce(&mut AstBuilder) -> Vec<NodeId>,
    ) -> GvnResult {
        let mut b = AstBuilder::new("main.b65");
        let module = b.module(&["main"]);
        let stmts = make(&mut b);
        let body = b.block(stmts);
        let f = b.function("f", vec![], None, Some(body));
        b.program(Some(module), vec![f]);
        let asts = vec![b.finish()];
        let built = SymbolTableBuilder::build(&asts);
        let mut table = built.data;
        let _ = TypeResolver::run(&asts, &mut table);
        analyze(&asts[0], &table, ModuleId(0), f)
    }

    fn two_param_prelude(b: &mut AstBuilder) -> (NodeId, NodeId) {
        let one = b.number(17);
        let a = b.let_decl("a", Some(TypeAnnotation::named("byte")), Some(one));
        let two = b.number(19);
        let bb = b.let_decl("b", Some(TypeAnnotation::named("byte")), Some(two));
        (a, bb)
    }

    #[test]
    fn commutative_operands_share_a_number() {
        // S6: y = a + b; z = b + a; w = a - b.
        let mut sum1 = None;
        let mut sum2 = None;
        let mut diff = None;
        let result = run(|b| {
            let (a, bb) = two_param_prelude(b);
            let ar = b.ident("a");
            let br = b.ident("b");
            let s1 = b.binary(BinaryOp::Add, ar, br);
            sum1 = Some(s1);
            let y = b.let_decl("y", Some(TypeAnnotation::named("byte")), Some(s1));
            let br2 = b.ident("b");
            let ar2 = b.ident("a");
            let s2 = b.binary(BinaryOp::Add, br2, ar2);
            sum2 = Some(s2);
            let z = b.let_decl("z", Some(TypeAnnotation::named("byte")), Some(s2));
            let ar3 = b.ident("a");
            let br3 = b.ident("b");
            let d = b.binary(BinaryOp::Sub, ar3, br3);
            diff = Some(d);
            let w = b.let_decl("w", Some(TypeAnnotation::named("byte")), Some(d));
            vec![a, bb, y, z, w]
        });
        let vn1 = result.value_numbers[&sum1.unwrap()];
        let vn2 = result.value_numbers[&sum2.unwrap()];
        let vn3 = result.value_numbers[&diff.unwrap()];
        assert_eq!(vn1, vn2, "a + b and b + a share a value number");
        assert_ne!(vn1, vn3, "a - b is a different value");
        assert_eq!(
            result.redundant.get(&sum2.unwrap()).map(String::as_str),
            Some("y"),
            "the second sum is redundant with y"
        );
    }

    #[test]
    fn assignment_invalidates_dependent_expressions() {
        let mut sum1 = None;
        let mut sum2 = None;
        let result = run(|b| {
            let (a, bb) = two_param_prelude(b);
            let ar = b.ident("a");
            let br = b.ident("b");
            let s1 = b.binary(BinaryOp::Add, ar, br);
            sum1 = Some(s1);
            let y = b.let_decl("y", Some(TypeAnnotation::named("byte")), Some(s1));
            let five = b.number(5);
            let clobber = b.assign_stmt("a", five);
            let ar2 = b.ident("a");
            let br2 = b.ident("b");
            let s2 = b.binary(BinaryOp::Add, ar2, br2);
            sum2 = Some(s2);
            let z = b.let_decl("z", Some(TypeAnnotation::named("byte")), Some(s2));
            vec![a, bb, y, clobber, z]
        });
        assert_ne!(
            result.value_numbers[&sum1.unwrap()],
            result.value_numbers[&sum2.unwrap()],
            "a changed between the sums"
        );
        assert!(!result.redundant.contains_key(&sum2.unwrap()));
    }

    #[test]
    fn branch_arms_do_not_leak_numbers() {
        let mut inner = None;
        let mut after = None;
        let result = run(|b| {
            let (a, bb) = two_param_prelude(b);
            let cond = b.bool(true);
            let ar = b.ident("a");
            let br = b.ident("b");
            let s1 = b.binary(BinaryOp::Add, ar, br);
            inner = Some(s1);
            let t = b.let_decl("t", Some(TypeAnnotation::named("byte")), Some(s1));
            let five = b.number(5);
            let clobber = b.assign_stmt("a", five);
            let then_block = b.block(vec![t, clobber]);
            let iff = b.if_stmt(cond, then_block, None);
            let ar2 = b.ident("a");
            let br2 = b.ident("b");
            let s2 = b.binary(BinaryOp::Add, ar2, br2);
            after = Some(s2);
            let z = b.let_decl("z", Some(TypeAnnotation::named("byte")), Some(s2));
            vec![a, bb, iff, z]
        });
        assert_ne!(
            result.value_numbers[&inner.unwrap()],
            result.value_numbers[&after.unwrap()],
            "the then-arm assigned a, so the post-merge sum is new"
        );
    }

    #[test]
    fn loop_bodies_freshen_assigned_variables() {
        let mut first = None;
        let mut inside = None;
        let result = run(|b| {
            let (a, bb) = two_param_prelude(b);
            let ar0 = b.ident("a");
            let br0 = b.ident("b");
            let s0 = b.binary(BinaryOp::Add, ar0, br0);
            first = Some(s0);
            let y = b.let_decl("y", Some(TypeAnnotation::named("byte")), Some(s0));
            let cond = b.bool(true);
            let ar = b.ident("a");
            let br = b.ident("b");
            let s1 = b.binary(BinaryOp::Add, ar, br);
            inside = Some(s1);
            let t = b.assign_stmt("a", s1);
            let body = b.block(vec![t]);
            let w = b.while_stmt(cond, body);
            vec![a, bb, y, w]
        });
        assert_ne!(
            result.value_numbers[&first.unwrap()],
            result.value_numbers[&inside.unwrap()],
            "a is loop-varying, so the in-loop sum is not the pre-loop sum"
        );
    }
}

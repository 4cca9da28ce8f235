//! The AST arena and node variants consumed by the middle-end.
//!
//! Nodes live in a flat [`Ast`] arena and refer to each other by [`NodeId`],
//! so the tree carries no ownership cycles and side tables can key facts by
//! node identity.

use core::fmt;

use crate::location::SourceLocation;

/// Opaque handle of a node inside an [`Ast`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeId(u32);

impl NodeId {
    /// Index form for table lookups.
    pub const fn to_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Storage class requested by a declaration.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[strum(serialize_all = "lowercase")]
pub enum StorageClass {
    /// No explicit placement; the allocator decides.
    #[default]
    None,
    /// `@zp`: the variable wants a zero-page slot.
    ZeroPage,
    /// `@ram`: plain RAM placement.
    Ram,
    /// `@data`: initialized data segment.
    Data,
    /// `@map`: bound to a fixed hardware address.
    Map,
}

/// Literal payload of a [`NodeKind::Literal`] node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LiteralValue {
    /// Unsigned numeric literal; the checker decides byte vs word.
    Number(u32),
    /// `true` / `false`.
    Bool(bool),
    /// Compile-time string literal.
    Str(String),
}

/// Binary operators of the source language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BinaryOp {
    /// `+`
    #[strum(serialize = "+")]
    Add,
    /// `-`
    #[strum(serialize = "-")]
    Sub,
    /// `*`
    #[strum(serialize = "*")]
    Mul,
    /// `/`
    #[strum(serialize = "/")]
    Div,
    /// `%`
    #[strum(serialize = "%")]
    Mod,
    /// `&`
    #[strum(serialize = "&")]
    BitAnd,
    /// `|`
    #[strum(serialize = "|")]
    BitOr,
    /// `^`
    #[strum(serialize = "^")]
    BitXor,
    /// `<<`
    #[strum(serialize = "<<")]
    Shl,
    /// `>>`
    #[strum(serialize = ">>")]
    Shr,
    /// `==`
    #[strum(serialize = "==")]
    Eq,
    /// `!=`
    #[strum(serialize = "!=")]
    Ne,
    /// `<`
    #[strum(serialize = "<")]
    Lt,
    /// `<=`
    #[strum(serialize = "<=")]
    Le,
    /// `>`
    #[strum(serialize = ">")]
    Gt,
    /// `>=`
    #[strum(serialize = ">=")]
    Ge,
    /// `&&`
    #[strum(serialize = "&&")]
    LogicalAnd,
    /// `||`
    #[strum(serialize = "||")]
    LogicalOr,
}

impl BinaryOp {
    /// Operand order does not affect the result.
    pub const fn is_commutative(self) -> bool {
        matches!(
            self,
            Self::Add
                | Self::Mul
                | Self::BitAnd
                | Self::BitOr
                | Self::BitXor
                | Self::Eq
                | Self::Ne
                | Self::LogicalAnd
                | Self::LogicalOr
        )
    }

    /// `==`, `!=`, `<`, `<=`, `>`, `>=`.
    pub const fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge
        )
    }

    /// `&&` or `||`.
    pub const fn is_logical(self) -> bool {
        matches!(self, Self::LogicalAnd | Self::LogicalOr)
    }
}

/// Unary operators of the source language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum UnaryOp {
    /// Arithmetic negation (two's complement on the unsigned value).
    #[strum(serialize = "-")]
    Neg,
    /// Logical not.
    #[strum(serialize = "!")]
    Not,
    /// Bitwise complement.
    #[strum(serialize = "~")]
    BitNot,
    /// Address of an lvalue; yields a `word`.
    #[strum(serialize = "&")]
    AddressOf,
}

/// Type annotation as written in source, before resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TypeAnnotation {
    /// A named type: builtin, enum, or alias.
    Named(String),
    /// `T[n]` or `T[]`.
    Array {
        /// Element annotation.
        element: Box<TypeAnnotation>,
        /// Declared length, if any.
        length: Option<u32>,
    },
}

impl TypeAnnotation {
    /// Shorthand for a named annotation.
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }
}

/// What an `import` pulls in from the source module.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ImportNames {
    /// `import a, b from m`.
    Named(Vec<String>),
    /// `import * from m`.
    Wildcard,
}

/// One field of a `@map` struct declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MapField {
    /// Field name.
    pub name: String,
    /// Field type annotation.
    pub annotation: TypeAnnotation,
    /// Explicit placement; `None` in sequential layouts.
    pub offset: Option<FieldOffset>,
}

/// Placement of an explicit-layout `@map` struct field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FieldOffset {
    /// Single offset from the struct base.
    At(u16),
    /// Inclusive `from..to` byte range from the struct base.
    Range(u16, u16),
}

/// One arm of a `match` statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MatchArm {
    /// Pattern expression compared against the scrutinee; `None` is the
    /// default arm.
    pub pattern: Option<NodeId>,
    /// Arm body (a block or single statement).
    pub body: NodeId,
}

/// Tagged node payload. Child references are [`NodeId`]s into the same arena.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NodeKind {
    /// Whole compilation unit of one source file.
    Program {
        /// `module a.b.c` declaration, if present.
        module: Option<NodeId>,
        /// Top-level declarations in source order.
        declarations: Vec<NodeId>,
    },
    /// `module` declaration carrying the dot-joined path.
    Module {
        /// Path segments, e.g. `["game", "sprites"]`.
        path: Vec<String>,
    },
    /// `import` declaration.
    Import {
        /// Path of the source module.
        module_path: Vec<String>,
        /// Imported names or wildcard.
        names: ImportNames,
    },
    /// `export` wrapping a declaration.
    Export {
        /// The exported declaration.
        declaration: NodeId,
    },
    /// Function declaration; stub when `body` is `None`.
    FunctionDecl {
        /// Function name.
        name: String,
        /// Parameter nodes.
        parameters: Vec<NodeId>,
        /// Declared return type; `None` means `void`.
        return_annotation: Option<TypeAnnotation>,
        /// Body block, absent for stubs.
        body: Option<NodeId>,
    },
    /// One function parameter.
    Parameter {
        /// Parameter name.
        name: String,
        /// Declared type.
        annotation: TypeAnnotation,
    },
    /// `let` / `const` declaration.
    VariableDecl {
        /// Declared name.
        name: String,
        /// `const` flag.
        constant: bool,
        /// Declared type, if annotated.
        annotation: Option<TypeAnnotation>,
        /// Initializer expression, if any.
        initializer: Option<NodeId>,
        /// Requested storage class.
        storage: StorageClass,
        /// `@zp`/`@map` address argument, if written.
        address: Option<NodeId>,
    },
    /// `enum` declaration.
    EnumDecl {
        /// Enum name.
        name: String,
        /// Members with optional explicit value expressions.
        members: Vec<(String, Option<NodeId>)>,
    },
    /// `type` alias declaration.
    TypeDecl {
        /// Alias name.
        name: String,
        /// Aliased annotation.
        annotation: TypeAnnotation,
    },
    /// `@map name: T at addr`, a single mapped cell.
    SimpleMapDecl {
        /// Declared name.
        name: String,
        /// Cell type.
        annotation: TypeAnnotation,
        /// Address expression.
        address: NodeId,
    },
    /// `@map name: T[..] at start..end`, a mapped range.
    RangeMapDecl {
        /// Declared name.
        name: String,
        /// Element type.
        annotation: TypeAnnotation,
        /// Range start expression.
        start: NodeId,
        /// Range end expression (inclusive).
        end: NodeId,
    },
    /// `@map struct` with fields packed in declaration order.
    SequentialStructMapDecl {
        /// Declared name.
        name: String,
        /// Base address expression.
        address: NodeId,
        /// Fields in declaration order; offsets accumulate by size.
        fields: Vec<MapField>,
    },
    /// `@map struct` with per-field offsets.
    ExplicitStructMapDecl {
        /// Declared name.
        name: String,
        /// Base address expression.
        address: NodeId,
        /// Fields with explicit offsets or ranges.
        fields: Vec<MapField>,
    },
    /// `if` statement.
    If {
        /// Guard expression.
        condition: NodeId,
        /// Then branch.
        then_branch: NodeId,
        /// Else branch, if present.
        else_branch: Option<NodeId>,
    },
    /// `while` loop.
    While {
        /// Guard expression.
        condition: NodeId,
        /// Loop body.
        body: NodeId,
    },
    /// `do … while` loop; the body runs at least once.
    DoWhile {
        /// Loop body.
        body: NodeId,
        /// Guard expression.
        condition: NodeId,
    },
    /// C-style `for` loop.
    For {
        /// Init statement, if any.
        init: Option<NodeId>,
        /// Guard expression, if any.
        condition: Option<NodeId>,
        /// Update statement, if any.
        update: Option<NodeId>,
        /// Loop body.
        body: NodeId,
    },
    /// `match` statement.
    Match {
        /// Matched expression.
        scrutinee: NodeId,
        /// Arms in source order; at most one default.
        arms: Vec<MatchArm>,
    },
    /// `{ … }` statement block.
    Block {
        /// Statements in order.
        statements: Vec<NodeId>,
    },
    /// Expression used as a statement.
    ExpressionStmt {
        /// The expression.
        expression: NodeId,
    },
    /// `return` statement.
    Return {
        /// Returned expression; `None` for `void` functions.
        value: Option<NodeId>,
    },
    /// `break` out of the innermost loop.
    Break,
    /// `continue` with the innermost loop.
    Continue,
    /// Literal expression.
    Literal(LiteralValue),
    /// Identifier reference.
    Identifier(String),
    /// Binary expression.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        lhs: NodeId,
        /// Right operand.
        rhs: NodeId,
    },
    /// Unary expression.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        operand: NodeId,
    },
    /// Assignment expression; value is the left-hand type.
    Assignment {
        /// Assigned lvalue.
        target: NodeId,
        /// Assigned value.
        value: NodeId,
    },
    /// Call expression.
    Call {
        /// Callee (identifier or member).
        callee: NodeId,
        /// Arguments in order.
        arguments: Vec<NodeId>,
    },
    /// Index expression `base[index]`.
    Index {
        /// Indexed expression.
        base: NodeId,
        /// Index expression.
        index: NodeId,
    },
    /// Member access `base.member`.
    Member {
        /// Accessed expression.
        base: NodeId,
        /// Member name.
        member: String,
    },
    /// Parse-error placeholder; analyses skip it.
    Error,
}

impl NodeKind {
    /// True for statement-shaped nodes (CFG building walks these).
    pub const fn is_statement(&self) -> bool {
        matches!(
            self,
            Self::If { .. }
                | Self::While { .. }
                | Self::DoWhile { .. }
                | Self::For { .. }
                | Self::Match { .. }
                | Self::Block { .. }
                | Self::ExpressionStmt { .. }
                | Self::Return { .. }
                | Self::Break
                | Self::Continue
                | Self::VariableDecl { .. }
        )
    }

    /// True for expression-shaped nodes.
    pub const fn is_expression(&self) -> bool {
        matches!(
            self,
            Self::Literal(_)
                | Self::Identifier(_)
                | Self::Binary { .. }
                | Self::Unary { .. }
                | Self::Assignment { .. }
                | Self::Call { .. }
                | Self::Index { .. }
                | Self::Member { .. }
        )
    }
}

/// One node of the arena: kind plus source location.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AstNode {
    /// This node's handle.
    pub id: NodeId,
    /// Source span the node covers.
    pub location: SourceLocation,
    /// Tagged payload.
    pub kind: NodeKind,
}

/// Flat arena owning every node of one source file.
#[derive(Debug, Default, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Ast {
    nodes: Vec<AstNode>,
    root: Option<NodeId>,
}

impl Ast {
    /// Empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a node and return its handle.
    pub fn alloc(&mut self, kind: NodeKind, location: SourceLocation) -> NodeId {
        let id = NodeId(u32::try_from(self.nodes.len()).expect("AST node count exceeds u32"));
        self.nodes.push(AstNode { id, location, kind });
        id
    }

    /// Mark `root` as the program node of this arena.
    pub fn set_root(&mut self, root: NodeId) {
        self.root = Some(root);
    }

    /// The program node, if one was recorded.
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// Borrow a node.
    ///
    /// # Panics
    ///
    /// Panics if `id` was produced by a different arena.
    pub fn node(&self, id: NodeId) -> &AstNode {
        &self.nodes[id.to_usize()]
    }

    /// Shorthand for `&self.node(id).kind`.
    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.node(id).kind
    }

    /// Source span of `id`.
    pub fn location(&self, id: NodeId) -> &SourceLocation {
        &self.node(id).location
    }

    /// Number of nodes allocated.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when no node has been allocated.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate all nodes in allocation order.
    pub fn iter(&self) -> impl Iterator<Item = &AstNode> {
        self.nodes.iter()
    }

    /// Direct children of `id`, in source order.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        match self.kind(id) {
            NodeKind::Program {
                module,
                declarations,
            } => {
                out.extend(module.iter().copied());
                out.extend(declarations.iter().copied());
            }
            NodeKind::Export { declaration } => out.push(*declaration),
            NodeKind::FunctionDecl {
                parameters, body, ..
            } => {
                out.extend(parameters.iter().copied());
                out.extend(body.iter().copied());
            }
            NodeKind::VariableDecl {
                initializer,
                address,
                ..
            } => {
                out.extend(address.iter().copied());
                out.extend(initializer.iter().copied());
            }
            NodeKind::EnumDecl { members, .. } => {
                out.extend(members.iter().filter_map(|(_, value)| *value));
            }
            NodeKind::SimpleMapDecl { address, .. } => out.push(*address),
            NodeKind::RangeMapDecl { start, end, .. } => {
                out.push(*start);
                out.push(*end);
            }
            NodeKind::SequentialStructMapDecl { address, .. }
            | NodeKind::ExplicitStructMapDecl { address, .. } => out.push(*address),
            NodeKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                out.push(*condition);
                out.push(*then_branch);
                out.extend(else_branch.iter().copied());
            }
            NodeKind::While { condition, body } => {
                out.push(*condition);
                out.push(*body);
            }
            NodeKind::DoWhile { body, condition } => {
                out.push(*body);
                out.push(*condition);
            }
            NodeKind::For {
                init,
                condition,
                update,
                body,
            } => {
                out.extend(init.iter().copied());
                out.extend(condition.iter().copied());
                out.extend(update.iter().copied());
                out.push(*body);
            }
            NodeKind::Match { scrutinee, arms } => {
                out.push(*scrutinee);
                for arm in arms {
                    out.extend(arm.pattern.iter().copied());
                    out.push(arm.body);
                }
            }
            NodeKind::Block { statements } => out.extend(statements.iter().copied()),
            NodeKind::ExpressionStmt { expression } => out.push(*expression),
            NodeKind::Return { value } => out.extend(value.iter().copied()),
            NodeKind::Binary { lhs, rhs, .. } => {
                out.push(*lhs);
                out.push(*rhs);
            }
            NodeKind::Unary { operand, .. } => out.push(*operand),
            NodeKind::Assignment { target, value } => {
                out.push(*target);
                out.push(*value);
            }
            NodeKind::Call { callee, arguments } => {
                out.push(*callee);
                out.extend(arguments.iter().copied());
            }
            NodeKind::Index { base, index } => {
                out.push(*base);
                out.push(*index);
            }
            NodeKind::Member { base, .. } => out.push(*base),
            NodeKind::Module { .. }
            | NodeKind::Import { .. }
            | NodeKind::Parameter { .. }
            | NodeKind::TypeDecl { .. }
            | NodeKind::Break
            | NodeKind::Continue
            | NodeKind::Literal(_)
            | NodeKind::Identifier(_)
            | NodeKind::Error => {}
        }
        out
    }

    /// Pre-order walk of the subtree rooted at `id`.
    pub fn walk(&self, id: NodeId, visit: &mut impl FnMut(&AstNode)) {
        visit(self.node(id));
        for child in self.children(id) {
            self.walk(child, visit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn children_follow_source_order() {
        let mut ast = Ast::new();
        let loc = SourceLocation::synthetic();
        let lhs = ast.alloc(NodeKind::Identifier("a".into()), loc.clone());
        let rhs = ast.alloc(NodeKind::Identifier("b".into()), loc.clone());
        let add = ast.alloc(
            NodeKind::Binary {
                op: BinaryOp::Add,
                lhs,
                rhs,
            },
            loc,
        );
        assert_eq!(ast.children(add), vec![lhs, rhs]);
    }

    #[test]
    fn walk_visits_every_node_once() {
        let mut ast = Ast::new();
        let loc = SourceLocation::synthetic();
        let value = ast.alloc(NodeKind::Literal(LiteralValue::Number(1)), loc.clone());
        let decl = ast.alloc(
            NodeKind::VariableDecl {
                name: "x".into(),
                constant: false,
                annotation: Some(TypeAnnotation::named("byte")),
                initializer: Some(value),
                storage: StorageClass::None,
                address: None,
            },
            loc.clone(),
        );
        let block = ast.alloc(
            NodeKind::Block {
                statements: vec![decl],
            },
            loc,
        );
        let mut seen = Vec::new();
        ast.walk(block, &mut |node| seen.push(node.id));
        assert_eq!(seen, vec![block, decl, value]);
    }
}

//! The typed AST produced by the typechecker: the same shape as
//! [`crate::ast`], but every expression now carries its resolved
//! [`Type`] instead of being inferred lazily downstream.

use orus_core::span::Span;
use orus_core::types::Type;

use crate::ast::{BinaryOp, ForStep, Literal, UnaryOp};

#[derive(Debug, Clone, PartialEq)]
pub enum TypedExprKind {
    Literal(Literal),
    Identifier(String),
    Binary { op: BinaryOp, left: Box<TypedExpr>, right: Box<TypedExpr> },
    Unary { op: UnaryOp, operand: Box<TypedExpr> },
    Ternary { cond: Box<TypedExpr>, then_branch: Box<TypedExpr>, else_branch: Box<TypedExpr> },
    Call { callee: Box<TypedExpr>, args: Vec<TypedExpr> },
    FieldAccess { base: Box<TypedExpr>, field: String },
    Index { base: Box<TypedExpr>, index: Box<TypedExpr> },
    Cast { expr: Box<TypedExpr>, target: Type },
    ArrayLiteral(Vec<TypedExpr>),
}

/// `spec.md` §3 "Typed AST node": the same shape the untyped AST has, plus a
/// resolved [`Type`], a source [`Span`], and two pieces of metadata the
/// optimizer attaches and preserves downstream for codegen to consult:
/// `folded` (the compile-time constant value this node evaluates to, once
/// [`crate::optimizer::constant_fold`] establishes one — kept alongside
/// `kind` rather than only replacing it, so a later pass can ask "is this
/// known constant" without re-matching on `kind`) and `stable` (true once
/// some pass — constant folding, or LICM's invariance check — has proven
/// this node's value doesn't change across the loop iterations it's nested
/// in).
#[derive(Debug, Clone, PartialEq)]
pub struct TypedExpr {
    pub kind: TypedExprKind,
    pub ty: Type,
    pub span: Span,
    pub folded: Option<Literal>,
    pub stable: bool,
}

impl TypedExpr {
    pub fn new(kind: TypedExprKind, ty: Type, span: Span) -> Self {
        TypedExpr { kind, ty, span, folded: None, stable: false }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypedParam {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypedStmtKind {
    VarDecl { name: String, ty: Type, mutable: bool, init: Option<TypedExpr> },
    Assignment { target: TypedExpr, value: TypedExpr },
    ExprStmt(TypedExpr),
    Print(Vec<TypedExpr>),
    Block(Vec<TypedStmt>),
    If { cond: TypedExpr, then_branch: Vec<TypedStmt>, else_branch: Option<Vec<TypedStmt>> },
    While { cond: TypedExpr, body: Vec<TypedStmt> },
    ForRange { var: String, start: TypedExpr, end: TypedExpr, step: Option<TypedExpr>, step_kind: ForStep, body: Vec<TypedStmt> },
    ForIter { var: String, iterable: TypedExpr, body: Vec<TypedStmt> },
    Break,
    Continue,
    Return(Option<TypedExpr>),
    FunctionDecl { name: String, params: Vec<TypedParam>, return_type: Type, body: Vec<TypedStmt> },
    StructDecl { name: String },
    Import { module: String, alias: Option<String>, selective: Vec<String> },
    Export { name: String },
    Try { body: Vec<TypedStmt>, error_binding: String, handler: Vec<TypedStmt> },
}

/// `spec.md` §4.4 "Loop-invariant code motion": a loop-bearing statement
/// (`While`/`ForRange`/`ForIter`) carries an `escape_mask`, the bitwise OR
/// of a power-of-two bit per hoisted binding LICM proved dominates this
/// loop's header, and a `guard_witness` flag set when two or more of those
/// hoisted bindings were fused into one computation. Both are `0`/`false`
/// on every other statement kind and on a loop LICM never touched.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedStmt {
    pub kind: TypedStmtKind,
    pub span: Span,
    pub escape_mask: u32,
    pub guard_witness: bool,
}

impl TypedStmt {
    pub fn new(kind: TypedStmtKind, span: Span) -> Self {
        TypedStmt { kind, span, escape_mask: 0, guard_witness: false }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TypedProgram {
    pub statements: Vec<TypedStmt>,
}

//! Recursive-descent parser: tokens to untyped AST.
//!
//! Grounded on the structure of the Seq parser (`examples/navicore-cem3`'s
//! `crates/compiler/src/parser.rs`): a cursor over a flat token vector,
//! `expect`/`check`/`match_tok` helpers, and error-synchronizing recovery
//! rather than aborting on the first bad token. The grammar itself is new:
//! indentation-delimited blocks instead of Seq's postfix word stream, and
//! the precedence-climbing expression grammar from `spec.md` §4.2
//! (`ternary` just above `or`; `or, and, not, comparisons, additive,
//! multiplicative, unary minus, cast (as), call/index/field, primary`).

use crate::ast::*;
use crate::lexer::{Token, TokenKind};
use orus_core::error::{Diagnostic, DiagnosticSink, ErrorCode};
use orus_core::span::Span;
use orus_core::types::Type;
use std::path::PathBuf;

pub struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    file: PathBuf,
    sink: &'a mut DiagnosticSink,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token], file: PathBuf, sink: &'a mut DiagnosticSink) -> Self {
        Parser { tokens, pos: 0, file, sink }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.pos.saturating_sub(1).min(self.tokens.len() - 1)]
    }

    fn at_end(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Eof)
    }

    fn advance(&mut self) -> &Token {
        if !self.at_end() {
            self.pos += 1;
        }
        self.previous()
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.peek_kind()) == std::mem::discriminant(kind)
    }

    fn match_tok(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<&Token, ()> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            let span = self.peek().span.clone();
            self.sink.push(
                Diagnostic::new(
                    ErrorCode::ParseError,
                    format!("expected {what}, found {:?}", self.peek_kind()),
                    span,
                ),
            );
            Err(())
        }
    }

    /// Skips tokens until a likely statement boundary, so one bad
    /// statement doesn't suppress every diagnostic after it.
    fn synchronize(&mut self) {
        while !self.at_end() {
            if matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Dedent) {
                self.advance();
                return;
            }
            self.advance();
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek_kind(), TokenKind::Newline) {
            self.advance();
        }
    }

    pub fn parse_program(mut self) -> Program {
        let mut statements = Vec::new();
        self.skip_newlines();
        while !self.at_end() {
            match self.parse_statement() {
                Ok(stmt) => statements.push(stmt),
                Err(()) => self.synchronize(),
            }
            self.skip_newlines();
        }
        Program { statements }
    }

    // ---------- statements ----------

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ()> {
        self.expect(&TokenKind::Colon, "':'")?;
        self.skip_newlines_required()?;
        self.expect(&TokenKind::Indent, "an indented block")?;
        let mut statements = Vec::new();
        self.skip_newlines();
        while !self.check(&TokenKind::Dedent) && !self.at_end() {
            match self.parse_statement() {
                Ok(stmt) => statements.push(stmt),
                Err(()) => self.synchronize(),
            }
            self.skip_newlines();
        }
        self.expect(&TokenKind::Dedent, "a dedent closing the block")?;
        Ok(statements)
    }

    fn skip_newlines_required(&mut self) -> Result<(), ()> {
        self.expect(&TokenKind::Newline, "a newline")?;
        self.skip_newlines();
        Ok(())
    }

    fn parse_statement(&mut self) -> Result<Stmt, ()> {
        let start = self.peek().span.clone();
        match self.peek_kind().clone() {
            TokenKind::Mut | TokenKind::Identifier(_) if self.looks_like_var_decl() => {
                self.parse_var_decl(start)
            }
            TokenKind::If => self.parse_if(start),
            TokenKind::While => self.parse_while(start),
            TokenKind::For => self.parse_for(start),
            TokenKind::Break => {
                self.advance();
                Ok(Stmt::new(StmtKind::Break, self.finish(&start)))
            }
            TokenKind::Continue => {
                self.advance();
                Ok(Stmt::new(StmtKind::Continue, self.finish(&start)))
            }
            TokenKind::Return => self.parse_return(start),
            TokenKind::Fn => self.parse_function_decl(start),
            TokenKind::Struct => self.parse_struct_decl(start),
            TokenKind::Import => self.parse_import(start),
            TokenKind::Export => self.parse_export(start),
            TokenKind::Try => self.parse_try(start),
            TokenKind::Print => self.parse_print(start),
            _ => self.parse_expr_or_assignment(start),
        }
    }

    fn finish(&self, start: &Span) -> Span {
        start.merge(&self.previous().span)
    }

    /// Lookahead to distinguish `x = 1` (assignment to an existing name,
    /// handled as an expression statement) from `x: i32 = 1` / `mut x = 1`
    /// (a declaration). A bare identifier followed by `=` is an assignment,
    /// not a declaration.
    fn looks_like_var_decl(&self) -> bool {
        if matches!(self.peek_kind(), TokenKind::Mut) {
            return true;
        }
        matches!(self.peek_kind(), TokenKind::Identifier(_))
            && matches!(self.tokens.get(self.pos + 1).map(|t| &t.kind), Some(TokenKind::Colon))
    }

    fn parse_var_decl(&mut self, start: Span) -> Result<Stmt, ()> {
        let mutable = self.match_tok(&TokenKind::Mut);
        let name = self.expect_identifier("a variable name")?;
        let declared_type = if self.match_tok(&TokenKind::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };
        let init = if self.match_tok(&TokenKind::Eq) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        Ok(Stmt::new(
            StmtKind::VarDecl { name, declared_type, mutable, init },
            self.finish(&start),
        ))
    }

    fn parse_expr_or_assignment(&mut self, start: Span) -> Result<Stmt, ()> {
        let expr = self.parse_expression()?;
        if self.match_tok(&TokenKind::Eq) {
            let value = self.parse_expression()?;
            Ok(Stmt::new(
                StmtKind::Assignment { target: expr, value },
                self.finish(&start),
            ))
        } else {
            Ok(Stmt::new(StmtKind::ExprStmt(expr), self.finish(&start)))
        }
    }

    fn parse_if(&mut self, start: Span) -> Result<Stmt, ()> {
        self.advance(); // `if`
        let cond = self.parse_expression()?;
        let then_branch = self.parse_block()?;
        self.skip_newlines();
        let else_branch = if self.match_tok(&TokenKind::Else) {
            if matches!(self.peek_kind(), TokenKind::If) {
                let elif_start = self.peek().span.clone();
                Some(vec![self.parse_if(elif_start)?])
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        Ok(Stmt::new(
            StmtKind::If { cond, then_branch, else_branch },
            self.finish(&start),
        ))
    }

    fn parse_while(&mut self, start: Span) -> Result<Stmt, ()> {
        self.advance(); // `while`
        let cond = self.parse_expression()?;
        let body = self.parse_block()?;
        Ok(Stmt::new(StmtKind::While { cond, body }, self.finish(&start)))
    }

    fn parse_for(&mut self, start: Span) -> Result<Stmt, ()> {
        self.advance(); // `for`
        let var = self.expect_identifier("a loop variable")?;
        self.expect(&TokenKind::In, "'in'")?;
        let first = self.parse_expression()?;
        if self.match_tok(&TokenKind::DotDot) {
            let end = self.parse_expression()?;
            let (step, step_kind) = if self.match_tok(&TokenKind::Comma) {
                (Some(self.parse_expression()?), ForStep::Explicit)
            } else {
                (None, ForStep::Implicit)
            };
            let body = self.parse_block()?;
            Ok(Stmt::new(
                StmtKind::ForRange { var, start: first, end, step, step_kind, body },
                self.finish(&start),
            ))
        } else {
            let body = self.parse_block()?;
            Ok(Stmt::new(
                StmtKind::ForIter { var, iterable: first, body },
                self.finish(&start),
            ))
        }
    }

    fn parse_return(&mut self, start: Span) -> Result<Stmt, ()> {
        self.advance(); // `return`
        let value = if matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Dedent | TokenKind::Eof) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        Ok(Stmt::new(StmtKind::Return(value), self.finish(&start)))
    }

    fn parse_print(&mut self, start: Span) -> Result<Stmt, ()> {
        self.advance(); // `print`
        self.expect(&TokenKind::LParen, "'('")?;
        let mut args = Vec::new();
        if !self.check(&TokenKind::RParen) {
            args.push(self.parse_expression()?);
            while self.match_tok(&TokenKind::Comma) {
                args.push(self.parse_expression()?);
            }
        }
        self.expect(&TokenKind::RParen, "')'")?;
        Ok(Stmt::new(StmtKind::Print(args), self.finish(&start)))
    }

    fn parse_function_decl(&mut self, start: Span) -> Result<Stmt, ()> {
        self.advance(); // `fn`
        let name = self.expect_identifier("a function name")?;
        self.expect(&TokenKind::LParen, "'('")?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            params.push(self.parse_param()?);
            while self.match_tok(&TokenKind::Comma) {
                params.push(self.parse_param()?);
            }
        }
        self.expect(&TokenKind::RParen, "')'")?;
        let return_type = if self.match_tok(&TokenKind::Arrow) {
            self.parse_type()?
        } else {
            Type::nil()
        };
        let body = self.parse_block()?;
        Ok(Stmt::new(
            StmtKind::FunctionDecl { name, params, return_type, body },
            self.finish(&start),
        ))
    }

    fn parse_param(&mut self) -> Result<Param, ()> {
        let start = self.peek().span.clone();
        let name = self.expect_identifier("a parameter name")?;
        self.expect(&TokenKind::Colon, "':'")?;
        let ty = self.parse_type()?;
        Ok(Param { name, ty, span: self.finish(&start) })
    }

    fn parse_struct_decl(&mut self, start: Span) -> Result<Stmt, ()> {
        self.advance(); // `struct`
        let name = self.expect_identifier("a struct name")?;
        self.expect(&TokenKind::Colon, "':'")?;
        self.skip_newlines_required()?;
        self.expect(&TokenKind::Indent, "an indented field list")?;
        let mut fields = Vec::new();
        self.skip_newlines();
        while !self.check(&TokenKind::Dedent) && !self.at_end() {
            let field_name = self.expect_identifier("a field name")?;
            self.expect(&TokenKind::Colon, "':'")?;
            let ty = self.parse_type()?;
            fields.push(StructFieldDecl { name: field_name, ty });
            self.skip_newlines();
        }
        self.expect(&TokenKind::Dedent, "a dedent closing the struct body")?;
        Ok(Stmt::new(StmtKind::StructDecl { name, fields }, self.finish(&start)))
    }

    fn parse_import(&mut self, start: Span) -> Result<Stmt, ()> {
        self.advance(); // `import`
        // `import foo`, `import foo as bar`, `import a, b from foo`
        let mut selective = Vec::new();
        let mut first = self.expect_identifier("a module or binding name")?;
        let mut is_selective = false;
        while self.match_tok(&TokenKind::Comma) {
            is_selective = true;
            selective.push(first.clone());
            first = self.expect_identifier("a binding name")?;
        }
        if is_selective {
            selective.push(first);
            self.expect(&TokenKind::From, "'from'")?;
            let module = self.expect_identifier("a module name")?;
            return Ok(Stmt::new(
                StmtKind::Import { module, alias: None, selective },
                self.finish(&start),
            ));
        }
        let alias = if self.match_tok(&TokenKind::As) {
            Some(self.expect_identifier("an alias name")?)
        } else {
            None
        };
        Ok(Stmt::new(
            StmtKind::Import { module: first, alias, selective: Vec::new() },
            self.finish(&start),
        ))
    }

    fn parse_export(&mut self, start: Span) -> Result<Stmt, ()> {
        self.advance(); // `export`
        let name = self.expect_identifier("a name to export")?;
        Ok(Stmt::new(StmtKind::Export { name }, self.finish(&start)))
    }

    fn parse_try(&mut self, start: Span) -> Result<Stmt, ()> {
        self.advance(); // `try`
        let body = self.parse_block()?;
        self.skip_newlines();
        self.expect(&TokenKind::Catch, "'catch'")?;
        let error_binding = self.expect_identifier("an error binding name")?;
        let handler = self.parse_block()?;
        Ok(Stmt::new(
            StmtKind::Try { body, error_binding, handler },
            self.finish(&start),
        ))
    }

    fn expect_identifier(&mut self, what: &str) -> Result<String, ()> {
        match self.peek_kind().clone() {
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            _ => {
                let span = self.peek().span.clone();
                self.sink.push(Diagnostic::new(
                    ErrorCode::ParseError,
                    format!("expected {what}, found {:?}", self.peek_kind()),
                    span,
                ));
                Err(())
            }
        }
    }

    fn parse_type(&mut self) -> Result<Type, ()> {
        let name = self.expect_identifier("a type name")?;
        let base = match name.as_str() {
            "i32" => Type::i32(),
            "i64" => Type::i64(),
            "u32" => Type::u32(),
            "u64" => Type::u64(),
            "f64" => Type::f64(),
            "bool" => Type::bool(),
            "string" => Type::string(),
            "nil" => Type::nil(),
            _ => Type::Instance(std::rc::Rc::new(orus_core::types::InstanceType {
                name,
                args: Vec::new(),
            })),
        };
        if self.match_tok(&TokenKind::LBracket) {
            self.expect(&TokenKind::RBracket, "']'")?;
            Ok(Type::array(base))
        } else {
            Ok(base)
        }
    }

    // ---------- expressions ----------

    pub fn parse_expression(&mut self) -> Result<Expr, ()> {
        self.parse_ternary()
    }

    fn parse_ternary(&mut self) -> Result<Expr, ()> {
        let cond = self.parse_or()?;
        if self.match_tok(&TokenKind::Question) {
            let then_branch = self.parse_expression()?;
            self.expect(&TokenKind::Colon, "':'")?;
            let else_branch = self.parse_expression()?;
            let span = cond.span.merge(&else_branch.span);
            Ok(Expr::new(
                ExprKind::Ternary {
                    cond: Box::new(cond),
                    then_branch: Box::new(then_branch),
                    else_branch: Box::new(else_branch),
                },
                span,
            ))
        } else {
            Ok(cond)
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ()> {
        let mut left = self.parse_and()?;
        while self.match_tok(&TokenKind::Or) {
            let right = self.parse_and()?;
            let span = left.span.merge(&right.span);
            left = Expr::new(
                ExprKind::Binary { op: BinaryOp::Or, left: Box::new(left), right: Box::new(right) },
                span,
            );
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ()> {
        let mut left = self.parse_not()?;
        while self.match_tok(&TokenKind::And) {
            let right = self.parse_not()?;
            let span = left.span.merge(&right.span);
            left = Expr::new(
                ExprKind::Binary { op: BinaryOp::And, left: Box::new(left), right: Box::new(right) },
                span,
            );
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, ()> {
        if matches!(self.peek_kind(), TokenKind::Not) {
            let start = self.peek().span.clone();
            self.advance();
            let operand = self.parse_not()?;
            let span = start.merge(&operand.span);
            Ok(Expr::new(ExprKind::Unary { op: UnaryOp::Not, operand: Box::new(operand) }, span))
        } else {
            self.parse_comparison()
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr, ()> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::EqEq => BinaryOp::Eq,
                TokenKind::NotEq => BinaryOp::NotEq,
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::LtEq => BinaryOp::LtEq,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::GtEq => BinaryOp::GtEq,
                _ => break,
            };
            self.advance();
            let right = self.parse_additive()?;
            let span = left.span.merge(&right.span);
            left = Expr::new(ExprKind::Binary { op, left: Box::new(left), right: Box::new(right) }, span);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, ()> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            let span = left.span.merge(&right.span);
            left = Expr::new(ExprKind::Binary { op, left: Box::new(left), right: Box::new(right) }, span);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ()> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            let span = left.span.merge(&right.span);
            left = Expr::new(ExprKind::Binary { op, left: Box::new(left), right: Box::new(right) }, span);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ()> {
        if matches!(self.peek_kind(), TokenKind::Minus) {
            let start = self.peek().span.clone();
            self.advance();
            let operand = self.parse_unary()?;
            let span = start.merge(&operand.span);
            Ok(Expr::new(ExprKind::Unary { op: UnaryOp::Neg, operand: Box::new(operand) }, span))
        } else {
            self.parse_cast()
        }
    }

    fn parse_cast(&mut self) -> Result<Expr, ()> {
        let mut expr = self.parse_postfix()?;
        while self.match_tok(&TokenKind::As) {
            let target = self.parse_type()?;
            let span = expr.span.clone();
            expr = Expr::new(ExprKind::Cast { expr: Box::new(expr), target }, span);
        }
        Ok(expr)
    }

    fn parse_postfix(&mut self) -> Result<Expr, ()> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek_kind() {
                TokenKind::LParen => {
                    self.advance();
                    let mut args = Vec::new();
                    if !self.check(&TokenKind::RParen) {
                        args.push(self.parse_expression()?);
                        while self.match_tok(&TokenKind::Comma) {
                            args.push(self.parse_expression()?);
                        }
                    }
                    let end = self.expect(&TokenKind::RParen, "')'")?.span.clone();
                    let span = expr.span.merge(&end);
                    expr = Expr::new(ExprKind::Call { callee: Box::new(expr), args }, span);
                }
                TokenKind::Dot => {
                    self.advance();
                    let field = self.expect_identifier("a field name")?;
                    let span = expr.span.merge(&self.previous().span);
                    expr = Expr::new(ExprKind::FieldAccess { base: Box::new(expr), field }, span);
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_expression()?;
                    let end = self.expect(&TokenKind::RBracket, "']'")?.span.clone();
                    let span = expr.span.merge(&end);
                    expr = Expr::new(ExprKind::Index { base: Box::new(expr), index: Box::new(index) }, span);
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ()> {
        let start = self.peek().span.clone();
        match self.peek_kind().clone() {
            TokenKind::IntLiteral { text, suffix } => {
                self.advance();
                Ok(Expr::new(ExprKind::Literal(Literal::Int { text, suffix }), start))
            }
            TokenKind::FloatLiteral { text, suffix } => {
                self.advance();
                Ok(Expr::new(ExprKind::Literal(Literal::Float { text, suffix }), start))
            }
            TokenKind::StringLiteral(s) => {
                self.advance();
                Ok(Expr::new(ExprKind::Literal(Literal::Str(s)), start))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::new(ExprKind::Literal(Literal::Bool(true)), start))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::new(ExprKind::Literal(Literal::Bool(false)), start))
            }
            TokenKind::NilLiteral => {
                self.advance();
                Ok(Expr::new(ExprKind::Literal(Literal::Nil), start))
            }
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(Expr::new(ExprKind::Identifier(name), start))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expression()?;
                let end = self.expect(&TokenKind::RParen, "')'")?.span.clone();
                let span = start.merge(&end);
                Ok(Expr::new(inner.kind, span))
            }
            TokenKind::LBracket => {
                self.advance();
                let mut elements = Vec::new();
                if !self.check(&TokenKind::RBracket) {
                    elements.push(self.parse_expression()?);
                    while self.match_tok(&TokenKind::Comma) {
                        elements.push(self.parse_expression()?);
                    }
                }
                let end = self.expect(&TokenKind::RBracket, "']'")?.span.clone();
                Ok(Expr::new(ExprKind::ArrayLiteral(elements), start.merge(&end)))
            }
            other => {
                self.sink.push(Diagnostic::new(
                    ErrorCode::ParseError,
                    format!("expected an expression, found {other:?}"),
                    start,
                ));
                Err(())
            }
        }
    }
}

/// Convenience entry point: tokenizes nothing itself, expects an already
/// lexed token stream (see [`crate::lexer::tokenize`]).
pub fn parse(tokens: &[Token], file: PathBuf, sink: &mut DiagnosticSink) -> Program {
    Parser::new(tokens, file, sink).parse_program()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse_str(src: &str) -> (Program, DiagnosticSink) {
        let (tokens, lex_errors) = tokenize("t.orus", src);
        assert!(lex_errors.is_empty(), "{lex_errors:?}");
        let mut sink = DiagnosticSink::new();
        let program = parse(&tokens, PathBuf::from("t.orus"), &mut sink);
        (program, sink)
    }

    #[test]
    fn parses_var_decl_with_inferred_type() {
        let (program, sink) = parse_str("x = 1\n");
        assert!(sink.is_empty());
        assert_eq!(program.statements.len(), 1);
        assert!(matches!(program.statements[0].kind, StmtKind::ExprStmt(_) | StmtKind::Assignment { .. }));
    }

    #[test]
    fn parses_declared_mutable_binding() {
        let (program, sink) = parse_str("mut x: i32 = 1\n");
        assert!(sink.is_empty());
        match &program.statements[0].kind {
            StmtKind::VarDecl { mutable, declared_type, .. } => {
                assert!(*mutable);
                assert_eq!(*declared_type, Some(Type::i32()));
            }
            other => panic!("expected VarDecl, got {other:?}"),
        }
    }

    #[test]
    fn respects_operator_precedence() {
        let (program, sink) = parse_str("y = 1 + 2 * 3\n");
        assert!(sink.is_empty());
        let StmtKind::Assignment { value, .. } = &program.statements[0].kind else {
            panic!("expected assignment");
        };
        match &value.kind {
            ExprKind::Binary { op: BinaryOp::Add, right, .. } => {
                assert!(matches!(right.kind, ExprKind::Binary { op: BinaryOp::Mul, .. }));
            }
            other => panic!("expected Add at the top, got {other:?}"),
        }
    }

    #[test]
    fn parses_if_else_block() {
        let (program, sink) = parse_str("if x:\n    y = 1\nelse:\n    y = 2\n");
        assert!(sink.is_empty());
        assert!(matches!(program.statements[0].kind, StmtKind::If { .. }));
    }

    #[test]
    fn parses_function_decl_with_return_type() {
        let (program, sink) =
            parse_str("fn add(a: i32, b: i32) -> i32:\n    return a + b\n");
        assert!(sink.is_empty());
        match &program.statements[0].kind {
            StmtKind::FunctionDecl { params, return_type, .. } => {
                assert_eq!(params.len(), 2);
                assert_eq!(*return_type, Type::i32());
            }
            other => panic!("expected FunctionDecl, got {other:?}"),
        }
    }

    #[test]
    fn parses_for_range_with_step() {
        let (program, sink) = parse_str("for i in 0..10, 2:\n    print(i)\n");
        assert!(sink.is_empty());
        assert!(matches!(program.statements[0].kind, StmtKind::ForRange { step_kind: ForStep::Explicit, .. }));
    }

    #[test]
    fn parse_error_on_missing_colon_is_reported_and_recovers() {
        let (program, sink) = parse_str("if x\n    y = 1\nz = 2\n");
        assert!(!sink.is_empty());
        // Recovery should still let us parse the trailing statement.
        assert!(program.statements.iter().any(|s| matches!(s.kind, StmtKind::ExprStmt(_) | StmtKind::Assignment { .. })));
    }

    #[test]
    fn parses_ternary_above_or() {
        let (program, sink) = parse_str("z = a or b ? c : d\n");
        assert!(sink.is_empty());
        let StmtKind::Assignment { value, .. } = &program.statements[0].kind else {
            panic!("expected assignment");
        };
        assert!(matches!(value.kind, ExprKind::Ternary { .. }));
    }
}

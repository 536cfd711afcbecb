//! Recursive-descent parser
//!
//! Consumes the token stream and builds the AST. Expressions use precedence
//! climbing with left-associative binary operators; prefix and postfix
//! `++`/`--` are statements with assignment effect, never expression-valued.
//!
//! Constraints enforced while parsing:
//! - `break`/`continue` only inside a loop
//! - assignment targets restricted to the l-value forms (identifier, array
//!   index, dereference)
//! - a function name must not be defined twice
//! - a `register` variable must be named `r0`..`r31`, and `r31` is read-only

use std::collections::HashSet;

use tracing::debug;
use volt_core::ast::IncDec;
use volt_core::{BinOp, Diagnostic, Expr, Function, Item, Program, Stmt, UnOp, VarType};
use volt_core::{SourcePos, Token, TokenKind};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Names of functions already defined, for redefinition checks
    defined: HashSet<String>,
    /// Nesting depth of enclosing loops
    loop_depth: u32,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser {
            tokens,
            pos: 0,
            defined: HashSet::new(),
            loop_depth: 0,
        }
    }

    pub fn parse(mut self) -> Result<Program, Diagnostic> {
        debug!(tokens = self.tokens.len(), "parsing");
        let mut program = Program::new();
        while !self.check(&TokenKind::Eof) {
            let item = self.parse_item()?;
            program.items.push(item);
        }
        Ok(program)
    }

    // ----- token plumbing -----

    fn peek(&self) -> &Token {
        self.tokens
            .get(self.pos)
            .unwrap_or_else(|| &self.tokens[self.tokens.len() - 1])
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn pos_here(&self) -> SourcePos {
        self.peek().pos.clone()
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<Token, Diagnostic> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error(format!("expected '{}', found '{}'", kind, self.peek_kind())))
        }
    }

    fn error(&self, message: impl Into<String>) -> Diagnostic {
        Diagnostic::parse(self.pos_here(), message)
    }

    fn expect_ident(&mut self, what: &str) -> Result<(String, SourcePos), Diagnostic> {
        match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                let pos = self.pos_here();
                self.advance();
                Ok((name, pos))
            }
            other => Err(self.error(format!("expected {what}, found '{other}'"))),
        }
    }

    // ----- top level -----

    fn parse_item(&mut self) -> Result<Item, Diagnostic> {
        let interrupt = self.eat(&TokenKind::Interrupt);
        if interrupt && !self.check(&TokenKind::Function) {
            return Err(self.error("'interrupt' must be followed by 'function'"));
        }

        if self.check(&TokenKind::Function) {
            return Ok(Item::Function(self.parse_function(interrupt)?));
        }

        self.parse_global()
    }

    fn parse_function(&mut self, interrupt: bool) -> Result<Function, Diagnostic> {
        let pos = self.pos_here();
        self.expect(&TokenKind::Function)?;
        let (name, name_pos) = self.expect_ident("function name")?;

        if !self.defined.insert(name.clone()) {
            return Err(Diagnostic::parse(
                name_pos,
                format!("function '{name}' is already defined"),
            ));
        }

        self.expect(&TokenKind::LParen)?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                let (param, _) = self.expect_ident("parameter name")?;
                params.push(param);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen)?;

        let body = self.parse_block()?;
        Ok(Function {
            name,
            params,
            body,
            interrupt,
            pos,
        })
    }

    /// Global scalar or array declaration. Pointers live only in function
    /// scope; a file-scope pointer is rejected here.
    fn parse_global(&mut self) -> Result<Item, Diagnostic> {
        let pos = self.pos_here();
        let volatile = self.eat(&TokenKind::Volatile);
        if self.check(&TokenKind::Register) {
            return Err(self.error("'register' is not valid at file scope"));
        }
        let ty = self.parse_var_type()?;

        if self.check(&TokenKind::Star) {
            return Err(self.error("pointer declarations are not allowed at file scope"));
        }
        let (name, _) = self.expect_ident("global variable name")?;

        if self.eat(&TokenKind::LBracket) {
            let len = self.parse_array_len()?;
            self.expect(&TokenKind::RBracket)?;
            let init = if self.eat(&TokenKind::Assign) {
                self.parse_initializer_list(len)?
            } else {
                Vec::new()
            };
            self.expect(&TokenKind::Semi)?;
            return Ok(Item::GlobalArray {
                name,
                ty,
                len,
                init,
                pos,
            });
        }

        let init = if self.eat(&TokenKind::Assign) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        self.expect(&TokenKind::Semi)?;
        Ok(Item::GlobalVar {
            name,
            ty,
            volatile,
            init,
            pos,
        })
    }

    fn parse_var_type(&mut self) -> Result<VarType, Diagnostic> {
        match self.peek_kind() {
            TokenKind::Uint32 => {
                self.advance();
                Ok(VarType::U32)
            }
            TokenKind::Int32 => {
                self.advance();
                Ok(VarType::I32)
            }
            other => Err(self.error(format!("expected type, found '{other}'"))),
        }
    }

    fn parse_array_len(&mut self) -> Result<u32, Diagnostic> {
        match *self.peek_kind() {
            TokenKind::Int(len) if len > 0 => {
                self.advance();
                Ok(len)
            }
            TokenKind::Int(_) => Err(self.error("array length must be positive")),
            ref other => Err(self.error(format!("expected array length, found '{other}'"))),
        }
    }

    fn parse_initializer_list(&mut self, len: u32) -> Result<Vec<Expr>, Diagnostic> {
        self.expect(&TokenKind::LBrace)?;
        let mut init = Vec::new();
        if !self.check(&TokenKind::RBrace) {
            loop {
                init.push(self.parse_expr()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        let close = self.expect(&TokenKind::RBrace)?;
        if init.len() as u32 > len {
            return Err(Diagnostic::parse(
                close.pos,
                format!(
                    "too many initializers: array has length {len}, got {}",
                    init.len()
                ),
            ));
        }
        Ok(init)
    }

    // ----- statements -----

    fn parse_block(&mut self) -> Result<Vec<Stmt>, Diagnostic> {
        self.expect(&TokenKind::LBrace)?;
        let mut body = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            if self.check(&TokenKind::Eof) {
                return Err(self.error("unexpected end of input inside block (missing '}')"));
            }
            body.push(self.parse_stmt()?);
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(body)
    }

    /// Control-flow bodies are either a brace block or a single statement.
    fn parse_body(&mut self) -> Result<Vec<Stmt>, Diagnostic> {
        if self.check(&TokenKind::LBrace) {
            self.parse_block()
        } else {
            Ok(vec![self.parse_stmt()?])
        }
    }

    fn parse_stmt(&mut self) -> Result<Stmt, Diagnostic> {
        let pos = self.pos_here();
        match self.peek_kind() {
            TokenKind::Uint32
            | TokenKind::Int32
            | TokenKind::Volatile
            | TokenKind::Register => {
                let stmt = self.parse_declaration()?;
                self.expect(&TokenKind::Semi)?;
                Ok(stmt)
            }
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::Do => self.parse_do_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::Return => {
                self.advance();
                let value = if self.check(&TokenKind::Semi) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect(&TokenKind::Semi)?;
                Ok(Stmt::Return { value, pos })
            }
            TokenKind::Break => {
                self.advance();
                if self.loop_depth == 0 {
                    return Err(Diagnostic::parse(pos, "'break' outside of a loop"));
                }
                self.expect(&TokenKind::Semi)?;
                Ok(Stmt::Break { pos })
            }
            TokenKind::Continue => {
                self.advance();
                if self.loop_depth == 0 {
                    return Err(Diagnostic::parse(pos, "'continue' outside of a loop"));
                }
                self.expect(&TokenKind::Semi)?;
                Ok(Stmt::Continue { pos })
            }
            TokenKind::LBrace => {
                let body = self.parse_block()?;
                Ok(Stmt::Block { body, pos })
            }
            TokenKind::Asm => {
                self.advance();
                let text = match self.peek_kind().clone() {
                    TokenKind::AsmText(text) => {
                        self.advance();
                        text
                    }
                    other => {
                        return Err(self.error(format!("expected asm block, found '{other}'")));
                    }
                };
                self.expect(&TokenKind::Semi)?;
                Ok(Stmt::Asm { text, pos })
            }
            _ => {
                let stmt = self.parse_simple_stmt()?;
                self.expect(&TokenKind::Semi)?;
                Ok(stmt)
            }
        }
    }

    /// Declaration of a scalar, array, or pointer with optional qualifiers.
    /// Does not consume the trailing `;` so `for`-inits can reuse it.
    fn parse_declaration(&mut self) -> Result<Stmt, Diagnostic> {
        let pos = self.pos_here();
        let mut volatile = false;
        let mut register = false;
        loop {
            if self.eat(&TokenKind::Volatile) {
                volatile = true;
            } else if self.eat(&TokenKind::Register) {
                register = true;
            } else {
                break;
            }
        }

        let ty = self.parse_var_type()?;

        if self.eat(&TokenKind::Star) {
            if register {
                return Err(self.error("'register' is not valid on pointer declarations"));
            }
            let (name, _) = self.expect_ident("pointer name")?;
            let init = if self.eat(&TokenKind::Assign) {
                Some(self.parse_expr()?)
            } else {
                None
            };
            return Ok(Stmt::PtrDecl {
                name,
                ty,
                init,
                pos,
            });
        }

        let (name, name_pos) = self.expect_ident("variable name")?;

        if self.check(&TokenKind::LBracket) {
            if volatile || register {
                return Err(self.error("qualifiers are not valid on array declarations"));
            }
            self.advance();
            let len = self.parse_array_len()?;
            self.expect(&TokenKind::RBracket)?;
            let init = if self.eat(&TokenKind::Assign) {
                self.parse_initializer_list(len)?
            } else {
                Vec::new()
            };
            return Ok(Stmt::ArrayDecl {
                name,
                ty,
                len,
                init,
                pos,
            });
        }

        if register {
            check_register_name(&name, &name_pos)?;
        }

        let init = if self.eat(&TokenKind::Assign) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        Ok(Stmt::VarDecl {
            name,
            ty,
            volatile,
            register,
            init,
            pos,
        })
    }

    fn parse_if(&mut self) -> Result<Stmt, Diagnostic> {
        let pos = self.pos_here();
        self.expect(&TokenKind::If)?;
        self.expect(&TokenKind::LParen)?;
        let cond = self.parse_expr()?;
        self.expect(&TokenKind::RParen)?;
        let then_body = self.parse_body()?;

        let else_body = if self.eat(&TokenKind::Else) {
            if self.check(&TokenKind::If) {
                // `else if` chains as a single-statement else block
                let chained = self.parse_if()?;
                Some(vec![chained])
            } else {
                Some(self.parse_body()?)
            }
        } else {
            None
        };

        Ok(Stmt::If {
            cond,
            then_body,
            else_body,
            pos,
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, Diagnostic> {
        let pos = self.pos_here();
        self.expect(&TokenKind::While)?;
        self.expect(&TokenKind::LParen)?;
        let cond = self.parse_expr()?;
        self.expect(&TokenKind::RParen)?;

        self.loop_depth += 1;
        let body = self.parse_body();
        self.loop_depth -= 1;

        Ok(Stmt::While {
            cond,
            body: body?,
            pos,
        })
    }

    fn parse_do_while(&mut self) -> Result<Stmt, Diagnostic> {
        let pos = self.pos_here();
        self.expect(&TokenKind::Do)?;

        self.loop_depth += 1;
        let body = self.parse_body();
        self.loop_depth -= 1;
        let body = body?;

        self.expect(&TokenKind::While)?;
        self.expect(&TokenKind::LParen)?;
        let cond = self.parse_expr()?;
        self.expect(&TokenKind::RParen)?;
        self.expect(&TokenKind::Semi)?;

        Ok(Stmt::DoWhile { body, cond, pos })
    }

    fn parse_for(&mut self) -> Result<Stmt, Diagnostic> {
        let pos = self.pos_here();
        self.expect(&TokenKind::For)?;
        self.expect(&TokenKind::LParen)?;

        let init = if self.check(&TokenKind::Semi) {
            None
        } else if matches!(
            self.peek_kind(),
            TokenKind::Uint32 | TokenKind::Int32 | TokenKind::Volatile | TokenKind::Register
        ) {
            Some(Box::new(self.parse_declaration()?))
        } else {
            Some(Box::new(self.parse_simple_stmt()?))
        };
        self.expect(&TokenKind::Semi)?;

        let cond = if self.check(&TokenKind::Semi) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(&TokenKind::Semi)?;

        let step = if self.check(&TokenKind::RParen) {
            None
        } else {
            Some(Box::new(self.parse_simple_stmt()?))
        };
        self.expect(&TokenKind::RParen)?;

        self.loop_depth += 1;
        let body = self.parse_body();
        self.loop_depth -= 1;

        Ok(Stmt::For {
            init,
            cond,
            step,
            body: body?,
            pos,
        })
    }

    /// Assignment, compound assignment, increment/decrement, or a call in
    /// statement position. No trailing `;` so `for` headers can reuse it.
    fn parse_simple_stmt(&mut self) -> Result<Stmt, Diagnostic> {
        let pos = self.pos_here();

        // Prefix increment/decrement
        if let Some(op) = self.peek_incdec() {
            self.advance();
            let target = self.parse_unary()?;
            self.check_lvalue(&target)?;
            return Ok(Stmt::IncDec { target, op, pos });
        }

        let expr = self.parse_unary()?;

        // Postfix increment/decrement
        if let Some(op) = self.peek_incdec() {
            self.advance();
            self.check_lvalue(&expr)?;
            return Ok(Stmt::IncDec {
                target: expr,
                op,
                pos,
            });
        }

        if self.eat(&TokenKind::Assign) {
            self.check_lvalue(&expr)?;
            let value = self.parse_expr()?;
            return Ok(Stmt::Assign {
                target: expr,
                value,
                pos,
            });
        }

        if let Some(op) = self.peek_compound_op() {
            self.advance();
            self.check_lvalue(&expr)?;
            let value = self.parse_expr()?;
            return Ok(Stmt::CompoundAssign {
                target: expr,
                op,
                value,
                pos,
            });
        }

        if let Expr::Call { name, args, pos } = expr {
            return Ok(Stmt::Call { name, args, pos });
        }

        Err(Diagnostic::parse(
            pos,
            format!("expected statement, found expression '{}'", self.peek_kind()),
        ))
    }

    fn peek_incdec(&self) -> Option<IncDec> {
        match self.peek_kind() {
            TokenKind::PlusPlus => Some(IncDec::Inc),
            TokenKind::MinusMinus => Some(IncDec::Dec),
            _ => None,
        }
    }

    fn peek_compound_op(&self) -> Option<BinOp> {
        let op = match self.peek_kind() {
            TokenKind::PlusEq => BinOp::Add,
            TokenKind::MinusEq => BinOp::Sub,
            TokenKind::StarEq => BinOp::Mul,
            TokenKind::SlashEq => BinOp::Div,
            TokenKind::PercentEq => BinOp::Mod,
            TokenKind::AmpEq => BinOp::BitAnd,
            TokenKind::PipeEq => BinOp::BitOr,
            TokenKind::CaretEq => BinOp::BitXor,
            TokenKind::ShlEq => BinOp::Shl,
            TokenKind::ShrEq => BinOp::Shr,
            _ => return None,
        };
        Some(op)
    }

    fn check_lvalue(&self, expr: &Expr) -> Result<(), Diagnostic> {
        if expr.is_lvalue() {
            Ok(())
        } else {
            Err(Diagnostic::parse(
                expr.pos().clone(),
                "target is not an l-value (expected a variable, array element, or dereference)",
            ))
        }
    }

    // ----- expressions: precedence climbing -----

    pub fn parse_expr(&mut self) -> Result<Expr, Diagnostic> {
        self.parse_logical_or()
    }

    fn parse_logical_or(&mut self) -> Result<Expr, Diagnostic> {
        let mut lhs = self.parse_logical_and()?;
        while self.check(&TokenKind::OrOr) {
            let pos = self.pos_here();
            self.advance();
            let rhs = self.parse_logical_and()?;
            lhs = binary(BinOp::LogOr, lhs, rhs, pos);
        }
        Ok(lhs)
    }

    fn parse_logical_and(&mut self) -> Result<Expr, Diagnostic> {
        let mut lhs = self.parse_bit_or()?;
        while self.check(&TokenKind::AndAnd) {
            let pos = self.pos_here();
            self.advance();
            let rhs = self.parse_bit_or()?;
            lhs = binary(BinOp::LogAnd, lhs, rhs, pos);
        }
        Ok(lhs)
    }

    fn parse_bit_or(&mut self) -> Result<Expr, Diagnostic> {
        let mut lhs = self.parse_bit_xor()?;
        while self.check(&TokenKind::Pipe) {
            let pos = self.pos_here();
            self.advance();
            let rhs = self.parse_bit_xor()?;
            lhs = binary(BinOp::BitOr, lhs, rhs, pos);
        }
        Ok(lhs)
    }

    fn parse_bit_xor(&mut self) -> Result<Expr, Diagnostic> {
        let mut lhs = self.parse_bit_and()?;
        while self.check(&TokenKind::Caret) {
            let pos = self.pos_here();
            self.advance();
            let rhs = self.parse_bit_and()?;
            lhs = binary(BinOp::BitXor, lhs, rhs, pos);
        }
        Ok(lhs)
    }

    fn parse_bit_and(&mut self) -> Result<Expr, Diagnostic> {
        let mut lhs = self.parse_equality()?;
        while self.check(&TokenKind::Amp) {
            let pos = self.pos_here();
            self.advance();
            let rhs = self.parse_equality()?;
            lhs = binary(BinOp::BitAnd, lhs, rhs, pos);
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr, Diagnostic> {
        let mut lhs = self.parse_relational()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::EqEq => BinOp::Eq,
                TokenKind::NotEq => BinOp::Ne,
                _ => break,
            };
            let pos = self.pos_here();
            self.advance();
            let rhs = self.parse_relational()?;
            lhs = binary(op, lhs, rhs, pos);
        }
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> Result<Expr, Diagnostic> {
        let mut lhs = self.parse_shift()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Lt => BinOp::Lt,
                TokenKind::Le => BinOp::Le,
                TokenKind::Gt => BinOp::Gt,
                TokenKind::Ge => BinOp::Ge,
                _ => break,
            };
            let pos = self.pos_here();
            self.advance();
            let rhs = self.parse_shift()?;
            lhs = binary(op, lhs, rhs, pos);
        }
        Ok(lhs)
    }

    fn parse_shift(&mut self) -> Result<Expr, Diagnostic> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Shl => BinOp::Shl,
                TokenKind::Shr => BinOp::Shr,
                _ => break,
            };
            let pos = self.pos_here();
            self.advance();
            let rhs = self.parse_additive()?;
            lhs = binary(op, lhs, rhs, pos);
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, Diagnostic> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            let pos = self.pos_here();
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = binary(op, lhs, rhs, pos);
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, Diagnostic> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::Percent => BinOp::Mod,
                _ => break,
            };
            let pos = self.pos_here();
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = binary(op, lhs, rhs, pos);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, Diagnostic> {
        let pos = self.pos_here();
        match self.peek_kind() {
            TokenKind::Bang => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(unary(UnOp::Not, operand, pos))
            }
            TokenKind::Tilde => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(unary(UnOp::BitNot, operand, pos))
            }
            TokenKind::Minus => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(unary(UnOp::Neg, operand, pos))
            }
            TokenKind::Amp => {
                self.advance();
                let target = self.parse_unary()?;
                if !target.is_lvalue() {
                    return Err(Diagnostic::parse(
                        target.pos().clone(),
                        "'&' requires a variable or array element",
                    ));
                }
                Ok(Expr::AddrOf {
                    target: Box::new(target),
                    pos,
                })
            }
            TokenKind::Star => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expr::Deref {
                    operand: Box::new(operand),
                    pos,
                })
            }
            TokenKind::PlusPlus | TokenKind::MinusMinus => Err(Diagnostic::parse(
                pos,
                "'++'/'--' are statements, not expression operators",
            )),
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek_kind() {
                TokenKind::LBracket => {
                    let pos = self.pos_here();
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(&TokenKind::RBracket)?;
                    expr = Expr::Index {
                        base: Box::new(expr),
                        index: Box::new(index),
                        pos,
                    };
                }
                TokenKind::LParen => {
                    let pos = self.pos_here();
                    let name = match &expr {
                        Expr::Ident { name, .. } => name.clone(),
                        _ => {
                            return Err(Diagnostic::parse(
                                pos,
                                "calls must target a function name",
                            ));
                        }
                    };
                    self.advance();
                    let mut args = Vec::new();
                    if !self.check(&TokenKind::RParen) {
                        loop {
                            args.push(self.parse_expr()?);
                            if !self.eat(&TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(&TokenKind::RParen)?;
                    expr = Expr::Call { name, args, pos };
                }
                TokenKind::PlusPlus | TokenKind::MinusMinus => {
                    // Valid only in statement position; parse_simple_stmt
                    // consumes it before we ever get here.
                    break;
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, Diagnostic> {
        let pos = self.pos_here();
        match self.peek_kind().clone() {
            TokenKind::Int(value) => {
                self.advance();
                Ok(Expr::Int { value, pos })
            }
            TokenKind::Ident(name) => {
                self.advance();
                Ok(Expr::Ident { name, pos })
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(&TokenKind::RParen)?;
                Ok(expr)
            }
            other => Err(self.error(format!("expected expression, found '{other}'"))),
        }
    }
}

fn binary(op: BinOp, lhs: Expr, rhs: Expr, pos: SourcePos) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
        pos,
    }
}

fn unary(op: UnOp, operand: Expr, pos: SourcePos) -> Expr {
    Expr::Unary {
        op,
        operand: Box::new(operand),
        pos,
    }
}

/// `register` variables must name an ISA register; `r31` is the program
/// counter and cannot be bound.
fn check_register_name(name: &str, pos: &SourcePos) -> Result<(), Diagnostic> {
    let index = name
        .strip_prefix('r')
        .and_then(|digits| digits.parse::<u32>().ok())
        .filter(|n| *n <= 31 && (name.len() == 2 || !name[1..].starts_with('0')));

    match index {
        Some(31) => Err(Diagnostic::parse(
            pos.clone(),
            "register 'r31' is the program counter and is read-only",
        )),
        Some(_) => Ok(()),
        None => Err(Diagnostic::parse(
            pos.clone(),
            format!("'register' variables must be named r0..r31, got '{name}'"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::preprocessor::{PreprocessedSource, SourceLine};

    fn parse_source(text: &str) -> Result<Program, Diagnostic> {
        let lines = text
            .lines()
            .enumerate()
            .map(|(i, l)| SourceLine {
                text: l.to_string(),
                file: "test.sc".to_string(),
                line: i as u32 + 1,
            })
            .collect();
        let tokens = Lexer::new(&PreprocessedSource { lines }).tokenize()?;
        Parser::new(tokens).parse()
    }

    fn parse_main_body(body: &str) -> Vec<Stmt> {
        let source = format!("function main() {{ {body} }}");
        let program = parse_source(&source).unwrap();
        match &program.items[0] {
            Item::Function(f) => f.body.clone(),
            other => panic!("expected function, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_minimal_main() {
        let program = parse_source("function main() { return 0; }").unwrap();
        let main = program.find_function("main").unwrap();
        assert!(main.params.is_empty());
        assert!(!main.interrupt);
        assert!(matches!(main.body[0], Stmt::Return { .. }));
    }

    #[test]
    fn test_parse_interrupt_function() {
        let program = parse_source("interrupt function on_timer() { return; }").unwrap();
        assert!(program.find_function("on_timer").unwrap().interrupt);
    }

    #[test]
    fn test_precedence_mul_over_add() {
        let body = parse_main_body("return 2 + 3 * 4;");
        let Stmt::Return {
            value: Some(Expr::Binary { op, lhs, rhs, .. }),
            ..
        } = &body[0]
        else {
            panic!("expected return with binary expression");
        };
        assert_eq!(*op, BinOp::Add);
        assert!(matches!(**lhs, Expr::Int { value: 2, .. }));
        assert!(matches!(**rhs, Expr::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn test_left_associativity() {
        let body = parse_main_body("return 10 - 3 - 2;");
        let Stmt::Return {
            value: Some(Expr::Binary { op, lhs, .. }),
            ..
        } = &body[0]
        else {
            panic!("expected return");
        };
        assert_eq!(*op, BinOp::Sub);
        // (10 - 3) - 2
        assert!(matches!(**lhs, Expr::Binary { op: BinOp::Sub, .. }));
    }

    #[test]
    fn test_parse_declarations() {
        let body = parse_main_body(
            "uint32 a = 1; volatile int32 b; uint32 arr[4] = {1, 2}; uint32* p = &arr[0];",
        );
        assert!(matches!(
            body[0],
            Stmt::VarDecl {
                ty: VarType::U32,
                volatile: false,
                init: Some(_),
                ..
            }
        ));
        assert!(matches!(
            body[1],
            Stmt::VarDecl {
                ty: VarType::I32,
                volatile: true,
                init: None,
                ..
            }
        ));
        assert!(matches!(body[2], Stmt::ArrayDecl { len: 4, .. }));
        assert!(matches!(body[3], Stmt::PtrDecl { .. }));
    }

    #[test]
    fn test_register_declaration() {
        let body = parse_main_body("register uint32 r5 = 1;");
        assert!(matches!(body[0], Stmt::VarDecl { register: true, .. }));

        let err = parse_source("function main() { register uint32 speed; }").unwrap_err();
        assert!(err.message.contains("r0..r31"));

        let err = parse_source("function main() { register uint32 r31; }").unwrap_err();
        assert!(err.message.contains("read-only"));
    }

    #[test]
    fn test_control_flow_forms() {
        let body = parse_main_body(
            "if (1) { return 1; } else { return 2; } \
             while (1) { break; } \
             do { continue; } while (0); \
             for (uint32 i = 0; i < 10; i++) { }",
        );
        assert!(matches!(body[0], Stmt::If { else_body: Some(_), .. }));
        assert!(matches!(body[1], Stmt::While { .. }));
        assert!(matches!(body[2], Stmt::DoWhile { .. }));
        assert!(matches!(
            body[3],
            Stmt::For {
                init: Some(_),
                cond: Some(_),
                step: Some(_),
                ..
            }
        ));
    }

    #[test]
    fn test_braceless_control_bodies() {
        let body = parse_main_body("if (1) return 1; while (0) continue; return 0;");
        let Stmt::If { then_body, .. } = &body[0] else {
            panic!("expected if");
        };
        assert_eq!(then_body.len(), 1);
        assert!(matches!(then_body[0], Stmt::Return { .. }));
        assert!(matches!(body[1], Stmt::While { .. }));
    }

    #[test]
    fn test_else_if_chain() {
        let body = parse_main_body("if (1) { } else if (2) { } else { }");
        let Stmt::If {
            else_body: Some(else_body),
            ..
        } = &body[0]
        else {
            panic!("expected if");
        };
        assert!(matches!(else_body[0], Stmt::If { else_body: Some(_), .. }));
    }

    #[test]
    fn test_break_outside_loop() {
        let err = parse_source("function main() { break; }").unwrap_err();
        assert!(err.message.contains("'break' outside of a loop"));
    }

    #[test]
    fn test_continue_in_if_inside_loop_is_ok() {
        parse_main_body("while (1) { if (1) { continue; } }");
    }

    #[test]
    fn test_duplicate_function() {
        let err =
            parse_source("function f() { return; } function f() { return; }").unwrap_err();
        assert!(err.message.contains("already defined"));
    }

    #[test]
    fn test_lvalue_checks() {
        let err = parse_source("function main() { 5 = 3; }").unwrap_err();
        assert_eq!(err.kind, volt_core::DiagKind::Parse);

        let err = parse_source("function main() { f() = 3; }").unwrap_err();
        assert!(err.message.contains("l-value"));

        // All three legal l-value forms
        parse_main_body("uint32 a[2]; uint32* p; uint32 x; x = 1; a[0] = 2; *p = 3;");
    }

    #[test]
    fn test_incdec_statements() {
        let body = parse_main_body("uint32 i; ++i; i--;");
        assert!(matches!(
            body[1],
            Stmt::IncDec {
                op: IncDec::Inc,
                ..
            }
        ));
        assert!(matches!(
            body[2],
            Stmt::IncDec {
                op: IncDec::Dec,
                ..
            }
        ));
    }

    #[test]
    fn test_incdec_not_expression() {
        let err = parse_source("function main() { uint32 a; uint32 b = ++a; }").unwrap_err();
        assert!(err.message.contains("statements"));

        // Postfix form dies on the statement boundary instead
        let err = parse_source("function main() { uint32 a; uint32 b = a++ + 1; }").unwrap_err();
        assert!(err.message.contains("';'"));
    }

    #[test]
    fn test_compound_assignment() {
        let body = parse_main_body("uint32 a; a += 2; a <<= 1;");
        assert!(matches!(
            body[1],
            Stmt::CompoundAssign { op: BinOp::Add, .. }
        ));
        assert!(matches!(
            body[2],
            Stmt::CompoundAssign { op: BinOp::Shl, .. }
        ));
    }

    #[test]
    fn test_missing_semicolon() {
        let err = parse_source("function main() { return 0 }").unwrap_err();
        assert!(err.message.contains("';'"));
    }

    #[test]
    fn test_globals() {
        let program = parse_source("uint32 g = 5; uint32 table[3] = {1, 2, 3}; volatile uint32 status;").unwrap();
        assert!(matches!(program.items[0], Item::GlobalVar { init: Some(_), .. }));
        assert!(matches!(program.items[1], Item::GlobalArray { len: 3, .. }));
        assert!(matches!(
            program.items[2],
            Item::GlobalVar {
                volatile: true,
                init: None,
                ..
            }
        ));
    }

    #[test]
    fn test_global_pointer_rejected() {
        let err = parse_source("uint32* p;").unwrap_err();
        assert!(err.message.contains("file scope"));
    }

    #[test]
    fn test_too_many_initializers() {
        let err = parse_source("uint32 a[2] = {1, 2, 3};").unwrap_err();
        assert!(err.message.contains("too many initializers"));
    }

    #[test]
    fn test_asm_statement() {
        let body = parse_main_body("asm { mov r0, 1 };");
        let Stmt::Asm { text, .. } = &body[0] else {
            panic!("expected asm");
        };
        assert_eq!(text.trim(), "mov r0, 1");
    }

    #[test]
    fn test_call_statement_and_expression() {
        let body = parse_main_body("uart_write(72); uint32 s = uart_get_status();");
        assert!(matches!(body[0], Stmt::Call { .. }));
        let Stmt::VarDecl {
            init: Some(Expr::Call { ref name, .. }),
            ..
        } = body[1]
        else {
            panic!("expected call initializer");
        };
        assert_eq!(name, "uart_get_status");
    }

    #[test]
    fn test_address_of_requires_lvalue() {
        let err = parse_source("function main() { uint32* p = &5; }").unwrap_err();
        assert!(err.message.contains("'&'"));
    }

    #[test]
    fn test_pointer_expression_forms() {
        let body = parse_main_body("uint32 a[2]; uint32* p = &a[1]; uint32 v = *(p + 1) + a[0];");
        assert!(matches!(body[1], Stmt::PtrDecl { init: Some(Expr::AddrOf { .. }), .. }));
    }

    #[test]
    fn test_determinism() {
        let source = "function main() { uint32 i; for (i = 0; i < 3; i++) { uart_write(i); } return i; }";
        let a = parse_source(source).unwrap();
        let b = parse_source(source).unwrap();
        assert_eq!(a, b);
    }
}

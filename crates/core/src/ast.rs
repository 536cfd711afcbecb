//! Abstract Syntax Tree
//!
//! Closed sum types per syntactic category, matched exhaustively by both the
//! interpreter and the code generator. Every node carries the original
//! [`SourcePos`] so downstream diagnostics can point at real source.

use crate::diag::SourcePos;

/// Declared scalar type. Signedness only changes division, modulo,
/// comparison, and unary negation; storage is always a 32-bit word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarType {
    U32,
    I32,
}

/// Binary operators, lowest-level tag shared by expressions and
/// compound assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    LogAnd,
    LogOr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOp {
    /// True for `== != < <= > >=` (result is always 0 or 1).
    pub fn is_relational(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }

    /// True for `&&` and `||` (short-circuit, result 0 or 1).
    pub fn is_logical(self) -> bool {
        matches!(self, BinOp::LogAnd | BinOp::LogOr)
    }
}

/// Unary prefix operators. Prefix `++`/`--` are statements, not expressions,
/// so they do not appear here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    /// `!e` — 1 if the operand is zero, else 0
    Not,
    /// `~e` — bitwise complement
    BitNot,
    /// `-e` — two's-complement negation
    Neg,
}

/// Expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int {
        value: u32,
        pos: SourcePos,
    },
    Ident {
        name: String,
        pos: SourcePos,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        pos: SourcePos,
    },
    Unary {
        op: UnOp,
        operand: Box<Expr>,
        pos: SourcePos,
    },
    /// `name(args...)` — user function or peripheral intrinsic
    Call {
        name: String,
        args: Vec<Expr>,
        pos: SourcePos,
    },
    /// `base[index]` — exactly `*(base + 4*index)`
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
        pos: SourcePos,
    },
    /// `&target` where target is an identifier or array index
    AddrOf {
        target: Box<Expr>,
        pos: SourcePos,
    },
    /// `*operand` — little-endian word load at the computed address
    Deref {
        operand: Box<Expr>,
        pos: SourcePos,
    },
}

impl Expr {
    pub fn pos(&self) -> &SourcePos {
        match self {
            Expr::Int { pos, .. }
            | Expr::Ident { pos, .. }
            | Expr::Binary { pos, .. }
            | Expr::Unary { pos, .. }
            | Expr::Call { pos, .. }
            | Expr::Index { pos, .. }
            | Expr::AddrOf { pos, .. }
            | Expr::Deref { pos, .. } => pos,
        }
    }

    /// True for the three l-value forms: identifier, array index,
    /// pointer dereference.
    pub fn is_lvalue(&self) -> bool {
        matches!(
            self,
            Expr::Ident { .. } | Expr::Index { .. } | Expr::Deref { .. }
        )
    }
}

/// Increment or decrement, shared by the prefix and postfix statement forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncDec {
    Inc,
    Dec,
}

/// Statements.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `uint32 x;` / `volatile int32 y = e;` / `register uint32 r5 = e;`
    VarDecl {
        name: String,
        ty: VarType,
        volatile: bool,
        register: bool,
        init: Option<Expr>,
        pos: SourcePos,
    },
    /// `uint32 a[N] = {e, ...};`
    ArrayDecl {
        name: String,
        ty: VarType,
        len: u32,
        init: Vec<Expr>,
        pos: SourcePos,
    },
    /// `uint32* p = e;`
    PtrDecl {
        name: String,
        ty: VarType,
        init: Option<Expr>,
        pos: SourcePos,
    },
    /// `lvalue = e;`
    Assign {
        target: Expr,
        value: Expr,
        pos: SourcePos,
    },
    /// `lvalue op= e;`
    CompoundAssign {
        target: Expr,
        op: BinOp,
        value: Expr,
        pos: SourcePos,
    },
    /// `++x;` / `x--;` — exactly one application of the effect
    IncDec {
        target: Expr,
        op: IncDec,
        pos: SourcePos,
    },
    If {
        cond: Expr,
        then_body: Vec<Stmt>,
        else_body: Option<Vec<Stmt>>,
        pos: SourcePos,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
        pos: SourcePos,
    },
    DoWhile {
        body: Vec<Stmt>,
        cond: Expr,
        pos: SourcePos,
    },
    /// `for (init; cond; step) body` — init and body share one block scope
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        step: Option<Box<Stmt>>,
        body: Vec<Stmt>,
        pos: SourcePos,
    },
    Return {
        value: Option<Expr>,
        pos: SourcePos,
    },
    Break {
        pos: SourcePos,
    },
    Continue {
        pos: SourcePos,
    },
    /// Bare `{ ... }` block
    Block {
        body: Vec<Stmt>,
        pos: SourcePos,
    },
    /// `asm { ... };` — opaque text, statement position only
    Asm {
        text: String,
        pos: SourcePos,
    },
    /// Function call in statement position
    Call {
        name: String,
        args: Vec<Expr>,
        pos: SourcePos,
    },
}

impl Stmt {
    pub fn pos(&self) -> &SourcePos {
        match self {
            Stmt::VarDecl { pos, .. }
            | Stmt::ArrayDecl { pos, .. }
            | Stmt::PtrDecl { pos, .. }
            | Stmt::Assign { pos, .. }
            | Stmt::CompoundAssign { pos, .. }
            | Stmt::IncDec { pos, .. }
            | Stmt::If { pos, .. }
            | Stmt::While { pos, .. }
            | Stmt::DoWhile { pos, .. }
            | Stmt::For { pos, .. }
            | Stmt::Return { pos, .. }
            | Stmt::Break { pos }
            | Stmt::Continue { pos }
            | Stmt::Block { pos, .. }
            | Stmt::Asm { pos, .. }
            | Stmt::Call { pos, .. } => pos,
        }
    }
}

/// A function definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    pub interrupt: bool,
    pub pos: SourcePos,
}

/// Top-level items.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Function(Function),
    /// `uint32 g = e;` at file scope
    GlobalVar {
        name: String,
        ty: VarType,
        volatile: bool,
        init: Option<Expr>,
        pos: SourcePos,
    },
    /// `uint32 table[N] = {e, ...};` at file scope
    GlobalArray {
        name: String,
        ty: VarType,
        len: u32,
        init: Vec<Expr>,
        pos: SourcePos,
    },
}

/// Root of the AST: top-level items in source order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub items: Vec<Item>,
}

impl Program {
    pub fn new() -> Self {
        Program { items: Vec::new() }
    }

    pub fn find_function(&self, name: &str) -> Option<&Function> {
        self.items.iter().find_map(|item| match item {
            Item::Function(f) if f.name == name => Some(f),
            _ => None,
        })
    }

    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.items.iter().filter_map(|item| match item {
            Item::Function(f) => Some(f),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos() -> SourcePos {
        SourcePos::new("test.sc", 1, 1)
    }

    #[test]
    fn test_find_function() {
        let program = Program {
            items: vec![
                Item::GlobalVar {
                    name: "g".into(),
                    ty: VarType::U32,
                    volatile: false,
                    init: None,
                    pos: pos(),
                },
                Item::Function(Function {
                    name: "main".into(),
                    params: vec![],
                    body: vec![],
                    interrupt: false,
                    pos: pos(),
                }),
            ],
        };

        assert!(program.find_function("main").is_some());
        assert!(program.find_function("g").is_none());
        assert_eq!(program.functions().count(), 1);
    }

    #[test]
    fn test_lvalue_forms() {
        let ident = Expr::Ident {
            name: "x".into(),
            pos: pos(),
        };
        assert!(ident.is_lvalue());

        let deref = Expr::Deref {
            operand: Box::new(ident.clone()),
            pos: pos(),
        };
        assert!(deref.is_lvalue());

        let index = Expr::Index {
            base: Box::new(ident.clone()),
            index: Box::new(Expr::Int { value: 0, pos: pos() }),
            pos: pos(),
        };
        assert!(index.is_lvalue());

        let call = Expr::Call {
            name: "f".into(),
            args: vec![],
            pos: pos(),
        };
        assert!(!call.is_lvalue());
    }
}

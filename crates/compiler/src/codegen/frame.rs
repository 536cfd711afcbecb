//! Frame layout pre-pass
//!
//! Before lowering a function the generator walks its body once to size the
//! stack frame: one word per scalar or pointer declaration site (parameters
//! included), plus the full extent of each local array. Every declaration
//! site gets a reserved slot even if the variable ends up in a register, so
//! the prologue can carve the whole frame in one step and loops never
//! re-reserve array storage per iteration.
//!
//! The pass also records which names have their address taken (those must
//! live in memory, not a register) and which ISA registers are pinned by
//! `register`-qualified declarations.

use std::collections::HashSet;

use volt_core::{Expr, Function, Stmt};

#[derive(Debug, Default)]
pub struct FrameInfo {
    /// Total frame size in words, excluding the saved-link cell
    pub words: u32,
    /// Names whose address is taken anywhere in the function
    pub addr_taken: HashSet<String>,
    /// ISA registers pinned by `register` declarations
    pub pinned_regs: Vec<u8>,
}

/// Parse the register index out of a `register`-qualified variable name.
/// The parser has already validated the `r0`..`r30` shape.
pub fn pinned_reg_index(name: &str) -> Option<u8> {
    name.strip_prefix('r').and_then(|d| d.parse::<u8>().ok())
}

pub fn analyze_function(function: &Function) -> FrameInfo {
    let mut info = FrameInfo {
        words: function.params.len() as u32,
        ..FrameInfo::default()
    };
    scan_stmts(&function.body, &mut info);
    info
}

fn scan_stmts(stmts: &[Stmt], info: &mut FrameInfo) {
    for stmt in stmts {
        scan_stmt(stmt, info);
    }
}

fn scan_stmt(stmt: &Stmt, info: &mut FrameInfo) {
    match stmt {
        Stmt::VarDecl {
            name,
            register,
            init,
            ..
        } => {
            info.words += 1;
            if *register {
                if let Some(reg) = pinned_reg_index(name) {
                    if !info.pinned_regs.contains(&reg) {
                        info.pinned_regs.push(reg);
                    }
                }
            }
            if let Some(init) = init {
                scan_expr(init, info);
            }
        }
        Stmt::ArrayDecl { len, init, .. } => {
            info.words += len;
            for expr in init {
                scan_expr(expr, info);
            }
        }
        Stmt::PtrDecl { init, .. } => {
            info.words += 1;
            if let Some(init) = init {
                scan_expr(init, info);
            }
        }
        Stmt::Assign { target, value, .. } | Stmt::CompoundAssign { target, value, .. } => {
            scan_expr(target, info);
            scan_expr(value, info);
        }
        Stmt::IncDec { target, .. } => scan_expr(target, info),
        Stmt::If {
            cond,
            then_body,
            else_body,
            ..
        } => {
            scan_expr(cond, info);
            scan_stmts(then_body, info);
            if let Some(else_body) = else_body {
                scan_stmts(else_body, info);
            }
        }
        Stmt::While { cond, body, .. } | Stmt::DoWhile { body, cond, .. } => {
            scan_expr(cond, info);
            scan_stmts(body, info);
        }
        Stmt::For {
            init,
            cond,
            step,
            body,
            ..
        } => {
            if let Some(init) = init {
                scan_stmt(init, info);
            }
            if let Some(cond) = cond {
                scan_expr(cond, info);
            }
            if let Some(step) = step {
                scan_stmt(step, info);
            }
            scan_stmts(body, info);
        }
        Stmt::Return { value, .. } => {
            if let Some(value) = value {
                scan_expr(value, info);
            }
        }
        Stmt::Block { body, .. } => scan_stmts(body, info),
        Stmt::Call { args, .. } => {
            for arg in args {
                scan_expr(arg, info);
            }
        }
        Stmt::Break { .. } | Stmt::Continue { .. } | Stmt::Asm { .. } => {}
    }
}

fn scan_expr(expr: &Expr, info: &mut FrameInfo) {
    match expr {
        Expr::AddrOf { target, .. } => {
            if let Expr::Ident { name, .. } = target.as_ref() {
                info.addr_taken.insert(name.clone());
            }
            scan_expr(target, info);
        }
        Expr::Binary { lhs, rhs, .. } => {
            scan_expr(lhs, info);
            scan_expr(rhs, info);
        }
        Expr::Unary { operand, .. } => scan_expr(operand, info),
        Expr::Call { args, .. } => {
            for arg in args {
                scan_expr(arg, info);
            }
        }
        Expr::Index { base, index, .. } => {
            scan_expr(base, info);
            scan_expr(index, info);
        }
        Expr::Deref { operand, .. } => scan_expr(operand, info),
        Expr::Int { .. } | Expr::Ident { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use volt_core::SourcePos;
    use volt_core::VarType;

    fn pos() -> SourcePos {
        SourcePos::new("test.sc", 1, 1)
    }

    #[test]
    fn test_frame_counts_params_scalars_and_arrays() {
        let function = Function {
            name: "f".into(),
            params: vec!["a".into(), "b".into()],
            body: vec![
                Stmt::VarDecl {
                    name: "x".into(),
                    ty: VarType::U32,
                    volatile: false,
                    register: false,
                    init: None,
                    pos: pos(),
                },
                Stmt::ArrayDecl {
                    name: "buf".into(),
                    ty: VarType::U32,
                    len: 8,
                    init: vec![],
                    pos: pos(),
                },
            ],
            interrupt: false,
            pos: pos(),
        };

        let info = analyze_function(&function);
        assert_eq!(info.words, 2 + 1 + 8);
    }

    #[test]
    fn test_addr_taken_and_pins() {
        let function = Function {
            name: "f".into(),
            params: vec![],
            body: vec![
                Stmt::VarDecl {
                    name: "x".into(),
                    ty: VarType::U32,
                    volatile: false,
                    register: false,
                    init: None,
                    pos: pos(),
                },
                Stmt::VarDecl {
                    name: "r5".into(),
                    ty: VarType::U32,
                    volatile: false,
                    register: true,
                    init: None,
                    pos: pos(),
                },
                Stmt::PtrDecl {
                    name: "p".into(),
                    ty: VarType::U32,
                    init: Some(Expr::AddrOf {
                        target: Box::new(Expr::Ident {
                            name: "x".into(),
                            pos: pos(),
                        }),
                        pos: pos(),
                    }),
                    pos: pos(),
                },
            ],
            interrupt: false,
            pos: pos(),
        };

        let info = analyze_function(&function);
        assert!(info.addr_taken.contains("x"));
        assert_eq!(info.pinned_regs, vec![5]);
        assert_eq!(info.words, 3);
    }
}

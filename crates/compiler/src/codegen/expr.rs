//! Expression lowering
//!
//! Every expression lowers to a freshly allocated temporary holding its
//! value; operand temps are released as soon as the using instruction is
//! out. Relational results are materialized as 0/1 through the flag register
//! (`cmpe`/`cmpa`/`cmpb` + conditional moves); signed comparisons bias both
//! operands by 0x80000000 first. `*`, `/`, and `%` go through the emitted
//! helper routines.

use volt_core::{BinOp, Diagnostic, Expr, SourcePos, UnOp};

use super::intrinsics;
use super::regalloc::reg_name;
use super::{CodeGen, ExprTy, Helper, VarStorage};

/// Two's-complement sign bit, used to bias signed comparisons.
const SIGN_BIT: u32 = 0x8000_0000;

impl CodeGen<'_> {
    /// Lower an expression; returns the temp holding the value and its
    /// static type facts.
    pub(crate) fn lower_expr(&mut self, expr: &Expr) -> Result<(u8, ExprTy), Diagnostic> {
        match expr {
            Expr::Int { value, pos } => {
                let temp = self.temp(pos)?;
                self.emit(format!("\tmov {}, {value}", reg_name(temp)));
                Ok((temp, ExprTy::word()))
            }
            Expr::Ident { name, pos } => self.lower_var_read(name, pos),
            Expr::Unary { op, operand, pos } => self.lower_unary(*op, operand, pos),
            Expr::Binary { op, lhs, rhs, pos } => self.lower_binary(*op, lhs, rhs, pos),
            Expr::Call { name, args, pos } => self.lower_call_expr(name, args, pos),
            Expr::Index { base, index, pos } => {
                let (addr, elem) = self.lower_index_address(base, index, pos)?;
                self.emit(format!("\tload {0}, {0}", reg_name(addr)));
                Ok((addr, elem))
            }
            Expr::AddrOf { target, pos } => {
                let (addr, elem) = self.lower_address(target, pos)?;
                Ok((
                    addr,
                    ExprTy {
                        signed: elem.signed,
                        pointer: true,
                    },
                ))
            }
            Expr::Deref { operand, .. } => {
                // Any word can serve as an address; the machine will trap on
                // a bad one.
                let (temp, ty) = self.lower_expr(operand)?;
                self.emit(format!("\tload {0}, {0}", reg_name(temp)));
                Ok((
                    temp,
                    ExprTy {
                        signed: ty.signed,
                        pointer: false,
                    },
                ))
            }
        }
    }

    /// Read a variable into a temp. Array names decay to their base address.
    fn lower_var_read(&mut self, name: &str, pos: &SourcePos) -> Result<(u8, ExprTy), Diagnostic> {
        let storage = self.lookup(name, pos)?.clone();
        let ty = storage.ty();
        let temp = self.temp(pos)?;
        match &storage {
            VarStorage::Global { label, .. } => {
                self.emit(format!("\tmov {}, {label}", reg_name(temp)));
                if ty.array.is_none() {
                    self.emit(format!("\tload {0}, {0}", reg_name(temp)));
                }
            }
            VarStorage::Frame { offset, .. } => {
                self.emit(format!("\tmov {}, r30", reg_name(temp)));
                if *offset > 0 {
                    self.emit(format!("\tadd {}, {offset}", reg_name(temp)));
                }
                if ty.array.is_none() {
                    self.emit(format!("\tload {0}, {0}", reg_name(temp)));
                }
            }
            VarStorage::Reg { reg, .. } | VarStorage::Pinned { reg, .. } => {
                self.emit(format!("\tmov {}, {}", reg_name(temp), reg_name(*reg)));
            }
        }
        Ok((temp, ty.into()))
    }

    /// Lower an l-value to the temp holding its cell address, plus the
    /// element type behind that address.
    pub(crate) fn lower_address(
        &mut self,
        lvalue: &Expr,
        pos: &SourcePos,
    ) -> Result<(u8, ExprTy), Diagnostic> {
        match lvalue {
            Expr::Ident { name, pos } => {
                let storage = self.lookup(name, pos)?.clone();
                let ty = storage.ty();
                let elem = ExprTy {
                    signed: ty.signed,
                    pointer: ty.pointer,
                };
                let temp = self.temp(pos)?;
                match &storage {
                    VarStorage::Global { label, .. } => {
                        self.emit(format!("\tmov {}, {label}", reg_name(temp)));
                    }
                    VarStorage::Frame { offset, .. } => {
                        self.emit(format!("\tmov {}, r30", reg_name(temp)));
                        if *offset > 0 {
                            self.emit(format!("\tadd {}, {offset}", reg_name(temp)));
                        }
                    }
                    VarStorage::Reg { .. } | VarStorage::Pinned { .. } => {
                        // The frame pre-pass puts every address-taken scalar
                        // in memory, so this only triggers on bad input.
                        return Err(self.err(
                            pos,
                            format!("variable '{name}' lives in a register and has no address"),
                        ));
                    }
                }
                Ok((temp, elem))
            }
            Expr::Index { base, index, .. } => self.lower_index_address(base, index, pos),
            Expr::Deref { operand, .. } => {
                let (temp, ty) = self.lower_expr(operand)?;
                Ok((
                    temp,
                    ExprTy {
                        signed: ty.signed,
                        pointer: false,
                    },
                ))
            }
            other => Err(self.err(other.pos(), "expression is not an l-value")),
        }
    }

    /// `base[index]`: base address plus four times the index.
    fn lower_index_address(
        &mut self,
        base: &Expr,
        index: &Expr,
        _pos: &SourcePos,
    ) -> Result<(u8, ExprTy), Diagnostic> {
        let (base_temp, base_ty) = self.lower_expr(base)?;
        let (index_temp, _) = self.lower_expr(index)?;
        self.emit(format!("\tshl {}, 2", reg_name(index_temp)));
        self.emit(format!(
            "\tadd {}, {}",
            reg_name(base_temp),
            reg_name(index_temp)
        ));
        self.pools.free_temp(index_temp);
        Ok((
            base_temp,
            ExprTy {
                signed: base_ty.signed,
                pointer: false,
            },
        ))
    }

    fn lower_unary(
        &mut self,
        op: UnOp,
        operand: &Expr,
        pos: &SourcePos,
    ) -> Result<(u8, ExprTy), Diagnostic> {
        let (temp, ty) = self.lower_expr(operand)?;
        match op {
            UnOp::Not => {
                self.emit(format!("\tcmpe {}, 0", reg_name(temp)));
                self.emit(format!("\tmov {}, 0", reg_name(temp)));
                self.emit(format!("\tcmovt {}, 1", reg_name(temp)));
                Ok((temp, ExprTy::word()))
            }
            UnOp::BitNot => {
                self.emit(format!("\txor {}, {}", reg_name(temp), u32::MAX));
                Ok((temp, ExprTy { signed: ty.signed, pointer: false }))
            }
            UnOp::Neg => {
                let zero = self.temp(pos)?;
                self.emit(format!("\tmov {}, 0", reg_name(zero)));
                self.emit(format!("\tsub {}, {}", reg_name(zero), reg_name(temp)));
                self.emit(format!("\tmov {}, {}", reg_name(temp), reg_name(zero)));
                self.pools.free_temp(zero);
                Ok((temp, ExprTy { signed: true, pointer: false }))
            }
        }
    }

    fn lower_binary(
        &mut self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        pos: &SourcePos,
    ) -> Result<(u8, ExprTy), Diagnostic> {
        if op.is_logical() {
            return self.lower_logical(op, lhs, rhs, pos);
        }

        let (lt, lty) = self.lower_expr(lhs)?;
        let (rt, rty) = self.lower_expr(rhs)?;
        self.emit_binop(op, lt, lty, rt, rty, pos)
    }

    /// Apply a non-logical binary operator to two lowered operands. Consumes
    /// `rt` (and `lt` too on the helper-call paths) and returns the temp
    /// holding the result.
    pub(crate) fn emit_binop(
        &mut self,
        op: BinOp,
        lt: u8,
        lty: ExprTy,
        rt: u8,
        rty: ExprTy,
        pos: &SourcePos,
    ) -> Result<(u8, ExprTy), Diagnostic> {
        let joined = lty.join(rty);

        // Pointer arithmetic scales the integer side by the word size.
        if matches!(op, BinOp::Add | BinOp::Sub) && lty.pointer != rty.pointer {
            let int_side = if lty.pointer { rt } else { lt };
            self.emit(format!("\tshl {}, 2", reg_name(int_side)));
        }

        let result_ty = match op {
            BinOp::Add => joined,
            // Pointer difference is a plain word again
            BinOp::Sub => ExprTy {
                signed: joined.signed,
                pointer: lty.pointer && !rty.pointer,
            },
            BinOp::Shl | BinOp::Shr => ExprTy {
                signed: lty.signed,
                pointer: false,
            },
            _ if op.is_relational() => ExprTy::word(),
            _ => ExprTy {
                signed: joined.signed,
                pointer: false,
            },
        };

        match op {
            BinOp::Add => self.emit(format!("\tadd {}, {}", reg_name(lt), reg_name(rt))),
            BinOp::Sub => self.emit(format!("\tsub {}, {}", reg_name(lt), reg_name(rt))),
            BinOp::BitAnd => self.emit(format!("\tand {}, {}", reg_name(lt), reg_name(rt))),
            BinOp::BitOr => self.emit(format!("\tor {}, {}", reg_name(lt), reg_name(rt))),
            BinOp::BitXor => self.emit(format!("\txor {}, {}", reg_name(lt), reg_name(rt))),
            BinOp::Shl => self.emit(format!("\tshl {}, {}", reg_name(lt), reg_name(rt))),
            BinOp::Shr => self.emit(format!("\tshr {}, {}", reg_name(lt), reg_name(rt))),
            BinOp::Mul => {
                self.mark_helper(Helper::Mul);
                let result = self.relay_helper_call("func_mul32", lt, rt, pos)?;
                return Ok((result, result_ty));
            }
            BinOp::Div | BinOp::Mod => {
                let target = match (op, joined.signed) {
                    (BinOp::Div, false) => {
                        self.mark_helper(Helper::Udiv);
                        "func_udiv32"
                    }
                    (BinOp::Div, true) => {
                        self.mark_helper(Helper::Sdiv);
                        "func_sdiv32"
                    }
                    (BinOp::Mod, false) => {
                        self.mark_helper(Helper::Urem);
                        "func_urem32"
                    }
                    _ => {
                        self.mark_helper(Helper::Srem);
                        "func_srem32"
                    }
                };
                let result = self.relay_helper_call(target, lt, rt, pos)?;
                return Ok((result, result_ty));
            }
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                self.lower_comparison(op, lt, rt, joined.signed, pos)?;
            }
            BinOp::LogAnd | BinOp::LogOr => unreachable!("handled above"),
        }

        self.pools.free_temp(rt);
        Ok((lt, result_ty))
    }

    /// Route a two-operand helper call through the normal call machinery,
    /// which moves the operands into the argument registers and releases
    /// their temps.
    fn relay_helper_call(
        &mut self,
        target: &str,
        lt: u8,
        rt: u8,
        pos: &SourcePos,
    ) -> Result<u8, Diagnostic> {
        self.lower_call(target, vec![lt, rt], pos)
    }

    fn lower_comparison(
        &mut self,
        op: BinOp,
        lt: u8,
        rt: u8,
        signed: bool,
        pos: &SourcePos,
    ) -> Result<(), Diagnostic> {
        // Equality is sign-agnostic; ordered compares flip the sign bit so
        // the unsigned cmpa/cmpb order signed operands correctly.
        if signed && !matches!(op, BinOp::Eq | BinOp::Ne) {
            let bias = self.temp(pos)?;
            self.emit(format!("\tmov {}, {SIGN_BIT}", reg_name(bias)));
            self.emit(format!("\txor {}, {}", reg_name(lt), reg_name(bias)));
            self.emit(format!("\txor {}, {}", reg_name(rt), reg_name(bias)));
            self.pools.free_temp(bias);
        }

        let (compare, default, flipped) = match op {
            BinOp::Eq => ("cmpe", 0, 1),
            BinOp::Ne => ("cmpe", 1, 0),
            BinOp::Lt => ("cmpb", 0, 1),
            BinOp::Ge => ("cmpb", 1, 0),
            BinOp::Gt => ("cmpa", 0, 1),
            BinOp::Le => ("cmpa", 1, 0),
            _ => unreachable!("not a comparison"),
        };
        self.emit(format!("\t{compare} {}, {}", reg_name(lt), reg_name(rt)));
        self.emit(format!("\tmov {}, {default}", reg_name(lt)));
        self.emit(format!("\tcmovt {}, {flipped}", reg_name(lt)));
        Ok(())
    }

    /// Short-circuit `&&` / `||`: the right operand is jumped over entirely
    /// when the left one decides the result.
    fn lower_logical(
        &mut self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        _pos: &SourcePos,
    ) -> Result<(u8, ExprTy), Diagnostic> {
        let (lt, _) = self.lower_expr(lhs)?;
        let end = match op {
            BinOp::LogAnd => self.fresh_label("and_end"),
            _ => self.fresh_label("or_end"),
        };

        self.emit(format!("\tcmpe {}, 0", reg_name(lt)));
        match op {
            BinOp::LogAnd => {
                // Left is zero: result 0, skip the right operand
                self.emit(format!("\tmov {}, 0", reg_name(lt)));
                self.emit(format!("\tcmovt r31, {end}"));
            }
            _ => {
                // Left is nonzero: result 1, skip the right operand
                self.emit(format!("\tmov {}, 1", reg_name(lt)));
                self.emit(format!("\tcmovf r31, {end}"));
            }
        }

        let (rt, _) = self.lower_expr(rhs)?;
        self.emit(format!("\tcmpe {}, 0", reg_name(rt)));
        self.emit(format!("\tmov {}, 1", reg_name(lt)));
        self.emit(format!("\tcmovt {}, 0", reg_name(lt)));
        self.pools.free_temp(rt);
        self.emit(format!("{end}:"));

        Ok((lt, ExprTy::word()))
    }

    /// A call in expression position: peripheral intrinsics first, then user
    /// functions (undefined names and arity mismatches die here).
    pub(crate) fn lower_call_expr(
        &mut self,
        name: &str,
        args: &[Expr],
        pos: &SourcePos,
    ) -> Result<(u8, ExprTy), Diagnostic> {
        if intrinsics::is_intrinsic(name) {
            let temp = intrinsics::lower_intrinsic(self, name, args, pos)?;
            return Ok((temp, ExprTy::word()));
        }

        let function = self.program_function(name, pos)?;
        let expected = function.params.len();
        if args.len() != expected {
            return Err(self.err(
                pos,
                format!(
                    "function '{name}' expects {expected} argument(s), got {}",
                    args.len()
                ),
            ));
        }
        if args.len() > super::regalloc::MAX_REG_ARGS {
            return Err(self.err(
                pos,
                format!(
                    "function '{name}' takes {} arguments; at most {} are supported",
                    args.len(),
                    super::regalloc::MAX_REG_ARGS
                ),
            ));
        }

        let mut arg_temps = Vec::with_capacity(args.len());
        for arg in args {
            let (temp, _) = self.lower_expr(arg)?;
            arg_temps.push(temp);
        }
        let result = self.lower_call(&format!("func_{name}"), arg_temps, pos)?;
        Ok((result, ExprTy::word()))
    }

    fn program_function(
        &self,
        name: &str,
        pos: &SourcePos,
    ) -> Result<&'_ volt_core::Function, Diagnostic> {
        self.program_ref()
            .find_function(name)
            .ok_or_else(|| self.err(pos, format!("undefined function '{name}'")))
    }
}

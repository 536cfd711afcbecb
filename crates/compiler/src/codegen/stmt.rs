//! Statement and control-flow lowering
//!
//! Control flow is label-based: conditions evaluate into a temp, `cmpe`
//! against zero sets the flag, and a conditional move into `r31` takes the
//! branch. Loops push their break/continue labels onto the lowering stack so
//! nested `break`/`continue` find their targets.

use volt_core::ast::IncDec;
use volt_core::{Diagnostic, Expr, SourcePos, Stmt, VarType};

use super::regalloc::reg_name;
use super::{CodeGen, LoopLabels, StorageTy, VarStorage, pinned_reg};

pub(crate) fn lower_stmts(cg: &mut CodeGen<'_>, stmts: &[Stmt]) -> Result<(), Diagnostic> {
    for stmt in stmts {
        cg.lower_stmt(stmt)?;
    }
    Ok(())
}

impl CodeGen<'_> {
    fn lower_stmt(&mut self, stmt: &Stmt) -> Result<(), Diagnostic> {
        self.note_line(stmt.pos());
        match stmt {
            Stmt::VarDecl {
                name,
                ty,
                register,
                init,
                pos,
                ..
            } => self.lower_var_decl(name, *ty, *register, init.as_ref(), pos),
            Stmt::PtrDecl { name, ty, init, pos } => {
                self.lower_slot_decl(name, StorageTy::pointer(*ty), init.as_ref(), pos)
            }
            Stmt::ArrayDecl {
                name,
                ty,
                len,
                init,
                pos,
            } => self.lower_array_decl(name, *ty, *len, init, pos),
            Stmt::Assign { target, value, pos } => self.lower_assign(target, value, pos),
            Stmt::CompoundAssign {
                target,
                op,
                value,
                pos,
            } => self.lower_compound_assign(target, *op, value, pos),
            Stmt::IncDec { target, op, pos } => self.lower_incdec(target, *op, pos),
            Stmt::If {
                cond,
                then_body,
                else_body,
                pos,
            } => self.lower_if(cond, then_body, else_body.as_deref(), pos),
            Stmt::While { cond, body, pos } => self.lower_while(cond, body, pos),
            Stmt::DoWhile { body, cond, pos } => self.lower_do_while(body, cond, pos),
            Stmt::For {
                init,
                cond,
                step,
                body,
                pos,
            } => self.lower_for(init.as_deref(), cond.as_ref(), step.as_deref(), body, pos),
            Stmt::Return { value, .. } => {
                match value {
                    Some(expr) => {
                        let (temp, _) = self.lower_expr(expr)?;
                        if temp != 0 {
                            self.emit(format!("\tmov r0, {}", reg_name(temp)));
                        }
                        self.pools.free_temp(temp);
                    }
                    None => self.emit("\tmov r0, 0"),
                }
                self.emit_return_sequence();
                Ok(())
            }
            Stmt::Break { pos } => {
                let target = self
                    .loop_stack
                    .last()
                    .map(|labels| labels.break_to.clone())
                    .ok_or_else(|| self.err(pos, "'break' outside of a loop"))?;
                self.emit(format!("\tmov r31, {target}"));
                Ok(())
            }
            Stmt::Continue { pos } => {
                let target = self
                    .loop_stack
                    .last()
                    .map(|labels| labels.continue_to.clone())
                    .ok_or_else(|| self.err(pos, "'continue' outside of a loop"))?;
                self.emit(format!("\tmov r31, {target}"));
                Ok(())
            }
            Stmt::Block { body, .. } => {
                self.enter_scope();
                let result = lower_stmts(self, body);
                self.leave_scope();
                result
            }
            Stmt::Asm { text, pos } => {
                self.emit(format!("\t; asm block (line {})", pos.line));
                for line in text.lines() {
                    let line = line.trim();
                    if !line.is_empty() {
                        self.emit(format!("\t{line}"));
                    }
                }
                self.emit("\t; end asm block");
                Ok(())
            }
            Stmt::Call { name, args, pos } => {
                let (temp, _) = self.lower_call_expr(name, args, pos)?;
                self.pools.free_temp(temp);
                Ok(())
            }
        }
    }

    // ----- declarations -----

    fn lower_var_decl(
        &mut self,
        name: &str,
        ty: VarType,
        register: bool,
        init: Option<&Expr>,
        pos: &SourcePos,
    ) -> Result<(), Diagnostic> {
        if register {
            let reg = pinned_reg(name)
                .ok_or_else(|| self.err(pos, format!("invalid register name '{name}'")))?;
            match init {
                Some(expr) => {
                    let (temp, _) = self.lower_expr(expr)?;
                    self.emit(format!("\tmov {}, {}", reg_name(reg), reg_name(temp)));
                    self.pools.free_temp(temp);
                }
                None => self.emit(format!("\tmov {}, 0", reg_name(reg))),
            }
            return self.bind(
                name,
                VarStorage::Pinned {
                    reg,
                    ty: StorageTy::scalar(ty),
                },
                pos,
            );
        }
        self.lower_slot_decl(name, StorageTy::scalar(ty), init, pos)
    }

    /// Declare a scalar or pointer: a local register when one is free and
    /// the address is never taken, otherwise the reserved frame slot.
    fn lower_slot_decl(
        &mut self,
        name: &str,
        ty: StorageTy,
        init: Option<&Expr>,
        pos: &SourcePos,
    ) -> Result<(), Diagnostic> {
        let value_temp = match init {
            Some(expr) => {
                let (temp, _) = self.lower_expr(expr)?;
                Some(temp)
            }
            None => None,
        };

        let in_memory = self.addr_taken.contains(name);
        let reg = if in_memory { None } else { self.pools.alloc_local() };

        match reg {
            Some(reg) => {
                match value_temp {
                    Some(temp) => {
                        self.emit(format!("\tmov {}, {}", reg_name(reg), reg_name(temp)));
                        self.pools.free_temp(temp);
                    }
                    None => self.emit(format!("\tmov {}, 0", reg_name(reg))),
                }
                self.bind(name, VarStorage::Reg { reg, ty }, pos)
            }
            None => {
                let offset = self.alloc_frame_slot(1);
                let value = match value_temp {
                    Some(temp) => temp,
                    None => {
                        let temp = self.temp(pos)?;
                        self.emit(format!("\tmov {}, 0", reg_name(temp)));
                        temp
                    }
                };
                let addr = self.temp(pos)?;
                self.emit(format!("\tmov {}, r30", reg_name(addr)));
                if offset > 0 {
                    self.emit(format!("\tadd {}, {offset}", reg_name(addr)));
                }
                self.emit(format!("\tstore {}, {}", reg_name(addr), reg_name(value)));
                self.pools.free_temp(addr);
                self.pools.free_temp(value);
                self.bind(name, VarStorage::Frame { offset, ty }, pos)
            }
        }
    }

    /// Local arrays live in the frame. A partial initializer list zero-fills
    /// the remaining elements, matching the scalar-initializer rule.
    fn lower_array_decl(
        &mut self,
        name: &str,
        ty: VarType,
        len: u32,
        init: &[Expr],
        pos: &SourcePos,
    ) -> Result<(), Diagnostic> {
        let offset = self.alloc_frame_slot(len);

        for (i, expr) in init.iter().enumerate() {
            let (value, _) = self.lower_expr(expr)?;
            self.store_frame_slot(offset + 4 * i as u32, value, pos)?;
            self.pools.free_temp(value);
        }
        if !init.is_empty() && (init.len() as u32) < len {
            let zero = self.temp(pos)?;
            self.emit(format!("\tmov {}, 0", reg_name(zero)));
            for i in init.len() as u32..len {
                self.store_frame_slot(offset + 4 * i, zero, pos)?;
            }
            self.pools.free_temp(zero);
        }

        self.bind(
            name,
            VarStorage::Frame {
                offset,
                ty: StorageTy::array(ty, len),
            },
            pos,
        )
    }

    fn store_frame_slot(&mut self, offset: u32, value: u8, pos: &SourcePos) -> Result<(), Diagnostic> {
        let addr = self.temp(pos)?;
        self.emit(format!("\tmov {}, r30", reg_name(addr)));
        if offset > 0 {
            self.emit(format!("\tadd {}, {offset}", reg_name(addr)));
        }
        self.emit(format!("\tstore {}, {}", reg_name(addr), reg_name(value)));
        self.pools.free_temp(addr);
        Ok(())
    }

    // ----- assignment -----

    fn lower_assign(
        &mut self,
        target: &Expr,
        value: &Expr,
        pos: &SourcePos,
    ) -> Result<(), Diagnostic> {
        let (value_temp, _) = self.lower_expr(value)?;

        if let Expr::Ident { name, pos } = target {
            let storage = self.lookup(name, pos)?.clone();
            if storage.ty().array.is_some() {
                return Err(self.err(pos, format!("cannot assign to array '{name}'")));
            }
            if let VarStorage::Reg { reg, .. } | VarStorage::Pinned { reg, .. } = storage {
                self.emit(format!("\tmov {}, {}", reg_name(reg), reg_name(value_temp)));
                self.pools.free_temp(value_temp);
                return Ok(());
            }
        }

        let (addr, _) = self.lower_address(target, pos)?;
        self.emit(format!("\tstore {}, {}", reg_name(addr), reg_name(value_temp)));
        self.pools.free_temp(addr);
        self.pools.free_temp(value_temp);
        Ok(())
    }

    fn lower_compound_assign(
        &mut self,
        target: &Expr,
        op: volt_core::BinOp,
        value: &Expr,
        pos: &SourcePos,
    ) -> Result<(), Diagnostic> {
        // Register-resident targets read and write the register directly.
        if let Expr::Ident { name, pos: ident_pos } = target {
            let storage = self.lookup(name, ident_pos)?.clone();
            if let VarStorage::Reg { reg, ty } | VarStorage::Pinned { reg, ty } = storage {
                let old = self.temp(pos)?;
                self.emit(format!("\tmov {}, {}", reg_name(old), reg_name(reg)));
                let (rhs, rhs_ty) = self.lower_expr(value)?;
                let (result, _) = self.emit_binop(op, old, ty.into(), rhs, rhs_ty, pos)?;
                self.emit(format!("\tmov {}, {}", reg_name(reg), reg_name(result)));
                self.pools.free_temp(result);
                return Ok(());
            }
            if storage.ty().array.is_some() {
                return Err(self.err(ident_pos, format!("cannot assign to array '{name}'")));
            }
        }

        let (addr, elem_ty) = self.lower_address(target, pos)?;
        let old = self.temp(pos)?;
        self.emit(format!("\tload {}, {}", reg_name(old), reg_name(addr)));
        let (rhs, rhs_ty) = self.lower_expr(value)?;
        let (result, _) = self.emit_binop(op, old, elem_ty, rhs, rhs_ty, pos)?;
        self.emit(format!("\tstore {}, {}", reg_name(addr), reg_name(result)));
        self.pools.free_temp(result);
        self.pools.free_temp(addr);
        Ok(())
    }

    fn lower_incdec(
        &mut self,
        target: &Expr,
        op: IncDec,
        pos: &SourcePos,
    ) -> Result<(), Diagnostic> {
        let instr = match op {
            IncDec::Inc => "add",
            IncDec::Dec => "sub",
        };

        if let Expr::Ident { name, pos: ident_pos } = target {
            let storage = self.lookup(name, ident_pos)?.clone();
            if let VarStorage::Reg { reg, ty } | VarStorage::Pinned { reg, ty } = storage {
                let delta = if ty.pointer { 4 } else { 1 };
                self.emit(format!("\t{instr} {}, {delta}", reg_name(reg)));
                return Ok(());
            }
        }

        let (addr, elem_ty) = self.lower_address(target, pos)?;
        let delta = if elem_ty.pointer { 4 } else { 1 };
        let temp = self.temp(pos)?;
        self.emit(format!("\tload {}, {}", reg_name(temp), reg_name(addr)));
        self.emit(format!("\t{instr} {}, {delta}", reg_name(temp)));
        self.emit(format!("\tstore {}, {}", reg_name(addr), reg_name(temp)));
        self.pools.free_temp(temp);
        self.pools.free_temp(addr);
        Ok(())
    }

    // ----- control flow -----

    /// Evaluate a condition and fall through on nonzero; the returned label
    /// jump has already been emitted for the zero case.
    fn branch_if_zero(&mut self, cond: &Expr, target: &str) -> Result<(), Diagnostic> {
        let (temp, _) = self.lower_expr(cond)?;
        self.emit(format!("\tcmpe {}, 0", reg_name(temp)));
        self.emit(format!("\tcmovt r31, {target}"));
        self.pools.free_temp(temp);
        Ok(())
    }

    fn lower_if(
        &mut self,
        cond: &Expr,
        then_body: &[Stmt],
        else_body: Option<&[Stmt]>,
        _pos: &SourcePos,
    ) -> Result<(), Diagnostic> {
        let end = self.fresh_label("if_end");

        match else_body {
            Some(else_body) => {
                let else_label = self.fresh_label("if_else");
                self.branch_if_zero(cond, &else_label)?;

                self.enter_scope();
                let result = lower_stmts(self, then_body);
                self.leave_scope();
                result?;
                self.emit(format!("\tmov r31, {end}"));

                self.emit(format!("{else_label}:"));
                self.enter_scope();
                let result = lower_stmts(self, else_body);
                self.leave_scope();
                result?;
            }
            None => {
                self.branch_if_zero(cond, &end)?;
                self.enter_scope();
                let result = lower_stmts(self, then_body);
                self.leave_scope();
                result?;
            }
        }

        self.emit(format!("{end}:"));
        Ok(())
    }

    fn lower_while(
        &mut self,
        cond: &Expr,
        body: &[Stmt],
        _pos: &SourcePos,
    ) -> Result<(), Diagnostic> {
        let start = self.fresh_label("while_start");
        let end = self.fresh_label("while_end");

        self.emit(format!("{start}:"));
        self.branch_if_zero(cond, &end)?;

        self.loop_stack.push(LoopLabels {
            break_to: end.clone(),
            continue_to: start.clone(),
        });
        self.enter_scope();
        let result = lower_stmts(self, body);
        self.leave_scope();
        self.loop_stack.pop();
        result?;

        self.emit(format!("\tmov r31, {start}"));
        self.emit(format!("{end}:"));
        Ok(())
    }

    fn lower_do_while(
        &mut self,
        body: &[Stmt],
        cond: &Expr,
        _pos: &SourcePos,
    ) -> Result<(), Diagnostic> {
        let start = self.fresh_label("do_start");
        let check = self.fresh_label("do_cond");
        let end = self.fresh_label("do_end");

        self.emit(format!("{start}:"));
        self.loop_stack.push(LoopLabels {
            break_to: end.clone(),
            continue_to: check.clone(),
        });
        self.enter_scope();
        let result = lower_stmts(self, body);
        self.leave_scope();
        self.loop_stack.pop();
        result?;

        self.emit(format!("{check}:"));
        let (temp, _) = self.lower_expr(cond)?;
        self.emit(format!("\tcmpe {}, 0", reg_name(temp)));
        self.emit(format!("\tcmovf r31, {start}"));
        self.pools.free_temp(temp);
        self.emit(format!("{end}:"));
        Ok(())
    }

    fn lower_for(
        &mut self,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        step: Option<&Stmt>,
        body: &[Stmt],
        _pos: &SourcePos,
    ) -> Result<(), Diagnostic> {
        let start = self.fresh_label("for_start");
        let step_label = self.fresh_label("for_step");
        let end = self.fresh_label("for_end");

        // The init clause scopes over the condition, step, and body.
        self.enter_scope();
        let result = (|| {
            if let Some(init) = init {
                self.lower_stmt(init)?;
            }

            self.emit(format!("{start}:"));
            if let Some(cond) = cond {
                self.branch_if_zero(cond, &end)?;
            }

            self.loop_stack.push(LoopLabels {
                break_to: end.clone(),
                continue_to: step_label.clone(),
            });
            self.enter_scope();
            let body_result = lower_stmts(self, body);
            self.leave_scope();
            self.loop_stack.pop();
            body_result?;

            self.emit(format!("{step_label}:"));
            if let Some(step) = step {
                self.lower_stmt(step)?;
            }
            self.emit(format!("\tmov r31, {start}"));
            self.emit(format!("{end}:"));
            Ok(())
        })();
        self.leave_scope();
        result
    }
}

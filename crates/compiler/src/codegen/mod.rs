//! Code generation
//!
//! Lowers the AST into a textual assembly listing for the target machine:
//! a format directive and ISA include, a data section with the globals and
//! the `stack_ptr` cell, then a text section with `main` first (ending in
//! `hlt`) and the remaining functions in source order. Any arithmetic helper
//! routines the program needs are appended last.
//!
//! Register classes are fixed (`r0`-`r10` temps, `r11`-`r25` locals,
//! `r26`-`r30` arguments/link, `r31` program counter) and the software stack
//! grows downward through `r30`. Because `r30` also carries the return
//! address across calls, the current stack pointer is parked in the
//! `stack_ptr` data word at every call boundary: callers publish it before
//! jumping, prologues load it, epilogues publish it back.
//!
//! # Module Structure
//!
//! - `regalloc.rs`: the three register pools
//! - `frame.rs`: whole-function frame sizing pre-pass
//! - `expr.rs`: expression lowering
//! - `stmt.rs`: statement and control-flow lowering
//! - `intrinsics.rs`: the UART/GPIO instruction subset
//! - `helpers.rs`: emitted multiply/divide routines

mod expr;
mod frame;
mod helpers;
mod intrinsics;
mod regalloc;
mod stmt;

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::debug;
use volt_core::{Diagnostic, Expr, Function, Item, Program, SourcePos, UnOp, VarType};

use frame::{FrameInfo, analyze_function};
use regalloc::{ARG_FIRST, LINK_REG, MAX_REG_ARGS, RegisterPools, reg_name};

/// Code generator tuning, usually filled in from the toolchain config.
#[derive(Debug, Clone)]
pub struct CodegenOptions {
    /// Path emitted in the `include` header line
    pub isa_include: String,
    /// Initial value of the software stack pointer
    pub stack_top: u32,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        CodegenOptions {
            isa_include: "ISA.inc".to_string(),
            stack_top: 64 * 1024,
        }
    }
}

/// Lower a parsed program to an assembly listing.
pub fn generate(program: &Program, options: CodegenOptions) -> Result<String, Diagnostic> {
    CodeGen::new(program, options).run()
}

/// Static facts about a stored value, shared by every storage kind.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StorageTy {
    pub signed: bool,
    pub pointer: bool,
    /// `Some(len)` iff the name is an array
    pub array: Option<u32>,
}

impl StorageTy {
    fn scalar(ty: VarType) -> Self {
        StorageTy {
            signed: ty == VarType::I32,
            pointer: false,
            array: None,
        }
    }

    fn pointer(ty: VarType) -> Self {
        StorageTy {
            signed: ty == VarType::I32,
            pointer: true,
            array: None,
        }
    }

    fn array(ty: VarType, len: u32) -> Self {
        StorageTy {
            signed: ty == VarType::I32,
            pointer: false,
            array: Some(len),
        }
    }
}

/// Where a variable lives during lowering.
#[derive(Debug, Clone)]
pub(crate) enum VarStorage {
    /// Data-section word(s) addressed by label
    Global { label: String, ty: StorageTy },
    /// A local-pool register
    Reg { reg: u8, ty: StorageTy },
    /// An ISA register pinned by a `register` declaration
    Pinned { reg: u8, ty: StorageTy },
    /// A frame slot at `r30 + offset` bytes
    Frame { offset: u32, ty: StorageTy },
}

impl VarStorage {
    pub(crate) fn ty(&self) -> StorageTy {
        match self {
            VarStorage::Global { ty, .. }
            | VarStorage::Reg { ty, .. }
            | VarStorage::Pinned { ty, .. }
            | VarStorage::Frame { ty, .. } => *ty,
        }
    }
}

/// Signedness/pointer facts that ride along with a lowered expression value.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ExprTy {
    pub signed: bool,
    pub pointer: bool,
}

impl ExprTy {
    pub(crate) fn word() -> Self {
        ExprTy {
            signed: false,
            pointer: false,
        }
    }

    pub(crate) fn join(self, other: ExprTy) -> Self {
        ExprTy {
            signed: self.signed || other.signed,
            pointer: self.pointer || other.pointer,
        }
    }
}

impl From<StorageTy> for ExprTy {
    fn from(ty: StorageTy) -> Self {
        ExprTy {
            signed: ty.signed,
            pointer: ty.pointer || ty.array.is_some(),
        }
    }
}

/// Break/continue targets for the innermost loop being lowered.
pub(crate) struct LoopLabels {
    pub break_to: String,
    pub continue_to: String,
}

/// Arithmetic routines the program pulled in; appended after user code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Helper {
    Mul,
    Udiv,
    Urem,
    Sdiv,
    Srem,
}

pub(crate) struct CodeGen<'p> {
    program: &'p Program,
    options: CodegenOptions,
    out: String,
    label_counters: BTreeMap<&'static str, u32>,
    pub(crate) pools: RegisterPools,
    /// Scope stack; index 0 holds the globals
    scopes: Vec<Vec<(String, VarStorage)>>,
    /// Next free frame slot (bytes above r30) and total frame size
    frame_cursor: u32,
    frame_bytes: u32,
    pub(crate) loop_stack: Vec<LoopLabels>,
    current_function: String,
    in_main: bool,
    /// Names whose address is taken in the current function (must stay in
    /// memory, not a register)
    pub(crate) addr_taken: HashSet<String>,
    used_helpers: BTreeSet<Helper>,
    /// Last source line a comment was emitted for
    last_line: u32,
}

impl<'p> CodeGen<'p> {
    fn new(program: &'p Program, options: CodegenOptions) -> Self {
        CodeGen {
            program,
            options,
            out: String::new(),
            label_counters: BTreeMap::new(),
            pools: RegisterPools::new(),
            scopes: vec![Vec::new()],
            frame_cursor: 0,
            frame_bytes: 0,
            loop_stack: Vec::new(),
            current_function: String::new(),
            in_main: false,
            addr_taken: HashSet::new(),
            used_helpers: BTreeSet::new(),
            last_line: 0,
        }
    }

    fn run(mut self) -> Result<String, Diagnostic> {
        debug!("generating assembly");
        self.emit("format binary as \"bin\"");
        self.emit(format!("include \"{}\"", self.options.isa_include));
        self.emit("");

        self.emit_data_section()?;

        self.emit("; code");
        let program = self.program;
        let main = program.find_function("main").ok_or_else(|| {
            Diagnostic::codegen(
                SourcePos::new("<program>", 1, 1),
                "entry function 'main' is not defined",
            )
        })?;
        self.lower_function(main)?;
        for function in program.functions() {
            if function.name != "main" {
                self.lower_function(function)?;
            }
        }

        helpers::emit_helpers(&mut self);
        Ok(self.out)
    }

    // ----- output plumbing -----

    pub(crate) fn program_ref(&self) -> &'p Program {
        self.program
    }

    pub(crate) fn emit(&mut self, text: impl AsRef<str>) {
        self.out.push_str(text.as_ref());
        self.out.push('\n');
    }

    /// Emit a `; line N` comment when lowering moves to a new source line.
    pub(crate) fn note_line(&mut self, pos: &SourcePos) {
        if pos.line != self.last_line {
            self.last_line = pos.line;
            self.emit(format!("\t; line {}", pos.line));
        }
    }

    pub(crate) fn fresh_label(&mut self, category: &'static str) -> String {
        let counter = self.label_counters.entry(category).or_insert(0);
        let label = format!("{category}_{counter}");
        *counter += 1;
        label
    }

    pub(crate) fn err(&self, pos: &SourcePos, message: impl Into<String>) -> Diagnostic {
        Diagnostic::codegen(pos.clone(), message.into())
    }

    /// Allocate a temporary; exhaustion is a hard error naming the function.
    pub(crate) fn temp(&mut self, pos: &SourcePos) -> Result<u8, Diagnostic> {
        self.pools.alloc_temp().ok_or_else(|| {
            self.err(
                pos,
                format!(
                    "expression too complex: out of temporary registers in function '{}'",
                    self.current_function
                ),
            )
        })
    }

    pub(crate) fn mark_helper(&mut self, helper: Helper) {
        self.used_helpers.insert(helper);
    }

    // ----- data section -----

    fn emit_data_section(&mut self) -> Result<(), Diagnostic> {
        self.emit("; data");
        self.emit("stack_ptr dd 0");

        let program = self.program;
        for item in &program.items {
            match item {
                Item::GlobalVar {
                    name, ty, init, pos, ..
                } => {
                    let value = match init {
                        Some(expr) => const_eval(expr).ok_or_else(|| {
                            self.err(pos, format!(
                                "initializer of global '{name}' is not a constant expression"
                            ))
                        })?,
                        None => 0,
                    };
                    self.emit(format!("{name} dd {value}"));
                    self.bind_global(name, VarStorage::Global {
                        label: name.clone(),
                        ty: StorageTy::scalar(*ty),
                    }, pos)?;
                }
                Item::GlobalArray {
                    name,
                    ty,
                    len,
                    init,
                    pos,
                } => {
                    let mut words = Vec::with_capacity(*len as usize);
                    for expr in init {
                        words.push(const_eval(expr).ok_or_else(|| {
                            self.err(pos, format!(
                                "initializer of global array '{name}' is not a constant expression"
                            ))
                        })?);
                    }
                    words.resize(*len as usize, 0);
                    let body = words
                        .iter()
                        .map(u32::to_string)
                        .collect::<Vec<_>>()
                        .join(", ");
                    self.emit(format!("{name} dd {body}"));
                    self.bind_global(name, VarStorage::Global {
                        label: name.clone(),
                        ty: StorageTy::array(*ty, *len),
                    }, pos)?;
                }
                Item::Function(_) => {}
            }
        }
        self.emit("");
        Ok(())
    }

    fn bind_global(
        &mut self,
        name: &str,
        storage: VarStorage,
        pos: &SourcePos,
    ) -> Result<(), Diagnostic> {
        if self.scopes[0].iter().any(|(n, _)| n == name) {
            return Err(self.err(pos, format!("global '{name}' is already defined")));
        }
        self.scopes[0].push((name.to_string(), storage));
        Ok(())
    }

    // ----- scopes -----

    pub(crate) fn enter_scope(&mut self) {
        self.scopes.push(Vec::new());
    }

    /// Leave a scope, releasing its local registers in reverse order of
    /// allocation. Frame slots stay reserved; each declaration site owns its
    /// slot for the whole function.
    pub(crate) fn leave_scope(&mut self) {
        let scope = self.scopes.pop().unwrap_or_default();
        for (_, storage) in scope.iter().rev() {
            if let VarStorage::Reg { reg, .. } = storage {
                self.pools.free_local(*reg);
            }
        }
    }

    pub(crate) fn bind(
        &mut self,
        name: &str,
        storage: VarStorage,
        pos: &SourcePos,
    ) -> Result<(), Diagnostic> {
        let scope = self.scopes.last_mut().unwrap_or_else(|| unreachable!());
        if scope.iter().any(|(n, _)| n == name) {
            return Err(Diagnostic::codegen(
                pos.clone(),
                format!("'{name}' is already declared in this scope"),
            ));
        }
        scope.push((name.to_string(), storage));
        Ok(())
    }

    pub(crate) fn lookup(&self, name: &str, pos: &SourcePos) -> Result<&VarStorage, Diagnostic> {
        for scope in self.scopes.iter().rev() {
            if let Some((_, storage)) = scope.iter().rev().find(|(n, _)| n == name) {
                return Ok(storage);
            }
        }
        Err(Diagnostic::codegen(
            pos.clone(),
            format!("undefined variable '{name}'"),
        ))
    }

    /// Reserve `words` frame slots; returns the byte offset above `r30`.
    pub(crate) fn alloc_frame_slot(&mut self, words: u32) -> u32 {
        let offset = self.frame_cursor;
        self.frame_cursor += 4 * words;
        debug_assert!(self.frame_cursor <= self.frame_bytes);
        offset
    }

    // ----- functions -----

    fn lower_function(&mut self, function: &'p Function) -> Result<(), Diagnostic> {
        if function.params.len() > MAX_REG_ARGS {
            return Err(self.err(
                &function.pos,
                format!(
                    "function '{}' has {} parameters; at most {MAX_REG_ARGS} are supported",
                    function.name,
                    function.params.len()
                ),
            ));
        }

        let info = analyze_function(function);
        self.pools.reset();
        for reg in &info.pinned_regs {
            if (ARG_FIRST..=LINK_REG).contains(reg) {
                return Err(self.err(
                    &function.pos,
                    format!(
                        "cannot pin argument register r{reg} in function '{}'",
                        function.name
                    ),
                ));
            }
            self.pools.pin(*reg);
        }

        self.current_function = function.name.clone();
        self.in_main = function.name == "main";
        self.frame_cursor = 0;
        self.frame_bytes = 4 * info.words;
        self.addr_taken = info.addr_taken.clone();
        self.last_line = 0;

        self.emit("");
        if function.interrupt {
            self.emit(format!("; interrupt routine {}", function.name));
        }
        self.emit(format!("func_{}:", function.name));
        self.emit_prologue(function.params.len());

        self.enter_scope();
        self.bind_params(function, &info)?;
        let body_result = stmt::lower_stmts(self, &function.body);
        self.leave_scope();
        body_result?;

        // Fall-through return
        self.emit(format!("\tmov {}, 0", reg_name(0)));
        self.emit_return_sequence();
        Ok(())
    }

    fn emit_prologue(&mut self, arity: usize) {
        if self.in_main {
            self.emit(format!("\tmov r30, {}", self.options.stack_top));
            self.emit("\tmov r0, stack_ptr");
            self.emit("\tstore r0, r30");
        } else if arity == MAX_REG_ARGS {
            // The fifth argument displaced the link; the caller pushed the
            // return address, so the stack pointer already tops at it.
            self.emit("\tmov r2, r30");
            self.emit("\tmov r0, stack_ptr");
            self.emit("\tload r1, r0");
            self.emit("\tmov r30, r1");
        } else {
            self.emit("\tmov r0, stack_ptr");
            self.emit("\tload r1, r0");
            self.emit("\tsub r1, 4");
            self.emit("\tstore r1, r30");
            self.emit("\tmov r30, r1");
        }
        if self.frame_bytes > 0 {
            self.emit(format!("\tsub r30, {}", self.frame_bytes));
        }
    }

    /// Move incoming arguments into their homes. The fifth argument was
    /// stashed in `r2` by the prologue, so it is parked first while `r2` is
    /// still intact.
    fn bind_params(&mut self, function: &'p Function, info: &FrameInfo) -> Result<(), Diagnostic> {
        let params: Vec<(usize, &String)> = function.params.iter().enumerate().collect();
        let (fifth, rest): (Vec<_>, Vec<_>) = params.into_iter().partition(|(i, _)| *i == 4);

        for (index, name) in fifth.into_iter().chain(rest) {
            let source = if index == 4 {
                "r2".to_string()
            } else {
                reg_name(ARG_FIRST + index as u8)
            };
            let ty = StorageTy::scalar(VarType::U32);
            let storage = if info.addr_taken.contains(name.as_str()) {
                None
            } else {
                self.pools.alloc_local()
            };
            match storage {
                Some(reg) => {
                    self.emit(format!("\tmov {}, {source}", reg_name(reg)));
                    self.bind(name, VarStorage::Reg { reg, ty }, &function.pos)?;
                }
                None => {
                    let offset = self.alloc_frame_slot(1);
                    let scratch = self.temp(&function.pos)?;
                    self.emit(format!("\tmov {}, r30", reg_name(scratch)));
                    if offset > 0 {
                        self.emit(format!("\tadd {}, {offset}", reg_name(scratch)));
                    }
                    self.emit(format!("\tstore {}, {source}", reg_name(scratch)));
                    self.pools.free_temp(scratch);
                    self.bind(name, VarStorage::Frame { offset, ty }, &function.pos)?;
                }
            }
        }
        Ok(())
    }

    /// Emit the return path: `hlt` for `main`, the link-restoring epilogue
    /// for everything else. The return value is already in `r0`.
    pub(crate) fn emit_return_sequence(&mut self) {
        if self.in_main {
            self.emit("\thlt");
            return;
        }
        if self.frame_bytes > 0 {
            self.emit(format!("\tadd r30, {}", self.frame_bytes));
        }
        self.emit("\tload r1, r30");
        self.emit("\tadd r30, 4");
        self.emit("\tmov r2, stack_ptr");
        self.emit("\tstore r2, r30");
        self.emit("\tmov r31, r1");
    }

    // ----- calls -----

    /// Lower a call to `target` with arguments already evaluated into
    /// `arg_temps`. Live registers are saved around the call on the software
    /// stack. Returns the temp holding the result.
    pub(crate) fn lower_call(
        &mut self,
        target: &str,
        arg_temps: Vec<u8>,
        pos: &SourcePos,
    ) -> Result<u8, Diagnostic> {
        let five_args = arg_temps.len() == MAX_REG_ARGS;

        // Arguments 1-4 move to the argument registers now; their temps die.
        let mut fifth_temp = None;
        for (index, temp) in arg_temps.iter().enumerate() {
            if index == 4 {
                fifth_temp = Some(*temp);
            } else {
                self.emit(format!(
                    "\tmov {}, {}",
                    reg_name(ARG_FIRST + index as u8),
                    reg_name(*temp)
                ));
                self.pools.free_temp(*temp);
            }
        }

        // Save everything live except the pending fifth argument.
        let saved: Vec<u8> = self
            .pools
            .call_saved()
            .into_iter()
            .filter(|reg| Some(*reg) != fifth_temp)
            .collect();
        for reg in &saved {
            self.emit("\tsub r30, 4");
            self.emit(format!("\tstore r30, {}", reg_name(*reg)));
        }

        let ret_label = self.fresh_label("ret_addr");
        if five_args {
            // The link rides the stack; r30 carries the fifth argument.
            let scratch = self.temp(pos)?;
            self.emit("\tsub r30, 4");
            self.emit(format!("\tmov {}, {ret_label}", reg_name(scratch)));
            self.emit(format!("\tstore r30, {}", reg_name(scratch)));
            self.pools.free_temp(scratch);
        }

        // Publish the stack pointer for the callee's prologue.
        let scratch = self.temp(pos)?;
        self.emit(format!("\tmov {}, stack_ptr", reg_name(scratch)));
        self.emit(format!("\tstore {}, r30", reg_name(scratch)));
        self.pools.free_temp(scratch);

        if five_args {
            let temp = fifth_temp.unwrap_or_else(|| unreachable!());
            self.emit(format!("\tmov r30, {}", reg_name(temp)));
            self.pools.free_temp(temp);
        } else {
            self.emit(format!("\tmov r30, {ret_label}"));
        }
        self.emit(format!("\tmov r31, {target}"));
        self.emit(format!("{ret_label}:"));

        // r30 is the stack pointer again after the callee's epilogue.
        let result = self.temp(pos)?;
        if result != 0 {
            self.emit(format!("\tmov {}, r0", reg_name(result)));
        }
        for reg in saved.iter().rev() {
            self.emit(format!("\tload {}, r30", reg_name(*reg)));
            self.emit("\tadd r30, 4");
        }
        Ok(result)
    }
}

/// Fold a constant expression for global initializers. `None` means the
/// expression is not constant (or divides by zero).
fn const_eval(expr: &Expr) -> Option<u32> {
    match expr {
        Expr::Int { value, .. } => Some(*value),
        Expr::Unary { op, operand, .. } => {
            let value = const_eval(operand)?;
            let folded = match op {
                UnOp::Not => u32::from(value == 0),
                UnOp::BitNot => !value,
                UnOp::Neg => value.wrapping_neg(),
            };
            Some(folded)
        }
        Expr::Binary { op, lhs, rhs, .. } => {
            use volt_core::BinOp;
            let l = const_eval(lhs)?;
            let r = const_eval(rhs)?;
            let folded = match op {
                BinOp::Add => l.wrapping_add(r),
                BinOp::Sub => l.wrapping_sub(r),
                BinOp::Mul => l.wrapping_mul(r),
                BinOp::Div => l.checked_div(r)?,
                BinOp::Mod => l.checked_rem(r)?,
                BinOp::BitAnd => l & r,
                BinOp::BitOr => l | r,
                BinOp::BitXor => l ^ r,
                BinOp::Shl => l.wrapping_shl(r),
                BinOp::Shr => l.wrapping_shr(r),
                BinOp::LogAnd => u32::from(l != 0 && r != 0),
                BinOp::LogOr => u32::from(l != 0 || r != 0),
                BinOp::Eq => u32::from(l == r),
                BinOp::Ne => u32::from(l != r),
                BinOp::Lt => u32::from(l < r),
                BinOp::Le => u32::from(l <= r),
                BinOp::Gt => u32::from(l > r),
                BinOp::Ge => u32::from(l >= r),
            };
            Some(folded)
        }
        _ => None,
    }
}

pub(crate) use frame::pinned_reg_index as pinned_reg;

#[cfg(test)]
mod tests {
    use super::*;
    use volt_core::SourcePos;

    fn pos() -> SourcePos {
        SourcePos::new("test.sc", 1, 1)
    }

    #[test]
    fn test_const_eval() {
        let expr = Expr::Binary {
            op: volt_core::BinOp::Add,
            lhs: Box::new(Expr::Int { value: 2, pos: pos() }),
            rhs: Box::new(Expr::Binary {
                op: volt_core::BinOp::Mul,
                lhs: Box::new(Expr::Int { value: 3, pos: pos() }),
                rhs: Box::new(Expr::Int { value: 4, pos: pos() }),
                pos: pos(),
            }),
            pos: pos(),
        };
        assert_eq!(const_eval(&expr), Some(14));
    }

    #[test]
    fn test_const_eval_rejects_non_constant() {
        let expr = Expr::Ident {
            name: "x".into(),
            pos: pos(),
        };
        assert_eq!(const_eval(&expr), None);
    }

    #[test]
    fn test_const_eval_division_by_zero() {
        let expr = Expr::Binary {
            op: volt_core::BinOp::Div,
            lhs: Box::new(Expr::Int { value: 1, pos: pos() }),
            rhs: Box::new(Expr::Int { value: 0, pos: pos() }),
            pos: pos(),
        };
        assert_eq!(const_eval(&expr), None);
    }
}

//! Tree-walking interpreter
//!
//! Executes `main` over the AST and returns its 32-bit result. All arithmetic
//! is modulo 2^32; division, modulo, comparison, and negation use the signed
//! interpretation when an `i32` operand is involved. Every scalar lives in a
//! cell of the simulated memory arena, so address-of works uniformly for
//! locals, globals, and array elements, and volatile reads always hit memory.
//!
//! Control flow uses an explicit signal: statement sequences stop draining on
//! anything but [`Flow::Normal`], loops absorb `Break`/`Continue` at their
//! boundary, and calls absorb `Return`.

use tracing::{debug, warn};
use volt_core::ast::IncDec;
use volt_core::{BinOp, Diagnostic, Expr, Function, Item, Program, SourcePos, Stmt, UnOp, VarType};

use crate::env::{Environment, Slot};
use crate::memory::Memory;
use crate::peripherals::{Peripherals, intrinsic_arity};

/// Interpreter tuning knobs, usually filled in from the toolchain config.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Bytes of simulated memory
    pub memory_size: u32,
    /// Maximum user-function call depth
    pub recursion_limit: u32,
    /// Timer advance per `timer_expired` poll
    pub timer_tick: u32,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            memory_size: 64 * 1024,
            recursion_limit: 256,
            timer_tick: 10,
        }
    }
}

/// Interpreter control state. Statements only execute in `Normal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Normal,
    Return(u32),
    Break,
    Continue,
}

/// A 32-bit word plus the static facts that change how operators treat it.
#[derive(Debug, Clone, Copy)]
struct Value {
    raw: u32,
    signed: bool,
    pointer: bool,
}

impl Value {
    fn word(raw: u32) -> Self {
        Value {
            raw,
            signed: false,
            pointer: false,
        }
    }

    fn flag(set: bool) -> Self {
        Value::word(u32::from(set))
    }

    fn truthy(&self) -> bool {
        self.raw != 0
    }
}

/// A resolved l-value: the cell address plus the facts needed for compound
/// assignment and increment scaling.
struct Place {
    addr: u32,
    signed: bool,
    pointer: bool,
}

pub struct Interpreter<'p> {
    program: &'p Program,
    env: Environment,
    mem: Memory,
    pub peripherals: Peripherals,
    depth: u32,
    recursion_limit: u32,
}

impl<'p> Interpreter<'p> {
    pub fn new(program: &'p Program, options: RunOptions) -> Self {
        Interpreter {
            program,
            env: Environment::new(),
            mem: Memory::new(options.memory_size),
            peripherals: Peripherals::new(options.timer_tick),
            depth: 0,
            recursion_limit: options.recursion_limit,
        }
    }

    /// Initialize globals and execute `main`. Returns its return value, or 0
    /// if `main` falls off the end without `return`.
    pub fn run(&mut self) -> Result<u32, Diagnostic> {
        debug!("interpreting");
        self.init_globals()?;

        let entry_pos = SourcePos::new("<program>", 1, 1);
        let main = self.program.find_function("main").ok_or_else(|| {
            Diagnostic::runtime(entry_pos.clone(), "undefined function 'main'")
        })?;
        self.call_user(main, &[], &entry_pos)
    }

    /// Explicitly invoke an `interrupt` routine by name, for hosts that hook
    /// interrupt delivery. The routine runs with no arguments.
    pub fn call_interrupt(&mut self, name: &str) -> Result<u32, Diagnostic> {
        let entry_pos = SourcePos::new("<interrupt>", 1, 1);
        let handler = self
            .program
            .functions()
            .find(|f| f.name == name && f.interrupt)
            .ok_or_else(|| {
                Diagnostic::runtime(
                    entry_pos.clone(),
                    format!("no interrupt routine named '{name}'"),
                )
            })?;
        self.call_user(handler, &[], &entry_pos)
    }

    fn init_globals(&mut self) -> Result<(), Diagnostic> {
        for item in &self.program.items {
            match item {
                Item::GlobalVar {
                    name,
                    ty,
                    volatile,
                    init,
                    pos,
                } => {
                    let value = match init {
                        Some(expr) => self.eval(expr)?.raw,
                        None => 0,
                    };
                    let addr = self
                        .mem
                        .alloc_global(1)
                        .map_err(|fault| Diagnostic::runtime(pos.clone(), fault.to_string()))?;
                    self.mem
                        .store_word(addr, value)
                        .map_err(|fault| Diagnostic::runtime(pos.clone(), fault.to_string()))?;
                    if !self.env.declare(name, Slot::scalar(addr, *ty, *volatile)) {
                        return Err(Diagnostic::runtime(
                            pos.clone(),
                            format!("global '{name}' is already declared"),
                        ));
                    }
                }
                Item::GlobalArray {
                    name,
                    ty,
                    len,
                    init,
                    pos,
                } => {
                    let base = self
                        .mem
                        .alloc_global(*len)
                        .map_err(|fault| Diagnostic::runtime(pos.clone(), fault.to_string()))?;
                    for (i, expr) in init.iter().enumerate() {
                        let value = self.eval(expr)?.raw;
                        self.mem
                            .store_word(base + 4 * i as u32, value)
                            .map_err(|fault| {
                                Diagnostic::runtime(pos.clone(), fault.to_string())
                            })?;
                    }
                    if !self.env.declare(name, Slot::array(base, *ty, *len)) {
                        return Err(Diagnostic::runtime(
                            pos.clone(),
                            format!("global '{name}' is already declared"),
                        ));
                    }
                }
                Item::Function(_) => {}
            }
        }
        Ok(())
    }

    // ----- calls -----

    fn call_user(
        &mut self,
        function: &'p Function,
        args: &[u32],
        call_pos: &SourcePos,
    ) -> Result<u32, Diagnostic> {
        if args.len() != function.params.len() {
            return Err(Diagnostic::runtime(
                call_pos.clone(),
                format!(
                    "function '{}' expects {} argument(s), got {}",
                    function.name,
                    function.params.len(),
                    args.len()
                ),
            ));
        }
        if self.depth >= self.recursion_limit {
            return Err(Diagnostic::runtime(
                call_pos.clone(),
                format!(
                    "call depth exceeds the recursion limit of {}",
                    self.recursion_limit
                ),
            ));
        }

        self.depth += 1;
        let caller = self.env.enter_function();
        let mark = self.mem.stack_mark();

        let result = (|| {
            for (param, value) in function.params.iter().zip(args) {
                let addr = self.mem.alloc_stack(1).map_err(|fault| {
                    Diagnostic::runtime(function.pos.clone(), fault.to_string())
                })?;
                self.mem.store_word(addr, *value).map_err(|fault| {
                    Diagnostic::runtime(function.pos.clone(), fault.to_string())
                })?;
                self.env.declare(param, Slot::scalar(addr, VarType::U32, false));
            }

            match self.exec_stmts(&function.body)? {
                Flow::Return(value) => Ok(value),
                _ => Ok(0),
            }
        })();

        self.env.leave(caller);
        self.mem.release_to(mark);
        self.depth -= 1;
        result
    }

    /// Calls resolve intrinsics first, then user functions. Arguments are
    /// evaluated left to right in the caller's scope either way.
    fn eval_call(
        &mut self,
        name: &str,
        args: &[Expr],
        pos: &SourcePos,
    ) -> Result<Value, Diagnostic> {
        if let Some(arity) = intrinsic_arity(name) {
            if args.len() != arity {
                return Err(Diagnostic::runtime(
                    pos.clone(),
                    format!("intrinsic '{name}' expects {arity} argument(s), got {}", args.len()),
                ));
            }
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(self.eval(arg)?.raw);
            }
            let result = self
                .peripherals
                .call(name, &values)
                .map_err(|message| Diagnostic::runtime(pos.clone(), message))?;
            return Ok(Value::word(result));
        }

        let function = self.program.find_function(name).ok_or_else(|| {
            Diagnostic::runtime(pos.clone(), format!("undefined function '{name}'"))
        })?;
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg)?.raw);
        }
        self.call_user(function, &values, pos).map(Value::word)
    }

    // ----- statements -----

    fn exec_stmts(&mut self, stmts: &[Stmt]) -> Result<Flow, Diagnostic> {
        for stmt in stmts {
            let flow = self.exec_stmt(stmt)?;
            if flow != Flow::Normal {
                return Ok(flow);
            }
        }
        Ok(Flow::Normal)
    }

    /// Execute statements in a fresh block scope, rolling back both the
    /// environment and the stack region on exit.
    fn exec_block(&mut self, stmts: &[Stmt]) -> Result<Flow, Diagnostic> {
        let saved = self.env.current();
        self.env.enter_block();
        let mark = self.mem.stack_mark();
        let flow = self.exec_stmts(stmts);
        self.env.leave(saved);
        self.mem.release_to(mark);
        flow
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<Flow, Diagnostic> {
        match stmt {
            Stmt::VarDecl {
                name,
                ty,
                volatile,
                register,
                init,
                pos,
            } => {
                let value = match init {
                    Some(expr) => self.eval(expr)?.raw,
                    None => 0,
                };
                let addr = self.alloc_local(1, pos)?;
                self.store(addr, value, pos)?;
                // Register-pinned variables behave as volatile cells here;
                // only the code generator gives them an ISA register.
                let slot = Slot::scalar(addr, *ty, *volatile || *register);
                self.declare(name, slot, pos)?;
                Ok(Flow::Normal)
            }
            Stmt::ArrayDecl {
                name,
                ty,
                len,
                init,
                pos,
            } => {
                let base = self.alloc_local(*len, pos)?;
                for (i, expr) in init.iter().enumerate() {
                    let value = self.eval(expr)?.raw;
                    self.store(base + 4 * i as u32, value, pos)?;
                }
                self.declare(name, Slot::array(base, *ty, *len), pos)?;
                Ok(Flow::Normal)
            }
            Stmt::PtrDecl { name, ty, init, pos } => {
                let value = match init {
                    Some(expr) => self.eval(expr)?.raw,
                    None => 0,
                };
                let addr = self.alloc_local(1, pos)?;
                self.store(addr, value, pos)?;
                self.declare(name, Slot::pointer(addr, *ty), pos)?;
                Ok(Flow::Normal)
            }
            Stmt::Assign { target, value, pos } => {
                let value = self.eval(value)?;
                let place = self.resolve_place(target)?;
                self.store(place.addr, value.raw, pos)?;
                Ok(Flow::Normal)
            }
            Stmt::CompoundAssign {
                target,
                op,
                value,
                pos,
            } => {
                let place = self.resolve_place(target)?;
                let old = Value {
                    raw: self.load(place.addr, pos)?,
                    signed: place.signed,
                    pointer: place.pointer,
                };
                let rhs = self.eval(value)?;
                let result = apply_binop(*op, old, rhs, pos)?;
                self.store(place.addr, result.raw, pos)?;
                Ok(Flow::Normal)
            }
            Stmt::IncDec { target, op, pos } => {
                let place = self.resolve_place(target)?;
                let old = self.load(place.addr, pos)?;
                let delta = if place.pointer { 4 } else { 1 };
                let new = match op {
                    IncDec::Inc => old.wrapping_add(delta),
                    IncDec::Dec => old.wrapping_sub(delta),
                };
                self.store(place.addr, new, pos)?;
                Ok(Flow::Normal)
            }
            Stmt::If {
                cond,
                then_body,
                else_body,
                ..
            } => {
                if self.eval(cond)?.truthy() {
                    self.exec_block(then_body)
                } else if let Some(else_body) = else_body {
                    self.exec_block(else_body)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::While { cond, body, .. } => {
                loop {
                    if !self.eval(cond)?.truthy() {
                        break;
                    }
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::DoWhile { body, cond, .. } => {
                loop {
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                    if !self.eval(cond)?.truthy() {
                        break;
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
                ..
            } => {
                // The init clause scopes over the condition, step, and body.
                let saved = self.env.current();
                self.env.enter_block();
                let mark = self.mem.stack_mark();

                let result = (|| {
                    if let Some(init) = init {
                        self.exec_stmt(init)?;
                    }
                    loop {
                        let keep_going = match cond {
                            Some(cond) => self.eval(cond)?.truthy(),
                            None => true,
                        };
                        if !keep_going {
                            break;
                        }
                        match self.exec_block(body)? {
                            Flow::Break => break,
                            Flow::Return(value) => return Ok(Flow::Return(value)),
                            Flow::Normal | Flow::Continue => {}
                        }
                        if let Some(step) = step {
                            self.exec_stmt(step)?;
                        }
                    }
                    Ok(Flow::Normal)
                })();

                self.env.leave(saved);
                self.mem.release_to(mark);
                result
            }
            Stmt::Return { value, .. } => {
                let result = match value {
                    Some(expr) => self.eval(expr)?.raw,
                    None => 0,
                };
                Ok(Flow::Return(result))
            }
            Stmt::Break { .. } => Ok(Flow::Break),
            Stmt::Continue { .. } => Ok(Flow::Continue),
            Stmt::Block { body, .. } => self.exec_block(body),
            Stmt::Asm { pos, .. } => {
                warn!(%pos, "asm block ignored by the interpreter");
                Ok(Flow::Normal)
            }
            Stmt::Call { name, args, pos } => {
                self.eval_call(name, args, pos)?;
                Ok(Flow::Normal)
            }
        }
    }

    // ----- expressions -----

    fn eval(&mut self, expr: &Expr) -> Result<Value, Diagnostic> {
        match expr {
            Expr::Int { value, .. } => Ok(Value::word(*value)),
            Expr::Ident { name, pos } => {
                let slot = self.lookup(name, pos)?.clone();
                if slot.array_len.is_some() {
                    // Array names decay to the base address
                    return Ok(Value {
                        raw: slot.addr,
                        signed: slot.ty == VarType::I32,
                        pointer: true,
                    });
                }
                let raw = self.load(slot.addr, pos)?;
                Ok(Value {
                    raw,
                    signed: slot.ty == VarType::I32,
                    pointer: slot.pointer,
                })
            }
            Expr::Unary { op, operand, .. } => {
                let value = self.eval(operand)?;
                let result = match op {
                    UnOp::Not => Value::flag(!value.truthy()),
                    UnOp::BitNot => Value {
                        raw: !value.raw,
                        signed: value.signed,
                        pointer: false,
                    },
                    UnOp::Neg => Value {
                        raw: value.raw.wrapping_neg(),
                        signed: true,
                        pointer: false,
                    },
                };
                Ok(result)
            }
            Expr::Binary { op, lhs, rhs, pos } => {
                if op.is_logical() {
                    let lhs = self.eval(lhs)?.truthy();
                    return match (*op, lhs) {
                        (BinOp::LogAnd, false) => Ok(Value::flag(false)),
                        (BinOp::LogOr, true) => Ok(Value::flag(true)),
                        _ => Ok(Value::flag(self.eval(rhs)?.truthy())),
                    };
                }
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                apply_binop(*op, lhs, rhs, pos)
            }
            Expr::Call { name, args, pos } => self.eval_call(name, args, pos),
            Expr::Index { base, index, pos } => {
                let place = self.index_place(base, index, pos)?;
                let raw = self.load(place.addr, pos)?;
                Ok(Value {
                    raw,
                    signed: place.signed,
                    pointer: false,
                })
            }
            Expr::AddrOf { target, pos } => match target.as_ref() {
                Expr::Ident { name, pos } => {
                    let slot = self.lookup(name, pos)?;
                    Ok(Value {
                        raw: slot.addr,
                        signed: slot.ty == VarType::I32,
                        pointer: true,
                    })
                }
                Expr::Index { base, index, pos } => {
                    let place = self.index_place(base, index, pos)?;
                    Ok(Value {
                        raw: place.addr,
                        signed: place.signed,
                        pointer: true,
                    })
                }
                Expr::Deref { operand, .. } => {
                    // &*p is p
                    self.eval(operand)
                }
                _ => Err(Diagnostic::runtime(
                    pos.clone(),
                    "cannot take the address of this expression",
                )),
            },
            Expr::Deref { operand, pos } => {
                let address = self.eval(operand)?;
                let raw = self.load(address.raw, pos)?;
                Ok(Value {
                    raw,
                    signed: address.signed,
                    pointer: false,
                })
            }
        }
    }

    /// Compute the cell for `base[index]`, including the static bounds check
    /// when the base names an array directly.
    fn index_place(
        &mut self,
        base: &Expr,
        index: &Expr,
        pos: &SourcePos,
    ) -> Result<Place, Diagnostic> {
        let base_value = self.eval(base)?;
        let index_value = self.eval(index)?;

        if let Expr::Ident { name, pos: base_pos } = base {
            if let Some(len) = self.lookup(name, base_pos)?.array_len {
                if index_value.raw >= len {
                    return Err(Diagnostic::runtime(
                        pos.clone(),
                        format!("index {} out of bounds for array '{name}' of length {len}",
                            index_value.raw),
                    ));
                }
            }
        }

        let addr = base_value
            .raw
            .wrapping_add(index_value.raw.wrapping_mul(4));
        Ok(Place {
            addr,
            signed: base_value.signed,
            pointer: false,
        })
    }

    fn resolve_place(&mut self, target: &Expr) -> Result<Place, Diagnostic> {
        match target {
            Expr::Ident { name, pos } => {
                let slot = self.lookup(name, pos)?;
                if slot.array_len.is_some() {
                    return Err(Diagnostic::runtime(
                        pos.clone(),
                        format!("cannot assign to array '{name}'"),
                    ));
                }
                Ok(Place {
                    addr: slot.addr,
                    signed: slot.ty == VarType::I32,
                    pointer: slot.pointer,
                })
            }
            Expr::Index { base, index, pos } => self.index_place(base, index, pos),
            Expr::Deref { operand, .. } => {
                let address = self.eval(operand)?;
                Ok(Place {
                    addr: address.raw,
                    signed: address.signed,
                    pointer: false,
                })
            }
            other => Err(Diagnostic::runtime(
                other.pos().clone(),
                "target is not an l-value",
            )),
        }
    }

    // ----- small wrappers attaching positions to faults -----

    fn alloc_local(&mut self, words: u32, pos: &SourcePos) -> Result<u32, Diagnostic> {
        self.mem
            .alloc_stack(words)
            .map_err(|fault| Diagnostic::runtime(pos.clone(), fault.to_string()))
    }

    fn load(&self, addr: u32, pos: &SourcePos) -> Result<u32, Diagnostic> {
        self.mem
            .load_word(addr)
            .map_err(|fault| Diagnostic::runtime(pos.clone(), fault.to_string()))
    }

    fn store(&mut self, addr: u32, value: u32, pos: &SourcePos) -> Result<(), Diagnostic> {
        self.mem
            .store_word(addr, value)
            .map_err(|fault| Diagnostic::runtime(pos.clone(), fault.to_string()))
    }

    fn declare(&mut self, name: &str, slot: Slot, pos: &SourcePos) -> Result<(), Diagnostic> {
        if self.env.declare(name, slot) {
            Ok(())
        } else {
            Err(Diagnostic::runtime(
                pos.clone(),
                format!("'{name}' is already declared in this scope"),
            ))
        }
    }

    fn lookup(&self, name: &str, pos: &SourcePos) -> Result<&Slot, Diagnostic> {
        self.env.lookup(name).ok_or_else(|| {
            Diagnostic::runtime(pos.clone(), format!("undefined variable '{name}'"))
        })
    }
}

/// Apply a non-logical binary operator. Pointer operands scale the integer
/// side of `+`/`-` by the word size.
fn apply_binop(op: BinOp, lhs: Value, rhs: Value, pos: &SourcePos) -> Result<Value, Diagnostic> {
    let signed = lhs.signed || rhs.signed;

    let value = match op {
        BinOp::Add => {
            let (l, r) = scale_for_pointer(lhs, rhs);
            Value {
                raw: l.wrapping_add(r),
                signed,
                pointer: lhs.pointer || rhs.pointer,
            }
        }
        BinOp::Sub => {
            let (l, r) = scale_for_pointer(lhs, rhs);
            Value {
                raw: l.wrapping_sub(r),
                signed,
                pointer: lhs.pointer && !rhs.pointer,
            }
        }
        BinOp::Mul => Value {
            raw: lhs.raw.wrapping_mul(rhs.raw),
            signed,
            pointer: false,
        },
        BinOp::Div => {
            if rhs.raw == 0 {
                return Err(Diagnostic::runtime(pos.clone(), "division by zero"));
            }
            let raw = if signed {
                (lhs.raw as i32).wrapping_div(rhs.raw as i32) as u32
            } else {
                lhs.raw / rhs.raw
            };
            Value {
                raw,
                signed,
                pointer: false,
            }
        }
        BinOp::Mod => {
            if rhs.raw == 0 {
                return Err(Diagnostic::runtime(pos.clone(), "modulo by zero"));
            }
            let raw = if signed {
                (lhs.raw as i32).wrapping_rem(rhs.raw as i32) as u32
            } else {
                lhs.raw % rhs.raw
            };
            Value {
                raw,
                signed,
                pointer: false,
            }
        }
        BinOp::BitAnd => Value {
            raw: lhs.raw & rhs.raw,
            signed,
            pointer: false,
        },
        BinOp::BitOr => Value {
            raw: lhs.raw | rhs.raw,
            signed,
            pointer: false,
        },
        BinOp::BitXor => Value {
            raw: lhs.raw ^ rhs.raw,
            signed,
            pointer: false,
        },
        BinOp::Shl => Value {
            raw: lhs.raw.wrapping_shl(rhs.raw),
            signed: lhs.signed,
            pointer: false,
        },
        BinOp::Shr => Value {
            raw: lhs.raw.wrapping_shr(rhs.raw),
            signed: lhs.signed,
            pointer: false,
        },
        BinOp::Eq => Value::flag(lhs.raw == rhs.raw),
        BinOp::Ne => Value::flag(lhs.raw != rhs.raw),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = if signed {
                (lhs.raw as i32).cmp(&(rhs.raw as i32))
            } else {
                lhs.raw.cmp(&rhs.raw)
            };
            let result = match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::Le => ordering.is_le(),
                BinOp::Gt => ordering.is_gt(),
                BinOp::Ge => ordering.is_ge(),
                _ => unreachable!(),
            };
            Value::flag(result)
        }
        BinOp::LogAnd | BinOp::LogOr => {
            unreachable!("logical operators are handled with short-circuit evaluation")
        }
    };
    Ok(value)
}

/// For `p + n` / `p - n` with exactly one pointer operand, scale the integer
/// side by 4. Two pointers (or two integers) pass through unscaled.
fn scale_for_pointer(lhs: Value, rhs: Value) -> (u32, u32) {
    match (lhs.pointer, rhs.pointer) {
        (true, false) => (lhs.raw, rhs.raw.wrapping_mul(4)),
        (false, true) => (lhs.raw.wrapping_mul(4), rhs.raw),
        _ => (lhs.raw, rhs.raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos() -> SourcePos {
        SourcePos::new("test.sc", 1, 1)
    }

    fn value(raw: u32) -> Value {
        Value::word(raw)
    }

    fn signed_value(raw: u32) -> Value {
        Value {
            raw,
            signed: true,
            pointer: false,
        }
    }

    #[test]
    fn test_wrapping_arithmetic() {
        let sum = apply_binop(BinOp::Add, value(0xFFFF_FFFF), value(1), &pos()).unwrap();
        assert_eq!(sum.raw, 0);

        let diff = apply_binop(BinOp::Sub, value(0), value(1), &pos()).unwrap();
        assert_eq!(diff.raw, 0xFFFF_FFFF);
    }

    #[test]
    fn test_division_follows_signedness() {
        // Unsigned: 0xFFFFFFFE / 2 is a huge number
        let q = apply_binop(BinOp::Div, value(0xFFFF_FFFE), value(2), &pos()).unwrap();
        assert_eq!(q.raw, 0x7FFF_FFFF);

        // Signed: -2 / 2 == -1
        let q = apply_binop(BinOp::Div, signed_value(0xFFFF_FFFE), value(2), &pos()).unwrap();
        assert_eq!(q.raw as i32, -1);
    }

    #[test]
    fn test_divide_by_zero() {
        let err = apply_binop(BinOp::Div, value(1), value(0), &pos()).unwrap_err();
        assert!(err.message.contains("division by zero"));
        let err = apply_binop(BinOp::Mod, value(1), value(0), &pos()).unwrap_err();
        assert!(err.message.contains("modulo by zero"));
    }

    #[test]
    fn test_comparison_signedness() {
        // Unsigned: 0xFFFFFFFF > 1
        let r = apply_binop(BinOp::Gt, value(0xFFFF_FFFF), value(1), &pos()).unwrap();
        assert_eq!(r.raw, 1);

        // Signed: -1 < 1
        let r = apply_binop(BinOp::Lt, signed_value(0xFFFF_FFFF), value(1), &pos()).unwrap();
        assert_eq!(r.raw, 1);
    }

    #[test]
    fn test_pointer_scaling() {
        let p = Value {
            raw: 100,
            signed: false,
            pointer: true,
        };
        let sum = apply_binop(BinOp::Add, p, value(2), &pos()).unwrap();
        assert_eq!(sum.raw, 108);
        assert!(sum.pointer);

        let sum = apply_binop(BinOp::Add, value(3), p, &pos()).unwrap();
        assert_eq!(sum.raw, 112);

        // Plain integers never scale
        let sum = apply_binop(BinOp::Add, value(100), value(2), &pos()).unwrap();
        assert_eq!(sum.raw, 102);
    }

    #[test]
    fn test_relational_results_are_bits() {
        let r = apply_binop(BinOp::Le, value(3), value(3), &pos()).unwrap();
        assert_eq!(r.raw, 1);
        assert!(!r.signed);
        let r = apply_binop(BinOp::Ne, value(3), value(3), &pos()).unwrap();
        assert_eq!(r.raw, 0);
    }
}

//! Emitted arithmetic helper routines
//!
//! The ISA has no multiply or divide, so `*`, `/`, and `%` lower to calls
//! into these routines. They follow the normal calling convention (operands
//! in `r26`/`r27`, result in `r0`, link in `r30`) but are leaves: instead of
//! touching the stack they restore the stack pointer from the `stack_ptr`
//! cell and jump straight back through the link.
//!
//! Division by zero halts the machine, mirroring the interpreter's runtime
//! diagnostic as closely as a bare metal target allows.

use super::{CodeGen, Helper};

pub(crate) fn emit_helpers(cg: &mut CodeGen<'_>) {
    let used: Vec<Helper> = cg.used_helpers.iter().copied().collect();
    for helper in used {
        match helper {
            Helper::Mul => emit_mul(cg),
            Helper::Udiv => emit_udiv(cg),
            Helper::Urem => emit_urem(cg),
            Helper::Sdiv => emit_sdiv(cg),
            Helper::Srem => emit_srem(cg),
        }
    }
}

/// The leaf-routine return path: recover the stack pointer, jump the link.
fn emit_leaf_return(cg: &mut CodeGen<'_>) {
    cg.emit("\tmov r2, r30");
    cg.emit("\tmov r1, stack_ptr");
    cg.emit("\tload r30, r1");
    cg.emit("\tmov r31, r2");
}

/// Shift-and-add multiply: r0 = r26 * r27 (modulo 2^32).
fn emit_mul(cg: &mut CodeGen<'_>) {
    cg.emit("");
    cg.emit("func_mul32:");
    cg.emit("\tmov r0, 0");
    cg.emit("\tmov r1, r26");
    cg.emit("\tmov r2, r27");
    cg.emit("mul32_loop:");
    cg.emit("\tcmpe r2, 0");
    cg.emit("\tcmovt r31, mul32_done");
    cg.emit("\tmov r3, r2");
    cg.emit("\tand r3, 1");
    cg.emit("\tcmpe r3, 0");
    cg.emit("\tcmovt r31, mul32_skip");
    cg.emit("\tadd r0, r1");
    cg.emit("mul32_skip:");
    cg.emit("\tshl r1, 1");
    cg.emit("\tshr r2, 1");
    cg.emit("\tmov r31, mul32_loop");
    cg.emit("mul32_done:");
    emit_leaf_return(cg);
}

/// The restoring-division core shared by all four divide/remainder
/// routines. Consumes r26 (dividend) and r27 (divisor); leaves the quotient
/// in r0 and the remainder in r1. Labels are prefixed so each routine's copy
/// stays unique.
fn emit_div_core(cg: &mut CodeGen<'_>, prefix: &str) {
    cg.emit("\tcmpe r27, 0");
    cg.emit(format!("\tcmovt r31, {prefix}_trap"));
    cg.emit("\tmov r0, 0");
    cg.emit("\tmov r1, 0");
    cg.emit("\tmov r2, 32");
    cg.emit("\tmov r3, r26");
    cg.emit(format!("{prefix}_loop:"));
    cg.emit("\tcmpe r2, 0");
    cg.emit(format!("\tcmovt r31, {prefix}_done"));
    cg.emit("\tsub r2, 1");
    cg.emit("\tshl r1, 1");
    cg.emit("\tmov r4, r3");
    cg.emit("\tshr r4, 31");
    cg.emit("\tor r1, r4");
    cg.emit("\tshl r3, 1");
    cg.emit("\tshl r0, 1");
    cg.emit("\tcmpb r1, r27");
    cg.emit(format!("\tcmovt r31, {prefix}_loop"));
    cg.emit("\tsub r1, r27");
    cg.emit("\tor r0, 1");
    cg.emit(format!("\tmov r31, {prefix}_loop"));
    cg.emit(format!("{prefix}_done:"));
}

fn emit_div_trap(cg: &mut CodeGen<'_>, prefix: &str) {
    cg.emit(format!("{prefix}_trap:"));
    cg.emit("\thlt");
}

fn emit_udiv(cg: &mut CodeGen<'_>) {
    cg.emit("");
    cg.emit("func_udiv32:");
    emit_div_core(cg, "udiv32");
    emit_leaf_return(cg);
    emit_div_trap(cg, "udiv32");
}

fn emit_urem(cg: &mut CodeGen<'_>) {
    cg.emit("");
    cg.emit("func_urem32:");
    emit_div_core(cg, "urem32");
    cg.emit("\tmov r0, r1");
    emit_leaf_return(cg);
    emit_div_trap(cg, "urem32");
}

/// Negate r26 in place when it is negative, via the prefixed skip label.
fn emit_abs(cg: &mut CodeGen<'_>, reg: &str, skip_label: &str) {
    cg.emit(format!("\tmov r3, {reg}"));
    cg.emit("\tshr r3, 31");
    cg.emit("\tcmpe r3, 0");
    cg.emit(format!("\tcmovt r31, {skip_label}"));
    cg.emit("\tmov r3, 0");
    cg.emit(format!("\tsub r3, {reg}"));
    cg.emit(format!("\tmov {reg}, r3"));
    cg.emit(format!("{skip_label}:"));
}

/// Signed divide: record the quotient sign, divide magnitudes, fix the sign.
fn emit_sdiv(cg: &mut CodeGen<'_>) {
    cg.emit("");
    cg.emit("func_sdiv32:");
    cg.emit("\tmov r5, r26");
    cg.emit("\txor r5, r27");
    cg.emit("\tshr r5, 31");
    emit_abs(cg, "r26", "sdiv32_abs_den");
    emit_abs(cg, "r27", "sdiv32_abs_div");
    emit_div_core(cg, "sdiv32");
    cg.emit("\tcmpe r5, 0");
    cg.emit("\tcmovt r31, sdiv32_ret");
    cg.emit("\tmov r1, 0");
    cg.emit("\tsub r1, r0");
    cg.emit("\tmov r0, r1");
    cg.emit("sdiv32_ret:");
    emit_leaf_return(cg);
    emit_div_trap(cg, "sdiv32");
}

/// Signed remainder: the result takes the sign of the dividend.
fn emit_srem(cg: &mut CodeGen<'_>) {
    cg.emit("");
    cg.emit("func_srem32:");
    cg.emit("\tmov r5, r26");
    cg.emit("\tshr r5, 31");
    emit_abs(cg, "r26", "srem32_abs_den");
    emit_abs(cg, "r27", "srem32_abs_div");
    emit_div_core(cg, "srem32");
    cg.emit("\tmov r0, r1");
    cg.emit("\tcmpe r5, 0");
    cg.emit("\tcmovt r31, srem32_ret");
    cg.emit("\tmov r1, 0");
    cg.emit("\tsub r1, r0");
    cg.emit("\tmov r0, r1");
    cg.emit("srem32_ret:");
    emit_leaf_return(cg);
    emit_div_trap(cg, "srem32");
}

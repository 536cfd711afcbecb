//! Hardware intrinsics (code generator subset)
//!
//! Only the UART and GPIO intrinsics lower to ISA instructions. The rest of
//! the peripheral table is interpreter-only; naming one of those here is a
//! codegen error rather than a silently missing symbol. The closed name set
//! and arities are shared with the interpreter's dispatch table.

use volt_core::{Diagnostic, Expr, SourcePos};
use volt_runtime::intrinsic_arity;

use super::CodeGen;
use super::regalloc::reg_name;

pub(crate) fn is_intrinsic(name: &str) -> bool {
    intrinsic_arity(name).is_some()
}

/// Lower one intrinsic call; returns the temp holding the result (0 for the
/// write-only intrinsics).
pub(crate) fn lower_intrinsic(
    cg: &mut CodeGen<'_>,
    name: &str,
    args: &[Expr],
    pos: &SourcePos,
) -> Result<u8, Diagnostic> {
    let arity = intrinsic_arity(name).unwrap_or_else(|| unreachable!());
    if args.len() != arity {
        return Err(cg.err(
            pos,
            format!(
                "intrinsic '{name}' expects {arity} argument(s), got {}",
                args.len()
            ),
        ));
    }

    match name {
        "uart_set_baud" => {
            let (temp, _) = cg.lower_expr(&args[0])?;
            cg.emit(format!("\tuartbd {}", reg_name(temp)));
            cg.emit(format!("\tmov {}, 0", reg_name(temp)));
            Ok(temp)
        }
        "uart_write" => {
            let (temp, _) = cg.lower_expr(&args[0])?;
            cg.emit(format!("\tuartwr {}", reg_name(temp)));
            cg.emit(format!("\tmov {}, 0", reg_name(temp)));
            Ok(temp)
        }
        "uart_read" => {
            let temp = cg.temp(pos)?;
            cg.emit(format!("\tuartrd {}", reg_name(temp)));
            Ok(temp)
        }
        "gpio_set" => {
            let (pin, _) = cg.lower_expr(&args[0])?;
            let (dir, _) = cg.lower_expr(&args[1])?;
            cg.emit(format!("\tgpiodir {}, {}", reg_name(pin), reg_name(dir)));
            cg.pools.free_temp(dir);
            cg.emit(format!("\tmov {}, 0", reg_name(pin)));
            Ok(pin)
        }
        "gpio_write" => {
            let (pin, _) = cg.lower_expr(&args[0])?;
            let (value, _) = cg.lower_expr(&args[1])?;
            cg.emit(format!("\tgpiowr {}, {}", reg_name(pin), reg_name(value)));
            cg.pools.free_temp(value);
            cg.emit(format!("\tmov {}, 0", reg_name(pin)));
            Ok(pin)
        }
        "gpio_read" => {
            let (pin, _) = cg.lower_expr(&args[0])?;
            cg.emit(format!("\tgpiord {0}, {0}", reg_name(pin)));
            Ok(pin)
        }
        other => Err(cg.err(
            pos,
            format!("intrinsic '{other}' is not supported by the code generator"),
        )),
    }
}

//! End-to-end interpreter tests
//!
//! Each test writes a real source file, runs it through the full front end
//! (preprocessor, lexer, parser), and executes `main` in the interpreter.

use std::fs;
use std::path::PathBuf;

use volt_core::{DiagKind, Diagnostic};
use volt_runtime::{Interpreter, RunOptions, UartSink};
use voltc::ToolchainConfig;

fn write_source(dir: &tempfile::TempDir, name: &str, text: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, text).unwrap();
    path
}

fn run_program(source: &str) -> Result<u32, Diagnostic> {
    let dir = tempfile::tempdir().unwrap();
    let path = write_source(&dir, "main.sc", source);
    let program = voltc::parse_file(&path, &ToolchainConfig::default())?;
    Interpreter::new(&program, RunOptions::default()).run()
}

fn run_value(source: &str) -> u32 {
    run_program(source).unwrap()
}

/// Run with the UART sink captured; returns the result and the bytes the
/// program wrote.
fn run_capturing(source: &str) -> (Result<u32, Diagnostic>, Vec<u8>) {
    let dir = tempfile::tempdir().unwrap();
    let path = write_source(&dir, "main.sc", source);
    let program = voltc::parse_file(&path, &ToolchainConfig::default()).unwrap();
    let mut interpreter = Interpreter::new(&program, RunOptions::default());
    interpreter
        .peripherals
        .bind_uart_sink(UartSink::Capture(Vec::new()));
    let result = interpreter.run();
    let captured = interpreter
        .peripherals
        .uart_captured()
        .map(<[u8]>::to_vec)
        .unwrap_or_default();
    (result, captured)
}

#[test]
fn test_precedence_arithmetic() {
    assert_eq!(run_value("function main(){ return 2+3*4; }"), 14);
}

#[test]
fn test_recursive_factorial() {
    let source = "function factorial(n){ if(n<=1) return 1; return n*factorial(n-1); } \
                  function main(){ return factorial(5); }";
    assert_eq!(run_value(source), 120);
}

#[test]
fn test_fibonacci_while_loop() {
    let source = "function main(){ uint32 a=0; uint32 b=1; uint32 i=2; \
                  while(i<=10){ uint32 t=a+b; a=b; b=t; i=i+1; } return b; }";
    assert_eq!(run_value(source), 55);
}

#[test]
fn test_array_pointer_walk() {
    let source = "function main(){ uint32 arr[5]={10,20,30,40,50}; uint32* p=&arr[0]; \
                  uint32 s=0; uint32 i=0; while(i<5){ s=s+*p; p=p+1; i=i+1; } return s; }";
    assert_eq!(run_value(source), 150);
}

#[test]
fn test_circular_include_diagnostic() {
    let dir = tempfile::tempdir().unwrap();
    write_source(&dir, "a.sc", "#include \"b.sc\"\n");
    write_source(&dir, "b.sc", "#include \"a.sc\"\n");
    let main = write_source(&dir, "main.sc", "#include \"a.sc\"\nfunction main(){ return 0; }\n");

    let err = voltc::parse_file(&main, &ToolchainConfig::default()).unwrap_err();
    assert_eq!(err.kind, DiagKind::Preprocess);
    assert!(err.message.contains("circular include"));
    assert!(err.message.contains("a.sc"));
    assert!(err.message.contains("b.sc"));
}

#[test]
fn test_uart_bytes_reach_the_sink() {
    let (result, bytes) =
        run_capturing("function main(){ uart_write(72); uart_write(105); return 0; }");
    assert_eq!(result.unwrap(), 0);
    assert_eq!(bytes, vec![0x48, 0x69]);
}

#[test]
fn test_modular_arithmetic_boundaries() {
    assert_eq!(run_value("function main(){ return 0xFFFFFFFF + 1; }"), 0);
    assert_eq!(run_value("function main(){ return 0 - 1; }"), 0xFFFF_FFFF);
}

#[test]
fn test_division_by_zero_is_a_runtime_error() {
    let err = run_program("function main(){ uint32 z = 0; return 1 / z; }").unwrap_err();
    assert_eq!(err.kind, DiagKind::Runtime);
    assert!(err.message.contains("division by zero"));

    let err = run_program("function main(){ uint32 z = 0; return 1 % z; }").unwrap_err();
    assert!(err.message.contains("modulo by zero"));
}

#[test]
fn test_signed_division_and_comparison() {
    // -7 / 2 truncates toward zero
    let source = "function main(){ int32 a = 0 - 7; int32 b = 2; return a / b; }";
    assert_eq!(run_value(source) as i32, -3);

    // Signed comparison: -1 < 1
    let source = "function main(){ int32 a = 0 - 1; if (a < 1) { return 1; } return 0; }";
    assert_eq!(run_value(source), 1);

    // Unsigned comparison: 0xFFFFFFFF > 1
    let source = "function main(){ uint32 a = 0 - 1; if (a > 1) { return 1; } return 0; }";
    assert_eq!(run_value(source), 1);
}

#[test]
fn test_short_circuit_evaluation() {
    // The right operand would trap; short-circuit must skip it
    let source = "function main(){ uint32 z = 0; if (0 && 1 / z) { return 1; } return 2; }";
    assert_eq!(run_value(source), 2);

    let source = "function main(){ uint32 z = 0; if (1 || 1 / z) { return 3; } return 4; }";
    assert_eq!(run_value(source), 3);
}

#[test]
fn test_logical_results_are_bits() {
    assert_eq!(run_value("function main(){ return 5 && 9; }"), 1);
    assert_eq!(run_value("function main(){ return !7; }"), 0);
    assert_eq!(run_value("function main(){ return !0; }"), 1);
}

#[test]
fn test_do_while_runs_at_least_once() {
    let source = "function main(){ uint32 n = 0; do { n = n + 1; } while (0); return n; }";
    assert_eq!(run_value(source), 1);
}

#[test]
fn test_for_loop_with_break_and_continue() {
    let source = "function main(){ uint32 s = 0; \
                  for (uint32 i = 0; i < 10; i++) { \
                    if (i == 7) { break; } \
                    if (i % 2 == 1) { continue; } \
                    s += i; } \
                  return s; }";
    // 0 + 2 + 4 + 6
    assert_eq!(run_value(source), 12);
}

#[test]
fn test_compound_assignment_and_incdec() {
    let source = "function main(){ uint32 a = 8; a += 4; a <<= 1; a -= 6; a /= 3; ++a; a--; return a; }";
    // ((8+4)<<1 - 6) / 3 = 6
    assert_eq!(run_value(source), 6);
}

#[test]
fn test_block_scoping_shadows_and_expires() {
    let source = "function main(){ uint32 x = 1; { uint32 x = 2; } return x; }";
    assert_eq!(run_value(source), 1);

    let source = "function main(){ { uint32 inner = 5; } return inner; }";
    let err = run_program(source).unwrap_err();
    assert!(err.message.contains("undefined variable 'inner'"));
}

#[test]
fn test_function_scope_parents_to_globals() {
    // The callee must not see the caller's locals
    let source = "function peek(){ return hidden; } \
                  function main(){ uint32 hidden = 9; return peek(); }";
    let err = run_program(source).unwrap_err();
    assert_eq!(err.kind, DiagKind::Runtime);
    assert!(err.message.contains("hidden"));

    let source = "uint32 shared = 3; function peek(){ return shared; } \
                  function main(){ return peek(); }";
    assert_eq!(run_value(source), 3);
}

#[test]
fn test_missing_return_yields_zero() {
    assert_eq!(run_value("function main(){ uint32 a = 5; }"), 0);
}

#[test]
fn test_globals_and_global_arrays() {
    let source = "uint32 counter = 10; uint32 table[3] = {1, 2, 3}; \
                  function bump(){ counter = counter + table[2]; return 0; } \
                  function main(){ bump(); bump(); return counter; }";
    assert_eq!(run_value(source), 16);
}

#[test]
fn test_address_of_local_scalar() {
    let source = "function main(){ uint32 x = 5; uint32* p = &x; *p = 11; return x; }";
    assert_eq!(run_value(source), 11);
}

#[test]
fn test_pointer_arithmetic_scales_by_word() {
    let source = "function main(){ uint32 arr[3]={7,8,9}; uint32* p = &arr[0]; \
                  return *(p + 2); }";
    assert_eq!(run_value(source), 9);
}

#[test]
fn test_array_index_is_deref_of_scaled_base() {
    let source = "function main(){ uint32 arr[4]={1,2,3,4}; uint32 i = 2; return arr[i + 1]; }";
    assert_eq!(run_value(source), 4);
}

#[test]
fn test_out_of_bounds_index_traps() {
    let err = run_program("function main(){ uint32 arr[2]={1,2}; return arr[5]; }").unwrap_err();
    assert_eq!(err.kind, DiagKind::Runtime);
    assert!(err.message.contains("out of bounds"));
}

#[test]
fn test_runtime_errors_carry_positions() {
    let err = run_program("function main(){\n  return boom;\n}").unwrap_err();
    assert_eq!(err.pos.line, 2);
    assert!(err.pos.file.ends_with("main.sc"));
}

#[test]
fn test_undefined_function_and_wrong_arity() {
    let err = run_program("function main(){ return missing(); }").unwrap_err();
    assert!(err.message.contains("undefined function 'missing'"));

    let source = "function f(a, b){ return a + b; } function main(){ return f(1); }";
    let err = run_program(source).unwrap_err();
    assert!(err.message.contains("expects 2 argument(s)"));
}

#[test]
fn test_recursion_limit() {
    let err = run_program("function spin(){ return spin(); } function main(){ return spin(); }")
        .unwrap_err();
    assert_eq!(err.kind, DiagKind::Runtime);
    assert!(err.message.contains("recursion limit"));
}

#[test]
fn test_arguments_bind_left_to_right() {
    let source = "function sub(a, b){ return a - b; } function main(){ return sub(10, 4); }";
    assert_eq!(run_value(source), 6);
}

#[test]
fn test_timer_polling_loop_terminates() {
    let source = "function main(){ timer_set_period(100); timer_start(); \
                  uint32 polls = 0; \
                  while (!timer_expired()) { polls = polls + 1; } \
                  return polls; }";
    // Default tick is 10: value reaches 100 on the 10th poll, after 9 misses
    assert_eq!(run_value(source), 9);
}

#[test]
fn test_gpio_round_trip() {
    let source = "function main(){ gpio_set(4, 1); gpio_write(4, 27); return gpio_read(4); }";
    assert_eq!(run_value(source), 27);
}

#[test]
fn test_bit_intrinsics() {
    let source = "function main(){ uint32 v = set_bit(0, 3); v = toggle_bit(v, 0); \
                  v = clear_bit(v, 3); return get_bit(v, 0); }";
    assert_eq!(run_value(source), 1);
}

#[test]
fn test_uart_read_returns_zero_without_input() {
    assert_eq!(run_value("function main(){ return uart_read(); }"), 0);
}

#[test]
fn test_uart_read_consumes_fed_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_source(
        &dir,
        "main.sc",
        "function main(){ return uart_read() + uart_read(); }",
    );
    let program = voltc::parse_file(&path, &ToolchainConfig::default()).unwrap();
    let mut interpreter = Interpreter::new(&program, RunOptions::default());
    interpreter.peripherals.feed_uart(&[3, 4]);
    assert_eq!(interpreter.run().unwrap(), 7);
}

#[test]
fn test_asm_block_is_a_no_op() {
    let source = "function main(){ uint32 a = 1; asm { mov r0, 99 }; return a; }";
    assert_eq!(run_value(source), 1);
}

#[test]
fn test_interrupt_routine_is_not_scheduled() {
    let source = "uint32 fired = 0; \
                  interrupt function on_tick(){ fired = fired + 1; return 0; } \
                  function main(){ return fired; }";
    assert_eq!(run_value(source), 0);
}

#[test]
fn test_interrupt_routine_host_hook() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_source(
        &dir,
        "main.sc",
        "uint32 fired = 0; \
         interrupt function on_tick(){ fired = fired + 1; return fired; } \
         function main(){ return 0; }",
    );
    let program = voltc::parse_file(&path, &ToolchainConfig::default()).unwrap();
    let mut interpreter = Interpreter::new(&program, RunOptions::default());
    interpreter.run().unwrap();
    assert_eq!(interpreter.call_interrupt("on_tick").unwrap(), 1);
    assert_eq!(interpreter.call_interrupt("on_tick").unwrap(), 2);
    assert!(interpreter.call_interrupt("main").is_err());
}

#[test]
fn test_macro_expansion_feeds_the_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    write_source(&dir, "limits.sc", "#define LIMIT 6\n");
    let path = write_source(
        &dir,
        "main.sc",
        "#include \"limits.sc\"\nfunction main(){ uint32 s=0; uint32 i=0; \
         while (i < LIMIT) { s += i; i++; } return s; }",
    );
    let value = voltc::interpret_file(&path, &ToolchainConfig::default()).unwrap();
    assert_eq!(value, 15);
}

#[test]
fn test_volatile_and_register_declarations_execute() {
    let source = "function main(){ volatile uint32 status = 2; register uint32 r5 = 3; \
                  status += r5; return status; }";
    assert_eq!(run_value(source), 5);
}

#[test]
fn test_else_if_chain() {
    let source = "function pick(n){ if (n == 0) { return 10; } else if (n == 1) { return 20; } \
                  else { return 30; } } \
                  function main(){ return pick(0) + pick(1) + pick(2); }";
    assert_eq!(run_value(source), 60);
}

#[test]
fn test_nested_loops_break_inner_only() {
    let source = "function main(){ uint32 count = 0; \
                  uint32 i = 0; \
                  while (i < 3) { \
                    uint32 j = 0; \
                    while (1) { \
                      if (j == 2) { break; } \
                      j++; count++; \
                    } \
                    i++; \
                  } \
                  return count; }";
    assert_eq!(run_value(source), 6);
}

//! Volt Compiler Library
//!
//! The language pipeline: preprocessor, lexer, recursive-descent parser, and
//! the assembly code generator, plus the toolchain configuration. The
//! pipeline is strictly linear; each stage consumes the complete output of
//! the previous one and returns either its full result or the first
//! diagnostic.
//!
//! ```text
//! path -> preprocess -> lex -> parse -> AST -> interpret (volt-runtime)
//!                                           -> generate  (assembly text)
//! ```

pub mod codegen;
pub mod config;
pub mod lexer;
pub mod parser;
pub mod preprocessor;

pub use codegen::{CodegenOptions, generate};
pub use config::ToolchainConfig;
pub use lexer::Lexer;
pub use parser::Parser;
pub use preprocessor::{PreprocessedSource, Preprocessor, SourceLine};

use std::path::Path;

use tracing::debug;
use volt_core::{Diagnostic, Program};
use volt_runtime::Interpreter;

/// Run the front half of the pipeline: preprocess, lex, parse.
pub fn parse_file(path: &Path, config: &ToolchainConfig) -> Result<Program, Diagnostic> {
    let mut preprocessor = Preprocessor::new(config.preprocessor.macro_expansion_limit);
    let source = preprocessor.run(path)?;
    let tokens = Lexer::new(&source).tokenize()?;
    let program = Parser::new(tokens).parse()?;
    debug!(items = program.items.len(), "parsed program");
    Ok(program)
}

/// Interpret `main` in the file at `path`; returns its 32-bit result.
pub fn interpret_file(path: &Path, config: &ToolchainConfig) -> Result<u32, Diagnostic> {
    let program = parse_file(path, config)?;
    Interpreter::new(&program, config.run_options()).run()
}

/// Compile the file at `path` to an assembly listing.
pub fn compile_file(path: &Path, config: &ToolchainConfig) -> Result<String, Diagnostic> {
    let program = parse_file(path, config)?;
    codegen::generate(&program, config.codegen_options())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn write_source(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, text).unwrap();
        path
    }

    fn compile_source(text: &str) -> Result<String, Diagnostic> {
        let dir = tempfile::tempdir().unwrap();
        let path = write_source(dir.path(), "main.sc", text);
        compile_file(&path, &ToolchainConfig::default())
    }

    #[test]
    fn test_listing_header_shape() {
        let asm = compile_source("function main() { return 0; }").unwrap();
        let mut lines = asm.lines().filter(|l| !l.trim_start().starts_with(';'));
        assert_eq!(lines.next(), Some("format binary as \"bin\""));
        assert_eq!(lines.next(), Some("include \"ISA.inc\""));
        assert!(asm.contains("stack_ptr dd 0"));
        assert!(asm.contains("func_main:"));
        assert!(asm.trim_end().ends_with("hlt"));
    }

    #[test]
    fn test_entry_function_comes_first() {
        let asm = compile_source(
            "function helper() { return 1; } function main() { return helper(); }",
        )
        .unwrap();
        let main_at = asm.find("func_main:").unwrap();
        let helper_at = asm.find("func_helper:").unwrap();
        assert!(main_at < helper_at);
    }

    #[test]
    fn test_globals_in_data_section() {
        let asm = compile_source(
            "uint32 counter = 7; uint32 table[4] = {1, 2}; function main() { return counter; }",
        )
        .unwrap();
        assert!(asm.contains("counter dd 7"));
        assert!(asm.contains("table dd 1, 2, 0, 0"));
    }

    #[test]
    fn test_compile_is_deterministic() {
        let source = "function f(n) { if (n < 2) { return n; } return f(n - 1) + f(n - 2); } \
                      function main() { uint32 i; for (i = 0; i < 5; i++) { uart_write(i); } return f(10); }";
        let first = compile_source(source).unwrap();
        let second = compile_source(source).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_label_numbering_per_category() {
        let asm = compile_source(
            "function main() { \
               if (1) { uart_write(1); } \
               if (2) { uart_write(2); } \
               while (0) { break; } \
               return 0; }",
        )
        .unwrap();
        assert!(asm.contains("if_end_0:"));
        assert!(asm.contains("if_end_1:"));
        assert!(asm.contains("while_start_0:"));
        assert!(asm.contains("while_end_0:"));
    }

    #[test]
    fn test_call_uses_ret_addr_labels() {
        let asm = compile_source(
            "function f() { return 3; } function main() { return f(); }",
        )
        .unwrap();
        assert!(asm.contains("\tmov r30, ret_addr_0"));
        assert!(asm.contains("\tmov r31, func_f"));
        assert!(asm.contains("ret_addr_0:"));
    }

    #[test]
    fn test_multiply_pulls_in_helper() {
        let asm = compile_source("function main() { return 6 * 7; }").unwrap();
        assert!(asm.contains("func_mul32:"));
        assert!(!asm.contains("func_udiv32:"));
    }

    #[test]
    fn test_signed_division_selects_signed_helper() {
        let asm = compile_source(
            "function main() { int32 a = 10; int32 b = 3; return a / b; }",
        )
        .unwrap();
        assert!(asm.contains("func_sdiv32:"));
        assert!(!asm.contains("func_udiv32:"));
    }

    #[test]
    fn test_uart_and_gpio_lower_to_instructions() {
        let asm = compile_source(
            "function main() { uart_set_baud(9600); uart_write(72); gpio_set(3, 1); \
             gpio_write(3, 1); return gpio_read(3) + uart_read(); }",
        )
        .unwrap();
        assert!(asm.contains("\tuartbd "));
        assert!(asm.contains("\tuartwr "));
        assert!(asm.contains("\tuartrd "));
        assert!(asm.contains("\tgpiodir "));
        assert!(asm.contains("\tgpiowr "));
        assert!(asm.contains("\tgpiord "));
    }

    #[test]
    fn test_unsupported_intrinsic_is_codegen_error() {
        let err = compile_source("function main() { timer_start(); return 0; }").unwrap_err();
        assert_eq!(err.kind, volt_core::DiagKind::Codegen);
        assert!(err.message.contains("timer_start"));
    }

    #[test]
    fn test_too_many_parameters() {
        let err = compile_source(
            "function f(a, b, c, d, e, g) { return 0; } function main() { return f(1, 2, 3, 4, 5, 6); }",
        )
        .unwrap_err();
        assert!(err.message.contains("at most 5"));
    }

    #[test]
    fn test_five_argument_call_passes_link_on_stack() {
        let asm = compile_source(
            "function f(a, b, c, d, e) { return a + e; } function main() { return f(1, 2, 3, 4, 5); }",
        )
        .unwrap();
        // The fifth argument displaces the link from r30
        assert!(asm.contains("func_f:"));
        assert!(asm.contains("\tmov r26, "));
    }

    #[test]
    fn test_asm_block_is_verbatim() {
        let asm = compile_source("function main() { asm { frobnicate r9, r8 }; return 0; }")
            .unwrap();
        assert!(asm.contains("\tfrobnicate r9, r8"));
        assert!(asm.contains("; asm block (line 1)"));
    }

    #[test]
    fn test_register_variable_is_pinned() {
        let asm = compile_source(
            "function main() { register uint32 r20 = 5; r20 += 1; return r20; }",
        )
        .unwrap();
        assert!(asm.contains("\tmov r20, "));
    }

    #[test]
    fn test_undefined_variable_at_lowering() {
        // The parser is scopeless for expressions; the generator rejects
        // unknown names when it lowers them.
        let err = compile_source("function main() { return nope; }").unwrap_err();
        assert_eq!(err.kind, volt_core::DiagKind::Codegen);
        assert!(err.message.contains("nope"));
    }

    #[test]
    fn test_source_line_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_source(
            dir.path(),
            "main.sc",
            "function main() {\n  uint32 a = 1;\n  return a;\n}\n",
        );
        let asm = compile_file(&path, &ToolchainConfig::default()).unwrap();
        assert!(asm.contains("; line 2"));
        assert!(asm.contains("; line 3"));
    }

    #[test]
    fn test_interpret_file_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_source(
            dir.path(),
            "main.sc",
            "#define BASE 40\nfunction main() { return BASE + 2; }\n",
        );
        let value = interpret_file(&path, &ToolchainConfig::default()).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_non_constant_global_initializer() {
        let err = compile_source("uint32 g = f(); function main() { return g; } function f() { return 1; }")
            .unwrap_err();
        assert!(err.message.contains("constant"));
    }
}

//! Toolchain configuration
//!
//! Options come from an optional `volt.toml` looked up next to the source
//! file and then in the current directory. A missing file means defaults;
//! unknown keys are rejected so typos surface instead of silently reverting
//! to defaults.
//!
//! ```toml
//! [preprocessor]
//! macro-expansion-limit = 64
//!
//! [interpreter]
//! memory-size = 65536
//! recursion-limit = 256
//! timer-tick = 10
//!
//! [codegen]
//! isa-include = "ISA.inc"
//! stack-top = 65536
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::codegen::CodegenOptions;
use volt_runtime::RunOptions;

pub const CONFIG_FILE: &str = "volt.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ToolchainConfig {
    #[serde(default)]
    pub preprocessor: PreprocessorConfig,
    #[serde(default)]
    pub interpreter: InterpreterConfig,
    #[serde(default)]
    pub codegen: CodegenConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct PreprocessorConfig {
    /// Cap on macro re-expansion passes per line
    #[serde(default = "default_macro_expansion_limit")]
    pub macro_expansion_limit: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct InterpreterConfig {
    /// Bytes of simulated memory
    #[serde(default = "default_memory_size")]
    pub memory_size: u32,
    /// Maximum user-function call depth
    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: u32,
    /// Emulated timer advance per `timer_expired` poll
    #[serde(default = "default_timer_tick")]
    pub timer_tick: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct CodegenConfig {
    /// Path emitted in the listing's `include` header line
    #[serde(default = "default_isa_include")]
    pub isa_include: String,
    /// Initial software stack pointer
    #[serde(default = "default_stack_top")]
    pub stack_top: u32,
}

fn default_macro_expansion_limit() -> u32 {
    64
}

fn default_memory_size() -> u32 {
    64 * 1024
}

fn default_recursion_limit() -> u32 {
    256
}

fn default_timer_tick() -> u32 {
    10
}

fn default_isa_include() -> String {
    "ISA.inc".to_string()
}

fn default_stack_top() -> u32 {
    64 * 1024
}

impl Default for PreprocessorConfig {
    fn default() -> Self {
        PreprocessorConfig {
            macro_expansion_limit: default_macro_expansion_limit(),
        }
    }
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        InterpreterConfig {
            memory_size: default_memory_size(),
            recursion_limit: default_recursion_limit(),
            timer_tick: default_timer_tick(),
        }
    }
}

impl Default for CodegenConfig {
    fn default() -> Self {
        CodegenConfig {
            isa_include: default_isa_include(),
            stack_top: default_stack_top(),
        }
    }
}

impl ToolchainConfig {
    /// Load a specific config file.
    pub fn load(path: &Path) -> Result<Self, String> {
        let text = fs::read_to_string(path)
            .map_err(|err| format!("cannot read {}: {err}", path.display()))?;
        toml::from_str(&text).map_err(|err| format!("invalid {}: {err}", path.display()))
    }

    /// Find and load the config for a source file: `volt.toml` beside the
    /// source, then in the current directory, then defaults.
    pub fn discover(source: &Path) -> Result<Self, String> {
        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Some(dir) = source.parent() {
            candidates.push(dir.join(CONFIG_FILE));
        }
        candidates.push(PathBuf::from(CONFIG_FILE));

        for candidate in candidates {
            if candidate.is_file() {
                debug!(path = %candidate.display(), "loading toolchain config");
                return Self::load(&candidate);
            }
        }
        Ok(Self::default())
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            memory_size: self.interpreter.memory_size,
            recursion_limit: self.interpreter.recursion_limit,
            timer_tick: self.interpreter.timer_tick,
        }
    }

    pub fn codegen_options(&self) -> CodegenOptions {
        CodegenOptions {
            isa_include: self.codegen.isa_include.clone(),
            stack_top: self.codegen.stack_top,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ToolchainConfig::default();
        assert_eq!(config.interpreter.memory_size, 64 * 1024);
        assert_eq!(config.interpreter.recursion_limit, 256);
        assert_eq!(config.preprocessor.macro_expansion_limit, 64);
        assert_eq!(config.codegen.isa_include, "ISA.inc");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: ToolchainConfig = toml::from_str(
            "[interpreter]\nrecursion-limit = 32\n",
        )
        .unwrap();
        assert_eq!(config.interpreter.recursion_limit, 32);
        assert_eq!(config.interpreter.memory_size, 64 * 1024);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let result: Result<ToolchainConfig, _> =
            toml::from_str("[interpreter]\nmemory-szie = 4096\n");
        assert!(result.is_err());
    }
}

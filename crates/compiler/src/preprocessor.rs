//! Textual preprocessor
//!
//! Resolves `#include` directives into one concatenated line list, maintains
//! the macro table (`#define` / `#undef`), and expands macros on identifier
//! boundaries. Every output line carries the file and line it originally came
//! from, so the lexer reports positions in real source.
//!
//! Directives are only recognized when `#` is at column zero; any other line
//! is source text. Macro bodies may reference other macros; expansion repeats
//! until a pass changes nothing, bounded by a configurable cap so mutually
//! recursive definitions surface as an error instead of a hang.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use volt_core::{Diagnostic, SourcePos};

/// One line of preprocessed output with its original position.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceLine {
    pub text: String,
    pub file: String,
    pub line: u32,
}

/// The complete preprocessed translation unit.
#[derive(Debug, Clone, Default)]
pub struct PreprocessedSource {
    pub lines: Vec<SourceLine>,
}

/// An in-progress include, used for cycle detection and relative resolution.
struct OpenFile {
    /// Canonical identity for cycle checks
    canonical: PathBuf,
    /// Path as displayed in diagnostics
    display: String,
}

pub struct Preprocessor {
    /// Directory of the initial source file
    base_dir: PathBuf,
    macros: HashMap<String, String>,
    stack: Vec<OpenFile>,
    expansion_limit: u32,
}

impl Preprocessor {
    pub fn new(expansion_limit: u32) -> Self {
        Preprocessor {
            base_dir: PathBuf::new(),
            macros: HashMap::new(),
            stack: Vec::new(),
            expansion_limit,
        }
    }

    /// Preprocess the translation unit rooted at `path`.
    pub fn run(&mut self, path: &Path) -> Result<PreprocessedSource, Diagnostic> {
        debug!(path = %path.display(), "preprocessing");
        self.base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let mut lines = Vec::new();
        let root_pos = SourcePos::new(path.display().to_string(), 1, 1);
        self.include_file(path, &root_pos, &mut lines)?;
        Ok(PreprocessedSource { lines })
    }

    /// Read one file, process its directives, and append its expanded source
    /// lines. `include_pos` is where this file was requested from, used for
    /// diagnostics about the file itself.
    fn include_file(
        &mut self,
        path: &Path,
        include_pos: &SourcePos,
        out: &mut Vec<SourceLine>,
    ) -> Result<(), Diagnostic> {
        let display = path.display().to_string();
        let canonical = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());

        if self.stack.iter().any(|open| open.canonical == canonical) {
            let mut chain: Vec<&str> = self
                .stack
                .iter()
                .map(|open| open.display.as_str())
                .collect();
            chain.push(&display);
            return Err(Diagnostic::preprocess(
                include_pos.clone(),
                format!("circular include: {}", chain.join(" -> ")),
            ));
        }

        let text = fs::read_to_string(path).map_err(|err| {
            Diagnostic::preprocess(
                include_pos.clone(),
                format!("cannot read '{display}': {err}"),
            )
        })?;

        self.stack.push(OpenFile {
            canonical,
            display: display.clone(),
        });

        for (index, raw) in text.lines().enumerate() {
            let line_no = (index + 1) as u32;
            let line = raw.strip_suffix('\r').unwrap_or(raw);
            let pos = SourcePos::new(display.clone(), line_no, 1);

            if let Some(directive) = line.strip_prefix('#') {
                self.process_directive(directive, &pos, out)?;
            } else {
                let text = self.expand_line(line, &pos)?;
                out.push(SourceLine {
                    text,
                    file: display.clone(),
                    line: line_no,
                });
            }
        }

        self.stack.pop();
        Ok(())
    }

    fn process_directive(
        &mut self,
        directive: &str,
        pos: &SourcePos,
        out: &mut Vec<SourceLine>,
    ) -> Result<(), Diagnostic> {
        let trimmed = directive.trim_start();

        if let Some(rest) = trimmed.strip_prefix("include") {
            let spec = parse_include_spec(rest).ok_or_else(|| {
                Diagnostic::preprocess(pos.clone(), "malformed #include directive")
            })?;
            let resolved = self.resolve_include(&spec).ok_or_else(|| {
                Diagnostic::preprocess(pos.clone(), format!("include file not found: '{spec}'"))
            })?;
            return self.include_file(&resolved, pos, out);
        }

        if let Some(rest) = trimmed.strip_prefix("define") {
            let rest = rest.trim_start();
            let name = leading_identifier(rest).ok_or_else(|| {
                Diagnostic::preprocess(pos.clone(), "malformed #define directive: expected name")
            })?;
            // Body is everything after the first whitespace run following the
            // name; a bare `#define NAME` maps to the empty substitution.
            let body = rest[name.len()..].trim_start().to_string();
            self.macros.insert(name.to_string(), body);
            return Ok(());
        }

        if let Some(rest) = trimmed.strip_prefix("undef") {
            let rest = rest.trim_start();
            let name = leading_identifier(rest).ok_or_else(|| {
                Diagnostic::preprocess(pos.clone(), "malformed #undef directive: expected name")
            })?;
            if self.macros.remove(name).is_none() {
                warn!(%pos, name, "#undef of a macro that is not defined");
            }
            return Ok(());
        }

        Err(Diagnostic::preprocess(
            pos.clone(),
            format!("unknown preprocessor directive: #{}", trimmed),
        ))
    }

    /// Include search order: absolute as-is, then relative to the including
    /// file, then the initial base directory, then the current working
    /// directory.
    fn resolve_include(&self, spec: &str) -> Option<PathBuf> {
        let requested = Path::new(spec);
        if requested.is_absolute() {
            return requested.is_file().then(|| requested.to_path_buf());
        }

        let mut candidates = Vec::new();
        if let Some(open) = self.stack.last() {
            if let Some(dir) = Path::new(&open.display).parent() {
                candidates.push(dir.join(requested));
            }
        }
        candidates.push(self.base_dir.join(requested));
        if let Ok(cwd) = std::env::current_dir() {
            candidates.push(cwd.join(requested));
        }

        candidates.into_iter().find(|c| c.is_file())
    }

    /// Replace macro names on identifier boundaries, repeating until a pass
    /// changes nothing. Exceeding the cap means a macro (directly or
    /// mutually) expands to itself.
    fn expand_line(&self, line: &str, pos: &SourcePos) -> Result<String, Diagnostic> {
        let mut current = line.to_string();
        for _ in 0..self.expansion_limit {
            let expanded = self.expand_once(&current);
            if expanded == current {
                return Ok(current);
            }
            current = expanded;
        }
        Err(Diagnostic::preprocess(
            pos.clone(),
            format!(
                "macro expansion did not settle after {} passes (recursive macro?)",
                self.expansion_limit
            ),
        ))
    }

    fn expand_once(&self, line: &str) -> String {
        let mut result = String::with_capacity(line.len());
        let mut rest = line;

        while !rest.is_empty() {
            match leading_identifier(rest) {
                Some(word) => {
                    match self.macros.get(word) {
                        Some(body) => result.push_str(body),
                        None => result.push_str(word),
                    }
                    rest = &rest[word.len()..];
                }
                None => {
                    let c = rest.chars().next().unwrap_or('\0');
                    result.push(c);
                    rest = &rest[c.len_utf8()..];
                }
            }
        }
        result
    }
}

/// Parse `"path"` or `<path>` after `#include`.
fn parse_include_spec(rest: &str) -> Option<String> {
    let rest = rest.trim();
    let (open, close) = match rest.chars().next()? {
        '"' => ('"', '"'),
        '<' => ('<', '>'),
        _ => return None,
    };
    let inner = rest.strip_prefix(open)?;
    let end = inner.find(close)?;
    let spec = &inner[..end];
    let trailing = inner[end + 1..].trim();
    if spec.is_empty() || !trailing.is_empty() {
        return None;
    }
    Some(spec.to_string())
}

/// The identifier prefix of `text`, if it starts with one.
fn leading_identifier(text: &str) -> Option<&str> {
    let mut end = 0;
    for (i, c) in text.char_indices() {
        let valid = if i == 0 {
            c.is_ascii_alphabetic() || c == '_'
        } else {
            c.is_ascii_alphanumeric() || c == '_'
        };
        if !valid {
            break;
        }
        end = i + c.len_utf8();
    }
    (end > 0).then(|| &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    fn preprocess(path: &Path) -> Result<Vec<String>, Diagnostic> {
        let mut pp = Preprocessor::new(64);
        let result = pp.run(path)?;
        Ok(result.lines.into_iter().map(|l| l.text).collect())
    }

    #[test]
    fn test_plain_source_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let main = write_file(dir.path(), "main.sc", "function main() {\n return 0; \n}\n");

        let lines = preprocess(&main).unwrap();
        assert_eq!(lines, vec!["function main() {", " return 0; ", "}"]);
    }

    #[test]
    fn test_define_and_expand() {
        let dir = tempfile::tempdir().unwrap();
        let main = write_file(
            dir.path(),
            "main.sc",
            "#define LIMIT 10\nfunction main() { return LIMIT; }\n",
        );

        let lines = preprocess(&main).unwrap();
        assert_eq!(lines, vec!["function main() { return 10; }"]);
    }

    #[test]
    fn test_expansion_respects_identifier_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let main = write_file(
            dir.path(),
            "main.sc",
            "#define X 1\nreturn X + XY + _X + X2;\n",
        );

        let lines = preprocess(&main).unwrap();
        assert_eq!(lines, vec!["return 1 + XY + _X + X2;"]);
    }

    #[test]
    fn test_empty_define_and_undef() {
        let dir = tempfile::tempdir().unwrap();
        let main = write_file(
            dir.path(),
            "main.sc",
            "#define DEBUG\nDEBUG uint32 x;\n#undef DEBUG\nDEBUG uint32 y;\n",
        );

        let lines = preprocess(&main).unwrap();
        assert_eq!(lines, vec![" uint32 x;", "DEBUG uint32 y;"]);
    }

    #[test]
    fn test_undef_unknown_name_is_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let main = write_file(dir.path(), "main.sc", "#undef NEVER_DEFINED\nuint32 x;\n");

        let lines = preprocess(&main).unwrap();
        assert_eq!(lines, vec!["uint32 x;"]);
    }

    #[test]
    fn test_macro_body_references_other_macro() {
        let dir = tempfile::tempdir().unwrap();
        let main = write_file(
            dir.path(),
            "main.sc",
            "#define A B\n#define B 7\nreturn A;\n",
        );

        let lines = preprocess(&main).unwrap();
        assert_eq!(lines, vec!["return 7;"]);
    }

    #[test]
    fn test_mutually_recursive_macros_hit_cap() {
        let dir = tempfile::tempdir().unwrap();
        let main = write_file(
            dir.path(),
            "main.sc",
            "#define X Y\n#define Y X\nreturn X;\n",
        );

        let err = preprocess(&main).unwrap_err();
        assert_eq!(err.kind, volt_core::DiagKind::Preprocess);
        assert!(err.message.contains("recursive macro"));
        assert_eq!(err.pos.line, 3);
    }

    #[test]
    fn test_include_relative_to_including_file() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "lib.sc", "uint32 shared;\n");
        let main = write_file(
            dir.path(),
            "main.sc",
            "#include \"lib.sc\"\nfunction main() { return 0; }\n",
        );

        let lines = preprocess(&main).unwrap();
        assert_eq!(
            lines,
            vec!["uint32 shared;", "function main() { return 0; }"]
        );
    }

    #[test]
    fn test_include_defines_are_global() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "defs.sc", "#define WIDTH 32\n");
        let main = write_file(dir.path(), "main.sc", "#include <defs.sc>\nreturn WIDTH;\n");

        let lines = preprocess(&main).unwrap();
        assert_eq!(lines, vec!["return 32;"]);
    }

    #[test]
    fn test_missing_include_is_diagnosed() {
        let dir = tempfile::tempdir().unwrap();
        let main = write_file(dir.path(), "main.sc", "#include \"nope.sc\"\n");

        let err = preprocess(&main).unwrap_err();
        assert!(err.message.contains("nope.sc"));
        assert_eq!(err.pos.line, 1);
    }

    #[test]
    fn test_include_cycle_names_both_files() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a.sc", "#include \"b.sc\"\n");
        write_file(dir.path(), "b.sc", "#include \"a.sc\"\n");
        let main = write_file(dir.path(), "main.sc", "#include \"a.sc\"\n");

        let err = preprocess(&main).unwrap_err();
        assert!(err.message.contains("circular include"));
        assert!(err.message.contains("a.sc"));
        assert!(err.message.contains("b.sc"));
    }

    #[test]
    fn test_line_map_tracks_original_positions() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "lib.sc", "uint32 a;\nuint32 b;\n");
        let main = write_file(dir.path(), "main.sc", "#include \"lib.sc\"\nuint32 c;\n");

        let mut pp = Preprocessor::new(64);
        let result = pp.run(&main).unwrap();

        assert_eq!(result.lines.len(), 3);
        assert!(result.lines[0].file.ends_with("lib.sc"));
        assert_eq!(result.lines[0].line, 1);
        assert!(result.lines[1].file.ends_with("lib.sc"));
        assert_eq!(result.lines[1].line, 2);
        assert!(result.lines[2].file.ends_with("main.sc"));
        assert_eq!(result.lines[2].line, 2);
    }

    #[test]
    fn test_malformed_directive() {
        let dir = tempfile::tempdir().unwrap();
        let main = write_file(dir.path(), "main.sc", "#include lib.sc\n");

        let err = preprocess(&main).unwrap_err();
        assert!(err.message.contains("malformed #include"));
    }
}

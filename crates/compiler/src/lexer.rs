//! Lexer
//!
//! Turns preprocessed text into a positioned token stream. Works line by line
//! over the preprocessor's output so every token carries the file and line it
//! originally came from; columns are 1-based offsets into that line.
//!
//! Operator recognition is maximal munch: three-character operators win over
//! two-character ones, which win over their one-character prefixes. Block
//! comments may span lines; an unterminated one is an error at its opening
//! position.

use crate::preprocessor::PreprocessedSource;
use tracing::debug;
use volt_core::{Diagnostic, SourcePos, Token, TokenKind};

pub struct Lexer<'a> {
    source: &'a PreprocessedSource,
    /// Index into `source.lines`
    line_idx: usize,
    /// Char offset into the current line
    col_idx: usize,
    chars: Vec<char>,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a PreprocessedSource) -> Self {
        let chars = source
            .lines
            .first()
            .map(|l| l.text.chars().collect())
            .unwrap_or_default();
        Lexer {
            source,
            line_idx: 0,
            col_idx: 0,
            chars,
            tokens: Vec::new(),
        }
    }

    /// Tokenize the whole input. The result always ends with an `Eof` token.
    pub fn tokenize(mut self) -> Result<Vec<Token>, Diagnostic> {
        debug!(lines = self.source.lines.len(), "lexing");
        while !self.at_end() {
            self.skip_whitespace_and_comments()?;
            if self.at_end() {
                break;
            }
            let token = self.next_token()?;
            let was_asm = token.kind == TokenKind::Asm;
            self.tokens.push(token);
            if was_asm {
                // The payload of an asm block is opaque text for the
                // assembler, not tokens of this language.
                let block = self.lex_asm_block()?;
                self.tokens.push(block);
            }
        }

        let eof_pos = self
            .source
            .lines
            .last()
            .map(|l| SourcePos::new(l.file.clone(), l.line, l.text.chars().count() as u32 + 1))
            .unwrap_or_else(|| SourcePos::new("<empty>", 1, 1));
        self.tokens.push(Token::new(TokenKind::Eof, eof_pos));
        Ok(self.tokens)
    }

    fn at_end(&self) -> bool {
        self.line_idx >= self.source.lines.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.col_idx).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.col_idx + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.col_idx += 1;
        Some(c)
    }

    /// Advance to the next line of the preprocessed source.
    fn next_line(&mut self) {
        self.line_idx += 1;
        self.col_idx = 0;
        self.chars = self
            .source
            .lines
            .get(self.line_idx)
            .map(|l| l.text.chars().collect())
            .unwrap_or_default();
    }

    /// Position of the character at the current offset.
    fn pos(&self) -> SourcePos {
        match self.source.lines.get(self.line_idx) {
            Some(line) => SourcePos::new(line.file.clone(), line.line, self.col_idx as u32 + 1),
            None => SourcePos::new("<eof>", 0, 0),
        }
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), Diagnostic> {
        loop {
            match self.peek() {
                None => {
                    if self.at_end() {
                        return Ok(());
                    }
                    self.next_line();
                    if self.at_end() {
                        return Ok(());
                    }
                }
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    // Line comment: discard the rest of the line
                    self.next_line();
                    if self.at_end() {
                        return Ok(());
                    }
                }
                Some('/') if self.peek_at(1) == Some('*') => {
                    self.skip_block_comment()?;
                }
                _ => return Ok(()),
            }
        }
    }

    /// Skip `/* ... */`. Nesting is not supported; the first `*/` closes.
    fn skip_block_comment(&mut self) -> Result<(), Diagnostic> {
        let open_pos = self.pos();
        self.bump();
        self.bump();

        loop {
            match self.peek() {
                Some('*') if self.peek_at(1) == Some('/') => {
                    self.bump();
                    self.bump();
                    return Ok(());
                }
                Some(_) => {
                    self.bump();
                }
                None => {
                    self.next_line();
                    if self.at_end() {
                        return Err(Diagnostic::lex(open_pos, "unterminated block comment"));
                    }
                }
            }
        }
    }

    /// Capture `{ raw text }` following the `asm` keyword. The text is kept
    /// verbatim (newlines preserved) up to the first closing brace.
    fn lex_asm_block(&mut self) -> Result<Token, Diagnostic> {
        self.skip_whitespace_and_comments()?;
        let open_pos = self.pos();
        if self.peek() != Some('{') {
            return Err(Diagnostic::lex(open_pos, "expected '{' after 'asm'"));
        }
        self.bump();

        let mut text = String::new();
        loop {
            match self.peek() {
                Some('}') => {
                    self.bump();
                    return Ok(Token::new(TokenKind::AsmText(text), open_pos));
                }
                Some(c) => {
                    text.push(c);
                    self.bump();
                }
                None => {
                    self.next_line();
                    if self.at_end() {
                        return Err(Diagnostic::lex(open_pos, "unterminated asm block"));
                    }
                    text.push('\n');
                }
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, Diagnostic> {
        let pos = self.pos();
        let c = match self.peek() {
            Some(c) => c,
            None => return Ok(Token::new(TokenKind::Eof, pos)),
        };

        if c.is_ascii_digit() {
            return self.lex_number(pos);
        }
        if c.is_ascii_alphabetic() || c == '_' {
            return Ok(self.lex_word(pos));
        }
        self.lex_operator(pos)
    }

    fn lex_number(&mut self, pos: SourcePos) -> Result<Token, Diagnostic> {
        let mut text = String::new();
        let hex = self.peek() == Some('0')
            && matches!(self.peek_at(1), Some('x') | Some('X'));

        if hex {
            self.bump();
            self.bump();
            while let Some(c) = self.peek() {
                if c.is_ascii_hexdigit() {
                    text.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
            if text.is_empty() {
                return Err(Diagnostic::lex(pos, "hex literal with no digits"));
            }
            if let Some(c) = self.peek() {
                if c.is_ascii_alphabetic() || c == '_' {
                    return Err(Diagnostic::lex(
                        pos,
                        format!("malformed integer literal '0x{text}{c}...'"),
                    ));
                }
            }
            let value = u32::from_str_radix(&text, 16).map_err(|_| {
                Diagnostic::lex(
                    pos.clone(),
                    format!("integer literal 0x{text} does not fit in 32 bits"),
                )
            })?;
            return Ok(Token::new(TokenKind::Int(value), pos));
        }

        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
        // A trailing identifier character makes the literal malformed
        // rather than two adjacent tokens.
        if let Some(c) = self.peek() {
            if c.is_ascii_alphabetic() || c == '_' {
                return Err(Diagnostic::lex(
                    pos,
                    format!("malformed integer literal '{text}{c}...'"),
                ));
            }
        }
        let value = text.parse::<u32>().map_err(|_| {
            Diagnostic::lex(
                pos.clone(),
                format!("integer literal {text} does not fit in 32 bits"),
            )
        })?;
        Ok(Token::new(TokenKind::Int(value), pos))
    }

    fn lex_word(&mut self, pos: SourcePos) -> Token {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
        let kind = TokenKind::keyword(&text).unwrap_or(TokenKind::Ident(text));
        Token::new(kind, pos)
    }

    fn lex_operator(&mut self, pos: SourcePos) -> Result<Token, Diagnostic> {
        let c0 = self.peek().unwrap_or('\0');
        let c1 = self.peek_at(1);
        let c2 = self.peek_at(2);

        // Three-character operators first
        if let (Some(b), Some(t)) = (c1, c2) {
            let kind = match (c0, b, t) {
                ('<', '<', '=') => Some(TokenKind::ShlEq),
                ('>', '>', '=') => Some(TokenKind::ShrEq),
                _ => None,
            };
            if let Some(kind) = kind {
                self.bump();
                self.bump();
                self.bump();
                return Ok(Token::new(kind, pos));
            }
        }

        // Then two-character operators
        if let Some(b) = c1 {
            let kind = match (c0, b) {
                ('=', '=') => Some(TokenKind::EqEq),
                ('!', '=') => Some(TokenKind::NotEq),
                ('<', '=') => Some(TokenKind::Le),
                ('>', '=') => Some(TokenKind::Ge),
                ('&', '&') => Some(TokenKind::AndAnd),
                ('|', '|') => Some(TokenKind::OrOr),
                ('<', '<') => Some(TokenKind::Shl),
                ('>', '>') => Some(TokenKind::Shr),
                ('+', '+') => Some(TokenKind::PlusPlus),
                ('-', '-') => Some(TokenKind::MinusMinus),
                ('+', '=') => Some(TokenKind::PlusEq),
                ('-', '=') => Some(TokenKind::MinusEq),
                ('*', '=') => Some(TokenKind::StarEq),
                ('/', '=') => Some(TokenKind::SlashEq),
                ('%', '=') => Some(TokenKind::PercentEq),
                ('&', '=') => Some(TokenKind::AmpEq),
                ('|', '=') => Some(TokenKind::PipeEq),
                ('^', '=') => Some(TokenKind::CaretEq),
                _ => None,
            };
            if let Some(kind) = kind {
                self.bump();
                self.bump();
                return Ok(Token::new(kind, pos));
            }
        }

        let kind = match c0 {
            ';' => TokenKind::Semi,
            ',' => TokenKind::Comma,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '.' => TokenKind::Dot,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '&' => TokenKind::Amp,
            '|' => TokenKind::Pipe,
            '^' => TokenKind::Caret,
            '~' => TokenKind::Tilde,
            '!' => TokenKind::Bang,
            '<' => TokenKind::Lt,
            '>' => TokenKind::Gt,
            '=' => TokenKind::Assign,
            other => {
                return Err(Diagnostic::lex(
                    pos,
                    format!("unexpected character '{other}'"),
                ));
            }
        };
        self.bump();
        Ok(Token::new(kind, pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocessor::SourceLine;

    fn source(text: &str) -> PreprocessedSource {
        let lines = text
            .lines()
            .enumerate()
            .map(|(i, l)| SourceLine {
                text: l.to_string(),
                file: "test.sc".to_string(),
                line: i as u32 + 1,
            })
            .collect();
        PreprocessedSource { lines }
    }

    fn kinds(text: &str) -> Vec<TokenKind> {
        Lexer::new(&source(text))
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_keywords_and_identifiers() {
        assert_eq!(
            kinds("uint32 count"),
            vec![
                TokenKind::Uint32,
                TokenKind::Ident("count".into()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_decimal_and_hex_literals() {
        assert_eq!(
            kinds("42 0xFF 0X10 0xffffffff"),
            vec![
                TokenKind::Int(42),
                TokenKind::Int(255),
                TokenKind::Int(16),
                TokenKind::Int(0xFFFF_FFFF),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_out_of_range_literal() {
        let err = Lexer::new(&source("4294967296")).tokenize().unwrap_err();
        assert!(err.message.contains("32 bits"));
    }

    #[test]
    fn test_maximal_munch() {
        assert_eq!(
            kinds("a<<=b << c < d"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::ShlEq,
                TokenKind::Ident("b".into()),
                TokenKind::Shl,
                TokenKind::Ident("c".into()),
                TokenKind::Lt,
                TokenKind::Ident("d".into()),
                TokenKind::Eof
            ]
        );
        assert_eq!(
            kinds("i++ +1"),
            vec![
                TokenKind::Ident("i".into()),
                TokenKind::PlusPlus,
                TokenKind::Plus,
                TokenKind::Int(1),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_comments() {
        assert_eq!(
            kinds("a // trailing\nb /* inline */ c"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Ident("b".into()),
                TokenKind::Ident("c".into()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_multiline_block_comment() {
        assert_eq!(
            kinds("a /* one\ntwo\nthree */ b"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Ident("b".into()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_unterminated_block_comment() {
        let err = Lexer::new(&source("a /* never closed")).tokenize().unwrap_err();
        assert!(err.message.contains("unterminated"));
        assert_eq!(err.pos.column, 3);
    }

    #[test]
    fn test_stray_character() {
        let err = Lexer::new(&source("uint32 a @ b")).tokenize().unwrap_err();
        assert!(err.message.contains('@'));
        assert_eq!(err.pos.column, 10);
    }

    #[test]
    fn test_positions_follow_line_map() {
        let mut src = source("x");
        src.lines[0].file = "lib.sc".to_string();
        src.lines[0].line = 40;
        let tokens = Lexer::new(&src).tokenize().unwrap();
        assert_eq!(tokens[0].pos.file, "lib.sc");
        assert_eq!(tokens[0].pos.line, 40);
        assert_eq!(tokens[0].pos.column, 1);
    }

    #[test]
    fn test_asm_block_is_opaque() {
        let tokens = Lexer::new(&source("asm { mov r0, 5 @weird }; x"))
            .tokenize()
            .unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Asm);
        assert_eq!(tokens[1].kind, TokenKind::AsmText(" mov r0, 5 @weird ".into()));
        assert_eq!(tokens[2].kind, TokenKind::Semi);
        assert_eq!(tokens[3].kind, TokenKind::Ident("x".into()));
    }

    #[test]
    fn test_unterminated_asm_block() {
        let err = Lexer::new(&source("asm { mov r0, 5")).tokenize().unwrap_err();
        assert!(err.message.contains("unterminated asm block"));
    }

    #[test]
    fn test_malformed_number() {
        let err = Lexer::new(&source("12ab")).tokenize().unwrap_err();
        assert!(err.message.contains("malformed integer"));
    }
}

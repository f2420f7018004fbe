use unitscript_common::{CompileError, Span};

use crate::token::{Token, TokenKind};

/// Tabs expand to the next multiple of this width when measuring
/// indentation (§9 open question: tabs are accepted, not rejected).
pub const TAB_WIDTH: u32 = 8;

/// Indentation-aware lexer. Maintains an indent stack initialized to `[0]`
/// and emits INDENT/DEDENT tokens at logical line boundaries per §4.1.
struct Lexer<'src> {
    src: &'src [u8],
    pos: usize,
    line: u32,
    col: u32,
    at_line_start: bool,
    indent_stack: Vec<u32>,
    tokens: Vec<Token>,
}

impl<'src> Lexer<'src> {
    fn new(source: &'src str) -> Self {
        Self {
            src: source.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
            at_line_start: true,
            indent_stack: vec![0],
            tokens: Vec::new(),
        }
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> u8 {
        if self.is_at_end() {
            0
        } else {
            self.src[self.pos]
        }
    }

    fn peek_next(&self) -> u8 {
        if self.pos + 1 >= self.src.len() {
            0
        } else {
            self.src[self.pos + 1]
        }
    }

    fn advance(&mut self) -> u8 {
        let c = self.src[self.pos];
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        c
    }

    fn push(&mut self, kind: TokenKind, line: u32, col: u32) {
        self.tokens.push(Token::new(kind, Span::new(line, col)));
    }

    fn push_here(&mut self, kind: TokenKind) {
        let (line, col) = (self.line, self.col);
        self.push(kind, line, col);
    }

    fn run(mut self) -> Result<Vec<Token>, CompileError> {
        while !self.is_at_end() {
            if self.at_line_start && self.handle_line_start()? {
                continue;
            }
            self.skip_inline_whitespace();
            if self.is_at_end() {
                break;
            }
            match self.peek() {
                b'\n' => {
                    self.push_here(TokenKind::Newline);
                    self.advance();
                    self.at_line_start = true;
                }
                b'#' => {
                    while !self.is_at_end() && self.peek() != b'\n' {
                        self.advance();
                    }
                }
                _ => self.lex_token()?,
            }
        }

        while self.indent_stack.len() > 1 {
            self.indent_stack.pop();
            self.push_here(TokenKind::Dedent);
        }
        self.push_here(TokenKind::Newline);
        self.push_here(TokenKind::Eof);
        Ok(self.tokens)
    }

    /// Handles indentation measurement at the start of a logical line.
    /// Returns `true` if the line was blank or comment-only (fully
    /// consumed, no tokens emitted, indentation stack untouched).
    fn handle_line_start(&mut self) -> Result<bool, CompileError> {
        let width = self.measure_indent();

        if self.is_at_end() {
            return Ok(true);
        }

        match self.peek() {
            b'\n' => {
                self.advance();
                Ok(true)
            }
            b'#' => {
                while !self.is_at_end() && self.peek() != b'\n' {
                    self.advance();
                }
                if !self.is_at_end() {
                    self.advance();
                }
                Ok(true)
            }
            _ => {
                let top = *self.indent_stack.last().unwrap();
                if width > top {
                    self.indent_stack.push(width);
                    self.push_here(TokenKind::Indent);
                } else if width < top {
                    while *self.indent_stack.last().unwrap() > width {
                        self.indent_stack.pop();
                        self.push_here(TokenKind::Dedent);
                    }
                    if *self.indent_stack.last().unwrap() != width {
                        return Err(CompileError::syntax(
                            "inconsistent dedent",
                            self.line,
                            self.col,
                        ));
                    }
                }
                self.at_line_start = false;
                Ok(false)
            }
        }
    }

    fn measure_indent(&mut self) -> u32 {
        let mut width = 0u32;
        while !self.is_at_end() {
            match self.peek() {
                b' ' => {
                    width += 1;
                    self.advance();
                }
                b'\t' => {
                    width = (width / TAB_WIDTH + 1) * TAB_WIDTH;
                    self.advance();
                }
                b'\r' => {
                    self.advance();
                }
                _ => break,
            }
        }
        width
    }

    fn skip_inline_whitespace(&mut self) {
        while !self.is_at_end() {
            match self.peek() {
                b' ' | b'\t' | b'\r' => {
                    self.advance();
                }
                _ => break,
            }
        }
    }

    fn lex_token(&mut self) -> Result<(), CompileError> {
        let (line, col) = (self.line, self.col);
        match self.peek() {
            b'0'..=b'9' => self.lex_number(line, col),
            b'"' | b'\'' => self.lex_string(line, col),
            c if c == b'_' || c.is_ascii_alphabetic() => {
                self.lex_identifier(line, col);
                Ok(())
            }
            _ => self.lex_operator(line, col),
        }
    }

    fn lex_number(&mut self, line: u32, col: u32) -> Result<(), CompileError> {
        let start = self.pos;
        while !self.is_at_end() && self.peek().is_ascii_digit() {
            self.advance();
        }
        if !self.is_at_end() && self.peek() == b'.' && self.peek_next().is_ascii_digit() {
            self.advance();
            while !self.is_at_end() && self.peek().is_ascii_digit() {
                self.advance();
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
        let value: f64 = text
            .parse()
            .map_err(|_| CompileError::syntax(format!("invalid number '{}'", text), line, col))?;
        self.push(TokenKind::Number(value), line, col);
        Ok(())
    }

    fn lex_identifier(&mut self, line: u32, col: u32) {
        let start = self.pos;
        while !self.is_at_end() && (self.peek().is_ascii_alphanumeric() || self.peek() == b'_') {
            self.advance();
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
        let kind = TokenKind::keyword(text).unwrap_or_else(|| TokenKind::Name(text.to_string()));
        self.push(kind, line, col);
    }

    fn lex_string(&mut self, line: u32, col: u32) -> Result<(), CompileError> {
        let quote = self.advance();
        let mut s = String::new();
        loop {
            if self.is_at_end() || self.peek() == b'\n' {
                return Err(CompileError::syntax("unterminated string literal", line, col));
            }
            let c = self.advance();
            if c == quote {
                break;
            }
            if c == b'\\' {
                if self.is_at_end() {
                    return Err(CompileError::syntax("unterminated string literal", line, col));
                }
                let esc = self.advance();
                let escaped = match esc {
                    b'n' => '\n',
                    b't' => '\t',
                    b'\\' => '\\',
                    b'"' => '"',
                    b'\'' => '\'',
                    other => {
                        return Err(CompileError::syntax(
                            format!("invalid escape sequence '\\{}'", other as char),
                            line,
                            col,
                        ));
                    }
                };
                s.push(escaped);
            } else {
                s.push(c as char);
            }
        }
        self.push(TokenKind::Str(s), line, col);
        Ok(())
    }

    fn lex_operator(&mut self, line: u32, col: u32) -> Result<(), CompileError> {
        let c = self.advance();
        let kind = match c {
            b'*' => {
                if self.peek() == b'*' {
                    self.advance();
                    TokenKind::StarStar
                } else if self.peek() == b'=' {
                    self.advance();
                    TokenKind::StarEq
                } else {
                    TokenKind::Star
                }
            }
            b'/' => {
                if self.peek() == b'/' {
                    self.advance();
                    TokenKind::SlashSlash
                } else if self.peek() == b'=' {
                    self.advance();
                    TokenKind::SlashEq
                } else {
                    TokenKind::Slash
                }
            }
            b'+' => {
                if self.peek() == b'=' {
                    self.advance();
                    TokenKind::PlusEq
                } else {
                    TokenKind::Plus
                }
            }
            b'-' => {
                if self.peek() == b'=' {
                    self.advance();
                    TokenKind::MinusEq
                } else {
                    TokenKind::Minus
                }
            }
            b'=' => {
                if self.peek() == b'=' {
                    self.advance();
                    TokenKind::EqEq
                } else {
                    TokenKind::Eq
                }
            }
            b'!' => {
                if self.peek() == b'=' {
                    self.advance();
                    TokenKind::NotEq
                } else {
                    return Err(CompileError::syntax("unexpected character '!'", line, col));
                }
            }
            b'<' => {
                if self.peek() == b'=' {
                    self.advance();
                    TokenKind::Le
                } else {
                    TokenKind::Lt
                }
            }
            b'>' => {
                if self.peek() == b'=' {
                    self.advance();
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }
            b'%' => TokenKind::Percent,
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'[' => TokenKind::LBracket,
            b']' => TokenKind::RBracket,
            b',' => TokenKind::Comma,
            b':' => TokenKind::Colon,
            b'.' => TokenKind::Dot,
            other => {
                return Err(CompileError::syntax(
                    format!("unexpected character '{}'", other as char),
                    line,
                    col,
                ));
            }
        };
        self.push(kind, line, col);
        Ok(())
    }
}

/// Tokenize `source`, or fail with a `SyntaxError`-kind `CompileError`.
pub fn tokenize(source: &str) -> Result<Vec<Token>, CompileError> {
    Lexer::new(source).run()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_number_and_name() {
        assert_eq!(
            kinds("x = 1.5"),
            vec![
                TokenKind::Name("x".into()),
                TokenKind::Eq,
                TokenKind::Number(1.5),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_keywords_get_distinct_kinds() {
        assert_eq!(
            kinds("if True: return"),
            vec![
                TokenKind::If,
                TokenKind::True,
                TokenKind::Colon,
                TokenKind::Return,
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_multi_char_operators_lexed_greedily() {
        assert_eq!(
            kinds("a ** b // c == d != e <= f >= g += h"),
            vec![
                TokenKind::Name("a".into()),
                TokenKind::StarStar,
                TokenKind::Name("b".into()),
                TokenKind::SlashSlash,
                TokenKind::Name("c".into()),
                TokenKind::EqEq,
                TokenKind::Name("d".into()),
                TokenKind::NotEq,
                TokenKind::Name("e".into()),
                TokenKind::Le,
                TokenKind::Name("f".into()),
                TokenKind::Ge,
                TokenKind::Name("g".into()),
                TokenKind::PlusEq,
                TokenKind::Name("h".into()),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        let toks = tokenize(r#"x = "a\nb\tc\\d\"e""#).unwrap();
        assert_eq!(toks[2].kind, TokenKind::Str("a\nb\tc\\d\"e".to_string()));
    }

    #[test]
    fn test_comment_skipped() {
        assert_eq!(
            kinds("# comment\nx = 1"),
            vec![
                TokenKind::Name("x".into()),
                TokenKind::Eq,
                TokenKind::Number(1.0),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_comment_on_first_line_does_not_shift_line_numbers() {
        let toks = tokenize("# comment\nx = 1").unwrap();
        let x = toks
            .iter()
            .find(|t| t.kind == TokenKind::Name("x".into()))
            .unwrap();
        assert_eq!(x.span.line, 2);
    }

    #[test]
    fn test_indent_dedent_sequence() {
        let source = "if True:\n    x = 1\n    y = 2\nz = 3\n";
        assert_eq!(
            kinds(source),
            vec![
                TokenKind::If,
                TokenKind::True,
                TokenKind::Colon,
                TokenKind::Newline,
                TokenKind::Indent,
                TokenKind::Name("x".into()),
                TokenKind::Eq,
                TokenKind::Number(1.0),
                TokenKind::Newline,
                TokenKind::Name("y".into()),
                TokenKind::Eq,
                TokenKind::Number(2.0),
                TokenKind::Newline,
                TokenKind::Dedent,
                TokenKind::Name("z".into()),
                TokenKind::Eq,
                TokenKind::Number(3.0),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_blank_lines_do_not_affect_indentation() {
        let source = "if True:\n    x = 1\n\n    y = 2\n";
        assert_eq!(
            kinds(source),
            vec![
                TokenKind::If,
                TokenKind::True,
                TokenKind::Colon,
                TokenKind::Newline,
                TokenKind::Indent,
                TokenKind::Name("x".into()),
                TokenKind::Eq,
                TokenKind::Number(1.0),
                TokenKind::Newline,
                TokenKind::Name("y".into()),
                TokenKind::Eq,
                TokenKind::Number(2.0),
                TokenKind::Newline,
                TokenKind::Dedent,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_mismatched_dedent_is_syntax_error() {
        let source = "if True:\n        x = 1\n    y = 2\n";
        let err = tokenize(source).unwrap_err();
        assert!(matches!(
            err.kind,
            unitscript_common::CompileErrorKind::Syntax(_)
        ));
    }

    #[test]
    fn test_tabs_expand_to_next_multiple_of_eight() {
        let source = "if True:\n\tx = 1\n";
        let toks = tokenize(source).unwrap();
        assert!(toks.iter().any(|t| t.kind == TokenKind::Indent));
    }

    #[test]
    fn test_line_tracking_matches_first_character() {
        let toks = tokenize("a = 1\nb = 2\n").unwrap();
        let b = toks
            .iter()
            .find(|t| t.kind == TokenKind::Name("b".into()))
            .unwrap();
        assert_eq!(b.span.line, 2);
    }
}

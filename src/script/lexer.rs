//! Lexer
//!
//! Turns script source into tokens. Indentation becomes explicit `Indent`/`Dedent`
//! tokens; newlines inside brackets are joined.

use super::error::{ScriptError, ScriptResult};

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    /// Body of an f-string, escapes already processed
    FStr(String),
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
    pub column: usize,
}

const OPERATORS: &[&str] = &[
    "**=", "//=", "**", "//", "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=", "%=", "->", "+", "-",
    "*", "/", "%", "<", ">", "=", "(", ")", "[", "]", "{", "}", ",", ":", ".", "&", "|", "~", ";",
];

pub fn tokenize(source: &str) -> ScriptResult<Vec<Token>> {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    tokens: Vec<Token>,
    indents: Vec<usize>,
    /// Open bracket depth
    depth: usize,
    at_line_start: bool,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            tokens: Vec::new(),
            indents: vec![0],
            depth: 0,
            at_line_start: true,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn push(&mut self, tok: Tok, line: usize, column: usize) {
        self.tokens.push(Token { tok, line, column });
    }

    fn last_is_newline(&self) -> bool {
        matches!(
            self.tokens.last().map(|t| &t.tok),
            None | Some(Tok::Newline) | Some(Tok::Indent) | Some(Tok::Dedent)
        )
    }

    fn run(mut self) -> ScriptResult<Vec<Token>> {
        loop {
            if self.at_line_start && self.depth == 0 {
                if !self.handle_indentation()? {
                    continue;
                }
            }

            let c = match self.peek() {
                Some(c) => c,
                None => break,
            };
            let (line, column) = (self.line, self.column);

            match c {
                ' ' | '\t' | '\r' | '\x0c' => {
                    self.bump();
                }
                '\n' => {
                    self.bump();
                    if self.depth == 0 {
                        if !self.last_is_newline() {
                            self.push(Tok::Newline, line, column);
                        }
                        self.at_line_start = true;
                    }
                }
                '#' => self.skip_comment(),
                '\\' if self.peek_at(1) == Some('\n') => {
                    self.bump();
                    self.bump();
                }
                '\\' if self.peek_at(1) == Some('\r') && self.peek_at(2) == Some('\n') => {
                    self.bump();
                    self.bump();
                    self.bump();
                }
                '0'..='9' => self.lex_number(line, column)?,
                '.' if matches!(self.peek_at(1), Some('0'..='9')) => self.lex_number(line, column)?,
                '"' | '\'' => {
                    let body = self.lex_string(false, line)?;
                    self.push(Tok::Str(body), line, column);
                }
                c if c.is_alphabetic() || c == '_' => self.lex_name(line, column)?,
                _ => self.lex_operator(line, column)?,
            }
        }

        if !self.last_is_newline() {
            let (line, column) = (self.line, self.column);
            self.push(Tok::Newline, line, column);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            let (line, column) = (self.line, self.column);
            self.push(Tok::Dedent, line, column);
        }
        let (line, column) = (self.line, self.column);
        self.push(Tok::Eof, line, column);
        Ok(self.tokens)
    }

    /// Returns false when the line was blank and has been consumed
    fn handle_indentation(&mut self) -> ScriptResult<bool> {
        let mut width = 0;
        while let Some(c) = self.peek() {
            match c {
                ' ' => width += 1,
                '\t' => width = (width / 8 + 1) * 8,
                '\x0c' => width = 0,
                _ => break,
            }
            self.bump();
        }

        match self.peek() {
            None => {
                self.at_line_start = false;
                return Ok(true);
            }
            Some('\n') => {
                self.bump();
                return Ok(false);
            }
            Some('\r') if self.peek_at(1) == Some('\n') => {
                self.bump();
                self.bump();
                return Ok(false);
            }
            Some('#') => {
                self.skip_comment();
                if self.peek() == Some('\n') {
                    self.bump();
                }
                return Ok(false);
            }
            _ => {}
        }

        self.at_line_start = false;
        let current = self.indents.last().copied().unwrap_or(0);
        let (line, column) = (self.line, self.column);
        if width > current {
            self.indents.push(width);
            self.push(Tok::Indent, line, column);
        } else if width < current {
            while self.indents.last().copied().unwrap_or(0) > width {
                self.indents.pop();
                self.push(Tok::Dedent, line, column);
            }
            if self.indents.last().copied().unwrap_or(0) != width {
                return Err(ScriptError::syntax(
                    "unindent does not match any outer indentation level",
                    line,
                ));
            }
        }
        Ok(true)
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn lex_number(&mut self, line: usize, column: usize) -> ScriptResult<()> {
        let mut text = String::new();
        let mut is_float = false;

        while let Some(c) = self.peek() {
            match c {
                '0'..='9' => text.push(c),
                '_' => {}
                '.' if !is_float && !matches!(self.peek_at(1), Some(c) if c.is_alphabetic() || c == '_') => {
                    is_float = true;
                    text.push(c);
                }
                'e' | 'E' if matches!(self.peek_at(1), Some('0'..='9' | '+' | '-')) => {
                    is_float = true;
                    text.push(c);
                    self.bump();
                    if let Some(sign @ ('+' | '-')) = self.peek() {
                        text.push(sign);
                        self.bump();
                    }
                    continue;
                }
                _ => break,
            }
            self.bump();
        }

        let tok = if is_float {
            text.parse::<f64>()
                .map(Tok::Float)
                .map_err(|_| ScriptError::syntax(format!("invalid number literal '{}'", text), line))?
        } else {
            match text.parse::<i64>() {
                Ok(v) => Tok::Int(v),
                Err(_) => text
                    .parse::<f64>()
                    .map(Tok::Float)
                    .map_err(|_| ScriptError::syntax(format!("invalid number literal '{}'", text), line))?,
            }
        };
        self.push(tok, line, column);
        Ok(())
    }

    fn lex_name(&mut self, line: usize, column: usize) -> ScriptResult<()> {
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                name.push(c);
                self.bump();
            } else {
                break;
            }
        }

        if matches!(self.peek(), Some('"' | '\'')) {
            let prefix = name.to_lowercase();
            let raw = prefix.contains('r');
            let formatted = prefix.contains('f');
            if !prefix.is_empty() && prefix.chars().all(|c| matches!(c, 'r' | 'f' | 'b' | 'u')) {
                let body = self.lex_string(raw, line)?;
                let tok = if formatted { Tok::FStr(body) } else { Tok::Str(body) };
                self.push(tok, line, column);
                return Ok(());
            }
        }

        self.push(Tok::Name(name), line, column);
        Ok(())
    }

    fn lex_string(&mut self, raw: bool, line: usize) -> ScriptResult<String> {
        let quote = match self.bump() {
            Some(q) => q,
            None => return Err(ScriptError::syntax("unexpected end of input", line)),
        };
        let triple = self.peek() == Some(quote) && self.peek_at(1) == Some(quote);
        if triple {
            self.bump();
            self.bump();
        }

        let mut body = String::new();
        loop {
            let c = match self.bump() {
                Some(c) => c,
                None => return Err(ScriptError::syntax("unterminated string literal", line)),
            };
            if c == quote {
                if !triple {
                    break;
                }
                if self.peek() == Some(quote) && self.peek_at(1) == Some(quote) {
                    self.bump();
                    self.bump();
                    break;
                }
                body.push(c);
                continue;
            }
            if c == '\n' && !triple {
                return Err(ScriptError::syntax("unterminated string literal", line));
            }
            if c == '\\' {
                let next = match self.bump() {
                    Some(n) => n,
                    None => return Err(ScriptError::syntax("unterminated string literal", line)),
                };
                if raw {
                    body.push('\\');
                    body.push(next);
                    continue;
                }
                match next {
                    'n' => body.push('\n'),
                    't' => body.push('\t'),
                    'r' => body.push('\r'),
                    '0' => body.push('\0'),
                    '\\' => body.push('\\'),
                    '\'' => body.push('\''),
                    '"' => body.push('"'),
                    '\n' => {}
                    other => {
                        body.push('\\');
                        body.push(other);
                    }
                }
                continue;
            }
            body.push(c);
        }
        Ok(body)
    }

    fn lex_operator(&mut self, line: usize, column: usize) -> ScriptResult<()> {
        for op in OPERATORS {
            let matches = op
                .chars()
                .enumerate()
                .all(|(i, oc)| self.peek_at(i) == Some(oc));
            if matches {
                for _ in 0..op.chars().count() {
                    self.bump();
                }
                match *op {
                    "(" | "[" | "{" => self.depth += 1,
                    ")" | "]" | "}" => self.depth = self.depth.saturating_sub(1),
                    _ => {}
                }
                self.push(Tok::Op(op), line, column);
                return Ok(());
            }
        }
        let c = self.peek().unwrap_or(' ');
        Err(ScriptError::syntax(format!("invalid character '{}'", c), line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Tok> {
        tokenize(source).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn test_indentation_tokens() {
        let toks = kinds("if x:\n    y = 1\nz = 2\n");
        assert!(toks.contains(&Tok::Indent));
        assert!(toks.contains(&Tok::Dedent));
        assert_eq!(toks.last(), Some(&Tok::Eof));
    }

    #[test]
    fn test_brackets_join_lines() {
        let toks = kinds("x = [1,\n     2]\n");
        let newlines = toks.iter().filter(|t| **t == Tok::Newline).count();
        assert_eq!(newlines, 1);
        assert!(!toks.contains(&Tok::Indent));
    }

    #[test]
    fn test_comments_and_blank_lines_skipped() {
        let toks = kinds("# header\n\nx = 1  # trailing\n\n");
        assert_eq!(
            toks,
            vec![
                Tok::Name("x".into()),
                Tok::Op("="),
                Tok::Int(1),
                Tok::Newline,
                Tok::Eof
            ]
        );
    }

    #[test]
    fn test_string_prefixes_and_escapes() {
        let toks = kinds("a = f'{x:.2f}'\nb = r'\\d'\nc = 'it\\'s'\n");
        assert!(toks.contains(&Tok::FStr("{x:.2f}".into())));
        assert!(toks.contains(&Tok::Str("\\d".into())));
        assert!(toks.contains(&Tok::Str("it's".into())));
    }

    #[test]
    fn test_numbers() {
        let toks = kinds("x = 1_000 + 2.5e3 + .5\n");
        assert!(toks.contains(&Tok::Int(1000)));
        assert!(toks.contains(&Tok::Float(2500.0)));
        assert!(toks.contains(&Tok::Float(0.5)));
    }

    #[test]
    fn test_bad_dedent_is_syntax_error() {
        let err = tokenize("if x:\n    y = 1\n  z = 2\n").unwrap_err();
        assert_eq!(err.fault, crate::script::error::Fault::Syntax);
        assert_eq!(err.line, Some(3));
    }

    #[test]
    fn test_unterminated_string() {
        assert!(tokenize("x = 'abc\n").is_err());
    }
}

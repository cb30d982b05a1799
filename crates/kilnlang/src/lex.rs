use kilncore::Position;

use crate::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Eof,
    LBrace,
    RBrace,
    LBrack,
    RBrack,
    LParen,
    RParen,
    Colon,
    Comma,
    Dot,
    Assign,
    True,
    False,
    Let,
    In,
    With,
    Include,
    Output,
    If,
    Then,
    Else,
    Ident(String),
    Number(f64),
    Path(String),
    /// Opening `"` or `''`; the parser then loops over chunk, interp and
    /// end tokens.
    StrBegin,
    StrChunk(String),
    /// `\(` — an interpolated expression follows.
    StrInterp,
    /// The `)` closing an interpolation.
    StrInterpEnd,
    StrEnd,
}

impl Tok {
    pub fn describe(&self) -> String {
        match self {
            Tok::Eof => "end-of-file".to_string(),
            Tok::LBrace => "'{'".to_string(),
            Tok::RBrace => "'}'".to_string(),
            Tok::LBrack => "'['".to_string(),
            Tok::RBrack => "']'".to_string(),
            Tok::LParen => "'('".to_string(),
            Tok::RParen => "')'".to_string(),
            Tok::Colon => "':'".to_string(),
            Tok::Comma => "','".to_string(),
            Tok::Dot => "'.'".to_string(),
            Tok::Assign => "'='".to_string(),
            Tok::True => "'true'".to_string(),
            Tok::False => "'false'".to_string(),
            Tok::Let => "'let'".to_string(),
            Tok::In => "'in'".to_string(),
            Tok::With => "'with'".to_string(),
            Tok::Include => "'include'".to_string(),
            Tok::Output => "'output'".to_string(),
            Tok::If => "'if'".to_string(),
            Tok::Then => "'then'".to_string(),
            Tok::Else => "'else'".to_string(),
            Tok::Ident(name) => format!("identifier '{name}'"),
            Tok::Number(_) => "number".to_string(),
            Tok::Path(path) => format!("path '{path}'"),
            Tok::StrBegin => "string".to_string(),
            Tok::StrChunk(_) => "string-character".to_string(),
            Tok::StrInterp => "'\\('".to_string(),
            Tok::StrInterpEnd => "')'".to_string(),
            Tok::StrEnd => "'\"'".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    Str { multiline: bool },
    /// Inside `\( … )`; `depth` counts plain parentheses so the closing
    /// one is found.
    Interp { depth: usize },
}

pub struct Lexer<'a> {
    src: &'a str,
    i: usize,
    line: usize,
    line_start: usize,
    filename: String,
    modes: Vec<Mode>,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str, filename: impl Into<String>) -> Self {
        Lexer {
            src,
            i: 0,
            line: 1,
            line_start: 0,
            filename: filename.into(),
            modes: Vec::new(),
        }
    }

    fn pos(&self) -> Position {
        Position::new(&self.filename, self.line, self.i - self.line_start + 1)
    }

    fn syntax(&self, message: impl Into<String>) -> ParseError {
        ParseError::Syntax {
            pos: self.pos(),
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.i..].chars().next()
    }

    fn rest(&self) -> &str {
        &self.src[self.i..]
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.i += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.line_start = self.i;
        }
        Some(ch)
    }

    fn eat(&mut self, n: usize) {
        for _ in 0..n {
            self.bump();
        }
    }

    pub fn next(&mut self) -> Result<(Position, Tok), ParseError> {
        match self.modes.last().copied() {
            Some(Mode::Str { multiline }) => self.next_str(multiline),
            _ => self.next_root(),
        }
    }

    fn next_root(&mut self) -> Result<(Position, Tok), ParseError> {
        self.skip_trivia();
        let pos = self.pos();

        let Some(chr) = self.peek() else {
            return Ok((pos, Tok::Eof));
        };

        if self.at_path_prefix() {
            return Ok((pos, self.lex_path()));
        }

        if chr == '"' {
            self.eat(1);
            self.modes.push(Mode::Str { multiline: false });
            return Ok((pos, Tok::StrBegin));
        }
        if self.rest().starts_with("''") {
            self.eat(2);
            self.modes.push(Mode::Str { multiline: true });
            return Ok((pos, Tok::StrBegin));
        }

        if chr == '(' {
            self.eat(1);
            if let Some(Mode::Interp { depth }) = self.modes.last_mut() {
                *depth += 1;
            }
            return Ok((pos, Tok::LParen));
        }
        if chr == ')' {
            self.eat(1);
            match self.modes.last_mut() {
                Some(Mode::Interp { depth }) if *depth > 0 => {
                    *depth -= 1;
                    return Ok((pos, Tok::RParen));
                }
                Some(Mode::Interp { .. }) => {
                    self.modes.pop();
                    return Ok((pos, Tok::StrInterpEnd));
                }
                _ => return Ok((pos, Tok::RParen)),
            }
        }

        let symbol = match chr {
            '{' => Some(Tok::LBrace),
            '}' => Some(Tok::RBrace),
            '[' => Some(Tok::LBrack),
            ']' => Some(Tok::RBrack),
            ':' => Some(Tok::Colon),
            ',' => Some(Tok::Comma),
            '.' => Some(Tok::Dot),
            '=' => Some(Tok::Assign),
            _ => None,
        };
        if let Some(tok) = symbol {
            self.eat(1);
            return Ok((pos, tok));
        }

        if chr.is_alphabetic() || chr == '_' {
            return Ok((pos, self.lex_ident()));
        }

        if chr.is_ascii_digit() || chr == '-' {
            return Ok((pos, self.lex_number()?));
        }

        Err(self.syntax(format!("illegal token: `{chr}`")))
    }

    fn skip_trivia(&mut self) {
        loop {
            while self.peek().is_some_and(char::is_whitespace) {
                self.bump();
            }
            if self.rest().starts_with("//") {
                while let Some(ch) = self.bump() {
                    if ch == '\n' {
                        break;
                    }
                }
                continue;
            }
            if self.rest().starts_with("/*") {
                self.eat(2);
                while !self.rest().starts_with("*/") && self.peek().is_some() {
                    self.bump();
                }
                self.eat(2);
                continue;
            }
            break;
        }
    }

    fn at_path_prefix(&self) -> bool {
        let rest = self.rest();
        (rest.starts_with('/') && !rest.starts_with("//") && !rest.starts_with("/*"))
            || rest.starts_with("./")
            || rest.starts_with("../")
    }

    fn lex_path(&mut self) -> Tok {
        let start = self.i;
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() || ",{}[]()'\"".contains(ch) {
                break;
            }
            self.bump();
        }
        Tok::Path(self.src[start..self.i].to_string())
    }

    fn lex_ident(&mut self) -> Tok {
        let start = self.i;
        while self
            .peek()
            .is_some_and(|ch| ch.is_alphanumeric() || ch == '_')
        {
            self.bump();
        }
        match &self.src[start..self.i] {
            "true" => Tok::True,
            "false" => Tok::False,
            "let" => Tok::Let,
            "in" => Tok::In,
            "with" => Tok::With,
            "include" => Tok::Include,
            "output" => Tok::Output,
            "if" => Tok::If,
            "then" => Tok::Then,
            "else" => Tok::Else,
            other => Tok::Ident(other.to_string()),
        }
    }

    /// JSON-style numbers: `-?(0|[1-9]\d*)(\.\d+)?([eE][+-]?\d+)?`.
    fn lex_number(&mut self) -> Result<Tok, ParseError> {
        let start = self.i;
        if self.peek() == Some('-') {
            self.eat(1);
        }
        if !self.peek().is_some_and(|c| c.is_ascii_digit()) {
            return Err(self.syntax("illegal token: `-`"));
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.eat(1);
        }
        if self.peek() == Some('.') && self.second().is_some_and(|c| c.is_ascii_digit()) {
            self.eat(1);
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.eat(1);
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            self.eat(1);
            if matches!(self.peek(), Some('+' | '-')) {
                self.eat(1);
            }
            if !self.peek().is_some_and(|c| c.is_ascii_digit()) {
                return Err(self.syntax("malformed number"));
            }
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.eat(1);
            }
        }
        let text = &self.src[start..self.i];
        text.parse::<f64>()
            .map(Tok::Number)
            .map_err(|_| self.syntax(format!("malformed number: `{text}`")))
    }

    fn second(&self) -> Option<char> {
        let mut chars = self.rest().chars();
        chars.next();
        chars.next()
    }

    fn next_str(&mut self, multiline: bool) -> Result<(Position, Tok), ParseError> {
        let pos = self.pos();
        let mut chunk = String::new();
        loop {
            let Some(chr) = self.peek() else {
                return Err(self.syntax("unterminated string"));
            };

            let at_end = if multiline {
                self.rest().starts_with("''")
            } else {
                chr == '"'
            };
            if at_end {
                if !chunk.is_empty() {
                    return Ok((pos, Tok::StrChunk(chunk)));
                }
                self.eat(if multiline { 2 } else { 1 });
                self.modes.pop();
                return Ok((pos, Tok::StrEnd));
            }

            if !multiline && chr == '\n' {
                return Err(self.syntax("unterminated string"));
            }

            if chr == '\\' {
                if self.second() == Some('(') {
                    if !chunk.is_empty() {
                        return Ok((pos, Tok::StrChunk(chunk)));
                    }
                    self.eat(2);
                    self.modes.push(Mode::Interp { depth: 0 });
                    return Ok((pos, Tok::StrInterp));
                }
                self.lex_escape(&mut chunk)?;
                continue;
            }

            chunk.push(chr);
            self.bump();
        }
    }

    fn lex_escape(&mut self, chunk: &mut String) -> Result<(), ParseError> {
        self.eat(1); // backslash
        let Some(chr) = self.peek() else {
            return Err(self.syntax("unterminated string"));
        };
        match chr {
            '"' | '\'' | '\\' => chunk.push(chr),
            'b' => chunk.push('\u{0008}'),
            'f' => chunk.push('\u{000c}'),
            'n' => chunk.push('\n'),
            'r' => chunk.push('\r'),
            't' => chunk.push('\t'),
            '\n' => {} // escaped newline continues the line
            'u' => {
                self.eat(1);
                let hex = self.rest().get(..4).unwrap_or_default();
                if hex.len() < 4 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                    return Err(self.syntax("illegal unicode-escape"));
                }
                let code = u32::from_str_radix(hex, 16).unwrap_or(0);
                let Some(decoded) = char::from_u32(code) else {
                    return Err(self.syntax("illegal unicode-escape"));
                };
                chunk.push(decoded);
                self.eat(4);
                return Ok(());
            }
            other => return Err(self.syntax(format!("illegal escape: `\\{other}`"))),
        }
        self.eat(1);
        Ok(())
    }
}

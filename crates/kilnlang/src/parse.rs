use std::fs;
use std::path::{Component, Path, PathBuf};

use kilncore::{Binding, Expr, ExprKind, Position};

use crate::lex::{Lexer, Tok};
use crate::ParseError;

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    tok: Tok,
    pos: Position,
    dir: PathBuf,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str, filename: &str, dir: PathBuf) -> Result<Self, ParseError> {
        let mut lexer = Lexer::new(src, filename);
        let (pos, tok) = lexer.next()?;
        Ok(Parser {
            lexer,
            tok,
            pos,
            dir,
        })
    }

    fn advance(&mut self) -> Result<(), ParseError> {
        let (pos, tok) = self.lexer.next()?;
        self.pos = pos;
        self.tok = tok;
        Ok(())
    }

    fn unexpected(&self, wanted: &[&str]) -> ParseError {
        ParseError::Syntax {
            pos: self.pos.clone(),
            message: format!("expected {}, got {}", wanted.join(", "), self.tok.describe()),
        }
    }

    fn expect(&mut self, want: &Tok) -> Result<(), ParseError> {
        if std::mem::discriminant(&self.tok) == std::mem::discriminant(want) {
            self.advance()
        } else {
            Err(self.unexpected(&[&want.describe()]))
        }
    }

    fn expect_ident(&mut self) -> Result<String, ParseError> {
        match &self.tok {
            Tok::Ident(name) => {
                let name = name.clone();
                self.advance()?;
                Ok(name)
            }
            _ => Err(self.unexpected(&["identifier"])),
        }
    }

    /// Step over a separating comma; a missing comma ends the sequence.
    fn comma(&mut self) -> Result<bool, ParseError> {
        if self.tok == Tok::Comma {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn parse_value(&mut self) -> Result<Expr, ParseError> {
        let mut base = self.parse_base()?;
        while self.tok == Tok::Dot {
            self.advance()?;
            let pos = self.pos.clone();
            let name = self.expect_ident()?;
            base = Expr {
                pos,
                kind: ExprKind::Attr {
                    base: Box::new(base),
                    name,
                },
            };
        }
        Ok(base)
    }

    fn parse_base(&mut self) -> Result<Expr, ParseError> {
        let pos = self.pos.clone();
        match self.tok.clone() {
            Tok::LBrace => self.parse_map(),
            Tok::LBrack => self.parse_array(),
            Tok::StrBegin => self.parse_string(),
            Tok::Ident(_) => self.parse_var(),
            Tok::Include => {
                self.advance()?;
                let path = self.parse_value()?;
                Ok(Expr {
                    pos,
                    kind: ExprKind::Include {
                        path: Box::new(path),
                    },
                })
            }
            Tok::Output => {
                self.advance()?;
                let attrs = self.parse_value()?;
                Ok(Expr {
                    pos,
                    kind: ExprKind::Output {
                        attrs: Box::new(attrs),
                    },
                })
            }
            Tok::If => self.parse_condition(),
            Tok::LParen => {
                self.advance()?;
                let inner = self.parse_value()?;
                self.expect(&Tok::RParen)?;
                Ok(inner)
            }
            Tok::Number(value) => {
                self.advance()?;
                Ok(Expr {
                    pos,
                    kind: ExprKind::Number(value),
                })
            }
            Tok::Path(text) => {
                self.advance()?;
                let name = if text.starts_with('/') {
                    clean_path(Path::new(&text))
                } else {
                    clean_path(&self.dir.join(&text))
                };
                Ok(Expr {
                    pos,
                    kind: ExprKind::Path(name.display().to_string()),
                })
            }
            Tok::True | Tok::False => {
                let value = self.tok == Tok::True;
                self.advance()?;
                Ok(Expr {
                    pos,
                    kind: ExprKind::Boolean(value),
                })
            }
            Tok::Let => self.parse_define(),
            _ => Err(ParseError::Syntax {
                pos,
                message: format!("invalid token: {}", self.tok.describe()),
            }),
        }
    }

    fn parse_map(&mut self) -> Result<Expr, ParseError> {
        let pos = self.pos.clone();
        self.expect(&Tok::LBrace)?;

        let mut entries = Vec::new();
        let mut extends = Vec::new();
        while self.tok != Tok::RBrace {
            if self.tok == Tok::With {
                self.advance()?;
                extends.push(self.parse_value()?);
            } else {
                let key = self.parse_value()?;
                self.expect(&Tok::Colon)?;
                let value = self.parse_value()?;
                entries.push((key, value));
            }
            if !self.comma()? {
                break;
            }
        }
        self.expect(&Tok::RBrace)?;

        Ok(Expr {
            pos,
            kind: ExprKind::Map { entries, extends },
        })
    }

    fn parse_array(&mut self) -> Result<Expr, ParseError> {
        let pos = self.pos.clone();
        self.expect(&Tok::LBrack)?;

        let mut elems = Vec::new();
        while self.tok != Tok::RBrack {
            elems.push(self.parse_value()?);
            if !self.comma()? {
                break;
            }
        }
        self.expect(&Tok::RBrack)?;

        Ok(Expr {
            pos,
            kind: ExprKind::Array(elems),
        })
    }

    /// `let name = expr, fun a, b = expr, … in body`. A binding with
    /// formal parameters becomes a lambda-valued binding.
    fn parse_define(&mut self) -> Result<Expr, ParseError> {
        let pos = self.pos.clone();
        self.expect(&Tok::Let)?;

        let mut bindings = Vec::new();
        while self.tok != Tok::In {
            let name = self.expect_ident()?;
            let mut formals = Vec::new();
            if matches!(self.tok, Tok::Ident(_)) {
                while self.tok != Tok::Assign {
                    formals.push(self.expect_ident()?);
                    if !self.comma()? {
                        break;
                    }
                }
            }
            self.expect(&Tok::Assign)?;
            let value = self.parse_value()?;
            let expr = if formals.is_empty() {
                value
            } else {
                Expr {
                    pos: value.pos.clone(),
                    kind: ExprKind::Lambda {
                        formals,
                        body: Box::new(value),
                    },
                }
            };
            bindings.push(Binding { name, expr });
            if !self.comma()? {
                break;
            }
        }
        self.expect(&Tok::In)?;

        let body = self.parse_value()?;
        Ok(Expr {
            pos,
            kind: ExprKind::Define {
                bindings,
                body: Box::new(body),
            },
        })
    }

    fn parse_condition(&mut self) -> Result<Expr, ParseError> {
        let pos = self.pos.clone();
        self.expect(&Tok::If)?;
        let cond = self.parse_value()?;
        self.expect(&Tok::Then)?;
        let then = self.parse_value()?;
        self.expect(&Tok::Else)?;
        let otherwise = self.parse_value()?;
        Ok(Expr {
            pos,
            kind: ExprKind::Condition {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            },
        })
    }

    fn parse_var(&mut self) -> Result<Expr, ParseError> {
        let pos = self.pos.clone();
        let name = self.expect_ident()?;

        if self.tok != Tok::LParen {
            return Ok(Expr {
                pos,
                kind: ExprKind::Var { name },
            });
        }

        self.advance()?;
        let mut args = Vec::new();
        while self.tok != Tok::RParen {
            args.push(self.parse_value()?);
            if !self.comma()? {
                break;
            }
        }
        self.expect(&Tok::RParen)?;

        Ok(Expr {
            pos,
            kind: ExprKind::Call { name, args },
        })
    }

    fn parse_string(&mut self) -> Result<Expr, ParseError> {
        let pos = self.pos.clone();
        self.advance()?; // step past the opening quote into string mode

        let mut chunks = Vec::new();
        let mut interps = Vec::new();
        let mut current = String::new();
        loop {
            match self.tok.clone() {
                Tok::StrChunk(text) => {
                    current.push_str(&text);
                    self.advance()?;
                }
                Tok::StrInterp => {
                    chunks.push(std::mem::take(&mut current));
                    self.advance()?;
                    let sub = self.parse_value()?;
                    interps.push(Some(sub));
                    self.expect(&Tok::StrInterpEnd)?;
                }
                Tok::StrEnd => {
                    self.advance()?;
                    chunks.push(current);
                    interps.push(None);
                    return Ok(Expr {
                        pos,
                        kind: ExprKind::Str { chunks, interps },
                    });
                }
                _ => return Err(self.unexpected(&["string-character", "'\\('", "'\"'"])),
            }
        }
    }
}

/// Lexically normalize a path: drop `.` components, fold `..` into their
/// parent.
fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Parse a source string. `filename` seeds diagnostics, `dir` anchors
/// relative paths.
pub fn parse_str(src: &str, filename: &str, dir: &Path) -> Result<Expr, ParseError> {
    let mut parser = Parser::new(src, filename, dir.to_path_buf())?;
    let value = parser.parse_value()?;
    if parser.tok != Tok::Eof {
        return Err(parser.unexpected(&["end-of-file"]));
    }
    Ok(value)
}

/// Read and parse one expression file. Relative paths in the source are
/// resolved against the file's directory.
pub fn parse_file(filename: &Path) -> Result<Expr, ParseError> {
    let src = fs::read_to_string(filename).map_err(|err| ParseError::Io {
        pos: Position::default(),
        message: format!("failed to open file {}: {err}", filename.display()),
    })?;
    let abs = std::path::absolute(filename).map_err(|err| ParseError::Io {
        pos: Position::default(),
        message: format!("failed to resolve {}: {err}", filename.display()),
    })?;
    let dir = abs.parent().unwrap_or(Path::new("/")).to_path_buf();
    parse_str(&src, &filename.display().to_string(), &dir)
}

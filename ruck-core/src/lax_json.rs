//! Incremental tokenizer for the manifest's lenient JSON dialect: string,
//! number, true/false/null, object/array begin/end, `//` and `/* */`
//! comments, and trailing commas. Fed byte chunks via [`Tokenizer::feed`]
//! and terminated with [`Tokenizer::eof`]; events queue up for the
//! manifest driver to drain with [`Tokenizer::next_event`].

use crate::error::{Result, RuckError};
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    String(String),
    Number(f64),
    Bool(bool),
    Null,
    BeginObject,
    EndObject,
    BeginArray,
    EndArray,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Located {
    pub event: Event,
    pub line: usize,
    pub col: usize,
}

enum Mode {
    Neutral,
    MaybeComment,
    LineComment,
    BlockComment { prev_star: bool },
    InString { buf: Vec<u8>, escape: bool, unicode: Option<String>, line: usize, col: usize },
    InNumber { buf: String, line: usize, col: usize },
    InIdent { buf: String, line: usize, col: usize },
}

pub struct Tokenizer {
    mode: Mode,
    line: usize,
    col: usize,
    events: VecDeque<Located>,
    latched: Option<RuckError>,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tokenizer {
    pub fn new() -> Self {
        Tokenizer { mode: Mode::Neutral, line: 1, col: 0, events: VecDeque::new(), latched: None }
    }

    pub fn next_event(&mut self) -> Option<Located> {
        self.events.pop_front()
    }

    fn err(&mut self, message: impl Into<String>) -> RuckError {
        let e = RuckError::Parse { line: self.line, col: self.col, message: message.into() };
        if self.latched.is_none() {
            self.latched = Some(RuckError::Parse {
                line: self.line,
                col: self.col,
                message: "parse aborted after prior error".into(),
            });
        }
        e
    }

    fn push(&mut self, event: Event, line: usize, col: usize) {
        self.events.push_back(Located { event, line, col });
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Result<()> {
        if let Some(e) = &self.latched {
            return Err(clone_err(e));
        }
        let mut i = 0;
        while i < bytes.len() {
            let b = bytes[i];
            let advance = self.step(b)?;
            if advance {
                i += 1;
                if b == b'\n' {
                    self.line += 1;
                    self.col = 0;
                } else {
                    self.col += 1;
                }
            }
        }
        Ok(())
    }

    /// Process one byte. Returns `true` if the byte was consumed, `false`
    /// if the caller should re-present the same byte (used when a mode
    /// transition happens on a byte that the new mode must also see, e.g.
    /// the first digit of a number).
    fn step(&mut self, b: u8) -> Result<bool> {
        let (line, col) = (self.line, self.col);
        let mode = std::mem::replace(&mut self.mode, Mode::Neutral);
        match mode {
            Mode::Neutral => match b {
                b' ' | b'\t' | b'\r' | b'\n' => Ok(true),
                b'{' => {
                    self.push(Event::BeginObject, line, col);
                    Ok(true)
                }
                b'}' => {
                    self.push(Event::EndObject, line, col);
                    Ok(true)
                }
                b'[' => {
                    self.push(Event::BeginArray, line, col);
                    Ok(true)
                }
                b']' => {
                    self.push(Event::EndArray, line, col);
                    Ok(true)
                }
                b':' | b',' => Ok(true),
                b'"' => {
                    self.mode = Mode::InString { buf: Vec::new(), escape: false, unicode: None, line, col };
                    Ok(true)
                }
                b'/' => {
                    self.mode = Mode::MaybeComment;
                    Ok(true)
                }
                b'-' | b'0'..=b'9' => {
                    self.mode = Mode::InNumber { buf: String::new(), line, col };
                    Ok(false)
                }
                b'a'..=b'z' => {
                    self.mode = Mode::InIdent { buf: String::new(), line, col };
                    Ok(false)
                }
                other => Err(self.err(format!("unexpected byte {:#04x}", other))),
            },
            Mode::MaybeComment => match b {
                b'/' => {
                    self.mode = Mode::LineComment;
                    Ok(true)
                }
                b'*' => {
                    self.mode = Mode::BlockComment { prev_star: false };
                    Ok(true)
                }
                _ => Err(self.err("bare '/' outside a comment")),
            },
            Mode::LineComment => {
                self.mode = if b == b'\n' { Mode::Neutral } else { Mode::LineComment };
                Ok(true)
            }
            Mode::BlockComment { prev_star } => {
                self.mode = if prev_star && b == b'/' {
                    Mode::Neutral
                } else {
                    Mode::BlockComment { prev_star: b == b'*' }
                };
                Ok(true)
            }
            Mode::InString { mut buf, escape, mut unicode, line, col } => {
                if let Some(hex) = unicode.as_mut() {
                    if !b.is_ascii_hexdigit() {
                        return Err(self.err("bad \\u escape: expected 4 hex digits"));
                    }
                    hex.push(b as char);
                    if hex.len() == 4 {
                        let cp = u32::from_str_radix(hex, 16)
                            .map_err(|_| RuckError::Parse { line, col, message: "bad \\u escape".into() })?;
                        if let Some(c) = char::from_u32(cp) {
                            let mut tmp = [0u8; 4];
                            buf.extend_from_slice(c.encode_utf8(&mut tmp).as_bytes());
                        }
                        unicode = None;
                    }
                    self.mode = Mode::InString { buf, escape: false, unicode, line, col };
                    Ok(true)
                } else if escape {
                    let mut next_mode = Mode::InString { buf, escape: false, unicode: None, line, col };
                    match b {
                        b'n' | b't' | b'r' | b'"' | b'\\' | b'/' | b'b' | b'f' => {
                            let lit = match b {
                                b'n' => b'\n',
                                b't' => b'\t',
                                b'r' => b'\r',
                                b'b' => 0x08,
                                b'f' => 0x0c,
                                other => other,
                            };
                            if let Mode::InString { buf, .. } = &mut next_mode {
                                buf.push(lit);
                            }
                        }
                        b'u' => {
                            if let Mode::InString { unicode, .. } = &mut next_mode {
                                *unicode = Some(String::new());
                            }
                        }
                        other => return Err(self.err(format!("bad escape '\\{}'", other as char))),
                    }
                    self.mode = next_mode;
                    Ok(true)
                } else if b == b'\\' {
                    self.mode = Mode::InString { buf, escape: true, unicode: None, line, col };
                    Ok(true)
                } else if b == b'"' {
                    let text = String::from_utf8(buf)
                        .map_err(|_| RuckError::Parse { line, col, message: "non-utf8 string".into() })?;
                    self.push(Event::String(text), line, col);
                    Ok(true)
                } else {
                    buf.push(b);
                    self.mode = Mode::InString { buf, escape: false, unicode: None, line, col };
                    Ok(true)
                }
            }
            Mode::InNumber { mut buf, line, col } => match b {
                b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E' => {
                    buf.push(b as char);
                    self.mode = Mode::InNumber { buf, line, col };
                    Ok(true)
                }
                _ => {
                    let n: f64 = buf
                        .parse()
                        .map_err(|_| RuckError::Parse { line, col, message: format!("bad number '{buf}'") })?;
                    self.push(Event::Number(n), line, col);
                    Ok(false)
                }
            },
            Mode::InIdent { mut buf, line, col } => {
                if b.is_ascii_alphabetic() {
                    buf.push(b as char);
                    self.mode = Mode::InIdent { buf, line, col };
                    Ok(true)
                } else {
                    let event = match buf.as_str() {
                        "true" => Event::Bool(true),
                        "false" => Event::Bool(false),
                        "null" => Event::Null,
                        other => {
                            return Err(RuckError::Parse {
                                line,
                                col,
                                message: format!("unknown identifier '{other}'"),
                            })
                        }
                    };
                    self.push(event, line, col);
                    Ok(false)
                }
            }
        }
    }

    /// Flush any token still accumulating at end-of-input.
    pub fn eof(&mut self) -> Result<()> {
        if let Some(e) = &self.latched {
            return Err(clone_err(e));
        }
        let mode = std::mem::replace(&mut self.mode, Mode::Neutral);
        match mode {
            Mode::Neutral | Mode::LineComment => Ok(()),
            Mode::InNumber { buf, line, col } => {
                let n: f64 = buf
                    .parse()
                    .map_err(|_| RuckError::Parse { line, col, message: format!("bad number '{buf}'") })?;
                self.push(Event::Number(n), line, col);
                Ok(())
            }
            Mode::InIdent { buf, line, col } => {
                let event = match buf.as_str() {
                    "true" => Event::Bool(true),
                    "false" => Event::Bool(false),
                    "null" => Event::Null,
                    other => {
                        return Err(RuckError::Parse {
                            line,
                            col,
                            message: format!("unknown identifier '{other}'"),
                        })
                    }
                };
                self.push(event, line, col);
                Ok(())
            }
            Mode::InString { .. } => Err(self.err_clone("unterminated string at end of input")),
            Mode::MaybeComment | Mode::BlockComment { .. } => {
                Err(self.err_clone("unterminated comment at end of input"))
            }
        }
    }

    fn err_clone(&self, message: &str) -> RuckError {
        RuckError::Parse { line: self.line, col: self.col, message: message.to_string() }
    }
}

fn clone_err(e: &RuckError) -> RuckError {
    match e {
        RuckError::Parse { line, col, message } => {
            RuckError::Parse { line: *line, col: *col, message: message.clone() }
        }
        other => RuckError::Parse { line: 0, col: 0, message: other.to_string() },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(src: &str) -> Vec<Event> {
        let mut t = Tokenizer::new();
        t.feed(src.as_bytes()).unwrap();
        t.eof().unwrap();
        let mut out = Vec::new();
        while let Some(l) = t.next_event() {
            out.push(l.event);
        }
        out
    }

    #[test]
    fn tokenizes_a_simple_object() {
        let evs = events(r#"{"a": 1, "b": true}"#);
        assert_eq!(
            evs,
            vec![
                Event::BeginObject,
                Event::String("a".into()),
                Event::Number(1.0),
                Event::String("b".into()),
                Event::Bool(true),
                Event::EndObject,
            ]
        );
    }

    #[test]
    fn allows_trailing_commas_line_and_block_comments() {
        let evs = events(
            "{\n  // a line comment\n  \"a\": 1, /* block\n comment */\n  \"b\": null,\n}",
        );
        assert_eq!(
            evs,
            vec![
                Event::BeginObject,
                Event::String("a".into()),
                Event::Number(1.0),
                Event::String("b".into()),
                Event::Null,
                Event::EndObject,
            ]
        );
    }

    #[test]
    fn string_escapes_decode_to_literal_bytes() {
        let evs = events(r#""line1\nline2\tA""#);
        assert_eq!(evs, vec![Event::String("line1\nline2\tA".into())]);
    }

    #[test]
    fn feed_can_be_called_in_arbitrary_chunks() {
        let src = r#"{"key": [1, 2, 3]}"#;
        let mut t = Tokenizer::new();
        for chunk in src.as_bytes().chunks(3) {
            t.feed(chunk).unwrap();
        }
        t.eof().unwrap();
        let mut out = Vec::new();
        while let Some(l) = t.next_event() {
            out.push(l.event);
        }
        assert_eq!(
            out,
            vec![
                Event::BeginObject,
                Event::String("key".into()),
                Event::BeginArray,
                Event::Number(1.0),
                Event::Number(2.0),
                Event::Number(3.0),
                Event::EndArray,
                Event::EndObject,
            ]
        );
    }

    #[test]
    fn unexpected_byte_reports_line_and_column() {
        let mut t = Tokenizer::new();
        let err = t.feed(b"{\n  #bad\n}").unwrap_err();
        match err {
            RuckError::Parse { line, .. } => assert_eq!(line, 2),
            other => panic!("expected Parse error, got {other:?}"),
        }
    }

    #[test]
    fn error_is_latched_after_first_failure() {
        let mut t = Tokenizer::new();
        assert!(t.feed(b"#").is_err());
        assert!(t.feed(b"{}").is_err());
    }

    #[test]
    fn unterminated_string_fails_at_eof() {
        let mut t = Tokenizer::new();
        t.feed(b"\"unterminated").unwrap();
        assert!(t.eof().is_err());
    }
}

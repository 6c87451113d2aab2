//! Structural repair of truncated JSON documents.
//!
//! A single left-to-right scan tracks the open containers and the token
//! currently being read. Alongside the scan it remembers `safe`, the length of
//! the longest prefix that can be turned into a valid document purely by
//! appending closing delimiters. At end of input the prefix is cut back to
//! `safe` and the closers for whatever is still open are appended.
//!
//! Only truncation is repaired. Input that is malformed before the point of
//! truncation is returned untouched, so a strict parser still rejects it.

const LITERALS: [&str; 3] = ["true", "false", "null"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObjectPhase {
    Start,
    Key,
    AfterKey,
    BeforeValue,
    AfterValue,
    AfterComma,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArrayPhase {
    Start,
    AfterValue,
    AfterComma,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Object(ObjectPhase),
    Array(ArrayPhase),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Escape {
    None,
    Pending,
    /// Inside `\u`, with this many hex digits still missing.
    Unicode(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    None,
    Str { key: bool, escape: Escape },
    Literal { start: usize },
    Number,
}

struct Scanner<'a> {
    input: &'a str,
    stack: Vec<Container>,
    token: Token,
    root_done: bool,
    malformed: bool,
    safe: usize,
}

impl<'a> Scanner<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            stack: Vec::new(),
            token: Token::None,
            root_done: false,
            malformed: false,
            safe: 0,
        }
    }

    fn scan(&mut self) {
        for (i, c) in self.input.char_indices() {
            let end = i + c.len_utf8();
            if self.consume_token(c, end) {
                continue;
            }
            self.structural(i, c, end);
            if self.malformed {
                break;
            }
        }
    }

    /// Feeds `c` to the token in progress. Returns `true` when the character
    /// was absorbed; `false` hands it on to the structural scanner.
    fn consume_token(&mut self, c: char, end: usize) -> bool {
        match self.token {
            Token::None => false,
            Token::Str { key, escape } => {
                let escape = match (escape, c) {
                    (Escape::None, '\\') => Escape::Pending,
                    (Escape::None, '"') => {
                        self.token = Token::None;
                        if key {
                            self.set_phase(Container::Object(ObjectPhase::AfterKey));
                        } else {
                            self.safe = end;
                        }
                        return true;
                    }
                    (Escape::Pending, 'u') => Escape::Unicode(4),
                    (Escape::Unicode(n), _) if n > 1 => Escape::Unicode(n - 1),
                    _ => Escape::None,
                };
                self.token = Token::Str { key, escape };
                if !key && escape == Escape::None {
                    self.safe = end;
                }
                true
            }
            Token::Literal { start } => {
                let partial = &self.input[start..end];
                if LITERALS.iter().any(|literal| literal.starts_with(partial)) {
                    self.safe = end;
                    true
                } else {
                    self.token = Token::None;
                    false
                }
            }
            Token::Number => match c {
                '0'..='9' => {
                    self.safe = end;
                    true
                }
                '-' | '+' | '.' | 'e' | 'E' => true,
                _ => {
                    self.token = Token::None;
                    false
                }
            },
        }
    }

    fn structural(&mut self, i: usize, c: char, end: usize) {
        let Some(top) = self.stack.last().copied() else {
            if self.root_done {
                if c.is_ascii_whitespace() {
                    self.safe = end;
                } else {
                    self.malformed = true;
                }
            } else {
                self.start_value(i, c, end);
            }
            return;
        };

        match top {
            Container::Object(ObjectPhase::Start) => match c {
                '"' => self.begin_key(),
                '}' => self.close(end),
                _ => self.unexpected(c),
            },
            Container::Object(ObjectPhase::AfterComma) => match c {
                '"' => self.begin_key(),
                _ => self.unexpected(c),
            },
            Container::Object(ObjectPhase::AfterKey) => match c {
                ':' => self.set_phase(Container::Object(ObjectPhase::BeforeValue)),
                _ => self.unexpected(c),
            },
            Container::Object(ObjectPhase::BeforeValue) => self.start_value(i, c, end),
            Container::Object(ObjectPhase::AfterValue) => match c {
                ',' => self.set_phase(Container::Object(ObjectPhase::AfterComma)),
                '}' => self.close(end),
                _ => self.unexpected(c),
            },
            // Key strings are consumed by the token scanner.
            Container::Object(ObjectPhase::Key) => {}
            Container::Array(ArrayPhase::Start) => match c {
                ']' => self.close(end),
                _ => self.start_value(i, c, end),
            },
            Container::Array(ArrayPhase::AfterValue) => match c {
                ',' => self.set_phase(Container::Array(ArrayPhase::AfterComma)),
                ']' => self.close(end),
                _ => self.unexpected(c),
            },
            Container::Array(ArrayPhase::AfterComma) => self.start_value(i, c, end),
        }
    }

    fn start_value(&mut self, i: usize, c: char, end: usize) {
        if c.is_ascii_whitespace() {
            return;
        }

        let token = match c {
            '"' => Token::Str {
                key: false,
                escape: Escape::None,
            },
            't' | 'f' | 'n' => Token::Literal { start: i },
            '-' | '0'..='9' => Token::Number,
            '{' | '[' => Token::None,
            _ => {
                self.malformed = true;
                return;
            }
        };

        self.value_started();
        self.token = token;

        match c {
            '{' => self.stack.push(Container::Object(ObjectPhase::Start)),
            '[' => self.stack.push(Container::Array(ArrayPhase::Start)),
            _ => {}
        }

        // A lone minus sign is not yet a number.
        if c != '-' {
            self.safe = end;
        }
    }

    /// Moves the enclosing container (or the root) past the value that is
    /// about to start.
    fn value_started(&mut self) {
        match self.stack.last_mut() {
            Some(Container::Object(phase)) => *phase = ObjectPhase::AfterValue,
            Some(Container::Array(phase)) => *phase = ArrayPhase::AfterValue,
            None => self.root_done = true,
        }
    }

    fn unexpected(&mut self, c: char) {
        if !c.is_ascii_whitespace() {
            self.malformed = true;
        }
    }

    fn begin_key(&mut self) {
        self.set_phase(Container::Object(ObjectPhase::Key));
        self.token = Token::Str {
            key: true,
            escape: Escape::None,
        };
    }

    fn set_phase(&mut self, container: Container) {
        if let Some(top) = self.stack.last_mut() {
            *top = container;
        }
    }

    fn close(&mut self, end: usize) {
        self.stack.pop();
        self.safe = end;
    }

    fn finish(self) -> String {
        if self.malformed {
            return self.input.to_string();
        }

        let mut output = self.input[..self.safe].to_string();

        match self.token {
            Token::Str { key: false, .. } => output.push('"'),
            Token::Literal { start } => {
                let partial = &self.input[start..];
                if let Some(literal) = LITERALS.iter().find(|literal| literal.starts_with(partial)) {
                    output.push_str(&literal[partial.len()..]);
                }
            }
            Token::Str { key: true, .. } | Token::Number | Token::None => {}
        }

        for container in self.stack.iter().rev() {
            output.push(match container {
                Container::Object(_) => '}',
                Container::Array(_) => ']',
            });
        }

        output
    }
}

/// Closes a JSON document that was truncated mid-token or mid-container.
///
/// Never fails. Complete documents, and documents that are malformed rather
/// than truncated, are returned unchanged.
///
/// # Example
/// ```
/// use unai::json::repair_json;
///
/// assert_eq!(repair_json(r#"{"city": "Par"#), r#"{"city": "Par"}"#);
/// assert_eq!(repair_json("[1, 2."), "[1, 2]");
/// assert_eq!(repair_json("fals"), "false");
/// ```
pub fn repair_json(input: &str) -> String {
    let mut scanner = Scanner::new(input);
    scanner.scan();
    scanner.finish()
}

//! Command construction from raw REPL input.
//!
//! Input lines are split with shell-style quoting rules, then the first word
//! becomes the upper-cased verb of a [`Command`]. Tokenizing never aborts: a
//! malformed line (unterminated quote, dangling backslash) still yields the
//! words that could be recovered, and [`split`] reports what was repaired.

use std::fmt;

use thiserror::Error;

const WATCH_SUFFIX: &str = ".WATCH";

/// A verb plus its ordered arguments. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    verb: String,
    args: Vec<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("command verb cannot be blank")]
    BlankVerb,
}

impl Command {
    pub fn new(verb: impl Into<String>, args: Vec<String>) -> Result<Self, CommandError> {
        let verb = verb.into();
        if verb.trim().is_empty() {
            return Err(CommandError::BlankVerb);
        }
        Ok(Self {
            verb: verb.to_uppercase(),
            args,
        })
    }

    pub fn from_tokens(tokens: Vec<String>) -> Result<Self, CommandError> {
        let mut tokens = tokens.into_iter();
        let verb = tokens.next().ok_or(CommandError::Empty)?;
        Self::new(verb, tokens.collect())
    }

    pub fn verb(&self) -> &str {
        &self.verb
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Watch verbs subscribe to changes instead of returning one value.
    pub fn is_watch(&self) -> bool {
        self.verb.ends_with(WATCH_SUFFIX)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.verb)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Quoting problems found while splitting a line. The recovered words are kept.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenizeError {
    #[error("missing closing {quote} quote")]
    UnterminatedQuote { quote: char, recovered: Vec<String> },
    #[error("trailing backslash")]
    TrailingEscape { recovered: Vec<String> },
}

impl TokenizeError {
    pub fn recovered(&self) -> &[String] {
        match self {
            Self::UnterminatedQuote { recovered, .. } | Self::TrailingEscape { recovered } => {
                recovered
            }
        }
    }

    pub fn into_recovered(self) -> Vec<String> {
        match self {
            Self::UnterminatedQuote { recovered, .. } | Self::TrailingEscape { recovered } => {
                recovered
            }
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Between,
    Word,
    Single,
    Double,
}

/// Splits a line into words, reporting any quoting that had to be repaired.
pub fn split(line: &str) -> Result<Vec<String>, TokenizeError> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut state = State::Between;
    let mut chars = line.chars();
    let mut dangling_escape = false;

    while let Some(ch) = chars.next() {
        match state {
            State::Between | State::Word => match ch {
                c if c.is_whitespace() => {
                    if state == State::Word {
                        words.push(std::mem::take(&mut current));
                        state = State::Between;
                    }
                }
                '\'' => state = State::Single,
                '"' => state = State::Double,
                '\\' => {
                    state = State::Word;
                    match chars.next() {
                        Some(escaped) => current.push(escaped),
                        None => {
                            current.push('\\');
                            dangling_escape = true;
                        }
                    }
                }
                c => {
                    state = State::Word;
                    current.push(c);
                }
            },
            State::Single => match ch {
                '\'' => state = State::Word,
                c => current.push(c),
            },
            State::Double => match ch {
                '"' => state = State::Word,
                '\\' => match chars.next() {
                    Some(escaped) => current.push(escaped),
                    None => {
                        current.push('\\');
                        dangling_escape = true;
                    }
                },
                c => current.push(c),
            },
        }
    }

    let open_quote = match state {
        State::Single => Some('\''),
        State::Double => Some('"'),
        State::Between | State::Word => None,
    };
    if state != State::Between {
        words.push(current);
    }

    match (open_quote, dangling_escape) {
        (Some(quote), _) => Err(TokenizeError::UnterminatedQuote {
            quote,
            recovered: words,
        }),
        (None, true) => Err(TokenizeError::TrailingEscape { recovered: words }),
        (None, false) => Ok(words),
    }
}

/// Best-effort split; blank input yields no words.
pub fn tokenize(line: &str) -> Vec<String> {
    split(line).unwrap_or_else(TokenizeError::into_recovered)
}

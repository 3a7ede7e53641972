use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::bencoding::ParseError;
use crate::bencoding::value::Value;
use crate::codec::AsyncDecoder;

/// Upper bound for the up-front allocation of a string, the length prefix is untrusted.
const MAX_PREALLOCATION: usize = 1024 * 8;

impl Value {
    pub fn decode(bytes: &[u8]) -> Result<Self, ParseError> {
        let mut parser = Parser::new();
        parser.feed(bytes)?;
        parser.result()
    }
}

impl AsyncDecoder for Value {
    /// Reads the stream to its end and decodes a single root value from it.
    async fn decode<S: AsyncRead + Unpin>(stream: &mut S) -> std::io::Result<Self> {
        let mut parser = Parser::new();
        let mut buf = [0; 4096];
        loop {
            let read = stream.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            parser.feed(&buf[..read]).map_err(invalid_data)?;
        }
        parser.result().map_err(invalid_data)
    }
}

fn invalid_data(err: ParseError) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, err)
}

/// Incremental bencode parser. Input may be fed in chunks of any size, every byte is looked at
/// exactly once.
#[derive(Debug)]
pub struct Parser {
    state: State,
    stack: Vec<StackState>,
    position: usize,
}

#[derive(Debug)]
enum State {
    Ready,
    Integer {
        negative: bool,
        digits: usize,
        value: i64,
    },
    StringLength {
        digits: usize,
        length: usize,
    },
    StringContents(Vec<u8>, usize),
    Done(Value),
}

#[derive(Debug)]
enum StackState {
    List(Vec<Value>),
    Dictionary(Option<Vec<u8>>, BTreeMap<Vec<u8>, Value>),
}

impl StackState {
    fn new_list() -> Self {
        Self::List(Vec::new())
    }

    fn new_dictionary() -> Self {
        Self::Dictionary(None, BTreeMap::new())
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Self {
            state: State::Ready,
            stack: Vec::new(),
            position: 0,
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Result<(), ParseError> {
        for byte in bytes {
            self.consume(*byte)?;
        }
        Ok(())
    }

    fn consume(&mut self, byte: u8) -> Result<(), ParseError> {
        let position = self.position;
        match (&mut self.state, byte) {
            // Integer
            (State::Ready, b'i') => {
                self.state = State::Integer {
                    negative: false,
                    digits: 0,
                    value: 0,
                };
            }
            (
                State::Integer {
                    negative,
                    digits: 0,
                    ..
                },
                b'-',
            ) if !*negative => {
                *negative = true;
            }
            (
                State::Integer {
                    negative: true,
                    digits: 0,
                    ..
                },
                b'0',
            ) => {
                return Err(ParseError::NegativeZero { position });
            }
            (State::Integer { digits, value, .. }, b'0'..=b'9') if *digits > 0 && *value == 0 => {
                return Err(ParseError::LeadingZero { position });
            }
            (
                State::Integer {
                    negative,
                    digits,
                    value,
                },
                b'0'..=b'9',
            ) => {
                let digit = (byte - b'0') as i64;
                let shifted = value.checked_mul(10);
                let next = if *negative {
                    shifted.and_then(|value| value.checked_sub(digit))
                } else {
                    shifted.and_then(|value| value.checked_add(digit))
                };
                *value = next.ok_or(ParseError::IntegerOverflow { position })?;
                *digits += 1;
            }
            (State::Integer { digits: 0, .. }, b'e') => {
                return Err(ParseError::EmptyInteger { position });
            }
            (&mut State::Integer { value, .. }, b'e') => {
                self.emit(Value::Integer(value))?;
            }

            // List
            (State::Ready, b'l') => {
                self.stack.push(StackState::new_list());
            }

            // Dictionary
            (State::Ready, b'd') => {
                self.stack.push(StackState::new_dictionary());
            }

            // String
            (State::Ready, b'0'..=b'9') => {
                self.state = State::StringLength {
                    digits: 1,
                    length: (byte - b'0') as usize,
                };
            }
            (State::StringLength { length: 0, .. }, b'0'..=b'9') => {
                return Err(ParseError::LeadingZero { position });
            }
            (State::StringLength { digits, length }, b'0'..=b'9') => {
                let digit = (byte - b'0') as usize;
                *length = length
                    .checked_mul(10)
                    .and_then(|length| length.checked_add(digit))
                    .ok_or(ParseError::IntegerOverflow { position })?;
                *digits += 1;
            }
            (&mut State::StringLength { length: 0, .. }, b':') => {
                self.emit(Value::String(Vec::new()))?;
            }
            (&mut State::StringLength { length, .. }, b':') => {
                let string = Vec::with_capacity(length.min(MAX_PREALLOCATION));
                self.state = State::StringContents(string, length);
            }
            (State::StringContents(bytes, length), _) => {
                bytes.push(byte);
                if bytes.len() == *length {
                    let string = std::mem::take(bytes);
                    self.emit(Value::String(string))?;
                }
            }

            // End collection
            (State::Ready, b'e') => match self.stack.pop() {
                Some(StackState::List(list)) => {
                    self.emit(Value::List(list))?;
                }
                Some(StackState::Dictionary(None, entries)) => {
                    self.emit(Value::Dictionary(entries))?;
                }
                Some(StackState::Dictionary(Some(_), _)) => {
                    // A key without a value
                    return Err(ParseError::UnexpectedByte { byte, position });
                }
                None => {
                    return Err(ParseError::NothingToClose { position });
                }
            },

            // Ignore trailing whitespace
            (State::Done(_), b'\n' | b'\r' | b' ') => (),
            (State::Done(_), _) => {
                return Err(ParseError::TrailingData { position });
            }

            // Unexpected input
            _ => {
                return Err(ParseError::UnexpectedByte { byte, position });
            }
        }
        self.position += 1;
        Ok(())
    }

    fn emit(&mut self, value: Value) -> Result<(), ParseError> {
        let position = self.position;
        match (self.stack.last_mut(), value) {
            (Some(StackState::List(list)), value) => {
                list.push(value);
            }
            (Some(StackState::Dictionary(key @ None, _)), Value::String(string)) => {
                *key = Some(string);
            }
            (Some(StackState::Dictionary(None, _)), _) => {
                return Err(ParseError::NonStringKey { position });
            }
            (Some(StackState::Dictionary(key, entries)), value) => {
                if let Some(key) = key.take() {
                    match entries.entry(key) {
                        Entry::Vacant(entry) => {
                            entry.insert(value);
                        }
                        Entry::Occupied(entry) => {
                            return Err(ParseError::DuplicateKey {
                                key: String::from_utf8_lossy(entry.key()).into_owned(),
                            });
                        }
                    }
                }
            }
            (None, value) => {
                self.state = State::Done(value);
                return Ok(());
            }
        }
        self.state = State::Ready;
        Ok(())
    }

    pub fn result(self) -> Result<Value, ParseError> {
        match self.state {
            State::Done(value) => Ok(value),
            _ => Err(ParseError::UnexpectedEof),
        }
    }
}

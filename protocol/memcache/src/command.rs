//! Server-side command parsing.
//!
//! Parses ASCII protocol data into structured commands with zero-copy
//! semantics: keys and data blocks reference slices of the input buffer.
//!
//! A command is a single line terminated by CRLF; storage commands are
//! followed by a data block of exactly `bytes` octets plus CRLF. The parser
//! only reports `consumed` for complete frames, so a caller can retry with
//! the same buffer once more bytes arrive.

use crate::error::ParseError;

/// Maximum key length in the ASCII protocol.
pub const MAX_KEY_LEN: usize = 250;

/// Caller-configured parse limits.
#[derive(Debug, Clone)]
pub struct ParseLimits {
    /// Largest acceptable data block for storage commands.
    pub max_value_len: usize,
}

impl Default for ParseLimits {
    fn default() -> Self {
        Self {
            max_value_len: 1024 * 1024,
        }
    }
}

/// A parsed command with references into the input buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    Get {
        keys: Vec<&'a [u8]>,
    },
    Gets {
        keys: Vec<&'a [u8]>,
    },
    Set {
        key: &'a [u8],
        flags: u32,
        exptime: i64,
        data: &'a [u8],
        noreply: bool,
    },
    Add {
        key: &'a [u8],
        flags: u32,
        exptime: i64,
        data: &'a [u8],
        noreply: bool,
    },
    Replace {
        key: &'a [u8],
        flags: u32,
        exptime: i64,
        data: &'a [u8],
        noreply: bool,
    },
    Cas {
        key: &'a [u8],
        flags: u32,
        exptime: i64,
        data: &'a [u8],
        cas: u64,
        noreply: bool,
    },
    Delete {
        key: &'a [u8],
        noreply: bool,
    },
    Incr {
        key: &'a [u8],
        delta: u64,
        noreply: bool,
    },
    Decr {
        key: &'a [u8],
        delta: u64,
        noreply: bool,
    },
    Touch {
        key: &'a [u8],
        exptime: i64,
        noreply: bool,
    },
    FlushAll {
        delay: u32,
        noreply: bool,
    },
    Stats,
    Version,
    Quit,
}

impl<'a> Command<'a> {
    /// Parse one command from the front of `buf`.
    ///
    /// Returns the command and the number of bytes it occupies (command
    /// line plus data block). `ParseError::Incomplete` means the frame is
    /// not fully buffered yet; any other error carries the byte count to
    /// discard for resynchronization.
    pub fn parse(buf: &'a [u8], limits: &ParseLimits) -> Result<(Self, usize), ParseError> {
        let line_end = find_crlf(buf).ok_or(ParseError::Incomplete)?;
        let line = &buf[..line_end];
        let line_consumed = line_end + 2;

        let mut tokens = line.split(|&b| b == b' ').filter(|t| !t.is_empty());
        let verb = match tokens.next() {
            Some(v) => v,
            None => {
                return Err(ParseError::Unknown {
                    skip: line_consumed,
                })
            }
        };

        match verb {
            b"get" => parse_retrieval(tokens, line_consumed, false),
            b"gets" => parse_retrieval(tokens, line_consumed, true),
            b"set" | b"add" | b"replace" | b"cas" => {
                parse_storage(verb, tokens, buf, line_consumed, limits)
            }
            b"append" | b"prepend" => {
                // Parse far enough to swallow the data block, then reject.
                let frame = parse_storage(b"set", tokens, buf, line_consumed, limits);
                match frame {
                    Ok((_, consumed)) => Err(ParseError::NotSupported { skip: consumed }),
                    Err(ParseError::Incomplete) => Err(ParseError::Incomplete),
                    Err(ParseError::ValueTooLarge { skip })
                    | Err(ParseError::BadDataChunk { skip }) => {
                        Err(ParseError::NotSupported { skip })
                    }
                    Err(e) => Err(e),
                }
            }
            b"delete" => {
                let key = required_key(tokens.next(), line_consumed)?;
                let noreply = parse_noreply(&mut tokens, line_consumed)?;
                end_of_line(tokens, line_consumed)?;
                Ok((Command::Delete { key, noreply }, line_consumed))
            }
            b"incr" | b"decr" => {
                let key = required_key(tokens.next(), line_consumed)?;
                let delta = tokens
                    .next()
                    .and_then(parse_u64)
                    .ok_or(ParseError::BadDelta {
                        skip: line_consumed,
                    })?;
                let noreply = parse_noreply(&mut tokens, line_consumed)?;
                end_of_line(tokens, line_consumed)?;
                let cmd = if verb == b"incr" {
                    Command::Incr { key, delta, noreply }
                } else {
                    Command::Decr { key, delta, noreply }
                };
                Ok((cmd, line_consumed))
            }
            b"touch" => {
                let key = required_key(tokens.next(), line_consumed)?;
                let exptime = tokens
                    .next()
                    .and_then(parse_i64)
                    .ok_or(ParseError::BadCommandLine {
                        skip: line_consumed,
                    })?;
                let noreply = parse_noreply(&mut tokens, line_consumed)?;
                end_of_line(tokens, line_consumed)?;
                Ok((
                    Command::Touch {
                        key,
                        exptime,
                        noreply,
                    },
                    line_consumed,
                ))
            }
            b"flush_all" => {
                let mut delay = 0;
                let mut noreply = false;
                if let Some(token) = tokens.next() {
                    if token == b"noreply" {
                        noreply = true;
                    } else {
                        delay = parse_u32(token).ok_or(ParseError::BadCommandLine {
                            skip: line_consumed,
                        })?;
                        noreply = parse_noreply(&mut tokens, line_consumed)?;
                    }
                }
                end_of_line(tokens, line_consumed)?;
                Ok((Command::FlushAll { delay, noreply }, line_consumed))
            }
            b"stats" => Ok((Command::Stats, line_consumed)),
            b"version" => {
                end_of_line(tokens, line_consumed)?;
                Ok((Command::Version, line_consumed))
            }
            b"quit" => {
                end_of_line(tokens, line_consumed)?;
                Ok((Command::Quit, line_consumed))
            }
            _ => Err(ParseError::Unknown {
                skip: line_consumed,
            }),
        }
    }

    /// True when the reply for this command is suppressed.
    pub fn noreply(&self) -> bool {
        match self {
            Command::Set { noreply, .. }
            | Command::Add { noreply, .. }
            | Command::Replace { noreply, .. }
            | Command::Cas { noreply, .. }
            | Command::Delete { noreply, .. }
            | Command::Incr { noreply, .. }
            | Command::Decr { noreply, .. }
            | Command::Touch { noreply, .. }
            | Command::FlushAll { noreply, .. } => *noreply,
            _ => false,
        }
    }
}

fn parse_retrieval<'a, I>(
    tokens: I,
    line_consumed: usize,
    with_cas: bool,
) -> Result<(Command<'a>, usize), ParseError>
where
    I: Iterator<Item = &'a [u8]>,
{
    let mut keys = Vec::new();
    for token in tokens {
        validate_key(token, line_consumed)?;
        keys.push(token);
    }
    if keys.is_empty() {
        return Err(ParseError::BadCommandLine {
            skip: line_consumed,
        });
    }
    let cmd = if with_cas {
        Command::Gets { keys }
    } else {
        Command::Get { keys }
    };
    Ok((cmd, line_consumed))
}

fn parse_storage<'a, I>(
    verb: &[u8],
    mut tokens: I,
    buf: &'a [u8],
    line_consumed: usize,
    limits: &ParseLimits,
) -> Result<(Command<'a>, usize), ParseError>
where
    I: Iterator<Item = &'a [u8]>,
{
    let key = required_key(tokens.next(), line_consumed)?;
    let flags = tokens
        .next()
        .and_then(parse_u32)
        .ok_or(ParseError::BadCommandLine {
            skip: line_consumed,
        })?;
    let exptime = tokens
        .next()
        .and_then(parse_i64)
        .ok_or(ParseError::BadCommandLine {
            skip: line_consumed,
        })?;
    let bytes = tokens
        .next()
        .and_then(parse_usize)
        .ok_or(ParseError::BadCommandLine {
            skip: line_consumed,
        })?;

    let cas = if verb == b"cas" {
        Some(
            tokens
                .next()
                .and_then(parse_u64)
                .ok_or(ParseError::BadCommandLine {
                    skip: line_consumed,
                })?,
        )
    } else {
        None
    };

    let noreply = parse_noreply(&mut tokens, line_consumed)?;
    end_of_line(tokens, line_consumed)?;

    let frame = line_consumed
        .saturating_add(bytes)
        .saturating_add(2);

    if bytes > limits.max_value_len {
        return Err(ParseError::ValueTooLarge { skip: frame });
    }
    if buf.len() < frame {
        return Err(ParseError::Incomplete);
    }

    let data = &buf[line_consumed..line_consumed + bytes];
    if &buf[line_consumed + bytes..frame] != b"\r\n" {
        return Err(ParseError::BadDataChunk { skip: frame });
    }

    let cmd = match (verb, cas) {
        (b"set", None) => Command::Set {
            key,
            flags,
            exptime,
            data,
            noreply,
        },
        (b"add", None) => Command::Add {
            key,
            flags,
            exptime,
            data,
            noreply,
        },
        (b"replace", None) => Command::Replace {
            key,
            flags,
            exptime,
            data,
            noreply,
        },
        (b"cas", Some(cas)) => Command::Cas {
            key,
            flags,
            exptime,
            data,
            cas,
            noreply,
        },
        _ => unreachable!("storage verb/cas pairing is fixed above"),
    };
    Ok((cmd, frame))
}

fn required_key(token: Option<&[u8]>, skip: usize) -> Result<&[u8], ParseError> {
    let key = token.ok_or(ParseError::BadCommandLine { skip })?;
    validate_key(key, skip)?;
    Ok(key)
}

fn validate_key(key: &[u8], skip: usize) -> Result<(), ParseError> {
    if key.is_empty() {
        return Err(ParseError::BadCommandLine { skip });
    }
    if key.len() > MAX_KEY_LEN {
        return Err(ParseError::KeyTooLong { skip });
    }
    if key.iter().any(|&b| b <= 0x20 || b == 0x7f) {
        return Err(ParseError::BadCommandLine { skip });
    }
    Ok(())
}

fn parse_noreply<'a, I>(tokens: &mut I, skip: usize) -> Result<bool, ParseError>
where
    I: Iterator<Item = &'a [u8]>,
{
    match tokens.next() {
        None => Ok(false),
        Some(b"noreply") => Ok(true),
        Some(_) => Err(ParseError::BadCommandLine { skip }),
    }
}

fn end_of_line<'a, I>(mut tokens: I, skip: usize) -> Result<(), ParseError>
where
    I: Iterator<Item = &'a [u8]>,
{
    if tokens.next().is_some() {
        return Err(ParseError::BadCommandLine { skip });
    }
    Ok(())
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn parse_u32(token: &[u8]) -> Option<u32> {
    std::str::from_utf8(token).ok()?.parse().ok()
}

fn parse_u64(token: &[u8]) -> Option<u64> {
    std::str::from_utf8(token).ok()?.parse().ok()
}

fn parse_i64(token: &[u8]) -> Option<i64> {
    std::str::from_utf8(token).ok()?.parse().ok()
}

fn parse_usize(token: &[u8]) -> Option<usize> {
    std::str::from_utf8(token).ok()?.parse().ok()
}

//! Client-side request encoding.
//!
//! Used by the end-to-end tests and client tooling to build protocol frames
//! without hand-writing byte strings.

use std::io::Write;

/// A request builder for encoding commands.
#[derive(Debug, Clone)]
pub enum Request<'a> {
    /// `get <key1> <key2> ...\r\n`
    Get { keys: &'a [&'a [u8]] },
    /// `gets <key1> <key2> ...\r\n`
    Gets { keys: &'a [&'a [u8]] },
    /// `set|add|replace <key> <flags> <exptime> <bytes>[ noreply]\r\n<data>\r\n`
    Store {
        verb: StoreVerb,
        key: &'a [u8],
        value: &'a [u8],
        flags: u32,
        exptime: i64,
        noreply: bool,
    },
    /// `cas <key> <flags> <exptime> <bytes> <cas>[ noreply]\r\n<data>\r\n`
    Cas {
        key: &'a [u8],
        value: &'a [u8],
        flags: u32,
        exptime: i64,
        cas: u64,
        noreply: bool,
    },
    /// `delete <key>[ noreply]\r\n`
    Delete { key: &'a [u8], noreply: bool },
    /// `incr|decr <key> <delta>[ noreply]\r\n`
    Arith {
        incr: bool,
        key: &'a [u8],
        delta: u64,
        noreply: bool,
    },
    /// `touch <key> <exptime>[ noreply]\r\n`
    Touch {
        key: &'a [u8],
        exptime: i64,
        noreply: bool,
    },
    /// `flush_all [<delay>][ noreply]\r\n`
    FlushAll { delay: u32, noreply: bool },
    /// `stats\r\n`
    Stats,
    /// `version\r\n`
    Version,
    /// `quit\r\n`
    Quit,
}

/// Verb for the three plain storage commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreVerb {
    Set,
    Add,
    Replace,
}

impl StoreVerb {
    fn as_bytes(self) -> &'static [u8] {
        match self {
            Self::Set => b"set",
            Self::Add => b"add",
            Self::Replace => b"replace",
        }
    }
}

impl<'a> Request<'a> {
    pub fn set(key: &'a [u8], value: &'a [u8]) -> StoreBuilder<'a> {
        StoreBuilder::new(StoreVerb::Set, key, value)
    }

    pub fn add(key: &'a [u8], value: &'a [u8]) -> StoreBuilder<'a> {
        StoreBuilder::new(StoreVerb::Add, key, value)
    }

    pub fn replace(key: &'a [u8], value: &'a [u8]) -> StoreBuilder<'a> {
        StoreBuilder::new(StoreVerb::Replace, key, value)
    }

    pub fn delete(key: &'a [u8]) -> Self {
        Request::Delete {
            key,
            noreply: false,
        }
    }

    pub fn incr(key: &'a [u8], delta: u64) -> Self {
        Request::Arith {
            incr: true,
            key,
            delta,
            noreply: false,
        }
    }

    pub fn decr(key: &'a [u8], delta: u64) -> Self {
        Request::Arith {
            incr: false,
            key,
            delta,
            noreply: false,
        }
    }

    pub fn version() -> Self {
        Request::Version
    }

    pub fn quit() -> Self {
        Request::Quit
    }

    /// Encode this request into a buffer, returning the bytes written.
    pub fn encode(&self, buf: &mut [u8]) -> usize {
        let mut cursor = std::io::Cursor::new(buf);
        self.write_to(&mut cursor);
        cursor.position() as usize
    }

    fn write_to(&self, out: &mut std::io::Cursor<&mut [u8]>) {
        match self {
            Request::Get { keys } => write_keys(out, b"get", keys),
            Request::Gets { keys } => write_keys(out, b"gets", keys),
            Request::Store {
                verb,
                key,
                value,
                flags,
                exptime,
                noreply,
            } => {
                out.write_all(verb.as_bytes()).unwrap();
                out.write_all(b" ").unwrap();
                out.write_all(key).unwrap();
                write!(out, " {} {} {}", flags, exptime, value.len()).unwrap();
                if *noreply {
                    out.write_all(b" noreply").unwrap();
                }
                out.write_all(b"\r\n").unwrap();
                out.write_all(value).unwrap();
                out.write_all(b"\r\n").unwrap();
            }
            Request::Cas {
                key,
                value,
                flags,
                exptime,
                cas,
                noreply,
            } => {
                out.write_all(b"cas ").unwrap();
                out.write_all(key).unwrap();
                write!(out, " {} {} {} {}", flags, exptime, value.len(), cas).unwrap();
                if *noreply {
                    out.write_all(b" noreply").unwrap();
                }
                out.write_all(b"\r\n").unwrap();
                out.write_all(value).unwrap();
                out.write_all(b"\r\n").unwrap();
            }
            Request::Delete { key, noreply } => {
                out.write_all(b"delete ").unwrap();
                out.write_all(key).unwrap();
                if *noreply {
                    out.write_all(b" noreply").unwrap();
                }
                out.write_all(b"\r\n").unwrap();
            }
            Request::Arith {
                incr,
                key,
                delta,
                noreply,
            } => {
                out.write_all(if *incr { b"incr " } else { b"decr " })
                    .unwrap();
                out.write_all(key).unwrap();
                write!(out, " {}", delta).unwrap();
                if *noreply {
                    out.write_all(b" noreply").unwrap();
                }
                out.write_all(b"\r\n").unwrap();
            }
            Request::Touch {
                key,
                exptime,
                noreply,
            } => {
                out.write_all(b"touch ").unwrap();
                out.write_all(key).unwrap();
                write!(out, " {}", exptime).unwrap();
                if *noreply {
                    out.write_all(b" noreply").unwrap();
                }
                out.write_all(b"\r\n").unwrap();
            }
            Request::FlushAll { delay, noreply } => {
                out.write_all(b"flush_all").unwrap();
                if *delay > 0 {
                    write!(out, " {}", delay).unwrap();
                }
                if *noreply {
                    out.write_all(b" noreply").unwrap();
                }
                out.write_all(b"\r\n").unwrap();
            }
            Request::Stats => out.write_all(b"stats\r\n").unwrap(),
            Request::Version => out.write_all(b"version\r\n").unwrap(),
            Request::Quit => out.write_all(b"quit\r\n").unwrap(),
        }
    }
}

fn write_keys(out: &mut std::io::Cursor<&mut [u8]>, verb: &[u8], keys: &[&[u8]]) {
    out.write_all(verb).unwrap();
    for key in keys {
        out.write_all(b" ").unwrap();
        out.write_all(key).unwrap();
    }
    out.write_all(b"\r\n").unwrap();
}

/// Builder for the plain storage commands.
#[derive(Debug, Clone)]
pub struct StoreBuilder<'a> {
    verb: StoreVerb,
    key: &'a [u8],
    value: &'a [u8],
    flags: u32,
    exptime: i64,
    noreply: bool,
}

impl<'a> StoreBuilder<'a> {
    fn new(verb: StoreVerb, key: &'a [u8], value: &'a [u8]) -> Self {
        Self {
            verb,
            key,
            value,
            flags: 0,
            exptime: 0,
            noreply: false,
        }
    }

    pub fn flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn exptime(mut self, exptime: i64) -> Self {
        self.exptime = exptime;
        self
    }

    pub fn noreply(mut self) -> Self {
        self.noreply = true;
        self
    }

    pub fn build(self) -> Request<'a> {
        Request::Store {
            verb: self.verb,
            key: self.key,
            value: self.value,
            flags: self.flags,
            exptime: self.exptime,
            noreply: self.noreply,
        }
    }

    pub fn encode(self, buf: &mut [u8]) -> usize {
        self.build().encode(buf)
    }
}

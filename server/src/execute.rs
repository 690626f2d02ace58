//! Command execution - bridges protocol commands to cache operations.

use bytes::BytesMut;
use cuckoo_cache::{CacheError, CoarseClock, CuckooCache, StoreOutcome};
use protocol_memcache::Command;

use crate::metrics::{
    ARITHMETIC, DELETES, FLUSHES, GETS, HITS, MISSES, SETS, TOUCHES,
};

/// Relative expiry values above this are absolute unix timestamps
/// (memcached convention: thirty days).
pub const REALTIME_MAXDELTA: i64 = 60 * 60 * 24 * 30;

/// Shared context threaded into command execution.
pub struct ExecContext<'a> {
    pub cache: &'a CuckooCache,
    pub clock: &'a CoarseClock,
    /// Coarse time the server started, for the uptime stat.
    pub start_time: u32,
}

/// Convert a protocol exptime to an absolute coarse expiry.
///
/// Zero means never; negative means already expired; values up to thirty
/// days are relative to now; anything larger is an absolute timestamp.
pub fn normalize_exptime(exptime: i64, now: u32) -> u32 {
    if exptime == 0 {
        0
    } else if exptime < 0 {
        now.saturating_sub(1).max(1)
    } else if exptime <= REALTIME_MAXDELTA {
        now.saturating_add(exptime as u32)
    } else {
        exptime.min(u32::MAX as i64) as u32
    }
}

/// Execute a command against the cache, serializing the response into
/// `write_buf`. Returns `true` when the connection should close (QUIT).
pub fn execute(cmd: &Command<'_>, ctx: &ExecContext<'_>, write_buf: &mut BytesMut) -> bool {
    match cmd {
        Command::Get { keys } => {
            retrieve(keys, false, ctx, write_buf);
            false
        }
        Command::Gets { keys } => {
            retrieve(keys, true, ctx, write_buf);
            false
        }
        Command::Set {
            key,
            flags,
            exptime,
            data,
            ..
        } => {
            SETS.increment();
            let expire = normalize_exptime(*exptime, ctx.clock.now());
            match ctx.cache.set(key, data, *flags, expire) {
                Ok(()) => write_buf.extend_from_slice(b"STORED\r\n"),
                Err(e) => write_store_error(e, write_buf),
            }
            false
        }
        Command::Add {
            key,
            flags,
            exptime,
            data,
            ..
        } => {
            SETS.increment();
            let expire = normalize_exptime(*exptime, ctx.clock.now());
            match ctx.cache.add(key, data, *flags, expire) {
                Ok(outcome) => write_outcome(outcome, write_buf),
                Err(e) => write_store_error(e, write_buf),
            }
            false
        }
        Command::Replace {
            key,
            flags,
            exptime,
            data,
            ..
        } => {
            SETS.increment();
            let expire = normalize_exptime(*exptime, ctx.clock.now());
            match ctx.cache.replace(key, data, *flags, expire) {
                Ok(outcome) => write_outcome(outcome, write_buf),
                Err(e) => write_store_error(e, write_buf),
            }
            false
        }
        Command::Cas {
            key,
            flags,
            exptime,
            data,
            cas,
            ..
        } => {
            SETS.increment();
            let expire = normalize_exptime(*exptime, ctx.clock.now());
            match ctx.cache.cas(key, data, *flags, expire, *cas) {
                Ok(outcome) => write_outcome(outcome, write_buf),
                Err(e) => write_store_error(e, write_buf),
            }
            false
        }
        Command::Delete { key, .. } => {
            DELETES.increment();
            if ctx.cache.delete(key) {
                write_buf.extend_from_slice(b"DELETED\r\n");
            } else {
                write_buf.extend_from_slice(b"NOT_FOUND\r\n");
            }
            false
        }
        Command::Incr { key, delta, .. } => {
            ARITHMETIC.increment();
            write_arith_result(ctx.cache.incr(key, *delta), write_buf);
            false
        }
        Command::Decr { key, delta, .. } => {
            ARITHMETIC.increment();
            write_arith_result(ctx.cache.decr(key, *delta), write_buf);
            false
        }
        Command::Touch { key, exptime, .. } => {
            TOUCHES.increment();
            let expire = normalize_exptime(*exptime, ctx.clock.now());
            if ctx.cache.touch(key, expire) {
                write_buf.extend_from_slice(b"TOUCHED\r\n");
            } else {
                write_buf.extend_from_slice(b"NOT_FOUND\r\n");
            }
            false
        }
        Command::FlushAll { delay, .. } => {
            FLUSHES.increment();
            ctx.cache.flush(*delay);
            write_buf.extend_from_slice(b"OK\r\n");
            false
        }
        Command::Stats => {
            write_stats(ctx, write_buf);
            false
        }
        Command::Version => {
            write_buf.extend_from_slice(b"VERSION ");
            write_buf.extend_from_slice(env!("CARGO_PKG_VERSION").as_bytes());
            write_buf.extend_from_slice(b"\r\n");
            false
        }
        Command::Quit => true,
    }
}

fn retrieve(keys: &[&[u8]], with_cas: bool, ctx: &ExecContext<'_>, write_buf: &mut BytesMut) {
    for key in keys {
        GETS.increment();
        match ctx.cache.get(key) {
            Some(guard) => {
                HITS.increment();
                let mut len_buf = itoa::Buffer::new();
                write_buf.extend_from_slice(b"VALUE ");
                write_buf.extend_from_slice(key);
                write_buf.extend_from_slice(b" ");
                write_buf.extend_from_slice(len_buf.format(guard.flags()).as_bytes());
                write_buf.extend_from_slice(b" ");
                write_buf.extend_from_slice(len_buf.format(guard.value().len()).as_bytes());
                if with_cas {
                    write_buf.extend_from_slice(b" ");
                    write_buf.extend_from_slice(len_buf.format(guard.cas()).as_bytes());
                }
                write_buf.extend_from_slice(b"\r\n");
                write_buf.extend_from_slice(guard.value());
                write_buf.extend_from_slice(b"\r\n");
            }
            None => {
                MISSES.increment();
            }
        }
    }
    write_buf.extend_from_slice(b"END\r\n");
}

fn write_outcome(outcome: StoreOutcome, write_buf: &mut BytesMut) {
    let line: &[u8] = match outcome {
        StoreOutcome::Stored => b"STORED\r\n",
        StoreOutcome::NotStored => b"NOT_STORED\r\n",
        StoreOutcome::Exists => b"EXISTS\r\n",
        StoreOutcome::NotFound => b"NOT_FOUND\r\n",
    };
    write_buf.extend_from_slice(line);
}

fn write_store_error(e: CacheError, write_buf: &mut BytesMut) {
    match e {
        CacheError::ItemTooLarge
        | CacheError::KeyTooLong
        | CacheError::InvalidKey
        | CacheError::NotNumeric => {
            write_buf.extend_from_slice(b"CLIENT_ERROR ");
            write_buf.extend_from_slice(e.to_string().as_bytes());
            write_buf.extend_from_slice(b"\r\n");
        }
        _ => {
            write_buf.extend_from_slice(b"SERVER_ERROR ");
            write_buf.extend_from_slice(e.to_string().as_bytes());
            write_buf.extend_from_slice(b"\r\n");
        }
    }
}

fn write_arith_result(result: Result<u64, CacheError>, write_buf: &mut BytesMut) {
    match result {
        Ok(value) => {
            let mut len_buf = itoa::Buffer::new();
            write_buf.extend_from_slice(len_buf.format(value).as_bytes());
            write_buf.extend_from_slice(b"\r\n");
        }
        Err(CacheError::KeyNotFound) => {
            write_buf.extend_from_slice(b"NOT_FOUND\r\n");
        }
        Err(e) => write_store_error(e, write_buf),
    }
}

fn write_stats(ctx: &ExecContext<'_>, write_buf: &mut BytesMut) {
    let now = ctx.clock.now();
    let mut stat = |name: &str, value: u64| {
        let mut len_buf = itoa::Buffer::new();
        write_buf.extend_from_slice(b"STAT ");
        write_buf.extend_from_slice(name.as_bytes());
        write_buf.extend_from_slice(b" ");
        write_buf.extend_from_slice(len_buf.format(value).as_bytes());
        write_buf.extend_from_slice(b"\r\n");
    };

    stat("pid", std::process::id() as u64);
    stat("uptime", now.saturating_sub(ctx.start_time) as u64);
    stat("cmd_get", GETS.value());
    stat("cmd_set", SETS.value());
    stat("get_hits", HITS.value());
    stat("get_misses", MISSES.value());
    stat("curr_items", ctx.cache.item_count() as u64);
    stat("max_items", ctx.cache.capacity() as u64);
    stat("evictions", ctx.cache.evictions());
    stat("expirations", ctx.cache.expirations());

    write_buf.extend_from_slice(b"STAT version ");
    write_buf.extend_from_slice(env!("CARGO_PKG_VERSION").as_bytes());
    write_buf.extend_from_slice(b"\r\nEND\r\n");
}

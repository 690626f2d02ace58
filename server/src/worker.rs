//! Worker reactor.
//!
//! Each worker is a strictly single-threaded event loop over its owned
//! connections. Storage operations are applied synchronously inside the
//! loop; only socket I/O can block, and it never does (non-blocking
//! sockets, readiness-driven).

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use crossbeam_channel::Receiver;
use cuckoo_cache::{CoarseClock, CuckooCache};
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Registry, Token};
use protocol_memcache::ParseLimits;
use slab::Slab;

use crate::connection::Connection;
use crate::execute::ExecContext;
use crate::metrics::{CONNECTIONS_ACTIVE, CONNECTIONS_DROPPED, CONNECTIONS_TIMED_OUT};

/// Token reserved for the accept-ring waker; connection tokens are slab
/// keys, which stay far below this.
pub const WAKER_TOKEN: Token = Token(1 << 30);

/// Per-worker runtime settings distilled from the configuration.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Connection cap for this worker.
    pub poolsize: usize,
    /// Initial buffer capacity for pooled connection buffers.
    pub buf_init_size: usize,
    /// Free-list cap for recycled buffers.
    pub buf_pool_cap: usize,
    /// Event batch sizing hint.
    pub events_capacity: usize,
    /// Requests drained per connection per pass between write flushes.
    pub request_quota: usize,
    /// Seconds of inactivity before a connection is closed; 0 disables.
    pub idle_timeout: u32,
}

/// Everything a worker thread owns or shares.
pub struct WorkerContext {
    pub poll: Poll,
    pub accept_rx: Receiver<(TcpStream, SocketAddr)>,
    pub cache: Arc<CuckooCache>,
    pub clock: Arc<CoarseClock>,
    pub shutdown: Arc<AtomicBool>,
    pub settings: WorkerSettings,
    pub start_time: u32,
}

/// A connection plus the socket that feeds it.
struct Session {
    stream: TcpStream,
    conn: Connection,
}

/// Recycles connection buffers to avoid allocator pressure per accept.
struct BufferPool {
    free: Vec<BytesMut>,
    buf_size: usize,
    cap: usize,
}

impl BufferPool {
    fn new(buf_size: usize, cap: usize) -> Self {
        Self {
            free: Vec::with_capacity(cap.min(64)),
            buf_size,
            cap,
        }
    }

    fn get(&mut self) -> BytesMut {
        self.free
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.buf_size))
    }

    fn put(&mut self, mut buf: BytesMut) {
        if self.free.len() < self.cap {
            buf.clear();
            self.free.push(buf);
        }
    }
}

/// Run the worker event loop until shutdown.
pub fn run_worker(mut ctx: WorkerContext) -> io::Result<()> {
    let registry = ctx.poll.registry().try_clone()?;
    let mut events = Events::with_capacity(ctx.settings.events_capacity.max(8));
    let mut sessions: Slab<Session> = Slab::with_capacity(ctx.settings.poolsize);
    let mut pool = BufferPool::new(ctx.settings.buf_init_size, ctx.settings.buf_pool_cap);
    let mut recv_buf = vec![0u8; ctx.settings.buf_init_size.max(4096)];
    let limits = ParseLimits {
        max_value_len: ctx.cache.max_value_len(),
    };
    let mut last_sweep = ctx.clock.now();

    loop {
        match ctx.poll.poll(&mut events, Some(Duration::from_millis(100))) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }

        ctx.clock.refresh();
        if ctx.shutdown.load(Ordering::Relaxed) {
            break;
        }

        drain_accepts(&ctx, &registry, &mut sessions, &mut pool);

        let exec = ExecContext {
            cache: &ctx.cache,
            clock: &ctx.clock,
            start_time: ctx.start_time,
        };

        for event in events.iter() {
            let token = event.token();
            if token == WAKER_TOKEN {
                continue;
            }
            let key = token.0;
            if !sessions.contains(key) {
                continue;
            }

            let mut need_close = false;
            if event.is_readable() {
                need_close = handle_readable(
                    &mut sessions,
                    key,
                    &mut recv_buf,
                    &exec,
                    &limits,
                    &ctx.settings,
                    ctx.clock.now(),
                );
            }
            if !need_close && event.is_writable() {
                need_close = handle_writable(
                    &mut sessions,
                    key,
                    &mut recv_buf,
                    &exec,
                    &limits,
                    &ctx.settings,
                    ctx.clock.now(),
                );
            }
            if need_close {
                close_session(&mut sessions, key, &registry, &mut pool);
            }
        }

        // Idle sweep, at most once per coarse second.
        let now = ctx.clock.now();
        if ctx.settings.idle_timeout > 0 && now != last_sweep {
            last_sweep = now;
            let idle: Vec<usize> = sessions
                .iter()
                .filter(|(_, s)| now.saturating_sub(s.conn.last_active()) > ctx.settings.idle_timeout)
                .map(|(key, _)| key)
                .collect();
            for key in idle {
                CONNECTIONS_TIMED_OUT.increment();
                tracing::debug!(key, "closing idle connection");
                close_session(&mut sessions, key, &registry, &mut pool);
            }
        }
    }

    // Shutdown: drop all sessions, closing their sockets.
    for key in sessions.iter().map(|(k, _)| k).collect::<Vec<_>>() {
        close_session(&mut sessions, key, &registry, &mut pool);
    }
    Ok(())
}

/// Pull accepted connections off the hand-off ring.
fn drain_accepts(
    ctx: &WorkerContext,
    registry: &Registry,
    sessions: &mut Slab<Session>,
    pool: &mut BufferPool,
) {
    while let Ok((mut stream, addr)) = ctx.accept_rx.try_recv() {
        if sessions.len() >= ctx.settings.poolsize {
            CONNECTIONS_DROPPED.increment();
            tracing::debug!(%addr, "worker at connection cap, dropping");
            continue;
        }

        let entry = sessions.vacant_entry();
        let key = entry.key();
        if let Err(e) = registry.register(
            &mut stream,
            Token(key),
            Interest::READABLE | Interest::WRITABLE,
        ) {
            CONNECTIONS_DROPPED.increment();
            tracing::warn!(%addr, "failed to register connection: {e}");
            continue;
        }

        CONNECTIONS_ACTIVE.increment();
        tracing::debug!(%addr, key, "connection accepted");
        entry.insert(Session {
            stream,
            conn: Connection::new(pool.get(), pool.get(), ctx.clock.now()),
        });
    }
}

/// Drain buffered requests, then read until the socket would block,
/// processing frames as they complete. Returns `true` when the session must
/// close.
///
/// The leading drain matters after backpressure: readiness is
/// edge-triggered, so bytes parked in the read buffer (and in the kernel)
/// while reads were paused get no fresh readable event.
fn handle_readable(
    sessions: &mut Slab<Session>,
    key: usize,
    recv_buf: &mut [u8],
    exec: &ExecContext<'_>,
    limits: &ParseLimits,
    settings: &WorkerSettings,
    now: u32,
) -> bool {
    {
        let Some(session) = sessions.get_mut(key) else {
            return false;
        };
        if session.conn.should_close() {
            return !session.conn.has_pending_write();
        }
        if session.conn.should_read()
            && !session.conn.is_read_buf_empty()
            && process_and_flush(session, exec, limits, settings).is_err()
        {
            return true;
        }
        if session.conn.should_close() {
            return !session.conn.has_pending_write();
        }
    }

    loop {
        let Some(session) = sessions.get_mut(key) else {
            return false;
        };
        if !session.conn.should_read() {
            return false;
        }

        match session.stream.read(recv_buf) {
            Ok(0) => return true,
            Ok(n) => {
                session.conn.touch_activity(now);
                session.conn.append_recv_data(&recv_buf[..n]);
                if process_and_flush(session, exec, limits, settings).is_err() {
                    return true;
                }
                if session.conn.should_close() {
                    // Close now if replies are drained, otherwise once the
                    // write side catches up.
                    return !session.conn.has_pending_write();
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return false,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => return true,
        }
    }
}

/// Flush pending writes, then resume reading and processing paused by
/// backpressure. Returns `true` when the session must close.
fn handle_writable(
    sessions: &mut Slab<Session>,
    key: usize,
    recv_buf: &mut [u8],
    exec: &ExecContext<'_>,
    limits: &ParseLimits,
    settings: &WorkerSettings,
    now: u32,
) -> bool {
    {
        let Some(session) = sessions.get_mut(key) else {
            return false;
        };

        if flush_writes(session).is_err() {
            return true;
        }
        if session.conn.should_close() {
            return !session.conn.has_pending_write();
        }
    }

    handle_readable(sessions, key, recv_buf, exec, limits, settings, now)
}

/// Alternate processing passes with write flushes so pipelined batches
/// complete without waiting for another readiness event.
fn process_and_flush(
    session: &mut Session,
    exec: &ExecContext<'_>,
    limits: &ParseLimits,
    settings: &WorkerSettings,
) -> io::Result<()> {
    loop {
        let before = session.conn.read_buf_len();
        session.conn.process(exec, limits, settings.request_quota);
        flush_writes(session)?;

        if session.conn.should_close()
            || session.conn.is_read_buf_empty()
            || session.conn.read_buf_len() == before
        {
            return Ok(());
        }
    }
}

fn flush_writes(session: &mut Session) -> io::Result<()> {
    while session.conn.has_pending_write() {
        match session.stream.write(session.conn.pending_write_data()) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => session.conn.advance_write(n),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn close_session(
    sessions: &mut Slab<Session>,
    key: usize,
    registry: &Registry,
    pool: &mut BufferPool,
) {
    if !sessions.contains(key) {
        return;
    }
    let mut session = sessions.remove(key);
    let _ = registry.deregister(&mut session.stream);
    let (read_buf, write_buf) = session.conn.into_buffers();
    pool.put(read_buf);
    pool.put(write_buf);
    CONNECTIONS_ACTIVE.decrement();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_pool_recycles() {
        let mut pool = BufferPool::new(1024, 2);

        let mut a = pool.get();
        a.extend_from_slice(b"junk");
        pool.put(a);

        let b = pool.get();
        // Recycled buffer comes back empty.
        assert!(b.is_empty());
        assert!(b.capacity() >= 1024);
    }

    #[test]
    fn test_buffer_pool_cap() {
        let mut pool = BufferPool::new(64, 1);
        pool.put(BytesMut::with_capacity(64));
        pool.put(BytesMut::with_capacity(64));
        assert_eq!(pool.free.len(), 1);
    }
}

//! Per-connection state for the cache server.

use bytes::{Buf, BytesMut};
use protocol_memcache::{Command, ParseError, ParseLimits};

use crate::execute::{execute, ExecContext};
use crate::metrics::PROTOCOL_ERRORS;

/// Per-connection state: buffers, parser position and lifecycle flags.
///
/// The connection does not own its socket; the worker keeps the stream
/// beside it and drives reads and writes.
pub struct Connection {
    read_buf: BytesMut,
    write_buf: BytesMut,
    write_pos: usize,
    should_close: bool,
    /// Bytes of a rejected frame still to discard; may exceed what is
    /// currently buffered (the remainder is swallowed as it streams in).
    swallow: usize,
    last_active: u32,
}

impl Connection {
    /// Maximum pending write buffer size before applying backpressure.
    /// Stop processing new requests if we have this much unsent data.
    pub const MAX_PENDING_WRITE: usize = 256 * 1024;

    /// Build a connection around pooled buffers.
    pub fn new(read_buf: BytesMut, write_buf: BytesMut, now: u32) -> Self {
        Self {
            read_buf,
            write_buf,
            write_pos: 0,
            should_close: false,
            swallow: 0,
            last_active: now,
        }
    }

    /// Hand the buffers back for pooling.
    pub fn into_buffers(self) -> (BytesMut, BytesMut) {
        (self.read_buf, self.write_buf)
    }

    /// Append received data to the read buffer.
    #[inline]
    pub fn append_recv_data(&mut self, data: &[u8]) {
        self.read_buf.extend_from_slice(data);
    }

    /// Record activity for the idle-timeout sweep.
    #[inline]
    pub fn touch_activity(&mut self, now: u32) {
        self.last_active = now;
    }

    #[inline]
    pub fn last_active(&self) -> u32 {
        self.last_active
    }

    /// Drain the codec: parse and execute buffered requests, serializing
    /// responses in request order. Stops at `max_requests` (fairness cap
    /// between write flushes), on backpressure, or when input runs short.
    pub fn process(&mut self, ctx: &ExecContext<'_>, limits: &ParseLimits, max_requests: usize) {
        if self.should_close {
            return;
        }
        if self.write_pos >= self.write_buf.len() {
            self.write_buf.clear();
            self.write_pos = 0;
        }

        let mut processed = 0;

        loop {
            if self.swallow > 0 {
                let n = self.swallow.min(self.read_buf.len());
                self.read_buf.advance(n);
                self.swallow -= n;
                if self.swallow > 0 {
                    break;
                }
            }

            if self.read_buf.is_empty() {
                break;
            }
            if self.pending_write_len() > Self::MAX_PENDING_WRITE {
                break;
            }
            if processed >= max_requests {
                break;
            }

            match Command::parse(&self.read_buf, limits) {
                Ok((cmd, consumed)) => {
                    let close = if cmd.noreply() {
                        let mut sink = BytesMut::new();
                        execute(&cmd, ctx, &mut sink)
                    } else {
                        execute(&cmd, ctx, &mut self.write_buf)
                    };
                    self.read_buf.advance(consumed);
                    processed += 1;
                    if close {
                        self.should_close = true;
                        break;
                    }
                }
                Err(ParseError::Incomplete) => break,
                Err(e) => {
                    PROTOCOL_ERRORS.increment();
                    if e.is_unknown_command() {
                        self.write_buf.extend_from_slice(b"ERROR\r\n");
                    } else {
                        self.write_buf.extend_from_slice(b"CLIENT_ERROR ");
                        self.write_buf.extend_from_slice(e.to_string().as_bytes());
                        self.write_buf.extend_from_slice(b"\r\n");
                    }
                    let skip = e.skip();
                    let n = skip.min(self.read_buf.len());
                    self.read_buf.advance(n);
                    self.swallow = skip - n;
                    processed += 1;
                }
            }
        }
    }

    /// Check if we should accept more data from the socket.
    /// Returns false when we have too much pending write data.
    #[inline]
    pub fn should_read(&self) -> bool {
        self.pending_write_len() <= Self::MAX_PENDING_WRITE
    }

    #[inline]
    pub fn pending_write_len(&self) -> usize {
        self.write_buf.len().saturating_sub(self.write_pos)
    }

    #[inline]
    pub fn has_pending_write(&self) -> bool {
        self.write_pos < self.write_buf.len()
    }

    #[inline]
    pub fn pending_write_data(&self) -> &[u8] {
        &self.write_buf[self.write_pos..]
    }

    #[inline]
    pub fn advance_write(&mut self, n: usize) {
        self.write_pos += n;
    }

    #[inline]
    pub fn should_close(&self) -> bool {
        self.should_close
    }

    #[inline]
    pub fn is_read_buf_empty(&self) -> bool {
        self.read_buf.is_empty()
    }

    #[inline]
    pub fn read_buf_len(&self) -> usize {
        self.read_buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cuckoo_cache::{CoarseClock, CuckooCache, CuckooConfig};
    use std::sync::Arc;

    struct Fixture {
        cache: Arc<CuckooCache>,
        clock: Arc<CoarseClock>,
        limits: ParseLimits,
    }

    impl Fixture {
        fn new() -> Self {
            let clock = Arc::new(CoarseClock::new());
            let cache = Arc::new(
                CuckooCache::new(
                    CuckooConfig::new().item_size(512).nitem(1024),
                    clock.clone(),
                )
                .unwrap(),
            );
            let limits = ParseLimits {
                max_value_len: cache.max_value_len(),
            };
            Self {
                cache,
                clock,
                limits,
            }
        }

        fn connection(&self) -> Connection {
            Connection::new(BytesMut::new(), BytesMut::new(), self.clock.now())
        }

        fn process(&self, conn: &mut Connection) {
            let ctx = ExecContext {
                cache: &self.cache,
                clock: &self.clock,
                start_time: self.clock.now(),
            };
            conn.process(&ctx, &self.limits, 128);
        }
    }

    #[test]
    fn test_partial_request() {
        let f = Fixture::new();
        let mut conn = f.connection();

        conn.append_recv_data(b"get fo");
        f.process(&mut conn);
        assert!(!conn.has_pending_write());

        conn.append_recv_data(b"o\r\n");
        f.process(&mut conn);
        assert_eq!(conn.pending_write_data(), b"END\r\n");
    }

    #[test]
    fn test_pipelined_requests_in_order() {
        let f = Fixture::new();
        let mut conn = f.connection();

        conn.append_recv_data(b"set a 0 0 1\r\n1\r\nset b 0 0 1\r\n2\r\nget a b\r\n");
        f.process(&mut conn);

        assert_eq!(
            conn.pending_write_data(),
            b"STORED\r\nSTORED\r\nVALUE a 0 1\r\n1\r\nVALUE b 0 1\r\n2\r\nEND\r\n".as_slice()
        );
    }

    #[test]
    fn test_complete_plus_partial() {
        let f = Fixture::new();
        let mut conn = f.connection();

        conn.append_recv_data(b"get foo\r\nget ba");
        f.process(&mut conn);
        assert_eq!(conn.pending_write_data(), b"END\r\n");

        conn.append_recv_data(b"r\r\n");
        f.process(&mut conn);
        assert_eq!(conn.pending_write_data(), b"END\r\nEND\r\n");
    }

    #[test]
    fn test_partial_write_advance() {
        let f = Fixture::new();
        let mut conn = f.connection();

        conn.append_recv_data(b"get foo\r\n");
        f.process(&mut conn);

        let pending = conn.pending_write_data().len();
        conn.advance_write(2);
        assert!(conn.has_pending_write());
        assert_eq!(conn.pending_write_data().len(), pending - 2);

        conn.advance_write(pending - 2);
        assert!(!conn.has_pending_write());
    }

    #[test]
    fn test_noreply_suppresses_response() {
        let f = Fixture::new();
        let mut conn = f.connection();

        conn.append_recv_data(b"set foo 0 0 3 noreply\r\nbar\r\nget foo\r\n");
        f.process(&mut conn);

        // Only the get's response; the set was applied silently.
        assert_eq!(
            conn.pending_write_data(),
            b"VALUE foo 0 3\r\nbar\r\nEND\r\n".as_slice()
        );
    }

    #[test]
    fn test_unknown_command_resyncs() {
        let f = Fixture::new();
        let mut conn = f.connection();

        conn.append_recv_data(b"bogus nonsense here\r\nget foo\r\n");
        f.process(&mut conn);

        assert_eq!(conn.pending_write_data(), b"ERROR\r\nEND\r\n");
        assert!(!conn.should_close());
    }

    #[test]
    fn test_malformed_line_is_client_error() {
        let f = Fixture::new();
        let mut conn = f.connection();

        conn.append_recv_data(b"set foo not numbers\r\nversion\r\n");
        f.process(&mut conn);

        let response = conn.pending_write_data();
        assert!(response.starts_with(b"CLIENT_ERROR bad command line format\r\n"));
        assert!(response.ends_with(b"\r\n"));
        // The following command still executed.
        assert!(String::from_utf8_lossy(response).contains("VERSION"));
    }

    #[test]
    fn test_append_rejected_and_swallowed() {
        let f = Fixture::new();
        let mut conn = f.connection();

        conn.append_recv_data(b"append foo 0 0 3\r\nbar\r\nget foo\r\n");
        f.process(&mut conn);

        assert_eq!(
            conn.pending_write_data(),
            b"CLIENT_ERROR not supported\r\nEND\r\n".as_slice()
        );
    }

    #[test]
    fn test_oversize_value_swallowed_across_reads() {
        let f = Fixture::new();
        let mut conn = f.connection();
        let oversize = f.limits.max_value_len + 100;

        // The command line alone is enough to reject the frame.
        conn.append_recv_data(format!("set big 0 0 {oversize}\r\n").as_bytes());
        f.process(&mut conn);
        assert_eq!(
            conn.pending_write_data(),
            b"CLIENT_ERROR object too large for cache\r\n".as_slice()
        );

        // Stream the doomed data block in chunks; it is discarded.
        let half = oversize / 2;
        conn.append_recv_data(&vec![b'x'; half]);
        f.process(&mut conn);
        conn.append_recv_data(&vec![b'x'; oversize - half]);
        conn.append_recv_data(b"\r\nversion\r\n");
        f.process(&mut conn);

        let text = String::from_utf8_lossy(conn.pending_write_data()).to_string();
        assert!(text.contains("VERSION"));
        // The junk never produced extra errors.
        assert_eq!(text.matches("CLIENT_ERROR").count(), 1);
    }

    #[test]
    fn test_bad_data_chunk_resyncs() {
        let f = Fixture::new();
        let mut conn = f.connection();

        conn.append_recv_data(b"set foo 0 0 3\r\nbarXXversion\r\n");
        f.process(&mut conn);

        let response = String::from_utf8_lossy(conn.pending_write_data()).to_string();
        assert!(response.starts_with("CLIENT_ERROR bad data chunk\r\n"));
        // Nothing was stored.
        conn.advance_write(conn.pending_write_len());
        conn.append_recv_data(b"get foo\r\n");
        f.process(&mut conn);
        assert!(String::from_utf8_lossy(conn.pending_write_data()).contains("END"));
    }

    #[test]
    fn test_quit_sets_should_close() {
        let f = Fixture::new();
        let mut conn = f.connection();

        conn.append_recv_data(b"quit\r\n");
        f.process(&mut conn);

        assert!(conn.should_close());
        assert!(!conn.has_pending_write());
    }

    #[test]
    fn test_request_cap_bounds_one_pass() {
        let f = Fixture::new();
        let mut conn = f.connection();

        for _ in 0..10 {
            conn.append_recv_data(b"get k\r\n");
        }
        let ctx = ExecContext {
            cache: &f.cache,
            clock: &f.clock,
            start_time: f.clock.now(),
        };
        conn.process(&ctx, &f.limits, 3);

        // Three responses drained, the rest still buffered.
        assert_eq!(conn.pending_write_data(), b"END\r\nEND\r\nEND\r\n".as_slice());
        assert!(!conn.is_read_buf_empty());

        conn.process(&ctx, &f.limits, 128);
        assert!(conn.is_read_buf_empty());
    }

    #[test]
    fn test_backpressure_stops_processing() {
        let f = Fixture::new();
        let mut conn = f.connection();
        f.cache.set(b"k", &vec![b'v'; 400], 0, 0).unwrap();

        // Enough hits to exceed MAX_PENDING_WRITE (each response ~420 bytes).
        let mut batch = Vec::new();
        for _ in 0..1000 {
            batch.extend_from_slice(b"get k\r\n");
        }
        conn.append_recv_data(&batch);

        let ctx = ExecContext {
            cache: &f.cache,
            clock: &f.clock,
            start_time: f.clock.now(),
        };
        conn.process(&ctx, &f.limits, usize::MAX);

        assert!(conn.pending_write_len() <= Connection::MAX_PENDING_WRITE + 512);
        assert!(!conn.is_read_buf_empty());
        assert!(!conn.should_read());

        // Draining the write buffer lets processing resume.
        conn.advance_write(conn.pending_write_len());
        conn.process(&ctx, &f.limits, usize::MAX);
        assert!(conn.has_pending_write());
    }

    #[test]
    fn test_activity_tracking() {
        let f = Fixture::new();
        let mut conn = f.connection();
        let t0 = conn.last_active();
        conn.touch_activity(t0 + 5);
        assert_eq!(conn.last_active(), t0 + 5);
    }
}

//! Listener socket and acceptor thread.
//!
//! One acceptor owns the listening socket and distributes accepted
//! connections round-robin over per-worker bounded rings. A full ring means
//! the worker is saturated; the connection is dropped abruptly rather than
//! queued without bound.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Sender;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};

use crate::metrics::{CONNECTIONS_ACCEPTED, CONNECTIONS_DROPPED};

const LISTENER_TOKEN: Token = Token(0);

/// Create a non-blocking listener with `SO_REUSEADDR` and the configured
/// backlog. IPv4 and IPv6 addresses are both supported.
pub fn bind(addr: SocketAddr, backlog: u32) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog as i32)?;

    let std_listener: std::net::TcpListener = socket.into();
    Ok(TcpListener::from_std(std_listener))
}

/// Spawn the acceptor thread.
///
/// `rings` and `wakers` are indexed by worker; each accepted connection is
/// handed to `rings[i]` for the next worker in rotation and the worker is
/// woken through its poll.
pub fn spawn_acceptor(
    mut listener: TcpListener,
    rings: Vec<Sender<(TcpStream, SocketAddr)>>,
    wakers: Vec<Arc<Waker>>,
    shutdown: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
    assert_eq!(rings.len(), wakers.len());

    let poll = Poll::new()?;
    poll.registry()
        .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

    std::thread::Builder::new()
        .name("acceptor".to_string())
        .spawn(move || run_acceptor(poll, listener, rings, wakers, shutdown))
}

fn run_acceptor(
    mut poll: Poll,
    listener: TcpListener,
    rings: Vec<Sender<(TcpStream, SocketAddr)>>,
    wakers: Vec<Arc<Waker>>,
    shutdown: Arc<AtomicBool>,
) {
    let mut events = Events::with_capacity(16);
    let mut next = 0usize;

    loop {
        if shutdown.load(Ordering::Relaxed) {
            return;
        }

        match poll.poll(&mut events, Some(Duration::from_millis(200))) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::error!("acceptor poll failed: {e}");
                return;
            }
        }

        loop {
            match listener.accept() {
                Ok((stream, addr)) => {
                    CONNECTIONS_ACCEPTED.increment();
                    let worker = next % rings.len();
                    next = next.wrapping_add(1);

                    match rings[worker].try_send((stream, addr)) {
                        Ok(()) => {
                            let _ = wakers[worker].wake();
                        }
                        Err(e) => {
                            // Ring full or worker gone: drop the stream,
                            // which closes the socket.
                            CONNECTIONS_DROPPED.increment();
                            tracing::debug!(%addr, worker, "hand-off ring full: {e}");
                        }
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!("accept failed: {e}");
                    break;
                }
            }
        }
    }
}

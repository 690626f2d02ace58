//! Composition root: builds the clock, cache, listener and workers, and
//! owns their lifetimes.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use cuckoo_cache::{CoarseClock, CuckooCache, CuckooConfig};
use mio::{Poll, Waker};

use crate::config::Config;
use crate::listener;
use crate::logging::LogHandle;
use crate::pidfile;
use crate::signal;
use crate::worker::{run_worker, WorkerContext, WorkerSettings, WAKER_TOKEN};
use crate::workers::{self, WorkerHandle};

/// A running server. Dropping the handle does not stop the threads; call
/// [`Server::shutdown`].
pub struct Server {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    wakers: Vec<Arc<Waker>>,
    acceptor: Option<JoinHandle<()>>,
    workers: Vec<WorkerHandle<std::io::Result<()>>>,
    pid_filename: Option<PathBuf>,
}

impl Server {
    /// Allocate storage, bind the listener and spawn the acceptor and
    /// worker threads.
    pub fn start(config: Config) -> Result<Self, Box<dyn std::error::Error>> {
        config.validate()?;

        if config.daemonize {
            tracing::warn!("daemonize requested but not supported; continuing in the foreground");
        }

        let clock = Arc::new(CoarseClock::new());
        let start_time = clock.now();

        let cuckoo_config = CuckooConfig::new()
            .item_size(config.cuckoo.item_size)
            .nitem(config.cuckoo.nitem)
            .policy(config.policy()?)
            .item_cas(config.cuckoo.item_cas);
        let cache = Arc::new(CuckooCache::new(cuckoo_config, clock.clone())?);
        tracing::info!(
            slots = config.cuckoo.nitem,
            slot_size = config.cuckoo.item_size,
            bytes = config.cuckoo.nitem * config.cuckoo.item_size,
            "cuckoo table allocated"
        );

        let addr = config.bind_addr()?;
        let listener = listener::bind(addr, config.tcp.backlog)?;
        let local_addr = listener.local_addr()?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let threads = config.threads();

        let settings = WorkerSettings {
            poolsize: config.tcp.poolsize,
            buf_init_size: config.buf.init_size,
            buf_pool_cap: config.buf.sock_poolsize,
            events_capacity: config.array.nelem_delta,
            request_quota: config.server.request_poolsize,
            idle_timeout: config.time.idle_timeout_secs,
        };

        let mut rings = Vec::with_capacity(threads);
        let mut wakers = Vec::with_capacity(threads);
        let mut contexts = Vec::with_capacity(threads);

        for _ in 0..threads {
            let poll = Poll::new()?;
            let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
            let (tx, rx) = crossbeam_channel::bounded(config.ring.array_cap);

            rings.push(tx);
            wakers.push(waker);
            contexts.push(WorkerContext {
                poll,
                accept_rx: rx,
                cache: cache.clone(),
                clock: clock.clone(),
                shutdown: shutdown.clone(),
                settings: settings.clone(),
                start_time,
            });
        }

        let acceptor = listener::spawn_acceptor(listener, rings, wakers.clone(), shutdown.clone())?;
        let workers = workers::spawn_workers(contexts, "worker", |worker_id, ctx| {
            let result = run_worker(ctx);
            if let Err(ref e) = result {
                tracing::error!(worker_id, "worker exited with error: {e}");
            }
            result
        });

        if let Some(ref path) = config.pid_filename {
            pidfile::create(path)?;
        }

        tracing::info!(
            address = %local_addr,
            workers = threads,
            "server listening"
        );

        Ok(Server {
            local_addr,
            shutdown,
            wakers,
            acceptor: Some(acceptor),
            workers,
            pid_filename: config.pid_filename,
        })
    }

    /// The bound address; useful when configured with port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, close all connections and join every thread.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for waker in &self.wakers {
            let _ = waker.wake();
        }

        if let Some(acceptor) = self.acceptor.take() {
            let _ = acceptor.join();
        }
        workers::join_workers(std::mem::take(&mut self.workers));

        if let Some(ref path) = self.pid_filename {
            pidfile::remove(path);
        }
        tracing::info!("server stopped");
    }
}

/// Run the server until a shutdown signal arrives.
pub fn run(config: Config, log: &LogHandle) -> Result<(), Box<dyn std::error::Error>> {
    let server = Server::start(config)?;
    let signal_flag = signal::install_shutdown_handler();

    while !signal_flag.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(200));
        if signal::take_log_reopen() {
            log.reopen();
        }
    }

    server.shutdown();
    Ok(())
}

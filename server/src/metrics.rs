//! Server metrics.

use metriken::{metric, Counter, Gauge};

// Connection metrics

#[metric(
    name = "connections_accepted",
    description = "Total number of connections accepted"
)]
pub static CONNECTIONS_ACCEPTED: Counter = Counter::new();

#[metric(
    name = "connections_active",
    description = "Number of currently active connections"
)]
pub static CONNECTIONS_ACTIVE: Gauge = Gauge::new();

#[metric(
    name = "connections_dropped",
    description = "Connections dropped because a ring or worker pool was full"
)]
pub static CONNECTIONS_DROPPED: Counter = Counter::new();

#[metric(
    name = "connections_timed_out",
    description = "Connections closed by the idle timeout sweep"
)]
pub static CONNECTIONS_TIMED_OUT: Counter = Counter::new();

// Operation counters

#[metric(name = "cache_gets", description = "Total GET/GETS key lookups")]
pub static GETS: Counter = Counter::new();

#[metric(name = "cache_sets", description = "Total storage operations")]
pub static SETS: Counter = Counter::new();

#[metric(name = "cache_deletes", description = "Total DELETE operations")]
pub static DELETES: Counter = Counter::new();

#[metric(name = "cache_arithmetic", description = "Total INCR/DECR operations")]
pub static ARITHMETIC: Counter = Counter::new();

#[metric(name = "cache_touches", description = "Total TOUCH operations")]
pub static TOUCHES: Counter = Counter::new();

#[metric(name = "cache_flushes", description = "Total FLUSH_ALL operations")]
pub static FLUSHES: Counter = Counter::new();

// Cache effectiveness

#[metric(name = "cache_hits", description = "Total cache hits")]
pub static HITS: Counter = Counter::new();

#[metric(name = "cache_misses", description = "Total cache misses")]
pub static MISSES: Counter = Counter::new();

// Errors

#[metric(name = "protocol_errors", description = "Total protocol parse errors")]
pub static PROTOCOL_ERRORS: Counter = Counter::new();

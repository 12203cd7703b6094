//! psbench: a throughput benchmark harness for pub/sub messaging backends.
//!
//! Interchangeable backends (Redis, ZeroMQ, nng, NATS) are normalized behind
//! one client contract so the load-generation logic never changes per
//! backend. A minimal relay broker is included as a backend of last resort
//! for the socket-pair backends. Best-effort rate measurement only: no
//! delivery, ordering, or exactly-once guarantees.

#[macro_use]
extern crate log;
extern crate nats;
extern crate nng;
extern crate rand;
extern crate redis;
extern crate thiserror;
extern crate zmq;

use std::time::Duration;

pub mod bench;
pub mod broker;
pub mod client;
pub mod error;

pub use crate::bench::{median, run, topic_set, Config};
pub use crate::client::{Backend, Client, Envelope};
pub use crate::error::Error;

/// Reserved topic carrying per-subscriber throughput samples. Never part of
/// the generated topic set.
pub const METRICS_TOPIC: &str = "metrics";

/// Separator between topic and payload on backends that multiplex both onto
/// one wire message. Topics must never contain it.
pub const TOPIC_SEPARATOR: u8 = b' ';

/// Cadence of the background flusher threads on buffering backends, bounding
/// publish latency regardless of buffer fill.
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(200);

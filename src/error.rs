//! Crate-wide error type. Backend errors are wrapped as-is; the handful of
//! harness-level failures get their own variants.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("ZeroMQ error: {0}")]
    Zmq(#[from] zmq::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("nng error: {0}")]
    Nng(#[from] nng::Error),

    /// The `nats` crate surfaces its failures as `io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A wire message on a prefix-encoded backend had no topic separator.
    #[error("malformed wire message: missing topic separator")]
    MalformedMessage,

    /// A topic was empty or contained the wire separator byte.
    #[error("invalid topic {0:?}")]
    InvalidTopic(String),

    /// Unsubscribe from a topic this client never subscribed to, on a
    /// backend that tracks per-topic subscription handles.
    #[error("not subscribed to topic {0:?}")]
    NotSubscribed(String),

    /// The client's background receive machinery has shut down.
    #[error("client connection closed")]
    Disconnected,
}

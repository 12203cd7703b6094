//! Uniform client abstraction over the pub/sub backends.
//!
//! Every backend is normalized into the same capability set (subscribe,
//! unsubscribe, publish, blocking receive), with one adapter per backend
//! owning its connection state and translating to/from [`Envelope`].

use std::collections::HashMap;
use std::str;
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex, Weak};
use std::thread;

use nng::options::protocol::pubsub::{Subscribe, Unsubscribe};
use nng::options::Options;

use crate::error::Error;
use crate::{FLUSH_INTERVAL, TOPIC_SEPARATOR};

pub const REDIS_PORT: u16 = 6379;
pub const ZMQ_SUB_PORT: u16 = 5561;
pub const ZMQ_PUSH_PORT: u16 = 5562;
pub const NNG_SUB_PORT: u16 = 40898;
pub const NNG_PUSH_PORT: u16 = 40899;
pub const NATS_PORT: u16 = 4222;

/// Envelope kind carried by every data-plane message. Backends that emit
/// control events use their own kind strings ("subscribe", "unsubscribe").
pub const MESSAGE_KIND: &str = "message";

/// Pending publishes buffered beyond this count are flushed inline rather
/// than waiting for the periodic flusher.
const PUBLISH_BUFFER_CAP: usize = 512;

// ENVELOPE ====================================================================

/// The normalized message record all backends are translated into.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub kind: String,
    pub topic: String,
    pub data: String,
}

impl Envelope {
    pub fn message(topic: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            kind: MESSAGE_KIND.to_string(),
            topic: topic.into(),
            data: data.into(),
        }
    }

    pub fn control(kind: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            topic: topic.into(),
            data: String::new(),
        }
    }

    pub fn is_message(&self) -> bool {
        self.kind == MESSAGE_KIND
    }
}

/// Joins topic and payload onto one wire message for backends with no
/// native topic field.
fn encode_wire(topic: &str, payload: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(topic.len() + 1 + payload.len());
    buf.extend_from_slice(topic.as_bytes());
    buf.push(TOPIC_SEPARATOR);
    buf.extend_from_slice(payload.as_bytes());
    buf
}

/// Splits a wire message on the first separator byte. The payload may itself
/// contain the separator; only the topic may not.
fn decode_wire(raw: &[u8]) -> Result<Envelope, Error> {
    let sep = raw
        .iter()
        .position(|b| *b == TOPIC_SEPARATOR)
        .ok_or(Error::MalformedMessage)?;
    let topic = str::from_utf8(&raw[..sep]).map_err(|_| Error::MalformedMessage)?;
    let data = String::from_utf8_lossy(&raw[sep + 1..]).into_owned();
    Ok(Envelope::message(topic, data))
}

/// Validates topics at the call boundary: a topic must be non-empty and must
/// never contain the separator byte used for wire encoding.
fn check_topics(topics: &[&str]) -> Result<(), Error> {
    for topic in topics {
        if topic.is_empty() || topic.bytes().any(|b| b == TOPIC_SEPARATOR) {
            return Err(Error::InvalidTopic((*topic).to_string()));
        }
    }
    Ok(())
}

// CLIENT ======================================================================

/// Capability contract shared by all backend adapters. One instance per
/// worker; connection state is exclusively owned by the instance.
pub trait Client {
    /// Registers interest in the given topics. Returns before the backend
    /// has finished propagating the subscription.
    fn subscribe(&mut self, topics: &[&str]) -> Result<(), Error>;

    fn unsubscribe(&mut self, topics: &[&str]) -> Result<(), Error>;

    /// Sends one message. Never blocks indefinitely; buffering backends rely
    /// on the adapter's background flusher for bounded publish latency.
    fn publish(&self, topic: &str, payload: &str) -> Result<(), Error>;

    /// Blocks until one message (or backend control event) arrives.
    fn receive(&mut self) -> Result<Envelope, Error>;
}

/// The closed set of selectable backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Redis,
    Zmq,
    Nng,
    Nats,
}

impl Backend {
    /// Connects a fresh client for this backend. Construction failure is
    /// fatal to the calling worker; no retry is attempted.
    pub fn connect(self, host: &str) -> Result<Box<dyn Client>, Error> {
        match self {
            Backend::Redis => Ok(Box::new(RedisClient::connect(host)?)),
            Backend::Zmq => Ok(Box::new(ZmqClient::connect(host)?)),
            Backend::Nng => Ok(Box::new(NngClient::connect(host)?)),
            Backend::Nats => Ok(Box::new(NatsClient::connect(host)?)),
        }
    }
}

// REDIS =======================================================================

enum SubCmd {
    Subscribe(String),
    Unsubscribe(String),
}

struct RedisPubState {
    conn: redis::Connection,
    pending: Vec<(String, String)>,
}

/// Redis adapter. Publishes are buffered into a pipeline behind a mutex and
/// flushed by a background thread every `FLUSH_INTERVAL` (or inline once the
/// buffer reaches `PUBLISH_BUFFER_CAP`), so a flush never interleaves with a
/// partial write. A dedicated reader thread owns the pub/sub connection and
/// feeds `receive()` through a channel.
pub struct RedisClient {
    state: Arc<Mutex<RedisPubState>>,
    ctl: Sender<SubCmd>,
    rx: Receiver<Result<Envelope, Error>>,
}

impl RedisClient {
    pub fn connect(host: &str) -> Result<Self, Error> {
        let url = format!("redis://{}:{}/", host, REDIS_PORT);
        let conn = redis::Client::open(url.as_str())?.get_connection()?;
        let sub_conn = redis::Client::open(url.as_str())?.get_connection()?;
        info!("New Redis connections to {:?}", url);

        let state = Arc::new(Mutex::new(RedisPubState {
            conn,
            pending: Vec::new(),
        }));
        Self::spawn_flusher(Arc::downgrade(&state));

        let (ctl, ctl_rx) = channel();
        let (tx, rx) = channel();
        thread::spawn(move || Self::read_loop(sub_conn, ctl_rx, tx));

        Ok(Self { state, ctl, rx })
    }

    fn spawn_flusher(watch: Weak<Mutex<RedisPubState>>) {
        thread::spawn(move || loop {
            thread::sleep(FLUSH_INTERVAL);
            let state = match watch.upgrade() {
                Some(state) => state,
                None => break,
            };
            let mut state = state.lock().unwrap();
            if let Err(e) = Self::flush_locked(&mut state) {
                warn!("Redis flush failed: {}", e);
            }
        });
    }

    fn flush_locked(state: &mut RedisPubState) -> Result<(), Error> {
        if state.pending.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        for (topic, payload) in state.pending.drain(..) {
            pipe.cmd("PUBLISH").arg(topic).arg(payload).ignore();
        }
        pipe.query::<()>(&mut state.conn)?;
        Ok(())
    }

    /// Owns the pub/sub connection: applies queued subscribe/unsubscribe
    /// commands, surfaces their completion as control envelopes, and forwards
    /// data messages. Exits when the owning client is dropped.
    fn read_loop(
        mut conn: redis::Connection,
        ctl: Receiver<SubCmd>,
        tx: Sender<Result<Envelope, Error>>,
    ) {
        let mut pubsub = conn.as_pubsub();
        if let Err(e) = pubsub.set_read_timeout(Some(FLUSH_INTERVAL / 2)) {
            let _ = tx.send(Err(e.into()));
            return;
        }
        loop {
            loop {
                match ctl.try_recv() {
                    Ok(SubCmd::Subscribe(topic)) => match pubsub.subscribe(&topic) {
                        Ok(()) => {
                            let _ = tx.send(Ok(Envelope::control("subscribe", topic)));
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e.into()));
                            return;
                        }
                    },
                    Ok(SubCmd::Unsubscribe(topic)) => match pubsub.unsubscribe(&topic) {
                        Ok(()) => {
                            let _ = tx.send(Ok(Envelope::control("unsubscribe", topic)));
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e.into()));
                            return;
                        }
                    },
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return,
                }
            }
            match pubsub.get_message() {
                Ok(msg) => {
                    let data: String = match msg.get_payload() {
                        Ok(data) => data,
                        Err(e) => {
                            let _ = tx.send(Err(e.into()));
                            return;
                        }
                    };
                    let envelope = Envelope::message(msg.get_channel_name(), data);
                    if tx.send(Ok(envelope)).is_err() {
                        return;
                    }
                }
                Err(ref e) if e.is_timeout() => continue,
                Err(e) => {
                    let _ = tx.send(Err(e.into()));
                    return;
                }
            }
        }
    }
}

impl Client for RedisClient {
    fn subscribe(&mut self, topics: &[&str]) -> Result<(), Error> {
        check_topics(topics)?;
        for topic in topics {
            self.ctl
                .send(SubCmd::Subscribe((*topic).to_string()))
                .map_err(|_| Error::Disconnected)?;
        }
        Ok(())
    }

    fn unsubscribe(&mut self, topics: &[&str]) -> Result<(), Error> {
        check_topics(topics)?;
        for topic in topics {
            self.ctl
                .send(SubCmd::Unsubscribe((*topic).to_string()))
                .map_err(|_| Error::Disconnected)?;
        }
        Ok(())
    }

    fn publish(&self, topic: &str, payload: &str) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state.pending.push((topic.to_string(), payload.to_string()));
        if state.pending.len() >= PUBLISH_BUFFER_CAP {
            Self::flush_locked(&mut state)?;
        }
        Ok(())
    }

    fn receive(&mut self) -> Result<Envelope, Error> {
        match self.rx.recv() {
            Ok(result) => result,
            Err(_) => Err(Error::Disconnected),
        }
    }
}

// ZMQ =========================================================================

/// ZeroMQ adapter: PUSH into the relay's fan-in socket, SUB on its fan-out
/// socket. Topic is a socket-level prefix filter; the wire carries
/// `<topic> <payload>`.
pub struct ZmqClient {
    _ctx: zmq::Context,
    push: zmq::Socket,
    sub: zmq::Socket,
}

impl ZmqClient {
    pub fn connect(host: &str) -> Result<Self, Error> {
        let ctx = zmq::Context::new();

        let push = ctx.socket(zmq::PUSH)?;
        push.set_linger(0)?;
        push.set_sndhwm(100_000)?;
        push.connect(&format!("tcp://{}:{}", host, ZMQ_PUSH_PORT))?;

        let sub = ctx.socket(zmq::SUB)?;
        sub.set_rcvhwm(100_000)?;
        sub.connect(&format!("tcp://{}:{}", host, ZMQ_SUB_PORT))?;

        info!("New ZeroMQ sockets to {:?}", host);
        Ok(Self {
            _ctx: ctx,
            push,
            sub,
        })
    }
}

impl Client for ZmqClient {
    fn subscribe(&mut self, topics: &[&str]) -> Result<(), Error> {
        check_topics(topics)?;
        for topic in topics {
            self.sub.set_subscribe(topic.as_bytes())?;
        }
        Ok(())
    }

    fn unsubscribe(&mut self, topics: &[&str]) -> Result<(), Error> {
        check_topics(topics)?;
        for topic in topics {
            self.sub.set_unsubscribe(topic.as_bytes())?;
        }
        Ok(())
    }

    fn publish(&self, topic: &str, payload: &str) -> Result<(), Error> {
        self.push.send(encode_wire(topic, payload), 0)?;
        Ok(())
    }

    fn receive(&mut self) -> Result<Envelope, Error> {
        let raw = self.sub.recv_bytes(0)?;
        decode_wire(&raw)
    }
}

// NNG =========================================================================

/// nanomsg-next-gen adapter (the mangos-style backend): Push0 into the
/// relay's fan-in socket, Sub0 on its fan-out socket. Same prefix wire
/// format as ZeroMQ.
pub struct NngClient {
    push: nng::Socket,
    sub: nng::Socket,
}

impl NngClient {
    pub fn connect(host: &str) -> Result<Self, Error> {
        let push = nng::Socket::new(nng::Protocol::Push0)?;
        push.dial(&format!("tcp://{}:{}", host, NNG_PUSH_PORT))?;

        let sub = nng::Socket::new(nng::Protocol::Sub0)?;
        sub.dial(&format!("tcp://{}:{}", host, NNG_SUB_PORT))?;

        info!("New nng sockets to {:?}", host);
        Ok(Self { push, sub })
    }
}

impl Client for NngClient {
    fn subscribe(&mut self, topics: &[&str]) -> Result<(), Error> {
        check_topics(topics)?;
        for topic in topics {
            self.sub.set_opt::<Subscribe>(topic.as_bytes().to_vec())?;
        }
        Ok(())
    }

    fn unsubscribe(&mut self, topics: &[&str]) -> Result<(), Error> {
        check_topics(topics)?;
        for topic in topics {
            self.sub.set_opt::<Unsubscribe>(topic.as_bytes().to_vec())?;
        }
        Ok(())
    }

    fn publish(&self, topic: &str, payload: &str) -> Result<(), Error> {
        let msg = nng::Message::from(&encode_wire(topic, payload)[..]);
        self.push.send(msg).map_err(|(_, e)| Error::Nng(e))
    }

    fn receive(&mut self) -> Result<Envelope, Error> {
        let msg = self.sub.recv()?;
        decode_wire(&msg[..])
    }
}

// NATS ========================================================================

/// NATS adapter. The subject is the native topic, so payloads travel raw.
/// Each subscription installs a handler that forwards into the client's
/// channel; the connection's internal write buffer is flushed by a
/// background thread every `FLUSH_INTERVAL`.
pub struct NatsClient {
    conn: nats::Connection,
    subs: HashMap<String, nats::Handler>,
    tx: Sender<Envelope>,
    rx: Receiver<Envelope>,
    _alive: Arc<()>,
}

impl NatsClient {
    pub fn connect(host: &str) -> Result<Self, Error> {
        let url = format!("nats://{}:{}", host, NATS_PORT);
        let conn = nats::connect(&url)?;
        info!("New NATS connection to {:?}", url);

        let alive = Arc::new(());
        let watch = Arc::downgrade(&alive);
        let flush_conn = conn.clone();
        thread::spawn(move || loop {
            thread::sleep(FLUSH_INTERVAL);
            if watch.upgrade().is_none() {
                break;
            }
            if let Err(e) = flush_conn.flush() {
                warn!("NATS flush failed: {}", e);
            }
        });

        let (tx, rx) = channel();
        Ok(Self {
            conn,
            subs: HashMap::new(),
            tx,
            rx,
            _alive: alive,
        })
    }
}

impl Client for NatsClient {
    fn subscribe(&mut self, topics: &[&str]) -> Result<(), Error> {
        check_topics(topics)?;
        for topic in topics {
            let tx = self.tx.clone();
            let handler = self.conn.subscribe(topic)?.with_handler(move |msg| {
                let envelope = Envelope::message(
                    msg.subject.clone(),
                    String::from_utf8_lossy(&msg.data).into_owned(),
                );
                let _ = tx.send(envelope);
                Ok(())
            });
            self.subs.insert((*topic).to_string(), handler);
        }
        Ok(())
    }

    fn unsubscribe(&mut self, topics: &[&str]) -> Result<(), Error> {
        check_topics(topics)?;
        for topic in topics {
            match self.subs.remove(*topic) {
                Some(handler) => handler.unsubscribe()?,
                None => return Err(Error::NotSubscribed((*topic).to_string())),
            }
        }
        Ok(())
    }

    fn publish(&self, topic: &str, payload: &str) -> Result<(), Error> {
        self.conn.publish(topic, payload)?;
        Ok(())
    }

    fn receive(&mut self) -> Result<Envelope, Error> {
        self.rx.recv().map_err(|_| Error::Disconnected)
    }
}

// TESTS =======================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_round_trip() {
        let raw = encode_wire("42", "hello");
        let envelope = decode_wire(&raw).unwrap();
        assert_eq!(envelope, Envelope::message("42", "hello"));
        assert!(envelope.is_message());
    }

    #[test]
    fn wire_payload_may_contain_separator() {
        let raw = encode_wire("7", "a b c");
        let envelope = decode_wire(&raw).unwrap();
        assert_eq!(envelope.topic, "7");
        assert_eq!(envelope.data, "a b c");
    }

    #[test]
    fn wire_empty_payload() {
        let envelope = decode_wire(&encode_wire("3", "")).unwrap();
        assert_eq!(envelope.topic, "3");
        assert_eq!(envelope.data, "");
    }

    #[test]
    fn wire_missing_separator_is_an_error() {
        match decode_wire(b"noseparator") {
            Err(Error::MalformedMessage) => {}
            other => panic!("expected MalformedMessage, got {:?}", other),
        }
    }

    #[test]
    fn topics_with_separator_are_rejected() {
        match check_topics(&["ok", "not ok"]) {
            Err(Error::InvalidTopic(topic)) => assert_eq!(topic, "not ok"),
            other => panic!("expected InvalidTopic, got {:?}", other),
        }
    }

    #[test]
    fn empty_topics_are_rejected() {
        assert!(check_topics(&[""]).is_err());
        assert!(check_topics(&["0", "1", "metrics"]).is_ok());
    }

    #[test]
    fn control_envelopes_are_not_messages() {
        assert!(!Envelope::control("subscribe", "0").is_message());
    }
}

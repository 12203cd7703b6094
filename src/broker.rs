//! Minimal relay broker: a single-threaded loop bridging a fan-in socket to
//! a fan-out socket, used when no external broker is available. Operates on
//! raw backend messages: no topic filtering, no queueing, no persistence.
//!
//! Per-message receive (and forward) errors are logged and the loop keeps
//! running; only a bind failure at startup is fatal.

use std::time::Instant;

use nng::options::Options;

use crate::error::Error;

pub const ZMQ_PULL_URL: &str = "tcp://*:5562";
pub const ZMQ_PUB_URL: &str = "tcp://*:5561";
pub const NNG_PULL_URL: &str = "tcp://0.0.0.0:40899";
pub const NNG_PUB_URL: &str = "tcp://0.0.0.0:40898";

/// One relay cycle: block-receive a message from the fan-in socket and send
/// it unmodified to the fan-out socket.
fn forward_step(receiver: &zmq::Socket, sender: &zmq::Socket) -> Result<(), Error> {
    let msg = receiver.recv_bytes(0)?;
    sender.send(msg, 0)?;
    Ok(())
}

/// Serves the ZeroMQ relay: PULL fan-in, PUB fan-out. Loops forever once
/// bound; returns only on a bind failure.
pub fn serve_zmq(pull_url: &str, pub_url: &str, quiet: bool) -> Result<(), Error> {
    let ctx = zmq::Context::new();

    let receiver = ctx.socket(zmq::PULL)?;
    receiver.set_rcvhwm(1_000_000)?;
    receiver.bind(pull_url)?;

    let sender = ctx.socket(zmq::PUB)?;
    sender.set_linger(0)?;
    sender.set_sndhwm(1_000_000)?;
    sender.bind(pub_url)?;

    info!("Relay broker active | {:?} -> {:?}", pull_url, pub_url);

    let mut last = Instant::now();
    let mut messages: i64 = 0;
    loop {
        if let Err(e) = forward_step(&receiver, &sender) {
            error!("Relay error: {}", e);
            continue;
        }
        messages += 1;
        if last.elapsed().as_secs_f64() > 1.0 {
            if !quiet {
                println!("{} msg/sec", messages);
            }
            last = Instant::now();
            messages = 0;
        }
    }
}

/// Serves the nng relay (the mangos-style backend): Pull0 fan-in, Pub0
/// fan-out. Same forwarding loop and error policy as the ZeroMQ flavor.
pub fn serve_nng(pull_url: &str, pub_url: &str, quiet: bool) -> Result<(), Error> {
    let receiver = nng::Socket::new(nng::Protocol::Pull0)?;
    receiver.set_opt::<nng::options::RecvBufferSize>(8192)?;
    receiver.listen(pull_url)?;

    let sender = nng::Socket::new(nng::Protocol::Pub0)?;
    sender.set_opt::<nng::options::SendBufferSize>(8192)?;
    sender.listen(pub_url)?;

    info!("Relay broker active | {:?} -> {:?}", pull_url, pub_url);

    let mut last = Instant::now();
    let mut messages: i64 = 0;
    loop {
        let msg = match receiver.recv() {
            Ok(msg) => msg,
            Err(e) => {
                error!("Relay receive failed: {}", e);
                continue;
            }
        };
        if let Err((_, e)) = sender.send(msg) {
            error!("Relay send failed: {}", e);
            continue;
        }
        messages += 1;
        if last.elapsed().as_secs_f64() > 1.0 {
            if !quiet {
                println!("{} msg/sec", messages);
            }
            last = Instant::now();
            messages = 0;
        }
    }
}

//! Relay broker integration tests. Self-contained: the relay runs on a
//! background thread and everything speaks ZeroMQ over loopback, so no
//! external broker is required.

extern crate psbench;
extern crate zmq;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use psbench::broker;
use psbench::client::{Client, ZmqClient};

fn start_relay(pull_url: &'static str, pub_url: &'static str) {
    thread::spawn(move || {
        broker::serve_zmq(pull_url, pub_url, true).expect("relay failed to bind");
    });
    thread::sleep(Duration::from_millis(200));
}

#[test]
fn forwards_messages_in_order() {
    start_relay("tcp://*:16562", "tcp://*:16561");

    let ctx = zmq::Context::new();
    let feeder = ctx.socket(zmq::PUSH).unwrap();
    feeder.connect("tcp://127.0.0.1:16562").unwrap();
    let observer = ctx.socket(zmq::SUB).unwrap();
    observer.set_subscribe(b"").unwrap();
    observer.set_rcvtimeo(5000).unwrap();
    observer.connect("tcp://127.0.0.1:16561").unwrap();

    // Let the SUB side finish joining before anything is sent.
    thread::sleep(Duration::from_millis(500));

    for i in 0..50 {
        feeder.send(format!("m{}", i).into_bytes(), 0).unwrap();
    }
    for i in 0..50 {
        let raw = observer.recv_bytes(0).expect("relay dropped a message");
        assert_eq!(raw, format!("m{}", i).into_bytes());
    }
}

#[test]
fn bind_failure_is_fatal() {
    let ctx = zmq::Context::new();
    let holder = ctx.socket(zmq::PULL).unwrap();
    holder.bind("tcp://*:18562").unwrap();

    assert!(broker::serve_zmq("tcp://*:18562", "tcp://*:18561", true).is_err());
}

// Round-trip through the ZmqClient adapter on the relay's default ports:
// publish on a subscribed topic yields the normalized envelope, and an
// unsubscribed topic stops being delivered.
#[test]
fn client_round_trip_and_unsubscribe() {
    start_relay(broker::ZMQ_PULL_URL, broker::ZMQ_PUB_URL);

    let mut subscriber = ZmqClient::connect("127.0.0.1").expect("subscriber connect");
    subscriber.subscribe(&["7", "8"]).unwrap();
    thread::sleep(Duration::from_millis(300));

    // Republish until delivery so the SUB join race cannot hang the test.
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);
    let feeder = thread::spawn(move || {
        let publisher = ZmqClient::connect("127.0.0.1").expect("publisher connect");
        while !stop_flag.load(Ordering::Relaxed) {
            publisher.publish("7", "one").unwrap();
            thread::sleep(Duration::from_millis(50));
        }
        publisher
    });

    let envelope = subscriber.receive().unwrap();
    assert!(envelope.is_message());
    assert_eq!(envelope.topic, "7");
    assert_eq!(envelope.data, "one");

    stop.store(true, Ordering::Relaxed);
    let publisher = feeder.join().unwrap();

    subscriber.unsubscribe(&["7"]).unwrap();
    thread::sleep(Duration::from_millis(500));

    // Drain the backlog published before the unsubscribe propagated.
    publisher.publish("8", "flush").unwrap();
    loop {
        let envelope = subscriber.receive().unwrap();
        if envelope.topic == "8" && envelope.data == "flush" {
            break;
        }
    }

    // Published in order by one client: if "7" were still subscribed it
    // would arrive before the "8" marker.
    publisher.publish("7", "late").unwrap();
    publisher.publish("8", "after").unwrap();
    loop {
        let envelope = subscriber.receive().unwrap();
        if envelope.data == "flush" {
            continue;
        }
        assert_eq!(envelope.topic, "8");
        assert_eq!(envelope.data, "after");
        break;
    }
}

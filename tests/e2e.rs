//! End-to-end benchmark run over the in-process ZeroMQ relay: one
//! publisher, one subscriber, one topic, a two-second observation window.

extern crate psbench;

use std::thread;
use std::time::Duration;

use psbench::{bench, broker, Backend, Config};

#[test]
fn benchmark_reports_a_positive_median() {
    thread::spawn(|| {
        broker::serve_zmq(broker::ZMQ_PULL_URL, broker::ZMQ_PUB_URL, true)
            .expect("relay failed to bind");
    });
    thread::sleep(Duration::from_millis(300));

    let config = Config {
        host: "127.0.0.1".to_string(),
        backend: Backend::Zmq,
        num_seconds: 2.0,
        num_clients: 1,
        num_channels: 1,
        message_size: 8,
        quiet: true,
    };

    let median = bench::run(config).expect("benchmark run failed");
    let median = median.expect("no metrics samples collected");
    assert!(median >= 1, "median was {}", median);
}

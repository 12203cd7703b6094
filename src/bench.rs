//! Benchmark orchestrator: publisher and subscriber worker threads, the
//! metrics collector, and the median aggregation.
//!
//! Subscribers report their own per-second counts by publishing them onto
//! the reserved metrics topic, carried over the same pub/sub fabric being
//! benchmarked. A dedicated collector pools those samples for the
//! observation window and the median is reported as the aggregate rate.

use std::process;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rand::prelude::*;

use crate::client::Backend;
use crate::error::Error;
use crate::METRICS_TOPIC;

/// Benchmark configuration, built once in `main` and passed into every
/// component.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub backend: Backend,
    pub num_seconds: f64,
    pub num_clients: usize,
    pub num_channels: usize,
    pub message_size: usize,
    pub quiet: bool,
}

/// The fixed topic set: `"0".."n-1"`. Generated once at startup and shared
/// read-only for the process lifetime. Numeric names never collide with the
/// reserved metrics topic.
pub fn topic_set(n: usize) -> Vec<String> {
    (0..n).map(|i| i.to_string()).collect()
}

/// Sorts the collected samples and returns the middle element (index
/// `len / 2`, the upper-middle for even lengths). `None` when no samples
/// were collected within the observation window.
pub fn median(samples: &mut [i64]) -> Option<i64> {
    if samples.is_empty() {
        return None;
    }
    samples.sort();
    Some(samples[samples.len() / 2])
}

/// Loops forever, publishing a fixed-size payload to random topics at the
/// maximum achievable rate.
fn publisher(config: &Config, topics: &[String]) -> Result<(), Error> {
    let client = config.backend.connect(&config.host)?;
    let payload = "x".repeat(config.message_size);
    let mut rng = rand::thread_rng();
    loop {
        let topic = &topics[rng.gen_range(0, topics.len())];
        client.publish(topic, &payload)?;
    }
}

/// Subscribes to every topic, counting arrivals. Once per second of wall
/// clock, checked after each receive so the cadence follows the message
/// stream, the count is published on the metrics topic and reset.
fn subscriber(config: &Config, topics: &[String]) -> Result<(), Error> {
    let mut client = config.backend.connect(&config.host)?;
    let refs: Vec<&str> = topics.iter().map(|t| t.as_str()).collect();
    client.subscribe(&refs)?;

    let mut last = Instant::now();
    let mut messages: i64 = 0;
    loop {
        client.receive()?;
        messages += 1;
        if last.elapsed().as_secs_f64() > 1.0 {
            if !config.quiet {
                println!("{} msg/sec", messages);
            }
            client.publish(METRICS_TOPIC, &messages.to_string())?;
            last = Instant::now();
            messages = 0;
        }
    }
}

/// Subscribes a dedicated client to the metrics topic before the window
/// opens, then pools samples until `num_seconds` of wall clock has passed.
/// Control envelopes are ignored; unparsable samples are skipped.
fn collect_metrics(config: &Config) -> Result<Vec<i64>, Error> {
    let mut client = config.backend.connect(&config.host)?;
    client.subscribe(&[METRICS_TOPIC])?;

    let mut samples = Vec::new();
    let start = Instant::now();
    while start.elapsed().as_secs_f64() <= config.num_seconds {
        let envelope = client.receive()?;
        if !envelope.is_message() {
            continue;
        }
        match envelope.data.parse::<i64>() {
            Ok(count) => samples.push(count),
            Err(_) => warn!("Discarding malformed metrics sample {:?}", envelope.data),
        }
    }
    Ok(samples)
}

/// Spawns `num_clients` worker threads running the target loop. A worker
/// error is fatal to the whole process, with a diagnostic.
fn spawn_workers(
    config: &Arc<Config>,
    topics: &Arc<Vec<String>>,
    target: fn(&Config, &[String]) -> Result<(), Error>,
    name: &'static str,
) {
    for id in 0..config.num_clients {
        let config = Arc::clone(config);
        let topics = Arc::clone(topics);
        thread::spawn(move || {
            debug!("[{} {}] starting", name, id);
            if let Err(e) = target(&config, &topics) {
                error!("[{} {}] fatal: {}", name, id, e);
                process::exit(1);
            }
        });
    }
}

/// Runs the full benchmark: publishers first, a one-second warm-up so they
/// reach steady throughput, then subscribers, then the metrics collector.
/// Returns the median sample, or `None` if the window produced no samples.
pub fn run(config: Config) -> Result<Option<i64>, Error> {
    let config = Arc::new(config);
    let topics = Arc::new(topic_set(config.num_channels));

    spawn_workers(&config, &topics, publisher, "publisher");
    thread::sleep(Duration::from_secs(1));
    spawn_workers(&config, &topics, subscriber, "subscriber");

    let mut samples = collect_metrics(&config)?;
    info!("Collected {} metrics samples", samples.len());
    Ok(median(&mut samples))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_set_has_distinct_stable_names() {
        let topics = topic_set(50);
        assert_eq!(topics.len(), 50);
        let distinct: std::collections::HashSet<&String> = topics.iter().collect();
        assert_eq!(distinct.len(), 50);
        assert_eq!(topics, topic_set(50));
    }

    #[test]
    fn topic_set_never_contains_the_reserved_topic() {
        assert!(!topic_set(10_000).iter().any(|t| t == METRICS_TOPIC));
    }

    #[test]
    fn topic_set_of_zero_is_empty() {
        assert!(topic_set(0).is_empty());
    }

    #[test]
    fn median_of_odd_sample_count() {
        let mut samples = vec![5, 20, 15, 9, 40];
        assert_eq!(median(&mut samples), Some(15));
    }

    #[test]
    fn median_of_even_sample_count_is_the_upper_middle() {
        let mut samples = vec![10, 20, 30, 40];
        assert_eq!(median(&mut samples), Some(30));
    }

    #[test]
    fn median_of_single_sample() {
        assert_eq!(median(&mut [7]), Some(7));
    }

    #[test]
    fn median_of_no_samples_is_insufficient_data() {
        assert_eq!(median(&mut []), None);
    }
}

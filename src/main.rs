extern crate clap;
#[macro_use]
extern crate log;
extern crate pretty_env_logger;
extern crate psbench;

use std::process;

use clap::{App, Arg, ArgGroup};

use psbench::{bench, broker, Backend, Config};

fn main() {
    pretty_env_logger::init_timed();

    let matches = App::new("psbench")
        .about("Throughput benchmark for pub/sub messaging backends")
        .arg(
            Arg::with_name("host")
                .long("host")
                .takes_value(true)
                .default_value("127.0.0.1")
                .help("Backend host address"),
        )
        .arg(
            Arg::with_name("num-seconds")
                .long("num-seconds")
                .takes_value(true)
                .default_value("10")
                .help("Observation window in seconds"),
        )
        .arg(
            Arg::with_name("num-clients")
                .long("num-clients")
                .takes_value(true)
                .default_value("1")
                .help("Number of publisher workers and of subscriber workers"),
        )
        .arg(
            Arg::with_name("num-channels")
                .long("num-channels")
                .takes_value(true)
                .default_value("50")
                .help("Number of topics in the generated topic set"),
        )
        .arg(
            Arg::with_name("message-size")
                .long("message-size")
                .takes_value(true)
                .default_value("20")
                .help("Payload size in bytes"),
        )
        .arg(Arg::with_name("redis").long("redis").help("Use the Redis backend"))
        .arg(Arg::with_name("nng").long("nng").help("Use the nng (mangos-style) backend"))
        .arg(Arg::with_name("nats").long("nats").help("Use the NATS backend"))
        .group(ArgGroup::with_name("backend").args(&["redis", "nng", "nats"]))
        .arg(
            Arg::with_name("quiet")
                .long("quiet")
                .help("Suppress periodic throughput prints"),
        )
        .arg(
            Arg::with_name("broker")
                .long("broker")
                .help("Run the relay broker instead of the benchmark"),
        )
        .get_matches();

    let backend = if matches.is_present("redis") {
        Backend::Redis
    } else if matches.is_present("nng") {
        Backend::Nng
    } else if matches.is_present("nats") {
        Backend::Nats
    } else {
        Backend::Zmq
    };
    let quiet = matches.is_present("quiet");

    if matches.is_present("broker") {
        let result = match backend {
            Backend::Nng => broker::serve_nng(broker::NNG_PULL_URL, broker::NNG_PUB_URL, quiet),
            _ => broker::serve_zmq(broker::ZMQ_PULL_URL, broker::ZMQ_PUB_URL, quiet),
        };
        if let Err(e) = result {
            error!("Broker failed to start: {}", e);
            process::exit(1);
        }
        return;
    }

    let config = Config {
        host: matches.value_of("host").unwrap().to_string(),
        backend,
        num_seconds: parse(&matches, "num-seconds"),
        num_clients: parse(&matches, "num-clients"),
        num_channels: parse(&matches, "num-channels"),
        message_size: parse(&matches, "message-size"),
        quiet,
    };
    if config.num_clients == 0 || config.num_channels == 0 {
        error!("--num-clients and --num-channels must be at least 1");
        process::exit(1);
    }

    match bench::run(config) {
        Ok(Some(median)) => println!("{} median msg/sec", median),
        Ok(None) => {
            error!("Insufficient data: no metrics samples within the observation window");
            process::exit(1);
        }
        Err(e) => {
            error!("Benchmark failed: {}", e);
            process::exit(1);
        }
    }
}

fn parse<T: std::str::FromStr>(matches: &clap::ArgMatches, name: &str) -> T {
    let raw = matches.value_of(name).unwrap();
    raw.parse().unwrap_or_else(|_| {
        eprintln!("Invalid value for --{}: {:?}", name, raw);
        process::exit(1);
    })
}

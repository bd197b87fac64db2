use clap::{App, Arg, ArgMatches, SubCommand};
use framering::{
    error::FrameRingError, CancellationToken, FrameCounter, GeneratorConfig,
    InMemoryDispatchTable, LoopbackHost, PollLoop, Result, XskConfig,
};
use std::{str::FromStr, sync::Arc, thread, time::Duration};

fn main() -> Result<()> {
    env_logger::init();

    let matches = App::new("framering-cli")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Frame ring consumer tool")
        .subcommand(
            SubCommand::with_name("simulate")
                .about("Run the poll loop against the loopback packet source")
                .arg(
                    Arg::with_name("config")
                        .short("c")
                        .long("config")
                        .value_name("FILE")
                        .help("JSON configuration file")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("packets")
                        .short("n")
                        .long("packets")
                        .value_name("COUNT")
                        .help("Packets to generate")
                        .default_value("100000")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("payload_size")
                        .short("s")
                        .long("payload-size")
                        .value_name("BYTES")
                        .help("Packet size")
                        .default_value("64")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("timeout_ms")
                        .short("t")
                        .long("timeout-ms")
                        .value_name("MS")
                        .help("Cancel the loop after this long")
                        .default_value("5000")
                        .takes_value(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("check-config")
                .about("Validate a configuration file")
                .arg(
                    Arg::with_name("config")
                        .value_name("FILE")
                        .help("JSON configuration file")
                        .required(true)
                        .index(1),
                ),
        )
        .subcommand(SubCommand::with_name("info").about("Show version and defaults"))
        .get_matches();

    match matches.subcommand() {
        ("simulate", Some(sim_matches)) => simulate(sim_matches),
        ("check-config", Some(check_matches)) => check_config(check_matches),
        ("info", Some(_)) => show_info(),
        _ => {
            println!("Use --help for usage information");
            Ok(())
        }
    }
}

fn parse_arg<T: FromStr>(matches: &ArgMatches, name: &str) -> Result<T> {
    matches
        .value_of(name)
        .ok_or_else(|| FrameRingError::invalid_parameter(name, "Missing value"))?
        .parse()
        .map_err(|_| FrameRingError::invalid_parameter(name, "Invalid number"))
}

fn load_config(matches: &ArgMatches) -> Result<XskConfig> {
    match matches.value_of("config") {
        Some(path) => XskConfig::from_json_file(path),
        None => Ok(XskConfig::default()),
    }
}

fn simulate(matches: &ArgMatches) -> Result<()> {
    let config = load_config(matches)?;
    let packets: u64 = parse_arg(matches, "packets")?;
    let payload_size: usize = parse_arg(matches, "payload_size")?;
    let timeout = Duration::from_millis(parse_arg(matches, "timeout_ms")?);

    println!("Simulating {} packets of {} bytes", packets, payload_size);
    println!("  Frames: {} x {} bytes", config.frame_count, config.frame_size);
    println!(
        "  Rings: fill {}, completion {}, rx {}, tx {}",
        config.fill_ring_size, config.completion_ring_size, config.rx_ring_size, config.tx_ring_size
    );

    let table = Arc::new(InMemoryDispatchTable::new("xsks_map", 64));
    let mut host = LoopbackHost::new(Arc::clone(&table));
    let poll_loop = PollLoop::open(&config, &mut host, table)?;
    let source = host
        .take_source()
        .ok_or_else(|| FrameRingError::platform("Loopback host produced no source"))?;

    let cancel = CancellationToken::new();
    let generator = source.spawn_generator(
        GeneratorConfig {
            payload: vec![0x5a; payload_size],
            limit: Some(packets),
            ..GeneratorConfig::default()
        },
        cancel.clone(),
    );

    let timer = {
        let cancel = cancel.clone();
        thread::spawn(move || {
            cancel.wait_timeout(timeout);
            cancel.cancel();
        })
    };

    let start = std::time::Instant::now();
    let mut counter = FrameCounter::with_limit(packets);
    let report = poll_loop.run(&mut counter, &cancel);
    let elapsed = start.elapsed();

    cancel.cancel();
    let _ = timer.join();
    let source = generator
        .join()
        .map_err(|_| FrameRingError::platform("Generator thread panicked"))??;
    let report = report?;

    println!("\nResults:");
    println!("  Stopped by: {}", report.stop_reason);
    println!("  Frames: {} in {} batches", report.stats.frames, report.stats.batches);
    println!("  Bytes: {}", report.stats.bytes);
    println!("  Idle waits: {}", report.stats.idle_waits);
    println!("  Desyncs: {}", report.stats.desyncs);
    println!("  Recovered at shutdown: {}", report.recovered);
    println!(
        "  Pool: {} of {} frames free",
        report.pool.free, report.pool.frame_count
    );
    println!(
        "  Source: {} delivered, {} dropped (no frame), {} dropped (unrouted)",
        source.stats().delivered,
        source.stats().dropped_no_frame,
        source.stats().dropped_unrouted
    );
    println!(
        "  Throughput: {:.0} frames/sec",
        report.stats.frames as f64 / elapsed.as_secs_f64()
    );
    Ok(())
}

fn check_config(matches: &ArgMatches) -> Result<()> {
    let config = load_config(matches)?;
    config.validate()?;

    println!("Configuration is valid");
    println!("  Interface: {} queue {}", config.interface, config.queue_id);
    println!(
        "  Frame region: {} bytes ({} backing)",
        config.region_size().unwrap_or(0),
        config.backing.name()
    );
    println!("  Batch size: {}", config.batch_size);
    println!("  Idle wait: {:?}", config.idle_wait());
    println!("  Desync policy: {:?}", config.desync_policy);
    Ok(())
}

fn show_info() -> Result<()> {
    let defaults = XskConfig::default();
    println!("framering {}", framering::VERSION);
    println!("  Page size: {}", framering::umem::page_size());
    println!(
        "  Defaults: {} frames x {} bytes, rings of {}, batch {}",
        defaults.frame_count, defaults.frame_size, defaults.fill_ring_size, defaults.batch_size
    );
    Ok(())
}

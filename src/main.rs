use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::Parser;
use prads::asset::{AssetSink, AssetStore};
use prads::capture;
use prads::config::Config;
use prads::db::SignatureDb;
use prads::error::PradsError;
use prads::persist::AssetWriter;
use prads::Prads;
use signal_hook::consts::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "prads", version, about = "Passive Real-time Asset Detection System")]
struct Args {
    /// Network interface to listen on
    #[arg(short = 'd', long = "dev", alias = "iface")]
    dev: Option<String>,

    /// Configuration file
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Directory holding the configuration and signature files
    #[arg(long = "confdir")]
    confdir: Option<PathBuf>,

    /// Service signature file
    #[arg(short = 's', long = "service-signatures")]
    service_signatures: Option<String>,

    /// OS fingerprint file
    #[arg(short = 'o', long = "os-fingerprints")]
    os_fingerprints: Option<String>,

    /// Debug level (0-2)
    #[arg(long = "debug", default_value_t = 0)]
    debug: u8,

    /// Verbose output
    #[arg(long = "verbose")]
    verbose: bool,

    /// Load all signature files, print them and exit
    #[arg(long = "dump")]
    dump: bool,

    /// Print the persisted asset table and exit
    #[arg(long = "dumpdb")]
    dumpdb: bool,

    /// Run in the background (supervision is expected to daemonize us)
    #[arg(long = "daemon")]
    daemon: bool,

    /// Enable ARP asset detection
    #[arg(long = "arp")]
    arp: bool,

    /// Enable TCP service detection
    #[arg(long = "service-tcp")]
    service_tcp: bool,

    /// Enable UDP service detection
    #[arg(long = "service-udp")]
    service_udp: bool,

    /// Enable OS fingerprinting
    #[arg(long = "os")]
    os: bool,

    /// Asset database path
    #[arg(long = "db")]
    db: Option<String>,
}

fn main() {
    if let Err(e) = run(Args::parse()) {
        eprintln!("prads: {e}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), PradsError> {
    let config = load_config(&args)?;
    initialize_logging(&args, &config);

    if args.dump {
        let db = SignatureDb::load(&config)?;
        dump_signatures(&db);
        return Ok(());
    }

    if args.dumpdb {
        if config.db.is_empty() {
            return Err(PradsError::Config(
                "no asset database configured, use --db or the db config key".to_string(),
            ));
        }
        let writer = AssetWriter::open(&config.db, &reporter_hostname())?;
        for row in writer.dump()? {
            println!(
                "{:11} [{:<8}] ip:{:<15} {} - {} [{}] distance:{} link:{}",
                row.time, row.service, row.ip, row.os, row.details, row.fp, row.distance, row.link
            );
        }
        return Ok(());
    }

    let db = SignatureDb::load(&config)?;
    info!(
        syn = db.syn.len(),
        synack = db.synack.len(),
        icmp = db.icmp.len(),
        udp = db.udp.len(),
        services = db.service_tcp.len(),
        mac = db.mac.len(),
        "signature databases loaded"
    );

    let mut capture = capture::open_live(&config.interface, &config.bpfilter)?;
    info!(interface = %config.interface, filter = %config.bpfilter, "listening");

    let writer = if config.db.is_empty() {
        None
    } else {
        Some(AssetWriter::open(&config.db, &reporter_hostname())?)
    };

    let sink = if config.asset_log.is_empty() {
        AssetSink::Stdout
    } else {
        AssetSink::file(&config.asset_log)?
    };

    if config.daemon {
        warn!("daemon mode is delegated to the supervisor, continuing in the foreground");
    }
    write_pid_file(&config)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let dump_stats = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM, SIGQUIT] {
        signal_hook::flag::register(signal, Arc::clone(&shutdown))?;
    }
    signal_hook::flag::register(SIGHUP, Arc::clone(&dump_stats))?;

    let mut engine = Prads::new(&config, &db, AssetStore::new(sink), writer);
    let result = engine.run(&mut capture, &shutdown, &dump_stats);

    remove_pid_file(&config);
    info!(assets = engine.store.len(), "shutdown complete");
    result
}

fn load_config(args: &Args) -> Result<Config, PradsError> {
    let mut config = if let Some(ref path) = args.config {
        Config::load(path)?
    } else if let Some(ref confdir) = args.confdir {
        let candidate = confdir.join("prads.conf");
        if candidate.is_file() {
            Config::load(&candidate)?
        } else {
            Config::default()
        }
    } else {
        Config::default()
    };

    if let Some(ref confdir) = args.confdir {
        point_sig_files_at(&mut config, confdir);
    }

    // CLI flags override the file
    if let Some(ref dev) = args.dev {
        config.interface = dev.clone();
    }
    if let Some(ref path) = args.service_signatures {
        config.sig_file_serv_tcp = path.clone();
    }
    if let Some(ref path) = args.os_fingerprints {
        config.sig_file_syn = path.clone();
    }
    if let Some(ref db) = args.db {
        config.db = db.clone();
    }
    if args.daemon {
        config.daemon = true;
    }
    if args.arp {
        config.arp = true;
    }
    if args.service_tcp {
        config.service_tcp = true;
    }
    if args.service_udp {
        config.service_udp = true;
    }
    if args.os {
        config.os_syn_fingerprint = true;
        config.os_synack_fingerprint = true;
        config.os_icmp = true;
        config.os_udp = true;
    }
    Ok(config)
}

/// Points every unset signature path at the conventional file name under
/// the configuration directory.
fn point_sig_files_at(config: &mut Config, confdir: &Path) {
    let defaults: [(&mut String, &str); 8] = [
        (&mut config.sig_file_syn, "os.fp"),
        (&mut config.sig_file_synack, "osa.fp"),
        (&mut config.sig_file_icmp, "icmp.fp"),
        (&mut config.sig_file_udp, "udp.fp"),
        (&mut config.sig_file_serv_tcp, "tcp-service.sig"),
        (&mut config.sig_file_serv_udp, "udp-service.sig"),
        (&mut config.mac_file, "mac.sig"),
        (&mut config.sig_file_mtu, "mtu.sig"),
    ];
    for (slot, name) in defaults {
        if slot.is_empty() {
            *slot = confdir.join(name).to_string_lossy().into_owned();
        }
    }
}

fn initialize_logging(args: &Args, config: &Config) {
    let level = if args.debug >= 2 {
        tracing::Level::TRACE
    } else if args.debug == 1 || args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("prads={level}")));

    // asset records go to stdout; diagnostics stay on stderr
    let console = std::io::stderr.with_max_level(level);

    if config.log_file.is_empty() {
        let subscriber = fmt().with_env_filter(filter).with_writer(console).finish();
        if tracing::subscriber::set_global_default(subscriber).is_err() {
            eprintln!("prads: logging already initialized");
        }
    } else {
        let path = Path::new(&config.log_file);
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        let file = path.file_name().map(|f| f.to_string_lossy().into_owned()).unwrap_or_else(|| "prads.log".to_string());
        let appender =
            RollingFileAppender::new(Rotation::NEVER, dir, file).with_max_level(level);
        let subscriber = fmt()
            .with_env_filter(filter)
            .with_writer(console.and(appender))
            .finish();
        if tracing::subscriber::set_global_default(subscriber).is_err() {
            eprintln!("prads: logging already initialized");
        }
    }
}

fn dump_signatures(db: &SignatureDb) {
    println!("# SYN signatures: {}", db.syn.len());
    for sig in db.syn.records() {
        println!("{sig}");
    }
    println!("# SYN+ACK signatures: {}", db.synack.len());
    for sig in db.synack.records() {
        println!("{sig}");
    }
    println!("# ICMP signatures: {}", db.icmp.len());
    for sig in db.icmp.records() {
        println!("{sig}");
    }
    println!("# UDP signatures: {}", db.udp.len());
    for sig in db.udp.records() {
        println!("{sig}");
    }
    println!("# TCP service signatures: {}", db.service_tcp.len());
    for sig in db.service_tcp.iter() {
        println!("{},{},{}", sig.service, sig.template, sig.pattern.as_str());
    }
    println!("# UDP service signatures: {}", db.service_udp.len());
    for sig in db.service_udp.iter() {
        println!("{},{},{}", sig.service, sig.template, sig.pattern.as_str());
    }
    println!("# MTU links: {}", db.mtu.len());
    for (mtu, link) in db.mtu.iter() {
        println!("{mtu},\"{link}\"");
    }
    println!("# MAC vendor prefixes: {}", db.mac.len());
}

fn reporter_hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "prads".to_string())
}

fn write_pid_file(config: &Config) -> Result<(), PradsError> {
    if config.pid_file.is_empty() {
        return Ok(());
    }
    std::fs::write(&config.pid_file, format!("{}\n", std::process::id()))?;
    Ok(())
}

fn remove_pid_file(config: &Config) {
    if config.pid_file.is_empty() {
        return;
    }
    if let Err(e) = std::fs::remove_file(&config.pid_file) {
        warn!("cannot remove pid file {}: {e}", config.pid_file);
    }
}

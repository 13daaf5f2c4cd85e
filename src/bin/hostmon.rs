//! hostmon - host metrics reporter.
//!
//! Prints memory, mount and process figures once, or repeatedly in watch
//! mode, either as text or as JSON.

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Local;
use clap::Parser;
use serde::Serialize;
use tracing::level_filters::LevelFilter;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;

use hostmon::collector::{
    Collector, FileSystem, MountRecord, ProcessGroupRecord, ProcessRecord, RealFs, SysInfo,
};
use hostmon::config::{self, CollectorConfig};
use hostmon::sysconf;

/// Host memory, mount and process reporter.
#[derive(Parser)]
#[command(name = "hostmon", about = "Host metrics reporter", version)]
struct Args {
    /// Path to /proc filesystem.
    #[arg(long, default_value = "/proc")]
    proc_path: String,

    /// Freshness window of memory, load and mount figures, in milliseconds.
    #[arg(long, default_value_t = config::DEFAULT_VALUE_DURATION.as_millis() as u64)]
    value_duration_ms: u64,

    /// Deadline for probing all mounts, in milliseconds.
    #[arg(long, default_value_t = config::DEFAULT_MOUNT_WAIT.as_millis() as u64)]
    mount_wait_ms: u64,

    /// Refresh window of the process summary, in milliseconds.
    #[arg(long, default_value_t = config::DEFAULT_REBUILD_WINDOW.as_millis() as u64)]
    rebuild_ms: u64,

    /// Number of slices the mount deadline is polled in.
    #[arg(long, default_value_t = config::DEFAULT_PROBE_STEPS)]
    probe_steps: u32,

    /// Decimals used for sizes.
    #[arg(long, default_value_t = config::DEFAULT_SIZE_PRECISION)]
    precision: usize,

    /// List processes using at least this much CPU (percent, lifetime average).
    #[arg(long, default_value = "1.0")]
    cpu_threshold: f64,

    /// List processes with at least this much virtual memory (bytes).
    #[arg(long, default_value = "1073741824")]
    vsize_threshold: u64,

    /// Process name to summarize.
    #[arg(long)]
    name: Option<String>,

    /// Print the report as JSON.
    #[arg(long)]
    json: bool,

    /// Repeat the report every N seconds until interrupted.
    #[arg(short, long)]
    interval: Option<u64>,

    /// Stop after this many reports in watch mode.
    #[arg(short, long)]
    count: Option<u64>,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is warn level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn collector_config(&self) -> CollectorConfig {
        CollectorConfig {
            proc_path: self.proc_path.clone(),
            value_duration: Duration::from_millis(self.value_duration_ms),
            mount_wait: Duration::from_millis(self.mount_wait_ms),
            rebuild_window: Duration::from_millis(self.rebuild_ms),
            probe_steps: self.probe_steps,
            size_precision: self.precision,
        }
    }
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Logs go to stderr so that stdout stays machine readable.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::WARN,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let directive = format!("hostmon={}", level)
        .parse::<Directive>()
        .unwrap_or_else(|_| LevelFilter::from_level(level).into());
    let filter = EnvFilter::from_default_env().add_directive(directive);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[derive(Serialize)]
struct Limits {
    cpus: Option<u64>,
    online_cpus: Option<u64>,
    page_size: Option<u64>,
    clock_ticks: Option<u64>,
    max_open_files: Option<u64>,
}

#[derive(Serialize)]
struct Report {
    timestamp: String,
    limits: Limits,
    system: SysInfo,
    mounts: Vec<MountRecord>,
    process_count: usize,
    busy_processes: Vec<ProcessRecord>,
    large_processes: Vec<ProcessRecord>,
    busy_groups: BTreeMap<String, ProcessGroupRecord>,
    group: Option<ProcessGroupRecord>,
}

fn build_report<F: FileSystem + Clone + 'static>(collector: &Collector<F>, args: &Args) -> Report {
    collector.build_summary(false);
    let scanner = collector.scanner();
    let processes = collector.processes();

    Report {
        timestamp: Local::now().to_rfc3339(),
        limits: Limits {
            cpus: sysconf::cpu_count(),
            online_cpus: sysconf::online_cpu_count(),
            page_size: sysconf::page_size(),
            clock_ticks: sysconf::ticks_per_second(),
            max_open_files: sysconf::max_open_files(),
        },
        system: collector.system().snapshot(false),
        mounts: collector.mounts().mounts(false).to_vec(),
        process_count: scanner.process_count(),
        busy_processes: scanner.by_cpu_threshold(args.cpu_threshold, true),
        large_processes: scanner.by_virtual_size_threshold(args.vsize_threshold),
        busy_groups: processes.by_cpu_threshold_grouped(args.cpu_threshold, true),
        group: args.name.as_deref().map(|name| processes.get_by_name(name)),
    }
}

fn print_text<F: FileSystem + Clone + 'static>(collector: &Collector<F>, report: &Report) {
    let size = |bytes: u64| collector.format_size(bytes as f64, -1);
    let sys = &report.system;

    println!("== {} ==", report.timestamp);
    println!(
        "memory: total {}, used {}, used w/o buffers {}, shared {}",
        size(sys.total_ram),
        size(sys.total_ram.saturating_sub(sys.free_ram)),
        size(
            sys.total_ram
                .saturating_sub(sys.free_ram)
                .saturating_sub(sys.buffer_ram)
        ),
        size(sys.shared_ram)
    );
    println!(
        "swap: total {}, free {}",
        size(sys.total_swap),
        size(sys.free_swap)
    );
    println!(
        "load: {:.2} {:.2} {:.2}, {} threads, up {}s",
        sys.load.one, sys.load.five, sys.load.fifteen, sys.threads, sys.uptime
    );

    println!("mounts:");
    for mount in &report.mounts {
        if mount.is_ok() {
            println!(
                "  {:<24} {:<10} total {:>12} free {:>12} used {:>5.1}%",
                mount.target,
                mount.fs_type,
                size(mount.total_space()),
                size(mount.free_space()),
                mount.used_ratio() * 100.0
            );
        } else {
            println!(
                "  {:<24} {:<10} error {}",
                mount.target, mount.fs_type, mount.probe_error
            );
        }
    }

    println!("processes: {}", report.process_count);
    for process in &report.busy_processes {
        println!(
            "  cpu  {:>7} {:<16} {:>6.2}%",
            process.pid, process.name, process.cumulative_cpu_percent
        );
    }
    for process in &report.large_processes {
        println!(
            "  vsz  {:>7} {:<16} {:>12}",
            process.pid,
            process.name,
            size(process.virtual_size)
        );
    }
    for group in report.busy_groups.values() {
        println!(
            "  group {:<16} x{:<4} {:>6.2}%",
            group.name, group.count, group.cumulative_cpu_percent
        );
    }
    if let Some(group) = &report.group {
        println!(
            "{}: {} processes, cpu {:.2}% (instant {:.2}%), virtual {}, resident {}",
            group.name,
            group.count,
            group.cumulative_cpu_percent,
            group.instant_cpu_percent,
            size(group.total_virtual_size),
            size(group.total_resident_size)
        );
    }
}

fn emit<F: FileSystem + Clone + 'static>(collector: &Collector<F>, args: &Args) -> bool {
    let report = build_report(collector, args);
    if args.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                error!("Failed to serialize report: {}", e);
                return false;
            }
        }
    } else {
        print_text(collector, &report);
    }
    true
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let collector = Collector::new(RealFs::new(), args.collector_config());
    info!("hostmon {} starting, proc={}", env!("CARGO_PKG_VERSION"), args.proc_path);

    let Some(interval) = args.interval else {
        if !emit(&collector, &args) {
            std::process::exit(1);
        }
        return;
    };

    // Setup graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    let interval = Duration::from_secs(interval.max(1));
    let mut reports: u64 = 0;
    while running.load(Ordering::SeqCst) {
        if !emit(&collector, &args) {
            std::process::exit(1);
        }
        reports += 1;
        if args.count.is_some_and(|count| reports >= count) {
            break;
        }

        // Sleep in small increments to respond to Ctrl-C quickly
        let mut slept = Duration::ZERO;
        while slept < interval && running.load(Ordering::SeqCst) {
            let step = Duration::from_millis(100).min(interval - slept);
            std::thread::sleep(step);
            slept += step;
        }
    }

    info!("hostmon stopped after {} reports", reports);
}

//! sysrate - prints CPU load, disk and filesystem throughput rates.
//!
//! Polls the sampler on a fixed interval and prints one line per metric, or
//! one JSON object per tick with `--json`.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use sysrate_core::fmt::{FmtStyle, format_bytes_rate, format_ghz, format_pct, format_rate};
use sysrate_core::{
    CancelToken, CpuSpeed, DisksIo, FsStatsSnapshot, LoadSnapshot, Platform, QueryError,
    QueryOptions, Sampler, SamplerConfig,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Metric {
    Load,
    Disks,
    Fs,
    Speed,
}

/// Counter-to-rate system sampler.
#[derive(Parser)]
#[command(name = "sysrate", about = "Prints system load and I/O rates", version)]
struct Args {
    /// Metrics to print (default: all).
    #[arg(value_enum)]
    metrics: Vec<Metric>,

    /// Sampling interval in seconds.
    #[arg(short, long, default_value = "1")]
    interval: u64,

    /// Calls closer than this return the previous rates.
    #[arg(long, default_value = "200", env = "SYSRATE_MIN_INTERVAL_MS")]
    min_interval_ms: u64,

    /// Gap after which an entity is re-baselined instead of averaged.
    #[arg(long, env = "SYSRATE_MAX_INTERVAL_MS")]
    max_interval_ms: Option<u64>,

    /// Abandon a collection that takes longer than this.
    #[arg(long, env = "SYSRATE_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    /// Path to /proc filesystem.
    #[arg(long, default_value = "/proc")]
    proc_path: String,

    /// Path to /sys filesystem.
    #[arg(long, default_value = "/sys")]
    sys_path: String,

    /// Platform whose collector to use (linux, darwin, win32, ...).
    /// Defaults to the host.
    #[arg(long)]
    platform: Option<Platform>,

    /// Only report this block device. Repeatable.
    #[arg(short, long = "device", value_name = "NAME")]
    devices: Vec<String>,

    /// Print one JSON object per tick.
    #[arg(long)]
    json: bool,

    /// Stop after this many ticks.
    #[arg(short = 'n', long)]
    count: Option<u64>,

    /// Increase logging verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn sampler_config(&self) -> SamplerConfig {
        let mut config =
            SamplerConfig::default().with_min_interval(Duration::from_millis(self.min_interval_ms));
        if let Some(ms) = self.max_interval_ms {
            config = config.with_max_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = self.timeout_ms {
            config = config.with_collect_timeout(Duration::from_millis(ms));
        }
        config
    }

    fn selected_metrics(&self) -> Vec<Metric> {
        if self.metrics.is_empty() {
            vec![Metric::Load, Metric::Disks, Metric::Fs, Metric::Speed]
        } else {
            let mut metrics = Vec::with_capacity(self.metrics.len());
            for metric in &self.metrics {
                if !metrics.contains(metric) {
                    metrics.push(*metric);
                }
            }
            metrics
        }
    }
}

/// Initializes the tracing subscriber. Logs go to stderr so stdout carries
/// only metric lines.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["sysrate", "sysrate_core"] {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// One tick of output.
#[derive(Debug, Default, Serialize)]
struct Tick {
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    load: Option<LoadSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    disks: Option<DisksIo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fs: Option<FsStatsSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    speed: Option<CpuSpeed>,
}

/// Queries every metric in `metrics`. Metrics the platform cannot serve are
/// dropped from the list after logging why.
fn sample_tick(sampler: &Sampler, options: &QueryOptions, metrics: &mut Vec<Metric>) -> Tick {
    let mut tick = Tick {
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        ..Tick::default()
    };

    metrics.retain(|metric| {
        let result: Result<(), QueryError> = match metric {
            Metric::Load => sampler.current_load(options).map(|v| tick.load = Some(v)),
            Metric::Disks => sampler.disks_io(options).map(|v| tick.disks = Some(v)),
            Metric::Fs => sampler.fs_stats(options).map(|v| tick.fs = Some(v)),
            Metric::Speed => sampler.cpu_current_speed(options).map(|v| tick.speed = Some(v)),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                error!("{}", e);
                false
            }
        }
    });

    tick
}

fn describe_load(load: &LoadSnapshot) -> String {
    format!(
        "load {} (usr {}, sys {}, nice {}, irq {}, steal {}) avg {:.2} cores {}",
        format_pct(load.current_load),
        format_pct(load.current_load_user),
        format_pct(load.current_load_system),
        format_pct(load.current_load_nice),
        format_pct(load.current_load_irq),
        format_pct(load.current_load_steal),
        load.avg_load,
        load.cpus.len()
    )
}

fn describe_disks(io: &DisksIo) -> String {
    let t = &io.total;
    let mut line = format!(
        "disks r {} w {} rx {} wx {} busy {}",
        format_rate(t.r_io_sec, FmtStyle::Compact),
        format_rate(t.w_io_sec, FmtStyle::Compact),
        format_bytes_rate(t.rx_sec, FmtStyle::Compact),
        format_bytes_rate(t.wx_sec, FmtStyle::Compact),
        format_pct(t.t_wait_percent)
    );
    for dev in &io.devices {
        line.push_str(&format!(
            " | {} {} {}",
            dev.name,
            format_bytes_rate(dev.tx_sec, FmtStyle::Compact),
            format_pct(dev.t_wait_percent)
        ));
    }
    line
}

fn describe_fs(fs: &FsStatsSnapshot) -> String {
    format!(
        "fs rx {} wx {} tx {}",
        format_bytes_rate(fs.rx_sec, FmtStyle::Detail),
        format_bytes_rate(fs.wx_sec, FmtStyle::Detail),
        format_bytes_rate(fs.tx_sec, FmtStyle::Detail)
    )
}

fn describe_speed(speed: &CpuSpeed) -> String {
    format!(
        "speed avg {} min {} max {}",
        format_ghz(speed.avg),
        format_ghz(speed.min),
        format_ghz(speed.max)
    )
}

fn print_tick(tick: &Tick, json: bool) {
    if json {
        match serde_json::to_string(tick) {
            Ok(line) => println!("{}", line),
            Err(e) => error!("Failed to serialize tick: {}", e),
        }
        return;
    }

    let mut lines = Vec::new();
    if let Some(load) = &tick.load {
        lines.push(describe_load(load));
    }
    if let Some(disks) = &tick.disks {
        lines.push(describe_disks(disks));
    }
    if let Some(fs) = &tick.fs {
        lines.push(describe_fs(fs));
    }
    if let Some(speed) = &tick.speed {
        lines.push(describe_speed(speed));
    }
    for line in lines {
        println!("{} {}", tick.timestamp, line);
    }
}

/// Sleeps for `duration`, waking early once `running` clears.
fn sleep_while_running(duration: Duration, running: &AtomicBool) {
    let slice = Duration::from_millis(100);
    let mut remaining = duration;
    while remaining > Duration::ZERO && running.load(Ordering::SeqCst) {
        let step = remaining.min(slice);
        std::thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let sampler = Sampler::procfs(args.sampler_config(), &args.proc_path, &args.sys_path);
    let cancel = CancelToken::new();
    let mut options = QueryOptions::default()
        .with_devices(args.devices.iter().cloned())
        .with_cancel(cancel.clone());
    options.platform = args.platform;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
        cancel.cancel();
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    let mut metrics = args.selected_metrics();
    let interval = Duration::from_secs(args.interval.max(1));
    let platform = options.platform.unwrap_or_else(Platform::current);
    info!("Sampling {:?} every {:?} on {}", metrics, interval, platform);

    // First round only establishes baselines.
    sample_tick(&sampler, &options, &mut metrics);
    if metrics.is_empty() {
        return ExitCode::FAILURE;
    }

    let mut ticks: u64 = 0;
    loop {
        sleep_while_running(interval, &running);
        if !running.load(Ordering::SeqCst) {
            break;
        }

        let tick = sample_tick(&sampler, &options, &mut metrics);
        print_tick(&tick, args.json);
        ticks += 1;
        debug!(
            "Tick #{}: {} counter resets so far",
            ticks,
            sampler
                .store(platform)
                .map_or(0, |store| store.reset_count())
        );

        if metrics.is_empty() {
            return ExitCode::FAILURE;
        }
        if args.count.is_some_and(|n| ticks >= n) {
            break;
        }
    }

    info!("Shutdown complete");
    ExitCode::SUCCESS
}

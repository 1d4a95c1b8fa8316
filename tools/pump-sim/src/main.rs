//! Headless audio pump simulator
//!
//! Opens a pump over a recording sink, replays a timed schedule of DMA
//! completions and vertical blanks, and prints the pump diagnostics.

use std::env;

use anyhow::{anyhow, bail, Context, Result};
use dp_audio::engine::{MixingEngine, SilentEngine, ToneEngine, Waveform};
use dp_audio::profile::{DriverProfile, SinkConfig};
use dp_audio::sink::{RecordingSink, SinkCall, SinkLog};
use dp_audio::{AudioPump, PendingTicks, StatKey};
use dp_core::config::{AudioConfig, HardwareProfile, OutputTopology};

/// Delay between arming the voice timer and its firing
const TIMER_DELAY_NS: u64 = 500_000;

const USAGE: &str = "Usage: pump-sim [--profile paula|arne|pamela|saga|portable] \
[--topology mixdown|directout|hardwareout] [--block N] [--rate HZ] [--refresh HZ] \
[--seconds N] [--stall-every N] [--silent]";

#[derive(Debug, Clone, PartialEq)]
struct SimOptions {
    profile: HardwareProfile,
    topology: OutputTopology,
    /// Requested block (the profile's preferred size when unset)
    block_size: Option<usize>,
    sample_rate: u32,
    refresh_rate: u32,
    seconds: u32,
    /// Drop every Nth vertical blank (0 keeps them all)
    stall_every: u32,
    silent: bool,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            profile: HardwareProfile::Pamela,
            topology: OutputTopology::MixDown,
            block_size: None,
            sample_rate: 44100,
            refresh_rate: 50,
            seconds: 10,
            stall_every: 0,
            silent: false,
        }
    }
}

impl SimOptions {
    fn requested_block(&self) -> usize {
        self.block_size
            .unwrap_or_else(|| DriverProfile::new(self.profile).preferred_buffer_size())
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct SimReport {
    block_size: usize,
    sample_rate: u32,
    period: u16,
    dma_ticks: u64,
    vblanks: u64,
    timer_ticks: u64,
    fills: u64,
    programmed: usize,
    stats: Vec<(StatKey, i32)>,
}

fn main() -> Result<()> {
    init_logging();

    let args: Vec<String> = env::args().skip(1).collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("{}", USAGE);
        return Ok(());
    }
    let options = parse_args(&args).context(USAGE)?;

    println!("=== Audio Pump Simulation ===\n");
    println!("Profile:   {:?}", options.profile);
    println!("Topology:  {:?}", options.topology);
    println!("Requested: {} samples at {} Hz", options.requested_block(), options.sample_rate);

    let report = simulate(&options)?;

    println!("\nNegotiated block {} at {} Hz (period {})", report.block_size, report.sample_rate, report.period);
    println!("DMA completions: {}", report.dma_ticks);
    println!("Vertical blanks: {}", report.vblanks);
    if report.timer_ticks > 0 {
        println!("Timer firings:   {}", report.timer_ticks);
    }
    println!("Blocks filled:   {}", report.fills);
    println!("Chunks armed:    {}", report.programmed);
    println!("\n=== Statistics ===");
    for (key, value) in &report.stats {
        println!("  {:<18} {}", key.name(), value);
    }
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(true)
        .init();
}

fn parse_args(args: &[String]) -> Result<SimOptions> {
    let mut options = SimOptions::default();
    let mut iter = args.iter();
    while let Some(flag) = iter.next() {
        if flag == "--silent" {
            options.silent = true;
            continue;
        }
        let value = iter
            .next()
            .ok_or_else(|| anyhow!("missing value for {}", flag))?;
        match flag.as_str() {
            "--profile" => options.profile = parse_profile(value)?,
            "--topology" => options.topology = parse_topology(value)?,
            "--block" => options.block_size = Some(value.parse().context("invalid block size")?),
            "--rate" => options.sample_rate = value.parse().context("invalid sample rate")?,
            "--refresh" => options.refresh_rate = value.parse().context("invalid refresh rate")?,
            "--seconds" => options.seconds = value.parse().context("invalid duration")?,
            "--stall-every" => options.stall_every = value.parse().context("invalid stall interval")?,
            other => bail!("unknown option {}", other),
        }
    }
    if options.refresh_rate == 0 {
        bail!("refresh rate must be non-zero");
    }
    Ok(options)
}

fn parse_profile(value: &str) -> Result<HardwareProfile> {
    Ok(match value.to_ascii_lowercase().as_str() {
        "paula" => HardwareProfile::Paula,
        "arne" => HardwareProfile::Arne,
        "pamela" => HardwareProfile::Pamela,
        "saga" => HardwareProfile::Saga,
        "portable" => HardwareProfile::Portable,
        other => bail!("unknown profile {}", other),
    })
}

fn parse_topology(value: &str) -> Result<OutputTopology> {
    Ok(match value.to_ascii_lowercase().as_str() {
        "mixdown" => OutputTopology::MixDown,
        "directout" => OutputTopology::DirectOut,
        "hardwareout" => OutputTopology::HardwareOut,
        other => bail!("unknown topology {}", other),
    })
}

fn build_pump(options: &SimOptions) -> (AudioPump, SinkLog) {
    let config = AudioConfig {
        profile: options.profile,
        topology: options.topology,
        block_size: options.requested_block(),
        sample_rate: options.sample_rate,
        refresh_rate: options.refresh_rate,
        ..AudioConfig::default()
    };
    let sink = RecordingSink::new(SinkConfig::new(config.profile, config.portable_channels));
    let log = sink.log();
    let engine: Box<dyn MixingEngine> = if options.silent {
        Box::new(SilentEngine)
    } else {
        Box::new(ToneEngine::new(Waveform::Square, 440.0, options.sample_rate))
    };
    (AudioPump::new(Box::new(sink), engine, &config), log)
}

/// Replay `options.seconds` of hardware events against a fresh pump
fn simulate(options: &SimOptions) -> Result<SimReport> {
    let (mut pump, log) = build_pump(options);
    let block = pump
        .open(options.requested_block(), options.sample_rate)
        .context("Failed to open audio pump")?;
    pump.start().context("Failed to start audio pump")?;

    let rate = pump.sample_rate() as u64;
    let dma_interval = block as u64 * 1_000_000_000 / rate.max(1);
    let vblank_interval = 1_000_000_000 / options.refresh_rate as u64;
    let end = options.seconds as u64 * 1_000_000_000;
    // HardwareOut has no DMA ring; only the engine tick drives it
    let has_ring = pump.ring().is_allocated();

    let mut report = SimReport::default();
    let mut next_dma = dma_interval;
    let mut next_vblank = vblank_interval;
    let mut next_timer: Option<u64> = None;
    let mut vblank_count = 0u64;

    loop {
        let now = [Some(next_dma).filter(|_| has_ring), Some(next_vblank), next_timer]
            .into_iter()
            .flatten()
            .min()
            .unwrap_or(end);
        if now >= end {
            break;
        }

        let mut pending = PendingTicks::empty();
        if has_ring && next_dma == now {
            pending |= PendingTicks::DMA;
            next_dma += dma_interval;
            report.dma_ticks += 1;
        }
        if next_timer == Some(now) {
            pending |= PendingTicks::TIMER;
            next_timer = None;
            report.timer_ticks += 1;
        }
        if next_vblank == now {
            next_vblank += vblank_interval;
            vblank_count += 1;
            let stalled = options.stall_every > 0 && vblank_count % options.stall_every as u64 == 0;
            if !stalled {
                pending |= PendingTicks::BUFFER;
                report.vblanks += 1;
            }
        }

        pump.dispatch(pending);
        if next_timer.is_none() && pump.timer_armed() {
            next_timer = Some(now + TIMER_DELAY_NS);
        }
    }

    report.block_size = block;
    report.sample_rate = pump.sample_rate();
    report.period = pump.period();
    report.fills = pump.stats().fills();
    report.programmed = log.count(|c| matches!(c, SinkCall::ProgramChannel { .. }));
    report.stats = StatKey::ALL.iter().map(|&key| (key, pump.statistic(key))).collect();
    tracing::info!("Simulation finished after {} s", options.seconds);

    pump.close();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_args() {
        let options = parse_args(&args(&[
            "--profile", "Saga", "--topology", "directout", "--block", "512", "--silent",
        ]))
        .unwrap();
        assert_eq!(options.profile, HardwareProfile::Saga);
        assert_eq!(options.topology, OutputTopology::DirectOut);
        assert_eq!(options.requested_block(), 512);
        assert!(options.silent);
        assert_eq!(options.sample_rate, 44100);

        let defaults = parse_args(&args(&["--profile", "paula"])).unwrap();
        assert_eq!(defaults.requested_block(), 8192);

        assert!(parse_args(&args(&["--profile", "sid"])).is_err());
        assert!(parse_args(&args(&["--block"])).is_err());
        assert!(parse_args(&args(&["--refresh", "0"])).is_err());
    }

    #[test]
    fn test_simulated_second_keeps_up() {
        let options = SimOptions {
            profile: HardwareProfile::Pamela,
            block_size: Some(1024),
            seconds: 1,
            ..SimOptions::default()
        };
        let report = simulate(&options).unwrap();

        assert_eq!(report.block_size, 1024);
        // 44100 / 1024 completions in one second
        assert_eq!(report.dma_ticks, 43);
        assert_eq!(report.vblanks, 49);
        // The producer never gets more than one block past the half-ring start
        assert!(report.fills <= report.dma_ticks + 1);
        assert!(report.fills >= report.dma_ticks);
        assert_eq!(report.programmed, 2 * (report.dma_ticks as usize + 1));
        assert_eq!(report.stats.len(), 4);
    }

    #[test]
    fn test_hardware_out_runs_timer() {
        let options = SimOptions {
            profile: HardwareProfile::Paula,
            topology: OutputTopology::HardwareOut,
            seconds: 1,
            ..SimOptions::default()
        };
        let report = simulate(&options).unwrap();

        assert_eq!(report.block_size, 8192);
        assert_eq!(report.sample_rate, 22050);
        assert_eq!(report.dma_ticks, 0);
        assert_eq!(report.programmed, 0);
        assert_eq!(report.fills, report.vblanks);
        // Enable phase then commit phase for the first voice
        assert!(report.timer_ticks >= 2);
    }
}

//! dmapump - DMA audio pump demo
//!
//! Plays a test tone through the portable cpal sink for a few seconds and
//! prints the pump diagnostics.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use dp_audio::driver::tick_channel;
use dp_audio::engine::{ToneEngine, Waveform};
use dp_audio::profile::SinkConfig;
use dp_audio::sink::CpalSink;
use dp_audio::{AudioDevice, AudioPump, StatKey};
use dp_core::config::{Config, HardwareProfile, OutputTopology};

fn main() -> Result<()> {
    let config = Config::load().unwrap_or_default();
    dp_core::logging::init(&config);

    let seconds: u64 = match std::env::args().nth(1) {
        Some(arg) => arg.parse().context("Duration must be a number of seconds")?,
        None => 3,
    };

    if !config.audio.enable {
        println!("Audio output is disabled in the configuration");
        return Ok(());
    }

    let mut audio = config.audio.clone();
    audio.profile = HardwareProfile::Portable;
    if audio.topology == OutputTopology::HardwareOut {
        tracing::warn!("Hardware voices need a Paula-class sink; mixing down instead");
        audio.topology = OutputTopology::MixDown;
    }
    tracing::info!("Starting dmapump demo ({:?})", audio.topology);

    let (ticks, rx) = tick_channel();
    let sink_config = SinkConfig::new(audio.profile, audio.portable_channels);
    let (sink, stream) = CpalSink::open(sink_config, audio.block_size, ticks.clone())
        .context("Failed to open audio output")?;

    let mut engine = ToneEngine::new(Waveform::Triangle, 440.0, stream.sample_rate());
    engine.set_volume(0.5);
    let pump = AudioPump::new(Box::new(sink), Box::new(engine), &audio);
    let mut device = AudioDevice::with_ticks(pump, ticks, rx);

    let block = device
        .open(audio.block_size, stream.sample_rate())
        .context("Failed to open audio pump")?;
    println!(
        "Playing {} Hz tone: block {} at {} Hz, {} output channels",
        440,
        block,
        stream.sample_rate(),
        stream.channels()
    );

    let source = device.start().context("Failed to start audio pump")?;

    // Stand-in for the display's vertical blank interrupt
    let running = Arc::new(AtomicBool::new(true));
    let vblank = {
        let running = running.clone();
        let interval = Duration::from_secs(1) / audio.refresh_rate.max(1);
        thread::Builder::new()
            .name("dp-vblank".into())
            .spawn(move || {
                while running.load(Ordering::Relaxed) {
                    source.vertical_blank();
                    thread::sleep(interval);
                }
            })
            .context("Failed to spawn vertical blank thread")?
    };

    thread::sleep(Duration::from_secs(seconds));
    running.store(false, Ordering::Relaxed);
    if vblank.join().is_err() {
        tracing::error!("Vertical blank thread panicked");
    }

    device.stop().context("Failed to stop audio pump")?;
    println!("\n=== Statistics ===");
    for key in StatKey::ALL {
        println!("  {:<18} {}", key.name(), device.statistic(key));
    }
    println!("  {:<18} {}", "DispatchRounds", device.dispatched_rounds());
    device.close();

    tracing::info!("dmapump demo finished");
    Ok(())
}

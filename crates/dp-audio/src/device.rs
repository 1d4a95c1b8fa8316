//! Host-facing audio device
//!
//! Bundles a shared [`AudioPump`] with its tick channel and dispatch thread.
//! The tick channel exists for the whole lifetime of the device, so event
//! sources wired to [`AudioDevice::tick_source`] survive stop/start cycles.

use std::sync::Arc;

use crossbeam::channel::Receiver;
use dp_core::config::AudioConfig;
use dp_core::error::Result;
use parking_lot::Mutex;

use crate::driver::{tick_channel, Tick, TickDriver, TickSource};
use crate::engine::MixingEngine;
use crate::profile::SinkConfig;
use crate::pump::{AudioPump, PumpState};
use crate::sink::NullSink;
use crate::stats::StatKey;

/// Audio device facade
pub struct AudioDevice {
    pump: Arc<Mutex<AudioPump>>,
    source: TickSource,
    rx: Receiver<Tick>,
    driver: Option<TickDriver>,
}

impl AudioDevice {
    /// Wrap a pump with a fresh tick channel
    pub fn new(pump: AudioPump) -> Self {
        let (source, rx) = tick_channel();
        Self::with_ticks(pump, source, rx)
    }

    /// Wrap a pump with a tick channel created earlier (see
    /// [`tick_channel`]), typically already handed to the sink.
    pub fn with_ticks(pump: AudioPump, source: TickSource, rx: Receiver<Tick>) -> Self {
        Self {
            pump: Arc::new(Mutex::new(pump)),
            source,
            rx,
            driver: None,
        }
    }

    /// Device backed by a [`NullSink`] for the configured profile
    pub fn with_null_sink(config: &AudioConfig, engine: Box<dyn MixingEngine>) -> Self {
        let sink = NullSink::new(SinkConfig::new(config.profile, config.portable_channels));
        Self::new(AudioPump::new(Box::new(sink), engine, config))
    }

    /// Open the pump; returns the actual block size
    pub fn open(&mut self, block_size: usize, sample_rate: u32) -> Result<usize> {
        self.pump.lock().open(block_size, sample_rate)
    }

    /// Start playback and the dispatch thread
    pub fn start(&mut self) -> Result<TickSource> {
        self.pump.lock().start()?;
        if self.driver.is_none() {
            let driver =
                TickDriver::spawn_with(self.pump.clone(), self.source.clone(), self.rx.clone())?;
            self.driver = Some(driver);
        }
        Ok(self.source.clone())
    }

    /// Stop playback; the dispatch thread keeps running
    pub fn stop(&mut self) -> Result<()> {
        self.pump.lock().stop()
    }

    pub fn pause(&mut self) {
        self.pump.lock().pause();
    }

    pub fn resume(&mut self) {
        self.pump.lock().resume();
    }

    /// Stop the dispatch thread, then close the pump
    pub fn close(&mut self) {
        if let Some(mut driver) = self.driver.take() {
            driver.shutdown();
        }
        // Ticks posted after shutdown belong to no one
        for _ in self.rx.try_iter() {}
        self.pump.lock().close();
    }

    /// Read one diagnostic
    pub fn statistic(&self, key: StatKey) -> i32 {
        self.pump.lock().statistic(key)
    }

    /// Read one diagnostic by raw key
    pub fn stat_value(&self, raw: u32) -> i32 {
        self.pump.lock().stat_value(raw)
    }

    /// Handle for posting hardware events
    pub fn tick_source(&self) -> TickSource {
        self.source.clone()
    }

    /// Dispatch rounds serviced by the running thread
    pub fn dispatched_rounds(&self) -> u64 {
        self.driver.as_ref().map_or(0, TickDriver::rounds)
    }

    pub fn state(&self) -> PumpState {
        self.pump.lock().state()
    }

    /// Shared pump, for inspection
    pub fn pump(&self) -> Arc<Mutex<AudioPump>> {
        self.pump.clone()
    }
}

impl Drop for AudioDevice {
    fn drop(&mut self) {
        self.close();
    }
}

//! Hardware profiles
//!
//! Each supported audio chip is described by data rather than by its own
//! driver type: channel count, sample width, register banking and how the
//! playback rate is negotiated.

use dp_core::config::{HardwareProfile, OutputTopology};
use dp_core::error::{AudioError, Result};

use crate::sample::SampleWidth;
use crate::sink::ChannelMask;

/// PAL chipset clock in Hz
pub const PAULA_CLOCK_PAL: u32 = 3_546_895;

/// Full hardware volume
pub const MAX_VOLUME: u8 = 0x40;

/// Base of the custom chip register file
pub const CUSTOM_REGBASE: u32 = 0x00df_f000;

/// Highest rate any profile accepts
pub const MAX_SAMPLE_RATE: u32 = 192_000;

/// Fixed playback period of the SAGA profile
const SAGA_PERIOD: u32 = 161;

/// Static description of a hardware family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverProfile {
    profile: HardwareProfile,
}

impl DriverProfile {
    pub fn new(profile: HardwareProfile) -> Self {
        Self { profile }
    }

    /// The underlying profile
    pub fn profile(&self) -> HardwareProfile {
        self.profile
    }

    /// Human-readable driver identifier
    pub fn driver_id(&self) -> &'static str {
        match self.profile {
            HardwareProfile::Paula => "Commodore Paula Audio 4-ch",
            HardwareProfile::Arne => "Apollo SAGA Arne 16-ch",
            HardwareProfile::Pamela => "PamelaAudio",
            HardwareProfile::Saga => "SAGAAudio",
            HardwareProfile::Portable => "Portable cpal output",
        }
    }

    /// Number of hardware channels (`portable` is used for the portable profile)
    pub fn channels(&self, portable: usize) -> usize {
        match self.profile {
            HardwareProfile::Paula | HardwareProfile::Pamela => 4,
            HardwareProfile::Arne => 16,
            HardwareProfile::Saga => 8,
            HardwareProfile::Portable => portable,
        }
    }

    /// Sample width of the DMA lanes
    pub fn width(&self) -> SampleWidth {
        match self.profile {
            HardwareProfile::Paula | HardwareProfile::Saga => SampleWidth::Bits8,
            HardwareProfile::Arne | HardwareProfile::Pamela | HardwareProfile::Portable => {
                SampleWidth::Bits16
            }
        }
    }

    /// Number of register banks (four channels per bank)
    pub fn banks(&self) -> usize {
        match self.profile {
            HardwareProfile::Saga => 2,
            _ => 1,
        }
    }

    /// Block size the driver works best with
    pub fn preferred_buffer_size(&self) -> usize {
        match self.profile {
            HardwareProfile::Paula => 8192,
            HardwareProfile::Arne => 4096,
            HardwareProfile::Pamela | HardwareProfile::Saga | HardwareProfile::Portable => 2048,
        }
    }

    /// Negotiate the playback rate for a requested rate
    pub fn negotiate_rate(&self, requested: u32) -> Result<u32> {
        if requested == 0 || requested > MAX_SAMPLE_RATE {
            return Err(AudioError::UnsupportedSampleRate(requested));
        }
        Ok(match self.profile {
            HardwareProfile::Paula => 22050,
            HardwareProfile::Arne | HardwareProfile::Pamela => requested.min(44100),
            HardwareProfile::Saga => PAULA_CLOCK_PAL / SAGA_PERIOD,
            HardwareProfile::Portable => requested,
        })
    }

    /// Hardware period for a negotiated rate
    pub fn period_for(&self, rate: u32) -> u16 {
        match self.profile {
            HardwareProfile::Saga => SAGA_PERIOD as u16,
            _ => (PAULA_CLOCK_PAL / rate.max(1)).min(u16::MAX as u32) as u16,
        }
    }

    /// Number of ring lanes a topology needs
    pub fn lanes_for(&self, topology: OutputTopology, portable: usize) -> usize {
        match topology {
            OutputTopology::MixDown => 2,
            OutputTopology::DirectOut => self.channels(portable),
            OutputTopology::HardwareOut => 0,
        }
    }

    /// Register block address of a channel
    pub fn channel_register(&self, channel: usize) -> u32 {
        let ch = channel as u32;
        match self.profile {
            HardwareProfile::Arne => CUSTOM_REGBASE + 0x400 + ((ch & 0xf) << 4),
            HardwareProfile::Saga => CUSTOM_REGBASE + ((ch >> 2) << 9) + 0xa0 + ((ch & 0x3) << 4),
            _ => CUSTOM_REGBASE + 0xa0 + ((ch & 0x3) << 4),
        }
    }
}

/// Sink configuration resolved once at device-open time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkConfig {
    /// Hardware family
    pub profile: HardwareProfile,
    /// Number of hardware channels
    pub channels: usize,
    /// Sample width of the channels
    pub width: SampleWidth,
    /// Register banks
    pub banks: usize,
    /// Base of the custom register file
    pub register_base: u32,
    /// Chip clock driving the period counters
    pub hardware_clock: u32,
}

impl SinkConfig {
    /// Resolve the sink configuration for a profile
    pub fn new(profile: HardwareProfile, portable_channels: usize) -> Self {
        let driver = DriverProfile::new(profile);
        Self {
            profile,
            channels: driver.channels(portable_channels),
            width: driver.width(),
            banks: driver.banks(),
            register_base: CUSTOM_REGBASE,
            hardware_clock: PAULA_CLOCK_PAL,
        }
    }

    /// Profile description
    pub fn driver(&self) -> DriverProfile {
        DriverProfile::new(self.profile)
    }

    /// Mask covering every hardware channel
    pub fn all_channels(&self) -> ChannelMask {
        ChannelMask::first(self.channels)
    }
}

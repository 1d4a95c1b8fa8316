//! Ring-buffered DMA audio pump for dmapump
//!
//! A software mixing engine produces fixed-size blocks on a slow tick; a
//! hardware sink drains them chunk by chunk on DMA-completion ticks. The
//! [`MixProxy`](proxy::MixProxy) adapts the engine's output to the chosen
//! topology and the [`RingBuffer`](ring::RingBuffer) decouples the two rates.

pub mod device;
pub mod driver;
pub mod engine;
pub mod profile;
pub mod proxy;
pub mod pump;
pub mod ring;
pub mod sample;
pub mod sink;
pub mod stats;
pub mod voice;

pub use device::AudioDevice;
pub use driver::{Tick, TickDriver, TickSource};
pub use engine::{MixingEngine, SilentEngine, ToneEngine, Waveform};
pub use profile::{DriverProfile, SinkConfig};
pub use proxy::{FilterHook, MixProxy};
pub use pump::{AudioPump, PendingTicks, PumpState};
pub use ring::RingBuffer;
pub use sink::{HardwareSink, NullSink, RecordingSink};
pub use stats::StatKey;
pub use voice::{ChannelEventAdapter, Voice, VoiceCallbacks};

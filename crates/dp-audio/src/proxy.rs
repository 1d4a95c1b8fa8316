//! Mix proxy: the buffer view handed to the mixing engine
//!
//! A proxy is created per opened device for one output topology. Every
//! buffering pass is bracketed by [`MixProxy::lock`] and
//! [`MixProxy::unlock`]; the engine writes into the proxy between the two,
//! and `unlock` performs the single conversion pass into the ring buffer.
//! The ring's write region is not touched before `unlock`.

use dp_core::config::OutputTopology;
use dp_core::error::{AudioError, Result};

use crate::ring::RingBuffer;
use crate::sample::{narrow_block, MAX_PRECISION_SHIFT};

/// Effects pass applied to the wide accumulator before narrowing
pub trait FilterHook {
    /// Process `accumulator`, which holds interleaved samples for `channels`
    fn process(&mut self, accumulator: &mut [i32], channels: usize);
}

/// Topology-specific buffers
#[derive(Debug)]
enum ProxyKind {
    /// Wide interleaved accumulator folded to `channels` lanes with clamping
    MixDown {
        accumulator: Vec<i32>,
        output: Vec<i16>,
        channels: usize,
    },
    /// One buffer per hardware channel, no interleaving
    DirectOut {
        buffers: Vec<Vec<i16>>,
        channels: usize,
    },
    /// No software buffer; the engine drives hardware voices directly
    HardwareOut { channels: usize },
}

/// Buffer adapter between the mixing engine and the ring buffer
#[derive(Debug)]
pub struct MixProxy {
    kind: ProxyKind,
    /// Block size of the current (or last) pass
    block_size: usize,
    /// Precision shift of the current pass
    shift: u32,
    /// Between `lock` and `unlock`
    locked: bool,
    /// Engine was inactive for this pass
    silent: bool,
    /// Bumped every time the buffers are reallocated
    generation: u64,
}

impl MixProxy {
    fn with_kind(kind: ProxyKind) -> Self {
        Self {
            kind,
            block_size: 0,
            shift: 0,
            locked: false,
            silent: false,
            generation: 0,
        }
    }

    /// Interleaved mix-down proxy for `channels` outputs
    pub fn mix_down(channels: usize) -> Self {
        Self::with_kind(ProxyKind::MixDown {
            accumulator: Vec::new(),
            output: Vec::new(),
            channels,
        })
    }

    /// Per-channel direct output proxy
    pub fn direct_out(channels: usize) -> Self {
        Self::with_kind(ProxyKind::DirectOut {
            buffers: Vec::new(),
            channels,
        })
    }

    /// Hardware voice proxy
    pub fn hardware_out(channels: usize) -> Self {
        Self::with_kind(ProxyKind::HardwareOut { channels })
    }

    /// Create the proxy matching a topology
    pub fn for_topology(topology: OutputTopology, channels: usize) -> Self {
        match topology {
            OutputTopology::MixDown => Self::mix_down(channels),
            OutputTopology::DirectOut => Self::direct_out(channels),
            OutputTopology::HardwareOut => Self::hardware_out(channels),
        }
    }

    /// Output topology of this proxy
    pub fn topology(&self) -> OutputTopology {
        match self.kind {
            ProxyKind::MixDown { .. } => OutputTopology::MixDown,
            ProxyKind::DirectOut { .. } => OutputTopology::DirectOut,
            ProxyKind::HardwareOut { .. } => OutputTopology::HardwareOut,
        }
    }

    /// Number of channels the engine renders
    pub fn channels(&self) -> usize {
        match self.kind {
            ProxyKind::MixDown { channels, .. }
            | ProxyKind::DirectOut { channels, .. }
            | ProxyKind::HardwareOut { channels } => channels,
        }
    }

    /// Block size of the current pass
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Precision shift of the current pass
    pub fn precision_shift(&self) -> u32 {
        self.shift
    }

    /// Number of buffer reallocations so far
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Check whether a pass is in progress
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Prepare for one mixing pass.
    ///
    /// Buffers are reallocated only when `block_size` differs from the
    /// previous pass; they are always cleared to silence.
    pub fn lock(&mut self, block_size: usize, shift: u32) -> Result<()> {
        if self.locked {
            return Err(AudioError::ProxyAlreadyLocked);
        }
        if shift > MAX_PRECISION_SHIFT {
            return Err(AudioError::InvalidPrecisionShift(shift));
        }

        let resized = block_size != self.block_size;
        match &mut self.kind {
            ProxyKind::MixDown {
                accumulator,
                output,
                channels,
            } => {
                if resized {
                    *accumulator = vec![0; block_size * *channels];
                    *output = vec![0; block_size * *channels];
                    self.generation += 1;
                } else {
                    accumulator.fill(0);
                }
            }
            ProxyKind::DirectOut { buffers, channels } => {
                if resized {
                    *buffers = vec![vec![0; block_size]; *channels];
                    self.generation += 1;
                } else {
                    for buffer in buffers.iter_mut() {
                        buffer.fill(0);
                    }
                }
            }
            ProxyKind::HardwareOut { .. } => {}
        }

        self.block_size = block_size;
        self.shift = shift;
        self.silent = false;
        self.locked = true;
        Ok(())
    }

    /// Record that the engine produced nothing this pass
    pub fn mark_silent(&mut self) {
        self.silent = true;
    }

    /// Wide interleaved accumulator (mix-down only)
    pub fn accumulator(&self) -> Option<&[i32]> {
        match &self.kind {
            ProxyKind::MixDown { accumulator, .. } => Some(accumulator),
            _ => None,
        }
    }

    /// Mutable accumulator for the engine (mix-down only)
    pub fn accumulator_mut(&mut self) -> Option<&mut [i32]> {
        match &mut self.kind {
            ProxyKind::MixDown { accumulator, .. } => Some(accumulator),
            _ => None,
        }
    }

    /// Per-channel buffers for the engine (direct output only)
    pub fn channel_buffers_mut(&mut self) -> Option<&mut [Vec<i16>]> {
        match &mut self.kind {
            ProxyKind::DirectOut { buffers, .. } => Some(buffers),
            _ => None,
        }
    }

    /// Finish the pass: run the optional filter, then convert into the
    /// ring's write region exactly once.
    pub fn unlock(
        &mut self,
        filter: Option<&mut dyn FilterHook>,
        ring: &mut RingBuffer,
    ) -> Result<()> {
        if !self.locked {
            return Err(AudioError::ProxyNotLocked);
        }
        self.locked = false;

        let shift = self.shift;
        let silent = self.silent;
        match &mut self.kind {
            ProxyKind::MixDown {
                accumulator,
                output,
                channels,
            } => {
                if let Some(filter) = filter {
                    filter.process(accumulator, *channels);
                }
                narrow_block(accumulator, output, shift);

                let lanes = ring.lane_count().min(*channels);
                for lane in 0..lanes {
                    ring.write_interleaved(lane, output, *channels);
                }
            }
            ProxyKind::DirectOut { buffers, .. } => {
                let lanes = ring.lane_count().min(buffers.len());
                for lane in 0..lanes {
                    if silent {
                        ring.zero_block(lane);
                    } else {
                        ring.write_block(lane, &buffers[lane]);
                    }
                }
            }
            ProxyKind::HardwareOut { .. } => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{clamp_bounds, ChunkRef, SampleWidth};

    struct Gain(i32);

    impl FilterHook for Gain {
        fn process(&mut self, accumulator: &mut [i32], _channels: usize) {
            for sample in accumulator.iter_mut() {
                *sample *= self.0;
            }
        }
    }

    #[test]
    fn test_lock_is_idempotent_for_same_size() {
        let mut proxy = MixProxy::mix_down(2);
        let mut ring = RingBuffer::new();
        ring.allocate(256, 2, SampleWidth::Bits16).unwrap();

        proxy.lock(256, 4).unwrap();
        let generation = proxy.generation();
        let ptr = proxy.accumulator().unwrap().as_ptr();
        proxy.accumulator_mut().unwrap()[0] = 1234;
        proxy.unlock(None, &mut ring).unwrap();

        proxy.lock(256, 4).unwrap();
        assert_eq!(proxy.generation(), generation);
        assert_eq!(proxy.accumulator().unwrap().as_ptr(), ptr);
        assert!(proxy.accumulator().unwrap().iter().all(|&s| s == 0));
        proxy.unlock(None, &mut ring).unwrap();
    }

    #[test]
    fn test_lock_reallocates_on_resize() {
        let mut proxy = MixProxy::mix_down(2);
        let mut ring = RingBuffer::new();
        ring.allocate(512, 2, SampleWidth::Bits16).unwrap();

        proxy.lock(256, 0).unwrap();
        proxy.accumulator_mut().unwrap().fill(77);
        proxy.unlock(None, &mut ring).unwrap();
        let generation = proxy.generation();

        proxy.lock(512, 0).unwrap();
        assert_eq!(proxy.generation(), generation + 1);
        let acc = proxy.accumulator().unwrap();
        assert_eq!(acc.len(), 1024);
        assert!(acc.iter().all(|&s| s == 0));
        proxy.unlock(None, &mut ring).unwrap();
    }

    #[test]
    fn test_unlock_requires_lock() {
        let mut proxy = MixProxy::mix_down(2);
        let mut ring = RingBuffer::new();
        assert!(matches!(
            proxy.unlock(None, &mut ring),
            Err(AudioError::ProxyNotLocked)
        ));

        proxy.lock(16, 0).unwrap();
        assert!(proxy.is_locked());
        assert!(matches!(proxy.lock(16, 0), Err(AudioError::ProxyAlreadyLocked)));
        proxy.unlock(None, &mut ring).unwrap();
        assert!(!proxy.is_locked());
        assert!(matches!(
            MixProxy::mix_down(2).lock(16, 16),
            Err(AudioError::InvalidPrecisionShift(16))
        ));
    }

    #[test]
    fn test_mix_down_converts_and_deinterleaves() {
        let shift = 2;
        let (lower, upper) = clamp_bounds(shift);
        let mut proxy = MixProxy::mix_down(2);
        let mut ring = RingBuffer::new();
        ring.allocate(4, 2, SampleWidth::Bits16).unwrap();

        proxy.lock(4, shift).unwrap();
        proxy
            .accumulator_mut()
            .unwrap()
            .copy_from_slice(&[upper + 1, lower - 1, upper, lower, 400, -400, 0, 3]);

        // Nothing reaches the ring before unlock
        assert!(ring.write_region(0).is_silent());
        assert!(ring.write_region(1).is_silent());

        proxy.unlock(None, &mut ring).unwrap();
        assert_eq!(
            ring.write_region(0),
            ChunkRef::I16(&[i16::MAX, i16::MAX, 100, 0])
        );
        assert_eq!(
            ring.write_region(1),
            ChunkRef::I16(&[i16::MIN, i16::MIN, -100, 0])
        );
    }

    #[test]
    fn test_filter_runs_before_conversion() {
        let mut proxy = MixProxy::mix_down(2);
        let mut ring = RingBuffer::new();
        ring.allocate(2, 2, SampleWidth::Bits16).unwrap();

        proxy.lock(2, 0).unwrap();
        proxy.accumulator_mut().unwrap().copy_from_slice(&[10, 20, 30, 40]);
        let mut gain = Gain(2);
        proxy.unlock(Some(&mut gain), &mut ring).unwrap();

        assert_eq!(ring.write_region(0), ChunkRef::I16(&[20, 60]));
        assert_eq!(ring.write_region(1), ChunkRef::I16(&[40, 80]));
    }

    #[test]
    fn test_direct_out_narrows_per_channel() {
        let mut proxy = MixProxy::direct_out(3);
        let mut ring = RingBuffer::new();
        ring.allocate(2, 3, SampleWidth::Bits8).unwrap();

        proxy.lock(2, 0).unwrap();
        for (i, buffer) in proxy.channel_buffers_mut().unwrap().iter_mut().enumerate() {
            buffer.fill((i as i16 + 1) << 8);
        }
        proxy.unlock(None, &mut ring).unwrap();

        assert_eq!(ring.write_region(0), ChunkRef::I8(&[1, 1]));
        assert_eq!(ring.write_region(1), ChunkRef::I8(&[2, 2]));
        assert_eq!(ring.write_region(2), ChunkRef::I8(&[3, 3]));
    }

    #[test]
    fn test_direct_out_silent_zero_fills() {
        let mut proxy = MixProxy::direct_out(2);
        let mut ring = RingBuffer::new();
        ring.allocate(2, 2, SampleWidth::Bits16).unwrap();

        // Leave stale data in the write region
        ring.write_block(0, &[5, 5]);
        ring.write_block(1, &[6, 6]);

        proxy.lock(2, 0).unwrap();
        proxy.mark_silent();
        proxy.unlock(None, &mut ring).unwrap();

        assert!(ring.write_region(0).is_silent());
        assert!(ring.write_region(1).is_silent());
    }

    #[test]
    fn test_hardware_out_has_no_buffers() {
        let mut proxy = MixProxy::for_topology(OutputTopology::HardwareOut, 4);
        let mut ring = RingBuffer::new();

        proxy.lock(1024, 0).unwrap();
        assert!(proxy.accumulator_mut().is_none());
        assert!(proxy.channel_buffers_mut().is_none());
        proxy.unlock(None, &mut ring).unwrap();
        assert_eq!(proxy.topology(), OutputTopology::HardwareOut);
        assert_eq!(proxy.channels(), 4);
    }
}

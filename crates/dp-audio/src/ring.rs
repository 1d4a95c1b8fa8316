//! Output ring buffer shared by the buffering and DMA ticks
//!
//! One lane of samples per hardware output (left/right for mix-down, one per
//! channel for direct output). The producer fills `fetch_size` samples at the
//! write cursor; the consumer hands `chunk_size` samples at the read cursor to
//! the DMA engine. Capacity is `RING_DEPTH` chunks so one missed buffering
//! tick can be absorbed without the consumer running dry.
//!
//! A fill never lands on the chunk being read and never brings the write
//! cursor onto the read cursor, so the lead of the writer over the reader
//! stays within `fetch_size..=capacity - fetch_size` after every fill.
//!
//! The cursors are atomics so a reader on another thread always observes a
//! consistent position; each cursor is only ever advanced by its owner.

use std::sync::atomic::{AtomicUsize, Ordering};

use dp_core::error::{AudioError, Result};

use crate::sample::{ChunkRef, SampleBuffer, SampleWidth};

/// Ring capacity in chunks
pub const RING_DEPTH: usize = 4;

/// Largest block size a device may request
pub const MAX_BLOCK_SIZE: usize = 65536;

/// Fixed-capacity circular sample buffer with separate read/write cursors
#[derive(Debug, Default)]
pub struct RingBuffer {
    /// Total samples per lane (`chunk_size * RING_DEPTH`)
    capacity: usize,
    /// Samples drained per DMA tick
    chunk_size: usize,
    /// Samples filled per buffering tick
    fetch_size: usize,
    /// Consumer cursor
    read: AtomicUsize,
    /// Producer cursor
    write: AtomicUsize,
    /// Per-lane storage
    lanes: Vec<SampleBuffer>,
}

impl RingBuffer {
    /// Create an unallocated ring buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Round a requested block size up to the next power of two
    pub fn round_block_size(requested: usize) -> Result<usize> {
        if requested == 0 || requested > MAX_BLOCK_SIZE {
            return Err(AudioError::InvalidBlockSize(requested));
        }
        Ok(requested.next_power_of_two())
    }

    /// (Re)allocate the ring for `lanes` outputs of the given width.
    ///
    /// Returns the actual block size. Cursors reset to `0` (read) and
    /// `capacity / 2` (write), giving the consumer a half-ring head start.
    /// On failure the ring is left unallocated.
    pub fn allocate(&mut self, requested: usize, lanes: usize, width: SampleWidth) -> Result<usize> {
        self.release();

        let block = Self::round_block_size(requested)?;
        if lanes == 0 {
            return Err(AudioError::InvalidChannelCount(lanes));
        }

        let capacity = block * RING_DEPTH;
        let mut storage = Vec::new();
        storage
            .try_reserve_exact(lanes)
            .map_err(|e| AudioError::Allocation(e.to_string()))?;
        for _ in 0..lanes {
            storage.push(try_zeroed(width, capacity)?);
        }

        self.capacity = capacity;
        self.chunk_size = block;
        self.fetch_size = block;
        self.read.store(0, Ordering::Release);
        self.write.store(capacity / 2, Ordering::Release);
        self.lanes = storage;

        Ok(block)
    }

    /// Free the storage and reset all sizes
    pub fn release(&mut self) {
        self.lanes = Vec::new();
        self.capacity = 0;
        self.chunk_size = 0;
        self.fetch_size = 0;
        self.read.store(0, Ordering::Release);
        self.write.store(0, Ordering::Release);
    }

    /// Check whether storage is allocated
    pub fn is_allocated(&self) -> bool {
        !self.lanes.is_empty()
    }

    /// Capacity in samples per lane
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples drained per DMA tick
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Samples filled per buffering tick
    pub fn fetch_size(&self) -> usize {
        self.fetch_size
    }

    /// Number of lanes
    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Sample width of the lanes
    pub fn width(&self) -> Option<SampleWidth> {
        self.lanes.first().map(SampleBuffer::width)
    }

    /// Current read cursor
    #[inline]
    pub fn read_cursor(&self) -> usize {
        self.read.load(Ordering::Acquire)
    }

    /// Current write cursor
    #[inline]
    pub fn write_cursor(&self) -> usize {
        self.write.load(Ordering::Acquire)
    }

    /// Samples separating the write cursor from the read cursor, ignoring
    /// wraparound. This is the gate the producer checks before each fill.
    #[inline]
    pub fn distance_to_read(&self) -> usize {
        let read = self.read_cursor();
        let write = self.write_cursor();
        if read <= write {
            write - read
        } else {
            (self.capacity - read) + write
        }
    }

    /// Check whether the producer may fill one more block.
    ///
    /// The block must start past the consumer's chunk, and after the fill
    /// at least one block must still separate the write cursor from the
    /// read cursor.
    #[inline]
    pub fn can_write(&self) -> bool {
        if !self.is_allocated() {
            return false;
        }
        let distance = self.distance_to_read();
        distance >= self.fetch_size && distance + self.fetch_size <= self.capacity - self.fetch_size
    }

    /// Move the write cursor forward by `n` samples
    pub fn advance_write(&self, n: usize) {
        advance(&self.write, n, self.capacity);
    }

    /// Move the read cursor forward by `n` samples
    pub fn advance_read(&self, n: usize) {
        advance(&self.read, n, self.capacity);
    }

    /// Chunk of `lane` owned by the consumer (at the read cursor)
    pub fn read_chunk(&self, lane: usize) -> ChunkRef<'_> {
        self.lanes[lane].chunk(self.read_cursor(), self.chunk_size)
    }

    /// Chunk of `lane` starting at an arbitrary ring offset
    pub fn chunk_at(&self, lane: usize, offset: usize) -> ChunkRef<'_> {
        self.lanes[lane].chunk(offset % self.capacity.max(1), self.chunk_size)
    }

    /// Block of `lane` at the write cursor
    pub fn write_region(&self, lane: usize) -> ChunkRef<'_> {
        self.lanes[lane].chunk(self.write_cursor(), self.fetch_size)
    }

    /// Store one block of 16-bit samples into `lane` at the write cursor
    pub fn write_block(&mut self, lane: usize, samples: &[i16]) {
        let offset = self.write_cursor();
        let len = samples.len().min(self.fetch_size);
        self.lanes[lane].write_from(offset, &samples[..len]);
    }

    /// Store one lane of an interleaved block at the write cursor
    pub fn write_interleaved(&mut self, lane: usize, interleaved: &[i16], stride: usize) {
        let offset = self.write_cursor();
        let len = interleaved.len().min(self.fetch_size * stride);
        self.lanes[lane].write_strided(offset, &interleaved[..len], stride, lane);
    }

    /// Silence one block of `lane` at the write cursor
    pub fn zero_block(&mut self, lane: usize) {
        let offset = self.write_cursor();
        self.lanes[lane].fill_zero(offset, self.fetch_size);
    }
}

#[inline]
fn advance(cursor: &AtomicUsize, n: usize, capacity: usize) {
    if capacity == 0 {
        return;
    }
    let mut next = cursor.load(Ordering::Relaxed) + n;
    if next >= capacity {
        next %= capacity;
    }
    cursor.store(next, Ordering::Release);
}

fn try_zeroed(width: SampleWidth, len: usize) -> Result<SampleBuffer> {
    let alloc_err = |e: std::collections::TryReserveError| {
        AudioError::Allocation(format!("{} samples: {}", len, e))
    };
    Ok(match width {
        SampleWidth::Bits8 => {
            let mut buf: Vec<i8> = Vec::new();
            buf.try_reserve_exact(len).map_err(alloc_err)?;
            buf.resize(len, 0);
            SampleBuffer::I8(buf)
        }
        SampleWidth::Bits16 => {
            let mut buf: Vec<i16> = Vec::new();
            buf.try_reserve_exact(len).map_err(alloc_err)?;
            buf.resize(len, 0);
            SampleBuffer::I16(buf)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_of_two_rounding() {
        for requested in 1..=MAX_BLOCK_SIZE {
            let block = RingBuffer::round_block_size(requested).unwrap();
            assert!(block.is_power_of_two());
            assert!(block >= requested);
            assert!(block / 2 < requested, "{block} is not the smallest for {requested}");
        }
    }

    #[test]
    fn test_rejects_invalid_block_sizes() {
        assert!(matches!(
            RingBuffer::round_block_size(0),
            Err(AudioError::InvalidBlockSize(0))
        ));
        assert!(matches!(
            RingBuffer::round_block_size(MAX_BLOCK_SIZE + 1),
            Err(AudioError::InvalidBlockSize(_))
        ));

        let mut ring = RingBuffer::new();
        assert!(ring.allocate(64, 0, SampleWidth::Bits8).is_err());
        assert!(!ring.is_allocated());
    }

    #[test]
    fn test_allocate_layout() {
        let mut ring = RingBuffer::new();
        let block = ring.allocate(2000, 2, SampleWidth::Bits16).unwrap();

        assert_eq!(block, 2048);
        assert_eq!(ring.chunk_size(), 2048);
        assert_eq!(ring.fetch_size(), 2048);
        assert_eq!(ring.capacity(), 2048 * RING_DEPTH);
        assert_eq!(ring.read_cursor(), 0);
        assert_eq!(ring.write_cursor(), ring.capacity() / 2);
        assert_eq!(ring.lane_count(), 2);
        assert_eq!(ring.width(), Some(SampleWidth::Bits16));
    }

    #[test]
    fn test_distance_wraps() {
        let mut ring = RingBuffer::new();
        ring.allocate(4, 1, SampleWidth::Bits8).unwrap();
        assert_eq!(ring.distance_to_read(), 8);

        ring.advance_write(8);
        assert_eq!(ring.write_cursor(), 0);
        assert_eq!(ring.distance_to_read(), 0);
        assert!(!ring.can_write());

        // Three chunks ahead: one more fill would close the ring
        ring.advance_read(4);
        assert_eq!(ring.distance_to_read(), 12);
        assert!(!ring.can_write());

        ring.advance_read(4);
        assert_eq!(ring.distance_to_read(), 8);
        assert!(ring.can_write());
    }

    #[test]
    fn test_fill_keeps_one_block_before_reader() {
        let mut ring = RingBuffer::new();
        ring.allocate(4, 1, SampleWidth::Bits8).unwrap();

        assert!(ring.can_write());
        ring.advance_write(4);
        assert_eq!(ring.distance_to_read(), 12);
        assert!(!ring.can_write());

        // Alternates between two and three chunks of lead
        for _ in 0..8 {
            ring.advance_read(4);
            assert!(ring.can_write());
            ring.advance_write(4);
            assert_eq!(ring.distance_to_read(), ring.capacity() - ring.fetch_size());
            assert_ne!(ring.write_cursor(), ring.read_cursor());
        }
    }

    #[test]
    fn test_chunk_at_wraps_offset() {
        let mut ring = RingBuffer::new();
        ring.allocate(4, 1, SampleWidth::Bits16).unwrap();
        ring.write_block(0, &[5, 6, 7, 8]);
        let write = ring.write_cursor();

        assert_eq!(ring.chunk_at(0, write), ChunkRef::I16(&[5, 6, 7, 8]));
        assert_eq!(ring.chunk_at(0, write + ring.capacity()), ring.chunk_at(0, write));
        assert!(ring.chunk_at(0, 0).is_silent());
    }

    #[test]
    fn test_cursors_stay_in_range() {
        let mut ring = RingBuffer::new();
        ring.allocate(16, 1, SampleWidth::Bits8).unwrap();

        let mut x: u32 = 0xdead_beef;
        for _ in 0..10_000 {
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            if x & 1 == 0 {
                if ring.can_write() {
                    ring.advance_write(ring.fetch_size());
                    let lead = ring.distance_to_read();
                    assert!(lead >= ring.fetch_size());
                    assert!(lead <= ring.capacity() - ring.fetch_size());
                }
            } else {
                ring.advance_read(ring.chunk_size());
            }
            assert!(ring.read_cursor() < ring.capacity());
            assert!(ring.write_cursor() < ring.capacity());
        }
    }

    #[test]
    fn test_block_writes_land_at_write_cursor() {
        let mut ring = RingBuffer::new();
        ring.allocate(4, 2, SampleWidth::Bits16).unwrap();

        ring.write_interleaved(0, &[1, 10, 2, 20, 3, 30, 4, 40], 2);
        ring.write_interleaved(1, &[1, 10, 2, 20, 3, 30, 4, 40], 2);
        assert_eq!(ring.write_region(0), ChunkRef::I16(&[1, 2, 3, 4]));
        assert_eq!(ring.write_region(1), ChunkRef::I16(&[10, 20, 30, 40]));

        // Nothing leaked into the consumer's chunk
        assert!(ring.read_chunk(0).is_silent());

        ring.zero_block(1);
        assert!(ring.write_region(1).is_silent());
    }
}

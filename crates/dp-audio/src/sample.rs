//! Sample format conversion
//!
//! The mixing engine accumulates into wide `i32` samples. Hardware lanes hold
//! signed 8-bit or 16-bit PCM. Narrowing the accumulator uses a fixed-point
//! convention where `128 << shift` is one 8-bit "unit" of full scale, so the
//! clamp window is `[-(128 << shift) * 256, (128 << shift) * 256 - 1]`
//! before the precision shift is applied.

/// Largest precision shift for which the clamp window fits in an `i32`
pub const MAX_PRECISION_SHIFT: u32 = 15;

/// Width of one hardware sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleWidth {
    /// Signed 8-bit
    Bits8,
    /// Signed 16-bit
    Bits16,
}

impl SampleWidth {
    /// Bytes per sample
    pub fn bytes(self) -> usize {
        match self {
            Self::Bits8 => 1,
            Self::Bits16 => 2,
        }
    }

    /// Bits per sample
    pub fn bits(self) -> u32 {
        self.bytes() as u32 * 8
    }
}

/// Clamp window for a precision shift, as `(lower, upper)` inclusive
#[inline]
pub fn clamp_bounds(shift: u32) -> (i32, i32) {
    let full = (128i32 << shift) * 256;
    (-full, full - 1)
}

/// Narrow one accumulator sample: clamp to the shift's window, then
/// arithmetic-shift right by `shift`.
#[inline]
pub fn narrow(acc: i32, shift: u32) -> i16 {
    let (lower, upper) = clamp_bounds(shift);
    (acc.clamp(lower, upper) >> shift) as i16
}

/// Narrow a block of accumulator samples into `dst`.
///
/// Converts `min(src.len(), dst.len())` samples.
pub fn narrow_block(src: &[i32], dst: &mut [i16], shift: u32) {
    let (lower, upper) = clamp_bounds(shift);
    for (out, &acc) in dst.iter_mut().zip(src) {
        *out = (acc.clamp(lower, upper) >> shift) as i16;
    }
}

/// Truncate a 16-bit sample to the 8-bit hardware format
#[inline]
pub fn to_i8(sample: i16) -> i8 {
    (sample >> 8) as i8
}

/// Widen an 8-bit hardware sample back to the 16-bit scale
#[inline]
pub fn from_i8(sample: i8) -> i16 {
    (sample as i16) << 8
}

/// Convert a 16-bit sample to a normalized float in `[-1.0, 1.0)`
#[inline]
pub fn to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Owned sample storage for one hardware lane
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleBuffer {
    I8(Vec<i8>),
    I16(Vec<i16>),
}

impl SampleBuffer {
    /// Allocate `len` samples of silence
    pub fn zeroed(width: SampleWidth, len: usize) -> Self {
        match width {
            SampleWidth::Bits8 => Self::I8(vec![0; len]),
            SampleWidth::Bits16 => Self::I16(vec![0; len]),
        }
    }

    /// Sample width of this buffer
    pub fn width(&self) -> SampleWidth {
        match self {
            Self::I8(_) => SampleWidth::Bits8,
            Self::I16(_) => SampleWidth::Bits16,
        }
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        match self {
            Self::I8(buf) => buf.len(),
            Self::I16(buf) => buf.len(),
        }
    }

    /// Check if the buffer holds no samples
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrow `len` samples starting at `offset`
    pub fn chunk(&self, offset: usize, len: usize) -> ChunkRef<'_> {
        match self {
            Self::I8(buf) => ChunkRef::I8(&buf[offset..offset + len]),
            Self::I16(buf) => ChunkRef::I16(&buf[offset..offset + len]),
        }
    }

    /// Store 16-bit samples at `offset`, narrowing to this buffer's width
    pub fn write_from(&mut self, offset: usize, src: &[i16]) {
        match self {
            Self::I8(buf) => {
                for (out, &s) in buf[offset..offset + src.len()].iter_mut().zip(src) {
                    *out = to_i8(s);
                }
            }
            Self::I16(buf) => buf[offset..offset + src.len()].copy_from_slice(src),
        }
    }

    /// Store every `stride`-th sample of `src`, starting at index `phase`.
    ///
    /// Used to split an interleaved block into one lane.
    pub fn write_strided(&mut self, offset: usize, src: &[i16], stride: usize, phase: usize) {
        let lane = src.iter().skip(phase).step_by(stride);
        match self {
            Self::I8(buf) => {
                for (out, &s) in buf[offset..].iter_mut().zip(lane) {
                    *out = to_i8(s);
                }
            }
            Self::I16(buf) => {
                for (out, &s) in buf[offset..].iter_mut().zip(lane) {
                    *out = s;
                }
            }
        }
    }

    /// Silence `len` samples starting at `offset`
    pub fn fill_zero(&mut self, offset: usize, len: usize) {
        match self {
            Self::I8(buf) => buf[offset..offset + len].fill(0),
            Self::I16(buf) => buf[offset..offset + len].fill(0),
        }
    }
}

/// Borrowed view of a run of hardware samples (pointer + length)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkRef<'a> {
    I8(&'a [i8]),
    I16(&'a [i16]),
}

impl<'a> ChunkRef<'a> {
    /// Number of samples in the view
    pub fn len(&self) -> usize {
        match self {
            Self::I8(s) => s.len(),
            Self::I16(s) => s.len(),
        }
    }

    /// Check if the view is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sample width of the view
    pub fn width(&self) -> SampleWidth {
        match self {
            Self::I8(_) => SampleWidth::Bits8,
            Self::I16(_) => SampleWidth::Bits16,
        }
    }

    /// Sample at `index` on the 16-bit scale
    pub fn get_i16(&self, index: usize) -> Option<i16> {
        match self {
            Self::I8(s) => s.get(index).map(|&v| from_i8(v)),
            Self::I16(s) => s.get(index).copied(),
        }
    }

    /// Check whether every sample is zero
    pub fn is_silent(&self) -> bool {
        match self {
            Self::I8(s) => s.iter().all(|&v| v == 0),
            Self::I16(s) => s.iter().all(|&v| v == 0),
        }
    }

    /// Copy the view out as 16-bit samples
    pub fn to_i16_vec(&self) -> Vec<i16> {
        match self {
            Self::I8(s) => s.iter().map(|&v| from_i8(v)).collect(),
            Self::I16(s) => s.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(acc: i32, shift: u32) -> i16 {
        let lower = -((128i64 << shift) * 256);
        let upper = ((128i64 << shift) * 256) - 1;
        ((acc as i64).clamp(lower, upper) >> shift) as i16
    }

    #[test]
    fn test_clamp_bounds() {
        assert_eq!(clamp_bounds(0), (-32768, 32767));
        assert_eq!(clamp_bounds(8), (-8_388_608, 8_388_607));
        assert_eq!(
            clamp_bounds(MAX_PRECISION_SHIFT),
            (-1_073_741_824, 1_073_741_823)
        );
    }

    #[test]
    fn test_narrow_at_and_beyond_bounds() {
        for shift in 0..=MAX_PRECISION_SHIFT {
            let (lower, upper) = clamp_bounds(shift);

            assert_eq!(narrow(upper, shift), reference(upper, shift));
            assert_eq!(narrow(upper + 1, shift), reference(upper, shift));
            assert_eq!(narrow(lower, shift), reference(lower, shift));
            assert_eq!(narrow(lower - 1, shift), reference(lower, shift));

            // Full scale always lands on the 16-bit extremes
            assert_eq!(narrow(upper + 1, shift), i16::MAX);
            assert_eq!(narrow(lower - 1, shift), i16::MIN);
        }
    }

    #[test]
    fn test_narrow_matches_reference_sweep() {
        let mut x: u32 = 0x1234_5678;
        for shift in 0..=MAX_PRECISION_SHIFT {
            for _ in 0..2000 {
                // xorshift32
                x ^= x << 13;
                x ^= x >> 17;
                x ^= x << 5;
                let acc = x as i32;
                assert_eq!(narrow(acc, shift), reference(acc, shift), "acc={acc} shift={shift}");
            }
        }
    }

    #[test]
    fn test_narrow_shift_zero_is_identity_in_range() {
        for acc in [-32768, -1, 0, 1, 12345, 32767] {
            assert_eq!(narrow(acc, 0), acc as i16);
        }
    }

    #[test]
    fn test_narrow_block() {
        let src = [0, 1 << 20, -(1 << 20), 300 << 4];
        let mut dst = [0i16; 4];
        narrow_block(&src, &mut dst, 4);
        assert_eq!(dst, [0, i16::MAX, i16::MIN, 300]);
    }

    #[test]
    fn test_width_conversion() {
        assert_eq!(to_i8(0x7fff), 0x7f);
        assert_eq!(to_i8(-32768), -128);
        assert_eq!(to_i8(0x00ff), 0);
        assert_eq!(from_i8(-1), -256);
        assert_eq!(to_i8(-0x1234), -0x13);
        assert_eq!(SampleWidth::Bits8.bytes(), 1);
        assert_eq!(SampleWidth::Bits16.bits(), 16);
    }

    #[test]
    fn test_sample_buffer_write_and_chunk() {
        let mut buf = SampleBuffer::zeroed(SampleWidth::Bits8, 8);
        buf.write_from(2, &[0x1000, -0x1000]);
        assert_eq!(buf.chunk(2, 2), ChunkRef::I8(&[0x10, -0x10]));
        assert!(buf.chunk(4, 4).is_silent());

        buf.fill_zero(0, 8);
        assert!(buf.chunk(0, 8).is_silent());
    }

    #[test]
    fn test_sample_buffer_strided() {
        let interleaved = [1, -1, 2, -2, 3, -3];
        let mut left = SampleBuffer::zeroed(SampleWidth::Bits16, 4);
        let mut right = SampleBuffer::zeroed(SampleWidth::Bits16, 4);
        left.write_strided(1, &interleaved, 2, 0);
        right.write_strided(1, &interleaved, 2, 1);

        assert_eq!(left, SampleBuffer::I16(vec![0, 1, 2, 3]));
        assert_eq!(right, SampleBuffer::I16(vec![0, -1, -2, -3]));
    }
}

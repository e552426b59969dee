//! Block averaging of interleaved 16-bit samples

/// Truncating mean of one block of samples, across all channels
pub type BlockAverage = i32;

/// Reduces a stream of interleaved samples to one average per fixed-size block.
///
/// Partial blocks are carried across calls, so data may arrive in arbitrary
/// chunk sizes. A dangling odd byte from [`push_bytes`](Self::push_bytes) is
/// carried the same way.
#[derive(Debug, Clone)]
pub struct SampleBlockAverager {
    block_size: usize,
    /// Samples accumulated in the current block
    count: usize,
    /// Running sum of the current block
    sum: i64,
    /// First half of a sample split across two byte chunks
    pending_byte: Option<u8>,
}

impl SampleBlockAverager {
    /// Create an averager for blocks of `block_size` samples
    ///
    /// A block size of zero is treated as one.
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
            count: 0,
            sum: 0,
            pending_byte: None,
        }
    }

    /// Number of samples per block
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Feed samples, calling `emit` once for every block completed
    pub fn push_samples(&mut self, samples: &[i16], mut emit: impl FnMut(BlockAverage)) {
        for &sample in samples {
            self.push_one(sample, &mut emit);
        }
    }

    /// Feed raw native-endian sample bytes, as delivered by a record stream
    pub fn push_bytes(&mut self, bytes: &[u8], mut emit: impl FnMut(BlockAverage)) {
        let mut rest = bytes;

        if let Some(first) = self.pending_byte {
            let Some((&second, tail)) = rest.split_first() else {
                return;
            };
            self.pending_byte = None;
            self.push_one(i16::from_ne_bytes([first, second]), &mut emit);
            rest = tail;
        }

        let mut pairs = rest.chunks_exact(2);
        for pair in &mut pairs {
            self.push_one(i16::from_ne_bytes([pair[0], pair[1]]), &mut emit);
        }
        if let [last] = pairs.remainder() {
            self.pending_byte = Some(*last);
        }
    }

    fn push_one(&mut self, sample: i16, emit: &mut impl FnMut(BlockAverage)) {
        self.sum += i64::from(sample);
        self.count += 1;
        if self.count == self.block_size {
            // Integer division truncates toward zero
            let average = self.sum / self.block_size as i64;
            self.sum = 0;
            self.count = 0;
            emit(average as BlockAverage);
        }
    }
}

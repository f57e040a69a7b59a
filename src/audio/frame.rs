//! Fixed-size audio windows.
//!
//! Devices deliver reads of arbitrary length; the detector wants windows of
//! exactly `chunk_size` samples. [`FrameSplitter`] carries the remainder of
//! each read over to the next one.

/// One fixed-length PCM16 window.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Position of this window in the capture stream.
    pub sequence: u64,
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl AudioChunk {
    /// Returns the duration of this chunk in milliseconds.
    pub fn duration_ms(&self) -> u32 {
        (self.samples.len() as u64 * 1000 / u64::from(self.sample_rate.max(1))) as u32
    }
}

/// Re-frames a sample stream into fixed windows.
#[derive(Debug)]
pub struct FrameSplitter {
    chunk_size: usize,
    sample_rate: u32,
    remainder: Vec<i16>,
    sequence: u64,
}

impl FrameSplitter {
    pub fn new(chunk_size: usize, sample_rate: u32) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            sample_rate,
            remainder: Vec::with_capacity(chunk_size),
            sequence: 0,
        }
    }

    /// Append samples and return every complete window now available.
    pub fn push(&mut self, samples: &[i16]) -> Vec<AudioChunk> {
        self.remainder.extend_from_slice(samples);
        let complete = self.remainder.len() / self.chunk_size;
        let mut chunks = Vec::with_capacity(complete);
        for window in self.remainder.chunks_exact(self.chunk_size) {
            chunks.push(AudioChunk {
                sequence: self.sequence,
                samples: window.to_vec(),
                sample_rate: self.sample_rate,
            });
            self.sequence += 1;
        }
        self.remainder.drain(..complete * self.chunk_size);
        chunks
    }

    /// Pad the leftover samples with silence into a final window, if any.
    pub fn flush(&mut self) -> Option<AudioChunk> {
        if self.remainder.is_empty() {
            return None;
        }
        let mut samples = std::mem::take(&mut self.remainder);
        samples.resize(self.chunk_size, 0);
        let chunk = AudioChunk {
            sequence: self.sequence,
            samples,
            sample_rate: self.sample_rate,
        };
        self.sequence += 1;
        Some(chunk)
    }

    /// Samples waiting for a full window.
    pub fn buffered(&self) -> usize {
        self.remainder.len()
    }
}

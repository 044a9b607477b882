//! Fixed-size multichannel audio chunk buffer
//!
//! [`ChunkSampleBuffer`] is the unit of audio exchanged between the engine,
//! tracks and processors: `channel_count` channels of [`AUDIO_CHUNK_SIZE`]
//! frames each, stored contiguously channel by channel.
//!
//! A buffer either owns its storage or is a non-owning view that borrows a
//! contiguous channel range of another buffer. Views are what make the
//! track's in-place chain rotation possible without copying. Two rules are
//! on the caller: a view must not outlive its backing buffer, and overlapping
//! views must never be written concurrently. Buffers are handed out for the
//! duration of a single process call and never shared between threads while
//! in use.

use crate::{Sample, AUDIO_CHUNK_SIZE};

/// Multichannel audio block of `AUDIO_CHUNK_SIZE` frames per channel
#[derive(Debug)]
pub struct ChunkSampleBuffer {
    buffer: *mut Sample,
    channel_count: usize,
    owns_buffer: bool,
}

// SAFETY: the storage is plain samples; ownership of a buffer confers
// exclusive access to it, and views follow the single-thread block-scoped
// access rules documented above.
unsafe impl Send for ChunkSampleBuffer {}

impl ChunkSampleBuffer {
    /// Create an owning buffer with zeroed storage for `channel_count` channels
    pub fn new(channel_count: usize) -> Self {
        let storage = vec![0.0 as Sample; channel_count * AUDIO_CHUNK_SIZE];
        let mut storage = storage.into_boxed_slice();
        let buffer = storage.as_mut_ptr();
        std::mem::forget(storage);

        Self {
            buffer,
            channel_count,
            owns_buffer: true,
        }
    }

    /// Create a non-owning view over `channel_count` channels of `source`,
    /// starting at `first_channel`.
    ///
    /// The view shares storage with `source` and must not outlive it.
    pub fn create_non_owning_buffer(
        source: &ChunkSampleBuffer,
        first_channel: usize,
        channel_count: usize,
    ) -> Self {
        assert!(first_channel + channel_count <= source.channel_count);

        Self {
            // SAFETY: offset stays within the source allocation per the
            // assert above
            buffer: unsafe { source.buffer.add(first_channel * AUDIO_CHUNK_SIZE) },
            channel_count,
            owns_buffer: false,
        }
    }

    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Read access to one channel
    #[inline]
    pub fn channel(&self, index: usize) -> &[Sample] {
        assert!(index < self.channel_count);
        // SAFETY: in bounds per the assert; shared access only
        unsafe {
            std::slice::from_raw_parts(self.buffer.add(index * AUDIO_CHUNK_SIZE), AUDIO_CHUNK_SIZE)
        }
    }

    /// Write access to one channel
    #[inline]
    pub fn channel_mut(&mut self, index: usize) -> &mut [Sample] {
        assert!(index < self.channel_count);
        // SAFETY: in bounds per the assert; &mut self gives exclusive access
        // to this buffer or view
        unsafe {
            std::slice::from_raw_parts_mut(
                self.buffer.add(index * AUDIO_CHUNK_SIZE),
                AUDIO_CHUNK_SIZE,
            )
        }
    }

    /// Zero every sample
    pub fn clear(&mut self) {
        for ch in 0..self.channel_count {
            self.channel_mut(ch).fill(0.0);
        }
    }

    /// Copy the contents of `source` into this buffer.
    ///
    /// Channel counts must match.
    pub fn replace(&mut self, source: &ChunkSampleBuffer) {
        assert_eq!(self.channel_count, source.channel_count);
        for ch in 0..self.channel_count {
            let src = source.channel(ch).as_ptr();
            let dst = self.channel_mut(ch);
            // SAFETY: both slices are AUDIO_CHUNK_SIZE long
            unsafe {
                std::ptr::copy(src, dst.as_mut_ptr(), AUDIO_CHUNK_SIZE);
            }
        }
    }

    /// Sum `source` into this buffer.
    ///
    /// `source` must have the same channel count, or exactly one channel
    /// which is then added to every channel of this buffer.
    pub fn add(&mut self, source: &ChunkSampleBuffer) {
        self.add_with_gain(source, 1.0);
    }

    /// Sum `source` scaled by `gain` into this buffer
    pub fn add_with_gain(&mut self, source: &ChunkSampleBuffer, gain: Sample) {
        assert!(source.channel_count == self.channel_count || source.channel_count == 1);
        for ch in 0..self.channel_count {
            let src_ch = if source.channel_count == 1 { 0 } else { ch };
            let src = source.channel(src_ch).as_ptr();
            let dst = self.channel_mut(ch);
            for (i, sample) in dst.iter_mut().enumerate() {
                // SAFETY: i < AUDIO_CHUNK_SIZE
                *sample += unsafe { *src.add(i) } * gain;
            }
        }
    }

    /// Multiply every sample by `gain` in place
    pub fn apply_gain(&mut self, gain: Sample) {
        for ch in 0..self.channel_count {
            for sample in self.channel_mut(ch) {
                *sample *= gain;
            }
        }
    }
}

impl Drop for ChunkSampleBuffer {
    fn drop(&mut self) {
        if self.owns_buffer {
            let len = self.channel_count * AUDIO_CHUNK_SIZE;
            // SAFETY: the storage was allocated in new() as a boxed slice of
            // exactly this length and has not been freed since
            unsafe {
                drop(Vec::from_raw_parts(self.buffer, len, len));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owning_buffer_is_zeroed() {
        let buffer = ChunkSampleBuffer::new(4);
        assert_eq!(buffer.channel_count(), 4);
        for ch in 0..4 {
            assert!(buffer.channel(ch).iter().all(|&s| s == 0.0));
        }
    }

    #[test]
    fn test_clear_and_apply_gain() {
        let mut buffer = ChunkSampleBuffer::new(2);
        buffer.channel_mut(0).fill(1.0);
        buffer.channel_mut(1).fill(-0.5);

        buffer.apply_gain(2.0);
        assert_eq!(buffer.channel(0)[0], 2.0);
        assert_eq!(buffer.channel(1)[0], -1.0);

        buffer.clear();
        assert!(buffer.channel(0).iter().all(|&s| s == 0.0));
        assert!(buffer.channel(1).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_add_with_gain() {
        let mut a = ChunkSampleBuffer::new(2);
        let mut b = ChunkSampleBuffer::new(2);
        a.channel_mut(0).fill(1.0);
        b.channel_mut(0).fill(0.5);
        b.channel_mut(1).fill(0.25);

        a.add_with_gain(&b, 2.0);
        assert_eq!(a.channel(0)[0], 2.0);
        assert_eq!(a.channel(1)[0], 0.5);
    }

    #[test]
    fn test_mono_source_broadcast() {
        let mut stereo = ChunkSampleBuffer::new(2);
        let mut mono = ChunkSampleBuffer::new(1);
        mono.channel_mut(0).fill(0.5);

        stereo.add(&mono);
        assert_eq!(stereo.channel(0)[0], 0.5);
        assert_eq!(stereo.channel(1)[0], 0.5);
    }

    #[test]
    fn test_non_owning_view_shares_storage() {
        let mut backing = ChunkSampleBuffer::new(4);
        let mut view = ChunkSampleBuffer::create_non_owning_buffer(&backing, 2, 2);
        assert_eq!(view.channel_count(), 2);

        view.channel_mut(0).fill(0.75);
        assert_eq!(backing.channel(2)[0], 0.75);
        assert_eq!(backing.channel(3)[0], 0.0);

        backing.channel_mut(3).fill(0.25);
        assert_eq!(view.channel(1)[0], 0.25);
    }

    #[test]
    fn test_replace_copies_samples() {
        let mut a = ChunkSampleBuffer::new(2);
        let mut b = ChunkSampleBuffer::new(2);
        b.channel_mut(0).fill(0.1);
        b.channel_mut(1).fill(0.2);

        a.replace(&b);
        assert_eq!(a.channel(0)[10], 0.1);
        assert_eq!(a.channel(1)[10], 0.2);
    }
}

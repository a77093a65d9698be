//! Interleaved sample ring.
//!
//! One producer advances `write_pos`, one consumer advances `read_pos`; both
//! are frame indices taken modulo the capacity. Nothing stops the producer
//! from lapping the consumer: an overrun silently overwrites unread frames.

#[derive(Clone, Debug)]
pub struct SampleRing {
    samples: Vec<f32>,
    capacity_frames: usize,
    channels: usize,
    write_pos: usize,
    read_pos: usize,
}

impl SampleRing {
    pub fn new(capacity_frames: usize, channels: usize) -> Self {
        let capacity_frames = capacity_frames.max(1);
        let channels = channels.max(1);
        Self {
            samples: vec![0.0; capacity_frames * channels],
            capacity_frames,
            channels,
            write_pos: 0,
            read_pos: 0,
        }
    }

    pub fn capacity_frames(&self) -> usize {
        self.capacity_frames
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn write_pos(&self) -> usize {
        self.write_pos
    }

    pub fn read_pos(&self) -> usize {
        self.read_pos
    }

    /// Copy whole interleaved frames in at the write position and advance it.
    /// A trailing partial frame is ignored. Returns the frames written.
    pub fn write_frames(&mut self, interleaved: &[f32]) -> usize {
        let frames = interleaved.len() / self.channels;
        let len = self.samples.len();
        let start = self.write_pos * self.channels;
        for (i, sample) in interleaved[..frames * self.channels].iter().enumerate() {
            self.samples[(start + i) % len] = *sample;
        }
        self.write_pos = (self.write_pos + frames) % self.capacity_frames;
        frames
    }

    /// Fill `out` with whole frames from the read position and advance it.
    pub fn read_frames(&mut self, out: &mut [f32]) -> usize {
        let frames = out.len() / self.channels;
        let len = self.samples.len();
        let start = self.read_pos * self.channels;
        for (i, slot) in out[..frames * self.channels].iter_mut().enumerate() {
            *slot = self.samples[(start + i) % len];
        }
        self.read_pos = (self.read_pos + frames) % self.capacity_frames;
        frames
    }

    /// The `frames` most recently written, oldest first.
    pub fn last_written(&self, frames: usize) -> Vec<f32> {
        let frames = frames.min(self.capacity_frames);
        let len = self.samples.len();
        let start_frame = (self.write_pos + self.capacity_frames - frames) % self.capacity_frames;
        let start = start_frame * self.channels;
        (0..frames * self.channels)
            .map(|i| self.samples[(start + i) % len])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn write_then_read_preserves_order() {
        let mut ring = SampleRing::new(8, 2);
        assert_eq!(ring.write_frames(&[1.0, -1.0, 2.0, -2.0, 3.0, -3.0]), 3);
        let mut out = [0.0; 6];
        assert_eq!(ring.read_frames(&mut out), 3);
        assert_eq!(out, [1.0, -1.0, 2.0, -2.0, 3.0, -3.0]);
        assert_eq!((ring.write_pos(), ring.read_pos()), (3, 3));
    }

    #[test]
    fn wraps_around_capacity() {
        let mut ring = SampleRing::new(4, 1);
        ring.write_frames(&[1.0, 2.0, 3.0]);
        ring.write_frames(&[4.0, 5.0, 6.0]);
        assert_eq!(ring.write_pos(), 2);
        assert_eq!(ring.last_written(4), vec![3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn overrun_overwrites_silently() {
        let mut ring = SampleRing::new(2, 1);
        ring.write_frames(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let mut out = [0.0; 2];
        ring.read_frames(&mut out);
        // Five frames into two slots: the newest survive.
        assert_eq!(ring.write_pos(), 1);
        assert_eq!(out, [5.0, 4.0]);
    }

    #[test]
    fn partial_trailing_frame_is_ignored() {
        let mut ring = SampleRing::new(4, 2);
        assert_eq!(ring.write_frames(&[1.0, 2.0, 3.0]), 1);
        assert_eq!(ring.write_pos(), 1);
    }

    proptest! {
        #[test]
        fn write_cursor_advances_by_frames_modulo_capacity(
            capacity in 1usize..64,
            channels in 1usize..4,
            batches in proptest::collection::vec(0usize..100, 1..20),
        ) {
            let mut ring = SampleRing::new(capacity, channels);
            let mut expected = 0usize;
            for frames in batches {
                let batch: Vec<f32> = (0..frames * channels).map(|i| i as f32).collect();
                let before = ring.write_pos();
                prop_assert_eq!(ring.write_frames(&batch), frames);
                expected = (expected + frames) % capacity;
                prop_assert_eq!(ring.write_pos(), (before + frames) % capacity);
                prop_assert_eq!(ring.write_pos(), expected);
                if frames > 0 && frames <= capacity {
                    prop_assert_eq!(ring.last_written(frames), batch);
                }
            }
        }
    }
}

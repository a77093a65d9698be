//! Audio graph destinations.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::AudioError;

/// Where rendered blocks end up.
pub trait AudioSink: Send {
    fn write(&mut self, interleaved: &[f32]);

    /// Flush and close the destination.
    fn finish(&mut self) -> Result<(), AudioError> {
        Ok(())
    }
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullSink;

impl AudioSink for NullSink {
    fn write(&mut self, _interleaved: &[f32]) {}
}

/// Keeps every sample in memory; clones share the same buffer.
#[derive(Clone, Debug, Default)]
pub struct CaptureSink {
    samples: Arc<Mutex<Vec<f32>>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> Vec<f32> {
        self.samples.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.samples.lock().map_or(0, |s| s.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AudioSink for CaptureSink {
    fn write(&mut self, interleaved: &[f32]) {
        if let Ok(mut samples) = self.samples.lock() {
            samples.extend_from_slice(interleaved);
        }
    }
}

/// 32-bit float WAV file.
pub struct WavSink {
    path: PathBuf,
    writer: Option<hound::WavWriter<BufWriter<File>>>,
}

impl WavSink {
    pub fn create(path: &Path, sample_rate: u32, channels: u16) -> Result<Self, AudioError> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let writer = hound::WavWriter::create(path, spec)
            .map_err(|e| AudioError::Sink(format!("{}: {e}", path.display())))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(writer),
        })
    }
}

impl AudioSink for WavSink {
    fn write(&mut self, interleaved: &[f32]) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        for sample in interleaved {
            if let Err(err) = writer.write_sample(*sample) {
                tracing::warn!(error = %err, path = %self.path.display(), "WAV write failed; closing sink");
                self.writer = None;
                return;
            }
        }
    }

    fn finish(&mut self) -> Result<(), AudioError> {
        match self.writer.take() {
            Some(writer) => writer
                .finalize()
                .map_err(|e| AudioError::Sink(format!("{}: {e}", self.path.display()))),
            None => Ok(()),
        }
    }
}

impl Drop for WavSink {
    fn drop(&mut self) {
        if let Err(err) = self.finish() {
            tracing::warn!(error = %err, "failed to finalize WAV output");
        }
    }
}

/// Sink selection, resolved when the audio context is created.
#[derive(Clone, Debug, Default)]
pub enum AudioOutput {
    #[default]
    Null,
    Capture(CaptureSink),
    Wav(PathBuf),
}

impl AudioOutput {
    pub fn open(&self, sample_rate: u32, channels: u16) -> Result<Box<dyn AudioSink>, AudioError> {
        Ok(match self {
            AudioOutput::Null => Box::new(NullSink),
            AudioOutput::Capture(sink) => Box::new(sink.clone()),
            AudioOutput::Wav(path) => Box::new(WavSink::create(path, sample_rate, channels)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_clones_share_samples() {
        let capture = CaptureSink::new();
        let mut sink = AudioOutput::Capture(capture.clone()).open(48_000, 2).unwrap();
        sink.write(&[0.5, -0.5]);
        assert_eq!(capture.samples(), vec![0.5, -0.5]);
    }

    #[test]
    fn wav_sink_round_trips_float_samples() {
        let path = std::env::temp_dir().join(format!("kagura-sink-{}.wav", std::process::id()));
        {
            let mut sink = WavSink::create(&path, 22_050, 1).unwrap();
            sink.write(&[0.25, -0.75, 1.0]);
            sink.finish().unwrap();
        }
        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 22_050);
        let samples: Vec<f32> = reader.samples::<f32>().map(Result::unwrap).collect();
        assert_eq!(samples, vec![0.25, -0.75, 1.0]);
        let _ = std::fs::remove_file(&path);
    }
}

//! Dedicated audio-processing thread.
//!
//! Mirrors a worklet processor: it owns its own ring, is sized by an `Init`
//! message, fed by `Write` messages and asked for output by `Render`. The
//! bridge never shares memory with it; everything crosses a channel.

use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded, unbounded};

use crate::audio::ring::SampleRing;
use crate::error::AudioError;

/// Longest the bridge waits for a rendered block before emitting silence.
const RENDER_TIMEOUT: Duration = Duration::from_millis(250);

enum Message {
    Init { ring_frames: usize, channels: usize },
    Write(Vec<f32>),
    Render { frames: usize, reply: Sender<Vec<f32>> },
    Shutdown,
}

/// Outcome of polling a pending registration.
#[derive(Debug)]
pub enum Registration {
    Pending,
    Ready,
    Failed(AudioError),
}

pub struct Worklet {
    tx: Sender<Message>,
    ready: Option<Receiver<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Worklet {
    /// Start registering the processor. Readiness is reported later through
    /// [`Worklet::poll_ready`].
    pub fn register() -> Result<Self, AudioError> {
        let (tx, rx) = unbounded::<Message>();
        let (ready_tx, ready_rx) = bounded::<()>(1);
        let thread = std::thread::Builder::new()
            .name("kagura-audio-worklet".into())
            .spawn(move || {
                let _ = ready_tx.send(());
                run(rx);
            })
            .map_err(|e| AudioError::Worklet(e.to_string()))?;
        Ok(Self {
            tx,
            ready: Some(ready_rx),
            thread: Some(thread),
        })
    }

    pub fn poll_ready(&mut self) -> Registration {
        let Some(ready) = self.ready.as_ref() else {
            return Registration::Ready;
        };
        match ready.try_recv() {
            Ok(()) => {
                self.ready = None;
                Registration::Ready
            }
            Err(TryRecvError::Empty) => Registration::Pending,
            Err(TryRecvError::Disconnected) => {
                Registration::Failed(AudioError::Worklet("processor exited before registering".into()))
            }
        }
    }

    /// Block until registration resolves. Used by tests and the runner's
    /// warm-up; the bridge itself only polls.
    pub fn wait_ready(&mut self, timeout: Duration) -> Registration {
        let Some(ready) = self.ready.as_ref() else {
            return Registration::Ready;
        };
        match ready.recv_timeout(timeout) {
            Ok(()) => {
                self.ready = None;
                Registration::Ready
            }
            Err(RecvTimeoutError::Timeout) => Registration::Pending,
            Err(RecvTimeoutError::Disconnected) => {
                Registration::Failed(AudioError::Worklet("processor exited before registering".into()))
            }
        }
    }

    pub fn init(&self, ring_frames: usize, channels: usize) {
        self.send(Message::Init { ring_frames, channels });
    }

    pub fn write(&self, interleaved: Vec<f32>) {
        self.send(Message::Write(interleaved));
    }

    /// Ask the processor for `frames` frames; silence if it does not answer.
    pub fn render(&self, frames: usize, channels: usize) -> Vec<f32> {
        let (reply, rx) = bounded(1);
        self.send(Message::Render { frames, reply });
        match rx.recv_timeout(RENDER_TIMEOUT) {
            Ok(block) => block,
            Err(err) => {
                tracing::warn!(error = %err, "worklet did not render in time; emitting silence");
                vec![0.0; frames * channels]
            }
        }
    }

    fn send(&self, message: Message) {
        if self.tx.send(message).is_err() {
            tracing::warn!("audio worklet is gone; message dropped");
        }
    }

    pub fn shutdown(&mut self) {
        let _ = self.tx.send(Message::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("audio worklet thread panicked");
            }
        }
    }
}

impl Drop for Worklet {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(rx: Receiver<Message>) {
    let mut ring: Option<SampleRing> = None;
    for message in rx {
        match message {
            Message::Init { ring_frames, channels } => {
                tracing::debug!(ring_frames, channels, "worklet ring initialized");
                ring = Some(SampleRing::new(ring_frames, channels));
            }
            Message::Write(data) => {
                if let Some(ring) = ring.as_mut() {
                    ring.write_frames(&data);
                }
            }
            Message::Render { frames, reply } => {
                let block = match ring.as_mut() {
                    Some(ring) => {
                        let mut out = vec![0.0; frames * ring.channels()];
                        ring.read_frames(&mut out);
                        out
                    }
                    None => Vec::new(),
                };
                let _ = reply.send(block);
            }
            Message::Shutdown => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_then_renders_written_frames() {
        let mut w = Worklet::register().unwrap();
        assert!(matches!(w.wait_ready(Duration::from_secs(5)), Registration::Ready));
        assert!(matches!(w.poll_ready(), Registration::Ready));
        w.init(8, 2);
        w.write(vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(w.render(2, 2), vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(w.render(1, 2), vec![0.0, 0.0]);
        w.shutdown();
    }

    #[test]
    fn render_before_init_is_empty() {
        let mut w = Worklet::register().unwrap();
        w.wait_ready(Duration::from_secs(5));
        assert!(w.render(4, 2).is_empty());
    }
}

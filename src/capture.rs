//! Push-to-talk microphone capture.
//!
//! `toggle` alternates between starting and stopping a recording. A start
//! waits for the device to open, which is where permission is granted or
//! refused; a toggle arriving while that is still in flight, or while a
//! recording is being flushed, is ignored rather than queued.

#[cfg(feature = "devices")]
mod cpal_input;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ai_therapist_utils::audio::wav_from_pcm16;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;

use crate::error::CaptureError;

#[cfg(feature = "devices")]
pub use cpal_input::CpalMicrophone;

/// An encoded recording, ready for upload. Zero length means nothing was captured.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioPayload(Bytes);

impl AudioPayload {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    RequestingPermission,
    Recording,
    Flushing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Started,
    Finished(AudioPayload),
    Ignored,
}

/// Ordered PCM16 chunks delivered by an open microphone.
#[derive(Debug, Clone, Default)]
pub struct ChunkBuffer {
    chunks: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl ChunkBuffer {
    /// Empty chunks are dropped.
    pub fn push(&self, chunk: Vec<u8>) {
        if chunk.is_empty() {
            return;
        }
        self.lock().push(chunk);
    }

    pub fn take(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Vec<u8>>> {
        self.chunks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// An input device that can be opened for one recording at a time.
#[async_trait]
pub trait Microphone: Send + Sync {
    /// Resolves once capture is running or has been refused.
    async fn open(&self, sink: ChunkBuffer) -> Result<Box<dyn CaptureStream>, CaptureError>;
}

/// A running capture. Dropping it must also release the device.
pub trait CaptureStream: Send {
    fn sample_rate(&self) -> u32;

    /// Stops capture and returns once the device is released. Chunks captured
    /// before this call are already in the sink.
    fn close(self: Box<Self>);
}

struct Recording {
    stream: Box<dyn CaptureStream>,
    chunks: ChunkBuffer,
}

struct Inner {
    state: CaptureState,
    recording: Option<Recording>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(recording) = self.recording.take() {
            tracing::debug!("capture controller dropped while recording, releasing microphone");
            recording.stream.close();
        }
    }
}

enum Step {
    Start,
    Stop(Option<Recording>),
    Ignore(CaptureState),
}

#[derive(Clone)]
pub struct AudioCaptureController {
    microphone: Arc<dyn Microphone>,
    inner: Arc<Mutex<Inner>>,
    state_tx: Arc<watch::Sender<CaptureState>>,
}

impl AudioCaptureController {
    pub fn new(microphone: Arc<dyn Microphone>) -> Self {
        let (state_tx, _) = watch::channel(CaptureState::Idle);
        Self {
            microphone,
            inner: Arc::new(Mutex::new(Inner {
                state: CaptureState::Idle,
                recording: None,
            })),
            state_tx: Arc::new(state_tx),
        }
    }

    pub fn state(&self) -> CaptureState {
        self.lock().state
    }

    pub fn is_recording(&self) -> bool {
        self.state() == CaptureState::Recording
    }

    pub fn subscribe(&self) -> watch::Receiver<CaptureState> {
        self.state_tx.subscribe()
    }

    /// Starts a recording when idle, finishes it when recording, and ignores
    /// the call in any transitional state.
    pub async fn toggle(&self) -> Result<CaptureOutcome, CaptureError> {
        let step = {
            let mut inner = self.lock();
            match inner.state {
                CaptureState::Idle => {
                    self.transition(&mut inner, CaptureState::RequestingPermission);
                    Step::Start
                }
                CaptureState::Recording => {
                    self.transition(&mut inner, CaptureState::Flushing);
                    Step::Stop(inner.recording.take())
                }
                state => Step::Ignore(state),
            }
        };

        match step {
            Step::Start => self.start().await,
            Step::Stop(recording) => self.finish(recording).await,
            Step::Ignore(state) => {
                tracing::debug!("toggle ignored while {state:?}");
                Ok(CaptureOutcome::Ignored)
            }
        }
    }

    async fn start(&self) -> Result<CaptureOutcome, CaptureError> {
        // Put the controller back to idle if this future is dropped mid-request.
        let mut pending = ResetOnDrop {
            controller: self,
            from: CaptureState::RequestingPermission,
            armed: true,
        };

        let chunks = ChunkBuffer::default();
        let result = self.microphone.open(chunks.clone()).await;
        pending.armed = false;

        let mut inner = self.lock();
        match result {
            Ok(stream) => {
                tracing::info!("recording started at {} Hz", stream.sample_rate());
                inner.recording = Some(Recording { stream, chunks });
                self.transition(&mut inner, CaptureState::Recording);
                Ok(CaptureOutcome::Started)
            }
            Err(e) => {
                tracing::warn!("microphone unavailable: {e}");
                self.transition(&mut inner, CaptureState::Idle);
                Err(e)
            }
        }
    }

    async fn finish(&self, recording: Option<Recording>) -> Result<CaptureOutcome, CaptureError> {
        let mut flushing = ResetOnDrop {
            controller: self,
            from: CaptureState::Flushing,
            armed: true,
        };

        let result = match recording {
            Some(Recording { stream, chunks }) => {
                let sample_rate = stream.sample_rate();
                // Closing waits for the device thread to exit.
                if let Err(e) = tokio::task::spawn_blocking(move || stream.close()).await {
                    tracing::error!("releasing the microphone failed: {e}");
                }
                encode_chunks(chunks.take(), sample_rate)
            }
            None => Ok(AudioPayload::empty()),
        };
        flushing.armed = false;

        let mut inner = self.lock();
        self.transition(&mut inner, CaptureState::Idle);
        match &result {
            Ok(payload) => tracing::info!("recording finished, {} bytes", payload.len()),
            Err(e) => tracing::warn!("recording could not be encoded: {e}"),
        }
        result.map(CaptureOutcome::Finished)
    }

    fn transition(&self, inner: &mut Inner, next: CaptureState) {
        inner.state = next;
        self.state_tx.send_replace(next);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Returns the controller to idle if a transition out of `from` is abandoned.
struct ResetOnDrop<'a> {
    controller: &'a AudioCaptureController,
    from: CaptureState,
    armed: bool,
}

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut inner = self.controller.lock();
            if inner.state == self.from {
                self.controller.transition(&mut inner, CaptureState::Idle);
            }
        }
    }
}

/// Concatenates chunks in order and wraps them as a mono WAV file.
fn encode_chunks(chunks: Vec<Vec<u8>>, sample_rate: u32) -> Result<AudioPayload, CaptureError> {
    let pcm = chunks.concat();
    if pcm.is_empty() {
        return Ok(AudioPayload::empty());
    }
    let wav = wav_from_pcm16(&pcm, sample_rate)
        .map_err(|e| CaptureError::Unsupported(format!("{e:#}")))?;
    Ok(AudioPayload::new(wav))
}

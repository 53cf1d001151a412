//! Reply clip playback.
//!
//! At most one clip is audible. Starting a clip stops whatever was playing
//! first, and the end-of-clip notification of a replaced clip is discarded by
//! comparing generation numbers.

#[cfg(feature = "devices")]
mod cpal_output;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use ai_therapist_utils::audio::{decode_base64, decode_wav, DecodedClip};

use crate::error::PlaybackError;
use crate::turn::TurnId;

#[cfg(feature = "devices")]
pub use cpal_output::CpalSpeaker;

/// Called by a speaker when a clip reaches its natural end.
pub struct FinishSignal(Box<dyn FnOnce() + Send>);

impl FinishSignal {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Box::new(f))
    }

    pub fn fire(self) {
        (self.0)()
    }
}

impl std::fmt::Debug for FinishSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FinishSignal")
    }
}

pub trait Speaker: Send + Sync {
    /// Begins playing `clip`. Must not block until the clip ends, but may
    /// block briefly while the output device opens.
    fn start(
        &self,
        clip: DecodedClip,
        on_finished: FinishSignal,
    ) -> Result<Box<dyn PlaybackHandle>, PlaybackError>;
}

pub trait PlaybackHandle: Send {
    /// Silences the clip and returns once the output is released.
    fn stop(self: Box<Self>);

    /// Lets go of a clip that already ended on its own.
    ///
    /// Runs inside the clip's `FinishSignal`, possibly on the speaker's own
    /// thread, so it must not wait for that thread to exit.
    fn detach(self: Box<Self>) {
        drop(self);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackToggle {
    Started,
    Stopped,
}

struct Active {
    clip: TurnId,
    generation: u64,
    handle: Box<dyn PlaybackHandle>,
}

#[derive(Default)]
struct Inner {
    active: Option<Active>,
    generation: u64,
    finished: Option<u64>,
}

#[derive(Clone)]
pub struct AudioPlaybackController {
    speaker: Arc<dyn Speaker>,
    inner: Arc<Mutex<Inner>>,
}

impl AudioPlaybackController {
    pub fn new(speaker: Arc<dyn Speaker>) -> Self {
        Self {
            speaker,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Plays a base64 WAV clip, stopping any clip already playing.
    ///
    /// An undecodable payload leaves the current playback untouched. Blocks
    /// while the previous clip is released and the output device opens.
    pub fn play(&self, clip: TurnId, audio: Option<&str>) -> Result<(), PlaybackError> {
        let decoded = decode_clip(audio)?;

        let (previous, generation) = {
            let mut inner = lock(&self.inner);
            inner.generation += 1;
            (inner.active.take(), inner.generation)
        };
        if let Some(previous) = previous {
            tracing::debug!("stopping clip {} for {}", previous.clip, clip);
            previous.handle.stop();
        }

        let on_finished = finish_signal(Arc::downgrade(&self.inner), generation);
        let handle = self.speaker.start(decoded, on_finished)?;

        let mut inner = lock(&self.inner);
        if inner.generation != generation {
            // Superseded while the device was starting.
            drop(inner);
            handle.stop();
        } else if inner.finished == Some(generation) {
            tracing::debug!("clip {clip} finished before it was registered");
        } else {
            tracing::debug!("playing clip {clip}");
            inner.active = Some(Active {
                clip,
                generation,
                handle,
            });
        }
        Ok(())
    }

    /// Stops the active clip if there is one, otherwise starts `clip`.
    pub fn toggle(&self, clip: TurnId, audio: Option<&str>) -> Result<PlaybackToggle, PlaybackError> {
        if self.stop() {
            return Ok(PlaybackToggle::Stopped);
        }
        self.play(clip, audio)?;
        Ok(PlaybackToggle::Started)
    }

    /// Returns true if something was playing.
    pub fn stop(&self) -> bool {
        let active = lock(&self.inner).active.take();
        match active {
            Some(active) => {
                tracing::debug!("stopping clip {}", active.clip);
                active.handle.stop();
                true
            }
            None => false,
        }
    }

    pub fn is_playing(&self, clip: TurnId) -> bool {
        lock(&self.inner)
            .active
            .as_ref()
            .is_some_and(|active| active.clip == clip)
    }

    pub fn current(&self) -> Option<TurnId> {
        lock(&self.inner).active.as_ref().map(|active| active.clip)
    }
}

impl std::fmt::Debug for AudioPlaybackController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioPlaybackController")
            .field("current", &self.current())
            .finish()
    }
}

fn finish_signal(inner: Weak<Mutex<Inner>>, generation: u64) -> FinishSignal {
    FinishSignal::new(move || {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let finished = {
            let mut inner = lock(&inner);
            inner.finished = Some(generation);
            match &inner.active {
                Some(active) if active.generation == generation => inner.active.take(),
                _ => None,
            }
        };
        if let Some(finished) = finished {
            tracing::debug!("clip {} finished", finished.clip);
            finished.handle.detach();
        }
    })
}

fn decode_clip(audio: Option<&str>) -> Result<DecodedClip, PlaybackError> {
    let audio = audio
        .filter(|audio| !audio.trim().is_empty())
        .ok_or(PlaybackError::Unavailable)?;
    let bytes = decode_base64(audio).map_err(|e| PlaybackError::Decode(format!("{e:#}")))?;
    decode_wav(&bytes).map_err(|e| PlaybackError::Decode(format!("{e:#}")))
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

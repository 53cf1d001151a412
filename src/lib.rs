pub mod capture;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod crisis;
pub mod error;
pub mod playback;
pub mod session;
pub mod turn;

#[cfg(test)]
mod test_support;

pub use ai_therapist_types as types;
pub use ai_therapist_utils as utils;

pub use capture::{AudioCaptureController, AudioPayload, CaptureOutcome, CaptureState, Microphone};
pub use client::{DialogueBackend, DialogueClient, OfflineBackend, VoiceTurn};
pub use coordinator::{CoordinatorEvent, RecordingOutcome, Rejection, SubmitOutcome, TurnCoordinator};
pub use crisis::{CrisisAlert, CrisisGate};
pub use error::{CaptureError, PlaybackError, TransportError};
pub use playback::{AudioPlaybackController, Speaker};
pub use session::{FileStorage, MemoryStorage, SessionStore};
pub use turn::{Mode, Turn, TurnId};

#[cfg(feature = "devices")]
pub use capture::CpalMicrophone;
#[cfg(feature = "devices")]
pub use playback::CpalSpeaker;

//! Turn orchestration for the text and voice modes.
//!
//! Each mode has its own turn log and at most one turn awaiting a reply. The
//! modes share the session store, the crisis gate and the playback
//! controller. When a reply arrives it is applied in a fixed order: the turn
//! is resolved, the session id adopted, the crisis gate raised, and only then
//! is voice-mode audio played.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ai_therapist_types::{Reply, SessionId, TextTurnRequest};
use tokio::sync::broadcast;

use crate::capture::{AudioCaptureController, AudioPayload, CaptureOutcome, CaptureState};
use crate::client::{DialogueBackend, VoiceTurn};
use crate::crisis::{CrisisAlert, CrisisGate};
use crate::error::{CaptureError, PlaybackError, TransportError};
use crate::playback::{AudioPlaybackController, PlaybackToggle};
use crate::session::SessionStore;
use crate::turn::{Mode, ReplyRecord, Turn, TurnId, TurnLog, UserInput};

const EVENT_CAPACITY: usize = 64;

const ABANDONED_REASON: &str = "request cancelled before the reply arrived";

/// Why a submission was refused before any request was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The mode already has a turn awaiting its reply.
    Busy,
    CrisisActive,
    EmptyInput,
    /// The opening turn has already been issued for this mode.
    AlreadyActivated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Resolved(TurnId),
    Failed(TurnId),
    Rejected(Rejection),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingOutcome {
    Started,
    Submitted(SubmitOutcome),
    Ignored,
    Rejected(Rejection),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorEvent {
    TurnStarted { mode: Mode, turn: TurnId },
    TurnResolved { mode: Mode, turn: TurnId },
    TurnFailed { mode: Mode, turn: TurnId, reason: String },
    SessionAdopted(SessionId),
    CrisisRaised(CrisisAlert),
    /// Something the user should be told that is not part of the turn log.
    Notice { mode: Mode, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    AwaitingReply,
}

#[derive(Debug)]
struct ModeState {
    phase: TurnPhase,
    activated: bool,
    log: TurnLog,
}

impl ModeState {
    fn new() -> Self {
        Self {
            phase: TurnPhase::Idle,
            activated: false,
            log: TurnLog::new(),
        }
    }
}

enum TurnRequest {
    Text(TextTurnRequest),
    Voice(VoiceTurn),
}

pub struct TurnCoordinator {
    backend: Arc<dyn DialogueBackend>,
    session: SessionStore,
    crisis: CrisisGate,
    capture: AudioCaptureController,
    playback: AudioPlaybackController,
    text: Mutex<ModeState>,
    voice: Mutex<ModeState>,
    events: broadcast::Sender<CoordinatorEvent>,
}

impl TurnCoordinator {
    pub fn new(
        backend: Arc<dyn DialogueBackend>,
        session: SessionStore,
        crisis: CrisisGate,
        capture: AudioCaptureController,
        playback: AudioPlaybackController,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            backend,
            session,
            crisis,
            capture,
            playback,
            text: Mutex::new(ModeState::new()),
            voice: Mutex::new(ModeState::new()),
            events,
        }
    }

    /// Fetches the greeting the first time a mode is shown. Later calls for
    /// the same mode, or calls after any turn was submitted in it, are
    /// rejected without contacting the backend.
    pub async fn activate(&self, mode: Mode) -> SubmitOutcome {
        let turn = match self.begin(mode, None, true) {
            Ok(turn) => turn,
            Err(rejection) => return SubmitOutcome::Rejected(rejection),
        };
        let request = TextTurnRequest::new("")
            .with_first_turn(true)
            .with_session_id(self.session.get());
        self.run(mode, turn, TurnRequest::Text(request)).await
    }

    pub async fn submit_text(&self, text: &str) -> SubmitOutcome {
        if text.trim().is_empty() {
            return SubmitOutcome::Rejected(Rejection::EmptyInput);
        }
        let turn = match self.begin(Mode::Text, Some(UserInput::Text(text.to_string())), false) {
            Ok(turn) => turn,
            Err(rejection) => return SubmitOutcome::Rejected(rejection),
        };
        let request = TextTurnRequest::new(text).with_session_id(self.session.get());
        self.run(Mode::Text, turn, TurnRequest::Text(request)).await
    }

    /// Submits a finished recording. An empty payload never reaches the
    /// backend and leaves the voice log untouched.
    pub async fn submit_audio(&self, audio: AudioPayload) -> Result<SubmitOutcome, CaptureError> {
        if audio.is_empty() {
            self.notify(Mode::Voice, CaptureError::Empty.to_string());
            return Err(CaptureError::Empty);
        }
        let turn = match self.begin(Mode::Voice, Some(UserInput::Audio(audio.clone())), false) {
            Ok(turn) => turn,
            Err(rejection) => return Ok(SubmitOutcome::Rejected(rejection)),
        };
        let request = VoiceTurn::new(audio).with_session_id(self.session.get());
        Ok(self.run(Mode::Voice, turn, TurnRequest::Voice(request)).await)
    }

    /// Push-to-talk: starts a recording, or stops it and submits the result.
    ///
    /// Starting is refused while a crisis is active or a voice turn is still
    /// awaiting its reply. Stopping is always allowed.
    pub async fn toggle_recording(&self) -> Result<RecordingOutcome, CaptureError> {
        if self.capture.state() == CaptureState::Idle {
            if self.crisis.is_active() {
                return Ok(RecordingOutcome::Rejected(Rejection::CrisisActive));
            }
            if self.is_awaiting(Mode::Voice) {
                return Ok(RecordingOutcome::Rejected(Rejection::Busy));
            }
        }

        let outcome = match self.capture.toggle().await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.notify(Mode::Voice, e.to_string());
                return Err(e);
            }
        };
        match outcome {
            CaptureOutcome::Started => Ok(RecordingOutcome::Started),
            CaptureOutcome::Ignored => Ok(RecordingOutcome::Ignored),
            CaptureOutcome::Finished(payload) => self
                .submit_audio(payload)
                .await
                .map(RecordingOutcome::Submitted),
        }
    }

    /// Plays or stops the audio attached to a reply, in either mode.
    pub fn toggle_reply_audio(&self, turn: TurnId) -> Result<PlaybackToggle, PlaybackError> {
        let audio = [Mode::Voice, Mode::Text].into_iter().find_map(|mode| {
            self.state(mode)
                .log
                .get(turn)
                .and_then(|turn| turn.reply().map(|reply| reply.audio.clone()))
        });
        self.playback.toggle(turn, audio.flatten().as_deref())
    }

    /// The user's acknowledgement of the crisis alert.
    pub fn acknowledge_crisis(&self) {
        self.crisis.clear();
    }

    pub fn turns(&self, mode: Mode) -> Vec<Turn> {
        self.state(mode).log.turns().to_vec()
    }

    pub fn turn(&self, mode: Mode, turn: TurnId) -> Option<Turn> {
        self.state(mode).log.get(turn).cloned()
    }

    pub fn phase(&self, mode: Mode) -> TurnPhase {
        self.state(mode).phase
    }

    pub fn is_awaiting(&self, mode: Mode) -> bool {
        self.phase(mode) == TurnPhase::AwaitingReply
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.events.subscribe()
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn crisis(&self) -> &CrisisGate {
        &self.crisis
    }

    pub fn capture(&self) -> &AudioCaptureController {
        &self.capture
    }

    pub fn playback(&self) -> &AudioPlaybackController {
        &self.playback
    }

    fn begin(&self, mode: Mode, user: Option<UserInput>, opening: bool) -> Result<TurnId, Rejection> {
        if self.crisis.is_active() {
            tracing::debug!("{mode} submission refused, crisis active");
            return Err(Rejection::CrisisActive);
        }

        let mut state = self.state(mode);
        if opening && state.activated {
            return Err(Rejection::AlreadyActivated);
        }
        if state.phase == TurnPhase::AwaitingReply {
            tracing::debug!("{mode} submission refused, a turn is already awaiting its reply");
            return Err(Rejection::Busy);
        }
        state.activated = true;
        state.phase = TurnPhase::AwaitingReply;
        let turn = state.log.push_pending(mode, user);
        drop(state);

        tracing::info!("{mode} turn {turn} submitted");
        self.emit(CoordinatorEvent::TurnStarted { mode, turn });
        Ok(turn)
    }

    async fn run(&self, mode: Mode, turn: TurnId, request: TurnRequest) -> SubmitOutcome {
        // Fails the turn and frees the mode if this future is dropped mid-request.
        let mut in_flight = InFlight {
            coordinator: self,
            mode,
            turn,
            armed: true,
        };

        let result = match request {
            TurnRequest::Text(request) => self.backend.submit_text(request).await,
            TurnRequest::Voice(request) => self.backend.submit_audio(request).await,
        };
        in_flight.armed = false;

        match result {
            Ok(reply) => self.apply_reply(mode, turn, reply),
            Err(e) => self.apply_failure(mode, turn, e),
        }
    }

    fn apply_reply(&self, mode: Mode, turn: TurnId, reply: Reply) -> SubmitOutcome {
        let record = ReplyRecord::from_reply(&reply);
        {
            let mut state = self.state(mode);
            state.log.resolve(turn, record.clone());
            state.phase = TurnPhase::Idle;
        }
        tracing::info!("{mode} turn {turn} resolved");
        self.emit(CoordinatorEvent::TurnResolved { mode, turn });

        match reply.session_id() {
            Some(session_id) => {
                self.session.set(session_id.clone());
                self.emit(CoordinatorEvent::SessionAdopted(session_id.clone()));
            }
            None => tracing::debug!("reply carried no session id, keeping the current one"),
        }

        if record.crisis {
            let alert = CrisisAlert::new(record.text.clone()).with_banner(record.banner.clone());
            self.crisis.raise(alert.clone());
            self.emit(CoordinatorEvent::CrisisRaised(alert));
        }

        if mode == Mode::Voice {
            match self.playback.play(turn, record.audio.as_deref()) {
                Ok(()) => {}
                Err(PlaybackError::Unavailable) => {
                    self.notify(mode, PlaybackError::Unavailable.to_string());
                }
                Err(e) => {
                    tracing::warn!("could not play reply audio: {e}");
                    self.notify(mode, e.to_string());
                }
            }
        }

        SubmitOutcome::Resolved(turn)
    }

    fn apply_failure(&self, mode: Mode, turn: TurnId, error: TransportError) -> SubmitOutcome {
        tracing::error!("{mode} turn {turn} failed: {error}");
        self.fail_turn(mode, turn, error.to_string());
        SubmitOutcome::Failed(turn)
    }

    fn abandon(&self, mode: Mode, turn: TurnId) {
        tracing::warn!("{mode} turn {turn} abandoned before its reply arrived");
        self.fail_turn(mode, turn, ABANDONED_REASON.to_string());
    }

    fn fail_turn(&self, mode: Mode, turn: TurnId, reason: String) {
        {
            let mut state = self.state(mode);
            state.log.fail(turn, ReplyRecord::apology());
            state.phase = TurnPhase::Idle;
        }
        self.emit(CoordinatorEvent::TurnFailed { mode, turn, reason });
    }

    fn notify(&self, mode: Mode, message: String) {
        tracing::info!("{mode} notice: {message}");
        self.emit(CoordinatorEvent::Notice { mode, message });
    }

    fn emit(&self, event: CoordinatorEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn state(&self, mode: Mode) -> MutexGuard<'_, ModeState> {
        let state = match mode {
            Mode::Text => &self.text,
            Mode::Voice => &self.voice,
        };
        state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct InFlight<'a> {
    coordinator: &'a TurnCoordinator,
    mode: Mode,
    turn: TurnId,
    armed: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.coordinator.abandon(self.mode, self.turn);
        }
    }
}

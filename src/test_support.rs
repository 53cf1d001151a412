//! In-process doubles for the device and backend seams.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use ai_therapist_types::{Reply, TextTurnRequest};
use ai_therapist_utils::audio::{encode_base64, wav_from_pcm16, DecodedClip, ToBinary};
use async_trait::async_trait;
use tokio::sync::Notify;

use crate::capture::{CaptureStream, ChunkBuffer, Microphone};
use crate::client::{DialogueBackend, VoiceTurn};
use crate::error::{CaptureError, PlaybackError, TransportError};
use crate::playback::{FinishSignal, PlaybackHandle, Speaker};

/// Base64 WAV of `len` samples of a quiet tone.
pub fn wav_base64(len: usize) -> String {
    let samples: Vec<f32> = (0..len).map(|i| (i as f32 * 0.1).sin() * 0.2).collect();
    encode_base64(&wav_from_pcm16(&samples.to_binary(), 16_000).unwrap())
}

pub struct FakeMicrophone {
    chunks: Vec<Vec<u8>>,
    denials: AtomicUsize,
    gate: Option<Arc<Notify>>,
    close_hold: Option<Arc<Mutex<mpsc::Receiver<()>>>>,
    close_release: Option<mpsc::Sender<()>>,
    pub opened: AtomicUsize,
    pub released: Arc<AtomicUsize>,
}

impl FakeMicrophone {
    pub const SAMPLE_RATE: u32 = 16_000;

    /// Grants every request and delivers `chunks` as soon as capture starts.
    pub fn granting(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks,
            denials: AtomicUsize::new(0),
            gate: None,
            close_hold: None,
            close_release: None,
            opened: AtomicUsize::new(0),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn denying() -> Self {
        Self::granting(Vec::new()).deny_first(usize::MAX)
    }

    pub fn deny_first(self, denials: usize) -> Self {
        self.denials.store(denials, Ordering::SeqCst);
        self
    }

    /// Holds every open request until the gate is notified.
    pub fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Notify::new()));
        self
    }

    pub fn gate(&self) -> Arc<Notify> {
        self.gate.clone().expect("microphone is not gated")
    }

    /// Blocks every stream's `close` until `release_close` is called once
    /// for it, like a device thread that is slow to exit.
    pub fn holding_close(mut self) -> Self {
        let (release, hold) = mpsc::channel();
        self.close_hold = Some(Arc::new(Mutex::new(hold)));
        self.close_release = Some(release);
        self
    }

    pub fn release_close(&self) {
        let release = self.close_release.as_ref().expect("close is not held");
        release.send(()).unwrap();
    }
}

#[async_trait]
impl Microphone for FakeMicrophone {
    async fn open(&self, sink: ChunkBuffer) -> Result<Box<dyn CaptureStream>, CaptureError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.denials.load(Ordering::SeqCst) > 0 {
            self.denials.fetch_sub(1, Ordering::SeqCst);
            return Err(CaptureError::Permission("denied by user".to_string()));
        }

        self.opened.fetch_add(1, Ordering::SeqCst);
        for chunk in &self.chunks {
            sink.push(chunk.clone());
        }
        Ok(Box::new(FakeStream {
            released: self.released.clone(),
            hold: self.close_hold.clone(),
        }))
    }
}

struct FakeStream {
    released: Arc<AtomicUsize>,
    hold: Option<Arc<Mutex<mpsc::Receiver<()>>>>,
}

impl CaptureStream for FakeStream {
    fn sample_rate(&self) -> u32 {
        FakeMicrophone::SAMPLE_RATE
    }

    fn close(self: Box<Self>) {
        if let Some(hold) = &self.hold {
            let _ = hold.lock().unwrap().recv();
        }
    }
}

impl Drop for FakeStream {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeSpeaker {
    pub started: AtomicUsize,
    pub stopped: Arc<AtomicUsize>,
    pub max_live: AtomicUsize,
    live: Arc<AtomicUsize>,
    finishers: Mutex<Vec<Option<FinishSignal>>>,
}

impl FakeSpeaker {
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Fires the end-of-clip signal of the `index`-th started clip.
    pub fn finish(&self, index: usize) {
        let signal = self.finishers.lock().unwrap()[index].take();
        signal.expect("clip already finished").fire();
    }
}

impl Speaker for FakeSpeaker {
    fn start(
        &self,
        _clip: DecodedClip,
        on_finished: FinishSignal,
    ) -> Result<Box<dyn PlaybackHandle>, PlaybackError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live, Ordering::SeqCst);
        self.finishers.lock().unwrap().push(Some(on_finished));
        Ok(Box::new(FakeHandle {
            live: self.live.clone(),
            stopped: self.stopped.clone(),
        }))
    }
}

struct FakeHandle {
    live: Arc<AtomicUsize>,
    stopped: Arc<AtomicUsize>,
}

impl PlaybackHandle for FakeHandle {
    fn stop(self: Box<Self>) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for FakeHandle {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

enum ClipMessage {
    Stop,
    End,
}

struct ClipThread {
    messages: mpsc::Sender<ClipMessage>,
    done: mpsc::Receiver<bool>,
}

/// Runs each clip on its own thread and joins it when the handle drops, the
/// way a real output device does.
#[derive(Default)]
pub struct ThreadedSpeaker {
    clips: Mutex<Vec<ClipThread>>,
    exited: Arc<AtomicUsize>,
}

impl ThreadedSpeaker {
    /// Ends the `index`-th clip on its own thread. Returns whether the end of
    /// clip signal ran to completion there.
    pub fn end_clip(&self, index: usize) -> bool {
        let clips = self.clips.lock().unwrap();
        let clip = &clips[index];
        if clip.messages.send(ClipMessage::End).is_err() {
            return false;
        }
        clip.done.recv_timeout(Duration::from_secs(2)).unwrap_or(false)
    }

    /// Clip threads that exited after being told to stop.
    pub fn exited(&self) -> usize {
        self.exited.load(Ordering::SeqCst)
    }
}

impl Speaker for ThreadedSpeaker {
    fn start(
        &self,
        _clip: DecodedClip,
        on_finished: FinishSignal,
    ) -> Result<Box<dyn PlaybackHandle>, PlaybackError> {
        let (messages_tx, messages_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let exited = self.exited.clone();

        let thread = std::thread::spawn(move || match messages_rx.recv() {
            Ok(ClipMessage::End) => {
                let completed = catch_unwind(AssertUnwindSafe(|| on_finished.fire())).is_ok();
                let _ = done_tx.send(completed);
            }
            Ok(ClipMessage::Stop) | Err(_) => {
                exited.fetch_add(1, Ordering::SeqCst);
            }
        });

        self.clips.lock().unwrap().push(ClipThread {
            messages: messages_tx.clone(),
            done: done_rx,
        });
        Ok(Box::new(ThreadedHandle {
            messages: Some(messages_tx),
            thread: Some(thread),
        }))
    }
}

struct ThreadedHandle {
    messages: Option<mpsc::Sender<ClipMessage>>,
    thread: Option<JoinHandle<()>>,
}

impl PlaybackHandle for ThreadedHandle {
    fn stop(self: Box<Self>) {
        drop(self);
    }

    fn detach(mut self: Box<Self>) {
        self.messages.take();
        self.thread.take();
    }
}

impl Drop for ThreadedHandle {
    fn drop(&mut self) {
        if let Some(messages) = self.messages.take() {
            let _ = messages.send(ClipMessage::Stop);
        }
        if let Some(thread) = self.thread.take() {
            thread.join().unwrap();
        }
    }
}

/// Answers from a queue in completion order. Optional gates hold each call of
/// one kind until notified.
#[derive(Default)]
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<Result<Reply, TransportError>>>,
    text_gate: Option<Arc<Notify>>,
    voice_gate: Option<Arc<Notify>>,
    pub text_calls: Mutex<Vec<TextTurnRequest>>,
    pub voice_calls: Mutex<Vec<VoiceTurn>>,
}

impl ScriptedBackend {
    pub fn new(replies: impl IntoIterator<Item = Result<Reply, TransportError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn with_text_gate(mut self, gate: Arc<Notify>) -> Self {
        self.text_gate = Some(gate);
        self
    }

    pub fn with_voice_gate(mut self, gate: Arc<Notify>) -> Self {
        self.voice_gate = Some(gate);
        self
    }

    fn next_reply(&self) -> Result<Reply, TransportError> {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(TransportError::Rejected("script exhausted")))
    }
}

#[async_trait]
impl DialogueBackend for ScriptedBackend {
    async fn submit_text(&self, turn: TextTurnRequest) -> Result<Reply, TransportError> {
        self.text_calls.lock().unwrap().push(turn);
        if let Some(gate) = &self.text_gate {
            gate.notified().await;
        }
        self.next_reply()
    }

    async fn submit_audio(&self, turn: VoiceTurn) -> Result<Reply, TransportError> {
        self.voice_calls.lock().unwrap().push(turn);
        if let Some(gate) = &self.voice_gate {
            gate.notified().await;
        }
        self.next_reply()
    }
}

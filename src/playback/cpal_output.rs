use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;

use ai_therapist_utils::audio::{resample, shared_buffer, DecodedClip};
use ai_therapist_utils::device;
use cpal::traits::{DeviceTrait, StreamTrait};
use ringbuf::traits::{Consumer, Producer, Split};

use super::{FinishSignal, PlaybackHandle, Speaker};
use crate::error::PlaybackError;

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Plays clips on a cpal output device, one thread per clip.
#[derive(Debug, Clone, Default)]
pub struct CpalSpeaker {
    device_name: Option<String>,
}

impl CpalSpeaker {
    /// `None` selects the host default output.
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

impl Speaker for CpalSpeaker {
    fn start(
        &self,
        clip: DecodedClip,
        on_finished: FinishSignal,
    ) -> Result<Box<dyn PlaybackHandle>, PlaybackError> {
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let device_name = self.device_name.clone();

        let thread = std::thread::Builder::new()
            .name("reply-playback".to_string())
            .spawn(move || {
                run_playback(device_name.as_deref(), clip, on_finished, ready_tx, stop_rx)
            })
            .map_err(|e| PlaybackError::Device(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(CpalPlaybackHandle {
                stop: Some(stop_tx),
                thread: Some(thread),
            })),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(PlaybackError::Device("playback thread exited".to_string()))
            }
        }
    }
}

struct CpalPlaybackHandle {
    stop: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl PlaybackHandle for CpalPlaybackHandle {
    fn stop(self: Box<Self>) {
        drop(self);
    }

    // The clip's thread is the one calling this and exits right after.
    fn detach(mut self: Box<Self>) {
        self.stop.take();
        self.thread.take();
    }
}

impl Drop for CpalPlaybackHandle {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.thread().id() == std::thread::current().id() {
                return;
            }
            if thread.join().is_err() {
                tracing::error!("playback thread panicked");
            }
        }
    }
}

fn run_playback(
    device_name: Option<&str>,
    clip: DecodedClip,
    on_finished: FinishSignal,
    ready: mpsc::SyncSender<Result<(), PlaybackError>>,
    stop: mpsc::Receiver<()>,
) {
    let drained = Arc::new(AtomicBool::new(false));
    let stream = match build_stream(device_name, clip, drained.clone()) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready.send(Err(PlaybackError::Device(e.to_string())));
        return;
    }
    if ready.send(Ok(())).is_err() {
        return;
    }

    loop {
        match stop.recv_timeout(DRAIN_POLL_INTERVAL) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                drop(stream);
                tracing::debug!("playback stopped");
                return;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if drained.load(Ordering::Acquire) {
                    drop(stream);
                    on_finished.fire();
                    return;
                }
            }
        }
    }
}

fn build_stream(
    device_name: Option<&str>,
    clip: DecodedClip,
    drained: Arc<AtomicBool>,
) -> Result<cpal::Stream, PlaybackError> {
    let device = device::get_or_default_output(device_name)
        .map_err(|e| PlaybackError::Device(format!("{e:#}")))?;
    let supported = device
        .default_output_config()
        .map_err(|e| PlaybackError::Device(e.to_string()))?;
    if supported.sample_format() != cpal::SampleFormat::F32 {
        return Err(PlaybackError::Device(format!(
            "output sample format {:?}",
            supported.sample_format()
        )));
    }

    let config: cpal::StreamConfig = supported.config();
    let channels = config.channels as usize;
    let samples = resample(&clip.samples, clip.sample_rate, config.sample_rate.0)
        .map_err(|e| PlaybackError::Decode(format!("{e:#}")))?;
    tracing::debug!(
        "playing {:.2}s clip on {:?}",
        clip.duration_secs(),
        device.name().unwrap_or_default()
    );

    let (mut producer, mut consumer) = shared_buffer(samples.len().max(1)).split();
    producer.push_slice(&samples);

    device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(channels) {
                    match consumer.try_pop() {
                        Some(sample) => frame.fill(sample),
                        None => {
                            frame.fill(0.0);
                            drained.store(true, Ordering::Release);
                        }
                    }
                }
            },
            |err| tracing::error!("An error occurred on output stream: {}", err),
            None,
        )
        .map_err(|e| PlaybackError::Device(e.to_string()))
}

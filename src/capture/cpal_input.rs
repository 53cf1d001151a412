use std::sync::mpsc;
use std::thread::JoinHandle;

use ai_therapist_utils::audio::{to_mono, ToBinary};
use ai_therapist_utils::device;
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, StreamTrait};
use tokio::sync::oneshot;

use super::{CaptureStream, ChunkBuffer, Microphone};
use crate::error::CaptureError;

/// Records from a cpal input device.
///
/// `cpal::Stream` cannot leave the thread that built it, so each recording
/// owns a dedicated thread that holds the stream until told to stop.
#[derive(Debug, Clone, Default)]
pub struct CpalMicrophone {
    device_name: Option<String>,
}

impl CpalMicrophone {
    /// `None` selects the host default input.
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

#[async_trait]
impl Microphone for CpalMicrophone {
    async fn open(&self, sink: ChunkBuffer) -> Result<Box<dyn CaptureStream>, CaptureError> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let device_name = self.device_name.clone();

        let thread = std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || run_capture(device_name.as_deref(), sink, ready_tx, stop_rx))
            .map_err(|e| CaptureError::Permission(e.to_string()))?;

        match ready_rx.await {
            Ok(Ok(sample_rate)) => Ok(Box::new(CpalCaptureStream {
                sample_rate,
                stop: Some(stop_tx),
                thread: Some(thread),
            })),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(CaptureError::Permission("capture thread exited".to_string()))
            }
        }
    }
}

struct CpalCaptureStream {
    sample_rate: u32,
    stop: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureStream for CpalCaptureStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn close(self: Box<Self>) {
        drop(self);
    }
}

impl Drop for CpalCaptureStream {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("capture thread panicked");
            }
        }
    }
}

fn run_capture(
    device_name: Option<&str>,
    sink: ChunkBuffer,
    ready: oneshot::Sender<Result<u32, CaptureError>>,
    stop: mpsc::Receiver<()>,
) {
    let (stream, sample_rate) = match build_stream(device_name, sink) {
        Ok(built) => built,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready.send(Err(CaptureError::Permission(e.to_string())));
        return;
    }
    if ready.send(Ok(sample_rate)).is_err() {
        tracing::debug!("recording abandoned before it started");
        return;
    }

    // Either a stop message or the handle being dropped ends the recording.
    let _ = stop.recv();
    drop(stream);
    tracing::debug!("microphone released");
}

fn build_stream(
    device_name: Option<&str>,
    sink: ChunkBuffer,
) -> Result<(cpal::Stream, u32), CaptureError> {
    let device = device::get_or_default_input(device_name)
        .map_err(|e| CaptureError::Permission(format!("{e:#}")))?;
    let supported = device
        .default_input_config()
        .map_err(|e| CaptureError::Permission(e.to_string()))?;
    if supported.sample_format() != cpal::SampleFormat::F32 {
        return Err(CaptureError::Unsupported(format!(
            "input sample format {:?}",
            supported.sample_format()
        )));
    }

    let config: cpal::StreamConfig = supported.config();
    let channels = config.channels as usize;
    let sample_rate = config.sample_rate.0;
    tracing::info!(
        "Input device: {:?}, {}ch at {} Hz",
        device.name().unwrap_or_default(),
        channels,
        sample_rate
    );

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                sink.push(to_mono(data, channels).to_binary());
            },
            |err| tracing::error!("An error occurred on input stream: {}", err),
            None,
        )
        .map_err(|e| CaptureError::Permission(e.to_string()))?;

    Ok((stream, sample_rate))
}

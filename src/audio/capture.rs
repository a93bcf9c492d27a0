//! Microphone capture using CPAL.
//!
//! CPAL streams are not `Send`, so the stream lives on a dedicated capture
//! thread. The audio callback does minimal work (convert to i16, mix to
//! mono) and hands sample batches to an async pump task over a channel;
//! the pump downsamples to 16 kHz and frames chunks for the backend.
//!
//! ```text
//! Capture Thread (sync)            Tokio Runtime (async)
//! ┌──────────────────┐             ┌───────────────────────┐
//! │ CPAL Callback    │──channel──▶ │ pump task             │
//! │ try_send(samples)│             │   ├─ downsample 16kHz │
//! └──────────────────┘             │   ├─ frame chunks     │
//!                                  │   └─ send(AudioChunk) │
//!                                  └───────────────────────┘
//! ```

use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use tokio::sync::mpsc;

use super::{downsample, mix_to_mono, sample_to_i16};
use super::{AudioChunk, AudioEncoding, AudioError, ChunkFramer, TARGET_SAMPLE_RATE};

/// How long start() waits for the capture thread to report ready.
const START_TIMEOUT: Duration = Duration::from_secs(5);

/// Capacity of the callback → pump channel (batches, not samples).
const RAW_CHANNEL_CAPACITY: usize = 64;

/// Microphone capture in a backend-selected chunk format.
pub struct AudioCapture;

/// Handle to an active capture.
///
/// `stop()` is idempotent and releases the device synchronously. Dropping
/// the handle stops capture as well, so exit paths cannot leak the device.
pub struct CaptureHandle {
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl CaptureHandle {
    /// Stop capture and release the input device. Safe to call twice.
    pub fn stop(&mut self) {
        let Some(stop_tx) = self.stop_tx.take() else {
            return;
        };
        // Thread may already be gone if the device vanished mid-session.
        let _ = stop_tx.send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::warn!("Capture thread panicked during shutdown");
            }
        }
        log::info!("Audio capture stopped");
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl AudioCapture {
    /// Start capturing from the default input device.
    ///
    /// Completed [`AudioChunk`]s in the requested encoding are delivered on
    /// `chunk_tx`. Fails without leaving partial state: the capture thread
    /// releases everything it acquired before the error is returned.
    pub fn start(
        encoding: AudioEncoding,
        chunk_tx: mpsc::Sender<AudioChunk>,
    ) -> Result<CaptureHandle, AudioError> {
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<u32, AudioError>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (raw_tx, raw_rx) = mpsc::channel::<Vec<i16>>(RAW_CHANNEL_CAPACITY);

        let thread = std::thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || capture_thread(ready_tx, stop_rx, raw_tx))
            .map_err(|e| AudioError::StreamCreationFailed(e.to_string()))?;

        // Wait for the device to come up (or fail) before returning.
        let source_rate = match ready_rx.recv_timeout(START_TIMEOUT) {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                // Thread is stuck or dead; signal stop and give up on it.
                let _ = stop_tx.send(());
                return Err(AudioError::StartTimeout);
            }
        };

        tokio::spawn(pump_chunks(raw_rx, chunk_tx, source_rate, encoding));

        log::info!(
            "Audio capture started ({:?}, source rate {} Hz)",
            encoding,
            source_rate
        );

        Ok(CaptureHandle {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }
}

/// Body of the dedicated capture thread: owns the CPAL stream for its
/// whole lifetime, parks until stop, then drops it.
fn capture_thread(
    ready_tx: std_mpsc::Sender<Result<u32, AudioError>>,
    stop_rx: std_mpsc::Receiver<()>,
    raw_tx: mpsc::Sender<Vec<i16>>,
) {
    let (stream, source_rate) = match build_input_stream(raw_tx) {
        Ok(ok) => ok,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(AudioError::StreamCreationFailed(format!(
            "Failed to start stream: {}",
            e
        ))));
        return;
    }

    if ready_tx.send(Ok(source_rate)).is_err() {
        // start() already gave up on us
        return;
    }

    // Block until stop; dropping the stream releases the device.
    let _ = stop_rx.recv();
    drop(stream);
}

fn build_input_stream(raw_tx: mpsc::Sender<Vec<i16>>) -> Result<(cpal::Stream, u32), AudioError> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or(AudioError::NoInputDevice)?;

    log::info!("Using audio input device: {:?}", device.name());

    let supported_config = device
        .default_input_config()
        .map_err(|_| AudioError::NoSupportedConfig)?;

    log::info!(
        "Audio config: {} Hz, {} channels, {:?}",
        supported_config.sample_rate().0,
        supported_config.channels(),
        supported_config.sample_format()
    );

    let sample_format = supported_config.sample_format();
    let config: cpal::StreamConfig = supported_config.into();
    let source_rate = config.sample_rate.0;
    let channels = config.channels;

    let err_fn = |err| log::error!("Audio stream error: {}", err);

    let stream = match sample_format {
        SampleFormat::I16 => build_stream_typed::<i16>(&device, &config, channels, raw_tx, err_fn),
        SampleFormat::U16 => build_stream_typed::<u16>(&device, &config, channels, raw_tx, err_fn),
        SampleFormat::F32 => build_stream_typed::<f32>(&device, &config, channels, raw_tx, err_fn),
        _ => Err(AudioError::NoSupportedConfig),
    }?;

    Ok((stream, source_rate))
}

fn build_stream_typed<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: u16,
    raw_tx: mpsc::Sender<Vec<i16>>,
    err_fn: impl FnMut(cpal::StreamError) + Send + 'static,
) -> Result<cpal::Stream, AudioError>
where
    T: cpal::Sample<Float = f32> + cpal::SizedSample + Send + 'static,
{
    let stream = device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let samples: Vec<i16> = data.iter().map(|&s| sample_to_i16(s)).collect();
                let mono = mix_to_mono(&samples, channels);

                // try_send: never block the audio callback. A full channel
                // means the pump is behind; dropping a batch is preferable.
                if raw_tx.try_send(mono).is_err() {
                    log::warn!("Audio pump behind, dropping a capture batch");
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| AudioError::StreamCreationFailed(e.to_string()))?;

    Ok(stream)
}

/// Async side: downsample and frame chunks until the callback side closes.
async fn pump_chunks(
    mut raw_rx: mpsc::Receiver<Vec<i16>>,
    chunk_tx: mpsc::Sender<AudioChunk>,
    source_rate: u32,
    encoding: AudioEncoding,
) {
    let mut framer = ChunkFramer::new(encoding);

    while let Some(samples) = raw_rx.recv().await {
        let resampled = downsample(&samples, source_rate, TARGET_SAMPLE_RATE);
        match framer.push(&resampled) {
            Ok(chunks) => {
                for chunk in chunks {
                    if chunk_tx.send(chunk).await.is_err() {
                        log::debug!("Chunk receiver closed, stopping audio pump");
                        return;
                    }
                }
            }
            Err(e) => log::error!("Chunk framing failed: {}", e),
        }
    }

    // Capture stopped: emit whatever is left as one short chunk.
    match framer.flush() {
        Ok(Some(chunk)) => {
            let _ = chunk_tx.send(chunk).await;
        }
        Ok(None) => {}
        Err(e) => log::error!("Final chunk framing failed: {}", e),
    }

    log::debug!("Audio pump exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pump_flushes_remainder_when_callback_side_closes() {
        let (raw_tx, raw_rx) = mpsc::channel::<Vec<i16>>(4);
        let (chunk_tx, mut chunk_rx) = mpsc::channel::<AudioChunk>(4);

        raw_tx.send(vec![1i16; 100]).await.unwrap();
        drop(raw_tx);

        pump_chunks(raw_rx, chunk_tx, TARGET_SAMPLE_RATE, AudioEncoding::LinearPcm16Mono16k).await;

        let chunk = chunk_rx.recv().await.expect("flushed partial chunk");
        assert_eq!(chunk.data.len(), 200);
        assert!(chunk_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn pump_downsamples_before_framing() {
        let (raw_tx, raw_rx) = mpsc::channel::<Vec<i16>>(4);
        let (chunk_tx, mut chunk_rx) = mpsc::channel::<AudioChunk>(4);

        // 48 kHz input: 300 samples become 100 at 16 kHz
        raw_tx.send(vec![9i16; 300]).await.unwrap();
        drop(raw_tx);

        pump_chunks(raw_rx, chunk_tx, 48_000, AudioEncoding::LinearPcm16Mono16k).await;

        let chunk = chunk_rx.recv().await.expect("flushed partial chunk");
        assert_eq!(chunk.data.len(), 200);
    }
}

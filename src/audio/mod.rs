//! Microphone capture and chunk framing.
//!
//! Capture converts whatever the input device delivers into 16 kHz mono
//! PCM16, then frames it into [`AudioChunk`]s in one of two physical
//! encodings, selected by the active transcription backend:
//!
//! - `Containerized`: ~250 ms of audio per chunk, each a standalone WAV
//!   container blob (Deepgram auto-detects container formats).
//! - `LinearPcm16Mono16k`: raw little-endian sample blocks of 4096 samples
//!   (~256 ms), for backends that take bare PCM frames.

mod capture;

pub use capture::{AudioCapture, CaptureHandle};

use std::io::Cursor;

/// Everything downstream runs at 16 kHz mono.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Samples per linear-PCM chunk (4096 @ 16 kHz = 256 ms).
pub const LINEAR_BLOCK_SAMPLES: usize = 4096;

/// Samples per containerized chunk (4000 @ 16 kHz = 250 ms).
pub const CONTAINER_CHUNK_SAMPLES: usize = 4000;

/// Errors that can occur during audio capture.
#[derive(Debug, Clone)]
pub enum AudioError {
    NoInputDevice,
    NoSupportedConfig,
    StreamCreationFailed(String),
    EncodeFailed(String),
    /// Capture thread never reported ready (device hung during startup).
    StartTimeout,
}

impl std::fmt::Display for AudioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioError::NoInputDevice => write!(f, "No audio input device found"),
            AudioError::NoSupportedConfig => write!(f, "No supported audio configuration"),
            AudioError::StreamCreationFailed(e) => {
                write!(f, "Failed to create audio stream: {}", e)
            }
            AudioError::EncodeFailed(e) => write!(f, "Failed to encode audio chunk: {}", e),
            AudioError::StartTimeout => write!(f, "Audio capture did not start in time"),
        }
    }
}

impl std::error::Error for AudioError {}

/// Physical encoding of an [`AudioChunk`]. Doubles as the format request
/// passed to [`AudioCapture::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioEncoding {
    /// Opaque container blob (WAV-framed PCM).
    Containerized,
    /// Raw little-endian PCM16, mono, 16 kHz.
    LinearPcm16Mono16k,
}

/// One chunk of captured audio. Ownership moves to the backend on emission;
/// the capture side never retains it.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub data: Vec<u8>,
    pub encoding: AudioEncoding,
}

/// Convert any cpal sample to i16 with clamping.
fn sample_to_i16<T: cpal::Sample<Float = f32>>(sample: T) -> i16 {
    let f32_sample: f32 = sample.to_float_sample();
    let clamped = f32_sample.clamp(-1.0, 1.0);
    (clamped * i16::MAX as f32) as i16
}

/// Average interleaved frames down to mono.
fn mix_to_mono(samples: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let channels = channels as usize;
    samples
        .chunks(channels)
        .map(|frame| {
            let sum: i64 = frame.iter().map(|&s| s as i64).sum();
            (sum / frame.len() as i64) as i16
        })
        .collect()
}

/// Downsample audio from source rate to target rate using simple averaging.
///
/// Only integer ratios are supported (48 kHz → 16 kHz is 3:1). Other ratios
/// return the input unchanged with a warning.
fn downsample(samples: &[i16], source_rate: u32, target_rate: u32) -> Vec<i16> {
    if target_rate == 0 || source_rate == 0 {
        log::warn!(
            "Invalid sample rate (source: {}, target: {}), returning original",
            source_rate,
            target_rate
        );
        return samples.to_vec();
    }

    if source_rate == target_rate {
        return samples.to_vec();
    }

    if source_rate % target_rate != 0 {
        log::warn!(
            "Unsupported resample ratio {}:{}, returning original",
            source_rate,
            target_rate
        );
        return samples.to_vec();
    }

    let ratio = (source_rate / target_rate) as usize;

    samples
        .chunks(ratio)
        .map(|chunk| {
            let sum: i64 = chunk.iter().map(|&s| s as i64).sum();
            (sum / chunk.len() as i64) as i16
        })
        .collect()
}

/// Wrap PCM16 samples in a standalone WAV container.
fn wav_container(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>, AudioError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| AudioError::EncodeFailed(e.to_string()))?;
        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| AudioError::EncodeFailed(e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| AudioError::EncodeFailed(e.to_string()))?;
    }
    Ok(cursor.into_inner())
}

/// Frames a stream of 16 kHz mono samples into fixed-size [`AudioChunk`]s.
///
/// Pure sample-count framing: at a fixed rate, 4000 samples is 250 ms of
/// wall clock, so the containerized cadence falls out of the chunk size.
#[derive(Debug)]
pub struct ChunkFramer {
    encoding: AudioEncoding,
    buf: Vec<i16>,
    samples_per_chunk: usize,
}

impl ChunkFramer {
    pub fn new(encoding: AudioEncoding) -> Self {
        let samples_per_chunk = match encoding {
            AudioEncoding::Containerized => CONTAINER_CHUNK_SAMPLES,
            AudioEncoding::LinearPcm16Mono16k => LINEAR_BLOCK_SAMPLES,
        };
        Self {
            encoding,
            buf: Vec::with_capacity(samples_per_chunk * 2),
            samples_per_chunk,
        }
    }

    /// Append samples, returning any chunks that became complete.
    pub fn push(&mut self, samples: &[i16]) -> Result<Vec<AudioChunk>, AudioError> {
        self.buf.extend_from_slice(samples);

        let mut out = Vec::new();
        while self.buf.len() >= self.samples_per_chunk {
            let block: Vec<i16> = self.buf.drain(..self.samples_per_chunk).collect();
            out.push(self.encode(&block)?);
        }
        Ok(out)
    }

    /// Emit any remaining samples as one short final chunk.
    pub fn flush(&mut self) -> Result<Option<AudioChunk>, AudioError> {
        if self.buf.is_empty() {
            return Ok(None);
        }
        let block: Vec<i16> = self.buf.drain(..).collect();
        Ok(Some(self.encode(&block)?))
    }

    fn encode(&self, block: &[i16]) -> Result<AudioChunk, AudioError> {
        let data = match self.encoding {
            AudioEncoding::Containerized => wav_container(block, TARGET_SAMPLE_RATE)?,
            AudioEncoding::LinearPcm16Mono16k => {
                block.iter().flat_map(|&s| s.to_le_bytes()).collect()
            }
        };
        Ok(AudioChunk {
            data,
            encoding: self.encoding,
        })
    }
}

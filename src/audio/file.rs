use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::device::{CaptureDevice, CaptureStream, PlaybackDevice, SampleCallback};
use super::frame::quantize_sample;
use super::resample::{downmix, frame_span, LinearResampler};
use crate::error::{CaptureError, PlaybackError};

/// Samples handed to the capture callback per block (64ms at 16kHz)
const WAV_CAPTURE_BLOCK_SAMPLES: usize = 1024;

/// A decoded WAV file with normalized, interleaved samples
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path)
            .with_context(|| format!("Failed to open WAV file: {}", path.display()))?;

        let spec = reader.spec();
        let samples: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?,
            SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<Vec<_>, _>>()
                    .context("Failed to read audio samples")?
            }
        };

        let duration_seconds =
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Downmix and resample to mono at `sample_rate`
    pub fn to_mono(&self, sample_rate: u32) -> Vec<f32> {
        let mono = downmix(&self.samples, self.channels);
        LinearResampler::convert(self.sample_rate, sample_rate, &mono)
    }
}

/// Streams a WAV file through the capture path as if it were a microphone
pub struct WavCaptureDevice {
    path: PathBuf,
    name: String,
    realtime: bool,
}

impl WavCaptureDevice {
    pub fn new(path: PathBuf) -> Self {
        let name = format!("WAV file {}", path.display());
        Self {
            path,
            name,
            realtime: true,
        }
    }

    /// Deliver blocks as fast as possible instead of at the file's pace
    pub fn unpaced(mut self) -> Self {
        self.realtime = false;
        self
    }
}

impl CaptureDevice for WavCaptureDevice {
    fn open(
        &mut self,
        sample_rate: u32,
        mut on_samples: SampleCallback,
    ) -> Result<Box<dyn CaptureStream>, CaptureError> {
        let audio = AudioFile::open(&self.path)
            .map_err(|e| CaptureError::DeviceUnavailable(format!("{:#}", e)))?;
        let samples = audio.to_mono(sample_rate);

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let realtime = self.realtime;

        let thread = std::thread::Builder::new()
            .name("wav-capture".to_string())
            .spawn(move || {
                let block_duration =
                    Duration::from_secs_f64(WAV_CAPTURE_BLOCK_SAMPLES as f64 / sample_rate as f64);
                let started = Instant::now();

                for (index, block) in samples.chunks(WAV_CAPTURE_BLOCK_SAMPLES).enumerate() {
                    if stop_flag.load(Ordering::SeqCst) {
                        break;
                    }

                    on_samples(block);

                    if realtime {
                        // Pace against the start instant so sleeps don't accumulate drift
                        let due = started + block_duration * (index as u32 + 1);
                        if let Some(wait) = due.checked_duration_since(Instant::now()) {
                            std::thread::sleep(wait);
                        }
                    }
                }

                debug!("WAV capture thread exiting");
            })
            .map_err(|e| CaptureError::StreamFailed(e.to_string()))?;

        info!("WAV capture started: {} ({}Hz)", self.path.display(), sample_rate);

        Ok(Box::new(WavCaptureStream {
            stop,
            thread: Some(thread),
        }))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

struct WavCaptureStream {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureStream for WavCaptureStream {
    fn stop(&mut self) -> Result<(), CaptureError> {
        self.stop.store(true, Ordering::SeqCst);

        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| CaptureError::StreamFailed("WAV capture thread panicked".to_string()))?;
        }

        Ok(())
    }
}

impl Drop for WavCaptureStream {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Failed to stop WAV capture on drop: {}", e);
        }
    }
}

/// Playback device that renders the timeline into a WAV file
///
/// Buffers land at `start_time * sample_rate`; gaps are filled with silence.
/// The clock runs in real time from creation.
pub struct WavPlaybackDevice {
    writer: Option<WavWriter<BufWriter<File>>>,
    name: String,
    sample_rate: u32,
    written: u64,
    opened_at: Instant,
}

impl WavPlaybackDevice {
    pub fn create(path: impl AsRef<Path>, sample_rate: u32) -> Result<Self, PlaybackError> {
        let path = path.as_ref();
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };

        let writer = WavWriter::create(path, spec).map_err(|e| {
            PlaybackError::DeviceFailure(format!("Failed to create WAV file {}: {}", path.display(), e))
        })?;

        info!("WAV playback sink created: {} ({}Hz)", path.display(), sample_rate);

        Ok(Self {
            writer: Some(writer),
            name: format!("WAV file {}", path.display()),
            sample_rate,
            written: 0,
            opened_at: Instant::now(),
        })
    }

    /// Samples written so far, silence included
    pub fn samples_written(&self) -> u64 {
        self.written
    }
}

impl PlaybackDevice for WavPlaybackDevice {
    fn now(&self) -> f64 {
        self.opened_at.elapsed().as_secs_f64()
    }

    fn schedule(
        &mut self,
        start_time: f64,
        samples: &[f32],
        sample_rate: u32,
    ) -> Result<(), PlaybackError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| PlaybackError::DeviceFailure("WAV sink is closed".to_string()))?;

        let (target, len) = frame_span(start_time, samples.len(), sample_rate, self.sample_rate);
        let samples = LinearResampler::convert_to_len(sample_rate, self.sample_rate, samples, len);

        if target < self.written {
            debug!(
                "Buffer at {:.3}s overlaps written audio, appending at {:.3}s",
                start_time,
                self.written as f64 / self.sample_rate as f64
            );
        }

        let write_err = |e: hound::Error| PlaybackError::DeviceFailure(e.to_string());

        while self.written < target {
            writer.write_sample(0i16).map_err(write_err)?;
            self.written += 1;
        }

        for sample in samples {
            writer.write_sample(quantize_sample(sample)).map_err(write_err)?;
            self.written += 1;
        }

        Ok(())
    }

    fn flush(&mut self) -> Result<(), PlaybackError> {
        // Everything scheduled is already on disk
        Ok(())
    }

    fn close(&mut self) -> Result<(), PlaybackError> {
        if let Some(writer) = self.writer.take() {
            writer
                .finalize()
                .map_err(|e| PlaybackError::DeviceFailure(e.to_string()))?;
            info!("WAV playback sink finalized ({} samples)", self.written);
        }

        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for WavPlaybackDevice {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                warn!("Failed to finalize WAV writer on drop: {}", e);
            }
        }
    }
}

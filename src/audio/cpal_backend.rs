//! Microphone and speaker devices backed by cpal
//!
//! `cpal::Stream` is `!Send`, so each stream lives on a dedicated thread that
//! holds it until a stop signal arrives. Dropping the stream releases the device.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use parking_lot::Mutex;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{error, info, warn};

use super::device::{CaptureDevice, CaptureStream, PlaybackDevice, SampleCallback};
use super::resample::{downmix, frame_span, LinearResampler};
use super::timeline::OutputTimeline;
use crate::error::{CaptureError, PlaybackError};

/// Default input device
pub struct CpalMicrophone {
    name: String,
}

impl CpalMicrophone {
    pub fn new() -> Self {
        Self {
            name: "cpal default microphone".to_string(),
        }
    }
}

impl Default for CpalMicrophone {
    fn default() -> Self {
        Self::new()
    }
}

fn build_input<T>(
    device: &Device,
    config: &StreamConfig,
    target_rate: u32,
    mut on_samples: SampleCallback,
) -> Result<Stream, CaptureError>
where
    T: SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    let channels = config.channels;
    let mut resampler = LinearResampler::new(config.sample_rate.0, target_rate);
    let mut resampled = Vec::new();

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let interleaved: Vec<f32> = data.iter().map(|s| s.to_sample::<f32>()).collect();
                let mono = downmix(&interleaved, channels);
                resampled.clear();
                resampler.process(&mono, &mut resampled);
                on_samples(resampled.as_slice());
            },
            |err| error!("Microphone stream error: {}", err),
            None,
        )
        .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))
}

fn open_input_stream(target_rate: u32, on_samples: SampleCallback) -> Result<Stream, CaptureError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| CaptureError::DeviceUnavailable("No input device available".to_string()))?;

    let supported = device
        .default_input_config()
        .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;
    let config = supported.config();

    info!(
        "Microphone: {} ({}Hz, {} channels, {:?})",
        device.name().unwrap_or_default(),
        config.sample_rate.0,
        config.channels,
        supported.sample_format()
    );

    match supported.sample_format() {
        SampleFormat::F32 => build_input::<f32>(&device, &config, target_rate, on_samples),
        SampleFormat::I16 => build_input::<i16>(&device, &config, target_rate, on_samples),
        SampleFormat::U16 => build_input::<u16>(&device, &config, target_rate, on_samples),
        SampleFormat::I32 => build_input::<i32>(&device, &config, target_rate, on_samples),
        other => Err(CaptureError::DeviceUnavailable(format!(
            "Unsupported sample format: {:?}",
            other
        ))),
    }
}

impl CaptureDevice for CpalMicrophone {
    fn open(
        &mut self,
        sample_rate: u32,
        on_samples: SampleCallback,
    ) -> Result<Box<dyn CaptureStream>, CaptureError> {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), CaptureError>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("cpal-capture".to_string())
            .spawn(move || {
                let stream = match open_input_stream(sample_rate, on_samples) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(CaptureError::StreamFailed(e.to_string())));
                    return;
                }

                let _ = ready_tx.send(Ok(()));

                // Hold the stream until stopped; dropping it releases the device
                if stop_rx.recv().is_err() {
                    warn!("Microphone stop channel closed");
                }
                info!("Microphone capture thread exiting");
            })
            .map_err(|e| CaptureError::StreamFailed(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                return Err(CaptureError::StreamFailed(
                    "Microphone thread exited before starting".to_string(),
                ))
            }
        }

        Ok(Box::new(CpalCaptureStream {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        }))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

struct CpalCaptureStream {
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureStream for CpalCaptureStream {
    fn stop(&mut self) -> Result<(), CaptureError> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| CaptureError::StreamFailed("Microphone thread panicked".to_string()))?;
        }

        Ok(())
    }
}

impl Drop for CpalCaptureStream {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Failed to stop microphone on drop: {}", e);
        }
    }
}

/// Default output device driven by a persistent stream
///
/// Buffers are placed on an `OutputTimeline` at exact frame positions, so
/// back-to-back buffers play gaplessly regardless of when they were queued.
pub struct CpalSpeaker {
    timeline: Arc<Mutex<OutputTimeline>>,
    device_rate: u32,
    name: String,
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

fn build_output<T>(
    device: &Device,
    config: &StreamConfig,
    timeline: Arc<Mutex<OutputTimeline>>,
) -> Result<Stream, PlaybackError>
where
    T: SizedSample + FromSample<f32> + Send + 'static,
{
    let channels = config.channels.max(1) as usize;

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let mut timeline = timeline.lock();
            for frame in data.chunks_mut(channels) {
                let value = T::from_sample(timeline.next_sample());
                frame.fill(value);
            }
        },
        |err| error!("Speaker stream error: {}", err),
        None,
    );

    stream.map_err(|e| PlaybackError::DeviceFailure(e.to_string()))
}

fn open_output_stream(
    timeline: Arc<Mutex<OutputTimeline>>,
) -> Result<(Stream, u32, String), PlaybackError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| PlaybackError::DeviceFailure("No output device available".to_string()))?;

    let supported = device
        .default_output_config()
        .map_err(|e| PlaybackError::DeviceFailure(e.to_string()))?;
    let config = supported.config();
    let name = device.name().unwrap_or_default();

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_output::<f32>(&device, &config, timeline)?,
        SampleFormat::I16 => build_output::<i16>(&device, &config, timeline)?,
        SampleFormat::U16 => build_output::<u16>(&device, &config, timeline)?,
        SampleFormat::I32 => build_output::<i32>(&device, &config, timeline)?,
        other => {
            return Err(PlaybackError::DeviceFailure(format!(
                "Unsupported sample format: {:?}",
                other
            )))
        }
    };

    stream
        .play()
        .map_err(|e| PlaybackError::DeviceFailure(e.to_string()))?;
    Ok((stream, config.sample_rate.0, name))
}

impl CpalSpeaker {
    /// Open the default output device
    ///
    /// Inbound audio at `sample_rate` is resampled to the device's native rate.
    pub fn open(sample_rate: u32) -> Result<Self, PlaybackError> {
        let timeline = Arc::new(Mutex::new(OutputTimeline::new()));
        let stream_timeline = Arc::clone(&timeline);

        let (ready_tx, ready_rx) = mpsc::channel::<Result<(u32, String), PlaybackError>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("cpal-playback".to_string())
            .spawn(move || {
                let _stream = match open_output_stream(stream_timeline) {
                    Ok((stream, rate, name)) => {
                        let _ = ready_tx.send(Ok((rate, name)));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if stop_rx.recv().is_err() {
                    warn!("Speaker stop channel closed");
                }
                info!("Speaker thread exiting");
            })
            .map_err(|e| PlaybackError::DeviceFailure(e.to_string()))?;

        let (device_rate, device_name) = match ready_rx.recv() {
            Ok(Ok(ready)) => ready,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                return Err(PlaybackError::DeviceFailure(
                    "Speaker thread exited before starting".to_string(),
                ))
            }
        };

        info!(
            "Speaker: {} ({}Hz device, {}Hz stream)",
            device_name, device_rate, sample_rate
        );

        Ok(Self {
            timeline,
            device_rate,
            name: format!("cpal speaker {}", device_name),
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }
}

impl PlaybackDevice for CpalSpeaker {
    fn now(&self) -> f64 {
        self.timeline.lock().position() as f64 / self.device_rate as f64
    }

    fn schedule(
        &mut self,
        start_time: f64,
        samples: &[f32],
        sample_rate: u32,
    ) -> Result<(), PlaybackError> {
        if self.thread.is_none() {
            return Err(PlaybackError::DeviceFailure("Speaker is closed".to_string()));
        }

        let (start, len) = frame_span(start_time, samples.len(), sample_rate, self.device_rate);
        let samples = LinearResampler::convert_to_len(sample_rate, self.device_rate, samples, len);
        self.timeline.lock().schedule(start, samples);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), PlaybackError> {
        self.timeline.lock().flush();
        Ok(())
    }

    fn close(&mut self) -> Result<(), PlaybackError> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| PlaybackError::DeviceFailure("Speaker thread panicked".to_string()))?;
            info!("Speaker closed");
        }

        self.timeline.lock().flush();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for CpalSpeaker {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close speaker on drop: {}", e);
        }
    }
}

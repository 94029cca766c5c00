use serde::Deserialize;
use std::path::PathBuf;

use crate::error::{CaptureError, PlaybackError};

/// Callback receiving normalized mono samples from a capture device
///
/// Invoked on the device's own thread. Must not block.
pub type SampleCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Audio input that delivers normalized mono samples at a requested rate
///
/// Platform-specific implementations:
/// - cpal: default microphone (feature `backend-cpal`)
/// - File: WAV file played back as if it were a microphone
pub trait CaptureDevice: Send {
    /// Acquire the device and start delivering samples to `on_samples`
    ///
    /// The returned stream owns the device; stopping or dropping it releases it.
    fn open(
        &mut self,
        sample_rate: u32,
        on_samples: SampleCallback,
    ) -> Result<Box<dyn CaptureStream>, CaptureError>;

    /// Device name for logging
    fn name(&self) -> &str;
}

/// An acquired, running capture device
pub trait CaptureStream: Send {
    /// Stop delivering samples and release the device
    ///
    /// Must be safe to call more than once and after the stream failed.
    fn stop(&mut self) -> Result<(), CaptureError>;
}

/// Audio output with its own clock and start-time scheduling
pub trait PlaybackDevice: Send {
    /// Current output time in seconds
    fn now(&self) -> f64;

    /// Queue `samples` to begin playing exactly at `start_time`
    fn schedule(
        &mut self,
        start_time: f64,
        samples: &[f32],
        sample_rate: u32,
    ) -> Result<(), PlaybackError>;

    /// Discard every buffer that has not started playing yet
    fn flush(&mut self) -> Result<(), PlaybackError>;

    /// Release the output device
    fn close(&mut self) -> Result<(), PlaybackError>;

    /// Device name for logging
    fn name(&self) -> &str;
}

/// Where capture audio comes from
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CaptureSource {
    /// Default input device
    #[default]
    Microphone,
    /// WAV file streamed in real time
    File { path: PathBuf },
}

/// Where playback audio goes
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlaybackSink {
    /// Default output device
    #[default]
    Speaker,
    /// WAV file written at timeline positions
    File { path: PathBuf },
}

/// Device factory
pub struct DeviceFactory;

impl DeviceFactory {
    /// Create a capture device for the configured source
    pub fn capture(source: &CaptureSource) -> Result<Box<dyn CaptureDevice>, CaptureError> {
        match source {
            CaptureSource::Microphone => {
                #[cfg(feature = "backend-cpal")]
                {
                    Ok(Box::new(super::cpal_backend::CpalMicrophone::new()))
                }

                #[cfg(not(feature = "backend-cpal"))]
                {
                    Err(CaptureError::DeviceUnavailable(
                        "microphone capture requires the 'backend-cpal' feature; \
                        use a file capture source instead"
                            .to_string(),
                    ))
                }
            }

            CaptureSource::File { path } => {
                Ok(Box::new(super::file::WavCaptureDevice::new(path.clone())))
            }
        }
    }

    /// Create a playback device for the configured sink
    ///
    /// Output device init failures surface as `PlaybackError::DeviceFailure`.
    pub fn playback(
        sink: &PlaybackSink,
        sample_rate: u32,
    ) -> Result<Box<dyn PlaybackDevice>, PlaybackError> {
        match sink {
            PlaybackSink::Speaker => {
                #[cfg(feature = "backend-cpal")]
                {
                    let speaker = super::cpal_backend::CpalSpeaker::open(sample_rate)?;
                    Ok(Box::new(speaker))
                }

                #[cfg(not(feature = "backend-cpal"))]
                {
                    let _ = sample_rate;
                    Err(PlaybackError::DeviceFailure(
                        "speaker playback requires the 'backend-cpal' feature; \
                        use a file playback sink instead"
                            .to_string(),
                    ))
                }
            }

            PlaybackSink::File { path } => {
                let device = super::file::WavPlaybackDevice::create(path, sample_rate)?;
                Ok(Box::new(device))
            }
        }
    }
}

pub mod device;
pub mod file;
pub mod frame;
pub mod resample;
pub mod timeline;

#[cfg(feature = "backend-cpal")]
pub mod cpal_backend;

pub use device::{
    CaptureDevice, CaptureSource, CaptureStream, DeviceFactory, PlaybackDevice, PlaybackSink,
    SampleCallback,
};
pub use file::{AudioFile, WavCaptureDevice, WavPlaybackDevice};
pub use frame::{
    dequantize_sample, quantize_sample, PcmFrame, CAPTURE_SAMPLE_RATE, CAPTURE_WINDOW_SAMPLES,
    PLAYBACK_SAMPLE_RATE,
};
pub use resample::{downmix, LinearResampler};
pub use timeline::OutputTimeline;

//! Microphone capture pipeline
//!
//! The capture device calls back on its own thread with arbitrary-size
//! blocks of normalized mono samples. `CaptureEngine` cuts them into
//! fixed-size windows, quantizes each window to 16-bit PCM and hands it to a
//! `FrameSink` without blocking. Windows that cannot be sent (transport not
//! connected, queue full) are dropped, never buffered.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::audio::{
    CaptureDevice, CaptureStream, PcmFrame, CAPTURE_SAMPLE_RATE, CAPTURE_WINDOW_SAMPLES,
};
use crate::error::{CaptureError, TransportError};

/// Non-blocking destination for outbound frames
pub trait FrameSink: Send + Sync {
    /// Send one frame; must return immediately
    fn send_frame(&self, frame: PcmFrame) -> Result<(), TransportError>;
}

/// Capture format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    /// Capture sample rate in Hz
    pub sample_rate: u32,
    /// Samples per outbound frame
    pub window_samples: usize,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            sample_rate: CAPTURE_SAMPLE_RATE,
            window_samples: CAPTURE_WINDOW_SAMPLES,
        }
    }
}

/// Capture counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptureStats {
    /// Frames accepted by the sink
    pub frames_sent: u64,
    /// Frames produced while the sink could not take them
    pub frames_dropped: u64,
}

#[derive(Default)]
struct CaptureCounters {
    sent: AtomicU64,
    dropped: AtomicU64,
}

/// Assembles device blocks into fixed windows; runs inside the device callback
struct Framer {
    window: Vec<f32>,
    window_samples: usize,
    sample_rate: u32,
    sequence: Arc<AtomicU64>,
    sink: Arc<dyn FrameSink>,
    counters: Arc<CaptureCounters>,
}

impl Framer {
    fn push(&mut self, mut samples: &[f32]) {
        while !samples.is_empty() {
            let take = (self.window_samples - self.window.len()).min(samples.len());
            self.window.extend_from_slice(&samples[..take]);
            samples = &samples[take..];

            if self.window.len() == self.window_samples {
                self.emit();
            }
        }
    }

    fn emit(&mut self) {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let frame = PcmFrame::from_normalized(&self.window, self.sample_rate, sequence);
        self.window.clear();

        match self.sink.send_frame(frame) {
            Ok(()) => {
                self.counters.sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(TransportError::NotConnected) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Dropped capture frame {} (not connected)", sequence);
            }
            Err(e) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Dropped capture frame {}: {}", sequence, e);
            }
        }
    }
}

/// Drives a capture device and forwards quantized windows to a sink
pub struct CaptureEngine {
    settings: CaptureSettings,
    device: Box<dyn CaptureDevice>,
    sink: Arc<dyn FrameSink>,
    stream: Option<Box<dyn CaptureStream>>,
    sequence: Arc<AtomicU64>,
    counters: Arc<CaptureCounters>,
}

impl CaptureEngine {
    pub fn new(
        settings: CaptureSettings,
        device: Box<dyn CaptureDevice>,
        sink: Arc<dyn FrameSink>,
    ) -> Self {
        Self {
            settings,
            device,
            sink,
            stream: None,
            sequence: Arc::new(AtomicU64::new(0)),
            counters: Arc::new(CaptureCounters::default()),
        }
    }

    /// Acquire the device and start streaming frames
    ///
    /// Fails with `CaptureError::DeviceUnavailable` if the device cannot be
    /// opened. Calling while already capturing is a no-op.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        if self.stream.is_some() {
            warn!("Capture already started");
            return Ok(());
        }

        info!(
            "Starting capture from {} ({}Hz, {}-sample frames)",
            self.device.name(),
            self.settings.sample_rate,
            self.settings.window_samples
        );

        let mut framer = Framer {
            window: Vec::with_capacity(self.settings.window_samples),
            window_samples: self.settings.window_samples.max(1),
            sample_rate: self.settings.sample_rate,
            sequence: Arc::clone(&self.sequence),
            sink: Arc::clone(&self.sink),
            counters: Arc::clone(&self.counters),
        };

        let stream = self
            .device
            .open(self.settings.sample_rate, Box::new(move |samples| framer.push(samples)))?;

        self.stream = Some(stream);
        info!("Capture started");
        Ok(())
    }

    /// Stop streaming and release the device
    ///
    /// Safe to call when not capturing and after a failed capture. A partial
    /// window is discarded.
    pub fn stop(&mut self) -> Result<(), CaptureError> {
        self.detach().map_or(Ok(()), RunningCapture::stop)
    }

    /// Take the running stream out of the engine without stopping it
    ///
    /// The engine reports inactive right away. Stopping the returned handle
    /// may join a device thread, so callers sharing the engine behind a lock
    /// detach under the lock and stop after releasing it.
    pub fn detach(&mut self) -> Option<RunningCapture> {
        self.stream.take().map(RunningCapture)
    }

    pub fn is_active(&self) -> bool {
        self.stream.is_some()
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_sent: self.counters.sent.load(Ordering::Relaxed),
            frames_dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

/// A capture stream detached from its engine
pub struct RunningCapture(Box<dyn CaptureStream>);

impl RunningCapture {
    /// Stop the stream and release the device
    pub fn stop(mut self) -> Result<(), CaptureError> {
        info!("Stopping capture");
        let result = self.0.stop();
        drop(self);

        match &result {
            Ok(()) => info!("Capture stopped"),
            Err(e) => warn!("Capture device reported an error while stopping: {}", e),
        }

        result
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Failed to stop capture on drop: {}", e);
        }
    }
}

// Shared fakes for integration tests
//
// Each fake keeps its observable state behind an Arc so the test can keep a
// handle after boxing the fake into the session.

#![allow(dead_code)]

use async_trait::async_trait;
use loqa_voice::audio::{CaptureDevice, CaptureStream, PlaybackDevice, SampleCallback};
use loqa_voice::error::{CaptureError, PlaybackError, TransportError};
use loqa_voice::transport::{link_pair, Connector, Link, LinkPeer};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Connector that accepts or refuses according to a script
///
/// Once the script runs out every connect is refused.
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    script: Arc<Mutex<VecDeque<Option<Link>>>>,
    calls: Arc<Mutex<Vec<Instant>>>,
}

impl ScriptedConnector {
    pub fn refuse(&self) {
        self.script.lock().push_back(None);
    }

    /// Queue an accepted connection and return the remote end of it
    pub fn accept(&self) -> LinkPeer {
        let (link, peer) = link_pair(16);
        self.script.lock().push_back(Some(link));
        peer
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Time between consecutive connect calls, in whole milliseconds
    pub fn gaps_ms(&self) -> Vec<u64> {
        self.calls
            .lock()
            .windows(2)
            .map(|w| (w[1] - w[0]).as_millis() as u64)
            .collect()
    }

    /// Let the runtime run (and paused time advance) until `count` calls happened
    pub async fn wait_for_calls(&self, count: usize) {
        while self.call_count() < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, endpoint: &str) -> Result<Link, TransportError> {
        self.calls.lock().push(Instant::now());

        match self.script.lock().pop_front().flatten() {
            Some(link) => Ok(link),
            None => Err(TransportError::ConnectFailure {
                endpoint: endpoint.to_string(),
                reason: "connection refused".to_string(),
            }),
        }
    }
}

#[derive(Default)]
pub struct CaptureLog {
    pub callback: Option<SampleCallback>,
    pub opens: usize,
    pub stops: usize,
    pub unavailable: bool,
    pub fail_stop: bool,
    /// When set, `stop` blocks until the test sends on the paired channel
    pub stop_gate: Option<mpsc::Receiver<()>>,
}

/// Capture device driven by the test through `feed`
#[derive(Clone, Default)]
pub struct ManualCapture {
    pub log: Arc<Mutex<CaptureLog>>,
}

impl ManualCapture {
    pub fn feed(&self, samples: &[f32]) {
        if let Some(callback) = self.log.lock().callback.as_mut() {
            callback(samples);
        }
    }

    pub fn is_open(&self) -> bool {
        self.log.lock().callback.is_some()
    }
}

struct ManualStream {
    log: Arc<Mutex<CaptureLog>>,
}

impl CaptureStream for ManualStream {
    fn stop(&mut self) -> Result<(), CaptureError> {
        // Stand-in for a device thread join
        let gate = self.log.lock().stop_gate.take();
        if let Some(gate) = gate {
            let _ = gate.recv();
        }

        let mut log = self.log.lock();
        if log.callback.take().is_some() {
            log.stops += 1;
        }

        if log.fail_stop {
            return Err(CaptureError::StreamFailed("device wedged".to_string()));
        }
        Ok(())
    }
}

impl CaptureDevice for ManualCapture {
    fn open(
        &mut self,
        _sample_rate: u32,
        on_samples: SampleCallback,
    ) -> Result<Box<dyn CaptureStream>, CaptureError> {
        let mut log = self.log.lock();
        if log.unavailable {
            return Err(CaptureError::DeviceUnavailable(
                "microphone permission denied".to_string(),
            ));
        }

        log.opens += 1;
        log.callback = Some(on_samples);
        Ok(Box::new(ManualStream {
            log: Arc::clone(&self.log),
        }))
    }

    fn name(&self) -> &str {
        "manual capture"
    }
}

#[derive(Default)]
pub struct PlaybackLog {
    pub now: f64,
    pub scheduled: Vec<(f64, usize)>,
    pub flushes: usize,
    pub closed: bool,
    pub fail_close: bool,
}

/// Playback device with a clock the test sets by hand
#[derive(Clone, Default)]
pub struct ClockPlayback {
    pub log: Arc<Mutex<PlaybackLog>>,
}

impl ClockPlayback {
    pub fn set_now(&self, now: f64) {
        self.log.lock().now = now;
    }
}

impl PlaybackDevice for ClockPlayback {
    fn now(&self) -> f64 {
        self.log.lock().now
    }

    fn schedule(
        &mut self,
        start_time: f64,
        samples: &[f32],
        _sample_rate: u32,
    ) -> Result<(), PlaybackError> {
        self.log.lock().scheduled.push((start_time, samples.len()));
        Ok(())
    }

    fn flush(&mut self) -> Result<(), PlaybackError> {
        self.log.lock().flushes += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), PlaybackError> {
        let mut log = self.log.lock();
        log.closed = true;
        if log.fail_close {
            return Err(PlaybackError::DeviceFailure("output device lost".to_string()));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "clock playback"
    }
}

//! Gapless playback of inbound speech frames
//!
//! `PlaybackScheduler` keeps a single cursor, `next_start_time`, on the output
//! device's clock. Each frame is scheduled to start exactly at the cursor and
//! the cursor advances by the frame's exact duration, so frames queue against
//! each other rather than against device "now". If the device has already
//! played past the cursor (nothing arrived in time), the cursor jumps to
//! "now": the gap is accepted instead of scheduling into the past.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::audio::{PcmFrame, PlaybackDevice};
use crate::error::PlaybackError;

/// Where a frame landed on the output timeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledFrame {
    pub sequence: u64,
    /// Device time at which the frame starts
    pub start_time: f64,
    /// Exact frame duration in seconds
    pub duration: f64,
    /// The cursor was reset to "now" before this frame
    pub gap_reset: bool,
}

/// Playback counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlaybackStats {
    pub frames_scheduled: u64,
    pub device_failures: u64,
    pub gap_resets: u64,
    pub interrupts: u64,
}

/// Schedules inbound frames back-to-back on a playback device
pub struct PlaybackScheduler {
    device: Box<dyn PlaybackDevice>,
    next_start_time: f64,
    closed: bool,
    stats: PlaybackStats,
}

impl PlaybackScheduler {
    pub fn new(device: Box<dyn PlaybackDevice>) -> Self {
        let next_start_time = device.now();
        info!("Playback scheduler ready on {}", device.name());

        Self {
            device,
            next_start_time,
            closed: false,
            stats: PlaybackStats::default(),
        }
    }

    /// Schedule a frame at the cursor and advance the cursor
    ///
    /// Device failures are logged and counted; the cursor still advances so
    /// later frames keep their timing. Returns `None` once closed and for
    /// empty frames.
    pub fn schedule(&mut self, frame: PcmFrame) -> Option<ScheduledFrame> {
        if self.closed {
            debug!("Playback closed, discarding frame {}", frame.sequence());
            return None;
        }

        if frame.is_empty() {
            debug!("Skipping empty frame {}", frame.sequence());
            return None;
        }

        let now = self.device.now();
        let gap_reset = now > self.next_start_time;
        if gap_reset {
            debug!(
                "Playback idle for {:.3}s, resetting timeline",
                now - self.next_start_time
            );
            self.next_start_time = now;
            self.stats.gap_resets += 1;
        }

        let start_time = self.next_start_time;
        let duration = frame.duration_secs();
        let samples = frame.to_normalized();

        match self.device.schedule(start_time, &samples, frame.sample_rate()) {
            Ok(()) => {
                self.stats.frames_scheduled += 1;
                debug!(
                    "Scheduled frame {} at {:.3}s ({:.3}s)",
                    frame.sequence(),
                    start_time,
                    duration
                );
            }
            Err(e) => {
                self.stats.device_failures += 1;
                warn!("Failed to schedule frame {}: {}", frame.sequence(), e);
            }
        }

        self.next_start_time = start_time + duration;

        Some(ScheduledFrame {
            sequence: frame.sequence(),
            start_time,
            duration,
            gap_reset,
        })
    }

    /// Cancel queued speech (barge-in) and restart the timeline at "now"
    pub fn interrupt(&mut self) -> Result<(), PlaybackError> {
        if self.closed {
            return Ok(());
        }

        info!("Interrupting playback");
        self.stats.interrupts += 1;
        let result = self.device.flush();
        self.next_start_time = self.device.now();
        result
    }

    /// Stop scheduling and release the output device
    ///
    /// Buffers already handed to the device may finish playing. Idempotent.
    pub fn close(&mut self) -> Result<(), PlaybackError> {
        if self.closed {
            return Ok(());
        }

        self.closed = true;
        info!("Closing playback on {}", self.device.name());
        self.device.close()
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    /// Whether scheduled audio is still ahead of the device clock
    pub fn is_playing(&self) -> bool {
        !self.closed && self.next_start_time > self.device.now()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn stats(&self) -> PlaybackStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::PLAYBACK_SAMPLE_RATE;
    use approx::assert_abs_diff_eq;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct DeviceLog {
        now: f64,
        scheduled: Vec<(f64, usize)>,
        fail_next: bool,
        flushes: usize,
        closed: bool,
    }

    #[derive(Clone, Default)]
    struct ClockDevice {
        log: Arc<Mutex<DeviceLog>>,
    }

    impl ClockDevice {
        fn set_now(&self, now: f64) {
            self.log.lock().now = now;
        }
    }

    impl PlaybackDevice for ClockDevice {
        fn now(&self) -> f64 {
            self.log.lock().now
        }

        fn schedule(
            &mut self,
            start_time: f64,
            samples: &[f32],
            _sample_rate: u32,
        ) -> Result<(), PlaybackError> {
            let mut log = self.log.lock();
            if std::mem::take(&mut log.fail_next) {
                return Err(PlaybackError::DeviceFailure("underrun".to_string()));
            }
            log.scheduled.push((start_time, samples.len()));
            Ok(())
        }

        fn flush(&mut self) -> Result<(), PlaybackError> {
            self.log.lock().flushes += 1;
            Ok(())
        }

        fn close(&mut self) -> Result<(), PlaybackError> {
            self.log.lock().closed = true;
            Ok(())
        }

        fn name(&self) -> &str {
            "clock"
        }
    }

    fn frame(samples: usize, sequence: u64) -> PcmFrame {
        PcmFrame::new(vec![1000; samples], PLAYBACK_SAMPLE_RATE, sequence)
    }

    #[test]
    fn test_cursor_is_sum_of_durations_without_gap() {
        let device = ClockDevice::default();
        device.set_now(2.0);
        let mut scheduler = PlaybackScheduler::new(Box::new(device.clone()));

        let sizes = [2400, 480, 7200, 1, 24000];
        let mut expected = 2.0;
        for (i, &size) in sizes.iter().enumerate() {
            let scheduled = scheduler.schedule(frame(size, i as u64)).unwrap();
            assert_abs_diff_eq!(scheduled.start_time, expected, epsilon = 1e-9);
            assert!(!scheduled.gap_reset);
            expected += size as f64 / PLAYBACK_SAMPLE_RATE as f64;
        }

        assert_abs_diff_eq!(scheduler.next_start_time(), expected, epsilon = 1e-9);
        assert_eq!(device.log.lock().scheduled.len(), sizes.len());
    }

    #[test]
    fn test_cursor_keeps_running_while_clock_moves_within_buffer() {
        let device = ClockDevice::default();
        let mut scheduler = PlaybackScheduler::new(Box::new(device.clone()));

        scheduler.schedule(frame(2400, 0));
        device.set_now(0.05);
        let second = scheduler.schedule(frame(2400, 1)).unwrap();

        assert_abs_diff_eq!(second.start_time, 0.1, epsilon = 1e-9);
        assert!(scheduler.is_playing());
    }

    #[test]
    fn test_idle_gap_resets_to_now() {
        let device = ClockDevice::default();
        let mut scheduler = PlaybackScheduler::new(Box::new(device.clone()));

        scheduler.schedule(frame(2400, 0));
        // Stall longer than one frame's duration
        device.set_now(0.35);
        let late = scheduler.schedule(frame(2400, 1)).unwrap();

        assert!(late.gap_reset);
        assert!(late.start_time >= 0.35);
        assert_abs_diff_eq!(scheduler.next_start_time(), 0.45, epsilon = 1e-9);
        assert_eq!(scheduler.stats().gap_resets, 1);
    }

    #[test]
    fn test_device_failure_still_advances_cursor() {
        let device = ClockDevice::default();
        let mut scheduler = PlaybackScheduler::new(Box::new(device.clone()));

        device.log.lock().fail_next = true;
        scheduler.schedule(frame(2400, 0));
        let next = scheduler.schedule(frame(2400, 1)).unwrap();

        assert_abs_diff_eq!(next.start_time, 0.1, epsilon = 1e-9);
        let stats = scheduler.stats();
        assert_eq!(stats.device_failures, 1);
        assert_eq!(stats.frames_scheduled, 1);
    }

    #[test]
    fn test_frames_keep_arrival_order() {
        let device = ClockDevice::default();
        let mut scheduler = PlaybackScheduler::new(Box::new(device.clone()));

        for sequence in [7, 3, 9] {
            scheduler.schedule(frame(240, sequence));
        }

        let starts: Vec<f64> = device.log.lock().scheduled.iter().map(|s| s.0).collect();
        assert!(starts.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_interrupt_flushes_and_restarts_at_now() {
        let device = ClockDevice::default();
        let mut scheduler = PlaybackScheduler::new(Box::new(device.clone()));

        scheduler.schedule(frame(24000, 0));
        device.set_now(0.2);
        scheduler.interrupt().unwrap();

        assert_eq!(device.log.lock().flushes, 1);
        assert_abs_diff_eq!(scheduler.next_start_time(), 0.2, epsilon = 1e-9);
        assert!(!scheduler.is_playing());
    }

    #[test]
    fn test_closed_scheduler_stops_advancing() {
        let device = ClockDevice::default();
        let mut scheduler = PlaybackScheduler::new(Box::new(device.clone()));

        scheduler.schedule(frame(2400, 0));
        scheduler.close().unwrap();
        scheduler.close().unwrap();

        assert!(scheduler.schedule(frame(2400, 1)).is_none());
        assert_abs_diff_eq!(scheduler.next_start_time(), 0.1, epsilon = 1e-9);
        assert!(device.log.lock().closed);
        assert!(!scheduler.is_playing());
    }

    #[test]
    fn test_empty_frame_is_skipped() {
        let device = ClockDevice::default();
        let mut scheduler = PlaybackScheduler::new(Box::new(device.clone()));

        assert!(scheduler.schedule(frame(0, 0)).is_none());
        assert_eq!(scheduler.next_start_time(), 0.0);
    }
}

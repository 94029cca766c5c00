use super::config::SessionConfig;
use super::state::SessionState;
use super::stats::SessionStats;
use crate::audio::{CaptureDevice, PcmFrame, PlaybackDevice};
use crate::capture::{CaptureEngine, FrameSink, RunningCapture};
use crate::error::{CaptureError, PlaybackError, SessionError};
use crate::playback::PlaybackScheduler;
use crate::transport::{
    ConnectionState, Connector, ControlMessage, InboundHandler, ReconnectState,
    ReconnectSupervisor, SupervisorExit, SupervisorState, Transport, TransportEvent,
};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// State shared between the session handle and its background tasks
struct Shared {
    transport: Arc<Transport>,
    capture: Mutex<CaptureEngine>,
    playback: Mutex<PlaybackScheduler>,
    supervisor: watch::Receiver<SupervisorState>,
    reconnect: watch::Receiver<ReconnectState>,
    state: watch::Sender<SessionState>,
    terminal: Mutex<Option<SessionError>>,
    frames_received: AtomicU64,
    connections_opened: AtomicU64,
}

impl Shared {
    /// Recompute the derived state and publish it if it changed
    fn project(&self) -> SessionState {
        let connection = self.transport.state();
        let supervisor = *self.supervisor.borrow();
        let capturing = self.capture.lock().is_active();
        let playing = self.playback.lock().is_playing();

        let next = SessionState::derive(connection, supervisor, capturing, playing);
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });

        if changed {
            info!("Session state: {:?}", next);
        }

        next
    }

    /// Stop capture without holding the engine lock across the device join
    fn stop_capture(&self) -> Result<(), CaptureError> {
        let running = self.capture.lock().detach();
        running.map_or(Ok(()), RunningCapture::stop)
    }

    /// Stop capture on the blocking pool
    async fn release_capture(self: &Arc<Self>) -> Result<(), CaptureError> {
        let shared = Arc::clone(self);
        tokio::task::spawn_blocking(move || shared.stop_capture())
            .await
            .unwrap_or_else(|e| {
                Err(CaptureError::StreamFailed(format!("release task failed: {}", e)))
            })
    }

    /// Close the playback device on the blocking pool
    async fn release_playback(self: &Arc<Self>) -> Result<(), PlaybackError> {
        let shared = Arc::clone(self);
        tokio::task::spawn_blocking(move || shared.playback.lock().close())
            .await
            .unwrap_or_else(|e| {
                Err(PlaybackError::DeviceFailure(format!("release task failed: {}", e)))
            })
    }

    /// Stop capture and playback after the supervisor gave up
    async fn release_devices(self: &Arc<Self>) {
        if let Err(e) = self.release_capture().await {
            warn!("Failed to stop capture: {}", e);
        }
        if let Err(e) = self.release_playback().await {
            warn!("Failed to close playback: {}", e);
        }
    }
}

/// Routes inbound traffic from the supervisor to the playback scheduler
struct PlaybackRouter {
    shared: Arc<Shared>,
}

impl InboundHandler for PlaybackRouter {
    fn on_frame(&mut self, frame: PcmFrame) {
        self.shared.frames_received.fetch_add(1, Ordering::Relaxed);

        let scheduled = self.shared.playback.lock().schedule(frame);
        if scheduled.is_some() {
            self.shared.project();
        }
    }

    fn on_control(&mut self, message: ControlMessage) {
        match message {
            ControlMessage::Stop => {
                if let Err(e) = self.shared.playback.lock().interrupt() {
                    warn!("Failed to interrupt playback: {}", e);
                }
                self.shared.project();
            }
        }
    }
}

/// A live duplex voice session
///
/// Connects eagerly on `start`, reconnects with backoff on unexpected
/// closures, and plays inbound speech as it arrives. Capture is started
/// explicitly with `start_capture` once connected.
pub struct VoiceSession {
    config: SessionConfig,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    started_at: chrono::DateTime<chrono::Utc>,
    finished: watch::Receiver<bool>,
    supervisor_task: Option<JoinHandle<()>>,
    projector_task: Option<JoinHandle<()>>,
}

impl VoiceSession {
    /// Start a session and begin connecting immediately
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        config: SessionConfig,
        connector: Arc<dyn Connector>,
        capture_device: Box<dyn CaptureDevice>,
        playback_device: Box<dyn PlaybackDevice>,
    ) -> Self {
        info!("Starting voice session: {}", config.session_id);

        let transport = Arc::new(Transport::new(config.endpoint.clone(), connector));
        let sink: Arc<dyn FrameSink> = transport.clone();
        let capture = CaptureEngine::new(config.capture, capture_device, sink);
        let playback = PlaybackScheduler::new(playback_device);

        let cancel = CancellationToken::new();
        let supervisor = ReconnectSupervisor::new(
            Arc::clone(&transport),
            config.reconnect,
            cancel.child_token(),
        );

        let (state, _) = watch::channel(SessionState::Connecting);
        let (finished_tx, finished) = watch::channel(false);

        let shared = Arc::new(Shared {
            transport,
            capture: Mutex::new(capture),
            playback: Mutex::new(playback),
            supervisor: supervisor.watch_state(),
            reconnect: supervisor.watch_reconnect(),
            state,
            terminal: Mutex::new(None),
            frames_received: AtomicU64::new(0),
            connections_opened: AtomicU64::new(0),
        });

        // Subscribe before the supervisor can emit the first Open
        let events = shared.transport.subscribe();
        let projector_task = tokio::spawn(Self::project_state(
            Arc::clone(&shared),
            events,
            config.state_poll_interval,
            cancel.clone(),
        ));

        let router = PlaybackRouter {
            shared: Arc::clone(&shared),
        };
        let task_shared = Arc::clone(&shared);
        let supervisor_task = tokio::spawn(async move {
            match supervisor.run(router).await {
                SupervisorExit::Exhausted { attempts } => {
                    error!("Session lost its connection after {} attempts", attempts);
                    task_shared.release_devices().await;
                    *task_shared.terminal.lock() =
                        Some(SessionError::ReconnectExhausted { attempts });
                }
                SupervisorExit::Stopped => debug!("Supervisor stopped"),
            }

            task_shared.project();
            finished_tx.send_replace(true);
        });

        Self {
            config,
            shared,
            cancel,
            started_at: Utc::now(),
            finished,
            supervisor_task: Some(supervisor_task),
            projector_task: Some(projector_task),
        }
    }

    /// Keep the published state in step with the components
    ///
    /// Transitions driven by the transport and supervisor are picked up from
    /// their watch channels; playback running dry has no event, so the state
    /// is also re-evaluated every `poll` while connected.
    async fn project_state(
        shared: Arc<Shared>,
        mut events: tokio::sync::broadcast::Receiver<TransportEvent>,
        poll: std::time::Duration,
        cancel: CancellationToken,
    ) {
        let mut connection = shared.transport.watch_state();
        let mut supervisor = shared.supervisor.clone();

        loop {
            if shared.project().is_terminal() {
                break;
            }

            tokio::select! {
                biased;
                // Drain events first so counters are current before a state is published
                event = events.recv() => match event {
                    Ok(TransportEvent::Open) => {
                        shared.connections_opened.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(TransportEvent::Closed(info)) => {
                        debug!("Transport closed (code={:?})", info.code);
                    }
                    Ok(TransportEvent::Error(e)) => debug!("Transport error: {}", e),
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Missed {} transport events", missed);
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = cancel.cancelled() => break,
                changed = connection.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                changed = supervisor.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(poll) => {}
            }
        }

        debug!("State projection stopped");
    }

    pub fn session_id(&self) -> &str {
        &self.config.session_id
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.transport.state()
    }

    /// Start streaming microphone frames
    ///
    /// A no-op unless the transport is connected. Device failures surface
    /// here and never trigger a reconnect.
    pub fn start_capture(&self) -> Result<(), SessionError> {
        if self.shared.transport.state() != ConnectionState::Connected {
            debug!("Not connected, ignoring capture start");
            return Ok(());
        }

        self.shared.capture.lock().start()?;
        self.shared.project();
        Ok(())
    }

    pub fn stop_capture(&self) -> Result<(), SessionError> {
        let result = self.shared.stop_capture();
        self.shared.project();
        Ok(result?)
    }

    /// Wait until the session stops for good
    ///
    /// Returns the terminal error, if the session ended on one.
    pub async fn closed(&self) -> Option<SessionError> {
        let mut finished = self.finished.clone();
        // Sender only drops after publishing `true`
        let _ = finished.wait_for(|done| *done).await;
        self.shared.terminal.lock().clone()
    }

    /// Get current session statistics
    pub fn stats(&self) -> SessionStats {
        let duration = Utc::now().signed_duration_since(self.started_at);
        let capture = self.shared.capture.lock().stats();
        let playback = self.shared.playback.lock().stats();

        SessionStats {
            session_id: self.config.session_id.clone(),
            started_at: self.started_at,
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
            state: self.state(),
            frames_sent: capture.frames_sent,
            frames_dropped: capture.frames_dropped,
            frames_received: self.shared.frames_received.load(Ordering::Relaxed),
            frames_scheduled: playback.frames_scheduled,
            playback_failures: playback.device_failures,
            gap_resets: playback.gap_resets,
            interrupts: playback.interrupts,
            connections_opened: self.shared.connections_opened.load(Ordering::Relaxed),
            reconnect_attempts: self.shared.reconnect.borrow().attempt_count,
        }
    }

    /// Tear the session down
    ///
    /// Cancels any pending reconnect, stops capture, closes the transport and
    /// releases the playback device. All three releases run even if one
    /// fails; the first failure is returned.
    pub async fn dispose(mut self) -> Result<SessionStats, SessionError> {
        info!("Disposing voice session: {}", self.config.session_id);

        self.cancel.cancel();

        // Device joins can block, so they run on the blocking pool
        let capture = self.shared.release_capture().await;
        self.shared.transport.close();
        let playback = self.shared.release_playback().await;

        for task in [self.supervisor_task.take(), self.projector_task.take()]
            .into_iter()
            .flatten()
        {
            if let Err(e) = task.await {
                error!("Session task panicked: {}", e);
            }
        }

        self.shared.state.send_replace(SessionState::Disconnected);
        let stats = self.stats();

        info!("Voice session disposed");

        capture?;
        playback?;
        Ok(stats)
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        // Background tasks release the devices and the socket once they see this
        self.cancel.cancel();
    }
}

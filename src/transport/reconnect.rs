// Reconnect supervision
//
// The supervisor owns the connect loop: connect, pump inbound traffic to a
// handler until the stream ends, then back off and retry. Attempts reset on
// every successful connection. After `max_attempts` consecutive failed
// retries it gives up and reports `Exhausted`. Cancelling its token (session
// dispose) stops it at any point, including mid-backoff, without retrying.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::connection::{Received, Transport};
use super::link::ControlMessage;
use crate::audio::PcmFrame;

/// Bounded exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10000),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`, capped
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delays for every retry the policy allows
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..=self.max_attempts).map(move |attempt| self.delay_for(attempt))
    }
}

/// Retry bookkeeping, reset on every successful connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconnectState {
    pub attempt_count: u32,
    pub last_delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum SupervisorState {
    Idle,
    Connecting { attempt: u32 },
    Connected,
    Backoff { attempt: u32, delay_ms: u64 },
    /// Attempt cap reached; no more retries
    Exhausted,
    /// Cancelled or deliberately closed
    Stopped,
}

/// How the supervisor finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    Stopped,
    Exhausted { attempts: u32 },
}

/// Receives inbound traffic from the live connection
pub trait InboundHandler: Send {
    fn on_frame(&mut self, frame: PcmFrame);
    fn on_control(&mut self, message: ControlMessage);
}

/// Keeps the transport connected across unexpected closures
pub struct ReconnectSupervisor {
    transport: Arc<Transport>,
    policy: ReconnectPolicy,
    cancel: CancellationToken,
    state: watch::Sender<SupervisorState>,
    reconnect: watch::Sender<ReconnectState>,
}

impl ReconnectSupervisor {
    pub fn new(transport: Arc<Transport>, policy: ReconnectPolicy, cancel: CancellationToken) -> Self {
        let (state, _) = watch::channel(SupervisorState::Idle);
        let (reconnect, _) = watch::channel(ReconnectState::default());

        Self {
            transport,
            policy,
            cancel,
            state,
            reconnect,
        }
    }

    pub fn watch_state(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    pub fn watch_reconnect(&self) -> watch::Receiver<ReconnectState> {
        self.reconnect.subscribe()
    }

    fn set_state(&self, state: SupervisorState) {
        self.state.send_replace(state);
    }

    fn stop(&self) -> SupervisorExit {
        info!("Reconnect supervisor stopped");
        self.set_state(SupervisorState::Stopped);
        SupervisorExit::Stopped
    }

    /// Run until cancelled, deliberately closed, or out of attempts
    pub async fn run<H: InboundHandler>(self, mut handler: H) -> SupervisorExit {
        loop {
            if self.cancel.is_cancelled() {
                return self.stop();
            }

            let attempt = self.reconnect.borrow().attempt_count;
            self.set_state(SupervisorState::Connecting { attempt });

            let connected = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.transport.close();
                    return self.stop();
                }
                result = self.transport.connect() => result,
            };

            let failure = match connected {
                Ok(mut stream) => {
                    self.reconnect.send_replace(ReconnectState::default());
                    self.set_state(SupervisorState::Connected);

                    loop {
                        let item = tokio::select! {
                            biased;
                            _ = self.cancel.cancelled() => {
                                self.transport.close();
                                return self.stop();
                            }
                            item = stream.next() => item,
                        };

                        match item {
                            Some(Received::Audio(frame)) => handler.on_frame(frame),
                            Some(Received::Control(message)) => handler.on_control(message),
                            None => break,
                        }
                    }

                    if self.cancel.is_cancelled() || self.transport.closed_deliberately() {
                        return self.stop();
                    }

                    let info = stream.close_info().cloned().unwrap_or_default();
                    self.transport.mark_closed(info)
                }
                Err(e) => {
                    warn!("Connect attempt {} failed: {}", attempt, e);
                    e
                }
            };

            let attempt_count = self.reconnect.borrow().attempt_count;
            if attempt_count >= self.policy.max_attempts {
                error!(
                    "Giving up on {} after {} reconnect attempts (last error: {})",
                    self.transport.endpoint(),
                    attempt_count,
                    failure
                );
                self.set_state(SupervisorState::Exhausted);
                return SupervisorExit::Exhausted {
                    attempts: attempt_count,
                };
            }

            let attempt = attempt_count + 1;
            let delay = self.policy.delay_for(attempt);
            self.reconnect.send_replace(ReconnectState {
                attempt_count: attempt,
                last_delay: delay,
            });
            self.set_state(SupervisorState::Backoff {
                attempt,
                delay_ms: delay.as_millis() as u64,
            });
            info!(
                "Reconnecting to {} in {:?} (attempt {}/{})",
                self.transport.endpoint(),
                delay,
                attempt,
                self.policy.max_attempts
            );

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return self.stop(),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

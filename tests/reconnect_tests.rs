// Integration tests for reconnect supervision
//
// These run on paused Tokio time so backoff delays are exact and instant.

mod common;

use common::ScriptedConnector;
use loqa_voice::audio::PcmFrame;
use loqa_voice::transport::{
    CloseInfo, ConnectionState, ControlMessage, Inbound, InboundHandler, ReconnectPolicy,
    ReconnectSupervisor, SupervisorExit, SupervisorState, Transport, TransportEvent,
    NORMAL_CLOSURE,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Default)]
struct Collector {
    frames: Arc<Mutex<Vec<PcmFrame>>>,
    controls: Arc<Mutex<Vec<ControlMessage>>>,
}

impl InboundHandler for Collector {
    fn on_frame(&mut self, frame: PcmFrame) {
        self.frames.lock().push(frame);
    }

    fn on_control(&mut self, message: ControlMessage) {
        self.controls.lock().push(message);
    }
}

fn supervisor(connector: &ScriptedConnector) -> (Arc<Transport>, ReconnectSupervisor, CancellationToken) {
    let transport = Arc::new(Transport::new(
        "ws://localhost:8000/ws/audio",
        Arc::new(connector.clone()),
    ));
    let cancel = CancellationToken::new();
    let supervisor = ReconnectSupervisor::new(
        Arc::clone(&transport),
        ReconnectPolicy::default(),
        cancel.clone(),
    );
    (transport, supervisor, cancel)
}

#[tokio::test(start_paused = true)]
async fn test_exhausts_after_five_retries() {
    // Setup: every connect is refused
    let connector = ScriptedConnector::default();
    let (transport, supervisor, _cancel) = supervisor(&connector);
    let state = supervisor.watch_state();

    let exit = supervisor.run(Collector::default()).await;

    // Verify: one initial attempt plus five clamped retries, then nothing
    assert_eq!(exit, SupervisorExit::Exhausted { attempts: 5 });
    assert_eq!(*state.borrow(), SupervisorState::Exhausted);
    assert_eq!(connector.call_count(), 6);
    assert_eq!(connector.gaps_ms(), vec![1000, 2000, 4000, 8000, 10000]);
    assert_eq!(transport.state(), ConnectionState::Disconnected);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.call_count(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_backoff_prevents_further_connects() {
    let connector = ScriptedConnector::default();
    let (_transport, supervisor, cancel) = supervisor(&connector);
    let mut state = supervisor.watch_state();

    let task = tokio::spawn(supervisor.run(Collector::default()));

    // Wait until the first retry is pending
    state
        .wait_for(|s| matches!(s, SupervisorState::Backoff { attempt: 1, .. }))
        .await
        .unwrap();
    cancel.cancel();

    assert_eq!(task.await.unwrap(), SupervisorExit::Stopped);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_successful_connect_resets_attempts() {
    // Setup: two refusals, then a connection the remote side drops
    let connector = ScriptedConnector::default();
    connector.refuse();
    connector.refuse();
    let peer = connector.accept();

    let (transport, supervisor, _cancel) = supervisor(&connector);
    let reconnect = supervisor.watch_reconnect();
    let task = tokio::spawn(supervisor.run(Collector::default()));

    transport
        .watch_state()
        .wait_for(|s| *s == ConnectionState::Connected)
        .await
        .unwrap();
    assert_eq!(reconnect.borrow().attempt_count, 0);

    let mut events = transport.subscribe();
    drop(peer);

    // Verify: the unexpected closure restarts the schedule at 1000 ms
    let exit = task.await.unwrap();
    assert_eq!(exit, SupervisorExit::Exhausted { attempts: 5 });
    assert_eq!(connector.call_count(), 8);
    assert_eq!(
        connector.gaps_ms(),
        vec![1000, 2000, 1000, 2000, 4000, 8000, 10000]
    );
    assert!(matches!(
        events.recv().await.unwrap(),
        TransportEvent::Closed(_)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_inbound_frames_delivered_in_order() {
    let connector = ScriptedConnector::default();
    let peer = connector.accept();
    let (_transport, supervisor, cancel) = supervisor(&connector);

    let collector = Collector::default();
    let task = tokio::spawn(supervisor.run(collector.clone()));

    for sample in [100i16, 200, 300] {
        peer.inbound
            .send(Inbound::Audio(sample.to_le_bytes().repeat(480)))
            .await
            .unwrap();
    }
    peer.inbound
        .send(Inbound::Control(ControlMessage::Stop))
        .await
        .unwrap();

    while collector.controls.lock().is_empty() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    cancel.cancel();
    assert_eq!(task.await.unwrap(), SupervisorExit::Stopped);
    assert_eq!(connector.call_count(), 1);

    let frames = collector.frames.lock();
    let sequences: Vec<u64> = frames.iter().map(|f| f.sequence()).collect();
    assert_eq!(sequences, vec![0, 1, 2]);
    assert_eq!(frames[2].samples()[0], 300);
    assert_eq!(frames[0].len(), 480);
    assert_eq!(frames[0].sample_rate(), 24000);
    assert_eq!(*collector.controls.lock(), vec![ControlMessage::Stop]);
}

#[tokio::test(start_paused = true)]
async fn test_deliberate_close_does_not_reconnect() {
    let connector = ScriptedConnector::default();
    let mut peer = connector.accept();
    let (transport, supervisor, _cancel) = supervisor(&connector);
    let task = tokio::spawn(supervisor.run(Collector::default()));

    transport
        .watch_state()
        .wait_for(|s| *s == ConnectionState::Connected)
        .await
        .unwrap();
    transport.close();

    // Play the socket owner: see the queue drop, then report the close
    assert_eq!(peer.outbound.recv().await, None);
    peer.inbound
        .send(Inbound::Closed(CloseInfo {
            code: Some(NORMAL_CLOSURE),
            reason: "closed by client".to_string(),
        }))
        .await
        .unwrap();

    assert_eq!(task.await.unwrap(), SupervisorExit::Stopped);
    assert_eq!(connector.call_count(), 1);
}

use async_trait::async_trait;
use calmline_voice::{
    AudioChunk, AudioFlowController, ChannelEvent, ChannelSettings, ChannelState,
    ProviderEvent, RecognitionChannel, RecognitionConnection, RecognitionProvider, VoiceError,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Clone, Copy)]
enum Attempt {
    Refuse,
    Accept,
}

/// Provider side of an accepted connection, driven by the test.
struct LiveConnection {
    events: mpsc::Sender<ProviderEvent>,
    audio: mpsc::Receiver<AudioChunk>,
}

struct ScriptedProvider {
    script: Mutex<VecDeque<Attempt>>,
    connects: AtomicU32,
    live: Mutex<VecDeque<LiveConnection>>,
}

impl ScriptedProvider {
    fn new(script: &[Attempt]) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.iter().copied().collect()),
            connects: AtomicU32::new(0),
            live: Mutex::new(VecDeque::new()),
        })
    }

    fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    async fn next_connection(&self) -> LiveConnection {
        for _ in 0..400 {
            if let Some(conn) = self.live.lock().unwrap().pop_front() {
                return conn;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("provider was never connected");
    }
}

#[async_trait]
impl RecognitionProvider for ScriptedProvider {
    async fn connect(
        &self,
        _session_id: &str,
        audio_capacity: usize,
    ) -> Result<RecognitionConnection, VoiceError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let attempt = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Attempt::Refuse);
        match attempt {
            Attempt::Refuse => Err(VoiceError::Recognition("connection refused".to_string())),
            Attempt::Accept => {
                let (audio_tx, audio_rx) = mpsc::channel(audio_capacity);
                let (events_tx, events_rx) = mpsc::channel(16);
                self.live.lock().unwrap().push_back(LiveConnection {
                    events: events_tx,
                    audio: audio_rx,
                });
                Ok(RecognitionConnection::new(audio_tx, events_rx))
            }
        }
    }
}

fn fast_settings() -> ChannelSettings {
    ChannelSettings {
        max_consecutive_failures: 3,
        backoff: Duration::from_millis(10),
        open_timeout: Duration::from_secs(1),
        audio_capacity: 64,
    }
}

async fn wait_for_state(channel: &RecognitionChannel, target: ChannelState) {
    let mut rx = channel.subscribe();
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == target))
        .await
        .unwrap_or_else(|_| panic!("channel never reached {:?}", target))
        .expect("state sender dropped");
}

fn chunk(n: u8) -> AudioChunk {
    AudioChunk::new(vec![n])
}

#[tokio::test]
async fn stops_after_three_consecutive_failures() {
    let provider = ScriptedProvider::new(&[]);
    let flow = Arc::new(AudioFlowController::new(10));
    let (channel, mut events) =
        RecognitionChannel::spawn("s1", provider.clone(), flow, fast_settings());

    wait_for_state(&channel, ChannelState::Failed).await;
    assert_eq!(provider.connects(), 3);
    assert_eq!(channel.consecutive_failures(), 3);
    assert!(!channel.is_usable());

    // The supervisor exits after giving up, which closes the event stream.
    let mut seen = Vec::new();
    while let Some(event) = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("event stream should close")
    {
        seen.push(event);
    }
    assert_eq!(
        seen,
        vec![
            ChannelEvent::Interrupted,
            ChannelEvent::Interrupted,
            ChannelEvent::Interrupted,
            ChannelEvent::Unavailable
        ]
    );

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(provider.connects(), 3, "no reconnect after the ceiling");
}

#[tokio::test]
async fn buffered_audio_is_flushed_in_order_on_ready() {
    let provider = ScriptedProvider::new(&[Attempt::Accept]);
    let flow = Arc::new(AudioFlowController::new(10));
    for n in 1..=3 {
        flow.enqueue(chunk(n));
    }

    let (channel, _events) =
        RecognitionChannel::spawn("s1", provider.clone(), flow.clone(), fast_settings());
    let mut live = provider.next_connection().await;
    live.events.send(ProviderEvent::Open).await.unwrap();
    wait_for_state(&channel, ChannelState::Ready).await;

    flow.enqueue(chunk(4));
    let mut received = Vec::new();
    for _ in 0..4 {
        let chunk = tokio::time::timeout(Duration::from_secs(1), live.audio.recv())
            .await
            .unwrap()
            .unwrap();
        received.push(chunk.data[0]);
    }
    assert_eq!(received, vec![1, 2, 3, 4]);
    assert_eq!(flow.queued_len(), 0);
}

#[tokio::test]
async fn reconnects_after_error_and_replays_gap_audio() {
    let provider = ScriptedProvider::new(&[Attempt::Accept, Attempt::Accept]);
    let flow = Arc::new(AudioFlowController::new(10));
    let (channel, mut events) =
        RecognitionChannel::spawn("s1", provider.clone(), flow.clone(), fast_settings());

    let first = provider.next_connection().await;
    first.events.send(ProviderEvent::Open).await.unwrap();
    wait_for_state(&channel, ChannelState::Ready).await;

    first
        .events
        .send(ProviderEvent::Error("socket reset".to_string()))
        .await
        .unwrap();
    assert_eq!(events.recv().await, Some(ChannelEvent::Interrupted));

    // Audio arriving between connections is held.
    flow.enqueue(chunk(9));

    let mut second = provider.next_connection().await;
    second.events.send(ProviderEvent::Open).await.unwrap();
    wait_for_state(&channel, ChannelState::Ready).await;

    let replayed = tokio::time::timeout(Duration::from_secs(1), second.audio.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(replayed.data, vec![9]);
    assert_eq!(provider.connects(), 2);
    assert_eq!(channel.consecutive_failures(), 0);
}

#[tokio::test]
async fn transcripts_are_forwarded_as_fragments() {
    let provider = ScriptedProvider::new(&[Attempt::Accept]);
    let flow = Arc::new(AudioFlowController::new(10));
    let (channel, mut events) =
        RecognitionChannel::spawn("s7", provider.clone(), flow, fast_settings());

    let live = provider.next_connection().await;
    live.events.send(ProviderEvent::Open).await.unwrap();
    wait_for_state(&channel, ChannelState::Ready).await;
    live.events
        .send(ProviderEvent::Transcript {
            text: "hello there".to_string(),
            is_final: true,
        })
        .await
        .unwrap();

    match events.recv().await {
        Some(ChannelEvent::Fragment(fragment)) => {
            assert_eq!(fragment.session_id, "s7");
            assert_eq!(fragment.text, "hello there");
            assert!(fragment.is_final);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn normal_close_does_not_reconnect() {
    let provider = ScriptedProvider::new(&[Attempt::Accept, Attempt::Accept]);
    let flow = Arc::new(AudioFlowController::new(10));
    let (channel, _events) =
        RecognitionChannel::spawn("s1", provider.clone(), flow, fast_settings());

    let live = provider.next_connection().await;
    live.events.send(ProviderEvent::Open).await.unwrap();
    wait_for_state(&channel, ChannelState::Ready).await;
    live.events
        .send(ProviderEvent::Closed {
            code: Some(1000),
            reason: "done".to_string(),
        })
        .await
        .unwrap();

    wait_for_state(&channel, ChannelState::Closed).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(provider.connects(), 1);
}

#[tokio::test]
async fn close_releases_the_provider_connection() {
    let provider = ScriptedProvider::new(&[Attempt::Accept]);
    let flow = Arc::new(AudioFlowController::new(10));
    let (channel, _events) =
        RecognitionChannel::spawn("s1", provider.clone(), flow.clone(), fast_settings());

    let mut live = provider.next_connection().await;
    live.events.send(ProviderEvent::Open).await.unwrap();
    wait_for_state(&channel, ChannelState::Ready).await;

    channel.close();
    wait_for_state(&channel, ChannelState::Closed).await;

    let end = tokio::time::timeout(Duration::from_secs(1), live.audio.recv())
        .await
        .unwrap();
    assert!(end.is_none(), "audio channel should be closed");
    assert!(!flow.is_forwarding());
}

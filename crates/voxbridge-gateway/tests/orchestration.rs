//! End-to-end orchestration tests: transport events in, ordered audio
//! frames out, with stubbed transcription, synthesis, and model.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use voxbridge_core::config::Config;
use voxbridge_core::protocol::{MarkFrame, MediaFrame, StartFrame, TransportEvent};
use voxbridge_core::registry::InMemoryRegistry;
use voxbridge_gateway::dispatch::{spawn_synthesis_pump, Dispatcher};
use voxbridge_gateway::GatewayState;
use voxbridge_media::stt::{SttEvent, Transcriber, TranscriberHandle};
use voxbridge_media::SpeechSynthesizer;
use voxbridge_providers::{
    CompletionChunk, CompletionRequest, CompletionStream, Credentials, LlmProvider,
    ToolDefinition,
};
use voxbridge_recall::NoopRecall;
use voxbridge_tools::{ToolContext, ToolRegistry};

// --- Stubs ---

/// Provider that answers every exchange with the same scripted text.
struct CannedProvider {
    text: String,
}

#[async_trait]
impl LlmProvider for CannedProvider {
    fn id(&self) -> &str {
        "canned"
    }

    fn format_messages(&self, turns: &[voxbridge_core::session::Turn]) -> Vec<serde_json::Value> {
        turns
            .iter()
            .map(|t| json!({ "content": t.content }))
            .collect()
    }

    fn format_tools(&self, _tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
        Vec::new()
    }

    fn is_tool_use_stop(&self, stop_reason: &str) -> bool {
        stop_reason == "tool_calls"
    }

    async fn stream(
        &self,
        _request: &CompletionRequest,
        _credentials: &Credentials,
    ) -> anyhow::Result<CompletionStream> {
        let chunks = vec![Ok(CompletionChunk {
            delta: Some(self.text.clone()),
            ..Default::default()
        })];
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

/// Synthesizer whose "audio" is the utf-8 text itself.
struct EchoSynthesizer;

#[async_trait]
impl SpeechSynthesizer for EchoSynthesizer {
    async fn synthesize(&self, text: &str) -> anyhow::Result<Vec<u8>> {
        Ok(text.as_bytes().to_vec())
    }
}

/// Transcriber stub: the test holds the event sender and observes the
/// forwarded audio.
struct StubTranscriber {
    handle: Mutex<Option<TranscriberHandle>>,
}

#[async_trait]
impl Transcriber for StubTranscriber {
    async fn start(&self, _cancel: CancellationToken) -> anyhow::Result<TranscriberHandle> {
        self.handle
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow::anyhow!("transcriber already started"))
    }
}

struct TestRig {
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    out_rx: mpsc::UnboundedReceiver<String>,
    stt_tx: mpsc::UnboundedSender<SttEvent>,
    audio_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    state: Arc<GatewayState>,
    dispatcher_done: tokio::task::JoinHandle<()>,
}

fn rig(reply_text: &str) -> TestRig {
    let config: Config = json5::from_str(
        r#"{ conversation: { opening_line: "Hello, how can I help?" } }"#,
    )
    .unwrap();
    let config = Arc::new(config);

    let provider = Arc::new(CannedProvider {
        text: reply_text.to_string(),
    });
    let credentials = Credentials {
        api_key: "test".into(),
    };
    let tools = Arc::new(ToolRegistry::standard());
    let tool_ctx = Arc::new(ToolContext {
        config: config.clone(),
        provider: provider.clone(),
        credentials: credentials.clone(),
        signaling: None,
        messaging: None,
        email: None,
        calendar: None,
    });

    let (audio_tx, audio_rx) = mpsc::unbounded_channel();
    let (stt_tx, stt_rx) = mpsc::unbounded_channel();
    let transcriber = Arc::new(StubTranscriber {
        handle: Mutex::new(Some(TranscriberHandle {
            audio_tx,
            events: stt_rx,
        })),
    });

    let state = Arc::new(GatewayState {
        config,
        registry: Arc::new(InMemoryRegistry::new()),
        provider,
        credentials,
        tools,
        tool_ctx,
        recall: Arc::new(NoopRecall),
        transcriber,
        synthesizer: Some(Arc::new(EchoSynthesizer)),
        signaling: None,
    });

    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (dispatcher, segment_rx) = Dispatcher::new(state.clone(), out_tx);
    spawn_synthesis_pump(state.clone(), dispatcher.sequencer(), segment_rx);

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let dispatcher_done = tokio::spawn(dispatcher.run(event_rx));

    TestRig {
        event_tx,
        out_rx,
        stt_tx,
        audio_rx,
        state,
        dispatcher_done,
    }
}

fn start_event() -> TransportEvent {
    TransportEvent::Start(StartFrame {
        stream_sid: "MZ1".into(),
        call_sid: "CA1".into(),
        from: Some("+15550001111".into()),
        to: Some("+15550002222".into()),
    })
}

/// Wait for the next frame matching `event`, with a deadline.
async fn next_frame(
    out_rx: &mut mpsc::UnboundedReceiver<String>,
    event: &str,
) -> serde_json::Value {
    let deadline = tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(frame) = out_rx.recv().await {
            let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
            if value["event"] == event {
                return value;
            }
        }
        panic!("channel closed before {event} frame");
    });
    deadline.await.unwrap_or_else(|_| panic!("no {event} frame within deadline"))
}

fn decode_payload(frame: &serde_json::Value) -> String {
    let payload = frame["media"]["payload"].as_str().unwrap();
    String::from_utf8(
        base64::engine::general_purpose::STANDARD
            .decode(payload)
            .unwrap(),
    )
    .unwrap()
}

// --- Tests ---

#[tokio::test(flavor = "multi_thread")]
async fn start_speaks_the_opening_line_as_the_first_chunk() {
    let mut rig = rig("unused");
    rig.event_tx.send(start_event()).unwrap();

    let media = next_frame(&mut rig.out_rx, "media").await;
    assert_eq!(media["streamSid"], "MZ1");
    assert_eq!(decode_payload(&media), "Hello, how can I help?");

    // A mark follows the first chunk.
    let mark = next_frame(&mut rig.out_rx, "mark").await;
    assert_eq!(mark["mark"]["name"], "seg-0");
}

#[tokio::test(flavor = "multi_thread")]
async fn transcript_drives_an_exchange_to_playback() {
    let mut rig = rig("It is sunny today.");
    rig.event_tx.send(start_event()).unwrap();

    // Swallow the opening line.
    next_frame(&mut rig.out_rx, "media").await;

    rig.stt_tx
        .send(SttEvent::Transcript("what's the weather".into()))
        .unwrap();

    let media = next_frame(&mut rig.out_rx, "media").await;
    assert_eq!(decode_payload(&media), "It is sunny today.");

    // The exchange is recorded on the session transcript.
    let session = rig
        .state
        .registry
        .get(&voxbridge_core::session::CallId("CA1".into()))
        .await
        .unwrap();
    let guard = session.lock().await;
    let contents: Vec<&str> = guard.turns.iter().map(|t| t.content.as_str()).collect();
    assert!(contents.contains(&"what's the weather"));
    assert!(contents.contains(&"It is sunny today."));
}

#[tokio::test(flavor = "multi_thread")]
async fn barge_in_mid_playback_clears_and_discards() {
    let mut rig = rig("unused");
    rig.event_tx.send(start_event()).unwrap();

    // Opening line released but not yet acknowledged: marks outstanding.
    next_frame(&mut rig.out_rx, "media").await;
    next_frame(&mut rig.out_rx, "mark").await;

    rig.stt_tx
        .send(SttEvent::Utterance("wait stop".into()))
        .unwrap();

    let clear = next_frame(&mut rig.out_rx, "clear").await;
    assert_eq!(clear["streamSid"], "MZ1");
}

#[tokio::test(flavor = "multi_thread")]
async fn whitespace_utterance_does_not_interrupt() {
    let mut rig = rig("unused");
    rig.event_tx.send(start_event()).unwrap();
    next_frame(&mut rig.out_rx, "media").await;
    next_frame(&mut rig.out_rx, "mark").await;

    rig.stt_tx.send(SttEvent::Utterance("   ".into())).unwrap();

    // Give the router a beat; no clear frame may appear.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rig.out_rx.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn utterance_after_ack_does_not_interrupt() {
    let mut rig = rig("unused");
    rig.event_tx.send(start_event()).unwrap();
    next_frame(&mut rig.out_rx, "media").await;
    let mark = next_frame(&mut rig.out_rx, "mark").await;

    // The transport acknowledges playback of the only chunk.
    rig.event_tx
        .send(TransportEvent::Mark(MarkFrame {
            name: mark["mark"]["name"].as_str().unwrap().to_string(),
        }))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    rig.stt_tx
        .send(SttEvent::Utterance("by the way".into()))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rig.out_rx.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn media_frames_are_forwarded_to_the_transcriber() {
    let mut rig = rig("unused");
    rig.event_tx.send(start_event()).unwrap();
    next_frame(&mut rig.out_rx, "media").await;

    let payload = base64::engine::general_purpose::STANDARD.encode(b"audio-bytes");
    rig.event_tx
        .send(TransportEvent::Media(MediaFrame { payload }))
        .unwrap();

    let forwarded = tokio::time::timeout(Duration::from_secs(2), rig.audio_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(forwarded, b"audio-bytes");
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_tears_down_the_session() {
    let mut rig = rig("unused");
    rig.event_tx.send(start_event()).unwrap();
    next_frame(&mut rig.out_rx, "media").await;

    assert_eq!(rig.state.registry.list().await.len(), 1);

    rig.event_tx.send(TransportEvent::Stop).unwrap();
    tokio::time::timeout(Duration::from_secs(2), rig.dispatcher_done)
        .await
        .unwrap()
        .unwrap();

    assert!(rig.state.registry.list().await.is_empty());
}

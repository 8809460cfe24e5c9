//! Event dispatcher — the single sequential consumer of a call's decoded
//! transport events.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use voxbridge_core::protocol::{StartFrame, TransportEvent};
use voxbridge_core::registry::SessionHandle;
use voxbridge_core::session::{CallId, Session};
use voxbridge_engine::{CompletionEngine, EngineShared, SpeechSegment, TurnOrigin};
use voxbridge_media::stt::SttEvent;
use voxbridge_telephony::signal::{counterparty_of, CallDetails};

use crate::interrupt::InterruptionController;
use crate::playback::PlaybackSequencer;
use crate::state::GatewayState;

/// Per-call dispatcher. Owns the session for the call's lifetime; every
/// session mutation happens on this task or on the conversation task it
/// spawns (which serializes engine exchanges).
pub struct Dispatcher {
    state: Arc<GatewayState>,
    sequencer: Arc<Mutex<PlaybackSequencer>>,
    shared: Arc<EngineShared>,
    engine: Arc<CompletionEngine>,
    out_tx: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
    session: Option<SessionHandle>,
    audio_tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

impl Dispatcher {
    pub fn new(
        state: Arc<GatewayState>,
        out_tx: mpsc::UnboundedSender<String>,
    ) -> (Self, mpsc::UnboundedReceiver<SpeechSegment>) {
        let shared = Arc::new(EngineShared::new());
        let sequencer = Arc::new(Mutex::new(PlaybackSequencer::new(
            shared.clone(),
            out_tx.clone(),
        )));
        let (segment_tx, segment_rx) = mpsc::unbounded_channel();

        let engine = Arc::new(CompletionEngine::new(
            state.config.clone(),
            state.provider.clone(),
            state.credentials.clone(),
            state.tools.clone(),
            state.tool_ctx.clone(),
            state.recall.clone(),
            shared.clone(),
            segment_tx,
        ));

        let dispatcher = Self {
            state,
            sequencer,
            shared,
            engine,
            out_tx,
            cancel: CancellationToken::new(),
            session: None,
            audio_tx: None,
        };
        (dispatcher, segment_rx)
    }

    pub fn sequencer(&self) -> Arc<Mutex<PlaybackSequencer>> {
        self.sequencer.clone()
    }

    pub fn shared(&self) -> Arc<EngineShared> {
        self.shared.clone()
    }

    /// Consume decoded events until the stream stops or the queue closes.
    /// A handler error is logged and the loop continues; nothing per-event
    /// is fatal to the call.
    pub async fn run(mut self, mut event_rx: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = event_rx.recv().await {
            let stop = matches!(event, TransportEvent::Stop);
            if let Err(e) = self.handle_event(event).await {
                warn!(%e, "Event handler error, continuing");
            }
            if stop {
                break;
            }
        }
        self.teardown().await;
    }

    async fn handle_event(&mut self, event: TransportEvent) -> voxbridge_core::error::Result<()> {
        match event {
            TransportEvent::Start(start) => self.handle_start(start).await,
            TransportEvent::Media(media) => {
                // Forwarded as a detached task; the dispatcher never waits
                // on transcription I/O.
                if let Some(audio_tx) = self.audio_tx.clone() {
                    tokio::spawn(async move {
                        match media.decode_payload() {
                            Ok(bytes) => {
                                let _ = audio_tx.send(bytes);
                            }
                            Err(e) => warn!(%e, "Undecodable media frame"),
                        }
                    });
                }
                Ok(())
            }
            TransportEvent::Mark(mark) => {
                self.lock_sequencer().ack_mark(&mark.name);
                Ok(())
            }
            TransportEvent::Stop => {
                info!("Media stream stopped");
                Ok(())
            }
        }
    }

    async fn handle_start(&mut self, start: StartFrame) -> voxbridge_core::error::Result<()> {
        info!(stream = %start.stream_sid, call = %start.call_sid, "Media stream started");

        let call_id = CallId(start.call_sid.clone());
        let caller_number = self.resolve_caller(&start).await;

        // An outbound call placed through the control plane already has a
        // session context; reuse it. Inbound calls get a fresh one.
        let session = match self.state.registry.get(&call_id).await {
            Some(existing) => {
                debug!(call = %call_id, "Reusing pre-registered session");
                existing
            }
            None => {
                let session = Session::new(
                    call_id.clone(),
                    self.state.config.system_message(),
                    self.state.config.opening_line(),
                );
                self.state.registry.insert(session).await
            }
        };

        let opening_line = {
            let mut guard = session.lock().await;
            guard.stream_sid = Some(start.stream_sid.clone());
            if caller_number.is_some() {
                guard.caller_number = caller_number.clone();
            }
            guard.opening_line.clone()
        };
        if let Some(ref number) = caller_number {
            info!(caller = %number, "Resolved caller number");
        }

        self.lock_sequencer().set_stream_sid(&start.stream_sid);
        self.session = Some(session.clone());

        // Bring up the transcription bridge and route its events: finalized
        // utterance segments feed the interruption controller, end-of-speech
        // transcripts feed the engine, each on its own task so barge-in is
        // never queued behind a streaming exchange.
        match self.state.transcriber.start(self.cancel.child_token()).await {
            Ok(handle) => {
                self.audio_tx = Some(handle.audio_tx);
                self.spawn_stt_routing(handle.events, session.clone());
            }
            Err(e) => {
                error!(%e, "Transcription bridge failed to start");
            }
        }

        // Speak the opening line immediately; it takes the first response
        // index of the call.
        self.engine.speak(&opening_line);
        Ok(())
    }

    fn spawn_stt_routing(
        &self,
        mut events: mpsc::UnboundedReceiver<SttEvent>,
        session: SessionHandle,
    ) {
        let (final_tx, mut final_rx) = mpsc::unbounded_channel::<String>();
        let controller =
            InterruptionController::new(self.sequencer.clone(), self.out_tx.clone());
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Some(SttEvent::Utterance(text)) => {
                            controller.on_utterance(&text);
                        }
                        Some(SttEvent::Transcript(text)) => {
                            let _ = final_tx.send(text);
                        }
                        None => break,
                    },
                }
            }
        });

        let engine = self.engine.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    transcript = final_rx.recv() => match transcript {
                        Some(text) if !text.trim().is_empty() => {
                            info!(transcript = %text, "User transcript, starting exchange");
                            if let Err(e) = engine
                                .complete(&session, &text, TurnOrigin::User)
                                .await
                            {
                                error!(%e, "Exchange failed");
                            }
                        }
                        Some(_) => {}
                        None => break,
                    },
                }
            }
        });
    }

    /// Resolve the caller's number: payload numbers first, then a signaling
    /// lookup, each reduced to the leg that is not the system's own number.
    async fn resolve_caller(&self, start: &StartFrame) -> Option<String> {
        let own_number = self.state.config.app_number().map(String::from);

        if start.from.is_some() || start.to.is_some() {
            let details = CallDetails {
                from: start.from.clone(),
                to: start.to.clone(),
                status: None,
            };
            if let Some(own) = own_number.as_deref() {
                if let Some(number) = counterparty_of(&details, own) {
                    return Some(number);
                }
            } else {
                // Without a configured own number, trust the from leg.
                if let Some(ref from) = start.from {
                    return Some(from.clone());
                }
            }
        }

        if let Some(ref signaling) = self.state.signaling {
            match signaling.fetch_call(&start.call_sid).await {
                Ok(details) => return signaling.counterparty(&details),
                Err(e) => warn!(%e, "Caller lookup via signaling failed"),
            }
        }
        None
    }

    fn lock_sequencer(&self) -> std::sync::MutexGuard<'_, PlaybackSequencer> {
        match self.sequencer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn teardown(&mut self) {
        self.cancel.cancel();
        self.lock_sequencer().reset();
        if let Some(session) = self.session.take() {
            let id = {
                let mut guard = session.lock().await;
                guard.ended = true;
                guard.id.clone()
            };
            self.state.registry.remove(&id).await;
            info!(call = %id, "Session torn down");
        }
    }
}

/// Consume sentence segments and synthesize each on its own task; results
/// flow into the sequencer which restores order. A failed synthesis skips
/// its index so later chunks are not blocked.
pub fn spawn_synthesis_pump(
    state: Arc<GatewayState>,
    sequencer: Arc<Mutex<PlaybackSequencer>>,
    mut segment_rx: mpsc::UnboundedReceiver<SpeechSegment>,
) {
    tokio::spawn(async move {
        while let Some(segment) = segment_rx.recv().await {
            let Some(synthesizer) = state.synthesizer.clone() else {
                debug!("No synthesizer, dropping segment");
                continue;
            };
            let sequencer = sequencer.clone();
            tokio::spawn(async move {
                let push = |audio: Option<Vec<u8>>| {
                    let mut guard = match sequencer.lock() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    match audio {
                        Some(audio) => guard.push(segment.epoch, segment.index, audio),
                        None => guard.skip(segment.epoch, segment.index),
                    }
                };
                match synthesizer.synthesize(&segment.text).await {
                    Ok(audio) => push(Some(audio)),
                    Err(e) => {
                        warn!(%e, index = segment.index, "Synthesis failed, skipping chunk");
                        push(None);
                    }
                }
            });
        }
    });
}

//! The duplex relay between one client connection and its upstream
//! realtime session.
//!
//! Two pumps run concurrently: ingress forwards client audio upstream,
//! egress forwards upstream audio and control events back to the client.
//! The first pump to finish (either side disconnecting, or a send
//! failing) ends the session, and teardown closes both sides.

use super::events::{ClientEvent, ConversationItem, ServerEvent};
use super::protocol::{ClientFrame, ServerMessage};
use super::upstream::UpstreamConnection;
use anyhow::Result;
use aula_core::pipeline::TutorPipeline;
use aula_core::session::SessionState;
use aula_core::tools::ToolRegistry;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Sink for frames going back to the browser client.
#[async_trait::async_trait]
pub trait ClientOutbound: Send + Sync {
    /// Sends one JSON control frame.
    async fn send_control(&self, message: ServerMessage) -> Result<()>;

    /// Sends one binary audio frame.
    async fn send_audio(&self, audio: Bytes) -> Result<()>;

    /// Closes the client socket. Best-effort.
    async fn close(&self);
}

/// One live relay session. Owns the session state for its connection.
pub struct RelaySession {
    state: Arc<Mutex<SessionState>>,
    student_id: String,
    upstream: Arc<dyn UpstreamConnection>,
    client: Arc<dyn ClientOutbound>,
    tools: Arc<ToolRegistry>,
    pipeline: Arc<TutorPipeline>,
}

impl RelaySession {
    pub fn new(
        state: SessionState,
        upstream: Arc<dyn UpstreamConnection>,
        client: Arc<dyn ClientOutbound>,
        tools: Arc<ToolRegistry>,
        pipeline: Arc<TutorPipeline>,
    ) -> Self {
        let student_id = state.student_id.clone();
        Self {
            state: Arc::new(Mutex::new(state)),
            student_id,
            upstream,
            client,
            tools,
            pipeline,
        }
    }

    /// Runs the relay until either side disconnects, then tears down both
    /// sides. In-flight tool calls and fallback turns are aborted at
    /// teardown.
    pub async fn run(self, frames: impl Stream<Item = ClientFrame> + Send + 'static) {
        let result = {
            let ingress = self.pump_ingress(frames);
            let egress = self.pump_egress();
            tokio::select! {
                r = ingress => r,
                r = egress => r,
            }
        };

        if let Err(e) = result {
            warn!(student_id = %self.student_id, error = ?e, "relay session failed");
            let _ = self
                .client
                .send_control(ServerMessage::Error {
                    error: "session failed".to_string(),
                })
                .await;
        }

        self.upstream.close().await;
        self.client.close().await;
        info!(student_id = %self.student_id, "relay session closed");
    }

    /// Forwards client frames upstream until the client stream ends.
    async fn pump_ingress(
        &self,
        frames: impl Stream<Item = ClientFrame> + Send,
    ) -> Result<()> {
        let mut frames = std::pin::pin!(frames);
        let mut fallback_turns = JoinSet::new();

        while let Some(frame) = frames.next().await {
            match frame {
                ClientFrame::AudioChunk(chunk) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    let audio = BASE64.encode(&chunk);
                    self.upstream
                        .send(ClientEvent::InputAudioBufferAppend { audio })
                        .await?;
                }
                ClientFrame::TextMessage(text) => {
                    // Typed messages are answered outside the realtime
                    // stream so they never stall audio forwarding.
                    let pipeline = self.pipeline.clone();
                    let client = self.client.clone();
                    let state = self.state.clone();
                    fallback_turns.spawn(async move {
                        let turn = {
                            let mut state = state.lock().await;
                            pipeline.respond(None, Some(text), &mut state).await
                        };
                        if !turn.audio.is_empty() {
                            if let Err(e) = client.send_audio(Bytes::from(turn.audio)).await {
                                warn!(error = ?e, "failed to deliver fallback audio");
                                return;
                            }
                        }
                        let message = ServerMessage::Turn {
                            transcript: turn.transcript,
                            agent: turn.agent,
                        };
                        if let Err(e) = client.send_control(message).await {
                            warn!(error = ?e, "failed to deliver fallback transcript");
                        }
                    });
                }
            }
            while fallback_turns.try_join_next().is_some() {}
        }
        fallback_turns.shutdown().await;
        Ok(())
    }

    /// Forwards upstream events to the client until the upstream closes.
    async fn pump_egress(&self) -> Result<()> {
        let mut tool_calls = JoinSet::new();

        while let Some(event) = self.upstream.next_event().await {
            match event {
                ServerEvent::SpeechStarted => {
                    // The client must stop playback before stale audio is
                    // discarded, so interrupt goes out first.
                    self.client.send_control(ServerMessage::Interrupt).await?;
                    self.upstream.clear().await?;
                }
                ServerEvent::AudioDelta { delta } => match BASE64.decode(delta.as_bytes()) {
                    Ok(audio) => self.client.send_audio(Bytes::from(audio)).await?,
                    Err(e) => {
                        warn!(error = %e, "dropping undecodable audio delta");
                    }
                },
                ServerEvent::FunctionCallArgumentsDone {
                    call_id,
                    name,
                    arguments,
                } => {
                    let args: serde_json::Value = match serde_json::from_str(&arguments) {
                        Ok(args) => args,
                        Err(e) => {
                            warn!(tool = %name, call_id = %call_id, error = %e,
                                "dropping tool call with undecodable arguments");
                            continue;
                        }
                    };
                    let tools = self.tools.clone();
                    let upstream = self.upstream.clone();
                    let student_id = self.student_id.clone();
                    tool_calls.spawn(async move {
                        let output = tools.dispatch(&name, args, &student_id).await;
                        let item =
                            ConversationItem::function_call_output(call_id, output.to_string());
                        if let Err(e) = upstream
                            .send(ClientEvent::ConversationItemCreate { item })
                            .await
                        {
                            warn!(tool = %name, error = ?e, "failed to deliver tool output");
                            return;
                        }
                        if let Err(e) = upstream.send(ClientEvent::ResponseCreate).await {
                            warn!(tool = %name, error = ?e, "failed to request follow-up response");
                        }
                    });
                }
                ServerEvent::Error { error } => {
                    warn!(message = %error.message, "upstream reported an error");
                }
                ServerEvent::Other => {}
            }
            while tool_calls.try_join_next().is_some() {}
        }
        tool_calls.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use aula_core::speech::SpeechModel;
    use aula_core::tools::{ToolHandler, ToolSpec};
    use futures_util::stream;
    use serde_json::{Value, json};
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Ordered record of observable actions across both fakes, so tests
    /// can assert cross-side ordering (interrupt before clear).
    type Trace = Arc<StdMutex<Vec<String>>>;

    struct FakeUpstream {
        trace: Trace,
        sent: StdMutex<Vec<ClientEvent>>,
        events: Mutex<mpsc::Receiver<ServerEvent>>,
        closed: AtomicBool,
    }

    #[async_trait]
    impl UpstreamConnection for FakeUpstream {
        async fn send(&self, event: ClientEvent) -> Result<()> {
            let label = match &event {
                ClientEvent::SessionUpdate { .. } => "session.update",
                ClientEvent::InputAudioBufferAppend { .. } => "append",
                ClientEvent::InputAudioBufferClear => "clear",
                ClientEvent::ConversationItemCreate { .. } => "item.create",
                ClientEvent::ResponseCreate => "response.create",
            };
            self.trace.lock().unwrap().push(format!("upstream:{label}"));
            self.sent.lock().unwrap().push(event);
            Ok(())
        }

        async fn next_event(&self) -> Option<ServerEvent> {
            self.events.lock().await.recv().await
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct FakeClient {
        trace: Trace,
        controls: StdMutex<Vec<Value>>,
        audio: StdMutex<Vec<Vec<u8>>>,
        closed: AtomicBool,
    }

    #[async_trait]
    impl ClientOutbound for FakeClient {
        async fn send_control(&self, message: ServerMessage) -> Result<()> {
            let payload = message.payload();
            let label = payload["type"].as_str().unwrap_or("json").to_string();
            self.trace.lock().unwrap().push(format!("client:{label}"));
            self.controls.lock().unwrap().push(payload);
            Ok(())
        }

        async fn send_audio(&self, audio: Bytes) -> Result<()> {
            self.trace.lock().unwrap().push("client:audio".to_string());
            self.audio.lock().unwrap().push(audio.to_vec());
            Ok(())
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct StubSpeech;

    #[async_trait]
    impl SpeechModel for StubSpeech {
        async fn transcribe(&self, _audio: Vec<u8>) -> Result<String> {
            Ok("transcript".to_string())
        }

        async fn generate_reply(&self, _instructions: &str, user_text: &str) -> Result<String> {
            Ok(format!("reply to: {user_text}"))
        }

        async fn synthesize(&self, _text: &str) -> Result<Vec<u8>> {
            Ok(vec![9, 9, 9])
        }
    }

    struct Harness {
        upstream: Arc<FakeUpstream>,
        client: Arc<FakeClient>,
        events_tx: mpsc::Sender<ServerEvent>,
        session: RelaySession,
    }

    fn harness(tools: ToolRegistry) -> Harness {
        let trace: Trace = Arc::new(StdMutex::new(Vec::new()));
        let (events_tx, events_rx) = mpsc::channel(32);
        let upstream = Arc::new(FakeUpstream {
            trace: trace.clone(),
            sent: StdMutex::new(Vec::new()),
            events: Mutex::new(events_rx),
            closed: AtomicBool::new(false),
        });
        let client = Arc::new(FakeClient {
            trace,
            controls: StdMutex::new(Vec::new()),
            audio: StdMutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        let state = SessionState::new(
            "stu-1".to_string(),
            "Ana".to_string(),
            "ana@example.com".to_string(),
        );
        let session = RelaySession::new(
            state,
            upstream.clone(),
            client.clone(),
            Arc::new(tools),
            Arc::new(TutorPipeline::new(Arc::new(StubSpeech))),
        );
        Harness {
            upstream,
            client,
            events_tx,
            session,
        }
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not met within timeout");
    }

    struct StaticTool {
        name: &'static str,
        result: Value,
        delay: Duration,
    }

    #[async_trait]
    impl ToolHandler for StaticTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                kind: "function",
                name: self.name,
                description: "test tool",
                parameters: json!({ "type": "object", "properties": {} }),
            }
        }

        async fn call(&self, _args: Value, _student_id: &str) -> Result<Value> {
            tokio::time::sleep(self.delay).await;
            Ok(self.result.clone())
        }
    }

    #[tokio::test]
    async fn audio_chunks_are_forwarded_in_order() {
        let h = harness(ToolRegistry::new());
        let frames = stream::iter(vec![
            ClientFrame::AudioChunk(Bytes::from_static(b"one")),
            ClientFrame::AudioChunk(Bytes::from_static(b"two")),
        ]);
        // events_tx stays alive so the egress pump idles while ingress
        // drains the finite frame stream.
        h.session.run(frames).await;

        let sent = h.upstream.sent.lock().unwrap();
        assert_eq!(
            sent.as_slice(),
            &[
                ClientEvent::InputAudioBufferAppend {
                    audio: BASE64.encode(b"one")
                },
                ClientEvent::InputAudioBufferAppend {
                    audio: BASE64.encode(b"two")
                },
            ]
        );
        drop(sent);
        let _keep_alive = h.events_tx;
    }

    #[tokio::test]
    async fn empty_audio_chunks_are_dropped() {
        let h = harness(ToolRegistry::new());
        let frames = stream::iter(vec![
            ClientFrame::AudioChunk(Bytes::new()),
            ClientFrame::AudioChunk(Bytes::from_static(b"real")),
        ]);
        h.session.run(frames).await;

        let sent = h.upstream.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0],
            ClientEvent::InputAudioBufferAppend {
                audio: BASE64.encode(b"real")
            }
        );
        drop(sent);
        let _keep_alive = h.events_tx;
    }

    #[tokio::test]
    async fn speech_started_interrupts_client_before_clearing_upstream() {
        let h = harness(ToolRegistry::new());
        h.events_tx.send(ServerEvent::SpeechStarted).await.unwrap();
        drop(h.events_tx);

        h.session.run(stream::pending()).await;

        assert_eq!(
            h.client.controls.lock().unwrap().as_slice(),
            &[json!({ "type": "interrupt" })]
        );
        let trace = h.upstream.trace.lock().unwrap();
        let interrupt_at = trace.iter().position(|e| e == "client:interrupt").unwrap();
        let clear_at = trace.iter().position(|e| e == "upstream:clear").unwrap();
        assert!(interrupt_at < clear_at);
    }

    #[tokio::test]
    async fn interrupt_is_delivered_before_later_audio() {
        let h = harness(ToolRegistry::new());
        h.events_tx.send(ServerEvent::SpeechStarted).await.unwrap();
        h.events_tx
            .send(ServerEvent::AudioDelta {
                delta: BASE64.encode(b"AB"),
            })
            .await
            .unwrap();
        drop(h.events_tx);

        h.session.run(stream::pending()).await;

        let trace = h.client.trace.lock().unwrap();
        let interrupt_at = trace.iter().position(|e| e == "client:interrupt").unwrap();
        let audio_at = trace.iter().position(|e| e == "client:audio").unwrap();
        assert!(interrupt_at < audio_at);
        assert_eq!(h.client.audio.lock().unwrap().as_slice(), &[b"AB".to_vec()]);
    }

    #[tokio::test]
    async fn audio_deltas_are_decoded_and_undecodable_ones_dropped() {
        let h = harness(ToolRegistry::new());
        h.events_tx
            .send(ServerEvent::AudioDelta {
                delta: BASE64.encode([1u8, 2, 3]),
            })
            .await
            .unwrap();
        h.events_tx
            .send(ServerEvent::AudioDelta {
                delta: "!!not base64!!".to_string(),
            })
            .await
            .unwrap();
        h.events_tx
            .send(ServerEvent::AudioDelta {
                delta: BASE64.encode([4u8, 5]),
            })
            .await
            .unwrap();
        drop(h.events_tx);

        h.session.run(stream::pending()).await;

        assert_eq!(
            h.client.audio.lock().unwrap().as_slice(),
            &[vec![1, 2, 3], vec![4, 5]]
        );
    }

    #[tokio::test]
    async fn tool_call_sends_output_then_requests_response() {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(StaticTool {
            name: "get_current_lesson",
            result: json!({ "title": "Fractions" }),
            delay: Duration::ZERO,
        }));
        let h = harness(tools);
        h.events_tx
            .send(ServerEvent::FunctionCallArgumentsDone {
                call_id: "call_1".to_string(),
                name: "get_current_lesson".to_string(),
                arguments: "{}".to_string(),
            })
            .await
            .unwrap();

        let upstream = h.upstream.clone();
        let events_tx = h.events_tx;
        let handle = tokio::spawn(h.session.run(stream::pending()));

        wait_for(|| {
            upstream
                .sent
                .lock()
                .unwrap()
                .iter()
                .any(|e| *e == ClientEvent::ResponseCreate)
        })
        .await;
        drop(events_tx);
        handle.await.unwrap();

        let sent = upstream.sent.lock().unwrap();
        assert_eq!(
            sent.as_slice(),
            &[
                ClientEvent::ConversationItemCreate {
                    item: ConversationItem::function_call_output(
                        "call_1".to_string(),
                        json!({ "title": "Fractions" }).to_string(),
                    )
                },
                ClientEvent::ResponseCreate,
            ]
        );
    }

    #[tokio::test]
    async fn overlapping_tool_calls_may_complete_out_of_order() {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(StaticTool {
            name: "slow",
            result: json!({ "tool": "slow" }),
            delay: Duration::from_millis(80),
        }));
        tools.register(Arc::new(StaticTool {
            name: "fast",
            result: json!({ "tool": "fast" }),
            delay: Duration::ZERO,
        }));
        let h = harness(tools);
        for (call_id, name) in [("call_slow", "slow"), ("call_fast", "fast")] {
            h.events_tx
                .send(ServerEvent::FunctionCallArgumentsDone {
                    call_id: call_id.to_string(),
                    name: name.to_string(),
                    arguments: "{}".to_string(),
                })
                .await
                .unwrap();
        }

        let upstream = h.upstream.clone();
        let events_tx = h.events_tx;
        let handle = tokio::spawn(h.session.run(stream::pending()));

        wait_for(|| {
            upstream
                .sent
                .lock()
                .unwrap()
                .iter()
                .filter(|e| **e == ClientEvent::ResponseCreate)
                .count()
                == 2
        })
        .await;
        drop(events_tx);
        handle.await.unwrap();

        let sent = upstream.sent.lock().unwrap();
        let call_id_at = |wanted: &str| {
            sent.iter()
                .position(|e| {
                    matches!(e, ClientEvent::ConversationItemCreate { item } if item.call_id == wanted)
                })
                .unwrap()
        };
        // The fast call resolves while the slow one is still running.
        assert!(call_id_at("call_fast") < call_id_at("call_slow"));
        // Each output is chased by a response request.
        assert_eq!(sent[call_id_at("call_fast") + 1], ClientEvent::ResponseCreate);
        assert_eq!(sent[call_id_at("call_slow") + 1], ClientEvent::ResponseCreate);
    }

    #[tokio::test]
    async fn unknown_tool_reports_structured_error_upstream() {
        let h = harness(ToolRegistry::new());
        h.events_tx
            .send(ServerEvent::FunctionCallArgumentsDone {
                call_id: "call_x".to_string(),
                name: "no_such_tool".to_string(),
                arguments: "{}".to_string(),
            })
            .await
            .unwrap();

        let upstream = h.upstream.clone();
        let events_tx = h.events_tx;
        let handle = tokio::spawn(h.session.run(stream::pending()));

        wait_for(|| {
            upstream
                .sent
                .lock()
                .unwrap()
                .iter()
                .any(|e| *e == ClientEvent::ResponseCreate)
        })
        .await;
        drop(events_tx);
        handle.await.unwrap();

        let sent = upstream.sent.lock().unwrap();
        match &sent[0] {
            ClientEvent::ConversationItemCreate { item } => {
                assert_eq!(item.call_id, "call_x");
                assert_eq!(item.output, json!({ "error": "unknown tool" }).to_string());
            }
            other => panic!("expected tool output first, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn tool_call_with_undecodable_arguments_is_dropped() {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(StaticTool {
            name: "get_current_lesson",
            result: json!({}),
            delay: Duration::ZERO,
        }));
        let h = harness(tools);
        h.events_tx
            .send(ServerEvent::FunctionCallArgumentsDone {
                call_id: "call_bad".to_string(),
                name: "get_current_lesson".to_string(),
                arguments: "not json at all".to_string(),
            })
            .await
            .unwrap();
        drop(h.events_tx);

        h.session.run(stream::pending()).await;

        assert!(h.upstream.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn upstream_close_tears_down_both_sides() {
        let h = harness(ToolRegistry::new());
        drop(h.events_tx);

        h.session.run(stream::pending()).await;

        assert!(h.upstream.closed.load(Ordering::SeqCst));
        assert!(h.client.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn client_disconnect_tears_down_both_sides() {
        let h = harness(ToolRegistry::new());
        h.session.run(stream::iter(Vec::<ClientFrame>::new())).await;

        assert!(h.upstream.closed.load(Ordering::SeqCst));
        assert!(h.client.closed.load(Ordering::SeqCst));
        let _keep_alive = h.events_tx;
    }

    #[tokio::test]
    async fn text_message_is_answered_by_the_fallback_pipeline() {
        let h = harness(ToolRegistry::new());
        let frames = stream::iter(vec![ClientFrame::TextMessage("oi".to_string())])
            .chain(stream::pending());

        let client = h.client.clone();
        let events_tx = h.events_tx;
        let handle = tokio::spawn(h.session.run(frames));

        wait_for(|| !client.controls.lock().unwrap().is_empty()).await;

        assert_eq!(client.audio.lock().unwrap().as_slice(), &[vec![9, 9, 9]]);
        assert_eq!(
            client.controls.lock().unwrap().as_slice(),
            &[json!({ "transcript": "oi", "agent": "tutor" })]
        );
        handle.abort();
        let _keep_alive = events_tx;
    }

    #[tokio::test]
    async fn upstream_error_event_is_not_fatal() {
        let h = harness(ToolRegistry::new());
        h.events_tx
            .send(ServerEvent::Error {
                error: super::super::events::UpstreamError {
                    message: "rate limited".to_string(),
                },
            })
            .await
            .unwrap();
        h.events_tx
            .send(ServerEvent::AudioDelta {
                delta: BASE64.encode([7u8]),
            })
            .await
            .unwrap();
        drop(h.events_tx);

        h.session.run(stream::pending()).await;

        // The delta after the error still reaches the client, and no error
        // frame was surfaced.
        assert_eq!(h.client.audio.lock().unwrap().as_slice(), &[vec![7]]);
        assert!(h.client.controls.lock().unwrap().is_empty());
    }
}

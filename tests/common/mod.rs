#![allow(dead_code)]
//! Shared test support: a routing LLM stub
//!
//! Scenario tests drive real drivers, so several agents share one client.
//! The router matches each request's system prompt against registered
//! routes and pops the next scripted response for that route.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use deskpilot::llm::{CompletionRequest, CompletionResponse, LlmClient, LlmError, StreamChunk};

struct Route {
    system_contains: String,
    responses: VecDeque<Result<CompletionResponse, String>>,
}

/// Scripted client that routes on system-prompt content
#[derive(Default)]
pub struct RouterLlm {
    routes: Mutex<Vec<Route>>,
}

impl RouterLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register responses for requests whose system prompt contains `key`
    pub fn route(self, key: &str, responses: Vec<CompletionResponse>) -> Self {
        self.route_results(key, responses.into_iter().map(Ok).collect())
    }

    /// Like [`route`](Self::route) but allows scripted transport errors
    pub fn route_results(self, key: &str, responses: Vec<Result<CompletionResponse, String>>) -> Self {
        self.routes.lock().unwrap().push(Route {
            system_contains: key.to_string(),
            responses: responses.into(),
        });
        self
    }
}

#[async_trait]
impl LlmClient for RouterLlm {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let mut routes = self.routes.lock().unwrap();
        for route in routes.iter_mut() {
            if request.system_prompt.contains(&route.system_contains) {
                return match route.responses.pop_front() {
                    Some(Ok(response)) => Ok(response),
                    Some(Err(message)) => Err(LlmError::Transport(message)),
                    None => Err(LlmError::InvalidResponse(format!(
                        "route '{}' exhausted",
                        route.system_contains
                    ))),
                };
            }
        }
        Err(LlmError::InvalidResponse(format!(
            "no route for system prompt: {:.80}",
            request.system_prompt
        )))
    }

    async fn stream(
        &self,
        request: CompletionRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
    ) -> Result<CompletionResponse, LlmError> {
        let response = self.complete(request).await?;
        if let Some(text) = &response.content {
            let _ = chunk_tx.send(StreamChunk::TextDelta(text.clone())).await;
        }
        let _ = chunk_tx
            .send(StreamChunk::MessageDone {
                stop_reason: response.stop_reason,
                usage: response.usage,
            })
            .await;
        Ok(response)
    }
}

/// Await the next event of the given type, skipping others
pub async fn wait_for_event(
    rx: &mut tokio::sync::broadcast::Receiver<deskpilot::events::Event>,
    name: &str,
) -> deskpilot::events::Event {
    loop {
        let event = tokio::time::timeout(std::time::Duration::from_secs(30), rx.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {}", name))
            .expect("event bus closed");
        if event.event_type() == name {
            return event;
        }
    }
}

/// Await the next PhaseChanged into the given phase
pub async fn wait_for_phase(
    rx: &mut tokio::sync::broadcast::Receiver<deskpilot::events::Event>,
    phase: &str,
) -> deskpilot::events::Event {
    loop {
        let event = wait_for_event(rx, "PhaseChanged").await;
        if let deskpilot::events::EventKind::PhaseChanged { to, .. } = &event.kind {
            if to == phase {
                return event;
            }
        }
    }
}

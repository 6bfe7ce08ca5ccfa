//! The long-lived chat client: owns the adapter, the transport, the
//! shared provider session, and every spawned request or probe task.
//!
//! All methods return immediately; results arrive on the event channel
//! handed out by [`ChatClient::new`]. One chat request is in flight at
//! a time: sending while busy replaces the previous request, and
//! [`ChatClient::cancel`] aborts the driver task outright. Connection
//! and model probes run on their own tasks with their own retry
//! budgets, so a hung probe never blocks chatting.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use colloquy_config::{AppConfig, HttpConfig, ProviderConfig};

use crate::classify;
use crate::error::ClientError;
use crate::event::ChatEvent;
use crate::provider::{create_adapter, ProviderAdapter, SendOptions};
use crate::retry::{RetryContext, RetryDecision, RetryPolicy};
use crate::session::{lock_session, run_blocking, run_streaming, RequestContext};
use crate::transport::{HttpTransport, WireRequest};
use crate::types::{ChatRequest, ProviderSession, ToolCallRequest};

pub struct ChatClient {
    adapter: Arc<dyn ProviderAdapter>,
    transport: HttpTransport,
    session: Arc<Mutex<ProviderSession>>,
    events: mpsc::UnboundedSender<ChatEvent>,
    send_ready: watch::Sender<bool>,
    model: String,
    show_reasoning: bool,
    http: HttpConfig,
    retry: RetryPolicy,
    probe_timeout: Duration,
    active: Option<JoinHandle<()>>,
    conn_probe: Option<JoinHandle<()>>,
    models_probe: Option<JoinHandle<()>>,
}

impl ChatClient {
    /// Build a client from configuration, returning it together with
    /// the receiving end of the event channel.
    pub fn new(
        config: &AppConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ChatEvent>), ClientError> {
        let (events, receiver) = mpsc::unbounded_channel();
        let (send_ready, _) = watch::channel(true);
        let client = Self {
            adapter: Arc::from(create_adapter(&config.provider)),
            transport: HttpTransport::new(&config.http)?,
            session: Arc::new(Mutex::new(ProviderSession::new())),
            events,
            send_ready,
            model: config.provider.model.clone(),
            show_reasoning: config.provider.show_reasoning,
            http: config.http.clone(),
            retry: RetryPolicy::from(&config.retry),
            probe_timeout: config.retry.probe_timeout(),
            active: None,
            conn_probe: None,
            models_probe: None,
        };
        Ok((client, receiver))
    }

    /// Watch channel that flips to `false` while a chat request is in
    /// flight and back to `true` once it settles.
    pub fn subscribe_send_ready(&self) -> watch::Receiver<bool> {
        self.send_ready.subscribe()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn set_model(&mut self, model: &str) {
        self.model = model.to_string();
    }

    pub fn show_reasoning(&self) -> bool {
        self.show_reasoning
    }

    pub fn set_show_reasoning(&mut self, show: bool) {
        self.show_reasoning = show;
    }

    pub fn provider_kind(&self) -> colloquy_config::ProviderKind {
        self.adapter.kind()
    }

    /// Dispatch a chat request. Any request still in flight is replaced.
    ///
    /// With `stream` set, deltas arrive as they decode and the request
    /// ends with `StreamEnded`; without it, a single `AnswerComplete`
    /// arrives. Errors surface as events too, never as a return value.
    pub fn send(&mut self, request: &ChatRequest, stream: bool) {
        self.abort_active();
        let wire = {
            let session = lock_session(&self.session);
            self.adapter
                .chat_request(request, self.send_options(stream), &session)
        };
        match wire {
            Ok(wire) => self.spawn_request(wire, stream),
            Err(err) => {
                warn!(%err, "could not build chat request");
                let _ = self
                    .events
                    .send(ChatEvent::error(classify::user_message(&err)));
            }
        }
    }

    /// Feed a tool result back to the model as a blocking follow-up.
    pub fn send_tool_result(&mut self, call: &ToolCallRequest, result: &str) {
        self.abort_active();
        let wire = {
            let session = lock_session(&self.session);
            self.adapter
                .tool_result_request(call, result, self.send_options(false), &session)
        };
        match wire {
            Ok(wire) => self.spawn_request(wire, false),
            Err(err) => {
                let _ = self
                    .events
                    .send(ChatEvent::error(classify::user_message(&err)));
            }
        }
    }

    /// Abort the in-flight request, if any. Safe to call at any time,
    /// any number of times; the dropped task emits nothing further.
    pub fn cancel(&mut self) {
        if self.active.is_some() {
            debug!("cancelling in-flight request");
        }
        self.abort_active();
        let _ = self.send_ready.send(true);
    }

    /// Probe the provider for reachability on a background task.
    ///
    /// Retries on its own budget and reports a single
    /// [`ChatEvent::ConnectionResult`] when it settles. Calling again
    /// discards the previous probe.
    pub fn check_connection(&mut self) {
        if let Some(handle) = self.conn_probe.take() {
            handle.abort();
        }
        let adapter = Arc::clone(&self.adapter);
        let transport = self.transport.clone();
        let events = self.events.clone();
        let mut retry = RetryContext::new(self.retry);
        let probe_timeout = self.probe_timeout;
        self.conn_probe = Some(tokio::spawn(async move {
            loop {
                match probe_once(&transport, adapter.connection_request(), probe_timeout).await {
                    Ok(()) => {
                        let _ = events.send(ChatEvent::ConnectionResult {
                            ok: true,
                            message: String::new(),
                        });
                        return;
                    }
                    Err(err) => match retry.on_failure() {
                        RetryDecision::RetryAfter(backoff) => {
                            debug!(attempt = retry.attempts(), %err, "connection probe failed, retrying");
                            tokio::time::sleep(backoff).await;
                        }
                        RetryDecision::GiveUp => {
                            let _ = events.send(ChatEvent::ConnectionResult {
                                ok: false,
                                message: classify::user_message(&err),
                            });
                            return;
                        }
                    },
                }
            }
        }));
    }

    /// List the models the provider offers, on a background task with
    /// its own retry budget, independent of [`Self::check_connection`].
    /// Reports a single [`ChatEvent::ModelsResult`] when it settles.
    pub fn fetch_models(&mut self) {
        if let Some(handle) = self.models_probe.take() {
            handle.abort();
        }
        let adapter = Arc::clone(&self.adapter);
        let transport = self.transport.clone();
        let events = self.events.clone();
        let mut retry = RetryContext::new(self.retry);
        let probe_timeout = self.probe_timeout;
        self.models_probe = Some(tokio::spawn(async move {
            loop {
                match models_once(&transport, adapter.as_ref(), probe_timeout).await {
                    Ok(models) => {
                        let _ = events.send(ChatEvent::ModelsResult {
                            ok: true,
                            models,
                            message: String::new(),
                        });
                        return;
                    }
                    Err(err) => match retry.on_failure() {
                        RetryDecision::RetryAfter(backoff) => {
                            debug!(attempt = retry.attempts(), %err, "models probe failed, retrying");
                            tokio::time::sleep(backoff).await;
                        }
                        RetryDecision::GiveUp => {
                            let _ = events.send(ChatEvent::ModelsResult {
                                ok: false,
                                models: Vec::new(),
                                message: classify::user_message(&err),
                            });
                            return;
                        }
                    },
                }
            }
        }));
    }

    /// Fetch follow-up suggestions for the last reply, where the
    /// provider offers them. Runs inline rather than on the event
    /// channel; callers decide whether the failure is worth showing.
    pub async fn fetch_suggestions(&self) -> Result<Vec<String>, ClientError> {
        let wire = {
            let session = lock_session(&self.session);
            self.adapter.suggestions_request(&session)?
        };
        let response = self
            .transport
            .execute_with_timeout(wire, self.probe_timeout)
            .await?;
        if !response.is_success() {
            return Err(response.into_error());
        }
        self.adapter.parse_suggestions(&response.body)
    }

    /// Switch to a different provider. Aborts everything in flight,
    /// rebuilds the transport, and starts a fresh conversation.
    pub fn set_provider(&mut self, config: &ProviderConfig) -> Result<(), ClientError> {
        self.abort_all();
        self.adapter = Arc::from(create_adapter(config));
        self.transport = HttpTransport::new(&self.http)?;
        self.session = Arc::new(Mutex::new(ProviderSession::new()));
        self.model = config.model.clone();
        self.show_reasoning = config.show_reasoning;
        let _ = self.send_ready.send(true);
        info!(provider = %config.kind, model = %self.model, "switched provider");
        Ok(())
    }

    /// Start a new conversation: drops the in-flight request and clears
    /// the provider-side ids so the next message opens a fresh thread.
    pub fn reset_conversation(&mut self) {
        self.abort_active();
        lock_session(&self.session).reset();
        let _ = self.send_ready.send(true);
        debug!("conversation reset");
    }

    fn send_options(&self, stream: bool) -> SendOptions<'_> {
        SendOptions {
            model: &self.model,
            stream,
            show_reasoning: self.show_reasoning,
        }
    }

    fn request_context(&self) -> RequestContext {
        RequestContext {
            adapter: Arc::clone(&self.adapter),
            transport: self.transport.clone(),
            session: Arc::clone(&self.session),
            events: self.events.clone(),
            show_reasoning: self.show_reasoning,
        }
    }

    fn spawn_request(&mut self, wire: WireRequest, stream: bool) {
        let _ = self.send_ready.send(false);
        let ctx = self.request_context();
        let ready = self.send_ready.clone();
        self.active = Some(tokio::spawn(async move {
            if stream {
                run_streaming(ctx, wire).await;
            } else {
                run_blocking(ctx, wire).await;
            }
            let _ = ready.send(true);
        }));
    }

    fn abort_active(&mut self) {
        if let Some(handle) = self.active.take() {
            handle.abort();
        }
    }

    fn abort_all(&mut self) {
        self.abort_active();
        if let Some(handle) = self.conn_probe.take() {
            handle.abort();
        }
        if let Some(handle) = self.models_probe.take() {
            handle.abort();
        }
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        self.abort_all();
    }
}

async fn probe_once(
    transport: &HttpTransport,
    wire: WireRequest,
    timeout: Duration,
) -> Result<(), ClientError> {
    let response = transport.execute_with_timeout(wire, timeout).await?;
    if response.is_success() {
        Ok(())
    } else {
        Err(response.into_error())
    }
}

async fn models_once(
    transport: &HttpTransport,
    adapter: &dyn ProviderAdapter,
    timeout: Duration,
) -> Result<Vec<String>, ClientError> {
    let response = transport
        .execute_with_timeout(adapter.models_request(), timeout)
        .await?;
    if !response.is_success() {
        return Err(response.into_error());
    }
    let models = adapter.parse_models(&response.body)?;
    if models.is_empty() {
        // A reachable server with nothing to offer is still a failure
        // from the picker's point of view.
        return Err(ClientError::InvalidResponse);
    }
    Ok(models)
}

/*
 * Copyright (c) 2025 Bifrost Contributors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Management Session
//!
//! HTTP transport behind the [`ManagementClient`] trait.
//!
//! The session keeps one report's worth of state (description, health,
//! remote config status, pending flags) and a single dispatcher task that
//! posts it to the management server. Reports go out on the poll cadence,
//! whenever a setter nudges the dispatcher, and once more at shutdown.
//! The server's response to each report is decoded and handed to the
//! [`SessionCallbacks`] from the dispatcher task, so the agent core sees
//! messages in wire order and never concurrently.
//!
//! Setters may be called before `start`; the recorded state rides the
//! first report. Nudges coalesce: a report in flight already covers any
//! update recorded while it was being sent.

use async_trait::async_trait;
use bifrost_utils::logging::prelude::*;
use chrono::Utc;
use reqwest::Client;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use url::Url;

use bifrost_protocol::messages::envelope::{
    AgentToServer, ServerToAgent, FLAG_REQUEST_CONNECTION_SETTINGS,
};
use bifrost_protocol::messages::{
    AgentCapabilities, AgentDescription, ComponentHealth, RemoteConfigStatus,
};
use bifrost_protocol::session::{ManagementClient, SessionCallbacks, SessionError, StartSettings};

use crate::metrics;

/// State carried in the next report.
#[derive(Default)]
struct ReportState {
    instance_uid: String,
    sequence_num: u64,
    capabilities: AgentCapabilities,
    description: Option<AgentDescription>,
    health: Option<ComponentHealth>,
    remote_config_status: Option<RemoteConfigStatus>,
    /// When set, the next report recomputes the effective config through
    /// the callbacks before sending.
    effective_config_stale: bool,
    flags: u64,
}

/// Everything the dispatcher task needs to post reports.
struct DispatchContext {
    client: Client,
    endpoint: Url,
    headers: BTreeMap<String, String>,
    request_timeout: Duration,
    state: Arc<Mutex<ReportState>>,
    callbacks: Arc<dyn SessionCallbacks>,
}

/// HTTP session to the management server.
pub struct HttpSession {
    poll_interval: Duration,
    request_timeout: Duration,
    state: Arc<Mutex<ReportState>>,
    callbacks: Mutex<Option<Arc<dyn SessionCallbacks>>>,
    nudge: Mutex<Option<mpsc::Sender<()>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    shutdown: broadcast::Sender<()>,
    stopped: AtomicBool,
}

impl HttpSession {
    /// `poll_interval` is the periodic report cadence; zero disables the
    /// ticker so only nudges and shutdown drive reports.
    pub fn new(poll_interval: Duration, request_timeout: Duration) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        HttpSession {
            poll_interval,
            request_timeout,
            state: Arc::new(Mutex::new(ReportState::default())),
            callbacks: Mutex::new(None),
            nudge: Mutex::new(None),
            dispatcher: Mutex::new(None),
            shutdown,
            stopped: AtomicBool::new(false),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ReportState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_usable(&self) -> Result<(), SessionError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }
        Ok(())
    }

    /// Wakes the dispatcher if it is running. A full channel means a wake
    /// is already pending, which covers this update too.
    fn nudge_dispatcher(&self) -> Result<(), SessionError> {
        let nudge = self.nudge.lock().unwrap_or_else(PoisonError::into_inner);
        match nudge.as_ref() {
            Some(sender) => match sender.try_send(()) {
                Ok(()) | Err(TrySendError::Full(())) => Ok(()),
                Err(TrySendError::Closed(())) => Err(SessionError::Closed),
            },
            // not started yet: the first report will carry the state
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ManagementClient for HttpSession {
    async fn start(&self, settings: StartSettings) -> Result<(), SessionError> {
        self.ensure_usable()?;
        {
            let nudge = self.nudge.lock().unwrap_or_else(PoisonError::into_inner);
            if nudge.is_some() {
                return Err(SessionError::AlreadyStarted);
            }
        }

        let endpoint = Url::parse(&settings.endpoint)
            .map_err(|_| SessionError::InvalidEndpoint(settings.endpoint.clone()))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(SessionError::InvalidEndpoint(settings.endpoint.clone()));
        }

        {
            let mut state = self.lock_state();
            state.instance_uid = settings.instance_uid.clone();
            state.capabilities = settings.capabilities;
            if settings.remote_config_status.is_some() {
                state.remote_config_status = settings.remote_config_status.clone();
            }
            // the first report carries a freshly computed effective config
            state.effective_config_stale = true;
        }
        *self
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&settings.callbacks));

        let context = DispatchContext {
            client: Client::new(),
            endpoint,
            headers: settings.headers,
            request_timeout: self.request_timeout,
            state: Arc::clone(&self.state),
            callbacks: settings.callbacks,
        };
        let (nudge_tx, nudge_rx) = mpsc::channel(1);
        let shutdown_rx = self.shutdown.subscribe();
        let handle = tokio::spawn(run_dispatcher(
            context,
            nudge_rx,
            shutdown_rx,
            self.poll_interval,
        ));

        *self.nudge.lock().unwrap_or_else(PoisonError::into_inner) = Some(nudge_tx);
        *self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        info!("Management session started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), SessionError> {
        let handle = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            if self.stopped.load(Ordering::SeqCst) {
                return Ok(());
            }
            return Err(SessionError::NotStarted);
        };

        self.stopped.store(true, Ordering::SeqCst);
        let _ = self.shutdown.send(());
        let _ = handle.await;
        // dropped only after the dispatcher exits so the shutdown branch,
        // not a closed channel, ends the loop
        self.nudge
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        info!("Management session stopped");
        Ok(())
    }

    async fn set_agent_description(
        &self,
        description: AgentDescription,
    ) -> Result<(), SessionError> {
        self.ensure_usable()?;
        self.lock_state().description = Some(description);
        self.nudge_dispatcher()
    }

    async fn set_health(&self, health: ComponentHealth) -> Result<(), SessionError> {
        self.ensure_usable()?;
        self.lock_state().health = Some(health);
        self.nudge_dispatcher()
    }

    async fn set_remote_config_status(
        &self,
        status: RemoteConfigStatus,
    ) -> Result<(), SessionError> {
        self.ensure_usable()?;
        let callbacks = self
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callbacks) = callbacks {
            callbacks.save_remote_config_status(status.clone()).await;
        }
        self.lock_state().remote_config_status = Some(status);
        self.nudge_dispatcher()
    }

    async fn update_effective_config(&self) -> Result<(), SessionError> {
        self.ensure_usable()?;
        self.lock_state().effective_config_stale = true;
        self.nudge_dispatcher()
    }

    async fn request_connection_settings(&self) -> Result<(), SessionError> {
        self.ensure_usable()?;
        self.lock_state().flags |= FLAG_REQUEST_CONNECTION_SETTINGS;
        self.nudge_dispatcher()
    }
}

/// Posts reports until shutdown. The first report's outcome decides the
/// connect callbacks; later failures are logged and retried on the next
/// wake.
async fn run_dispatcher(
    context: DispatchContext,
    mut nudge_rx: mpsc::Receiver<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
    poll_interval: Duration,
) {
    match post_report(&context).await {
        Ok(()) => context.callbacks.on_connect().await,
        Err(e) => context.callbacks.on_connect_failed(e).await,
    }

    let mut ticker = if poll_interval.is_zero() {
        None
    } else {
        Some(tokio::time::interval_at(
            tokio::time::Instant::now() + poll_interval,
            poll_interval,
        ))
    };

    loop {
        let tick = async {
            match ticker.as_mut() {
                Some(ticker) => {
                    ticker.tick().await;
                }
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = tick => {
                if let Err(e) = post_report(&context).await {
                    warn!("Periodic report failed: {}", e);
                }
            }
            received = nudge_rx.recv() => match received {
                Some(()) => {
                    if let Err(e) = post_report(&context).await {
                        warn!("Nudged report failed: {}", e);
                    }
                }
                None => break,
            },
            _ = shutdown_rx.recv() => {
                if let Err(e) = post_report(&context).await {
                    warn!("Final report failed: {}", e);
                }
                break;
            }
        }
    }
    debug!("Report dispatcher stopped");
}

/// Sends one report and dispatches whatever the server answered with.
async fn post_report(context: &DispatchContext) -> Result<(), SessionError> {
    let stale = {
        let state = context
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        state.effective_config_stale
    };
    let effective_config = if stale {
        match context.callbacks.get_effective_config().await {
            Ok(config) => {
                context
                    .state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .effective_config_stale = false;
                Some(config)
            }
            Err(e) => {
                // stays stale so the next report retries the recompute
                warn!("Failed to recompute the effective configuration: {}", e);
                None
            }
        }
    } else {
        None
    };

    let report = {
        let mut state = context
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        state.sequence_num += 1;
        AgentToServer {
            instance_uid: state.instance_uid.clone(),
            sequence_num: state.sequence_num,
            agent_description: state.description.clone(),
            capabilities: state.capabilities,
            health: state.health.clone(),
            remote_config_status: state.remote_config_status.clone(),
            effective_config,
            flags: std::mem::take(&mut state.flags),
        }
    };

    let mut request = context
        .client
        .post(context.endpoint.clone())
        .timeout(context.request_timeout);
    for (key, value) in &context.headers {
        request = request.header(key, value);
    }

    let outcome = async {
        let response = request
            .json(&report)
            .send()
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SessionError::Server {
                status: status.as_u16(),
                message,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        if body.is_empty() {
            return Ok(());
        }
        let server_message: ServerToAgent = match serde_json::from_slice(&body) {
            Ok(message) => message,
            Err(e) => {
                // the report itself was accepted; only the payload is bad
                warn!("Discarding undecodable server response: {}", e);
                return Ok(());
            }
        };
        dispatch_response(context, server_message).await;
        Ok(())
    }
    .await;

    match &outcome {
        Ok(()) => {
            metrics::last_report_timestamp().set(Utc::now().timestamp() as f64);
        }
        Err(_) => {
            // put unacknowledged flags back for the next attempt
            if report.flags != 0 {
                context
                    .state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .flags |= report.flags;
            }
        }
    }
    outcome
}

async fn dispatch_response(context: &DispatchContext, mut message: ServerToAgent) {
    if let Some(err) = message.error_response.take() {
        context.callbacks.on_error(err).await;
    }

    // adopt a server-assigned identity for our own outbound reports before
    // the core reacts to the message
    if let Some(identification) = message.agent_identification.as_ref() {
        if !identification.new_instance_uid.is_empty() {
            context
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .instance_uid = identification.new_instance_uid.clone();
        }
    }

    let data = message.into_message_data();
    if !data.is_empty() {
        context.callbacks.on_message(data).await;
    }
}

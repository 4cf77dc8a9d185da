//! Reconciler engine
//!
//! Owns the connection lifecycle. Each attempt walks
//! `Connecting → Authenticating → Subscribing → Bootstrapping → Streaming`;
//! any failure drops the socket, reports a status line and retries after a
//! backoff delay. Only the stop signal ends the loop.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::config::{ConnectConfig, EngineConfig};
use crate::error::{ClientQueryError, Result};
use crate::message::ChannelEvent;
use crate::notify::NotifyKind;
use crate::query::QueryClient;
use crate::session::Session;
use crate::transport::LineTransport;

/// Buffered events between the engine and the presentation layer
pub const EVENT_BUFFER_SIZE: usize = 256;

/// Status text shown while waiting to retry
pub const RECONNECTING: &str = "reconnecting...";

/// Connection lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Authenticating,
    Subscribing,
    Bootstrapping,
    Streaming,
}

fn is_stopped(stop: &watch::Receiver<bool>) -> bool {
    *stop.borrow() || stop.has_changed().is_err()
}

/// Resolves once stop is requested or the sender is gone
async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stop| *stop).await;
}

/// Background task keeping the channel state in sync with the voice client
pub struct Reconciler {
    config: EngineConfig,
    target: watch::Receiver<ConnectConfig>,
    events: mpsc::Sender<ChannelEvent>,
    stop: watch::Receiver<bool>,
    backoff: Backoff,
    /// Sessions that completed their bootstrap
    bootstraps: u64,
}

impl Reconciler {
    pub fn new(
        config: EngineConfig,
        target: watch::Receiver<ConnectConfig>,
        events: mpsc::Sender<ChannelEvent>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        let backoff = Backoff::new(config.backoff_initial, config.backoff_max);
        Self {
            config,
            target,
            events,
            stop,
            backoff,
            bootstraps: 0,
        }
    }

    /// Run until stopped
    pub async fn run(mut self) {
        info!("Reconciler started");
        let mut stop = self.stop.clone();
        let events = self.events.clone();

        loop {
            if is_stopped(&stop) || self.events.is_closed() {
                break;
            }

            let mut reached = Phase::Connecting;
            let result = tokio::select! {
                result = self.run_session(&mut reached) => result,
                _ = stopped(&mut stop) => break,
                _ = events.closed() => break,
            };

            let text = match result {
                Ok(()) => ClientQueryError::ConnectionClosed.to_string(),
                Err(e) => {
                    warn!("Session ended during {:?}: {}", reached, e);
                    e.to_string()
                }
            };
            self.emit(ChannelEvent::Status { text }).await;

            if reached == Phase::Streaming {
                self.backoff.reset();
            }
            let delay = self.backoff.next_delay();
            info!("Reconnecting in {:?}", delay);
            self.emit(ChannelEvent::Status {
                text: RECONNECTING.to_string(),
            })
            .await;

            tokio::select! {
                _ = sleep(delay) => {}
                _ = stopped(&mut stop) => break,
            }
        }

        info!("Reconciler stopped");
    }

    /// One connection attempt, from connect to the end of streaming
    async fn run_session(&mut self, phase: &mut Phase) -> Result<()> {
        let target = self.target.borrow().clone();

        *phase = Phase::Connecting;
        let mut transport =
            LineTransport::connect(&target.host, target.port, self.config.connect_timeout).await?;
        transport.drain_banner(self.config.banner_wait).await?;
        let client = Arc::new(QueryClient::new(transport, self.config.response_timeout));

        *phase = Phase::Authenticating;
        debug!("Phase: {:?}", phase);
        client.authenticate(&target.api_key).await?;

        *phase = Phase::Subscribing;
        debug!("Phase: {:?}", phase);
        client.subscribe(NotifyKind::SUBSCRIBED).await?;

        *phase = Phase::Bootstrapping;
        debug!("Phase: {:?}", phase);
        let mut session = Session::new(
            Arc::clone(&client),
            self.events.clone(),
            self.config.name_retry_delay,
        );
        session.bootstrap().await?;
        if self.bootstraps > 0 {
            session.emit(ChannelEvent::ChannelChanged).await;
        }
        self.bootstraps += 1;
        session.push().await;

        *phase = Phase::Streaming;
        info!("Connected to {}:{}, streaming notifications", target.host, target.port);
        let result = self.stream(&client, &mut session).await;
        client.close().await;
        result
    }

    async fn stream(&self, client: &QueryClient, session: &mut Session) -> Result<()> {
        let mut empty_reads = 0u32;
        let mut faults = 0u32;

        loop {
            let Some(line) = client.next_notification(self.config.poll_interval).await? else {
                empty_reads += 1;
                if empty_reads > self.config.max_empty_reads {
                    return Err(ClientQueryError::StaleConnection(format!(
                        "no data for {} polls",
                        empty_reads
                    )));
                }
                continue;
            };
            empty_reads = 0;
            debug!("<- {}", line);

            match session.handle_line(&line).await {
                Ok(()) => faults = 0,
                Err(e) if e.is_transport() => return Err(e),
                Err(e) => {
                    faults += 1;
                    warn!("Handling record failed ({} in a row): {}", faults, e);
                    if faults > self.config.max_handler_faults {
                        return Err(ClientQueryError::StaleConnection(format!(
                            "{} consecutive handler faults",
                            faults
                        )));
                    }
                }
            }
        }
    }

    async fn emit(&self, event: ChannelEvent) {
        let _ = self.events.send(event).await;
    }
}

/// Presentation-side handle on a spawned [`Reconciler`]
pub struct EngineHandle {
    stop: watch::Sender<bool>,
    target: watch::Sender<ConnectConfig>,
    task: JoinHandle<()>,
}

impl EngineHandle {
    /// Change where the next connection attempt goes
    pub fn set_target(&self, target: ConnectConfig) {
        self.target.send_replace(target);
    }

    /// Signal stop and wait for the engine to wind down
    pub async fn stop(self) {
        self.stop.send_replace(true);
        if let Err(e) = self.task.await {
            warn!("Reconciler task failed: {}", e);
        }
    }
}

/// Start an engine on the current runtime
pub fn spawn(
    config: EngineConfig,
    target: ConnectConfig,
) -> (EngineHandle, mpsc::Receiver<ChannelEvent>) {
    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER_SIZE);
    let (stop_tx, stop_rx) = watch::channel(false);
    let (target_tx, target_rx) = watch::channel(target);

    let task = tokio::spawn(Reconciler::new(config, target_rx, events_tx, stop_rx).run());
    let handle = EngineHandle {
        stop: stop_tx,
        target: target_tx,
        task,
    };
    (handle, events_rx)
}

//! Connectivity observer.
//!
//! The signal is advisory: it feeds status displays and can hint that a sync
//! is worth trying, but the orchestrator never checks it. Syncing while
//! offline just yields `Unreachable` per record.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use catchsync_common::{Error, Result};

/// Observed link state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkState {
    /// A route to the backend exists (radio up, address resolvable).
    pub radio_up: bool,
    /// The backend host accepted a connection.
    pub reachable: bool,
}

impl LinkState {
    pub fn is_online(&self) -> bool {
        self.radio_up && self.reachable
    }
}

/// Source of link state samples.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn probe(&self) -> LinkState;
}

/// Probe checking the network path to one backend host.
///
/// A connected UDP socket tells whether the OS has a route to the host
/// without sending anything; a TCP connect tells whether the host answers.
pub struct RouteProbe {
    host: String,
    port: u16,
    timeout: Duration,
}

impl RouteProbe {
    /// Probe the host and port of `url`.
    ///
    /// # Errors
    /// - `Config` if the URL has no host or no known port
    pub fn from_url(url: &str, timeout: Duration) -> Result<Self> {
        let parsed = url::Url::parse(url)
            .map_err(|e| Error::Config(format!("Invalid URL {}: {}", url, e)))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| Error::Config(format!("URL {} has no host", url)))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| Error::Config(format!("URL {} has no port", url)))?;
        Ok(Self {
            host,
            port,
            timeout,
        })
    }

    async fn has_route(&self) -> bool {
        let bind = if self.host.contains(':') { "[::]:0" } else { "0.0.0.0:0" };
        let socket = match UdpSocket::bind(bind).await {
            Ok(socket) => socket,
            Err(e) => {
                debug!("Cannot bind probe socket: {}", e);
                return false;
            }
        };
        let connect = socket.connect((self.host.as_str(), self.port));
        matches!(tokio::time::timeout(self.timeout, connect).await, Ok(Ok(())))
    }

    async fn accepts_connection(&self) -> bool {
        let connect = TcpStream::connect((self.host.as_str(), self.port));
        match tokio::time::timeout(self.timeout, connect).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("{}:{} refused: {}", self.host, self.port, e);
                false
            }
            Err(_) => {
                debug!("{}:{} timed out", self.host, self.port);
                false
            }
        }
    }
}

#[async_trait]
impl ConnectivityProbe for RouteProbe {
    async fn probe(&self) -> LinkState {
        let radio_up = self.has_route().await;
        let reachable = radio_up && self.accepts_connection().await;
        LinkState {
            radio_up,
            reachable,
        }
    }
}

/// Publishes link state transitions to subscribers.
pub struct ConnectivityObserver<P: ConnectivityProbe + ?Sized> {
    probe: Arc<P>,
    state: watch::Sender<LinkState>,
}

impl<P: ConnectivityProbe + ?Sized> ConnectivityObserver<P> {
    /// Create an observer; the link is assumed down until the first probe.
    pub fn new(probe: Arc<P>) -> Self {
        let (state, _) = watch::channel(LinkState::default());
        Self { probe, state }
    }

    /// Receive every state transition.
    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    /// Last observed state.
    pub fn current(&self) -> LinkState {
        *self.state.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.current().is_online()
    }

    /// Probe once and publish the result if it differs from the last one.
    pub async fn refresh(&self) -> LinkState {
        let sample = self.probe.probe().await;
        let changed = self.state.send_if_modified(|current| {
            if *current == sample {
                false
            } else {
                *current = sample;
                true
            }
        });
        if changed {
            info!(
                "Connectivity changed: {} (radio up: {}, reachable: {})",
                if sample.is_online() { "online" } else { "offline" },
                sample.radio_up,
                sample.reachable
            );
        }
        sample
    }

    /// Refresh every `every` until the returned task is aborted.
    pub fn spawn(self: Arc<Self>, every: Duration) -> JoinHandle<()>
    where
        P: 'static,
    {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                self.refresh().await;
            }
        })
    }
}

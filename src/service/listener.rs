//! # Connection Listener
//!
//! Owns the listening socket and the task-per-connection serving loop.
//!
//! Lifecycle is one-way: Created → Running → Stopping → Stopped. A stopped
//! or discarded listener cannot restart; build a new one. Starting twice, or
//! starting after the socket was discarded, is a logged no-op, not a crash.
//!
//! The accept loop runs on its own task and `select!`s between the shutdown
//! watch channel and `accept()`, so a stop request cancels the blocking
//! accept without the loopback self-connect the non-cancellable variant
//! needs. Each accepted socket bumps the in-flight counter and is served on
//! a freshly spawned task; graceful stop waits (bounded by the timeout,
//! unbounded when zero) for the counter to return to zero before the socket
//! closes. Handlers are drained best-effort, never killed.
//!
//! Errors while running go to the error hook; errors observed once stopping
//! was requested are swallowed as expected shutdown noise.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, instrument, warn};

use crate::config::ListenerConfig;
use crate::error::{ExchangeError, Result};
use crate::service::channel::ServerChannel;
use crate::service::server::ConnectionDriver;
use crate::service::{log_errors, ErrorHook};
use crate::transport::{tls, BoxedIo, SocketMode};
use crate::utils::crypto::Crypto;

/// How often the drain loop re-checks the in-flight counter.
const DRAIN_POLL: Duration = Duration::from_millis(25);

/// One-way lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Created,
    Running,
    Stopping,
    Stopped,
}

/// A listening socket plus the serving lifecycle around it.
pub struct Listener {
    state: ListenerState,
    local_addr: SocketAddr,
    socket: Option<TcpListener>,
    acceptor: Option<TlsAcceptor>,
    secret: Option<String>,
    shutdown: watch::Sender<bool>,
    in_flight: Arc<AtomicUsize>,
    accept_task: Option<JoinHandle<()>>,
    on_error: ErrorHook,
}

impl Listener {
    /// Bind the socket (and, in TLS mode, generate the ephemeral identity).
    /// The listener is Created: nothing is accepted until [`Listener::start`].
    #[instrument(skip(config), fields(address = %config.address))]
    pub async fn bind(config: &ListenerConfig) -> Result<Self> {
        let socket = TcpListener::bind(&config.address).await?;
        let local_addr = socket.local_addr()?;
        let acceptor = match config.mode {
            SocketMode::AnonymousTls => Some(tls::acceptor()?),
            SocketMode::Plain => None,
        };
        let (shutdown, _) = watch::channel(false);

        info!(%local_addr, mode = ?config.mode, "listener bound");
        Ok(Self {
            state: ListenerState::Created,
            local_addr,
            socket: Some(socket),
            acceptor,
            secret: config.secret.clone(),
            shutdown,
            in_flight: Arc::new(AtomicUsize::new(0)),
            accept_task: None,
            on_error: log_errors(),
        })
    }

    /// The bound address; useful when binding port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }

    /// Currently-executing connection handlers.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Replace the default log-and-continue error hook.
    pub fn set_error_hook(&mut self, hook: ErrorHook) {
        self.on_error = hook;
    }

    /// Spawn the accept loop. Each accepted connection is handed to `driver`
    /// on its own task.
    pub fn start(&mut self, driver: Arc<dyn ConnectionDriver>) {
        let socket = match (self.state, self.socket.take()) {
            (ListenerState::Created, Some(socket)) => socket,
            (state, socket) => {
                self.socket = socket;
                warn!(?state, "start ignored; listener is not freshly created");
                return;
            }
        };

        self.state = ListenerState::Running;
        let shutdown = self.shutdown.subscribe();
        let task = tokio::spawn(accept_loop(
            socket,
            self.acceptor.clone(),
            self.secret.clone(),
            driver,
            shutdown,
            Arc::clone(&self.in_flight),
            self.on_error.clone(),
        ));
        self.accept_task = Some(task);
        info!(local_addr = %self.local_addr, "listener running");
    }

    /// Graceful stop: signal the accept loop, then wait for in-flight
    /// handlers. A zero `timeout` waits unbounded; otherwise the socket
    /// closes once the timeout elapses, handlers still running.
    #[instrument(skip(self), fields(local_addr = %self.local_addr))]
    pub async fn stop(&mut self, timeout: Duration) -> Result<()> {
        match self.state {
            ListenerState::Running => {}
            ListenerState::Created => {
                self.socket = None;
                self.state = ListenerState::Stopped;
                debug!("stopped before start; socket discarded");
                return Ok(());
            }
            state => {
                debug!(?state, "stop ignored; listener already stopping or stopped");
                return Ok(());
            }
        }

        self.state = ListenerState::Stopping;
        info!(in_flight = self.in_flight(), "stopping listener");
        let _ = self.shutdown.send(true);

        drain(&self.in_flight, timeout).await;

        if let Some(task) = self.accept_task.take() {
            let _ = task.await;
        }
        self.state = ListenerState::Stopped;
        info!("listener stopped");
        Ok(())
    }

    /// Asynchronous stop: consumes the listener (it could not restart anyway)
    /// and performs [`Listener::stop`] on a spawned task.
    pub fn stop_in_background(mut self, timeout: Duration) -> JoinHandle<Result<()>> {
        tokio::spawn(async move { self.stop(timeout).await })
    }
}

/// Wait for the in-flight counter to reach zero, bounded by `timeout`
/// (unbounded when zero).
async fn drain(in_flight: &AtomicUsize, timeout: Duration) {
    if timeout.is_zero() {
        while in_flight.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(DRAIN_POLL).await;
        }
        return;
    }

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    loop {
        if in_flight.load(Ordering::SeqCst) == 0 {
            return;
        }
        tokio::select! {
            _ = &mut deadline => {
                warn!(
                    remaining = in_flight.load(Ordering::SeqCst),
                    "shutdown timeout reached; closing with handlers in flight"
                );
                return;
            }
            _ = tokio::time::sleep(DRAIN_POLL) => {}
        }
    }
}

async fn accept_loop(
    socket: TcpListener,
    acceptor: Option<TlsAcceptor>,
    secret: Option<String>,
    driver: Arc<dyn ConnectionDriver>,
    mut shutdown: watch::Receiver<bool>,
    in_flight: Arc<AtomicUsize>,
    on_error: ErrorHook,
) {
    loop {
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }

            accepted = socket.accept() => match accepted {
                Ok((stream, peer)) => {
                    in_flight.fetch_add(1, Ordering::SeqCst);
                    debug!(%peer, "connection accepted");

                    let driver = Arc::clone(&driver);
                    let acceptor = acceptor.clone();
                    let crypto = secret.as_deref().map(Crypto::from_secret);
                    let in_flight = Arc::clone(&in_flight);
                    let on_error = on_error.clone();
                    let stopping = shutdown.clone();

                    tokio::spawn(async move {
                        if let Err(e) = serve_one(stream, peer, acceptor, crypto, driver).await {
                            if *stopping.borrow() && e.is_shutdown_noise() {
                                debug!(error = %e, %peer, "connection error during shutdown");
                            } else {
                                on_error(&e);
                            }
                        }
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                    });
                }
                Err(e) => {
                    if *shutdown.borrow() {
                        break;
                    }
                    on_error(&ExchangeError::Io(e));
                }
            }
        }
    }
    debug!("accept loop exited");
    // The socket drops here; nothing is accepted past this point.
}

async fn serve_one(
    stream: TcpStream,
    peer: SocketAddr,
    acceptor: Option<TlsAcceptor>,
    crypto: Option<Crypto>,
    driver: Arc<dyn ConnectionDriver>,
) -> Result<()> {
    let io: BoxedIo = match &acceptor {
        Some(acceptor) => tls::accept(acceptor, stream).await?,
        None => Box::new(stream),
    };
    let channel = ServerChannel::new(io, crypto, peer);
    driver.drive(channel).await
}

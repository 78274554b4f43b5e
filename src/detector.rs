//! Master detection through a coordination service.
//!
//! The detector tracks the currently active cluster master by listing
//! and watching ephemeral sequential election nodes. It never creates
//! or deletes nodes itself; it is a follower, not an election
//! participant.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};

use crate::config::DetectorConfig;
use crate::error::{DriverError, DriverResult};
use crate::upid::ProcessAddress;

/// Session lifecycle states reported by the coordination client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Client is attempting to connect
    Connecting,
    /// Session established
    Connected,
    /// Session re-synchronized after a transient drop
    SyncConnected,
    /// Connection lost; session may still be recoverable
    Disconnected,
    /// Session expired; a fresh connect is required
    Expired,
}

/// Asynchronous session notification
#[derive(Debug, Clone)]
pub struct SessionEvent {
    /// New session state
    pub state: SessionState,
    /// Error carried by the notification, if any
    pub error: Option<String>,
}

/// A children-changed watch notification
#[derive(Debug, Clone)]
pub struct WatchEvent {
    /// Path the watch fired for
    pub path: String,
    /// Error carried by the notification, if any
    pub error: Option<String>,
}

/// Seam to the coordination service client.
///
/// Watches are one-shot at this level; the detector re-arms them.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish a session and return the session event stream
    async fn connect(&self, hosts: &[String]) -> DriverResult<mpsc::Receiver<SessionEvent>>;

    /// List the child node names directly under `path`
    async fn children(&self, path: &str) -> DriverResult<Vec<String>>;

    /// Arm a one-shot children watch at `path`
    async fn watch_children(&self, path: &str) -> DriverResult<oneshot::Receiver<WatchEvent>>;

    /// Read the raw payload stored at `path`
    async fn data(&self, path: &str) -> DriverResult<Vec<u8>>;

    /// Tear down the session
    async fn close(&self);
}

/// Observer of children-changed notifications
pub trait ChildrenWatcher: Send + Sync {
    /// Called after the watch has been re-armed for the firing path
    fn children_changed(&self, detector: &MasterDetector, path: &str);
}

/// Observer of asynchronous session and watch errors
pub trait ErrorWatcher: Send + Sync {
    /// Called from the background session or watch activity
    fn error_occurred(&self, detector: &MasterDetector, error: &DriverError);
}

struct ChildrenWatcherFn<F>(F);

impl<F> ChildrenWatcher for ChildrenWatcherFn<F>
where
    F: Fn(&MasterDetector, &str) + Send + Sync,
{
    fn children_changed(&self, detector: &MasterDetector, path: &str) {
        (self.0)(detector, path)
    }
}

/// Adapt a plain function into a [`ChildrenWatcher`]
pub fn children_watcher_fn<F>(f: F) -> Arc<dyn ChildrenWatcher>
where
    F: Fn(&MasterDetector, &str) + Send + Sync + 'static,
{
    Arc::new(ChildrenWatcherFn(f))
}

struct ErrorWatcherFn<F>(F);

impl<F> ErrorWatcher for ErrorWatcherFn<F>
where
    F: Fn(&MasterDetector, &DriverError) + Send + Sync,
{
    fn error_occurred(&self, detector: &MasterDetector, error: &DriverError) {
        (self.0)(detector, error)
    }
}

/// Adapt a plain function into an [`ErrorWatcher`]
pub fn error_watcher_fn<F>(f: F) -> Arc<dyn ErrorWatcher>
where
    F: Fn(&MasterDetector, &DriverError) + Send + Sync + 'static,
{
    Arc::new(ErrorWatcherFn(f))
}

/// The currently believed active master
#[derive(Debug, Clone, PartialEq)]
pub struct Leader {
    /// Resolved master endpoint
    pub address: ProcessAddress,
    /// Raw payload of the election node the address was decoded from
    pub data: Vec<u8>,
}

struct DetectorInner {
    config: DetectorConfig,
    connector: Arc<dyn Connector>,
    connected: AtomicBool,
    children_watcher: Mutex<Option<Arc<dyn ChildrenWatcher>>>,
    error_watcher: Mutex<Option<Arc<dyn ErrorWatcher>>>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

/// Tracks the active cluster master via the coordination service.
///
/// Cheap to clone; all clones share the same session.
#[derive(Clone)]
pub struct MasterDetector {
    inner: Arc<DetectorInner>,
}

impl MasterDetector {
    /// Create a detector over the given connector
    pub fn new(config: DetectorConfig, connector: Arc<dyn Connector>) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        MasterDetector {
            inner: Arc::new(DetectorInner {
                config,
                connector,
                connected: AtomicBool::new(false),
                children_watcher: Mutex::new(None),
                error_watcher: Mutex::new(None),
                stop_tx,
                stop_rx,
            }),
        }
    }

    /// Register the children-changed observer
    pub fn set_children_watcher(&self, watcher: Arc<dyn ChildrenWatcher>) {
        *self.inner.children_watcher.lock() = Some(watcher);
    }

    /// Register the error observer
    pub fn set_error_watcher(&self, watcher: Arc<dyn ErrorWatcher>) {
        *self.inner.error_watcher.lock() = Some(watcher);
    }

    /// Whether a confirmed session currently exists
    pub fn connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    fn report_error(&self, error: &DriverError) {
        let watcher = self.inner.error_watcher.lock().clone();
        if let Some(watcher) = watcher {
            watcher.error_occurred(self, error);
        }
    }

    /// Idempotent internal teardown on a transient disconnect.
    ///
    /// Reconnection is the owning driver's responsibility, surfaced via
    /// the error watcher.
    fn disconnect(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
    }

    /// Establish a session with the coordination service.
    ///
    /// Blocks until the service confirms a connected state or the
    /// configured timeout elapses. Calling again while connected is a
    /// no-op.
    pub async fn connect(&self) -> DriverResult<()> {
        if self.connected() {
            return Ok(());
        }

        let session_rx = self
            .inner
            .connector
            .connect(&self.inner.config.hosts)
            .await?;

        let (confirm_tx, confirm_rx) = oneshot::channel();
        let detector = self.clone();
        let mut stop_rx = self.inner.stop_rx.clone();
        tokio::spawn(async move {
            detector.session_loop(session_rx, confirm_tx, &mut stop_rx).await;
        });

        // Race the confirmation against the timeout; a confirmation
        // arriving after the timeout is absorbed as a no-op by the
        // session loop.
        let timeout = self.inner.config.connect_timeout;
        match tokio::time::timeout(timeout, confirm_rx).await {
            Ok(Ok(())) => {
                if !self.connected() {
                    return Err(DriverError::ConnectionError(
                        "unable to confirm connected state".to_string(),
                    ));
                }
                Ok(())
            }
            Ok(Err(_)) => Err(DriverError::ConnectionError(
                "session closed before confirmation".to_string(),
            )),
            Err(_) => Err(DriverError::ConnectionTimeout(timeout)),
        }
    }

    async fn session_loop(
        &self,
        mut session_rx: mpsc::Receiver<SessionEvent>,
        confirm_tx: oneshot::Sender<()>,
        stop_rx: &mut watch::Receiver<bool>,
    ) {
        let mut confirm_tx = Some(confirm_tx);
        loop {
            let event = tokio::select! {
                _ = stop_rx.changed() => break,
                event = session_rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            if let Some(message) = &event.error {
                error!("Received session error: {}", message);
                self.report_error(&DriverError::ConnectionError(message.clone()));
            }

            match event.state {
                SessionState::Connecting => {
                    info!("Connecting to coordination service...");
                }
                SessionState::Connected | SessionState::SyncConnected => {
                    self.inner.connected.store(true, Ordering::SeqCst);
                    info!("Connected to coordination service at {:?}", self.inner.config.hosts);
                    if let Some(tx) = confirm_tx.take() {
                        // A late confirmation after timeout lands here
                        // with the receiver gone; ignore it.
                        let _ = tx.send(());
                    }
                }
                SessionState::Disconnected => {
                    info!("Disconnected from coordination service");
                    self.disconnect();
                }
                SessionState::Expired => {
                    // Deliberate no-op beyond reporting: expiry requires
                    // explicit caller-driven recovery via a fresh connect.
                    warn!("Coordination session expired");
                    self.report_error(&DriverError::SessionExpired);
                }
            }
        }
    }

    fn resolve_path(&self, path: &str) -> String {
        if path.is_empty() || path == "." {
            self.inner.config.base_path.clone()
        } else {
            format!("{}{}", self.inner.config.base_path, path)
        }
    }

    /// Arm a self-perpetuating children watch at `base_path + path`.
    ///
    /// After each fire the watch is re-armed before the children
    /// watcher is invoked, so a slow callback cannot lose notifications.
    pub async fn watch_children(&self, path: &str) -> DriverResult<()> {
        if !self.connected() {
            return Err(DriverError::NotConnected);
        }

        let watch_path = self.resolve_path(path);
        debug!("Watching children for path {}", watch_path);
        let first = self.inner.connector.watch_children(&watch_path).await?;

        let detector = self.clone();
        let mut stop_rx = self.inner.stop_rx.clone();
        tokio::spawn(async move {
            let mut armed = first;
            loop {
                let event = tokio::select! {
                    _ = stop_rx.changed() => break,
                    event = &mut armed => event,
                };

                // Re-arm first; a watch that is not re-armed silently
                // stops all future notifications.
                match detector.inner.connector.watch_children(&watch_path).await {
                    Ok(next) => armed = next,
                    Err(e) => {
                        error!("Unable to re-arm watch for path {}: {}", watch_path, e);
                        detector.report_error(&DriverError::WatchError {
                            path: watch_path.clone(),
                            reason: e.to_string(),
                        });
                        break;
                    }
                }

                match event {
                    Ok(event) => {
                        if let Some(message) = &event.error {
                            error!("Error while watching path {}: {}", event.path, message);
                            detector.report_error(&DriverError::WatchError {
                                path: event.path.clone(),
                                reason: message.clone(),
                            });
                        }
                        let watcher = detector.inner.children_watcher.lock().clone();
                        if let Some(watcher) = watcher {
                            watcher.children_changed(&detector, &event.path);
                        }
                    }
                    Err(_) => {
                        // Watch channel dropped by the connector; the
                        // freshly armed watch takes over.
                        debug!("Watch channel closed for path {}", watch_path);
                    }
                }
            }
        });

        Ok(())
    }

    /// List the children of `path`, sorted ascending.
    ///
    /// The stable order makes the first element the lowest-sequence
    /// node, i.e. the master by convention.
    pub async fn list(&self, path: &str) -> DriverResult<Vec<String>> {
        if !self.connected() {
            return Err(DriverError::NotConnected);
        }
        let mut children = self.inner.connector.children(path).await?;
        children.sort();
        Ok(children)
    }

    /// Read the raw payload stored at `path`
    pub async fn data(&self, path: &str) -> DriverResult<Vec<u8>> {
        if !self.connected() {
            return Err(DriverError::NotConnected);
        }
        self.inner.connector.data(path).await
    }

    /// Resolve the current master under the election root.
    ///
    /// Returns `Ok(None)` when no election node exists, which is a
    /// distinct state from a resolution error.
    pub async fn detect_master(&self, path: &str) -> DriverResult<Option<Leader>> {
        let root = self.resolve_path(path);
        let children = self.list(&root).await?;
        let lowest = match children.first() {
            Some(child) => child,
            None => return Ok(None),
        };

        let data = self.data(&format!("{}/{}", root, lowest)).await?;
        let text = std::str::from_utf8(&data)
            .map_err(|e| DriverError::DecodeError(format!("leader node payload: {}", e)))?;
        let address: ProcessAddress = text.trim().parse()?;
        Ok(Some(Leader { address, data }))
    }

    /// Cancel the session loop and all watch loops, and tear down the
    /// session
    pub async fn stop(&self) {
        let _ = self.inner.stop_tx.send(true);
        self.disconnect();
        self.inner.connector.close().await;
    }
}

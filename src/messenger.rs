//! Addressed, asynchronous message transport between the scheduler and
//! the cluster master.
//!
//! Outbound messages are serialized and framed with a 4-byte big-endian
//! length prefix; inbound frames are decoded and delivered through a
//! bounded channel to the driver's dispatch loop.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio::task::JoinHandle;

use crate::config::DriverConfig;
use crate::error::{DriverError, DriverResult};
use crate::message::{Envelope, SchedulerMessage};
use crate::serialization::Serializer;
use crate::upid::ProcessAddress;

/// Abstraction over the driver's message transport.
///
/// The driver owns exactly one messenger; tests substitute a mock.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Start the transport and begin accepting inbound messages
    async fn start(&self) -> DriverResult<()>;

    /// Stop the transport; in-flight sends fail with a transport-closed
    /// error afterwards
    async fn stop(&self);

    /// The address inbound messages should be routed to
    fn upid(&self) -> ProcessAddress;

    /// Send a message to the given endpoint
    async fn send(&self, to: &ProcessAddress, message: SchedulerMessage) -> DriverResult<()>;

    /// Take the inbound event channel; yields `None` once taken or
    /// before the transport is started
    fn take_events(&self) -> Option<mpsc::Receiver<Envelope>>;
}

struct TcpMessengerState {
    upid: ProcessAddress,
    started: bool,
    accept_task: Option<JoinHandle<()>>,
    event_rx: Option<mpsc::Receiver<Envelope>>,
    event_tx: Option<mpsc::Sender<Envelope>>,
}

/// TCP transport with length-prefixed frames
pub struct TcpMessenger {
    config: DriverConfig,
    serializer: Serializer,
    state: Mutex<TcpMessengerState>,
    connections: Arc<Mutex<HashMap<ProcessAddress, Arc<TokioMutex<TcpStream>>>>>,
}

impl TcpMessenger {
    /// Create a messenger for the given process name and configuration
    pub fn new(process_id: impl Into<String>, config: DriverConfig) -> Self {
        let upid = ProcessAddress::new(process_id, config.bind_host.clone(), config.bind_port);
        TcpMessenger {
            serializer: Serializer::new(config.format),
            config,
            state: Mutex::new(TcpMessengerState {
                upid,
                started: false,
                accept_task: None,
                event_rx: None,
                event_tx: None,
            }),
            connections: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn write_frame(stream: &mut TcpStream, payload: &[u8]) -> DriverResult<()> {
        let mut frame = BytesMut::with_capacity(4 + payload.len());
        frame.put_u32(payload.len() as u32);
        frame.put_slice(payload);
        stream.write_all(&frame).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Read inbound frames from one connection until it closes.
    ///
    /// A frame that fails to decode is logged and dropped; the length
    /// prefix keeps the stream aligned for the next frame. An oversized
    /// length prefix drops the whole connection, since the peer's
    /// framing can no longer be trusted.
    async fn read_loop(
        mut stream: TcpStream,
        serializer: Serializer,
        event_tx: mpsc::Sender<Envelope>,
        max_frame_len: usize,
    ) {
        loop {
            let mut len_buf = [0u8; 4];
            if stream.read_exact(&mut len_buf).await.is_err() {
                break;
            }
            let len = u32::from_be_bytes(len_buf) as usize;
            if len > max_frame_len {
                warn!(
                    "Dropping connection: frame length {} exceeds limit {}",
                    len, max_frame_len
                );
                break;
            }
            let mut payload = vec![0u8; len];
            if stream.read_exact(&mut payload).await.is_err() {
                break;
            }
            match serializer.deserialize::<Envelope>(&payload) {
                Ok(envelope) => {
                    debug!(
                        "Received {} from {}",
                        envelope.message.type_name(),
                        envelope.from
                    );
                    if event_tx.send(envelope).await.is_err() {
                        // Dispatch side is gone, stop reading.
                        break;
                    }
                }
                Err(e) => {
                    warn!("Dropping undecodable frame: {}", e);
                }
            }
        }
    }
}

#[async_trait]
impl Messenger for TcpMessenger {
    async fn start(&self) -> DriverResult<()> {
        {
            let state = self.state.lock();
            if state.started {
                return Ok(());
            }
        }

        let bind_addr = format!("{}:{}", self.config.bind_host, self.config.bind_port);
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| DriverError::ConnectionError(format!("bind {}: {}", bind_addr, e)))?;
        let local_addr = listener.local_addr()?;

        let (event_tx, event_rx) = mpsc::channel(self.config.event_capacity);
        let serializer = self.serializer;
        let max_frame_len = self.config.max_frame_len;
        let accept_tx = event_tx.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!("Accepted connection from {}", peer);
                        let tx = accept_tx.clone();
                        tokio::spawn(Self::read_loop(stream, serializer, tx, max_frame_len));
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    }
                }
            }
        });

        let mut state = self.state.lock();
        state.upid.port = local_addr.port();
        state.started = true;
        state.accept_task = Some(accept_task);
        state.event_rx = Some(event_rx);
        state.event_tx = Some(event_tx);
        info!("Messenger listening on {}", state.upid);
        Ok(())
    }

    async fn stop(&self) {
        let mut state = self.state.lock();
        if let Some(task) = state.accept_task.take() {
            task.abort();
        }
        state.event_tx = None;
        state.event_rx = None;
        state.started = false;
        self.connections.lock().clear();
        debug!("Messenger stopped");
    }

    fn upid(&self) -> ProcessAddress {
        self.state.lock().upid.clone()
    }

    async fn send(&self, to: &ProcessAddress, message: SchedulerMessage) -> DriverResult<()> {
        let from = {
            let state = self.state.lock();
            if !state.started {
                return Err(DriverError::TransportClosed);
            }
            state.upid.clone()
        };

        let type_name = message.type_name();
        let payload = self.serializer.serialize(&Envelope::new(from, message))?;

        // Reuse a cached connection when one exists; a write failure
        // invalidates it and fails the send.
        let cached = self.connections.lock().get(to).cloned();
        if let Some(stream) = cached {
            let mut stream = stream.lock().await;
            match Self::write_frame(&mut stream, &payload).await {
                Ok(()) => {
                    debug!("Sent {} to {}", type_name, to);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Cached connection to {} failed: {}", to, e);
                    self.connections.lock().remove(to);
                }
            }
        }

        let mut stream = TcpStream::connect(to.host_port())
            .await
            .map_err(|e| DriverError::SendFailed(format!("connect {}: {}", to, e)))?;
        Self::write_frame(&mut stream, &payload)
            .await
            .map_err(|e| DriverError::SendFailed(format!("write to {}: {}", to, e)))?;
        debug!("Sent {} to {}", type_name, to);

        self.connections
            .lock()
            .insert(to.clone(), Arc::new(TokioMutex::new(stream)));
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::Receiver<Envelope>> {
        self.state.lock().event_rx.take()
    }
}

/// Scriptable messenger for driver unit tests
#[cfg(test)]
pub struct MockMessenger {
    upid: ProcessAddress,
    fail_start: bool,
    fail_send: std::sync::atomic::AtomicBool,
    sent: Mutex<Vec<(ProcessAddress, SchedulerMessage)>>,
    event_rx: Mutex<Option<mpsc::Receiver<Envelope>>>,
    event_tx: mpsc::Sender<Envelope>,
}

#[cfg(test)]
impl MockMessenger {
    /// Create a mock that succeeds on every call
    pub fn new() -> Self {
        let (event_tx, event_rx) = mpsc::channel(16);
        MockMessenger {
            upid: ProcessAddress::new("scheduler(1)", "127.0.0.1", 0),
            fail_start: false,
            fail_send: std::sync::atomic::AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            event_rx: Mutex::new(Some(event_rx)),
            event_tx,
        }
    }

    /// Create a mock whose `start` fails
    pub fn failing_start() -> Self {
        let mut mock = Self::new();
        mock.fail_start = true;
        mock
    }

    /// Make subsequent sends fail
    pub fn set_fail_send(&self, fail: bool) {
        self.fail_send
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    /// Inject an inbound envelope, as if the master had sent it
    pub async fn deliver(&self, envelope: Envelope) {
        self.event_tx.send(envelope).await.expect("event channel closed");
    }

    /// Messages recorded by `send`
    pub fn sent_messages(&self) -> Vec<(ProcessAddress, SchedulerMessage)> {
        self.sent.lock().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl Messenger for MockMessenger {
    async fn start(&self) -> DriverResult<()> {
        if self.fail_start {
            Err(DriverError::ConnectionError("mock start failure".to_string()))
        } else {
            Ok(())
        }
    }

    async fn stop(&self) {}

    fn upid(&self) -> ProcessAddress {
        self.upid.clone()
    }

    async fn send(&self, to: &ProcessAddress, message: SchedulerMessage) -> DriverResult<()> {
        if self.fail_send.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(DriverError::SendFailed("mock send failure".to_string()));
        }
        self.sent.lock().push((to.clone(), message));
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::Receiver<Envelope>> {
        self.event_rx.lock().take()
    }
}

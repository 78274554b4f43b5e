//! The framework-facing scheduler driver.
//!
//! The driver owns its messenger, registers the framework with the
//! current master, dispatches inbound protocol events to the
//! framework's [`Scheduler`] callbacks, and exposes task-control
//! operations. Every control operation returns a [`Status`]; failures
//! are communicated through status values and callbacks, never panics.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::config::DriverConfig;
use crate::detector::{children_watcher_fn, MasterDetector};
use crate::error::DriverResult;
use crate::message::{
    Envelope, ExecutorId, Filters, FrameworkId, FrameworkInfo, MasterInfo, Offer, OfferId,
    Request, SchedulerMessage, SlaveId, TaskId, TaskInfo, TaskStatus,
};
use crate::messenger::{Messenger, TcpMessenger};
use crate::upid::ProcessAddress;

/// Driver lifecycle status, returned by every control operation.
///
/// `Stopped` and `Aborted` are terminal; a new driver instance is
/// required to start again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Driver has not been started
    NotStarted,
    /// Driver is running and processing events
    Running,
    /// Driver was stopped cleanly
    Stopped,
    /// Driver was aborted
    Aborted,
}

/// Framework callbacks invoked from the driver's dispatch loop.
///
/// The driver handle is passed as first argument so callbacks can issue
/// further control calls. All methods default to no-ops; implement only
/// the events the framework cares about.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Registration acknowledged by the master
    async fn registered(
        &self,
        driver: &SchedulerDriver,
        framework_id: &FrameworkId,
        master: &MasterInfo,
    ) {
        let _ = (driver, framework_id, master);
    }

    /// Re-registration acknowledged after a master failover
    async fn reregistered(&self, driver: &SchedulerDriver, master: &MasterInfo) {
        let _ = (driver, master);
    }

    /// Resource offers from the master
    async fn resource_offers(&self, driver: &SchedulerDriver, offers: Vec<Offer>) {
        let _ = (driver, offers);
    }

    /// A previously received offer is no longer valid
    async fn offer_rescinded(&self, driver: &SchedulerDriver, offer_id: &OfferId) {
        let _ = (driver, offer_id);
    }

    /// Status update for a launched task
    async fn status_update(&self, driver: &SchedulerDriver, status: TaskStatus) {
        let _ = (driver, status);
    }

    /// Out-of-band data from an executor
    async fn framework_message(
        &self,
        driver: &SchedulerDriver,
        executor_id: &ExecutorId,
        slave_id: &SlaveId,
        data: &[u8],
    ) {
        let _ = (driver, executor_id, slave_id, data);
    }

    /// A slave was lost
    async fn slave_lost(&self, driver: &SchedulerDriver, slave_id: &SlaveId) {
        let _ = (driver, slave_id);
    }

    /// An executor terminated abnormally
    async fn executor_lost(
        &self,
        driver: &SchedulerDriver,
        executor_id: &ExecutorId,
        slave_id: &SlaveId,
        status: i32,
    ) {
        let _ = (driver, executor_id, slave_id, status);
    }

    /// Unrecoverable framework error reported by the master
    async fn error(&self, driver: &SchedulerDriver, message: &str) {
        let _ = (driver, message);
    }

    /// The driver lost its connection to the master
    async fn disconnected(&self, driver: &SchedulerDriver) {
        let _ = driver;
    }
}

struct Lifecycle {
    status: Status,
    connected: bool,
    stopped: bool,
}

struct DriverInner {
    scheduler: Arc<dyn Scheduler>,
    framework: Mutex<FrameworkInfo>,
    master: Mutex<ProcessAddress>,
    messenger: Arc<dyn Messenger>,
    lifecycle: Mutex<Lifecycle>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

/// The scheduler driver lifecycle state machine.
///
/// Cheap to clone; all clones share the same state. The driver
/// exclusively owns its messenger and framework registration state. It
/// may additionally hold a non-owning [`MasterDetector`] handle for
/// dynamic leader discovery via [`SchedulerDriver::track_master`].
#[derive(Clone)]
pub struct SchedulerDriver {
    inner: Arc<DriverInner>,
}

fn default_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

fn default_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

fn parse_master(address: &str) -> DriverResult<ProcessAddress> {
    if address.contains('@') {
        address.parse()
    } else {
        format!("master@{}", address).parse()
    }
}

impl SchedulerDriver {
    /// Create a driver with a TCP messenger built from `config`.
    ///
    /// The master address is parsed eagerly; `user` and `hostname` in
    /// the framework info are defaulted from the environment when
    /// empty. The initial status is `NotStarted`.
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        framework: FrameworkInfo,
        master: &str,
        config: DriverConfig,
    ) -> DriverResult<Self> {
        let messenger = Arc::new(TcpMessenger::new("scheduler(1)", config));
        Self::with_messenger(scheduler, framework, master, messenger)
    }

    /// Create a driver over an existing messenger
    pub fn with_messenger(
        scheduler: Arc<dyn Scheduler>,
        mut framework: FrameworkInfo,
        master: &str,
        messenger: Arc<dyn Messenger>,
    ) -> DriverResult<Self> {
        let master = parse_master(master)?;

        if framework.user.is_empty() {
            framework.user = default_user();
        }
        if framework.hostname.is_empty() {
            framework.hostname = default_hostname();
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        Ok(SchedulerDriver {
            inner: Arc::new(DriverInner {
                scheduler,
                framework: Mutex::new(framework),
                master: Mutex::new(master),
                messenger,
                lifecycle: Mutex::new(Lifecycle {
                    status: Status::NotStarted,
                    connected: false,
                    stopped: true,
                }),
                stop_tx,
                stop_rx,
            }),
        })
    }

    /// Current lifecycle status
    pub fn status(&self) -> Status {
        self.inner.lifecycle.lock().status
    }

    /// Whether a registration has been acknowledged by the master
    pub fn connected(&self) -> bool {
        self.inner.lifecycle.lock().connected
    }

    /// Whether the driver is stopped (true before start and after
    /// stop/abort)
    pub fn stopped(&self) -> bool {
        self.inner.lifecycle.lock().stopped
    }

    /// The master the driver currently sends to
    pub fn master(&self) -> ProcessAddress {
        self.inner.master.lock().clone()
    }

    /// The framework id assigned by the master, once registered
    pub fn framework_id(&self) -> Option<FrameworkId> {
        self.inner.framework.lock().id.clone()
    }

    /// A copy of the framework info, after defaulting
    pub fn framework_info(&self) -> FrameworkInfo {
        self.inner.framework.lock().clone()
    }

    fn assigned_framework_id(&self) -> FrameworkId {
        self.inner
            .framework
            .lock()
            .id
            .clone()
            .unwrap_or_else(|| FrameworkId(String::new()))
    }

    fn registration_message(&self) -> SchedulerMessage {
        let framework = self.inner.framework.lock().clone();
        if framework.id.is_some() {
            SchedulerMessage::ReregisterFramework {
                framework,
                failover: false,
            }
        } else {
            SchedulerMessage::RegisterFramework { framework }
        }
    }

    /// Start the driver.
    ///
    /// Idempotent once started: returns the current status unchanged.
    /// A messenger start failure rolls back to `NotStarted`, returned
    /// as the result. A registration send failure is logged but leaves
    /// the driver `Running`; registration is retried through later
    /// traffic.
    pub async fn start(&self) -> Status {
        // Claim the transition while holding the guard, so a concurrent
        // start cannot pass the precondition as well.
        {
            let mut state = self.inner.lifecycle.lock();
            if state.status != Status::NotStarted {
                return state.status;
            }
            state.status = Status::Running;
            state.stopped = false;
        }

        if let Err(e) = self.inner.messenger.start().await {
            error!("Failed to start messenger: {}", e);
            self.inner.messenger.stop().await;
            let mut state = self.inner.lifecycle.lock();
            state.status = Status::NotStarted;
            state.stopped = true;
            return Status::NotStarted;
        }

        if let Some(events) = self.inner.messenger.take_events() {
            let driver = self.clone();
            let stop_rx = self.inner.stop_rx.clone();
            tokio::spawn(async move {
                driver.dispatch_loop(events, stop_rx).await;
            });
        }

        info!("Scheduler driver started at {}", self.inner.messenger.upid());

        let master = self.master();
        let message = self.registration_message();
        if let Err(e) = self.inner.messenger.send(&master, message).await {
            // Non-fatal: the master will learn about us through
            // subsequent traffic, or the caller re-points the driver.
            warn!("Failed to send registration to {}: {}", master, e);
        }

        Status::Running
    }

    /// Stop the driver.
    ///
    /// With `failover=false` the framework is explicitly unregistered
    /// so the master tears down its tasks; with `failover=true` the
    /// registration is left intact for a successor scheduler. Returns
    /// `NotStarted` unchanged if the driver never ran.
    pub async fn stop(&self, failover: bool) -> Status {
        // Claim the transition while holding the guard; a concurrent
        // stop or abort then observes the terminal status and returns
        // it unchanged.
        let connected = {
            let mut state = self.inner.lifecycle.lock();
            if state.status != Status::Running {
                return state.status;
            }
            state.status = Status::Stopped;
            state.stopped = true;
            state.connected
        };

        if connected && !failover {
            let master = self.master();
            let message = SchedulerMessage::UnregisterFramework {
                framework_id: self.assigned_framework_id(),
            };
            if let Err(e) = self.inner.messenger.send(&master, message).await {
                warn!("Failed to unregister from {}: {}", master, e);
            }
        }

        self.inner.messenger.stop().await;
        let _ = self.inner.stop_tx.send(true);
        info!("Scheduler driver stopped");
        Status::Stopped
    }

    /// Abort the driver, signalling abnormal termination to `join`.
    ///
    /// Distinct from `stop`: the connection is dropped without
    /// unregistering, and the terminal status is `Aborted`.
    pub async fn abort(&self) -> Status {
        {
            let mut state = self.inner.lifecycle.lock();
            if state.status != Status::Running {
                return state.status;
            }
            state.connected = false;
            state.status = Status::Aborted;
            state.stopped = true;
        }

        self.inner.messenger.stop().await;
        let _ = self.inner.stop_tx.send(true);
        warn!("Scheduler driver aborted");
        Status::Aborted
    }

    /// Wait until the driver terminates, then return the final status.
    ///
    /// Returns `NotStarted` immediately if called before `start`.
    /// Suspends on the stop signal, never on the state lock.
    pub async fn join(&self) -> Status {
        {
            let state = self.inner.lifecycle.lock();
            if state.status == Status::NotStarted {
                return Status::NotStarted;
            }
        }

        let mut stop_rx = self.inner.stop_rx.clone();
        while !*stop_rx.borrow() {
            if stop_rx.changed().await.is_err() {
                break;
            }
        }
        self.status()
    }

    /// `start` followed by `join`
    pub async fn run(&self) -> Status {
        let status = self.start().await;
        if status != Status::Running {
            return status;
        }
        self.join().await
    }

    async fn send_task_control(&self, message: SchedulerMessage) -> Status {
        {
            let state = self.inner.lifecycle.lock();
            if state.status != Status::Running {
                return state.status;
            }
        }

        let master = self.master();
        let type_name = message.type_name();
        if let Err(e) = self.inner.messenger.send(&master, message).await {
            // Fire and forget: delivery failure does not halt the driver.
            error!("Failed to send {} to {}: {}", type_name, master, e);
        }
        Status::Running
    }

    /// Launch tasks against an offer.
    ///
    /// An empty `tasks` list declines the offer. Send failures are
    /// logged; the returned status stays `Running`.
    pub async fn launch_tasks(
        &self,
        offer_id: OfferId,
        tasks: Vec<TaskInfo>,
        filters: Filters,
    ) -> Status {
        self.send_task_control(SchedulerMessage::LaunchTasks {
            framework_id: self.assigned_framework_id(),
            offer_id,
            tasks,
            filters,
        })
        .await
    }

    /// Kill a launched task
    pub async fn kill_task(&self, task_id: TaskId) -> Status {
        self.send_task_control(SchedulerMessage::KillTask {
            framework_id: self.assigned_framework_id(),
            task_id,
        })
        .await
    }

    /// Decline an offer without launching anything
    pub async fn decline_offer(&self, offer_id: OfferId, filters: Filters) -> Status {
        self.launch_tasks(offer_id, Vec::new(), filters).await
    }

    /// Remove all previously installed offer filters
    pub async fn revive_offers(&self) -> Status {
        self.send_task_control(SchedulerMessage::ReviveOffers {
            framework_id: self.assigned_framework_id(),
        })
        .await
    }

    /// Request resources from the master outside the offer cycle
    pub async fn request_resources(&self, requests: Vec<Request>) -> Status {
        self.send_task_control(SchedulerMessage::RequestResources {
            framework_id: self.assigned_framework_id(),
            requests,
        })
        .await
    }

    /// Send out-of-band data to an executor
    pub async fn send_framework_message(
        &self,
        executor_id: ExecutorId,
        slave_id: SlaveId,
        data: Vec<u8>,
    ) -> Status {
        self.send_task_control(SchedulerMessage::FrameworkToExecutor {
            framework_id: self.assigned_framework_id(),
            executor_id,
            slave_id,
            data,
        })
        .await
    }

    async fn dispatch_loop(
        &self,
        mut events: mpsc::Receiver<Envelope>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        loop {
            let envelope = tokio::select! {
                _ = stop_rx.changed() => break,
                envelope = events.recv() => match envelope {
                    Some(envelope) => envelope,
                    None => break,
                },
            };
            self.dispatch(envelope).await;
        }
        debug!("Dispatch loop exited");
    }

    /// Dispatch one inbound protocol event to the framework callbacks.
    ///
    /// A message the dispatch point does not expect is logged and
    /// dropped; one bad message must not stop future dispatch.
    async fn dispatch(&self, envelope: Envelope) {
        let scheduler = self.inner.scheduler.clone();
        match envelope.message {
            SchedulerMessage::FrameworkRegistered {
                framework_id,
                master,
            } => {
                {
                    let mut state = self.inner.lifecycle.lock();
                    state.connected = true;
                }
                {
                    let mut framework = self.inner.framework.lock();
                    if framework.id.is_none() {
                        framework.id = Some(framework_id.clone());
                    }
                }
                info!("Framework registered with id {:?}", framework_id);
                scheduler.registered(self, &framework_id, &master).await;
            }
            SchedulerMessage::FrameworkReregistered {
                framework_id,
                master,
            } => {
                {
                    let mut state = self.inner.lifecycle.lock();
                    state.connected = true;
                }
                {
                    let mut framework = self.inner.framework.lock();
                    if framework.id.is_none() {
                        framework.id = Some(framework_id);
                    }
                }
                info!("Framework re-registered");
                scheduler.reregistered(self, &master).await;
            }
            SchedulerMessage::ResourceOffers { offers } => {
                debug!("Received {} resource offers", offers.len());
                scheduler.resource_offers(self, offers).await;
            }
            SchedulerMessage::RescindOffer { offer_id } => {
                scheduler.offer_rescinded(self, &offer_id).await;
            }
            SchedulerMessage::StatusUpdate { status } => {
                scheduler.status_update(self, status).await;
            }
            SchedulerMessage::ExecutorToFramework {
                executor_id,
                slave_id,
                data,
            } => {
                scheduler
                    .framework_message(self, &executor_id, &slave_id, &data)
                    .await;
            }
            SchedulerMessage::LostSlave { slave_id } => {
                scheduler.slave_lost(self, &slave_id).await;
            }
            SchedulerMessage::ExecutorLost {
                executor_id,
                slave_id,
                status,
            } => {
                scheduler
                    .executor_lost(self, &executor_id, &slave_id, status)
                    .await;
            }
            SchedulerMessage::FrameworkError { message } => {
                error!("Framework error from master: {}", message);
                scheduler.error(self, &message).await;
            }
            other => {
                warn!(
                    "Dropping unexpected {} from {}",
                    other.type_name(),
                    envelope.from
                );
            }
        }
    }

    /// Track the master through a detector.
    ///
    /// Registers a children watcher that re-resolves the leader on
    /// every election change: a newly resolved leader replaces the
    /// master address and triggers a re-registration; an empty election
    /// root marks the framework disconnected. The detector's lifecycle
    /// remains the caller's responsibility.
    pub async fn track_master(
        &self,
        detector: &MasterDetector,
        election_path: &str,
    ) -> DriverResult<()> {
        // One resolver task consumes fire notifications in order, so
        // two rapid election changes cannot resolve out of order and
        // leave the driver pointed at a stale leader.
        let (fire_tx, mut fire_rx) = mpsc::channel::<()>(1);
        let driver = self.clone();
        let resolver = detector.clone();
        let path = election_path.to_string();
        tokio::spawn(async move {
            while fire_rx.recv().await.is_some() {
                match resolver.detect_master(&path).await {
                    Ok(Some(leader)) => driver.master_changed(leader.address).await,
                    Ok(None) => driver.master_lost().await,
                    Err(e) => error!("Leader resolution failed: {}", e),
                }
            }
        });
        detector.set_children_watcher(children_watcher_fn(move |_detector, _fired| {
            // Coalesce bursts; the resolver re-reads the latest
            // election state on each pass anyway.
            let _ = fire_tx.try_send(());
        }));
        detector.watch_children(election_path).await
    }

    async fn master_changed(&self, address: ProcessAddress) {
        {
            let mut master = self.inner.master.lock();
            if *master == address {
                return;
            }
            *master = address.clone();
        }
        let was_connected = {
            let mut state = self.inner.lifecycle.lock();
            let was = state.connected;
            state.connected = false;
            was
        };
        info!("Master changed to {}", address);

        if was_connected {
            self.inner.scheduler.disconnected(self).await;
        }
        if self.status() == Status::Running {
            let message = self.registration_message();
            if let Err(e) = self.inner.messenger.send(&address, message).await {
                warn!("Failed to re-register with {}: {}", address, e);
            }
        }
    }

    async fn master_lost(&self) {
        warn!("No master currently elected");
        let was_connected = {
            let mut state = self.inner.lifecycle.lock();
            let was = state.connected;
            state.connected = false;
            was
        };
        if was_connected {
            self.inner.scheduler.disconnected(self).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::config::DetectorConfig;
    use crate::detector::memory::MemoryConnector;
    use crate::error::DriverError;
    use crate::message::Resource;
    use crate::messenger::MockMessenger;

    struct NullScheduler;
    impl Scheduler for NullScheduler {}

    struct RecordingScheduler {
        registered_tx: mpsc::UnboundedSender<(FrameworkId, MasterInfo)>,
        disconnects: Arc<AtomicUsize>,
    }

    impl RecordingScheduler {
        fn new() -> (
            Arc<Self>,
            mpsc::UnboundedReceiver<(FrameworkId, MasterInfo)>,
            Arc<AtomicUsize>,
        ) {
            let (tx, rx) = mpsc::unbounded_channel();
            let disconnects = Arc::new(AtomicUsize::new(0));
            (
                Arc::new(RecordingScheduler {
                    registered_tx: tx,
                    disconnects: disconnects.clone(),
                }),
                rx,
                disconnects,
            )
        }
    }

    #[async_trait]
    impl Scheduler for RecordingScheduler {
        async fn registered(
            &self,
            _driver: &SchedulerDriver,
            framework_id: &FrameworkId,
            master: &MasterInfo,
        ) {
            let _ = self
                .registered_tx
                .send((framework_id.clone(), master.clone()));
        }

        async fn disconnected(&self, _driver: &SchedulerDriver) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn test_framework() -> FrameworkInfo {
        FrameworkInfo::new("test-user", "test-name")
    }

    fn driver_over(messenger: Arc<MockMessenger>) -> SchedulerDriver {
        SchedulerDriver::with_messenger(
            Arc::new(NullScheduler),
            test_framework(),
            "127.0.0.1:8080",
            messenger,
        )
        .unwrap()
    }

    fn sample_task() -> TaskInfo {
        let mut task = TaskInfo::new(
            "simple-task",
            TaskId("simple-task-1".to_string()),
            SlaveId("slave-1".to_string()),
        );
        task.resources.push(Resource::scalar("mem", 400.0));
        task.command = Some("pwd".to_string());
        task
    }

    #[test]
    fn test_new_fills_defaults() {
        let driver = SchedulerDriver::with_messenger(
            Arc::new(NullScheduler),
            FrameworkInfo::default(),
            "localhost:5050",
            Arc::new(MockMessenger::new()),
        )
        .unwrap();

        let info = driver.framework_info();
        assert!(!info.user.is_empty());
        assert!(!info.hostname.is_empty());
        assert_eq!(driver.master(), "master@localhost:5050".parse().unwrap());
        assert_eq!(driver.status(), Status::NotStarted);
        assert!(driver.stopped());
    }

    #[test]
    fn test_new_respects_overrides() {
        let driver = SchedulerDriver::with_messenger(
            Arc::new(NullScheduler),
            test_framework().with_hostname("local-host"),
            "leader@10.0.0.1:5050",
            Arc::new(MockMessenger::new()),
        )
        .unwrap();

        let info = driver.framework_info();
        assert_eq!(info.user, "test-user");
        assert_eq!(info.hostname, "local-host");
        assert_eq!(driver.master(), "leader@10.0.0.1:5050".parse().unwrap());
    }

    #[test]
    fn test_new_rejects_malformed_master() {
        let result = SchedulerDriver::with_messenger(
            Arc::new(NullScheduler),
            test_framework(),
            "no-port-here",
            Arc::new(MockMessenger::new()),
        );
        assert!(matches!(result, Err(DriverError::MalformedAddress(_))));
    }

    #[tokio::test]
    async fn test_start_ok_sends_registration() {
        let messenger = Arc::new(MockMessenger::new());
        let driver = driver_over(messenger.clone());
        assert!(driver.stopped());

        let status = driver.start().await;
        assert_eq!(status, Status::Running);
        assert!(!driver.stopped());

        let sent = messenger.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.type_name(), "RegisterFramework");
    }

    #[tokio::test]
    async fn test_start_with_assigned_id_reregisters() {
        let messenger = Arc::new(MockMessenger::new());
        let driver = SchedulerDriver::with_messenger(
            Arc::new(NullScheduler),
            test_framework().with_id("fw-1"),
            "127.0.0.1:8080",
            messenger.clone(),
        )
        .unwrap();

        assert_eq!(driver.start().await, Status::Running);
        let sent = messenger.sent_messages();
        assert_eq!(sent[0].1.type_name(), "ReregisterFramework");
    }

    #[tokio::test]
    async fn test_start_twice_returns_running_unchanged() {
        let messenger = Arc::new(MockMessenger::new());
        let driver = driver_over(messenger.clone());

        assert_eq!(driver.start().await, Status::Running);
        assert_eq!(driver.start().await, Status::Running);
        // No second registration was sent.
        assert_eq!(messenger.sent_messages().len(), 1);
    }

    #[tokio::test]
    async fn test_start_with_messenger_failure_rolls_back() {
        let messenger = Arc::new(MockMessenger::failing_start());
        let driver = driver_over(messenger);

        let status = driver.start().await;
        assert_eq!(status, Status::NotStarted);
        assert_eq!(driver.status(), Status::NotStarted);
        assert!(driver.stopped());
    }

    #[tokio::test]
    async fn test_start_with_registration_failure_still_running() {
        let messenger = Arc::new(MockMessenger::new());
        messenger.set_fail_send(true);
        let driver = driver_over(messenger);

        let status = driver.start().await;
        assert_eq!(status, Status::Running);
        assert!(!driver.stopped());
    }

    #[tokio::test]
    async fn test_join_unstarted_returns_immediately() {
        let driver = driver_over(Arc::new(MockMessenger::new()));
        assert_eq!(driver.join().await, Status::NotStarted);
    }

    #[tokio::test]
    async fn test_join_returns_terminal_status() {
        let driver = driver_over(Arc::new(MockMessenger::new()));
        assert_eq!(driver.start().await, Status::Running);

        let joiner = driver.clone();
        let handle = tokio::spawn(async move { joiner.join().await });

        assert_eq!(driver.stop(false).await, Status::Stopped);
        let status = timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        assert_eq!(status, Status::Stopped);
    }

    #[tokio::test]
    async fn test_run_blocks_until_stopped() {
        let driver = driver_over(Arc::new(MockMessenger::new()));

        let runner = driver.clone();
        let handle = tokio::spawn(async move { runner.run().await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(driver.status(), Status::Running);
        assert!(!driver.stopped());

        driver.stop(false).await;
        let status = timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        assert_eq!(status, Status::Stopped);
    }

    #[tokio::test]
    async fn test_stop_unstarted_returns_not_started() {
        let driver = driver_over(Arc::new(MockMessenger::new()));
        assert_eq!(driver.stop(true).await, Status::NotStarted);
        assert!(driver.stopped());
    }

    #[tokio::test]
    async fn test_stop_unregisters_unless_failover() {
        let messenger = Arc::new(MockMessenger::new());
        let driver = driver_over(messenger.clone());
        driver.start().await;
        driver.inner.lifecycle.lock().connected = true;

        assert_eq!(driver.stop(false).await, Status::Stopped);
        let sent = messenger.sent_messages();
        assert_eq!(sent.last().unwrap().1.type_name(), "UnregisterFramework");

        // Terminal: a new start is rejected with the terminal status.
        assert_eq!(driver.start().await, Status::Stopped);
    }

    #[tokio::test]
    async fn test_stop_with_failover_keeps_registration() {
        let messenger = Arc::new(MockMessenger::new());
        let driver = driver_over(messenger.clone());
        driver.start().await;
        driver.inner.lifecycle.lock().connected = true;

        assert_eq!(driver.stop(true).await, Status::Stopped);
        let sent = messenger.sent_messages();
        assert!(sent
            .iter()
            .all(|(_, m)| m.type_name() != "UnregisterFramework"));
    }

    #[tokio::test]
    async fn test_abort_is_distinct_from_stop() {
        let driver = driver_over(Arc::new(MockMessenger::new()));
        driver.start().await;
        driver.inner.lifecycle.lock().connected = true;

        let joiner = driver.clone();
        let handle = tokio::spawn(async move { joiner.join().await });

        assert_eq!(driver.abort().await, Status::Aborted);
        assert!(driver.stopped());
        assert!(!driver.connected());
        assert_eq!(driver.status(), Status::Aborted);

        let status = timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        assert_eq!(status, Status::Aborted);

        // Terminal: a new start is rejected with the terminal status.
        assert_eq!(driver.start().await, Status::Aborted);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_stop_and_abort_serialize() {
        for _ in 0..100 {
            let driver = driver_over(Arc::new(MockMessenger::new()));
            driver.start().await;

            let stopper = driver.clone();
            let aborter = driver.clone();
            let stop = tokio::spawn(async move { stopper.stop(false).await });
            let abort = tokio::spawn(async move { aborter.abort().await });
            let stop_status = stop.await.unwrap();
            let abort_status = abort.await.unwrap();

            // Exactly one call claims the transition; the other returns
            // the already-claimed terminal status, so the two results
            // and the final status always agree.
            assert_eq!(stop_status, abort_status);
            assert_eq!(driver.status(), stop_status);
            assert!(driver.stopped());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_starts_register_once() {
        for _ in 0..100 {
            let messenger = Arc::new(MockMessenger::new());
            let driver = driver_over(messenger.clone());

            let a = driver.clone();
            let b = driver.clone();
            let (ra, rb) = tokio::join!(
                tokio::spawn(async move { a.start().await }),
                tokio::spawn(async move { b.start().await }),
            );
            assert_eq!(ra.unwrap(), Status::Running);
            assert_eq!(rb.unwrap(), Status::Running);
            // Only the claiming start sends a registration.
            assert_eq!(messenger.sent_messages().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_launch_tasks_unstarted() {
        let messenger = Arc::new(MockMessenger::new());
        let driver = driver_over(messenger.clone());

        let status = driver
            .launch_tasks(OfferId("offer-1".to_string()), vec![], Filters::default())
            .await;
        assert_eq!(status, Status::NotStarted);
        assert!(messenger.sent_messages().is_empty());
    }

    #[tokio::test]
    async fn test_launch_tasks_send_error_is_fire_and_forget() {
        let messenger = Arc::new(MockMessenger::new());
        let driver = driver_over(messenger.clone());
        driver.start().await;

        messenger.set_fail_send(true);
        let status = driver
            .launch_tasks(
                OfferId("offer-1".to_string()),
                vec![sample_task()],
                Filters::default(),
            )
            .await;
        assert_eq!(status, Status::Running);
    }

    #[tokio::test]
    async fn test_launch_tasks_sends_message() {
        let messenger = Arc::new(MockMessenger::new());
        let driver = driver_over(messenger.clone());
        driver.start().await;

        let status = driver
            .launch_tasks(
                OfferId("offer-1".to_string()),
                vec![sample_task()],
                Filters::default(),
            )
            .await;
        assert_eq!(status, Status::Running);

        let sent = messenger.sent_messages();
        match &sent.last().unwrap().1 {
            SchedulerMessage::LaunchTasks { offer_id, tasks, .. } => {
                assert_eq!(offer_id.0, "offer-1");
                assert_eq!(tasks.len(), 1);
                assert_eq!(tasks[0].task_id.0, "simple-task-1");
            }
            other => panic!("unexpected message {}", other.type_name()),
        }
    }

    #[tokio::test]
    async fn test_decline_offer_is_empty_launch() {
        let messenger = Arc::new(MockMessenger::new());
        let driver = driver_over(messenger.clone());
        driver.start().await;

        assert_eq!(
            driver
                .decline_offer(OfferId("offer-1".to_string()), Filters::default())
                .await,
            Status::Running
        );
        match &messenger.sent_messages().last().unwrap().1 {
            SchedulerMessage::LaunchTasks { tasks, .. } => assert!(tasks.is_empty()),
            other => panic!("unexpected message {}", other.type_name()),
        }
    }

    #[tokio::test]
    async fn test_kill_task() {
        let messenger = Arc::new(MockMessenger::new());
        let driver = driver_over(messenger.clone());

        assert_eq!(
            driver.kill_task(TaskId("task-1".to_string())).await,
            Status::NotStarted
        );

        driver.start().await;
        assert_eq!(
            driver.kill_task(TaskId("task-1".to_string())).await,
            Status::Running
        );
        assert_eq!(
            messenger.sent_messages().last().unwrap().1.type_name(),
            "KillTask"
        );
    }

    #[tokio::test]
    async fn test_registered_event_flips_connected() {
        let messenger = Arc::new(MockMessenger::new());
        let (scheduler, mut registered_rx, _) = RecordingScheduler::new();
        let driver = SchedulerDriver::with_messenger(
            scheduler,
            test_framework(),
            "127.0.0.1:8080",
            messenger.clone(),
        )
        .unwrap();
        driver.start().await;

        let master_addr: ProcessAddress = "master@127.0.0.1:8080".parse().unwrap();
        messenger
            .deliver(Envelope::new(
                master_addr,
                SchedulerMessage::FrameworkRegistered {
                    framework_id: FrameworkId("some-framework-id".to_string()),
                    master: MasterInfo::new("some-master-id", 123456, 1234),
                },
            ))
            .await;

        let (framework_id, master) = timeout(Duration::from_secs(2), registered_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(framework_id.0, "some-framework-id");
        assert_eq!(master.ip, 123456);
        assert!(driver.connected());
        assert_eq!(driver.framework_id(), Some(framework_id));
        // Exactly once.
        assert!(registered_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_end_to_end_registration() {
        crate::testing::init_logger();
        let master = TcpMessenger::new("master", DriverConfig::default());
        master.start().await.unwrap();
        let mut master_events = master.take_events().unwrap();
        let master_upid = master.upid();

        let (scheduler, mut registered_rx, _) = RecordingScheduler::new();
        let driver = SchedulerDriver::new(
            scheduler,
            test_framework(),
            &master_upid.host_port(),
            DriverConfig::default(),
        )
        .unwrap();
        assert_eq!(driver.start().await, Status::Running);

        // The mock master sees the registration...
        let envelope = timeout(Duration::from_secs(2), master_events.recv())
            .await
            .unwrap()
            .unwrap();
        match &envelope.message {
            SchedulerMessage::RegisterFramework { framework } => {
                assert_eq!(framework.name, "test-name");
            }
            other => panic!("unexpected message {}", other.type_name()),
        }

        // ...and acknowledges it back to the driver's own endpoint.
        master
            .send(
                &envelope.from,
                SchedulerMessage::FrameworkRegistered {
                    framework_id: FrameworkId("fw-123".to_string()),
                    master: MasterInfo::new("some-master-id", 123456, 1234),
                },
            )
            .await
            .unwrap();

        let (framework_id, master_info) = timeout(Duration::from_secs(2), registered_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(framework_id.0, "fw-123");
        assert_eq!(master_info.ip, 123456);
        assert!(driver.connected());
        assert!(registered_rx.try_recv().is_err());

        driver.stop(false).await;
        master.stop().await;
    }

    #[tokio::test]
    async fn test_track_master_follows_leader_changes() {
        crate::testing::init_logger();
        let connector = MemoryConnector::new();
        let config = DetectorConfig::new(vec!["127.0.0.1:2181".to_string()], "/cluster")
            .unwrap()
            .connect_timeout(Duration::from_millis(200));
        let detector = MasterDetector::new(config, Arc::new(connector.clone()));
        detector.connect().await.unwrap();

        let messenger = Arc::new(MockMessenger::new());
        let (scheduler, _registered_rx, disconnects) = RecordingScheduler::new();
        let driver = SchedulerDriver::with_messenger(
            scheduler,
            test_framework(),
            "127.0.0.1:8080",
            messenger.clone(),
        )
        .unwrap();
        driver.start().await;
        driver.inner.lifecycle.lock().connected = true;

        driver.track_master(&detector, "").await.unwrap();

        // A new leader appears: the driver re-points and re-registers.
        connector.set_node("/cluster/node_0000000001", b"leader@10.0.0.1:5050");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(driver.master(), "leader@10.0.0.1:5050".parse().unwrap());
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(
            messenger.sent_messages().last().unwrap().1.type_name(),
            "RegisterFramework"
        );

        // The leader goes away entirely.
        driver.inner.lifecycle.lock().connected = true;
        connector.remove_node("/cluster/node_0000000001");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!driver.connected());
        assert_eq!(disconnects.load(Ordering::SeqCst), 2);

        detector.stop().await;
        driver.stop(true).await;
    }

    #[tokio::test]
    async fn test_track_master_rapid_changes_settle_on_latest() {
        let connector = MemoryConnector::new();
        let config = DetectorConfig::new(vec!["127.0.0.1:2181".to_string()], "/cluster")
            .unwrap()
            .connect_timeout(Duration::from_millis(200));
        let detector = MasterDetector::new(config, Arc::new(connector.clone()));
        detector.connect().await.unwrap();

        let messenger = Arc::new(MockMessenger::new());
        let driver = SchedulerDriver::with_messenger(
            Arc::new(NullScheduler),
            test_framework(),
            "127.0.0.1:8080",
            messenger,
        )
        .unwrap();
        driver.start().await;
        driver.track_master(&detector, "").await.unwrap();

        // A burst of election churn; resolution is serialized, so the
        // driver must end up on the surviving lowest-sequence node.
        connector.set_node("/cluster/node_0000000005", b"leader-e@10.0.0.5:5050");
        connector.set_node("/cluster/node_0000000004", b"leader-d@10.0.0.4:5050");
        connector.set_node("/cluster/node_0000000003", b"leader-c@10.0.0.3:5050");
        connector.remove_node("/cluster/node_0000000003");
        connector.set_node("/cluster/node_0000000002", b"leader-b@10.0.0.2:5050");

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(driver.master(), "leader-b@10.0.0.2:5050".parse().unwrap());

        detector.stop().await;
        driver.stop(true).await;
    }
}

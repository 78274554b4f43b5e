//! Protocol messages exchanged between the scheduler driver and the
//! cluster master.
//!
//! The wire encoding of these types is delegated to the serialization
//! module; everything here is a plain serde data type.

use serde::{Deserialize, Serialize};

use crate::upid::ProcessAddress;

/// Identifier assigned to a framework by the master
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameworkId(pub String);

/// Identifier of a resource offer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OfferId(pub String);

/// Identifier of a task
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

/// Identifier of a slave (worker) node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlaveId(pub String);

/// Identifier of an executor running on a slave
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutorId(pub String);

/// Framework identity supplied at driver construction
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameworkInfo {
    /// OS user the framework's tasks run as; defaulted from the
    /// current process owner when empty
    pub user: String,

    /// Human-readable framework name
    pub name: String,

    /// Pre-assigned framework id, if re-registering
    pub id: Option<FrameworkId>,

    /// Resource role the framework participates as
    pub role: Option<String>,

    /// Host the scheduler runs on; defaulted from the local host
    /// name when empty
    pub hostname: String,

    /// Capabilities advertised to the master
    pub capabilities: Vec<String>,
}

impl FrameworkInfo {
    /// Create a framework info with the given user and name
    pub fn new(user: impl Into<String>, name: impl Into<String>) -> Self {
        FrameworkInfo {
            user: user.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the pre-assigned framework id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(FrameworkId(id.into()));
        self
    }

    /// Set the hostname
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }
}

/// Master identity as announced through the coordination service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterInfo {
    /// Master id, unique per master incarnation
    pub id: String,

    /// Packed IPv4 address of the master
    pub ip: u32,

    /// Port the master listens on
    pub port: u32,
}

impl MasterInfo {
    /// Create a new master info
    pub fn new(id: impl Into<String>, ip: u32, port: u32) -> Self {
        MasterInfo {
            id: id.into(),
            ip,
            port,
        }
    }
}

/// A scalar resource (cpus, mem, disk) attached to offers and tasks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Resource name
    pub name: String,
    /// Scalar quantity
    pub value: f64,
}

impl Resource {
    /// Create a scalar resource
    pub fn scalar(name: impl Into<String>, value: f64) -> Self {
        Resource {
            name: name.into(),
            value,
        }
    }
}

/// A time-bounded resource grant from the master
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    /// Offer identifier
    pub id: OfferId,
    /// Framework the offer is made to
    pub framework_id: FrameworkId,
    /// Slave the resources live on
    pub slave_id: SlaveId,
    /// Hostname of the slave
    pub hostname: String,
    /// Offered resources
    pub resources: Vec<Resource>,
}

/// Description of a task to launch against an offer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    /// Human-readable task name
    pub name: String,
    /// Task identifier, unique within the framework
    pub task_id: TaskId,
    /// Slave to run the task on
    pub slave_id: SlaveId,
    /// Resources consumed by the task
    pub resources: Vec<Resource>,
    /// Shell command to execute
    pub command: Option<String>,
}

impl TaskInfo {
    /// Create a new task description
    pub fn new(name: impl Into<String>, task_id: TaskId, slave_id: SlaveId) -> Self {
        TaskInfo {
            name: name.into(),
            task_id,
            slave_id,
            resources: Vec::new(),
            command: None,
        }
    }
}

/// Current state of a launched task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    /// Task is queued for launch
    Staging,
    /// Task is starting on the slave
    Starting,
    /// Task is running
    Running,
    /// Task finished successfully
    Finished,
    /// Task failed
    Failed,
    /// Task was killed
    Killed,
    /// Task was lost (slave failure etc.)
    Lost,
}

/// Status update for a launched task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    /// Task the update refers to
    pub task_id: TaskId,
    /// New task state
    pub state: TaskState,
    /// Optional diagnostic message
    pub message: Option<String>,
    /// Slave the task runs on
    pub slave_id: Option<SlaveId>,
}

/// Offer filters attached to launch/decline operations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Filters {
    /// Seconds the declined resources are withheld from this framework
    pub refuse_seconds: Option<f64>,
}

/// Resource request sent to the master outside the offer cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Preferred slave, if any
    pub slave_id: Option<SlaveId>,
    /// Requested resources
    pub resources: Vec<Resource>,
}

/// Protocol messages routed between scheduler and master.
///
/// A single enum covers both directions; the dispatch point matches on
/// the variant, so an unexpected inbound variant is simply logged and
/// dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SchedulerMessage {
    /// Scheduler -> master: initial framework registration
    RegisterFramework {
        /// Framework identity
        framework: FrameworkInfo,
    },
    /// Scheduler -> master: re-registration after failover
    ReregisterFramework {
        /// Framework identity, carrying the assigned id
        framework: FrameworkInfo,
        /// Whether this is a scheduler failover
        failover: bool,
    },
    /// Scheduler -> master: clean unregistration
    UnregisterFramework {
        /// Assigned framework id
        framework_id: FrameworkId,
    },
    /// Scheduler -> master: launch tasks against an offer
    LaunchTasks {
        /// Assigned framework id
        framework_id: FrameworkId,
        /// Offer the tasks consume
        offer_id: OfferId,
        /// Tasks to launch; empty means the offer is declined
        tasks: Vec<TaskInfo>,
        /// Decline filters
        filters: Filters,
    },
    /// Scheduler -> master: kill a task
    KillTask {
        /// Assigned framework id
        framework_id: FrameworkId,
        /// Task to kill
        task_id: TaskId,
    },
    /// Scheduler -> master: remove all offer filters
    ReviveOffers {
        /// Assigned framework id
        framework_id: FrameworkId,
    },
    /// Scheduler -> master: request resources outside the offer cycle
    RequestResources {
        /// Assigned framework id
        framework_id: FrameworkId,
        /// Requested resources
        requests: Vec<Request>,
    },
    /// Scheduler -> master: data for an executor
    FrameworkToExecutor {
        /// Assigned framework id
        framework_id: FrameworkId,
        /// Target executor
        executor_id: ExecutorId,
        /// Slave the executor runs on
        slave_id: SlaveId,
        /// Opaque payload
        data: Vec<u8>,
    },

    /// Master -> scheduler: registration acknowledged
    FrameworkRegistered {
        /// Assigned framework id
        framework_id: FrameworkId,
        /// Identity of the acknowledging master
        master: MasterInfo,
    },
    /// Master -> scheduler: re-registration acknowledged
    FrameworkReregistered {
        /// Assigned framework id
        framework_id: FrameworkId,
        /// Identity of the acknowledging master
        master: MasterInfo,
    },
    /// Master -> scheduler: resource offers
    ResourceOffers {
        /// Offered resources
        offers: Vec<Offer>,
    },
    /// Master -> scheduler: an offer is no longer valid
    RescindOffer {
        /// Rescinded offer
        offer_id: OfferId,
    },
    /// Master -> scheduler: task status update
    StatusUpdate {
        /// The update
        status: TaskStatus,
    },
    /// Master -> scheduler: data from an executor
    ExecutorToFramework {
        /// Source executor
        executor_id: ExecutorId,
        /// Slave the executor runs on
        slave_id: SlaveId,
        /// Opaque payload
        data: Vec<u8>,
    },
    /// Master -> scheduler: a slave was lost
    LostSlave {
        /// The lost slave
        slave_id: SlaveId,
    },
    /// Master -> scheduler: an executor terminated abnormally
    ExecutorLost {
        /// The lost executor
        executor_id: ExecutorId,
        /// Slave it ran on
        slave_id: SlaveId,
        /// Exit status
        status: i32,
    },
    /// Master -> scheduler: unrecoverable framework error
    FrameworkError {
        /// Error description
        message: String,
    },
}

impl SchedulerMessage {
    /// Logical message type name, used for routing and logging
    pub fn type_name(&self) -> &'static str {
        match self {
            SchedulerMessage::RegisterFramework { .. } => "RegisterFramework",
            SchedulerMessage::ReregisterFramework { .. } => "ReregisterFramework",
            SchedulerMessage::UnregisterFramework { .. } => "UnregisterFramework",
            SchedulerMessage::LaunchTasks { .. } => "LaunchTasks",
            SchedulerMessage::KillTask { .. } => "KillTask",
            SchedulerMessage::ReviveOffers { .. } => "ReviveOffers",
            SchedulerMessage::RequestResources { .. } => "RequestResources",
            SchedulerMessage::FrameworkToExecutor { .. } => "FrameworkToExecutor",
            SchedulerMessage::FrameworkRegistered { .. } => "FrameworkRegistered",
            SchedulerMessage::FrameworkReregistered { .. } => "FrameworkReregistered",
            SchedulerMessage::ResourceOffers { .. } => "ResourceOffers",
            SchedulerMessage::RescindOffer { .. } => "RescindOffer",
            SchedulerMessage::StatusUpdate { .. } => "StatusUpdate",
            SchedulerMessage::ExecutorToFramework { .. } => "ExecutorToFramework",
            SchedulerMessage::LostSlave { .. } => "LostSlave",
            SchedulerMessage::ExecutorLost { .. } => "ExecutorLost",
            SchedulerMessage::FrameworkError { .. } => "FrameworkError",
        }
    }
}

/// Envelope carrying a protocol message and its sender address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Address of the sending process
    pub from: ProcessAddress,
    /// The message itself
    pub message: SchedulerMessage,
}

impl Envelope {
    /// Wrap a message with its sender address
    pub fn new(from: ProcessAddress, message: SchedulerMessage) -> Self {
        Envelope { from, message }
    }
}

//! Cluster Scheduler Driver
//!
//! This crate provides the client side of a cluster scheduling protocol:
//! a [`SchedulerDriver`] that registers a framework with the elected
//! cluster master, dispatches protocol events to [`Scheduler`] callbacks
//! and exposes task-control operations, plus a [`MasterDetector`] that
//! follows master elections through a coordination service.

#![deny(rust_2018_idioms, nonstandard_style, future_incompatible)]
#![warn(missing_docs)]

pub mod config;
pub mod detector;
pub mod driver;
pub mod error;
pub mod message;
pub mod messenger;
pub mod serialization;
pub mod upid;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{DetectorConfig, DriverConfig};
pub use detector::{
    children_watcher_fn, error_watcher_fn, ChildrenWatcher, Connector, ErrorWatcher, Leader,
    MasterDetector, SessionEvent, SessionState, WatchEvent,
};
pub use driver::{Scheduler, SchedulerDriver, Status};
pub use error::{DriverError, DriverResult};
pub use message::{
    Envelope, ExecutorId, Filters, FrameworkId, FrameworkInfo, MasterInfo, Offer, OfferId,
    Request, Resource, SchedulerMessage, SlaveId, TaskId, TaskInfo, TaskState, TaskStatus,
};
pub use messenger::{Messenger, TcpMessenger};
pub use serialization::{SerializationFormat, Serializer};
pub use upid::ProcessAddress;

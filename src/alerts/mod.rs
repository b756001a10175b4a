//! Alert scheduling core.
//!
//! - [`expander`] turns a schedule into trigger instants
//! - [`identity`] maps instants to platform-safe identifiers
//! - [`delivery`] registers instances through the alarm / notification /
//!   in-process timer tiers
//! - [`reconciler`] applies schedule mutations as cancel-then-recreate
//! - [`actions`] decides what a user response does to an instance

pub mod actions;
pub mod browser;
pub mod channel;
pub mod delivery;
pub mod expander;
pub mod identity;
pub mod instance;
pub mod mock;
pub mod reconciler;

pub use actions::Resolution;
pub use browser::FiredAlert;
pub use channel::{
    AlarmChannel, AlarmPermission, AlarmRequest, AlertAction, AlertChannelCapabilities,
    AlertChannels, AlertExtra, ChannelError, NotificationChannel, NotificationRequest,
    PendingAlert,
};
pub use delivery::{DeliveryChain, DeliveryIssue};
pub use expander::{ExpansionWindow, Occurrence, expand};
pub use instance::{
    AlertInstance, AlertKind, DeliveryChannel, InstanceStatus, NotificationRecord, RecordKind,
    RecordStatus,
};
pub use reconciler::{Reconciler, ScheduleOutcome, ScheduleReport};

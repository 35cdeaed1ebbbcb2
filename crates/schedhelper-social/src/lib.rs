#![warn(missing_docs)]

//! Schedule Helper social subsystem: push subscriptions, friend graph, name
//! index, profile rows, scoped profile reads and the notification fan-out
//! behind them.

pub mod cli;
pub mod config;
pub mod error;
pub mod fanout;
pub mod friends;
pub mod name_index;
pub mod notification;
pub mod profile;
pub mod push;
pub mod service;
pub mod subscriptions;
pub mod view;

pub use config::HelperConfig;
pub use error::{Result, ServiceError};
pub use fanout::{
    Audience, AudienceKind, AudienceMember, DeliveryResult, FanoutConfig, FanoutEngine,
    FanoutEvent, FanoutSummary, IndividualNotification,
};
pub use friends::FriendGraph;
pub use name_index::{NameIndex, NameMatch};
pub use notification::{Notification, NotificationType};
pub use profile::{
    AcademicPrograms, AcademicProgramsUpdate, Preferences, ProfileStore, ScoreWeighting, SetChange,
    TimeRange,
};
pub use push::{HttpPushRelay, NoopPushSender, PushError, PushSender};
pub use service::{DeletionReport, ProfileUpdate, SocialService};
pub use subscriptions::{PushSubscription, SubscriptionKeys, SubscriptionRegistry};
pub use view::{FriendRequestView, ProfileReader, ProfileScope, ProfileView};

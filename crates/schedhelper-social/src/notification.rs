//! Notification payloads pushed to client devices.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ServiceError;

/// Kind of state change a notification announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationType {
    /// A friend changed their profile.
    FriendProfileUpdated,
    /// A user with a pending request changed their profile.
    FriendRequestProfileUpdated,
    /// The receiver accepted the sender's friend request.
    FriendRequestAccepted,
    /// The friendship was removed.
    FriendRemoved,
    /// A new friend request arrived.
    FriendRequestReceived,
    /// A pending friend request was withdrawn or declined.
    FriendRequestRemoved,
    /// The user's own profile changed on another device.
    SelfProfileUpdated,
    /// The user's own account was deleted.
    SelfProfileDeleted,
}

impl NotificationType {
    /// Every notification type.
    pub const ALL: [NotificationType; 8] = [
        NotificationType::FriendProfileUpdated,
        NotificationType::FriendRequestProfileUpdated,
        NotificationType::FriendRequestAccepted,
        NotificationType::FriendRemoved,
        NotificationType::FriendRequestReceived,
        NotificationType::FriendRequestRemoved,
        NotificationType::SelfProfileUpdated,
        NotificationType::SelfProfileDeleted,
    ];

    /// Wire name of the type.
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationType::FriendProfileUpdated => "FriendProfileUpdated",
            NotificationType::FriendRequestProfileUpdated => "FriendRequestProfileUpdated",
            NotificationType::FriendRequestAccepted => "FriendRequestAccepted",
            NotificationType::FriendRemoved => "FriendRemoved",
            NotificationType::FriendRequestReceived => "FriendRequestReceived",
            NotificationType::FriendRequestRemoved => "FriendRequestRemoved",
            NotificationType::SelfProfileUpdated => "SelfProfileUpdated",
            NotificationType::SelfProfileDeleted => "SelfProfileDeleted",
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationType {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NotificationType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ServiceError::invalid(format!("unknown notification type: {}", s)))
    }
}

/// A notification as delivered to a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// What happened.
    pub notification_type: NotificationType,
    /// Type-specific payload.
    pub data: Value,
}

impl Notification {
    /// Creates a notification with an arbitrary payload.
    pub fn new(notification_type: NotificationType, data: Value) -> Self {
        Self {
            notification_type,
            data,
        }
    }

    /// A notification whose payload only names the acting user.
    pub fn about_user(notification_type: NotificationType, user_id: &str) -> Self {
        Self::new(notification_type, json!({ "userId": user_id }))
    }

    /// `SelfProfileUpdated` listing the updated profile items.
    pub fn self_profile_updated(items: &[String]) -> Self {
        Self::new(NotificationType::SelfProfileUpdated, json!({ "items": items }))
    }

    /// `FriendRequestRemoved` as seen by the receiver. `direction` is the
    /// receiver's side of the removed request (`incoming` or `outgoing`).
    pub fn friend_request_removed(user_id: &str, direction: &str) -> Self {
        Self::new(
            NotificationType::FriendRequestRemoved,
            json!({ "type": direction, "userId": user_id }),
        )
    }
}

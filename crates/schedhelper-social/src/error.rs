//! Error types for the social layer.

use schedhelper_store::StoreError;
use thiserror::Error;

/// Errors returned by the social use cases.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The user has no rows in the table.
    #[error("user not found: {user_id}")]
    UserNotFound {
        /// Requested user id.
        user_id: String,
    },

    /// The request is malformed or violates a precondition.
    #[error("invalid request: {reason}")]
    InvalidRequest {
        /// What is wrong with the request.
        reason: String,
    },

    /// No pending request from `from` to `to` exists.
    #[error("no friend request from {from} to {to}")]
    FriendRequestMissing {
        /// Request sender.
        from: String,
        /// Request receiver.
        to: String,
    },

    /// The two users are already friends.
    #[error("{user_id} and {friend_id} are already friends")]
    AlreadyFriends {
        /// Acting user.
        user_id: String,
        /// Other user.
        friend_id: String,
    },

    /// A paired edge write failed twice; one side may be missing its mirror row.
    #[error("edge between {a} and {b} may be half-applied")]
    EdgeInconsistent {
        /// One endpoint of the edge.
        a: String,
        /// The other endpoint.
        b: String,
        /// Failure of the re-issued write.
        #[source]
        source: StoreError,
    },

    /// Configuration is invalid or could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ServiceError {
    /// Shorthand for [`ServiceError::InvalidRequest`].
    pub fn invalid(reason: impl Into<String>) -> Self {
        ServiceError::InvalidRequest {
            reason: reason.into(),
        }
    }
}

/// Result alias for social operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

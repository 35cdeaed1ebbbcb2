//! Partition/sort key layout of the single application table.
//!
//! Every entity lives under a `(pk, sk)` pair:
//!
//! | pk                     | sk                          | row                      |
//! |------------------------|-----------------------------|--------------------------|
//! | `u#<userId>`           | `info#personal`             | profile + subscriptions  |
//! | `u#<userId>`           | `info#preferences`          | packed preferences       |
//! | `u#<userId>`           | `info#coursesTaken`         | set of course records    |
//! | `u#<userId>`           | `info#interestedSections`   | section -> expiration    |
//! | `u#<userId>`           | `info#academicPrograms`     | majors, minors, emphases |
//! | `u#<userId>`           | `friend#cur#<friendId>`     | accepted friendship      |
//! | `u#<userId>`           | `friend#req#in#<friendId>`  | pending incoming request |
//! | `u#<userId>`           | `friend#req#out#<friendId>` | pending outgoing request |
//! | `name-index#<LETTER>`  | `<display name>`            | users sharing that name  |

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Partition key prefix for user roots.
pub const USER_PREFIX: &str = "u#";
/// Partition key prefix for name index buckets.
pub const NAME_INDEX_PREFIX: &str = "name-index#";

/// Sort key of the personal info row.
pub const PERSONAL_SK: &str = "info#personal";
/// Sort key of the preferences row.
pub const PREFERENCES_SK: &str = "info#preferences";
/// Sort key of the courses-taken row.
pub const COURSES_TAKEN_SK: &str = "info#coursesTaken";
/// Sort key of the interested-sections row.
pub const INTERESTED_SECTIONS_SK: &str = "info#interestedSections";
/// Sort key of the academic-programs row.
pub const ACADEMIC_PROGRAMS_SK: &str = "info#academicPrograms";

/// Sort key prefix shared by every friend and friend-request row.
pub const FRIEND_PREFIX: &str = "friend#";
/// Sort key prefix of accepted friendships.
pub const FRIEND_CURRENT_PREFIX: &str = "friend#cur#";
/// Sort key prefix of incoming friend requests.
pub const FRIEND_REQUEST_IN_PREFIX: &str = "friend#req#in#";
/// Sort key prefix of outgoing friend requests.
pub const FRIEND_REQUEST_OUT_PREFIX: &str = "friend#req#out#";

/// Full address of a row in the table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemKey {
    /// Partition key.
    pub pk: String,
    /// Sort key.
    pub sk: String,
}

impl ItemKey {
    /// Creates a key from its two parts.
    pub fn new(pk: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            sk: sk.into(),
        }
    }

    /// Key of a user's personal info row.
    pub fn personal(user_id: &str) -> Self {
        Self::new(user_key(user_id), PERSONAL_SK)
    }

    /// Key of the friendship row `owner -> friend`.
    pub fn friend(owner_id: &str, friend_id: &str) -> Self {
        Self::new(user_key(owner_id), friend_current_key(friend_id))
    }

    /// Key of the friend request row held by `owner` about `other`.
    pub fn friend_request(owner_id: &str, direction: RequestDirection, other_id: &str) -> Self {
        Self::new(user_key(owner_id), friend_request_key(direction, other_id))
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.pk, self.sk)
    }
}

/// Direction of a pending friend request, from the row owner's view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestDirection {
    /// The row owner received the request.
    Incoming,
    /// The row owner sent the request.
    Outgoing,
}

impl RequestDirection {
    /// Sort key prefix for this direction.
    pub fn prefix(self) -> &'static str {
        match self {
            RequestDirection::Incoming => FRIEND_REQUEST_IN_PREFIX,
            RequestDirection::Outgoing => FRIEND_REQUEST_OUT_PREFIX,
        }
    }

    /// The direction of the mirror row held by the other user.
    pub fn reverse(self) -> Self {
        match self {
            RequestDirection::Incoming => RequestDirection::Outgoing,
            RequestDirection::Outgoing => RequestDirection::Incoming,
        }
    }
}

/// Classification of a sort key found under a user partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortKeyKind<'a> {
    /// `info#personal`
    Personal,
    /// `info#preferences`
    Preferences,
    /// `info#coursesTaken`
    CoursesTaken,
    /// `info#interestedSections`
    InterestedSections,
    /// `info#academicPrograms`
    AcademicPrograms,
    /// `friend#cur#<id>`
    Friend(&'a str),
    /// `friend#req#in#<id>` / `friend#req#out#<id>`
    Request(RequestDirection, &'a str),
    /// Anything else.
    Other,
}

/// Partition key of a user root.
pub fn user_key(user_id: &str) -> String {
    format!("{}{}", USER_PREFIX, user_id)
}

/// Extracts the user id from a user partition key.
pub fn user_id_from_key(pk: &str) -> Option<&str> {
    pk.strip_prefix(USER_PREFIX).filter(|id| !id.is_empty())
}

/// Sort key of an accepted friendship with `user_id`.
pub fn friend_current_key(user_id: &str) -> String {
    format!("{}{}", FRIEND_CURRENT_PREFIX, user_id)
}

/// Sort key of a pending friend request with `user_id`.
pub fn friend_request_key(direction: RequestDirection, user_id: &str) -> String {
    format!("{}{}", direction.prefix(), user_id)
}

/// Partition key of the name index bucket for `letter`.
///
/// The bucket is the first character of the uppercased letter, so letters
/// whose uppercase form expands (`ß` -> `SS`) still get a one-letter bucket.
pub fn name_index_key(letter: char) -> String {
    let bucket = letter.to_uppercase().next().unwrap_or(letter);
    format!("{}{}", NAME_INDEX_PREFIX, bucket)
}

/// Partition key of the bucket a display name belongs to.
pub fn name_index_bucket(name: &str) -> Option<String> {
    name.chars().next().map(name_index_key)
}

/// Strips `prefix` from a sort key, rejecting an empty remainder.
pub fn strip_sort_prefix<'a>(sk: &'a str, prefix: &str) -> Option<&'a str> {
    sk.strip_prefix(prefix).filter(|rest| !rest.is_empty())
}

/// Classifies a sort key of a user partition.
pub fn classify_sort_key(sk: &str) -> SortKeyKind<'_> {
    match sk {
        PERSONAL_SK => SortKeyKind::Personal,
        PREFERENCES_SK => SortKeyKind::Preferences,
        COURSES_TAKEN_SK => SortKeyKind::CoursesTaken,
        INTERESTED_SECTIONS_SK => SortKeyKind::InterestedSections,
        ACADEMIC_PROGRAMS_SK => SortKeyKind::AcademicPrograms,
        _ => {
            if let Some(id) = strip_sort_prefix(sk, FRIEND_CURRENT_PREFIX) {
                SortKeyKind::Friend(id)
            } else if let Some(id) = strip_sort_prefix(sk, FRIEND_REQUEST_IN_PREFIX) {
                SortKeyKind::Request(RequestDirection::Incoming, id)
            } else if let Some(id) = strip_sort_prefix(sk, FRIEND_REQUEST_OUT_PREFIX) {
                SortKeyKind::Request(RequestDirection::Outgoing, id)
            } else {
                SortKeyKind::Other
            }
        }
    }
}

/// Validates a user id before it is embedded in a key.
pub fn validate_user_id(user_id: &str) -> Result<()> {
    if user_id.is_empty() {
        return Err(StoreError::InvalidField {
            field: "user_id",
            reason: "must not be empty".to_string(),
        });
    }
    if user_id.chars().any(char::is_whitespace) {
        return Err(StoreError::InvalidField {
            field: "user_id",
            reason: "must not contain whitespace".to_string(),
        });
    }
    Ok(())
}

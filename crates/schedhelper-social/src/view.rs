//! Scoped profile reads.
//!
//! What a viewer sees of a profile depends on who they are:
//!
//! | scope     | viewer          | contents                                                   |
//! |-----------|-----------------|------------------------------------------------------------|
//! | `full`    | the user        | everything, friends as `friend` views, requests as limited |
//! | `friend`  | accepted friend | personal (no email), courses, interested, programs         |
//! | `limited` | anyone else     | id, name and photo                                         |

use std::fmt;

use chrono::{DateTime, Utc};
use schedhelper_store::{CourseTaken, RequestDirection};
use serde::Serialize;
use tracing::warn;

use crate::error::{Result, ServiceError};
use crate::friends::FriendGraph;
use crate::profile::{AcademicPrograms, InterestedEntry, Preferences, ProfileStore};

/// How much of a profile a viewer may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileScope {
    /// The user looking at their own profile.
    Full,
    /// An accepted friend.
    Friend,
    /// Anyone else.
    Limited,
}

impl fmt::Display for ProfileScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProfileScope::Full => "full",
            ProfileScope::Friend => "friend",
            ProfileScope::Limited => "limited",
        };
        f.write_str(name)
    }
}

/// A pending request as listed in the owner's full profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequestView {
    /// The other user.
    pub id: String,
    /// Their display name.
    pub name: String,
    /// Their photo.
    pub photo_url: String,
    /// Whether the owner received or sent the request.
    #[serde(rename = "type")]
    pub direction: RequestDirection,
}

/// A profile projected to a [`ProfileScope`]. Parts outside the scope are `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileView {
    /// Profile owner.
    pub id: String,
    /// Scope the view was built for.
    pub scope: ProfileScope,
    /// Display name.
    pub name: String,
    /// Photo URL.
    pub photo_url: String,
    /// Email, owner only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Preferences, owner only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferences: Option<Preferences>,
    /// Courses taken.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub courses_taken: Option<Vec<CourseTaken>>,
    /// Interested sections that have not expired.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interested_sections: Option<Vec<InterestedEntry>>,
    /// Majors, minors and emphases.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub academic_programs: Option<AcademicPrograms>,
    /// Friends, each as a `friend` view. Owner only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub friends: Option<Vec<ProfileView>>,
    /// Pending requests in both directions. Owner only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub friend_requests: Option<Vec<FriendRequestView>>,
}

/// Builds [`ProfileView`]s from the profile rows and the friend graph.
#[derive(Clone)]
pub struct ProfileReader {
    profiles: ProfileStore,
    graph: FriendGraph,
}

impl ProfileReader {
    /// Creates a reader.
    pub fn new(profiles: ProfileStore, graph: FriendGraph) -> Self {
        Self { profiles, graph }
    }

    /// Scope `viewer_id` gets on the profile of `target_id`.
    pub async fn scope_for(&self, viewer_id: &str, target_id: &str) -> Result<ProfileScope> {
        if viewer_id == target_id {
            return Ok(ProfileScope::Full);
        }
        if self.graph.are_friends(viewer_id, target_id).await? {
            Ok(ProfileScope::Friend)
        } else {
            Ok(ProfileScope::Limited)
        }
    }

    /// Reads the profile of `user_id` in `scope`. Interested sections are
    /// filtered against `now`.
    pub async fn read(
        &self,
        user_id: &str,
        scope: ProfileScope,
        now: DateTime<Utc>,
    ) -> Result<ProfileView> {
        let mut view = self.read_shared(user_id, scope, now).await?;
        if scope != ProfileScope::Full {
            return Ok(view);
        }

        view.preferences = Some(self.profiles.get_preferences(user_id).await?);

        let mut friends = Vec::new();
        for friend_id in self.graph.list_friend_ids(user_id).await? {
            match self.read_shared(&friend_id, ProfileScope::Friend, now).await {
                Ok(friend) => friends.push(friend),
                Err(ServiceError::UserNotFound { .. }) => {
                    warn!(user_id, friend_id = %friend_id, "friend row without a profile");
                }
                Err(e) => return Err(e),
            }
        }
        view.friends = Some(friends);

        let mut requests = Vec::new();
        let incoming = self.graph.list_incoming_requests(user_id).await?;
        let outgoing = self.graph.list_outgoing_requests(user_id).await?;
        let pending = incoming
            .into_iter()
            .map(|id| (id, RequestDirection::Incoming))
            .chain(outgoing.into_iter().map(|id| (id, RequestDirection::Outgoing)));
        for (other_id, direction) in pending {
            match self.profiles.get_personal(&other_id).await {
                Ok(personal) => requests.push(FriendRequestView {
                    id: other_id,
                    name: personal.name,
                    photo_url: personal.photo_url,
                    direction,
                }),
                Err(ServiceError::UserNotFound { .. }) => {
                    warn!(user_id, other_id = %other_id, "request row without a profile");
                }
                Err(e) => return Err(e),
            }
        }
        view.friend_requests = Some(requests);
        Ok(view)
    }

    // Everything but the owner-only parts.
    async fn read_shared(
        &self,
        user_id: &str,
        scope: ProfileScope,
        now: DateTime<Utc>,
    ) -> Result<ProfileView> {
        let personal = self.profiles.get_personal(user_id).await?;
        let mut view = ProfileView {
            id: user_id.to_string(),
            scope,
            name: personal.name,
            photo_url: personal.photo_url,
            email: (scope == ProfileScope::Full).then_some(personal.email),
            preferences: None,
            courses_taken: None,
            interested_sections: None,
            academic_programs: None,
            friends: None,
            friend_requests: None,
        };
        if scope == ProfileScope::Limited {
            return Ok(view);
        }
        view.courses_taken = Some(self.profiles.list_courses_taken(user_id).await?);
        view.interested_sections =
            Some(self.profiles.current_interested_sections(user_id, now).await?);
        view.academic_programs = Some(self.profiles.get_academic_programs(user_id).await?);
        Ok(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use schedhelper_store::{
        AttrValue, ItemKey, KvBackend, MemoryBackend, RecordStore, Row, StoreConfig,
    };
    use std::sync::Arc;

    async fn reader(users: &[&str]) -> ProfileReader {
        let backend = Arc::new(MemoryBackend::new());
        for user in users {
            backend
                .put_item(
                    Row::new(ItemKey::personal(user))
                        .with_attr("name", AttrValue::S(user.to_uppercase()))
                        .with_attr("email", AttrValue::S(format!("{}@scu.edu", user)))
                        .with_attr("photoUrl", AttrValue::S(format!("p/{}", user))),
                )
                .await
                .unwrap();
        }
        let store = RecordStore::new(backend, StoreConfig::default());
        ProfileReader::new(
            ProfileStore::new(store.clone(), TimeDelta::days(45), "p/default"),
            FriendGraph::new(store),
        )
    }

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000).unwrap()
    }

    #[tokio::test]
    async fn test_scope_for() {
        let reader = reader(&["amy", "bob", "cat"]).await;
        reader.graph.add_friend_edge("amy", "bob").await.unwrap();
        assert_eq!(reader.scope_for("amy", "amy").await.unwrap(), ProfileScope::Full);
        assert_eq!(reader.scope_for("amy", "bob").await.unwrap(), ProfileScope::Friend);
        assert_eq!(reader.scope_for("amy", "cat").await.unwrap(), ProfileScope::Limited);
    }

    #[tokio::test]
    async fn test_limited_view_has_only_public_fields() {
        let reader = reader(&["amy"]).await;
        let view = reader.read("amy", ProfileScope::Limited, now()).await.unwrap();
        assert_eq!(view.name, "AMY");
        assert_eq!(view.photo_url, "p/amy");
        assert!(view.email.is_none());
        assert!(view.courses_taken.is_none() && view.academic_programs.is_none());

        let json = serde_json::to_value(&view).unwrap();
        let mut keys: Vec<&str> = json.as_object().unwrap().keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["id", "name", "photoUrl", "scope"]);
    }

    #[tokio::test]
    async fn test_full_view_lists_requests_and_skips_dangling_friends() {
        let reader = reader(&["amy", "bob", "cat", "dan"]).await;
        reader.graph.add_friend_edge("amy", "bob").await.unwrap();
        reader.graph.add_friend_edge("amy", "ghost").await.unwrap();
        reader.graph.add_request_pair("cat", "amy").await.unwrap();
        reader.graph.add_request_pair("amy", "dan").await.unwrap();

        let view = reader.read("amy", ProfileScope::Full, now()).await.unwrap();
        assert_eq!(view.email.as_deref(), Some("amy@scu.edu"));
        assert!(view.preferences.is_some());

        let friends = view.friends.unwrap();
        assert_eq!(friends.len(), 1);
        assert_eq!(friends[0].scope, ProfileScope::Friend);
        assert!(friends[0].email.is_none());
        assert!(friends[0].courses_taken.is_some());

        let requests = view.friend_requests.unwrap();
        assert_eq!(
            requests
                .iter()
                .map(|r| (r.id.as_str(), r.direction))
                .collect::<Vec<_>>(),
            vec![("cat", RequestDirection::Incoming), ("dan", RequestDirection::Outgoing)]
        );
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let reader = reader(&[]).await;
        assert!(matches!(
            reader.read("ghost", ProfileScope::Limited, now()).await,
            Err(ServiceError::UserNotFound { .. })
        ));
    }
}

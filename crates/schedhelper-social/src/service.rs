//! Social use cases: account deletion, profile reads and updates, friend
//! flows, subscriptions and name search, each followed by the matching
//! notifications.
//!
//! Notifications are sent after the state change is committed and are best
//! effort: a failure to resolve or deliver them is logged and reported in the
//! returned [`FanoutSummary`], never as an error of the use case.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use schedhelper_store::key::{classify_sort_key, user_key, validate_user_id};
use schedhelper_store::{
    BatchReport, CourseTaken, InterestedSection, ItemKey, KvBackend, RecordStore,
    RequestDirection, SortKeyKind,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::HelperConfig;
use crate::error::{Result, ServiceError};
use crate::fanout::{FanoutEngine, FanoutEvent, FanoutSummary, IndividualNotification};
use crate::friends::FriendGraph;
use crate::name_index::{NameIndex, NameMatch};
use crate::notification::{Notification, NotificationType};
use crate::profile::{AcademicProgramsUpdate, Preferences, ProfileStore};
use crate::push::PushSender;
use crate::subscriptions::{PushSubscription, SubscriptionRegistry};
use crate::view::{ProfileReader, ProfileView};

const NAME_ATTR: &str = "name";

/// Profile item names as reported in `SelfProfileUpdated`.
pub mod items {
    /// Name and photo.
    pub const PERSONAL: &str = "personal";
    /// Preferences row.
    pub const PREFERENCES: &str = "preferences";
    /// Courses taken.
    pub const COURSES_TAKEN: &str = "coursesTaken";
    /// Interested sections.
    pub const INTERESTED_SECTIONS: &str = "interestedSections";
    /// Accepted friends.
    pub const FRIENDS: &str = "friends";
    /// Pending friend requests.
    pub const FRIEND_REQUESTS: &str = "friendRequests";
    /// Majors, minors and emphases.
    pub const ACADEMIC_PROGRAMS: &str = "academicPrograms";
}

/// Changes to apply to a profile. Empty fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileUpdate {
    /// New display name.
    pub name: Option<String>,
    /// New photo URL, or `"default"`.
    pub photo_url: Option<String>,
    /// Preference fields to set.
    pub preferences: Option<Preferences>,
    /// Courses to add.
    pub add_courses_taken: Vec<CourseTaken>,
    /// Courses to remove.
    pub remove_courses_taken: Vec<CourseTaken>,
    /// Sections to mark as interesting.
    pub add_interested_sections: Vec<InterestedSection>,
    /// Sections to drop.
    pub remove_interested_sections: Vec<InterestedSection>,
    /// Majors, minors and emphases to add or remove.
    pub academic_programs: AcademicProgramsUpdate,
}

impl ProfileUpdate {
    fn touches_personal(&self) -> bool {
        self.name.is_some() || self.photo_url.is_some()
    }

    fn touches_courses(&self) -> bool {
        !self.add_courses_taken.is_empty() || !self.remove_courses_taken.is_empty()
    }

    fn touches_interested(&self) -> bool {
        !self.add_interested_sections.is_empty() || !self.remove_interested_sections.is_empty()
    }

    fn touches_academic_programs(&self) -> bool {
        !self.academic_programs.is_empty()
    }

    /// Item names this update changes, in a stable order.
    pub fn updated_items(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.touches_personal() {
            out.push(items::PERSONAL.to_string());
        }
        if self.preferences.is_some() {
            out.push(items::PREFERENCES.to_string());
        }
        if self.touches_courses() {
            out.push(items::COURSES_TAKEN.to_string());
        }
        if self.touches_interested() {
            out.push(items::INTERESTED_SECTIONS.to_string());
        }
        if self.touches_academic_programs() {
            out.push(items::ACADEMIC_PROGRAMS.to_string());
        }
        out
    }
}

/// What an account deletion removed and who was told.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionReport {
    /// Deleted user.
    pub user_id: String,
    /// Rows deleted from the user's own partition.
    pub own_rows: usize,
    /// Mirror edge rows deleted from other partitions.
    pub mirror_rows: usize,
    /// Chunking of the delete.
    pub batch: BatchReport,
    /// Whether the display name was removed from the name index.
    pub name_unindexed: bool,
    /// Deliveries attempted.
    pub notifications_attempted: usize,
    /// Deliveries accepted.
    pub notifications_delivered: usize,
}

/// Entry point for the social use cases.
#[derive(Clone)]
pub struct SocialService {
    store: RecordStore,
    graph: FriendGraph,
    registry: SubscriptionRegistry,
    names: NameIndex,
    profiles: ProfileStore,
    reader: ProfileReader,
    fanout: FanoutEngine,
}

impl SocialService {
    /// Wires the service on top of a backend and a push sender.
    pub fn new(
        backend: Arc<dyn KvBackend>,
        sender: Arc<dyn PushSender>,
        config: &HelperConfig,
    ) -> Self {
        Self::with_store(RecordStore::new(backend, config.store_config()), sender, config)
    }

    /// Like [`SocialService::new`] with a preconfigured store, e.g. one
    /// carrying a cancellation token.
    pub fn with_store(store: RecordStore, sender: Arc<dyn PushSender>, config: &HelperConfig) -> Self {
        let graph = FriendGraph::new(store.clone());
        let registry = SubscriptionRegistry::new(store.clone());
        let fanout = FanoutEngine::new(
            graph.clone(),
            registry.clone(),
            sender,
            config.fanout_config(),
        );
        let profiles = ProfileStore::new(
            store.clone(),
            config.interested_section_ttl(),
            config.default_photo_url.clone(),
        );
        Self {
            names: NameIndex::new(store.clone(), config.email_domain.clone()),
            reader: ProfileReader::new(profiles.clone(), graph.clone()),
            profiles,
            store,
            graph,
            registry,
            fanout,
        }
    }

    /// Friend graph view.
    pub fn graph(&self) -> &FriendGraph {
        &self.graph
    }

    /// Subscription registry view.
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Profile rows view.
    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    /// Name index view.
    pub fn names(&self) -> &NameIndex {
        &self.names
    }

    /// Deletes every row of `user_id` and the mirror rows other users hold
    /// about it, then tells friends, request peers and the user's other
    /// devices.
    ///
    /// The audience is resolved before anything is deleted. Rows go out in
    /// this order: mirror rows in other partitions, the user's other rows,
    /// and `info#personal` last. A failed chunk aborts the call with the
    /// store error and leaves earlier chunks deleted; a second call still
    /// finds the user and re-derives every mirror that may remain.
    pub async fn delete_user(&self, user_id: &str) -> Result<DeletionReport> {
        validate_user_id(user_id)?;
        let rows = self.store.query_by_prefix(&user_key(user_id), "").await?;
        if rows.is_empty() {
            return Err(ServiceError::UserNotFound {
                user_id: user_id.to_string(),
            });
        }

        let mut display_name = None;
        let mut mirrors = Vec::new();
        for row in &rows {
            match classify_sort_key(row.sk()) {
                SortKeyKind::Personal => {
                    display_name = row.string(NAME_ATTR).map(str::to_string);
                }
                SortKeyKind::Friend(friend_id) if friend_id != user_id => {
                    mirrors.push(ItemKey::friend(friend_id, user_id));
                }
                SortKeyKind::Request(direction, other_id) if other_id != user_id => {
                    mirrors.push(ItemKey::friend_request(other_id, direction.reverse(), user_id));
                }
                _ => {}
            }
        }

        let event = FanoutEvent {
            for_friends: Some(Notification::about_user(NotificationType::FriendRemoved, user_id)),
            for_friend_requests: Some(Notification::about_user(
                NotificationType::FriendRequestRemoved,
                user_id,
            )),
            for_self: Some(Notification::new(NotificationType::SelfProfileDeleted, Value::Null)),
            for_individual: None,
        };
        let audience = match self.fanout.resolve_audience(user_id, &event).await {
            Ok(audience) => Some(audience),
            Err(e) => {
                warn!(user_id, error = %e, "could not resolve deletion audience");
                None
            }
        };

        let own_rows = rows.len();
        let mirror_rows = mirrors.len();
        let (personal, others): (Vec<ItemKey>, Vec<ItemKey>) = rows
            .into_iter()
            .map(|row| row.key)
            .partition(|key| matches!(classify_sort_key(&key.sk), SortKeyKind::Personal));
        let mut keys = mirrors;
        keys.extend(others);
        keys.extend(personal);
        let batch = self.store.batch_delete_keys(keys).await?;
        info!(user_id, own_rows, mirror_rows, chunks = batch.chunks, "user rows deleted");

        let name_unindexed = match &display_name {
            Some(name) => match self.names.remove_name(user_id, name, user_id).await {
                Ok(removed) => removed,
                Err(e) => {
                    warn!(user_id, name = %name, error = %e, "could not remove name from index");
                    false
                }
            },
            None => false,
        };

        let summary = match &audience {
            Some(audience) => self.fanout.deliver(audience, &event).await,
            None => FanoutSummary::default(),
        };

        Ok(DeletionReport {
            user_id: user_id.to_string(),
            own_rows,
            mirror_rows,
            batch,
            name_unindexed,
            notifications_attempted: summary.attempted,
            notifications_delivered: summary.delivered,
        })
    }

    /// Reads the profile of `target_id` as `viewer_id` sees it. `"me"` as
    /// target is the viewer.
    pub async fn get_profile(
        &self,
        viewer_id: &str,
        target_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ProfileView> {
        validate_user_id(viewer_id)?;
        let target_id = if target_id == "me" { viewer_id } else { target_id };
        validate_user_id(target_id)?;
        let scope = self.reader.scope_for(viewer_id, target_id).await?;
        self.reader.read(target_id, scope, now).await
    }

    /// Runs an arbitrary fan-out on behalf of `actor_id`.
    pub async fn fan_out(&self, actor_id: &str, event: &FanoutEvent) -> Result<FanoutSummary> {
        validate_user_id(actor_id)?;
        self.fanout.fan_out(actor_id, event).await
    }

    /// Name search by case-sensitive prefix.
    pub async fn find_users_by_name(&self, name: &str) -> Result<Vec<NameMatch>> {
        self.names.lookup_by_prefix(name).await
    }

    /// Registers a push subscription for an existing user. Returns the
    /// number of stored subscriptions.
    pub async fn register_subscription(
        &self,
        user_id: &str,
        subscription: &PushSubscription,
    ) -> Result<usize> {
        validate_user_id(user_id)?;
        if !self.profiles.user_exists(user_id).await? {
            return Err(ServiceError::UserNotFound {
                user_id: user_id.to_string(),
            });
        }
        self.registry.add_subscription(user_id, subscription).await
    }

    /// Removes the subscriptions of `user_id` with `endpoint`.
    pub async fn remove_subscription(&self, user_id: &str, endpoint: &str) -> Result<usize> {
        validate_user_id(user_id)?;
        self.registry.remove_subscription(user_id, endpoint).await
    }

    /// Unsubscribe link handler. Always succeeds: missing parameters, the
    /// `unknown` user, users without a personal row and store errors all
    /// remove nothing.
    pub async fn unsubscribe(&self, user_id: Option<&str>, endpoint: Option<&str>) -> Result<usize> {
        let (Some(user_id), Some(endpoint)) = (user_id, endpoint) else {
            return Ok(0);
        };
        if user_id == "unknown" || validate_user_id(user_id).is_err() {
            return Ok(0);
        }
        match self.registry.remove_subscription(user_id, endpoint).await {
            Ok(removed) => Ok(removed),
            Err(e) => {
                warn!(user_id, error = %e, "unsubscribe failed");
                Ok(0)
            }
        }
    }

    /// `user_id` asks `target_id` to be friends.
    pub async fn send_friend_request(&self, user_id: &str, target_id: &str) -> Result<FanoutSummary> {
        self.graph.send_friend_request(user_id, target_id).await?;
        Ok(self
            .notify_peer(
                user_id,
                target_id,
                Notification::about_user(NotificationType::FriendRequestReceived, user_id),
                items::FRIEND_REQUESTS,
            )
            .await)
    }

    /// `user_id` accepts the request `from_id` sent.
    pub async fn accept_friend_request(&self, user_id: &str, from_id: &str) -> Result<FanoutSummary> {
        self.graph.accept_friend_request(user_id, from_id).await?;
        info!(user_id, from_id, "friend request accepted");
        Ok(self
            .notify_peer(
                user_id,
                from_id,
                Notification::about_user(NotificationType::FriendRequestAccepted, user_id),
                items::FRIENDS,
            )
            .await)
    }

    /// Ends the friendship between `user_id` and `friend_id`.
    pub async fn remove_friend(&self, user_id: &str, friend_id: &str) -> Result<FanoutSummary> {
        self.graph.remove_friend_edge(user_id, friend_id).await?;
        Ok(self
            .notify_peer(
                user_id,
                friend_id,
                Notification::about_user(NotificationType::FriendRemoved, user_id),
                items::FRIENDS,
            )
            .await)
    }

    /// `user_id` withdraws the request it sent to `target_id`. The target
    /// loses an incoming request.
    pub async fn cancel_friend_request(&self, user_id: &str, target_id: &str) -> Result<FanoutSummary> {
        self.graph.remove_friend_request(target_id, user_id).await?;
        Ok(self
            .notify_peer(
                user_id,
                target_id,
                Notification::friend_request_removed(user_id, direction_name(RequestDirection::Incoming)),
                items::FRIEND_REQUESTS,
            )
            .await)
    }

    /// `user_id` declines the request `from_id` sent. The sender loses an
    /// outgoing request.
    pub async fn decline_friend_request(&self, user_id: &str, from_id: &str) -> Result<FanoutSummary> {
        self.graph.remove_friend_request(user_id, from_id).await?;
        Ok(self
            .notify_peer(
                user_id,
                from_id,
                Notification::friend_request_removed(user_id, direction_name(RequestDirection::Outgoing)),
                items::FRIEND_REQUESTS,
            )
            .await)
    }

    /// Applies `update` to the profile of `user_id` at `now`, keeps the name
    /// index in sync and notifies friends, request peers and the user's
    /// other devices.
    pub async fn update_profile(
        &self,
        user_id: &str,
        update: &ProfileUpdate,
        now: DateTime<Utc>,
    ) -> Result<FanoutSummary> {
        validate_user_id(user_id)?;
        let updated_items = update.updated_items();
        if updated_items.is_empty() {
            return Err(ServiceError::invalid("profile update changes nothing"));
        }
        if !self.profiles.user_exists(user_id).await? {
            return Err(ServiceError::UserNotFound {
                user_id: user_id.to_string(),
            });
        }

        if update.touches_personal() {
            let previous = self
                .profiles
                .update_personal(user_id, update.name.as_deref(), update.photo_url.as_deref())
                .await?;
            self.sync_name_index(user_id, &previous.name, update).await;
        }
        if let Some(preferences) = &update.preferences {
            self.profiles.set_preferences(user_id, preferences).await?;
        }
        if update.touches_courses() {
            self.profiles
                .update_courses_taken(
                    user_id,
                    &update.add_courses_taken,
                    &update.remove_courses_taken,
                )
                .await?;
        }
        if !update.remove_interested_sections.is_empty() {
            self.profiles
                .remove_interested_sections(user_id, &update.remove_interested_sections)
                .await?;
        }
        if !update.add_interested_sections.is_empty() {
            self.profiles
                .record_interested_sections(user_id, &update.add_interested_sections, now)
                .await?;
        }
        if update.touches_academic_programs() {
            self.profiles
                .update_academic_programs(user_id, &update.academic_programs)
                .await?;
        }
        info!(user_id, items = ?updated_items, "profile updated");

        let visible_to_friends = update.touches_personal()
            || update.touches_courses()
            || update.touches_interested()
            || update.touches_academic_programs();
        let event = FanoutEvent {
            for_friends: visible_to_friends
                .then(|| Notification::about_user(NotificationType::FriendProfileUpdated, user_id)),
            for_friend_requests: update.touches_personal().then(|| {
                Notification::about_user(NotificationType::FriendRequestProfileUpdated, user_id)
            }),
            for_self: Some(Notification::self_profile_updated(&updated_items)),
            for_individual: None,
        };
        Ok(self.notify_best_effort(user_id, &event).await)
    }

    // Name index failures never undo the personal row update.
    async fn sync_name_index(&self, user_id: &str, previous_name: &str, update: &ProfileUpdate) {
        let photo = update
            .photo_url
            .as_deref()
            .map(|p| self.profiles.resolve_photo_url(p).to_string());
        let renamed = if previous_name.is_empty() {
            Err(ServiceError::invalid("no previous name"))
        } else {
            self.names
                .rename(
                    user_id,
                    user_id,
                    previous_name,
                    update.name.as_deref(),
                    photo.as_deref(),
                )
                .await
        };
        if let Err(e) = renamed {
            // Not indexed yet: register under the current values.
            match self.profiles.get_personal(user_id).await {
                Ok(current) if !current.name.is_empty() => {
                    if let Err(e) = self
                        .names
                        .register_name(user_id, &current.name, user_id, &current.photo_url)
                        .await
                    {
                        warn!(user_id, error = %e, "could not index name");
                    }
                }
                Ok(_) => warn!(user_id, error = %e, "no name to index"),
                Err(e) => warn!(user_id, error = %e, "could not re-read personal row"),
            }
        }
    }

    async fn notify_peer(
        &self,
        user_id: &str,
        peer_id: &str,
        notification: Notification,
        self_item: &str,
    ) -> FanoutSummary {
        let event = FanoutEvent {
            for_self: Some(Notification::self_profile_updated(&[self_item.to_string()])),
            for_individual: Some(IndividualNotification {
                user_id: peer_id.to_string(),
                notification,
            }),
            ..FanoutEvent::default()
        };
        self.notify_best_effort(user_id, &event).await
    }

    async fn notify_best_effort(&self, actor_id: &str, event: &FanoutEvent) -> FanoutSummary {
        match self.fanout.fan_out(actor_id, event).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(actor_id, error = %e, "notifications not sent");
                FanoutSummary {
                    actor_id: actor_id.to_string(),
                    ..FanoutSummary::default()
                }
            }
        }
    }
}

// Side of the request the notified peer sees removed.
fn direction_name(direction: RequestDirection) -> &'static str {
    match direction {
        RequestDirection::Incoming => "incoming",
        RequestDirection::Outgoing => "outgoing",
    }
}

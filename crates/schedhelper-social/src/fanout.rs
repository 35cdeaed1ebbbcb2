//! Notification fan-out: parallel delivery of one state change to friends,
//! request peers and the acting user's other devices.
//!
//! A fan-out runs in two phases. [`FanoutEngine::resolve_audience`] reads the
//! friend graph and subscription sets into an [`Audience`];
//! [`FanoutEngine::deliver`] pushes to every resolved subscription with
//! bounded concurrency. The phases are public so that account deletion can
//! capture the audience before the rows it is derived from disappear.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::friends::FriendGraph;
use crate::notification::Notification;
use crate::push::{PushError, PushSender};
use crate::subscriptions::{PushSubscription, SubscriptionRegistry};

/// Fan-out tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanoutConfig {
    /// Maximum deliveries in flight.
    pub max_concurrency: usize,
    /// Bound on a single delivery.
    pub push_timeout: Duration,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 16,
            push_timeout: Duration::from_secs(10),
        }
    }
}

/// A notification aimed at one specific user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndividualNotification {
    /// Receiving user.
    pub user_id: String,
    /// Payload.
    pub notification: Notification,
}

/// Payloads of one state change, per audience group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FanoutEvent {
    /// Sent to every friend of the actor.
    pub for_friends: Option<Notification>,
    /// Sent to every user with a pending request to or from the actor.
    pub for_friend_requests: Option<Notification>,
    /// Sent to the actor's devices when there is more than one.
    pub for_self: Option<Notification>,
    /// Sent to a single user.
    pub for_individual: Option<IndividualNotification>,
}

impl FanoutEvent {
    /// True if no group has a payload.
    pub fn is_empty(&self) -> bool {
        self.for_friends.is_none()
            && self.for_friend_requests.is_none()
            && self.for_self.is_none()
            && self.for_individual.is_none()
    }

    /// Payload for an audience group.
    pub fn notification_for(&self, kind: AudienceKind) -> Option<&Notification> {
        match kind {
            AudienceKind::Friend => self.for_friends.as_ref(),
            AudienceKind::FriendRequest => self.for_friend_requests.as_ref(),
            AudienceKind::OwnDevice => self.for_self.as_ref(),
            AudienceKind::Individual => self.for_individual.as_ref().map(|i| &i.notification),
        }
    }
}

/// Why a user is in the audience.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AudienceKind {
    /// Accepted friend of the actor.
    Friend,
    /// Has a pending request to or from the actor.
    FriendRequest,
    /// The actor's own devices.
    OwnDevice,
    /// Explicit single target.
    Individual,
}

impl fmt::Display for AudienceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AudienceKind::Friend => "friend",
            AudienceKind::FriendRequest => "friend_request",
            AudienceKind::OwnDevice => "own_device",
            AudienceKind::Individual => "individual",
        };
        f.write_str(s)
    }
}

/// A resolved audience member with the subscriptions to deliver to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudienceMember {
    /// Receiving user.
    pub user_id: String,
    /// Group the member belongs to.
    pub kind: AudienceKind,
    /// Distinct subscriptions (by endpoint) of the member.
    pub subscriptions: Vec<PushSubscription>,
}

/// Everyone a fan-out will reach.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Audience {
    /// The acting user.
    pub actor_id: String,
    /// Members with at least one subscription.
    pub members: Vec<AudienceMember>,
    /// Users without any subscription.
    pub unreachable: Vec<String>,
    /// Users whose subscriptions could not be read.
    pub resolution_failures: Vec<String>,
}

impl Audience {
    /// Number of deliveries [`FanoutEngine::deliver`] will attempt for `kind`.
    pub fn delivery_count(&self, kind: AudienceKind) -> usize {
        self.members
            .iter()
            .filter(|m| m.kind == kind)
            .map(|m| m.subscriptions.len())
            .sum()
    }
}

/// Outcome of one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResult {
    /// Receiving user.
    pub user_id: String,
    /// Audience group.
    pub kind: AudienceKind,
    /// Subscription endpoint.
    pub endpoint: String,
    /// Whether the push was accepted.
    pub success: bool,
    /// Error message if failed.
    pub error: Option<String>,
    /// Microseconds spent.
    pub latency_us: u64,
}

/// Aggregate outcome of a fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutSummary {
    /// The acting user.
    pub actor_id: String,
    /// Deliveries attempted.
    pub attempted: usize,
    /// Deliveries accepted.
    pub delivered: usize,
    /// Deliveries that failed or timed out.
    pub failed: usize,
    /// Audience members without subscriptions.
    pub unreachable: Vec<String>,
    /// Audience members whose subscriptions could not be read.
    pub resolution_failures: Vec<String>,
    /// Per-delivery results, ordered by group, user and endpoint.
    pub results: Vec<DeliveryResult>,
}

impl FanoutSummary {
    /// Returns true if every attempted delivery succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    /// Returns true if any delivery failed.
    pub fn any_failed(&self) -> bool {
        self.failed > 0
    }

    /// Returns the failure rate (0.0 to 1.0).
    pub fn failure_rate(&self) -> f64 {
        if self.attempted == 0 {
            return 0.0;
        }
        self.failed as f64 / self.attempted as f64
    }

    /// Number of successful deliveries to `kind`.
    pub fn delivered_to(&self, kind: AudienceKind) -> usize {
        self.results
            .iter()
            .filter(|r| r.kind == kind && r.success)
            .count()
    }

    /// Users with at least one failed delivery.
    pub fn failed_user_ids(&self) -> BTreeSet<String> {
        self.results
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.user_id.clone())
            .collect()
    }
}

/// Resolves audiences and delivers notifications.
#[derive(Clone)]
pub struct FanoutEngine {
    graph: FriendGraph,
    registry: SubscriptionRegistry,
    sender: Arc<dyn PushSender>,
    config: FanoutConfig,
}

impl FanoutEngine {
    /// Creates an engine.
    pub fn new(
        graph: FriendGraph,
        registry: SubscriptionRegistry,
        sender: Arc<dyn PushSender>,
        mut config: FanoutConfig,
    ) -> Self {
        config.max_concurrency = config.max_concurrency.max(1);
        Self {
            graph,
            registry,
            sender,
            config,
        }
    }

    /// Resolves who `event` reaches on behalf of `actor_id`.
    ///
    /// Failing to read the actor's friend or request edges fails the call.
    /// Failing to read one member's subscriptions only excludes that member.
    pub async fn resolve_audience(&self, actor_id: &str, event: &FanoutEvent) -> Result<Audience> {
        let mut audience = Audience {
            actor_id: actor_id.to_string(),
            ..Audience::default()
        };

        if event.for_friends.is_some() {
            let friends = self.graph.list_friend_ids(actor_id).await?;
            for friend_id in &friends {
                self.add_member(&mut audience, friend_id, AudienceKind::Friend)
                    .await;
            }
        }

        if event.for_friend_requests.is_some() {
            let mut peers = self.graph.list_incoming_requests(actor_id).await?;
            peers.extend(self.graph.list_outgoing_requests(actor_id).await?);
            for peer_id in &peers {
                self.add_member(&mut audience, peer_id, AudienceKind::FriendRequest)
                    .await;
            }
        }

        if let Some(individual) = &event.for_individual {
            if individual.user_id == actor_id {
                warn!(actor_id, "individual notification addressed to the actor, skipping");
            } else {
                self.add_member(&mut audience, &individual.user_id, AudienceKind::Individual)
                    .await;
            }
        }

        if event.for_self.is_some() {
            self.add_own_devices(&mut audience).await;
        }

        debug!(
            actor_id,
            members = audience.members.len(),
            unreachable = audience.unreachable.len(),
            "audience resolved"
        );
        Ok(audience)
    }

    async fn add_member(&self, audience: &mut Audience, user_id: &str, kind: AudienceKind) {
        if user_id == audience.actor_id {
            return;
        }
        match self.registry.list_subscriptions(user_id).await {
            Ok(subscriptions) if subscriptions.is_empty() => {
                debug!(user_id, %kind, "audience member has no subscriptions");
                audience.unreachable.push(user_id.to_string());
            }
            Ok(subscriptions) => audience.members.push(AudienceMember {
                user_id: user_id.to_string(),
                kind,
                subscriptions: distinct_endpoints(subscriptions),
            }),
            Err(e) => {
                warn!(user_id, %kind, error = %e, "could not resolve subscriptions");
                audience.resolution_failures.push(user_id.to_string());
            }
        }
    }

    // The device that triggered the change already knows about it, so a
    // single subscription gets nothing. With several, all of them are
    // notified since the originating one cannot be told apart.
    async fn add_own_devices(&self, audience: &mut Audience) {
        let actor_id = audience.actor_id.clone();
        match self.registry.list_subscriptions(&actor_id).await {
            Ok(subscriptions) => {
                let subscriptions = distinct_endpoints(subscriptions);
                if subscriptions.len() > 1 {
                    audience.members.push(AudienceMember {
                        user_id: actor_id,
                        kind: AudienceKind::OwnDevice,
                        subscriptions,
                    });
                } else {
                    debug!(actor_id = %actor_id, "single own subscription, no self notification");
                }
            }
            Err(e) => {
                warn!(actor_id = %actor_id, error = %e, "could not resolve own subscriptions");
                audience.resolution_failures.push(actor_id);
            }
        }
    }

    /// Delivers the payloads of `event` to `audience`.
    ///
    /// Every delivery is independent; failures are recorded in the summary
    /// and never retried.
    pub async fn deliver(&self, audience: &Audience, event: &FanoutEvent) -> FanoutSummary {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let push_timeout = self.config.push_timeout;
        let mut tasks = JoinSet::new();
        let mut seen: HashSet<(AudienceKind, &str, &str)> = HashSet::new();

        for member in &audience.members {
            let Some(notification) = event.notification_for(member.kind) else {
                continue;
            };
            let notification = Arc::new(notification.clone());
            for subscription in &member.subscriptions {
                let pair = (
                    member.kind,
                    member.user_id.as_str(),
                    subscription.endpoint.as_str(),
                );
                if !seen.insert(pair) {
                    continue;
                }
                let semaphore = semaphore.clone();
                let sender = self.sender.clone();
                let notification = notification.clone();
                let subscription = subscription.clone();
                let user_id = member.user_id.clone();
                let kind = member.kind;

                tasks.spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    let start = Instant::now();
                    let outcome = match tokio::time::timeout(
                        push_timeout,
                        sender.send(&subscription, &notification),
                    )
                    .await
                    {
                        Ok(res) => res,
                        Err(_) => Err(PushError::Timeout {
                            timeout_ms: push_timeout.as_millis() as u64,
                        }),
                    };
                    let latency_us = start.elapsed().as_micros() as u64;
                    DeliveryResult {
                        user_id,
                        kind,
                        endpoint: subscription.endpoint,
                        success: outcome.is_ok(),
                        error: outcome.err().map(|e| e.to_string()),
                        latency_us,
                    }
                });
            }
        }

        let attempted = tasks.len();
        let mut results = Vec::with_capacity(attempted);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => {
                    if let Some(error) = &result.error {
                        warn!(
                            user_id = %result.user_id,
                            kind = %result.kind,
                            endpoint = %result.endpoint,
                            error = %error,
                            "push delivery failed"
                        );
                    }
                    results.push(result);
                }
                Err(e) => error!(error = %e, "push delivery task aborted"),
            }
        }
        results.sort_by(|a, b| {
            (a.kind, &a.user_id, &a.endpoint).cmp(&(b.kind, &b.user_id, &b.endpoint))
        });

        let delivered = results.iter().filter(|r| r.success).count();
        let summary = FanoutSummary {
            actor_id: audience.actor_id.clone(),
            attempted,
            delivered,
            failed: attempted - delivered,
            unreachable: audience.unreachable.clone(),
            resolution_failures: audience.resolution_failures.clone(),
            results,
        };
        info!(
            actor_id = %summary.actor_id,
            attempted,
            delivered,
            failed = summary.failed,
            "fan-out complete"
        );
        summary
    }

    /// Resolves the audience of `event` and delivers to it.
    pub async fn fan_out(&self, actor_id: &str, event: &FanoutEvent) -> Result<FanoutSummary> {
        if event.is_empty() {
            return Ok(FanoutSummary {
                actor_id: actor_id.to_string(),
                ..FanoutSummary::default()
            });
        }
        let audience = self.resolve_audience(actor_id, event).await?;
        Ok(self.deliver(&audience, event).await)
    }

    /// Sends `notification` from `sender_id` to every device of `target_id`.
    pub async fn notify_individual(
        &self,
        sender_id: &str,
        target_id: &str,
        notification: Notification,
    ) -> Result<FanoutSummary> {
        let event = FanoutEvent {
            for_individual: Some(IndividualNotification {
                user_id: target_id.to_string(),
                notification,
            }),
            ..FanoutEvent::default()
        };
        self.fan_out(sender_id, &event).await
    }
}

fn distinct_endpoints(subscriptions: Vec<PushSubscription>) -> Vec<PushSubscription> {
    let mut seen = HashSet::new();
    subscriptions
        .into_iter()
        .filter(|s| seen.insert(s.endpoint.clone()))
        .collect()
}

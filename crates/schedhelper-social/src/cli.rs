//! `sh-admin` command line.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use schedhelper_store::KvBackend;
use serde::Serialize;

use crate::config::HelperConfig;
use crate::fanout::{FanoutEvent, FanoutSummary, IndividualNotification};
use crate::notification::{Notification, NotificationType};
use crate::push::{HttpPushRelay, NoopPushSender, PushSender};
use crate::service::SocialService;

/// Command line of the `sh-admin` binary.
#[derive(Parser, Debug)]
#[command(name = "sh-admin")]
#[command(about = "Schedule Helper social backend administration", long_about = None)]
pub struct Cli {
    /// TOML or JSON config file.
    #[arg(short, long, env = "SH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Table name override.
    #[arg(long, env = "SH_TABLE_NAME")]
    pub table: Option<String>,

    /// AWS region override.
    #[arg(long, env = "SH_REGION")]
    pub region: Option<String>,

    /// DynamoDB endpoint override.
    #[arg(long, env = "SH_DYNAMODB_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Push relay URL override.
    #[arg(long, env = "SH_PUSH_RELAY_URL")]
    pub push_relay_url: Option<String>,

    /// Print results as JSON.
    #[arg(long)]
    pub json: bool,

    /// Subcommand.
    #[command(subcommand)]
    pub command: Command,
}

/// `sh-admin` subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Delete a user and every edge pointing at it.
    DeleteUser {
        /// User id (email local part).
        user_id: String,
        /// Confirm the deletion.
        #[arg(long)]
        yes: bool,
    },
    /// Search users by display name prefix.
    Search {
        /// Case-sensitive name prefix.
        name: String,
    },
    /// Inspect or edit push subscriptions.
    Subscriptions {
        /// Subscription action.
        #[command(subcommand)]
        cmd: SubscriptionsCmd,
    },
    /// Show a profile as another user sees it.
    Profile {
        /// User reading the profile.
        viewer: String,
        /// Profile owner; defaults to the viewer.
        target: Option<String>,
    },
    /// List friends and pending requests of a user.
    Friends {
        /// User id.
        user_id: String,
    },
    /// Send a notification on behalf of a user.
    Notify {
        /// Acting user id.
        user_id: String,
        /// Notification type, e.g. `FriendProfileUpdated`.
        notification_type: String,
        /// Receiving user for single-target types.
        #[arg(long)]
        target: Option<String>,
    },
}

/// `sh-admin subscriptions` subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum SubscriptionsCmd {
    /// List the subscriptions of a user.
    List {
        /// User id.
        user_id: String,
    },
    /// Remove the subscriptions of a user with an endpoint.
    Remove {
        /// User id.
        user_id: String,
        /// Push endpoint URL.
        endpoint: String,
    },
}

#[derive(Serialize)]
struct FriendListing {
    friends: Vec<String>,
    incoming_requests: Vec<String>,
    outgoing_requests: Vec<String>,
}

#[derive(Serialize)]
struct NotifyOutcome {
    attempted: usize,
    delivered: usize,
    failed: usize,
    unreachable: Vec<String>,
}

impl From<&FanoutSummary> for NotifyOutcome {
    fn from(summary: &FanoutSummary) -> Self {
        Self {
            attempted: summary.attempted,
            delivered: summary.delivered,
            failed: summary.failed,
            unreachable: summary.unreachable.clone(),
        }
    }
}

impl Cli {
    /// Loads the config file, if any, and applies the flag overrides.
    pub fn load_config(&self) -> Result<HelperConfig> {
        let mut config = match &self.config {
            Some(path) => HelperConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => HelperConfig::default(),
        };
        if let Some(table) = &self.table {
            config.table_name = table.clone();
        }
        if let Some(region) = &self.region {
            config.region = Some(region.clone());
        }
        if let Some(endpoint) = &self.endpoint {
            config.endpoint = Some(endpoint.clone());
        }
        if let Some(url) = &self.push_relay_url {
            config.push_relay_url = Some(url.clone());
        }
        config.validate()?;
        Ok(config)
    }

    /// Runs the subcommand against the configured backend.
    pub async fn run(self, config: HelperConfig) -> Result<()> {
        let backend = build_backend(&config).await;
        let sender = build_sender(&config)?;
        let service = SocialService::new(backend, sender, &config);
        self.execute(&service).await
    }

    /// Runs the subcommand against `service`.
    pub async fn execute(&self, service: &SocialService) -> Result<()> {
        match &self.command {
            Command::DeleteUser { user_id, yes } => {
                if !yes {
                    bail!("refusing to delete {} without --yes", user_id);
                }
                let report = service.delete_user(user_id).await?;
                if self.json {
                    self.print_json(&report)?;
                } else {
                    println!(
                        "Deleted {}: {} own rows, {} mirror rows in {} chunks",
                        report.user_id, report.own_rows, report.mirror_rows, report.batch.chunks
                    );
                    println!(
                        "Notifications: {}/{} delivered",
                        report.notifications_delivered, report.notifications_attempted
                    );
                }
            }
            Command::Search { name } => {
                let matches = service.find_users_by_name(name).await?;
                if self.json {
                    self.print_json(&matches)?;
                } else if matches.is_empty() {
                    println!("No users matching {:?}", name);
                } else {
                    for m in &matches {
                        println!("{:<30} {:<30} {}", m.name, m.email, m.photo_url);
                    }
                }
            }
            Command::Subscriptions { cmd } => match cmd {
                SubscriptionsCmd::List { user_id } => {
                    let subs = service.registry().list_subscriptions(user_id).await?;
                    if self.json {
                        self.print_json(&subs)?;
                    } else {
                        println!("{} subscription(s) for {}", subs.len(), user_id);
                        for sub in &subs {
                            println!("  {}", sub.endpoint);
                        }
                    }
                }
                SubscriptionsCmd::Remove { user_id, endpoint } => {
                    let removed = service.remove_subscription(user_id, endpoint).await?;
                    println!("Removed {} subscription(s)", removed);
                }
            },
            Command::Profile { viewer, target } => {
                let target = target.as_deref().unwrap_or(viewer.as_str());
                let view = service.get_profile(viewer, target, chrono::Utc::now()).await?;
                if self.json {
                    self.print_json(&view)?;
                } else {
                    println!("{} ({}) [{} view]", view.name, view.id, view.scope);
                    if let Some(email) = &view.email {
                        println!("Email: {}", email);
                    }
                    if let Some(courses) = &view.courses_taken {
                        println!("Courses taken: {}", courses.len());
                    }
                    if let Some(programs) = &view.academic_programs {
                        println!("Majors: {}", programs.majors.join(", "));
                        println!("Minors: {}", programs.minors.join(", "));
                    }
                    if let Some(friends) = &view.friends {
                        println!("Friends: {}", friends.len());
                    }
                }
            }
            Command::Friends { user_id } => {
                let graph = service.graph();
                let listing = FriendListing {
                    friends: graph.list_friend_ids(user_id).await?.into_iter().collect(),
                    incoming_requests: graph
                        .list_incoming_requests(user_id)
                        .await?
                        .into_iter()
                        .collect(),
                    outgoing_requests: graph
                        .list_outgoing_requests(user_id)
                        .await?
                        .into_iter()
                        .collect(),
                };
                if self.json {
                    self.print_json(&listing)?;
                } else {
                    println!("Friends: {}", listing.friends.join(", "));
                    println!("Incoming requests: {}", listing.incoming_requests.join(", "));
                    println!("Outgoing requests: {}", listing.outgoing_requests.join(", "));
                }
            }
            Command::Notify {
                user_id,
                notification_type,
                target,
            } => {
                let notification_type: NotificationType = notification_type.parse()?;
                let event = build_event(notification_type, user_id, target.as_deref())?;
                let summary = service.fan_out(user_id, &event).await?;
                let outcome = NotifyOutcome::from(&summary);
                if self.json {
                    self.print_json(&outcome)?;
                } else {
                    println!(
                        "Attempted: {}, delivered: {}, failed: {}, unreachable: {}",
                        outcome.attempted,
                        outcome.delivered,
                        outcome.failed,
                        outcome.unreachable.len()
                    );
                }
            }
        }
        Ok(())
    }

    fn print_json<T: Serialize>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

/// Builds the fan-out event an admin `notify` sends for `notification_type`.
pub fn build_event(
    notification_type: NotificationType,
    user_id: &str,
    target: Option<&str>,
) -> Result<FanoutEvent> {
    let about_user = Notification::about_user(notification_type, user_id);
    let event = match notification_type {
        NotificationType::FriendProfileUpdated => FanoutEvent {
            for_friends: Some(about_user),
            ..FanoutEvent::default()
        },
        NotificationType::FriendRequestProfileUpdated => FanoutEvent {
            for_friend_requests: Some(about_user),
            ..FanoutEvent::default()
        },
        NotificationType::SelfProfileUpdated => FanoutEvent {
            for_self: Some(Notification::self_profile_updated(&[])),
            ..FanoutEvent::default()
        },
        NotificationType::SelfProfileDeleted => FanoutEvent {
            for_self: Some(Notification::new(
                notification_type,
                serde_json::Value::Null,
            )),
            ..FanoutEvent::default()
        },
        NotificationType::FriendRequestAccepted
        | NotificationType::FriendRemoved
        | NotificationType::FriendRequestReceived
        | NotificationType::FriendRequestRemoved => {
            let Some(target) = target else {
                bail!("{} needs --target", notification_type);
            };
            FanoutEvent {
                for_individual: Some(IndividualNotification {
                    user_id: target.to_string(),
                    notification: about_user,
                }),
                ..FanoutEvent::default()
            }
        }
    };
    Ok(event)
}

#[cfg(feature = "dynamodb")]
async fn build_backend(config: &HelperConfig) -> Arc<dyn KvBackend> {
    use schedhelper_store::dynamodb::{DynamoDbBackend, DynamoDbConfig};

    tracing::info!(table = %config.table_name, "using DynamoDB backend");
    Arc::new(
        DynamoDbBackend::from_env(DynamoDbConfig {
            table_name: config.table_name.clone(),
            region: config.region.clone(),
            endpoint: config.endpoint.clone(),
        })
        .await,
    )
}

#[cfg(not(feature = "dynamodb"))]
async fn build_backend(_config: &HelperConfig) -> Arc<dyn KvBackend> {
    tracing::warn!("built without the dynamodb feature, using an empty in-memory backend");
    Arc::new(schedhelper_store::MemoryBackend::new())
}

fn build_sender(config: &HelperConfig) -> Result<Arc<dyn PushSender>> {
    match &config.push_relay_url {
        Some(url) => {
            let relay = HttpPushRelay::new(
                url.clone(),
                std::time::Duration::from_millis(config.push_timeout_ms),
            )
            .context("building push relay client")?;
            Ok(Arc::new(relay))
        }
        None => {
            tracing::warn!("no push relay configured, notifications will be dropped");
            Ok(Arc::new(NoopPushSender))
        }
    }
}

//! Friend graph.
//!
//! Friendships and pending requests are edge rows stored on both endpoints:
//! `friend#cur#<b>` under `a` and `friend#cur#<a>` under `b`, or
//! `friend#req#out#<to>` under the sender and `friend#req#in#<from>` under the
//! receiver. Both rows of a pair go out in a single batch write. There is no
//! cross-partition transaction, so a failed write may leave one side applied;
//! it is re-issued once and reported as [`ServiceError::EdgeInconsistent`] if
//! it fails again.

use std::collections::BTreeSet;

use schedhelper_store::key::{strip_sort_prefix, user_key, FRIEND_CURRENT_PREFIX, PERSONAL_SK};
use schedhelper_store::{ItemKey, RecordStore, RequestDirection, Row, WriteRequest};
use tracing::{info, warn};

use crate::error::{Result, ServiceError};

/// Reads and edits friend and friend-request edges.
#[derive(Clone)]
pub struct FriendGraph {
    store: RecordStore,
}

impl FriendGraph {
    /// Creates a graph view on top of `store`.
    pub fn new(store: RecordStore) -> Self {
        Self { store }
    }

    async fn edge_ids(&self, user_id: &str, prefix: &str) -> Result<BTreeSet<String>> {
        let rows = self.store.query_by_prefix(&user_key(user_id), prefix).await?;
        Ok(rows
            .iter()
            .filter_map(|row| strip_sort_prefix(row.sk(), prefix))
            .filter(|id| *id != user_id)
            .map(str::to_string)
            .collect())
    }

    /// Ids of the user's accepted friends. Never contains `user_id` itself.
    pub async fn list_friend_ids(&self, user_id: &str) -> Result<BTreeSet<String>> {
        self.edge_ids(user_id, FRIEND_CURRENT_PREFIX).await
    }

    /// Ids of users who sent `user_id` a pending request.
    pub async fn list_incoming_requests(&self, user_id: &str) -> Result<BTreeSet<String>> {
        self.edge_ids(user_id, RequestDirection::Incoming.prefix())
            .await
    }

    /// Ids of users `user_id` sent a pending request to.
    pub async fn list_outgoing_requests(&self, user_id: &str) -> Result<BTreeSet<String>> {
        self.edge_ids(user_id, RequestDirection::Outgoing.prefix())
            .await
    }

    /// True if `user_id` holds an accepted friendship with `friend_id`.
    pub async fn are_friends(&self, user_id: &str, friend_id: &str) -> Result<bool> {
        let key = ItemKey::friend(user_id, friend_id);
        Ok(self.store.get_optional(&key.pk, &key.sk).await?.is_some())
    }

    /// True if `user_id` has a pending request from `from_id`.
    pub async fn has_incoming_request(&self, user_id: &str, from_id: &str) -> Result<bool> {
        let key = ItemKey::friend_request(user_id, RequestDirection::Incoming, from_id);
        Ok(self.store.get_optional(&key.pk, &key.sk).await?.is_some())
    }

    /// Writes both rows of the friendship `a <-> b`.
    pub async fn add_friend_edge(&self, a: &str, b: &str) -> Result<()> {
        check_pair(a, b)?;
        let requests = vec![
            WriteRequest::Put(Row::new(ItemKey::friend(a, b))),
            WriteRequest::Put(Row::new(ItemKey::friend(b, a))),
        ];
        self.write_pair(a, b, requests).await?;
        info!(a, b, "friend edge added");
        Ok(())
    }

    /// Deletes both rows of the friendship `a <-> b`.
    pub async fn remove_friend_edge(&self, a: &str, b: &str) -> Result<()> {
        check_pair(a, b)?;
        let requests = vec![
            WriteRequest::Delete(ItemKey::friend(a, b)),
            WriteRequest::Delete(ItemKey::friend(b, a)),
        ];
        self.write_pair(a, b, requests).await?;
        info!(a, b, "friend edge removed");
        Ok(())
    }

    /// Records a pending request from `from` to `to`.
    pub async fn add_request_pair(&self, from: &str, to: &str) -> Result<()> {
        check_pair(from, to)?;
        let requests = vec![
            WriteRequest::Put(Row::new(ItemKey::friend_request(
                from,
                RequestDirection::Outgoing,
                to,
            ))),
            WriteRequest::Put(Row::new(ItemKey::friend_request(
                to,
                RequestDirection::Incoming,
                from,
            ))),
        ];
        self.write_pair(from, to, requests).await
    }

    /// Deletes the pending request from `from` to `to`, if any.
    pub async fn remove_request_pair(&self, from: &str, to: &str) -> Result<()> {
        check_pair(from, to)?;
        let requests = vec![
            WriteRequest::Delete(ItemKey::friend_request(
                from,
                RequestDirection::Outgoing,
                to,
            )),
            WriteRequest::Delete(ItemKey::friend_request(
                to,
                RequestDirection::Incoming,
                from,
            )),
        ];
        self.write_pair(from, to, requests).await
    }

    /// Sends a friend request from `from` to `to`.
    ///
    /// Rejects requests to oneself, to unknown users, to existing friends and
    /// to users who already sent `from` a request (that one should be
    /// accepted instead).
    pub async fn send_friend_request(&self, from: &str, to: &str) -> Result<()> {
        if from == to {
            return Err(ServiceError::invalid("cannot send a friend request to yourself"));
        }
        if self
            .store
            .get_optional(&user_key(to), PERSONAL_SK)
            .await?
            .is_none()
        {
            return Err(ServiceError::UserNotFound {
                user_id: to.to_string(),
            });
        }
        if self.has_incoming_request(from, to).await? {
            return Err(ServiceError::invalid(format!(
                "{} already sent {} a friend request",
                to, from
            )));
        }
        if self.are_friends(from, to).await? {
            return Err(ServiceError::AlreadyFriends {
                user_id: from.to_string(),
                friend_id: to.to_string(),
            });
        }
        self.add_request_pair(from, to).await?;
        info!(from, to, "friend request sent");
        Ok(())
    }

    /// Accepts the pending request `from -> user_id`: adds the friendship,
    /// then removes the request pair.
    pub async fn accept_friend_request(&self, user_id: &str, from: &str) -> Result<()> {
        if !self.has_incoming_request(user_id, from).await? {
            return Err(ServiceError::FriendRequestMissing {
                from: from.to_string(),
                to: user_id.to_string(),
            });
        }
        self.add_friend_edge(user_id, from).await?;
        self.remove_request_pair(from, user_id).await
    }

    /// True if either row of the pending request `from -> to` exists.
    pub async fn request_exists(&self, from: &str, to: &str) -> Result<bool> {
        if self.has_incoming_request(to, from).await? {
            return Ok(true);
        }
        let key = ItemKey::friend_request(from, RequestDirection::Outgoing, to);
        Ok(self.store.get_optional(&key.pk, &key.sk).await?.is_some())
    }

    /// Drops the pending request `sender -> receiver`, whichever side
    /// withdraws it. Fails with [`ServiceError::FriendRequestMissing`] if
    /// neither row of the request exists.
    pub async fn remove_friend_request(&self, receiver: &str, sender: &str) -> Result<()> {
        check_pair(sender, receiver)?;
        if !self.request_exists(sender, receiver).await? {
            return Err(ServiceError::FriendRequestMissing {
                from: sender.to_string(),
                to: receiver.to_string(),
            });
        }
        self.remove_request_pair(sender, receiver).await?;
        info!(receiver, sender, "friend request removed");
        Ok(())
    }

    async fn write_pair(&self, a: &str, b: &str, requests: Vec<WriteRequest>) -> Result<()> {
        let first = match self.store.batch_write(requests.clone()).await {
            Ok(_) => return Ok(()),
            Err(e) => e,
        };
        warn!(a, b, error = %first, "edge write failed, one side may be applied; re-issuing");
        match self.store.batch_write(requests).await {
            Ok(_) => {
                info!(a, b, "edge write reconciled");
                Ok(())
            }
            Err(source) => {
                warn!(a, b, error = %source, "edge write failed twice");
                Err(ServiceError::EdgeInconsistent {
                    a: a.to_string(),
                    b: b.to_string(),
                    source,
                })
            }
        }
    }
}

fn check_pair(a: &str, b: &str) -> Result<()> {
    for id in [a, b] {
        schedhelper_store::key::validate_user_id(id)?;
    }
    if a == b {
        return Err(ServiceError::invalid("an edge needs two distinct users"));
    }
    Ok(())
}

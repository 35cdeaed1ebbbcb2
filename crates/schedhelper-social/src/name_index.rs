//! Name search index.
//!
//! Display names are bucketed by their uppercased first character: the row
//! `(name-index#<LETTER>, <display name>)` holds a `users` set of
//! `U{emailLocalPart}P{photoUrl}` entries, one per user with exactly that
//! name. A prefix search only ever touches a single bucket.

use schedhelper_store::codec::decode_all;
use schedhelper_store::key::name_index_bucket;
use schedhelper_store::{ItemKey, NameIndexUser, RecordStore, SetAttr, TaggedEncoding};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, ServiceError};

/// Attribute of a name index row holding the encoded users.
pub const USERS_ATTR: &str = "users";

/// One user matching a name search.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NameMatch {
    /// Full email address.
    pub email: String,
    /// Display name.
    pub name: String,
    /// Public profile photo URL.
    pub photo_url: String,
}

/// Reads and maintains the name index.
#[derive(Clone)]
pub struct NameIndex {
    store: RecordStore,
    email_domain: String,
}

impl NameIndex {
    /// Creates an index view; `email_domain` completes the stored local parts.
    pub fn new(store: RecordStore, email_domain: impl Into<String>) -> Self {
        Self {
            store,
            email_domain: email_domain.into(),
        }
    }

    fn bucket(name: &str) -> Result<String> {
        name_index_bucket(name).ok_or_else(|| ServiceError::invalid("name must not be empty"))
    }

    /// Users whose display name starts with `name` (case-sensitive), in
    /// name order.
    pub async fn lookup_by_prefix(&self, name: &str) -> Result<Vec<NameMatch>> {
        let bucket = Self::bucket(name)?;
        let rows = self.store.query_by_prefix(&bucket, name).await?;

        let mut matches = Vec::new();
        for row in &rows {
            let users = match SetAttr::from_attr(row.attr(USERS_ATTR)) {
                Some(users) => users,
                None => {
                    warn!(bucket = %bucket, name = row.sk(), "name index row without a users set");
                    continue;
                }
            };
            for user in decode_all::<NameIndexUser, _, _>(users.iter()) {
                matches.push(NameMatch {
                    email: format!("{}@{}", user.email_local_part, self.email_domain),
                    name: row.sk().to_string(),
                    photo_url: user.photo_url,
                });
            }
        }
        debug!(query = name, rows = rows.len(), matches = matches.len(), "name lookup");
        Ok(matches)
    }

    async fn read_users(&self, name: &str) -> Result<(ItemKey, SetAttr)> {
        let key = ItemKey::new(Self::bucket(name)?, name);
        let users = self.store.read_set_attr(&key.pk, &key.sk, USERS_ATTR).await?;
        Ok((key, users))
    }

    /// Lists `user_id` under `name`, replacing any entry it already has there.
    pub async fn register_name(
        &self,
        user_id: &str,
        name: &str,
        email_local_part: &str,
        photo_url: &str,
    ) -> Result<()> {
        let entry = NameIndexUser::new(email_local_part, photo_url).encode()?;
        let (key, users) = self.read_users(name).await?;
        let stale = entries_for(&users, email_local_part)
            .into_iter()
            .filter(|raw| *raw != entry)
            .collect::<Vec<_>>();
        self.store
            .update_set(&key.pk, &key.sk, USERS_ATTR, &[entry], &stale)
            .await?;
        info!(user_id, name, "name registered");
        Ok(())
    }

    /// Removes `email_local_part` from `name`. The row is deleted once no
    /// users remain. Returns whether an entry was removed.
    pub async fn remove_name(&self, user_id: &str, name: &str, email_local_part: &str) -> Result<bool> {
        let (key, users) = self.read_users(name).await?;
        let matching = entries_for(&users, email_local_part);
        if matching.is_empty() {
            return Ok(false);
        }

        let remaining = users.apply(Vec::<String>::new(), &matching);
        if remaining.is_null() {
            self.store.delete(&key).await?;
            info!(user_id, name, "name index row deleted");
        } else {
            self.store
                .update_set(&key.pk, &key.sk, USERS_ATTR, &[], &matching)
                .await?;
            info!(user_id, name, "name removed");
        }
        Ok(true)
    }

    /// Moves `email_local_part` from `current_name` to `new_name` and/or
    /// changes its photo. A missing photo keeps the one already indexed.
    pub async fn rename(
        &self,
        user_id: &str,
        email_local_part: &str,
        current_name: &str,
        new_name: Option<&str>,
        photo_url: Option<&str>,
    ) -> Result<()> {
        let (_, users) = self.read_users(current_name).await?;
        let indexed_photo = decode_all::<NameIndexUser, _, _>(users.iter())
            .into_iter()
            .find(|user| user.email_local_part == email_local_part)
            .map(|user| user.photo_url);
        let photo = match (photo_url, indexed_photo.as_deref()) {
            (Some(photo), _) => photo.to_string(),
            (None, Some(photo)) => photo.to_string(),
            (None, None) => {
                return Err(ServiceError::invalid(format!(
                    "{} is not indexed under {:?} and no photo was given",
                    email_local_part, current_name
                )))
            }
        };

        let target = new_name.unwrap_or(current_name);
        if target != current_name {
            self.remove_name(user_id, current_name, email_local_part)
                .await?;
        }
        self.register_name(user_id, target, email_local_part, &photo)
            .await
    }
}

// Stored entries belonging to `email_local_part`, malformed ones excluded.
fn entries_for(users: &SetAttr, email_local_part: &str) -> Vec<String> {
    users
        .iter()
        .filter(|raw| {
            NameIndexUser::decode(raw)
                .map(|user| user.email_local_part == email_local_part)
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}

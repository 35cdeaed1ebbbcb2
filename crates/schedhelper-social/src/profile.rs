//! Per-user profile rows: personal info, preferences, courses taken,
//! interested sections and academic programs.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use schedhelper_store::codec::decode_all;
use schedhelper_store::key::{
    user_key, ACADEMIC_PROGRAMS_SK, COURSES_TAKEN_SK, INTERESTED_SECTIONS_SK, PERSONAL_SK,
    PREFERENCES_SK,
};
use schedhelper_store::{
    AttrValue, CourseTaken, Emphasis, InterestedSection, ItemKey, RecordStore, Row, SetAttr,
    TaggedEncoding,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, ServiceError};

const NAME_ATTR: &str = "name";
const EMAIL_ATTR: &str = "email";
const PHOTO_URL_ATTR: &str = "photoUrl";
const TIME_RANGE_ATTR: &str = "preferredSectionTimeRange";
const SCORE_WEIGHTING_ATTR: &str = "scoreWeighting";
const DIFFICULTY_ATTR: &str = "difficulty";
const COURSE_TRACKING_ATTR: &str = "courseTracking";
const SHOW_RATINGS_ATTR: &str = "showRatings";
const COURSES_ATTR: &str = "courses";
const SECTIONS_ATTR: &str = "sections";
const MAJORS_ATTR: &str = "majors";
const MINORS_ATTR: &str = "minors";
const EMPHASES_ATTR: &str = "emphases";

/// Photo URL value that selects the configured default photo.
pub const DEFAULT_PHOTO_SENTINEL: &str = "default";

const MINUTE_MASK: i64 = 0b11_1111;
const HOUR_MASK: i64 = 0b1_1111;
const WEIGHT_MASK: i64 = 0b111_1111;

/// Preferred daily window for class meetings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    /// Start hour, 0-23.
    pub start_hour: u8,
    /// Start minute, 0-59.
    pub start_minute: u8,
    /// End hour, 0-23.
    pub end_hour: u8,
    /// End minute, 0-59.
    pub end_minute: u8,
}

impl TimeRange {
    /// Packs the range as `startHour<<17 | startMinute<<11 | endHour<<6 | endMinute`.
    pub fn pack(&self) -> Result<i64> {
        for (field, hour) in [("startHour", self.start_hour), ("endHour", self.end_hour)] {
            if hour > 23 {
                return Err(ServiceError::invalid(format!("{} out of range: {}", field, hour)));
            }
        }
        for (field, minute) in [("startMinute", self.start_minute), ("endMinute", self.end_minute)] {
            if minute > 59 {
                return Err(ServiceError::invalid(format!("{} out of range: {}", field, minute)));
            }
        }
        Ok((i64::from(self.start_hour) << 17)
            | (i64::from(self.start_minute) << 11)
            | (i64::from(self.end_hour) << 6)
            | i64::from(self.end_minute))
    }

    /// Inverse of [`TimeRange::pack`].
    pub fn unpack(packed: i64) -> Self {
        Self {
            start_hour: ((packed >> 17) & HOUR_MASK) as u8,
            start_minute: ((packed >> 11) & MINUTE_MASK) as u8,
            end_hour: ((packed >> 6) & HOUR_MASK) as u8,
            end_minute: (packed & MINUTE_MASK) as u8,
        }
    }
}

/// Relative weight of the two rating sources, each 0-100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreWeighting {
    /// Weight of SCU course evaluations.
    pub scu_evals: u8,
    /// Weight of RateMyProfessors.
    pub rmp: u8,
}

impl ScoreWeighting {
    /// Packs the weights as `scuEvals<<7 | rmp`.
    pub fn pack(&self) -> Result<i64> {
        if self.scu_evals > 100 || self.rmp > 100 {
            return Err(ServiceError::invalid(format!(
                "score weights must be 0-100, got {}/{}",
                self.scu_evals, self.rmp
            )));
        }
        Ok((i64::from(self.scu_evals) << 7) | i64::from(self.rmp))
    }

    /// Inverse of [`ScoreWeighting::pack`].
    pub fn unpack(packed: i64) -> Self {
        Self {
            scu_evals: ((packed >> 7) & WEIGHT_MASK) as u8,
            rmp: (packed & WEIGHT_MASK) as u8,
        }
    }
}

/// Contents of the preferences row. Unset fields are left untouched on write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    /// Preferred meeting window.
    pub preferred_section_time_range: Option<TimeRange>,
    /// Rating source weights.
    pub score_weighting: Option<ScoreWeighting>,
    /// Preferred course difficulty.
    pub difficulty: Option<i64>,
    /// Whether course progress tracking is enabled.
    pub course_tracking: Option<bool>,
    /// Whether ratings are shown in the catalog.
    pub show_ratings: Option<bool>,
}

impl Preferences {
    fn from_row(row: &Row) -> Self {
        let number = |name: &str| row.attr(name).and_then(AttrValue::as_n);
        let flag = |name: &str| row.attr(name).and_then(AttrValue::as_bool);
        Self {
            preferred_section_time_range: number(TIME_RANGE_ATTR).map(TimeRange::unpack),
            score_weighting: number(SCORE_WEIGHTING_ATTR).map(ScoreWeighting::unpack),
            difficulty: number(DIFFICULTY_ATTR),
            course_tracking: flag(COURSE_TRACKING_ATTR),
            show_ratings: flag(SHOW_RATINGS_ATTR),
        }
    }

    fn to_updates(&self) -> Result<Vec<(String, AttrValue)>> {
        let mut updates = Vec::new();
        if let Some(range) = &self.preferred_section_time_range {
            updates.push((TIME_RANGE_ATTR.to_string(), AttrValue::N(range.pack()?)));
        }
        if let Some(weighting) = &self.score_weighting {
            updates.push((SCORE_WEIGHTING_ATTR.to_string(), AttrValue::N(weighting.pack()?)));
        }
        if let Some(difficulty) = self.difficulty {
            updates.push((DIFFICULTY_ATTR.to_string(), AttrValue::N(difficulty)));
        }
        if let Some(tracking) = self.course_tracking {
            updates.push((COURSE_TRACKING_ATTR.to_string(), AttrValue::Bool(tracking)));
        }
        if let Some(show) = self.show_ratings {
            updates.push((SHOW_RATINGS_ATTR.to_string(), AttrValue::Bool(show)));
        }
        Ok(updates)
    }
}

/// Public part of the personal row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalInfo {
    /// Display name.
    pub name: String,
    /// Email address.
    pub email: String,
    /// Profile photo URL.
    pub photo_url: String,
}

/// An interested section together with its expiration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterestedEntry {
    /// The section.
    pub section: InterestedSection,
    /// When the interest lapses.
    pub expires_at: DateTime<Utc>,
}

/// Additions and removals for one set-valued profile attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetChange<T> {
    /// Values to add.
    pub add: Vec<T>,
    /// Values to remove; applied after additions.
    pub remove: Vec<T>,
}

impl<T> Default for SetChange<T> {
    fn default() -> Self {
        Self {
            add: Vec::new(),
            remove: Vec::new(),
        }
    }
}

impl<T> SetChange<T> {
    /// True if the change neither adds nor removes anything.
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// Majors, minors and emphases a user is enrolled in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcademicPrograms {
    /// Declared majors.
    pub majors: Vec<String>,
    /// Declared minors.
    pub minors: Vec<String>,
    /// Emphases within the majors.
    pub emphases: Vec<Emphasis>,
}

/// Changes to the academic-programs row. Each set is rewritten independently.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcademicProgramsUpdate {
    /// Majors to add or remove.
    pub majors: SetChange<String>,
    /// Minors to add or remove.
    pub minors: SetChange<String>,
    /// Emphases to add or remove.
    pub emphases: SetChange<Emphasis>,
}

impl AcademicProgramsUpdate {
    /// True if no set is touched.
    pub fn is_empty(&self) -> bool {
        self.majors.is_empty() && self.minors.is_empty() && self.emphases.is_empty()
    }
}

/// Reads and writes the profile rows of a user partition.
#[derive(Clone)]
pub struct ProfileStore {
    store: RecordStore,
    interested_ttl: TimeDelta,
    default_photo_url: String,
}

impl ProfileStore {
    /// Creates a profile view.
    pub fn new(
        store: RecordStore,
        interested_ttl: TimeDelta,
        default_photo_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            interested_ttl,
            default_photo_url: default_photo_url.into(),
        }
    }

    /// True if the user's personal row exists.
    pub async fn user_exists(&self, user_id: &str) -> Result<bool> {
        Ok(self
            .store
            .get_optional(&user_key(user_id), PERSONAL_SK)
            .await?
            .is_some())
    }

    /// Reads the personal row.
    pub async fn get_personal(&self, user_id: &str) -> Result<PersonalInfo> {
        let row = self
            .store
            .get_optional(&user_key(user_id), PERSONAL_SK)
            .await?
            .ok_or_else(|| ServiceError::UserNotFound {
                user_id: user_id.to_string(),
            })?;
        Ok(PersonalInfo {
            name: row.string(NAME_ATTR).unwrap_or_default().to_string(),
            email: row.string(EMAIL_ATTR).unwrap_or_default().to_string(),
            photo_url: row.string(PHOTO_URL_ATTR).unwrap_or_default().to_string(),
        })
    }

    /// Updates name and/or photo. `"default"` as photo selects the default
    /// photo. Returns the personal info as it was before the update.
    pub async fn update_personal(
        &self,
        user_id: &str,
        name: Option<&str>,
        photo_url: Option<&str>,
    ) -> Result<PersonalInfo> {
        let previous = self.get_personal(user_id).await?;
        let mut updates = Vec::new();
        if let Some(name) = name {
            if name.trim().is_empty() {
                return Err(ServiceError::invalid("name must not be empty"));
            }
            updates.push((NAME_ATTR.to_string(), AttrValue::S(name.to_string())));
        }
        if let Some(photo_url) = photo_url {
            updates.push((
                PHOTO_URL_ATTR.to_string(),
                AttrValue::S(self.resolve_photo_url(photo_url).to_string()),
            ));
        }
        if updates.is_empty() {
            return Err(ServiceError::invalid("no personal fields to update"));
        }
        self.store
            .update_attributes(&ItemKey::personal(user_id), updates)
            .await?;
        Ok(previous)
    }

    /// Maps the `"default"` sentinel to the configured default photo.
    pub fn resolve_photo_url<'a>(&'a self, photo_url: &'a str) -> &'a str {
        if photo_url == DEFAULT_PHOTO_SENTINEL {
            &self.default_photo_url
        } else {
            photo_url
        }
    }

    /// Reads the preferences row; a missing row yields all fields unset.
    pub async fn get_preferences(&self, user_id: &str) -> Result<Preferences> {
        Ok(self
            .store
            .get_optional(&user_key(user_id), PREFERENCES_SK)
            .await?
            .map(|row| Preferences::from_row(&row))
            .unwrap_or_default())
    }

    /// Writes the set fields of `preferences`.
    pub async fn set_preferences(&self, user_id: &str, preferences: &Preferences) -> Result<()> {
        let updates = preferences.to_updates()?;
        if updates.is_empty() {
            return Err(ServiceError::invalid("no preference fields to update"));
        }
        self.store
            .update_attributes(&ItemKey::new(user_key(user_id), PREFERENCES_SK), updates)
            .await?;
        Ok(())
    }

    /// Adds and removes courses taken. Returns the resulting count.
    pub async fn update_courses_taken(
        &self,
        user_id: &str,
        add: &[CourseTaken],
        remove: &[CourseTaken],
    ) -> Result<usize> {
        let add = encode_all(add)?;
        let remove = encode_all(remove)?;
        let set = self
            .store
            .update_set(&user_key(user_id), COURSES_TAKEN_SK, COURSES_ATTR, &add, &remove)
            .await?;
        Ok(set.len())
    }

    /// Courses taken; malformed entries are skipped.
    pub async fn list_courses_taken(&self, user_id: &str) -> Result<Vec<CourseTaken>> {
        let set: SetAttr = self
            .store
            .read_set_attr(&user_key(user_id), COURSES_TAKEN_SK, COURSES_ATTR)
            .await?;
        Ok(decode_all::<CourseTaken, _, _>(set.iter()))
    }

    /// Reads the academic-programs row. A missing row or a null set reads
    /// as empty; malformed emphases are skipped.
    pub async fn get_academic_programs(&self, user_id: &str) -> Result<AcademicPrograms> {
        let pk = user_key(user_id);
        let majors = self
            .store
            .read_set_attr(&pk, ACADEMIC_PROGRAMS_SK, MAJORS_ATTR)
            .await?;
        let minors = self
            .store
            .read_set_attr(&pk, ACADEMIC_PROGRAMS_SK, MINORS_ATTR)
            .await?;
        let emphases = self
            .store
            .read_set_attr(&pk, ACADEMIC_PROGRAMS_SK, EMPHASES_ATTR)
            .await?;
        Ok(AcademicPrograms {
            majors: majors.iter().cloned().collect(),
            minors: minors.iter().cloned().collect(),
            emphases: decode_all::<Emphasis, _, _>(emphases.iter()),
        })
    }

    /// Applies `update` to the academic-programs row. A set that ends up
    /// empty is stored as the null marker.
    pub async fn update_academic_programs(
        &self,
        user_id: &str,
        update: &AcademicProgramsUpdate,
    ) -> Result<AcademicPrograms> {
        if update.is_empty() {
            return Err(ServiceError::invalid("no academic programs to add or remove"));
        }
        let add_emphases = encode_all(&update.emphases.add)?;
        let remove_emphases = encode_all(&update.emphases.remove)?;
        let changes = [
            (MAJORS_ATTR, &update.majors.add, &update.majors.remove),
            (MINORS_ATTR, &update.minors.add, &update.minors.remove),
            (EMPHASES_ATTR, &add_emphases, &remove_emphases),
        ];
        for (attribute, add, _) in &changes {
            if add.iter().any(|value| value.trim().is_empty()) {
                return Err(ServiceError::invalid(format!("empty value in {}", attribute)));
            }
        }
        let pk = user_key(user_id);
        for (attribute, add, remove) in changes {
            if add.is_empty() && remove.is_empty() {
                continue;
            }
            self.store
                .update_set(&pk, ACADEMIC_PROGRAMS_SK, attribute, add, remove)
                .await?;
        }
        debug!(user_id, "academic programs updated");
        self.get_academic_programs(user_id).await
    }

    /// Marks sections as interesting until `now` plus the configured TTL.
    /// Re-recording a section extends its expiration.
    pub async fn record_interested_sections(
        &self,
        user_id: &str,
        sections: &[InterestedSection],
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let expires_at = now + self.interested_ttl;
        let mut upserts = BTreeMap::new();
        for section in sections {
            upserts.insert(section.encode()?, AttrValue::N(expires_at.timestamp_millis()));
        }
        self.store
            .update_map_entries(
                &user_key(user_id),
                INTERESTED_SECTIONS_SK,
                SECTIONS_ATTR,
                upserts,
                &[],
            )
            .await?;
        debug!(user_id, count = sections.len(), %expires_at, "interested sections recorded");
        Ok(expires_at)
    }

    /// Drops sections from the interested map.
    pub async fn remove_interested_sections(
        &self,
        user_id: &str,
        sections: &[InterestedSection],
    ) -> Result<()> {
        let removals = encode_all(sections)?;
        self.store
            .update_map_entries(
                &user_key(user_id),
                INTERESTED_SECTIONS_SK,
                SECTIONS_ATTR,
                BTreeMap::new(),
                &removals,
            )
            .await?;
        Ok(())
    }

    /// Interested sections that have not expired at `now`.
    ///
    /// Expired and malformed entries are filtered out but stay stored.
    pub async fn current_interested_sections(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<InterestedEntry>> {
        let map = self
            .store
            .read_map(&user_key(user_id), INTERESTED_SECTIONS_SK, SECTIONS_ATTR)
            .await?;
        let mut entries = Vec::new();
        for (raw, value) in &map {
            let section = match InterestedSection::decode(raw) {
                Ok(section) => section,
                Err(e) => {
                    warn!(user_id, "skipping interested section: {}", e);
                    continue;
                }
            };
            let Some(expires_at) = expiration_of(value) else {
                warn!(user_id, key = %raw, "interested section without a valid expiration");
                continue;
            };
            if expires_at > now {
                entries.push(InterestedEntry {
                    section,
                    expires_at,
                });
            }
        }
        Ok(entries)
    }
}

fn encode_all<T: TaggedEncoding>(records: &[T]) -> Result<Vec<String>> {
    Ok(records
        .iter()
        .map(TaggedEncoding::encode)
        .collect::<schedhelper_store::Result<Vec<_>>>()?)
}

// Expirations are epoch millis, stored as numbers or as numeric strings.
fn expiration_of(value: &AttrValue) -> Option<DateTime<Utc>> {
    let millis = match value {
        AttrValue::N(n) => *n,
        AttrValue::S(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    DateTime::from_timestamp_millis(millis)
}

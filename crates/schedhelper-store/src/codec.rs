//! Tagged composite encodings stored inside set-valued attributes.
//!
//! Each record packs its fields as `X{value}` groups:
//!
//! - interested section: `P{professor}S{section}M{meetingPattern}`
//! - course taken: `P{professor}C{course}T{term}`
//! - name index user: `U{emailLocalPart}P{photoUrl}`
//! - emphasis: `M{major}E{emphasis}`
//!
//! Field values may not contain `{` or `}`; this keeps decoding unambiguous
//! so that `decode(encode(x)) == x` for every accepted value.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

static INTERESTED_SECTION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^P\{([^{}]*)\}S\{([^{}]*)\}M\{([^{}]*)\}$").expect("static pattern")
});
static COURSE_TAKEN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^P\{([^{}]*)\}C\{([^{}]*)\}T\{([^{}]*)\}$").expect("static pattern")
});
static NAME_INDEX_USER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^U\{([^{}]+)\}P\{([^{}]*)\}$").expect("static pattern"));
static EMPHASIS_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^M\{([^{}]+)\}E\{([^{}]+)\}$").expect("static pattern"));

/// A record that has a compact tagged string form.
pub trait TaggedEncoding: Sized {
    /// Human-readable name of the encoding scheme, used in errors and logs.
    const SCHEME: &'static str;

    /// Encodes the record, rejecting field values that would break the grammar.
    fn encode(&self) -> Result<String>;

    /// Decodes a stored string.
    fn decode(raw: &str) -> Result<Self>;
}

fn check_field(field: &'static str, value: &str) -> Result<()> {
    if value.contains(|c: char| c == '{' || c == '}') {
        return Err(StoreError::InvalidField {
            field,
            reason: format!("{:?} contains a reserved brace character", value),
        });
    }
    Ok(())
}

fn malformed(scheme: &'static str, raw: &str) -> StoreError {
    StoreError::MalformedEncoding {
        scheme,
        value: raw.to_string(),
    }
}

/// Decodes every entry of a stored set, skipping (and logging) malformed ones.
pub fn decode_all<T, I, S>(raw: I) -> Vec<T>
where
    T: TaggedEncoding,
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .filter_map(|entry| match T::decode(entry.as_ref()) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(scheme = T::SCHEME, "skipping stored entry: {}", e);
                None
            }
        })
        .collect()
}

/// A course section a user has shown interest in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterestedSection {
    /// Instructor name.
    pub professor: String,
    /// Full section string, e.g. `CSEN 146-1 - Computer Networks`.
    pub section: String,
    /// Meeting pattern, e.g. `M W F | 10:20 AM - 11:25 AM`.
    pub meeting_pattern: String,
}

impl InterestedSection {
    /// Creates a section record.
    pub fn new(
        professor: impl Into<String>,
        section: impl Into<String>,
        meeting_pattern: impl Into<String>,
    ) -> Self {
        Self {
            professor: professor.into(),
            section: section.into(),
            meeting_pattern: meeting_pattern.into(),
        }
    }
}

impl TaggedEncoding for InterestedSection {
    const SCHEME: &'static str = "interested-section";

    fn encode(&self) -> Result<String> {
        check_field("professor", &self.professor)?;
        check_field("section", &self.section)?;
        check_field("meeting_pattern", &self.meeting_pattern)?;
        Ok(format!(
            "P{{{}}}S{{{}}}M{{{}}}",
            self.professor, self.section, self.meeting_pattern
        ))
    }

    fn decode(raw: &str) -> Result<Self> {
        let caps = INTERESTED_SECTION_PATTERN
            .captures(raw)
            .ok_or_else(|| malformed(Self::SCHEME, raw))?;
        Ok(Self::new(&caps[1], &caps[2], &caps[3]))
    }
}

/// A course a user has completed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseTaken {
    /// Instructor name.
    pub professor: String,
    /// Course code and title.
    pub course: String,
    /// Academic period, e.g. `Fall 2024`.
    pub term: String,
}

impl CourseTaken {
    /// Creates a course record.
    pub fn new(
        professor: impl Into<String>,
        course: impl Into<String>,
        term: impl Into<String>,
    ) -> Self {
        Self {
            professor: professor.into(),
            course: course.into(),
            term: term.into(),
        }
    }
}

impl TaggedEncoding for CourseTaken {
    const SCHEME: &'static str = "course-taken";

    fn encode(&self) -> Result<String> {
        check_field("professor", &self.professor)?;
        check_field("course", &self.course)?;
        check_field("term", &self.term)?;
        Ok(format!(
            "P{{{}}}C{{{}}}T{{{}}}",
            self.professor, self.course, self.term
        ))
    }

    fn decode(raw: &str) -> Result<Self> {
        let caps = COURSE_TAKEN_PATTERN
            .captures(raw)
            .ok_or_else(|| malformed(Self::SCHEME, raw))?;
        Ok(Self::new(&caps[1], &caps[2], &caps[3]))
    }
}

/// One user listed under a display name in the name index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NameIndexUser {
    /// Local part of the user's email, which is also the user id.
    pub email_local_part: String,
    /// Public profile photo URL.
    pub photo_url: String,
}

impl NameIndexUser {
    /// Creates a name index entry.
    pub fn new(email_local_part: impl Into<String>, photo_url: impl Into<String>) -> Self {
        Self {
            email_local_part: email_local_part.into(),
            photo_url: photo_url.into(),
        }
    }
}

impl TaggedEncoding for NameIndexUser {
    const SCHEME: &'static str = "name-index-user";

    fn encode(&self) -> Result<String> {
        if self.email_local_part.is_empty() {
            return Err(StoreError::InvalidField {
                field: "email_local_part",
                reason: "must not be empty".to_string(),
            });
        }
        check_field("email_local_part", &self.email_local_part)?;
        check_field("photo_url", &self.photo_url)?;
        Ok(format!("U{{{}}}P{{{}}}", self.email_local_part, self.photo_url))
    }

    fn decode(raw: &str) -> Result<Self> {
        let caps = NAME_INDEX_USER_PATTERN
            .captures(raw)
            .ok_or_else(|| malformed(Self::SCHEME, raw))?;
        Ok(Self::new(&caps[1], &caps[2]))
    }
}

/// An emphasis (concentration) within a major.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Emphasis {
    /// Major the emphasis belongs to.
    pub major: String,
    /// Emphasis name.
    pub emphasis: String,
}

impl Emphasis {
    /// Creates an emphasis record.
    pub fn new(major: impl Into<String>, emphasis: impl Into<String>) -> Self {
        Self {
            major: major.into(),
            emphasis: emphasis.into(),
        }
    }
}

impl TaggedEncoding for Emphasis {
    const SCHEME: &'static str = "emphasis";

    fn encode(&self) -> Result<String> {
        for (field, value) in [("major", &self.major), ("emphasis", &self.emphasis)] {
            if value.is_empty() {
                return Err(StoreError::InvalidField {
                    field,
                    reason: "must not be empty".to_string(),
                });
            }
            check_field(field, value)?;
        }
        Ok(format!("M{{{}}}E{{{}}}", self.major, self.emphasis))
    }

    fn decode(raw: &str) -> Result<Self> {
        let caps = EMPHASIS_PATTERN
            .captures(raw)
            .ok_or_else(|| malformed(Self::SCHEME, raw))?;
        Ok(Self::new(&caps[1], &caps[2]))
    }
}

/// A decoded record, discriminated by the scheme that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "camelCase")]
pub enum EncodedRecord {
    /// `P{..}S{..}M{..}`
    InterestedSection(InterestedSection),
    /// `P{..}C{..}T{..}`
    CourseTaken(CourseTaken),
    /// `U{..}P{..}`
    NameIndexUser(NameIndexUser),
    /// `M{..}E{..}`
    Emphasis(Emphasis),
}

impl EncodedRecord {
    /// Decodes a string in whichever scheme matches it.
    pub fn decode_any(raw: &str) -> Result<Self> {
        if let Ok(section) = InterestedSection::decode(raw) {
            return Ok(EncodedRecord::InterestedSection(section));
        }
        if let Ok(course) = CourseTaken::decode(raw) {
            return Ok(EncodedRecord::CourseTaken(course));
        }
        if let Ok(user) = NameIndexUser::decode(raw) {
            return Ok(EncodedRecord::NameIndexUser(user));
        }
        if let Ok(emphasis) = Emphasis::decode(raw) {
            return Ok(EncodedRecord::Emphasis(emphasis));
        }
        Err(malformed("any", raw))
    }

    /// Encodes the wrapped record in its own scheme.
    pub fn encode(&self) -> Result<String> {
        match self {
            EncodedRecord::InterestedSection(r) => r.encode(),
            EncodedRecord::CourseTaken(r) => r.encode(),
            EncodedRecord::NameIndexUser(r) => r.encode(),
            EncodedRecord::Emphasis(r) => r.encode(),
        }
    }

    /// Name of the scheme this record belongs to.
    pub fn scheme(&self) -> &'static str {
        match self {
            EncodedRecord::InterestedSection(_) => InterestedSection::SCHEME,
            EncodedRecord::CourseTaken(_) => CourseTaken::SCHEME,
            EncodedRecord::NameIndexUser(_) => NameIndexUser::SCHEME,
            EncodedRecord::Emphasis(_) => Emphasis::SCHEME,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interested_section_encoding() {
        let section = InterestedSection::new(
            "Ada Lovelace",
            "CSEN 146-1 - Computer Networks",
            "M W F | 10:20 AM - 11:25 AM",
        );
        let encoded = section.encode().unwrap();
        assert_eq!(
            encoded,
            "P{Ada Lovelace}S{CSEN 146-1 - Computer Networks}M{M W F | 10:20 AM - 11:25 AM}"
        );
        assert_eq!(InterestedSection::decode(&encoded).unwrap(), section);
    }

    #[test]
    fn test_course_taken_encoding() {
        let course = CourseTaken::new("Grace Hopper", "COEN 12 - Data Structures", "Fall 2024");
        let encoded = course.encode().unwrap();
        assert_eq!(
            encoded,
            "P{Grace Hopper}C{COEN 12 - Data Structures}T{Fall 2024}"
        );
        assert_eq!(CourseTaken::decode(&encoded).unwrap(), course);
    }

    #[test]
    fn test_name_index_user_encoding() {
        let user = NameIndexUser::new("jdoe", "https://img.example/p.png");
        let encoded = user.encode().unwrap();
        assert_eq!(encoded, "U{jdoe}P{https://img.example/p.png}");
        assert_eq!(NameIndexUser::decode(&encoded).unwrap(), user);
    }

    #[test]
    fn test_emphasis_encoding() {
        let emphasis = Emphasis::new("Computer Science and Engineering", "Software");
        let encoded = emphasis.encode().unwrap();
        assert_eq!(encoded, "M{Computer Science and Engineering}E{Software}");
        assert_eq!(Emphasis::decode(&encoded).unwrap(), emphasis);

        assert!(Emphasis::new("CSE", "").encode().is_err());
        assert!(Emphasis::new("C{SE", "x").encode().is_err());
        assert!(Emphasis::decode("M{CSE}").is_err());
        assert!(Emphasis::decode("M{}E{x}").is_err());
    }

    #[test]
    fn test_tag_letters_inside_values_are_fine() {
        let section = InterestedSection::new("P S M", "S{", "x");
        assert!(section.encode().is_err());

        let section = InterestedSection::new("PSM", "SPM", "MPS");
        let encoded = section.encode().unwrap();
        assert_eq!(InterestedSection::decode(&encoded).unwrap(), section);
    }

    #[test]
    fn test_braces_rejected() {
        let err = CourseTaken::new("Prof", "C}T{", "Fall").encode().unwrap_err();
        assert!(matches!(err, StoreError::InvalidField { field: "course", .. }));
        assert!(NameIndexUser::new("", "x").encode().is_err());
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(
            InterestedSection::decode("P{a}S{b}"),
            Err(StoreError::MalformedEncoding { .. })
        ));
        assert!(CourseTaken::decode("P{a}S{b}M{c}").is_err());
        assert!(NameIndexUser::decode("U{}P{x}").is_err());
        assert!(NameIndexUser::decode("garbage").is_err());
    }

    #[test]
    fn test_decode_all_skips_malformed() {
        let stored = vec![
            "P{a}C{b}T{c}".to_string(),
            "legacy-value".to_string(),
            "P{d}C{e}T{f}".to_string(),
        ];
        let decoded: Vec<CourseTaken> = decode_all(&stored);
        assert_eq!(
            decoded,
            vec![CourseTaken::new("a", "b", "c"), CourseTaken::new("d", "e", "f")]
        );
    }

    #[test]
    fn test_decode_any_discriminates() {
        assert!(matches!(
            EncodedRecord::decode_any("P{a}S{b}M{c}").unwrap(),
            EncodedRecord::InterestedSection(_)
        ));
        assert!(matches!(
            EncodedRecord::decode_any("P{a}C{b}T{c}").unwrap(),
            EncodedRecord::CourseTaken(_)
        ));
        let user = EncodedRecord::decode_any("U{a}P{b}").unwrap();
        assert_eq!(user.scheme(), "name-index-user");
        assert_eq!(user.encode().unwrap(), "U{a}P{b}");
        assert!(matches!(
            EncodedRecord::decode_any("M{CSE}E{Software}").unwrap(),
            EncodedRecord::Emphasis(_)
        ));
        assert!(EncodedRecord::decode_any("nope").is_err());
    }
}

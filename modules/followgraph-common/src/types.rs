use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::FollowgraphError;

// --- Thresholds ---

/// Stored individual/unclassified accounts older than this are rewritten even if unchanged.
pub const ACCOUNT_STALE_DAYS: i64 = 14;

/// Stored organization accounts older than this are re-fetched during employer resolution.
pub const ORG_STALE_DAYS: i64 = 45;

/// How long an org index snapshot is served before a query triggers a rebuild.
pub const ORG_INDEX_REFRESH_SECS: u64 = 600;

// --- Enums ---

/// Which side of a follow relationship a connection list describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Accounts that follow the root: `(u)-[:FOLLOWS]->(root)`.
    Followers,
    /// Accounts the root follows: `(root)-[:FOLLOWS]->(u)`.
    Following,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Followers => "followers",
            Direction::Following => "following",
        }
    }

    /// Build the stored FOLLOWS pair between the root account and one connection.
    pub fn edge(&self, root_id: &str, other_id: &str) -> EdgePair {
        match self {
            Direction::Followers => EdgePair::new(other_id, root_id),
            Direction::Following => EdgePair::new(root_id, other_id),
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationTag {
    Individual,
    Organization,
    Spam,
    #[default]
    Unclassified,
}

impl ClassificationTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassificationTag::Individual => "individual",
            ClassificationTag::Organization => "organization",
            ClassificationTag::Spam => "spam",
            ClassificationTag::Unclassified => "unclassified",
        }
    }

    /// Parse a tag strictly. Case and surrounding whitespace are ignored.
    pub fn parse(raw: &str) -> Result<Self, FollowgraphError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "individual" => Ok(ClassificationTag::Individual),
            "organization" | "organisation" => Ok(ClassificationTag::Organization),
            "spam" => Ok(ClassificationTag::Spam),
            "unclassified" | "" => Ok(ClassificationTag::Unclassified),
            other => Err(FollowgraphError::Validation(format!(
                "unknown classification tag '{other}'"
            ))),
        }
    }

    /// Parse a stored or upstream tag. Unknown values are sanitized to
    /// `Unclassified` and logged rather than rejected.
    pub fn parse_lenient(raw: &str) -> Self {
        Self::parse(raw).unwrap_or_else(|e| {
            warn!(error = %e, "Invalid classification tag, defaulting to unclassified");
            ClassificationTag::Unclassified
        })
    }

    /// Whether a department value may be attached to an account with this tag.
    pub fn accepts_department(&self) -> bool {
        matches!(self, ClassificationTag::Individual | ClassificationTag::Unclassified)
    }
}

impl std::fmt::Display for ClassificationTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relationship types written to the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Follows,
    WorksAt,
    WorkedAt,
    AffiliatedWith,
}

impl EdgeKind {
    /// Cypher relationship type.
    pub fn rel_type(&self) -> &'static str {
        match self {
            EdgeKind::Follows => "FOLLOWS",
            EdgeKind::WorksAt => "WORKS_AT",
            EdgeKind::WorkedAt => "WORKED_AT",
            EdgeKind::AffiliatedWith => "AFFILIATED_WITH",
        }
    }
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.rel_type())
    }
}

/// Directed edge between two account ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgePair {
    pub source: String,
    pub target: String,
}

impl EdgePair {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    /// Composite key used to dedupe batch input.
    pub fn key(&self) -> String {
        format!("{}->{}", self.source, self.target)
    }
}

// --- Accounts ---

/// Organization classification triple.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OrgProfile {
    pub org_type: Option<String>,
    pub subtype: Option<String>,
    pub focus: Option<String>,
}

/// One external social identity, as observed from the API or read back from the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub handle: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub url: Option<String>,
    pub followers_count: i64,
    pub following_count: i64,
    pub verified: bool,
    pub classification: ClassificationTag,
    pub department: Option<String>,
    pub org_profile: Option<OrgProfile>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Minimal account with only identity fields set. Mostly useful in tests and
    /// when an API record carries nothing else.
    pub fn new(id: impl Into<String>, handle: impl Into<String>) -> Self {
        let handle = handle.into();
        Self {
            id: id.into(),
            display_name: handle.clone(),
            handle,
            avatar_url: None,
            bio: None,
            location: None,
            url: None,
            followers_count: 0,
            following_count: 0,
            verified: false,
            classification: ClassificationTag::Unclassified,
            department: None,
            org_profile: None,
            updated_at: Utc::now(),
        }
    }

    pub fn normalized_handle(&self) -> String {
        normalize_handle(&self.handle)
    }
}

/// Lowercase, trim, and strip any leading `@` from a handle.
pub fn normalize_handle(raw: &str) -> String {
    raw.trim().trim_start_matches('@').trim().to_lowercase()
}

// --- Enrichment ---

/// Classification output of the (external) enrichment step.
///
/// Departments only exist on the variants that may carry one, so an organization
/// with a department cannot be constructed. Deserialization is lenient: an unknown
/// tag becomes `Unclassified` instead of failing the surrounding batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tag", rename_all = "snake_case", from = "RawClassification")]
pub enum Classification {
    Individual { department: Option<String> },
    Organization { profile: OrgProfile },
    Spam,
    Unclassified { department: Option<String> },
}

impl Classification {
    pub fn tag(&self) -> ClassificationTag {
        match self {
            Classification::Individual { .. } => ClassificationTag::Individual,
            Classification::Organization { .. } => ClassificationTag::Organization,
            Classification::Spam => ClassificationTag::Spam,
            Classification::Unclassified { .. } => ClassificationTag::Unclassified,
        }
    }

    pub fn department(&self) -> Option<&str> {
        match self {
            Classification::Individual { department }
            | Classification::Unclassified { department } => {
                department.as_deref().map(str::trim).filter(|d| !d.is_empty())
            }
            Classification::Organization { .. } | Classification::Spam => None,
        }
    }

    pub fn org_profile(&self) -> Option<&OrgProfile> {
        match self {
            Classification::Organization { profile } => Some(profile),
            _ => None,
        }
    }

    /// Build from a raw tag string plus optional department. Invalid tags are
    /// sanitized to `Unclassified`; a department on an organization or spam
    /// record is discarded.
    pub fn from_raw(tag: &str, department: Option<String>, profile: Option<OrgProfile>) -> Self {
        match ClassificationTag::parse_lenient(tag) {
            ClassificationTag::Individual => Classification::Individual { department },
            ClassificationTag::Organization => Classification::Organization {
                profile: profile.unwrap_or_default(),
            },
            ClassificationTag::Spam => Classification::Spam,
            ClassificationTag::Unclassified => Classification::Unclassified { department },
        }
    }
}

/// Wire shape of a classification before its tag is validated.
#[derive(Deserialize)]
struct RawClassification {
    #[serde(default)]
    tag: String,
    #[serde(default)]
    department: Option<String>,
    #[serde(default)]
    profile: Option<OrgProfile>,
}

impl From<RawClassification> for Classification {
    fn from(raw: RawClassification) -> Self {
        Classification::from_raw(&raw.tag, raw.department, raw.profile)
    }
}

/// Per-account enrichment record consumed by the organization resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrichment {
    pub account_id: String,
    pub classification: Classification,
    #[serde(default)]
    pub current_employers: Vec<String>,
    #[serde(default)]
    pub past_employers: Vec<String>,
}

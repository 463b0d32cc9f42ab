use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Canonical release-note category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReleaseKind {
    Fix,
    Issue,
    Change,
    Feature,
    Announcement,
}

impl ReleaseKind {
    pub const ALL: [ReleaseKind; 5] = [
        ReleaseKind::Fix,
        ReleaseKind::Issue,
        ReleaseKind::Change,
        ReleaseKind::Feature,
        ReleaseKind::Announcement,
    ];

    /// Map a raw page class marker (e.g. `release-fixed`) to its kind.
    /// Canonical labels are not markers and do not map.
    pub fn from_marker(marker: &str) -> Option<Self> {
        match marker {
            "release-fixed" => Some(Self::Fix),
            "release-issue" => Some(Self::Issue),
            "release-changed" => Some(Self::Change),
            "release-feature" => Some(Self::Feature),
            "release-announcement" => Some(Self::Announcement),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fix => "Fix",
            Self::Issue => "Issue",
            Self::Change => "Change",
            Self::Feature => "Feature",
            Self::Announcement => "Announcement",
        }
    }
}

impl fmt::Display for ReleaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Parses canonical labels only, as stored in the warehouse table.
impl FromStr for ReleaseKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("not a release kind: '{}'", s))
    }
}

/// One entry as it appears on the page, before any parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub date_text: String,
    pub marker: String,
    pub description: String,
}

/// A raw entry tagged with the product it was scraped for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub product: String,
    pub entry: RawEntry,
}

/// A normalized release note, one row of the published table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRecord {
    pub date: NaiveDate,
    #[serde(rename = "release_type")]
    pub release_kind: ReleaseKind,
    pub description: String,
    pub product: String,
}

/// Turns a normalized record back into raw shape. The result does not
/// normalize again: the date is ISO formatted and the marker is a label.
impl From<&ReleaseRecord> for RawRecord {
    fn from(r: &ReleaseRecord) -> Self {
        RawRecord {
            product: r.product.clone(),
            entry: RawEntry {
                date_text: r.date.to_string(),
                marker: r.release_kind.as_str().to_string(),
                description: r.description.clone(),
            },
        }
    }
}

//! Release log grammar.
//!
//! A release log document is a sequence of blocks separated by blank lines.
//! Each block announces one version:
//!
//! ```text
//! v1.2.3 (14h50, 2024-01-05)
//! free-form notes
//! Version
//! github.com/acme/widget/releases/tag/v1.2.3
//! ```
//!
//! The `HHhMM, ` part is optional; without it the timestamp is UTC midnight.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use regex::Regex;

use crate::model::Step;

/// Literal line separating the notes from the release references.
pub const RELEASE_MARKER: &str = "Version";

static HEADER: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"^([vV]?\d+\.\d+\.\d+(?:-[A-Za-z0-9]+)?)\s\((?:(\d{2})h(\d{2}),\s)?(\d{4}-\d{2}-\d{2})\)$",
    )
    .ok()
});

static RELEASE_REF: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?:https?://)?([^/\s]+)/([^/\s]+)/([^/\s]+)/releases/tag/([^/\s?#]+)").ok()
});

static BLANK_LINES: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\n{2,}").ok());

/// One parsed release announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionBlock {
    /// Always starts with `v`.
    pub version: String,
    /// Lines between the header and the marker.
    pub content: Vec<String>,
    /// Non-empty lines after the marker, unparsed.
    pub releases: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl VersionBlock {
    /// Release references that parse, with the lines that did not.
    pub fn release_refs(&self) -> (Vec<ReleaseRef>, Vec<&str>) {
        let mut refs = Vec::new();
        let mut rejected = Vec::new();
        for line in &self.releases {
            match ReleaseRef::parse(line) {
                Some(r) => refs.push(r),
                None => rejected.push(line.as_str()),
            }
        }
        (refs, rejected)
    }
}

/// A `host/OWNER/REPO/releases/tag/TAG` reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReleaseRef {
    pub host: String,
    pub owner: String,
    pub repo: String,
    pub tag: String,
}

impl ReleaseRef {
    /// Find a release reference anywhere in `line`.
    pub fn parse(line: &str) -> Option<Self> {
        let caps = RELEASE_REF.as_ref()?.captures(line)?;
        Some(Self {
            host: caps[1].to_string(),
            owner: caps[2].to_string(),
            repo: caps[3].to_string(),
            tag: caps[4].to_string(),
        })
    }
}

impl std::fmt::Display for ReleaseRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}/releases/tag/{}",
            self.host, self.owner, self.repo, self.tag
        )
    }
}

/// Parse one block. Grammar mismatches are `Skipped`, never errors.
pub fn parse_version_block(text: &str) -> Step<VersionBlock> {
    let mut lines = text.lines().map(|l| l.trim_end_matches('\r'));
    let Some(header) = lines.next() else {
        return skipped("empty block");
    };
    let header = header.trim();

    let Some(caps) = HEADER.as_ref().and_then(|re| re.captures(header)) else {
        return skipped(format!("header does not match: {header:?}"));
    };

    let Some(timestamp) = header_timestamp(
        caps.get(2).map(|m| m.as_str()),
        caps.get(3).map(|m| m.as_str()),
        &caps[4],
    ) else {
        return skipped(format!("invalid date or time in header: {header:?}"));
    };

    let rest: Vec<&str> = lines.collect();
    let Some(marker) = rest.iter().position(|l| l.trim_end() == RELEASE_MARKER) else {
        return skipped(format!("no {RELEASE_MARKER:?} line in block {header:?}"));
    };

    Step::Done(VersionBlock {
        version: normalize_version(&caps[1]),
        content: rest[..marker].iter().map(|l| l.to_string()).collect(),
        releases: rest[marker + 1..]
            .iter()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect(),
        timestamp,
    })
}

/// Split raw document text into trimmed, non-empty blocks.
pub fn split_blocks(text: &str) -> Vec<String> {
    let text = text.replace("\r\n", "\n");
    let Some(separator) = BLANK_LINES.as_ref() else {
        return vec![text.trim().to_string()];
    };
    separator
        .split(&text)
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(str::to_string)
        .collect()
}

fn normalize_version(token: &str) -> String {
    let bare = token.strip_prefix(['v', 'V']).unwrap_or(token);
    format!("v{bare}")
}

fn header_timestamp(hour: Option<&str>, minute: Option<&str>, date: &str) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let time = match (hour, minute) {
        (Some(h), Some(m)) => NaiveTime::from_hms_opt(h.parse().ok()?, m.parse().ok()?, 0)?,
        _ => NaiveTime::MIN,
    };
    Some(date.and_time(time).and_utc())
}

fn skipped<T>(reason: impl Into<String>) -> Step<T> {
    let reason = reason.into();
    tracing::debug!(%reason, "version block skipped");
    Step::Skipped(reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_without_prefix_gets_one() {
        assert_eq!(normalize_version("1.0.0"), "v1.0.0");
        assert_eq!(normalize_version("v1.0.0"), "v1.0.0");
        assert_eq!(normalize_version("V1.0.0"), "v1.0.0");
    }

    #[test]
    fn out_of_range_time_is_rejected() {
        assert!(header_timestamp(Some("25"), Some("00"), "2024-01-05").is_none());
        assert!(header_timestamp(None, None, "2024-02-30").is_none());
    }
}

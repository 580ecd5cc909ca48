//! Semantic version comparison for tool update checks.

use regex::Regex;
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub prerelease: Option<String>,
}

fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^v?(\d+)\.(\d+)\.(\d+)(?:-([A-Za-z0-9.-]+))?(?:\+[A-Za-z0-9.-]+)?$")
            .expect("version pattern")
    })
}

impl Version {
    /// Parse `1.2.3`, `v1.2.3`, `2024.08.06` style tags; build metadata is
    /// ignored.
    pub fn parse(raw: &str) -> Option<Self> {
        let caps = version_pattern().captures(raw.trim())?;
        Some(Self {
            major: caps.get(1)?.as_str().parse().ok()?,
            minor: caps.get(2)?.as_str().parse().ok()?,
            patch: caps.get(3)?.as_str().parse().ok()?,
            prerelease: caps.get(4).map(|m| m.as_str().to_string()),
        })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            // A release outranks any prerelease of the same number.
            .then_with(|| match (&self.prerelease, &other.prerelease) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.prerelease {
            write!(f, "-{pre}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePriority {
    None,
    Low,
    Medium,
    High,
    Critical,
}

/// How urgently an available update should be surfaced. Unparseable
/// versions get a medium nudge rather than silence.
pub fn update_priority(current: &str, latest: &str) -> UpdatePriority {
    let (Some(cur), Some(new)) = (Version::parse(current), Version::parse(latest)) else {
        return if current.trim() == latest.trim() {
            UpdatePriority::None
        } else {
            UpdatePriority::Medium
        };
    };

    if cur >= new {
        return UpdatePriority::None;
    }
    if new.major > cur.major {
        return UpdatePriority::High;
    }
    if new.minor > cur.minor {
        return UpdatePriority::Medium;
    }
    if new.patch > cur.patch {
        return UpdatePriority::Low;
    }
    // Same triple: moving off a prerelease onto the release.
    if cur.prerelease.is_some() && new.prerelease.is_none() {
        return UpdatePriority::Medium;
    }
    UpdatePriority::Low
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_tag_shapes() {
        let plain = Version::parse("1.2.3").expect("plain");
        assert_eq!((plain.major, plain.minor, plain.patch), (1, 2, 3));

        let tagged = Version::parse("v2024.8.6").expect("tagged");
        assert_eq!(tagged.major, 2024);

        let pre = Version::parse("1.0.0-rc.1").expect("prerelease");
        assert_eq!(pre.prerelease.as_deref(), Some("rc.1"));

        let build = Version::parse("1.0.0+build.5").expect("build metadata");
        assert_eq!(build.prerelease, None);

        assert_eq!(Version::parse("not-a-version"), None);
        assert_eq!(Version::parse("1.2"), None);
    }

    #[test]
    fn ordering_puts_releases_above_prereleases() {
        let release = Version::parse("1.0.0").expect("release");
        let rc = Version::parse("1.0.0-rc.1").expect("rc");
        let next = Version::parse("1.0.1").expect("next");
        assert!(release > rc);
        assert!(next > release);
        assert!(next > rc);
    }

    #[test]
    fn priority_tracks_the_bumped_component() {
        assert_eq!(update_priority("1.2.3", "2.0.0"), UpdatePriority::High);
        assert_eq!(update_priority("1.2.3", "1.3.0"), UpdatePriority::Medium);
        assert_eq!(update_priority("1.2.3", "1.2.4"), UpdatePriority::Low);
        assert_eq!(update_priority("1.2.3", "1.2.3"), UpdatePriority::None);
        assert_eq!(update_priority("2.0.0", "1.9.9"), UpdatePriority::None);
    }

    #[test]
    fn prerelease_to_release_is_a_medium_nudge() {
        assert_eq!(
            update_priority("1.0.0-rc.1", "1.0.0"),
            UpdatePriority::Medium
        );
    }

    #[test]
    fn unparseable_versions_fall_back_to_medium() {
        assert_eq!(update_priority("nightly", "2024.08.06"), UpdatePriority::Medium);
        assert_eq!(update_priority("nightly", "nightly"), UpdatePriority::None);
    }
}

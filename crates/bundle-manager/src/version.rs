//! Bundle and Kubernetes version ordering
//!
//! Bundle names encode the Kubernetes line they target and a release
//! ordinal: `v1.21-1001` or `v1-21-1001`. Bundles compare by
//! `(major, minor, ordinal)`, never by the order they were listed in.

use crate::error::VersionError;
use std::fmt;

/// Kubernetes `major.minor` line
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KubeVersion {
    /// Major version
    pub major: u32,
    /// Minor version
    pub minor: u32,
}

impl KubeVersion {
    /// Creates a version from its parts.
    #[must_use]
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Parses `v1.21`, `1.21`, `v1.21.3-eks-abc` or `v1-21`.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError`] when no numeric major and minor are found.
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let trimmed = input.trim();
        let unprefixed = trimmed
            .strip_prefix(['v', 'V'])
            .unwrap_or(trimmed);
        let mut parts = unprefixed.split(['.', '-']);
        let major = parts.next().unwrap_or_default();
        let minor = parts.next().unwrap_or_default();
        Self::from_parts(major, minor).map_err(|e| VersionError {
            input: input.to_string(),
            reason: e.reason,
        })
    }

    /// Builds a version from separate major and minor strings, as reported
    /// by the API server's `/version` endpoint. Trailing non-digits on the
    /// minor (`21+`) are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError`] when either part has no leading digits.
    pub fn from_parts(major: &str, minor: &str) -> Result<Self, VersionError> {
        let error = |reason: &str| VersionError {
            input: format!("{major}.{minor}"),
            reason: reason.to_string(),
        };
        let major: u32 = major
            .trim()
            .parse()
            .map_err(|_| error("major version is not a number"))?;
        let minor_digits: String = minor
            .trim()
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        let minor: u32 = minor_digits
            .parse()
            .map_err(|_| error("minor version is not a number"))?;
        Ok(Self { major, minor })
    }
}

impl fmt::Display for KubeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}", self.major, self.minor)
    }
}

/// Position of a bundle in the release order
///
/// Field order matters: the derived `Ord` compares the Kubernetes line
/// first and the ordinal second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BundleVersion {
    /// Kubernetes line the bundle targets
    pub kube: KubeVersion,
    /// Release ordinal within that line
    pub ordinal: u64,
}

impl BundleVersion {
    /// Parses a bundle name such as `v1.21-1001` or `v1-21-1001`.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError`] when the name does not follow the
    /// `v<major>.<minor>-<ordinal>` layout.
    pub fn parse(name: &str) -> Result<Self, VersionError> {
        let error = |reason: &str| VersionError {
            input: name.to_string(),
            reason: reason.to_string(),
        };
        let (line, ordinal) = name
            .trim()
            .rsplit_once('-')
            .ok_or_else(|| error("missing ordinal"))?;
        let ordinal = ordinal
            .parse::<u64>()
            .map_err(|_| error("ordinal is not a number"))?;

        let unprefixed = line.strip_prefix(['v', 'V']).unwrap_or(line);
        let parts: Vec<&str> = unprefixed.split(['.', '-']).collect();
        let [major, minor] = parts.as_slice() else {
            return Err(error("expected <major>.<minor> before the ordinal"));
        };
        if !minor.chars().all(|c| c.is_ascii_digit()) {
            return Err(error("minor version is not a number"));
        }
        let kube = KubeVersion::from_parts(major, minor).map_err(|e| error(&e.reason))?;
        Ok(Self { kube, ordinal })
    }

    /// Whether `self` is a strictly newer release on the same Kubernetes line.
    #[must_use]
    pub fn is_upgrade_over(&self, other: &Self) -> bool {
        self.kube == other.kube && self.ordinal > other.ordinal
    }
}

impl fmt::Display for BundleVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.kube, self.ordinal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kube_version_formats() {
        for input in ["v1.21", "1.21", "v1.21.3", "v1.21.3-eks-1-21-4", "v1-21", " V1.21 "] {
            assert_eq!(KubeVersion::parse(input).unwrap(), KubeVersion::new(1, 21), "{input}");
        }
        assert!(KubeVersion::parse("").is_err());
        assert!(KubeVersion::parse("v1").is_err());
        assert!(KubeVersion::parse("vx.21").is_err());
    }

    #[test]
    fn test_kube_version_from_discovery_parts() {
        assert_eq!(KubeVersion::from_parts("1", "21+").unwrap(), KubeVersion::new(1, 21));
        assert_eq!(KubeVersion::from_parts("1", "30").unwrap(), KubeVersion::new(1, 30));
        assert!(KubeVersion::from_parts("1", "+").is_err());
        assert!(KubeVersion::from_parts("", "21").is_err());
    }

    #[test]
    fn test_bundle_version_parses_both_name_layouts() {
        let dotted = BundleVersion::parse("v1.21-1001").unwrap();
        let dashed = BundleVersion::parse("v1-21-1001").unwrap();
        assert_eq!(dotted, dashed);
        assert_eq!(dotted.kube, KubeVersion::new(1, 21));
        assert_eq!(dotted.ordinal, 1001);
        assert_eq!(dotted.to_string(), "v1.21-1001");
    }

    #[test]
    fn test_bundle_version_rejects_malformed_names() {
        for name in ["", "latest", "v1.21", "v1.21-", "v1.21-abc", "v1-1001", "v1.21.3-1001", "v1.2x-1001"] {
            assert!(BundleVersion::parse(name).is_err(), "{name}");
        }
    }

    #[test]
    fn test_ordering_is_by_line_then_ordinal() {
        let mut versions: Vec<BundleVersion> = ["v1.22-1", "v1.21-1002", "v1.21-999", "v1.21-1001"]
            .into_iter()
            .map(|n| BundleVersion::parse(n).unwrap())
            .collect();
        versions.sort();
        let names: Vec<String> = versions.iter().map(ToString::to_string).collect();
        assert_eq!(names, ["v1.21-999", "v1.21-1001", "v1.21-1002", "v1.22-1"]);
    }

    #[test]
    fn test_upgrade_only_within_same_line() {
        let active = BundleVersion::parse("v1.21-1001").unwrap();
        let newer = BundleVersion::parse("v1.21-1002").unwrap();
        let other_line = BundleVersion::parse("v1.22-1").unwrap();

        assert!(newer.is_upgrade_over(&active));
        assert!(!active.is_upgrade_over(&newer));
        assert!(!active.is_upgrade_over(&active));
        assert!(!other_line.is_upgrade_over(&active));
        assert!(!active.is_upgrade_over(&other_line));
    }
}

//! Artifact reference parsing
//!
//! Parses `[oci://]registry[:port]/repository[:tag][@sha256:<hex>]` into its
//! parts. There is no implicit default registry: a reference must name the
//! host it lives on.

use crate::error::RegistryError;
use std::fmt;
use std::str::FromStr;

const OCI_SCHEME: &str = "oci://";
const DIGEST_PREFIX: &str = "sha256:";
const MAX_TAG_LEN: usize = 128;

/// Tag used when a reference names neither a tag nor a digest.
pub const DEFAULT_TAG: &str = "latest";

/// A parsed registry artifact reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactReference {
    /// Registry host, including the port when one was given
    pub registry: String,
    /// Repository path within the registry
    pub repository: String,
    /// Tag, `latest` when neither tag nor digest was supplied
    pub tag: Option<String>,
    /// Content digest (`sha256:<hex>`)
    pub digest: Option<String>,
}

impl ArtifactReference {
    /// Parses a reference string.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::BadReference`] when any component is
    /// missing or malformed.
    pub fn parse(input: &str) -> Result<Self, RegistryError> {
        let bad = |reason: &str| RegistryError::BadReference {
            reference: input.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(bad("reference is empty"));
        }

        let without_scheme = trimmed.strip_prefix(OCI_SCHEME).unwrap_or(trimmed);
        if without_scheme.contains("://") {
            return Err(bad("only the oci:// scheme is supported"));
        }

        let (without_digest, digest) = split_digest(without_scheme).map_err(bad)?;
        if let Some(digest) = digest {
            validate_digest(digest).map_err(bad)?;
        }

        let (name, tag) = match without_digest.rsplit_once(':') {
            Some((name, candidate)) if !candidate.contains('/') => (name, Some(candidate)),
            _ => (without_digest, None),
        };
        if let Some(tag) = tag {
            validate_tag(tag).map_err(bad)?;
        }

        let Some((registry, repository)) = name.split_once('/') else {
            return Err(bad("missing registry host"));
        };
        validate_registry(registry).map_err(bad)?;
        validate_repository(repository).map_err(bad)?;

        let tag = match (tag, digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            (tag, _) => tag.map(ToString::to_string),
        };

        Ok(Self {
            registry: registry.to_string(),
            repository: repository.to_string(),
            tag,
            digest: digest.map(ToString::to_string),
        })
    }

    /// Manifest reference: the digest when pinned, otherwise the tag.
    #[must_use]
    pub fn reference(&self) -> &str {
        self.digest
            .as_deref()
            .or(self.tag.as_deref())
            .unwrap_or(DEFAULT_TAG)
    }
}

fn split_digest(input: &str) -> Result<(&str, Option<&str>), &'static str> {
    let mut parts = input.split('@');
    let name = parts.next().unwrap_or_default();
    let digest = parts.next();
    if parts.next().is_some() {
        return Err("more than one digest separator");
    }
    Ok((name, digest))
}

fn validate_registry(registry: &str) -> Result<(), &'static str> {
    let (host, port) = match registry.split_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (registry, None),
    };
    if host.is_empty()
        || !host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-'))
    {
        return Err("invalid registry host");
    }
    if port.is_some_and(|port| port.parse::<u16>().is_err()) {
        return Err("invalid registry port");
    }
    Ok(())
}

fn validate_repository(repository: &str) -> Result<(), &'static str> {
    if repository.is_empty() {
        return Err("missing repository");
    }
    for segment in repository.split('/') {
        if segment.is_empty()
            || !segment.chars().all(|c| {
                c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-')
            })
        {
            return Err("invalid repository path");
        }
    }
    Ok(())
}

fn validate_tag(tag: &str) -> Result<(), &'static str> {
    if tag.is_empty() || tag.len() > MAX_TAG_LEN {
        return Err("invalid tag length");
    }
    if tag.starts_with(['.', '-'])
        || !tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err("invalid tag");
    }
    Ok(())
}

fn validate_digest(digest: &str) -> Result<(), &'static str> {
    let Some(hex) = digest.strip_prefix(DIGEST_PREFIX) else {
        return Err("only sha256 digests are supported");
    };
    if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err("malformed sha256 digest");
    }
    Ok(())
}

impl FromStr for ArtifactReference {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ArtifactReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "sha256:0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    #[test]
    fn test_parse_registry_repository_and_tag() {
        let reference =
            ArtifactReference::parse("public.ecr.aws/eks-anywhere/eks-anywhere-packages-bundles:v1-21-1001")
                .unwrap();
        assert_eq!(reference.registry, "public.ecr.aws");
        assert_eq!(reference.repository, "eks-anywhere/eks-anywhere-packages-bundles");
        assert_eq!(reference.tag.as_deref(), Some("v1-21-1001"));
        assert!(reference.digest.is_none());
        assert_eq!(reference.reference(), "v1-21-1001");
    }

    #[test]
    fn test_parse_defaults_tag_to_latest() {
        let reference = ArtifactReference::parse("oci://harbor.eksa.demo:30003/bundles").unwrap();
        assert_eq!(reference.registry, "harbor.eksa.demo:30003");
        assert_eq!(reference.repository, "bundles");
        assert_eq!(reference.tag.as_deref(), Some(DEFAULT_TAG));
    }

    #[test]
    fn test_parse_digest_pins_reference() {
        let input = format!("registry.example.com/demo/app@{DIGEST}");
        let reference = ArtifactReference::parse(&input).unwrap();
        assert!(reference.tag.is_none());
        assert_eq!(reference.digest.as_deref(), Some(DIGEST));
        assert_eq!(reference.reference(), DIGEST);
        assert_eq!(reference.to_string(), input);
    }

    #[test]
    fn test_parse_tag_and_digest() {
        let input = format!("registry.example.com/app:v1@{DIGEST}");
        let reference: ArtifactReference = input.parse().unwrap();
        assert_eq!(reference.tag.as_deref(), Some("v1"));
        assert_eq!(reference.reference(), DIGEST);
        assert_eq!(reference.to_string(), input);
    }

    #[test]
    fn test_parse_port_without_tag_is_not_a_tag() {
        let reference = ArtifactReference::parse("localhost:5000/bundles").unwrap();
        assert_eq!(reference.registry, "localhost:5000");
        assert_eq!(reference.tag.as_deref(), Some(DEFAULT_TAG));
    }

    #[test]
    fn test_parse_rejects_malformed_references() {
        for input in [
            "",
            "   ",
            "bundles",
            "bundles:v1",
            "https://public.ecr.aws/bundles",
            "public.ecr.aws/",
            "public.ecr.aws//bundles",
            "public.ecr.aws/Bundles",
            "public.ecr.aws/bundles:",
            "public.ecr.aws/bundles:-v1",
            "public.ecr.aws/bundles@sha256:abc",
            "public.ecr.aws/bundles@md5:0123",
            "public.ecr.aws:port/bundles",
            "demo@@bad",
        ] {
            let err = ArtifactReference::parse(input).unwrap_err();
            assert!(
                matches!(err, RegistryError::BadReference { .. }),
                "expected BadReference for {input:?}, got {err:?}"
            );
        }
    }

    #[test]
    fn test_parse_rejects_overlong_tag() {
        let input = format!("public.ecr.aws/bundles:{}", "a".repeat(MAX_TAG_LEN + 1));
        assert!(ArtifactReference::parse(&input).is_err());
    }
}

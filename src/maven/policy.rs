use std::fmt::{Display, Formatter};
use std::str::FromStr;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::error::{RepoError, RepoResult};
use crate::maven::coordinates::ArtifactCoordinates;

/// Which versions a repository accepts
#[derive(Debug, Eq, PartialEq, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum VersionPolicy {
    Release,
    Snapshot,
    #[default]
    Mixed,
}
impl VersionPolicy {
    pub fn allows(&self, artifact: &ArtifactCoordinates) -> bool {
        match self {
            VersionPolicy::Release => !artifact.snapshot,
            VersionPolicy::Snapshot => artifact.snapshot,
            VersionPolicy::Mixed => true,
        }
    }

    pub fn check(&self, artifact: &ArtifactCoordinates) -> RepoResult<()> {
        if self.allows(artifact) {
            Ok(())
        }
        else {
            Err(RepoError::PolicyViolation(format!("VersionPolicy '{}' forbids version '{}'", self, artifact.version)))
        }
    }
}

/// Whether an existing artifact may be overwritten
#[derive(Debug, Eq, PartialEq, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RedeployPolicy {
    #[default]
    Allow,
    Disallow,
}
impl RedeployPolicy {
    /// Only the main files of artifacts are protected: hash sidecars are re-uploaded as a matter of
    ///  course, and metadata is not an artifact.
    pub fn check(&self, artifact: &ArtifactCoordinates, exists: bool) -> RepoResult<()> {
        match self {
            RedeployPolicy::Disallow if exists && !artifact.is_hash() => {
                Err(RepoError::PolicyViolation("Artifact redeploy not allowed".to_string()))
            }
            _ => Ok(()),
        }
    }
}

/// How a proxy treats checksums published by its remote
#[derive(Debug, Eq, PartialEq, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ChecksumPolicy {
    /// no validation
    Ignore,
    /// validate, log mismatches and serve anyway
    #[default]
    Warn,
    /// reject on mismatch, accept if the remote publishes no checksum
    StrictIfExists,
    /// reject on mismatch and if the remote publishes no checksum
    Strict,
}

macro_rules! policy_names {
    ($t:ident { $($variant:ident => $name:literal),* $(,)? }) => {
        impl $t {
            pub fn name(&self) -> &'static str {
                match self {
                    $($t::$variant => $name),*
                }
            }
        }

        impl Display for $t {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.name())
            }
        }

        /// case insensitive
        impl FromStr for $t {
            type Err = anyhow::Error;

            fn from_str(s: &str) -> anyhow::Result<Self> {
                $(
                    if s.trim().eq_ignore_ascii_case($name) {
                        return Ok($t::$variant);
                    }
                )*
                Err(anyhow!("invalid {}: {:?}", stringify!($t), s))
            }
        }

        impl TryFrom<String> for $t {
            type Error = anyhow::Error;

            fn try_from(value: String) -> anyhow::Result<Self> {
                value.parse()
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> String {
                value.name().to_string()
            }
        }
    }
}

policy_names!(VersionPolicy { Release => "release", Snapshot => "snapshot", Mixed => "mixed" });
policy_names!(RedeployPolicy { Allow => "allow", Disallow => "disallow" });
policy_names!(ChecksumPolicy { Ignore => "ignore", Warn => "warn", StrictIfExists => "strictIfExists", Strict => "strict" });

#[cfg(test)]
mod test {
    use rstest::*;
    use super::*;
    use crate::maven::coordinates::{HashType, MavenPath};
    use crate::maven::paths::parse_path;

    fn artifact(path: &str) -> ArtifactCoordinates {
        match parse_path(path) {
            MavenPath::Artifact(a) => a,
            MavenPath::Plain(_) => panic!("not an artifact: {}", path),
        }
    }

    const RELEASE: &str = "g/a/1.0/a-1.0.jar";
    const SNAPSHOT: &str = "g/a/1.0-SNAPSHOT/a-1.0-20240101.120000-1.jar";

    #[rstest]
    #[case::release_release(VersionPolicy::Release, RELEASE, true)]
    #[case::release_snapshot(VersionPolicy::Release, SNAPSHOT, false)]
    #[case::snapshot_release(VersionPolicy::Snapshot, RELEASE, false)]
    #[case::snapshot_snapshot(VersionPolicy::Snapshot, SNAPSHOT, true)]
    #[case::mixed_release(VersionPolicy::Mixed, RELEASE, true)]
    #[case::mixed_snapshot(VersionPolicy::Mixed, SNAPSHOT, true)]
    fn test_version_policy(#[case] policy: VersionPolicy, #[case] path: &str, #[case] allowed: bool) {
        assert_eq!(policy.check(&artifact(path)).is_ok(), allowed);
    }

    #[test]
    fn test_version_policy_message() {
        let err = VersionPolicy::Release.check(&artifact(SNAPSHOT)).unwrap_err();
        assert_eq!(err.to_string(), "VersionPolicy 'release' forbids version '1.0-20240101.120000-1'");
    }

    #[test]
    fn test_redeploy_policy() {
        let jar = artifact(RELEASE);
        let sha1 = jar.hash(HashType::Sha1).unwrap();

        assert!(RedeployPolicy::Allow.check(&jar, true).is_ok());
        assert!(RedeployPolicy::Disallow.check(&jar, false).is_ok());
        assert!(RedeployPolicy::Disallow.check(&sha1, true).is_ok());

        let err = RedeployPolicy::Disallow.check(&jar, true).unwrap_err();
        assert_eq!(err.to_string(), "Artifact redeploy not allowed");
    }

    #[rstest]
    #[case::lower("strictifexists", ChecksumPolicy::StrictIfExists)]
    #[case::camel("strictIfExists", ChecksumPolicy::StrictIfExists)]
    #[case::upper("WARN", ChecksumPolicy::Warn)]
    #[case::padded(" ignore ", ChecksumPolicy::Ignore)]
    fn test_checksum_policy_from_str(#[case] s: &str, #[case] expected: ChecksumPolicy) {
        assert_eq!(s.parse::<ChecksumPolicy>().unwrap(), expected);
    }

    #[test]
    fn test_invalid_policy_name() {
        assert!("sometimes".parse::<VersionPolicy>().is_err());
        assert!("".parse::<RedeployPolicy>().is_err());
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_string(&ChecksumPolicy::StrictIfExists).unwrap(), "\"strictIfExists\"");
        assert_eq!(serde_json::from_str::<VersionPolicy>("\"SNAPSHOT\"").unwrap(), VersionPolicy::Snapshot);
    }
}

use lazy_static::lazy_static;
use regex::Regex;

use crate::maven::coordinates::*;

lazy_static! {
    static ref TIMESTAMP_REGEX: Regex = Regex::new(r"^\d{8}\.\d{6}").unwrap();
    static ref BUILD_NUMBER_REGEX: Regex = Regex::new(r"^-(\d+)").unwrap();
    static ref SNAPSHOT_VERSION_REGEX: Regex = Regex::new(
        r"^(.*)-([0-9]{8}.[0-9]{6})-([0-9]+)$|^([0-9]{8}.[0-9]{6})-([0-9]+)$|^(.*)([0-9]{8}.[0-9]{6})-([0-9]+)$"
    ).unwrap();
}

const SNAPSHOT: &str = "SNAPSHOT";
const SNAPSHOT_SUFFIX: &str = "-SNAPSHOT";

/// true for both "1.0-SNAPSHOT" and timestamped versions like "1.0-20140903.180000-1"
pub fn is_snapshot_version(version: &str) -> bool {
    SNAPSHOT_VERSION_REGEX.is_match(version) || version.ends_with(SNAPSHOT)
}

/// Parses a path relative to a Maven repository's root, with or without a leading '/'. This never
///  fails: paths that are not artifacts in Maven layout (including repository metadata) are
///  returned as plain coordinates.
pub fn parse_path(path: &str) -> MavenPath {
    match path_to_artifact(path) {
        Some(artifact) => MavenPath::Artifact(artifact),
        None => MavenPath::Plain(Coordinates::new(path)),
    }
}

#[derive(Debug, Eq, PartialEq)]
struct ParsedFileName {
    version: String,
    base_version: String,
    classifier: Option<String>,
    extension: String, // without subordinate suffixes and without leading '.'
}

fn path_to_artifact(path: &str) -> Option<ArtifactCoordinates> {
    let relative = path.strip_prefix('/').unwrap_or(path);

    let (without_filename, file_name) = relative.rsplit_once('/')?;
    let (without_version, version) = without_filename.rsplit_once('/')?;
    let (group_path, artifact_id) = without_version.rsplit_once('/')?;
    if group_path.is_empty() || artifact_id.is_empty() || version.is_empty() || file_name.is_empty() {
        return None;
    }

    // subordinate suffixes: at most one hash, wrapping at most one signature
    let hash_type = HashType::of_file_name(file_name);
    let mut main_file_name = match hash_type {
        Some(t) => &file_name[..file_name.len() - t.ext().len() - 1],
        None => file_name,
    };
    let signature_type = SignatureType::of_file_name(main_file_name);
    if let Some(s) = signature_type {
        main_file_name = &main_file_name[..main_file_name.len() - s.ext().len() - 1];
    }

    if main_file_name == METADATA_FILE_NAME {
        return None;
    }

    let parsed = match version.strip_suffix(SNAPSHOT_SUFFIX) {
        Some(base) => parse_snapshot_file_name(main_file_name, artifact_id, version, base)?,
        None => parse_release_file_name(main_file_name, artifact_id, version)?,
    };

    let mut extension = parsed.extension;
    if let Some(s) = signature_type {
        extension = format!("{}.{}", extension, s.ext());
    }
    if let Some(t) = hash_type {
        extension = format!("{}.{}", extension, t.ext());
    }

    let snapshot = parsed.base_version.ends_with(SNAPSHOT) || is_snapshot_version(&parsed.version);
    Some(ArtifactCoordinates::new(
        path,
        &group_path.replace('/', "."),
        artifact_id,
        &parsed.version,
        &parsed.base_version,
        parsed.classifier.as_deref(),
        &extension,
        snapshot,
    ))
}

/// `<artifactId>-<version>[-<classifier>].<extension>`
fn parse_release_file_name(file_name: &str, artifact_id: &str, version: &str) -> Option<ParsedFileName> {
    let tail = file_name
        .strip_prefix(artifact_id)?
        .strip_prefix('-')?
        .strip_prefix(version)?;

    let (classifier, extension) = split_classifier_and_extension(tail)?;
    Some(ParsedFileName {
        version: version.to_string(),
        base_version: version.to_string(),
        classifier,
        extension,
    })
}

/// Either `<artifactId>-<base>-SNAPSHOT[-<classifier>].<extension>` or the timestamped form
///  `<artifactId>-<base>-<yyyyMMdd.HHmmss>[-<buildNumber>][-<classifier>].<extension>`
fn parse_snapshot_file_name(file_name: &str, artifact_id: &str, version: &str, base: &str) -> Option<ParsedFileName> {
    let rest = file_name
        .strip_prefix(artifact_id)?
        .strip_prefix('-')?
        .strip_prefix(base)?
        .strip_prefix('-')?;

    if let Some(tail) = rest.strip_prefix(SNAPSHOT) {
        let (classifier, extension) = split_classifier_and_extension(tail)?;
        return Some(ParsedFileName {
            version: version.to_string(),
            base_version: version.to_string(),
            classifier,
            extension,
        });
    }

    let timestamp = TIMESTAMP_REGEX.find(rest)?.as_str();
    let mut tail = &rest[timestamp.len()..];
    let mut timestamped_version = format!("{}-{}", base, timestamp);

    if let Some(captures) = BUILD_NUMBER_REGEX.captures(tail) {
        let build_number = captures.get(1)?.as_str();
        // a numeric classifier right after the timestamp is indistinguishable from a build number
        timestamped_version = format!("{}-{}", timestamped_version, build_number);
        tail = &tail[build_number.len() + 1..];
    }

    let (classifier, extension) = split_classifier_and_extension(tail)?;
    Some(ParsedFileName {
        version: timestamped_version,
        base_version: version.to_string(),
        classifier,
        extension,
    })
}

/// `tail` is what follows the version in the file name: `[-<classifier>].<extension>`. The
///  extension starts at the first '.' after the classifier's start; there must be one.
fn split_classifier_and_extension(tail: &str) -> Option<(Option<String>, String)> {
    if !(tail.starts_with('.') || tail.starts_with('-')) {
        return None;
    }
    let ext_pos = tail.find('.')?;
    let extension = &tail[ext_pos + 1..];
    let classifier = if tail.starts_with('-') {
        Some(tail[1..ext_pos].to_string())
    }
    else {
        None
    };
    Some((classifier, extension.to_string()))
}

#[cfg(test)]
mod test {
    use rstest::*;
    use super::*;

    fn artifact(path: &str) -> ArtifactCoordinates {
        match parse_path(path) {
            MavenPath::Artifact(a) => a,
            MavenPath::Plain(c) => panic!("expected artifact, was {:?}", c),
        }
    }

    #[test]
    fn test_timestamped_snapshot() {
        let a = artifact("/org/eclipse/jetty/jetty-io/8.1.16-SNAPSHOT/jetty-io-8.1.16-20140903.180000-1.pom");
        assert_eq!(a.group_id, "org.eclipse.jetty");
        assert_eq!(a.artifact_id, "jetty-io");
        assert_eq!(a.version, "8.1.16-20140903.180000-1");
        assert_eq!(a.base_version, "8.1.16-SNAPSHOT");
        assert_eq!(a.classifier, None);
        assert_eq!(a.extension, "pom");
        assert!(a.snapshot);
        assert!(is_snapshot_version(&a.version));
        assert_eq!(a.path, "/org/eclipse/jetty/jetty-io/8.1.16-SNAPSHOT/jetty-io-8.1.16-20140903.180000-1.pom");
        assert_eq!(a.file_name, "jetty-io-8.1.16-20140903.180000-1.pom");
    }

    #[test]
    fn test_release_with_timestamp_like_qualifier() {
        let a = artifact("/org/eclipse/jetty/jetty-io/8.1.16.v20140903/jetty-io-8.1.16.v20140903.pom");
        assert_eq!(a.version, "8.1.16.v20140903");
        assert_eq!(a.base_version, "8.1.16.v20140903");
        assert!(!a.snapshot);
    }

    #[rstest]
    #[case::release("g/a/1.0/a-1.0.jar", "g", "a", "1.0", "1.0", None, "jar")]
    #[case::leading_slash("/g/a/1.0/a-1.0.jar", "g", "a", "1.0", "1.0", None, "jar")]
    #[case::nested_group("org/apache/maven/maven-core/3.9.6/maven-core-3.9.6.pom", "org.apache.maven", "maven-core", "3.9.6", "3.9.6", None, "pom")]
    #[case::artifact_with_dash("g/x-y/1.0/x-y-1.0.jar", "g", "x-y", "1.0", "1.0", None, "jar")]
    #[case::classifier("g/a/1.0/a-1.0-sources.jar", "g", "a", "1.0", "1.0", Some("sources"), "jar")]
    #[case::classifier_with_dash("g/a/1.0/a-1.0-test-sources.jar", "g", "a", "1.0", "1.0", Some("test-sources"), "jar")]
    #[case::compound_extension("g/a/1.0/a-1.0-bin.tar.gz", "g", "a", "1.0", "1.0", Some("bin"), "tar.gz")]
    #[case::hash("g/a/1.0/a-1.0.jar.sha1", "g", "a", "1.0", "1.0", None, "jar.sha1")]
    #[case::signature("g/a/1.0/a-1.0.jar.asc", "g", "a", "1.0", "1.0", None, "jar.asc")]
    #[case::signature_hash("g/a/1.0/a-1.0.jar.asc.md5", "g", "a", "1.0", "1.0", None, "jar.asc.md5")]
    #[case::snapshot_literal("g/a/1.0-SNAPSHOT/a-1.0-SNAPSHOT.jar", "g", "a", "1.0-SNAPSHOT", "1.0-SNAPSHOT", None, "jar")]
    #[case::snapshot_literal_classifier("g/a/1.0-SNAPSHOT/a-1.0-SNAPSHOT-tests.jar", "g", "a", "1.0-SNAPSHOT", "1.0-SNAPSHOT", Some("tests"), "jar")]
    #[case::snapshot_timestamp_without_build("g/a/1.0-SNAPSHOT/a-1.0-20240101.120000.jar", "g", "a", "1.0-20240101.120000", "1.0-SNAPSHOT", None, "jar")]
    #[case::snapshot_classifier("g/a/1.0-SNAPSHOT/a-1.0-20240101.120000-17-sources.jar", "g", "a", "1.0-20240101.120000-17", "1.0-SNAPSHOT", Some("sources"), "jar")]
    #[case::snapshot_hash("g/a/1.0-SNAPSHOT/a-1.0-20240101.120000-17.pom.sha1", "g", "a", "1.0-20240101.120000-17", "1.0-SNAPSHOT", None, "pom.sha1")]
    fn test_parse_artifact(
        #[case] path: &str,
        #[case] group_id: &str,
        #[case] artifact_id: &str,
        #[case] version: &str,
        #[case] base_version: &str,
        #[case] classifier: Option<&str>,
        #[case] extension: &str,
    ) {
        let a = artifact(path);
        assert_eq!(a.group_id, group_id);
        assert_eq!(a.artifact_id, artifact_id);
        assert_eq!(a.version, version);
        assert_eq!(a.base_version, base_version);
        assert_eq!(a.classifier.as_deref(), classifier);
        assert_eq!(a.extension, extension);
    }

    #[rstest]
    #[case::metadata("g/a/maven-metadata.xml")]
    #[case::version_metadata("g/a/1.0-SNAPSHOT/maven-metadata.xml")]
    #[case::metadata_hash("g/a/1.0-SNAPSHOT/maven-metadata.xml.sha1")]
    #[case::too_short("a/a-1.0.jar")]
    #[case::root_file("archetype-catalog.xml")]
    #[case::wrong_artifact("g/a/1.0/b-1.0.jar")]
    #[case::wrong_version("g/a/1.0/a-1.1.jar")]
    #[case::no_dash_after_artifact("g/a/1.0/a1.0.jar")]
    #[case::no_dash_before_classifier("g/a/1.0/a-1.0x.jar")]
    #[case::no_extension("g/a/1.0/a-1.0")]
    #[case::classifier_without_extension("g/a/1.0/a-1.0-sources")]
    #[case::snapshot_wrong_timestamp("g/a/1.0-SNAPSHOT/a-1.0-2024.jar")]
    #[case::empty_segment("g//1.0/-1.0.jar")]
    #[case::empty("")]
    fn test_parse_plain(#[case] path: &str) {
        assert_eq!(parse_path(path), MavenPath::Plain(Coordinates::new(path)));
    }

    #[test]
    fn test_hash_of_parsed_equals_parsed_hash() {
        for path in ["g/a/1.0/a-1.0.jar", "g/a/1.0-SNAPSHOT/a-1.0-20240101.120000-3-sources.jar", "g/a/maven-metadata.xml"] {
            for hash_type in HashType::ALL {
                let hashed = parse_path(path).hash(hash_type).unwrap();
                assert_eq!(hashed, parse_path(&format!("{}.{}", path, hash_type.ext())));
                assert_eq!(hashed.main(), parse_path(path));
            }
        }
    }

    #[rstest]
    #[case::release("1.0", false)]
    #[case::snapshot("1.0-SNAPSHOT", true)]
    #[case::bare_snapshot("SNAPSHOT", true)]
    #[case::timestamped("1.0-20140903.180000-1", true)]
    #[case::timestamp_only("20140903.180000-1", true)]
    #[case::timestamp_without_dash("1.020140903.180000-1", true)]
    #[case::jetty_release("8.1.16.v20140903", false)]
    #[case::timestamp_without_build("1.0-20140903.180000", false)]
    fn test_is_snapshot_version(#[case] version: &str, #[case] expected: bool) {
        assert_eq!(is_snapshot_version(version), expected);
    }
}

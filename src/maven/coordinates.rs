use crate::util::digesting_stream::HashAlgorithm;

pub const METADATA_FILE_NAME: &str = "maven-metadata.xml";

#[derive(Debug, Eq, PartialEq, Clone, Copy, Hash)]
pub enum HashType {
    Sha1,
    Md5,
}
impl HashType {
    pub const ALL: [HashType; 2] = [HashType::Sha1, HashType::Md5];

    pub fn ext(&self) -> &'static str {
        self.algorithm().name()
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        match self {
            HashType::Sha1 => HashAlgorithm::Sha1,
            HashType::Md5 => HashAlgorithm::Md5,
        }
    }

    /// the hash type whose extension the file name ends with
    pub fn of_file_name(file_name: &str) -> Option<HashType> {
        HashType::ALL.into_iter()
            .find(|t| has_suffix(file_name, t.ext()))
    }
}

#[derive(Debug, Eq, PartialEq, Clone, Copy, Hash)]
pub enum SignatureType {
    Gpg,
}
impl SignatureType {
    pub fn ext(&self) -> &'static str {
        match self {
            SignatureType::Gpg => "asc",
        }
    }

    pub fn of_file_name(file_name: &str) -> Option<SignatureType> {
        if has_suffix(file_name, SignatureType::Gpg.ext()) {
            Some(SignatureType::Gpg)
        }
        else {
            None
        }
    }
}

fn has_suffix(file_name: &str, ext: &str) -> bool {
    file_name.len() > ext.len() + 1
        && file_name.ends_with(ext)
        && file_name.as_bytes()[file_name.len() - ext.len() - 1] == b'.'
}

fn strip_ext<'a>(s: &'a str, ext: &str) -> &'a str {
    &s[..s.len() - ext.len() - 1]
}

/// A path inside a Maven repository that is not (necessarily) an artifact, e.g. repository
///  metadata. The path is kept as given, including a leading '/'.
#[derive(Debug, Eq, PartialEq, Clone, Hash)]
pub struct Coordinates {
    pub path: String,
    pub file_name: String,
    pub hash_type: Option<HashType>,
}
impl Coordinates {
    pub fn new(path: &str) -> Coordinates {
        let file_name = match path.rfind('/') {
            Some(last_slash) => &path[last_slash + 1..],
            None => path,
        };
        Coordinates {
            path: path.to_string(),
            file_name: file_name.to_string(),
            hash_type: HashType::of_file_name(file_name),
        }
    }

    pub fn is_hash(&self) -> bool {
        self.hash_type.is_some()
    }

    pub fn is_subordinate(&self) -> bool {
        self.is_hash()
    }

    pub fn hash(&self, hash_type: HashType) -> Option<Coordinates> {
        if self.is_hash() {
            return None;
        }
        Some(Coordinates {
            path: format!("{}.{}", self.path, hash_type.ext()),
            file_name: format!("{}.{}", self.file_name, hash_type.ext()),
            hash_type: Some(hash_type),
        })
    }

    pub fn subordinate_of(&self) -> Option<Coordinates> {
        let hash_type = self.hash_type?;
        Some(Coordinates {
            path: strip_ext(&self.path, hash_type.ext()).to_string(),
            file_name: strip_ext(&self.file_name, hash_type.ext()).to_string(),
            hash_type: None,
        })
    }

    pub fn main(&self) -> Coordinates {
        self.subordinate_of().unwrap_or_else(|| self.clone())
    }
}

/// Coordinates of an artifact in Maven layout. Subordinate files (hashes, signatures) have their
///  own coordinates: `extension`, `path` and `file_name` carry the subordinate suffixes, e.g.
///  "jar.asc.sha1".
#[derive(Debug, Eq, PartialEq, Clone, Hash)]
pub struct ArtifactCoordinates {
    pub path: String,
    pub file_name: String,
    pub hash_type: Option<HashType>,
    pub group_id: String,
    pub artifact_id: String,
    /// for timestamped snapshots, the timestamped version
    pub version: String,
    /// for timestamped snapshots, the "-SNAPSHOT" version they belong to
    pub base_version: String,
    pub classifier: Option<String>,
    pub extension: String,
    pub signature_type: Option<SignatureType>,
    pub snapshot: bool,
}
impl ArtifactCoordinates {
    /// Empty or blank classifiers are normalized to `None`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        path: &str,
        group_id: &str,
        artifact_id: &str,
        version: &str,
        base_version: &str,
        classifier: Option<&str>,
        extension: &str,
        snapshot: bool,
    ) -> ArtifactCoordinates {
        let plain = Coordinates::new(path);
        ArtifactCoordinates {
            path: plain.path,
            hash_type: plain.hash_type,
            signature_type: match plain.hash_type {
                Some(t) => SignatureType::of_file_name(strip_ext(&plain.file_name, t.ext())),
                None => SignatureType::of_file_name(&plain.file_name),
            },
            file_name: plain.file_name,
            group_id: group_id.to_string(),
            artifact_id: artifact_id.to_string(),
            version: version.to_string(),
            base_version: base_version.to_string(),
            classifier: classifier
                .map(|c| c.trim())
                .filter(|c| !c.is_empty())
                .map(|c| c.to_string()),
            extension: extension.to_string(),
            snapshot,
        }
    }

    pub fn is_hash(&self) -> bool {
        self.hash_type.is_some()
    }

    pub fn is_signature(&self) -> bool {
        self.signature_type.is_some()
    }

    pub fn is_subordinate(&self) -> bool {
        self.is_hash() || self.is_signature()
    }

    fn with_suffix(&self, ext: &str) -> ArtifactCoordinates {
        ArtifactCoordinates {
            path: format!("{}.{}", self.path, ext),
            file_name: format!("{}.{}", self.file_name, ext),
            extension: format!("{}.{}", self.extension, ext),
            ..self.clone()
        }
    }

    fn without_suffix(&self, ext: &str) -> ArtifactCoordinates {
        ArtifactCoordinates {
            path: strip_ext(&self.path, ext).to_string(),
            file_name: strip_ext(&self.file_name, ext).to_string(),
            extension: strip_ext(&self.extension, ext).to_string(),
            ..self.clone()
        }
    }

    /// the hash file for these coordinates; `None` if this already is a hash
    pub fn hash(&self, hash_type: HashType) -> Option<ArtifactCoordinates> {
        if self.is_hash() {
            return None;
        }
        Some(ArtifactCoordinates {
            hash_type: Some(hash_type),
            ..self.with_suffix(hash_type.ext())
        })
    }

    /// the signature file for these coordinates; `None` for hashes and signatures
    pub fn signature(&self, signature_type: SignatureType) -> Option<ArtifactCoordinates> {
        if self.is_subordinate() {
            return None;
        }
        Some(ArtifactCoordinates {
            signature_type: Some(signature_type),
            ..self.with_suffix(signature_type.ext())
        })
    }

    /// Strips one subordinate level: the hash if present, otherwise the signature.
    pub fn subordinate_of(&self) -> Option<ArtifactCoordinates> {
        if let Some(hash_type) = self.hash_type {
            return Some(ArtifactCoordinates {
                hash_type: None,
                ..self.without_suffix(hash_type.ext())
            });
        }
        if let Some(signature_type) = self.signature_type {
            return Some(ArtifactCoordinates {
                signature_type: None,
                ..self.without_suffix(signature_type.ext())
            });
        }
        None
    }

    pub fn main(&self) -> ArtifactCoordinates {
        let mut result = self.clone();
        while let Some(s) = result.subordinate_of() {
            result = s;
        }
        result
    }

    pub fn as_coordinates(&self) -> Coordinates {
        Coordinates {
            path: self.path.clone(),
            file_name: self.file_name.clone(),
            hash_type: self.hash_type,
        }
    }
}

/// A parsed repository path: either an artifact in Maven layout, or any other file
#[derive(Debug, Eq, PartialEq, Clone, Hash)]
pub enum MavenPath {
    Artifact(ArtifactCoordinates),
    Plain(Coordinates),
}
impl MavenPath {
    pub fn path(&self) -> &str {
        match self {
            MavenPath::Artifact(a) => &a.path,
            MavenPath::Plain(c) => &c.path,
        }
    }

    pub fn file_name(&self) -> &str {
        match self {
            MavenPath::Artifact(a) => &a.file_name,
            MavenPath::Plain(c) => &c.file_name,
        }
    }

    pub fn hash_type(&self) -> Option<HashType> {
        match self {
            MavenPath::Artifact(a) => a.hash_type,
            MavenPath::Plain(c) => c.hash_type,
        }
    }

    pub fn is_hash(&self) -> bool {
        self.hash_type().is_some()
    }

    pub fn as_artifact(&self) -> Option<&ArtifactCoordinates> {
        match self {
            MavenPath::Artifact(a) => Some(a),
            MavenPath::Plain(_) => None,
        }
    }

    pub fn hash(&self, hash_type: HashType) -> Option<MavenPath> {
        match self {
            MavenPath::Artifact(a) => a.hash(hash_type).map(MavenPath::Artifact),
            MavenPath::Plain(c) => c.hash(hash_type).map(MavenPath::Plain),
        }
    }

    pub fn subordinate_of(&self) -> Option<MavenPath> {
        match self {
            MavenPath::Artifact(a) => a.subordinate_of().map(MavenPath::Artifact),
            MavenPath::Plain(c) => c.subordinate_of().map(MavenPath::Plain),
        }
    }

    pub fn main(&self) -> MavenPath {
        match self {
            MavenPath::Artifact(a) => MavenPath::Artifact(a.main()),
            MavenPath::Plain(c) => MavenPath::Plain(c.main()),
        }
    }

    /// The file a hash file belongs to, i.e. with the hash suffix stripped. For anything else, the
    ///  path itself.
    pub fn hash_owner(&self) -> MavenPath {
        if self.is_hash() {
            self.subordinate_of().unwrap_or_else(|| self.clone())
        }
        else {
            self.clone()
        }
    }

    pub fn is_metadata(&self) -> bool {
        match self {
            MavenPath::Artifact(_) => false,
            MavenPath::Plain(c) => c.main().file_name == METADATA_FILE_NAME,
        }
    }
}

//! Content type detection from file name and leading content bytes.

pub const APPLICATION_OCTET_STREAM: &str = "application/octet-stream";
pub const TEXT_PLAIN: &str = "text/plain";

const ZIP_TYPES: &[&str] = &["application/java-archive", "application/zip"];
const XML_TYPES: &[&str] = &["application/xml", "text/xml"];
const GZIP_TYPES: &[&str] = &["application/x-gzip", "application/gzip"];
/// a leading comment is valid in XML as well as HTML
const MARKUP_TYPES: &[&str] = &["application/xml", "text/xml", "text/html", TEXT_PLAIN];

/// Candidate content types based on the file name's extension, most specific first
pub fn types_for_name(file_name: &str) -> &'static [&'static str] {
    let lower = file_name.to_lowercase();
    if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
        return GZIP_TYPES;
    }

    match lower.rsplit('.').next().unwrap_or("") {
        "jar" | "war" | "ear" | "aar" | "zip" => ZIP_TYPES,
        "pom" | "xml" => XML_TYPES,
        "gz" => GZIP_TYPES,
        "json" | "module" => &["application/json"],
        "sha1" | "md5" | "sha256" | "sha512" | "txt" | "properties" => &[TEXT_PLAIN],
        "asc" => &["application/pgp-signature", TEXT_PLAIN],
        "html" | "htm" => &["text/html"],
        _ => &[],
    }
}

/// Candidate content types based on magic bytes at the start of the content
pub fn types_for_content(head: &[u8]) -> &'static [&'static str] {
    if head.starts_with(b"PK\x03\x04") || head.starts_with(b"PK\x05\x06") {
        return ZIP_TYPES;
    }
    if head.starts_with(&[0x1f, 0x8b]) {
        return GZIP_TYPES;
    }
    if head.starts_with(b"-----BEGIN PGP") {
        return &["application/pgp-signature", TEXT_PLAIN];
    }

    let text = trim_bom(head);
    if text.starts_with(b"<?xml") || text.starts_with(b"<project") || text.starts_with(b"<metadata") {
        return XML_TYPES;
    }
    if text.starts_with(b"<!--") {
        return MARKUP_TYPES;
    }
    if text.starts_with(b"{") {
        return &["application/json", TEXT_PLAIN];
    }
    if !text.is_empty() && text.iter().take(512).all(|b| b.is_ascii_graphic() || b.is_ascii_whitespace()) {
        return &[TEXT_PLAIN];
    }
    &[]
}

fn trim_bom(head: &[u8]) -> &[u8] {
    let head = head.strip_prefix(&[0xef, 0xbb, 0xbf]).unwrap_or(head);
    let start = head.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(head.len());
    &head[start..]
}

/// Detected types; the content's magic bytes take precedence over the file name
pub fn detect_types(file_name: &str, head: &[u8]) -> Vec<&'static str> {
    let by_content = types_for_content(head);
    let by_name = types_for_name(file_name);

    if by_content.is_empty() {
        return by_name.to_vec();
    }
    // the file name disambiguates generic content detections (e.g. a .pom that looks like text)
    let mut result: Vec<&'static str> = by_name.iter()
        .filter(|t| by_content.contains(t))
        .copied()
        .collect();
    for t in by_content {
        if !result.contains(t) {
            result.push(t);
        }
    }
    result
}

/// Outcome of checking a declared content type against the detected one
#[derive(Debug, Eq, PartialEq)]
pub enum ContentTypeCheck {
    /// the type to store
    Accepted(String),
    /// the reason for rejecting the content under strict validation
    Mismatch(String),
}

/// Only a declared type that contradicts a detected one is a mismatch, or content with neither.
///  Content nothing is detected for keeps its declared type. A declared `application/octet-stream`
///  matches anything and is replaced by the detected type if there is one.
pub fn check_content_type(file_name: &str, head: &[u8], declared: Option<&str>) -> ContentTypeCheck {
    let detected = detect_types(file_name, head);
    let declared = declared
        .map(|d| d.split(';').next().unwrap_or(d).trim().to_lowercase())
        .filter(|d| !d.is_empty());

    match (detected.first(), declared) {
        (None, Some(declared)) => ContentTypeCheck::Accepted(declared),
        (None, None) => ContentTypeCheck::Mismatch(format!("Content type of {} could not be determined", file_name)),
        (Some(first), None) => ContentTypeCheck::Accepted(first.to_string()),
        (Some(first), Some(declared)) if declared == APPLICATION_OCTET_STREAM => ContentTypeCheck::Accepted(first.to_string()),
        (Some(_), Some(declared)) => {
            if detected.iter().any(|t| *t == declared) {
                ContentTypeCheck::Accepted(declared)
            }
            else {
                ContentTypeCheck::Mismatch(format!("Detected content type {:?} of {} does not match declared type {}", detected, file_name, declared))
            }
        }
    }
}

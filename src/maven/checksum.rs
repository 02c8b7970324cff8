use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref DIGEST_REGEX: Regex = Regex::new(r"^[a-z0-9]+$").unwrap();
}

/// Extracts the digest from the content of a checksum file. Checksum files come in a variety of
///  formats, e.g.
///
/// * `a9993e364706816aba3e25717850c26c9cd0d89d`
/// * `a9993e364706816aba3e25717850c26c9cd0d89d  ant-1.5.jar`
/// * `SHA1(ant-1.5.jar)= a9993e364706816aba3e25717850c26c9cd0d89d`
/// * `ant-1.5.jar: A999 3E36 4706 816A BA3E  2571 7850 C26C 9CD0 D89D`
///
/// Returns `None` for blank input. If no recognizable digest is found, the first whitespace
///  separated token is returned, which callers tell apart from a digest with `is_digest`.
pub fn read_checksum(input: &str) -> Option<String> {
    let raw = input.trim();
    if raw.is_empty() {
        return None;
    }

    let mut digest = match raw.find(|c| c == '=' || c == ':') {
        Some(pos) => raw[pos + 1..].trim().to_string(),
        None => first_token(raw).to_string(),
    };

    if !is_digest(&digest) {
        digest = compress(&digest);
    }
    if !is_digest(&digest) {
        digest = compress(raw);
    }
    if !is_digest(&digest) {
        if let Some(last_space) = raw.rfind(' ') {
            digest = compress(raw[..last_space].trim());
        }
    }
    if !is_digest(&digest) {
        digest = first_token(raw).to_string();
    }
    Some(digest)
}

/// at least 32 characters of lowercase hex (or alphanumerics)
pub fn is_digest(digest: &str) -> bool {
    digest.len() >= 32 && DIGEST_REGEX.is_match(digest)
}

fn first_token(s: &str) -> &str {
    s.split(' ').next().unwrap_or(s)
}

fn compress(s: &str) -> String {
    s.chars()
        .filter(|c| *c != ' ')
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod test {
    use rstest::*;
    use super::*;

    #[rstest]
    #[case::plain("a9993e364706816aba3e25717850c26c9cd0d89d", "a9993e364706816aba3e25717850c26c9cd0d89d")]
    #[case::trailing_newline("a9993e364706816aba3e25717850c26c9cd0d89d\n", "a9993e364706816aba3e25717850c26c9cd0d89d")]
    #[case::with_file_name("a9993e364706816aba3e25717850c26c9cd0d89d  ant-1.5.jar", "a9993e364706816aba3e25717850c26c9cd0d89d")]
    #[case::uppercase("A9993E364706816ABA3E25717850C26C9CD0D89D", "a9993e364706816aba3e25717850c26c9cd0d89d")]
    #[case::md5_bsd_style("MD5 (pom.xml) = 68da13206e9dcce2db9ec45a9f7acd52", "68da13206e9dcce2db9ec45a9f7acd52")]
    #[case::sha1_openssl_style("SHA1(ant-1.5.jar)= dcab88fc2a043c2479a6de676a2f8179e9ea2167", "dcab88fc2a043c2479a6de676a2f8179e9ea2167")]
    #[case::grouped_with_file_name("ant-1.5.jar: DCAB 88FC 2A04 3C24 79A6  DE67 6A2F 8179 E9EA 2167", "dcab88fc2a043c2479a6de676a2f8179e9ea2167")]
    #[case::grouped("DCAB 88FC 2A04 3C24 79A6  DE67 6A2F 8179 E9EA 2167", "dcab88fc2a043c2479a6de676a2f8179e9ea2167")]
    #[case::grouped_trailing_file_name("DCAB 88FC 2A04 3C24 79A6 DE67 6A2F 8179 E9EA 2167 ant-1.5.jar", "dcab88fc2a043c2479a6de676a2f8179e9ea2167")]
    #[case::not_a_digest("not a checksum", "not")]
    fn test_read_checksum(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(read_checksum(input).as_deref(), Some(expected));
    }

    #[rstest]
    #[case::empty("")]
    #[case::blank("  \n")]
    fn test_read_checksum_blank(#[case] input: &str) {
        assert_eq!(read_checksum(input), None);
    }

    #[rstest]
    #[case::sha1("a9993e364706816aba3e25717850c26c9cd0d89d", true)]
    #[case::md5("68da13206e9dcce2db9ec45a9f7acd52", true)]
    #[case::too_short("68da13206e9dcce2db9ec45a9f7acd5", false)]
    #[case::uppercase("A9993E364706816ABA3E25717850C26C9CD0D89D", false)]
    #[case::spaces("a9993e364706816aba3e 25717850c26c9cd0d89d", false)]
    fn test_is_digest(#[case] digest: &str, #[case] expected: bool) {
        assert_eq!(is_digest(digest), expected);
    }
}

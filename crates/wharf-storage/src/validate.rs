//! Validator
//!
//! Pure predicates enforcing OCI syntax for digests, repository names, tags,
//! and UUIDs. Implemented as hand-written character-class scans rather than
//! a backtracking regex engine: every check below runs in time linear in
//! the input length with no exponential blowup on adversarial input, the
//! same posture the upstream route-pattern matcher uses for user-supplied
//! glob patterns.

use crate::error::StorageError;

const MAX_REPOSITORY_LEN: usize = 255;
const MAX_TAG_LEN: usize = 128;

/// Validates `^sha256:[a-f0-9]{64}$` or `^sha512:[a-f0-9]{128}$`.
pub fn validate_digest(digest: &str) -> Result<(), StorageError> {
    let (algo, hex) = digest
        .split_once(':')
        .ok_or_else(|| invalid(digest, "missing ':'"))?;

    let expected_len = match algo {
        "sha256" => 64,
        "sha512" => 128,
        other => return Err(invalid(digest, &format!("unsupported algorithm '{other}'"))),
    };

    if hex.len() != expected_len || !hex.bytes().all(is_lower_hex) {
        return Err(invalid(digest, "hash is not lowercase hex of the expected length"));
    }

    Ok(())
}

fn is_lower_hex(b: u8) -> bool {
    b.is_ascii_digit() || (b'a'..=b'f').contains(&b)
}

/// Validates a repository name: lowercase, 1-255 chars, `/`-separated
/// components, each matching `[a-z0-9]([a-z0-9._-]*[a-z0-9])?`.
pub fn validate_repository_name(name: &str) -> Result<(), StorageError> {
    if name.is_empty() || name.len() > MAX_REPOSITORY_LEN {
        return Err(invalid(name, "length out of range 1..=255"));
    }

    for component in name.split('/') {
        validate_name_component(component)
            .map_err(|_| invalid(name, &format!("invalid path component '{component}'")))?;
    }

    Ok(())
}

fn validate_name_component(component: &str) -> Result<(), ()> {
    let bytes = component.as_bytes();
    if bytes.is_empty() {
        return Err(());
    }
    if !is_lower_alnum(bytes[0]) {
        return Err(());
    }
    if bytes.len() == 1 {
        return Ok(());
    }
    if !is_lower_alnum(*bytes.last().unwrap()) {
        return Err(());
    }
    for &b in &bytes[1..bytes.len() - 1] {
        if !(is_lower_alnum(b) || b == b'.' || b == b'_' || b == b'-') {
            return Err(());
        }
    }
    Ok(())
}

fn is_lower_alnum(b: u8) -> bool {
    b.is_ascii_lowercase() || b.is_ascii_digit()
}

/// Validates `^[A-Za-z0-9_][A-Za-z0-9._-]{0,127}$`.
pub fn validate_tag(tag: &str) -> Result<(), StorageError> {
    if tag.is_empty() || tag.len() > MAX_TAG_LEN + 1 {
        return Err(invalid(tag, "length out of range 1..=128"));
    }
    let bytes = tag.as_bytes();
    if !is_tag_head(bytes[0]) {
        return Err(invalid(tag, "must start with alphanumeric or '_'"));
    }
    for &b in &bytes[1..] {
        if !(is_tag_head(b) || b == b'.' || b == b'-') {
            return Err(invalid(tag, "contains disallowed character"));
        }
    }
    Ok(())
}

fn is_tag_head(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// A reference is a digest if it carries a recognized digest prefix,
/// otherwise it must be a valid tag.
pub fn validate_reference(reference: &str) -> Result<(), StorageError> {
    if reference.starts_with("sha256:") || reference.starts_with("sha512:") {
        validate_digest(reference)
    } else {
        validate_tag(reference)
    }
}

pub fn is_digest_reference(reference: &str) -> bool {
    reference.starts_with("sha256:") || reference.starts_with("sha512:")
}

/// Validates a canonical 8-4-4-4-12 lowercase-hex UUID (v4 session ids).
pub fn validate_uuid(value: &str) -> Result<(), StorageError> {
    let groups: Vec<&str> = value.split('-').collect();
    let expected = [8, 4, 4, 4, 12];
    if groups.len() != 5 {
        return Err(invalid(value, "expected 5 hyphen-separated groups"));
    }
    for (group, &len) in groups.iter().zip(expected.iter()) {
        if group.len() != len || !group.bytes().all(is_lower_hex) {
            return Err(invalid(value, "malformed UUID group"));
        }
    }
    Ok(())
}

fn invalid(value: &str, reason: &str) -> StorageError {
    StorageError::InvalidDigest(format!("'{value}': {reason}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_digests() {
        assert!(validate_digest(
            "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        )
        .is_ok());
    }

    #[test]
    fn rejects_wrong_length_or_case() {
        assert!(validate_digest("sha256:ABCD").is_err());
        assert!(validate_digest("sha256:abcd").is_err());
        assert!(validate_digest("md5:abcd").is_err());
    }

    #[test]
    fn repository_names_require_lowercase_components() {
        assert!(validate_repository_name("library/nginx").is_ok());
        assert!(validate_repository_name("a/b/c-d_e.f").is_ok());
        assert!(validate_repository_name("Library/Nginx").is_err());
        assert!(validate_repository_name("library//nginx").is_err());
        assert!(validate_repository_name("").is_err());
    }

    #[test]
    fn tags_reject_leading_dot_or_dash() {
        assert!(validate_tag("latest").is_ok());
        assert!(validate_tag("1.2.3-rc1").is_ok());
        assert!(validate_tag(".latest").is_err());
        assert!(validate_tag("-latest").is_err());
    }

    #[test]
    fn reference_dispatches_on_digest_prefix() {
        assert!(is_digest_reference("sha256:aa"));
        assert!(!is_digest_reference("latest"));
        assert!(validate_reference("latest").is_ok());
        assert!(validate_reference("sha256:not-hex").is_err());
    }

    #[test]
    fn uuid_requires_canonical_grouping() {
        assert!(validate_uuid("550e8400-e29b-41d4-a716-446655440000").is_ok());
        assert!(validate_uuid("550E8400-e29b-41d4-a716-446655440000").is_err());
        assert!(validate_uuid("not-a-uuid").is_err());
    }
}

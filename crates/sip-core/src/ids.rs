//! Generation of the random identifiers SIP messages carry: Via branch
//! values, From/To tags, and Call-IDs.

use rand::distributions::Alphanumeric;
use rand::Rng;
use uuid::Uuid;

/// The RFC 3261 magic cookie every compliant branch value starts with.
pub const MAGIC_COOKIE: &str = "z9hG4bK";

/// Generates a unique branch parameter prefixed with the magic cookie.
pub fn generate_branch() -> String {
    format!("{}{}", MAGIC_COOKIE, Uuid::new_v4().simple())
}

/// True when `branch` declares RFC 3261 transaction matching rules.
pub fn is_rfc3261_branch(branch: &str) -> bool {
    branch.starts_with(MAGIC_COOKIE)
}

/// Generates a From/To tag.
pub fn generate_tag() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect()
}

/// Generates a Call-ID value.
pub fn generate_call_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_carries_magic_cookie() {
        let branch = generate_branch();
        assert!(is_rfc3261_branch(&branch));
        assert!(branch.len() > MAGIC_COOKIE.len());
    }

    #[test]
    fn branches_are_unique() {
        assert_ne!(generate_branch(), generate_branch());
    }

    #[test]
    fn legacy_branch_detected() {
        assert!(!is_rfc3261_branch("1234abcd"));
        assert!(is_rfc3261_branch("z9hG4bK1234abcd"));
    }

    #[test]
    fn tag_length() {
        assert_eq!(generate_tag().len(), 10);
    }
}

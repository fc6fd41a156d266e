use base64ct::{Base64UrlUnpadded, Encoding};
use constant_time_eq::constant_time_eq;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

use crate::mail::{send_in_background, Mailer};

/// Stateless proof that a verification link was issued for this user.
/// Derived from identity + email, so changing either invalidates old links.
pub fn verification_hash(user_id: Uuid, email: &str) -> String {
    let digest = Sha256::new()
        .chain_update(user_id.as_bytes())
        .chain_update(b":")
        .chain_update(email.as_bytes())
        .finalize();
    Base64UrlUnpadded::encode_string(&digest)
}

/// Constant-time check of a caller-supplied hash against the expected one.
pub fn hash_matches(user_id: Uuid, email: &str, supplied: &str) -> bool {
    let expected = verification_hash(user_id, email);
    constant_time_eq(expected.as_bytes(), supplied.as_bytes())
}

pub fn verification_url(frontend_url: &str, user_id: Uuid, email: &str) -> String {
    format!(
        "{frontend_url}/verify-email?id={user_id}&hash={}",
        verification_hash(user_id, email)
    )
}

pub fn send_verification_email(
    mailer: Arc<dyn Mailer>,
    frontend_url: &str,
    user_id: Uuid,
    email: &str,
    name: &str,
) {
    let url = verification_url(frontend_url, user_id, email);
    let body = format!(
        "Hi {name},\n\n\
         Please verify your email address by visiting the link below:\n\n\
         {url}\n\n\
         If you did not create a Nexus Market account, you can ignore this email.\n"
    );
    send_in_background(
        mailer,
        email.to_string(),
        "Verify your email address".to_string(),
        body,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let id = Uuid::new_v4();
        assert_eq!(
            verification_hash(id, "a@b.com"),
            verification_hash(id, "a@b.com")
        );
    }

    #[test]
    fn hash_depends_on_identity_and_email() {
        let id = Uuid::new_v4();
        let other = Uuid::new_v4();
        assert_ne!(
            verification_hash(id, "a@b.com"),
            verification_hash(other, "a@b.com")
        );
        assert_ne!(
            verification_hash(id, "a@b.com"),
            verification_hash(id, "c@d.com")
        );
    }

    #[test]
    fn matches_accepts_only_the_expected_hash() {
        let id = Uuid::new_v4();
        let good = verification_hash(id, "a@b.com");
        assert!(hash_matches(id, "a@b.com", &good));
        assert!(!hash_matches(id, "a@b.com", "definitely-not-the-hash"));
        assert!(!hash_matches(id, "a@b.com", ""));
    }

    #[test]
    fn url_embeds_id_and_hash() {
        let id = Uuid::new_v4();
        let url = verification_url("http://localhost:3000", id, "a@b.com");
        assert!(url.starts_with("http://localhost:3000/verify-email?id="));
        assert!(url.contains(&id.to_string()));
        assert!(url.contains(&verification_hash(id, "a@b.com")));
    }
}

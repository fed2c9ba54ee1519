use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::config::AppConfig;

/// The single shared account allowed to upload.
///
/// When either half is unset every login attempt fails.
#[derive(Clone, Default)]
pub struct Credentials {
    email: Option<[u8; 32]>,
    password: Option<Zeroizing<[u8; 32]>>,
}

fn digest(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}

impl Credentials {
    pub fn new(email: Option<&str>, password: Option<&str>) -> Self {
        Self {
            email: email.map(digest),
            password: password.map(|p| Zeroizing::new(digest(p))),
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new(
            cfg.email.as_deref(),
            cfg.password.as_ref().map(|p| p.as_str()),
        )
    }

    pub fn is_configured(&self) -> bool {
        self.email.is_some() && self.password.is_some()
    }

    /// Compare digests of the presented pair with the configured pair.
    pub fn verify(&self, email: &str, password: &str) -> bool {
        let (Some(expected_email), Some(expected_password)) = (&self.email, &self.password) else {
            return false;
        };
        let email_ok = digest(email) == *expected_email;
        let password_ok = digest(password) == **expected_password;
        email_ok & password_ok
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("configured", &self.is_configured())
            .finish()
    }
}

/// `/login?next=<target>` for a request that needs authentication.
pub fn login_redirect(target: &str) -> String {
    let next: String = url::form_urlencoded::byte_serialize(target.as_bytes()).collect();
    format!("/login?next={next}")
}

/// Where to send the user after logging in. Only same-site paths are
/// honoured; anything else goes to the index.
pub fn post_login_target(next: Option<&str>) -> String {
    match next {
        Some(next) if next.starts_with('/') && !next.starts_with("//") && !next.contains('\\') => {
            next.to_string()
        }
        _ => "/".to_string(),
    }
}

//! Server-side sessions keyed by a signed cookie.
//!
//! The cookie carries `<id>.<tag>` where `id` is 32 random bytes and `tag` is
//! `HMAC-SHA256(secret, id)`, both hex. Cookies with a bad tag or an unknown
//! id start a fresh, empty session.
//!
//! Entries idle for longer than the TTL are swept, the store never holds more
//! than its cap (oldest entries go first), and an entry with nothing left in
//! it is dropped as soon as its last flash has been shown.

use anyhow::{anyhow, Result};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use zeroize::Zeroizing;

use crate::assemble::DetectionResult;

pub const SESSION_COOKIE: &str = "ppe_session";
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_MAX_SESSIONS: usize = 4096;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlashCategory {
    Success,
    Error,
    Info,
    Warning,
}

impl FlashCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Info => "info",
            Self::Warning => "warning",
        }
    }
}

/// One-shot message shown on the next rendered page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Flash {
    pub category: FlashCategory,
    pub message: String,
}

#[derive(Clone, Debug, Default)]
pub struct Session {
    pub logged_in: bool,
    pub username: Option<String>,
    pub results: Option<DetectionResult>,
    flashes: Vec<Flash>,
}

impl Session {
    pub fn login(&mut self, username: &str) {
        self.logged_in = true;
        self.username = Some(username.to_string());
    }

    /// Drop every field, including pending flashes.
    pub fn clear(&mut self) {
        *self = Session::default();
    }

    pub fn flash(&mut self, category: FlashCategory, message: impl Into<String>) {
        self.flashes.push(Flash {
            category,
            message: message.into(),
        });
    }

    pub fn take_flashes(&mut self) -> Vec<Flash> {
        std::mem::take(&mut self.flashes)
    }

    fn is_blank(&self) -> bool {
        !self.logged_in && self.username.is_none() && self.results.is_none() && self.flashes.is_empty()
    }
}

struct Entry {
    session: Session,
    touched: Instant,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A session id resolved from a request cookie.
#[derive(Clone, Debug)]
pub struct SessionRef {
    pub id: SessionId,
    /// True when the client did not present a valid cookie and needs one set.
    pub is_new: bool,
}

/// In-memory session store shared by all request handlers.
pub struct SessionStore {
    secret: Zeroizing<Vec<u8>>,
    idle_ttl: Duration,
    max_sessions: usize,
    sessions: Mutex<HashMap<SessionId, Entry>>,
}

impl SessionStore {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: Zeroizing::new(secret.as_bytes().to_vec()),
            idle_ttl: DEFAULT_IDLE_TTL,
            max_sessions: DEFAULT_MAX_SESSIONS,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_limits(mut self, idle_ttl: Duration, max_sessions: usize) -> Self {
        self.idle_ttl = idle_ttl;
        self.max_sessions = max_sessions.max(1);
        self
    }

    fn mac(&self, id: &SessionId) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_slice())
            .map_err(|_| anyhow!("session key rejected by HMAC"))?;
        mac.update(id.0.as_bytes());
        Ok(mac)
    }

    /// Signed cookie value for `id`.
    pub fn cookie_value(&self, id: &SessionId) -> Result<String> {
        let tag = self.mac(id)?.finalize().into_bytes();
        Ok(format!("{}.{}", id.0, hex::encode(tag)))
    }

    /// Constant-time check of a presented hex tag.
    fn tag_matches(&self, id: &SessionId, tag: &str) -> Result<bool> {
        let Ok(tag) = hex::decode(tag) else {
            return Ok(false);
        };
        Ok(self.mac(id)?.verify_slice(&tag).is_ok())
    }

    fn is_expired(&self, entry: &Entry, now: Instant) -> bool {
        now.saturating_duration_since(entry.touched) > self.idle_ttl
    }

    /// Resolve the presented cookie value, or allocate a new id.
    pub fn resolve(&self, cookie: Option<&str>) -> Result<SessionRef> {
        if let Some((id, tag)) = cookie.and_then(|c| c.split_once('.')) {
            let id = SessionId(id.to_string());
            if self.tag_matches(&id, tag)? {
                let now = Instant::now();
                let mut sessions = self.lock()?;
                let live = match sessions.get_mut(&id) {
                    Some(entry) if !self.is_expired(entry, now) => {
                        entry.touched = now;
                        true
                    }
                    _ => false,
                };
                if live {
                    return Ok(SessionRef { id, is_new: false });
                }
                sessions.remove(&id);
            }
        }
        Ok(SessionRef {
            id: SessionId::generate(),
            is_new: true,
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<SessionId, Entry>>> {
        self.sessions
            .lock()
            .map_err(|_| anyhow!("session store lock poisoned"))
    }

    /// Drop expired entries, then the least recently used ones until there is
    /// room for one more.
    fn make_room(&self, sessions: &mut HashMap<SessionId, Entry>, now: Instant) {
        sessions.retain(|_, entry| !self.is_expired(entry, now));
        while sessions.len() >= self.max_sessions {
            let oldest = sessions
                .iter()
                .min_by_key(|(_, entry)| entry.touched)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    log::debug!("session store full, evicting least recently used entry");
                    sessions.remove(&id);
                }
                None => break,
            }
        }
    }

    /// Snapshot of the session (empty if it does not exist yet).
    pub fn get(&self, id: &SessionId) -> Result<Session> {
        Ok(self
            .lock()?
            .get(id)
            .map(|entry| entry.session.clone())
            .unwrap_or_default())
    }

    /// Mutate the session, creating it on first write.
    pub fn update<R>(&self, id: &SessionId, f: impl FnOnce(&mut Session) -> R) -> Result<R> {
        let now = Instant::now();
        let mut sessions = self.lock()?;
        if !sessions.contains_key(id) {
            self.make_room(&mut sessions, now);
        }
        let entry = sessions.entry(id.clone()).or_insert_with(|| Entry {
            session: Session::default(),
            touched: now,
        });
        entry.touched = now;
        Ok(f(&mut entry.session))
    }

    pub fn is_logged_in(&self, id: &SessionId) -> Result<bool> {
        Ok(self
            .lock()?
            .get(id)
            .is_some_and(|entry| entry.session.logged_in))
    }

    pub fn login(&self, id: &SessionId, username: &str) -> Result<()> {
        self.update(id, |s| s.login(username))
    }

    /// Remove the session. A `farewell` flash is kept under the same id until
    /// the next page shows it.
    pub fn logout(&self, id: &SessionId, farewell: Option<Flash>) -> Result<()> {
        self.lock()?.remove(id);
        if let Some(flash) = farewell {
            self.update(id, |s| s.flash(flash.category, flash.message))?;
        }
        Ok(())
    }

    pub fn results(&self, id: &SessionId) -> Result<Option<DetectionResult>> {
        Ok(self
            .lock()?
            .get(id)
            .and_then(|entry| entry.session.results.clone()))
    }

    /// Replace the stored result with the latest upload's.
    pub fn set_results(&self, id: &SessionId, results: DetectionResult) -> Result<()> {
        self.update(id, |s| s.results = Some(results))
    }

    pub fn flash(&self, id: &SessionId, category: FlashCategory, message: &str) -> Result<()> {
        self.update(id, |s| s.flash(category, message))
    }

    /// Pending flashes; an entry left with nothing in it is dropped.
    pub fn take_flashes(&self, id: &SessionId) -> Result<Vec<Flash>> {
        let mut sessions = self.lock()?;
        let Some(entry) = sessions.get_mut(id) else {
            return Ok(Vec::new());
        };
        let flashes = entry.session.take_flashes();
        if entry.session.is_blank() {
            sessions.remove(id);
        }
        Ok(flashes)
    }

    pub fn contains(&self, id: &SessionId) -> Result<bool> {
        Ok(self.lock()?.contains_key(id))
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::{Detection, DetectionStatus};

    fn result(name: &str) -> DetectionResult {
        DetectionResult {
            filename: name.to_string(),
            image_url: format!("/uploads/{name}"),
            detections: vec![Detection::no_objects()],
            status: DetectionStatus::Complete,
            timestamp: time::OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn unknown_cookie_gets_fresh_session() {
        let store = SessionStore::new("secret");
        let r = store.resolve(None).unwrap();
        assert!(r.is_new);
        assert!(!store.is_logged_in(&r.id).unwrap());
        // reading does not allocate
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn signed_cookie_round_trips_after_write() {
        let store = SessionStore::new("secret");
        let r = store.resolve(None).unwrap();
        store.login(&r.id, "lead@site.test").unwrap();

        let cookie = store.cookie_value(&r.id).unwrap();
        let again = store.resolve(Some(&cookie)).unwrap();
        assert!(!again.is_new);
        assert_eq!(again.id, r.id);
        assert!(store.is_logged_in(&again.id).unwrap());
        assert_eq!(
            store.get(&again.id).unwrap().username.as_deref(),
            Some("lead@site.test")
        );
    }

    #[test]
    fn tampered_or_foreign_cookie_is_rejected() {
        let store = SessionStore::new("secret");
        let r = store.resolve(None).unwrap();
        store.login(&r.id, "lead").unwrap();

        let forged = format!("{}.{}", r.id.as_str(), "00".repeat(32));
        assert!(store.resolve(Some(&forged)).unwrap().is_new);

        let other = SessionStore::new("other-secret");
        let foreign = other.cookie_value(&r.id).unwrap();
        assert!(store.resolve(Some(&foreign)).unwrap().is_new);
        assert!(store.resolve(Some("garbage")).unwrap().is_new);
    }

    #[test]
    fn results_are_overwritten_by_next_upload() {
        let store = SessionStore::new("secret");
        let id = store.resolve(None).unwrap().id;
        assert!(store.results(&id).unwrap().is_none());
        store.set_results(&id, result("a.png")).unwrap();
        store.set_results(&id, result("b.png")).unwrap();
        assert_eq!(store.results(&id).unwrap().unwrap().filename, "b.png");
    }

    #[test]
    fn logout_clears_everything_but_the_farewell() {
        let store = SessionStore::new("secret");
        let id = store.resolve(None).unwrap().id;
        store.login(&id, "lead").unwrap();
        store.set_results(&id, result("a.png")).unwrap();
        store.flash(&id, FlashCategory::Success, "stale").unwrap();

        store
            .logout(
                &id,
                Some(Flash {
                    category: FlashCategory::Info,
                    message: "Logged out".into(),
                }),
            )
            .unwrap();

        let session = store.get(&id).unwrap();
        assert!(!session.logged_in);
        assert!(session.username.is_none());
        assert!(session.results.is_none());
        let flashes = store.take_flashes(&id).unwrap();
        assert_eq!(flashes.len(), 1);
        assert_eq!(flashes[0].message, "Logged out");
        assert!(store.take_flashes(&id).unwrap().is_empty());
        // once the farewell is shown nothing is left for that id
        assert_eq!(store.len(), 0);
        assert!(!store.contains(&id).unwrap());
    }

    #[test]
    fn shown_flash_releases_anonymous_session() {
        let store = SessionStore::new("secret");
        let id = store.resolve(None).unwrap().id;
        store.flash(&id, FlashCategory::Error, "Invalid Credentials").unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.take_flashes(&id).unwrap().len(), 1);
        assert_eq!(store.len(), 0);

        // a logged-in session survives its flashes being shown
        store.login(&id, "lead").unwrap();
        store.flash(&id, FlashCategory::Success, "Login Successful").unwrap();
        store.take_flashes(&id).unwrap();
        assert!(store.is_logged_in(&id).unwrap());
    }

    #[test]
    fn anonymous_writes_are_capped() {
        let store = SessionStore::new("secret").with_limits(DEFAULT_IDLE_TTL, 64);
        let mut last = None;
        for _ in 0..10_000 {
            let id = store.resolve(None).unwrap().id;
            store.flash(&id, FlashCategory::Error, "All fields are required").unwrap();
            last = Some(id);
        }
        assert_eq!(store.len(), 64);
        // the most recent writer is never the one evicted
        assert!(store.contains(&last.unwrap()).unwrap());
    }

    #[test]
    fn idle_sessions_expire() {
        let store = SessionStore::new("secret").with_limits(Duration::from_millis(20), 1024);
        let r = store.resolve(None).unwrap();
        store.login(&r.id, "lead").unwrap();
        let cookie = store.cookie_value(&r.id).unwrap();
        assert!(!store.resolve(Some(&cookie)).unwrap().is_new);

        std::thread::sleep(Duration::from_millis(60));
        let again = store.resolve(Some(&cookie)).unwrap();
        assert!(again.is_new);
        assert_ne!(again.id, r.id);
        assert_eq!(store.len(), 0);

        let stale = store.resolve(None).unwrap().id;
        store.flash(&stale, FlashCategory::Info, "x").unwrap();
        std::thread::sleep(Duration::from_millis(60));
        let fresh = store.resolve(None).unwrap().id;
        store.flash(&fresh, FlashCategory::Info, "y").unwrap();
        // creating a new entry sweeps the idle one
        assert_eq!(store.len(), 1);
        assert!(store.contains(&fresh).unwrap());
    }

    #[test]
    fn cookie_tag_is_hmac_of_id() {
        let store = SessionStore::new("secret");
        let id = store.resolve(None).unwrap().id;
        store.login(&id, "lead").unwrap();
        let cookie = store.cookie_value(&id).unwrap();
        let (cookie_id, tag) = cookie.split_once('.').unwrap();
        assert_eq!(cookie_id, id.as_str());
        assert_eq!(tag.len(), 64);

        let mut mac = HmacSha256::new_from_slice(b"secret").unwrap();
        mac.update(id.as_str().as_bytes());
        assert_eq!(tag, hex::encode(mac.finalize().into_bytes()));

        // upper-case hex decodes to the same bytes and still verifies
        let upper = format!("{}.{}", cookie_id, tag.to_ascii_uppercase());
        assert!(!store.resolve(Some(&upper)).unwrap().is_new);
        let truncated = format!("{}.{}", cookie_id, &tag[..62]);
        assert!(store.resolve(Some(&truncated)).unwrap().is_new);
        let not_hex = format!("{}.{}", cookie_id, "zz".repeat(32));
        assert!(store.resolve(Some(&not_hex)).unwrap().is_new);
    }
}

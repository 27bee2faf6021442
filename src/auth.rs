/*!
Password hashing and session keys.

Passwords are hashed with Argon2id and stored as PHC strings

```text
$argon2id$v=19$m=19456,t=2,p=1$<salt>$<hash>
```

which carry their own parameters. Handlers hash and verify through
`spawn_hash()` and `spawn_verify()`, which run on the blocking pool.

Sessions live only in memory; restarting the server logs everybody out.
*/
use std::collections::HashMap;
use std::time::{Duration, Instant};

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use rand::{Rng, distributions};
use serde::Serialize;

pub const SESSION_COOKIE: &str = "campus_session";

const SALT_BYTES: usize = 16;
const KEY_LENGTH: usize = 32;
const KEY_CHARS: &[u8] =
b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

fn random_string(length: usize) -> String {
    // KEY_CHARS is never empty.
    let dist = distributions::Slice::new(KEY_CHARS).unwrap();
    rand::thread_rng()
        .sample_iter(&dist)
        .take(length)
        .map(|&b| b as char)
        .collect()
}

/// Salt and hash `password` for storage.
pub fn hash_password(password: &str) -> Result<String, String> {
    let mut salt_bytes = [0u8; SALT_BYTES];
    rand::thread_rng().fill(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| format!("Unable to encode password salt: {}", &e))?;

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| format!("Unable to hash password: {}", &e))
}

/// Whether `password` hashes to `encoded`. Malformed hashes never match.
pub fn verify_password(password: &str, encoded: &str) -> bool {
    let parsed = match PasswordHash::new(encoded) {
        Ok(h) => h,
        Err(e) => {
            log::warn!("Malformed password hash: {}", &e);
            return false;
        },
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// `hash_password()` on tokio's blocking thread pool.
pub async fn spawn_hash(password: String) -> Result<String, String> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| format!("Password hashing task failed: {}", &e))?
}

/// `verify_password()` on tokio's blocking thread pool.
pub async fn spawn_verify(password: String, encoded: String) -> bool {
    match tokio::task::spawn_blocking(move || verify_password(&password, &encoded)).await {
        Ok(matches) => matches,
        Err(e) => {
            log::error!("Password verification task failed: {}", &e);
            false
        },
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashLevel {
    Success,
    Info,
    Warning,
    Error,
}

/// A message shown once, on the next page the session renders.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Flash {
    pub level: FlashLevel,
    pub text: String,
}

impl Flash {
    pub fn success<S: Into<String>>(text: S) -> Flash {
        Flash { level: FlashLevel::Success, text: text.into() }
    }
    pub fn info<S: Into<String>>(text: S) -> Flash {
        Flash { level: FlashLevel::Info, text: text.into() }
    }
    pub fn warning<S: Into<String>>(text: S) -> Flash {
        Flash { level: FlashLevel::Warning, text: text.into() }
    }
    pub fn error<S: Into<String>>(text: S) -> Flash {
        Flash { level: FlashLevel::Error, text: text.into() }
    }
}

#[derive(Debug)]
struct Session {
    /// `None` for visitors who haven't logged in but have flashes pending.
    uname: Option<String>,
    flash: Vec<Flash>,
    expires: Instant,
}

#[derive(Debug)]
pub struct Sessions {
    map: HashMap<String, Session>,
    lifetime: Duration,
}

impl Sessions {
    pub fn new(lifetime: Duration) -> Self {
        log::trace!("Sessions::new( {:?} ) called.", &lifetime);
        Self { map: HashMap::new(), lifetime }
    }

    fn insert(&mut self, uname: Option<String>, flash: Vec<Flash>) -> String {
        let mut key = random_string(KEY_LENGTH);
        while self.map.contains_key(&key) {
            key = random_string(KEY_LENGTH);
        }
        let expires = Instant::now() + self.lifetime;
        self.map.insert(key.clone(), Session { uname, flash, expires });
        key
    }

    /// Look up a session, dropping it if it has expired.
    fn live(&mut self, key: &str) -> Option<&mut Session> {
        let expired = match self.map.get(key) {
            None => { return None; },
            Some(s) => Instant::now() >= s.expires,
        };
        if expired {
            log::trace!("Session expired; removing.");
            self.map.remove(key);
            return None;
        }
        self.map.get_mut(key)
    }

    /**
    Bind `uname` to a fresh session key and return it.

    Any previous session under `old_key` is discarded; its pending flashes
    move over to the new session.
    */
    pub fn login(&mut self, old_key: Option<&str>, uname: &str) -> String {
        log::trace!("Sessions::login( [ key ], {:?} ) called.", uname);

        let flash = match old_key.and_then(|k| self.map.remove(k)) {
            Some(s) => s.flash,
            None => Vec::new(),
        };
        self.insert(Some(uname.to_owned()), flash)
    }

    pub fn logout(&mut self, key: &str) {
        if let Some(s) = self.map.remove(key) {
            log::trace!("Session for {:?} ended.", &s.uname);
        }
    }

    /// The logged-in user associated with `key`, if any.
    pub fn uname_for(&mut self, key: &str) -> Option<String> {
        self.live(key).and_then(|s| s.uname.clone())
    }

    /**
    Queue `flash` for the session under `key`, starting an anonymous
    session if `key` is `None` or no longer valid.

    Returns the key of the session the flash was queued on.
    */
    pub fn push_flash(&mut self, key: Option<&str>, flash: Flash) -> String {
        if let Some(k) = key {
            if let Some(s) = self.live(k) {
                s.flash.push(flash);
                return k.to_owned();
            }
        }
        self.insert(None, vec![flash])
    }

    /// Remove and return the pending flashes for `key`.
    pub fn take_flash(&mut self, key: &str) -> Vec<Flash> {
        match self.live(key) {
            Some(s) => std::mem::take(&mut s.flash),
            None => Vec::new(),
        }
    }

    /// Drop every expired session. Returns the number dropped.
    pub fn prune(&mut self) -> usize {
        let now = Instant::now();
        let before = self.map.len();
        self.map.retain(|_, s| now < s.expires);
        let n = before - self.map.len();
        if n > 0 {
            log::debug!("Pruned {} expired sessions.", &n);
        }
        n
    }

    pub fn len(&self) -> usize { self.map.len() }

    pub fn is_empty(&self) -> bool { self.map.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::ensure_logging;

    #[test]
    fn hash_verifies_only_original() {
        ensure_logging();
        let h = hash_password("correct horse").unwrap();
        assert!(h.starts_with("$argon2id$"));
        assert!(verify_password("correct horse", &h));
        assert!(!verify_password("correct horsf", &h));
        assert!(!verify_password("", &h));

        let h2 = hash_password("correct horse").unwrap();
        assert_ne!(h, h2, "salts should differ between hashes");
    }

    #[test]
    fn malformed_hashes_never_verify() {
        ensure_logging();
        let good = hash_password("pw").unwrap();
        let truncated = &good[..good.len() - 4];
        let extra = format!("{}$extra", &good);

        for bad in [
            "",
            "pw",
            "sha256$20000$salt$abcd",
            "$argon2id$v=19$m=19456,t=2,p=1$not base64$abcd",
            truncated,
            extra.as_str(),
        ] {
            assert!(!verify_password("pw", bad), "{:?} verified", bad);
        }
    }

    #[tokio::test]
    async fn hashing_on_blocking_pool() {
        ensure_logging();
        let h = spawn_hash("hunter2222".to_owned()).await.unwrap();
        assert!(spawn_verify("hunter2222".to_owned(), h.clone()).await);
        assert!(!spawn_verify("hunter2223".to_owned(), h).await);
        assert!(!spawn_verify("hunter2222".to_owned(), "garbage".to_owned()).await);
    }

    #[test]
    fn login_logout() {
        ensure_logging();
        let mut s = Sessions::new(Duration::from_secs(60));
        let key = s.login(None, "jdoe");
        assert_eq!(s.uname_for(&key).as_deref(), Some("jdoe"));
        assert_eq!(s.uname_for("nonsense"), None);

        s.logout(&key);
        assert_eq!(s.uname_for(&key), None);
        assert!(s.is_empty());
    }

    #[test]
    fn login_replaces_key_and_keeps_flash() {
        ensure_logging();
        let mut s = Sessions::new(Duration::from_secs(60));
        let anon = s.push_flash(None, Flash::success("Registered."));
        assert_eq!(s.uname_for(&anon), None);

        let key = s.login(Some(&anon), "jdoe");
        assert_ne!(anon, key);
        assert_eq!(s.len(), 1);
        assert_eq!(s.take_flash(&key), vec![Flash::success("Registered.")]);
        assert!(s.take_flash(&key).is_empty());
    }

    #[test]
    fn flash_on_live_session_reuses_key() {
        ensure_logging();
        let mut s = Sessions::new(Duration::from_secs(60));
        let key = s.login(None, "root");
        let same = s.push_flash(Some(&key), Flash::warning("Rejected."));
        assert_eq!(key, same);
        let other = s.push_flash(Some("stale"), Flash::error("Oops."));
        assert_ne!(key, other);
        assert_eq!(s.take_flash(&key).len(), 1);
    }

    #[test]
    fn sessions_expire() {
        ensure_logging();
        let mut s = Sessions::new(Duration::ZERO);
        let key = s.login(None, "jdoe");
        s.push_flash(None, Flash::info("hi"));
        assert_eq!(s.uname_for(&key), None);
        assert_eq!(s.prune(), 1);
        assert!(s.is_empty());
    }
}

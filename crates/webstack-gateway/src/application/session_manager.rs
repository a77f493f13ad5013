//! Session lifecycle: issuing, renewing and expiring session tokens.
//!
//! # Lifecycle
//!
//! ```text
//! first request ──► resolve() ──► new token, cookie set, "session::new" on bus
//!                                        │
//! later requests ─► resolve()/touch() ───┤  deadline = now + lifetime
//!                                        │
//! sweeper tick ───► sweep() ─── now > deadline ──► removed, "session::lost"
//! ```
//!
//! # Concurrency
//!
//! The deadline table is owned by [`SessionManager`] and only reachable
//! through [`touch`](SessionManager::touch), [`resolve`](SessionManager::resolve)
//! and [`sweep`](SessionManager::sweep).  Each of them holds the table lock for
//! in-memory work only and never across an `.await`.
//!
//! A session is removed from the table and announced as lost by the same
//! sweep that removed it, so `session::lost` is published at most once per
//! session.  A `touch` that takes the lock before the sweep does pushes the
//! deadline forward and the session survives that tick; a `touch` that comes
//! after finds nothing and is ignored.
//!
//! One sweeper task serves every session (see [`spawn_sweeper`]).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::http::HeaderValue;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::TryRngCore;
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use webstack_core::{Event, EventBus, SessionId, SESSION_LOST_TOPIC, SESSION_NEW_TOPIC};

/// Size of a session token before base64 encoding (256 bits).
pub const TOKEN_BYTES: usize = 32;

/// Failures while resolving a session.  Both abort the current request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The OS random number generator could not produce a token.
    #[error("secure random generation failed: {0}")]
    Randomness(String),

    /// The session cookie cannot be written into the response.
    #[error("session cookie could not be stored: {0}")]
    Store(String),
}

// ── Token source ──────────────────────────────────────────────────────────────

/// Source of raw session-token bytes.
///
/// Production code uses [`OsTokenSource`]; tests substitute a failing source
/// to exercise the [`SessionError::Randomness`] path.
pub trait TokenSource: Send + Sync {
    fn fill(&self, buf: &mut [u8; TOKEN_BYTES]) -> Result<(), SessionError>;
}

/// Reads tokens from the operating system's CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsTokenSource;

impl TokenSource for OsTokenSource {
    fn fill(&self, buf: &mut [u8; TOKEN_BYTES]) -> Result<(), SessionError> {
        OsRng
            .try_fill_bytes(buf)
            .map_err(|e| SessionError::Randomness(e.to_string()))
    }
}

// ── SessionManager ────────────────────────────────────────────────────────────

/// Issues, tracks and expires per-client sessions.
pub struct SessionManager {
    lifetime: Duration,
    cookie_name: String,
    bus: Arc<dyn EventBus>,
    tokens: Box<dyn TokenSource>,
    deadlines: Mutex<HashMap<SessionId, Instant>>,
}

impl SessionManager {
    /// Creates a manager whose sessions live `lifetime` past their last
    /// renewal and travel in the cookie called `cookie_name`.
    pub fn new(lifetime: Duration, cookie_name: impl Into<String>, bus: Arc<dyn EventBus>) -> Self {
        Self {
            lifetime,
            cookie_name: cookie_name.into(),
            bus,
            tokens: Box::new(OsTokenSource),
            deadlines: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the token source.
    #[must_use]
    pub fn with_token_source(mut self, tokens: impl TokenSource + 'static) -> Self {
        self.tokens = Box::new(tokens);
        self
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Returns the session carried by `jar`, or creates one.
    ///
    /// A cookie naming a session this manager still tracks renews that
    /// session.  A missing cookie, or one naming a session that has already
    /// expired, yields a brand-new session: its cookie is added to the
    /// returned jar and `session::new` is published on the bus.
    ///
    /// # Errors
    ///
    /// [`SessionError::Randomness`] or [`SessionError::Store`].  The table is
    /// untouched when either is returned.
    pub async fn resolve(&self, jar: CookieJar) -> Result<(CookieJar, SessionId), SessionError> {
        if let Some(cookie) = jar.get(&self.cookie_name) {
            let id = SessionId::new(cookie.value());
            if self.touch(&id) {
                return Ok((jar, id));
            }
            debug!("cookie names an untracked session; issuing a new one");
        }

        let id = self.generate()?;
        let cookie = self.session_cookie(&id)?;
        self.table().insert(id.clone(), Instant::now() + self.lifetime);
        info!("new session {id}");

        self.announce(SESSION_NEW_TOPIC, &id).await;
        Ok((jar.add(cookie), id))
    }

    /// Pushes the deadline of `id` to `now + lifetime`.
    ///
    /// Returns `false`, and does nothing else, when the session is unknown or
    /// has already been swept.
    pub fn touch(&self, id: &SessionId) -> bool {
        match self.table().get_mut(id) {
            Some(deadline) => {
                *deadline = Instant::now() + self.lifetime;
                true
            }
            None => false,
        }
    }

    /// Removes every session whose deadline has passed and announces each
    /// one as lost.  Returns the removed ids.
    pub async fn sweep(&self) -> Vec<SessionId> {
        let now = Instant::now();
        let mut expired = Vec::new();
        self.table().retain(|id, deadline| {
            if now > *deadline {
                expired.push(id.clone());
                false
            } else {
                true
            }
        });

        for id in &expired {
            info!("lost session {id}");
            self.announce(SESSION_LOST_TOPIC, id).await;
        }
        expired
    }

    /// Whether `id` is currently tracked.
    pub fn is_active(&self, id: &SessionId) -> bool {
        self.table().contains_key(id)
    }

    /// Number of tracked sessions.
    pub fn active_sessions(&self) -> usize {
        self.table().len()
    }

    fn generate(&self) -> Result<SessionId, SessionError> {
        let mut raw = [0u8; TOKEN_BYTES];
        self.tokens.fill(&mut raw)?;
        Ok(SessionId::new(BASE64.encode(raw)))
    }

    fn session_cookie(&self, id: &SessionId) -> Result<Cookie<'static>, SessionError> {
        if !is_cookie_token(&self.cookie_name) {
            return Err(SessionError::Store(format!(
                "invalid cookie name '{}'",
                self.cookie_name.escape_debug()
            )));
        }

        let cookie = Cookie::build((self.cookie_name.clone(), id.to_string()))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .build();

        // The jar drops cookies it cannot turn into a header, so check here.
        HeaderValue::from_str(&cookie.encoded().to_string())
            .map_err(|e| SessionError::Store(e.to_string()))?;
        Ok(cookie)
    }

    async fn announce(&self, topic: &str, id: &SessionId) {
        let event = match Event::new(topic, Value::String(id.to_string())) {
            Ok(event) => event,
            Err(e) => {
                warn!("cannot build {topic} event: {e}");
                return;
            }
        };
        if let Err(e) = self.bus.publish(event).await {
            warn!("failed to announce {topic} for session {id}: {e}");
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<SessionId, Instant>> {
        // No operation leaves the map half-updated, so a poisoned lock is safe.
        self.deadlines.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// RFC 6265 `token`: visible ASCII without separators.
fn is_cookie_token(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_graphic() && !b"()<>@,;:\\\"/[]?={}".contains(&b)
        })
}

// ── Sweeper ───────────────────────────────────────────────────────────────────

/// Spawns the global expiry sweeper.
///
/// Runs [`SessionManager::sweep`] every `interval` until `running` is
/// cleared.  The first sweep happens one full interval after the call.
pub fn spawn_sweeper(
    manager: Arc<SessionManager>,
    interval: Duration,
    running: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // the first tick fires immediately

        loop {
            ticker.tick().await;
            if !running.load(Ordering::Relaxed) {
                debug!("session sweeper stopping");
                break;
            }
            let lost = manager.sweep().await;
            if !lost.is_empty() {
                debug!(
                    "sweep removed {} session(s), {} still active",
                    lost.len(),
                    manager.active_sessions()
                );
            }
        }
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

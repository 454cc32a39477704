//! Browser session lifecycle: identity, registry, and scoped acquisition.
//!
//! [`SessionManager::with_session`] is the only way to get a loaded page.
//! It registers the session under a key, launches a browser with a random
//! identity, navigates, clears any bot-check redirect, hands a [`Session`]
//! to the caller, and closes the browser on every exit path. A
//! [`PageGuard`] covers the paths that never reach the explicit close
//! (panics and dropped futures).
//!
//! Every browser call made through a [`Session`] is raced against its
//! deadline and against the session's cancellation token, so
//! [`SessionRegistry::close_all`] makes in-flight calls fail fast with
//! [`AppError::SessionClosed`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{SourceConfig, TimeoutConfig};
use crate::error::AppError;
use crate::pacing::{JitterRange, PacingConfig};
use crate::traits::{BrowserLauncher, BrowserPage};

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36 Edg/122.0.0.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
];

const VIEWPORTS: &[(u32, u32)] = &[(1920, 1080), (1536, 864), (1440, 900), (1366, 768)];

/// (locale, timezone, Accept-Language)
const LOCALES: &[(&str, &str, &str)] = &[
    ("zh-CN", "Asia/Shanghai", "zh-CN,zh;q=0.9,en;q=0.8"),
    ("zh-CN", "Asia/Shanghai", "zh-CN,zh;q=0.9"),
    ("en-US", "Asia/Shanghai", "en-US,en;q=0.9,zh-CN;q=0.8"),
];

/// Installed before any page script runs. Masks the usual headless tells.
pub const STEALTH_SCRIPT: &str = r#"(() => {
  Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
  try { delete Object.getPrototypeOf(navigator).webdriver; } catch (_) {}
  window.chrome = window.chrome || { runtime: {} };
  Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
  Object.defineProperty(navigator, 'languages', { get: () => ['zh-CN', 'zh', 'en'] });
  const toDataURL = HTMLCanvasElement.prototype.toDataURL;
  HTMLCanvasElement.prototype.toDataURL = function (...args) {
    const ctx = this.getContext('2d');
    if (ctx && this.width > 0 && this.height > 0) {
      const pixel = ctx.getImageData(0, 0, 1, 1);
      pixel.data[0] = pixel.data[0] ^ 1;
      ctx.putImageData(pixel, 0, 0);
    }
    return toDataURL.apply(this, args);
  };
})();"#;

/// Fingerprint presented by one browser session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrowserIdentity {
    pub user_agent: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub locale: String,
    pub timezone: String,
    pub accept_language: String,
}

impl BrowserIdentity {
    /// Pick a user agent, viewport, and locale at random from fixed pools.
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        let user_agent = USER_AGENTS.choose(&mut rng).copied().unwrap_or(USER_AGENTS[0]);
        let (width, height) = VIEWPORTS.choose(&mut rng).copied().unwrap_or(VIEWPORTS[0]);
        let (locale, timezone, accept_language) =
            LOCALES.choose(&mut rng).copied().unwrap_or(LOCALES[0]);
        Self {
            user_agent: user_agent.to_string(),
            viewport_width: width,
            viewport_height: height,
            locale: locale.to_string(),
            timezone: timezone.to_string(),
            accept_language: accept_language.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct RegisteredSession {
    id: Uuid,
    cancel: CancellationToken,
    started_at: DateTime<Utc>,
}

/// Snapshot of one registered session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub key: String,
    pub started_at: DateTime<Utc>,
}

/// Process-wide table of live browser sessions, keyed by scope.
///
/// At most one session exists per key. The registry owns each session's
/// cancellation token, so draining it force-closes every session.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<HashMap<String, RegisteredSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, RegisteredSession>> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned session registry");
            poisoned.into_inner()
        })
    }

    /// Claim `key`. Fails with [`AppError::SessionBusy`] if it is taken.
    pub fn register(&self, key: &str) -> Result<SessionTicket, AppError> {
        let mut entries = self.entries();
        if entries.contains_key(key) {
            return Err(AppError::SessionBusy(key.to_string()));
        }
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        entries.insert(
            key.to_string(),
            RegisteredSession {
                id,
                cancel: cancel.clone(),
                started_at: Utc::now(),
            },
        );
        Ok(SessionTicket {
            registry: self.clone(),
            key: key.to_string(),
            id,
            cancel,
        })
    }

    /// Remove every session and cancel it. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let drained: Vec<(String, RegisteredSession)> = self.entries().drain().collect();
        for (key, session) in &drained {
            tracing::info!(session = %key, "Force-closing browser session");
            session.cancel.cancel();
        }
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries().contains_key(key)
    }

    /// Sessions sorted by key.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .entries()
            .iter()
            .map(|(key, s)| SessionInfo {
                key: key.clone(),
                started_at: s.started_at,
            })
            .collect();
        sessions.sort_by(|a, b| a.key.cmp(&b.key));
        sessions
    }

    fn release(&self, key: &str, id: Uuid) {
        let mut entries = self.entries();
        // A newer session may have taken the key after close_all.
        if entries.get(key).is_some_and(|s| s.id == id) {
            entries.remove(key);
        }
    }
}

/// Proof of registration. Deregisters the session when dropped.
#[derive(Debug)]
pub struct SessionTicket {
    registry: SessionRegistry,
    key: String,
    id: Uuid,
    cancel: CancellationToken,
}

impl SessionTicket {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for SessionTicket {
    fn drop(&mut self) {
        self.registry.release(&self.key, self.id);
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

async fn guarded<T, F>(
    key: &str,
    cancel: &CancellationToken,
    operation: &str,
    limit: Duration,
    fut: F,
) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    if cancel.is_cancelled() {
        return Err(AppError::SessionClosed(key.to_string()));
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AppError::SessionClosed(key.to_string())),
        res = tokio::time::timeout(limit, fut) => match res {
            Ok(inner) => inner,
            Err(_) => Err(AppError::timeout(operation, limit.as_secs())),
        },
    }
}

/// Handle to a loaded page, valid for the duration of one `with_session`.
pub struct Session<P: BrowserPage> {
    page: Arc<P>,
    key: String,
    cancel: CancellationToken,
    timeouts: TimeoutConfig,
    pacing: PacingConfig,
}

impl<P: BrowserPage> Clone for Session<P> {
    fn clone(&self) -> Self {
        Self {
            page: Arc::clone(&self.page),
            key: self.key.clone(),
            cancel: self.cancel.clone(),
            timeouts: self.timeouts,
            pacing: self.pacing.clone(),
        }
    }
}

impl<P: BrowserPage> Session<P> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn pacing(&self) -> &PacingConfig {
        &self.pacing
    }

    /// True once the registry has force-closed this session.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn goto(&self, url: &str) -> Result<(), AppError> {
        tracing::debug!(session = %self.key, url, "Navigating");
        guarded(&self.key, &self.cancel, "navigation", self.timeouts.navigation(), self.page.goto(url)).await
    }

    pub async fn wait_ready(&self) -> Result<(), AppError> {
        guarded(&self.key, &self.cancel, "ready", self.timeouts.ready(), self.page.wait_for_load()).await
    }

    pub async fn reload(&self) -> Result<(), AppError> {
        guarded(&self.key, &self.cancel, "reload", self.timeouts.navigation(), self.page.reload()).await
    }

    pub async fn current_url(&self) -> Result<String, AppError> {
        guarded(&self.key, &self.cancel, "url", self.timeouts.action(), self.page.current_url()).await
    }

    pub async fn content(&self) -> Result<String, AppError> {
        guarded(&self.key, &self.cancel, "content", self.timeouts.action(), self.page.content()).await
    }

    /// Click the next-page control if it is visible. `false` means the end
    /// of the listing.
    pub async fn click_next(&self, selector: &str) -> Result<bool, AppError> {
        guarded(
            &self.key,
            &self.cancel,
            "click",
            self.timeouts.action(),
            self.page.click_if_visible(selector),
        )
        .await
    }

    /// Sleep a random duration from `range`, waking early if closed.
    pub async fn pause(&self, range: JitterRange) -> Result<(), AppError> {
        let delay = range.sample();
        if delay.is_zero() {
            if self.is_closed() {
                return Err(AppError::SessionClosed(self.key.clone()));
            }
            return Ok(());
        }
        tracing::trace!(session = %self.key, delay_ms = delay.as_millis() as u64, "Pacing");
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AppError::SessionClosed(self.key.clone())),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

/// Closes the page when dropped without an explicit [`close`](Self::close).
///
/// Drop cannot await, so the close is spawned on the current runtime.
pub struct PageGuard<P: BrowserPage> {
    page: Option<Arc<P>>,
    key: String,
    close_timeout: Duration,
}

impl<P: BrowserPage> PageGuard<P> {
    pub fn new(page: Arc<P>, key: &str, close_timeout: Duration) -> Self {
        Self {
            page: Some(page),
            key: key.to_string(),
            close_timeout,
        }
    }

    /// Close the page now and log (but swallow) a failed close.
    pub async fn close(mut self) {
        if let Some(page) = self.page.take() {
            close_page(&self.key, page, self.close_timeout).await;
        }
    }
}

async fn close_page<P: BrowserPage>(key: &str, page: Arc<P>, limit: Duration) {
    match tokio::time::timeout(limit, page.close()).await {
        Ok(Ok(())) => tracing::debug!(session = %key, "Browser session closed"),
        Ok(Err(e)) => tracing::warn!(session = %key, error = %e, "Failed to close browser session"),
        Err(_) => tracing::warn!(session = %key, "Timed out closing browser session"),
    }
}

impl<P: BrowserPage> Drop for PageGuard<P> {
    fn drop(&mut self) {
        let Some(page) = self.page.take() else {
            return;
        };
        let key = std::mem::take(&mut self.key);
        let limit = self.close_timeout;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { close_page(&key, page, limit).await });
            }
            Err(_) => {
                tracing::warn!(session = %key, "No runtime to close browser session; it may leak");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Opens scoped browser sessions against the registry.
pub struct SessionManager<L: BrowserLauncher> {
    launcher: L,
    registry: SessionRegistry,
}

impl<L: BrowserLauncher> Clone for SessionManager<L> {
    fn clone(&self) -> Self {
        Self {
            launcher: self.launcher.clone(),
            registry: self.registry.clone(),
        }
    }
}

impl<L: BrowserLauncher> SessionManager<L> {
    pub fn new(launcher: L, registry: SessionRegistry) -> Self {
        Self { launcher, registry }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Run `f` against a freshly loaded page at `url`.
    ///
    /// The session is registered under `key` for its whole lifetime and the
    /// browser is closed on every exit path. Errors from navigation, the bot
    /// check, or `f` itself are returned as-is after teardown.
    pub async fn with_session<T, F, Fut>(
        &self,
        key: &str,
        source: &SourceConfig,
        url: &str,
        f: F,
    ) -> Result<T, AppError>
    where
        F: FnOnce(Session<L::Page>) -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let ticket = self.registry.register(key)?;
        let cancel = ticket.cancel_token();
        let identity = BrowserIdentity::random();
        tracing::debug!(
            session = %key,
            user_agent = %identity.user_agent,
            viewport = %format!("{}x{}", identity.viewport_width, identity.viewport_height),
            "Launching browser session"
        );

        let page = guarded(
            key,
            &cancel,
            "launch",
            source.timeouts.launch(),
            self.launcher.launch(&identity),
        )
        .await?;
        let page = Arc::new(page);
        let guard = PageGuard::new(Arc::clone(&page), key, source.timeouts.action());

        let session = Session {
            page,
            key: key.to_string(),
            cancel,
            timeouts: source.timeouts,
            pacing: source.pacing.clone(),
        };

        let result = async {
            session.pause(source.pacing.navigation).await?;
            session.goto(url).await?;
            session.wait_ready().await?;
            clear_bot_check(&session, source).await?;
            session.pause(source.pacing.navigation).await?;
            f(session.clone()).await
        }
        .await;

        drop(session);
        guard.close().await;
        drop(ticket);
        result
    }
}

/// Escalate through a backoff and then a reload before giving up on a
/// bot-check redirect.
async fn clear_bot_check<P: BrowserPage>(
    session: &Session<P>,
    source: &SourceConfig,
) -> Result<(), AppError> {
    let url = session.current_url().await?;
    if !source.is_challenge_url(&url) {
        return Ok(());
    }

    tracing::warn!(source = %source.name, %url, "Bot check detected, backing off");
    session.pause(source.pacing.challenge_backoff).await?;
    let url = session.current_url().await?;
    if !source.is_challenge_url(&url) {
        tracing::info!(source = %source.name, "Bot check cleared after backoff");
        return Ok(());
    }

    tracing::warn!(source = %source.name, %url, "Still on bot check, reloading");
    session.reload().await?;
    session.wait_ready().await?;
    let url = session.current_url().await?;
    if !source.is_challenge_url(&url) {
        tracing::info!(source = %source.name, "Bot check cleared after reload");
        return Ok(());
    }

    Err(AppError::BotChallenge {
        site: source.name.clone(),
        url,
    })
}

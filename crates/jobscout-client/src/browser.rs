use std::path::{Path, PathBuf};
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::emulation::{
    SetLocaleOverrideParams, SetTimezoneOverrideParams, SetUserAgentOverrideParams,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use jobscout_core::error::AppError;
use jobscout_core::session::{BrowserIdentity, STEALTH_SCRIPT};
use jobscout_core::traits::{BrowserLauncher, BrowserPage};
use tempfile::TempDir;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Chromium flags applied to every launch, before identity-specific ones.
const BASE_ARGS: &[&str] = &[
    "--disable-gpu",
    "--disable-dev-shm-usage",
    "--disable-extensions",
    "--disable-popup-blocking",
    "--disable-translate",
    "--no-first-run",
    "--no-default-browser-check",
    "--disable-blink-features=AutomationControlled",
];

/// Launches one Chromium process per session via the Chrome DevTools Protocol.
///
/// Every [`BrowserLauncher::launch`] call starts a fresh process with its own
/// throwaway profile directory, so cookies and storage never leak between
/// sessions. The session's [`BrowserIdentity`] is applied before the first
/// navigation: user agent, `Accept-Language`, locale, timezone, window size,
/// and the stealth init script.
///
/// # Example
///
/// ```rust,no_run
/// use jobscout_client::ChromiumLauncher;
/// use jobscout_core::session::BrowserIdentity;
/// use jobscout_core::traits::{BrowserLauncher, BrowserPage};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let launcher = ChromiumLauncher::new();
/// let page = launcher.launch(&BrowserIdentity::random()).await?;
/// page.goto("https://www.zhipin.com/web/geek/job").await?;
/// println!("{}", page.content().await?.len());
/// page.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    chrome_bin: Option<PathBuf>,
    headless: bool,
}

impl Default for ChromiumLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl ChromiumLauncher {
    /// Headless launcher using the first Chrome binary found on this machine,
    /// or `chromiumoxide`'s own lookup when none is found.
    pub fn new() -> Self {
        Self {
            chrome_bin: find_chrome_binary(),
            headless: true,
        }
    }

    pub fn with_chrome_bin(mut self, path: impl Into<PathBuf>) -> Self {
        self.chrome_bin = Some(path.into());
        self
    }

    /// Show the browser window. Useful when solving a bot check by hand.
    pub fn headful(mut self) -> Self {
        self.headless = false;
        self
    }

    fn browser_config(
        &self,
        identity: &BrowserIdentity,
        profile_dir: &Path,
    ) -> Result<BrowserConfig, AppError> {
        // The builder's own headless flag is old-mode headless; pass the
        // new-mode flag ourselves instead.
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .disable_default_args()
            .with_head()
            .user_data_dir(profile_dir)
            .window_size(identity.viewport_width, identity.viewport_height)
            .viewport(Viewport {
                width: identity.viewport_width,
                height: identity.viewport_height,
                ..Viewport::default()
            })
            .args(launch_args(identity, self.headless));

        if let Some(bin) = &self.chrome_bin {
            tracing::debug!("Using Chrome binary: {}", bin.display());
            builder = builder.chrome_executable(bin);
        }

        builder
            .build()
            .map_err(|e| AppError::BrowserError(format!("Browser config error: {e}")))
    }
}

/// Command-line flags for one launch with `identity`.
fn launch_args(identity: &BrowserIdentity, headless: bool) -> Vec<String> {
    let mut args: Vec<String> = BASE_ARGS.iter().map(|a| a.to_string()).collect();
    args.push(format!("--user-agent={}", identity.user_agent));
    args.push(format!("--lang={}", identity.locale));
    if headless {
        args.push("--headless=new".to_string());
    }
    args
}

impl BrowserLauncher for ChromiumLauncher {
    type Page = ChromiumPage;

    async fn launch(&self, identity: &BrowserIdentity) -> Result<ChromiumPage, AppError> {
        let profile_dir = tempfile::Builder::new()
            .prefix("jobscout-profile-")
            .tempdir()
            .map_err(|e| AppError::BrowserError(format!("Failed to create profile dir: {e}")))?;
        let config = self.browser_config(identity, profile_dir.path())?;

        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the connection to work.
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::warn!(error = %e, "Browser CDP handler error");
                    break;
                }
            }
        });

        match prepare_page(&browser, identity).await {
            Ok(page) => {
                tracing::debug!(user_agent = %identity.user_agent, "Browser launched");
                Ok(ChromiumPage {
                    page: Mutex::new(Some(page)),
                    browser: Mutex::new(Some(browser)),
                    handler,
                    profile_dir: Mutex::new(Some(profile_dir)),
                })
            }
            Err(e) => {
                if let Err(close_err) = browser.close().await {
                    tracing::debug!(error = %close_err, "Browser close after failed setup");
                    let _ = browser.kill().await;
                }
                handler.abort();
                Err(e)
            }
        }
    }
}

/// Open the session tab and apply the identity before any navigation.
async fn prepare_page(browser: &Browser, identity: &BrowserIdentity) -> Result<Page, AppError> {
    let page = browser
        .new_page("about:blank")
        .await
        .map_err(cdp_error("open tab"))?;

    let mut user_agent = SetUserAgentOverrideParams::new(identity.user_agent.clone());
    user_agent.accept_language = Some(identity.accept_language.clone());
    page.execute(user_agent)
        .await
        .map_err(cdp_error("set user agent"))?;

    page.evaluate_on_new_document(STEALTH_SCRIPT)
        .await
        .map_err(cdp_error("install stealth script"))?;

    // Locale and timezone overrides are best effort; some builds reject
    // values they do not ship data for.
    if let Err(e) = page
        .execute(SetTimezoneOverrideParams::new(identity.timezone.clone()))
        .await
    {
        tracing::warn!(timezone = %identity.timezone, error = %e, "Timezone override rejected");
    }
    if let Err(e) = page
        .execute(SetLocaleOverrideParams {
            locale: Some(identity.locale.clone()),
        })
        .await
    {
        tracing::warn!(locale = %identity.locale, error = %e, "Locale override rejected");
    }

    Ok(page)
}

fn cdp_error(operation: &'static str) -> impl Fn(CdpError) -> AppError {
    move |e| AppError::BrowserError(format!("Failed to {operation}: {e}"))
}

/// A single tab in a dedicated Chromium process.
///
/// Closing the page shuts the whole process down and removes its profile
/// directory.
pub struct ChromiumPage {
    page: Mutex<Option<Page>>,
    browser: Mutex<Option<Browser>>,
    handler: JoinHandle<()>,
    profile_dir: Mutex<Option<TempDir>>,
}

impl ChromiumPage {
    async fn page(&self) -> Result<Page, AppError> {
        self.page
            .lock()
            .await
            .clone()
            .ok_or_else(|| AppError::BrowserError("page already closed".into()))
    }
}

impl BrowserPage for ChromiumPage {
    async fn goto(&self, url: &str) -> Result<(), AppError> {
        let page = self.page().await?;
        page.goto(url)
            .await
            .map_err(|e| AppError::NetworkError(format!("Failed to navigate to {url}: {e}")))?;
        Ok(())
    }

    async fn wait_for_load(&self) -> Result<(), AppError> {
        let page = self.page().await?;
        loop {
            let state: String = page
                .evaluate("document.readyState")
                .await
                .map_err(cdp_error("read document state"))?
                .into_value()
                .map_err(|e| AppError::BrowserError(format!("Unexpected document state: {e}")))?;
            if state == "complete" {
                return Ok(());
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    async fn current_url(&self) -> Result<String, AppError> {
        let page = self.page().await?;
        let url = page.url().await.map_err(cdp_error("read current url"))?;
        Ok(url.unwrap_or_else(|| "about:blank".to_string()))
    }

    async fn reload(&self) -> Result<(), AppError> {
        let page = self.page().await?;
        page.reload()
            .await
            .map_err(|e| AppError::NetworkError(format!("Failed to reload: {e}")))?;
        Ok(())
    }

    async fn content(&self) -> Result<String, AppError> {
        let page = self.page().await?;
        page.content().await.map_err(cdp_error("read page content"))
    }

    async fn click_if_visible(&self, selector: &str) -> Result<bool, AppError> {
        let page = self.page().await?;
        let visible: bool = page
            .evaluate(visibility_probe(selector)?)
            .await
            .map_err(cdp_error("probe next control"))?
            .into_value()
            .map_err(|e| AppError::BrowserError(format!("Unexpected probe result: {e}")))?;
        if !visible {
            return Ok(false);
        }

        let element = page
            .find_element(selector)
            .await
            .map_err(cdp_error("find next control"))?;
        element.click().await.map_err(cdp_error("click next control"))?;
        Ok(true)
    }

    async fn close(&self) -> Result<(), AppError> {
        if let Some(page) = self.page.lock().await.take()
            && let Err(e) = page.close().await
        {
            tracing::debug!(error = %e, "Tab close failed, closing browser anyway");
        }

        let mut result = Ok(());
        if let Some(mut browser) = self.browser.lock().await.take() {
            if let Err(e) = browser.close().await {
                result = Err(AppError::BrowserError(format!("Failed to close browser: {e}")));
                let _ = browser.kill().await;
            }
            let _ = browser.wait().await;
        }
        self.handler.abort();
        drop(self.profile_dir.lock().await.take());
        result
    }
}

impl Drop for ChromiumPage {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

/// JavaScript that reports whether the first match of `selector` is
/// rendered, visible, and not disabled.
fn visibility_probe(selector: &str) -> Result<String, AppError> {
    let selector = serde_json::to_string(selector)?;
    Ok(format!(
        r#"(() => {{
    const el = document.querySelector({selector});
    if (!el) return false;
    const style = window.getComputedStyle(el);
    const rect = el.getBoundingClientRect();
    if (style.display === 'none' || style.visibility === 'hidden') return false;
    if (rect.width === 0 || rect.height === 0) return false;
    if (el.disabled || el.getAttribute('aria-disabled') === 'true') return false;
    return !el.classList.contains('disabled');
}})()"#
    ))
}

/// Tries to locate the real Chrome/Chromium binary.
///
/// `CHROME_BIN` wins when it points at an existing file. On systems where
/// Chromium is installed via **snap**, the wrapper at `/snap/bin/chromium`
/// strips unknown CLI flags, so the real binary inside the snap is checked
/// before the usual system paths. Returns `None` to let `chromiumoxide` do
/// its own lookup.
pub fn find_chrome_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
        tracing::warn!(path = %p, "CHROME_BIN does not exist, searching default locations");
    }
    first_existing(CHROME_CANDIDATES)
}

const CHROME_CANDIDATES: &[&str] = &[
    // Snap (Ubuntu default)
    "/snap/chromium/current/usr/lib/chromium-browser/chrome",
    // Flatpak
    "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/google-chrome",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
];

fn first_existing(candidates: &[&str]) -> Option<PathBuf> {
    candidates.iter().map(PathBuf::from).find(|p| p.exists())
}

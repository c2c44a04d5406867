//! Headless-browser screenshots of a rendered carousel document.
//!
//! One capture run walks a fixed lifecycle:
//!
//! ```text
//! Uninitialized -> BrowserLaunched -> PageOpen -> Navigated
//!     -> CaptureComplete -> PageClosed -> BrowserClosed
//! ```
//!
//! Any step may exit early with an error; the page and the browser are
//! released on every exit path. [`BrowserSession`] owns the Chromium
//! process, and dropping it without an explicit close kills the process
//! and stops the CDP handler task, which also covers a cancelled future.

use crate::config::CaptureConfig;
use crate::models::CaptureResult;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, EventLifecycleEvent, NavigateParams, SetLifecycleEventsEnabledParams,
};
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use reqwest::Url;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Selector for the repeating carousel unit.
pub const PAGE_SELECTOR: &str = ".page";
pub const FULL_PAGE_FILE: &str = "full-page.png";

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("browser launch failed: {0}")]
    Launch(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("screenshot failed: {0}")]
    Screenshot(String),
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Uninitialized,
    BrowserLaunched,
    PageOpen,
    Navigated,
    CaptureComplete,
    PageClosed,
    BrowserClosed,
}

impl CaptureState {
    /// The only forward transition out of each state.
    pub fn next(self) -> Option<Self> {
        use CaptureState::*;
        match self {
            Uninitialized => Some(BrowserLaunched),
            BrowserLaunched => Some(PageOpen),
            PageOpen => Some(Navigated),
            Navigated => Some(CaptureComplete),
            CaptureComplete => Some(PageClosed),
            PageClosed => Some(BrowserClosed),
            BrowserClosed => None,
        }
    }
}

#[async_trait]
pub trait PageCapturer: Send + Sync {
    /// Screenshots `document` into `output_dir`, creating the directory when
    /// needed. Same-named files from an earlier run are overwritten.
    async fn capture(
        &self,
        document: &Path,
        output_dir: &Path,
    ) -> Result<CaptureResult, CaptureError>;
}

/// Chromium-backed capturer. Launches a fresh browser per call.
pub struct ChromeCapturer {
    config: CaptureConfig,
}

impl ChromeCapturer {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PageCapturer for ChromeCapturer {
    async fn capture(
        &self,
        document: &Path,
        output_dir: &Path,
    ) -> Result<CaptureResult, CaptureError> {
        let mut session = BrowserSession::launch(&self.config).await?;
        let result = session.capture_document(document, output_dir).await;
        session.close().await;
        result
    }
}

/// A running Chromium process plus the task that drives its CDP connection.
pub struct BrowserSession {
    browser: Option<Browser>,
    handler: JoinHandle<()>,
    state: CaptureState,
    config: CaptureConfig,
}

impl BrowserSession {
    pub async fn launch(config: &CaptureConfig) -> Result<Self, CaptureError> {
        let browser_config = browser_config(config).map_err(CaptureError::Launch)?;
        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|err| CaptureError::Launch(err.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(target = "reel.capture", error = %err, "cdp_handler_stopped");
                    break;
                }
            }
        });

        let mut session = Self {
            browser: Some(browser),
            handler,
            state: CaptureState::Uninitialized,
            config: config.clone(),
        };
        session.advance(CaptureState::BrowserLaunched);
        Ok(session)
    }

    /// Opens one page, captures it, and closes the page whether or not the
    /// capture succeeded.
    pub async fn capture_document(
        &mut self,
        document: &Path,
        output_dir: &Path,
    ) -> Result<CaptureResult, CaptureError> {
        let page = self.open_page().await?;
        let result = self.capture_on_page(&page, document, output_dir).await;
        match page.close().await {
            Ok(()) => self.advance(CaptureState::PageClosed),
            Err(err) => warn!(target = "reel.capture", error = %err, "page_close_failed"),
        }
        result
    }

    async fn open_page(&mut self) -> Result<Page, CaptureError> {
        let browser = self
            .browser
            .as_ref()
            .ok_or_else(|| CaptureError::Launch("browser already closed".into()))?;
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|err| CaptureError::Navigation(format!("open page: {err}")))?;

        let metrics = SetDeviceMetricsOverrideParams::new(
            i64::from(self.config.viewport_width),
            i64::from(self.config.viewport_height),
            1.0,
            false,
        );
        page.execute(metrics)
            .await
            .map_err(|err| CaptureError::Navigation(format!("set viewport: {err}")))?;
        page.execute(SetLifecycleEventsEnabledParams::new(true))
            .await
            .map_err(|err| CaptureError::Navigation(format!("lifecycle events: {err}")))?;

        self.advance(CaptureState::PageOpen);
        Ok(page)
    }

    async fn capture_on_page(
        &mut self,
        page: &Page,
        document: &Path,
        output_dir: &Path,
    ) -> Result<CaptureResult, CaptureError> {
        let url = document_url(document).await?;
        navigate_until_idle(page, &url, &self.config).await?;
        self.advance(CaptureState::Navigated);

        ensure_dir(output_dir).await?;

        let full_page_path = output_dir.join(FULL_PAGE_FILE);
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(true)
            .build();
        let bytes = page
            .screenshot(params)
            .await
            .map_err(|err| CaptureError::Screenshot(format!("full page: {err}")))?;
        write_png(&full_page_path, &bytes).await?;
        info!(target = "reel.capture", path = %full_page_path.display(), "full_page_saved");

        let page_paths = capture_page_elements(page, output_dir).await?;
        self.advance(CaptureState::CaptureComplete);

        Ok(CaptureResult {
            full_page_path,
            page_paths,
        })
    }

    /// Closes the browser and waits for the process to exit. Falls back to
    /// killing the process when the graceful close fails.
    pub async fn close(mut self) {
        let Some(mut browser) = self.browser.take() else {
            return;
        };
        if let Err(err) = browser.close().await {
            warn!(target = "reel.capture", error = %err, "browser_close_failed");
            if let Some(Err(err)) = browser.kill().await {
                warn!(target = "reel.capture", error = %err, "browser_kill_failed");
            }
        }
        if let Err(err) = browser.wait().await {
            warn!(target = "reel.capture", error = %err, "browser_wait_failed");
        }
        self.advance(CaptureState::BrowserClosed);
    }

    fn advance(&mut self, to: CaptureState) {
        if self.state.next() == Some(to) {
            debug!(target = "reel.capture", from = ?self.state, to = ?to, "capture_state");
        } else {
            debug!(target = "reel.capture", from = ?self.state, to = ?to, "capture_state_skipped");
        }
        self.state = to;
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if let Some(mut browser) = self.browser.take() {
            warn!(
                target = "reel.capture",
                state = ?self.state,
                "browser session dropped without close; killing process"
            );
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(async move {
                        let _ = browser.kill().await;
                        let _ = browser.wait().await;
                    });
                }
                // chromiumoxide kills its child process when `Browser` drops.
                Err(_) => drop(browser),
            }
        }
        self.handler.abort();
    }
}

fn browser_config(config: &CaptureConfig) -> Result<BrowserConfig, String> {
    let mut builder = BrowserConfig::builder()
        .no_sandbox()
        .arg("--disable-setuid-sandbox")
        .arg("--disable-dev-shm-usage")
        .window_size(config.viewport_width, config.viewport_height);
    if let Some(path) = &config.chrome_executable {
        builder = builder.chrome_executable(path);
    }
    builder.build()
}

/// Navigates and waits for the readiness gate: the `networkIdle` lifecycle
/// event for this navigation, then a fixed settling delay for layout.
async fn navigate_until_idle(
    page: &Page,
    url: &Url,
    config: &CaptureConfig,
) -> Result<(), CaptureError> {
    let mut lifecycle = page
        .event_listener::<EventLifecycleEvent>()
        .await
        .map_err(|err| CaptureError::Navigation(format!("listen: {err}")))?;

    let navigation = page
        .execute(NavigateParams::new(url.as_str()))
        .await
        .map_err(|err| CaptureError::Navigation(format!("{url}: {err}")))?;
    if let Some(error_text) = &navigation.result.error_text {
        return Err(CaptureError::Navigation(format!("{url}: {error_text}")));
    }
    let loader_id = navigation.result.loader_id.clone();

    let idle = async {
        while let Some(event) = lifecycle.next().await {
            let same_load = loader_id.as_ref().is_none_or(|id| *id == event.loader_id);
            if same_load && event.name == "networkIdle" {
                return true;
            }
        }
        false
    };

    match tokio::time::timeout(config.network_idle_timeout, idle).await {
        Ok(true) => {}
        Ok(false) => {
            return Err(CaptureError::Navigation(
                "page went away before network idle".into(),
            ));
        }
        Err(_) => {
            return Err(CaptureError::Navigation(format!(
                "network idle not reached within {:?}",
                config.network_idle_timeout
            )));
        }
    }

    tokio::time::sleep(config.settle_delay).await;
    Ok(())
}

/// Screenshots every page element in DOM order, one at a time.
async fn capture_page_elements(
    page: &Page,
    output_dir: &Path,
) -> Result<Vec<PathBuf>, CaptureError> {
    let elements = page
        .find_elements(PAGE_SELECTOR)
        .await
        .map_err(|err| CaptureError::Screenshot(format!("query {PAGE_SELECTOR}: {err}")))?;

    if elements.is_empty() {
        warn!(
            target = "reel.capture",
            selector = PAGE_SELECTOR,
            "no page elements found; template shape may have changed"
        );
        return Ok(Vec::new());
    }

    let mut paths = Vec::with_capacity(elements.len());
    for (idx, element) in elements.iter().enumerate() {
        let position = idx + 1;
        let path = output_dir.join(page_file_name(position));
        let bytes = element
            .screenshot(CaptureScreenshotFormat::Png)
            .await
            .map_err(|err| CaptureError::Screenshot(format!("page {position}: {err}")))?;
        write_png(&path, &bytes).await?;
        info!(target = "reel.capture", page = position, path = %path.display(), "page_saved");
        paths.push(path);
    }
    crate::metrics::pages_captured(paths.len());
    Ok(paths)
}

/// `page-<n>.png` for the 1-based position `n`.
pub fn page_file_name(position: usize) -> String {
    format!("page-{position}.png")
}

/// Creates `dir` and its parents if missing. A no-op when it already exists.
pub async fn ensure_dir(dir: &Path) -> Result<(), CaptureError> {
    if tokio::fs::metadata(dir).await.is_ok_and(|meta| meta.is_dir()) {
        return Ok(());
    }
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| CaptureError::Write {
            path: dir.to_path_buf(),
            source,
        })?;
    info!(target = "reel.capture", path = %dir.display(), "created_output_dir");
    Ok(())
}

/// `file://` URL of the resolved absolute document path.
pub async fn document_url(document: &Path) -> Result<Url, CaptureError> {
    let absolute = tokio::fs::canonicalize(document)
        .await
        .map_err(|err| CaptureError::Navigation(format!("{}: {err}", document.display())))?;
    Url::from_file_path(&absolute).map_err(|()| {
        CaptureError::Navigation(format!("not a file path: {}", absolute.display()))
    })
}

async fn write_png(path: &Path, bytes: &[u8]) -> Result<(), CaptureError> {
    tokio::fs::write(path, bytes)
        .await
        .map_err(|source| CaptureError::Write {
            path: path.to_path_buf(),
            source,
        })
}

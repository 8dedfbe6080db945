//! Launching and health-probing a single browser process.
//!
//! Grounded on the teacher lineage's browser-launch routine: a per-browser
//! temp profile directory, a documented sandbox/headless chrome-args set,
//! and a spawned task that drains the CDP handler stream for the lifetime of
//! the browser.

use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;

use crate::BrowserError;

/// Inputs needed to launch one browser process. A subset of the pool's
/// process-wide configuration, narrowed to what `launch()` actually needs.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub headless: bool,
    pub binary_path: Option<String>,
    pub ignore_cert_errors: bool,
    pub proxy_url: Option<String>,
    pub request_timeout: Duration,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            headless: true,
            binary_path: None,
            ignore_cert_errors: false,
            proxy_url: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// A launched browser plus the temp profile directory and handler task that
/// must outlive it. Dropping this drops the temp dir (deleting the profile)
/// and aborts the handler task.
pub struct LaunchedBrowser {
    pub browser: Browser,
    pub handler_task: JoinHandle<()>,
    _profile_dir: TempDir,
}

impl Drop for LaunchedBrowser {
    fn drop(&mut self) {
        self.handler_task.abort();
    }
}

/// Launch a fresh, sandboxed, headless-by-default browser process.
pub async fn launch(config: &LaunchConfig) -> Result<LaunchedBrowser, BrowserError> {
    let profile_dir = tempfile::Builder::new()
        .prefix("wraith-profile-")
        .tempdir()
        .map_err(|e| BrowserError::Launch(format!("failed to create profile dir: {e}")))?;

    let mut builder = BrowserConfig::builder().user_data_dir(profile_dir.path());

    if !config.headless {
        builder = builder.with_head();
    }
    if config.ignore_cert_errors {
        builder = builder.arg("--ignore-certificate-errors");
    }
    if let Some(proxy) = &config.proxy_url {
        builder = builder.arg(format!("--proxy-server={proxy}"));
    }
    if let Some(path) = &config.binary_path {
        builder = builder.chrome_executable(path);
    }

    builder = builder
        .arg("--no-sandbox")
        .arg("--disable-setuid-sandbox")
        .arg("--disable-gpu")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-software-rasterizer")
        .request_timeout(config.request_timeout);

    let cdp_config = builder
        .build()
        .map_err(|e| BrowserError::Launch(format!("invalid browser config: {e}")))?;

    let (browser, mut handler) = Browser::launch(cdp_config)
        .await
        .map_err(|e| BrowserError::Launch(format!("browser launch failed: {e}")))?;

    let handler_task = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(err) = event {
                tracing::debug!(error = %err, "browser handler event error");
            }
        }
    });

    Ok(LaunchedBrowser {
        browser,
        handler_task,
        _profile_dir: profile_dir,
    })
}

/// Launch a standalone, non-pooled browser through a caller-supplied proxy.
/// The caller owns the returned handle's full lifetime.
pub async fn launch_with_proxy(
    mut config: LaunchConfig,
    proxy_url: String,
) -> Result<LaunchedBrowser, BrowserError> {
    config.proxy_url = Some(proxy_url);
    launch(&config).await
}

const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a blank page, navigate it to `about:blank`, and close it, bounded
/// by a 5 s timeout. Used by the pool as the Acquire-time health probe.
pub async fn health_probe(browser: &Browser) -> Result<(), BrowserError> {
    let probe = async {
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::Unhealthy(format!("failed to open probe page: {e}")))?;
        page.close()
            .await
            .map_err(|e| BrowserError::Unhealthy(format!("failed to close probe page: {e}")))?;
        Ok::<(), BrowserError>(())
    };

    match tokio::time::timeout(HEALTH_PROBE_TIMEOUT, probe).await {
        Ok(result) => result,
        Err(_) => Err(BrowserError::Unhealthy("health probe timed out".to_string())),
    }
}

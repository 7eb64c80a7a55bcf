use crate::config::ScraperConfig;
use crate::models::PageError;
use anyhow::Result;
use async_trait::async_trait;
use std::time::{Duration, Instant};
use thirtyfour::prelude::*;
use thirtyfour::{ChromeCapabilities, ChromiumLikeCapabilities};
use tokio::time::sleep;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

const SCROLL_SCRIPTS: [&str; 2] = [
    "window.scrollTo(0, document.body.scrollHeight * 0.5);",
    "window.scrollTo(0, document.body.scrollHeight);",
];

/// Renders a URL and hands back the final document.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &str) -> Result<String, PageError>;
}

/// The browser operations one page render needs.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn goto(&self, url: &str) -> Result<()>;
    /// Number of elements currently matching `css`.
    async fn count(&self, css: &str) -> Result<usize>;
    async fn execute(&self, script: &str) -> Result<()>;
    async fn source(&self) -> Result<String>;
    async fn quit(&self) -> Result<()>;
}

/// Live session on a WebDriver endpoint.
struct DriverSession(WebDriver);

#[async_trait]
impl BrowserSession for DriverSession {
    async fn goto(&self, url: &str) -> Result<()> {
        self.0.goto(url).await?;
        Ok(())
    }

    async fn count(&self, css: &str) -> Result<usize> {
        Ok(self.0.find_all(By::Css(css.to_string())).await?.len())
    }

    async fn execute(&self, script: &str) -> Result<()> {
        self.0.execute(script, Vec::new()).await?;
        Ok(())
    }

    async fn source(&self) -> Result<String> {
        Ok(self.0.source().await?)
    }

    async fn quit(&self) -> Result<()> {
        // `WebDriver` is a shared handle; quitting a clone ends the session.
        self.0.clone().quit().await?;
        Ok(())
    }
}

fn fetch_failure(e: impl std::fmt::Display) -> PageError {
    PageError::FetchFailure(e.to_string())
}

fn session_failure(e: anyhow::Error) -> PageError {
    PageError::FetchFailure(format!("{:#}", e))
}

/// One fresh WebDriver session per page, torn down on every exit path.
pub struct WebDriverRenderer {
    config: ScraperConfig,
}

impl WebDriverRenderer {
    pub fn new(config: &ScraperConfig) -> Self {
        Self { config: config.clone() }
    }

    fn capabilities(&self) -> WebDriverResult<ChromeCapabilities> {
        let mut caps = DesiredCapabilities::chrome();
        if self.config.headless {
            caps.add_arg("--headless=new")?;
        }
        caps.add_arg("--disable-gpu")?;
        caps.add_arg("--no-sandbox")?;
        caps.add_arg("--disable-notifications")?;
        caps.add_arg("--disable-popup-blocking")?;
        caps.add_arg("--disable-blink-features=AutomationControlled")?;
        caps.add_arg("--log-level=3")?;
        caps.add_arg(&format!(
            "--window-size={},{}",
            self.config.window_width, self.config.window_height
        ))?;
        caps.add_arg(&format!("--user-agent={}", self.config.user_agent))?;
        caps.add_experimental_option("excludeSwitches", vec!["enable-automation", "enable-logging"])?;
        caps.add_experimental_option("useAutomationExtension", false)?;
        Ok(caps)
    }

    /// Poll until the product container exists or the render timeout elapses.
    /// A driver error ends the wait at once.
    async fn wait_for_container(&self, session: &dyn BrowserSession) -> Result<(), PageError> {
        let timeout = self.config.render_timeout();
        let start = Instant::now();

        loop {
            if session.count(&self.config.container_selector).await.map_err(session_failure)? > 0 {
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(PageError::RenderTimeout(self.config.render_timeout_secs));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn drive(&self, session: &dyn BrowserSession, url: &str) -> Result<String, PageError> {
        session.goto(url).await.map_err(session_failure)?;
        self.wait_for_container(session).await?;

        // Secondary async content (prices, badges) lands after the container.
        sleep(self.config.page_load_delay()).await;

        for script in SCROLL_SCRIPTS {
            if let Err(e) = session.execute(script).await {
                warn!("Scroll failed on {}: {:#}", url, e);
            }
            sleep(self.config.scroll_pause()).await;
        }

        session.source().await.map_err(session_failure)
    }

    /// Drive an open session, then quit it whatever the outcome.
    async fn render_in(&self, session: &dyn BrowserSession, url: &str) -> Result<String, PageError> {
        let outcome = self.drive(session, url).await;

        if let Err(e) = session.quit().await {
            warn!("Failed to close browser session for {}: {:#}", url, e);
        }
        outcome
    }
}

#[async_trait]
impl PageRenderer for WebDriverRenderer {
    async fn render(&self, url: &str) -> Result<String, PageError> {
        let caps = self.capabilities().map_err(fetch_failure)?;
        let driver = WebDriver::new(&self.config.webdriver_url, caps)
            .await
            .map_err(fetch_failure)?;

        debug!("Session opened for {}", url);
        self.render_in(&DriverSession(driver), url).await
    }
}

//! # Session — Authenticated Panel Session
//!
//! `SessionManager` performs the login handshake and hands back a
//! `PanelSession`: a cookie jar shared by a redirect-following HTTP client,
//! plus the resolved service root. Every later call (enumeration, counts,
//! allocation) goes through that one session, sequentially.
//!
//! ## Login Handshake
//!
//! ```text
//! GET  login      -> markup with arithmetic challenge
//! POST signin     -> username, password, capt   (redirects NOT followed)
//!      3xx + Location required; anything else is a rejection
//! GET  <Location> -> resolved against the service root, must be 2xx
//! ```
//!
//! Sign-in uses a second client with redirects disabled that shares the same
//! cookie jar, so the session cookie set on the 302 is kept.

use crate::captcha;
use crate::config::{Credentials, HarvestConfig};
use crate::error::{AuthError, PanelError};
use reqwest::cookie::Jar;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::redirect::Policy;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

const PAGE_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
pub(crate) const AJAX_ACCEPT: &str = "application/json, text/javascript, */*; q=0.01";
const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

pub struct SessionManager {
    config: Arc<HarvestConfig>,
    credentials: Credentials,
}

/// One authenticated session against the panel.
pub struct PanelSession {
    client: reqwest::Client,
    root: Url,
    config: Arc<HarvestConfig>,
}

impl fmt::Debug for PanelSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PanelSession")
            .field("root", &self.root.as_str())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    pub fn new(config: Arc<HarvestConfig>, credentials: Credentials) -> Self {
        SessionManager {
            config,
            credentials,
        }
    }

    /// Run the full login handshake and return a fresh session.
    pub async fn login(&self) -> Result<PanelSession, AuthError> {
        info!(username = %self.credentials.username, "starting login");
        let root = self.config.service_root()?;
        let jar = Arc::new(Jar::default());
        let client = self.build_client(&jar, Policy::default())?;
        let signin_client = self.build_client(&jar, Policy::none())?;
        let timeout = self.config.login_timeout;

        let login_url = root.join(&self.config.endpoints.login)?;
        let login_page = client
            .get(login_url)
            .timeout(timeout)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(AuthError::LoginPage)?
            .text()
            .await
            .map_err(AuthError::LoginPage)?;

        let answer = captcha::solve(&login_page).ok_or(AuthError::ChallengeUnsolved)?;

        let signin_url = root.join(&self.config.endpoints.signin)?;
        let form = [
            ("username", self.credentials.username.as_str()),
            ("password", self.credentials.password.as_str()),
            ("capt", answer.as_str()),
        ];
        let response = signin_client
            .post(signin_url)
            .form(&form)
            .timeout(timeout)
            .send()
            .await
            .map_err(AuthError::SignIn)?;

        let status = response.status();
        if !status.is_redirection() {
            return Err(AuthError::UnexpectedStatus(status.as_u16()));
        }
        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.trim().is_empty())
            .ok_or(AuthError::MissingRedirect)?;
        let landing = resolve_redirect(&root, location)?;

        client
            .get(landing.clone())
            .timeout(timeout)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(AuthError::Dashboard)?;

        info!(landing = %landing, "login successful");
        Ok(PanelSession {
            client,
            root,
            config: Arc::clone(&self.config),
        })
    }

    fn build_client(&self, jar: &Arc<Jar>, redirect: Policy) -> Result<reqwest::Client, AuthError> {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static(PAGE_ACCEPT));
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static(ACCEPT_LANGUAGE),
        );
        reqwest::Client::builder()
            .user_agent(self.config.user_agent.clone())
            .default_headers(headers)
            .cookie_provider(Arc::clone(jar))
            .redirect(redirect)
            .build()
            .map_err(AuthError::Client)
    }
}

impl PanelSession {
    /// Resolve an endpoint path against the service root.
    pub fn url(&self, path: &str) -> Result<Url, url::ParseError> {
        self.root.join(path)
    }

    pub fn root(&self) -> &Url {
        &self.root
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Headers for the panel's XHR endpoints.
    pub(crate) fn ajax_headers(&self, referer_path: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static(AJAX_ACCEPT));
        headers.insert(
            "x-requested-with",
            HeaderValue::from_static("XMLHttpRequest"),
        );
        if let Ok(referer) = self.url(referer_path) {
            if let Ok(value) = HeaderValue::from_str(referer.as_str()) {
                headers.insert(header::REFERER, value);
            }
        }
        headers
    }

    /// GET a DataTables endpoint and decode its JSON body.
    pub(crate) async fn ajax_json(
        &self,
        path: &str,
        referer_path: &str,
        query: &[(&str, String)],
        timeout: Duration,
    ) -> Result<serde_json::Value, PanelError> {
        let url = self.url(path)?;
        let body = self
            .client
            .get(url)
            .headers(self.ajax_headers(referer_path))
            .query(query)
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Lightweight authenticated probe of the dashboard.
    ///
    /// Healthy iff the response is 2xx and redirects did not land on the
    /// login page. Transport failures count as unhealthy.
    pub async fn check_health(&self) -> bool {
        let url = match self.url(&self.config.endpoints.dashboard) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "invalid dashboard path");
                return false;
            }
        };
        match self
            .client
            .get(url)
            .timeout(self.config.health_timeout)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success() && !is_login_url(resp.url()),
            Err(e) => {
                warn!(error = %e, "session health check failed");
                false
            }
        }
    }
}

/// Resolve a sign-in `Location` header relative to the service root.
pub fn resolve_redirect(root: &Url, location: &str) -> Result<Url, url::ParseError> {
    match Url::parse(location) {
        Ok(absolute) => Ok(absolute),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            root.join(location.trim().trim_start_matches('/'))
        }
        Err(e) => Err(e),
    }
}

fn is_login_url(url: &Url) -> bool {
    url.path().to_ascii_lowercase().contains("login")
}

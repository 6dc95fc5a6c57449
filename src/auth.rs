// ABOUTME: OAuth 2.0 authorization-code session plus API-token fallback
// ABOUTME: Owns the credential, persists every change and refreshes single-flight

use crate::callback::CallbackListener;
use crate::cancel::CancellationToken;
use crate::config::{ApiTokenAuth, CallbackConfig, Config, Endpoints, OAuthClient, SCOPES};
use crate::error::AuthError;
use crate::model::{AccessibleResource, Credential, SiteIdentity, TokenResponse};
use crate::token_store::TokenStore;
use crate::util::truncate_str;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::Url;
use std::io;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Supplies request headers and recovers from a rejected credential.
pub trait Authenticator: Send + Sync {
    fn authorized_headers(&self) -> Result<HeaderMap, AuthError>;

    /// Called once after `rejected` drew a 401. Must leave a usable
    /// credential behind or fail.
    fn renew(&self, rejected: &HeaderMap) -> Result<(), AuthError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    AwaitingCallback,
    Exchanging,
    Authenticated,
    Refreshing,
}

struct Inner {
    state: SessionState,
    credential: Option<Credential>,
    sites: Vec<AccessibleResource>,
}

impl Inner {
    fn settle(&mut self) {
        self.state = if self.credential.is_some() {
            SessionState::Authenticated
        } else {
            SessionState::Unauthenticated
        };
    }
}

pub struct OAuthSession {
    http: Client,
    client: OAuthClient,
    endpoints: Endpoints,
    callback: CallbackConfig,
    store: TokenStore,
    cancel: CancellationToken,
    inner: Mutex<Inner>,
}

impl OAuthSession {
    /// Starts from whatever credential the store already holds.
    pub fn new(
        http: Client,
        client: OAuthClient,
        config: &Config,
        store: TokenStore,
    ) -> Result<Self, AuthError> {
        let credential = store.load()?;
        let mut inner = Inner {
            state: SessionState::Unauthenticated,
            credential,
            sites: Vec::new(),
        };
        inner.settle();

        Ok(OAuthSession {
            http,
            client,
            endpoints: config.endpoints.clone(),
            callback: config.callback.clone(),
            store,
            cancel: CancellationToken::new(),
            inner: Mutex::new(inner),
        })
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn credential(&self) -> Option<Credential> {
        self.lock().credential.clone()
    }

    /// Sites returned by the most recent accessible-resources lookup.
    pub fn accessible_sites(&self) -> Vec<AccessibleResource> {
        self.lock().sites.clone()
    }

    pub fn authorization_url(&self, redirect_uri: &str, state: &str) -> Result<Url, AuthError> {
        let scope = SCOPES.join(" ");
        Url::parse_with_params(
            &self.endpoints.auth_url,
            &[
                ("audience", "api.atlassian.com"),
                ("client_id", self.client.client_id.as_str()),
                ("scope", scope.as_str()),
                ("redirect_uri", redirect_uri),
                ("state", state),
                ("response_type", "code"),
                ("prompt", "consent"),
            ],
        )
        .map_err(|e| AuthError::InvalidUrl(format!("{}: {}", self.endpoints.auth_url, e)))
    }

    /// Full browser flow using the desktop's default browser.
    pub fn authorize(&self) -> Result<Credential, AuthError> {
        self.authorize_with(|url| open::that(url))
    }

    /// Full browser flow; `launch` is handed the authorization URL.
    pub fn authorize_with<F>(&self, launch: F) -> Result<Credential, AuthError>
    where
        F: FnOnce(&str) -> io::Result<()>,
    {
        let listener =
            CallbackListener::bind(&self.callback.host, self.callback.port, &self.callback.path)?;
        let redirect_uri = listener.redirect_uri()?;
        let csrf = generate_state();
        let url = self.authorization_url(&redirect_uri, &csrf)?;

        self.lock().state = SessionState::AwaitingCallback;
        let pending = listener.spawn(self.cancel.clone());

        println!("Opening browser for Atlassian authorization...");
        if let Err(e) = launch(url.as_str()) {
            warn!(error = %e, "could not open browser");
        }
        println!("If the browser does not open, visit:\n\n  {}\n", url);
        println!(
            "Waiting for the redirect on {} (timeout {}s)...",
            redirect_uri,
            self.callback.timeout.as_secs()
        );

        let received = pending
            .wait(self.callback.timeout)
            .and_then(|code| match code.state.as_deref() {
                Some(state) if state == csrf => Ok(code),
                _ => Err(AuthError::StateMismatch),
            });
        let code = match received {
            Ok(code) => code,
            Err(e) => {
                self.lock().settle();
                return Err(e);
            }
        };

        let credential = self.exchange_code(&code.code, &redirect_uri)?;
        info!("authorization complete");

        // The new token may belong to another account; drop the old site first.
        self.store.clear_identity()?;
        let sites = self.accessible_resources()?;
        let first = sites.first().ok_or(AuthError::NoAccessibleResources)?;
        let identity = SiteIdentity::from(first);
        self.store.save_identity(&identity)?;
        info!(site = %identity.site_url, cloud_id = %identity.cloud_id, "selected site");
        self.lock().sites = sites;

        Ok(credential)
    }

    fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<Credential, AuthError> {
        let mut inner = self.lock();
        inner.state = SessionState::Exchanging;

        let form = [
            ("grant_type", "authorization_code"),
            ("client_id", self.client.client_id.as_str()),
            ("client_secret", self.client.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ];
        let result = self
            .post_token(&form, |status, body| AuthError::TokenExchangeFailed { status, body })
            .and_then(|resp| {
                let credential = resp.into_credential(Utc::now());
                self.store.save(&credential)?;
                Ok(credential)
            });

        if let Ok(credential) = &result {
            inner.credential = Some(credential.clone());
        }
        inner.settle();
        result
    }

    /// Exchanges the stored refresh token for a new access token.
    pub fn refresh(&self) -> Result<Credential, AuthError> {
        let mut inner = self.lock();
        self.refresh_locked(&mut inner)
    }

    fn refresh_locked(&self, inner: &mut Inner) -> Result<Credential, AuthError> {
        let refresh_token = inner
            .credential
            .as_ref()
            .and_then(|c| c.refresh_token.clone())
            .ok_or(AuthError::NoRefreshToken)?;

        inner.state = SessionState::Refreshing;
        debug!("refreshing access token");

        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", self.client.client_id.as_str()),
            ("client_secret", self.client.client_secret.as_str()),
            ("refresh_token", refresh_token.as_str()),
        ];
        let result = self
            .post_token(&form, |status, body| AuthError::RefreshFailed { status, body })
            .and_then(|resp| {
                let mut credential = resp.into_credential(Utc::now());
                // Atlassian rotates refresh tokens only sometimes.
                if credential.refresh_token.is_none() {
                    credential.refresh_token = Some(refresh_token.clone());
                }
                self.store.save(&credential)?;
                Ok(credential)
            });

        match &result {
            Ok(credential) => {
                info!("access token refreshed");
                inner.credential = Some(credential.clone());
            }
            Err(e) => warn!(error = %e, "token refresh failed"),
        }
        inner.settle();
        result
    }

    fn post_token(
        &self,
        form: &[(&str, &str)],
        rejected: fn(u16, String) -> AuthError,
    ) -> Result<TokenResponse, AuthError> {
        let response = self
            .http
            .post(&self.endpoints.token_url)
            .header(ACCEPT, "application/json")
            .form(form)
            .send()?;

        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            return Err(rejected(status.as_u16(), format_oauth_error(&body)));
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// Refreshes ahead of time when the stored token is past its expiry.
    pub fn ensure_fresh(&self) -> Result<(), AuthError> {
        let mut inner = self.lock();
        let credential = inner.credential.as_ref().ok_or(AuthError::NotAuthenticated)?;
        if credential.is_expired_at(Utc::now()) && credential.can_refresh() {
            debug!("stored token expired");
            self.refresh_locked(&mut inner)?;
        }
        Ok(())
    }

    /// Lists the sites the current token may reach.
    pub fn accessible_resources(&self) -> Result<Vec<AccessibleResource>, AuthError> {
        let url = format!("{}/oauth/token/accessible-resources", self.endpoints.api_url);
        let response = self
            .http
            .get(&url)
            .headers(self.authorized_headers()?)
            .send()?;

        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            return Err(AuthError::AccessibleResourcesFailed {
                status: status.as_u16(),
                body: truncate_str(&body, 300),
            });
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// API root for the selected site, routed through the OAuth gateway.
    pub fn api_base(&self) -> Result<(String, SiteIdentity), AuthError> {
        let identity = self.store.load_identity()?.ok_or(AuthError::SiteUnknown)?;
        let base = format!(
            "{}/ex/confluence/{}",
            self.endpoints.api_url, identity.cloud_id
        );
        Ok((base, identity))
    }
}

impl Authenticator for OAuthSession {
    fn authorized_headers(&self) -> Result<HeaderMap, AuthError> {
        let inner = self.lock();
        let credential = inner.credential.as_ref().ok_or(AuthError::NotAuthenticated)?;
        json_headers(&format!("Bearer {}", credential.access_token))
    }

    fn renew(&self, rejected: &HeaderMap) -> Result<(), AuthError> {
        let mut inner = self.lock();
        if let Some(credential) = &inner.credential {
            let current = format!("Bearer {}", credential.access_token);
            let rejected = rejected.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
            if rejected != Some(current.as_str()) {
                debug!("credential already renewed by another request");
                return Ok(());
            }
        }
        self.refresh_locked(&mut inner).map(|_| ())
    }
}

/// Basic-auth credentials for sites where an OAuth app is not available.
pub struct ApiTokenAuthenticator {
    header: String,
}

impl ApiTokenAuthenticator {
    pub fn new(auth: &ApiTokenAuth) -> Self {
        let pair = format!("{}:{}", auth.email, auth.api_token);
        ApiTokenAuthenticator {
            header: format!("Basic {}", STANDARD.encode(pair)),
        }
    }
}

impl Authenticator for ApiTokenAuthenticator {
    fn authorized_headers(&self) -> Result<HeaderMap, AuthError> {
        json_headers(&self.header)
    }

    fn renew(&self, _rejected: &HeaderMap) -> Result<(), AuthError> {
        Err(AuthError::RenewalUnsupported)
    }
}

fn json_headers(authorization: &str) -> Result<HeaderMap, AuthError> {
    let mut headers = HeaderMap::new();
    let mut value = HeaderValue::from_str(authorization)
        .map_err(|e| AuthError::InvalidCredential(e.to_string()))?;
    value.set_sensitive(true);
    headers.insert(AUTHORIZATION, value);
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    Ok(headers)
}

fn generate_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

/// Pulls `error`/`error_description` out of a token endpoint failure.
fn format_oauth_error(body: &str) -> String {
    #[derive(serde::Deserialize)]
    struct OAuthErrorBody {
        error: Option<String>,
        error_description: Option<String>,
    }

    match serde_json::from_str::<OAuthErrorBody>(body) {
        Ok(OAuthErrorBody {
            error: Some(error),
            error_description: Some(desc),
        }) => format!("{}: {}", error, desc),
        Ok(OAuthErrorBody {
            error: Some(error), ..
        }) => error,
        _ => truncate_str(body, 300),
    }
}

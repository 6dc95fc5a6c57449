// ABOUTME: Runtime configuration from environment variables and the .env file
// ABOUTME: Validates credentials up front so no request goes out half-configured

use crate::error::ConfigError;
use std::env;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_AUTH_URL: &str = "https://auth.atlassian.com/authorize";
pub const DEFAULT_TOKEN_URL: &str = "https://auth.atlassian.com/oauth/token";
pub const DEFAULT_API_URL: &str = "https://api.atlassian.com";

pub const SCOPES: &[&str] = &[
    "read:confluence-space.summary",
    "read:confluence-props",
    "read:confluence-content.all",
    "read:confluence-content.summary",
    "search:confluence",
    "read:confluence-user",
    "read:confluence-groups",
    "readonly:content.attachment:confluence",
    "read:space:confluence",
    "read:page:confluence",
    "read:content:confluence",
    "read:content-details:confluence",
    "offline_access",
];

#[derive(Debug, Clone)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone)]
pub struct ApiTokenAuth {
    pub email: String,
    pub api_token: String,
    pub site_url: String,
}

#[derive(Debug, Clone)]
pub enum AuthMode<'a> {
    OAuth(&'a OAuthClient),
    ApiToken(&'a ApiTokenAuth),
}

#[derive(Debug, Clone)]
pub struct Endpoints {
    pub auth_url: String,
    pub token_url: String,
    pub api_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Endpoints {
            auth_url: DEFAULT_AUTH_URL.into(),
            token_url: DEFAULT_TOKEN_URL.into(),
            api_url: DEFAULT_API_URL.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CallbackConfig {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub timeout: Duration,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        CallbackConfig {
            host: "localhost".into(),
            port: 8080,
            path: "/callback".into(),
            timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub oauth: Option<OAuthClient>,
    pub api_token: Option<ApiTokenAuth>,
    pub endpoints: Endpoints,
    pub callback: CallbackConfig,
    pub connect_timeout: Duration,
    pub http_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            oauth: None,
            api_token: None,
            endpoints: Endpoints::default(),
            callback: CallbackConfig::default(),
            connect_timeout: Duration::from_secs(10),
            http_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = Config::default();

        config.oauth = match (get("CFSYNC_CLIENT_ID"), get("CFSYNC_CLIENT_SECRET")) {
            (Some(client_id), Some(client_secret)) => Some(OAuthClient {
                client_id,
                client_secret,
            }),
            (Some(_), None) => {
                return Err(ConfigError::Missing {
                    names: vec!["CFSYNC_CLIENT_SECRET"],
                })
            }
            (None, Some(_)) => {
                return Err(ConfigError::Missing {
                    names: vec!["CFSYNC_CLIENT_ID"],
                })
            }
            (None, None) => None,
        };

        let email = get("CFSYNC_EMAIL");
        let api_token = get("CFSYNC_API_TOKEN");
        let site_url = get("CFSYNC_SITE_URL");
        if email.is_some() || api_token.is_some() {
            let mut missing = Vec::new();
            if email.is_none() {
                missing.push("CFSYNC_EMAIL");
            }
            if api_token.is_none() {
                missing.push("CFSYNC_API_TOKEN");
            }
            if site_url.is_none() {
                missing.push("CFSYNC_SITE_URL");
            }
            if !missing.is_empty() {
                return Err(ConfigError::Missing { names: missing });
            }
            config.api_token = Some(ApiTokenAuth {
                email: email.unwrap_or_default(),
                api_token: api_token.unwrap_or_default(),
                site_url: site_url
                    .unwrap_or_default()
                    .trim_end_matches('/')
                    .to_string(),
            });
        }

        if let Some(url) = get("CFSYNC_AUTH_URL") {
            config.endpoints.auth_url = url;
        }
        if let Some(url) = get("CFSYNC_TOKEN_URL") {
            config.endpoints.token_url = url;
        }
        if let Some(url) = get("CFSYNC_API_URL") {
            config.endpoints.api_url = url.trim_end_matches('/').to_string();
        }
        if let Some(host) = get("CFSYNC_CALLBACK_HOST") {
            config.callback.host = host;
        }
        if let Some(port) = get("CFSYNC_CALLBACK_PORT") {
            config.callback.port = parse_number("CFSYNC_CALLBACK_PORT", &port)?;
        }
        if let Some(secs) = get("CFSYNC_CALLBACK_TIMEOUT_SECS") {
            config.callback.timeout =
                Duration::from_secs(parse_number("CFSYNC_CALLBACK_TIMEOUT_SECS", &secs)?);
        }
        if let Some(secs) = get("CFSYNC_HTTP_TIMEOUT_SECS") {
            config.http_timeout =
                Duration::from_secs(parse_number("CFSYNC_HTTP_TIMEOUT_SECS", &secs)?);
        }

        Ok(config)
    }

    pub fn require_oauth(&self) -> Result<&OAuthClient, ConfigError> {
        self.oauth.as_ref().ok_or(ConfigError::Missing {
            names: vec!["CFSYNC_CLIENT_ID", "CFSYNC_CLIENT_SECRET"],
        })
    }

    /// OAuth wins when both credential kinds are configured.
    pub fn auth_mode(&self) -> Result<AuthMode<'_>, ConfigError> {
        match (&self.oauth, &self.api_token) {
            (Some(oauth), _) => Ok(AuthMode::OAuth(oauth)),
            (None, Some(token)) => Ok(AuthMode::ApiToken(token)),
            (None, None) => Err(ConfigError::Missing {
                names: vec!["CFSYNC_CLIENT_ID", "CFSYNC_CLIENT_SECRET"],
            }),
        }
    }
}

fn parse_number<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::Invalid {
        name,
        value: value.to_string(),
    })
}

/// Loads `KEY=value` pairs from the data directory's `.env`, if present.
/// Variables already set in the process environment win.
pub fn load_env_file(path: &Path) -> Result<(), ConfigError> {
    if !path.exists() {
        return Ok(());
    }
    dotenv::from_path(path).map_err(|e| ConfigError::Invalid {
        name: "env file",
        value: format!("{}: {}", path.display(), e),
    })
}

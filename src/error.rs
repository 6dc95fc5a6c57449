// ABOUTME: Error taxonomy with structured exit codes for the CLI
// ABOUTME: Config, auth, fetch and sync failures each carry remediation hints

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {}", .names.join(", "))]
    Missing { names: Vec<&'static str> },

    #[error("Invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },

    #[error("Could not determine data directory")]
    NoDataDir,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("No authorization code received")]
    NoCodeReceived,

    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error("OAuth state mismatch in redirect")]
    StateMismatch,

    #[error("No redirect received within {}s", .0.as_secs())]
    CallbackTimeout(Duration),

    #[error("Could not listen on {addr}: {source}")]
    CallbackBind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Authorization cancelled")]
    Cancelled,

    #[error("Token exchange failed with HTTP {status}: {body}")]
    TokenExchangeFailed { status: u16, body: String },

    #[error("No refresh token stored")]
    NoRefreshToken,

    #[error("Token refresh failed with HTTP {status}: {body}")]
    RefreshFailed { status: u16, body: String },

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Token cannot be renewed in API-token mode")]
    RenewalUnsupported,

    #[error("No accessible sites for this account")]
    NoAccessibleResources,

    #[error("Listing accessible sites failed with HTTP {status}: {body}")]
    AccessibleResourcesFailed { status: u16, body: String },

    #[error("Invalid authorization URL: {0}")]
    InvalidUrl(String),

    #[error("Stored credential cannot be sent as a header: {0}")]
    InvalidCredential(String),

    #[error("No site selected")]
    SiteUnknown,

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Malformed token response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Credential storage error: {0}")]
    Storage(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Access token expired and could not be renewed: {0}")]
    AuthExpired(String),

    #[error("HTTP {status} from {url}: {body}")]
    HttpError {
        url: String,
        status: u16,
        body: String,
    },

    #[error("Malformed page from {url}: {reason}")]
    MalformedPage { url: String, reason: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// Items gathered before a traversal aborted, plus the reason it stopped.
#[derive(Debug)]
pub struct PartialFetch<T> {
    pub items: Vec<T>,
    pub error: FetchError,
}

impl<T> PartialFetch<T> {
    /// Everything a traversal gathered, and the error that stopped it early.
    pub fn split(result: std::result::Result<Vec<T>, PartialFetch<T>>) -> (Vec<T>, Option<FetchError>) {
        match result {
            Ok(items) => (items, None),
            Err(partial) => (partial.items, Some(partial.error)),
        }
    }
}

impl<T> From<PartialFetch<T>> for FetchError {
    fn from(partial: PartialFetch<T>) -> Self {
        partial.error
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Space '{0}' not found")]
    CollectionNotFound(String),

    #[error("Sync cancelled after {done} of {total} pages")]
    Cancelled { done: usize, total: usize },

    #[error("Page listing stopped early; indexed {written} of the {gathered} pages gathered: {source}")]
    IncompleteListing {
        gathered: usize,
        written: usize,
        #[source]
        source: FetchError,
    },

    #[error("Could not write {filename}: {source}")]
    ArtifactWrite {
        filename: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(String),
}

impl<T> From<PartialFetch<T>> for SyncError {
    fn from(partial: PartialFetch<T>) -> Self {
        SyncError::Fetch(partial.error)
    }
}

impl From<AuthError> for SyncError {
    fn from(e: AuthError) -> Self {
        SyncError::Fetch(FetchError::Auth(e))
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Sync failed: {0}")]
    Sync(#[from] SyncError),

    #[error("Filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

impl<T> From<PartialFetch<T>> for Error {
    fn from(partial: PartialFetch<T>) -> Self {
        Error::Fetch(partial.error)
    }
}

impl Error {
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config(_) => 2,
            Error::Auth(_) => 3,
            Error::Fetch(e) => fetch_exit_code(e),
            Error::Sync(e) => sync_exit_code(e),
            Error::Filesystem(_) => 7,
            Error::Parse(_) => 8,
        }
    }

    /// Likely cause and what the user can do about it.
    pub fn hint(&self) -> Option<String> {
        let hint = match self {
            Error::Config(ConfigError::Missing { .. }) => Some(
                "Set CFSYNC_CLIENT_ID and CFSYNC_CLIENT_SECRET (OAuth app from \
                 https://developer.atlassian.com/console/myapps/), or CFSYNC_EMAIL, \
                 CFSYNC_API_TOKEN and CFSYNC_SITE_URL, in the environment or the .env \
                 file in the data directory.",
            ),
            Error::Config(_) => Some("Check the value and try again."),
            Error::Auth(e) => auth_hint(e),
            Error::Fetch(e) => fetch_hint(e),
            Error::Sync(e) => sync_hint(e),
            Error::Filesystem(_) => Some("Check that the data directory is writable."),
            Error::Parse(_) => None,
        };
        hint.map(str::to_string)
    }
}

fn fetch_exit_code(error: &FetchError) -> i32 {
    match error {
        FetchError::AuthExpired(_) | FetchError::Auth(_) => 3,
        _ => 4,
    }
}

fn sync_exit_code(error: &SyncError) -> i32 {
    match error {
        SyncError::CollectionNotFound(_) => 5,
        SyncError::Cancelled { .. } => 130,
        SyncError::Fetch(e) | SyncError::IncompleteListing { source: e, .. } => fetch_exit_code(e),
        SyncError::Filesystem(_) | SyncError::ArtifactWrite { .. } => 7,
        SyncError::Serialize(_) => 6,
    }
}

fn auth_hint(error: &AuthError) -> Option<&'static str> {
    let hint = match error {
        AuthError::NotAuthenticated | AuthError::NoRefreshToken | AuthError::SiteUnknown => {
            "Run `cfsync auth` first."
        }
        AuthError::CallbackTimeout(_) => {
            "Finish the login in the browser sooner, or raise CFSYNC_CALLBACK_TIMEOUT_SECS."
        }
        AuthError::CallbackBind { .. } => {
            "Another process holds the callback port; free it or set CFSYNC_CALLBACK_PORT \
             (the OAuth app's redirect URL must match)."
        }
        AuthError::RefreshFailed { .. } => {
            "The refresh token was rejected; run `cfsync auth` again."
        }
        AuthError::TokenExchangeFailed { .. } => {
            "Check the client id/secret and the app's callback URL."
        }
        AuthError::AccessibleResourcesFailed { .. } | AuthError::NoAccessibleResources => {
            "No site is selected until this succeeds; check the app's scopes and run `cfsync auth` again."
        }
        AuthError::Network(_) => "Check network connectivity.",
        _ => return None,
    };
    Some(hint)
}

fn fetch_hint(error: &FetchError) -> Option<&'static str> {
    match error {
        FetchError::AuthExpired(_) => {
            Some("The session expired; run `cfsync refresh` or `cfsync auth`.")
        }
        FetchError::HttpError { status: 403, .. } => Some(
            "The account lacks permission for this space, or the organisation restricts API access.",
        ),
        FetchError::HttpError { status: 404, .. } => {
            Some("The resource does not exist; check the space key.")
        }
        FetchError::HttpError { status, .. } if *status >= 500 => {
            Some("The server failed; try again later.")
        }
        FetchError::Network(_) => Some("Check network connectivity."),
        FetchError::Auth(e) => auth_hint(e),
        _ => None,
    }
}

fn sync_hint(error: &SyncError) -> Option<&'static str> {
    match error {
        SyncError::CollectionNotFound(_) => {
            Some("Space keys are case-sensitive; use `cfsync find <keyword>` to look it up.")
        }
        SyncError::Cancelled { .. } => Some("Run the sync again to finish it."),
        SyncError::Fetch(e) => fetch_hint(e),
        SyncError::IncompleteListing { source, .. } => fetch_hint(source)
            .or(Some("The index lists only the pages gathered; run the sync again.")),
        SyncError::Filesystem(_) | SyncError::ArtifactWrite { .. } => {
            Some("Check that the data directory is writable and has free space.")
        }
        SyncError::Serialize(_) => None,
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_exit_codes() {
        assert_eq!(
            Error::Config(ConfigError::Missing {
                names: vec!["CFSYNC_CLIENT_ID"]
            })
            .exit_code(),
            2
        );
        assert_eq!(Error::Auth(AuthError::NotAuthenticated).exit_code(), 3);
        assert_eq!(
            Error::Fetch(FetchError::AuthExpired("gone".into())).exit_code(),
            3
        );
        assert_eq!(
            Error::Sync(SyncError::CollectionNotFound("DOCS".into())).exit_code(),
            5
        );
    }

    #[test]
    fn test_missing_config_lists_names() {
        let err = ConfigError::Missing {
            names: vec!["CFSYNC_CLIENT_ID", "CFSYNC_CLIENT_SECRET"],
        };
        assert_eq!(
            err.to_string(),
            "Missing required configuration: CFSYNC_CLIENT_ID, CFSYNC_CLIENT_SECRET"
        );
    }

    #[test]
    fn test_partial_fetch_converts_to_error() {
        let partial = PartialFetch {
            items: vec![1, 2],
            error: FetchError::AuthExpired("refresh rejected".into()),
        };
        let err: SyncError = partial.into();
        assert!(matches!(err, SyncError::Fetch(FetchError::AuthExpired(_))));
    }

    #[test]
    fn test_hints_are_actionable() {
        let err = Error::Sync(SyncError::CollectionNotFound("docs".into()));
        assert!(err.hint().unwrap().contains("cfsync find"));
        assert!(Error::Parse(serde_json::from_str::<u8>("x").unwrap_err())
            .hint()
            .is_none());
    }

    #[test]
    fn test_wrapped_errors_keep_code_and_hint() {
        let expired = Error::Sync(SyncError::Fetch(FetchError::AuthExpired("gone".into())));
        assert_eq!(expired.exit_code(), 3);
        assert!(expired.hint().unwrap().contains("cfsync refresh"));

        let forbidden = Error::Sync(SyncError::Fetch(FetchError::HttpError {
            url: "u".into(),
            status: 403,
            body: String::new(),
        }));
        assert_eq!(forbidden.exit_code(), 4);
        assert!(forbidden.hint().unwrap().contains("permission"));

        let signed_out = Error::Sync(SyncError::Fetch(FetchError::Auth(
            AuthError::NotAuthenticated,
        )));
        assert_eq!(signed_out.exit_code(), 3);
        assert!(signed_out.hint().unwrap().contains("cfsync auth"));

        let incomplete = Error::Sync(SyncError::IncompleteListing {
            gathered: 2,
            written: 2,
            source: FetchError::MalformedPage {
                url: "u".into(),
                reason: "bad".into(),
            },
        });
        assert_eq!(incomplete.exit_code(), 4);
        assert!(incomplete.hint().unwrap().contains("run the sync again"));
    }
}

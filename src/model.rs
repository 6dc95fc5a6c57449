// ABOUTME: Serde data models for credentials, Confluence responses and the sync index
// ABOUTME: Tolerant parsing with optional fields and string-or-number ids

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub obtained_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".into()
}

impl Credential {
    /// `None` when no lifetime was given, or one too large to represent.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let secs = i64::try_from(self.expires_in?).ok()?;
        let lifetime = chrono::Duration::try_seconds(secs)?;
        self.obtained_at.checked_add_signed(lifetime)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().map(|at| now >= at).unwrap_or(false)
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some()
    }
}

/// Token endpoint response for both grant types.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    pub fn into_credential(self, obtained_at: DateTime<Utc>) -> Credential {
        Credential {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            obtained_at,
            expires_in: self.expires_in,
            token_type: self.token_type.unwrap_or_else(default_token_type),
            scope: self.scope,
        }
    }
}


#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessibleResource {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// The site every API call after authorization is routed to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteIdentity {
    pub cloud_id: String,
    pub site_url: String,
    #[serde(default)]
    pub name: String,
}

impl From<&AccessibleResource> for SiteIdentity {
    fn from(res: &AccessibleResource) -> Self {
        SiteIdentity {
            cloud_id: res.id.clone(),
            site_url: res.url.clone(),
            name: res.name.clone(),
        }
    }
}

/// Confluence v1 returns numeric ids where v2 returns strings.
pub fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IdValue {
        Str(String),
        Num(i64),
    }

    Ok(match IdValue::deserialize(deserializer)? {
        IdValue::Str(s) => s,
        IdValue::Num(n) => n.to_string(),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Space {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSummary {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub title: String,
}

#[cfg(test)]
mod listing_tests {
    use super::*;

    #[test]
    fn test_space_numeric_id() {
        let json = r#"{"id": 98306, "key": "DOCS", "name": "Docs", "type": "global"}"#;
        let space: Space = serde_json::from_str(json).unwrap();
        assert_eq!(space.id, "98306");
        assert_eq!(space.kind.as_deref(), Some("global"));
    }

    #[test]
    fn test_page_summary_ignores_extra_fields() {
        let json = r#"{"id": "123", "title": "Home", "status": "current", "spaceId": "9"}"#;
        let page: PageSummary = serde_json::from_str(json).unwrap();
        assert_eq!(page.id, "123");
        assert_eq!(page.title, "Home");
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub number: Option<u64>,
    pub updated_at: Option<String>,
    /// Display name; only the v1 surface reports one.
    pub updated_by: Option<String>,
    pub updated_by_account_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorInfo {
    pub display_name: Option<String>,
    pub account_id: Option<String>,
    pub email: Option<String>,
    pub created_at: Option<String>,
}

/// A page with its raw storage-format body, normalised across API surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageDetail {
    pub id: String,
    pub title: String,
    pub body: Option<String>,
    pub version: VersionInfo,
    pub author: AuthorInfo,
    pub web_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemSummary {
    pub id: String,
    pub title: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub title: String,
    pub filename: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub version: Option<u64>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub updated_by: Option<String>,
    #[serde(default)]
    pub updated_by_account_id: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncIndex {
    pub space_key: String,
    pub space_id: String,
    pub synced_at: DateTime<Utc>,
    pub total_count: usize,
    #[serde(default)]
    pub remote_count: usize,
    #[serde(default)]
    pub duplicates_dropped: usize,
    /// Why the page listing broke off; `pages` then covers only what it returned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing_error: Option<String>,
    pub pages: Vec<IndexEntry>,
}

/// Front matter written at the top of every cached page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frontmatter {
    pub page_id: String,
    pub space_key: String,
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub version: Option<u64>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub updated_by: Option<String>,
    #[serde(default)]
    pub updated_by_account_id: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
    pub generator: String,
}

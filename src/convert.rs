// ABOUTME: Converts Confluence storage-format markup to plain text
// ABOUTME: Renders cached page artifacts with YAML frontmatter

use crate::error::SyncError;
use crate::model::{Frontmatter, PageDetail};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static BR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<br\s*/?>").unwrap());
static P_OPEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<p(\s[^>]*)?>").unwrap());
static P_CLOSE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)</p>").unwrap());
static HEADING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<h([1-6])[^>]*>(.*?)</h[1-6]>").unwrap());
static LI_OPEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<li(\s[^>]*)?>").unwrap());
static LI_CLOSE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)</li>").unwrap());
static STRONG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<strong[^>]*>(.*?)</strong>").unwrap());
static EM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<em[^>]*>(.*?)</em>").unwrap());
static CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<code[^>]*>(.*?)</code>").unwrap());
static LINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)<a[^>]*href="([^"]*)"[^>]*>(.*?)</a>"#).unwrap());
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());
static BLANK_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

pub fn html_to_text(html: &str) -> String {
    if html.trim().is_empty() {
        return String::new();
    }

    let text = BR_RE.replace_all(html, "\n");
    let text = P_OPEN_RE.replace_all(&text, "\n");
    let text = P_CLOSE_RE.replace_all(&text, "\n");
    let text = HEADING_RE.replace_all(&text, |caps: &Captures| {
        let level: usize = caps[1].parse().unwrap_or(4);
        format!("\n{} {}\n", "#".repeat(level.min(4)), &caps[2])
    });
    let text = LI_OPEN_RE.replace_all(&text, "- ");
    let text = LI_CLOSE_RE.replace_all(&text, "\n");
    let text = STRONG_RE.replace_all(&text, "**$1**");
    let text = EM_RE.replace_all(&text, "*$1*");
    let text = CODE_RE.replace_all(&text, "`$1`");
    let text = LINK_RE.replace_all(&text, "[$2]($1)");
    let text = TAG_RE.replace_all(&text, "");

    // &amp; last so "&amp;lt;" stays literal
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    BLANK_RUN_RE.replace_all(&text, "\n\n").trim().to_string()
}

pub struct MarkdownOutput {
    pub frontmatter_yaml: String,
    pub body: String,
}

impl MarkdownOutput {
    pub fn to_document(&self) -> String {
        format!("---\n{}---\n\n{}", self.frontmatter_yaml, self.body)
    }
}

pub fn render_page(page: &PageDetail, space_key: &str) -> Result<MarkdownOutput, SyncError> {
    let frontmatter = Frontmatter {
        page_id: page.id.clone(),
        space_key: space_key.to_string(),
        title: page.title.clone(),
        url: page.web_url.clone(),
        version: page.version.number,
        updated_at: page.version.updated_at.clone(),
        updated_by: page.version.updated_by.clone(),
        updated_by_account_id: page.version.updated_by_account_id.clone(),
        created_by: page.author.display_name.clone(),
        generator: concat!("cfsync ", env!("CARGO_PKG_VERSION")).into(),
    };

    let frontmatter_yaml = serde_yaml::to_string(&frontmatter)
        .map_err(|e| SyncError::Serialize(format!("Failed to serialize frontmatter: {}", e)))?;

    let title = if page.title.is_empty() {
        "Untitled"
    } else {
        page.title.as_str()
    };
    let mut body = format!("# {}\n\n", title);

    let text = page.body.as_deref().map(html_to_text).unwrap_or_default();
    if text.is_empty() {
        body.push_str("_No content available._\n");
    } else {
        body.push_str(&text);
        body.push('\n');
    }

    Ok(MarkdownOutput {
        frontmatter_yaml,
        body,
    })
}

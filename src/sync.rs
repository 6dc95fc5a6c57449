// ABOUTME: Mirrors one Confluence space into the local cache
// ABOUTME: Per-page failures are skipped; the index is written once, atomically

use crate::api::ApiClient;
use crate::cancel::CancellationToken;
use crate::convert::render_page;
use crate::error::{FetchError, PartialFetch, SyncError};
use crate::model::{IndexEntry, ItemSummary, PageSummary, Space, SyncIndex};
use crate::storage::{read_json, write_atomic, write_json, Paths};
use crate::util::artifact_filename;
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::io;
use tracing::{debug, info, warn};

pub struct SyncEngine<'a> {
    api: &'a ApiClient,
    paths: &'a Paths,
    cancel: CancellationToken,
    show_progress: bool,
}

impl<'a> SyncEngine<'a> {
    pub fn new(api: &'a ApiClient, paths: &'a Paths) -> Self {
        SyncEngine {
            api,
            paths,
            cancel: CancellationToken::new(),
            show_progress: true,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn quiet(mut self) -> Self {
        self.show_progress = false;
        self
    }

    pub fn list_collections(&self) -> Result<Vec<Space>, PartialFetch<Space>> {
        self.api.list_spaces()
    }

    /// Exact, case-sensitive key lookup. A listing that breaks off still
    /// resolves a key it already returned.
    pub fn resolve_collection(&self, key: &str) -> Result<Space, SyncError> {
        let (spaces, stopped) = PartialFetch::split(self.api.list_spaces());
        if let Some(space) = spaces.into_iter().find(|s| s.key == key) {
            return Ok(space);
        }
        match stopped {
            Some(error) => Err(SyncError::Fetch(error)),
            None => Err(SyncError::CollectionNotFound(key.to_string())),
        }
    }

    pub fn list_items(&self, space: &Space) -> Result<Vec<PageSummary>, PartialFetch<PageSummary>> {
        self.api.list_pages(space)
    }

    pub fn search_collection(&self, key: &str, query: &str) -> Result<Vec<ItemSummary>, SyncError> {
        Ok(self.api.search(key, query)?)
    }

    /// Writes the index even when the page listing broke off, then reports
    /// the break as `IncompleteListing`. Auth failures abort without an index.
    pub fn sync_collection(&self, key: &str) -> Result<SyncIndex, SyncError> {
        self.paths.ensure_dirs()?;

        let space = self.resolve_collection(key)?;
        info!(key = %space.key, id = %space.id, "syncing space");

        println!("Fetching page list for {}...", space.key);
        let (listed, listing_error) = match self.list_items(&space) {
            Ok(pages) => (pages, None),
            Err(partial) if is_item_local(&partial.error) => {
                warn!(
                    gathered = partial.items.len(),
                    error = %partial.error,
                    "page listing stopped early; syncing what was gathered"
                );
                (partial.items, Some(partial.error))
            }
            Err(partial) => return Err(partial.into()),
        };
        let remote_count = listed.len();
        let (pages, duplicates_dropped) = dedup_by_id(listed);
        if duplicates_dropped > 0 {
            warn!(duplicates_dropped, "listing repeated some pages");
        }

        let pb = self.progress_bar(pages.len() as u64);
        let mut entries = Vec::with_capacity(pages.len());
        let mut skipped = 0;

        for (done, summary) in pages.iter().enumerate() {
            if self.cancel.is_cancelled() {
                pb.abandon_with_message("cancelled");
                return Err(SyncError::Cancelled {
                    done,
                    total: pages.len(),
                });
            }

            match self.sync_item(&space, summary) {
                Ok(entry) => entries.push(entry),
                Err(SyncError::Fetch(e)) if is_item_local(&e) => {
                    warn!(page_id = %summary.id, title = %summary.title, error = %e, "skipping page");
                    skipped += 1;
                }
                Err(e @ SyncError::ArtifactWrite { .. }) => {
                    warn!(page_id = %summary.id, error = %e, "skipping page");
                    skipped += 1;
                }
                Err(e) => {
                    pb.abandon();
                    return Err(e);
                }
            }
            pb.inc(1);
        }

        let index = SyncIndex {
            space_key: space.key.clone(),
            space_id: space.id.clone(),
            synced_at: Utc::now(),
            total_count: entries.len(),
            remote_count,
            duplicates_dropped,
            listing_error: listing_error.as_ref().map(ToString::to_string),
            pages: entries,
        };
        write_json(&self.paths.index_file, &index, &self.paths.tmp_dir)?;

        pb.finish_with_message(format!(
            "synced {} pages ({} skipped)",
            index.total_count, skipped
        ));
        info!(
            written = index.total_count,
            remote = remote_count,
            skipped,
            "sync complete"
        );
        match listing_error {
            Some(source) => Err(SyncError::IncompleteListing {
                gathered: remote_count,
                written: index.total_count,
                source,
            }),
            None => Ok(index),
        }
    }

    fn sync_item(&self, space: &Space, summary: &PageSummary) -> Result<IndexEntry, SyncError> {
        let page = self.api.get_page(&summary.id)?;
        let rendered = render_page(&page, &space.key)?;

        let filename = artifact_filename(&page.id, &page.title);
        let path = self.paths.cache_dir.join(&filename);
        write_atomic(&path, rendered.to_document().as_bytes(), &self.paths.tmp_dir).map_err(
            |source| SyncError::ArtifactWrite {
                filename: filename.clone(),
                source,
            },
        )?;
        debug!(page_id = %page.id, file = %filename, "wrote page");

        Ok(IndexEntry {
            id: page.id,
            title: page.title,
            filename,
            url: page.web_url,
            version: page.version.number,
            updated_at: page.version.updated_at,
            updated_by: page.version.updated_by,
            updated_by_account_id: page.version.updated_by_account_id,
            created_by: page.author.display_name,
        })
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len);
        let style = ProgressStyle::default_bar()
            .template("[{bar:40}] {pos}/{len} pages {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");
        pb.set_style(style);
        pb
    }
}

/// Failures confined to a single request. Anything else ends the run.
fn is_item_local(error: &FetchError) -> bool {
    matches!(
        error,
        FetchError::HttpError { .. } | FetchError::MalformedPage { .. } | FetchError::Network(_)
    )
}

/// Keeps the first occurrence of each id; returns how many were dropped.
pub fn dedup_by_id(pages: Vec<PageSummary>) -> (Vec<PageSummary>, usize) {
    let before = pages.len();
    let mut seen = HashSet::new();
    let unique: Vec<PageSummary> = pages
        .into_iter()
        .filter(|p| seen.insert(p.id.clone()))
        .collect();
    let dropped = before - unique.len();
    (unique, dropped)
}

pub fn filter_spaces<'s>(spaces: &'s [Space], keyword: &str) -> Vec<&'s Space> {
    let needle = keyword.to_lowercase();
    spaces
        .iter()
        .filter(|s| {
            s.key.to_lowercase().contains(&needle) || s.name.to_lowercase().contains(&needle)
        })
        .collect()
}

/// The index left by the last completed sync, if any.
pub fn read_index(paths: &Paths) -> io::Result<Option<SyncIndex>> {
    read_json(&paths.index_file)
}

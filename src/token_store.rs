// ABOUTME: Durable storage for the single OAuth credential and selected site
// ABOUTME: Every save goes through an atomic temp-file rename

use crate::model::{Credential, SiteIdentity};
use crate::storage::{read_json, write_json, Paths};
use std::fs;
use std::io;
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct TokenStore {
    token_file: PathBuf,
    site_file: PathBuf,
    tmp_dir: PathBuf,
}

impl TokenStore {
    pub fn new(paths: &Paths) -> Self {
        TokenStore {
            token_file: paths.token_file.clone(),
            site_file: paths.site_file.clone(),
            tmp_dir: paths.tmp_dir.clone(),
        }
    }

    pub fn load(&self) -> io::Result<Option<Credential>> {
        read_json(&self.token_file)
    }

    pub fn save(&self, credential: &Credential) -> io::Result<()> {
        debug!(path = %self.token_file.display(), "saving credential");
        write_json(&self.token_file, credential, &self.tmp_dir)
    }

    pub fn load_identity(&self) -> io::Result<Option<SiteIdentity>> {
        read_json(&self.site_file)
    }

    pub fn save_identity(&self, identity: &SiteIdentity) -> io::Result<()> {
        debug!(cloud_id = %identity.cloud_id, "saving site identity");
        write_json(&self.site_file, identity, &self.tmp_dir)
    }

    pub fn clear_identity(&self) -> io::Result<()> {
        match fs::remove_file(&self.site_file) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

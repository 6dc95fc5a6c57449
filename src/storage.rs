// ABOUTME: XDG-compliant storage layer with atomic writes
// ABOUTME: Handles paths, permissions and JSON state files

use crate::error::ConfigError;
use directories::ProjectDirs;
use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Paths {
    pub data_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub tmp_dir: PathBuf,
    pub token_file: PathBuf,
    pub site_file: PathBuf,
    pub index_file: PathBuf,
    pub env_file: PathBuf,
}

impl Paths {
    pub fn new(data_dir_override: Option<PathBuf>) -> Result<Self, ConfigError> {
        let data_dir = if let Some(dir) = data_dir_override {
            dir
        } else {
            ProjectDirs::from("", "", "cfsync")
                .ok_or(ConfigError::NoDataDir)?
                .data_dir()
                .to_path_buf()
        };

        let cache_dir = data_dir.join("cache");
        Ok(Paths {
            tmp_dir: data_dir.join("tmp"),
            token_file: data_dir.join("token.json"),
            site_file: data_dir.join("site.json"),
            index_file: cache_dir.join("page_index.json"),
            env_file: data_dir.join(".env"),
            cache_dir,
            data_dir,
        })
    }

    pub fn ensure_dirs(&self) -> io::Result<()> {
        for dir in &[&self.data_dir, &self.cache_dir, &self.tmp_dir] {
            fs::create_dir_all(dir)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let perms = fs::Permissions::from_mode(0o700);
                fs::set_permissions(dir, perms)?;
            }
        }
        Ok(())
    }
}

pub fn write_atomic(path: &Path, content: &[u8], tmp_dir: &Path) -> io::Result<()> {
    use rand::Rng;

    fs::create_dir_all(tmp_dir)?;
    let random: u32 = rand::thread_rng().gen();
    let tmp_path = tmp_dir.join(format!("{:x}.part", random));

    fs::write(&tmp_path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = fs::Permissions::from_mode(0o600);
        fs::set_permissions(&tmp_path, perms)?;
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    Ok(())
}

/// Reads a JSON state file; a missing file is `None`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("{}: {}", path.display(), e)))
}

pub fn write_json<T: Serialize>(path: &Path, value: &T, tmp_dir: &Path) -> io::Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    write_atomic(path, json.as_bytes(), tmp_dir)
}

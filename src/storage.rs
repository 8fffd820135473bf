//! Atomic on-disk persistence: the OAuth token record and the transient PKCE
//! scratch file.
//!
//! `write_json`/`read_json` write to a temp file and rename into place, so a
//! reader never observes a partially-written record.

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

pub fn runtime_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("GATEWAY_RUNTIME_DIR") {
        return PathBuf::from(dir);
    }
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(dir);
    }
    #[cfg(target_os = "macos")]
    {
        if let Ok(dir) = std::env::var("TMPDIR") {
            return PathBuf::from(dir);
        }
    }
    std::env::temp_dir()
}

pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Write `value` atomically: serialize to a `.tmp` sibling, fsync it, back up
/// whatever currently occupies `path` to `.bak`, then rename the temp file
/// into place. A reader that opens `path` mid-write always sees either the
/// old content or the new content, never a partial file.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    let tmp_path = path.with_extension("tmp");
    let file = std::fs::File::create(&tmp_path)?;
    let mut writer = std::io::BufWriter::new(file);
    serde_json::to_writer(&mut writer, value)?;
    let file = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("flush failed: {}", e))?;
    file.sync_all()?;

    if path.exists() {
        let bak_path = path.with_extension("bak");
        let _ = std::fs::rename(path, &bak_path);
    }

    std::fs::rename(&tmp_path, path)?;

    #[cfg(unix)]
    if let Some(parent) = path.parent() {
        if let Ok(dir) = std::fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }

    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = std::fs::read_to_string(path)?;
    match serde_json::from_str(&data) {
        Ok(val) => Ok(val),
        Err(e) => {
            let bak_path = path.with_extension("bak");
            if bak_path.exists() {
                crate::logging::warn(&format!(
                    "Corrupt JSON at {}, trying backup: {}",
                    path.display(),
                    e
                ));
                let bak_data = std::fs::read_to_string(&bak_path)?;
                let val = serde_json::from_str(&bak_data).map_err(|bak_err| {
                    anyhow::anyhow!(
                        "Corrupt JSON at {} ({}), backup also corrupt ({})",
                        path.display(),
                        e,
                        bak_err
                    )
                })?;
                let _ = std::fs::copy(&bak_path, path);
                Ok(val)
            } else {
                Err(anyhow::anyhow!("Corrupt JSON at {}: {}", path.display(), e))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Ephemeral,
    LongLived,
}

/// The four fields that make up a stored token always advance together; a
/// `TokenRecord` is constructed whole rather than mutated field by field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at_ms: i64,
    pub token_type: TokenType,
}

impl TokenRecord {
    pub fn is_expired(&self) -> bool {
        chrono::Utc::now().timestamp_millis() >= self.expires_at_ms
    }
}

fn token_path() -> Result<PathBuf> {
    Ok(crate::config::gateway_dir()?.join("credentials.json"))
}

/// The single shared token. Readers take a read lock and see whatever was
/// last committed; writes replace the whole record atomically, both in
/// memory and on disk.
#[derive(Clone)]
pub struct TokenStore {
    inner: Arc<RwLock<Option<TokenRecord>>>,
}

impl TokenStore {
    pub fn load() -> Self {
        let record = token_path().ok().and_then(|p| read_json(&p).ok());
        Self {
            inner: Arc::new(RwLock::new(record)),
        }
    }

    pub async fn current(&self) -> Option<TokenRecord> {
        self.inner.read().await.clone()
    }

    pub async fn replace(&self, record: TokenRecord) -> Result<()> {
        let path = token_path()?;
        write_json(&path, &record)?;
        *self.inner.write().await = Some(record);
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        *self.inner.write().await = None;
        let path = token_path()?;
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }
}

/// The PKCE verifier/state pair persisted between `build_authorize_url` and
/// `exchange_code`. Single sequential flow: authorize writes it, exchange
/// reads and deletes it. Only one login can be in flight at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PkceRecord {
    pub verifier: String,
    pub state: String,
}

fn pkce_path() -> PathBuf {
    runtime_dir().join("max_gateway_oauth_pkce.json")
}

pub fn save_pkce(record: &PkceRecord) -> Result<()> {
    write_json(&pkce_path(), record)
}

pub fn load_pkce() -> Result<PkceRecord> {
    read_json(&pkce_path())
}

pub fn clear_pkce() {
    let _ = std::fs::remove_file(pkce_path());
}

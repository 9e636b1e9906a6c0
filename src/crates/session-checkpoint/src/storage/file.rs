//! File system checkpoint storage
//!
//! Layout: `<root>/<session>/<checkpoint id>.json`, with both names
//! percent-encoded so distinct ids never share a path. Writes go to a temporary
//! file that is synced and renamed into place, so a crash mid-write never
//! leaves a truncated record behind.

use super::CheckpointStorage;
use crate::error::Result;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const RECORD_EXT: &str = "json";
const TMP_EXT: &str = "json.tmp";

#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Storage rooted at `root`; the directory is created on first write
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(encode_component(session_id))
    }

    fn record_path(&self, session_id: &str, id: &str) -> PathBuf {
        self.session_dir(session_id)
            .join(format!("{}.{}", encode_component(id), RECORD_EXT))
    }

    async fn session_dirs(&self) -> Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(dirs),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                dirs.push(entry.path());
            }
        }
        Ok(dirs)
    }

    /// Path of `id` in whichever session directory holds it
    async fn find(&self, id: &str, session_hint: Option<&str>) -> Result<Option<PathBuf>> {
        if let Some(session) = session_hint {
            let path = self.record_path(session, id);
            if fs::try_exists(&path).await? {
                return Ok(Some(path));
            }
        }

        let file_name = format!("{}.{}", encode_component(id), RECORD_EXT);
        for dir in self.session_dirs().await? {
            let path = dir.join(&file_name);
            if fs::try_exists(&path).await? {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl CheckpointStorage for FileStorage {
    async fn write(&self, session_id: &str, id: &str, bytes: Vec<u8>) -> Result<()> {
        let dir = self.session_dir(session_id);
        fs::create_dir_all(&dir).await?;

        let path = self.record_path(session_id, id);
        let tmp = path.with_extension(TMP_EXT);
        {
            let mut file = fs::File::create(&tmp).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
        }
        fs::rename(&tmp, &path).await?;

        debug!(path = %path.display(), bytes = bytes.len(), "Checkpoint record written");
        Ok(())
    }

    async fn read(&self, id: &str, session_hint: Option<&str>) -> Result<Option<Vec<u8>>> {
        match self.find(id, session_hint).await? {
            Some(path) => match fs::read(&path).await {
                Ok(bytes) => Ok(Some(bytes)),
                // deleted between find and read
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            },
            None => Ok(None),
        }
    }

    async fn list_session(&self, session_id: &str) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut entries = match fs::read_dir(self.session_dir(session_id)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            match path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(decode_component)
            {
                Some(id) => ids.push(id),
                None => warn!(path = %path.display(), "Skipping unrecognised checkpoint file"),
            }
        }
        Ok(ids)
    }

    /// Session ids decoded from directory names
    async fn list_sessions(&self) -> Result<Vec<String>> {
        Ok(self
            .session_dirs()
            .await?
            .iter()
            .filter_map(|dir| dir.file_name().and_then(|n| n.to_str()))
            .filter_map(decode_component)
            .collect())
    }

    async fn delete(&self, id: &str, session_hint: Option<&str>) -> Result<bool> {
        let Some(path) = self.find(id, session_hint).await? else {
            return Ok(false);
        };
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn is_plain(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_'
}

/// Percent-encode every byte outside `[A-Za-z0-9_-]`
///
/// The mapping is injective, so `user:1` and `user_1` land in different
/// directories, and no component can be `.` or `..`.
fn encode_component(component: &str) -> String {
    let mut out = String::with_capacity(component.len());
    for byte in component.bytes() {
        if is_plain(byte) {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

/// Inverse of [`encode_component`]; `None` for names it could not produce
fn decode_component(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = name.get(i + 1..i + 3)?;
                out.push(u8::from_str_radix(hex, 16).ok()?);
                i += 3;
            }
            byte if is_plain(byte) => {
                out.push(byte);
                i += 1;
            }
            _ => return None,
        }
    }
    String::from_utf8(out).ok()
}

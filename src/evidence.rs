//! Evidence file storage.
//!
//! Files are written before the record that references them; the workflow engine calls
//! [`EvidenceStore::discard`] when the record write then fails.

use crate::config::MediaConfig;
use crate::error::{WorkflowError, WorkflowResult};
use crate::executor::StoreError;
use crate::record::RecordKind;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const UNSAFE_CHARS: &str = r"[^A-Za-z0-9._-]+";

const MAX_NAME_LEN: usize = 100;

/// An uploaded file as received from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceUpload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl EvidenceUpload {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
        }
    }
}

pub trait EvidenceStore {
    /// Persist an upload and return its stored path, relative to the media root.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for rejected files, `StorageFailure` if the write fails.
    fn store(&self, kind: RecordKind, owner_id: i64, upload: &EvidenceUpload)
        -> WorkflowResult<String>;

    /// Remove a stored file. Failures are logged, never returned.
    fn discard(&self, path: &str);
}

/// Evidence kept on the local filesystem under `media_root/<kind>/`.
#[derive(Debug, Clone)]
pub struct LocalEvidenceStore {
    root: PathBuf,
    max_bytes: usize,
    allowed_extensions: Vec<String>,
}

impl LocalEvidenceStore {
    pub fn new(config: &MediaConfig) -> Self {
        Self {
            root: config.root.clone(),
            max_bytes: config.max_evidence_bytes,
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn check(&self, upload: &EvidenceUpload) -> WorkflowResult<String> {
        if upload.bytes.is_empty() {
            return Err(WorkflowError::invalid("Evidence file is empty."));
        }
        if upload.bytes.len() > self.max_bytes {
            return Err(WorkflowError::invalid(format!(
                "Evidence file exceeds the {} byte limit.",
                self.max_bytes
            )));
        }

        let extension = Path::new(&upload.filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| WorkflowError::invalid("Evidence file has no extension."))?;
        if !self.allowed_extensions.contains(&extension) {
            return Err(WorkflowError::invalid(format!(
                "Evidence files of type '.{extension}' are not accepted."
            )));
        }
        if !content_matches(&extension, &upload.bytes) {
            return Err(WorkflowError::invalid(format!(
                "Evidence file content does not match '.{extension}'."
            )));
        }
        Ok(extension)
    }
}

/// Magic-byte check for the formats we know; other allowed extensions pass.
fn content_matches(extension: &str, bytes: &[u8]) -> bool {
    match extension {
        "pdf" => bytes.starts_with(b"%PDF-"),
        "png" => bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]),
        "jpg" | "jpeg" => bytes.starts_with(&[0xFF, 0xD8, 0xFF]),
        _ => true,
    }
}

/// Reduce a client file name to `[A-Za-z0-9._-]`, without leading dots.
///
/// # Errors
///
/// `InvalidInput` if the character filter cannot be built.
pub fn sanitize_filename(filename: &str) -> WorkflowResult<String> {
    let unsafe_chars = Regex::new(UNSAFE_CHARS)
        .map_err(|e| WorkflowError::invalid(format!("file name filter: {e}")))?;
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename);
    let cleaned = unsafe_chars.replace_all(base, "_");
    let trimmed = cleaned.trim_start_matches(['.', '_']);
    let skip = trimmed.chars().count().saturating_sub(MAX_NAME_LEN);
    let name: String = trimmed.chars().skip(skip).collect();
    if name.is_empty() {
        return Ok("upload".to_string());
    }
    Ok(name)
}

impl EvidenceStore for LocalEvidenceStore {
    fn store(
        &self,
        kind: RecordKind,
        owner_id: i64,
        upload: &EvidenceUpload,
    ) -> WorkflowResult<String> {
        self.check(upload)?;

        let folder = kind.descriptor().evidence_folder;
        let name = format!(
            "{owner_id}_{}_{}",
            Uuid::new_v4().simple(),
            sanitize_filename(&upload.filename)?
        );
        let directory = self.root.join(folder);
        fs::create_dir_all(&directory).map_err(|e| {
            StoreError::Other(format!("cannot create {}: {e}", directory.display()))
        })?;
        let target = directory.join(&name);
        fs::write(&target, &upload.bytes)
            .map_err(|e| StoreError::Other(format!("cannot write {}: {e}", target.display())))?;

        log::debug!("stored evidence {folder}/{name} ({} bytes)", upload.bytes.len());
        Ok(format!("{folder}/{name}"))
    }

    fn discard(&self, path: &str) {
        let target = self.root.join(path);
        if let Err(e) = fs::remove_file(&target) {
            log::warn!("could not remove orphaned evidence {}: {e}", target.display());
        }
    }
}

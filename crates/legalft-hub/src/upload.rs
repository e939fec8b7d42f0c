use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{PublishError, Result};

/// A local file staged for upload, addressed by its sha256 LFS oid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    /// Forward-slash path relative to the folder root.
    pub path_in_repo: String,
    pub local_path: PathBuf,
    pub oid: String,
    pub size: u64,
}

impl UploadFile {
    pub fn from_path(local_path: &Path, path_in_repo: String) -> Result<Self> {
        let io_err = |source| PublishError::Io { path: local_path.to_path_buf(), source };
        let mut file = File::open(local_path).map_err(io_err)?;
        let mut hasher = Sha256::new();
        let size = io::copy(&mut file, &mut hasher).map_err(io_err)?;
        Ok(Self { path_in_repo, local_path: local_path.to_path_buf(), oid: hex::encode(hasher.finalize()), size })
    }
}

/// Top-level directories of a training output that are not part of the model.
pub const LOCAL_ONLY_DIRS: &[&str] = &["eval"];

/// Every regular file under `dir`, sorted by repo path. Hidden entries
/// (`.git`, `.cache`, ...) and [`LOCAL_ONLY_DIRS`] are skipped.
pub fn collect_files(dir: &Path) -> Result<Vec<UploadFile>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(dir).follow_links(true).into_iter().filter_entry(|e| {
        if e.depth() == 0 { return true; }
        let name = e.file_name().to_string_lossy();
        if name.starts_with('.') { return false; }
        !(e.depth() == 1 && e.file_type().is_dir() && LOCAL_ONLY_DIRS.contains(&name.as_ref()))
    });
    for entry in walker {
        let entry = entry.map_err(|e| PublishError::Io {
            path: e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf()),
            source: e.into_io_error().unwrap_or_else(|| io::Error::other("filesystem loop")),
        })?;
        if !entry.file_type().is_file() { continue; }
        let rel = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        let path_in_repo = rel.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/");
        files.push(UploadFile::from_path(entry.path(), path_in_repo)?);
    }
    if files.is_empty() { return Err(PublishError::EmptyFolder(dir.to_path_buf())); }
    files.sort_by(|a, b| a.path_in_repo.cmp(&b.path_in_repo));
    Ok(files)
}

/// Body of an LFS batch upload request.
pub fn lfs_batch_request(files: &[UploadFile]) -> serde_json::Value {
    json!({
        "operation": "upload",
        "transfers": ["basic"],
        "hash_algo": "sha256",
        "objects": files.iter().map(|f| json!({ "oid": f.oid, "size": f.size })).collect::<Vec<_>>(),
    })
}

/// NDJSON body of a commit that points every path at its uploaded LFS object.
pub fn commit_payload(summary: &str, description: &str, files: &[UploadFile]) -> String {
    let mut lines = Vec::with_capacity(files.len() + 1);
    lines.push(json!({ "key": "header", "value": { "summary": summary, "description": description } }).to_string());
    for f in files {
        lines.push(
            json!({
                "key": "lfsFile",
                "value": { "path": f.path_in_repo, "algo": "sha256", "oid": f.oid, "size": f.size },
            })
            .to_string(),
        );
    }
    let mut body = lines.join("\n");
    body.push('\n');
    body
}

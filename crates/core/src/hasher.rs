//! Content fingerprinting and metadata snapshot for change detection.

use crate::models::Fingerprint;
use chrono::{DateTime, Utc};
use std::fs;
use std::io::Read;
use std::path::Path;

/// Full-file blake3 digest plus size and mtime. Deterministic for identical
/// bytes. Fails with the underlying I/O error if the file is unreadable;
/// such files are reported for review and never retried.
pub fn fingerprint(path: &Path) -> std::io::Result<Fingerprint> {
    let meta = fs::metadata(path)?;
    let modified: DateTime<Utc> = meta.modified()?.into();

    let mut file = fs::File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(Fingerprint {
        hash: hasher.finalize().to_hex().to_string(),
        size: meta.len(),
        last_modified: modified.to_rfc3339(),
    })
}

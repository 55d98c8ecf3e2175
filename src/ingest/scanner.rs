use walkdir::{WalkDir, DirEntry};
use std::path::{Path, PathBuf};
use crossbeam::channel::Sender;
use anyhow::Result;
use tracing::debug;

use crate::media::mimetype;

/// Sends every non-hidden video file under `root`, judged by content.
pub fn scan_directory(root: &Path, tx: Sender<PathBuf>) -> Result<usize> {
    let walker = WalkDir::new(root).into_iter();
    let mut sent = 0;

    for entry in walker.filter_entry(|e| !is_hidden(e)) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        match mimetype::detect_mimetype(entry.path()) {
            Ok(mime) if mimetype::is_video(&mime) => {
                if tx.send(entry.path().to_path_buf()).is_err() {
                    break;
                }
                sent += 1;
            }
            Ok(mime) => debug!("Skipping {:?} ({})", entry.path(), mime),
            Err(e) => debug!("Skipping {:?}: {}", entry.path(), e),
        }
    }
    Ok(sent)
}

fn is_hidden(entry: &DirEntry) -> bool {
    // The root itself may be "." and must still be walked.
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
}

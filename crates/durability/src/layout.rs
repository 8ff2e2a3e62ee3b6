//! On-disk layout (§6):
//!
//! ```text
//! <root>/wal/00000001.seg, 00000002.seg, ...
//! <root>/checkpoints/<lsn>.ckpt
//! <root>/meta/clean       (present only at clean shutdown)
//! <root>/meta/safe_mode   (present only after a failed recovery validation)
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Resolves the directory/file paths that make up a database's on-disk layout.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    /// Build a layout rooted at `root`, creating its subdirectories if absent.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        let layout = Layout { root };
        fs::create_dir_all(layout.wal_dir())?;
        fs::create_dir_all(layout.checkpoints_dir())?;
        fs::create_dir_all(layout.meta_dir())?;
        Ok(layout)
    }

    /// The root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The `wal/` directory holding segment files.
    pub fn wal_dir(&self) -> PathBuf {
        self.root.join("wal")
    }

    /// The `checkpoints/` directory holding checkpoint manifests.
    pub fn checkpoints_dir(&self) -> PathBuf {
        self.root.join("checkpoints")
    }

    /// The `meta/` directory holding the clean-shutdown and safe-mode sentinels.
    pub fn meta_dir(&self) -> PathBuf {
        self.root.join("meta")
    }

    /// Path of a WAL segment file by segment number.
    pub fn segment_path(&self, segment_number: u64) -> PathBuf {
        self.wal_dir().join(format!("{segment_number:08}.seg"))
    }

    /// Path of a checkpoint manifest by the LSN it covers.
    pub fn checkpoint_path(&self, lsn: u64) -> PathBuf {
        self.checkpoints_dir().join(format!("{lsn}.ckpt"))
    }

    /// Path of the clean-shutdown sentinel.
    pub fn clean_marker_path(&self) -> PathBuf {
        self.meta_dir().join("clean")
    }

    /// Path of the safe-mode sentinel.
    pub fn safe_mode_marker_path(&self) -> PathBuf {
        self.meta_dir().join("safe_mode")
    }

    /// Write the clean-shutdown sentinel (called from `close`).
    pub fn mark_clean(&self) -> io::Result<()> {
        fs::write(self.clean_marker_path(), [])
    }

    /// Remove the clean-shutdown sentinel (called at the start of `open`,
    /// before recovery runs, so a subsequent crash is correctly detected
    /// as unclean).
    pub fn clear_clean_marker(&self) -> io::Result<()> {
        match fs::remove_file(self.clean_marker_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// True if the clean-shutdown sentinel is present.
    pub fn was_clean_shutdown(&self) -> bool {
        self.clean_marker_path().exists()
    }

    /// Write the safe-mode sentinel.
    pub fn mark_safe_mode(&self) -> io::Result<()> {
        fs::write(self.safe_mode_marker_path(), [])
    }

    /// Remove the safe-mode sentinel (only via explicit operator action,
    /// per the manual-intervention exit policy, §4.9).
    pub fn clear_safe_mode(&self) -> io::Result<()> {
        match fs::remove_file(self.safe_mode_marker_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// True if the safe-mode sentinel is present.
    pub fn in_safe_mode(&self) -> bool {
        self.safe_mode_marker_path().exists()
    }

    /// List segment numbers present in the WAL directory, sorted ascending.
    pub fn list_segments(&self) -> io::Result<Vec<u64>> {
        let mut segments = Vec::new();
        for entry in fs::read_dir(self.wal_dir())? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(".seg") {
                if let Ok(n) = stem.parse::<u64>() {
                    segments.push(n);
                }
            }
        }
        segments.sort_unstable();
        Ok(segments)
    }

    /// Fsync the directory entry for a path's parent, confirming the
    /// path's existence is itself durable (needed when a sync spans a
    /// segment rotation boundary, §4.2).
    pub fn fsync_parent_dir(path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            let dir = fs::File::open(parent)?;
            dir.sync_all()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::open(dir.path()).unwrap();
        assert!(layout.wal_dir().is_dir());
        assert!(layout.checkpoints_dir().is_dir());
        assert!(layout.meta_dir().is_dir());
    }

    #[test]
    fn segment_path_is_zero_padded() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::open(dir.path()).unwrap();
        assert_eq!(
            layout.segment_path(1).file_name().unwrap().to_str().unwrap(),
            "00000001.seg"
        );
    }

    #[test]
    fn clean_marker_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::open(dir.path()).unwrap();
        assert!(!layout.was_clean_shutdown());
        layout.mark_clean().unwrap();
        assert!(layout.was_clean_shutdown());
        layout.clear_clean_marker().unwrap();
        assert!(!layout.was_clean_shutdown());
    }

    #[test]
    fn safe_mode_marker_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::open(dir.path()).unwrap();
        assert!(!layout.in_safe_mode());
        layout.mark_safe_mode().unwrap();
        assert!(layout.in_safe_mode());
        layout.clear_safe_mode().unwrap();
        assert!(!layout.in_safe_mode());
    }

    #[test]
    fn list_segments_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::open(dir.path()).unwrap();
        fs::write(layout.segment_path(3), []).unwrap();
        fs::write(layout.segment_path(1), []).unwrap();
        fs::write(layout.segment_path(2), []).unwrap();
        assert_eq!(layout.list_segments().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn clear_missing_marker_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::open(dir.path()).unwrap();
        assert!(layout.clear_clean_marker().is_ok());
        assert!(layout.clear_safe_mode().is_ok());
    }
}

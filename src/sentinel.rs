use std::fs::OpenOptions;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::LoaderError;

pub const SENTINEL_NAME: &str = "DONE";

pub fn sentinel_path(dir: &Utf8Path) -> Utf8PathBuf {
    dir.join(SENTINEL_NAME)
}

pub fn is_done(dir: &Utf8Path) -> bool {
    sentinel_path(dir).as_std_path().is_file()
}

/// Marks the artifact in `dir` as submitted. Never removes anything.
pub fn mark_done(dir: &Utf8Path) -> Result<(), LoaderError> {
    let path = sentinel_path(dir);
    match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path.as_std_path())
    {
        Ok(_) => {
            tracing::debug!(%path, "sentinel created");
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(err) => Err(LoaderError::Filesystem(format!("create {path}: {err}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf8_tempdir() -> (tempfile::TempDir, Utf8PathBuf) {
        let temp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        (temp, dir)
    }

    #[test]
    fn mark_is_idempotent() {
        let (_temp, dir) = utf8_tempdir();
        assert!(!is_done(&dir));
        mark_done(&dir).unwrap();
        mark_done(&dir).unwrap();
        assert!(is_done(&dir));
        assert_eq!(std::fs::metadata(sentinel_path(&dir)).unwrap().len(), 0);
    }

    #[test]
    fn missing_dir_is_an_error() {
        let (_temp, dir) = utf8_tempdir();
        assert!(mark_done(&dir.join("absent")).is_err());
    }
}

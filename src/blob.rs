use std::path::PathBuf;

use crate::error::AppError;
use crate::task_id::Mode;

/// Content-addressed filesystem layout for raw PoC bytes and per-mode
/// captured outputs, rooted at `log_dir`.
#[derive(Debug, Clone)]
pub struct BlobStore {
    log_dir: PathBuf,
}

impl BlobStore {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
        }
    }

    /// `log_dir/<poc_id[0:2]>/<poc_id[2:4]>/<poc_id>/`
    pub fn path_for(&self, poc_id: &str) -> PathBuf {
        self.log_dir.join(&poc_id[0..2]).join(&poc_id[2..4]).join(poc_id)
    }

    pub fn poc_bin_path(&self, poc_id: &str) -> PathBuf {
        self.path_for(poc_id).join("poc.bin")
    }

    pub fn output_path(&self, poc_id: &str, mode: Mode) -> PathBuf {
        self.path_for(poc_id).join(format!("output.{}", mode.as_str()))
    }

    pub fn write_poc(&self, poc_id: &str, bytes: &[u8]) -> Result<(), AppError> {
        let dir = self.path_for(poc_id);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join("poc.bin"), bytes)?;
        Ok(())
    }

    pub fn write_output(&self, poc_id: &str, mode: Mode, bytes: &[u8]) -> Result<(), AppError> {
        let dir = self.path_for(poc_id);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(self.output_path(poc_id, mode), bytes)?;
        Ok(())
    }

    /// UTF-8, lossy: a missing or undecodable output file reads back as
    /// the empty string rather than an error, since exit codes gate reads.
    pub fn read_output(&self, poc_id: &str, mode: Mode) -> String {
        match std::fs::read(self.output_path(poc_id, mode)) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(_) => String::new(),
        }
    }

    pub fn poc_exists(&self, poc_id: &str) -> bool {
        self.poc_bin_path(poc_id).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn layout_nests_by_poc_id_prefix() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path());
        let poc_id = "abcd1234000000000000000000000000";
        let path = store.path_for(poc_id);
        assert_eq!(
            path,
            dir.path().join("ab").join("cd").join(poc_id)
        );
    }

    #[test]
    fn write_and_read_roundtrip() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path());
        let poc_id = "abcd1234000000000000000000000000";
        store.write_poc(poc_id, b"hello").unwrap();
        assert!(store.poc_exists(poc_id));
        assert_eq!(std::fs::read(store.poc_bin_path(poc_id)).unwrap(), b"hello");

        store.write_output(poc_id, Mode::Vul, b"crash output").unwrap();
        assert_eq!(store.read_output(poc_id, Mode::Vul), "crash output");
    }

    #[test]
    fn missing_output_reads_as_empty_string() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path());
        assert_eq!(
            store.read_output("abcd1234000000000000000000000000", Mode::Fix),
            ""
        );
    }
}

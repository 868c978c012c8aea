use std::fs;
use std::io::Write;
use std::path::Path;

use crate::datatype::Error;

/// Small filesystem helpers used throughout metadata persistence.
pub struct Util;

impl Util {
    pub fn read_file(path: &Path) -> Result<Vec<u8>, Error> {
        Ok(fs::read(path)?)
    }

    pub fn read_text(path: &Path) -> Result<String, Error> {
        Ok(fs::read_to_string(path)?)
    }

    /// Writes `data` to `path` atomically: the bytes land in a temp file
    /// in the same directory first, then get renamed into place, so a
    /// reader never observes a partially-written file.
    pub fn write_file(path: &Path, data: &[u8]) -> Result<(), Error> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(data)?;
        tmp.persist(path).map_err(|err| Error::Internal(format!("persist failed: {}", err)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_file_then_read_file_roundtrips() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("file.json");
        Util::write_file(&path, b"hello").expect("write");
        assert_eq!(Util::read_file(&path).expect("read"), b"hello");
    }

    #[test]
    fn write_file_leaves_no_temp_siblings() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("file.json");
        Util::write_file(&path, b"data").expect("write");
        let entries: Vec<_> = fs::read_dir(dir.path()).expect("read_dir").collect();
        assert_eq!(entries.len(), 1);
    }
}

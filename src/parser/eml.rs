//! Reading `.eml` files from disk.

use std::path::Path;

use crate::error::{Error, Result};
use crate::model::message::Message;
use crate::parser::mime::parse_message;

/// Read and parse a single `.eml` file.
pub fn parse_eml(path: impl AsRef<Path>) -> Result<Message> {
    let path = path.as_ref();
    let data = read_eml(path)?;
    parse_message(&data)
}

/// Read the raw bytes of a message file.
pub fn read_eml(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::FileNotFound(path.to_path_buf())
        } else {
            Error::io(path, e)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file() {
        let err = parse_eml("/definitely/not/here.eml").unwrap_err();
        assert!(matches!(err, Error::FileNotFound(_)));
    }

    #[test]
    fn test_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.eml");
        std::fs::write(&path, "Subject: Hello\r\n\r\nHi there\r\n").unwrap();
        let msg = parse_eml(&path).unwrap();
        assert_eq!(msg.subject(), "Hello");
    }
}

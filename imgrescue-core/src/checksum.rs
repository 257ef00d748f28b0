//! Digest computation for downloaded images.
use md5::Md5;
use sha2::Digest;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

const BUFFER_SIZE: usize = 1024 * 1024; // 1 MiB

/// A digest algorithm a catalog stanza can declare.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChecksumKind {
    Md5,
    Sha1,
}

impl ChecksumKind {
    /// Every kind, strongest first.
    pub const PREFERENCE: [ChecksumKind; 2] = [ChecksumKind::Sha1, ChecksumKind::Md5];

    /// The catalog key that carries this digest.
    pub fn key(self) -> &'static str {
        match self {
            ChecksumKind::Md5 => "md5",
            ChecksumKind::Sha1 => "sha1",
        }
    }

    /// Whether this build can compute the digest.
    pub fn is_available(self) -> bool {
        match self {
            ChecksumKind::Md5 => true,
            ChecksumKind::Sha1 => cfg!(feature = "sha1"),
        }
    }

    /// The strongest digest this build can compute.
    pub fn strongest() -> ChecksumKind {
        Self::PREFERENCE
            .into_iter()
            .find(|kind| kind.is_available())
            .unwrap_or(ChecksumKind::Md5)
    }
}

impl fmt::Display for ChecksumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumKind::Md5 => write!(f, "MD5"),
            ChecksumKind::Sha1 => write!(f, "SHA-1"),
        }
    }
}

fn hash_reader<D: Digest>(mut reader: impl Read) -> io::Result<String> {
    let mut hasher = D::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect())
}

/// Computes the lowercase hex digest of the file at `path`.
pub fn digest_file(path: &Path, kind: ChecksumKind) -> io::Result<String> {
    let reader = BufReader::new(File::open(path)?);
    match kind {
        ChecksumKind::Md5 => hash_reader::<Md5>(reader),
        #[cfg(feature = "sha1")]
        ChecksumKind::Sha1 => hash_reader::<sha1::Sha1>(reader),
        #[cfg(not(feature = "sha1"))]
        ChecksumKind::Sha1 => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "SHA-1 support was not compiled in",
        )),
    }
}

/// Compares two hex digests, ignoring case and surrounding whitespace.
pub fn matches(expected: &str, actual: &str) -> bool {
    expected.trim().eq_ignore_ascii_case(actual.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn file_with(contents: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn md5_of_known_input() {
        let file = file_with(b"abc");
        assert_eq!(
            digest_file(file.path(), ChecksumKind::Md5).unwrap(),
            "900150983cd24fb0d6963f7d28e17f72"
        );
    }

    #[cfg(feature = "sha1")]
    #[test]
    fn sha1_of_known_input() {
        let file = file_with(b"abc");
        assert_eq!(
            digest_file(file.path(), ChecksumKind::Sha1).unwrap(),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[cfg(feature = "sha1")]
    #[test]
    fn prefers_sha1_when_compiled_in() {
        assert_eq!(ChecksumKind::strongest(), ChecksumKind::Sha1);
    }

    #[test]
    fn comparison_ignores_case() {
        assert!(matches("ABCDEF", "abcdef"));
        assert!(!matches("abcdef", "abcde0"));
    }
}

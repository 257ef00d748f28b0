//! Extraction of the image from its downloaded container.
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// How the downloaded container is opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnpackKind {
    /// Extract a named member from a zip archive.
    Zip,
    /// Decompress a single gzip stream.
    Gzip,
}

impl UnpackKind {
    /// Archive extraction when this build has it, single-stream otherwise.
    pub fn preferred() -> UnpackKind {
        if cfg!(feature = "zip") {
            UnpackKind::Zip
        } else {
            UnpackKind::Gzip
        }
    }
}

/// Unpacks `member` from `container` into `dest_dir` and returns the path
/// of the unpacked file.
///
/// With [`UnpackKind::Gzip`] the whole stream is decompressed and written
/// under the name `member`.
pub fn unpack(
    kind: UnpackKind,
    container: &Path,
    member: &str,
    dest_dir: &Path,
) -> io::Result<PathBuf> {
    let dest = dest_dir.join(member_file_name(member)?);
    let input = BufReader::new(File::open(container)?);
    let mut writer = BufWriter::new(File::create(&dest)?);

    let result = match kind {
        UnpackKind::Zip => extract_zip_member(input, member, &mut writer),
        UnpackKind::Gzip => io::copy(&mut GzDecoder::new(input), &mut writer).map(|_| ()),
    }
    .and_then(|()| writer.flush());

    if let Err(e) = result {
        drop(writer);
        fs::remove_file(&dest).ok();
        return Err(e);
    }
    Ok(dest)
}

/// Only the final path component of the member name is used locally.
fn member_file_name(member: &str) -> io::Result<&str> {
    Path::new(member)
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid image file name: {member}"),
            )
        })
}

#[cfg(feature = "zip")]
fn extract_zip_member(
    input: BufReader<File>,
    member: &str,
    writer: &mut impl Write,
) -> io::Result<()> {
    let mut archive = zip::ZipArchive::new(input).map_err(io::Error::other)?;
    let mut entry = archive.by_name(member).map_err(|e| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("{member} not found in archive: {e}"),
        )
    })?;
    io::copy(&mut entry, writer)?;
    Ok(())
}

#[cfg(not(feature = "zip"))]
fn extract_zip_member(
    _input: BufReader<File>,
    _member: &str,
    _writer: &mut impl Write,
) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "zip support was not compiled in",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::fs;

    #[test]
    fn gzip_stream_is_decompressed_under_member_name() {
        let dir = tempfile::tempdir().unwrap();
        let container = dir.path().join("img.gz");
        let mut encoder = GzEncoder::new(File::create(&container).unwrap(), Compression::default());
        encoder.write_all(&[7u8; 4096]).unwrap();
        encoder.finish().unwrap();

        let out = unpack(UnpackKind::Gzip, &container, "img.bin", dir.path()).unwrap();
        assert_eq!(out, dir.path().join("img.bin"));
        assert_eq!(fs::read(out).unwrap(), vec![7u8; 4096]);
    }

    #[cfg(feature = "zip")]
    #[test]
    fn zip_member_is_extracted() {
        use zip::write::SimpleFileOptions;

        let dir = tempfile::tempdir().unwrap();
        let container = dir.path().join("img.zip");
        let mut zip = zip::ZipWriter::new(File::create(&container).unwrap());
        zip.start_file("readme.txt", SimpleFileOptions::default()).unwrap();
        zip.write_all(b"ignore me").unwrap();
        zip.start_file("img.bin", SimpleFileOptions::default()).unwrap();
        zip.write_all(&[1u8; 2000]).unwrap();
        zip.finish().unwrap();

        let out = unpack(UnpackKind::Zip, &container, "img.bin", dir.path()).unwrap();
        assert_eq!(fs::read(out).unwrap(), vec![1u8; 2000]);
    }

    #[cfg(feature = "zip")]
    #[test]
    fn missing_zip_member_is_an_error() {
        use zip::write::SimpleFileOptions;

        let dir = tempfile::tempdir().unwrap();
        let container = dir.path().join("img.zip");
        let mut zip = zip::ZipWriter::new(File::create(&container).unwrap());
        zip.start_file("other.bin", SimpleFileOptions::default()).unwrap();
        zip.write_all(b"x").unwrap();
        zip.finish().unwrap();

        let err = unpack(UnpackKind::Zip, &container, "img.bin", dir.path()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(!dir.path().join("img.bin").exists());
    }
}

//! Unpacking of zip and gzip-compressed tar archives into an in-memory map of entries.

use flate2::read::GzDecoder;
use std::collections::BTreeMap;
use std::io::{self, prelude::*};
use tar::Archive;

/// Raw content of the files retained from an archive, keyed by their slash-separated path
/// inside the archive. A BTree keeps the iteration order stable from one run to the next.
pub type ArchiveMap = BTreeMap<String, Vec<u8>>;

type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised while unpacking an archive.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// The byte stream is not a valid archive of the expected kind.
    #[error("not a valid {kind} archive")]
    Format {
        kind: ArchiveKind,
        #[source]
        err: BoxedError,
    },

    /// An individual entry could not be fully read.
    #[error("failed to read entry '{path}' from {kind} archive")]
    EntryRead {
        kind: ArchiveKind,
        path: String,
        #[source]
        err: BoxedError,
    },
}

impl ArchiveError {
    fn format<E: Into<BoxedError>>(kind: ArchiveKind, err: E) -> Self {
        Self::Format {
            kind,
            err: err.into(),
        }
    }

    fn entry_read<E: Into<BoxedError>>(kind: ArchiveKind, path: String, err: E) -> Self {
        Self::EntryRead {
            kind,
            path,
            err: err.into(),
        }
    }
}

/// The container format of an archive. The kind is always declared by whoever supplies the
/// bytes, it is never sniffed from the content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
pub enum ArchiveKind {
    #[serde(rename = "zip")]
    Zip,
    #[serde(rename = "tar")]
    TarGz,
}

impl std::fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Zip => write!(f, "zip"),
            Self::TarGz => write!(f, "tar.gz"),
        }
    }
}

impl ArchiveKind {
    /// Unpack `bytes`, returning one entry per retained regular file. Directories and symlinks
    /// are skipped. The tar variant only retains `.json` files; the zip variant retains
    /// everything and leaves filtering to classification.
    pub fn extract(self, bytes: &[u8]) -> Result<ArchiveMap, ArchiveError> {
        let entries = match self {
            Self::Zip => extract_zip(bytes),
            Self::TarGz => extract_tar_gz(bytes),
        }?;
        tracing::info!(kind = %self, entries = entries.len(), "extracted archive");
        Ok(entries)
    }

    fn retains(self, path: &str) -> bool {
        match self {
            Self::Zip => true,
            Self::TarGz => path.ends_with(".json"),
        }
    }
}

/// Use forward slashes and drop any leading `./`.
fn normalise_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    match path.strip_prefix("./") {
        Some(stripped) => stripped.to_string(),
        None => path,
    }
}

fn insert_entry(entries: &mut ArchiveMap, path: String, content: Vec<u8>) {
    tracing::debug!(%path, bytes = content.len(), "extracted entry");
    if entries.insert(path.clone(), content).is_some() {
        tracing::warn!(%path, "archive contains duplicate entry; keeping the last one");
    }
}

fn decompress_archive(compressed: &[u8]) -> Result<Vec<u8>, io::Error> {
    let mut decoder = GzDecoder::new(compressed);
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed)?;
    Ok(decompressed)
}

fn extract_tar_gz(compressed: &[u8]) -> Result<ArchiveMap, ArchiveError> {
    let kind = ArchiveKind::TarGz;
    let decompressed =
        decompress_archive(compressed).map_err(|err| ArchiveError::format(kind, err))?;
    let mut archive = Archive::new(io::Cursor::new(decompressed));
    let mut entries = ArchiveMap::new();
    for archive_entry in archive
        .entries()
        .map_err(|err| ArchiveError::format(kind, err))?
    {
        let mut archive_entry = archive_entry.map_err(|err| ArchiveError::format(kind, err))?;
        let path = normalise_path(
            &archive_entry
                .path()
                .map_err(|err| ArchiveError::format(kind, err))?
                .to_string_lossy(),
        );
        if !archive_entry.header().entry_type().is_file() {
            tracing::debug!(%path, "skipping non-regular tar entry");
            continue;
        }
        if !kind.retains(&path) {
            continue;
        }
        let expected = archive_entry
            .header()
            .size()
            .map_err(|err| ArchiveError::entry_read(kind, path.clone(), err))?;
        let mut content = Vec::new();
        archive_entry
            .read_to_end(&mut content)
            .map_err(|err| ArchiveError::entry_read(kind, path.clone(), err))?;
        // The entry reader stops quietly at the end of the stream
        if content.len() as u64 != expected {
            let short = io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("expected {expected} bytes, read {}", content.len()),
            );
            return Err(ArchiveError::entry_read(kind, path, short));
        }
        insert_entry(&mut entries, path, content);
    }
    Ok(entries)
}

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

fn is_symlink(unix_mode: Option<u32>) -> bool {
    unix_mode.is_some_and(|mode| mode & S_IFMT == S_IFLNK)
}

fn extract_zip(bytes: &[u8]) -> Result<ArchiveMap, ArchiveError> {
    let kind = ArchiveKind::Zip;
    let mut archive = zip::ZipArchive::new(io::Cursor::new(bytes))
        .map_err(|err| ArchiveError::format(kind, err))?;
    let mut entries = ArchiveMap::new();
    for index in 0..archive.len() {
        let mut file = archive
            .by_index(index)
            .map_err(|err| ArchiveError::entry_read(kind, format!("#{index}"), err))?;
        let path = normalise_path(file.name());
        if file.is_dir() || is_symlink(file.unix_mode()) {
            tracing::debug!(%path, "skipping non-regular zip entry");
            continue;
        }
        if !kind.retains(&path) {
            continue;
        }
        let mut content = Vec::new();
        file.read_to_end(&mut content)
            .map_err(|err| ArchiveError::entry_read(kind, path.clone(), err))?;
        insert_entry(&mut entries, path, content);
    }
    Ok(entries)
}



#[cfg(test)]
mod test_extract_tar {
    use super::test_archives::tar_gz_of;
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;

    #[test]
    fn extracts_only_json_files() {
        let bytes = tar_gz_of(&[
            ("./sqlscript/s1.json", b"{\"q\":\"select 1\"}"),
            ("./sqlscript/notes.txt", b"ignore me"),
        ]);
        let entries = ArchiveKind::TarGz.extract(&bytes).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries["sqlscript/s1.json"], b"{\"q\":\"select 1\"}");
    }

    #[test]
    fn skips_directories_and_symlinks() {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));

        let mut dir = tar::Header::new_gnu();
        dir.set_entry_type(tar::EntryType::Directory);
        dir.set_size(0);
        dir.set_mode(0o755);
        dir.set_cksum();
        builder
            .append_data(&mut dir, "notebook/", std::io::empty())
            .unwrap();

        let mut link = tar::Header::new_gnu();
        link.set_entry_type(tar::EntryType::Symlink);
        link.set_size(0);
        link.set_mode(0o777);
        builder
            .append_link(&mut link, "notebook/alias.json", "nb1.json")
            .unwrap();

        let content = b"{\"cells\":[]}";
        let mut file = tar::Header::new_gnu();
        file.set_size(content.len() as u64);
        file.set_mode(0o644);
        file.set_cksum();
        builder
            .append_data(&mut file, "notebook/nb1.json", &content[..])
            .unwrap();

        let bytes = builder.into_inner().unwrap().finish().unwrap();
        let entries = ArchiveKind::TarGz.extract(&bytes).unwrap();
        assert_eq!(entries.keys().collect::<Vec<_>>(), vec!["notebook/nb1.json"]);
        assert_eq!(entries["notebook/nb1.json"], content);
    }

    #[test]
    fn rejects_bytes_that_are_not_gzip() {
        let result = ArchiveKind::TarGz.extract(b"plain text, no gzip header here");
        assert!(matches!(
            result,
            Err(ArchiveError::Format {
                kind: ArchiveKind::TarGz,
                ..
            })
        ));
    }

    #[test]
    fn truncated_archive_is_an_error() {
        let bytes = tar_gz_of(&[("pipeline/p1.json", b"{\"activities\":[]}")]);
        let truncated = &bytes[..bytes.len() / 2];
        assert!(ArchiveKind::TarGz.extract(truncated).is_err());
    }

    #[test]
    fn entry_cut_off_mid_body_names_the_entry() {
        let mut header = tar::Header::new_gnu();
        header.set_path("pipeline/p1.json").unwrap();
        header.set_size(2000);
        header.set_mode(0o644);
        header.set_cksum();
        let mut raw = header.as_bytes().to_vec();
        raw.extend(std::iter::repeat_n(b' ', 700));

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        std::io::Write::write_all(&mut encoder, &raw).unwrap();
        let bytes = encoder.finish().unwrap();

        match ArchiveKind::TarGz.extract(&bytes) {
            Err(ArchiveError::EntryRead { kind, path, .. }) => {
                assert_eq!(kind, ArchiveKind::TarGz);
                assert_eq!(path, "pipeline/p1.json");
            }
            other => panic!("expected an entry read error, got {other:?}"),
        }
    }
}

//! Archive expanders: enumerate entries inside `.zip`/`.tar`/`.tar.gz`
//! archives as synthetic URLs of the form
//! `archive-scheme://outer/path!/inner/path` (spec.md §4.1).

use std::io::Read;

use url::Url;

use crate::FetchError;

/// A single entry discovered inside an archive.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub synthetic_url: Url,
    pub body: Vec<u8>,
}

/// Build the synthetic URL for an archive member, rejecting path traversal.
pub fn synthetic_url(outer: &Url, inner_path: &str) -> Result<Url, FetchError> {
    if inner_path.split('/').any(|seg| seg == "..") {
        return Err(FetchError::Permanent {
            url: outer.to_string(),
            message: format!("archive entry path traversal rejected: {inner_path}"),
        });
    }
    Url::parse(&format!("archive-scheme://{outer}!/{inner_path}")).map_err(|e| {
        FetchError::Permanent {
            url: outer.to_string(),
            message: format!("invalid synthetic archive URL: {e}"),
        }
    })
}

/// Enumerate the entries of a ZIP archive.
pub fn expand_zip(outer: &Url, bytes: &[u8]) -> Result<Vec<ArchiveEntry>, FetchError> {
    let reader = std::io::Cursor::new(bytes);
    let mut zip = zip::ZipArchive::new(reader).map_err(|e| FetchError::Permanent {
        url: outer.to_string(),
        message: format!("invalid zip archive: {e}"),
    })?;

    let mut entries = Vec::new();
    for i in 0..zip.len() {
        let mut file = zip.by_index(i).map_err(|e| FetchError::Permanent {
            url: outer.to_string(),
            message: e.to_string(),
        })?;
        if file.is_dir() {
            continue;
        }
        let name = file.name().to_string();
        let mut body = Vec::new();
        file.read_to_end(&mut body).map_err(|e| FetchError::Permanent {
            url: outer.to_string(),
            message: e.to_string(),
        })?;

        entries.push(ArchiveEntry {
            synthetic_url: synthetic_url(outer, &name)?,
            body,
        });
    }
    Ok(entries)
}

/// Enumerate the entries of a `.tar` or gzip-compressed `.tar.gz` archive.
pub fn expand_tar(outer: &Url, bytes: &[u8], gzipped: bool) -> Result<Vec<ArchiveEntry>, FetchError> {
    let cursor = std::io::Cursor::new(bytes);
    let mut entries = Vec::new();

    let mut read_entries = |mut archive: tar::Archive<Box<dyn Read>>| -> Result<(), FetchError> {
        let iter = archive.entries().map_err(|e| FetchError::Permanent {
            url: outer.to_string(),
            message: e.to_string(),
        })?;
        for entry in iter {
            let mut entry = entry.map_err(|e| FetchError::Permanent {
                url: outer.to_string(),
                message: e.to_string(),
            })?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let name = entry
                .path()
                .map_err(|e| FetchError::Permanent {
                    url: outer.to_string(),
                    message: e.to_string(),
                })?
                .to_string_lossy()
                .to_string();
            let mut body = Vec::new();
            entry.read_to_end(&mut body).map_err(|e| FetchError::Permanent {
                url: outer.to_string(),
                message: e.to_string(),
            })?;
            entries.push(ArchiveEntry {
                synthetic_url: synthetic_url(outer, &name)?,
                body,
            });
        }
        Ok(())
    };

    if gzipped {
        let decoder: Box<dyn Read> = Box::new(flate2::read::GzDecoder::new(cursor));
        read_entries(tar::Archive::new(decoder))?;
    } else {
        let raw: Box<dyn Read> = Box::new(cursor);
        read_entries(tar::Archive::new(raw))?;
    }

    Ok(entries)
}

//! Content catalog served by the simulated swarm

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use sha1::{Digest, Sha1};

use crate::torrent::InfoHash;

/// Where the bytes of a catalog file live.
#[derive(Debug, Clone)]
pub enum ContentSource {
    Memory(Bytes),
    Disk(PathBuf),
}

/// One file of a catalog entry.
#[derive(Debug, Clone)]
pub struct CatalogFile {
    /// Path inside the torrent, `/` separated and prefixed with the entry name
    /// for multi-file entries
    pub path: String,
    pub length: u64,
    pub source: ContentSource,
}

/// A torrent the simulated swarm can deliver.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub info_hash: InfoHash,
    pub name: String,
    pub files: Vec<CatalogFile>,
}

impl CatalogEntry {
    /// Magnet URI that resolves to this entry.
    pub fn magnet_uri(&self) -> String {
        format!(
            "magnet:?xt=urn:btih:{}&dn={}",
            self.info_hash,
            urlencoding::encode(&self.name)
        )
    }
}

/// Torrents known to the simulated swarm, keyed by info hash.
#[derive(Debug, Default, Clone)]
pub struct Catalog {
    entries: HashMap<InfoHash, Arc<CatalogEntry>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministic info hash for an entry name.
    pub fn info_hash_for(name: &str) -> InfoHash {
        let digest = Sha1::digest(name.as_bytes());
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&digest);
        InfoHash::new(hash)
    }

    /// Builds a catalog from a content directory.
    ///
    /// Every regular file at the top level becomes a single-file torrent and
    /// every subdirectory becomes a multi-file torrent containing all regular
    /// files below it, ordered by path. Hidden entries are ignored.
    ///
    /// # Errors
    /// - `std::io::Error` - Failed to read the directory or file metadata
    pub async fn from_directory(dir: &Path) -> Result<Self, std::io::Error> {
        let mut catalog = Self::new();
        let mut entries = tokio::fs::read_dir(dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }

            let file_type = entry.file_type().await?;
            if file_type.is_file() {
                let length = entry.metadata().await?.len();
                catalog.insert(
                    name.clone(),
                    vec![CatalogFile {
                        path: name,
                        length,
                        source: ContentSource::Disk(path),
                    }],
                );
            } else if file_type.is_dir() {
                let mut files = Vec::new();
                collect_files(&path, &name, &mut files).await?;
                if files.is_empty() {
                    continue;
                }
                files.sort_by(|a, b| a.path.cmp(&b.path));
                catalog.insert(name, files);
            }
        }

        tracing::debug!(
            "Catalog loaded {} entries from {}",
            catalog.len(),
            dir.display()
        );
        Ok(catalog)
    }

    /// Adds an entry and returns its info hash. Replaces an entry of the same name.
    pub fn insert(&mut self, name: impl Into<String>, files: Vec<CatalogFile>) -> InfoHash {
        let name = name.into();
        let info_hash = Self::info_hash_for(&name);
        self.entries.insert(
            info_hash,
            Arc::new(CatalogEntry {
                info_hash,
                name,
                files,
            }),
        );
        info_hash
    }

    /// Adds an entry backed by in-memory file contents.
    pub fn insert_memory(
        &mut self,
        name: impl Into<String>,
        files: impl IntoIterator<Item = (String, Bytes)>,
    ) -> InfoHash {
        let files = files
            .into_iter()
            .map(|(path, data)| CatalogFile {
                path,
                length: data.len() as u64,
                source: ContentSource::Memory(data),
            })
            .collect();
        self.insert(name, files)
    }

    pub fn get(&self, info_hash: &InfoHash) -> Option<Arc<CatalogEntry>> {
        self.entries.get(info_hash).cloned()
    }

    /// Entries sorted by name.
    pub fn entries(&self) -> Vec<Arc<CatalogEntry>> {
        let mut entries: Vec<_> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Recursively collects regular files below `dir`, naming them `prefix/...`.
fn collect_files<'a>(
    dir: &'a Path,
    prefix: &'a str,
    files: &'a mut Vec<CatalogFile>,
) -> Pin<Box<dyn Future<Output = Result<(), std::io::Error>> + Send + 'a>> {
    Box::pin(async move {
        let mut entries = tokio::fs::read_dir(dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }

            let relative = format!("{prefix}/{name}");
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                collect_files(&path, &relative, files).await?;
            } else if file_type.is_file() {
                files.push(CatalogFile {
                    path: relative,
                    length: entry.metadata().await?.len(),
                    source: ContentSource::Disk(path),
                });
            }
        }

        Ok(())
    })
}

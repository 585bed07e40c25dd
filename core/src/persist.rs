use crate::InvertedIndex;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{create_dir_all, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

pub const INDEX_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaFile {
    pub num_docs: u32,
    pub num_terms: u32,
    pub created_at: String,
    pub version: u32,
}

impl MetaFile {
    pub fn for_index(index: &InvertedIndex, created_at: impl Into<String>) -> Self {
        Self {
            num_docs: index.num_docs,
            num_terms: index.num_terms() as u32,
            created_at: created_at.into(),
            version: INDEX_FORMAT_VERSION,
        }
    }
}

pub struct IndexPaths {
    pub root: PathBuf,
}

impl IndexPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    pub fn index(&self) -> PathBuf { self.root.join("index.bin") }
    pub fn meta(&self) -> PathBuf { self.root.join("meta.json") }
    pub fn exists(&self) -> bool { self.index().is_file() && self.meta().is_file() }
}

pub fn save_index(paths: &IndexPaths, index: &InvertedIndex) -> Result<()> {
    create_dir_all(&paths.root)?;
    let mut f = File::create(paths.index()).with_context(|| format!("creating {}", paths.index().display()))?;
    let bytes = bincode::serialize(index)?;
    f.write_all(&bytes)?;
    Ok(())
}

pub fn load_index(paths: &IndexPaths) -> Result<InvertedIndex> {
    let mut f = File::open(paths.index()).with_context(|| format!("opening {}", paths.index().display()))?;
    let mut buf = Vec::new();
    f.read_to_end(&mut buf)?;
    let index = bincode::deserialize(&buf).with_context(|| format!("decoding {}", paths.index().display()))?;
    Ok(index)
}

pub fn save_meta(paths: &IndexPaths, meta: &MetaFile) -> Result<()> {
    create_dir_all(&paths.root)?;
    let mut f = File::create(paths.meta())?;
    let json = serde_json::to_string_pretty(meta)?;
    f.write_all(json.as_bytes())?;
    Ok(())
}

pub fn load_meta(paths: &IndexPaths) -> Result<MetaFile> {
    let mut f = File::open(paths.meta()).with_context(|| format!("opening {}", paths.meta().display()))?;
    let mut buf = String::new();
    f.read_to_string(&mut buf)?;
    let meta: MetaFile = serde_json::from_str(&buf)?;
    Ok(meta)
}

/// Load and check the blob written by the indexer.
pub fn load_checked(paths: &IndexPaths) -> Result<(InvertedIndex, MetaFile)> {
    let meta = load_meta(paths)?;
    if meta.version != INDEX_FORMAT_VERSION {
        bail!("index format version {} is not supported (expected {})", meta.version, INDEX_FORMAT_VERSION);
    }
    let index = load_index(paths)?;
    if index.num_docs != meta.num_docs {
        bail!("index holds {} documents but meta.json says {}", index.num_docs, meta.num_docs);
    }
    Ok((index, meta))
}

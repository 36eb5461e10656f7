//! Build and load configuration, plus the fixed file layout of a store
//! directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::arena::DEFAULT_PAGE_SIZE;

// ============================================================================
// Build configuration
// ============================================================================

/// Options for [`crate::builder::build_store`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// A subject's buffered text is flushed as its own chunk once it grows
    /// past this many UTF-16 code units.
    pub split_threshold_chars: usize,
    /// Predicates dropped before grouping.
    pub excluded_predicates: Vec<String>,
    /// Predicate prefixes dropped before grouping.
    pub excluded_domains: Vec<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            split_threshold_chars: 250 * 1024 * 1024,
            excluded_predicates: [
                "type.object.key",
                "type.object.permission",
                "common.topic.image",
                "common.topic.topic_equivalent_webpage",
                "common.topic.topical_webpage",
                "en",
                "base.ranker.rankerurlname",
                "type.object.type",
                "common.topic.description",
            ]
            .map(String::from)
            .to_vec(),
            excluded_domains: ["authority.", "imdb.", "internet.", "source."]
                .map(String::from)
                .to_vec(),
        }
    }
}

impl BuildConfig {
    pub fn is_excluded(&self, predicate: &str) -> bool {
        self.excluded_predicates.iter().any(|p| p == predicate)
            || self
                .excluded_domains
                .iter()
                .any(|d| predicate.starts_with(d.as_str()))
    }
}

// ============================================================================
// Store configuration
// ============================================================================

/// Where a built store lives and how to bring its data file into memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub dir: PathBuf,
    /// Page capacity in bytes.
    pub page_size: usize,
    /// Memory-map `datapages.bin` instead of reading it into owned pages.
    pub mmap: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            page_size: DEFAULT_PAGE_SIZE,
            mmap: false,
        }
    }
}

impl StoreConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::default()
        }
    }

    pub fn files(&self) -> StoreFiles {
        StoreFiles::in_dir(&self.dir)
    }
}

// ============================================================================
// File layout
// ============================================================================

/// Paths of every file that makes up a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreFiles {
    pub primary: PathBuf,
    pub overflow: PathBuf,
    pub cvt: PathBuf,
    pub names: PathBuf,
    pub data: PathBuf,
    pub predicate_types: PathBuf,
    pub ghosts: PathBuf,
}

impl StoreFiles {
    pub const PRIMARY: &'static str = "midToOffset.bin";
    pub const OVERFLOW: &'static str = "largeMidToOffset.bin";
    pub const CVT: &'static str = "cvtnodes.bin";
    pub const NAMES: &'static str = "namesTable.bin";
    pub const DATA: &'static str = "datapages.bin";
    pub const PREDICATE_TYPES: &'static str = "predicate.objtype.txt";
    pub const GHOSTS: &'static str = "ghost_mid.txt";

    pub fn in_dir(dir: &Path) -> Self {
        Self {
            primary: dir.join(Self::PRIMARY),
            overflow: dir.join(Self::OVERFLOW),
            cvt: dir.join(Self::CVT),
            names: dir.join(Self::NAMES),
            data: dir.join(Self::DATA),
            predicate_types: dir.join(Self::PREDICATE_TYPES),
            ghosts: dir.join(Self::GHOSTS),
        }
    }

    /// The files written by the index builder.
    pub fn built(&self) -> [&Path; 5] {
        [
            &self.primary,
            &self.overflow,
            &self.cvt,
            &self.names,
            &self.data,
        ]
    }
}

/// Triple files produced by the trimmer, in build order.
pub const TRIPLE_FILES: [&str; 2] = ["fb_en.txt", "fb_en_nonM.txt"];

/// Resolve [`TRIPLE_FILES`] against `dir`, skipping any that do not exist.
pub fn triple_files_in(dir: &Path) -> Vec<PathBuf> {
    TRIPLE_FILES
        .iter()
        .map(|name| dir.join(name))
        .filter(|path| path.exists())
        .collect()
}

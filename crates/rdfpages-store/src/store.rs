//! A loaded store: every resident table plus the page arena, immutable once
//! opened.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::arena::PageArena;
use crate::codec::{decompress, parse_pairs};
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::tables::{
    CvtTable, GhostSet, IndexTables, NamesTable, OverflowIndex, PredicateTypeTable, PrimaryIndex,
};

#[derive(Debug)]
pub struct Store {
    tables: IndexTables,
    arena: PageArena,
}

impl Store {
    /// Load every table from `config.dir` and bring the data file into
    /// memory. Any failure is fatal: a store that opened is complete.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let files = config.files();
        tracing::info!(dir = %config.dir.display(), "loading store");

        let ghosts = load_optional(&files.ghosts, GhostSet::read_from)?;
        let predicate_types =
            load_optional(&files.predicate_types, PredicateTypeTable::read_from)?;
        tracing::info!("reading names table");
        let names = load_required(&files.names, NamesTable::read_from)?;
        tracing::info!("reading index");
        let primary = load_required(&files.primary, PrimaryIndex::read_from)?;
        let overflow = load_required(&files.overflow, OverflowIndex::read_from)?;
        let cvt = load_required(&files.cvt, CvtTable::read_from)?;

        let tables = IndexTables {
            primary,
            overflow,
            cvt,
            names,
            predicate_types,
            ghosts,
        };
        tables
            .validate()
            .map_err(|e| e.while_loading(&files.overflow))?;

        let arena = if config.mmap {
            PageArena::map_file(&files.data, config.page_size)
        } else {
            PageArena::read_file(&files.data, config.page_size)
        }
        .map_err(|e| e.while_loading(&files.data))?;

        tracing::info!(
            subjects = tables.primary.len(),
            split_subjects = tables.overflow.len(),
            cvts = tables.cvt.len(),
            names = tables.names.len(),
            typed_predicates = tables.predicate_types.len(),
            ghosts = tables.ghosts.len(),
            data_bytes = arena.len(),
            pages = arena.page_count(),
            "store loaded"
        );
        Ok(Self { tables, arena })
    }

    /// Assemble a store from tables and an arena already in memory.
    pub fn from_parts(tables: IndexTables, arena: PageArena) -> Result<Self> {
        tables.validate()?;
        Ok(Self { tables, arena })
    }

    pub fn tables(&self) -> &IndexTables {
        &self.tables
    }

    pub fn arena(&self) -> &PageArena {
        &self.arena
    }

    /// Every `(predicate, object)` stored for `subject`, in file order.
    /// Unknown subjects have no triples.
    pub fn triple_lines(&self, subject: &str) -> Result<Vec<(String, String)>> {
        let Some(chunks) = self.tables.locate(subject) else {
            return Ok(Vec::new());
        };
        let mut pairs = Vec::new();
        for (offset, length) in chunks.ranges() {
            let bytes = self
                .arena
                .read_range(offset, length)
                .map_err(|e| StoreError::malformed(subject, e))?;
            let text = decompress(subject, &bytes)?;
            pairs.extend(parse_pairs(&text));
        }
        Ok(pairs)
    }
}

fn load_required<T>(path: &Path, read: impl FnOnce(BufReader<File>) -> Result<T>) -> Result<T> {
    File::open(path)
        .map_err(StoreError::from)
        .and_then(|file| read(BufReader::new(file)))
        .map_err(|e| e.while_loading(path))
}

/// Text side tables are produced after the build; a store without them
/// serves queries with no type cross-check or ghost filtering.
fn load_optional<T: Default, R>(path: &Path, read: R) -> Result<T>
where
    R: FnOnce(BufReader<File>) -> Result<T>,
{
    if !path.exists() {
        tracing::warn!(path = %path.display(), "side table missing; using an empty table");
        return Ok(T::default());
    }
    load_required(path, read)
}

// ============================================================================
// Shared initialization
// ============================================================================

/// One-time guarded store initialization shared across threads.
///
/// The first caller of [`SharedStore::get_or_init`] loads the store while
/// holding the write lock; concurrent callers wait and then reuse it. A
/// failed load leaves the slot empty and returns the error.
pub struct SharedStore {
    config: StoreConfig,
    slot: RwLock<Option<Arc<Store>>>,
}

impl SharedStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            slot: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn get(&self) -> Option<Arc<Store>> {
        self.slot.read().clone()
    }

    pub fn get_or_init(&self) -> Result<Arc<Store>> {
        if let Some(store) = self.slot.read().as_ref() {
            return Ok(Arc::clone(store));
        }
        let mut slot = self.slot.write();
        if let Some(store) = slot.as_ref() {
            return Ok(Arc::clone(store));
        }
        let store = Arc::new(Store::open(&self.config).inspect_err(|e| {
            tracing::error!(error = %e, "store initialization failed");
        })?);
        *slot = Some(Arc::clone(&store));
        Ok(store)
    }
}

impl std::fmt::Debug for SharedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedStore")
            .field("dir", &self.config.dir)
            .field("loaded", &self.slot.read().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{build_store, write_tables};
    use crate::config::BuildConfig;
    use crate::tables::{ChunkLocation, OverflowEntry};

    fn tiny_store(dir: &Path) -> StoreConfig {
        let input = dir.join("fb_en.txt");
        std::fs::write(
            &input,
            "m.a\ttype.object.name\tAlpha\nm.a\tp.q\tm.b\nm.b\ttype.object.name\tBeta\n",
        )
        .unwrap();
        build_store(&BuildConfig::default(), dir, &[input]).unwrap();
        StoreConfig {
            page_size: 8,
            ..StoreConfig::new(dir)
        }
    }

    #[test]
    fn test_open_without_side_tables() {
        let dir = tempfile::tempdir().unwrap();
        let config = tiny_store(dir.path());
        let store = Store::open(&config).unwrap();
        assert!(store.tables().ghosts.is_empty());
        assert!(store.tables().predicate_types.is_empty());
        assert_eq!(
            store.triple_lines("m.a").unwrap(),
            vec![
                ("type.object.name".to_string(), "Alpha".to_string()),
                ("p.q".to_string(), "m.b".to_string()),
            ]
        );
        assert!(store.triple_lines("m.unknown").unwrap().is_empty());
    }

    #[test]
    fn test_mapped_and_owned_agree() {
        let dir = tempfile::tempdir().unwrap();
        let config = tiny_store(dir.path());
        let owned = Store::open(&config).unwrap();
        let mapped = Store::open(&StoreConfig {
            mmap: true,
            ..config
        })
        .unwrap();
        assert_eq!(
            owned.triple_lines("m.b").unwrap(),
            mapped.triple_lines("m.b").unwrap()
        );
    }

    #[test]
    fn test_missing_table_is_initialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = tiny_store(dir.path());
        std::fs::remove_file(config.files().cvt).unwrap();
        let err = Store::open(&config).unwrap_err();
        assert!(matches!(err, StoreError::Initialization { ref file, .. } if file.ends_with("cvtnodes.bin")));
    }

    #[test]
    fn test_corrupt_side_table_is_initialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = tiny_store(dir.path());
        std::fs::write(config.files().predicate_types, "p\tnot-a-number\t0\t0\n").unwrap();
        assert!(matches!(
            Store::open(&config),
            Err(StoreError::Initialization { .. })
        ));
    }

    #[test]
    fn test_inconsistent_overflow_entry_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = tiny_store(dir.path());
        let files = config.files();
        let mut tables = IndexTables::default();
        tables
            .primary
            .insert_new("m.a", ChunkLocation { offset: 0, length: 10 });
        tables.overflow.insert_new(
            "m.a",
            OverflowEntry {
                offset: 4,
                chunk_lengths: vec![3, 3],
            },
        );
        write_tables(&tables, &files).unwrap();
        assert!(matches!(
            Store::open(&config),
            Err(StoreError::Initialization { ref file, .. }) if file.ends_with("largeMidToOffset.bin")
        ));
    }

    #[test]
    fn test_corrupt_chunk_is_malformed() {
        let garbage = b"definitely not a gzip stream";
        let mut arena = PageArena::new(4);
        arena.append(garbage).unwrap();
        let mut tables = IndexTables::default();
        tables.primary.insert_new(
            "m.a",
            ChunkLocation {
                offset: 0,
                length: garbage.len() as u32,
            },
        );
        let store = Store::from_parts(tables, arena).unwrap();
        assert!(matches!(
            store.triple_lines("m.a"),
            Err(StoreError::MalformedChunk { .. })
        ));
    }

    #[test]
    fn test_shared_store_initializes_once() {
        let dir = tempfile::tempdir().unwrap();
        let shared = Arc::new(SharedStore::new(tiny_store(dir.path())));
        assert!(shared.get().is_none());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || shared.get_or_init().unwrap())
            })
            .collect();
        let stores: Vec<Arc<Store>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for store in &stores[1..] {
            assert!(Arc::ptr_eq(store, &stores[0]));
        }
        assert!(shared.get().is_some());
    }

    #[test]
    fn test_shared_store_failure_leaves_slot_empty() {
        let dir = tempfile::tempdir().unwrap();
        let shared = SharedStore::new(StoreConfig::new(dir.path().join("nope")));
        assert!(shared.get_or_init().is_err());
        assert!(shared.get().is_none());
    }
}

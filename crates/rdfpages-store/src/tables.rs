//! Resident lookup tables.
//!
//! Every table here is built once by the [`crate::builder`], persisted in the
//! binary layouts below, and loaded fully into memory at startup:
//!
//! | file                    | shape                                                        |
//! |-------------------------|--------------------------------------------------------------|
//! | `midToOffset.bin`       | buckets; per bucket: key, n, n × (subject, i64 offset, i32 length) |
//! | `largeMidToOffset.bin`  | n × (subject, i64 offset, i32 k, k × i32 chunk length)        |
//! | `cvtnodes.bin`          | buckets; per bucket: key, n, n × (subject, bool)              |
//! | `namesTable.bin`        | n × (key, value)                                             |
//! | `predicate.objtype.txt` | `predicate \t values \t entities \t cvts` lines               |
//! | `ghost_mid.txt`         | one id per line                                              |
//!
//! Tables are written in sorted key order so identical inputs produce
//! identical files.

use std::collections::BTreeMap;
use std::io::{BufRead, Read, Write};

use ahash::{AHashMap, AHashSet};

use crate::binfmt::{TableReader, TableWriter};
use crate::bucket::{is_mid_shaped, subject_key};
use crate::error::{Result, StoreError};
use crate::graph::NodeKind;

// ============================================================================
// Chunk locations
// ============================================================================

/// Where one subject's compressed data lives in the page arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLocation {
    pub offset: u64,
    pub length: u32,
}

/// A subject split across several sequential chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverflowEntry {
    pub offset: u64,
    pub chunk_lengths: Vec<u32>,
}

impl OverflowEntry {
    pub fn total_length(&self) -> u64 {
        self.chunk_lengths.iter().map(|&l| l as u64).sum()
    }
}

/// The chunk ranges to read for one subject, in order.
#[derive(Debug, Clone, Copy)]
pub enum SubjectChunks<'a> {
    Single(ChunkLocation),
    Split(&'a OverflowEntry),
}

impl SubjectChunks<'_> {
    /// Absolute `(offset, length)` ranges; each chunk starts where the
    /// previous one ended.
    pub fn ranges(&self) -> Vec<(u64, u32)> {
        match self {
            SubjectChunks::Single(loc) => vec![(loc.offset, loc.length)],
            SubjectChunks::Split(entry) => {
                let mut offset = entry.offset;
                entry
                    .chunk_lengths
                    .iter()
                    .map(|&length| {
                        let range = (offset, length);
                        offset += length as u64;
                        range
                    })
                    .collect()
            }
        }
    }
}

fn offset_to_i64(offset: u64) -> Result<i64> {
    i64::try_from(offset).map_err(|_| StoreError::format(format!("offset {offset} exceeds i64")))
}

fn offset_from_i64(offset: i64) -> Result<u64> {
    u64::try_from(offset).map_err(|_| StoreError::format(format!("negative offset {offset}")))
}

fn length_from_i32(length: i32) -> Result<u32> {
    u32::try_from(length).map_err(|_| StoreError::format(format!("negative length {length}")))
}

/// Lengths are persisted as i32; a summed length beyond that is clamped.
fn length_to_i32(length: u32) -> i32 {
    length.min(i32::MAX as u32) as i32
}

// ============================================================================
// Bucketed tables
// ============================================================================

/// Two-level map: bucket key → subject → value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucketed<V> {
    buckets: AHashMap<String, AHashMap<String, V>>,
}

impl<V> Default for Bucketed<V> {
    fn default() -> Self {
        Self {
            buckets: AHashMap::new(),
        }
    }
}

impl<V> Bucketed<V> {
    pub fn get(&self, subject: &str) -> Option<&V> {
        self.buckets.get(subject_key(subject))?.get(subject)
    }

    pub fn contains(&self, subject: &str) -> bool {
        self.get(subject).is_some()
    }

    /// Insert, returning `false` (and leaving the table unchanged) if the
    /// subject is already present.
    pub fn insert_new(&mut self, subject: &str, value: V) -> bool {
        let bucket = self
            .buckets
            .entry(subject_key(subject).to_string())
            .or_default();
        if bucket.contains_key(subject) {
            return false;
        }
        bucket.insert(subject.to_string(), value);
        true
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(|b| b.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.values().all(|b| b.is_empty())
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.buckets
            .values()
            .flat_map(|b| b.iter().map(|(k, v)| (k.as_str(), v)))
    }

    fn sorted(&self) -> BTreeMap<&str, BTreeMap<&str, &V>> {
        self.buckets
            .iter()
            .map(|(key, bucket)| {
                (
                    key.as_str(),
                    bucket.iter().map(|(s, v)| (s.as_str(), v)).collect(),
                )
            })
            .collect()
    }

    fn write_with<W: Write>(
        &self,
        out: W,
        mut write_value: impl FnMut(&mut TableWriter<W>, &V) -> Result<()>,
    ) -> Result<W> {
        let mut w = TableWriter::new(out);
        let sorted = self.sorted();
        w.write_count(sorted.len())?;
        for (key, bucket) in sorted {
            w.write_str(key)?;
            w.write_count(bucket.len())?;
            for (subject, value) in bucket {
                w.write_str(subject)?;
                write_value(&mut w, value)?;
            }
        }
        w.finish()
    }

    fn read_with<R: Read>(
        input: R,
        mut read_value: impl FnMut(&mut TableReader<R>) -> Result<V>,
    ) -> Result<Self> {
        let mut r = TableReader::new(input);
        let bucket_count = r.read_count()?;
        let mut buckets = AHashMap::with_capacity(bucket_count);
        for _ in 0..bucket_count {
            let key = r.read_string()?;
            let count = r.read_count()?;
            let mut bucket = AHashMap::with_capacity(count);
            for _ in 0..count {
                let subject = r.read_string()?;
                let value = read_value(&mut r)?;
                if subject_key(&subject) != key {
                    return Err(StoreError::format(format!(
                        "subject `{subject}` filed under bucket `{key}`"
                    )));
                }
                bucket.insert(subject, value);
            }
            if buckets.insert(key.clone(), bucket).is_some() {
                return Err(StoreError::format(format!("duplicate bucket `{key}`")));
            }
        }
        r.expect_end()?;
        Ok(Self { buckets })
    }
}

/// Primary location index: subject → single chunk location.
pub type PrimaryIndex = Bucketed<ChunkLocation>;

impl PrimaryIndex {
    pub fn write_to<W: Write>(&self, out: W) -> Result<W> {
        self.write_with(out, |w, loc| {
            w.write_i64(offset_to_i64(loc.offset)?)?;
            w.write_i32(length_to_i32(loc.length))
        })
    }

    pub fn read_from<R: Read>(input: R) -> Result<Self> {
        Self::read_with(input, |r| {
            let offset = offset_from_i64(r.read_i64()?)?;
            let length = length_from_i32(r.read_i32()?)?;
            Ok(ChunkLocation { offset, length })
        })
    }
}

/// CVT flags: subject → true for subjects observed without a name.
pub type CvtTable = Bucketed<bool>;

impl CvtTable {
    pub fn is_cvt(&self, subject: &str) -> bool {
        self.get(subject).copied().unwrap_or(false)
    }

    pub fn write_to<W: Write>(&self, out: W) -> Result<W> {
        self.write_with(out, |w, flag| w.write_bool(*flag))
    }

    pub fn read_from<R: Read>(input: R) -> Result<Self> {
        Self::read_with(input, |r| r.read_bool())
    }
}

// ============================================================================
// Overflow index
// ============================================================================

/// Subjects whose data was split into multiple chunks during the build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverflowIndex {
    entries: AHashMap<String, OverflowEntry>,
}

impl OverflowIndex {
    pub fn get(&self, subject: &str) -> Option<&OverflowEntry> {
        self.entries.get(subject)
    }

    pub fn insert_new(&mut self, subject: &str, entry: OverflowEntry) -> bool {
        if self.entries.contains_key(subject) {
            return false;
        }
        self.entries.insert(subject.to_string(), entry);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OverflowEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn write_to<W: Write>(&self, out: W) -> Result<W> {
        let mut w = TableWriter::new(out);
        let sorted: BTreeMap<_, _> = self.entries.iter().collect();
        w.write_count(sorted.len())?;
        for (subject, entry) in sorted {
            w.write_str(subject)?;
            w.write_i64(offset_to_i64(entry.offset)?)?;
            w.write_count(entry.chunk_lengths.len())?;
            for &length in &entry.chunk_lengths {
                w.write_i32(length_to_i32(length))?;
            }
        }
        w.finish()
    }

    pub fn read_from<R: Read>(input: R) -> Result<Self> {
        let mut r = TableReader::new(input);
        let count = r.read_count()?;
        let mut entries = AHashMap::with_capacity(count);
        for _ in 0..count {
            let subject = r.read_string()?;
            let offset = offset_from_i64(r.read_i64()?)?;
            let chunks = r.read_count()?;
            let chunk_lengths = (0..chunks)
                .map(|_| length_from_i32(r.read_i32()?))
                .collect::<Result<Vec<_>>>()?;
            entries.insert(
                subject,
                OverflowEntry {
                    offset,
                    chunk_lengths,
                },
            );
        }
        r.expect_end()?;
        Ok(Self { entries })
    }
}

// ============================================================================
// Names table
// ============================================================================

/// Display names by MID.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamesTable {
    names: AHashMap<String, String>,
}

impl NamesTable {
    pub fn get(&self, mid: &str) -> Option<&str> {
        self.names.get(mid).map(String::as_str)
    }

    pub fn has_name(&self, mid: &str) -> bool {
        self.get(mid).is_some_and(|n| !n.is_empty())
    }

    /// Later names for the same MID overwrite earlier ones.
    pub fn insert(&mut self, mid: &str, name: &str) {
        self.names.insert(mid.to_string(), name.to_string());
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn write_to<W: Write>(&self, out: W) -> Result<W> {
        let mut w = TableWriter::new(out);
        let sorted: BTreeMap<_, _> = self.names.iter().collect();
        w.write_count(sorted.len())?;
        for (key, value) in sorted {
            w.write_str(key)?;
            w.write_str(value)?;
        }
        w.finish()
    }

    pub fn read_from<R: Read>(input: R) -> Result<Self> {
        let mut r = TableReader::new(input);
        let count = r.read_count()?;
        let mut names = AHashMap::with_capacity(count);
        for _ in 0..count {
            let key = r.read_string()?;
            let value = r.read_string()?;
            names.insert(key, value);
        }
        r.expect_end()?;
        Ok(Self { names })
    }
}

// ============================================================================
// Predicate object types
// ============================================================================

/// How often a predicate's objects were values, entities or CVTs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PredicateTypeCounts {
    pub values: u64,
    pub entities: u64,
    pub cvts: u64,
}

impl PredicateTypeCounts {
    pub fn record(&mut self, kind: NodeKind) {
        match kind {
            NodeKind::Value => self.values += 1,
            NodeKind::Entity => self.entities += 1,
            NodeKind::Cvt => self.cvts += 1,
        }
    }

    /// The dominant object kind, or `None` when the predicate is used with a
    /// single kind only (nothing to arbitrate). Ties favor value, then entity.
    pub fn majority(&self) -> Option<NodeKind> {
        let used = [self.values, self.entities, self.cvts]
            .iter()
            .filter(|&&c| c > 0)
            .count();
        if used < 2 {
            return None;
        }
        Some(if self.values >= self.entities.max(self.cvts) {
            NodeKind::Value
        } else if self.entities >= self.values.max(self.cvts) {
            NodeKind::Entity
        } else {
            NodeKind::Cvt
        })
    }
}

/// Predicate → majority object kind, for predicates used inconsistently.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PredicateTypeTable {
    types: AHashMap<String, NodeKind>,
}

impl PredicateTypeTable {
    pub fn get(&self, predicate: &str) -> Option<NodeKind> {
        self.types.get(predicate).copied()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn from_counts<'a>(
        counts: impl IntoIterator<Item = (&'a str, PredicateTypeCounts)>,
    ) -> Self {
        let types = counts
            .into_iter()
            .filter_map(|(p, c)| c.majority().map(|kind| (p.to_string(), kind)))
            .collect();
        Self { types }
    }

    /// Parse `predicate.objtype.txt`.
    pub fn read_from<R: BufRead>(input: R) -> Result<Self> {
        let mut types = AHashMap::new();
        for (lineno, line) in input.lines().enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let (predicate, counts) = parse_count_line(&line).ok_or_else(|| {
                StoreError::format(format!("line {}: malformed count line `{line}`", lineno + 1))
            })?;
            if let Some(kind) = counts.majority() {
                types.insert(predicate.to_string(), kind);
            }
        }
        Ok(Self { types })
    }
}

fn parse_count_line(line: &str) -> Option<(&str, PredicateTypeCounts)> {
    let mut fields = line.split('\t');
    let predicate = fields.next()?;
    let values = fields.next()?.trim().parse().ok()?;
    let entities = fields.next()?.trim().parse().ok()?;
    let cvts = fields.next()?.trim().parse().ok()?;
    Some((
        predicate,
        PredicateTypeCounts {
            values,
            entities,
            cvts,
        },
    ))
}

/// Write `predicate.objtype.txt`, sorted by predicate.
pub fn write_predicate_counts<'a, W: Write>(
    mut out: W,
    counts: impl IntoIterator<Item = (&'a str, &'a PredicateTypeCounts)>,
) -> Result<W> {
    let sorted: BTreeMap<_, _> = counts.into_iter().collect();
    for (predicate, c) in sorted {
        writeln!(out, "{predicate}\t{}\t{}\t{}", c.values, c.entities, c.cvts)?;
    }
    out.flush()?;
    Ok(out)
}

// ============================================================================
// Ghost ids
// ============================================================================

/// MID-shaped ids that never resolve to a named subject.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GhostSet {
    ids: AHashSet<String>,
}

impl GhostSet {
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn read_from<R: BufRead>(input: R) -> Result<Self> {
        let mut ids = AHashSet::new();
        for line in input.lines() {
            let line = line?;
            let id = line.trim_end_matches('\r');
            if !id.is_empty() {
                ids.insert(id.to_string());
            }
        }
        Ok(Self { ids })
    }
}

impl FromIterator<String> for GhostSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

// ============================================================================
// All tables
// ============================================================================

/// Every resident table the query engine consults.
#[derive(Debug, Clone, Default)]
pub struct IndexTables {
    pub primary: PrimaryIndex,
    pub overflow: OverflowIndex,
    pub cvt: CvtTable,
    pub names: NamesTable,
    pub predicate_types: PredicateTypeTable,
    pub ghosts: GhostSet,
}

impl IndexTables {
    /// Resolve the chunk(s) holding `subject`. Overflow entries win.
    pub fn locate(&self, subject: &str) -> Option<SubjectChunks<'_>> {
        if let Some(entry) = self.overflow.get(subject) {
            return Some(SubjectChunks::Split(entry));
        }
        self.primary.get(subject).copied().map(SubjectChunks::Single)
    }

    pub fn is_cvt(&self, id: &str) -> bool {
        self.cvt.is_cvt(id)
    }

    pub fn name(&self, mid: &str) -> Option<&str> {
        self.names.get(mid).filter(|n| !n.is_empty())
    }

    /// Entity-looking ids: MID-shaped, `en.` keys, or anything with a name.
    pub fn is_entity(&self, id: &str) -> bool {
        is_mid_shaped(id) || id.starts_with("en.") || self.names.has_name(id)
    }

    /// Classify an object string from the tables alone.
    pub fn object_kind(&self, object: &str) -> NodeKind {
        if self.is_cvt(object) {
            NodeKind::Cvt
        } else if self.is_entity(object) {
            NodeKind::Entity
        } else {
            NodeKind::Value
        }
    }

    /// Every overflow subject must also be committed in the primary index at
    /// the same offset with the summed length.
    pub fn validate(&self) -> Result<()> {
        for (subject, entry) in self.overflow.iter() {
            let Some(loc) = self.primary.get(subject) else {
                return Err(StoreError::format(format!(
                    "overflow subject `{subject}` missing from the primary index"
                )));
            };
            let expected = entry.total_length().min(i32::MAX as u64) as u32;
            if loc.offset != entry.offset || loc.length != expected {
                return Err(StoreError::format(format!(
                    "overflow subject `{subject}` disagrees with primary index: \
                     {}+{} vs {}+{}",
                    entry.offset, expected, loc.offset, loc.length
                )));
            }
        }
        Ok(())
    }
}

//! Index builder.
//!
//! Consumes a subject-grouped triple stream (all triples of a subject are
//! contiguous), compresses each subject's `predicate\tobject` lines into one
//! or more chunks appended to `datapages.bin`, and records where they went:
//!
//! - every subject gets a primary entry at the offset its data began, with
//!   the summed compressed length;
//! - subjects whose text outgrew the split threshold were flushed as several
//!   chunks and also get an overflow entry listing each chunk's length;
//! - subjects that never carried a `type.object.name` triple are CVTs;
//! - the last `type.object.name` seen for a subject is its name.
//!
//! A subject appearing in two separate runs is a build error. Any error
//! aborts the build and removes the partial output files.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::arena::ArenaWriter;
use crate::codec::{self, push_line};
use crate::config::{BuildConfig, StoreFiles};
use crate::error::{Result, StoreError};
use crate::tables::{ChunkLocation, IndexTables, OverflowEntry};
use crate::triples::{Triple, TripleReader};

pub const NAME_PREDICATE: &str = "type.object.name";

const PROGRESS_EVERY_SUBJECTS: u64 = 1_000_000;

// ============================================================================
// Statistics
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildStats {
    /// Input lines consumed, excluded ones included.
    pub lines_read: u64,
    /// Triples dropped by the predicate/domain exclusion lists.
    pub triples_excluded: u64,
    pub triples_indexed: u64,
    pub subjects: u64,
    /// Subjects stored as more than one chunk.
    pub split_subjects: u64,
    pub cvt_subjects: u64,
    pub chunks: u64,
    /// UTF-16 bytes before compression.
    pub uncompressed_bytes: u64,
    pub compressed_bytes: u64,
}

impl BuildStats {
    pub fn avg_compressed(&self) -> f64 {
        ratio(self.compressed_bytes, self.subjects)
    }

    pub fn avg_uncompressed(&self) -> f64 {
        ratio(self.uncompressed_bytes, self.subjects)
    }
}

fn ratio(total: u64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        total as f64 / count as f64
    }
}

// ============================================================================
// Builder
// ============================================================================

/// The subject currently being accumulated.
#[derive(Debug)]
struct SubjectRun {
    subject: String,
    start: u64,
    buffer: String,
    buffered_units: usize,
    chunk_lengths: Vec<u32>,
    is_cvt: bool,
}

impl SubjectRun {
    fn new(subject: &str, start: u64) -> Self {
        Self {
            subject: subject.to_string(),
            start,
            buffer: String::new(),
            buffered_units: 0,
            chunk_lengths: Vec::new(),
            is_cvt: true,
        }
    }
}

/// Streaming builder over any chunk sink.
pub struct IndexBuilder<W: Write> {
    config: BuildConfig,
    data: ArenaWriter<W>,
    tables: IndexTables,
    run: Option<SubjectRun>,
    stats: BuildStats,
}

impl<W: Write> IndexBuilder<W> {
    pub fn new(config: BuildConfig, data: W) -> Self {
        Self {
            config,
            data: ArenaWriter::new(data),
            tables: IndexTables::default(),
            run: None,
            stats: BuildStats::default(),
        }
    }

    pub fn stats(&self) -> &BuildStats {
        &self.stats
    }

    /// Feed one triple. Subject changes commit the previous subject.
    pub fn push(&mut self, triple: &Triple) -> Result<()> {
        self.stats.lines_read += 1;
        if self.config.is_excluded(&triple.predicate) {
            self.stats.triples_excluded += 1;
            return Ok(());
        }

        let same_subject = self
            .run
            .as_ref()
            .is_some_and(|run| run.subject == triple.subject);
        if !same_subject {
            if let Some(run) = self.run.take() {
                self.commit(run)?;
            }
            self.run = Some(SubjectRun::new(&triple.subject, self.data.position()));
        }
        let Some(run) = self.run.as_mut() else {
            return Err(StoreError::build("no subject run open"));
        };

        run.buffered_units += push_line(&mut run.buffer, &triple.predicate, &triple.object);
        self.stats.triples_indexed += 1;

        if triple.predicate == NAME_PREDICATE {
            run.is_cvt = false;
            self.tables.names.insert(&triple.subject, &triple.object);
        }

        if run.buffered_units > self.config.split_threshold_chars {
            if run.chunk_lengths.is_empty() {
                tracing::info!(subject = %run.subject, "splitting large subject");
            }
            Self::flush_chunk(&mut self.data, &mut self.stats, run)?;
        }
        Ok(())
    }

    /// Commit the last subject and hand back the tables and the data sink.
    pub fn finish(mut self) -> Result<(IndexTables, W, BuildStats)> {
        if let Some(run) = self.run.take() {
            self.commit(run)?;
        }
        let data = self.data.into_inner()?;
        Ok((self.tables, data, self.stats))
    }

    fn flush_chunk(
        data: &mut ArenaWriter<W>,
        stats: &mut BuildStats,
        run: &mut SubjectRun,
    ) -> Result<()> {
        let blob = codec::compress(&run.buffer)?;
        let length = u32::try_from(blob.len()).map_err(|_| {
            StoreError::build(format!(
                "chunk of {} bytes for `{}` exceeds u32",
                blob.len(),
                run.subject
            ))
        })?;
        data.append(&blob)?;
        run.chunk_lengths.push(length);
        stats.chunks += 1;
        stats.uncompressed_bytes += run.buffered_units as u64 * 2;
        stats.compressed_bytes += length as u64;
        run.buffer.clear();
        run.buffered_units = 0;
        Ok(())
    }

    fn commit(&mut self, mut run: SubjectRun) -> Result<()> {
        // A subject that was split exactly at its last line has nothing left.
        if run.chunk_lengths.is_empty() || !run.buffer.is_empty() {
            Self::flush_chunk(&mut self.data, &mut self.stats, &mut run)?;
        }

        let total: u64 = run.chunk_lengths.iter().map(|&l| l as u64).sum();
        let location = ChunkLocation {
            offset: run.start,
            length: total.min(i32::MAX as u64) as u32,
        };
        if !self.tables.primary.insert_new(&run.subject, location) {
            return Err(StoreError::build(format!(
                "duplicate runs for subject `{}`; input must be grouped by subject",
                run.subject
            )));
        }
        if run.is_cvt {
            self.tables.cvt.insert_new(&run.subject, true);
            self.stats.cvt_subjects += 1;
        }
        if run.chunk_lengths.len() > 1 {
            self.stats.split_subjects += 1;
            self.tables.overflow.insert_new(
                &run.subject,
                OverflowEntry {
                    offset: run.start,
                    chunk_lengths: run.chunk_lengths,
                },
            );
        }

        self.stats.subjects += 1;
        if self.stats.subjects % PROGRESS_EVERY_SUBJECTS == 0 {
            tracing::info!(
                lines = self.stats.lines_read,
                subjects = self.stats.subjects,
                avg_compressed = %format!("{:.1}", self.stats.avg_compressed()),
                avg_uncompressed = %format!("{:.1}", self.stats.avg_uncompressed()),
                "build progress"
            );
        }
        Ok(())
    }
}

// ============================================================================
// Persisting
// ============================================================================

/// Write the four builder tables next to the data file.
pub fn write_tables(tables: &IndexTables, files: &StoreFiles) -> Result<()> {
    tables.primary.write_to(create(&files.primary)?)?;
    tables.overflow.write_to(create(&files.overflow)?)?;
    tables.cvt.write_to(create(&files.cvt)?)?;
    tables.names.write_to(create(&files.names)?)?;
    Ok(())
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).map_err(|e| {
        StoreError::build(format!("cannot create `{}`: {e}", path.display()))
    })?;
    Ok(BufWriter::new(file))
}

/// Build a complete store in `out_dir` from `inputs`, read in order.
pub fn build_store(config: &BuildConfig, out_dir: &Path, inputs: &[PathBuf]) -> Result<BuildStats> {
    fs::create_dir_all(out_dir)?;
    let files = StoreFiles::in_dir(out_dir);
    tracing::info!(
        out_dir = %out_dir.display(),
        inputs = inputs.len(),
        "building store"
    );

    match run_build(config, &files, inputs) {
        Ok(stats) => {
            tracing::info!(
                subjects = stats.subjects,
                split = stats.split_subjects,
                cvts = stats.cvt_subjects,
                compressed_bytes = stats.compressed_bytes,
                "build complete"
            );
            Ok(stats)
        }
        Err(err) => {
            tracing::error!(error = %err, "build aborted; removing partial output");
            for path in files.built() {
                let _ = fs::remove_file(path);
            }
            Err(err)
        }
    }
}

fn run_build(config: &BuildConfig, files: &StoreFiles, inputs: &[PathBuf]) -> Result<BuildStats> {
    let mut builder = IndexBuilder::new(config.clone(), create(&files.data)?);
    let mut reader = TripleReader::open(inputs);
    for triple in reader.by_ref() {
        builder.push(&triple?)?;
    }
    let (tables, _data, stats) = builder.finish()?;
    debug_assert_eq!(stats.lines_read, reader.lines_read());
    write_tables(&tables, files)?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decompress, parse_pairs};

    fn triple(s: &str, p: &str, o: &str) -> Triple {
        Triple::new(s, p, o)
    }

    fn build(config: BuildConfig, triples: &[Triple]) -> Result<(IndexTables, Vec<u8>, BuildStats)> {
        let mut builder = IndexBuilder::new(config, Vec::new());
        for t in triples {
            builder.push(t)?;
        }
        builder.finish()
    }

    fn read_pairs(data: &[u8], tables: &IndexTables, subject: &str) -> Vec<(String, String)> {
        let chunks = tables.locate(subject).unwrap();
        let mut pairs = Vec::new();
        for (offset, length) in chunks.ranges() {
            let bytes = &data[offset as usize..offset as usize + length as usize];
            pairs.extend(parse_pairs(&decompress(subject, bytes).unwrap()));
        }
        pairs
    }

    #[test]
    fn test_names_and_cvt_flags() {
        let (tables, _, stats) = build(
            BuildConfig::default(),
            &[
                triple("m.a", "type.object.name", "First"),
                triple("m.a", "type.object.name", "Alpha"),
                triple("m.a", "p.q", "m.cvt"),
                triple("m.cvt", "p.r", "1984"),
            ],
        )
        .unwrap();

        assert_eq!(tables.names.get("m.a"), Some("Alpha"));
        assert!(!tables.is_cvt("m.a"));
        assert!(tables.is_cvt("m.cvt"));
        assert_eq!(stats.subjects, 2);
        assert_eq!(stats.cvt_subjects, 1);
    }

    #[test]
    fn test_offsets_are_contiguous() {
        let (tables, data, _) = build(
            BuildConfig::default(),
            &[
                triple("m.a", "p", "1"),
                triple("m.b", "p", "2"),
                triple("m.c", "p", "3"),
            ],
        )
        .unwrap();

        let a = *tables.primary.get("m.a").unwrap();
        let b = *tables.primary.get("m.b").unwrap();
        let c = *tables.primary.get("m.c").unwrap();
        assert_eq!(a.offset, 0);
        assert_eq!(b.offset, a.length as u64);
        assert_eq!(c.offset, b.offset + b.length as u64);
        assert_eq!(data.len() as u64, c.offset + c.length as u64);
    }

    #[test]
    fn test_excluded_predicates_are_skipped() {
        let (tables, data, stats) = build(
            BuildConfig::default(),
            &[
                triple("m.a", "type.object.type", "people.person"),
                triple("m.a", "imdb.topic.title_id", "tt0"),
                triple("m.a", "p.kept", "yes"),
            ],
        )
        .unwrap();
        assert_eq!(stats.triples_excluded, 2);
        assert_eq!(
            read_pairs(&data, &tables, "m.a"),
            vec![("p.kept".to_string(), "yes".to_string())]
        );
    }

    #[test]
    fn test_large_subject_is_split_into_chunks() {
        let config = BuildConfig {
            split_threshold_chars: 16,
            ..BuildConfig::default()
        };
        let input: Vec<Triple> = (0..10)
            .map(|i| triple("m.big", "some.long.predicate", &format!("value{i}")))
            .chain([triple("m.small", "p", "x")])
            .collect();
        let (tables, data, stats) = build(config, &input).unwrap();

        let entry = tables.overflow.get("m.big").unwrap();
        assert_eq!(entry.chunk_lengths.len(), 10);
        assert_eq!(stats.split_subjects, 1);
        tables.validate().unwrap();

        let pairs = read_pairs(&data, &tables, "m.big");
        assert_eq!(pairs.len(), 10);
        assert_eq!(pairs[9].1, "value9");
        assert!(tables.overflow.get("m.small").is_none());
    }

    #[test]
    fn test_split_on_last_line_leaves_no_empty_chunk() {
        let config = BuildConfig {
            split_threshold_chars: 5,
            ..BuildConfig::default()
        };
        let (tables, _, stats) = build(
            config,
            &[triple("m.a", "pred", "object"), triple("m.b", "p", "o")],
        )
        .unwrap();
        // one chunk only, flushed by the threshold
        assert!(tables.overflow.get("m.a").is_none());
        assert_eq!(stats.chunks, 2);
    }

    #[test]
    fn test_non_contiguous_subject_is_rejected() {
        let err = build(
            BuildConfig::default(),
            &[
                triple("m.a", "p", "1"),
                triple("m.b", "p", "2"),
                triple("m.a", "p", "3"),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::Build { .. }));
    }

    #[test]
    fn test_build_store_writes_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("fb_en.txt");
        fs::write(&input, "m.a\ttype.object.name\tA\nm.a\tp\tm.b\n").unwrap();
        let out = dir.path().join("store");

        let stats = build_store(&BuildConfig::default(), &out, &[input]).unwrap();
        assert_eq!(stats.subjects, 1);
        for path in StoreFiles::in_dir(&out).built() {
            assert!(path.exists(), "{}", path.display());
        }
    }

    #[test]
    fn test_failed_build_removes_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("fb_en.txt");
        fs::write(&input, "m.a\tp\t1\nm.b\tp\t2\nm.a\tp\t3\n").unwrap();
        let out = dir.path().join("store");

        assert!(build_store(&BuildConfig::default(), &out, &[input]).is_err());
        assert!(!StoreFiles::in_dir(&out).data.exists());
    }
}

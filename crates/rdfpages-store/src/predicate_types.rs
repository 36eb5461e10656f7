//! Per-predicate object-kind counts (`predicate.objtype.txt`).
//!
//! Counting needs the CVT and names tables of a built store, so it runs as a
//! separate pass after the build. The query engine later keeps only the
//! majority kind of predicates that were used with more than one kind.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use ahash::AHashMap;

use crate::config::BuildConfig;
use crate::error::Result;
use crate::tables::{write_predicate_counts, IndexTables, PredicateTypeCounts};
use crate::triples::Triple;

/// Tally object kinds per predicate, skipping predicates the builder would
/// have excluded.
pub fn count_predicate_types(
    tables: &IndexTables,
    config: &BuildConfig,
    triples: impl IntoIterator<Item = Result<Triple>>,
) -> Result<AHashMap<String, PredicateTypeCounts>> {
    let mut counts: AHashMap<String, PredicateTypeCounts> = AHashMap::new();
    for triple in triples {
        let triple = triple?;
        if config.is_excluded(&triple.predicate) {
            continue;
        }
        let kind = tables.object_kind(&triple.object);
        counts.entry(triple.predicate).or_default().record(kind);
    }
    Ok(counts)
}

/// Write the counts file, sorted by predicate.
pub fn write_predicate_types(
    path: &Path,
    counts: &AHashMap<String, PredicateTypeCounts>,
) -> Result<()> {
    let out = BufWriter::new(File::create(path)?);
    write_predicate_counts(out, counts.iter().map(|(p, c)| (p.as_str(), c)))?;
    tracing::info!(
        path = %path.display(),
        predicates = counts.len(),
        "wrote predicate object-type counts"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeKind;
    use crate::tables::PredicateTypeTable;

    #[test]
    fn test_counts_use_table_classification() {
        let mut tables = IndexTables::default();
        tables.cvt.insert_new("m.cvt", true);
        tables.names.insert("m.named", "Named");

        let triples = [
            Triple::new("m.s", "p.mixed", "m.named"),
            Triple::new("m.s", "p.mixed", "m.cvt"),
            Triple::new("m.s", "p.mixed", "m.other"),
            Triple::new("m.s", "p.mixed", "plain text"),
            Triple::new("m.s", "type.object.type", "people.person"),
        ];
        let counts = count_predicate_types(
            &tables,
            &BuildConfig::default(),
            triples.into_iter().map(Ok),
        )
        .unwrap();

        assert_eq!(counts.len(), 1);
        assert_eq!(
            counts["p.mixed"],
            PredicateTypeCounts {
                values: 1,
                entities: 2,
                cvts: 1
            }
        );
    }

    #[test]
    fn test_written_file_loads_as_majority_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("predicate.objtype.txt");
        let mut counts = AHashMap::new();
        counts.insert(
            "p.mixed".to_string(),
            PredicateTypeCounts {
                values: 1,
                entities: 3,
                cvts: 0,
            },
        );
        counts.insert(
            "p.pure".to_string(),
            PredicateTypeCounts {
                values: 8,
                entities: 0,
                cvts: 0,
            },
        );
        write_predicate_types(&path, &counts).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "p.mixed\t1\t3\t0\np.pure\t8\t0\t0\n");

        let table = PredicateTypeTable::read_from(text.as_bytes()).unwrap();
        assert_eq!(table.get("p.mixed"), Some(NodeKind::Entity));
        assert_eq!(table.get("p.pure"), None);
    }
}

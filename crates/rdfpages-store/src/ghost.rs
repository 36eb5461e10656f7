//! Ghost-id discovery (`ghost_mid.txt`).
//!
//! A ghost is an MID-shaped object with no name that never shows up as a
//! subject either: it points at nothing in the pruned dataset.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use ahash::AHashSet;

use crate::bucket::is_mid_shaped;
use crate::error::Result;
use crate::tables::NamesTable;
use crate::triples::Triple;

/// Collect ghost ids, sorted.
pub fn find_ghosts(
    names: &NamesTable,
    triples: impl IntoIterator<Item = Result<Triple>>,
) -> Result<Vec<String>> {
    let mut candidates = AHashSet::new();
    let mut unnamed_subjects = AHashSet::new();
    let mut lines = 0u64;
    for triple in triples {
        let triple = triple?;
        lines += 1;
        if lines % 1_000_000 == 0 {
            tracing::info!(lines, "scanning for ghost ids");
        }
        if is_mid_shaped(&triple.object) && names.get(&triple.object).is_none() {
            candidates.insert(triple.object);
        }
        if names.get(&triple.subject).is_none() {
            unnamed_subjects.insert(triple.subject);
        }
    }
    let ghosts: BTreeSet<String> = candidates
        .into_iter()
        .filter(|id| !unnamed_subjects.contains(id))
        .collect();
    Ok(ghosts.into_iter().collect())
}

pub fn write_ghosts(path: &Path, ghosts: &[String]) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for id in ghosts {
        writeln!(out, "{id}")?;
    }
    out.flush()?;
    tracing::info!(path = %path.display(), ghosts = ghosts.len(), "wrote ghost ids");
    Ok(())
}

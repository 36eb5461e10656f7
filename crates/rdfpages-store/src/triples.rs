//! Tab-separated triple files: `subject \t predicate \t object`, one per line.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use crate::error::{Result, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Triple {
    pub subject: String,
    pub predicate: String,
    pub object: String,
}

impl Triple {
    pub fn new(subject: &str, predicate: &str, object: &str) -> Self {
        Self {
            subject: subject.to_string(),
            predicate: predicate.to_string(),
            object: object.to_string(),
        }
    }

    /// Parse one line. Columns past the third are ignored.
    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.split('\t');
        let subject = fields.next()?;
        let predicate = fields.next()?;
        let object = fields.next()?;
        Some(Self::new(subject, predicate, object))
    }
}

/// Reads several triple files back to back, in the order given.
pub struct TripleReader {
    pending: std::vec::IntoIter<PathBuf>,
    current: Option<(PathBuf, Lines<BufReader<File>>)>,
    line: u64,
}

impl TripleReader {
    pub fn open(paths: impl IntoIterator<Item = impl AsRef<Path>>) -> Self {
        let pending: Vec<PathBuf> = paths
            .into_iter()
            .map(|p| p.as_ref().to_path_buf())
            .collect();
        Self {
            pending: pending.into_iter(),
            current: None,
            line: 0,
        }
    }

    /// Lines read so far across every file.
    pub fn lines_read(&self) -> u64 {
        self.line
    }

    fn next_line(&mut self) -> Option<Result<(PathBuf, String)>> {
        loop {
            if let Some((path, lines)) = &mut self.current {
                match lines.next() {
                    Some(Ok(line)) => {
                        self.line += 1;
                        return Some(Ok((path.clone(), line)));
                    }
                    Some(Err(e)) => return Some(Err(e.into())),
                    None => self.current = None,
                }
            }
            let path = self.pending.next()?;
            match File::open(&path) {
                Ok(file) => self.current = Some((path, BufReader::new(file).lines())),
                Err(e) => {
                    return Some(Err(StoreError::build(format!(
                        "cannot open `{}`: {e}",
                        path.display()
                    ))))
                }
            }
        }
    }
}

impl Iterator for TripleReader {
    type Item = Result<Triple>;

    fn next(&mut self) -> Option<Self::Item> {
        let (path, line) = match self.next_line()? {
            Ok(next) => next,
            Err(e) => return Some(Err(e)),
        };
        let line = line.trim_end_matches('\r');
        Some(Triple::parse(line).ok_or_else(|| {
            StoreError::build(format!(
                "{} line {}: expected `subject\\tpredicate\\tobject`",
                path.display(),
                self.line
            ))
        }))
    }
}

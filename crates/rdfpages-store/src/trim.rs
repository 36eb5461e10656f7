//! Raw dump trimming: turns the 4-column RDF dump into the two subject-grouped
//! triple files the builder reads.
//!
//! Input lines look like
//! `<http://rdf.freebase.com/ns/m.0abc>\t<http://rdf.freebase.com/ns/p.q>\t<object>\t.`
//! where the object is either a URI or a literal (`"text"`, `"text"@lang`,
//! `"1922"^^<type>`). URIs are reduced to their last path segment. Entity
//! (`m.`) subjects go to `fb_en.txt` with exactly one preferred-language name
//! each; every other subject goes to `fb_en_nonM.txt`.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use ahash::AHashMap;

use crate::bucket::utf16_prefix;
use crate::builder::NAME_PREDICATE;
use crate::error::{Result, StoreError};

const REMOVED_PREDICATES: [&str; 9] = [
    "22-rdf-syntax-ns#type",
    "type.object.key",
    "rdf-schema#label",
    "type.object.permission",
    "type.user.usergroup",
    "type.usergroup.member",
    "type.user.userid",
    "type.permission.controls",
    "user",
];

const REMOVED_PREDICATE_PREFIXES: [&str; 3] = ["user.", "wikipedia.", "dataworld."];

/// Name languages in order of preference.
const NAME_LANGUAGES: [&str; 5] = ["en", "en-US", "en-GB", "en-CA", "en-Dsrt"];

/// Histogram buckets at or below this count are left out of the summary.
const HISTOGRAM_MIN: u64 = 1000;

pub const ENTITY_TRIPLES_FILE: &str = "fb_en.txt";
pub const OTHER_TRIPLES_FILE: &str = "fb_en_nonM.txt";
pub const SUMMARY_FILE: &str = "fb_console.txt";

// ============================================================================
// Term parsing
// ============================================================================

#[derive(Debug, PartialEq, Eq)]
enum Term<'a> {
    Id(&'a str),
    Literal { text: &'a str, lang: Option<&'a str> },
}

/// `<http://host/ns/m.0abc>` → `m.0abc`; a trailing slash selects the
/// segment before it.
fn uri_tail(term: &str) -> Option<&str> {
    let end = term.rfind('>')?;
    let body = &term[..end];
    let body = body.strip_suffix('/').unwrap_or(body);
    let start = body.rfind('/').map_or(0, |i| i + 1);
    Some(body[start..].trim_start_matches('<'))
}

fn parse_object(term: &str) -> Option<Term<'_>> {
    let Some(rest) = term.strip_prefix('"') else {
        return uri_tail(term).map(Term::Id);
    };
    let close = rest.rfind('"')?;
    let text = &rest[..close];
    let lang = rest[close + 1..].strip_prefix('@');
    Some(Term::Literal { text, lang })
}

fn is_removed(predicate: &str) -> bool {
    REMOVED_PREDICATES.contains(&predicate)
        || REMOVED_PREDICATE_PREFIXES
            .iter()
            .any(|p| predicate.starts_with(p))
}

fn prefix2(s: &str) -> &str {
    utf16_prefix(s, 2)
}

// ============================================================================
// Trimmer
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct TrimStats {
    pub total_lines: u64,
    /// Lines without exactly four tab-separated columns.
    pub malformed_lines: u64,
    pub removed_triples: u64,
    pub subject_prefixes: AHashMap<String, u64>,
    /// URI text preceding the predicate's last segment.
    pub predicate_namespaces: AHashMap<String, u64>,
    pub object_id_prefixes: AHashMap<String, u64>,
    pub values: u64,
    pub values_without_lang: u64,
    pub values_english: u64,
    pub values_foreign: u64,
}

impl TrimStats {
    pub fn objects_with_ids(&self) -> u64 {
        self.object_id_prefixes.values().sum()
    }

    /// Write the plain-text summary kept next to the trimmed files.
    pub fn write_summary<W: Write>(&self, mut out: W) -> Result<()> {
        writeln!(out, "Total Triples: {}", self.total_lines)?;
        writeln!(out, "Num parts != 4: {}", self.malformed_lines)?;
        writeln!(out, "Subject: ")?;
        write_histogram(&mut out, &self.subject_prefixes)?;
        writeln!(out, "Before Predicate")?;
        write_histogram(&mut out, &self.predicate_namespaces)?;
        writeln!(out, "Object Ids")?;
        write_histogram(&mut out, &self.object_id_prefixes)?;
        writeln!(out, "Objects With Ids:      {}", self.objects_with_ids())?;
        writeln!(out, "Objects With Values:   {}", self.values)?;
        writeln!(out, "   No Lang Id:            {}", self.values_without_lang)?;
        writeln!(out, "   English:               {}", self.values_english)?;
        writeln!(out, "   Foreign:               {}", self.values_foreign)?;
        out.flush()?;
        Ok(())
    }
}

fn write_histogram<W: Write>(out: &mut W, histogram: &AHashMap<String, u64>) -> Result<()> {
    let mut rows: Vec<(&String, &u64)> = histogram
        .iter()
        .filter(|(_, count)| **count > HISTOGRAM_MIN)
        .collect();
    rows.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    for (key, count) in rows {
        writeln!(out, "\t{count}: {key}")?;
    }
    Ok(())
}

fn bump(histogram: &mut AHashMap<String, u64>, key: &str) {
    match histogram.get_mut(key) {
        Some(count) => *count += 1,
        None => {
            histogram.insert(key.to_string(), 1);
        }
    }
}

/// Streaming trimmer writing entity triples and everything else to separate
/// sinks.
pub struct Trimmer<E: Write, O: Write> {
    entities: E,
    others: O,
    subject: String,
    /// `(language, name)` in first-seen order; later names replace earlier
    /// ones of the same language.
    names: Vec<(String, String)>,
    stats: TrimStats,
}

impl<E: Write, O: Write> Trimmer<E, O> {
    pub fn new(entities: E, others: O) -> Self {
        Self {
            entities,
            others,
            subject: String::new(),
            names: Vec::new(),
            stats: TrimStats::default(),
        }
    }

    pub fn push_line(&mut self, line: &str) -> Result<()> {
        self.stats.total_lines += 1;
        if self.stats.total_lines % 10_000_000 == 0 {
            tracing::info!(lines = self.stats.total_lines, "trimming dump");
        }

        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() != 4 {
            self.stats.malformed_lines += 1;
            return Ok(());
        }
        let (Some(subject), Some(predicate), Some(object)) =
            (uri_tail(parts[0]), uri_tail(parts[1]), parse_object(parts[2]))
        else {
            self.stats.malformed_lines += 1;
            return Ok(());
        };

        bump(&mut self.stats.subject_prefixes, prefix2(subject));
        if is_removed(predicate) {
            self.stats.removed_triples += 1;
            return Ok(());
        }
        if let Some(at) = parts[1].rfind(predicate) {
            bump(&mut self.stats.predicate_namespaces, &parts[1][..at]);
        }

        let (text, lang) = match object {
            Term::Id(id) => {
                bump(&mut self.stats.object_id_prefixes, prefix2(id));
                (id, "")
            }
            Term::Literal { text, lang } => {
                match lang {
                    Some(lang) if lang.len() >= 2 && lang.starts_with("en") => {
                        self.stats.values_english += 1;
                    }
                    Some(_) => {
                        self.stats.values_foreign += 1;
                        // foreign literals survive only as entity names
                        if predicate != NAME_PREDICATE || !subject.starts_with("m.") {
                            return Ok(());
                        }
                    }
                    None => self.stats.values_without_lang += 1,
                }
                self.stats.values += 1;
                (text, lang.unwrap_or_default())
            }
        };

        if subject != self.subject {
            self.flush_names()?;
            self.subject = subject.to_string();
        }

        if subject.starts_with("m.") {
            if predicate == NAME_PREDICATE {
                self.record_name(lang, text);
            } else {
                writeln!(self.entities, "{subject}\t{predicate}\t{text}")?;
            }
        } else {
            writeln!(self.others, "{subject}\t{predicate}\t{text}")?;
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<TrimStats> {
        self.flush_names()?;
        self.entities.flush()?;
        self.others.flush()?;
        Ok(self.stats)
    }

    fn record_name(&mut self, lang: &str, name: &str) {
        match self.names.iter_mut().find(|(l, _)| l == lang) {
            Some(slot) => slot.1 = name.to_string(),
            None => self.names.push((lang.to_string(), name.to_string())),
        }
    }

    /// Emit the current subject's name: the most preferred language if any
    /// is present, otherwise every distinct name.
    fn flush_names(&mut self) -> Result<()> {
        if self.names.is_empty() {
            return Ok(());
        }
        let preferred = NAME_LANGUAGES
            .iter()
            .find_map(|want| self.names.iter().find(|(lang, _)| lang == want));
        match preferred {
            Some((_, name)) => {
                writeln!(self.entities, "{}\t{NAME_PREDICATE}\t{name}", self.subject)?;
            }
            None => {
                let mut seen: Vec<&str> = Vec::new();
                for (_, name) in &self.names {
                    if !seen.contains(&name.as_str()) {
                        seen.push(name);
                        writeln!(self.entities, "{}\t{NAME_PREDICATE}\t{name}", self.subject)?;
                    }
                }
            }
        }
        self.names.clear();
        Ok(())
    }
}

/// Trim the dump at `input` into [`ENTITY_TRIPLES_FILE`],
/// [`OTHER_TRIPLES_FILE`] and [`SUMMARY_FILE`] under `out_dir`.
pub fn trim_dump(input: &Path, out_dir: &Path) -> Result<TrimStats> {
    let reader = BufReader::new(File::open(input).map_err(|e| {
        StoreError::build(format!("cannot open `{}`: {e}", input.display()))
    })?);
    std::fs::create_dir_all(out_dir)?;
    let entities = BufWriter::new(File::create(out_dir.join(ENTITY_TRIPLES_FILE))?);
    let others = BufWriter::new(File::create(out_dir.join(OTHER_TRIPLES_FILE))?);

    let mut trimmer = Trimmer::new(entities, others);
    for line in reader.lines() {
        trimmer.push_line(line?.trim_end_matches('\r'))?;
    }
    let stats = trimmer.finish()?;

    stats.write_summary(BufWriter::new(File::create(out_dir.join(SUMMARY_FILE))?))?;
    tracing::info!(
        lines = stats.total_lines,
        malformed = stats.malformed_lines,
        removed = stats.removed_triples,
        "trim complete"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NS: &str = "http://rdf.freebase.com/ns/";

    fn line(subject: &str, predicate: &str, object: &str) -> String {
        format!("<{NS}{subject}>\t<{NS}{predicate}>\t{object}\t.")
    }

    fn id(value: &str) -> String {
        format!("<{NS}{value}>")
    }

    fn trim(lines: &[String]) -> (String, String, TrimStats) {
        let mut trimmer = Trimmer::new(Vec::new(), Vec::new());
        for l in lines {
            trimmer.push_line(l).unwrap();
        }
        trimmer.flush_names().unwrap();
        let Trimmer {
            entities,
            others,
            stats,
            ..
        } = trimmer;
        (
            String::from_utf8(entities).unwrap(),
            String::from_utf8(others).unwrap(),
            stats,
        )
    }

    #[test]
    fn test_term_parsing() {
        assert_eq!(uri_tail("<http://rdf.freebase.com/ns/m.0abc>"), Some("m.0abc"));
        assert_eq!(uri_tail("<http://www.imdb.com/name/nm0097986/>"), Some("nm0097986"));
        assert_eq!(
            parse_object("\"Laurens Maturana\"@en"),
            Some(Term::Literal {
                text: "Laurens Maturana",
                lang: Some("en")
            })
        );
        assert_eq!(
            parse_object("\"1922-06-12\"^^<http://www.w3.org/2001/XMLSchema#date>"),
            Some(Term::Literal {
                text: "1922-06-12",
                lang: None
            })
        );
    }

    #[test]
    fn test_entities_and_others_are_split() {
        let (entities, others, _) = trim(&[
            line("m.01", "people.person.height_meters", "\"1.75\""),
            line("en.bieber", "common.topic.alias", "\"JB\"@en"),
        ]);
        assert_eq!(entities, "m.01\tpeople.person.height_meters\t1.75\n");
        assert_eq!(others, "en.bieber\tcommon.topic.alias\tJB\n");
    }

    #[test]
    fn test_removed_predicates_and_foreign_literals() {
        let (entities, _, stats) = trim(&[
            line("m.01", "type.object.key", "\"/en/x\""),
            line("m.01", "wikipedia.en", "\"x\""),
            line("m.01", "common.topic.alias", "\"Justin\"@fr"),
            line("m.01", "people.person.sibling_s", &id("m.0gxnnwc")),
        ]);
        assert_eq!(entities, "m.01\tpeople.person.sibling_s\tm.0gxnnwc\n");
        assert_eq!(stats.removed_triples, 2);
        assert_eq!(stats.values_foreign, 1);
    }

    #[test]
    fn test_preferred_name_is_chosen() {
        let (entities, _, _) = trim(&[
            line("m.01", "type.object.name", "\"Justin Bieber\"@fr"),
            line("m.01", "type.object.name", "\"Justin Bieber (GB)\"@en-GB"),
            line("m.01", "type.object.name", "\"Justin Bieber\"@en"),
            line("m.02", "type.object.name", "\"Uno\"@it"),
            line("m.02", "type.object.name", "\"Uno\"@es"),
            line("m.02", "type.object.name", "\"Eins\"@de"),
        ]);
        assert_eq!(
            entities,
            "m.01\ttype.object.name\tJustin Bieber\n\
             m.02\ttype.object.name\tUno\n\
             m.02\ttype.object.name\tEins\n"
        );
    }

    #[test]
    fn test_malformed_lines_are_counted() {
        let (_, _, stats) = trim(&["only\tthree\tcolumns".to_string()]);
        assert_eq!(stats.malformed_lines, 1);
        assert_eq!(stats.total_lines, 1);
    }

    #[test]
    fn test_trim_dump_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("freebase-rdf-latest");
        std::fs::write(
            &input,
            [
                line("m.01", "type.object.name", "\"A\"@en"),
                line("m.01", "p.q", &id("m.02")),
                line("g.11", "p.q", "\"v\""),
            ]
            .join("\n"),
        )
        .unwrap();

        let stats = trim_dump(&input, dir.path()).unwrap();
        assert_eq!(stats.total_lines, 3);
        let en = std::fs::read_to_string(dir.path().join(ENTITY_TRIPLES_FILE)).unwrap();
        assert_eq!(en, "m.01\tp.q\tm.02\nm.01\ttype.object.name\tA\n");
        let summary = std::fs::read_to_string(dir.path().join(SUMMARY_FILE)).unwrap();
        assert!(summary.starts_with("Total Triples: 3\n"));
    }
}

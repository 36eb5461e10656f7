//! Local, in-process queries with console printouts.
//!
//! Output formats:
//! - tree: `predicate --> object`, nested four spaces per hop, each entity
//!   or CVT expanded at most once;
//! - `--triples-only`: `predicate\tLiteral|Entity|CVT\tvalue-or-mid`;
//! - `--dump`: the MIDs of every entity and CVT reached, one per line;
//! - `--chain`: one tab-separated object sequence per line.

use std::collections::HashSet;
use std::io::{self, BufRead, Write};
use std::time::Instant;

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use rdfpages_store::{GraphNode, PredicateObjects, QueryService, Subgraph};

const NOTHING_FOUND: &str = "Nothing is found.";

#[derive(Debug, Clone, Default, Args)]
pub struct QueryArgs {
    /// Subject MID (e.g. m.06w2sn5). Prompts interactively when omitted.
    #[arg(short, long)]
    pub mid: Option<String>,

    /// Restrict to one predicate, or `outer inner` through a CVT.
    #[arg(long)]
    pub pred: Option<String>,

    /// Space-separated predicate chain to follow from the subject.
    #[arg(short, long)]
    pub chain: Option<String>,

    /// Print the subject's own triples without following CVTs.
    #[arg(short, long)]
    pub triples_only: bool,

    /// Print only the MIDs reached.
    #[arg(short, long)]
    pub dump: bool,

    /// Print the outbound predicate schema of the subject.
    #[arg(long)]
    pub outbound: bool,

    /// Look up names for these MIDs instead of querying a subject.
    #[arg(long, num_args = 1..)]
    pub names: Vec<String>,

    /// Keep at most this many objects per predicate.
    #[arg(long)]
    pub max_per_predicate: Option<usize>,
}

pub fn run(service: &QueryService, args: &QueryArgs) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    if !args.names.is_empty() {
        for (mid, name) in args.names.iter().zip(service.get_entity_names(&args.names)) {
            writeln!(out, "{mid}\t{name}")?;
        }
        return Ok(());
    }

    let Some(mid) = args.mid.as_deref() else {
        drop(out);
        return interactive(service, args);
    };

    if let Some(chain) = args.chain.as_deref() {
        let chain: Vec<String> = chain.split(' ').map(str::to_string).collect();
        write_chain(
            &mut out,
            service.find_node_sequences_on_predicate_chain(mid, &chain),
        )?;
        return Ok(());
    }
    if args.outbound {
        for predicate in service.get_outbound_predicates(mid) {
            writeln!(out, "{predicate}")?;
        }
        return Ok(());
    }
    if args.triples_only {
        match service.get_simple_object_predicates_and_cvts(mid, args.max_per_predicate, false) {
            Some(graph) => write_triples(&mut out, &graph)?,
            None => writeln!(out, "{NOTHING_FOUND}")?,
        }
        return Ok(());
    }

    query_once(service, args, mid, args.pred.as_deref(), &mut out)
}

fn query_once<W: Write>(
    service: &QueryService,
    args: &QueryArgs,
    subject: &str,
    predicate: Option<&str>,
    out: &mut W,
) -> Result<()> {
    let started = Instant::now();
    let graph = match predicate {
        None => service.get_simple_object_predicates_and_cvts(subject, args.max_per_predicate, true),
        Some(p) => service.get_simple_object_filtered_predicate_and_objects(subject, p),
    };
    let elapsed = started.elapsed().as_secs_f64();

    match graph {
        Some(graph) if args.dump => write_mids(out, &graph)?,
        Some(graph) => write_tree(out, &graph)?,
        None => writeln!(out, "{NOTHING_FOUND}")?,
    }
    writeln!(
        out,
        "{} {elapsed:.3} seconds to retrieve results",
        "Took".green().bold()
    )?;
    writeln!(out)?;
    Ok(())
}

/// Prompt for a subject (and optionally a predicate) until stdin closes.
fn interactive(service: &QueryService, args: &QueryArgs) -> Result<()> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    let stdout = io::stdout();

    loop {
        let mut out = stdout.lock();
        writeln!(
            out,
            "Enter a Mid (m.06w2sn5) or hit enter to also enter a predicate."
        )?;
        write!(out, "Enter subject: ")?;
        out.flush()?;
        let Some(subject) = lines.next().transpose()? else {
            return Ok(());
        };

        let (subject, predicate) = if subject.is_empty() {
            writeln!(
                out,
                "First enter a Mid (m.06w2sn5) then a predicate (people.person.parents)."
            )?;
            write!(out, "Enter subject: ")?;
            out.flush()?;
            let Some(subject) = lines.next().transpose()? else {
                return Ok(());
            };
            write!(out, "Enter predicate: ")?;
            out.flush()?;
            let Some(predicate) = lines.next().transpose()? else {
                return Ok(());
            };
            (subject, Some(predicate))
        } else {
            (subject, args.pred.clone())
        };

        query_once(service, args, &subject, predicate.as_deref(), &mut out)?;
    }
}

// ============================================================================
// Printers
// ============================================================================

pub fn write_chain<W: Write>(out: &mut W, sequences: Option<Vec<Vec<String>>>) -> io::Result<()> {
    match sequences {
        None => writeln!(out, "{NOTHING_FOUND}"),
        Some(sequences) => {
            for sequence in sequences {
                writeln!(out, "{}", sequence.join("\t"))?;
            }
            Ok(())
        }
    }
}

pub fn write_triples<W: Write>(out: &mut W, graph: &Subgraph) -> io::Result<()> {
    for po in graph.root_predicates() {
        for &id in &po.objects {
            let (kind, value) = match graph.node(id) {
                GraphNode::Value { value } => ("Literal", value.as_str()),
                GraphNode::Cvt { mid, .. } => ("CVT", mid.as_str()),
                GraphNode::Entity { mid, .. } => ("Entity", mid.as_str()),
            };
            writeln!(out, "{}\t{kind}\t{value}", po.predicate)?;
        }
    }
    Ok(())
}

pub fn write_mids<W: Write>(out: &mut W, graph: &Subgraph) -> io::Result<()> {
    let mut seen = HashSet::from([graph.root_node().mid().to_string()]);
    for po in graph.root_predicates() {
        write_mids_of(out, graph, po, &mut seen)?;
    }
    Ok(())
}

fn write_mids_of<W: Write>(
    out: &mut W,
    graph: &Subgraph,
    po: &PredicateObjects,
    seen: &mut HashSet<String>,
) -> io::Result<()> {
    for &id in &po.objects {
        match graph.node(id) {
            GraphNode::Value { .. } => {}
            GraphNode::Entity { mid, .. } => writeln!(out, "{mid}")?,
            GraphNode::Cvt { mid, predicates } => {
                writeln!(out, "{mid}")?;
                if let Some(list) = predicates {
                    if seen.insert(mid.clone()) {
                        for inner in list {
                            write_mids_of(out, graph, inner, seen)?;
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

pub fn write_tree<W: Write>(out: &mut W, graph: &Subgraph) -> io::Result<()> {
    let mut seen = HashSet::from([graph.root_node().mid().to_string()]);
    for po in graph.root_predicates() {
        write_predicate(out, graph, po, &mut seen, 0)?;
    }
    Ok(())
}

fn write_predicate<W: Write>(
    out: &mut W,
    graph: &Subgraph,
    po: &PredicateObjects,
    seen: &mut HashSet<String>,
    indent: usize,
) -> io::Result<()> {
    for (i, &id) in po.objects.iter().enumerate() {
        let label = if i == 0 { po.predicate.as_str() } else { "" };
        write!(out, "{:indent$}{} --> ", "", format!("{label:<40}").cyan())?;

        let children = match graph.node(id) {
            GraphNode::Value { value } => {
                writeln!(out, "{value}")?;
                None
            }
            GraphNode::Entity {
                mid,
                name,
                predicates,
            } => {
                let name = name.as_deref().unwrap_or("[no name]");
                writeln!(out, "{} ({mid})", name.bold())?;
                predicates.as_ref().map(|list| (mid, list))
            }
            GraphNode::Cvt { mid, predicates } => {
                writeln!(out, "{} ({mid})", "CVT".yellow())?;
                predicates.as_ref().map(|list| (mid, list))
            }
        };

        if let Some((mid, list)) = children {
            if seen.insert(mid.clone()) {
                for inner in list {
                    write_predicate(out, graph, inner, seen, indent + 4)?;
                }
            }
        }
    }
    Ok(())
}

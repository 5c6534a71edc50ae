//! Build command implementation

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};

use cardex_index::document::Document;
use cardex_index::lexicon::Lexicon;
use cardex_index::router::Router;
use cardex_index::scan::{DocumentSource, ScanOptions, run_scan};
use cardex_index::write::subindex::SubIndexSet;

/// A document stream over JSON-lines input files, consumed by many workers.
///
/// The scan's source contract has no error channel; a read or parse failure
/// ends the stream and is surfaced after the scan through
/// [`JsonlSource::into_error`].
struct JsonlSource {
    state: Mutex<SourceState>,
}

struct SourceState {
    pending: VecDeque<PathBuf>,
    current: Option<(PathBuf, usize, Lines<BufReader<File>>)>,
    error: Option<anyhow::Error>,
}

impl JsonlSource {
    fn new(inputs: Vec<String>) -> JsonlSource {
        JsonlSource {
            state: Mutex::new(SourceState {
                pending: inputs.into_iter().map(PathBuf::from).collect(),
                current: None,
                error: None,
            }),
        }
    }

    fn into_error(self) -> Option<anyhow::Error> {
        self.state.into_inner().expect("source lock").error
    }
}

impl DocumentSource for JsonlSource {
    fn next_document(&self) -> Option<Document> {
        let mut state = self.state.lock().expect("source lock");
        let state = &mut *state;
        if state.error.is_some() {
            return None;
        }
        loop {
            if state.current.is_none() {
                let path = state.pending.pop_front()?;
                match File::open(&path) {
                    Ok(file) => {
                        state.current = Some((path, 0, BufReader::new(file).lines()));
                    }
                    Err(e) => {
                        state.error =
                            Some(anyhow::anyhow!(e).context(format!("open {}", path.display())));
                        return None;
                    }
                }
            }
            let (path, line_no, lines) = state.current.as_mut().expect("current input");
            match lines.next() {
                None => {
                    state.current = None;
                    continue;
                }
                Some(Err(e)) => {
                    let context = format!("read {}", path.display());
                    state.error = Some(anyhow::anyhow!(e).context(context));
                    return None;
                }
                Some(Ok(line)) => {
                    *line_no += 1;
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Document>(&line) {
                        Ok(doc) => return Some(doc),
                        Err(e) => {
                            let context =
                                format!("parse {} line {line_no}", path.display());
                            state.error = Some(anyhow::anyhow!(e).context(context));
                            return None;
                        }
                    }
                }
            }
        }
    }
}

/// Run the build command
pub fn run(
    index_dir: String,
    lexicon_path: String,
    subindexes: Option<String>,
    batch_size: usize,
    threads: usize,
    align_shift: u32,
    inputs: Vec<String>,
) -> Result<()> {
    let lexicon = Lexicon::load(Path::new(&lexicon_path))
        .with_context(|| format!("load lexicon {lexicon_path}"))?;
    println!("Loaded lexicon: {} entries", lexicon.len());

    let router = match &subindexes {
        Some(path) => Router::from_json_file(Path::new(path))
            .with_context(|| format!("load subindex configuration {path}"))?,
        None => Router::new(Vec::new())?,
    };
    println!("Subindices: {}", router.len());

    let seed = fastrand::u64(..);
    let output = Arc::new(SubIndexSet::create(
        Path::new(&index_dir),
        router.specs(),
        align_shift,
        seed,
    )?);

    let source = JsonlSource::new(inputs);
    let options = ScanOptions {
        threads,
        batch_size,
        ..Default::default()
    };
    let report = run_scan(&source, &lexicon, &router, &output, &options)?;
    if let Some(error) = source.into_error() {
        return Err(error.context("input stream failed"));
    }

    println!(
        "Indexed {} card(s), {} skeleton(s) in {} subindex(es)",
        report.total_cards(),
        report.total_skeletons(),
        router.len()
    );
    for (spec, &cards) in router.specs().iter().zip(report.cards.iter()) {
        println!("  {}: {} card(s)", spec.name, cards);
    }
    if report.dropped > 0 {
        println!("Dropped {} unrouted document(s)", report.dropped);
    }
    if report.total_cards() == 0 && report.dropped == 0 {
        bail!("no documents indexed");
    }
    Ok(())
}

//! The scan driver: a fixed pool of worker threads running the full
//! per-document pipeline against a shared document source.
//!
//! Workers run independently except for the ID allocator, the only call
//! that can block. Posting accumulators are worker-local; when one outgrows
//! its byte budget the worker performs an early flush serialized on a
//! posting gate. Whatever the workers leave behind is flushed by the calling
//! thread after every worker has joined, so the final drain never contends
//! with anything.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use cardex_common::{Result, error::Error};
use cardex_format::card_id::MAX_SUBINDICES;
use cardex_format::chain::ChainEntry;
use cardex_format::records::AttrRecord;

use crate::alloc::{AllocKind, AllocatorOptions, IdAllocator};
use crate::document::{Document, string_class, string_fingerprint};
use crate::lexicon::Lexicon;
use crate::normalize::{Token, normalize};
use crate::router::Router;
use crate::write::accumulator::WordAccumulator;
use crate::write::card_writer::{encode_record, prepare_card};
use crate::write::flush::{flush_strings, flush_words};
use crate::write::strings::StringAccumulator;
use crate::write::subindex::SubIndexSet;

/// Initial weight given to skeleton notes.
pub const SKELETON_WEIGHT: i32 = 256;

/// A thread-safe stream of parsed documents.
pub trait DocumentSource: Sync {
    /// Pulls the next document; `None` permanently ends the stream.
    fn next_document(&self) -> Option<Document>;
}

/// Scan tuning.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Worker thread count.
    pub threads: usize,
    /// Allocator batch rows; 0 auto-computes from the allocator's byte
    /// budget.
    pub batch_size: usize,
    /// Per-worker posting accumulator byte budget.
    pub posting_budget: usize,
    /// Per-(word, card) occurrence cap before overflow markers.
    pub occurrence_limit: u32,
}

impl Default for ScanOptions {
    fn default() -> Self {
        ScanOptions {
            threads: 1,
            batch_size: 0,
            posting_budget: 1 << 22,
            occurrence_limit: 1000,
        }
    }
}

/// Whole-run outcome of one scan.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanReport {
    /// Cards allocated per subindex.
    pub cards: [u32; MAX_SUBINDICES],
    /// Skeletons allocated per subindex.
    pub skeletons: [u32; MAX_SUBINDICES],
    /// Documents dropped because no subindex matched.
    pub dropped: u64,
    /// ID batch flushes performed.
    pub flushes: u64,
}

impl ScanReport {
    /// Total cards across all subindices.
    pub fn total_cards(&self) -> u64 {
        self.cards.iter().map(|&c| c as u64).sum()
    }

    /// Total skeletons across all subindices.
    pub fn total_skeletons(&self) -> u64 {
        self.skeletons.iter().map(|&c| c as u64).sum()
    }
}

/// Runs one complete indexing scan: workers, final posting flush, parameters
/// records. The output set is complete and closed when this returns.
pub fn run_scan(
    source: &dyn DocumentSource,
    lexicon: &Lexicon,
    router: &Router,
    output: &Arc<SubIndexSet>,
    options: &ScanOptions,
) -> Result<ScanReport> {
    let threads = options.threads.max(1);
    let alloc = IdAllocator::new(
        Box::new(Arc::clone(output)),
        &AllocatorOptions {
            batch_size: options.batch_size,
            ..Default::default()
        },
    )?;
    let dropped = AtomicU64::new(0);
    let posting_gate = Mutex::new(());
    let leftovers: Mutex<Vec<(WordAccumulator, StringAccumulator)>> =
        Mutex::new(Vec::with_capacity(threads));

    alloc.start_workers(threads);
    log::info!("scan starting with {threads} worker(s)");

    std::thread::scope(|scope| -> Result<()> {
        let mut handles = Vec::with_capacity(threads);
        for _ in 0..threads {
            let alloc = &alloc;
            let dropped = &dropped;
            let posting_gate = &posting_gate;
            let leftovers = &leftovers;
            handles.push(scope.spawn(move || {
                // Unblocks any pending flush barrier on any exit, including
                // a panic unwind.
                let _stop = StopGuard(alloc);
                worker_loop(
                    source,
                    lexicon,
                    router,
                    output,
                    alloc,
                    dropped,
                    posting_gate,
                    leftovers,
                    options,
                )
            }));
        }
        let mut first_error = None;
        for handle in handles {
            let result = handle
                .join()
                .map_err(|_| Error::invariant("scan", "worker thread panicked"))?;
            if first_error.is_none() {
                first_error = result.err();
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    })?;

    // Single-threaded final drain; no worker is alive anymore.
    let mut sink = Arc::clone(output);
    for (mut words, mut strings) in leftovers.into_inner().expect("leftovers lock") {
        flush_words(&mut words, &mut sink)?;
        flush_strings(&mut strings, &mut sink)?;
    }

    let totals = alloc.finish()?;
    output.finish(&totals)?;

    let report = ScanReport {
        cards: totals.cards,
        skeletons: totals.skeletons,
        dropped: dropped.load(Ordering::Relaxed),
        flushes: totals.flushes,
    };
    log::info!(
        "scan done: {} cards, {} skeletons, {} dropped, {} id flushes",
        report.total_cards(),
        report.total_skeletons(),
        report.dropped,
        report.flushes
    );
    Ok(report)
}

/// Deregisters one worker when dropped. Dropping during an unwind still
/// lets a peer waiting on the flush barrier proceed without the dead
/// worker.
struct StopGuard<'a>(&'a IdAllocator);

impl Drop for StopGuard<'_> {
    fn drop(&mut self) {
        self.0.stop_worker();
    }
}

#[allow(clippy::too_many_arguments)]
fn worker_loop(
    source: &dyn DocumentSource,
    lexicon: &Lexicon,
    router: &Router,
    output: &Arc<SubIndexSet>,
    alloc: &IdAllocator,
    dropped: &AtomicU64,
    posting_gate: &Mutex<()>,
    leftovers: &Mutex<Vec<(WordAccumulator, StringAccumulator)>>,
    options: &ScanOptions,
) -> Result<()> {
    let mut words = WordAccumulator::new(options.posting_budget, options.occurrence_limit);
    let mut strings = StringAccumulator::new(options.posting_budget);
    let mut sink = Arc::clone(output);

    while let Some(doc) = source.next_document() {
        let Some(sub) = router.route(doc.file_class, doc.partition_id) else {
            dropped.fetch_add(1, Ordering::Relaxed);
            log::debug!("dropped unrouted document {}", doc.url);
            continue;
        };
        process_document(&doc, sub, lexicon, output, alloc, &mut words, &mut strings)?;

        if words.needs_flush() || strings.needs_flush() {
            let _gate = posting_gate.lock().expect("posting gate");
            flush_words(&mut words, &mut sink)?;
            flush_strings(&mut strings, &mut sink)?;
        }
    }

    leftovers
        .lock()
        .expect("leftovers lock")
        .push((words, strings));
    Ok(())
}

fn process_document(
    doc: &Document,
    sub: u8,
    lexicon: &Lexicon,
    output: &SubIndexSet,
    alloc: &IdAllocator,
    words: &mut WordAccumulator,
    strings: &mut StringAccumulator,
) -> Result<()> {
    let build = prepare_card(doc);
    let fingerprint = doc.fingerprint();

    let mut slot = alloc.allocate(sub, AllocKind::Card, &doc.url)?;
    let card = slot.id();

    let normalized = normalize(doc);
    for token in normalized.tokens() {
        match token {
            Token::Word { text, wtype, pos } => match lexicon.lookup(text) {
                Some(entry) => words.add(entry.id, card, ChainEntry::Word { wtype, pos }),
                None => strings.add(string_fingerprint(text), card, wtype),
            },
            Token::Meta { text, mtype, pos } => match lexicon.lookup(text) {
                Some(entry) => words.add(entry.id, card, ChainEntry::Meta { mtype, pos }),
                None => strings.add(string_fingerprint(text), card, mtype),
            },
        }
    }

    let record = encode_record(&build.payload, output.align_shift())?;
    let card_pos = output.write_card(sub, &record)?;
    slot.attr = AttrRecord {
        card_pos,
        weight: build.weight,
        fingerprint_lo: fingerprint as u64,
        fingerprint_hi: (fingerprint >> 64) as u64,
        file_class: doc.file_class,
        partition_id: doc.partition_id,
        flags: build.flags,
        reserved: 0,
        ref_count: build.payload.refs.len() as u16,
        note_count: build.payload.notes.len() as u16,
    };
    output.append_fingerprint(sub, fingerprint)?;
    drop(slot);

    // One skeleton note per reference child, from the disjoint sequence.
    for (redirect, url) in &build.payload.refs {
        let ref_fp = string_fingerprint(url);
        let class = if *redirect {
            string_class::REDIRECT
        } else {
            string_class::REF
        };
        strings.add(ref_fp, card, class);

        let mut skel = alloc.allocate(sub, AllocKind::Skeleton, "")?;
        skel.note.fingerprint_lo = ref_fp as u64;
        skel.note.fingerprint_hi = (ref_fp >> 64) as u64;
        skel.note.init_weight = SKELETON_WEIGHT;
    }
    Ok(())
}

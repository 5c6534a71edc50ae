//! Card ID allocation with a batched flush barrier.
//!
//! The allocator is the one shared choke point of the scanning phase. Every
//! worker calls [`IdAllocator::allocate`] per document; in steady state that
//! is lock, room check, ID take, URL append, unlock. Allocated IDs come with
//! zero-initialized attribute and note records that the caller fills and
//! that are committed into the batch buffer when the returned [`CardSlot`]
//! drops.
//!
//! When the batch buffer fills up, the discovering thread raises the
//! `flushing` flag and waits until every *other* still-running worker has
//! rendezvoused: a worker rendezvouses by calling `allocate` again (it then
//! parks until the flush completes) or by having permanently stopped via
//! [`IdAllocator::stop_worker`]. Outstanding `CardSlot`s are counted too, so
//! the flush never observes a half-filled row. The initiator then performs
//! the disk write under the lock, clears the flag and broadcasts. This
//! bounds lock hold time to the flush itself and guarantees nothing mutates
//! the buffer mid-flush.
//!
//! Contract: a worker holds at most one `CardSlot` at a time and drops it
//! before its next `allocate` or `stop_worker` call.

use std::sync::{Condvar, Mutex};

use bytemuck::Zeroable;
use cardex_common::{Result, error::Error, verify_invariant};
use cardex_format::CardId;
use cardex_format::card_id::{MAX_ORDINAL, MAX_SUBINDICES};
use cardex_format::records::{AttrRecord, NoteRecord};

/// What kind of per-ID record an allocation produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocKind {
    /// A real document: fills the attribute table, appends to the URL log.
    Card,
    /// A referenced-but-unfetched placeholder: fills the note table, from a
    /// disjoint per-subindex ID sequence.
    Skeleton,
}

/// Destination of batched per-ID records. Implemented over the subindex
/// output file set; tests substitute an in-memory recorder.
pub trait BatchSink: Send {
    /// Appends one attribute record; called in strict ordinal order per
    /// subindex.
    fn write_attr(&mut self, sub: u8, ordinal: u32, attr: &AttrRecord) -> Result<()>;

    /// Appends one skeleton note record; called in strict ordinal order per
    /// subindex.
    fn write_note(&mut self, sub: u8, ordinal: u32, note: &NoteRecord) -> Result<()>;

    /// Appends a card's URL text to the URL log and its byte offset to the
    /// parallel offset index. Called at allocation time, under the
    /// allocator lock, so offsets correspond to IDs.
    fn write_url(&mut self, sub: u8, url: &str) -> Result<()>;
}

/// Allocator tuning.
#[derive(Debug, Clone)]
pub struct AllocatorOptions {
    /// Rows per batch; 0 auto-computes from `byte_budget`.
    pub batch_size: usize,
    /// Batch byte budget used when `batch_size` is 0.
    pub byte_budget: usize,
}

impl Default for AllocatorOptions {
    fn default() -> Self {
        AllocatorOptions {
            batch_size: 0,
            byte_budget: 1 << 20,
        }
    }
}

#[derive(Clone, Copy)]
struct BatchRow {
    sub: u8,
    kind: AllocKind,
    ordinal: u32,
    attr: AttrRecord,
    note: NoteRecord,
}

struct AllocState {
    sink: Box<dyn BatchSink>,
    batch: Vec<BatchRow>,
    next_card: [u32; MAX_SUBINDICES],
    next_skeleton: [u32; MAX_SUBINDICES],
    flushing: bool,
    running: usize,
    parked: usize,
    pending_fills: usize,
    flush_count: u64,
    failed: bool,
}

/// Thread-safe generator of dense per-subindex card and skeleton IDs.
pub struct IdAllocator {
    state: Mutex<AllocState>,
    /// Signaled by parking, stopping and slot-dropping threads towards a
    /// flush initiator.
    rendezvous: Condvar,
    /// Broadcast when a flush completes.
    flushed: Condvar,
    batch_capacity: usize,
}

/// Per-subindex allocation totals, returned by [`IdAllocator::finish`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AllocTotals {
    /// Cards allocated per subindex.
    pub cards: [u32; MAX_SUBINDICES],
    /// Skeletons allocated per subindex.
    pub skeletons: [u32; MAX_SUBINDICES],
    /// Number of batch flushes performed.
    pub flushes: u64,
}

impl IdAllocator {
    /// Creates an allocator writing batches into `sink`.
    pub fn new(sink: Box<dyn BatchSink>, options: &AllocatorOptions) -> Result<IdAllocator> {
        let row_size = std::mem::size_of::<BatchRow>();
        let batch_capacity = if options.batch_size > 0 {
            options.batch_size
        } else {
            (options.byte_budget / row_size).max(1)
        };
        Ok(IdAllocator {
            state: Mutex::new(AllocState {
                sink,
                batch: Vec::with_capacity(batch_capacity),
                next_card: [1; MAX_SUBINDICES],
                next_skeleton: [1; MAX_SUBINDICES],
                flushing: false,
                running: 0,
                parked: 0,
                pending_fills: 0,
                flush_count: 0,
                failed: false,
            }),
            rendezvous: Condvar::new(),
            flushed: Condvar::new(),
            batch_capacity,
        })
    }

    /// Rows per batch after auto-computation.
    pub fn batch_capacity(&self) -> usize {
        self.batch_capacity
    }

    /// Declares `count` workers about to start calling [`allocate`].
    ///
    /// [`allocate`]: Self::allocate
    pub fn start_workers(&self, count: usize) {
        let mut state = self.state.lock().expect("allocator lock");
        state.running += count;
    }

    /// Permanently retires the calling worker. Must be the worker's last
    /// interaction with the allocator; signals any pending flush.
    pub fn stop_worker(&self) {
        let mut state = self.state.lock().expect("allocator lock");
        debug_assert!(state.running > 0);
        state.running -= 1;
        if state.flushing {
            self.rendezvous.notify_all();
        }
    }

    /// Allocates the next ID of `kind` in subindex `sub` and hands out its
    /// zero-initialized records.
    ///
    /// Blocks only while a flush it or a peer triggered is in progress.
    pub fn allocate(&self, sub: u8, kind: AllocKind, url: &str) -> Result<CardSlot<'_>> {
        let mut state = self.state.lock().expect("allocator lock");
        loop {
            if state.failed {
                return Err(Error::invalid_operation("allocate after failed flush"));
            }
            if state.flushing {
                // Rendezvous with the flush initiator, then park.
                state.parked += 1;
                self.rendezvous.notify_all();
                while state.flushing {
                    state = self.flushed.wait(state).expect("allocator lock");
                }
                state.parked -= 1;
                continue;
            }
            if state.batch.len() >= self.batch_capacity {
                state.flushing = true;
                while state.parked + 1 < state.running || state.pending_fills > 0 {
                    state = self.rendezvous.wait(state).expect("allocator lock");
                }
                let result = Self::flush_locked(&mut state);
                state.flushing = false;
                if result.is_err() {
                    state.failed = true;
                }
                self.flushed.notify_all();
                result?;
                continue;
            }
            break;
        }

        let ordinal = match kind {
            AllocKind::Card => Self::take_ordinal(&mut state.next_card, sub)?,
            AllocKind::Skeleton => Self::take_ordinal(&mut state.next_skeleton, sub)?,
        };
        if kind == AllocKind::Card {
            state.sink.write_url(sub, url)?;
        }
        state.batch.push(BatchRow {
            sub,
            kind,
            ordinal,
            attr: AttrRecord::zeroed(),
            note: NoteRecord::zeroed(),
        });
        state.pending_fills += 1;
        let row_index = state.batch.len() - 1;
        Ok(CardSlot {
            alloc: self,
            row_index,
            id: CardId::new(sub, ordinal),
            kind,
            attr: AttrRecord::zeroed(),
            note: NoteRecord::zeroed(),
        })
    }

    /// Flushes the final partial batch and reports the run totals. Callable
    /// only after every worker has stopped; no barrier is needed then.
    pub fn finish(&self) -> Result<AllocTotals> {
        let mut state = self.state.lock().expect("allocator lock");
        verify_invariant!(
            allocator_finish,
            state.running == 0 && state.pending_fills == 0,
            "{} workers still running, {} slots outstanding",
            state.running,
            state.pending_fills
        );
        if !state.batch.is_empty() {
            Self::flush_locked(&mut state)?;
        }
        let mut totals = AllocTotals {
            flushes: state.flush_count,
            ..Default::default()
        };
        for sub in 0..MAX_SUBINDICES {
            totals.cards[sub] = state.next_card[sub] - 1;
            totals.skeletons[sub] = state.next_skeleton[sub] - 1;
        }
        Ok(totals)
    }

    fn take_ordinal(next: &mut [u32; MAX_SUBINDICES], sub: u8) -> Result<u32> {
        let slot = &mut next[sub as usize];
        if *slot > MAX_ORDINAL {
            return Err(Error::invalid_operation(format!(
                "card id space exhausted in subindex {sub}"
            )));
        }
        let ordinal = *slot;
        *slot += 1;
        Ok(ordinal)
    }

    fn flush_locked(state: &mut AllocState) -> Result<()> {
        let rows = std::mem::take(&mut state.batch);
        log::debug!("flushing id batch of {} rows", rows.len());
        for row in &rows {
            match row.kind {
                AllocKind::Card => state.sink.write_attr(row.sub, row.ordinal, &row.attr)?,
                AllocKind::Skeleton => state.sink.write_note(row.sub, row.ordinal, &row.note)?,
            }
        }
        state.batch = rows;
        state.batch.clear();
        state.flush_count += 1;
        Ok(())
    }

    fn commit_row(&self, row_index: usize, attr: &AttrRecord, note: &NoteRecord) {
        let mut state = self.state.lock().expect("allocator lock");
        let row = &mut state.batch[row_index];
        row.attr = *attr;
        row.note = *note;
        state.pending_fills -= 1;
        if state.flushing {
            self.rendezvous.notify_all();
        }
    }
}

/// An allocated ID plus its records, filled in place by the caller and
/// committed into the batch buffer on drop.
pub struct CardSlot<'a> {
    alloc: &'a IdAllocator,
    row_index: usize,
    id: CardId,
    kind: AllocKind,
    /// Attribute record, meaningful for [`AllocKind::Card`] allocations.
    pub attr: AttrRecord,
    /// Note record, meaningful for [`AllocKind::Skeleton`] allocations.
    pub note: NoteRecord,
}

impl CardSlot<'_> {
    /// The allocated ID.
    pub fn id(&self) -> CardId {
        self.id
    }

    /// The allocation kind this slot was created with.
    pub fn kind(&self) -> AllocKind {
        self.kind
    }
}

impl Drop for CardSlot<'_> {
    fn drop(&mut self) {
        self.alloc.commit_row(self.row_index, &self.attr, &self.note);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default, Clone)]
    struct Recorder {
        attrs: Vec<(u8, u32, AttrRecord)>,
        notes: Vec<(u8, u32, NoteRecord)>,
        urls: Vec<(u8, String)>,
    }

    #[derive(Clone, Default)]
    struct RecorderSink(Arc<Mutex<Recorder>>);

    impl BatchSink for RecorderSink {
        fn write_attr(&mut self, sub: u8, ordinal: u32, attr: &AttrRecord) -> Result<()> {
            self.0.lock().unwrap().attrs.push((sub, ordinal, *attr));
            Ok(())
        }

        fn write_note(&mut self, sub: u8, ordinal: u32, note: &NoteRecord) -> Result<()> {
            self.0.lock().unwrap().notes.push((sub, ordinal, *note));
            Ok(())
        }

        fn write_url(&mut self, sub: u8, url: &str) -> Result<()> {
            self.0.lock().unwrap().urls.push((sub, url.to_string()));
            Ok(())
        }
    }

    fn allocator(batch_size: usize) -> (IdAllocator, Arc<Mutex<Recorder>>) {
        let recorder = Arc::new(Mutex::new(Recorder::default()));
        let sink = RecorderSink(recorder.clone());
        let alloc = IdAllocator::new(
            Box::new(sink),
            &AllocatorOptions {
                batch_size,
                byte_budget: 0,
            },
        )
        .unwrap();
        (alloc, recorder)
    }

    #[test]
    fn test_single_threaded_dense_ids() {
        let (alloc, recorder) = allocator(4);
        alloc.start_workers(1);
        for i in 0..10u32 {
            let mut slot = alloc.allocate(0, AllocKind::Card, &format!("url{i}")).unwrap();
            assert_eq!(slot.id().ordinal(), i + 1);
            slot.attr.weight = i as i32;
        }
        alloc.stop_worker();
        let totals = alloc.finish().unwrap();
        assert_eq!(totals.cards[0], 10);
        assert_eq!(totals.flushes, 3); // ceil(10 / 4)

        let recorder = recorder.lock().unwrap();
        assert_eq!(recorder.attrs.len(), 10);
        for (i, (sub, ordinal, attr)) in recorder.attrs.iter().enumerate() {
            assert_eq!(*sub, 0);
            assert_eq!(*ordinal, i as u32 + 1);
            assert_eq!(attr.weight, i as i32);
        }
        assert_eq!(recorder.urls.len(), 10);
        assert_eq!(recorder.urls[3].1, "url3");
    }

    #[test]
    fn test_skeletons_use_disjoint_sequence() {
        let (alloc, recorder) = allocator(8);
        alloc.start_workers(1);
        let card = alloc.allocate(2, AllocKind::Card, "u").unwrap().id();
        let skel = alloc.allocate(2, AllocKind::Skeleton, "").unwrap().id();
        let card2 = alloc.allocate(2, AllocKind::Card, "u2").unwrap().id();
        assert_eq!(card.ordinal(), 1);
        assert_eq!(skel.ordinal(), 1);
        assert_eq!(card2.ordinal(), 2);
        alloc.stop_worker();
        let totals = alloc.finish().unwrap();
        assert_eq!(totals.cards[2], 2);
        assert_eq!(totals.skeletons[2], 1);

        let recorder = recorder.lock().unwrap();
        assert_eq!(recorder.attrs.len(), 2);
        assert_eq!(recorder.notes.len(), 1);
        // Skeletons do not append to the URL log.
        assert_eq!(recorder.urls.len(), 2);
    }

    #[test]
    fn test_empty_run_has_no_flushes() {
        let (alloc, recorder) = allocator(4);
        let totals = alloc.finish().unwrap();
        assert_eq!(totals.flushes, 0);
        assert!(recorder.lock().unwrap().attrs.is_empty());
    }

    #[test]
    fn test_batch_size_auto_computed() {
        let recorder = RecorderSink::default();
        let alloc = IdAllocator::new(
            Box::new(recorder),
            &AllocatorOptions {
                batch_size: 0,
                byte_budget: 4096,
            },
        )
        .unwrap();
        let rows = 4096 / std::mem::size_of::<BatchRow>();
        assert_eq!(alloc.batch_capacity(), rows);
    }

    fn stress(threads: usize, batch_size: usize, per_thread: usize) {
        let (alloc, recorder) = allocator(batch_size);
        let alloc = Arc::new(alloc);
        alloc.start_workers(threads);
        std::thread::scope(|scope| {
            for t in 0..threads {
                let alloc = Arc::clone(&alloc);
                scope.spawn(move || {
                    for i in 0..per_thread {
                        let mut slot = alloc
                            .allocate(0, AllocKind::Card, &format!("t{t}d{i}"))
                            .unwrap();
                        slot.attr.weight = t as i32;
                    }
                    alloc.stop_worker();
                });
            }
        });
        let totals = alloc.finish().unwrap();
        let total = (threads * per_thread) as u32;
        assert_eq!(totals.cards[0], total);
        assert_eq!(totals.flushes, (total as u64).div_ceil(batch_size as u64));

        let recorder = recorder.lock().unwrap();
        assert_eq!(recorder.attrs.len(), total as usize);
        // IDs 1..=M, no gaps, no duplicates, on disk in allocation order.
        for (i, (_, ordinal, _)) in recorder.attrs.iter().enumerate() {
            assert_eq!(*ordinal, i as u32 + 1);
        }
        assert_eq!(recorder.urls.len(), total as usize);
    }

    #[test]
    fn test_stress_two_threads() {
        stress(2, 16, 500);
    }

    #[test]
    fn test_stress_eight_threads_tiny_batch() {
        stress(8, 3, 200);
    }

    #[test]
    fn test_stress_more_threads_than_batch_rows() {
        stress(4, 1, 100);
    }

    #[test]
    fn test_multi_subindex_sequences_are_private() {
        let (alloc, recorder) = allocator(5);
        alloc.start_workers(1);
        for i in 0..9u8 {
            let sub = i % 3;
            alloc.allocate(sub, AllocKind::Card, "u").unwrap();
        }
        alloc.stop_worker();
        let totals = alloc.finish().unwrap();
        assert_eq!(totals.cards[0], 3);
        assert_eq!(totals.cards[1], 3);
        assert_eq!(totals.cards[2], 3);

        let recorder = recorder.lock().unwrap();
        for sub in 0..3u8 {
            let ordinals: Vec<u32> = recorder
                .attrs
                .iter()
                .filter(|(s, _, _)| *s == sub)
                .map(|(_, o, _)| *o)
                .collect();
            assert_eq!(ordinals, vec![1, 2, 3]);
        }
    }

    #[test]
    fn test_finish_rejected_while_running() {
        let (alloc, _) = allocator(4);
        alloc.start_workers(1);
        assert!(alloc.finish().is_err());
        alloc.stop_worker();
        assert!(alloc.finish().is_ok());
    }
}

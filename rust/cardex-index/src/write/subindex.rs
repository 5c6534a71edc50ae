//! The per-subindex output file set.
//!
//! Each configured subindex owns one directory under the index root holding
//! its complete, independently queryable partition: attribute table, note
//! table, card file, word- and string-posting files, URL log with its offset
//! index, fingerprint log and the whole-run parameters record.
//!
//! All per-ID tables are append-only and ordinal-checked: an attribute or
//! note record arriving out of sequence is a fatal internal error, never
//! repaired. The fingerprint log sits outside the allocator's batch path and
//! carries its own lock so workers can append without entering the barrier.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use bytemuck::Zeroable;
use cardex_common::{Result, error::Error, verify_arg, verify_invariant};
use cardex_format::chain::{WordChainKey, write_string_chain, write_word_chain};
use cardex_format::records::{
    AttrRecord, FORMAT_VERSION, NoteRecord, PARAMS_MAGIC, ParamsRecord,
};

use crate::alloc::{AllocTotals, BatchSink};
use crate::router::SubIndexSpec;
use crate::write::flush::ChainSink;

/// Attribute table file name.
pub const ATTR_FILE: &str = "attrs.bin";
/// Note table file name.
pub const NOTE_FILE: &str = "notes.bin";
/// Card file name.
pub const CARD_FILE: &str = "cards.bin";
/// Word-posting file name.
pub const WORD_FILE: &str = "words.post";
/// String-posting file name.
pub const STRING_FILE: &str = "strings.post";
/// URL log file name.
pub const URL_FILE: &str = "urls.log";
/// URL offset index file name.
pub const URL_INDEX_FILE: &str = "urls.idx";
/// Fingerprint log file name.
pub const FINGERPRINT_FILE: &str = "fingerprints.bin";
/// Parameters record file name.
pub const PARAMS_FILE: &str = "params.bin";

/// Directory of one subindex under the index root.
pub fn subindex_dir(root: &Path, name: &str) -> PathBuf {
    root.join(name)
}

/// An append-only log shared between workers, locked independently of the
/// allocator's batch path.
pub struct SharedLog {
    file: Mutex<BufWriter<File>>,
}

impl SharedLog {
    fn create(path: &Path) -> Result<SharedLog> {
        let file = File::create(path).map_err(|e| Error::io("create log", e))?;
        Ok(SharedLog {
            file: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Appends one blob atomically with respect to other appenders.
    pub fn append(&self, bytes: &[u8]) -> Result<()> {
        let mut file = self.file.lock().expect("log lock");
        file.write_all(bytes).map_err(|e| Error::io("append log", e))
    }

    fn flush(&self) -> Result<()> {
        let mut file = self.file.lock().expect("log lock");
        file.flush().map_err(|e| Error::io("flush log", e))
    }
}

struct SubIndexFiles {
    attrs: BufWriter<File>,
    notes: BufWriter<File>,
    cards: BufWriter<File>,
    words: BufWriter<File>,
    strings: BufWriter<File>,
    urls: BufWriter<File>,
    url_index: BufWriter<File>,
    url_offset: u64,
    card_offset: u64,
    /// Next expected ordinal in the attribute table.
    next_attr: u32,
    /// Next expected ordinal in the note table.
    next_note: u32,
    dir: PathBuf,
}

impl SubIndexFiles {
    fn create(dir: &Path) -> Result<SubIndexFiles> {
        fs::create_dir_all(dir)
            .map_err(|e| Error::io(format!("create {}", dir.display()), e))?;
        let open = |name: &str| -> Result<BufWriter<File>> {
            let path = dir.join(name);
            let file = File::create(&path)
                .map_err(|e| Error::io(format!("create {}", path.display()), e))?;
            Ok(BufWriter::new(file))
        };
        let mut files = SubIndexFiles {
            attrs: open(ATTR_FILE)?,
            notes: open(NOTE_FILE)?,
            cards: open(CARD_FILE)?,
            words: open(WORD_FILE)?,
            strings: open(STRING_FILE)?,
            urls: open(URL_FILE)?,
            url_index: open(URL_INDEX_FILE)?,
            url_offset: 0,
            card_offset: 0,
            next_attr: 1,
            next_note: 1,
            dir: dir.to_path_buf(),
        };
        // Permanent dummy record 0 in both per-ID tables.
        files.write_pod(Table::Attr, &AttrRecord::zeroed())?;
        files.write_pod(Table::Note, &NoteRecord::zeroed())?;
        Ok(files)
    }

    fn write_pod<T: bytemuck::Pod>(&mut self, table: Table, record: &T) -> Result<()> {
        let out = match table {
            Table::Attr => &mut self.attrs,
            Table::Note => &mut self.notes,
        };
        out.write_all(bytemuck::bytes_of(record))
            .map_err(|e| Error::io("write table record", e))
    }

    fn flush_all(&mut self) -> Result<()> {
        for out in [
            &mut self.attrs,
            &mut self.notes,
            &mut self.cards,
            &mut self.words,
            &mut self.strings,
            &mut self.urls,
            &mut self.url_index,
        ] {
            out.flush().map_err(|e| Error::io("flush subindex", e))?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum Table {
    Attr,
    Note,
}

/// The complete output file set of one indexing run.
pub struct SubIndexSet {
    files: Mutex<Vec<SubIndexFiles>>,
    fingerprints: Vec<SharedLog>,
    specs: Vec<SubIndexSpec>,
    align_shift: u32,
    seed: u64,
    timestamp: u64,
}

impl SubIndexSet {
    /// Creates the directory tree and opens every output file, writing the
    /// dummy record 0 of each per-ID table.
    pub fn create(
        root: &Path,
        specs: &[SubIndexSpec],
        align_shift: u32,
        seed: u64,
    ) -> Result<SubIndexSet> {
        verify_arg!(specs, !specs.is_empty());
        verify_arg!(align_shift, align_shift <= 16);
        let mut files = Vec::with_capacity(specs.len());
        let mut fingerprints = Vec::with_capacity(specs.len());
        for spec in specs {
            let dir = subindex_dir(root, &spec.name);
            files.push(SubIndexFiles::create(&dir)?);
            fingerprints.push(SharedLog::create(&dir.join(FINGERPRINT_FILE))?);
        }
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        log::info!(
            "opened {} subindex output set(s) under {}",
            specs.len(),
            root.display()
        );
        Ok(SubIndexSet {
            files: Mutex::new(files),
            fingerprints,
            specs: specs.to_vec(),
            align_shift,
            seed,
            timestamp,
        })
    }

    /// The card record alignment shift of this run.
    pub fn align_shift(&self) -> u32 {
        self.align_shift
    }

    /// Appends one block-aligned card record, returning the shifted offset
    /// for the attribute record's position field.
    pub fn write_card(&self, sub: u8, record: &[u8]) -> Result<u32> {
        let mut files = self.files.lock().expect("subindex lock");
        let files = &mut files[sub as usize];
        let offset = files.card_offset;
        debug_assert_eq!(record.len() % (1usize << self.align_shift), 0);
        files
            .cards
            .write_all(record)
            .map_err(|e| Error::io("write card record", e))?;
        files.card_offset += record.len() as u64;
        let pos = offset >> self.align_shift;
        u32::try_from(pos)
            .map_err(|_| Error::invalid_operation(format!("card file overflow in subindex {sub}")))
    }

    /// Appends a document fingerprint, outside the allocator's batch path.
    pub fn append_fingerprint(&self, sub: u8, fingerprint: u128) -> Result<()> {
        self.fingerprints[sub as usize].append(&fingerprint.to_le_bytes())
    }

    /// Writes every parameters record and flushes all files. Call once,
    /// after the final posting flush.
    pub fn finish(&self, totals: &AllocTotals) -> Result<()> {
        let mut files = self.files.lock().expect("subindex lock");
        for (ord, (spec, files)) in self.specs.iter().zip(files.iter_mut()).enumerate() {
            let params = ParamsRecord {
                magic: PARAMS_MAGIC,
                version: FORMAT_VERSION,
                timestamp: self.timestamp,
                seed: self.seed,
                card_count: totals.cards[ord],
                skeleton_count: totals.skeletons[ord],
                subindex_count: self.specs.len() as u32,
                subindex_ord: ord as u32,
                type_mask: spec.type_mask,
                id_mask: spec.id_mask,
                align_shift: self.align_shift,
                reserved: 0,
            };
            fs::write(files.dir.join(PARAMS_FILE), bytemuck::bytes_of(&params))
                .map_err(|e| Error::io("write params record", e))?;
            files.flush_all()?;
        }
        for log in &self.fingerprints {
            log.flush()?;
        }
        Ok(())
    }

    fn write_record(
        &self,
        sub: u8,
        ordinal: u32,
        table: Table,
        write: impl FnOnce(&mut SubIndexFiles) -> Result<()>,
    ) -> Result<()> {
        let mut files = self.files.lock().expect("subindex lock");
        let files = &mut files[sub as usize];
        let expected = match table {
            Table::Attr => &mut files.next_attr,
            Table::Note => &mut files.next_note,
        };
        verify_invariant!(
            subindex_tables,
            ordinal == *expected,
            "subindex {sub}: record for ordinal {ordinal}, expected {}",
            *expected
        );
        *expected += 1;
        write(files)
    }
}

impl BatchSink for Arc<SubIndexSet> {
    fn write_attr(&mut self, sub: u8, ordinal: u32, attr: &AttrRecord) -> Result<()> {
        self.write_record(sub, ordinal, Table::Attr, |files| {
            files.write_pod(Table::Attr, attr)
        })
    }

    fn write_note(&mut self, sub: u8, ordinal: u32, note: &NoteRecord) -> Result<()> {
        self.write_record(sub, ordinal, Table::Note, |files| {
            files.write_pod(Table::Note, note)
        })
    }

    fn write_url(&mut self, sub: u8, url: &str) -> Result<()> {
        let mut files = self.files.lock().expect("subindex lock");
        let files = &mut files[sub as usize];
        let offset = files.url_offset;
        files
            .url_index
            .write_all(&offset.to_le_bytes())
            .map_err(|e| Error::io("write url index", e))?;
        files
            .urls
            .write_all(url.as_bytes())
            .and_then(|_| files.urls.write_all(b"\n"))
            .map_err(|e| Error::io("write url log", e))?;
        files.url_offset += url.len() as u64 + 1;
        Ok(())
    }
}

impl ChainSink for Arc<SubIndexSet> {
    fn word_chain(&mut self, sub: u8, key: WordChainKey, chain: &[u8]) -> Result<()> {
        let mut record = Vec::with_capacity(chain.len() + 8);
        write_word_chain(&mut record, key, chain);
        let mut files = self.files.lock().expect("subindex lock");
        files[sub as usize]
            .words
            .write_all(&record)
            .map_err(|e| Error::io("write word chain", e))
    }

    fn string_chain(&mut self, sub: u8, fingerprint: u128, chain: &[u8]) -> Result<()> {
        let mut record = Vec::with_capacity(chain.len() + 20);
        write_string_chain(&mut record, fingerprint, chain);
        let mut files = self.files.lock().expect("subindex lock");
        files[sub as usize]
            .strings
            .write_all(&record)
            .map_err(|e| Error::io("write string chain", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardex_format::postings::ChainMode;
    use cardex_format::records::DEFAULT_ALIGN_SHIFT;

    fn open_set(root: &Path) -> Arc<SubIndexSet> {
        let specs = vec![SubIndexSpec::main()];
        Arc::new(SubIndexSet::create(root, &specs, DEFAULT_ALIGN_SHIFT, 7).unwrap())
    }

    #[test]
    fn test_tables_start_with_dummy_record() {
        let dir = tempfile::tempdir().unwrap();
        let set = open_set(dir.path());
        set.finish(&AllocTotals::default()).unwrap();
        let attrs = fs::read(dir.path().join("main").join(ATTR_FILE)).unwrap();
        assert_eq!(attrs.len(), std::mem::size_of::<AttrRecord>());
        assert!(attrs.iter().all(|&b| b == 0));
        let notes = fs::read(dir.path().join("main").join(NOTE_FILE)).unwrap();
        assert_eq!(notes.len(), std::mem::size_of::<NoteRecord>());
    }

    #[test]
    fn test_attr_records_land_at_ordinal_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let mut set = open_set(dir.path());
        for ordinal in 1..=3u32 {
            let attr = AttrRecord {
                weight: ordinal as i32,
                ..Zeroable::zeroed()
            };
            set.write_attr(0, ordinal, &attr).unwrap();
        }
        set.finish(&AllocTotals::default()).unwrap();
        let bytes = fs::read(dir.path().join("main").join(ATTR_FILE)).unwrap();
        let size = std::mem::size_of::<AttrRecord>();
        assert_eq!(bytes.len(), 4 * size);
        let second: AttrRecord = bytemuck::pod_read_unaligned(&bytes[2 * size..3 * size]);
        assert_eq!(second.weight, 2);
    }

    #[test]
    fn test_ordinal_gap_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut set = open_set(dir.path());
        let attr = AttrRecord::zeroed();
        set.write_attr(0, 1, &attr).unwrap();
        let err = set.write_attr(0, 3, &attr).unwrap_err();
        assert!(err.to_string().contains("expected 2"));
    }

    #[test]
    fn test_url_log_and_index_stay_parallel() {
        let dir = tempfile::tempdir().unwrap();
        let mut set = open_set(dir.path());
        set.write_url(0, "http://a/").unwrap();
        set.write_url(0, "http://bb/").unwrap();
        set.finish(&AllocTotals::default()).unwrap();
        let log = fs::read(dir.path().join("main").join(URL_FILE)).unwrap();
        assert_eq!(log, b"http://a/\nhttp://bb/\n");
        let index = fs::read(dir.path().join("main").join(URL_INDEX_FILE)).unwrap();
        assert_eq!(index.len(), 16);
        assert_eq!(u64::from_le_bytes(index[..8].try_into().unwrap()), 0);
        assert_eq!(u64::from_le_bytes(index[8..].try_into().unwrap()), 10);
    }

    #[test]
    fn test_card_positions_are_shifted_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let set = open_set(dir.path());
        let record = vec![0u8; 32];
        assert_eq!(set.write_card(0, &record).unwrap(), 0);
        assert_eq!(set.write_card(0, &record).unwrap(), 2);
        let more = vec![0u8; 16];
        assert_eq!(set.write_card(0, &more).unwrap(), 4);
    }

    #[test]
    fn test_chains_and_fingerprints_round_trip() {
        use cardex_format::chain::{ChainEntry, encode_card_body, write_card_head};

        let dir = tempfile::tempdir().unwrap();
        let mut set = open_set(dir.path());
        let key = WordChainKey {
            word_id: 42,
            mode: ChainMode::Word,
        };
        let entries = [ChainEntry::Word { wtype: 0, pos: 3 }];
        let mut body = Vec::new();
        write_card_head(&mut body, 1, 1).unwrap();
        encode_card_body(&mut body, &entries, ChainMode::Word);
        set.word_chain(0, key, &body).unwrap();

        let meta = [ChainEntry::Meta { mtype: 1, pos: 0 }];
        let mut string_body = Vec::new();
        write_card_head(&mut string_body, 1, 2).unwrap();
        encode_card_body(&mut string_body, &meta, ChainMode::Meta);
        set.string_chain(0, 0xABCD, &string_body).unwrap();

        set.append_fingerprint(0, 0x1122).unwrap();
        set.finish(&AllocTotals::default()).unwrap();

        let words = fs::read(dir.path().join("main").join(WORD_FILE)).unwrap();
        let chains = cardex_format::chain::read_word_chains(&words).unwrap();
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].0.word_id, 42);
        assert_eq!(chains[0].1[0].entries, entries);

        let strings = fs::read(dir.path().join("main").join(STRING_FILE)).unwrap();
        let chains = cardex_format::chain::read_string_chains(&strings).unwrap();
        assert_eq!(chains[0].0, 0xABCD);

        let fps = fs::read(dir.path().join("main").join(FINGERPRINT_FILE)).unwrap();
        assert_eq!(u128::from_le_bytes(fps[..16].try_into().unwrap()), 0x1122);
    }

    #[test]
    fn test_params_record_written_at_finish() {
        let dir = tempfile::tempdir().unwrap();
        let set = open_set(dir.path());
        let mut totals = AllocTotals::default();
        totals.cards[0] = 12;
        totals.skeletons[0] = 3;
        set.finish(&totals).unwrap();
        let bytes = fs::read(dir.path().join("main").join(PARAMS_FILE)).unwrap();
        let params: ParamsRecord = bytemuck::pod_read_unaligned(&bytes);
        assert_eq!(params.magic, PARAMS_MAGIC);
        assert_eq!(params.version, FORMAT_VERSION);
        assert_eq!(params.seed, 7);
        assert_eq!(params.card_count, 12);
        assert_eq!(params.skeleton_count, 3);
        assert_eq!(params.subindex_count, 1);
        assert_eq!(params.align_shift, DEFAULT_ALIGN_SHIFT);
    }
}

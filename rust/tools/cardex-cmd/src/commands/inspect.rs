//! Inspect command implementation

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Serialize;

use cardex_format::chain::{read_string_chains, read_word_chains};
use cardex_format::records::{AttrRecord, NoteRecord, PARAMS_MAGIC, ParamsRecord};
use cardex_index::write::subindex::{
    ATTR_FILE, CARD_FILE, NOTE_FILE, PARAMS_FILE, STRING_FILE, URL_FILE, WORD_FILE,
};

#[derive(Serialize)]
struct InspectSummary {
    subindices: Vec<SubIndexInfo>,
}

#[derive(Serialize)]
struct SubIndexInfo {
    name: String,
    params: ParamsInfo,
    attr_records: u64,
    note_records: u64,
    url_count: usize,
    card_file_bytes: u64,
    word_chains: usize,
    string_chains: usize,
}

#[derive(Serialize)]
struct ParamsInfo {
    version: u32,
    timestamp: u64,
    seed: u64,
    card_count: u32,
    skeleton_count: u32,
    subindex_ord: u32,
    subindex_count: u32,
    type_mask: u32,
    id_mask: u32,
    align_shift: u32,
}

/// Run the inspect command
pub fn run(index_dir: String) -> Result<()> {
    let root = Path::new(&index_dir);
    let mut subindices = Vec::new();
    for entry in fs::read_dir(root).with_context(|| format!("read {index_dir}"))? {
        let entry = entry?;
        let dir = entry.path();
        if dir.is_dir() && dir.join(PARAMS_FILE).is_file() {
            subindices.push(inspect_subindex(&dir)?);
        }
    }
    if subindices.is_empty() {
        bail!("no subindex found under {index_dir}");
    }
    subindices.sort_by_key(|s: &SubIndexInfo| s.params.subindex_ord);

    let summary = InspectSummary { subindices };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn inspect_subindex(dir: &Path) -> Result<SubIndexInfo> {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let bytes = fs::read(dir.join(PARAMS_FILE))
        .with_context(|| format!("read params of {name}"))?;
    if bytes.len() != std::mem::size_of::<ParamsRecord>() {
        bail!("subindex {name}: malformed parameters record");
    }
    let params: ParamsRecord = bytemuck::pod_read_unaligned(&bytes);
    if params.magic != PARAMS_MAGIC {
        bail!("subindex {name}: bad parameters magic {:#x}", params.magic);
    }

    let table_records = |file: &str, record_size: u64| -> Result<u64> {
        let len = fs::metadata(dir.join(file))
            .with_context(|| format!("stat {file} of {name}"))?
            .len();
        Ok(len / record_size)
    };
    let attr_records = table_records(ATTR_FILE, std::mem::size_of::<AttrRecord>() as u64)?;
    let note_records = table_records(NOTE_FILE, std::mem::size_of::<NoteRecord>() as u64)?;

    let urls = fs::read_to_string(dir.join(URL_FILE))
        .with_context(|| format!("read urls of {name}"))?;
    let words = fs::read(dir.join(WORD_FILE))
        .with_context(|| format!("read word postings of {name}"))?;
    let strings = fs::read(dir.join(STRING_FILE))
        .with_context(|| format!("read string postings of {name}"))?;

    Ok(SubIndexInfo {
        word_chains: read_word_chains(&words)?.len(),
        string_chains: read_string_chains(&strings)?.len(),
        url_count: urls.lines().count(),
        card_file_bytes: fs::metadata(dir.join(CARD_FILE))?.len(),
        attr_records,
        note_records,
        name,
        params: ParamsInfo {
            version: params.version,
            timestamp: params.timestamp,
            seed: params.seed,
            card_count: params.card_count,
            skeleton_count: params.skeleton_count,
            subindex_ord: params.subindex_ord,
            subindex_count: params.subindex_count,
            type_mask: params.type_mask,
            id_mask: params.id_mask,
            align_shift: params.align_shift,
        },
    })
}

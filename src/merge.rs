//! Merge (compaction): rewrites only the still-live records from every
//! older data file into a fresh, denser sequence of files, dropping
//! anything shadowed by a later write or a tombstone.
//!
//! The rewrite happens in a throwaway secondary [`Engine`] pointed at a
//! sibling `<dir>-Merge` directory so the live engine keeps serving reads
//! and writes (against its still-rotated-out active file) throughout.
//! A `merge-finished` marker, written last, gates whether a half-done
//! merge directory gets promoted or discarded on the next [`Engine::open`].

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use tracing::info;

use crate::data_file::{DATA_FILE_SUFFIX, DataFile, MERGE_FINISHED_FILE_NAME, ReadOutcome};
use crate::engine::Engine;
use crate::error::Result;
use crate::io::IOKind;
use crate::options::Options;
use crate::position::Position;
use crate::record::{NON_TXN_SEQ_NO, Record, RecordType, encode_composite_key, parse_composite_key};

const MERGE_DIR_SUFFIX: &str = "-Merge";

pub fn merge_dir_path(dir: &Path) -> PathBuf {
    let name = dir.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    dir.with_file_name(format!("{name}{MERGE_DIR_SUFFIX}"))
}

/// Runs one merge pass against `engine`. Blocks concurrent merges via
/// `engine`'s merge lock rather than queuing them.
pub fn run_merge(engine: &Engine) -> Result<()> {
    let lock = engine.merging_lock();
    let _guard = lock.try_lock().map_err(|_| crate::error::StorageError::MergeInProgress)?;

    let merge_dir = merge_dir_path(&engine.options.dir_path);
    if merge_dir.exists() {
        fs::remove_dir_all(&merge_dir)?;
    }
    fs::create_dir_all(&merge_dir)?;

    let (non_merge_boundary, file_ids) = rotate_and_snapshot(engine)?;
    info!(non_merge_boundary, files = file_ids.len(), "merge starting");

    // The scratch engine's index is never consulted: every lookup below
    // goes through `engine.index`, and the rewritten records are recovered
    // from the hint file on the next open, not from this index. Forcing it
    // to the in-memory variant keeps merging leave no `bptree-index`/`seq-no`
    // file in `merge_dir` for `load_merge_files` to promote over the real
    // ones when the live engine runs the persistent B+ tree index.
    let merge_options = Options {
        dir_path: merge_dir.clone(),
        sync_writes: false,
        index_type: crate::options::IndexType::OrderedTree,
        ..engine.options.clone()
    };
    let merge_engine = Engine::open(merge_options)?;
    let hint_file = DataFile::open_hint_file(&merge_dir)?;

    for file_id in file_ids {
        let mut offset = 0u64;
        loop {
            let (record, size) = match engine.read_at(file_id, offset)? {
                ReadOutcome::Eof => break,
                ReadOutcome::Record { record, size } => (record, size),
            };
            let (_, user_key) = parse_composite_key(&record.key)?;
            let current_pos = Position::new(file_id, offset as i64, size as u32);

            if engine.index.get(user_key) == Some(current_pos) {
                let rewritten = Record::new(
                    encode_composite_key(NON_TXN_SEQ_NO, user_key),
                    record.value,
                    RecordType::Normal,
                );
                let new_pos = merge_engine.append_log_record(&rewritten)?;
                hint_file.write_hint_record(user_key.to_vec(), new_pos)?;
            }

            offset += size;
        }
    }

    hint_file.sync()?;
    merge_engine.sync()?;
    merge_engine.close()?;

    let marker_file = DataFile::open_merge_finished_file(&merge_dir)?;
    let marker = Record::new(Vec::new(), non_merge_boundary.to_string().into_bytes(), RecordType::Normal);
    let (encoded, _) = marker.encode();
    marker_file.write(&encoded)?;
    marker_file.sync()?;

    info!(non_merge_boundary, "merge finished");
    Ok(())
}

/// Rotates the active file so future writes land past the merge's cutoff,
/// and returns `(non_merge_boundary, snapshotted_older_file_ids)`, where
/// `non_merge_boundary` is the id of the freshly rotated-in active file.
fn rotate_and_snapshot(engine: &Engine) -> Result<(u32, Vec<u32>)> {
    let mut active = engine.active_file.write().expect("active file lock poisoned");
    active.sync()?;
    let old_id = active.file_id();
    let new_active = DataFile::open(&engine.options.dir_path, old_id + 1, IOKind::Standard)?;
    let old_active = std::mem::replace(&mut *active, new_active);
    drop(active);

    let mut older = engine.older_files.write().expect("older files lock poisoned");
    older.insert(old_id, old_active);
    let mut file_ids: Vec<u32> = older.keys().copied().filter(|&id| id < old_id + 1).collect();
    file_ids.sort_unstable();

    Ok((old_id + 1, file_ids))
}

/// Called from [`Engine::open`] before data files are loaded. If a
/// finished merge sits in `<dir>-Merge`, promotes its files into `dir`
/// (deleting everything older than the merge's boundary first). An
/// unfinished merge directory (crash mid-merge) is discarded.
pub fn load_merge_files(dir_path: &Path) -> Result<()> {
    let merge_dir = merge_dir_path(dir_path);
    if !merge_dir.exists() {
        return Ok(());
    }

    let finished_marker = merge_dir.join(MERGE_FINISHED_FILE_NAME);
    if !finished_marker.exists() {
        fs::remove_dir_all(&merge_dir)?;
        return Ok(());
    }

    let boundary = read_boundary_marker(&merge_dir)?;

    for entry in fs::read_dir(dir_path)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(id_str) = name.strip_suffix(DATA_FILE_SUFFIX) {
            if let Ok(id) = id_str.parse::<u32>() {
                if id < boundary {
                    fs::remove_file(entry.path())?;
                }
            }
        }
    }

    for entry in fs::read_dir(&merge_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if name == "flock" {
            continue;
        }
        fs::rename(entry.path(), dir_path.join(&name))?;
    }

    fs::remove_dir_all(&merge_dir)?;
    Ok(())
}

fn read_boundary_marker(dir: &Path) -> Result<u32> {
    let marker_file = DataFile::open_merge_finished_file(dir)?;
    match marker_file.read_log_record(0)? {
        ReadOutcome::Record { record, .. } => crate::util::parse_decimal_u32(&record.value),
        ReadOutcome::Eof => Ok(0),
    }
}

/// Reads `dir`'s `merge-finished` marker, if one is present (left behind
/// by a prior merge that's since been promoted into `dir` itself), giving
/// the file id below which every record is already captured by the hint
/// file and should not be replayed again.
pub fn get_non_merge_boundary(dir_path: &Path) -> Result<Option<u32>> {
    if !dir_path.join(MERGE_FINISHED_FILE_NAME).exists() {
        return Ok(None);
    }
    Ok(Some(read_boundary_marker(dir_path)?))
}

use std::fs;
use std::path::{Path, PathBuf};

use dedupe_index_common::{ChunkName, IndexError, Vcn, CHUNK_NAME_SIZE};
use serde::{Deserialize, Serialize};

/// What the core persists across a clean `save()` (spec §6: "the core
/// contributes two registered components: master-index info and index-page-
/// map info... the core itself persists only `last_checkpoint` implicitly").
/// The wire format itself is unscoped by the spec — this is this
/// implementation's own state-store collaborator, a single JSON file rather
/// than the teacher's segment-log format, since there is no append-only
/// write path here to reuse it for.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistedIndexState {
    /// `None` means the prior session never reached a clean save; `load`
    /// must fall back to replay from the last checkpoint instead of
    /// trusting this snapshot. `Some(n)` is `last_checkpoint + 1` — the
    /// open chapter number at the moment of the last successful `save()`
    /// (spec §9's `Checkpoint` sentinel mapping).
    pub saved_open_chapter_number: Option<u64>,
    /// `Index::oldest_virtual_chapter` as of the last successful save.
    /// Unlike `last_checkpoint`, this is not implicit in any other
    /// persisted field, so it is carried explicitly.
    pub oldest_virtual_chapter: u64,
    pub zone_open_chapters: Vec<Vec<([u8; CHUNK_NAME_SIZE], u64)>>,
    pub master_index_entries: Vec<(usize, [u8; CHUNK_NAME_SIZE], Vcn)>,
}

impl PersistedIndexState {
    pub fn new(
        saved_open_chapter_number: Option<u64>,
        oldest_virtual_chapter: u64,
        zone_open_chapters: Vec<Vec<(ChunkName, u64)>>,
        master_index_entries: Vec<(usize, ChunkName, Vcn)>,
    ) -> Self {
        Self {
            saved_open_chapter_number,
            oldest_virtual_chapter,
            zone_open_chapters: zone_open_chapters
                .into_iter()
                .map(|zone| zone.into_iter().map(|(name, data)| (*name.as_bytes(), data)).collect())
                .collect(),
            master_index_entries: master_index_entries
                .into_iter()
                .map(|(zone, name, vcn)| (zone, *name.as_bytes(), vcn))
                .collect(),
        }
    }

    pub fn zone_open_chapter(&self, zone: usize) -> Vec<(ChunkName, u64)> {
        self.zone_open_chapters
            .get(zone)
            .map(|entries| entries.iter().map(|(bytes, data)| (ChunkName::new(*bytes), *data)).collect())
            .unwrap_or_default()
    }

    pub fn master_index_entries(&self) -> Vec<(usize, ChunkName, Vcn)> {
        self.master_index_entries
            .iter()
            .map(|(zone, bytes, vcn)| (*zone, ChunkName::new(*bytes), *vcn))
            .collect()
    }
}

pub fn state_path(base_dir: &Path) -> PathBuf {
    base_dir.join("index_state.json")
}

/// `None` when no state file exists yet — a brand-new volume, or one never
/// saved cleanly before a crash.
pub fn load(base_dir: &Path) -> Result<Option<PersistedIndexState>, IndexError> {
    let path = state_path(base_dir);
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(&path)?;
    let state = serde_json::from_slice(&bytes)
        .map_err(|error| IndexError::CorruptData(format!("index_state.json: {error}")))?;
    Ok(Some(state))
}

/// Atomic write: serialize to a temp file in the same directory, then
/// rename over the final path, so a crash mid-write never leaves a
/// half-written `index_state.json` behind.
pub fn save(base_dir: &Path, state: &PersistedIndexState) -> Result<(), IndexError> {
    let path = state_path(base_dir);
    let tmp_path = base_dir.join("index_state.json.tmp");
    let bytes = serde_json::to_vec(state)
        .map_err(|error| IndexError::CorruptData(format!("index_state.json: {error}")))?;
    fs::write(&tmp_path, bytes)?;
    fs::rename(&tmp_path, &path)?;
    Ok(())
}

pub fn discard(base_dir: &Path) -> Result<(), IndexError> {
    let path = state_path(base_dir);
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn name(b: u8) -> ChunkName {
        ChunkName::new([b; CHUNK_NAME_SIZE])
    }

    #[test]
    fn missing_state_file_loads_as_none() {
        let dir = TempDir::new().unwrap();
        assert!(load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let state = PersistedIndexState::new(
            Some(7),
            2,
            vec![vec![(name(1), 11)]],
            vec![(0, name(2), 3)],
        );
        save(dir.path(), &state).unwrap();

        let loaded = load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.saved_open_chapter_number, Some(7));
        assert_eq!(loaded.oldest_virtual_chapter, 2);
        assert_eq!(loaded.zone_open_chapter(0), vec![(name(1), 11)]);
        assert_eq!(loaded.master_index_entries(), vec![(0, name(2), 3)]);
    }

    #[test]
    fn discard_is_idempotent() {
        let dir = TempDir::new().unwrap();
        discard(dir.path()).unwrap();
        let state = PersistedIndexState::new(None, 0, vec![], vec![]);
        save(dir.path(), &state).unwrap();
        discard(dir.path()).unwrap();
        assert!(load(dir.path()).unwrap().is_none());
        discard(dir.path()).unwrap();
    }
}

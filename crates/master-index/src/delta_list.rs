use std::collections::HashMap;
use std::sync::Mutex;

use dedupe_index_common::{
    ChunkName, Geometry, IndexError, MasterIndex, MasterIndexRecord, MasterIndexTriage, Vcn,
};

use crate::sample::is_master_index_sample;

/// Spread names across delta lists independently of the sampling decision
/// (which uses `leading_u64`) so the two hash-derived choices don't alias on
/// small synthetic test fixtures. Prime, not a power of two, per the
/// teacher's `materialize.rs` page-id hashing convention.
const LIST_COUNT: u64 = 997;

struct DeltaEntry {
    name: ChunkName,
    virtual_chapter: Vcn,
}

struct ZoneState {
    lists: HashMap<u64, Vec<DeltaEntry>>,
    open_chapter: Vcn,
}

/// In-memory fingerprint -> (virtual chapter, collision bit) delta-list
/// store, sharded per zone. Grounded on `pagestore/src/materialize.rs`'s
/// per-page redo-chain model (a map keyed by a derived slot number, chained
/// on collision) and on `other_examples/299a4d6f_gmash24-parity-db__src-
/// column.rs.rs`'s `IndexTable`/`get_in_index` collision-chain walk — the
/// closest pack example to a delta-list-with-collisions structure.
///
/// A list holding more than one name is, by this implementation's
/// definition, a collision: any record resolved through it reports
/// `collision = true`, matching the externally observable contract in spec
/// §3 even though this concrete store (unlike the real delta-list codec)
/// never silently loses track of which name owns which chapter.
pub struct DeltaListMasterIndex {
    geometry: Geometry,
    max_list_size: usize,
    zones: Vec<Mutex<ZoneState>>,
}

impl DeltaListMasterIndex {
    pub fn new(geometry: Geometry, zone_count: usize, max_list_size: usize) -> Self {
        let zones = (0..zone_count.max(1))
            .map(|_| Mutex::new(ZoneState { lists: HashMap::new(), open_chapter: 0 }))
            .collect();
        Self { geometry, max_list_size, zones }
    }

    fn list_number(&self, name: &ChunkName) -> u64 {
        name.leading_u64() % LIST_COUNT
    }

    /// Every `(zone, name, virtual_chapter)` triple currently tracked.
    /// Not part of the `MasterIndex` trait: persistence is a concrete-type
    /// capability the core's loader uses directly (spec §6's "state store"
    /// collaborator has no prescribed wire format), not something a zone's
    /// request handling ever needs.
    pub fn snapshot(&self) -> Vec<(usize, ChunkName, Vcn)> {
        let mut out = Vec::new();
        for (zone_index, zone) in self.zones.iter().enumerate() {
            let state = zone.lock().unwrap();
            for entries in state.lists.values() {
                for entry in entries {
                    out.push((zone_index, entry.name, entry.virtual_chapter));
                }
            }
        }
        out
    }

    /// Replace the whole store's contents with a previously captured
    /// snapshot (clean `LOAD` fast path, skipping a full replay scan).
    pub fn restore(&self, entries: &[(usize, ChunkName, Vcn)]) {
        for zone in &self.zones {
            zone.lock().unwrap().lists.clear();
        }
        for &(zone_index, name, virtual_chapter) in entries {
            let mut state = self.zones[zone_index].lock().unwrap();
            let list = self.list_number(&name);
            state.lists.entry(list).or_default().push(DeltaEntry { name, virtual_chapter });
        }
    }
}

impl MasterIndex for DeltaListMasterIndex {
    fn get_record(&self, zone: usize, name: &ChunkName) -> Result<MasterIndexRecord, IndexError> {
        let state = self.zones[zone].lock().unwrap();
        let list = self.list_number(name);
        let Some(entries) = state.lists.get(&list) else {
            return Ok(MasterIndexRecord::not_found(*name, zone));
        };
        let collision = entries.len() > 1;
        match entries.iter().find(|e| e.name == *name) {
            Some(entry) => Ok(MasterIndexRecord {
                name: *name,
                zone,
                found: true,
                collision,
                virtual_chapter: entry.virtual_chapter,
            }),
            None => Ok(MasterIndexRecord::not_found(*name, zone)),
        }
    }

    fn set_record_chapter(&self, record: &MasterIndexRecord, vcn: Vcn) -> Result<(), IndexError> {
        let mut state = self.zones[record.zone].lock().unwrap();
        let list = self.list_number(&record.name);
        let entries = state.lists.get_mut(&list).ok_or_else(|| {
            IndexError::BadState("set_record_chapter on a name with no delta list entry".into())
        })?;
        let entry = entries
            .iter_mut()
            .find(|e| e.name == record.name)
            .ok_or_else(|| IndexError::BadState("set_record_chapter on an absent record".into()))?;
        entry.virtual_chapter = vcn;
        Ok(())
    }

    fn put_record(&self, record: &MasterIndexRecord, vcn: Vcn) -> Result<(), IndexError> {
        let mut state = self.zones[record.zone].lock().unwrap();
        let list = self.list_number(&record.name);
        let entries = state.lists.entry(list).or_default();
        if entries.iter().any(|e| e.name == record.name) {
            return Err(IndexError::DuplicateName);
        }
        if entries.len() >= self.max_list_size {
            tracing::warn!(list = list, max_list_size = self.max_list_size, "delta list overflow");
            return Err(IndexError::Overflow);
        }
        entries.push(DeltaEntry { name: record.name, virtual_chapter: vcn });
        Ok(())
    }

    fn remove_record(&self, record: &MasterIndexRecord) -> Result<(), IndexError> {
        let mut state = self.zones[record.zone].lock().unwrap();
        let list = self.list_number(&record.name);
        if let Some(entries) = state.lists.get_mut(&list) {
            entries.retain(|e| e.name != record.name);
            if entries.is_empty() {
                state.lists.remove(&list);
            }
        }
        Ok(())
    }

    fn is_sample(&self, name: &ChunkName) -> bool {
        is_master_index_sample(name)
    }

    fn set_open_chapter(&self, vcn: Vcn) {
        for zone in &self.zones {
            zone.lock().unwrap().open_chapter = vcn;
        }
    }

    fn lookup_name(&self, zone: usize, name: &ChunkName) -> MasterIndexTriage {
        let record = match self.get_record(zone, name) {
            Ok(record) => record,
            Err(_) => return MasterIndexTriage { in_sampled_chapter: false, virtual_chapter: 0 },
        };
        if !record.found {
            return MasterIndexTriage { in_sampled_chapter: false, virtual_chapter: 0 };
        }
        let open_chapter = self.zones[zone].lock().unwrap().open_chapter;
        let from = open_chapter.saturating_sub(self.geometry.chapters_per_volume);
        let in_sampled_chapter =
            self.geometry.is_chapter_sparse(from, open_chapter, record.virtual_chapter);
        MasterIndexTriage { in_sampled_chapter, virtual_chapter: record.virtual_chapter }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dedupe_index_common::CHUNK_NAME_SIZE;

    fn geo() -> Geometry {
        Geometry::new(10, 1, 9, 256, 4).unwrap()
    }

    fn name(b: u8) -> ChunkName {
        ChunkName::new([b; CHUNK_NAME_SIZE])
    }

    #[test]
    fn put_then_get_round_trips() {
        let mi = DeltaListMasterIndex::new(geo(), 1, 100);
        let record = MasterIndexRecord::not_found(name(1), 0);
        mi.put_record(&record, 5).unwrap();
        let found = mi.get_record(0, &name(1)).unwrap();
        assert!(found.is_found());
        assert!(!found.is_collision());
        assert_eq!(found.virtual_chapter, 5);
    }

    #[test]
    fn duplicate_put_is_rejected() {
        let mi = DeltaListMasterIndex::new(geo(), 1, 100);
        let record = MasterIndexRecord::not_found(name(1), 0);
        mi.put_record(&record, 5).unwrap();
        assert!(matches!(mi.put_record(&record, 6), Err(IndexError::DuplicateName)));
    }

    #[test]
    fn overflow_once_list_capacity_is_reached() {
        // Same leading 8 bytes => same delta list (list_number hashes on
        // leading_u64), distinct trailing byte => distinct names.
        let mut a = [3u8; CHUNK_NAME_SIZE];
        let mut b = [3u8; CHUNK_NAME_SIZE];
        a[15] = 1;
        b[15] = 2;
        let name_a = ChunkName::new(a);
        let name_b = ChunkName::new(b);

        let mi = DeltaListMasterIndex::new(geo(), 1, 1);
        mi.put_record(&MasterIndexRecord::not_found(name_a, 0), 5).unwrap();
        assert!(matches!(
            mi.put_record(&MasterIndexRecord::not_found(name_b, 0), 5),
            Err(IndexError::Overflow)
        ));
    }

    #[test]
    fn set_record_chapter_updates_in_place() {
        let mi = DeltaListMasterIndex::new(geo(), 1, 100);
        let record = MasterIndexRecord::not_found(name(1), 0);
        mi.put_record(&record, 5).unwrap();
        let found = mi.get_record(0, &name(1)).unwrap();
        mi.set_record_chapter(&found, 9).unwrap();
        assert_eq!(mi.get_record(0, &name(1)).unwrap().virtual_chapter, 9);
    }

    #[test]
    fn remove_then_get_reports_not_found() {
        let mi = DeltaListMasterIndex::new(geo(), 1, 100);
        let record = MasterIndexRecord::not_found(name(1), 0);
        mi.put_record(&record, 5).unwrap();
        let found = mi.get_record(0, &name(1)).unwrap();
        mi.remove_record(&found).unwrap();
        assert!(!mi.get_record(0, &name(1)).unwrap().is_found());
    }

    #[test]
    fn snapshot_then_restore_round_trips() {
        let mi = DeltaListMasterIndex::new(geo(), 2, 100);
        mi.put_record(&MasterIndexRecord::not_found(name(1), 0), 3).unwrap();
        mi.put_record(&MasterIndexRecord::not_found(name(2), 1), 4).unwrap();

        let snapshot = mi.snapshot();
        assert_eq!(snapshot.len(), 2);

        let restored = DeltaListMasterIndex::new(geo(), 2, 100);
        restored.restore(&snapshot);
        assert_eq!(restored.get_record(0, &name(1)).unwrap().virtual_chapter, 3);
        assert_eq!(restored.get_record(1, &name(2)).unwrap().virtual_chapter, 4);
    }

    #[test]
    fn lookup_name_reports_sampled_chapter_membership() {
        let geometry = geo();
        let mi = DeltaListMasterIndex::new(geometry, 1, 100);
        // name(0) samples (leading_u64 % 32 == 0).
        let record = MasterIndexRecord::not_found(name(0), 0);
        mi.put_record(&record, 8).unwrap();
        mi.set_open_chapter(12); // window [8, 12)

        let triage = mi.lookup_name(0, &name(0));
        assert!(triage.in_sampled_chapter);
        assert_eq!(triage.virtual_chapter, 8);
    }
}

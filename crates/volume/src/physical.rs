use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use dedupe_index_common::{
    ChunkName, Geometry, IndexError, IndexPageSummary, LookupModeGuard, PageContent,
    PhysicalChapterNumber, Vcn, Volume,
};

use crate::format::{
    decode_chapter_header, decode_index_page, decode_record_page, encode_chapter_header,
    encode_index_page, encode_record_page, record_page_size, CHAPTER_HEADER_SIZE, INDEX_PAGE_SIZE,
};
use crate::manifest::VolumeManifest;
use crate::page_cache::VolumePageCache;

/// The physical volume: one fixed-size file per ring slot, holding a
/// chapter's index pages followed by its record pages. Grounded on the
/// teacher's `SegmentManager` (manifest-tracked files under a base
/// directory), generalized from append-only segments to a fixed ring of
/// chapter slots that get overwritten as the ring wraps.
pub struct PhysicalVolume {
    base_dir: PathBuf,
    geometry: Geometry,
    cache: VolumePageCache,
    in_rebuild_lookup: AtomicBool,
}

impl PhysicalVolume {
    pub fn open(base_dir: &Path, geometry: Geometry, nonce: u64) -> Result<Self, IndexError> {
        VolumeManifest::open_or_create(base_dir, geometry, nonce)?;
        fs::create_dir_all(chapters_dir(base_dir))?;
        Ok(Self {
            base_dir: base_dir.to_path_buf(),
            geometry,
            cache: VolumePageCache::new(1024),
            in_rebuild_lookup: AtomicBool::new(false),
        })
    }

    /// Discard any prior on-disk state and start fresh — `make_index(CREATE)`.
    pub fn create(base_dir: &Path, geometry: Geometry, nonce: u64) -> Result<Self, IndexError> {
        VolumeManifest::reset(base_dir, geometry, nonce)?;
        fs::create_dir_all(chapters_dir(base_dir))?;
        Ok(Self {
            base_dir: base_dir.to_path_buf(),
            geometry,
            cache: VolumePageCache::new(1024),
            in_rebuild_lookup: AtomicBool::new(false),
        })
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    fn chapter_path(&self, physical_chapter: PhysicalChapterNumber) -> PathBuf {
        chapters_dir(&self.base_dir).join(format!("chapter_{:08}.chp", physical_chapter))
    }

    fn record_page_offset(&self, record_page_index: u32) -> u64 {
        CHAPTER_HEADER_SIZE as u64
            + (self.geometry.index_pages_per_chapter as u64) * (INDEX_PAGE_SIZE as u64)
            + (record_page_index as u64) * (record_page_size(self.geometry.records_per_page) as u64)
    }

    fn index_page_offset(&self, index_page: u32) -> u64 {
        CHAPTER_HEADER_SIZE as u64 + (index_page as u64) * (INDEX_PAGE_SIZE as u64)
    }

    /// Persist a fully assembled, closed chapter. Called by the
    /// `ChapterWriter` background task, never directly by a zone.
    pub fn write_chapter(
        &self,
        physical_chapter: PhysicalChapterNumber,
        vcn: Vcn,
        index_pages: &[IndexPageSummary],
        record_pages: &[Vec<ChunkName>],
    ) -> Result<(), IndexError> {
        let path = self.chapter_path(physical_chapter);
        let tmp_path = path.with_extension("chp.tmp");
        let mut file = File::create(&tmp_path)?;
        file.write_all(&encode_chapter_header(Some(vcn)))?;
        for page in index_pages {
            file.write_all(&encode_index_page(page))?;
        }
        for records in record_pages {
            file.write_all(&encode_record_page(records, self.geometry.records_per_page))?;
        }
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp_path, &path)?;
        self.cache.invalidate_chapter(physical_chapter);
        Ok(())
    }

    fn read_chapter_header(&self, physical_chapter: PhysicalChapterNumber) -> Result<Option<Vcn>, IndexError> {
        let path = self.chapter_path(physical_chapter);
        if !path.exists() {
            return Ok(None);
        }
        let mut file = File::open(&path)?;
        let mut buf = [0u8; CHAPTER_HEADER_SIZE];
        file.read_exact(&mut buf)?;
        let header = decode_chapter_header(&buf)?;
        Ok(header.vcn)
    }

    fn read_record_page_uncached(
        &self,
        physical_chapter: PhysicalChapterNumber,
        record_page_index: u32,
    ) -> Result<Vec<ChunkName>, IndexError> {
        let path = self.chapter_path(physical_chapter);
        let mut file = File::open(&path)?;
        file.seek(SeekFrom::Start(self.record_page_offset(record_page_index)))?;
        let mut buf = vec![0u8; record_page_size(self.geometry.records_per_page)];
        file.read_exact(&mut buf)?;
        decode_record_page(&buf, self.geometry.records_per_page)
    }
}

fn chapters_dir(base_dir: &Path) -> PathBuf {
    base_dir.join("chapters")
}

impl Volume for PhysicalVolume {
    fn find_chapter_boundaries(&self) -> Result<(Vcn, Vcn, bool), IndexError> {
        let mut lowest: Option<Vcn> = None;
        let mut highest: Option<Vcn> = None;
        for physical in 0..self.geometry.chapters_per_volume {
            if let Some(vcn) = self.read_chapter_header(physical)? {
                lowest = Some(lowest.map_or(vcn, |l| l.min(vcn)));
                highest = Some(highest.map_or(vcn, |h| h.max(vcn)));
            }
        }
        match (lowest, highest) {
            (Some(lowest), Some(highest)) => {
                if lowest > highest {
                    return Err(IndexError::CorruptComponent(
                        "chapter boundary scan found lowest > highest".into(),
                    ));
                }
                Ok((lowest, highest, false))
            }
            _ => Ok((0, 0, true)),
        }
    }

    fn get_page(
        &self,
        physical_chapter: PhysicalChapterNumber,
        page: u32,
    ) -> Result<PageContent, IndexError> {
        if page >= self.geometry.pages_per_chapter() {
            return Err(IndexError::InvalidArgument(format!(
                "page {page} is out of range (chapter holds {} pages)",
                self.geometry.pages_per_chapter()
            )));
        }
        if page < self.geometry.index_pages_per_chapter {
            let path = self.chapter_path(physical_chapter);
            let mut file = File::open(&path)?;
            file.seek(SeekFrom::Start(self.index_page_offset(page)))?;
            let mut buf = [0u8; INDEX_PAGE_SIZE];
            file.read_exact(&mut buf)?;
            Ok(PageContent::Index(decode_index_page(&buf)?))
        } else {
            let record_page_index = page - self.geometry.index_pages_per_chapter;
            if let Some(cached) = self.cache.get(physical_chapter, record_page_index) {
                return Ok(PageContent::Record(cached));
            }
            let records = self.read_record_page_uncached(physical_chapter, record_page_index)?;
            self.cache.insert(physical_chapter, record_page_index, records.clone());
            Ok(PageContent::Record(records))
        }
    }

    fn prefetch_pages(&self, physical_chapter: PhysicalChapterNumber, count: u32) {
        for record_page_index in 0..count.min(self.geometry.record_pages_per_chapter) {
            if self.cache.get(physical_chapter, record_page_index).is_some() {
                continue;
            }
            if let Ok(records) = self.read_record_page_uncached(physical_chapter, record_page_index) {
                self.cache.insert(physical_chapter, record_page_index, records);
            }
        }
        tracing::trace!(physical_chapter, count, "prefetched volume pages");
    }

    fn chapter_contains_name(
        &self,
        physical_chapter: PhysicalChapterNumber,
        name: &ChunkName,
    ) -> Result<bool, IndexError> {
        for record_page_index in 0..self.geometry.record_pages_per_chapter {
            let records = match self.cache.get(physical_chapter, record_page_index) {
                Some(records) => records,
                None => {
                    let records = self.read_record_page_uncached(physical_chapter, record_page_index)?;
                    self.cache.insert(physical_chapter, record_page_index, records.clone());
                    records
                }
            };
            if records.contains(name) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn begin_rebuild_lookup(&self) -> LookupModeGuard<'_> {
        LookupModeGuard::acquire(&self.in_rebuild_lookup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dedupe_index_common::CHUNK_NAME_SIZE;
    use tempfile::TempDir;

    fn geo() -> Geometry {
        Geometry::new(4, 1, 2, 4, 1).unwrap()
    }

    #[test]
    fn empty_volume_reports_empty_boundaries() {
        let dir = TempDir::new().unwrap();
        let volume = PhysicalVolume::create(dir.path(), geo(), 1).unwrap();
        let (lowest, highest, is_empty) = volume.find_chapter_boundaries().unwrap();
        assert!(is_empty);
        assert_eq!((lowest, highest), (0, 0));
    }

    #[test]
    fn write_then_read_chapter_round_trips() {
        let dir = TempDir::new().unwrap();
        let geometry = geo();
        let volume = PhysicalVolume::create(dir.path(), geometry, 1).unwrap();

        let index_pages = vec![IndexPageSummary {
            lowest_list_number: 0,
            highest_list_number: 10,
        }];
        let name = ChunkName::new([9u8; CHUNK_NAME_SIZE]);
        let record_pages = vec![vec![name], vec![]];

        volume.write_chapter(2, 7, &index_pages, &record_pages).unwrap();

        let (lowest, highest, is_empty) = volume.find_chapter_boundaries().unwrap();
        assert!(!is_empty);
        assert_eq!((lowest, highest), (7, 7));

        match volume.get_page(2, 0).unwrap() {
            PageContent::Index(summary) => assert_eq!(summary.highest_list_number, 10),
            _ => panic!("expected index page"),
        }
        match volume.get_page(2, 1).unwrap() {
            PageContent::Record(records) => assert_eq!(records, vec![name]),
            _ => panic!("expected record page"),
        }

        assert!(volume.chapter_contains_name(2, &name).unwrap());
        assert!(!volume.chapter_contains_name(2, &ChunkName::new([1u8; CHUNK_NAME_SIZE])).unwrap());
    }

    #[test]
    fn rewriting_a_physical_slot_replaces_its_vcn() {
        let dir = TempDir::new().unwrap();
        let geometry = geo();
        let volume = PhysicalVolume::create(dir.path(), geometry, 1).unwrap();
        volume.write_chapter(0, 0, &[IndexPageSummary { lowest_list_number: 0, highest_list_number: 0 }], &[vec![], vec![]]).unwrap();
        volume.write_chapter(0, 4, &[IndexPageSummary { lowest_list_number: 0, highest_list_number: 0 }], &[vec![], vec![]]).unwrap();
        let (lowest, highest, _) = volume.find_chapter_boundaries().unwrap();
        assert_eq!((lowest, highest), (4, 4));
    }

    #[test]
    fn rebuild_lookup_guard_resets_on_drop() {
        let dir = TempDir::new().unwrap();
        let volume = PhysicalVolume::create(dir.path(), geo(), 1).unwrap();
        assert!(!volume.in_rebuild_lookup.load(std::sync::atomic::Ordering::SeqCst));
        {
            let _guard = volume.begin_rebuild_lookup();
            assert!(volume.in_rebuild_lookup.load(std::sync::atomic::Ordering::SeqCst));
        }
        assert!(!volume.in_rebuild_lookup.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn page_number_past_the_chapter_end_is_rejected() {
        let dir = TempDir::new().unwrap();
        let geometry = geo();
        let volume = PhysicalVolume::create(dir.path(), geometry, 1).unwrap();
        volume
            .write_chapter(0, 0, &[IndexPageSummary { lowest_list_number: 0, highest_list_number: 0 }], &[vec![], vec![]])
            .unwrap();
        let result = volume.get_page(0, geometry.pages_per_chapter());
        assert!(matches!(result, Err(IndexError::InvalidArgument(_))));
    }

    #[test]
    fn reopening_with_mismatched_geometry_is_corrupt_component() {
        let dir = TempDir::new().unwrap();
        let _volume = PhysicalVolume::create(dir.path(), geo(), 1).unwrap();
        let other_geo = Geometry::new(8, 1, 2, 4, 1).unwrap();
        let result = PhysicalVolume::open(dir.path(), other_geo, 1);
        assert!(matches!(result, Err(IndexError::CorruptComponent(_))));
    }
}

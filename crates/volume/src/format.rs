use crc32fast::Hasher;

use dedupe_index_common::{ChunkName, IndexError, IndexPageSummary, CHUNK_NAME_SIZE};

/// On-disk format version the chapter writer stamps into every chapter
/// header. Bumped only on incompatible layout changes; `load`/`rebuild`
/// reject a mismatch as `CorruptComponent` (SPEC_FULL EXPANSION C).
pub const FORMAT_VERSION: u32 = 1;

const CHAPTER_MAGIC: u32 = 0x4445_5055; // "DEPU"
pub const CHAPTER_HEADER_SIZE: usize = 4 + 4 + 8 + 1 + 4; // magic+version+vcn+occupied+crc

/// magic(4) + version(4) + vcn(8) + occupied(1) + crc32(4)
pub fn encode_chapter_header(vcn: Option<u64>) -> [u8; CHAPTER_HEADER_SIZE] {
    let mut buf = [0u8; CHAPTER_HEADER_SIZE];
    buf[0..4].copy_from_slice(&CHAPTER_MAGIC.to_le_bytes());
    buf[4..8].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf[8..16].copy_from_slice(&vcn.unwrap_or(0).to_le_bytes());
    buf[16] = vcn.is_some() as u8;
    let crc = crc32(&buf[0..17]);
    buf[17..21].copy_from_slice(&crc.to_le_bytes());
    buf
}

pub struct ChapterHeader {
    pub format_version: u32,
    pub vcn: Option<u64>,
}

pub fn decode_chapter_header(buf: &[u8; CHAPTER_HEADER_SIZE]) -> Result<ChapterHeader, IndexError> {
    let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    if magic != CHAPTER_MAGIC {
        return Err(IndexError::CorruptComponent(
            "chapter header magic mismatch".into(),
        ));
    }
    let crc = u32::from_le_bytes(buf[17..21].try_into().unwrap());
    if crc32(&buf[0..17]) != crc {
        return Err(IndexError::CorruptData("chapter header CRC mismatch".into()));
    }
    let format_version = u32::from_le_bytes(buf[4..8].try_into().unwrap());
    let vcn_raw = u64::from_le_bytes(buf[8..16].try_into().unwrap());
    let occupied = buf[16] != 0;
    Ok(ChapterHeader {
        format_version,
        vcn: occupied.then_some(vcn_raw),
    })
}

pub const INDEX_PAGE_SIZE: usize = 4 + 4 + 4; // lowest + highest + crc

pub fn encode_index_page(summary: &IndexPageSummary) -> [u8; INDEX_PAGE_SIZE] {
    let mut buf = [0u8; INDEX_PAGE_SIZE];
    buf[0..4].copy_from_slice(&summary.lowest_list_number.to_le_bytes());
    buf[4..8].copy_from_slice(&summary.highest_list_number.to_le_bytes());
    let crc = crc32(&buf[0..8]);
    buf[8..12].copy_from_slice(&crc.to_le_bytes());
    buf
}

pub fn decode_index_page(buf: &[u8; INDEX_PAGE_SIZE]) -> Result<IndexPageSummary, IndexError> {
    let crc = u32::from_le_bytes(buf[8..12].try_into().unwrap());
    if crc32(&buf[0..8]) != crc {
        return Err(IndexError::CorruptData("index page CRC mismatch".into()));
    }
    Ok(IndexPageSummary {
        lowest_list_number: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
        highest_list_number: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
    })
}

pub fn record_page_size(records_per_page: u32) -> usize {
    4 + (records_per_page as usize) * CHUNK_NAME_SIZE + 4
}

pub fn encode_record_page(records: &[ChunkName], records_per_page: u32) -> Vec<u8> {
    let mut buf = vec![0u8; record_page_size(records_per_page)];
    let count = records.len() as u32;
    buf[0..4].copy_from_slice(&count.to_le_bytes());
    for (i, name) in records.iter().enumerate() {
        let start = 4 + i * CHUNK_NAME_SIZE;
        buf[start..start + CHUNK_NAME_SIZE].copy_from_slice(name.as_bytes());
    }
    let crc_offset = buf.len() - 4;
    let crc = crc32(&buf[0..crc_offset]);
    buf[crc_offset..].copy_from_slice(&crc.to_le_bytes());
    buf
}

pub fn decode_record_page(buf: &[u8], records_per_page: u32) -> Result<Vec<ChunkName>, IndexError> {
    if buf.len() != record_page_size(records_per_page) {
        return Err(IndexError::CorruptData("record page truncated".into()));
    }
    let crc_offset = buf.len() - 4;
    let crc = u32::from_le_bytes(buf[crc_offset..].try_into().unwrap());
    if crc32(&buf[0..crc_offset]) != crc {
        return Err(IndexError::CorruptData("record page CRC mismatch".into()));
    }
    let count = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
    let mut records = Vec::with_capacity(count);
    for i in 0..count {
        let start = 4 + i * CHUNK_NAME_SIZE;
        let mut name = [0u8; CHUNK_NAME_SIZE];
        name.copy_from_slice(&buf[start..start + CHUNK_NAME_SIZE]);
        records.push(ChunkName::new(name));
    }
    Ok(records)
}

fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chapter_header_round_trips() {
        let buf = encode_chapter_header(Some(42));
        let hdr = decode_chapter_header(&buf).unwrap();
        assert_eq!(hdr.vcn, Some(42));
        assert_eq!(hdr.format_version, FORMAT_VERSION);
    }

    #[test]
    fn empty_chapter_header_has_no_vcn() {
        let buf = encode_chapter_header(None);
        let hdr = decode_chapter_header(&buf).unwrap();
        assert_eq!(hdr.vcn, None);
    }

    #[test]
    fn index_page_round_trips() {
        let summary = IndexPageSummary {
            lowest_list_number: 3,
            highest_list_number: 9,
        };
        let buf = encode_index_page(&summary);
        let decoded = decode_index_page(&buf).unwrap();
        assert_eq!(decoded.lowest_list_number, 3);
        assert_eq!(decoded.highest_list_number, 9);
    }

    #[test]
    fn record_page_round_trips() {
        let records = vec![ChunkName::new([1u8; CHUNK_NAME_SIZE]), ChunkName::new([2u8; CHUNK_NAME_SIZE])];
        let buf = encode_record_page(&records, 4);
        let decoded = decode_record_page(&buf, 4).unwrap();
        assert_eq!(decoded, records);
    }

    #[test]
    fn record_page_detects_corruption() {
        let records = vec![ChunkName::new([7u8; CHUNK_NAME_SIZE])];
        let mut buf = encode_record_page(&records, 4);
        buf[5] ^= 0xFF;
        assert!(decode_record_page(&buf, 4).is_err());
    }
}

use dedupe_index_common::IndexPageSummary;

/// Counts the index pages a chapter was written with. Grounded on the
/// teacher's `WalReader::build_index` (scanning a segment's entries into an
/// in-memory page directory), generalized from "offset of an entry" to
/// "how many index pages this chapter's delta-list summaries span."
pub struct IndexPageMap {
    pages: Vec<IndexPageSummary>,
}

impl IndexPageMap {
    pub fn build(pages: Vec<IndexPageSummary>) -> Self {
        Self { pages }
    }

    pub fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pages() -> Vec<IndexPageSummary> {
        vec![
            IndexPageSummary { lowest_list_number: 0, highest_list_number: 9 },
            IndexPageSummary { lowest_list_number: 10, highest_list_number: 19 },
        ]
    }

    #[test]
    fn page_count_reflects_the_summaries_built_from() {
        let map = IndexPageMap::build(pages());
        assert_eq!(map.page_count(), 2);
    }

    #[test]
    fn empty_summaries_yield_zero_pages() {
        let map = IndexPageMap::build(vec![]);
        assert_eq!(map.page_count(), 0);
    }
}

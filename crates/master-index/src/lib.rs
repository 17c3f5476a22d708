mod delta_list;
mod sample;
mod sparse_cache;

pub use delta_list::DeltaListMasterIndex;
pub use sample::is_master_index_sample;
pub use sparse_cache::SparseChapterCache;

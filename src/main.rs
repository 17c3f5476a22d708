use dedupe_index_common::{ChunkName, LoadType, RecordData, Request, RequestAction, CHUNK_NAME_SIZE};
use dedupe_index_core::{
    make_index, GeometryConfig, IndexConfig, IndexLayout, LoadContext, UserParams,
};

/// Small demonstration binary: brings up an index over a scratch directory,
/// drives a handful of requests through it, saves, and prints the resulting
/// stats. Config is hardcoded rather than parsed from flags — packaging and
/// CLI surface are out of scope (spec §1 Non-goals).
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let base_dir = std::env::temp_dir().join(format!("dedupe-index-demo-{}", std::process::id()));
    tracing::info!(path = %base_dir.display(), "starting demo index");

    let config = IndexConfig {
        geometry: GeometryConfig {
            chapters_per_volume: 16,
            index_pages_per_chapter: 1,
            record_pages_per_chapter: 2,
            records_per_page: 256,
            sparse_chapters_per_volume: 4,
        },
        volume_nonce: 1,
    };
    let layout = IndexLayout::new(&base_dir);

    let index = make_index(
        layout,
        config,
        UserParams::default(),
        4,
        LoadType::Create,
        LoadContext::new(),
    )?;
    tracing::info!(loaded_type = ?index.loaded_type(), "index ready");

    for i in 0u8..40 {
        let name = ChunkName::new([i; CHUNK_NAME_SIZE]);
        let zone = (i as usize) % index.zone_count();
        let mut request =
            Request::new(name, zone, RequestAction::Index).with_new_metadata(RecordData(i as u64));
        index.dispatch_request(&mut request)?;
        if i % 10 == 9 {
            index.advance_active_chapters()?;
        }
    }

    index.wait_for_idle().await?;

    let probe = ChunkName::new([7u8; CHUNK_NAME_SIZE]);
    let mut query = Request::query(probe, 7 % index.zone_count());
    index.dispatch_request(&mut query)?;
    tracing::info!(location = ?query.location, "probe lookup");

    index.save().await?;

    let stats = index.stats();
    tracing::info!(
        oldest = stats.oldest_virtual_chapter,
        newest = stats.newest_virtual_chapter,
        last_checkpoint = ?stats.last_checkpoint,
        bytes_in_flight = stats.chapter_writer_bytes_in_flight,
        sparse_chapters = stats.sparse_chapters,
        dense_chapters = stats.dense_chapters,
        entries_per_zone = ?stats.entries_per_zone,
        "final index stats"
    );

    Ok(())
}

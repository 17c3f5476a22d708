use dedupe_index_common::ChunkName;

/// One in every `SAMPLE_RATE` chunk names is a "sample": its presence is
/// tracked even after its chapter ages out of the dense index, by way of
/// the sparse chapters (spec §4.3/§4.4). A fixed-ratio hash test keeps
/// sampling decisions stateless and reproducible from the name alone, so
/// no separate sample set needs to be persisted or rebuilt.
const SAMPLE_RATE: u64 = 32;

pub fn is_master_index_sample(name: &ChunkName) -> bool {
    name.leading_u64() % SAMPLE_RATE == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use dedupe_index_common::CHUNK_NAME_SIZE;

    #[test]
    fn roughly_one_in_sample_rate_names_sample() {
        let sampled = (0u32..10_000)
            .filter(|i| {
                let mut bytes = [0u8; CHUNK_NAME_SIZE];
                bytes[4..8].copy_from_slice(&i.to_be_bytes());
                is_master_index_sample(&ChunkName::new(bytes))
            })
            .count();
        assert!(sampled > 200 && sampled < 500, "sampled {sampled} of 10000, expected ~312");
    }

    #[test]
    fn sampling_is_deterministic() {
        let name = ChunkName::new([7u8; CHUNK_NAME_SIZE]);
        assert_eq!(is_master_index_sample(&name), is_master_index_sample(&name));
    }
}

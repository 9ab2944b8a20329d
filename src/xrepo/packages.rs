//! Reference filters: a compact membership structure over the moniker
//! identifiers a dump imports from a package, stored next to the
//! `lsif_references` row. Lets a cross-repo lookup prune candidate dumps
//! without opening their files. False positives only cost an extra dump
//! open; false negatives cannot happen.

use anyhow::Result;
use probabilistic_collections::bloom::BloomFilter;

use crate::dump::encoding;

const FALSE_POSITIVE_RATE: f64 = 0.01;
const MIN_CAPACITY: usize = 8;

pub fn encode_filter(identifiers: &[String]) -> Result<Vec<u8>> {
    let mut filter =
        BloomFilter::<String>::new(identifiers.len().max(MIN_CAPACITY), FALSE_POSITIVE_RATE);
    for identifier in identifiers {
        filter.insert(identifier);
    }
    encoding::encode(&filter)
}

pub fn filter_contains(bytes: &[u8], identifier: &str) -> Result<bool> {
    let filter: BloomFilter<String> = encoding::decode(bytes)?;
    Ok(filter.contains(&identifier.to_owned()))
}

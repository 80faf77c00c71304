//! Shuffle: combine each map worker's output, merge globally and cut the
//! sorted key space into contiguous reduce shards.
//!
//! Runs strictly after the map barrier has released, so every map artifact
//! is present.

use std::ops::Range;

use itertools::Itertools;
use tracing::debug;

use crate::codec;
use crate::error::Result;
use crate::store::{self, ArtifactStore};
use crate::{IntermediateRecord, ReduceShard, ShuffleGroup};

/// Sort one map worker's records by key and sum the values of equal keys.
///
/// Valid as a pre-aggregation because the reduce operation (addition) is
/// commutative and associative.
pub fn combine(mut records: Vec<IntermediateRecord>) -> Vec<(String, u64)> {
    records.sort_by(|a, b| a.key.cmp(&b.key));
    let mut combined = Vec::new();
    for (key, group) in &records.into_iter().chunk_by(|r| r.key.clone()) {
        combined.push((key, group.map(|r| r.value).sum()));
    }
    combined
}

/// Merge every worker's combined output into one group per distinct key,
/// sorted by key. Values keep the order of `partials`.
pub fn merge(partials: Vec<Vec<(String, u64)>>) -> Vec<ShuffleGroup> {
    let mut all: Vec<(String, u64)> = partials.into_iter().flatten().collect();
    // Stable, so the partial sums of one key stay in worker order.
    all.sort_by(|a, b| a.0.cmp(&b.0));
    let mut groups = Vec::new();
    for (key, group) in &all.into_iter().chunk_by(|(key, _)| key.clone()) {
        groups.push(ShuffleGroup {
            key,
            values: group.map(|(_, value)| value).collect(),
        });
    }
    groups
}

/// Contiguous ranges cutting `n` items into `parts` pieces of
/// `round(n / parts)` items each, the last range taking whatever remains.
///
/// Ranges are clamped to `n`, so when rounding up overshoots some trailing
/// ranges are empty. Together they always cover `0..n` exactly, in order.
pub fn shard_bounds(n: usize, parts: usize) -> Vec<Range<usize>> {
    if parts == 0 {
        return Vec::new();
    }
    // Round half up.
    let target = (2 * n + parts) / (2 * parts);
    (0..parts)
        .map(|i| {
            let start = (i * target).min(n);
            let end = if i + 1 == parts {
                n
            } else {
                ((i + 1) * target).min(n)
            };
            start..end
        })
        .collect()
}

/// Split the sorted groups into `parts` contiguous shards.
pub fn partition(groups: &[ShuffleGroup], parts: usize) -> Vec<ReduceShard> {
    shard_bounds(groups.len(), parts)
        .into_iter()
        .map(|range| groups[range].to_vec())
        .collect()
}

/// Read (and consume) every map artifact of the iteration and combine each.
pub async fn collect_partials(
    store: &dyn ArtifactStore,
    n_map: usize,
) -> Result<Vec<Vec<(String, u64)>>> {
    let mut partials = Vec::with_capacity(n_map);
    for i in 0..n_map {
        let name = store::map_artifact(i);
        let records = codec::decode_records(store.take(&name).await?)?;
        let combined = combine(records);
        debug!(artifact = %name, keys = combined.len(), "combined map output");
        partials.push(combined);
    }
    Ok(partials)
}

/// Persist shard `i` under [`store::shuffle_artifact`]`(i)`.
pub async fn persist_shards(store: &dyn ArtifactStore, shards: &[ReduceShard]) -> Result<()> {
    for (i, shard) in shards.iter().enumerate() {
        store
            .put(&store::shuffle_artifact(i), codec::to_json(shard)?)
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::collections::{BTreeMap, BTreeSet};

    fn recs(words: &[&str]) -> Vec<IntermediateRecord> {
        words.iter().map(|w| IntermediateRecord::new(*w, 1)).collect()
    }

    fn group(key: &str, values: &[u64]) -> ShuffleGroup {
        ShuffleGroup {
            key: key.into(),
            values: values.to_vec(),
        }
    }

    #[test]
    fn combine_sorts_and_sums() {
        let combined = combine(recs(&["the", "cat", "the", "sat"]));
        assert_eq!(
            combined,
            vec![
                ("cat".to_string(), 1u64),
                ("sat".to_string(), 1),
                ("the".to_string(), 2)
            ]
        );
        assert!(combine(Vec::new()).is_empty());
    }

    #[test]
    fn merge_yields_one_group_per_key() {
        let groups = merge(vec![
            combine(recs(&["the", "cat", "sat", "on", "the"])),
            combine(recs(&["mat", "the", "cat", "ran"])),
        ]);
        assert_eq!(
            groups,
            vec![
                group("cat", &[1, 1]),
                group("mat", &[1]),
                group("on", &[1]),
                group("ran", &[1]),
                group("sat", &[1]),
                group("the", &[2, 1]),
            ]
        );
    }

    #[test]
    fn combine_then_merge_equals_direct_sum() {
        let workers = vec![
            recs(&["a", "b", "a", "c", "a"]),
            recs(&[]),
            recs(&["c", "c", "b", "d"]),
            recs(&["a"]),
        ];
        let mut direct: BTreeMap<String, u64> = BTreeMap::new();
        for r in workers.iter().flatten() {
            *direct.entry(r.key.clone()).or_default() += r.value;
        }

        let groups = merge(workers.into_iter().map(combine).collect());
        let keys: BTreeSet<&str> = groups.iter().map(|g| g.key.as_str()).collect();
        assert_eq!(keys.len(), groups.len(), "duplicate group");
        let via_shuffle: BTreeMap<String, u64> = groups
            .into_iter()
            .map(|g| (g.key, g.values.iter().sum()))
            .collect();
        assert_eq!(via_shuffle, direct);
    }

    #[test]
    fn bounds_cover_in_order() {
        for n in 0..40 {
            for parts in 1..9 {
                let bounds = shard_bounds(n, parts);
                assert_eq!(bounds.len(), parts);
                let mut next = 0;
                for r in &bounds {
                    assert_eq!(r.start, next, "gap or overlap for n={n} parts={parts}");
                    assert!(r.end >= r.start);
                    next = r.end;
                }
                assert_eq!(next, n);
            }
        }
    }

    #[test]
    fn bounds_round_to_nearest() {
        let sizes = |n, p| shard_bounds(n, p).into_iter().map(|r| r.len()).collect::<Vec<_>>();
        assert_eq!(sizes(6, 2), vec![3, 3]);
        assert_eq!(sizes(7, 2), vec![4, 3]);
        assert_eq!(sizes(5, 4), vec![1, 1, 1, 2]);
        // round(9 / 6) = 2 overshoots; trailing shards come out empty.
        assert_eq!(sizes(9, 6), vec![2, 2, 2, 2, 1, 0]);
        assert_eq!(sizes(0, 3), vec![0, 0, 0]);
    }

    #[test]
    fn partition_never_splits_a_key() {
        let groups: Vec<ShuffleGroup> = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|k| group(k, &[1]))
            .collect();
        let shards = partition(&groups, 3);
        let flat: Vec<ShuffleGroup> = shards.iter().flatten().cloned().collect();
        assert_eq!(flat, groups);
        let mut seen = BTreeSet::new();
        for shard in &shards {
            assert!(shard.windows(2).all(|w| w[0].key < w[1].key));
            for g in shard {
                assert!(seen.insert(g.key.clone()));
            }
        }
    }

    #[tokio::test]
    async fn partials_consume_map_artifacts() {
        let store = MemoryStore::new();
        store
            .put(
                &store::map_artifact(0),
                codec::encode_records(&recs(&["b", "a", "b"])).unwrap(),
            )
            .await
            .unwrap();
        store
            .put(&store::map_artifact(1), codec::encode_records(&[]).unwrap())
            .await
            .unwrap();

        let partials = collect_partials(&store, 2).await.unwrap();
        assert_eq!(
            partials,
            vec![vec![("a".to_string(), 1u64), ("b".to_string(), 2)], vec![]]
        );
        assert!(store.names().is_empty());

        assert!(collect_partials(&store, 1).await.is_err());
    }
}

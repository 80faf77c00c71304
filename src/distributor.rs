//! Cuts the input into map tasks and hands shards to reduce workers.

use std::ops::Range;

use bytes::Bytes;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::store::{self, ArtifactStore};
use crate::transport::Outbox;
use crate::utils;
use crate::workload::wc::is_separator_byte;
use crate::{Job, MapTask};

fn is_safe_cut(content: &[u8], pos: usize) -> bool {
    pos == 0
        || pos >= content.len()
        || is_separator_byte(content[pos - 1])
        || is_separator_byte(content[pos])
}

/// Byte ranges of the `n_map` map tasks over `content`.
///
/// Each interior boundary starts at its nominal position `i * floor(len / n_map)`
/// and moves forward to the first position next to a separator byte, so no
/// token straddles two tasks and every cut is a UTF-8 boundary. The ranges
/// are contiguous, disjoint and cover `content` exactly; the last one takes
/// the remainder.
pub fn chunk_bounds(content: &[u8], n_map: usize) -> Vec<Range<usize>> {
    let size = content.len();
    let chunk = if n_map == 0 { 0 } else { size / n_map };
    let mut bounds = Vec::with_capacity(n_map);
    let mut start = 0;
    for i in 0..n_map {
        let end = if i + 1 == n_map {
            size
        } else {
            let mut pos = ((i + 1) * chunk).max(start);
            while !is_safe_cut(content, pos) {
                pos += 1;
            }
            pos.min(size)
        };
        bounds.push(start..end);
        start = end;
    }
    bounds
}

/// Build the self-contained map tasks for `text`.
pub fn map_tasks(text: &str, n_map: usize) -> Result<Vec<MapTask>> {
    chunk_bounds(text.as_bytes(), n_map)
        .into_iter()
        .enumerate()
        .map(|(id, range)| {
            let content = text
                .get(range.clone())
                .ok_or_else(|| Error::Validation(format!("chunk {range:?} is not on a char boundary")))?;
            Ok(MapTask {
                id,
                offset: range.start as u64,
                length: range.len() as u64,
                content: content.to_string(),
            })
        })
        .collect()
}

/// Read the input file and cut it into the iteration's map tasks.
///
/// Reads only; nothing is sent, so this may run before the map barrier is
/// armed.
pub async fn plan_map_tasks(job: &Job) -> Result<Vec<MapTask>> {
    let raw = tokio::fs::read(&job.datafile)
        .await
        .map_err(|e| Error::io(format!("read input {}", job.datafile.display()), e))?;
    let size = raw.len();
    let text = utils::string_from_bytes(Bytes::from(raw))
        .map_err(|e| Error::Validation(format!("input {}: {e}", job.datafile.display())))?;
    info!(size, n_map = job.n_map, "planned map tasks");
    map_tasks(&text, job.n_map)
}

/// Push one map task per map worker.
pub fn distribute_map_tasks(tasks: &[MapTask], outbox: &Outbox) -> Result<()> {
    for task in tasks {
        debug!(id = task.id, offset = task.offset, length = task.length, "map task");
        outbox.send(task)?;
    }
    Ok(())
}

/// Hand shard `i` to reduce worker `i`, in index order. Each shard artifact
/// is consumed as it is sent.
pub async fn distribute_reduce_tasks(
    store: &dyn ArtifactStore,
    outbox: &Outbox,
    n_reduce: usize,
) -> Result<()> {
    info!(n_reduce, "sending reduce shards");
    for i in 0..n_reduce {
        let shard = store.take(&store::shuffle_artifact(i)).await?;
        debug!(index = i, bytes = shard.len(), "reduce shard");
        outbox.send_frame(shard)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shuffle;
    use crate::store::MemoryStore;
    use crate::transport::Puller;
    use crate::workload::wc;
    use crate::ShuffleGroup;
    use std::collections::BTreeMap;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    const TEXT: &str = "the cat sat on the mat the cat ran";

    fn assert_exact_cover(bounds: &[Range<usize>], size: usize) {
        let mut next = 0;
        for r in bounds {
            assert_eq!(r.start, next);
            assert!(r.end >= r.start);
            next = r.end;
        }
        assert_eq!(next, size);
    }

    fn counts(chunks: &[&str]) -> BTreeMap<String, u64> {
        let mut counts = BTreeMap::new();
        for chunk in chunks {
            for word in wc::tokens(chunk) {
                *counts.entry(word.to_string()).or_default() += 1;
            }
        }
        counts
    }

    #[test]
    fn bounds_cover_any_input() {
        let inputs = [
            "",
            "a",
            TEXT,
            "nowhitespaceatall",
            "x y\n\nz,,, w",
            "caf\u{e9} na\u{ef}ve \u{fc}ber",
        ];
        for input in inputs {
            for n_map in 1..8 {
                let bounds = chunk_bounds(input.as_bytes(), n_map);
                assert_eq!(bounds.len(), n_map);
                assert_exact_cover(&bounds, input.len());
                for r in &bounds {
                    assert!(input.is_char_boundary(r.start) && input.is_char_boundary(r.end));
                }
            }
        }
    }

    #[test]
    fn last_task_takes_the_remainder() {
        let bounds = chunk_bounds(b"aa bb cc dd e", 3);
        // floor(13 / 3) = 4 lands inside `bb` and moves up to the next space;
        // 8 is already next to one.
        assert_eq!(bounds, vec![0..5, 5..8, 8..13]);
    }

    #[test]
    fn cuts_never_split_tokens() {
        let whole = counts(&[TEXT]);
        for n_map in 1..10 {
            let tasks = map_tasks(TEXT, n_map).unwrap();
            let chunks: Vec<&str> = tasks.iter().map(|t| t.content.as_str()).collect();
            assert_eq!(counts(&chunks), whole, "n_map={n_map}");
            assert_eq!(chunks.concat(), TEXT);
        }
    }

    #[test]
    fn any_separator_split_is_invariant() {
        let whole = counts(&[TEXT]);
        for pos in 0..=TEXT.len() {
            if is_safe_cut(TEXT.as_bytes(), pos) {
                assert_eq!(counts(&[&TEXT[..pos], &TEXT[pos..]]), whole, "cut at {pos}");
            }
        }
    }

    #[test]
    fn tasks_carry_offsets() {
        let tasks = map_tasks(TEXT, 2).unwrap();
        assert_eq!(tasks[0].id, 0);
        assert_eq!(tasks[1].id, 1);
        assert_eq!(tasks[0].offset, 0);
        assert_eq!(tasks[1].offset, tasks[0].length);
        assert_eq!(tasks[0].length + tasks[1].length, TEXT.len() as u64);
    }

    #[tokio::test]
    async fn missing_input_is_an_io_error() {
        let job = Job::new("/definitely/not/here.txt", 1, 1);
        assert!(matches!(plan_map_tasks(&job).await, Err(Error::Io { .. })));
    }

    #[tokio::test]
    async fn non_utf8_input_is_a_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latin1.txt");
        std::fs::write(&path, b"caf\xe9 au lait").unwrap();
        let job = Job::new(path, 2, 1);
        assert!(matches!(plan_map_tasks(&job).await, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn planned_tasks_go_out_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.txt");
        std::fs::write(&path, TEXT).unwrap();
        let tasks = plan_map_tasks(&Job::new(path, 3, 1)).await.unwrap();
        assert_eq!(tasks.len(), 3);

        let outbox = Outbox::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
            .await
            .unwrap();
        distribute_map_tasks(&tasks, &outbox).unwrap();
        let mut puller = Puller::connect(outbox.local_addr()).await.unwrap();
        for expected in &tasks {
            let task: MapTask = puller.recv().await.unwrap();
            assert_eq!(&task, expected);
        }
    }

    #[tokio::test]
    async fn shards_go_out_in_index_order() {
        let store = MemoryStore::new();
        let groups: Vec<ShuffleGroup> = ["a", "b", "c"]
            .iter()
            .map(|k| ShuffleGroup {
                key: k.to_string(),
                values: vec![1],
            })
            .collect();
        let shards = shuffle::partition(&groups, 2);
        shuffle::persist_shards(&store, &shards).await.unwrap();

        let outbox = Outbox::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
            .await
            .unwrap();
        distribute_reduce_tasks(&store, &outbox, 2).await.unwrap();
        assert!(store.names().is_empty());

        let mut puller = Puller::connect(outbox.local_addr()).await.unwrap();
        let first: Vec<ShuffleGroup> = puller.recv().await.unwrap();
        let second: Vec<ShuffleGroup> = puller.recv().await.unwrap();
        assert_eq!(first, shards[0]);
        assert_eq!(second, shards[1]);
    }
}

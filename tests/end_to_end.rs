use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use mrbarrier::codec;
use mrbarrier::master::Phase;
use mrbarrier::metrics::HEADER;
use mrbarrier::standalone::LocalCluster;
use mrbarrier::store::{ArtifactStore, FsStore, MemoryStore};
use mrbarrier::{workload, Job};

fn job(dir: &Path, text: &str, n_map: usize, n_reduce: usize, base_port: u16) -> Job {
    let datafile = dir.join("input.txt");
    std::fs::write(&datafile, text).unwrap();
    let mut job = Job::new(datafile, n_map, n_reduce);
    job.host = IpAddr::V4(Ipv4Addr::LOCALHOST);
    job.base_port = base_port;
    job.metricsfile = dir.join("metrics.csv");
    job.pause = Duration::ZERO;
    job
}

async fn counts(store: &dyn ArtifactStore, name: &str) -> BTreeMap<String, u64> {
    let results = codec::decode_results(store.get(name).await.unwrap()).unwrap();
    let mut counts = BTreeMap::new();
    for r in results {
        assert!(counts.insert(r.key, r.value).is_none(), "key reported twice");
    }
    counts
}

fn expected(pairs: &[(&str, u64)]) -> BTreeMap<String, u64> {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

#[tokio::test]
async fn word_count_two_by_two() {
    let dir = tempfile::tempdir().unwrap();
    let job = job(dir.path(), "the cat sat on the mat the cat ran", 2, 2, 48100);
    let store = Arc::new(MemoryStore::new());
    let wc = workload::named("wc").unwrap();

    let cluster = LocalCluster::start(job, store.clone(), wc, Duration::ZERO)
        .await
        .unwrap();
    let metrics = cluster.solve().await.unwrap();
    assert_eq!(metrics.len(), 1);

    assert_eq!(
        counts(store.as_ref(), "results.csv").await,
        expected(&[
            ("cat", 2),
            ("mat", 1),
            ("on", 1),
            ("ran", 1),
            ("sat", 1),
            ("the", 3)
        ])
    );
    assert_eq!(store.names(), vec!["results.csv".to_string()]);
}

#[tokio::test]
async fn empty_input_gives_empty_result() {
    let dir = tempfile::tempdir().unwrap();
    let job = job(dir.path(), "", 1, 1, 48110);
    let store = Arc::new(MemoryStore::new());
    let wc = workload::named("wc").unwrap();

    let cluster = LocalCluster::start(job, store.clone(), wc, Duration::ZERO)
        .await
        .unwrap();
    cluster.solve().await.unwrap();
    assert!(store.get("results.csv").await.unwrap().is_empty());
}

#[tokio::test]
async fn more_reducers_than_keys() {
    let dir = tempfile::tempdir().unwrap();
    let job = job(dir.path(), "b a, b! c", 3, 5, 48120);
    let store = Arc::new(MemoryStore::new());
    let wc = workload::named("wc").unwrap();

    let cluster = LocalCluster::start(job, store.clone(), wc, Duration::ZERO)
        .await
        .unwrap();
    cluster.solve().await.unwrap();
    assert_eq!(
        counts(store.as_ref(), "results.csv").await,
        expected(&[("a", 1), ("b", 2), ("c", 1)])
    );
}

#[tokio::test]
async fn iterations_repeat_and_log_metrics() {
    let dir = tempfile::tempdir().unwrap();
    let mut job = job(
        dir.path(),
        "Don't stop. don't STOP; 'quoted' words\nthe end",
        4,
        3,
        48130,
    );
    job.iters = 3;
    let metricsfile = job.metricsfile.clone();
    let workdir = dir.path().join("artifacts");
    let store = Arc::new(FsStore::open(&workdir).await.unwrap());
    let wc = workload::named("wc-ci").unwrap();

    let mut cluster = LocalCluster::start(job, store.clone(), wc, Duration::ZERO)
        .await
        .unwrap();
    cluster.master().await_workers().await.unwrap();
    let first = cluster.master().run_iteration().await.unwrap();
    let first_counts = counts(store.as_ref(), "results.csv").await;
    cluster.master().reset();
    assert_eq!(cluster.master().phase(), Phase::Idle);
    assert_eq!(cluster.master().state().unique_keys(), 0);

    let second = cluster.master().run_iteration().await.unwrap();
    assert_eq!(counts(store.as_ref(), "results.csv").await, first_counts);
    assert!(first.total() >= first.map && second.total() >= second.reduce);
    assert_eq!(
        first_counts,
        expected(&[
            ("don't", 2),
            ("end", 1),
            ("quoted", 1),
            ("stop", 2),
            ("the", 1),
            ("words", 1)
        ])
    );

    // Only the result artifact is left in the work directory.
    let mut names: Vec<String> = std::fs::read_dir(&workdir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["results.csv".to_string()]);
    cluster.shutdown().await;

    // A full solve on a fresh cluster appends one row per iteration.
    let mut job = self::job(dir.path(), "a b a", 1, 1, 48140);
    job.iters = 3;
    job.metricsfile = metricsfile.clone();
    let cluster = LocalCluster::start(job, Arc::new(MemoryStore::new()), wc, Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(cluster.solve().await.unwrap().len(), 3);
    let text = std::fs::read_to_string(&metricsfile).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], HEADER.join(","));
    assert_eq!(lines.len(), 4);
    assert!(lines[1..].iter().all(|l| l.split(',').count() == 5));
}

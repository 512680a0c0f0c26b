use corpus_config::Config;
use corpus_engine::{ByteRange, CONTAINER_FILE, Engine, INDEX_FILE};
use std::io::Write;
use corpus_index::{Database, Repository};
use tempfile::TempDir;

fn config(dir: &TempDir) -> Config {
    let mut config = Config::default().with_data_dir(dir.path());
    config.cache.sweep_interval_secs = 0;
    config
}

#[tokio::test]
async fn documents_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let text = b"persisted across restarts ".repeat(4096);

    let engine = Engine::open(&config(&dir)).await.unwrap();
    engine.ingest("doc", &text).await.unwrap();
    engine.ingest("copy", &text).await.unwrap();
    let before = engine.stats().await.unwrap();
    engine.close().await.unwrap();

    let engine = Engine::open(&config(&dir)).await.unwrap();
    let after = engine.stats().await.unwrap();
    assert_eq!(after.total_chunks, before.total_chunks);
    assert_eq!(after.total_physical_bytes, before.total_physical_bytes);
    assert_eq!(after.documents, 2);
    assert_eq!(engine.query_document("copy").await.unwrap().as_deref(), Some(&text[..]));
    assert_eq!(engine.query("doc", ByteRange::new(26, 35)).await.unwrap().as_deref(), Some(&b"persisted"[..]));
    assert!(engine.verify(true).await.unwrap().is_clean());
    engine.close().await.unwrap();
}

#[tokio::test]
async fn appends_continue_after_reopen() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(&config(&dir)).await.unwrap();
    engine.ingest("first", b"first document").await.unwrap();
    engine.close().await.unwrap();

    let engine = Engine::open(&config(&dir)).await.unwrap();
    engine.ingest("second", b"second document").await.unwrap();
    assert_eq!(engine.query_document("first").await.unwrap().as_deref(), Some(&b"first document"[..]));
    assert_eq!(engine.query_document("second").await.unwrap().as_deref(), Some(&b"second document"[..]));
    engine.close().await.unwrap();
}

#[tokio::test]
async fn interrupted_ingest_is_recovered_at_open() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(&config(&dir)).await.unwrap();
    let hash = engine.ingest("doc", b"shared chunk").await.unwrap().chunks[0].hash;
    engine.close().await.unwrap();

    // An ingest that took a reference and recorded a range, then died
    // before committing its document.
    let db = Database::connect(dir.path().join(INDEX_FILE)).await.unwrap();
    let index = Repository::from(&db);
    assert_eq!(index.acquire(&hash).await.unwrap(), 2);
    index.record("ghost", ByteRange::new(0, 12), &hash, 0).await.unwrap();
    db.close().await;

    let engine = Engine::open(&config(&dir)).await.unwrap();
    assert_eq!(engine.query_document("ghost").await.unwrap(), None);
    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.documents, 1);
    assert_eq!(stats.orphaned_chunks, 0);
    engine.close().await.unwrap();

    let db = Database::connect(dir.path().join(INDEX_FILE)).await.unwrap();
    let chunk = Repository::from(&db).get_chunk(&hash).await.unwrap().unwrap();
    assert_eq!(chunk.ref_count, 1);
    db.close().await;
}

#[tokio::test]
async fn ingest_after_recovery_reuses_the_id() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(&config(&dir)).await.unwrap();
    let hash = engine.ingest("seed", b"seed chunk contents").await.unwrap().chunks[0].hash;

    // Leftover ranges of an uncommitted "retry", seen by the next ingest.
    let index = Repository::from(&Database::connect(dir.path().join(INDEX_FILE)).await.unwrap());
    index.acquire(&hash).await.unwrap();
    index.record("retry", ByteRange::new(0, 4), &hash, 0).await.unwrap();

    engine.ingest("retry", b"fresh").await.unwrap();
    assert_eq!(engine.query_document("retry").await.unwrap().as_deref(), Some(&b"fresh"[..]));
    assert_eq!(index.get_chunk(&hash).await.unwrap().unwrap().ref_count, 1);
    engine.close().await.unwrap();
}

#[tokio::test]
async fn torn_container_tail_is_truncated_at_open() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(&config(&dir)).await.unwrap();
    engine.ingest("a", b"written before the crash").await.unwrap();
    let physical = engine.stats().await.unwrap().total_physical_bytes;
    engine.close().await.unwrap();

    // A record header cut short by the crash.
    let mut container = std::fs::OpenOptions::new().append(true).open(dir.path().join(CONTAINER_FILE)).unwrap();
    container.write_all(b"KCK1\0\0\0\0partial").unwrap();
    drop(container);

    let engine = Engine::open(&config(&dir)).await.unwrap();
    assert_eq!(engine.stats().await.unwrap().total_physical_bytes, physical);
    engine.ingest("b", b"written after the restart").await.unwrap();
    let report = engine.verify(true).await.unwrap();
    assert!(report.is_clean(), "{report:?}");
    assert_eq!(report.records, 2);
    assert_eq!(report.unindexed, 0);
    assert_eq!(engine.query_document("b").await.unwrap().as_deref(), Some(&b"written after the restart"[..]));
    engine.close().await.unwrap();
}

#[tokio::test]
async fn damaged_record_ahead_of_indexed_chunks_is_kept() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(&config(&dir)).await.unwrap();
    engine.ingest("a", b"first record").await.unwrap();
    engine.ingest("b", b"second record").await.unwrap();
    let physical = engine.stats().await.unwrap().total_physical_bytes;
    engine.close().await.unwrap();

    let path = dir.path().join(CONTAINER_FILE);
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[9] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    let engine = Engine::open(&config(&dir)).await.unwrap();
    assert_eq!(engine.stats().await.unwrap().total_physical_bytes, physical);
    assert_eq!(engine.query_document("b").await.unwrap().as_deref(), Some(&b"second record"[..]));
    let report = engine.verify(false).await.unwrap();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].offset, 0);
    engine.close().await.unwrap();
}

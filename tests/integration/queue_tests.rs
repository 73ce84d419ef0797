//! Request queue behavior across runs and processes

use highrise::config::JobConfig;
use highrise::queue::{
    CallbackRegistry, FetchRequest, FingerprintFilter, HeaderValue, QueueError, RequestQueue,
};
use highrise::storage::{share, JobRecord, SharedStorage, SqliteStorage, Storage};
use tempfile::TempDir;

const NAMESPACE: &str = "unit-tests";
const JOB: &str = "samplespider";

fn storage_with_job(storage: SqliteStorage) -> SharedStorage<SqliteStorage> {
    let mut storage = storage;
    let mut config = JobConfig::new(NAMESPACE, JOB);
    config.enabled = true;
    storage.upsert_job(&JobRecord::from_config(&config)).unwrap();
    share(storage)
}

fn in_memory() -> SharedStorage<SqliteStorage> {
    storage_with_job(SqliteStorage::new_in_memory().unwrap())
}

fn open_queue(
    storage: &SharedStorage<SqliteStorage>,
    capacity: usize,
) -> RequestQueue<SqliteStorage, FingerprintFilter> {
    RequestQueue::open(storage.clone(), FingerprintFilter::new(), NAMESPACE, JOB, capacity).unwrap()
}

fn request(path: &str) -> FetchRequest {
    FetchRequest::new(&format!("https://example.com{}", path)).unwrap()
}

fn backlog(storage: &SharedStorage<SqliteStorage>) -> u64 {
    let guard = storage.lock().unwrap();
    let job_id = guard.job_id(NAMESPACE, JOB).unwrap().unwrap();
    guard.count_requests(job_id).unwrap()
}

#[test]
fn test_memory_is_bounded_by_capacity() {
    for (n, k) in [(3usize, 5usize), (5, 5), (9, 4), (6, 0)] {
        let storage = in_memory();
        let mut queue = open_queue(&storage, k);

        for i in 0..n {
            assert!(queue.enqueue(request(&format!("/page/{}", i))).unwrap());
        }

        assert_eq!(queue.len(), n.min(k), "resident for n={} k={}", n, k);
        assert_eq!(
            backlog(&storage),
            n.saturating_sub(k) as u64,
            "backlog for n={} k={}",
            n,
            k
        );
    }
}

#[test]
fn test_dequeue_follows_priority() {
    let storage = in_memory();
    let mut queue = open_queue(&storage, 3);

    for priority in [3, 1, 2] {
        queue
            .enqueue(request(&format!("/p{}", priority)).with_priority(priority))
            .unwrap();
    }

    let mut order = Vec::new();
    while let Some(request) = queue.dequeue().unwrap() {
        order.push(request.priority);
    }
    assert_eq!(order, vec![3, 2, 1]);
    assert!(queue.is_empty());
}

#[test]
fn test_spilled_request_round_trips() {
    let storage = in_memory();

    let original = request("/article")
        .with_header("Referer", vec!["https://example.org/".to_string()])
        .with_header("Accept-Language", "en")
        .with_cookie("consent", "yes")
        .with_meta("depth", serde_json::json!(3))
        .with_body(b"a=1&b=2".to_vec())
        .with_method("post")
        .with_priority(4);

    // capacity 0 sends every request straight to the backlog
    let mut writer = open_queue(&storage, 0);
    assert!(writer.enqueue(original.clone()).unwrap());
    assert!(writer.is_empty());
    assert_eq!(backlog(&storage), 1);
    writer.close("finished").unwrap();

    let mut reader = open_queue(&storage, 10);
    let restored = reader.dequeue().unwrap().unwrap();

    assert_eq!(
        restored.header("Referer"),
        Some(&HeaderValue::Multiple(vec!["https://example.org/".to_string()]))
    );
    assert_eq!(restored.headers, original.headers);
    assert_eq!(restored.cookies, original.cookies);
    assert_eq!(restored.meta, original.meta);
    assert_eq!(restored.body, original.body);
    assert_eq!(restored.method, "POST");
    assert_eq!(restored.priority, 4);
    assert!(restored.id.is_some());
    assert!(restored.created_at.is_some());
}

#[test]
fn test_backlog_continuation_respects_budget() {
    let storage = in_memory();
    {
        let mut seeder = open_queue(&storage, 0);
        for i in 0..4 {
            seeder.enqueue(request(&format!("/old/{}", i))).unwrap();
        }
    }
    assert_eq!(backlog(&storage), 4);

    let mut queue = open_queue(&storage, 3);
    let mut dequeued = 0;
    while queue.dequeue().unwrap().is_some() {
        dequeued += 1;
    }

    assert_eq!(dequeued, 3);
    assert_eq!(backlog(&storage), 1);
}

#[test]
fn test_backlog_is_drained_by_priority_then_age() {
    let storage = in_memory();
    {
        let mut seeder = open_queue(&storage, 0);
        seeder.enqueue(request("/low-old").with_priority(0)).unwrap();
        seeder.enqueue(request("/high").with_priority(5)).unwrap();
        seeder.enqueue(request("/low-new").with_priority(0)).unwrap();
    }

    let mut queue = open_queue(&storage, 1);
    let first = queue.dequeue().unwrap().unwrap();
    assert_eq!(first.url, "https://example.com/high");
    assert!(queue.dequeue().unwrap().is_none());

    let mut next_run = open_queue(&storage, 1);
    let second = next_run.dequeue().unwrap().unwrap();
    assert_eq!(second.url, "https://example.com/low-old");
}

#[test]
fn test_callbacks_resolve_after_spill() {
    let storage = in_memory();

    let mut registry: CallbackRegistry<fn(&FetchRequest) -> String> = CallbackRegistry::new();
    let parse_item = registry.register("parse_item", |request| format!("item {}", request.url));
    registry.register("on_error", |request| format!("error {}", request.url));

    let mut writer = open_queue(&storage, 0);
    let mut req = request("/item/1").with_errback("on_error");
    req.callback = Some(parse_item);
    writer.enqueue(req).unwrap();

    let mut reader = open_queue(&storage, 5).with_callbacks(&registry);
    let restored = reader.dequeue().unwrap().unwrap();

    let callback = restored.callback.as_ref().unwrap();
    let handler = registry.resolve(callback).unwrap();
    assert_eq!(handler(&restored), "item https://example.com/item/1");
}

#[test]
fn test_unknown_callback_is_explicit() {
    let storage = in_memory();

    let mut writer = open_queue(&storage, 0);
    writer
        .enqueue(request("/item/1").with_callback("parse_old_layout"))
        .unwrap();

    let registry: CallbackRegistry<()> = CallbackRegistry::new();
    let mut reader = open_queue(&storage, 5).with_callbacks(&registry);

    assert!(matches!(
        reader.dequeue(),
        Err(QueueError::UnknownCallback(key)) if key == "parse_old_layout"
    ));
    // Nothing was lost
    assert_eq!(backlog(&storage), 1);
}

#[test]
fn test_duplicate_is_not_admitted_twice() {
    let storage = in_memory();
    let mut queue = open_queue(&storage, 1);

    assert!(queue.enqueue(request("/a?x=1&y=2")).unwrap());
    assert!(!queue.enqueue(request("/a?y=2&x=1")).unwrap());
    assert!(queue.enqueue(request("/b")).unwrap());

    assert_eq!(queue.len(), 1);
    assert_eq!(backlog(&storage), 1);
}

#[test]
fn test_close_records_daily_stats() {
    let storage = in_memory();

    for _ in 0..2 {
        let mut queue = open_queue(&storage, 2);
        queue.enqueue(request("/a")).unwrap();
        queue.enqueue(request("/b")).unwrap();
        queue.enqueue(request("/c")).unwrap();
        queue.record_items(5);
        while queue.dequeue().unwrap().is_some() {}
        queue.close("finished").unwrap();
    }

    let guard = storage.lock().unwrap();
    let job_id = guard.job_id(NAMESPACE, JOB).unwrap().unwrap();
    let today = chrono::Utc::now().date_naive();
    let record = guard.get_daily_stats(job_id, today).unwrap().unwrap();

    assert_eq!(record.number_of_runs, 2);
    assert_eq!(record.stats.items_scraped, 10);
    assert_eq!(record.stats.enqueued_disk, 2);
    assert_eq!(record.stats.dequeued_memory, 4);
}

#[test]
fn test_two_processes_never_claim_the_same_request() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("highrise.db");

    let first = storage_with_job(SqliteStorage::new(&path).unwrap());
    let second = share(SqliteStorage::new(&path).unwrap());

    {
        let mut seeder = open_queue(&first, 0);
        for i in 0..6 {
            seeder.enqueue(request(&format!("/shared/{}", i))).unwrap();
        }
    }

    let mut a = open_queue(&first, 3);
    let mut b = open_queue(&second, 3);

    let mut seen = Vec::new();
    while let Some(request) = a.dequeue().unwrap() {
        seen.push(request.url);
    }
    while let Some(request) = b.dequeue().unwrap() {
        seen.push(request.url);
    }

    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 6);
    assert_eq!(backlog(&first), 0);
}

//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and run the
//! lease → fetch → apply cycle end-to-end against on-disk databases.

use chrono::{DateTime, Duration, Utc};
use leasecrawl::config::{Config, FetchConfig, LeaseConfig, RepositoryConfig, SeedConfig};
use leasecrawl::crawler::{
    build_http_client, content_hash, fetch_document, import_seeds_at, run_crawl, CheckResult,
    FetchOutcome, JobKind, LeaseManager, OutcomeApplier, SeedRecord,
};
use leasecrawl::storage::{Repository, SqliteRepository};
use serde_json::Map;
use std::path::Path;
use tempfile::TempDir;
use tokio::sync::watch;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const HOUR: i64 = 3600;

fn at(offset_secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + offset_secs, 0).unwrap()
}

/// Creates a test configuration writing to `db_path`
fn create_test_config(db_path: &Path, seed_files: Vec<String>) -> Config {
    Config {
        repository: RepositoryConfig {
            database_path: db_path.display().to_string(),
            busy_timeout_ms: 5_000,
        },
        fetch: FetchConfig {
            delay_ms: 0,
            user_agent: "TestBot/1.0".to_string(),
            timeout_secs: 1,
        },
        lease: LeaseConfig {
            lease_ttl_secs: 600,
            refetch_interval_secs: 7 * 24 * 3600,
            retry_interval_secs: 900,
        },
        seeds: SeedConfig {
            metadata_paths: seed_files,
        },
    }
}

fn open(db_path: &Path) -> SqliteRepository {
    SqliteRepository::open(db_path, std::time::Duration::from_secs(5)).unwrap()
}

fn seed(repo: &mut SqliteRepository, url: &str, now: DateTime<Utc>) {
    import_seeds_at(
        repo,
        vec![SeedRecord {
            url: url.to_string(),
            source: "en".to_string(),
            meta: Map::new(),
        }],
        now,
    )
    .unwrap();
}

fn check_from(outcome: FetchOutcome, kind: JobKind) -> CheckResult {
    match outcome {
        FetchOutcome::NotModified {
            etag,
            last_modified,
        } => CheckResult {
            status_code: 304,
            body: None,
            etag,
            last_modified,
            changed: Some(false),
        },
        FetchOutcome::Fetched {
            status_code,
            body,
            etag,
            last_modified,
            changed,
            ..
        } => {
            let unchanged = kind == JobKind::Refetch && changed == Some(false);
            CheckResult {
                status_code,
                body: (!unchanged).then_some(body),
                etag,
                last_modified,
                changed,
            }
        }
        FetchOutcome::Failed { error } => panic!("unexpected failure: {}", error),
    }
}

#[tokio::test]
async fn test_document_lifecycle_through_refetches() {
    let server = MockServer::start().await;
    let url = format!("{}/doc", server.uri());

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("crawl.db");
    let mut repo = open(&db_path);

    let leases = LeaseManager::new(Duration::seconds(600));
    let applier = OutcomeApplier::new(Duration::seconds(HOUR), Duration::seconds(900));
    let client = build_http_client(&create_test_config(&db_path, vec![]).fetch).unwrap();

    seed(&mut repo, &url, at(0));
    let norm_url = leasecrawl::normalize_url(&url);

    // 1. First fetch: 200 "A"
    Mock::given(method("GET"))
        .and(path("/doc"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("A")
                .insert_header("ETag", "\"v1\""),
        )
        .mount(&server)
        .await;

    let job = leases.take_job_at(&mut repo, "w1", at(1)).unwrap().unwrap();
    assert_eq!(job.kind, JobKind::FirstFetch);
    let outcome = fetch_document(&client, &job).await;
    let check = check_from(outcome, job.kind);
    assert!(applier
        .on_success_at(&mut repo, &norm_url, "w1", &check, at(2))
        .unwrap());

    let doc = repo.get_document(&norm_url).unwrap().unwrap();
    assert_eq!(doc.status_code, Some(200));
    assert_eq!(doc.html.as_deref(), Some("A"));
    assert_eq!(doc.content_hash, Some(content_hash("A")));
    assert_eq!(doc.etag.as_deref(), Some("\"v1\""));
    assert_eq!(doc.fetched_at, Some(at(2)));
    assert_eq!(doc.changed, None);
    assert_eq!(doc.next_refetch_at, Some(at(2 + HOUR)));
    assert_eq!(doc.lock, None);

    // Not due before the refetch interval has elapsed
    assert!(leases
        .take_job_at(&mut repo, "w1", at(1 + HOUR))
        .unwrap()
        .is_none());

    // 2. Refetch: 304 in answer to the stored validator
    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/doc"))
        .and(header("if-none-match", "\"v1\""))
        .respond_with(ResponseTemplate::new(304))
        .mount(&server)
        .await;

    let job = leases
        .take_job_at(&mut repo, "w1", at(2 + HOUR))
        .unwrap()
        .unwrap();
    assert_eq!(job.kind, JobKind::Refetch);
    let outcome = fetch_document(&client, &job).await;
    assert!(matches!(outcome, FetchOutcome::NotModified { .. }));
    let check = check_from(outcome, job.kind);
    applier
        .on_success_at(&mut repo, &norm_url, "w1", &check, at(3 + HOUR))
        .unwrap();

    let doc = repo.get_document(&norm_url).unwrap().unwrap();
    assert_eq!(doc.status_code, Some(304));
    assert_eq!(doc.html.as_deref(), Some("A"));
    assert_eq!(doc.fetched_at, Some(at(2)));
    assert_eq!(doc.last_checked_at, Some(at(3 + HOUR)));
    assert_eq!(doc.changed, Some(false));
    assert_eq!(doc.etag.as_deref(), Some("\"v1\""));
    assert_eq!(doc.next_refetch_at, Some(at(3 + 2 * HOUR)));

    // 3. Refetch: new content "B"
    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/doc"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("B")
                .insert_header("ETag", "\"v2\""),
        )
        .mount(&server)
        .await;

    let job = leases
        .take_job_at(&mut repo, "w1", at(3 + 2 * HOUR))
        .unwrap()
        .unwrap();
    let outcome = fetch_document(&client, &job).await;
    let check = check_from(outcome, job.kind);
    assert_eq!(check.changed, Some(true));
    applier
        .on_success_at(&mut repo, &norm_url, "w1", &check, at(4 + 2 * HOUR))
        .unwrap();

    let doc = repo.get_document(&norm_url).unwrap().unwrap();
    assert_eq!(doc.status_code, Some(200));
    assert_eq!(doc.html.as_deref(), Some("B"));
    assert_eq!(doc.content_hash, Some(content_hash("B")));
    assert_eq!(doc.fetched_at, Some(at(4 + 2 * HOUR)));
    assert_eq!(doc.changed, Some(true));
    assert_eq!(doc.etag.as_deref(), Some("\"v2\""));

    // 4. Refetch: the server stalls past the client timeout
    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/doc"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("C")
                .set_delay(std::time::Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let job = leases
        .take_job_at(&mut repo, "w1", at(4 + 3 * HOUR))
        .unwrap()
        .unwrap();
    let error = match fetch_document(&client, &job).await {
        FetchOutcome::Failed { error } => error,
        other => panic!("expected a failure, got {:?}", other),
    };
    assert_eq!(error, "timeout");
    applier
        .on_error_at(&mut repo, &norm_url, "w1", &error, at(5 + 3 * HOUR))
        .unwrap();

    let doc = repo.get_document(&norm_url).unwrap().unwrap();
    assert_eq!(doc.fail_count, 1);
    assert_eq!(doc.last_error.as_deref(), Some("timeout"));
    assert_eq!(doc.next_retry_at, Some(at(5 + 3 * HOUR + 900)));
    assert_eq!(doc.html.as_deref(), Some("B"));
    assert_eq!(doc.fetched_at, Some(at(4 + 2 * HOUR)));
    assert_eq!(doc.lock, None);

    // The retry holds the document back even though its refetch is overdue
    assert!(leases
        .take_job_at(&mut repo, "w1", at(5 + 3 * HOUR + 899))
        .unwrap()
        .is_none());
    assert!(leases
        .take_job_at(&mut repo, "w1", at(5 + 3 * HOUR + 900))
        .unwrap()
        .is_some());
}

#[test]
fn test_reseeding_keeps_fetch_history_and_lease() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("crawl.db");
    let mut repo = open(&db_path);

    let leases = LeaseManager::new(Duration::seconds(600));
    let applier = OutcomeApplier::new(Duration::seconds(0), Duration::seconds(900));

    seed(&mut repo, "http://a.test/page", at(0));
    leases.take_job_at(&mut repo, "w1", at(1)).unwrap().unwrap();
    applier
        .on_error_at(&mut repo, "http://a.test/page", "w1", "HTTP 500", at(2))
        .unwrap();
    leases.take_job_at(&mut repo, "w1", at(902)).unwrap().unwrap();
    let body = CheckResult {
        status_code: 200,
        body: Some("A".to_string()),
        ..CheckResult::default()
    };
    applier
        .on_success_at(&mut repo, "http://a.test/page", "w1", &body, at(903))
        .unwrap();
    leases.take_job_at(&mut repo, "w2", at(904)).unwrap().unwrap();

    let before = repo.get_document("http://a.test/page").unwrap().unwrap();
    seed(&mut repo, "HTTP://A.TEST:80/page#section", at(905));
    let after = repo.get_document("http://a.test/page").unwrap().unwrap();

    assert_eq!(repo.count_documents().unwrap(), 1);
    assert_eq!(after.fetched_at, before.fetched_at);
    assert_eq!(after.fail_count, 1);
    assert_eq!(after.lock, before.lock);
    assert_eq!(after.lock.map(|lock| lock.owner), Some("w2".to_string()));
    assert_eq!(after.html.as_deref(), Some("A"));
    assert_eq!(after.updated_at, at(905));
}

#[test]
fn test_racing_workers_lease_one_record_once() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("crawl.db");
    seed(&mut open(&db_path), "http://a.test/", at(0));

    let handles: Vec<_> = ["w1", "w2"]
        .into_iter()
        .map(|owner| {
            let db_path = db_path.clone();
            std::thread::spawn(move || {
                let mut repo = open(&db_path);
                LeaseManager::new(Duration::seconds(600))
                    .take_job_at(&mut repo, owner, at(1))
                    .unwrap()
                    .map(|job| job.document.lock.map(|lock| lock.owner))
            })
        })
        .collect();

    let winners: Vec<_> = handles
        .into_iter()
        .filter_map(|handle| handle.join().unwrap())
        .collect();

    assert_eq!(winners.len(), 1);
    let stored = open(&db_path).get_document("http://a.test/").unwrap().unwrap();
    assert_eq!(stored.lock.map(|lock| lock.owner), winners[0].clone());
}

#[test]
fn test_lease_takeover_discards_late_outcome() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("crawl.db");
    let mut repo = open(&db_path);

    let leases = LeaseManager::new(Duration::seconds(600));
    let applier = OutcomeApplier::new(Duration::seconds(HOUR), Duration::seconds(900));
    seed(&mut repo, "http://a.test/", at(0));

    // w1 leases and stalls past its TTL; w2 takes over
    leases.take_job_at(&mut repo, "w1", at(0)).unwrap().unwrap();
    assert!(leases.take_job_at(&mut repo, "w2", at(599)).unwrap().is_none());
    let job = leases.take_job_at(&mut repo, "w2", at(600)).unwrap().unwrap();
    assert_eq!(job.document.lock.as_ref().map(|lock| lock.owner.as_str()), Some("w2"));

    let stale = CheckResult {
        status_code: 200,
        body: Some("stale".to_string()),
        ..CheckResult::default()
    };
    assert!(!applier
        .on_success_at(&mut repo, "http://a.test/", "w1", &stale, at(601))
        .unwrap());
    assert!(!applier
        .on_error_at(&mut repo, "http://a.test/", "w1", "late", at(601))
        .unwrap());

    let doc = repo.get_document("http://a.test/").unwrap().unwrap();
    assert_eq!(doc.html, None);
    assert_eq!(doc.fail_count, 0);
    assert_eq!(doc.lock.map(|lock| lock.owner), Some("w2".to_string()));

    let fresh = CheckResult {
        status_code: 200,
        body: Some("fresh".to_string()),
        ..CheckResult::default()
    };
    assert!(applier
        .on_success_at(&mut repo, "http://a.test/", "w2", &fresh, at(602))
        .unwrap());
    let doc = repo.get_document("http://a.test/").unwrap().unwrap();
    assert_eq!(doc.html.as_deref(), Some("fresh"));
}

#[tokio::test]
async fn test_two_workers_share_the_repository() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("crawl.db");

    // Each page must be fetched exactly once across both workers
    let mut seeds = Vec::new();
    for i in 0..10 {
        Mock::given(method("GET"))
            .and(path(format!("/page{}", i)))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!("page {}", i)))
            .expect(1)
            .mount(&server)
            .await;
        seeds.push(serde_json::json!({
            "url": format!("{}/page{}", server.uri(), i),
            "title": format!("Page {}", i),
        }));
    }
    seeds.push(serde_json::json!({ "title": "no url" }));

    let seed_dir = dir.path().join("enwiki");
    std::fs::create_dir(&seed_dir).unwrap();
    let seed_path = seed_dir.join("metadata.json");
    std::fs::write(
        &seed_path,
        serde_json::to_string(&serde_json::json!({ "items": seeds })).unwrap(),
    )
    .unwrap();

    let config = create_test_config(&db_path, vec![seed_path.display().to_string()]);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let workers: Vec<_> = ["host-a:1", "host-b:2"]
        .into_iter()
        .map(|owner| {
            let config = config.clone();
            let shutdown = shutdown_rx.clone();
            tokio::spawn(async move { run_crawl(&config, owner, shutdown).await })
        })
        .collect();

    tokio::time::sleep(std::time::Duration::from_secs(3)).await;
    shutdown_tx.send(true).unwrap();

    let mut processed = 0;
    let mut fetched = 0;
    for worker in workers {
        let counters = worker.await.unwrap().unwrap();
        processed += counters.processed;
        fetched += counters.fetched;
        assert_eq!(counters.errors, 0);
    }
    assert_eq!(processed, 10);
    assert_eq!(fetched, 10);

    let repo = open(&db_path);
    assert_eq!(repo.count_documents().unwrap(), 10);
    assert_eq!(repo.count_failing().unwrap(), 0);

    let doc = repo
        .get_document(&leasecrawl::normalize_url(&format!("{}/page3", server.uri())))
        .unwrap()
        .unwrap();
    assert_eq!(doc.html.as_deref(), Some("page 3"));
    assert_eq!(doc.source, "enwiki");
    assert_eq!(doc.meta.get("title"), Some(&serde_json::json!("Page 3")));
    assert!(doc.lock.is_none());

    server.verify().await;
}

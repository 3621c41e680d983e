//! Concurrent workers racing for the same queue.

use chrono::Duration;
use leadflow_core::{LeadQuery, OwnerId};
use leadflow_db::{search_jobs, Database};
use tempfile::TempDir;

async fn file_db(dir: &TempDir) -> Database {
    let db = Database::new(dir.path().join("jobs.db"))
        .await
        .expect("create database");
    db.run_migrations().await.expect("run migrations");
    db
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_workers_never_claim_the_same_job() {
    let dir = TempDir::new().expect("create temp dir");
    let db = file_db(&dir).await;
    let owner = OwnerId::new("owner-1").expect("valid owner");
    let job = search_jobs::create(db.pool(), &owner, &LeadQuery::default(), 25)
        .await
        .expect("create job");

    let lease = Duration::seconds(300);
    let (a, b) = tokio::join!(
        {
            let db = db.clone();
            tokio::spawn(async move { search_jobs::claim_next_pending(db.pool(), lease).await })
        },
        {
            let db = db.clone();
            tokio::spawn(async move { search_jobs::claim_next_pending(db.pool(), lease).await })
        }
    );

    let a = a.expect("join worker a").expect("claim a");
    let b = b.expect("join worker b").expect("claim b");

    let claimed: Vec<_> = [a, b].into_iter().flatten().collect();
    assert_eq!(claimed.len(), 1, "exactly one worker gets the job");
    assert_eq!(claimed[0].id, job.id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_workers_partition_many_jobs() {
    let dir = TempDir::new().expect("create temp dir");
    let db = file_db(&dir).await;
    let owner = OwnerId::new("owner-1").expect("valid owner");

    for _ in 0..10 {
        search_jobs::create(db.pool(), &owner, &LeadQuery::default(), 10)
            .await
            .expect("create job");
    }

    let mut handles = Vec::new();
    for _ in 0..4 {
        let db = db.clone();
        handles.push(tokio::spawn(async move {
            let mut mine = Vec::new();
            while let Some(job) = search_jobs::claim_next_pending(db.pool(), Duration::seconds(300))
                .await
                .expect("claim")
            {
                mine.push(job.id);
            }
            mine
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.expect("join worker"));
    }

    let unique: std::collections::HashSet<_> = all.iter().collect();
    assert_eq!(all.len(), 10);
    assert_eq!(unique.len(), 10);
}

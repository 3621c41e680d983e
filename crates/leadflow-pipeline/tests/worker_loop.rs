//! Worker tick loop and lease recovery.

mod common;

use chrono::Duration;
use common::{harness, owner, session, summary, SOL};
use leadflow_core::LeadQuery;
use leadflow_db::{provider_calls, search_jobs, JobStatus};
use leadflow_pipeline::{DatabaseAuditSink, SearchWorker, TickOutcome};
use leadflow_provider::{HttpLeadProvider, LeadProvider};
use std::sync::Arc;
use tokio::sync::watch;

#[tokio::test]
async fn idle_tick_does_nothing() {
    let h = harness().await;
    assert_eq!(
        h.pipeline.worker().run_one_job().await.expect("worker tick"),
        TickOutcome::Idle
    );
    assert_eq!(h.provider.searches(), 0);
}

#[tokio::test]
async fn jobs_run_oldest_first() {
    let h = harness().await;
    let alice = owner("alice");
    h.provider.set_results(vec![summary(SOL, "Sol")], None);

    let first = h
        .pipeline
        .create_job(&alice, LeadQuery::default(), 10)
        .await
        .expect("create job");
    let second = h
        .pipeline
        .create_job(&alice, LeadQuery::default(), 10)
        .await
        .expect("create job");

    let worker = h.pipeline.worker();
    assert_eq!(
        worker.run_one_job().await.expect("tick"),
        TickOutcome::Completed(first)
    );
    assert_eq!(
        worker.run_one_job().await.expect("tick"),
        TickOutcome::Completed(second)
    );
    assert_eq!(worker.run_one_job().await.expect("tick"), TickOutcome::Idle);
}

#[tokio::test]
async fn expired_lease_is_reclaimed() {
    let h = harness().await;
    let alice = owner("alice");
    h.provider.set_results(vec![summary(SOL, "Sol")], None);

    let job_id = h
        .pipeline
        .create_job(&alice, LeadQuery::default(), 10)
        .await
        .expect("create job");

    // A worker that claimed the job and vanished
    let abandoned = search_jobs::claim_next_pending(h.db.pool(), Duration::seconds(-1))
        .await
        .expect("claim")
        .expect("job claimed");
    assert_eq!(abandoned.id, job_id);

    assert_eq!(
        h.pipeline.worker().run_one_job().await.expect("tick"),
        TickOutcome::Completed(job_id.clone())
    );
    let status = h.pipeline.get_status(&job_id, &alice).await.expect("status");
    assert_eq!(status.status, JobStatus::Completed);
}

#[tokio::test]
async fn live_lease_is_not_reclaimed() {
    let h = harness().await;
    h.pipeline
        .create_job(&owner("alice"), LeadQuery::default(), 10)
        .await
        .expect("create job");

    search_jobs::claim_next_pending(h.db.pool(), Duration::minutes(5))
        .await
        .expect("claim")
        .expect("job claimed");

    assert_eq!(
        h.pipeline.worker().run_one_job().await.expect("tick"),
        TickOutcome::Idle
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn run_loop_processes_jobs_until_shutdown() {
    let h = harness().await;
    let alice = owner("alice");
    h.provider.set_results(vec![summary(SOL, "Sol")], None);

    let mut jobs = Vec::new();
    for _ in 0..3 {
        jobs.push(
            h.pipeline
                .create_job(&alice, LeadQuery::default(), 10)
                .await
                .expect("create job"),
        );
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = h.pipeline.worker();
    let handle = tokio::spawn(async move {
        worker
            .run(std::time::Duration::from_millis(10), shutdown_rx)
            .await;
    });

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        let mut done = 0;
        for job in &jobs {
            let status = h.pipeline.get_status(job, &alice).await.expect("status");
            if status.status == JobStatus::Completed {
                done += 1;
            }
        }
        if done == jobs.len() {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "worker did not finish");
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    shutdown_tx.send(true).expect("send shutdown");
    tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .expect("worker stops")
        .expect("join worker");
    assert_eq!(h.provider.searches(), 3);
}

#[tokio::test]
async fn provider_calls_are_audited_to_the_database() {
    let h = harness().await;

    // Nothing listens on this port; the call fails and is still recorded
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let config = leadflow_core::ProviderConfig {
        base_url: format!("http://{addr}"),
        timeout_secs: 2,
        ..leadflow_core::ProviderConfig::default()
    };
    let provider: Arc<dyn LeadProvider> = Arc::new(
        HttpLeadProvider::new(&config)
            .expect("build provider")
            .with_audit_sink(Arc::new(DatabaseAuditSink::new(h.db.pool().clone()))),
    );

    let job_id = h
        .pipeline
        .create_job(&owner("alice"), LeadQuery::default(), 10)
        .await
        .expect("create job");
    let worker = SearchWorker::new(h.db.clone(), provider, Duration::minutes(5));
    assert_eq!(
        worker.run_one_job().await.expect("tick"),
        TickOutcome::Failed(job_id)
    );

    let calls = provider_calls::list_recent(h.db.pool(), 10).await.expect("calls");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].call.operation, "search");
    assert!(calls[0].call.status.is_none());
    assert!(calls[0].call.error.is_some());
}

#[tokio::test]
async fn oversized_provider_total_still_completes() {
    let h = harness().await;
    let alice = owner("alice");
    h.provider.set_results(vec![summary(SOL, "Sol")], Some(u64::MAX));

    let job_id = h
        .pipeline
        .create_job(&alice, LeadQuery::default(), 10)
        .await
        .expect("create job");
    assert_eq!(
        h.pipeline.worker().run_one_job().await.expect("tick"),
        TickOutcome::Completed(job_id.clone())
    );

    let status = h.pipeline.get_status(&job_id, &alice).await.expect("status");
    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(status.progress, 100);
    assert_eq!(status.total, Some(i64::MAX as u64));
    assert_eq!(status.has_more, Some(true));

    // Nothing left to run, and the provider is not asked again
    assert_eq!(
        h.pipeline.worker().run_one_job().await.expect("tick"),
        TickOutcome::Idle
    );
    assert_eq!(h.provider.searches(), 1);

    let views = h
        .pipeline
        .deliver(&job_id, &session("s1"), &alice)
        .await
        .expect("deliver");
    assert_eq!(views.len(), 1);
}

#[tokio::test]
async fn results_rejected_by_the_store_fail_the_job() {
    let h = harness().await;
    let alice = owner("alice");
    h.provider.set_results(vec![summary(SOL, "Sol")], None);

    // Any write of results violates a CHECK constraint
    sqlx::query(
        "CREATE TRIGGER reject_results BEFORE UPDATE OF results ON search_jobs
         WHEN NEW.results IS NOT NULL
         BEGIN
             INSERT INTO search_jobs (id, owner_id, filters, quantity, created_at, updated_at)
             VALUES ('rejected', 'nobody', '{}', 0, 'now', 'now');
         END",
    )
    .execute(h.db.pool())
    .await
    .expect("create trigger");

    let job_id = h
        .pipeline
        .create_job(&alice, LeadQuery::default(), 10)
        .await
        .expect("create job");
    assert_eq!(
        h.pipeline.worker().run_one_job().await.expect("tick"),
        TickOutcome::Failed(job_id.clone())
    );

    let status = h.pipeline.get_status(&job_id, &alice).await.expect("status");
    assert_eq!(status.status, JobStatus::Failed);
    assert!(status.error.is_some());

    // A failed job is terminal; later ticks leave it and the provider alone
    assert_eq!(
        h.pipeline.worker().run_one_job().await.expect("tick"),
        TickOutcome::Idle
    );
    assert_eq!(h.provider.searches(), 1);
}

#[tokio::test]
async fn huge_lease_claims_without_overflow() {
    let h = harness().await;
    h.provider.set_results(vec![summary(SOL, "Sol")], None);
    let job_id = h
        .pipeline
        .create_job(&owner("alice"), LeadQuery::default(), 10)
        .await
        .expect("create job");

    let worker = SearchWorker::new(h.db.clone(), h.provider.clone(), Duration::MAX);
    assert_eq!(
        worker.run_one_job().await.expect("tick"),
        TickOutcome::Completed(job_id)
    );
}

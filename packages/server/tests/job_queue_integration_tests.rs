//! Integration tests for the durable job queue (C2) against a real
//! Postgres instance, exercising dedup, lease-expiry, and
//! retry-to-failure scenarios.

mod common;

use std::time::Duration;

use crawler::{EnqueueResult, JobQueue, JobStatus, JobType, PostgresJobQueue};
use serde_json::json;

#[tokio::test]
async fn dedup_on_re_enqueue_bumps_priority_instead_of_duplicating() {
    let pool = common::test_pool().await;
    let queue = PostgresJobQueue::new(pool);
    let url = "https://shop.example.com/p/dedup-test";

    let first = queue.enqueue(JobType::Product, url, 1, json!({}), 3).await.unwrap();
    let EnqueueResult::Created(job) = first else {
        panic!("expected the first enqueue to create a row");
    };
    assert_eq!(job.priority, 1);

    let second = queue.enqueue(JobType::Product, url, 1, json!({}), 3).await.unwrap();
    let EnqueueResult::Duplicate(job) = second else {
        panic!("expected the second enqueue to observe the existing row");
    };
    assert_eq!(job.priority, 1);

    let third = queue.enqueue(JobType::Product, url, 5, json!({}), 3).await.unwrap();
    let EnqueueResult::Duplicate(job) = third else {
        panic!("expected the third enqueue to observe the existing row");
    };
    assert_eq!(job.priority, 5, "priority should bump to the max of existing and incoming");
}

#[tokio::test]
async fn lease_expiry_allows_a_second_worker_to_reclaim_the_job() {
    let pool = common::test_pool().await;
    let queue = PostgresJobQueue::new(pool).with_lease_duration(0);
    let url = "https://shop.example.com/p/lease-test";

    queue.enqueue(JobType::Product, url, 0, json!({}), 5).await.unwrap();

    let first_claim = queue.claim("worker-a", 1).await.unwrap();
    assert_eq!(first_claim.len(), 1);
    assert_eq!(first_claim[0].attempts, 1);

    tokio::time::sleep(Duration::from_millis(50)).await;

    let second_claim = queue.claim("worker-b", 1).await.unwrap();
    assert_eq!(second_claim.len(), 1, "an expired lease should be reclaimable");
    assert_eq!(second_claim[0].id, first_claim[0].id);
    assert_eq!(second_claim[0].attempts, 2, "reclaiming counts as another attempt");
}

#[tokio::test]
async fn retry_to_failure_dead_letters_after_max_attempts() {
    let pool = common::test_pool().await;
    let queue = PostgresJobQueue::new(pool);
    let url = "https://shop.example.com/p/retry-test";

    queue.enqueue(JobType::Product, url, 0, json!({}), 2).await.unwrap();

    let claimed = queue.claim("worker-a", 1).await.unwrap();
    let job_id = claimed[0].id;
    assert_eq!(claimed[0].attempts, 1);

    queue.fail(job_id, "render timeout").await.unwrap();
    let claimed = queue.claim("worker-a", 1).await.unwrap();
    assert_eq!(claimed.len(), 1, "job should be requeued after the first failure");
    assert_eq!(claimed[0].attempts, 2);

    queue.fail(job_id, "render timeout again").await.unwrap();
    let claimed = queue.claim("worker-a", 1).await.unwrap();
    assert!(claimed.is_empty(), "job should be dead-lettered after exhausting max_attempts");
}

#[tokio::test]
async fn release_by_worker_requeues_only_that_workers_leases() {
    let pool = common::test_pool().await;
    let queue = PostgresJobQueue::new(pool);

    queue
        .enqueue(JobType::Product, "https://shop.example.com/p/release-a", 0, json!({}), 3)
        .await
        .unwrap();
    queue
        .enqueue(JobType::Product, "https://shop.example.com/p/release-b", 0, json!({}), 3)
        .await
        .unwrap();

    let claimed_a = queue.claim("worker-a", 1).await.unwrap();
    let claimed_b = queue.claim("worker-b", 1).await.unwrap();
    assert_eq!(claimed_a.len(), 1);
    assert_eq!(claimed_b.len(), 1);

    let released = queue.release_by_worker("worker-a").await.unwrap();
    assert_eq!(released, 1, "only worker-a's lease should be released");

    let requeued = queue.claim("worker-c", 1).await.unwrap();
    assert_eq!(requeued.len(), 1);
    assert_eq!(requeued[0].id, claimed_a[0].id, "worker-a's job should be reclaimable again");
}

#[tokio::test]
async fn sweep_expired_leases_requeues_jobs_past_the_lease_ttl() {
    let pool = common::test_pool().await;
    let queue = PostgresJobQueue::new(pool.clone()).with_lease_duration(0);
    let url = "https://shop.example.com/p/sweep-test";

    queue.enqueue(JobType::Product, url, 0, json!({}), 3).await.unwrap();
    let claimed = queue.claim("worker-a", 1).await.unwrap();
    assert_eq!(claimed.len(), 1);

    tokio::time::sleep(Duration::from_millis(20)).await;

    let swept = queue.sweep_expired_leases().await.unwrap();
    assert_eq!(swept, 1);

    let (status,): (String,) = sqlx::query_as("SELECT status FROM jobs WHERE id = $1")
        .bind(claimed[0].id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(status, JobStatus::Queued.as_str());
}

#[tokio::test]
async fn complete_is_idempotent() {
    let pool = common::test_pool().await;
    let queue = PostgresJobQueue::new(pool.clone());
    let url = "https://shop.example.com/p/complete-test";

    queue.enqueue(JobType::Product, url, 0, json!({}), 3).await.unwrap();
    let claimed = queue.claim("worker-a", 1).await.unwrap();
    let job_id = claimed[0].id;

    queue.complete(job_id, json!({"itemsProcessed": 1})).await.unwrap();
    queue.complete(job_id, json!({"itemsProcessed": 2})).await.unwrap();

    let (status,): (String,) = sqlx::query_as("SELECT status FROM jobs WHERE id = $1")
        .bind(job_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(status, JobStatus::Completed.as_str());
}

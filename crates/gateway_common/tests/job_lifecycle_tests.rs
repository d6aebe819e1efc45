//! Integration tests for the job lifecycle manager.
//!
//! All tests run on a paused tokio clock, so poll intervals elapse
//! instantly and deterministically.

use gateway_common::fake::{FakeGateway, FakeResponse, Method};
use gateway_common::jobs::{
    JobKind, JobManager, JobResults, JobStart, JobState, PingRequest, TraceRouteRequest,
};
use gateway_common::GatewayApi;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn manager(fake: &FakeGateway) -> JobManager {
    let api: Arc<dyn GatewayApi> = Arc::new(fake.clone());
    JobManager::new(api)
}

fn created(id: u64) -> FakeResponse {
    FakeResponse::ok(json!({"created": {"id": id}}))
}

fn ping_state(state: &str) -> FakeResponse {
    FakeResponse::ok(json!({"pingJob": {"state": state}}))
}

/// A job that finishes is delivered once with its results and stays
/// registered until cancelled
#[tokio::test(start_paused = true)]
async fn test_ping_job_runs_to_completion() {
    let ping = JobKind::Ping;
    let fake = FakeGateway::new()
        .on_post(&ping.collection_path(), created(7))
        .on_get_sequence(
            &ping.state_path(7),
            vec![ping_state("requested"), ping_state("requested"), ping_state("complete")],
        )
        .on_get(
            &ping.job_path(7),
            FakeResponse::ok(json!({"pingJob": {"state": "complete", "results": {"failureCount": 1, "averageRtt": 12}}})),
        )
        .on_delete(&ping.job_path(7), FakeResponse::empty());
    let jobs = manager(&fake);

    let JobStart::Started(ticket) = jobs.start(PingRequest::new("www.google.com")).await.unwrap() else {
        panic!("job should start");
    };
    assert_eq!(ticket.id, 7);
    assert_eq!(jobs.active(ping), vec![7]);

    let outcome = ticket.finished.await.unwrap();
    assert_eq!(outcome.id, Some(7));
    assert_eq!(outcome.state, JobState::Complete);
    let Some(JobResults::Ping(results)) = &outcome.results else {
        panic!("ping results expected");
    };
    assert_eq!(results.failure_count, Some(1));
    assert_eq!(results.extra.get("averageRtt"), Some(&json!(12)));
    assert!(outcome.ping_succeeded(2));

    assert_eq!(fake.call_count(Method::Get, &ping.state_path(7)), 3);
    assert_eq!(jobs.state(ping, 7), Some(JobState::Complete));

    jobs.cancel(ping, 7).await.unwrap();
    assert!(jobs.active(ping).is_empty());
    assert_eq!(fake.deleted(), vec![ping.job_path(7)]);
}

/// The POST body carries only the parameters that were set
#[tokio::test(start_paused = true)]
async fn test_start_posts_job_parameters() {
    let fake = FakeGateway::new().on_post(&JobKind::Traceroute.collection_path(), created(2));
    let jobs = manager(&fake);

    let mut request = TraceRouteRequest::new("example.com");
    request.port = Some(33434);
    jobs.start(request).await.unwrap();

    let body = fake.calls()[0].body.clone().unwrap();
    assert_eq!(
        body,
        json!({"traceRouteJob": {"parameters": {"host": "example.com", "port": 33434}}})
    );
    assert_eq!(jobs.active(JobKind::Traceroute), vec![2]);
}

/// A 400 on creation reports error_hostname without an id
#[tokio::test(start_paused = true)]
async fn test_rejected_host() {
    let fake = FakeGateway::new().on_post(&JobKind::Ping.collection_path(), FakeResponse::status(400));
    let jobs = manager(&fake);

    match jobs.start(PingRequest::new("no such host")).await.unwrap() {
        JobStart::Rejected(outcome) => {
            assert_eq!(outcome.id, None);
            assert_eq!(outcome.state, JobState::ErrorHostname);
        }
        JobStart::Started(_) => panic!("job should be rejected"),
    }
    assert!(jobs.active(JobKind::Ping).is_empty());
}

/// Other creation failures are errors
#[tokio::test(start_paused = true)]
async fn test_start_failure_is_error() {
    let fake = FakeGateway::new().on_post(&JobKind::Ping.collection_path(), FakeResponse::status(500));
    let jobs = manager(&fake);

    let err = jobs.start(PingRequest::new("www.google.com")).await.unwrap_err();
    assert_eq!(err.code(), "GW-2001");
}

/// A job that disappears while polling is reported aborted
#[tokio::test(start_paused = true)]
async fn test_poll_not_found_is_aborted() {
    let ping = JobKind::Ping;
    let fake = FakeGateway::new()
        .on_post(&ping.collection_path(), created(3))
        .on_get(&ping.state_path(3), FakeResponse::status(404));
    let jobs = manager(&fake);

    let JobStart::Started(ticket) = jobs.start(PingRequest::new("www.google.com")).await.unwrap() else {
        panic!("job should start");
    };
    let outcome = ticket.finished.await.unwrap();
    assert_eq!(outcome.state, JobState::Aborted);
    assert!(outcome.results.is_none());
}

/// Error states other than complete are delivered as-is
#[tokio::test(start_paused = true)]
async fn test_poll_error_state_delivered() {
    let ping = JobKind::Ping;
    let fake = FakeGateway::new()
        .on_post(&ping.collection_path(), created(4))
        .on_get(&ping.state_path(4), ping_state("error"));
    let jobs = manager(&fake);

    let JobStart::Started(ticket) = jobs.start(PingRequest::new("www.google.com")).await.unwrap() else {
        panic!("job should start");
    };
    let outcome = ticket.finished.await.unwrap();
    assert_eq!(outcome.state, JobState::Error);
    assert!(!outcome.ping_succeeded(2));
}

/// Cancelling stops polling, deletes the job once and never delivers
#[tokio::test(start_paused = true)]
async fn test_cancel_is_idempotent_and_stops_polling() {
    let ping = JobKind::Ping;
    let fake = FakeGateway::new()
        .on_post(&ping.collection_path(), created(5))
        .on_get(&ping.state_path(5), ping_state("requested"))
        .on_delete(&ping.job_path(5), FakeResponse::empty());
    let jobs = manager(&fake);

    let JobStart::Started(ticket) = jobs.start(PingRequest::new("www.google.com")).await.unwrap() else {
        panic!("job should start");
    };

    tokio::time::sleep(Duration::from_millis(4500)).await;
    let polls = fake.call_count(Method::Get, &ping.state_path(5));
    assert_eq!(polls, 2);

    jobs.cancel(ping, 5).await.unwrap();
    jobs.cancel(ping, 5).await.unwrap();
    jobs.cancel(ping, 999).await.unwrap();

    assert!(ticket.finished.await.is_err());
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(fake.call_count(Method::Get, &ping.state_path(5)), polls);
    assert_eq!(fake.deleted(), vec![ping.job_path(5)]);
    assert!(jobs.active(ping).is_empty());
}

/// An id handed out again while still registered replaces the old job and
/// stops its poller
#[tokio::test(start_paused = true)]
async fn test_reused_id_stops_previous_poller() {
    let ping = JobKind::Ping;
    let fake = FakeGateway::new()
        .on_post(&ping.collection_path(), created(5))
        .on_get(&ping.state_path(5), ping_state("requested"))
        .on_delete(&ping.job_path(5), FakeResponse::empty());
    let jobs = manager(&fake);

    let JobStart::Started(first) = jobs.start(PingRequest::new("www.google.com")).await.unwrap() else {
        panic!("job should start");
    };
    let JobStart::Started(second) = jobs.start(PingRequest::new("www.google.com")).await.unwrap() else {
        panic!("job should start");
    };
    assert_eq!(second.id, 5);
    assert_eq!(jobs.active(ping), vec![5]);

    // The displaced poller is gone and its receiver closes
    assert!(first.finished.await.is_err());

    tokio::time::sleep(Duration::from_millis(4500)).await;
    assert_eq!(fake.call_count(Method::Get, &ping.state_path(5)), 2);

    jobs.cancel(ping, 5).await.unwrap();
    assert!(second.finished.await.is_err());
}

/// A job already gone on the gateway still cancels cleanly
#[tokio::test(start_paused = true)]
async fn test_cancel_tolerates_missing_job() {
    let ping = JobKind::Ping;
    let fake = FakeGateway::new()
        .on_post(&ping.collection_path(), created(6))
        .on_get(&ping.state_path(6), ping_state("requested"));
    let jobs = manager(&fake);

    jobs.start(PingRequest::new("www.google.com")).await.unwrap();
    // DELETE is unscripted and answers 404
    jobs.cancel(ping, 6).await.unwrap();
    assert!(jobs.active(ping).is_empty());
}

/// Cleanup deletes every listed job before a new job is started, so the
/// new id never collides with a zombie
#[tokio::test(start_paused = true)]
async fn test_cleanup_then_start_has_no_zombies() {
    let ping = JobKind::Ping;
    let fake = FakeGateway::new()
        .on_get(
            &ping.listing_path(),
            FakeResponse::ok(json!({"jobs": {"pingJobs": [{"id": 3, "state": "requested"}, {"id": 4, "state": "complete"}]}})),
        )
        .on_delete(&ping.job_path(3), FakeResponse::empty().after(Duration::from_millis(300)))
        .on_delete(&ping.job_path(4), FakeResponse::status(404))
        .on_post(&ping.collection_path(), created(8))
        .on_get(&ping.state_path(8), ping_state("requested"));
    let jobs = manager(&fake);

    assert_eq!(jobs.cleanup(ping).await.unwrap(), 2);
    let JobStart::Started(ticket) = jobs.start(PingRequest::new("www.google.com")).await.unwrap() else {
        panic!("job should start");
    };

    assert_eq!(ticket.id, 8);
    assert_eq!(jobs.active(ping), vec![8]);

    let post = fake.position(Method::Post, &ping.collection_path()).unwrap();
    for zombie in [3, 4] {
        let delete = fake.position(Method::Delete, &ping.job_path(zombie)).unwrap();
        assert!(delete < post);
    }
}

/// Cleanup also drops local pollers for the jobs it deletes
#[tokio::test(start_paused = true)]
async fn test_cleanup_stops_local_pollers() {
    let ping = JobKind::Ping;
    let fake = FakeGateway::new()
        .on_post(&ping.collection_path(), created(9))
        .on_get(&ping.state_path(9), ping_state("requested"))
        .on_get(
            &ping.listing_path(),
            FakeResponse::ok(json!({"jobs": {"pingJobs": [{"id": 9}]}})),
        )
        .on_delete(&ping.job_path(9), FakeResponse::empty());
    let jobs = manager(&fake);

    jobs.start(PingRequest::new("www.google.com")).await.unwrap();
    jobs.cleanup(ping).await.unwrap();
    assert!(jobs.active(ping).is_empty());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(fake.call_count(Method::Get, &ping.state_path(9)), 0);
}

/// A listing without the jobs array counts as nothing to clean
#[tokio::test(start_paused = true)]
async fn test_cleanup_with_malformed_listing() {
    let fake = FakeGateway::new().on_get(
        &JobKind::Traceroute.listing_path(),
        FakeResponse::ok(json!({"jobs": {}})),
    );
    let jobs = manager(&fake);

    assert_eq!(jobs.cleanup(JobKind::Traceroute).await.unwrap(), 0);
    assert!(fake.deleted().is_empty());
}

//! Job group tests

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clash::mock::{FailureConfig, MockCloud, MockOp};
use clash::{ClashError, JobConfig, JobFactory, JobGroup, JobRuntimeSpec, PollingConfig};

fn factory(cloud: &MockCloud, polling: PollingConfig) -> JobFactory {
    JobFactory::new(Arc::new(JobConfig::default()), cloud.clients()).polling(polling)
}

fn batch(cloud: &MockCloud) -> JobGroup {
    let polling = PollingConfig::uniform(Duration::from_millis(5));
    let mut group = JobGroup::new("batch", factory(cloud, polling));
    group.add_job(JobRuntimeSpec::new(["echo", "hi"]));
    group.add_job(JobRuntimeSpec::new(["echo", "bye"]));
    group
}

fn wait_until<F: Fn() -> bool>(condition: F) {
    let start = Instant::now();
    while !condition() {
        assert!(start.elapsed() < Duration::from_secs(5), "condition not met in time");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_add_job_has_no_side_effects() {
    let cloud = MockCloud::new();
    let group = batch(&cloud);
    assert_eq!(group.pending(), 2);
    assert!(group.jobs().is_empty());
    assert!(cloud.calls().is_empty());
}

#[test]
fn test_batch_all_succeed() {
    let cloud = MockCloud::new();
    let mut group = batch(&cloud);
    group.run().unwrap();

    let names: Vec<&str> = group.jobs().iter().map(|job| job.name()).collect();
    assert_eq!(names, vec!["batch-0", "batch-1"]);
    assert_eq!(group.pending(), 0);

    cloud.finish_worker("batch-0", 0).unwrap();
    cloud.finish_worker("batch-1", 0).unwrap();
    assert!(group.wait());
    assert_eq!(group.codes().len(), 2);

    group.clean_up().unwrap();
    assert!(cloud.is_empty());
}

#[test]
fn test_batch_one_fails() {
    let cloud = MockCloud::new();
    let mut group = batch(&cloud);
    group.run().unwrap();

    cloud.finish_worker("batch-0", 0).unwrap();
    cloud.finish_worker("batch-1", 1).unwrap();
    assert!(!group.wait());
    assert_eq!(group.codes()["batch-1"], 1);

    group.clean_up().unwrap();
    assert!(cloud.is_empty());
}

#[test]
fn test_wait_blocks_until_every_job_reported() {
    let cloud = MockCloud::new();
    let mut group = batch(&cloud);
    group.run().unwrap();
    cloud.finish_worker("batch-0", 0).unwrap();

    let worker = cloud.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        worker.finish_worker("batch-1", 0).unwrap();
    });

    let start = Instant::now();
    assert!(group.wait());
    assert!(start.elapsed() >= Duration::from_millis(40));
    handle.join().unwrap();
    group.clean_up().unwrap();
}

#[test]
fn test_wait_timeout() {
    let cloud = MockCloud::new();
    let mut group = batch(&cloud);
    group.run().unwrap();
    cloud.finish_worker("batch-0", 0).unwrap();

    let err = group.wait_timeout(Duration::from_millis(50)).unwrap_err();
    assert!(matches!(
        err,
        ClashError::JobTimeout { waited } if waited >= Duration::from_millis(50)
    ));

    cloud.finish_worker("batch-1", 0).unwrap();
    assert!(group.wait_timeout(Duration::from_secs(5)).unwrap());
    group.clean_up().unwrap();
}

#[test]
fn test_duplicate_status_counts_once() {
    let cloud = MockCloud::new();
    let mut group = batch(&cloud);
    group.run().unwrap();

    cloud.publish_status("batch-0", 0).unwrap();
    cloud.publish_status("batch-0", 5).unwrap();
    wait_until(|| {
        cloud.queued_count("projects/my-gcp-project/subscriptions/batch-0") == 0
            && cloud.unacked_count("projects/my-gcp-project/subscriptions/batch-0") == 0
    });
    assert_eq!(group.codes().len(), 1);
    assert_eq!(group.codes()["batch-0"], 0);

    // batch-1 is still outstanding, so the group is not done.
    assert!(group.wait_timeout(Duration::from_millis(30)).is_err());
    cloud.finish_worker("batch-1", 0).unwrap();
    assert!(group.wait());
}

#[test]
fn test_failed_start_keeps_remaining_specs() {
    let cloud = MockCloud::new();
    cloud.inject_failure(
        MockOp::CreateSubscription,
        FailureConfig::reject("denied").with_fail_count(1),
    );
    let mut group = batch(&cloud);

    let err = group.run().unwrap_err();
    assert!(matches!(err, ClashError::Messaging { .. }));
    assert!(group.jobs().is_empty());
    assert_eq!(group.pending(), 1);

    // The next run continues numbering after the failed job.
    group.run().unwrap();
    let names: Vec<&str> = group.jobs().iter().map(|job| job.name()).collect();
    assert_eq!(names, vec!["batch-1"]);
    assert_eq!(group.pending(), 0);
}

#[test]
fn test_clean_up_attempts_every_job() {
    let cloud = MockCloud::new();
    let polling =
        PollingConfig::uniform(Duration::from_millis(5)).with_deadline(Duration::from_millis(30));
    let mut group = JobGroup::new("stuck", factory(&cloud, polling));
    group.add_job(JobRuntimeSpec::new(["sleep", "600"]));
    group.add_job(JobRuntimeSpec::new(["sleep", "600"]));
    group.run().unwrap();

    // Neither worker removes its group, so neither template can go.
    let err = group.clean_up().unwrap_err();
    match err {
        ClashError::Cleanup { failures } => {
            let failed: Vec<&str> = failures.iter().map(|(job, _)| job.as_str()).collect();
            assert_eq!(failed, vec!["stuck-0", "stuck-1"]);
            assert!(failures
                .iter()
                .all(|(_, e)| matches!(e, ClashError::OperationTimeout { .. })));
        }
        other => panic!("expected cleanup error, got {:?}", other),
    }
}

#[test]
fn test_with_cleanup_runs_group_end_to_end() {
    let cloud = MockCloud::new();
    let worker = cloud.clone();
    let group = batch(&cloud);

    let succeeded = group
        .with_cleanup(|group| {
            group.run()?;
            worker.finish_worker("batch-0", 0).unwrap();
            worker.finish_worker("batch-1", 0).unwrap();
            Ok(group.wait())
        })
        .unwrap();

    assert!(succeeded);
    assert!(cloud.is_empty());
}

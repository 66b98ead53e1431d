//! Driver behaviour across libraries: isolation, resets and read-only checks.

use vendorbot_core::fakes::{test_library, test_task, FakeWorld};
use vendorbot_core::{Driver, Frequency, RetryPolicy, RunSettings};
use vendorbot_state::{JobOutcome, JobStatus, JobStore, JobType, NewJob};

fn driver(world: &FakeWorld) -> Driver {
    Driver::new(
        world.providers(),
        RunSettings {
            current_release: "140".to_string(),
            retry: RetryPolicy::none(),
        },
    )
}

#[tokio::test]
async fn one_failing_library_does_not_stop_the_others() {
    let world = FakeWorld::new(&["base", "a", "b"]);
    world.vendor.set_latest("broken", "b");
    world.vendor.set_latest("opus", "b");
    // `broken` claims an in-tree revision upstream never had.
    let libs = vec![test_library("broken", "zzz"), test_library("opus", "base")];

    let report = driver(&world).run(&libs).await;
    assert!(!report.success());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].library, "broken");
    assert!(report.failed[0].error.contains("no merge base"));
    assert_eq!(report.processed, vec!["opus".to_string()]);
    assert_eq!(report.jobs_created, 1);

    // The monorepo is reset after every library, failed or not.
    assert_eq!(world.vcs.resets(), 2);
    assert!(world.store.list_jobs(Some("broken")).await.unwrap().is_empty());
}

#[tokio::test]
async fn up_to_date_library_does_nothing() {
    let world = FakeWorld::new(&["base"]);
    world.vendor.set_latest("opus", "base");
    let report = driver(&world).run(&[test_library("opus", "base")]).await;
    assert!(report.success());
    assert_eq!(report.jobs_created, 0);
    assert!(world.bugs.ticket_ids().is_empty());
}

#[tokio::test]
async fn both_task_types_run_for_one_library() {
    let world = FakeWorld::new(&["base", "a"]);
    world.vendor.set_latest("opus", "a");
    let mut lib = test_library("opus", "base");
    lib.tasks
        .push(test_task(JobType::CommitAlert, Frequency::Every));

    let report = driver(&world).run(&[lib]).await;
    assert!(report.success(), "{:?}", report.failed);
    assert_eq!(report.jobs_created, 2);
    let vendoring = world
        .store
        .job_by_version("opus", JobType::Vendoring, "a")
        .await
        .unwrap()
        .unwrap();
    let alert = world
        .store
        .job_by_version("opus", JobType::CommitAlert, "a")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(vendoring.status, JobStatus::AwaitingInitialPlatformTryResults);
    assert_eq!(alert.status, JobStatus::Done);
    assert_ne!(vendoring.ticket_id, alert.ticket_id);
}

#[tokio::test]
async fn two_active_jobs_are_rejected() {
    let world = FakeWorld::new(&["base", "a", "b"]);
    world.vendor.set_latest("opus", "b");
    for version in ["a", "b"] {
        world
            .store
            .create_job(NewJob {
                library_name: "opus".to_string(),
                job_type: JobType::Vendoring,
                version: version.to_string(),
                status: JobStatus::Done,
                outcome: JobOutcome::AllSuccess,
                ticket_id: None,
                release: Some("139".to_string()),
            })
            .await
            .unwrap();
    }

    let report = driver(&world).run(&[test_library("opus", "base")]).await;
    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].error.contains("2 active"));
    assert_eq!(report.jobs_created, 0);
}

#[tokio::test]
async fn check_reports_without_side_effects() {
    let world = FakeWorld::new(&["base", "a", "b"]);
    world.vendor.set_latest("opus", "b");
    let lib = test_library("opus", "base");

    let checks = driver(&world).check(&lib).await.unwrap();
    assert_eq!(checks.len(), 1);
    let check = &checks[0];
    assert_eq!(check.job_type, JobType::Vendoring);
    assert_eq!(check.candidate.as_ref().unwrap().revision, "b");
    let unseen: Vec<&str> = check.unseen.iter().map(|c| c.revision.as_str()).collect();
    assert_eq!(unseen, vec!["a", "b"]);
    assert_eq!(check.all_new.len(), 2);
    assert!(check.unseen.iter().all(|c| c.details().is_some()));

    assert!(world.store.list_jobs(None).await.unwrap().is_empty());
    assert!(world.bugs.ticket_ids().is_empty());
    assert_eq!(world.vcs.resets(), 0);
}

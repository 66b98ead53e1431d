//! Commit alerts: one ticket per batch of unseen upstream commits.

use vendorbot_core::fakes::{test_library, test_task, FakeWorld};
use vendorbot_core::{CommitFilter, Driver, Frequency, Library, RetryPolicy, RunSettings};
use vendorbot_state::{Job, JobOutcome, JobStatus, JobStore, JobType};

fn settings() -> RunSettings {
    RunSettings {
        current_release: "140".to_string(),
        retry: RetryPolicy::none(),
    }
}

fn alert_library(frequency: Frequency) -> Library {
    let mut lib = test_library("dav1d", "base");
    lib.tasks = vec![test_task(JobType::CommitAlert, frequency)];
    lib
}

async fn alerts(world: &FakeWorld) -> Vec<Job> {
    world.store.list_jobs(Some("dav1d")).await.unwrap()
}

#[tokio::test]
async fn alert_is_filed_and_recorded_done() {
    let world = FakeWorld::new(&["base", "a", "b"]);
    world.vendor.set_latest("dav1d", "b");
    let driver = Driver::new(world.providers(), settings());
    let libs = vec![alert_library(Frequency::Every)];

    let report = driver.run(&libs).await;
    assert!(report.success(), "{:?}", report.failed);
    let jobs = alerts(&world).await;
    assert_eq!(jobs.len(), 1);
    let job = &jobs[0];
    assert_eq!(job.version, "b");
    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.outcome, JobOutcome::AllSuccess);
    assert!(job.is_affected("140"));

    let ticket = world.bugs.ticket(job.ticket_id.unwrap()).unwrap();
    assert_eq!(ticket.filed.summary, "New upstream commits in dav1d (up to b)");
    assert_eq!(ticket.filed.depends_on, None);
    assert_eq!(ticket.filed.cc, vec!["watcher@example.com".to_string()]);
    assert_eq!(ticket.affected_releases, vec!["140".to_string()]);

    // Nothing to review or test for an alert.
    assert!(world.ci.submissions().is_empty());
    assert!(world.review.submitted().is_empty());
    assert!(world.vendor.vendored().is_empty());
}

#[tokio::test]
async fn later_alert_depends_on_the_open_one() {
    let world = FakeWorld::new(&["base", "a", "b"]);
    world.vendor.set_latest("dav1d", "b");
    let driver = Driver::new(world.providers(), settings());
    let libs = vec![alert_library(Frequency::Every)];
    driver.run(&libs).await;
    let first = alerts(&world).await.remove(0);

    world.vcs.push("c");
    world.vendor.set_latest("dav1d", "c");
    let report = driver.run(&libs).await;
    assert_eq!(report.jobs_created, 1);

    let jobs = alerts(&world).await;
    let old = jobs.iter().find(|j| j.id == first.id).unwrap();
    let new = jobs.iter().find(|j| j.version == "c").unwrap();
    assert!(old.relinquished);
    assert!(new.is_active());

    // The earlier ticket stays open and the new one builds on it.
    let old_ticket = world.bugs.ticket(old.ticket_id.unwrap()).unwrap();
    assert!(old_ticket.open);
    let new_ticket = world.bugs.ticket(new.ticket_id.unwrap()).unwrap();
    assert_eq!(new_ticket.filed.depends_on, old.ticket_id);
    assert!(new_ticket.filed.description.contains("/commit/c"));
    assert!(!new_ticket.filed.description.contains("/commit/a"));

    // Re-running finds nothing new.
    let report = driver.run(&libs).await;
    assert_eq!(report.jobs_created, 0);
    assert_eq!(world.bugs.ticket_ids().len(), 2);
}

#[tokio::test]
async fn closed_alert_is_not_a_dependency() {
    let world = FakeWorld::new(&["base", "a"]);
    world.vendor.set_latest("dav1d", "a");
    let driver = Driver::new(world.providers(), settings());
    let libs = vec![alert_library(Frequency::Every)];
    driver.run(&libs).await;
    let first = alerts(&world).await.remove(0);
    world.bugs.close(first.ticket_id.unwrap());

    world.vcs.push("b");
    world.vendor.set_latest("dav1d", "b");
    driver.run(&libs).await;
    let new = alerts(&world)
        .await
        .into_iter()
        .find(|j| j.version == "b")
        .unwrap();
    let ticket = world.bugs.ticket(new.ticket_id.unwrap()).unwrap();
    assert_eq!(ticket.filed.depends_on, None);
}

#[tokio::test]
async fn filtered_commits_are_recorded_without_a_ticket() {
    let world = FakeWorld::new(&["base", "a", "b"]);
    world.vendor.set_latest("dav1d", "b");
    world.vcs.set_files("a", &["docs/README.md"]);
    world.vcs.set_files("b", &["tools/ci.yml"]);
    let mut lib = alert_library(Frequency::Every);
    lib.tasks[0].filter = CommitFilter::PathPrefixes(vec!["src/".to_string()]);
    let driver = Driver::new(world.providers(), settings());
    let libs = vec![lib];

    let report = driver.run(&libs).await;
    assert_eq!(report.jobs_created, 1);
    let jobs = alerts(&world).await;
    assert_eq!(jobs[0].ticket_id, None);
    assert_eq!(jobs[0].outcome, JobOutcome::AllSuccess);
    assert!(world.bugs.ticket_ids().is_empty());

    // A relevant commit later gets a ticket listing only itself.
    world.vcs.push("c");
    world.vendor.set_latest("dav1d", "c");
    driver.run(&libs).await;
    let ids = world.bugs.ticket_ids();
    assert_eq!(ids.len(), 1);
    let ticket = world.bugs.ticket(ids[0]).unwrap();
    assert!(ticket.filed.description.contains("/commit/c"));
    assert!(!ticket.filed.description.contains("/commit/b"));
}

#[tokio::test]
async fn commit_threshold_holds_back_small_batches() {
    let world = FakeWorld::new(&["base", "a", "b"]);
    world.vendor.set_latest("dav1d", "b");
    let driver = Driver::new(world.providers(), settings());
    let libs = vec![alert_library(Frequency::Commits(3))];

    driver.run(&libs).await;
    assert!(alerts(&world).await.is_empty());

    world.vcs.push("c");
    world.vendor.set_latest("dav1d", "c");
    driver.run(&libs).await;
    let jobs = alerts(&world).await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].version, "c");
}

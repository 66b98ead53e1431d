//! Trait contract tests for JobStore.
//!
//! Every contract runs against both the in-memory fake and an in-memory
//! SurrealDB store. Any conforming implementation must pass these.

use vendorbot_state::fakes::MemoryJobStore;
use vendorbot_state::{
    JobId, JobOutcome, JobStatus, JobStore, JobType, NewJob, ReviewPurpose, StorageError,
    SurrealJobStore, TryRunPurpose,
};

fn new_job(library: &str, job_type: JobType, version: &str) -> NewJob {
    NewJob {
        library_name: library.to_string(),
        job_type,
        version: version.to_string(),
        status: JobStatus::Created,
        outcome: JobOutcome::Pending,
        ticket_id: Some(100),
        release: Some("140".to_string()),
    }
}

async fn stores() -> Vec<(&'static str, Box<dyn JobStore>)> {
    vec![
        ("memory", Box::new(MemoryJobStore::new()) as Box<dyn JobStore>),
        (
            "surreal",
            Box::new(SurrealJobStore::in_memory().await.unwrap()) as Box<dyn JobStore>,
        ),
    ]
}

#[tokio::test]
async fn create_assigns_increasing_ids() {
    for (name, store) in stores().await {
        let a = store.create_job(new_job("dav1d", JobType::Vendoring, "a1")).await.unwrap();
        let b = store.create_job(new_job("dav1d", JobType::Vendoring, "b2")).await.unwrap();
        assert!(b.id > a.id, "{name}: ids must increase");
        assert_eq!(a.status, JobStatus::Created, "{name}");
        assert!(!a.relinquished, "{name}");
    }
}

#[tokio::test]
async fn duplicate_version_in_same_stream_is_rejected() {
    for (name, store) in stores().await {
        store.create_job(new_job("dav1d", JobType::Vendoring, "a1")).await.unwrap();
        let err = store
            .create_job(new_job("dav1d", JobType::Vendoring, "a1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::DuplicateVersion { .. }), "{name}: {err}");
    }
}

#[tokio::test]
async fn same_version_allowed_across_task_types() {
    for (name, store) in stores().await {
        store.create_job(new_job("dav1d", JobType::Vendoring, "a1")).await.unwrap();
        store
            .create_job(new_job("dav1d", JobType::CommitAlert, "a1"))
            .await
            .unwrap_or_else(|e| panic!("{name}: {e}"));
    }
}

#[tokio::test]
async fn save_round_trips_mutable_fields() {
    for (name, store) in stores().await {
        let mut job = store.create_job(new_job("aom", JobType::Vendoring, "v1")).await.unwrap();
        job.transition(JobStatus::AwaitingInitialPlatformTryResults);
        job.record_try_run("tryrev1", TryRunPurpose::InitialPlatform);
        job.record_review_submission("D1", ReviewPurpose::Vendoring);
        job.mark_affected("141");
        store.save_job(&job).await.unwrap();

        let loaded = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::AwaitingInitialPlatformTryResults, "{name}");
        assert_eq!(loaded.try_runs, job.try_runs, "{name}");
        assert_eq!(loaded.review_submissions, job.review_submissions, "{name}");
        assert!(loaded.is_affected("141"), "{name}");
    }
}

#[tokio::test]
async fn save_unknown_job_fails() {
    for (name, store) in stores().await {
        let mut job = store.create_job(new_job("aom", JobType::Vendoring, "v1")).await.unwrap();
        job.id = JobId(9999);
        let err = store.save_job(&job).await.unwrap_err();
        assert!(matches!(err, StorageError::JobNotFound { id: 9999 }), "{name}: {err}");
    }
}

#[tokio::test]
async fn job_by_version_scoped_to_stream() {
    for (name, store) in stores().await {
        store.create_job(new_job("aom", JobType::Vendoring, "v1")).await.unwrap();
        assert!(store
            .job_by_version("aom", JobType::Vendoring, "v1")
            .await
            .unwrap()
            .is_some(), "{name}");
        assert!(store
            .job_by_version("aom", JobType::CommitAlert, "v1")
            .await
            .unwrap()
            .is_none(), "{name}");
        assert!(store
            .job_by_version("libvpx", JobType::Vendoring, "v1")
            .await
            .unwrap()
            .is_none(), "{name}");
    }
}

#[tokio::test]
async fn relinquished_jobs_hidden_unless_requested() {
    for (name, store) in stores().await {
        let mut old = store.create_job(new_job("aom", JobType::Vendoring, "v1")).await.unwrap();
        store.create_job(new_job("aom", JobType::Vendoring, "v2")).await.unwrap();
        old.relinquished = true;
        store.save_job(&old).await.unwrap();

        let active = store.jobs_for_library("aom", JobType::Vendoring, false).await.unwrap();
        assert_eq!(active.len(), 1, "{name}");
        assert_eq!(active[0].version, "v2", "{name}");

        let all = store.jobs_for_library("aom", JobType::Vendoring, true).await.unwrap();
        let versions: Vec<&str> = all.iter().map(|j| j.version.as_str()).collect();
        assert_eq!(versions, vec!["v1", "v2"], "{name}: oldest first");
    }
}

#[tokio::test]
async fn most_recent_includes_relinquished() {
    for (name, store) in stores().await {
        store.create_job(new_job("aom", JobType::Vendoring, "v1")).await.unwrap();
        let mut newest = store.create_job(new_job("aom", JobType::Vendoring, "v2")).await.unwrap();
        newest.relinquished = true;
        store.save_job(&newest).await.unwrap();

        let recent = store.most_recent_job("aom", JobType::Vendoring).await.unwrap().unwrap();
        assert_eq!(recent.version, "v2", "{name}");
        assert!(store
            .most_recent_job("aom", JobType::CommitAlert)
            .await
            .unwrap()
            .is_none(), "{name}");
    }
}

#[tokio::test]
async fn list_and_delete() {
    for (name, store) in stores().await {
        let a = store.create_job(new_job("aom", JobType::Vendoring, "v1")).await.unwrap();
        store.create_job(new_job("dav1d", JobType::CommitAlert, "c1")).await.unwrap();

        assert_eq!(store.list_jobs(None).await.unwrap().len(), 2, "{name}");
        assert_eq!(store.list_jobs(Some("aom")).await.unwrap().len(), 1, "{name}");

        store.delete_job(a.id).await.unwrap();
        assert!(store.get_job(a.id).await.unwrap().is_none(), "{name}");
        let err = store.delete_job(a.id).await.unwrap_err();
        assert!(matches!(err, StorageError::JobNotFound { .. }), "{name}");
    }
}

//! Integration tests: combine several try pushes, gate, classify, retrigger.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use vendorbot_ci::*;

fn run(name: &str, task: &str, run_id: u32, result: CiJobResult) -> CiJob {
    CiJob {
        job_type_name: name.to_string(),
        task_id: task.to_string(),
        run_id,
        state: CiJobState::Completed,
        result,
        failure_classification_id: NOT_CLASSIFIED,
    }
}

/// Pushes keyed by revision, with retriggers recorded.
#[derive(Default)]
struct ScriptedCi {
    pushes: HashMap<String, (Vec<CiJob>, PushHealth)>,
    retriggered: Mutex<Vec<RetriggerRequest>>,
}

#[async_trait]
impl CiProvider for ScriptedCi {
    async fn submit_to_ci(&self, _library: &str, filter: &PlatformFilter) -> Result<String, CiError> {
        Ok(format!("rev{}", filter.selector()))
    }

    async fn get_job_results(&self, revision: &str) -> Result<Vec<CiJob>, CiError> {
        Ok(self.pushes.get(revision).map(|p| p.0.clone()).unwrap_or_default())
    }

    async fn get_push_health(&self, revision: &str) -> Result<PushHealth, CiError> {
        Ok(self.pushes.get(revision).map(|p| p.1.clone()).unwrap_or_default())
    }

    async fn retrigger(&self, requests: &[RetriggerRequest]) -> Result<(), CiError> {
        self.retriggered.lock().unwrap().extend_from_slice(requests);
        Ok(())
    }

    async fn failure_classifications(&self) -> Result<FailureClassifications, CiError> {
        Ok([(1, "not classified".to_string()), (4, "intermittent".to_string())]
            .into_iter()
            .collect())
    }

    fn push_url(&self, revision: &str) -> String {
        format!("https://ci.example/#/jobs?revision={revision}")
    }
}

async fn combined(ci: &ScriptedCi, revisions: &[&str]) -> (Vec<CiJob>, PushHealth) {
    let mut results = Vec::new();
    let mut health = Vec::new();
    for rev in revisions {
        results.push(ci.get_job_results(rev).await.unwrap());
        health.push(ci.get_push_health(rev).await.unwrap());
    }
    (combine_results(results), PushHealth::combine(health))
}

#[tokio::test]
async fn unknown_failure_retriggered_then_reported() {
    let mut ci = ScriptedCi::default();
    ci.pushes.insert(
        "initial".into(),
        (
            vec![
                run("build-linux64/opt", "B1", 0, CiJobResult::Success),
                run("test-linux64/opt-gtest", "G1", 0, CiJobResult::Success),
            ],
            PushHealth::default(),
        ),
    );
    ci.pushes.insert(
        "more".into(),
        (
            vec![
                run("build-win64/opt", "B2", 0, CiJobResult::Success),
                run("test-win64/opt-mochitest-media", "M1", 0, CiJobResult::TestFailed),
            ],
            PushHealth::default(),
        ),
    );

    let (jobs, health) = combined(&ci, &["initial", "more"]).await;
    assert_eq!(CiGate::evaluate(&jobs), GateVerdict::Completed);

    let names = ci.failure_classifications().await.unwrap();
    let first = Classification::classify(&jobs, &health, &names);
    let requests = first.retriggers();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].task_id, "M1");
    assert_eq!(requests[0].times, 2);
    ci.retrigger(&requests).await.unwrap();
    assert_eq!(ci.retriggered.lock().unwrap().len(), 1);

    // The reruns show up on the same push with new run ids.
    let entry = ci.pushes.get_mut("more").unwrap();
    entry.0.push(run("test-win64/opt-mochitest-media", "M1", 1, CiJobResult::Success));
    entry.0.push(run("test-win64/opt-mochitest-media", "M1", 2, CiJobResult::TestFailed));
    entry.1.need_investigation.push(HealthFailure {
        test_name: "dom/media/test_playback.html".into(),
        job_type_name: "test-win64/opt-mochitest-media".into(),
        failed_task_ids: vec!["M1".into(), "M1".into()],
        total_runs: 3,
    });

    let (jobs, health) = combined(&ci, &["initial", "more"]).await;
    let last = Classification::classify(&jobs, &health, &names);
    assert!(last.needs_human());
    assert!(last.retriggers().is_empty(), "attempt budget is spent");
    assert!(last
        .summary()
        .contains("2 of 3 failed on the same retriggered task"));
}

#[tokio::test]
async fn build_failure_on_second_push_short_circuits() {
    let mut ci = ScriptedCi::default();
    ci.pushes.insert(
        "initial".into(),
        (vec![run("build-linux64/opt", "B1", 0, CiJobResult::Success)], PushHealth::default()),
    );
    ci.pushes.insert(
        "more".into(),
        (vec![run("build-macosx64/opt", "B2", 0, CiJobResult::Busted)], PushHealth::default()),
    );

    let (jobs, _) = combined(&ci, &["initial", "more"]).await;
    let verdict = CiGate::evaluate(&jobs);
    assert!(verdict.is_terminal_failure());
    assert_eq!(
        verdict,
        GateVerdict::BuildFailed {
            failed_builds: vec!["build-macosx64/opt".into()]
        }
    );
}

#[tokio::test]
async fn filter_selector_shapes() {
    let ci = ScriptedCi::default();
    let only = ci
        .submit_to_ci("dav1d", &PlatformFilter::Only("linux64".into()))
        .await
        .unwrap();
    let rest = ci
        .submit_to_ci("dav1d", &PlatformFilter::AllExcept("linux64".into()))
        .await
        .unwrap();
    assert_eq!(only, "revlinux64");
    assert_eq!(rest, "rev-linux64");
}

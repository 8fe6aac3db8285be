use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::core::error::PipelineError;
use crate::core::job::{
    JobRecord, JobStore, JobSubscription, LogLevel, ORCHESTRATOR_TAG, Phase, StageKind,
};
use crate::core::orchestrator::{Pipeline, PipelineSettings};
use crate::core::testing::{Behavior, SITE, fake_pipeline, fake_stages, job_with};

async fn run_to_end(pipeline: &Pipeline) -> (Phase, JobRecord) {
    let record = job_with(pipeline.store(), SITE).await;
    let phase = pipeline
        .run(&record.job_id, CancellationToken::new())
        .await
        .unwrap();
    (phase, pipeline.store().get(&record.job_id).await.unwrap())
}

/// Block until the job is running `stage`.
async fn wait_for_stage(store: &JobStore, job_id: &str, stage: StageKind) {
    let mut sub = store.subscribe(job_id).await.unwrap();
    if sub.snapshot.current_stage == Some(stage) {
        return;
    }
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(record) = sub.recv().await {
            if record.current_stage == Some(stage) {
                return;
            }
        }
        panic!("job ended before reaching {}", stage);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn happy_path_completes_every_stage() {
    let pipeline = fake_pipeline(&[], PipelineSettings::default());
    let (phase, record) = run_to_end(&pipeline).await;

    assert_eq!(phase, Phase::Completed);
    assert_eq!(record.phase, Phase::Completed);
    assert_eq!(record.progress, 100);
    assert_eq!(record.current_stage, None);
    assert_eq!(record.outputs.populated(), StageKind::ORDER.to_vec());
    assert!(record.errors.is_empty());

    for kind in StageKind::ORDER {
        let started = format!("{} stage started", kind);
        let completed = format!("{} stage completed", kind);
        assert!(record.logs.iter().any(|l| l.message == started), "{}", started);
        assert!(
            record.logs.iter().any(|l| l.message.starts_with(&completed)),
            "{}",
            completed
        );
    }
    let last = record.logs.last().unwrap();
    assert_eq!(last.stage, ORCHESTRATOR_TAG);
    assert_eq!(last.message, "job completed");
}

#[tokio::test]
async fn progress_never_decreases() {
    let pipeline = fake_pipeline(&[], PipelineSettings::default());
    let record = job_with(pipeline.store(), SITE).await;
    let mut sub = pipeline.store().subscribe(&record.job_id).await.unwrap();

    pipeline
        .run(&record.job_id, CancellationToken::new())
        .await
        .unwrap();

    let mut seen = vec![sub.snapshot.progress];
    while let Some(update) = sub.recv().await {
        seen.push(update.progress);
    }
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{:?}", seen);
    assert_eq!(seen.last(), Some(&100));
    for kind in StageKind::ORDER {
        assert!(seen.contains(&kind.checkpoint()), "missing {} checkpoint", kind);
    }
}

/// Phases a subscriber saw, with consecutive repeats collapsed.
async fn drain_phases(mut sub: JobSubscription) -> Vec<Phase> {
    let mut phases = vec![sub.snapshot.phase];
    while let Some(update) = sub.recv().await {
        if phases.last() != Some(&update.phase) {
            phases.push(update.phase);
        }
    }
    phases
}

/// The non-terminal phases must be a prefix of the success order, optionally
/// followed by one terminal phase. Completion requires the whole order.
fn assert_forward_only(phases: &[Phase]) {
    const ORDER: [Phase; 5] = [
        Phase::Research,
        Phase::DataModeling,
        Phase::Infrastructure,
        Phase::AgentCreation,
        Phase::DemoContent,
    ];
    let (running, terminal) = match phases.split_last() {
        Some((last, rest)) if last.is_terminal() => (rest, Some(*last)),
        _ => (phases, None),
    };
    assert!(ORDER.starts_with(running), "out of order: {:?}", phases);
    if terminal == Some(Phase::Completed) {
        assert_eq!(running, &ORDER[..], "{:?}", phases);
    }
}

#[tokio::test]
async fn phases_only_move_forward() {
    for (overrides, expected) in [
        (vec![], Phase::Completed),
        (
            vec![(StageKind::Infrastructure, Behavior::Fail("quota exceeded"))],
            Phase::Failed,
        ),
    ] {
        let pipeline = fake_pipeline(&overrides, PipelineSettings::default());
        let record = job_with(pipeline.store(), SITE).await;
        let sub = pipeline.store().subscribe(&record.job_id).await.unwrap();
        pipeline
            .run(&record.job_id, CancellationToken::new())
            .await
            .unwrap();

        let phases = drain_phases(sub).await;
        assert_eq!(phases.last(), Some(&expected), "{:?}", phases);
        assert_forward_only(&phases);
    }

    let pipeline = Arc::new(fake_pipeline(
        &[(StageKind::AgentCreation, Behavior::Hang)],
        PipelineSettings::default(),
    ));
    let record = job_with(pipeline.store(), SITE).await;
    let sub = pipeline.store().subscribe(&record.job_id).await.unwrap();
    let token = CancellationToken::new();
    let run = {
        let pipeline = pipeline.clone();
        let job_id = record.job_id.clone();
        let token = token.clone();
        tokio::spawn(async move { pipeline.run(&job_id, token).await })
    };
    wait_for_stage(pipeline.store(), &record.job_id, StageKind::AgentCreation).await;
    pipeline
        .store()
        .mutate(&record.job_id, |r| {
            r.phase = Phase::Cancelled;
            Ok(())
        })
        .await
        .unwrap();
    token.cancel();
    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    let phases = drain_phases(sub).await;
    assert_eq!(
        phases,
        vec![
            Phase::Research,
            Phase::DataModeling,
            Phase::Infrastructure,
            Phase::AgentCreation,
            Phase::Cancelled
        ]
    );
    assert_forward_only(&phases);
}

#[tokio::test]
async fn infrastructure_failure_stops_the_pipeline() {
    let pipeline = fake_pipeline(
        &[(StageKind::Infrastructure, Behavior::Fail("quota exceeded"))],
        PipelineSettings::default(),
    );
    let (phase, record) = run_to_end(&pipeline).await;

    assert_eq!(phase, Phase::Failed);
    assert_eq!(record.phase, Phase::Failed);
    assert_eq!(record.current_stage, Some(StageKind::Infrastructure));
    assert_eq!(record.progress, StageKind::SyntheticData.checkpoint());
    assert_eq!(record.errors.len(), 1);
    assert_eq!(record.errors[0].stage, "infrastructure");
    assert!(record.errors[0].message.contains("quota exceeded"));
    assert_eq!(
        record.outputs.populated(),
        vec![
            StageKind::Research,
            StageKind::DataModeling,
            StageKind::SyntheticData
        ]
    );
    let failure = record
        .logs
        .iter()
        .find(|l| l.level == LogLevel::Error && l.stage == "infrastructure")
        .expect("failure log");
    assert_eq!(failure.message, "infrastructure stage failed: quota exceeded");
    // Nothing was provisioned, so there is nothing to warn about.
    assert!(!record.logs.iter().any(|l| l.message.contains("left in place")));
}

#[tokio::test]
async fn failure_after_provisioning_warns_about_orphans() {
    let pipeline = fake_pipeline(
        &[(StageKind::AgentCreation, Behavior::Fail("permission denied"))],
        PipelineSettings::default(),
    );
    let (phase, record) = run_to_end(&pipeline).await;

    assert_eq!(phase, Phase::Failed);
    assert!(record.outputs.resources.is_some());
    assert!(record.outputs.agent.is_none());
    let warning = record
        .logs
        .iter()
        .find(|l| l.level == LogLevel::Warning && l.stage == ORCHESTRATOR_TAG)
        .expect("orphan warning");
    let dataset = record.outputs.resources.as_ref().unwrap().resource_id();
    assert!(warning.message.contains(&dataset), "{}", warning.message);
}

#[tokio::test]
async fn stage_timeout_fails_the_job() {
    let pipeline = fake_pipeline(
        &[(StageKind::DataModeling, Behavior::Sleep(Duration::from_secs(30)))],
        PipelineSettings {
            stage_timeout: Some(Duration::from_millis(50)),
        },
    );
    let (phase, record) = run_to_end(&pipeline).await;

    assert_eq!(phase, Phase::Failed);
    assert_eq!(record.errors[0].stage, "data_modeling");
    assert!(record.errors[0].message.contains("timed out"));
    assert!(record.outputs.schema.is_none());
}

#[tokio::test]
async fn panicking_stage_fails_the_job() {
    let pipeline = fake_pipeline(
        &[(StageKind::Research, Behavior::Panic)],
        PipelineSettings::default(),
    );
    let (phase, record) = run_to_end(&pipeline).await;
    assert_eq!(phase, Phase::Failed);
    assert!(record.errors[0].message.contains("stage task aborted"));
    assert!(record.outputs.populated().is_empty());
}

#[tokio::test]
async fn mismatched_output_fails_the_stage() {
    let pipeline = fake_pipeline(
        &[(StageKind::SyntheticData, Behavior::WrongKind)],
        PipelineSettings::default(),
    );
    let (phase, record) = run_to_end(&pipeline).await;
    assert_eq!(phase, Phase::Failed);
    assert_eq!(record.errors[0].stage, "synthetic_data");
    assert!(record.errors[0].message.contains("stage returned research output"));
    assert!(record.outputs.data_manifest.is_none());
}

#[tokio::test]
async fn cancellation_abandons_the_running_stage() {
    let pipeline = Arc::new(fake_pipeline(
        &[(StageKind::DataModeling, Behavior::Hang)],
        PipelineSettings::default(),
    ));
    let record = job_with(pipeline.store(), SITE).await;
    let token = CancellationToken::new();

    let run = {
        let pipeline = pipeline.clone();
        let job_id = record.job_id.clone();
        let token = token.clone();
        tokio::spawn(async move { pipeline.run(&job_id, token).await })
    };
    wait_for_stage(pipeline.store(), &record.job_id, StageKind::DataModeling).await;

    pipeline
        .store()
        .mutate(&record.job_id, |r| {
            r.phase = Phase::Cancelled;
            Ok(())
        })
        .await
        .unwrap();
    token.cancel();

    let phase = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(phase, Phase::Cancelled);

    let record = pipeline.store().get(&record.job_id).await.unwrap();
    assert_eq!(record.phase, Phase::Cancelled);
    assert!(record.outputs.business_analysis.is_some());
    assert!(record.outputs.schema.is_none());
    assert!(record.errors.is_empty());
}

#[tokio::test]
async fn run_stops_before_next_stage_once_cancelled() {
    let pipeline = fake_pipeline(&[], PipelineSettings::default());
    let record = job_with(pipeline.store(), SITE).await;
    let token = CancellationToken::new();
    token.cancel();

    let phase = pipeline.run(&record.job_id, token).await.unwrap();
    assert_eq!(phase, Phase::Research);
    let record = pipeline.store().get(&record.job_id).await.unwrap();
    assert!(record.logs.is_empty());
}

#[tokio::test]
async fn stages_must_be_registered_in_order() {
    let mut stages = fake_stages(&[]);
    stages.swap(0, 1);
    let err = Pipeline::new(JobStore::new(), stages, PipelineSettings::default())
        .err()
        .unwrap();
    assert!(matches!(err, PipelineError::Validation(_)));

    let mut stages = fake_stages(&[]);
    stages.pop();
    assert!(Pipeline::new(JobStore::new(), stages, PipelineSettings::default()).is_err());
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let pipeline = fake_pipeline(&[], PipelineSettings::default());
    let err = pipeline
        .run("missing", CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NotFound(_)));
}

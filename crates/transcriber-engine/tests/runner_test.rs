mod common;

use std::time::Duration;

use chrono::Utc;
use common::{Pipeline, ScriptedJob};
use tokio_util::sync::CancellationToken;
use transcriber_engine::{ExecutionStatus, WorkflowRunner};
use transcriber_trigger::ArtifactArrived;

#[tokio::test(start_paused = true)]
async fn test_redelivery_during_polling_keeps_runner_responsive() {
  let pipeline = Pipeline::new(ScriptedJob::statuses(&["IN_PROGRESS"]));
  let engine = pipeline.engine(|spec| spec);
  let runner = WorkflowRunner::new(engine.clone());
  let sender = runner.sender();

  let cancel = CancellationToken::new();
  let handle = tokio::spawn(runner.start(cancel.clone()));

  let lecture = ArtifactArrived::new("uploads", "lecture.mp3", Utc::now());
  sender.send(lecture.clone()).await.unwrap();
  tokio::time::sleep(Duration::from_secs(25)).await;

  // Re-delivered while the first execution is polling, followed by a new upload
  sender.send(lecture.clone()).await.unwrap();
  sender
    .send(ArtifactArrived::new("uploads", "seminar.mp3", Utc::now()))
    .await
    .unwrap();
  tokio::time::sleep(Duration::from_secs(1)).await;

  let executions = engine.list().await.unwrap();
  assert_eq!(executions.len(), 2);
  assert!(executions.iter().all(|e| e.status == ExecutionStatus::Running));
  assert_eq!(pipeline.job.submits(), 2);

  let first = engine.get(&lecture.trigger_id()).await.unwrap();
  assert_eq!(first.attempts("transcribe"), 2);

  cancel.cancel();
  let stopped = tokio::time::timeout(Duration::from_secs(60), handle)
    .await
    .expect("runner did not stop after cancellation");
  assert!(stopped.unwrap().is_ok());
}

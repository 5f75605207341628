//! The identify workflow.
//!
//! Registering and finding a person takes seven dependent Face API calls:
//!
//! 1. create the person group (an existing group is reused)
//! 2. create the person
//! 3. upload the person's face
//! 4. queue training
//! 5. poll training status until it succeeds or fails
//! 6. detect faces in the target photo
//! 7. identify the detected faces against the group
//!
//! Each step only runs once the previous one succeeded, with a single
//! request in flight at a time. Progress is published on a
//! [`tokio::sync::watch`] channel so a front end can follow along.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;

use crate::matching::find_person;
use crate::photo::{Photo, PhotoError};
use crate::service::{FaceService, ServiceError};
use crate::types::{DetectedFace, FaceMatch, IdentifyResult, Person, TrainingState};

pub const DEFAULT_PERSON_GROUP_ID: &str = "sample-person-group-using-graph";
pub const DEFAULT_GROUP_NAME: &str = "SampleGroup";
pub const DEFAULT_GROUP_USER_DATA: &str = "This is a sample group";

/// Maximum number of face ids accepted by a single identify call.
const IDENTIFY_BATCH_LIMIT: usize = 10;

/// One stage of the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    CreateGroup,
    CreatePerson,
    UploadFace,
    Train,
    WaitForTraining,
    DetectFaces,
    Identify,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Step::CreateGroup => "create person group",
            Step::CreatePerson => "create person",
            Step::UploadFace => "upload face",
            Step::Train => "train person group",
            Step::WaitForTraining => "wait for training",
            Step::DetectFaces => "detect faces",
            Step::Identify => "identify",
        };
        f.write_str(s)
    }
}

/// Observable workflow progress.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowState {
    Idle,
    /// `attempt` counts training status checks; it is 1 for every other step.
    Running { step: Step, attempt: u32 },
    Finished { matches: Vec<FaceMatch> },
    Failed { step: Step, message: String },
}

impl WorkflowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::Finished { .. } | WorkflowState::Failed { .. })
    }
}

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("{step} failed: {source}")]
    Step {
        step: Step,
        #[source]
        source: ServiceError,
    },
    #[error("{step}: could not encode photo: {source}")]
    Photo {
        step: Step,
        #[source]
        source: PhotoError,
    },
    #[error("training failed: {}", failure_reason(.message))]
    TrainingFailed { message: Option<String> },
    #[error("training still pending after {attempts} status checks")]
    TrainingTimedOut { attempts: u32 },
}

fn failure_reason(message: &Option<String>) -> &str {
    message.as_deref().unwrap_or("no reason given")
}

impl WorkflowError {
    /// The step that was running when the workflow stopped.
    pub fn step(&self) -> Step {
        match self {
            WorkflowError::Step { step, .. } | WorkflowError::Photo { step, .. } => *step,
            WorkflowError::TrainingFailed { .. } | WorkflowError::TrainingTimedOut { .. } => {
                Step::WaitForTraining
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub person_group_id: String,
    pub group_name: String,
    pub group_user_data: Option<String>,
    /// Delay between training status checks.
    pub poll_interval: Duration,
    /// Upper bound on training status checks.
    pub max_polls: u32,
    pub max_candidates: u32,
    pub confidence_threshold: f64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            person_group_id: DEFAULT_PERSON_GROUP_ID.to_string(),
            group_name: DEFAULT_GROUP_NAME.to_string(),
            group_user_data: Some(DEFAULT_GROUP_USER_DATA.to_string()),
            poll_interval: Duration::from_secs(1),
            max_polls: 120,
            max_candidates: 1,
            confidence_threshold: 0.7,
        }
    }
}

/// Drives the seven-step identify sequence against a [`FaceService`].
pub struct IdentifyWorkflow<F> {
    service: F,
    config: WorkflowConfig,
    state: watch::Sender<WorkflowState>,
}

impl<F: FaceService> IdentifyWorkflow<F> {
    pub fn new(service: F, config: WorkflowConfig) -> Self {
        let (state, _) = watch::channel(WorkflowState::Idle);
        Self {
            service,
            config,
            state,
        }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Receive progress updates. The last value is always the current state.
    pub fn subscribe(&self) -> watch::Receiver<WorkflowState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> WorkflowState {
        self.state.borrow().clone()
    }

    /// Find `person` in `photo`, returning every matching face best first.
    ///
    /// An empty result means the photo was processed but the person was not
    /// identified in it.
    pub async fn run(&self, person: &Person, photo: &Photo) -> Result<Vec<FaceMatch>, WorkflowError> {
        let outcome = self.execute(person, photo).await;

        match &outcome {
            Ok(matches) => {
                tracing::info!(matches = matches.len(), "identify workflow finished");
                self.state.send_replace(WorkflowState::Finished {
                    matches: matches.clone(),
                });
            }
            Err(e) => {
                tracing::error!(step = %e.step(), error = %e, "identify workflow failed");
                self.state.send_replace(WorkflowState::Failed {
                    step: e.step(),
                    message: e.to_string(),
                });
            }
        }

        outcome
    }

    async fn execute(&self, person: &Person, photo: &Photo) -> Result<Vec<FaceMatch>, WorkflowError> {
        let group_id = self.config.person_group_id.as_str();

        self.enter(Step::CreateGroup, 1);
        self.service
            .create_person_group(
                group_id,
                &self.config.group_name,
                self.config.group_user_data.as_deref(),
            )
            .await
            .map_err(step_error(Step::CreateGroup))?;
        tracing::info!(group_id, "person group ready");

        self.enter(Step::CreatePerson, 1);
        let person_id = self
            .service
            .create_person(group_id, &person.name, person.upn.as_deref())
            .await
            .map_err(step_error(Step::CreatePerson))?
            .person_id;
        tracing::info!(group_id, person_id = %person_id, name = %person.name, "created person");

        self.enter(Step::UploadFace, 1);
        let png = encode(&person.photo, Step::UploadFace)?;
        let persisted = self
            .service
            .add_person_face(group_id, &person_id, png)
            .await
            .map_err(step_error(Step::UploadFace))?;
        tracing::info!(
            person_id = %person_id,
            persisted_face_id = %persisted.persisted_face_id,
            "face uploaded"
        );

        self.enter(Step::Train, 1);
        self.service
            .train_person_group(group_id)
            .await
            .map_err(step_error(Step::Train))?;
        tracing::info!(group_id, "training queued");

        self.wait_for_training(group_id).await?;

        self.enter(Step::DetectFaces, 1);
        let png = encode(photo, Step::DetectFaces)?;
        let faces = self
            .service
            .detect_faces(png)
            .await
            .map_err(step_error(Step::DetectFaces))?;
        tracing::info!(faces = faces.len(), "detected faces");

        if faces.is_empty() {
            return Ok(Vec::new());
        }

        self.enter(Step::Identify, 1);
        let results = self.identify_all(&faces, group_id).await?;
        Ok(find_person(&results, &faces, &person_id))
    }

    async fn wait_for_training(&self, group_id: &str) -> Result<(), WorkflowError> {
        let max_polls = self.config.max_polls.max(1);

        for attempt in 1..=max_polls {
            self.enter(Step::WaitForTraining, attempt);
            let status = self
                .service
                .training_status(group_id)
                .await
                .map_err(step_error(Step::WaitForTraining))?;

            if status.status.is_pending() {
                tracing::debug!(attempt, status = %status.status, "training in progress");
                if attempt < max_polls {
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                continue;
            }

            return match status.status {
                TrainingState::Succeeded => {
                    tracing::info!(attempt, "training succeeded");
                    Ok(())
                }
                _ => Err(WorkflowError::TrainingFailed {
                    message: status.message,
                }),
            };
        }

        Err(WorkflowError::TrainingTimedOut {
            attempts: max_polls,
        })
    }

    async fn identify_all(
        &self,
        faces: &[DetectedFace],
        group_id: &str,
    ) -> Result<Vec<IdentifyResult>, WorkflowError> {
        let face_ids: Vec<String> = faces.iter().map(|f| f.face_id.clone()).collect();
        let mut results = Vec::with_capacity(face_ids.len());

        for batch in face_ids.chunks(IDENTIFY_BATCH_LIMIT) {
            let batch_results = self
                .service
                .identify(
                    batch,
                    group_id,
                    self.config.max_candidates,
                    self.config.confidence_threshold,
                )
                .await
                .map_err(step_error(Step::Identify))?;
            results.extend(batch_results);
        }

        Ok(results)
    }

    fn enter(&self, step: Step, attempt: u32) {
        if attempt == 1 {
            tracing::info!(%step, "entering step");
        }
        self.state.send_replace(WorkflowState::Running { step, attempt });
    }
}

fn step_error(step: Step) -> impl FnOnce(ServiceError) -> WorkflowError {
    move |source| WorkflowError::Step { step, source }
}

fn encode(photo: &Photo, step: Step) -> Result<Vec<u8>, WorkflowError> {
    photo
        .to_png()
        .map_err(|source| WorkflowError::Photo { step, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        Candidate, CreatedPerson, FaceRectangle, PersistedFace, TrainingStatus,
    };
    use async_trait::async_trait;
    use image::{DynamicImage, RgbImage};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const PERSON_ID: &str = "25985303-c537-4467-b41d-bdb45cd95ca1";

    /// Scripted in-memory Face API.
    #[derive(Default)]
    struct FakeFaceService {
        calls: Mutex<Vec<String>>,
        fail_at: Option<Step>,
        training: Mutex<VecDeque<TrainingState>>,
        faces: Vec<DetectedFace>,
        identify_batches: Mutex<Vec<usize>>,
        groups: Mutex<Vec<String>>,
        group_args: Mutex<Option<(String, Option<String>)>>,
        person_args: Mutex<Option<(String, Option<String>)>>,
        observer: Mutex<Option<watch::Receiver<WorkflowState>>>,
        observed: Mutex<Vec<WorkflowState>>,
    }

    impl FakeFaceService {
        fn new() -> Self {
            Self {
                training: Mutex::new(VecDeque::from([TrainingState::Succeeded])),
                faces: vec![face("f1", 0), face("f2", 40)],
                ..Default::default()
            }
        }

        fn with_training(self, states: &[TrainingState]) -> Self {
            *self.training.lock().unwrap() = states.iter().copied().collect();
            self
        }

        fn with_faces(mut self, faces: Vec<DetectedFace>) -> Self {
            self.faces = faces;
            self
        }

        fn failing_at(mut self, step: Step) -> Self {
            self.fail_at = Some(step);
            self
        }

        fn record(&self, step: Step, call: &str) -> Result<(), ServiceError> {
            self.calls.lock().unwrap().push(call.to_string());
            if let Some(rx) = self.observer.lock().unwrap().as_ref() {
                self.observed.lock().unwrap().push(rx.borrow().clone());
            }
            if self.fail_at == Some(step) {
                return Err(ServiceError::Service {
                    status: 400,
                    code: Some("BadArgument".into()),
                    message: format!("{call} rejected"),
                });
            }
            Ok(())
        }

        fn record_group(&self, group_id: &str) {
            self.groups.lock().unwrap().push(group_id.to_string());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FaceService for FakeFaceService {
        async fn create_person_group(
            &self,
            group_id: &str,
            name: &str,
            user_data: Option<&str>,
        ) -> Result<(), ServiceError> {
            self.record_group(group_id);
            *self.group_args.lock().unwrap() = Some((name.into(), user_data.map(Into::into)));
            self.record(Step::CreateGroup, "create_person_group")
        }

        async fn create_person(
            &self,
            group_id: &str,
            name: &str,
            user_data: Option<&str>,
        ) -> Result<CreatedPerson, ServiceError> {
            self.record_group(group_id);
            *self.person_args.lock().unwrap() = Some((name.into(), user_data.map(Into::into)));
            self.record(Step::CreatePerson, "create_person")?;
            Ok(CreatedPerson { person_id: PERSON_ID.into() })
        }

        async fn add_person_face(
            &self,
            group_id: &str,
            person_id: &str,
            png: Vec<u8>,
        ) -> Result<PersistedFace, ServiceError> {
            assert_eq!(&png[1..4], b"PNG");
            assert_eq!(person_id, PERSON_ID);
            self.record_group(group_id);
            self.record(Step::UploadFace, "add_person_face")?;
            Ok(PersistedFace { persisted_face_id: "pf1".into() })
        }

        async fn train_person_group(&self, group_id: &str) -> Result<(), ServiceError> {
            self.record_group(group_id);
            self.record(Step::Train, "train_person_group")
        }

        async fn training_status(&self, group_id: &str) -> Result<TrainingStatus, ServiceError> {
            self.record_group(group_id);
            self.record(Step::WaitForTraining, "training_status")?;
            let mut states = self.training.lock().unwrap();
            let status = if states.len() > 1 {
                states.pop_front().unwrap()
            } else {
                states.front().copied().unwrap_or(TrainingState::Running)
            };
            Ok(TrainingStatus {
                status,
                created_date_time: None,
                last_action_date_time: None,
                message: (status == TrainingState::Failed).then(|| "no faces".to_string()),
            })
        }

        async fn detect_faces(&self, _png: Vec<u8>) -> Result<Vec<DetectedFace>, ServiceError> {
            self.record(Step::DetectFaces, "detect_faces")?;
            Ok(self.faces.clone())
        }

        async fn identify(
            &self,
            face_ids: &[String],
            group_id: &str,
            max_candidates: u32,
            confidence_threshold: f64,
        ) -> Result<Vec<IdentifyResult>, ServiceError> {
            self.record_group(group_id);
            assert_eq!(max_candidates, 1);
            assert!((confidence_threshold - 0.7).abs() < 1e-9);
            self.record(Step::Identify, "identify")?;
            self.identify_batches.lock().unwrap().push(face_ids.len());
            // The second face of every batch is the registered person.
            Ok(face_ids
                .iter()
                .enumerate()
                .map(|(i, id)| IdentifyResult {
                    face_id: id.clone(),
                    candidates: if i == 1 {
                        vec![Candidate { person_id: PERSON_ID.into(), confidence: 0.88 }]
                    } else {
                        vec![]
                    },
                })
                .collect())
        }
    }

    fn face(id: &str, left: u32) -> DetectedFace {
        DetectedFace {
            face_id: id.into(),
            face_rectangle: FaceRectangle { top: 5, left, width: 30, height: 32 },
        }
    }

    fn photo() -> Photo {
        Photo::from_image(DynamicImage::ImageRgb8(RgbImage::new(8, 8)))
    }

    fn person() -> Person {
        Person {
            name: "Ada Lovelace".into(),
            upn: Some("ada@contoso.com".into()),
            photo: photo(),
        }
    }

    fn workflow(service: FakeFaceService) -> IdentifyWorkflow<FakeFaceService> {
        workflow_with(service, WorkflowConfig::default())
    }

    fn workflow_with(
        service: FakeFaceService,
        config: WorkflowConfig,
    ) -> IdentifyWorkflow<FakeFaceService> {
        IdentifyWorkflow::new(
            service,
            WorkflowConfig {
                poll_interval: Duration::from_millis(1),
                max_polls: 5,
                ..config
            },
        )
    }

    fn running(step: Step, attempt: u32) -> WorkflowState {
        WorkflowState::Running { step, attempt }
    }

    #[tokio::test]
    async fn test_full_sequence_finds_person() {
        let wf = workflow(FakeFaceService::new());
        let matches = wf.run(&person(), &photo()).await.unwrap();

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].face.face_id, "f2");
        assert!((matches[0].confidence - 0.88).abs() < 1e-9);
        assert_eq!(
            wf.service.calls(),
            vec![
                "create_person_group",
                "create_person",
                "add_person_face",
                "train_person_group",
                "training_status",
                "detect_faces",
                "identify",
            ]
        );
        assert_eq!(wf.state(), WorkflowState::Finished { matches });

        assert_eq!(
            *wf.service.group_args.lock().unwrap(),
            Some(("SampleGroup".to_string(), Some("This is a sample group".to_string())))
        );
        assert_eq!(
            *wf.service.person_args.lock().unwrap(),
            Some(("Ada Lovelace".to_string(), Some("ada@contoso.com".to_string())))
        );
        assert_eq!(
            *wf.service.groups.lock().unwrap(),
            vec![DEFAULT_PERSON_GROUP_ID; 6]
        );
    }

    #[tokio::test]
    async fn test_person_from_file_uses_configured_group() {
        let config = WorkflowConfig {
            person_group_id: "team-photos".into(),
            group_name: "Team".into(),
            group_user_data: None,
            ..Default::default()
        };
        let wf = workflow_with(FakeFaceService::new(), config);
        let person = Person { upn: None, ..person() };
        wf.run(&person, &photo()).await.unwrap();

        assert_eq!(
            *wf.service.group_args.lock().unwrap(),
            Some(("Team".to_string(), None))
        );
        assert_eq!(
            *wf.service.person_args.lock().unwrap(),
            Some(("Ada Lovelace".to_string(), None))
        );
        assert_eq!(*wf.service.groups.lock().unwrap(), vec!["team-photos"; 6]);
    }

    #[tokio::test]
    async fn test_polls_until_training_succeeds() {
        let service = FakeFaceService::new().with_training(&[
            TrainingState::NotStarted,
            TrainingState::Running,
            TrainingState::Running,
            TrainingState::Succeeded,
        ]);
        let wf = workflow(service);
        wf.run(&person(), &photo()).await.unwrap();

        let polls = wf
            .service
            .calls()
            .iter()
            .filter(|c| *c == "training_status")
            .count();
        assert_eq!(polls, 4);
    }

    #[tokio::test]
    async fn test_training_failure_stops_workflow() {
        let service = FakeFaceService::new()
            .with_training(&[TrainingState::Running, TrainingState::Failed]);
        let wf = workflow(service);
        let err = wf.run(&person(), &photo()).await.unwrap_err();

        assert!(matches!(
            err,
            WorkflowError::TrainingFailed { message: Some(ref m) } if m == "no faces"
        ));
        assert!(!wf.service.calls().contains(&"detect_faces".to_string()));
        assert!(matches!(
            wf.state(),
            WorkflowState::Failed { step: Step::WaitForTraining, .. }
        ));
    }

    #[tokio::test]
    async fn test_training_poll_is_bounded() {
        let service = FakeFaceService::new().with_training(&[TrainingState::Running]);
        let wf = workflow(service);
        let err = wf.run(&person(), &photo()).await.unwrap_err();

        assert!(matches!(err, WorkflowError::TrainingTimedOut { attempts: 5 }));
        let polls = wf
            .service
            .calls()
            .iter()
            .filter(|c| *c == "training_status")
            .count();
        assert_eq!(polls, 5);
    }

    #[tokio::test]
    async fn test_step_failure_short_circuits() {
        let wf = workflow(FakeFaceService::new().failing_at(Step::UploadFace));
        let err = wf.run(&person(), &photo()).await.unwrap_err();

        assert_eq!(err.step(), Step::UploadFace);
        assert!(matches!(
            err,
            WorkflowError::Step { source: ServiceError::Service { status: 400, .. }, .. }
        ));
        assert_eq!(
            wf.service.calls(),
            vec!["create_person_group", "create_person", "add_person_face"]
        );
        match wf.state() {
            WorkflowState::Failed { step, message } => {
                assert_eq!(step, Step::UploadFace);
                assert!(message.contains("upload face failed"));
            }
            other => panic!("unexpected state: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_create_group_failure() {
        let wf = workflow(FakeFaceService::new().failing_at(Step::CreateGroup));
        let err = wf.run(&person(), &photo()).await.unwrap_err();
        assert_eq!(err.step(), Step::CreateGroup);
        assert_eq!(wf.service.calls(), vec!["create_person_group"]);
    }

    #[tokio::test]
    async fn test_no_faces_skips_identify() {
        let wf = workflow(FakeFaceService::new().with_faces(vec![]));
        let matches = wf.run(&person(), &photo()).await.unwrap();

        assert!(matches.is_empty());
        assert!(!wf.service.calls().contains(&"identify".to_string()));
        assert_eq!(wf.state(), WorkflowState::Finished { matches: vec![] });
    }

    #[tokio::test]
    async fn test_identify_in_batches() {
        let faces = (0..23).map(|i| face(&format!("f{i}"), i * 10)).collect();
        let wf = workflow(FakeFaceService::new().with_faces(faces));
        let matches = wf.run(&person(), &photo()).await.unwrap();

        assert_eq!(*wf.service.identify_batches.lock().unwrap(), vec![10, 10, 3]);
        // Second face of each batch: f1, f11, f21.
        let ids: Vec<_> = matches.iter().map(|m| m.face.face_id.as_str()).collect();
        assert_eq!(ids, vec!["f1", "f11", "f21"]);
    }

    #[tokio::test]
    async fn test_subscriber_sees_terminal_state() {
        let wf = workflow(FakeFaceService::new());
        let rx = wf.subscribe();
        assert_eq!(*rx.borrow(), WorkflowState::Idle);

        wf.run(&person(), &photo()).await.unwrap();
        assert!(rx.borrow().is_terminal());
    }

    #[tokio::test]
    async fn test_running_state_tracks_each_step() {
        let service = FakeFaceService::new().with_training(&[
            TrainingState::Running,
            TrainingState::Running,
            TrainingState::Succeeded,
        ]);
        let wf = workflow(service);
        *wf.service.observer.lock().unwrap() = Some(wf.subscribe());
        wf.run(&person(), &photo()).await.unwrap();

        assert_eq!(
            *wf.service.observed.lock().unwrap(),
            vec![
                running(Step::CreateGroup, 1),
                running(Step::CreatePerson, 1),
                running(Step::UploadFace, 1),
                running(Step::Train, 1),
                running(Step::WaitForTraining, 1),
                running(Step::WaitForTraining, 2),
                running(Step::WaitForTraining, 3),
                running(Step::DetectFaces, 1),
                running(Step::Identify, 1),
            ]
        );
    }
}

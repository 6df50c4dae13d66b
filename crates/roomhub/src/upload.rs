//! Three-stage photo publishing: acquire a destination, transfer the file,
//! register the asset against a room.
//!
//! Stages run strictly in order and each is its own mutation record. A
//! failure stops the run; nothing already done is rolled back, so an unused
//! destination or an unregistered file is left for external cleanup.
//!
//! Runs may overlap. The shared status follows the most recently started run;
//! transitions of older runs only land in their own [`PipelineRun`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::api::{
    ApiError, MediaFile, Photo, PhotoRegistration, RentalApi, TransferReceipt, UploadDestination,
};
use crate::mutation::{Invalidation, MutationBroadcaster, MutationId, MutationKind};
use crate::query::{KeyPattern, ResourceKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Acquire,
    Transfer,
    Register,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PipelineStage::Acquire => "acquire",
            PipelineStage::Transfer => "transfer",
            PipelineStage::Register => "register",
        };
        f.write_str(label)
    }
}

/// Combined status of a run; the UI binds to this instead of three records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineStatus {
    Idle,
    Acquiring,
    Transferring,
    Registering,
    Done,
    Aborted { stage: PipelineStage, error: ApiError },
}

impl PipelineStatus {
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            PipelineStatus::Acquiring | PipelineStatus::Transferring | PipelineStatus::Registering
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStatus::Done | PipelineStatus::Aborted { .. })
    }
}

/// User input captured when the run starts.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file: MediaFile,
    pub description: String,
    pub room_pk: String,
}

/// Stage outputs of one run, filled in as stages complete.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub status: PipelineStatus,
    pub destination: Option<UploadDestination>,
    pub receipt: Option<TransferReceipt>,
    pub photo: Option<Photo>,
    /// Mutation ids of the stages that were started, in order.
    pub mutations: Vec<MutationId>,
    seq: u64,
}

impl PipelineRun {
    fn new(seq: u64) -> Self {
        Self {
            seq,
            status: PipelineStatus::Idle,
            destination: None,
            receipt: None,
            photo: None,
            mutations: Vec::with_capacity(3),
        }
    }
}

pub struct UploadPipeline<A> {
    api: Arc<A>,
    mutations: MutationBroadcaster,
    status: watch::Sender<PipelineStatus>,
    latest_run: AtomicU64,
}

impl<A> fmt::Debug for UploadPipeline<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadPipeline")
            .field("status", &*self.status.borrow())
            .finish_non_exhaustive()
    }
}

impl<A: RentalApi> UploadPipeline<A> {
    pub fn new(api: Arc<A>, mutations: MutationBroadcaster) -> Self {
        let (status, _) = watch::channel(PipelineStatus::Idle);
        Self {
            api,
            mutations,
            status,
            latest_run: AtomicU64::new(0),
        }
    }

    /// Observe the combined status of the most recently started run.
    pub fn status(&self) -> watch::Receiver<PipelineStatus> {
        self.status.subscribe()
    }

    pub async fn run(&self, request: UploadRequest) -> PipelineRun {
        let UploadRequest {
            file,
            description,
            room_pk,
        } = request;
        let seq = self.latest_run.fetch_add(1, Ordering::SeqCst) + 1;
        let mut run = PipelineRun::new(seq);

        self.transition(&mut run, PipelineStatus::Acquiring);
        let api = Arc::clone(&self.api);
        let acquired = self
            .mutations
            .run(
                MutationKind::AcquireUpload,
                (),
                Invalidation::none(),
                move |()| async move { api.upload_destination().await },
            )
            .await;
        run.mutations.push(acquired.id);
        let destination = match acquired.into_result() {
            Ok(destination) => destination,
            Err(error) => return self.abort(run, PipelineStage::Acquire, error),
        };
        run.destination = Some(destination.clone());

        self.transition(&mut run, PipelineStatus::Transferring);
        let api = Arc::clone(&self.api);
        let transferred = self
            .mutations
            .run(
                MutationKind::TransferUpload,
                (destination, file),
                Invalidation::none(),
                move |(destination, file)| async move {
                    api.transfer_file(&destination, file).await
                },
            )
            .await;
        run.mutations.push(transferred.id);
        let receipt = match transferred.into_result() {
            Ok(receipt) => receipt,
            Err(error) => return self.abort(run, PipelineStage::Transfer, error),
        };
        let stored = receipt.primary_variant().map(str::to_string);
        run.receipt = Some(receipt);
        let Some(stored) = stored else {
            let error = ApiError::Server {
                status: 200,
                message: "transfer returned no stored variant".to_string(),
            };
            return self.abort(run, PipelineStage::Transfer, error);
        };

        self.transition(&mut run, PipelineStatus::Registering);
        let api = Arc::clone(&self.api);
        let registration = PhotoRegistration {
            room_pk: room_pk.clone(),
            description,
            file: stored,
        };
        let registered = self
            .mutations
            .run(
                MutationKind::RegisterPhoto,
                registration,
                Invalidation::of([KeyPattern::resource(ResourceKind::Rooms, room_pk)]),
                move |registration| async move { api.register_photo(registration).await },
            )
            .await;
        run.mutations.push(registered.id);
        match registered.into_result() {
            Ok(photo) => {
                run.photo = Some(photo);
                self.transition(&mut run, PipelineStatus::Done);
                run
            }
            Err(error) => self.abort(run, PipelineStage::Register, error),
        }
    }

    fn transition(&self, run: &mut PipelineRun, status: PipelineStatus) {
        info!(run = run.seq, status = ?status, "upload pipeline transition");
        run.status = status.clone();
        if self.latest_run.load(Ordering::SeqCst) == run.seq {
            self.status.send_replace(status);
        }
    }

    fn abort(&self, mut run: PipelineRun, stage: PipelineStage, error: ApiError) -> PipelineRun {
        warn!(%stage, %error, "upload pipeline aborted; completed stages are left in place");
        self.transition(&mut run, PipelineStatus::Aborted { stage, error });
        run
    }
}

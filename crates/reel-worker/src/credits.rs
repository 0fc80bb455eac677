//! Credit ledger collaborator.
//!
//! Credits are reserved when a job is submitted and charged only once the
//! sub-resource completes. Charge and release are idempotent per
//! [`CreditReservation::key`]: the worker may repeat either after a crash
//! between the ledger call and the scene's `charged` flag.

use std::sync::Mutex;

use async_trait::async_trait;
use tracing::info;

use reel_models::{BackendId, CapabilityTable, ProjectId, SceneId, SubResourceKind};

use crate::error::WorkerResult;

/// Hold on credits for one sub-resource of one scene version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditReservation {
    pub project_id: ProjectId,
    pub scene_id: SceneId,
    pub kind: SubResourceKind,
    pub backend: BackendId,
    pub cost: u32,
}

impl CreditReservation {
    /// Reservation priced from the static credit table.
    pub fn for_sub_resource(
        project_id: &ProjectId,
        scene_id: &SceneId,
        kind: SubResourceKind,
        backend: BackendId,
    ) -> Self {
        Self {
            project_id: project_id.clone(),
            scene_id: scene_id.clone(),
            kind,
            backend,
            cost: CapabilityTable::for_backend(backend).cost(kind),
        }
    }

    /// Stable key for the external ledger.
    pub fn key(&self) -> String {
        format!("{}:{}", self.scene_id, self.kind)
    }
}

#[async_trait]
pub trait CreditLedger: Send + Sync {
    async fn reserve(&self, reservation: &CreditReservation) -> WorkerResult<()>;

    /// Convert the reservation into a charge. Repeating a charge for the
    /// same key is a no-op.
    async fn charge(&self, reservation: &CreditReservation) -> WorkerResult<()>;

    /// Drop a reservation whose job failed. Repeating it is a no-op.
    async fn release(&self, reservation: &CreditReservation) -> WorkerResult<()>;
}

/// Ledger that only logs. Billing is handled outside this system.
#[derive(Debug, Default)]
pub struct LoggingLedger;

#[async_trait]
impl CreditLedger for LoggingLedger {
    async fn reserve(&self, reservation: &CreditReservation) -> WorkerResult<()> {
        info!(
            project_id = %reservation.project_id,
            key = %reservation.key(),
            cost = reservation.cost,
            "Credits reserved"
        );
        Ok(())
    }

    async fn charge(&self, reservation: &CreditReservation) -> WorkerResult<()> {
        info!(
            project_id = %reservation.project_id,
            key = %reservation.key(),
            cost = reservation.cost,
            "Credits charged"
        );
        Ok(())
    }

    async fn release(&self, reservation: &CreditReservation) -> WorkerResult<()> {
        info!(
            project_id = %reservation.project_id,
            key = %reservation.key(),
            "Credit reservation released"
        );
        Ok(())
    }
}

/// Ledger entry kinds recorded by [`MemoryLedger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOp {
    Reserve,
    Charge,
    Release,
}

/// Records ledger calls, dropping repeated charges and releases of the
/// same key. Used by tests and local runs.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    entries: Mutex<Vec<(LedgerOp, CreditReservation)>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, op: LedgerOp, reservation: &CreditReservation) {
        if let Ok(mut entries) = self.entries.lock() {
            let repeated = op != LedgerOp::Reserve
                && entries
                    .iter()
                    .any(|(o, r)| *o == op && r.key() == reservation.key());
            if repeated {
                return;
            }
            entries.push((op, reservation.clone()));
        }
    }

    pub fn entries(&self) -> Vec<(LedgerOp, CreditReservation)> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Charges recorded for one sub-resource.
    pub fn charges_for(&self, scene_id: &SceneId, kind: SubResourceKind) -> usize {
        self.entries()
            .iter()
            .filter(|(op, r)| *op == LedgerOp::Charge && &r.scene_id == scene_id && r.kind == kind)
            .count()
    }

    pub fn total_charged(&self) -> u32 {
        self.entries()
            .iter()
            .filter(|(op, _)| *op == LedgerOp::Charge)
            .map(|(_, r)| r.cost)
            .sum()
    }
}

#[async_trait]
impl CreditLedger for MemoryLedger {
    async fn reserve(&self, reservation: &CreditReservation) -> WorkerResult<()> {
        self.push(LedgerOp::Reserve, reservation);
        Ok(())
    }

    async fn charge(&self, reservation: &CreditReservation) -> WorkerResult<()> {
        self.push(LedgerOp::Charge, reservation);
        Ok(())
    }

    async fn release(&self, reservation: &CreditReservation) -> WorkerResult<()> {
        self.push(LedgerOp::Release, reservation);
        Ok(())
    }
}

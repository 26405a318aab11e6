//! Local procedures run when the monitor assigns a new goal.
//!
//! Each procedure is idempotent: running it twice, or after a crash in the
//! middle, leaves the database in the same place.

use thiserror::Error;

use crate::driver::{DatabaseDriver, DriverError, NodeAddress};
use crate::state::{is_legal_transition, NodeState};

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("refusing to move from {from} to {to}: not a legal transition")]
    Illegal { from: NodeState, to: NodeState },

    #[error("no primary to replicate from")]
    NoPrimary,

    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// What the monitor told us alongside the goal.
#[derive(Debug, Clone, Default)]
pub struct TransitionContext {
    /// Address of the write-authorised node, when it is not us.
    pub primary: Option<NodeAddress>,
    pub synchronous_standby_names: String,
}

pub async fn run_transition(
    driver: &dyn DatabaseDriver,
    from: NodeState,
    to: NodeState,
    context: &TransitionContext,
) -> Result<(), TransitionError> {
    if from == to {
        return Ok(());
    }
    if !is_legal_transition(from, to) {
        return Err(TransitionError::Illegal { from, to });
    }

    tracing::info!(%from, %to, "Running transition");
    apply(driver, to, context).await
}

/// Bring the database in line with `goal` whatever the local state says.
///
/// Used after the monitor refused a report. A database that accepts writes
/// is demoted first unless the goal authorises writes.
pub async fn realign(
    driver: &dyn DatabaseDriver,
    goal: NodeState,
    context: &TransitionContext,
) -> Result<(), TransitionError> {
    if !goal.is_writable() && !driver.is_in_recovery().await? {
        tracing::warn!(%goal, "Demoting a writable database the monitor does not authorise");
        driver.demote().await?;
    }
    apply(driver, goal, context).await
}

async fn apply(driver: &dyn DatabaseDriver, to: NodeState, context: &TransitionContext) -> Result<(), TransitionError> {
    match to {
        NodeState::Single => {
            driver.ensure_running().await?;
            promote_if_in_recovery(driver).await?;
            driver.apply_settings("").await?;
        }
        NodeState::CatchingUp | NodeState::JoinSecondary => {
            let primary = context.primary.as_ref().ok_or(TransitionError::NoPrimary)?;
            follow(driver, primary).await?;
        }
        NodeState::Secondary => {
            if let Some(primary) = &context.primary {
                follow(driver, primary).await?;
            }
        }
        NodeState::StopReplication => driver.stop_replication().await?,
        NodeState::WaitPrimary | NodeState::Primary | NodeState::JoinPrimary | NodeState::ApplySettings => {
            promote_if_in_recovery(driver).await?;
            driver.apply_settings(&context.synchronous_standby_names).await?;
        }
        NodeState::Draining | NodeState::DemoteTimeout | NodeState::Demoted | NodeState::PrepareMaintenance => {
            driver.demote().await?
        }
        NodeState::Init
        | NodeState::WaitStandby
        | NodeState::ReportLsn
        | NodeState::PreparePromotion
        | NodeState::WaitMaintenance
        | NodeState::Maintenance
        | NodeState::Dropped => {}
    }
    Ok(())
}

async fn promote_if_in_recovery(driver: &dyn DatabaseDriver) -> Result<(), DriverError> {
    if driver.is_in_recovery().await? {
        driver.promote().await?;
    }
    Ok(())
}

/// Stream from `primary` unless already doing so.
async fn follow(driver: &dyn DatabaseDriver, primary: &NodeAddress) -> Result<(), DriverError> {
    if driver.replication_source().await?.as_ref() == Some(primary) {
        return Ok(());
    }
    driver.start_replication_from(primary).await
}

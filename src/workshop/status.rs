//! Repair-status state machine.
//!
//! The overall status of a vehicle is a function of its sub-task statuses
//! and of the status it already has:
//!
//! ```text
//!   pending ──(any in_progress)──> repairing ──(all done)──> ready ──(pay)──> paid
//!      └──────────────────(all done)─────────────────────────┘
//! ```
//!
//! `paid` is terminal. The store applies [`derive_status`] on every sub-task
//! write, so no caller ever writes the overall status directly.

use crate::errors::GarageError;

use super::models::{RepairStatus, VehicleStatus};

/// Derive the overall vehicle status from its sub-task statuses.
pub fn derive_status(current: VehicleStatus, repairs: &[RepairStatus]) -> VehicleStatus {
    if current == VehicleStatus::Paid || repairs.is_empty() {
        return current;
    }

    let all_done = repairs.iter().all(|s| *s == RepairStatus::Done);
    let any_in_progress = repairs.iter().any(|s| *s == RepairStatus::InProgress);

    if all_done {
        VehicleStatus::Ready
    } else if any_in_progress && current == VehicleStatus::Pending {
        VehicleStatus::Repairing
    } else {
        current
    }
}

/// Validate a sub-task status change. Sub-tasks only move forward.
pub fn check_repair_transition(from: RepairStatus, to: RepairStatus) -> Result<(), GarageError> {
    if to.rank() < from.rank() {
        return Err(GarageError::InvalidRepairTransition { from, to });
    }
    Ok(())
}

/// Outcome of a payment request against the current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// `ready -> paid`; the caller must stamp `paid_at`.
    Charge,
    /// Already paid; nothing to write.
    AlreadyPaid,
}

pub fn payment_transition(
    vehicle_id: &str,
    current: VehicleStatus,
) -> Result<PaymentOutcome, GarageError> {
    match current {
        VehicleStatus::Ready => Ok(PaymentOutcome::Charge),
        VehicleStatus::Paid => Ok(PaymentOutcome::AlreadyPaid),
        status => Err(GarageError::NotReadyForPayment {
            vehicle_id: vehicle_id.to_string(),
            status,
        }),
    }
}

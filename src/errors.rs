//! Typed error hierarchy for the garage service.
//!
//! `GarageError` covers domain failures (missing records, refused state
//! transitions, ownership checks). Plumbing failures travel as
//! `anyhow::Error` and are wrapped in `GarageError::Other` or
//! `GarageError::Database` at the boundary.

use thiserror::Error;

use crate::workshop::models::{RepairStatus, VehicleStatus};

#[derive(Debug, Error)]
pub enum GarageError {
    #[error("User {id} not found")]
    UserNotFound { id: String },

    #[error("User {id} already exists")]
    UserExists { id: String },

    #[error("Vehicle {id} not found")]
    VehicleNotFound { id: String },

    #[error("Repair {position} not found on vehicle {vehicle_id}")]
    RepairNotFound { vehicle_id: String, position: i32 },

    #[error("Access denied to vehicle {vehicle_id}")]
    AccessDenied { vehicle_id: String },

    #[error("Missing caller identity")]
    Unauthenticated,

    #[error("Invalid repair transition from {from} to {to}")]
    InvalidRepairTransition { from: RepairStatus, to: RepairStatus },

    #[error("Vehicle {vehicle_id} is {status} and cannot be paid yet")]
    NotReadyForPayment {
        vehicle_id: String,
        status: VehicleStatus,
    },

    #[error("Vehicle {vehicle_id} is already paid")]
    AlreadyPaid { vehicle_id: String },

    #[error("Vehicle {vehicle_id} was modified concurrently (expected version {expected}, found {actual})")]
    VersionConflict {
        vehicle_id: String,
        expected: i64,
        actual: i64,
    },

    #[error("No push token registered for user {user_id}")]
    PushTokenMissing { user_id: String },

    #[error("Unknown repair type '{0}'")]
    UnknownRepairType(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Push delivery failed: {0}")]
    Push(#[source] anyhow::Error),

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GarageError {
    /// Recover a typed error that travelled through an `anyhow::Error`.
    ///
    /// Store closures return `anyhow::Result`; domain errors raised inside
    /// them are boxed and come back out here. Anything else is treated as
    /// a database failure.
    pub fn from_db(err: anyhow::Error) -> Self {
        match err.downcast::<GarageError>() {
            Ok(typed) => typed,
            Err(other) => GarageError::Database(other),
        }
    }
}

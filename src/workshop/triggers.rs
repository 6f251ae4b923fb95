//! Reactions to store changes.
//!
//! Handlers call these after a successful write. Failures are logged and
//! swallowed; a failed push never fails the request that caused it. Only
//! [`Notifier::send_manual`] surfaces errors, since the caller asked for it.

use std::sync::Arc;

use crate::errors::GarageError;

use super::db::DbHandle;
use super::models::{User, Vehicle, VehicleChange, VehicleStatus};
use super::push::{PushMessage, PushSender};

pub const REPAIR_COMPLETE_TITLE: &str = "Repair complete";
pub const WELCOME_TITLE: &str = "Welcome to the garage!";
const WELCOME_BODY: &str = "We are glad to have you. Describe your first breakdown to get started.";

pub fn repair_complete_body(model: &str) -> String {
    let model = if model.trim().is_empty() { "car" } else { model };
    format!("Your {model} is ready for pickup. Proceed to payment.")
}

#[derive(Clone)]
pub struct Notifier {
    db: DbHandle,
    push: Arc<dyn PushSender>,
    icon: Option<String>,
}

impl Notifier {
    pub fn new(db: DbHandle, push: Arc<dyn PushSender>, icon: Option<String>) -> Self {
        Self { db, push, icon }
    }

    /// Push the owner when a vehicle has just become ready.
    ///
    /// Returns the message id when a push went out.
    pub async fn on_vehicle_updated(&self, change: &VehicleChange) -> Option<String> {
        let vehicle = &change.vehicle;
        if vehicle.status != VehicleStatus::Ready || change.before == VehicleStatus::Ready {
            return None;
        }
        tracing::info!(vehicle_id = %vehicle.id, "vehicle is ready");

        let token = self.owner_token(&vehicle.owner_id).await?;
        let message = PushMessage::new(
            &token,
            REPAIR_COMPLETE_TITLE,
            &repair_complete_body(&vehicle.model),
        )
        .with_icon(self.icon.as_deref())
        .with_data("vehicle_id", &vehicle.id)
        .with_data("action", "repair_complete")
        .with_data("click_action", &format!("/payment/{}", vehicle.id));

        match self.push.send(&message).await {
            Ok(id) => {
                tracing::info!(
                    vehicle_id = %vehicle.id,
                    message_id = %id,
                    "repair-complete push sent"
                );
                Some(id)
            }
            Err(e) => {
                tracing::error!(
                    vehicle_id = %vehicle.id,
                    error = %e,
                    "repair-complete push failed"
                );
                None
            }
        }
    }

    /// Welcome a newly registered user who already has a device token.
    pub async fn on_user_created(&self, user: &User) -> Option<String> {
        let Some(token) = user.push_token.as_deref() else {
            tracing::debug!(user_id = %user.id, "new user has no push token, skipping welcome");
            return None;
        };
        let message =
            PushMessage::new(token, WELCOME_TITLE, WELCOME_BODY).with_icon(self.icon.as_deref());
        match self.push.send(&message).await {
            Ok(id) => {
                tracing::info!(user_id = %user.id, message_id = %id, "welcome push sent");
                Some(id)
            }
            Err(e) => {
                tracing::error!(user_id = %user.id, error = %e, "welcome push failed");
                None
            }
        }
    }

    pub fn on_vehicle_created(&self, vehicle: &Vehicle) {
        tracing::info!(
            vehicle_id = %vehicle.id,
            owner_id = %vehicle.owner_id,
            repairs = vehicle.repairs.len(),
            "breakdown reported"
        );
    }

    /// Send an ad-hoc push to a user.
    pub async fn send_manual(
        &self,
        user_id: &str,
        title: &str,
        body: &str,
    ) -> Result<String, GarageError> {
        let lookup = user_id.to_string();
        let user = self
            .db
            .call(move |db| db.get_user(&lookup))
            .await
            .map_err(GarageError::from_db)?
            .ok_or_else(|| GarageError::UserNotFound {
                id: user_id.to_string(),
            })?;
        let token = user.push_token.ok_or_else(|| GarageError::PushTokenMissing {
            user_id: user_id.to_string(),
        })?;

        let message = PushMessage::new(&token, title, body).with_icon(self.icon.as_deref());
        let id = self.push.send(&message).await.map_err(GarageError::Push)?;
        tracing::info!(user_id, message_id = %id, "manual push sent");
        Ok(id)
    }

    async fn owner_token(&self, owner_id: &str) -> Option<String> {
        let lookup = owner_id.to_string();
        let user = match self.db.call(move |db| db.get_user(&lookup)).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                tracing::warn!(owner_id, "owner not found, no push sent");
                return None;
            }
            Err(e) => {
                tracing::error!(owner_id, error = %e, "failed to look up owner");
                return None;
            }
        };
        if user.push_token.is_none() {
            tracing::info!(owner_id, "owner has no push token, no push sent");
        }
        user.push_token
    }
}

//! Workshop: repair tracking back-end.
//!
//! ## Overview
//!
//! Customers report a breakdown for their vehicle, choosing repair types
//! from a catalog. Mechanics advance each repair sub-task through
//! `pending → in_progress → done`; the overall vehicle status is derived
//! from the sub-tasks on every write. When a vehicle becomes ready the owner
//! gets a push message, and once paid the record is closed.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │  (PWA)   │ <─────── │    └─ api.rs  (route handlers, AppState)         │
//! └──────────┘ WebSocket│         │                                        │
//!                       │         │ DbHandle::call(update_repair_status)   │
//!                       │         v                                        │
//!                       │  db.rs  (GarageDb, one transaction per write)    │
//!                       │         │                                        │
//!                       │         │ derive_status() inside the write       │
//!                       │         v                                        │
//!                       │  status.rs  (state machine)                      │
//!                       │                                                  │
//!                       │  api.rs ── VehicleChange ──> triggers.rs         │
//!                       │                                  │               │
//!                       │                                  v               │
//!                       │                            push.rs (PushSender)  │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module     | Responsibility                                            |
//! |------------|-----------------------------------------------------------|
//! | `models`   | Shared types: `Vehicle`, `Repair`, `User`, status enums   |
//! | `catalog`  | Repair types with default duration and price              |
//! | `progress` | Elapsed-time progress fraction and the broadcast ticker   |
//! | `ws`       | `WsMessage` enum + `broadcast_message()` helper           |
//!
//! ## Typical Request Flow (last sub-task marked done)
//!
//! 1. `PATCH /api/garage/vehicles/{id}/repairs/{position}` → `api::update_repair()`
//! 2. `GarageDb::update_repair_status()` checks the optional
//!    `expected_version`, refuses writes to paid vehicles and backward
//!    sub-task moves, writes the sub-task, derives the new overall status and
//!    bumps the version, all in one transaction.
//! 3. The handler broadcasts `VehicleUpdated`, plus `VehicleStatusChanged`
//!    when the derived status moved.
//! 4. `Notifier::on_vehicle_updated()` sees `before != ready && after == ready`,
//!    reads the owner's push token and sends "Repair complete".

pub mod api;
pub mod catalog;
pub mod db;
pub mod models;
pub mod progress;
pub mod push;
pub mod server;
pub mod status;
pub mod triggers;
pub mod ws;

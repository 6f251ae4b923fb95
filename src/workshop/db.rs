use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::GarageError;

use super::models::*;
use super::status::{PaymentOutcome, check_repair_transition, derive_status, payment_transition};

/// Async-safe handle to the garage database.
///
/// Wraps `GarageDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O
/// never ties up async worker threads. The mutex also makes every `call`
/// a serialization point: read-modify-write sequences inside one closure
/// cannot interleave with another writer.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<GarageDb>>,
}

impl DbHandle {
    pub fn new(db: GarageDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&GarageDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

/// Format a timestamp the way every column in this database stores it.
///
/// Fixed-width microsecond precision keeps lexical and chronological order
/// identical, which the `ORDER BY` clauses rely on.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub struct GarageDb {
    conn: Connection,
}

impl GarageDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS users (
                    id TEXT PRIMARY KEY,
                    email TEXT NOT NULL DEFAULT '',
                    push_token TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS vehicles (
                    id TEXT PRIMARY KEY,
                    owner_id TEXT NOT NULL,
                    owner_email TEXT,
                    model TEXT NOT NULL,
                    license_plate TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending',
                    version INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL,
                    paid_at TEXT
                );

                CREATE TABLE IF NOT EXISTS repairs (
                    vehicle_id TEXT NOT NULL REFERENCES vehicles(id) ON DELETE CASCADE,
                    position INTEGER NOT NULL,
                    repair_type TEXT NOT NULL,
                    duration_minutes INTEGER NOT NULL DEFAULT 1,
                    price INTEGER NOT NULL DEFAULT 0,
                    status TEXT NOT NULL DEFAULT 'pending',
                    start_time TEXT,
                    completed_at TEXT,
                    PRIMARY KEY (vehicle_id, position)
                );

                CREATE INDEX IF NOT EXISTS idx_vehicles_owner ON vehicles(owner_id, status);
                CREATE INDEX IF NOT EXISTS idx_repairs_status ON repairs(status);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Users ─────────────────────────────────────────────────────────

    pub fn create_user(
        &self,
        id: &str,
        email: &str,
        push_token: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<User> {
        if self.get_user(id)?.is_some() {
            return Err(GarageError::UserExists { id: id.to_string() }.into());
        }
        let ts = format_timestamp(now);
        self.conn
            .execute(
                "INSERT INTO users (id, email, push_token, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
                params![id, email, push_token, ts],
            )
            .context("Failed to insert user")?;
        self.get_user(id)?.context("User not found after insert")
    }

    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        self.conn
            .query_row(
                "SELECT id, email, push_token, created_at, updated_at FROM users WHERE id = ?1",
                params![id],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        email: row.get(1)?,
                        push_token: row.get(2)?,
                        created_at: row.get(3)?,
                        updated_at: row.get(4)?,
                    })
                },
            )
            .optional()
            .context("Failed to query user")
    }

    /// Store a device token for a user, creating the user if needed.
    ///
    /// Merge semantics: an existing token is overwritten, other fields are
    /// kept unless a new email is supplied. Returns the user and whether it
    /// was created by this call.
    pub fn upsert_push_token(
        &self,
        id: &str,
        email: Option<&str>,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<(User, bool)> {
        let ts = format_timestamp(now);
        let created = match self.get_user(id)? {
            Some(_) => {
                self.conn
                    .execute(
                        "UPDATE users SET push_token = ?1, email = COALESCE(?2, email), updated_at = ?3 WHERE id = ?4",
                        params![token, email, ts, id],
                    )
                    .context("Failed to update push token")?;
                false
            }
            None => {
                self.conn
                    .execute(
                        "INSERT INTO users (id, email, push_token, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
                        params![id, email.unwrap_or_default(), token, ts],
                    )
                    .context("Failed to insert user with push token")?;
                true
            }
        };
        let user = self
            .get_user(id)?
            .context("User not found after push token write")?;
        Ok((user, created))
    }

    // ── Vehicles ──────────────────────────────────────────────────────

    pub fn create_vehicle(
        &self,
        owner_id: &str,
        owner_email: Option<&str>,
        model: &str,
        license_plate: &str,
        repairs: &[NewRepair],
        now: DateTime<Utc>,
    ) -> Result<Vehicle> {
        let id = uuid::Uuid::new_v4().to_string();
        let ts = format_timestamp(now);
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        self.conn
            .execute(
                "INSERT INTO vehicles (id, owner_id, owner_email, model, license_plate, status, version, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'pending', 1, ?6)",
                params![id, owner_id, owner_email, model, license_plate, ts],
            )
            .context("Failed to insert vehicle")?;
        for (position, repair) in repairs.iter().enumerate() {
            self.conn
                .execute(
                    "INSERT INTO repairs (vehicle_id, position, repair_type, duration_minutes, price, status)
                     VALUES (?1, ?2, ?3, ?4, ?5, 'pending')",
                    params![
                        id,
                        position as i64,
                        repair.repair_type,
                        repair.duration_minutes,
                        repair.price
                    ],
                )
                .context("Failed to insert repair")?;
        }
        tx.commit().context("Failed to commit vehicle")?;
        self.get_vehicle(&id)?
            .context("Vehicle not found after insert")
    }

    pub fn get_vehicle(&self, id: &str) -> Result<Option<Vehicle>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, owner_id, owner_email, model, license_plate, status, version, created_at, paid_at
                 FROM vehicles WHERE id = ?1",
                params![id],
                VehicleRow::from_row,
            )
            .optional()
            .context("Failed to query vehicle")?;
        match row {
            Some(row) => Ok(Some(self.hydrate(row)?)),
            None => Ok(None),
        }
    }

    pub fn list_vehicles_for_owner(
        &self,
        owner_id: &str,
        view: VehicleView,
    ) -> Result<Vec<Vehicle>> {
        let sql = match view {
            VehicleView::Active => {
                "SELECT id, owner_id, owner_email, model, license_plate, status, version, created_at, paid_at
                 FROM vehicles WHERE owner_id = ?1 AND status != 'paid'
                 ORDER BY created_at DESC, rowid DESC"
            }
            VehicleView::History => {
                "SELECT id, owner_id, owner_email, model, license_plate, status, version, created_at, paid_at
                 FROM vehicles WHERE owner_id = ?1 AND status = 'paid'
                 ORDER BY paid_at DESC, rowid DESC"
            }
            VehicleView::All => {
                "SELECT id, owner_id, owner_email, model, license_plate, status, version, created_at, paid_at
                 FROM vehicles WHERE owner_id = ?1
                 ORDER BY created_at DESC, rowid DESC"
            }
        };
        self.query_vehicles(sql, params![owner_id])
    }

    /// Vehicles the garage still has to work on or hand back, oldest first.
    pub fn list_garage_queue(&self) -> Result<Vec<Vehicle>> {
        self.query_vehicles(
            "SELECT id, owner_id, owner_email, model, license_plate, status, version, created_at, paid_at
             FROM vehicles WHERE status != 'paid'
             ORDER BY created_at ASC, rowid ASC",
            params![],
        )
    }

    fn query_vehicles(&self, sql: &str, args: impl rusqlite::Params) -> Result<Vec<Vehicle>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .context("Failed to prepare vehicle query")?;
        let rows = stmt
            .query_map(args, VehicleRow::from_row)
            .context("Failed to query vehicles")?;
        let mut vehicles = Vec::new();
        for row in rows {
            let row = row.context("Failed to read vehicle row")?;
            vehicles.push(self.hydrate(row)?);
        }
        Ok(vehicles)
    }

    fn list_repairs(&self, vehicle_id: &str) -> Result<Vec<Repair>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT position, repair_type, duration_minutes, price, status, start_time, completed_at
                 FROM repairs WHERE vehicle_id = ?1 ORDER BY position",
            )
            .context("Failed to prepare list_repairs")?;
        let rows = stmt
            .query_map(params![vehicle_id], |row| {
                Ok(RepairRow {
                    position: row.get(0)?,
                    repair_type: row.get(1)?,
                    duration_minutes: row.get(2)?,
                    price: row.get(3)?,
                    status: row.get(4)?,
                    start_time: row.get(5)?,
                    completed_at: row.get(6)?,
                })
            })
            .context("Failed to query repairs")?;
        let mut repairs = Vec::new();
        for row in rows {
            let r = row.context("Failed to read repair row")?;
            repairs.push(r.into_repair()?);
        }
        Ok(repairs)
    }

    fn hydrate(&self, row: VehicleRow) -> Result<Vehicle> {
        let repairs = self.list_repairs(&row.id)?;
        row.into_vehicle(repairs)
    }

    /// Move one sub-task to a new status and re-derive the vehicle status,
    /// all in one transaction.
    ///
    /// A same-status update is a no-op and does not bump the version.
    pub fn update_repair_status(
        &self,
        vehicle_id: &str,
        position: i32,
        to: RepairStatus,
        expected_version: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<VehicleChange> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;

        let vehicle = self
            .get_vehicle(vehicle_id)?
            .ok_or_else(|| GarageError::VehicleNotFound {
                id: vehicle_id.to_string(),
            })?;

        if let Some(expected) = expected_version
            && expected != vehicle.version
        {
            return Err(GarageError::VersionConflict {
                vehicle_id: vehicle_id.to_string(),
                expected,
                actual: vehicle.version,
            }
            .into());
        }

        if vehicle.status == VehicleStatus::Paid {
            return Err(GarageError::AlreadyPaid {
                vehicle_id: vehicle_id.to_string(),
            }
            .into());
        }

        let from = vehicle
            .repairs
            .iter()
            .find(|r| r.position == position)
            .map(|r| r.status)
            .ok_or_else(|| GarageError::RepairNotFound {
                vehicle_id: vehicle_id.to_string(),
                position,
            })?;

        check_repair_transition(from, to)?;

        if from == to {
            return Ok(VehicleChange::unchanged(vehicle));
        }
        let before = vehicle.status;
        let before_version = vehicle.version;

        let ts = format_timestamp(now);
        let completed_at = (to == RepairStatus::Done).then(|| ts.clone());
        self.conn
            .execute(
                "UPDATE repairs
                 SET status = ?1,
                     start_time = CASE WHEN ?1 = 'in_progress' THEN COALESCE(start_time, ?2) ELSE start_time END,
                     completed_at = ?3
                 WHERE vehicle_id = ?4 AND position = ?5",
                params![to.as_str(), ts, completed_at, vehicle_id, position],
            )
            .context("Failed to update repair status")?;

        let mut statuses = vehicle.repair_statuses();
        if let Some(index) = vehicle.repairs.iter().position(|r| r.position == position) {
            statuses[index] = to;
        }
        let after = derive_status(before, &statuses);

        let updated = self
            .conn
            .execute(
                "UPDATE vehicles SET status = ?1, version = version + 1 WHERE id = ?2 AND version = ?3",
                params![after.as_str(), vehicle_id, vehicle.version],
            )
            .context("Failed to update vehicle status")?;
        if updated == 0 {
            anyhow::bail!("Vehicle {} changed during update", vehicle_id);
        }

        tx.commit().context("Failed to commit repair update")?;

        let vehicle = self
            .get_vehicle(vehicle_id)?
            .context("Vehicle not found after repair update")?;
        Ok(VehicleChange {
            before,
            before_version,
            vehicle,
        })
    }

    /// Settle the invoice of a ready vehicle. Paying a paid vehicle is a no-op.
    pub fn mark_paid(&self, vehicle_id: &str, now: DateTime<Utc>) -> Result<VehicleChange> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;

        let vehicle = self
            .get_vehicle(vehicle_id)?
            .ok_or_else(|| GarageError::VehicleNotFound {
                id: vehicle_id.to_string(),
            })?;
        let before = vehicle.status;
        let before_version = vehicle.version;

        match payment_transition(vehicle_id, before)? {
            PaymentOutcome::AlreadyPaid => Ok(VehicleChange::unchanged(vehicle)),
            PaymentOutcome::Charge => {
                self.conn
                    .execute(
                        "UPDATE vehicles SET status = 'paid', paid_at = ?1, version = version + 1 WHERE id = ?2",
                        params![format_timestamp(now), vehicle_id],
                    )
                    .context("Failed to mark vehicle paid")?;
                tx.commit().context("Failed to commit payment")?;
                let vehicle = self
                    .get_vehicle(vehicle_id)?
                    .context("Vehicle not found after payment")?;
                Ok(VehicleChange {
                    before,
                    before_version,
                    vehicle,
                })
            }
        }
    }

    /// Every in-progress sub-task of an unpaid vehicle.
    pub fn list_active_repairs(&self) -> Result<Vec<ActiveRepair>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT r.vehicle_id, v.owner_id, r.position, r.duration_minutes, r.start_time
                 FROM repairs r JOIN vehicles v ON v.id = r.vehicle_id
                 WHERE r.status = 'in_progress' AND v.status != 'paid'
                 ORDER BY v.created_at, r.position",
            )
            .context("Failed to prepare list_active_repairs")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ActiveRepair {
                    vehicle_id: row.get(0)?,
                    owner_id: row.get(1)?,
                    position: row.get(2)?,
                    duration_minutes: row.get(3)?,
                    start_time: row.get(4)?,
                })
            })
            .context("Failed to query active repairs")?;
        let mut active = Vec::new();
        for row in rows {
            active.push(row.context("Failed to read active repair row")?);
        }
        Ok(active)
    }
}

// ── Row types ─────────────────────────────────────────────────────────

struct VehicleRow {
    id: String,
    owner_id: String,
    owner_email: Option<String>,
    model: String,
    license_plate: String,
    status: String,
    version: i64,
    created_at: String,
    paid_at: Option<String>,
}

impl VehicleRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(VehicleRow {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            owner_email: row.get(2)?,
            model: row.get(3)?,
            license_plate: row.get(4)?,
            status: row.get(5)?,
            version: row.get(6)?,
            created_at: row.get(7)?,
            paid_at: row.get(8)?,
        })
    }

    fn into_vehicle(self, repairs: Vec<Repair>) -> Result<Vehicle> {
        let status = VehicleStatus::from_str(&self.status).map_err(|e| anyhow::anyhow!(e))?;
        Ok(Vehicle {
            id: self.id,
            owner_id: self.owner_id,
            owner_email: self.owner_email,
            model: self.model,
            license_plate: self.license_plate,
            status,
            version: self.version,
            created_at: self.created_at,
            paid_at: self.paid_at,
            repairs,
        })
    }
}

struct RepairRow {
    position: i32,
    repair_type: String,
    duration_minutes: u32,
    price: i64,
    status: String,
    start_time: Option<String>,
    completed_at: Option<String>,
}

impl RepairRow {
    fn into_repair(self) -> Result<Repair> {
        let status = RepairStatus::from_str(&self.status).map_err(|e| anyhow::anyhow!(e))?;
        Ok(Repair {
            position: self.position,
            repair_type: self.repair_type,
            duration_minutes: self.duration_minutes,
            price: self.price,
            status,
            start_time: self.start_time,
            completed_at: self.completed_at,
            // In-progress fractions depend on the clock and are filled in by readers.
            progress: if status == RepairStatus::Done { 1.0 } else { 0.0 },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn new_repairs(types: &[&str]) -> Vec<NewRepair> {
        types
            .iter()
            .map(|ty| NewRepair {
                repair_type: ty.to_string(),
                duration_minutes: 30,
                price: 50_000,
            })
            .collect()
    }

    fn seed(db: &GarageDb, owner: &str, types: &[&str], at: i64) -> Vehicle {
        db.create_vehicle(
            owner,
            Some("o@example.com"),
            "Toyota Vitz",
            "1234 tab",
            &new_repairs(types),
            t(at),
        )
        .unwrap()
    }

    fn expect_garage_error(err: anyhow::Error) -> GarageError {
        GarageError::from_db(err)
    }

    #[test]
    fn test_create_and_get_user() {
        let db = GarageDb::new_in_memory().unwrap();
        let user = db.create_user("u1", "u1@example.com", None, t(0)).unwrap();
        assert_eq!(user.email, "u1@example.com");
        assert!(user.push_token.is_none());
        assert_eq!(db.get_user("u1").unwrap().unwrap(), user);
        assert!(db.get_user("missing").unwrap().is_none());
    }

    #[test]
    fn test_create_user_twice_fails() {
        let db = GarageDb::new_in_memory().unwrap();
        db.create_user("u1", "a@example.com", None, t(0)).unwrap();
        let err = db.create_user("u1", "b@example.com", None, t(1)).unwrap_err();
        assert!(matches!(expect_garage_error(err), GarageError::UserExists { .. }));
    }

    #[test]
    fn test_upsert_push_token_creates_then_overwrites() {
        let db = GarageDb::new_in_memory().unwrap();
        let (user, created) = db
            .upsert_push_token("u1", Some("u1@example.com"), "tok-1", t(0))
            .unwrap();
        assert!(created);
        assert_eq!(user.push_token.as_deref(), Some("tok-1"));

        let (user, created) = db.upsert_push_token("u1", None, "tok-2", t(5)).unwrap();
        assert!(!created);
        assert_eq!(user.push_token.as_deref(), Some("tok-2"));
        assert_eq!(user.email, "u1@example.com");
        assert_ne!(user.created_at, user.updated_at);
    }

    #[test]
    fn test_create_vehicle_with_repairs() {
        let db = GarageDb::new_in_memory().unwrap();
        let vehicle = seed(&db, "u1", &["Brakes", "Battery"], 0);
        assert_eq!(vehicle.status, VehicleStatus::Pending);
        assert_eq!(vehicle.version, 1);
        assert_eq!(vehicle.repairs.len(), 2);
        assert_eq!(vehicle.repairs[0].position, 0);
        assert_eq!(vehicle.repairs[1].repair_type, "Battery");
        assert!(vehicle.repairs.iter().all(|r| r.status == RepairStatus::Pending));
    }

    #[test]
    fn test_list_views_and_ordering() {
        let db = GarageDb::new_in_memory().unwrap();
        let older = seed(&db, "u1", &["Brakes"], 0);
        let newer = seed(&db, "u1", &["Battery"], 10);
        let _other = seed(&db, "u2", &["Clutch"], 20);

        db.update_repair_status(&older.id, 0, RepairStatus::Done, None, t(30))
            .unwrap();
        db.mark_paid(&older.id, t(40)).unwrap();

        let active = db.list_vehicles_for_owner("u1", VehicleView::Active).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, newer.id);

        let history = db.list_vehicles_for_owner("u1", VehicleView::History).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, older.id);

        let all = db.list_vehicles_for_owner("u1", VehicleView::All).unwrap();
        let ids: Vec<_> = all.iter().map(|v| v.id.clone()).collect();
        assert_eq!(ids, vec![newer.id.clone(), older.id.clone()]);

        let queue = db.list_garage_queue().unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue[0].id, newer.id);
    }

    #[test]
    fn test_update_repair_derives_status() {
        let db = GarageDb::new_in_memory().unwrap();
        let v = seed(&db, "u1", &["Brakes", "Battery"], 0);

        let change = db
            .update_repair_status(&v.id, 0, RepairStatus::InProgress, None, t(60))
            .unwrap();
        assert_eq!(change.before, VehicleStatus::Pending);
        assert_eq!(change.vehicle.status, VehicleStatus::Repairing);
        assert_eq!(change.vehicle.version, 2);
        assert!(change.written());
        assert_eq!(
            change.vehicle.repairs[0].start_time.as_deref(),
            Some(format_timestamp(t(60)).as_str())
        );

        db.update_repair_status(&v.id, 0, RepairStatus::Done, None, t(120))
            .unwrap();
        let change = db
            .update_repair_status(&v.id, 1, RepairStatus::Done, None, t(180))
            .unwrap();
        assert_eq!(change.before, VehicleStatus::Repairing);
        assert_eq!(change.vehicle.status, VehicleStatus::Ready);
        assert!(change.vehicle.repairs.iter().all(|r| r.completed_at.is_some()));
        assert!(change.vehicle.repairs.iter().all(|r| r.progress == 1.0));
    }

    #[test]
    fn test_restart_keeps_original_start_time() {
        let db = GarageDb::new_in_memory().unwrap();
        let v = seed(&db, "u1", &["Brakes"], 0);
        db.update_repair_status(&v.id, 0, RepairStatus::InProgress, None, t(60))
            .unwrap();
        let change = db
            .update_repair_status(&v.id, 0, RepairStatus::InProgress, None, t(90))
            .unwrap();
        assert!(!change.status_changed());
        assert!(!change.written());
        assert_eq!(change.vehicle.version, 2);
        assert_eq!(
            change.vehicle.repairs[0].start_time.as_deref(),
            Some(format_timestamp(t(60)).as_str())
        );
    }

    #[test]
    fn test_update_repair_rejects_backward_transition() {
        let db = GarageDb::new_in_memory().unwrap();
        let v = seed(&db, "u1", &["Brakes", "Battery"], 0);
        db.update_repair_status(&v.id, 0, RepairStatus::Done, None, t(10))
            .unwrap();
        let err = db
            .update_repair_status(&v.id, 0, RepairStatus::Pending, None, t(20))
            .unwrap_err();
        assert!(matches!(
            expect_garage_error(err),
            GarageError::InvalidRepairTransition { .. }
        ));
    }

    #[test]
    fn test_update_repair_stale_version_conflicts() {
        let db = GarageDb::new_in_memory().unwrap();
        let v = seed(&db, "u1", &["Brakes", "Battery"], 0);
        db.update_repair_status(&v.id, 0, RepairStatus::InProgress, Some(1), t(10))
            .unwrap();
        let err = db
            .update_repair_status(&v.id, 1, RepairStatus::InProgress, Some(1), t(20))
            .unwrap_err();
        match expect_garage_error(err) {
            GarageError::VersionConflict { expected, actual, .. } => {
                assert_eq!(expected, 1);
                assert_eq!(actual, 2);
            }
            other => panic!("Expected VersionConflict, got {other:?}"),
        }
        // The rejected write left nothing behind.
        let v = db.get_vehicle(&v.id).unwrap().unwrap();
        assert_eq!(v.repairs[1].status, RepairStatus::Pending);
    }

    #[test]
    fn test_update_repair_missing_records() {
        let db = GarageDb::new_in_memory().unwrap();
        let err = db
            .update_repair_status("nope", 0, RepairStatus::Done, None, t(0))
            .unwrap_err();
        assert!(matches!(
            expect_garage_error(err),
            GarageError::VehicleNotFound { .. }
        ));

        let v = seed(&db, "u1", &["Brakes"], 0);
        let err = db
            .update_repair_status(&v.id, 7, RepairStatus::Done, None, t(0))
            .unwrap_err();
        assert!(matches!(
            expect_garage_error(err),
            GarageError::RepairNotFound { position: 7, .. }
        ));
    }

    #[test]
    fn test_mark_paid_requires_ready_and_is_idempotent() {
        let db = GarageDb::new_in_memory().unwrap();
        let v = seed(&db, "u1", &["Brakes"], 0);

        let err = db.mark_paid(&v.id, t(10)).unwrap_err();
        assert!(matches!(
            expect_garage_error(err),
            GarageError::NotReadyForPayment { .. }
        ));

        db.update_repair_status(&v.id, 0, RepairStatus::Done, None, t(20))
            .unwrap();
        let paid = db.mark_paid(&v.id, t(30)).unwrap();
        assert_eq!(paid.before, VehicleStatus::Ready);
        assert_eq!(paid.vehicle.status, VehicleStatus::Paid);
        let paid_at = paid.vehicle.paid_at.clone().unwrap();

        let again = db.mark_paid(&v.id, t(99)).unwrap();
        assert!(!again.status_changed());
        assert_eq!(again.vehicle.paid_at.unwrap(), paid_at);
        assert_eq!(again.vehicle.version, paid.vehicle.version);
    }

    #[test]
    fn test_paid_vehicle_repairs_are_locked() {
        let db = GarageDb::new_in_memory().unwrap();
        let v = seed(&db, "u1", &["Brakes"], 0);
        db.update_repair_status(&v.id, 0, RepairStatus::Done, None, t(10))
            .unwrap();
        db.mark_paid(&v.id, t(20)).unwrap();
        let err = db
            .update_repair_status(&v.id, 0, RepairStatus::Done, None, t(30))
            .unwrap_err();
        assert!(matches!(expect_garage_error(err), GarageError::AlreadyPaid { .. }));
        let v = db.get_vehicle(&v.id).unwrap().unwrap();
        assert_eq!(v.status, VehicleStatus::Paid);
    }

    #[test]
    fn test_list_active_repairs() {
        let db = GarageDb::new_in_memory().unwrap();
        let v = seed(&db, "u1", &["Brakes", "Battery"], 0);
        assert!(db.list_active_repairs().unwrap().is_empty());
        db.update_repair_status(&v.id, 1, RepairStatus::InProgress, None, t(5))
            .unwrap();
        let active = db.list_active_repairs().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].vehicle_id, v.id);
        assert_eq!(active[0].owner_id, "u1");
        assert_eq!(active[0].position, 1);
    }

    #[test]
    fn test_file_database_persists_between_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garage.db");
        let id = {
            let db = GarageDb::new(&path).unwrap();
            seed(&db, "u1", &["Brakes"], 0).id
        };
        let db = GarageDb::new(&path).unwrap();
        assert!(db.get_vehicle(&id).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_db_handle_call_runs_closure() {
        let handle = DbHandle::new(GarageDb::new_in_memory().unwrap());
        let user = handle
            .call(|db| db.create_user("u1", "u1@example.com", Some("tok"), Utc::now()))
            .await
            .unwrap();
        assert_eq!(user.push_token.as_deref(), Some("tok"));
    }
}

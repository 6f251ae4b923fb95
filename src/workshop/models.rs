use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: String,
    pub email: String,
    pub push_token: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Overall status of a vehicle record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VehicleStatus {
    Pending,
    Repairing,
    Ready,
    Paid,
}

impl VehicleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Repairing => "repairing",
            Self::Ready => "ready",
            Self::Paid => "paid",
        }
    }
}

impl std::fmt::Display for VehicleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VehicleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "repairing" => Ok(Self::Repairing),
            "ready" => Ok(Self::Ready),
            "paid" => Ok(Self::Paid),
            _ => Err(format!("Invalid vehicle status: {}", s)),
        }
    }
}

/// Status of a single repair line item.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RepairStatus {
    Pending,
    InProgress,
    Done,
}

impl RepairStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Done => "done",
        }
    }

    /// Position in the forward-only lifecycle.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::InProgress => 1,
            Self::Done => 2,
        }
    }
}

impl std::fmt::Display for RepairStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RepairStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            _ => Err(format!("Invalid repair status: {}", s)),
        }
    }
}

/// One repair line item within a vehicle record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Repair {
    pub position: i32,
    #[serde(rename = "type")]
    pub repair_type: String,
    pub duration_minutes: u32,
    pub price: i64,
    pub status: RepairStatus,
    pub start_time: Option<String>,
    pub completed_at: Option<String>,
    /// Animated completion fraction, recomputed on every read.
    #[serde(default)]
    pub progress: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vehicle {
    pub id: String,
    pub owner_id: String,
    pub owner_email: Option<String>,
    pub model: String,
    pub license_plate: String,
    pub status: VehicleStatus,
    pub version: i64,
    pub created_at: String,
    pub paid_at: Option<String>,
    pub repairs: Vec<Repair>,
}

impl Vehicle {
    pub fn repair_statuses(&self) -> Vec<RepairStatus> {
        self.repairs.iter().map(|r| r.status).collect()
    }

    pub fn total_price(&self) -> i64 {
        self.repairs.iter().map(|r| r.price).sum()
    }
}

/// A repair line to be created with a new breakdown report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewRepair {
    pub repair_type: String,
    pub duration_minutes: u32,
    pub price: i64,
}

/// Result of a write to a vehicle record: the status and version before the
/// write and the record after it. Triggers diff the two.
#[derive(Debug, Clone)]
pub struct VehicleChange {
    pub before: VehicleStatus,
    pub before_version: i64,
    pub vehicle: Vehicle,
}

impl VehicleChange {
    /// A change that wrote nothing.
    pub fn unchanged(vehicle: Vehicle) -> Self {
        Self {
            before: vehicle.status,
            before_version: vehicle.version,
            vehicle,
        }
    }

    pub fn status_changed(&self) -> bool {
        self.before != self.vehicle.status
    }

    /// Whether the record was written (its version moved).
    pub fn written(&self) -> bool {
        self.before_version != self.vehicle.version
    }
}

/// Which of an owner's vehicles to list.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum VehicleView {
    /// Not yet paid, newest first.
    #[default]
    Active,
    /// Paid, most recently paid first.
    History,
    All,
}

// API view types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvoiceLine {
    #[serde(rename = "type")]
    pub repair_type: String,
    pub price: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Invoice {
    pub vehicle_id: String,
    pub model: String,
    pub license_plate: String,
    pub status: VehicleStatus,
    pub lines: Vec<InvoiceLine>,
    pub total: i64,
    pub paid_at: Option<String>,
}

impl From<&Vehicle> for Invoice {
    fn from(vehicle: &Vehicle) -> Self {
        Invoice {
            vehicle_id: vehicle.id.clone(),
            model: vehicle.model.clone(),
            license_plate: vehicle.license_plate.clone(),
            status: vehicle.status,
            lines: vehicle
                .repairs
                .iter()
                .map(|r| InvoiceLine {
                    repair_type: r.repair_type.clone(),
                    price: r.price,
                })
                .collect(),
            total: vehicle.total_price(),
            paid_at: vehicle.paid_at.clone(),
        }
    }
}

/// An in-progress repair as seen by the progress ticker.
#[derive(Debug, Clone)]
pub struct ActiveRepair {
    pub vehicle_id: String,
    pub owner_id: String,
    pub position: i32,
    pub duration_minutes: u32,
    pub start_time: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repair(position: i32, price: i64, status: RepairStatus) -> Repair {
        Repair {
            position,
            repair_type: format!("type-{position}"),
            duration_minutes: 30,
            price,
            status,
            start_time: None,
            completed_at: None,
            progress: 0.0,
        }
    }

    fn vehicle(repairs: Vec<Repair>) -> Vehicle {
        Vehicle {
            id: "v-1".into(),
            owner_id: "u-1".into(),
            owner_email: Some("owner@example.com".into()),
            model: "Peugeot 208".into(),
            license_plate: "1234 TBA".into(),
            status: VehicleStatus::Pending,
            version: 1,
            created_at: "2024-01-01T00:00:00+00:00".into(),
            paid_at: None,
            repairs,
        }
    }

    #[test]
    fn test_vehicle_status_roundtrip() {
        for s in &["pending", "repairing", "ready", "paid"] {
            let parsed: VehicleStatus = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("none".parse::<VehicleStatus>().is_err());
    }

    #[test]
    fn test_repair_status_roundtrip() {
        for s in &["pending", "in_progress", "done"] {
            let parsed: RepairStatus = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("running".parse::<RepairStatus>().is_err());
    }

    #[test]
    fn test_serde_produces_snake_case_strings() {
        assert_eq!(
            serde_json::to_string(&RepairStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
        assert_eq!(
            serde_json::to_string(&VehicleStatus::Repairing).unwrap(),
            "\"repairing\""
        );
        assert_eq!(
            serde_json::from_str::<VehicleView>("\"history\"").unwrap(),
            VehicleView::History
        );
    }

    #[test]
    fn test_repair_serializes_type_field() {
        let json = serde_json::to_value(repair(0, 100, RepairStatus::Pending)).unwrap();
        assert_eq!(json["type"], "type-0");
        assert!(json.get("repair_type").is_none());
    }

    #[test]
    fn test_invoice_totals_repair_prices() {
        let v = vehicle(vec![
            repair(0, 150_000, RepairStatus::Done),
            repair(1, 80_000, RepairStatus::Done),
        ]);
        let invoice = Invoice::from(&v);
        assert_eq!(invoice.total, 230_000);
        assert_eq!(invoice.lines.len(), 2);
        assert_eq!(invoice.lines[1].repair_type, "type-1");
    }

    #[test]
    fn test_vehicle_change_detects_status_change() {
        let mut v = vehicle(vec![]);
        let unchanged = VehicleChange::unchanged(v.clone());
        assert!(!unchanged.status_changed());
        assert!(!unchanged.written());

        v.status = VehicleStatus::Ready;
        v.version += 1;
        let changed = VehicleChange {
            before: VehicleStatus::Repairing,
            before_version: v.version - 1,
            vehicle: v,
        };
        assert!(changed.status_changed());
        assert!(changed.written());
    }
}

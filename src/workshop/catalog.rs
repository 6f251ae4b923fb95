use crate::errors::GarageError;
use crate::garage_config::CatalogEntry;

use super::models::NewRepair;

/// Repair types a customer may pick on the breakdown form.
#[derive(Debug, Clone)]
pub struct RepairCatalog {
    entries: Vec<CatalogEntry>,
}

impl RepairCatalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Case-insensitive lookup by type label.
    pub fn lookup(&self, repair_type: &str) -> Option<&CatalogEntry> {
        let wanted = repair_type.trim();
        self.entries
            .iter()
            .find(|e| e.repair_type.eq_ignore_ascii_case(wanted))
    }

    /// Turn the selected type labels into sub-tasks, in selection order.
    ///
    /// Selecting a type twice keeps the first occurrence.
    pub fn new_repairs(&self, selected: &[String]) -> Result<Vec<NewRepair>, GarageError> {
        if selected.is_empty() {
            return Err(GarageError::BadRequest(
                "select at least one repair".to_string(),
            ));
        }
        let mut repairs: Vec<NewRepair> = Vec::with_capacity(selected.len());
        for label in selected {
            let entry = self
                .lookup(label)
                .ok_or_else(|| GarageError::UnknownRepairType(label.clone()))?;
            if repairs.iter().any(|r| r.repair_type == entry.repair_type) {
                continue;
            }
            repairs.push(NewRepair {
                repair_type: entry.repair_type.clone(),
                duration_minutes: entry.duration_minutes,
                price: entry.price,
            });
        }
        Ok(repairs)
    }
}

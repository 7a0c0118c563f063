//! Cards and tariffs.

use serde::{Deserialize, Serialize};

/// Vehicle class used for tariff lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VehicleType {
    Car,
    Bus,
    Truck,
}

impl std::fmt::Display for VehicleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VehicleType::Car => "CAR",
            VehicleType::Bus => "BUS",
            VehicleType::Truck => "TRUCK",
        };
        f.write_str(s)
    }
}

/// A stored-value toll card, keyed by the tag hash.
///
/// The balance is mutated only by a successful deduction and rolled back if a
/// downstream write fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Card {
    pub tag_hash: String,
    pub vehicle_type: VehicleType,
    pub balance: f64,
    /// Unix seconds of the last accepted scan, used for the duplicate-scan
    /// window check.
    pub last_seen: Option<i64>,
}

impl Card {
    pub fn new(tag_hash: impl Into<String>, vehicle_type: VehicleType, balance: f64) -> Self {
        Self {
            tag_hash: tag_hash.into(),
            vehicle_type,
            balance,
            last_seen: None,
        }
    }
}

/// Toll price for one vehicle class.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Tariff {
    pub vehicle_type: VehicleType,
    pub amount: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vehicle_type_wire_format() {
        assert_eq!(serde_json::to_string(&VehicleType::Car).unwrap(), "\"CAR\"");
        let parsed: VehicleType = serde_json::from_str("\"TRUCK\"").unwrap();
        assert_eq!(parsed, VehicleType::Truck);
    }
}

use std::fmt;

use serde::{Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sex {
    Female,
    Male,
}

/// One row of the static user reference table. Participant ids must match
/// the id embedded in each measurement frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub participant_id: u8,
    pub age: u16,
    pub height_cm: u16,
    pub sex: Sex,
    pub activity_level: u8,
}

impl User {
    pub fn is_male(&self) -> bool {
        self.sex == Sex::Male
    }
}

/// Calendar timestamp as reported by the scale (device-local clock).
///
/// Field order runs from most to least significant, so the derived ordering
/// is temporal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MeasurementTimestamp {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl fmt::Display for MeasurementTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

impl Serialize for MeasurementTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Fully decoded measurement frame plus derived body-composition metrics.
///
/// The serialized form is the telemetry record published to the bus; the raw
/// impedance readings stay internal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedMeasurement {
    #[serde(rename = "p_id")]
    pub participant_id: u8,
    pub timestamp: MeasurementTimestamp,
    #[serde(rename = "weight")]
    pub weight_kg: f32,
    #[serde(skip)]
    pub impedance_5khz: u16,
    #[serde(skip)]
    pub impedance_50khz: u16,
    #[serde(rename = "fat")]
    pub fat_pct: f32,
    #[serde(rename = "water")]
    pub water_pct: f32,
    #[serde(rename = "muscle")]
    pub muscle_pct: f32,
}

/// Vendor GATT frame codec for the scale's measurement protocol
use std::fmt;

use time::OffsetDateTime;

use crate::calculations::{calculate_fat, calculate_muscle, calculate_water};
use crate::models::{DecodedMeasurement, MeasurementTimestamp, User};

/// Opcode of the history-request command frame.
pub const HISTORY_REQUEST_OPCODE: u8 = 0x09;

/// Minimum length of a measurement notification frame.
pub const MEASUREMENT_FRAME_LEN: usize = 15;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Frame shorter than the fixed measurement layout.
    TooShort { actual: usize },
    /// Frame references a participant id missing from the reference table.
    /// Never mapped to a default user; mis-attribution is worse than a drop.
    UnknownParticipant(u8),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::TooShort { actual } => write!(
                f,
                "measurement frame too short: {} bytes, expected at least {}",
                actual, MEASUREMENT_FRAME_LEN
            ),
            DecodeError::UnknownParticipant(id) => {
                write!(f, "unknown participant id {} in measurement frame", id)
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Encode the Current Time characteristic payload.
///
/// Little-endian 16-bit year, then month, day, hour, minute, second, weekday
/// (Monday=1..Sunday=7) and two reserved zero bytes.
pub fn encode_time_sync(now: &OffsetDateTime) -> [u8; 10] {
    let year = now.year().clamp(0, u16::MAX as i32) as u16;
    let year_le = year.to_le_bytes();

    [
        year_le[0],
        year_le[1],
        now.month() as u8,
        now.day(),
        now.hour(),
        now.minute(),
        now.second(),
        now.weekday().number_days_from_monday() + 1,
        0,
        0,
    ]
}

/// Encode a history-request command for one participant.
pub fn encode_history_request(participant_id: u8) -> [u8; 2] {
    [HISTORY_REQUEST_OPCODE, participant_id]
}

/// Decode one measurement notification frame.
///
/// Layout (big-endian multi-byte fields): byte 0 reserved, byte 1 participant
/// id, bytes 2..4 year, then month/day/hour/minute/second, bytes 9..11 weight
/// in 0.1 kg steps, bytes 11..13 impedance at 5 kHz, bytes 13..15 impedance
/// at 50 kHz. A zero 50 kHz impedance marks an invalid bioimpedance contact
/// (e.g. scale used with socks on); the weight is still valid and all derived
/// metrics are reported as zero.
pub fn decode_measurement(
    frame: &[u8],
    users: &[User],
) -> Result<DecodedMeasurement, DecodeError> {
    if frame.len() < MEASUREMENT_FRAME_LEN {
        return Err(DecodeError::TooShort {
            actual: frame.len(),
        });
    }

    let participant_id = frame[1];
    let user = users
        .iter()
        .find(|user| user.participant_id == participant_id)
        .ok_or(DecodeError::UnknownParticipant(participant_id))?;

    let timestamp = MeasurementTimestamp {
        year: u16::from_be_bytes([frame[2], frame[3]]),
        month: frame[4],
        day: frame[5],
        hour: frame[6],
        minute: frame[7],
        second: frame[8],
    };

    let weight_kg = u16::from_be_bytes([frame[9], frame[10]]) as f32 / 10.0;
    let impedance_5khz = u16::from_be_bytes([frame[11], frame[12]]);
    let impedance_50khz = u16::from_be_bytes([frame[13], frame[14]]);

    let (fat_pct, water_pct, muscle_pct) = if impedance_50khz > 0 {
        (
            calculate_fat(user, weight_kg, impedance_50khz as f32),
            calculate_water(user, weight_kg, impedance_50khz as f32),
            calculate_muscle(
                user,
                weight_kg,
                impedance_50khz as f32,
                impedance_5khz as f32,
            ),
        )
    } else {
        (0.0, 0.0, 0.0)
    };

    Ok(DecodedMeasurement {
        participant_id,
        timestamp,
        weight_kg,
        impedance_5khz,
        impedance_50khz,
        fat_pct,
        water_pct,
        muscle_pct,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Sex;
    use time::macros::datetime;

    fn test_users() -> Vec<User> {
        vec![
            User {
                participant_id: 1,
                age: 50,
                height_cm: 159,
                sex: Sex::Female,
                activity_level: 2,
            },
            User {
                participant_id: 2,
                age: 55,
                height_cm: 180,
                sex: Sex::Male,
                activity_level: 2,
            },
        ]
    }

    #[allow(clippy::too_many_arguments)]
    fn make_frame(
        participant_id: u8,
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
        weight_decigrams: u16,
        imp5: u16,
        imp50: u16,
    ) -> Vec<u8> {
        let mut frame = vec![0u8; MEASUREMENT_FRAME_LEN];
        frame[1] = participant_id;
        frame[2..4].copy_from_slice(&year.to_be_bytes());
        frame[4] = month;
        frame[5] = day;
        frame[6] = hour;
        frame[7] = minute;
        frame[8] = second;
        frame[9..11].copy_from_slice(&weight_decigrams.to_be_bytes());
        frame[11..13].copy_from_slice(&imp5.to_be_bytes());
        frame[13..15].copy_from_slice(&imp50.to_be_bytes());
        frame
    }

    #[test]
    fn decode_extracts_every_field() {
        let frame = make_frame(1, 2024, 6, 15, 8, 30, 45, 760, 560, 544);
        let measurement = decode_measurement(&frame, &test_users()).unwrap();

        assert_eq!(measurement.participant_id, 1);
        assert_eq!(
            measurement.timestamp,
            MeasurementTimestamp {
                year: 2024,
                month: 6,
                day: 15,
                hour: 8,
                minute: 30,
                second: 45,
            }
        );
        assert!((measurement.weight_kg - 76.0).abs() < f32::EPSILON);
        assert_eq!(measurement.impedance_5khz, 560);
        assert_eq!(measurement.impedance_50khz, 544);
    }

    #[test]
    fn decode_rejects_short_frame() {
        let frame = vec![0u8; 10];
        assert_eq!(
            decode_measurement(&frame, &test_users()),
            Err(DecodeError::TooShort { actual: 10 })
        );
    }

    #[test]
    fn decode_rejects_unknown_participant() {
        let frame = make_frame(9, 2024, 6, 15, 8, 30, 45, 760, 560, 544);
        assert_eq!(
            decode_measurement(&frame, &test_users()),
            Err(DecodeError::UnknownParticipant(9))
        );
    }

    #[test]
    fn zero_impedance_yields_zero_metrics() {
        // arbitrary nonzero values everywhere else must not matter
        let frame = make_frame(2, 2031, 12, 31, 23, 59, 59, 1234, 999, 0);
        let measurement = decode_measurement(&frame, &test_users()).unwrap();

        assert_eq!(measurement.fat_pct, 0.0);
        assert_eq!(measurement.water_pct, 0.0);
        assert_eq!(measurement.muscle_pct, 0.0);
        assert!((measurement.weight_kg - 123.4).abs() < 1e-4);
    }

    #[test]
    fn metrics_match_the_pure_formulas() {
        let users = test_users();
        let frame = make_frame(1, 2024, 6, 15, 8, 30, 45, 600, 600, 500);
        let measurement = decode_measurement(&frame, &users).unwrap();

        let user = &users[0];
        assert_eq!(measurement.fat_pct, calculate_fat(user, 60.0, 500.0));
        assert_eq!(measurement.water_pct, calculate_water(user, 60.0, 500.0));
        assert_eq!(
            measurement.muscle_pct,
            calculate_muscle(user, 60.0, 500.0, 600.0)
        );
    }

    #[test]
    fn time_sync_layout_is_little_endian_with_remapped_weekday() {
        // 2024-03-02 is a Saturday: days-from-Monday 5, wire weekday 6
        let now = datetime!(2024-03-02 14:30:05 UTC);
        let frame = encode_time_sync(&now);

        assert_eq!(frame, [0xE8, 0x07, 3, 2, 14, 30, 5, 6, 0, 0]);
    }

    #[test]
    fn time_sync_weekday_covers_both_ends_of_the_week() {
        let monday = datetime!(2024-03-04 00:00:00 UTC);
        assert_eq!(encode_time_sync(&monday)[7], 1);

        let sunday = datetime!(2024-03-03 00:00:00 UTC);
        assert_eq!(encode_time_sync(&sunday)[7], 7);
    }

    #[test]
    fn history_request_is_opcode_then_id() {
        assert_eq!(encode_history_request(2), [0x09, 2]);
    }

    #[test]
    fn decoded_fields_round_trip_through_reencoding() {
        let frame = make_frame(2, 2025, 1, 7, 6, 2, 13, 905, 480, 512);
        let measurement = decode_measurement(&frame, &test_users()).unwrap();

        let rebuilt = make_frame(
            measurement.participant_id,
            measurement.timestamp.year,
            measurement.timestamp.month,
            measurement.timestamp.day,
            measurement.timestamp.hour,
            measurement.timestamp.minute,
            measurement.timestamp.second,
            (measurement.weight_kg * 10.0).round() as u16,
            measurement.impedance_5khz,
            measurement.impedance_50khz,
        );
        assert_eq!(rebuilt, frame);
    }
}

use std::env;
use std::error::Error;
use std::fmt::Display;
use std::str::FromStr;

use crate::models::{Sex, User};
use crate::mqtt::connection::MqttSettings;

/// Runtime configuration, sourced from the environment (.env supported).
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub device_name: String,
    pub users: Vec<User>,
    pub mqtt: MqttSettings,
    pub root_topic: String,
    pub settle_secs: u64,
    pub collect_secs: u64,
    pub watchdog_device: Option<String>,
    pub boot_count_file: String,
}

impl BridgeConfig {
    pub fn new() -> Result<Self, Box<dyn Error>> {
        // Load environment variables
        dotenv::dotenv().ok();

        let device_name =
            env::var("SCALE_DEVICE_NAME").unwrap_or_else(|_| "Shape100".to_string());

        let users = parse_users(
            &env::var("SCALE_USERS").map_err(|_| "SCALE_USERS environment variable not set")?,
        )?;
        if users.is_empty() {
            return Err(
                "No scale users configured. Set SCALE_USERS=\"id:age:height_cm:sex:activity,...\""
                    .into(),
            );
        }

        let mqtt = MqttSettings {
            host: env::var("MQTT_HOST").map_err(|_| "MQTT_HOST environment variable not set")?,
            port: parse_env_or("MQTT_PORT", 1883)?,
            username: env::var("MQTT_USERNAME").ok(),
            password: env::var("MQTT_PASSWORD").ok(),
            client_id: env::var("MQTT_CLIENT_ID")
                .unwrap_or_else(|_| "smartscale_bridge".to_string()),
        };

        let root_topic = env::var("MQTT_ROOT_TOPIC").unwrap_or_else(|_| "smartscale".to_string());
        let settle_secs = parse_env_or("SETTLE_DELAY_SECS", 15)?;
        let collect_secs = parse_env_or("COLLECT_DELAY_SECS", 5)?;
        let watchdog_device = env::var("WATCHDOG_DEVICE").ok();
        let boot_count_file =
            env::var("BOOT_COUNT_FILE").unwrap_or_else(|_| "boot_count.txt".to_string());

        println!(
            "Configured {} scale user(s) for device '{}'",
            users.len(),
            device_name
        );

        Ok(BridgeConfig {
            device_name,
            users,
            mqtt,
            root_topic,
            settle_secs,
            collect_secs,
            watchdog_device,
            boot_count_file,
        })
    }
}

fn parse_env_or<T: FromStr>(key: &str, default: T) -> Result<T, Box<dyn Error>>
where
    T::Err: Display,
{
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|e| format!("Invalid {}: {}", key, e).into()),
        Err(_) => Ok(default),
    }
}

/// Parse the user reference table: comma-separated
/// `participant_id:age:height_cm:sex:activity_level` entries, e.g.
/// `1:50:159:female:2,2:55:180:male:2`.
fn parse_users(raw: &str) -> Result<Vec<User>, Box<dyn Error>> {
    let mut users: Vec<User> = Vec::new();

    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }

        let fields: Vec<&str> = entry.split(':').collect();
        if fields.len() != 5 {
            return Err(format!(
                "Invalid SCALE_USERS entry '{}': expected id:age:height_cm:sex:activity",
                entry
            )
            .into());
        }

        let participant_id: u8 = fields[0]
            .parse()
            .map_err(|e| format!("Invalid participant id in '{}': {}", entry, e))?;
        if users.iter().any(|user| user.participant_id == participant_id) {
            return Err(format!("Duplicate participant id {} in SCALE_USERS", participant_id).into());
        }

        let sex = match fields[3].to_ascii_lowercase().as_str() {
            "m" | "male" => Sex::Male,
            "f" | "female" => Sex::Female,
            other => {
                return Err(format!("Invalid sex '{}' in SCALE_USERS entry '{}'", other, entry).into())
            }
        };

        let activity_level: u8 = fields[4]
            .parse()
            .map_err(|e| format!("Invalid activity level in '{}': {}", entry, e))?;
        if !(1..=5).contains(&activity_level) {
            return Err(format!(
                "Activity level {} out of range 1..5 in SCALE_USERS entry '{}'",
                activity_level, entry
            )
            .into());
        }

        users.push(User {
            participant_id,
            age: fields[1]
                .parse()
                .map_err(|e| format!("Invalid age in '{}': {}", entry, e))?,
            height_cm: fields[2]
                .parse()
                .map_err(|e| format!("Invalid height in '{}': {}", entry, e))?,
            sex,
            activity_level,
        });
    }

    Ok(users)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_reference_table_in_order() {
        let users = parse_users("1:50:159:female:2, 2:55:180:male:2").unwrap();

        assert_eq!(users.len(), 2);
        assert_eq!(users[0].participant_id, 1);
        assert_eq!(users[0].sex, Sex::Female);
        assert_eq!(users[0].height_cm, 159);
        assert_eq!(users[1].participant_id, 2);
        assert_eq!(users[1].sex, Sex::Male);
    }

    #[test]
    fn rejects_malformed_entries() {
        assert!(parse_users("1:50:159:female").is_err());
        assert!(parse_users("1:50:159:robot:2").is_err());
        assert!(parse_users("1:50:159:female:9").is_err());
        assert!(parse_users("1:50:159:female:2,1:55:180:male:2").is_err());
    }

    #[test]
    fn skips_empty_entries() {
        let users = parse_users("1:50:159:f:2,,").unwrap();
        assert_eq!(users.len(), 1);
    }
}

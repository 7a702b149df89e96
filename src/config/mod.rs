use std::env;

/// Runtime tuning for the batch schedulers, loaded from the environment.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Page size used when the reminder scheduler walks the contract set.
    pub reminder_page_size: usize,
    /// Interval applied when a partner has no reminder interval configured.
    pub default_reminder_interval_days: i64,
}

impl EngineConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let reminder_page_size = read_number("LEASE_REMINDER_PAGE_SIZE", 200)?;
        let default_reminder_interval_days =
            read_number("LEASE_DEFAULT_REMINDER_INTERVAL_DAYS", 3)?;

        if default_reminder_interval_days < 1 {
            return Err(ConfigError::OutOfRange {
                var: "LEASE_DEFAULT_REMINDER_INTERVAL_DAYS",
            });
        }

        Ok(Self {
            reminder_page_size: reminder_page_size as usize,
            default_reminder_interval_days,
        })
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reminder_page_size: 200,
            default_reminder_interval_days: 3,
        }
    }
}

fn read_number(var: &'static str, fallback: i64) -> Result<i64, ConfigError> {
    match env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<i64>()
            .map_err(|_| ConfigError::InvalidNumber { var }),
        Err(_) => Ok(fallback),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be an integer")]
    InvalidNumber { var: &'static str },
    #[error("{var} is out of range")]
    OutOfRange { var: &'static str },
}

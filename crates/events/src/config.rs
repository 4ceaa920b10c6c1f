//! Environment-driven configuration for the notification engine.
//!
//! Every struct has a `from_env` constructor; unset variables fall back to
//! the documented defaults and malformed values are rejected with
//! [`CoreError::Validation`].

use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;
use finpulse_core::error::CoreError;
use finpulse_core::schedule::{parse_timezone, CronSchedule};

use crate::delivery::email::EmailConfig;

/// Read `key` and parse it, falling back to `default` when unset.
fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T, CoreError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| CoreError::Validation(format!("{key} has an invalid value '{raw}'"))),
        Err(_) => Ok(default),
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

// ---------------------------------------------------------------------------
// Hub
// ---------------------------------------------------------------------------

/// Default capacity of each registry command channel.
pub const DEFAULT_HUB_COMMAND_BUFFER: usize = 256;

/// Connection registry configuration.
#[derive(Debug, Clone, Copy)]
pub struct HubConfig {
    /// Capacity of the register, unregister, and broadcast channels.
    pub command_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            command_buffer: DEFAULT_HUB_COMMAND_BUFFER,
        }
    }
}

impl HubConfig {
    /// | Env Var              | Default |
    /// |----------------------|---------|
    /// | `HUB_COMMAND_BUFFER` | `256`   |
    pub fn from_env() -> Result<Self, CoreError> {
        let command_buffer = env_parse("HUB_COMMAND_BUFFER", DEFAULT_HUB_COMMAND_BUFFER)?;
        if command_buffer == 0 {
            return Err(CoreError::Validation(
                "HUB_COMMAND_BUFFER must be greater than zero".into(),
            ));
        }
        Ok(Self { command_buffer })
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;
pub const DEFAULT_WRITE_WAIT: Duration = Duration::from_secs(10);
pub const DEFAULT_PONG_WAIT: Duration = Duration::from_secs(60);
pub const DEFAULT_PING_PERIOD: Duration = Duration::from_secs(54);

/// Per-connection timing and queue limits.
#[derive(Debug, Clone, Copy)]
pub struct ClientConfig {
    /// Capacity of the bounded outbound queue. A full queue evicts the
    /// client.
    pub outbound_buffer: usize,
    /// Maximum time a single frame write may take.
    pub write_wait: Duration,
    /// Read deadline, renewed by every pong.
    pub pong_wait: Duration,
    /// Keepalive cadence. Always strictly below `pong_wait`.
    pub ping_period: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            write_wait: DEFAULT_WRITE_WAIT,
            pong_wait: DEFAULT_PONG_WAIT,
            ping_period: DEFAULT_PING_PERIOD,
        }
    }
}

impl ClientConfig {
    pub fn new(
        outbound_buffer: usize,
        write_wait: Duration,
        pong_wait: Duration,
        ping_period: Duration,
    ) -> Result<Self, CoreError> {
        if outbound_buffer == 0 {
            return Err(CoreError::Validation(
                "outbound buffer must be greater than zero".into(),
            ));
        }
        if write_wait.is_zero() {
            return Err(CoreError::Validation(
                "write wait must be greater than zero".into(),
            ));
        }
        if ping_period.is_zero() || ping_period >= pong_wait {
            return Err(CoreError::Validation(format!(
                "ping period ({ping_period:?}) must be non-zero and shorter than \
                 pong wait ({pong_wait:?})"
            )));
        }
        Ok(Self {
            outbound_buffer,
            write_wait,
            pong_wait,
            ping_period,
        })
    }

    /// | Env Var               | Default |
    /// |-----------------------|---------|
    /// | `WS_OUTBOUND_BUFFER`  | `256`   |
    /// | `WS_WRITE_WAIT_SECS`  | `10`    |
    /// | `WS_PONG_WAIT_SECS`   | `60`    |
    /// | `WS_PING_PERIOD_SECS` | `54`    |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::new(
            env_parse("WS_OUTBOUND_BUFFER", DEFAULT_OUTBOUND_BUFFER)?,
            Duration::from_secs(env_parse("WS_WRITE_WAIT_SECS", DEFAULT_WRITE_WAIT.as_secs())?),
            Duration::from_secs(env_parse("WS_PONG_WAIT_SECS", DEFAULT_PONG_WAIT.as_secs())?),
            Duration::from_secs(env_parse(
                "WS_PING_PERIOD_SECS",
                DEFAULT_PING_PERIOD.as_secs(),
            )?),
        )
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub const DEFAULT_TIMEZONE: &str = "UTC";
pub const DEFAULT_DAILY_REPORT_CRON: &str = "0 0 8 * * *";
pub const DEFAULT_WEEKLY_REPORT_CRON: &str = "0 0 8 * * Mon";
pub const DEFAULT_MONTHLY_REPORT_CRON: &str = "0 0 8 1 * *";
pub const DEFAULT_RULE_SWEEP_CRON: &str = "0 */5 * * * *";

/// Cadence of the scheduler's fixed jobs.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Wall-clock zone the cron expressions are evaluated in.
    pub timezone: Tz,
    pub daily_report: CronSchedule,
    pub weekly_report: CronSchedule,
    pub monthly_report: CronSchedule,
    pub rule_sweep: CronSchedule,
}

impl SchedulerConfig {
    pub fn new(
        timezone: &str,
        daily_report: &str,
        weekly_report: &str,
        monthly_report: &str,
        rule_sweep: &str,
    ) -> Result<Self, CoreError> {
        Ok(Self {
            timezone: parse_timezone(timezone)?,
            daily_report: CronSchedule::parse(daily_report)?,
            weekly_report: CronSchedule::parse(weekly_report)?,
            monthly_report: CronSchedule::parse(monthly_report)?,
            rule_sweep: CronSchedule::parse(rule_sweep)?,
        })
    }

    /// The built-in cadence: reports at 08:00 UTC, rule sweep every five
    /// minutes.
    pub fn standard() -> Result<Self, CoreError> {
        Self::new(
            DEFAULT_TIMEZONE,
            DEFAULT_DAILY_REPORT_CRON,
            DEFAULT_WEEKLY_REPORT_CRON,
            DEFAULT_MONTHLY_REPORT_CRON,
            DEFAULT_RULE_SWEEP_CRON,
        )
    }

    /// | Env Var                         | Default          |
    /// |---------------------------------|------------------|
    /// | `SCHEDULER_TIMEZONE`            | `UTC`            |
    /// | `SCHEDULER_DAILY_REPORT_CRON`   | `0 0 8 * * *`    |
    /// | `SCHEDULER_WEEKLY_REPORT_CRON`  | `0 0 8 * * Mon`  |
    /// | `SCHEDULER_MONTHLY_REPORT_CRON` | `0 0 8 1 * *`    |
    /// | `SCHEDULER_RULE_SWEEP_CRON`     | `0 */5 * * * *`  |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::new(
            &env_string("SCHEDULER_TIMEZONE", DEFAULT_TIMEZONE),
            &env_string("SCHEDULER_DAILY_REPORT_CRON", DEFAULT_DAILY_REPORT_CRON),
            &env_string("SCHEDULER_WEEKLY_REPORT_CRON", DEFAULT_WEEKLY_REPORT_CRON),
            &env_string("SCHEDULER_MONTHLY_REPORT_CRON", DEFAULT_MONTHLY_REPORT_CRON),
            &env_string("SCHEDULER_RULE_SWEEP_CRON", DEFAULT_RULE_SWEEP_CRON),
        )
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Everything the engine reads from the environment.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub hub: HubConfig,
    pub client: ClientConfig,
    pub scheduler: SchedulerConfig,
    /// `None` when `SMTP_HOST` is unset.
    pub email: Option<EmailConfig>,
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, CoreError> {
        Ok(Self {
            hub: HubConfig::from_env()?,
            client: ClientConfig::from_env()?,
            scheduler: SchedulerConfig::from_env()?,
            email: EmailConfig::from_env(),
        })
    }
}

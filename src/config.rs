//! Configuration types, read from the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::gateway::{ChannelId, MemberId, RoleId};

/// Default prefix of onboarding channel names.
pub const DEFAULT_WELCOME_PREFIX: &str = "👋welcome-";

/// Person members are told to contact when stuck.
pub const DEFAULT_HELP_CONTACT: u64 = 425_243_762_151_915_523;

fn required(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn required_id(key: &str) -> Result<u64, ConfigError> {
    parse_value(key, &required(key)?)
}

fn optional<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => parse_value(key, &raw).map(Some),
        _ => Ok(None),
    }
}

fn optional_secs(key: &str, default: u64) -> Result<Duration, ConfigError> {
    Ok(Duration::from_secs(optional(key)?.unwrap_or(default)))
}

/// Where onboarding channels live in the guild.
#[derive(Debug, Clone)]
pub struct GuildConfig {
    pub guild_id: u64,
    /// Category new onboarding channels are created under.
    pub category_id: ChannelId,
    /// The @everyone role, denied visibility of onboarding channels.
    pub everyone_role: RoleId,
}

/// Roles granted during and after onboarding.
#[derive(Debug, Clone)]
pub struct RoleConfig {
    pub regular_member: RoleId,
    pub pro: RoleId,
    /// Unlocks the #introduce-yourself channel before the final step.
    pub introductions: RoleId,
}

/// Settings of the step sequencer.
#[derive(Debug, Clone)]
pub struct OnboardingConfig {
    pub channel_prefix: String,
    pub roles: RoleConfig,
    /// Interval between checks of an external condition (avatar, linked account).
    pub poll_interval: Duration,
    /// How many messages to read back when re-deriving a step from history.
    pub history_limit: u8,
    pub help_contact: MemberId,
    pub avatar_example: Option<PathBuf>,
}

impl OnboardingConfig {
    /// Defaults suitable for tests; role ids are placeholders.
    pub fn with_roles(roles: RoleConfig) -> Self {
        Self {
            channel_prefix: DEFAULT_WELCOME_PREFIX.to_string(),
            roles,
            poll_interval: Duration::from_secs(1),
            history_limit: 50,
            help_contact: MemberId(DEFAULT_HELP_CONTACT),
            avatar_example: None,
        }
    }
}

/// Escalation thresholds of the watchdog, measured from the current question.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    pub interval: Duration,
    pub help_after: Duration,
    pub warn_after: Duration,
    pub kick_after: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            help_after: Duration::from_secs(30),
            warn_after: Duration::from_secs(360), // 6 minutes
            kick_after: Duration::from_secs(540), // 9 minutes
        }
    }
}

impl WatchdogConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            interval: optional_secs("WATCHDOG_INTERVAL_SECS", defaults.interval.as_secs())?,
            help_after: optional_secs("WATCHDOG_HELP_SECS", defaults.help_after.as_secs())?,
            warn_after: optional_secs("WATCHDOG_WARN_SECS", defaults.warn_after.as_secs())?,
            kick_after: optional_secs("WATCHDOG_KICK_SECS", defaults.kick_after.as_secs())?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Thresholds must be strictly increasing: help < warn < kick.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.help_after < self.warn_after && self.warn_after < self.kick_after {
            Ok(())
        } else {
            Err(ConfigError::InvalidValue {
                key: "WATCHDOG_*_SECS".into(),
                message: format!(
                    "thresholds must increase: help {:?}, warn {:?}, kick {:?}",
                    self.help_after, self.warn_after, self.kick_after
                ),
            })
        }
    }
}

/// ConvertKit credentials and ids.
#[derive(Debug, Clone)]
pub struct ConvertKitConfig {
    pub base_url: String,
    pub api_key: SecretString,
    pub api_secret: SecretString,
    pub tag_id: String,
    pub form_id: String,
}

impl ConvertKitConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: std::env::var("CONVERT_KIT_BASE_URL")
                .unwrap_or_else(|_| "https://api.convertkit.com".to_string()),
            api_key: SecretString::from(required("CONVERT_KIT_API_KEY")?),
            api_secret: SecretString::from(required("CONVERT_KIT_API_SECRET")?),
            tag_id: required("CONVERT_KIT_TAG_ID")?,
            form_id: required("CONVERT_KIT_FORM_ID")?,
        })
    }
}

/// Full bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub discord_token: SecretString,
    pub guild: GuildConfig,
    pub onboarding: OnboardingConfig,
    pub watchdog: WatchdogConfig,
    pub convertkit: ConvertKitConfig,
    pub identity_database_url: SecretString,
    pub session_db_path: PathBuf,
    pub karma_channel: Option<ChannelId>,
    pub status_port: Option<u16>,
    pub log_dir: Option<PathBuf>,
}

impl BotConfig {
    /// Read the configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let guild_id = required_id("GUILD_ID")?;
        let guild = GuildConfig {
            guild_id,
            category_id: ChannelId(required_id("ONBOARDING_CATEGORY_ID")?),
            // In Discord the @everyone role shares the guild's id.
            everyone_role: RoleId(optional("EVERYONE_ROLE_ID")?.unwrap_or(guild_id)),
        };

        let roles = RoleConfig {
            regular_member: RoleId(required_id("REGULAR_MEMBER_ROLE_ID")?),
            pro: RoleId(required_id("PRO_ROLE_ID")?),
            introductions: RoleId(required_id("UNLOCKED_INTRODUCTIONS_CHANNEL_ROLE_ID")?),
        };

        let onboarding = OnboardingConfig {
            channel_prefix: std::env::var("WELCOME_PREFIX")
                .unwrap_or_else(|_| DEFAULT_WELCOME_PREFIX.to_string()),
            roles,
            poll_interval: optional_secs("POLL_INTERVAL_SECS", 1)?,
            history_limit: 50,
            help_contact: MemberId(optional("HELP_CONTACT_ID")?.unwrap_or(DEFAULT_HELP_CONTACT)),
            avatar_example: optional::<PathBuf>("AVATAR_EXAMPLE_PATH")?,
        };

        Ok(Self {
            discord_token: SecretString::from(required("DISCORD_TOKEN")?),
            guild,
            onboarding,
            watchdog: WatchdogConfig::from_env()?,
            convertkit: ConvertKitConfig::from_env()?,
            identity_database_url: SecretString::from(required("PG_URI")?),
            session_db_path: std::env::var("WELCOME_BOT_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data/welcome-bot.db")),
            karma_channel: optional("KARMA_NOTIFICATIONS_CHANNEL_ID")?.map(ChannelId),
            status_port: optional("WELCOME_BOT_STATUS_PORT")?,
            log_dir: optional::<PathBuf>("WELCOME_BOT_LOG_DIR")?,
        })
    }
}

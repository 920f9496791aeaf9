//! Error types for the welcome bot.

/// Top-level error type for the bot.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Identity store error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Tagging error: {0}")]
    Tagging(#[from] TaggingError),

    #[error("Onboarding error: {0}")]
    Onboarding(#[from] OnboardingError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Chat platform errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Request {operation} failed: {reason}")]
    RequestFailed { operation: String, reason: String },

    #[error("Missing permission for {operation}: {reason}")]
    PermissionDenied { operation: String, reason: String },

    #[error("Channel {0} not found")]
    ChannelNotFound(u64),

    #[error("Failed to read attachment {path}: {reason}")]
    Attachment { path: String, reason: String },
}

/// Identity store errors.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Identity store connection failed: {0}")]
    Connection(String),

    #[error("Identity lookup for member {member_id} failed: {reason}")]
    LookupFailed { member_id: u64, reason: String },
}

/// Marketing/tagging API errors.
#[derive(Debug, thiserror::Error)]
pub enum TaggingError {
    #[error("Tagging request to {endpoint} failed: {reason}")]
    RequestFailed { endpoint: String, reason: String },

    #[error("Tagging API returned {status} for {endpoint}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Invalid tagging API response: {0}")]
    InvalidResponse(String),
}

/// Step sequencing errors.
#[derive(Debug, thiserror::Error)]
pub enum OnboardingError {
    #[error("No catalog step matches the latest question in channel {channel}: {question:?}")]
    NoMatchingStep { channel: String, question: String },

    #[error("Channel {0} is not an onboarding channel")]
    NotAnOnboardingChannel(String),

    #[error("Step index {0} is outside the catalog")]
    StepOutOfRange(usize),

    #[error("Member {0} is no longer in the guild")]
    MemberNotFound(u64),

    #[error("Onboarding of member {member_id} in channel {channel_id} is closed")]
    SessionClosed { member_id: u64, channel_id: u64 },
}

/// Result type alias for the bot.
pub type Result<T> = std::result::Result<T, Error>;

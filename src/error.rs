use thiserror::Error;

/// Main error type for the marketplace
#[derive(Error, Debug)]
pub enum MarketError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Request errors
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Carries the internal reason for logs; callers only ever see "invalid signature".
    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Not eligible: {0}")]
    Eligibility(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Signal already settled: {0}")]
    AlreadySettled(String),

    #[error("Already voted: {0}")]
    DuplicateVote(String),

    // Access tier errors
    #[error("Insufficient balance: required {required}, held {held}")]
    InsufficientBalance { required: i64, held: i64 },

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Invalid tier configuration: {0}")]
    InvalidTierConfiguration(String),

    // Collaborator errors
    #[error("Dependency unavailable: {dependency} - {reason}")]
    Dependency {
        dependency: &'static str,
        reason: String,
    },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl MarketError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn dependency(dependency: &'static str, reason: impl ToString) -> Self {
        Self::Dependency {
            dependency,
            reason: reason.to_string(),
        }
    }

    /// HTTP status code this error maps to at the API boundary
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Authentication(_) => 401,
            Self::Eligibility(_) | Self::InsufficientBalance { .. } => 403,
            Self::NotFound { .. } => 404,
            Self::Conflict(_) | Self::AlreadySettled(_) | Self::DuplicateVote(_) => 409,
            Self::QuotaExceeded(_) => 402,
            Self::Dependency { .. } => 503,
            _ => 500,
        }
    }

    /// Message safe to show to API callers
    pub fn public_message(&self) -> String {
        match self {
            Self::Authentication(_) => "invalid signature".to_string(),
            e if e.status_code() >= 500 && !matches!(e, Self::Dependency { .. }) => {
                "internal server error".to_string()
            }
            e => e.to_string(),
        }
    }
}

/// Result type alias for MarketError
pub type Result<T> = std::result::Result<T, MarketError>;

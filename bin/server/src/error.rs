//! Errors raised while bringing the server up.

use std::fmt;

/// Startup failures. Each is fatal.
#[derive(Debug)]
pub enum StartupError {
    /// Configuration could not be loaded from the environment.
    Configuration { details: String },
    /// The identity provider settings are unusable.
    Provider { details: String },
    /// Database connection failed.
    Database { details: String },
    /// A migration could not be applied.
    Migration { details: String },
    /// The RBAC tables could not be read.
    PermissionModel { details: String },
    /// The listener could not be bound or the server stopped with an error.
    Serve { details: String },
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration { details } => write!(f, "failed to load configuration: {details}"),
            Self::Provider { details } => {
                write!(f, "invalid identity provider configuration: {details}")
            }
            Self::Database { details } => write!(f, "failed to connect to database: {details}"),
            Self::Migration { details } => write!(f, "failed to run migrations: {details}"),
            Self::PermissionModel { details } => {
                write!(f, "failed to load permission model: {details}")
            }
            Self::Serve { details } => write!(f, "server error: {details}"),
        }
    }
}

impl std::error::Error for StartupError {}

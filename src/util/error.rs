use std::path::PathBuf;
use thiserror::Error;

/// Problems with the config file. These all happen before we've touched
/// the database, so they're basically always fatal.
#[derive(Debug, Error)]
pub enum ConfError {
    #[error("couldn't read config file {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("couldn't parse config file {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("unsupported database url ({0}); only sqlite: urls are supported")]
    UnsupportedUrl(String),

    // The generated code for returning an error is cheaper than maybe panicking.
    #[error("a prior check guaranteed that this error would never happen.")]
    Impossible,
}

/// Everything that can go wrong between a caller and the books table.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("failed to load database properties")]
    Config(#[from] ConfError),

    #[error("couldn't connect to database at {url}")]
    Connect {
        url: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("no open database connection")]
    NotConnected,

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

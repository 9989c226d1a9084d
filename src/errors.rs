//! Watcher Error Hierarchy
//!
//! Defines error types for the fan-out engine, categorized by the layer
//! they originate from: observer lifecycle, backing store, configuration.

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

/// Every error the crate surfaces to callers.
///
/// The whole hierarchy is `Clone`: the loop publishes its terminal error
/// once through a watch channel and every observer hands out its own copy.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The observer, or the whole watcher loop, was stopped.
    #[error("state watcher was stopped")]
    Stopped,

    /// Backing store failures. These kill the loop.
    #[error(transparent)]
    Backing(#[from] BackingError),

    /// Configuration validation failures.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    /// True iff this error means the watcher was stopped cleanly rather
    /// than killed by a backing failure.
    pub fn is_stopped(&self) -> bool {
        matches!(self, Error::Stopped)
    }
}

/// Fatal failures of the backing store contract.
///
/// Not-found during a fetch is deliberately absent: it is not an error,
/// the loop transforms it into a removal.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackingError {
    /// The initial full load into the snapshot failed.
    #[error("initial load from backing store failed: {0}")]
    LoadFailed(String),

    /// A per-id fetch failed for a reason other than not-found.
    #[error("fetch of {collection}/{key} failed: {reason}")]
    FetchFailed {
        collection: String,
        key: String,
        reason: String,
    },

    /// Subscribing to the change stream failed.
    #[error("change subscription failed: {0}")]
    SubscribeFailed(String),

    /// The change stream closed while the loop was running. The backing
    /// is the source of truth, so a silent stream death must force every
    /// observer to reconnect.
    #[error("backing change stream closed unexpectedly")]
    ChangeStreamClosed,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },

    #[error("configuration load failed: {0}")]
    Load(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Load(e.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Config(e.into())
    }
}

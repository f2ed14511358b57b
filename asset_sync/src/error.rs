//! Error taxonomy of the sync pipeline.

use market_data_ingestor::providers::ProviderError;
use thiserror::Error;

use crate::{store::StoreError, writer::WriteError};

/// Failure of one pipeline step for one symbol.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The store rejected or could not serve a call.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A batch write failed part-way.
    #[error(transparent)]
    Write(#[from] WriteError),

    /// The external market-data source failed.
    #[error("external source failed for {symbol}: {source}")]
    ExternalSource {
        /// Symbol being fetched.
        symbol: String,
        /// Provider error.
        #[source]
        source: ProviderError,
    },

    /// A value from an external source could not be used.
    #[error("invalid {field} for {symbol}: {value:?}")]
    Validation {
        /// Symbol being processed.
        symbol: String,
        /// Field name.
        field: &'static str,
        /// Raw value.
        value: String,
    },
}

impl SyncError {
    /// `true` when the failure means storage is unreachable rather than a
    /// per-symbol problem.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            SyncError::Store(StoreError::Connection(_))
                | SyncError::Write(WriteError {
                    source: StoreError::Connection(_),
                    ..
                })
        )
    }
}

use finpulse_core::error::CoreError;

/// Error returned by every store operation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A database error from sqlx.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A domain rule rejected the operation (missing row, invalid
    /// transition, invalid stored value).
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Wrap a domain error raised while decoding a row.
pub(crate) fn decode_error(err: CoreError) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(err))
}

pub(crate) type Result<T> = std::result::Result<T, CatalogError>;

#[derive(Debug, thiserror::Error)]
pub(crate) enum CatalogError {
    /// Missing or unusable input; the operation was not attempted.
    #[error("{0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store failure: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("upstream request failed: {0}")]
    Upstream(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0} not set on server")]
    MissingCredential(&'static str),
}

impl CatalogError {
    /// HTTP status used when the error reaches an API caller.
    pub(crate) fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound(_) => 404,
            Self::Store(_)
            | Self::Io(_)
            | Self::Upstream(_)
            | Self::Config(_)
            | Self::MissingCredential(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(CatalogError::Validation("missing file".into()).status_code(), 400);
        assert_eq!(CatalogError::NotFound("a.pdf".into()).status_code(), 404);
        assert_eq!(
            CatalogError::Store(rusqlite::Error::InvalidQuery).status_code(),
            500
        );
    }

    #[test]
    fn test_validation_message_is_bare() {
        let err = CatalogError::Validation("missing prompt".into());
        assert_eq!(err.to_string(), "missing prompt");
    }
}

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlacementError {
    #[error("widget '{id}' cannot be placed at the requested cells")]
    PlacementFailed { id: String },
    #[error("no available space for a copy of widget '{id}'")]
    NoAvailableSpace { id: String },
    #[error("widget '{0}' not found")]
    NotFound(String),
    #[error("widget id '{0}' already exists")]
    DuplicateId(String),
    #[error("invalid widget: {0}")]
    InvalidWidget(String),
    #[error("widget '{0}' is locked")]
    Locked(String),
}

impl PlacementError {
    pub fn code(&self) -> &'static str {
        match self {
            PlacementError::PlacementFailed { .. } => "PLACEMENT_FAILED",
            PlacementError::NoAvailableSpace { .. } => "NO_AVAILABLE_SPACE",
            PlacementError::NotFound(_) => "NOT_FOUND",
            PlacementError::DuplicateId(_) => "DUPLICATE_ID",
            PlacementError::InvalidWidget(_) => "INVALID_WIDGET",
            PlacementError::Locked(_) => "LOCKED",
        }
    }
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("missing deviceId")]
    MissingDeviceId,
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
    #[error("unknown kiosk: {0}")]
    UnknownKiosk(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FleetError {
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            FleetError::MissingDeviceId
                | FleetError::UnknownKiosk(_)
                | FleetError::InvalidSnapshot(_)
        )
    }
}

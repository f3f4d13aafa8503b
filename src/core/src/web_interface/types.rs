use serde::{Deserialize, Serialize};

/// API error payload
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub backend: &'static str,
}

/// Query string of `POST /predict`
#[derive(Debug, Deserialize)]
pub struct PredictQuery {
    pub s3_key: String,
}

//! Object storage connection settings.

use serde::{Deserialize, Serialize};

/// Settings applied to every `s3://` backend.
///
/// Unset fields fall back to the standard `AWS_*` environment variables read
/// by the S3 client builder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectStorageConfig {
    /// S3/MinIO endpoint URL
    pub endpoint: Option<String>,
    /// AWS region (use "us-east-1" for MinIO)
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Allow plain HTTP endpoints (local MinIO)
    pub allow_http: bool,
}

impl ObjectStorageConfig {
    /// Read `S3_ENDPOINT`, `S3_REGION`, `S3_ACCESS_KEY`, `S3_SECRET_KEY` and
    /// `S3_ALLOW_HTTP`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("S3_ENDPOINT") {
            config.endpoint = Some(val);
        }

        if let Ok(val) = std::env::var("S3_REGION") {
            config.region = Some(val);
        }

        if let Ok(val) = std::env::var("S3_ACCESS_KEY") {
            config.access_key_id = Some(val);
        }

        if let Ok(val) = std::env::var("S3_SECRET_KEY") {
            config.secret_access_key = Some(val);
        }

        if let Ok(val) = std::env::var("S3_ALLOW_HTTP") {
            config.allow_http = val.to_lowercase() == "true" || val == "1";
        }

        config
    }
}

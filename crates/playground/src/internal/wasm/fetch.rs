use bytes::Bytes;
use tracing::info;

use crate::{config::RuntimeSource, error::LoadError};

/// Fetch the runtime artifact. Each call performs exactly one request.
pub async fn fetch_artifact(
    source: &RuntimeSource,
    client: &reqwest::Client,
) -> Result<Bytes, LoadError> {
    let fetch_error = |reason: String| LoadError::Fetch {
        location: source.to_string(),
        reason,
    };

    let bytes = match source {
        RuntimeSource::Remote(url) => {
            let response = client
                .get(url.clone())
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|e| fetch_error(e.to_string()))?;
            response
                .bytes()
                .await
                .map_err(|e| fetch_error(e.to_string()))?
        }
        RuntimeSource::Local(path) => tokio::fs::read(path)
            .await
            .map(Bytes::from)
            .map_err(|e| fetch_error(e.to_string()))?,
    };

    info!(source = %source, bytes = bytes.len(), "Runtime artifact fetched");
    Ok(bytes)
}

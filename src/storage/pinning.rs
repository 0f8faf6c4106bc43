//! Pinning service client
//!
//! Writes go through the Pinata pinning API (`pinFileToIPFS` and
//! `pinJSONToIPFS`); reads go through an IPFS HTTP gateway. Nothing is cached
//! locally and nothing is retried.

use super::{ByteStream, ContentAddress, ContentStore, Payload, StorageError, StorageResult};
use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Pinning backend configuration
#[derive(Debug, Clone)]
pub struct PinningConfig {
    /// Pinning API base, e.g. `https://api.pinata.cloud`
    pub api_url: String,
    /// Gateway prefix, e.g. `https://gateway.pinata.cloud/ipfs/`
    pub gateway_url: String,
    pub api_key: String,
    pub api_secret: String,
    /// Connect timeout and idle limit between body reads; a transfer that
    /// keeps making progress is never cut off
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct PinResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: String,
}

/// Content store backed by a pinning service
pub struct PinningStore {
    http: Client,
    config: PinningConfig,
}

impl PinningStore {
    pub fn new(config: PinningConfig) -> StorageResult<Self> {
        let http = Client::builder()
            .connect_timeout(config.timeout)
            .read_timeout(config.timeout)
            .build()
            .map_err(|e| StorageError::Client(e.to_string()))?;
        Ok(Self { http, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.api_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("pinata_api_key", &self.config.api_key)
            .header("pinata_secret_api_key", &self.config.api_secret)
    }

    async fn pin_part(&self, part: Part, name: &str) -> StorageResult<ContentAddress> {
        let form = Form::new()
            .part("file", part)
            .text("pinataMetadata", json!({ "name": name }).to_string());

        let request = self
            .authorized(self.http.post(self.endpoint("pinning/pinFileToIPFS")))
            .multipart(form);
        let response = request.send().await.map_err(upload_error)?;
        read_pin_response(response).await
    }

    async fn pin_json(&self, content: serde_json::Value, name: &str) -> StorageResult<ContentAddress> {
        let body = json!({
            "pinataContent": content,
            "pinataMetadata": { "name": name },
        });

        let request = self
            .authorized(self.http.post(self.endpoint("pinning/pinJSONToIPFS")))
            .json(&body);
        let response = request.send().await.map_err(upload_error)?;
        read_pin_response(response).await
    }

    fn content_url(&self, address: &ContentAddress) -> String {
        format!("{}{}", self.config.gateway_url, address)
    }
}

#[async_trait]
impl ContentStore for PinningStore {
    async fn put(&self, payload: Payload, name: &str) -> StorageResult<ContentAddress> {
        match payload {
            Payload::File(path) => {
                let file = tokio::fs::File::open(&path)
                    .await
                    .map_err(|e| StorageError::Upload(format!("cannot open {:?}: {}", path, e)))?;
                let len = file
                    .metadata()
                    .await
                    .map_err(|e| StorageError::Upload(format!("cannot stat {:?}: {}", path, e)))?
                    .len();
                let part = Part::stream_with_length(Body::from(file), len).file_name(name.to_string());
                self.pin_part(part, name).await
            }
            Payload::Bytes(bytes) => {
                let part = Part::bytes(bytes.to_vec()).file_name(name.to_string());
                self.pin_part(part, name).await
            }
            Payload::Json(value) => self.pin_json(value, name).await,
        }
    }

    async fn get(&self, address: &ContentAddress) -> StorageResult<ByteStream> {
        let response = self
            .http
            .get(self.content_url(address))
            .send()
            .await
            .map_err(|e| StorageError::Download(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(Box::pin(
                response
                    .bytes_stream()
                    .map_err(|e| StorageError::Download(e.to_string())),
            )),
            StatusCode::NOT_FOUND => Err(StorageError::NotFound(address.clone())),
            status => Err(StorageError::Download(format!(
                "gateway returned {} for {}",
                status, address
            ))),
        }
    }

    async fn exists(&self, address: &ContentAddress) -> StorageResult<bool> {
        let response = self
            .http
            .head(self.content_url(address))
            .send()
            .await
            .map_err(|e| StorageError::Download(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(StorageError::Download(format!(
                "gateway returned {} probing {}",
                status, address
            ))),
        }
    }

    fn gateway_url(&self, address: &ContentAddress) -> String {
        self.content_url(address)
    }
}

fn upload_error(e: reqwest::Error) -> StorageError {
    if e.is_timeout() {
        StorageError::Upload(format!("pinning service timed out: {}", e))
    } else {
        StorageError::Upload(e.to_string())
    }
}

async fn read_pin_response(response: Response) -> StorageResult<ContentAddress> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        log::warn!("Pinning service rejected upload ({}): {}", status, body);
        return Err(StorageError::Upload(format!(
            "pinning service returned {}",
            status
        )));
    }

    let pinned: PinResponse = response
        .json()
        .await
        .map_err(|e| StorageError::Upload(format!("unreadable pin response: {}", e)))?;
    ContentAddress::parse(pinned.ipfs_hash)
        .map_err(|e| StorageError::Upload(format!("pinning service returned {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(api_url: &str) -> PinningStore {
        PinningStore::new(PinningConfig {
            api_url: api_url.to_string(),
            gateway_url: "https://gateway.example/ipfs/".to_string(),
            api_key: "key".to_string(),
            api_secret: "secret".to_string(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn test_endpoint_joins_cleanly() {
        assert_eq!(
            store("https://api.example/").endpoint("/pinning/pinJSONToIPFS"),
            "https://api.example/pinning/pinJSONToIPFS"
        );
        assert_eq!(
            store("https://api.example").endpoint("pinning/pinFileToIPFS"),
            "https://api.example/pinning/pinFileToIPFS"
        );
    }

    #[test]
    fn test_gateway_url() {
        let address = ContentAddress::parse("QmTest").unwrap();
        assert_eq!(
            store("https://api.example").gateway_url(&address),
            "https://gateway.example/ipfs/QmTest"
        );
    }

    #[test]
    fn test_pin_response_shape() {
        let pinned: PinResponse = serde_json::from_str(
            r#"{"IpfsHash":"QmXyz","PinSize":12,"Timestamp":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(pinned.ipfs_hash, "QmXyz");
    }
}

//! Typed reqwest wrapper for the kDrive files API.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use super::models::{ApiResponse, CreatedFile, DownloadLink, DriveEntry};
use crate::error::ProxyError;

const KDRIVE_API_BASE: &str = "https://api.infomaniak.com/3/drive";

/// HTTP client for one kDrive. Every call takes the caller's access token.
pub struct KDriveClient {
    http: reqwest::Client,
    base_url: String,
    drive_id: String,
}

impl KDriveClient {
    pub fn new(drive_id: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: KDRIVE_API_BASE.to_string(),
            drive_id: drive_id.to_string(),
        }
    }

    /// Override the base URL (for testing with wiremock).
    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    fn files_url(&self) -> String {
        format!("{}/{}/files", self.base_url, self.drive_id)
    }

    fn file_url(&self, file_id: i64) -> String {
        format!("{}/{}", self.files_url(), file_id)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<T, ProxyError> {
        let resp = req.send().await?;

        if !resp.status().is_success() {
            return Err(ProxyError::from_drive_response(resp).await);
        }

        resp.json::<T>()
            .await
            .map_err(|e| ProxyError::Http(format!("unexpected drive response: {e}")))
    }

    /// List children of `folder_id`, or of the drive root when `None`.
    pub async fn list_children(
        &self,
        token: &str,
        folder_id: Option<i64>,
    ) -> Result<Vec<DriveEntry>, ProxyError> {
        let url = match folder_id {
            Some(id) => format!("{}/files", self.file_url(id)),
            None => self.files_url(),
        };

        let resp: ApiResponse<Option<Vec<DriveEntry>>> =
            self.send(self.http.get(url).bearer_auth(token)).await?;
        Ok(resp.data.unwrap_or_default())
    }

    /// Ask the drive for a short-lived download URL for `file_id`.
    pub async fn download_url(&self, token: &str, file_id: i64) -> Result<String, ProxyError> {
        let resp: ApiResponse<DownloadLink> = self
            .send(
                self.http
                    .get(format!("{}/download", self.file_url(file_id)))
                    .bearer_auth(token),
            )
            .await?;
        Ok(resp.data.url)
    }

    /// Fetch a download URL. The URL is pre-signed, so no credentials are sent.
    pub async fn fetch_content(&self, url: &str) -> Result<String, ProxyError> {
        let resp = self.http.get(url).send().await?;

        if !resp.status().is_success() {
            return Err(ProxyError::from_drive_response(resp).await);
        }

        Ok(resp.text().await?)
    }

    /// Replace the body of `file_id` with `bytes`.
    pub async fn upload(
        &self,
        token: &str,
        file_id: i64,
        bytes: Vec<u8>,
    ) -> Result<Value, ProxyError> {
        self.send(
            self.http
                .post(format!("{}/upload", self.file_url(file_id)))
                .bearer_auth(token)
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(bytes),
        )
        .await
    }

    /// Create an empty file named `name` in `folder_id`.
    ///
    /// Returns the raw response and the new file id.
    pub async fn create_file(
        &self,
        token: &str,
        folder_id: i64,
        name: &str,
    ) -> Result<(Value, i64), ProxyError> {
        let raw: Value = self
            .send(
                self.http
                    .post(format!("{}/file", self.file_url(folder_id)))
                    .bearer_auth(token)
                    .json(&json!({ "name": name })),
            )
            .await?;

        let created: ApiResponse<CreatedFile> = serde_json::from_value(raw.clone())
            .map_err(|e| ProxyError::Http(format!("create response without file id: {e}")))?;

        Ok((raw, created.data.id))
    }

    pub async fn delete(&self, token: &str, file_id: i64) -> Result<(), ProxyError> {
        let resp = self
            .http
            .delete(self.file_url(file_id))
            .bearer_auth(token)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ProxyError::from_drive_response(resp).await);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{bearer_token, body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup() -> (MockServer, KDriveClient) {
        let server = MockServer::start().await;
        let client = KDriveClient::new("42").with_base_url(&server.uri());
        (server, client)
    }

    #[tokio::test]
    async fn root_listing_uses_files_endpoint() {
        let (server, client) = setup().await;
        Mock::given(method("GET"))
            .and(path("/42/files"))
            .and(bearer_token("tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "result": "success",
                "data": [{"id": 1, "name": "A", "type": "dir"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let entries = client.list_children("tok", None).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "A");
    }

    #[tokio::test]
    async fn null_listing_is_empty() {
        let (server, client) = setup().await;
        Mock::given(method("GET"))
            .and(path("/42/files/7/files"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "result": "success", "data": null })),
            )
            .mount(&server)
            .await;

        assert!(client.list_children("tok", Some(7)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_file_posts_name_and_returns_id() {
        let (server, client) = setup().await;
        Mock::given(method("POST"))
            .and(path("/42/files/7/file"))
            .and(bearer_token("tok"))
            .and(body_json(serde_json::json!({ "name": "new.json" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "result": "success",
                "data": {"id": 99, "name": "new.json"}
            })))
            .mount(&server)
            .await;

        let (raw, id) = client.create_file("tok", 7, "new.json").await.unwrap();
        assert_eq!(id, 99);
        assert_eq!(raw["data"]["name"], "new.json");
    }

    #[tokio::test]
    async fn upload_sends_octet_stream() {
        let (server, client) = setup().await;
        Mock::given(method("POST"))
            .and(path("/42/files/99/upload"))
            .and(header("content-type", "application/octet-stream"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "result": "success" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let resp = client.upload("tok", 99, b"{}".to_vec()).await.unwrap();
        assert_eq!(resp["result"], "success");
    }

    #[tokio::test]
    async fn delete_failure_surfaces_drive_error() {
        let (server, client) = setup().await;
        Mock::given(method("DELETE"))
            .and(path("/42/files/5"))
            .respond_with(ResponseTemplate::new(404).set_body_string("object_not_found"))
            .mount(&server)
            .await;

        let err = client.delete("tok", 5).await.unwrap_err();
        match err {
            ProxyError::UpstreamDrive { status, body } => {
                assert_eq!(status, 404);
                assert_eq!(body, "object_not_found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}

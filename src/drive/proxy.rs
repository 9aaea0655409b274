//! File operations on the configured kDrive folder.
//!
//! The folder is addressed by a slash-separated path and resolved by walking
//! from the drive root, matching each segment by exact name among `dir`
//! entries. Resolution runs with the caller's token, so the resolved id is
//! cached per user for a short time. A 404 on an operation that used a
//! cached id drops it and the operation is retried once with a fresh
//! resolution.

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::client::KDriveClient;
use super::models::FileDescriptor;
use crate::config::Config;
use crate::error::ProxyError;

struct CachedFolder {
    id: i64,
    resolved_at: Instant,
}

pub struct DriveProxy {
    client: KDriveClient,
    folder_path: String,
    /// Resolved folder id by user id.
    cache: RwLock<HashMap<String, CachedFolder>>,
    cache_ttl: Duration,
}

impl DriveProxy {
    pub fn new(client: KDriveClient, folder_path: &str, cache_ttl: Duration) -> Self {
        Self {
            client,
            folder_path: folder_path.to_string(),
            cache: RwLock::new(HashMap::new()),
            cache_ttl,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let client = KDriveClient::new(&config.kdrive_id).with_base_url(&config.kdrive_api_url);
        Self::new(
            client,
            &config.folder_path,
            Duration::from_secs(config.folder_cache_ttl_secs),
        )
    }

    pub fn folder_path(&self) -> &str {
        &self.folder_path
    }

    /// Walk the configured path from the drive root. `None` when any segment
    /// has no matching directory.
    pub async fn resolve_folder(&self, token: &str) -> Result<Option<i64>, ProxyError> {
        let mut current: Option<i64> = None;

        for segment in self.folder_path.split('/').filter(|s| !s.is_empty()) {
            let children = self.client.list_children(token, current).await?;
            match children
                .into_iter()
                .find(|entry| entry.name == segment && entry.is_dir())
            {
                Some(dir) => current = Some(dir.id),
                None => {
                    debug!("Folder segment '{segment}' not found under {current:?}");
                    return Ok(None);
                }
            }
        }

        Ok(current)
    }

    /// JSON files in the folder, in upstream order.
    pub async fn list_files(
        &self,
        user_id: &str,
        token: &str,
    ) -> Result<Vec<FileDescriptor>, ProxyError> {
        let children = self
            .in_folder(user_id, token, |folder| self.client.list_children(token, Some(folder)))
            .await?;

        Ok(children
            .into_iter()
            .filter(|entry| entry.name.ends_with(".json"))
            .map(FileDescriptor::from)
            .collect())
    }

    /// Content of `file_id`. Bodies that parse as JSON are returned as JSON,
    /// anything else as a JSON string.
    pub async fn read_file(&self, token: &str, file_id: i64) -> Result<Value, ProxyError> {
        let url = self.client.download_url(token, file_id).await?;
        let body = self.client.fetch_content(&url).await?;

        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }

    /// Overwrite `file_id`, or create `file_name` in the folder when `file_id`
    /// is `None`. Returns the drive's response to the upload (update) or to
    /// the creation (create).
    pub async fn write_file(
        &self,
        user_id: &str,
        token: &str,
        file_id: Option<i64>,
        file_name: &str,
        content: &Value,
    ) -> Result<Value, ProxyError> {
        let bytes = serde_json::to_vec(content)
            .map_err(|e| ProxyError::Internal(format!("failed to serialize content: {e}")))?;

        if let Some(id) = file_id {
            return self.client.upload(token, id, bytes).await;
        }

        if file_name.trim().is_empty() {
            return Err(ProxyError::BadRequest("fileName is required to create a file".into()));
        }

        let (created, new_id) = self
            .in_folder(user_id, token, |folder| {
                self.client.create_file(token, folder, file_name)
            })
            .await?;
        self.client.upload(token, new_id, bytes).await?;

        info!("Created file {new_id} ({file_name})");
        Ok(created)
    }

    /// Delete by id. Failures from the drive (including 404) are returned.
    pub async fn delete_file(&self, token: &str, file_id: i64) -> Result<(), ProxyError> {
        self.client.delete(token, file_id).await?;
        info!("Deleted file {file_id}");
        Ok(())
    }

    /// Run `op` against the folder id, re-resolving once if a cached id
    /// turns out to be stale.
    async fn in_folder<T, F, Fut>(&self, user_id: &str, token: &str, op: F) -> Result<T, ProxyError>
    where
        F: Fn(i64) -> Fut,
        Fut: Future<Output = Result<T, ProxyError>>,
    {
        let (folder, cached) = self.folder_id(user_id, token).await?;

        match op(folder).await {
            Err(ProxyError::UpstreamDrive { status: 404, .. }) if cached => {
                debug!("Cached folder id {folder} for user {user_id} is stale, resolving again");
                self.invalidate(user_id).await;
                let (folder, _) = self.folder_id(user_id, token).await?;
                op(folder).await
            }
            Err(ProxyError::UpstreamDrive { status: 404, body }) => {
                self.invalidate(user_id).await;
                Err(ProxyError::UpstreamDrive { status: 404, body })
            }
            other => other,
        }
    }

    /// Folder id and whether it came from the cache.
    async fn folder_id(&self, user_id: &str, token: &str) -> Result<(i64, bool), ProxyError> {
        if !self.cache_ttl.is_zero() {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(user_id) {
                if cached.resolved_at.elapsed() < self.cache_ttl {
                    return Ok((cached.id, true));
                }
            }
        }

        let id = self
            .resolve_folder(token)
            .await?
            .ok_or_else(|| ProxyError::FolderNotFound(self.folder_path.clone()))?;

        if !self.cache_ttl.is_zero() {
            let mut cache = self.cache.write().await;
            // Entries only live for the TTL; expired ones are dropped here.
            cache.retain(|_, cached| cached.resolved_at.elapsed() < self.cache_ttl);
            cache.insert(
                user_id.to_string(),
                CachedFolder {
                    id,
                    resolved_at: Instant::now(),
                },
            );
        }

        Ok((id, false))
    }

    async fn invalidate(&self, user_id: &str) {
        self.cache.write().await.remove(user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{bearer_token, body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn listing(entries: Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({ "result": "success", "data": entries }))
    }

    async fn setup(folder_path: &str, ttl_secs: u64) -> (MockServer, DriveProxy) {
        let server = MockServer::start().await;
        let client = KDriveClient::new("42").with_base_url(&server.uri());
        let proxy = DriveProxy::new(client, folder_path, Duration::from_secs(ttl_secs));
        (server, proxy)
    }

    async fn mount_a_b(server: &MockServer, root_calls: u64) {
        Mock::given(method("GET"))
            .and(path("/42/files"))
            .respond_with(listing(json!([
                {"id": 9, "name": "A", "type": "file"},
                {"id": 1, "name": "A", "type": "dir"}
            ])))
            .expect(root_calls)
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/42/files/1/files"))
            .respond_with(listing(json!([{"id": 2, "name": "B", "type": "dir"}])))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn resolves_nested_path() {
        let (server, proxy) = setup("/A//B/", 0).await;
        mount_a_b(&server, 1).await;

        assert_eq!(proxy.resolve_folder("tok").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn missing_segment_resolves_to_none() {
        let (server, proxy) = setup("A/B", 0).await;
        Mock::given(method("GET"))
            .and(path("/42/files"))
            .respond_with(listing(json!([{"id": 1, "name": "A", "type": "dir"}])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/42/files/1/files"))
            .respond_with(listing(json!([{"id": 3, "name": "B", "type": "file"}])))
            .mount(&server)
            .await;

        assert_eq!(proxy.resolve_folder("tok").await.unwrap(), None);

        let err = proxy.list_files("u", "tok").await.unwrap_err();
        assert!(matches!(err, ProxyError::FolderNotFound(ref p) if p == "A/B"));
    }

    #[tokio::test]
    async fn list_keeps_only_json_files() {
        let (server, proxy) = setup("A/B", 0).await;
        mount_a_b(&server, 1).await;
        Mock::given(method("GET"))
            .and(path("/42/files/2/files"))
            .respond_with(listing(json!([
                {"id": 10, "name": "a.json", "type": "file", "last_modified_at": 1718000000},
                {"id": 11, "name": "b.txt", "type": "file", "last_modified_at": 1718000001}
            ])))
            .mount(&server)
            .await;

        let files = proxy.list_files("u", "tok").await.unwrap();
        assert_eq!(
            files,
            vec![FileDescriptor {
                id: 10,
                name: "a.json".into(),
                modified: json!(1718000000),
            }]
        );
    }

    #[tokio::test]
    async fn folder_id_is_cached_between_calls() {
        let (server, proxy) = setup("A/B", 300).await;
        mount_a_b(&server, 1).await;
        Mock::given(method("GET"))
            .and(path("/42/files/2/files"))
            .respond_with(listing(json!([])))
            .expect(2)
            .mount(&server)
            .await;

        proxy.list_files("u", "tok").await.unwrap();
        proxy.list_files("u", "tok").await.unwrap();
    }

    #[tokio::test]
    async fn stale_cached_folder_is_resolved_again() {
        let (server, proxy) = setup("A", 300).await;
        proxy.cache.write().await.insert(
            "u".into(),
            CachedFolder {
                id: 77,
                resolved_at: Instant::now(),
            },
        );

        Mock::given(method("GET"))
            .and(path("/42/files/77/files"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/42/files"))
            .respond_with(listing(json!([{"id": 5, "name": "A", "type": "dir"}])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/42/files/5/files"))
            .respond_with(listing(json!([{"id": 6, "name": "x.json", "type": "file"}])))
            .mount(&server)
            .await;

        let files = proxy.list_files("u", "tok").await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(proxy.cache.read().await.get("u").map(|c| c.id), Some(5));
    }

    #[tokio::test]
    async fn folder_cache_is_kept_per_user() {
        let (server, proxy) = setup("A", 300).await;
        Mock::given(method("GET"))
            .and(path("/42/files"))
            .and(bearer_token("tok-a"))
            .respond_with(listing(json!([{"id": 1, "name": "A", "type": "dir"}])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/42/files"))
            .and(bearer_token("tok-b"))
            .respond_with(listing(json!([])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/42/files/1/files"))
            .respond_with(listing(json!([])))
            .mount(&server)
            .await;

        proxy.list_files("alice", "tok-a").await.unwrap();

        // bob's token cannot see the folder; alice's cached id is not reused
        let err = proxy.list_files("bob", "tok-b").await.unwrap_err();
        assert!(matches!(err, ProxyError::FolderNotFound(_)));
        assert!(proxy.cache.read().await.get("bob").is_none());
    }

    #[tokio::test]
    async fn create_then_read_round_trips() {
        let (server, proxy) = setup("A", 0).await;
        let content = json!({ "patient": "Jane", "visits": [1, 2] });

        Mock::given(method("GET"))
            .and(path("/42/files"))
            .respond_with(listing(json!([{"id": 1, "name": "A", "type": "dir"}])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/42/files/1/file"))
            .and(body_json(json!({ "name": "jane.json" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": "success",
                "data": { "id": 99, "name": "jane.json" }
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/42/files/99/upload"))
            .and(header("content-type", "application/octet-stream"))
            .and(body_json(content.clone()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": "success" })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/42/files/99/download"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": "success",
                "data": { "url": format!("{}/signed/99", server.uri()) }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/signed/99"))
            .respond_with(ResponseTemplate::new(200).set_body_string(content.to_string()))
            .mount(&server)
            .await;

        let created = proxy
            .write_file("u", "tok", None, "jane.json", &content)
            .await
            .unwrap();
        let id = created["data"]["id"].as_i64().unwrap();

        assert_eq!(proxy.read_file("tok", id).await.unwrap(), content);
    }

    #[tokio::test]
    async fn update_uploads_without_resolving_folder() {
        let (server, proxy) = setup("A", 0).await;
        Mock::given(method("GET"))
            .and(path("/42/files"))
            .respond_with(listing(json!([])))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/42/files/12/upload"))
            .and(body_json(json!([1, 2, 3])))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": "success" })))
            .expect(1)
            .mount(&server)
            .await;

        let result = proxy
            .write_file("u", "tok", Some(12), "", &json!([1, 2, 3]))
            .await
            .unwrap();
        assert_eq!(result["result"], "success");
    }

    #[tokio::test]
    async fn create_requires_a_name() {
        let (_server, proxy) = setup("A", 0).await;
        let err = proxy
            .write_file("u", "tok", None, "  ", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::BadRequest(_)));
    }

    #[tokio::test]
    async fn non_json_content_is_returned_as_string() {
        let (server, proxy) = setup("A", 0).await;
        Mock::given(method("GET"))
            .and(path("/42/files/3/download"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": "success",
                "data": { "url": format!("{}/signed/3", server.uri()) }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/signed/3"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not { json"))
            .mount(&server)
            .await;

        assert_eq!(
            proxy.read_file("tok", 3).await.unwrap(),
            Value::String("not { json".into())
        );
    }

    #[tokio::test]
    async fn deleting_missing_file_is_an_error() {
        let (server, proxy) = setup("A", 0).await;
        Mock::given(method("DELETE"))
            .and(path("/42/files/404404"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
            .mount(&server)
            .await;

        let err = proxy.delete_file("tok", 404404).await.unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamDrive { status: 404, .. }));
    }
}

//! Remote resolve client.
//!
//! Encodes bulk and single-key resolve calls, sends them through a
//! [`Transport`] and validates what comes back. Anything the caller cannot
//! trust (undecodable bodies, a single answer for the wrong id) is an
//! [`RemoteError::InvalidResponse`].

use std::collections::HashMap;

use async_trait::async_trait;
use quarry_core::{DataClass, Key, Record, RemoteConfig, RemoteError};
use tracing::{debug, trace};

use crate::transport::{FetchRequest, Transport};
use crate::types::{BulkResponse, WireRecord};

/// Hard upper bound on keys in one bulk request.
pub const DEFAULT_BULK_LIMIT: usize = 1000;

/// The remote operations the resolver depends on.
#[async_trait]
pub trait RemoteResolve: Send + Sync {
    /// Resolve a batch in one call.
    ///
    /// The map holds only requested keys the remote answered. Requested keys
    /// missing from it are unresolved; that is not an error.
    async fn resolve_bulk(
        &self,
        class: &DataClass,
        keys: &[Key],
    ) -> Result<HashMap<Key, Record>, RemoteError>;

    /// Resolve one key. `Ok(None)` means the remote has no such entity.
    async fn resolve_single(&self, class: &DataClass, key: Key)
        -> Result<Option<Record>, RemoteError>;
}

/// [`RemoteResolve`] over any [`Transport`].
#[derive(Debug, Clone)]
pub struct RemoteClient<T: Transport> {
    transport: T,
    config: RemoteConfig,
    bulk_limit: usize,
}

impl<T: Transport> RemoteClient<T> {
    pub fn new(transport: T, config: RemoteConfig) -> Self {
        Self {
            transport,
            config,
            bulk_limit: DEFAULT_BULK_LIMIT,
        }
    }

    /// Set the bulk request limit (values below 1 are raised to 1).
    pub fn with_bulk_limit(mut self, limit: usize) -> Self {
        self.bulk_limit = limit.max(1);
        self
    }

    pub fn bulk_limit(&self) -> usize {
        self.bulk_limit
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    fn decode<R: serde::de::DeserializeOwned>(url: &str, bytes: &[u8]) -> Result<R, RemoteError> {
        serde_json::from_slice(bytes).map_err(|e| RemoteError::InvalidResponse {
            url: url.to_string(),
            reason: format!("Failed to parse response: {}", e),
        })
    }

    /// POST `keys` to the class endpoint and decode the answer, keeping only
    /// requested ids. Later duplicates overwrite earlier ones.
    async fn post_keys(
        &self,
        class: &DataClass,
        keys: &[Key],
    ) -> Result<HashMap<Key, Record>, RemoteError> {
        let url = self.config.url(class.endpoint());
        let body = serde_json::to_vec(keys).map_err(|e| RemoteError::InvalidResponse {
            url: url.clone(),
            reason: format!("Failed to encode request: {}", e),
        })?;

        trace!(class = class.name(), url = %url, keys = keys.len(), "Bulk resolve request");
        let bytes = self
            .transport
            .fetch(FetchRequest::post_json(url.clone(), body))
            .await?;
        let answers: BulkResponse = Self::decode(&url, &bytes)?;

        let mut requested: Vec<Key> = keys.to_vec();
        requested.sort_unstable();

        let mut resolved = HashMap::with_capacity(answers.len());
        let mut ignored = 0usize;
        for answer in answers {
            if requested.binary_search(&answer.id).is_ok() {
                let (key, record) = answer.into_record();
                resolved.insert(key, record);
            } else {
                ignored += 1;
            }
        }
        if ignored > 0 {
            debug!(
                class = class.name(),
                url = %url,
                ignored,
                "Ignored unrequested ids in bulk response"
            );
        }
        Ok(resolved)
    }
}

#[async_trait]
impl<T: Transport> RemoteResolve for RemoteClient<T> {
    async fn resolve_bulk(
        &self,
        class: &DataClass,
        keys: &[Key],
    ) -> Result<HashMap<Key, Record>, RemoteError> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        if keys.len() > self.bulk_limit {
            return Err(RemoteError::BatchTooLarge {
                size: keys.len(),
                max: self.bulk_limit,
            });
        }
        self.post_keys(class, keys).await
    }

    async fn resolve_single(
        &self,
        class: &DataClass,
        key: Key,
    ) -> Result<Option<Record>, RemoteError> {
        let Some(path) = class.single_endpoint() else {
            let mut resolved = self.post_keys(class, &[key]).await?;
            return Ok(resolved.remove(&key));
        };

        let url = self
            .config
            .url(&format!("{}/{}", path.trim_end_matches('/'), key));
        trace!(class = class.name(), url = %url, key, "Single resolve request");

        let bytes = match self.transport.fetch(FetchRequest::get(url.clone())).await {
            Ok(bytes) => bytes,
            Err(RemoteError::Status { status: 404, .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        let answer: WireRecord = Self::decode(&url, &bytes)?;
        if answer.id != key {
            return Err(RemoteError::InvalidResponse {
                url,
                reason: format!("asked for id {} but got {}", key, answer.id),
            });
        }
        Ok(Some(answer.into_record().1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Replays one canned answer per call and records requests.
    struct CannedTransport {
        answers: Mutex<Vec<Result<Vec<u8>, RemoteError>>>,
        requests: Mutex<Vec<FetchRequest>>,
    }

    impl CannedTransport {
        fn new(answers: Vec<Result<&str, RemoteError>>) -> Self {
            Self {
                answers: Mutex::new(
                    answers
                        .into_iter()
                        .rev()
                        .map(|a| a.map(|s| s.as_bytes().to_vec()))
                        .collect(),
                ),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<FetchRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for CannedTransport {
        async fn fetch(&self, request: FetchRequest) -> Result<Vec<u8>, RemoteError> {
            self.requests.lock().unwrap().push(request);
            self.answers
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(b"[]".to_vec()))
        }
    }

    fn client(answers: Vec<Result<&str, RemoteError>>) -> RemoteClient<CannedTransport> {
        RemoteClient::new(
            CannedTransport::new(answers),
            RemoteConfig::new("https://api.example/"),
        )
    }

    #[tokio::test]
    async fn test_bulk_posts_json_array() {
        let client = client(vec![Ok(
            r#"[{"id":1,"name":"Amarr","category":"faction"}]"#,
        )]);
        let resolved = client
            .resolve_bulk(&DataClass::names(), &[1, 2])
            .await
            .unwrap();

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[&1].name, "Amarr");

        let requests = client.transport().requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url, "https://api.example/universe/names");
        assert_eq!(requests[0].body.as_deref(), Some(&b"[1,2]"[..]));
    }

    #[tokio::test]
    async fn test_bulk_ignores_unrequested_and_last_duplicate_wins() {
        let client = client(vec![Ok(r#"[
            {"id":1,"name":"first","category":"c"},
            {"id":99,"name":"stranger","category":"c"},
            {"id":1,"name":"second","category":"c"}
        ]"#)]);
        let resolved = client
            .resolve_bulk(&DataClass::names(), &[1])
            .await
            .unwrap();

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[&1].name, "second");
    }

    #[tokio::test]
    async fn test_bulk_undecodable_is_invalid_response() {
        let client = client(vec![Ok(r#"{"error":"nope"}"#)]);
        let err = client
            .resolve_bulk(&DataClass::names(), &[1])
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn test_bulk_over_limit_is_rejected_without_a_call() {
        let client = client(vec![]).with_bulk_limit(2);
        let err = client
            .resolve_bulk(&DataClass::names(), &[1, 2, 3])
            .await
            .unwrap_err();
        assert_eq!(err, RemoteError::BatchTooLarge { size: 3, max: 2 });
        assert!(client.transport().requests().is_empty());
    }

    #[tokio::test]
    async fn test_empty_bulk_makes_no_call() {
        let client = client(vec![]);
        let resolved = client.resolve_bulk(&DataClass::names(), &[]).await.unwrap();
        assert!(resolved.is_empty());
        assert!(client.transport().requests().is_empty());
    }

    #[tokio::test]
    async fn test_single_without_endpoint_posts_one_key() {
        let client = client(vec![Ok(r#"[{"id":7,"name":"seven","category":"c"}]"#)]);
        let record = client
            .resolve_single(&DataClass::names(), 7)
            .await
            .unwrap();
        assert_eq!(record.map(|r| r.name), Some("seven".to_string()));

        let requests = client.transport().requests();
        assert_eq!(requests[0].body.as_deref(), Some(&b"[7]"[..]));
    }

    #[tokio::test]
    async fn test_single_endpoint_uses_get() {
        let client = client(vec![Ok(r#"{"id":5,"name":"online","category":"status"}"#)]);
        let record = client
            .resolve_single(&DataClass::server_status(), 5)
            .await
            .unwrap();
        assert_eq!(record.map(|r| r.name), Some("online".to_string()));

        let requests = client.transport().requests();
        assert_eq!(requests[0].method, crate::Method::Get);
        assert_eq!(requests[0].url, "https://api.example/status/5");
    }

    #[tokio::test]
    async fn test_single_not_found_is_none() {
        let client = client(vec![Err(RemoteError::Status {
            url: "https://api.example/status/5".to_string(),
            status: 404,
            message: "not found".to_string(),
        })]);
        let record = client
            .resolve_single(&DataClass::server_status(), 5)
            .await
            .unwrap();
        assert!(record.is_none());
    }

    #[tokio::test]
    async fn test_single_wrong_id_is_invalid() {
        let client = client(vec![Ok(r#"{"id":6,"name":"x","category":"c"}"#)]);
        let err = client
            .resolve_single(&DataClass::server_status(), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn test_transport_failure_propagates() {
        let client = client(vec![Err(RemoteError::Transport {
            url: "u".to_string(),
            reason: "connection reset".to_string(),
        })]);
        let err = client
            .resolve_bulk(&DataClass::names(), &[1])
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Transport { .. }));
    }
}

//! Networked document store speaking a MongoDB Data-API style JSON protocol.
//!
//! Every operation is a `POST {endpoint}/action/<name>` carrying the data
//! source, database, and collection alongside the operation arguments. Returned
//! documents use extended JSON and are sanitised by [`crate::StoreBackend`].

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::backend::DocumentStore;
use crate::document::{Document, Filter, FindOptions, ID_FIELD, PutOutcome, plain_id};
use crate::http::JsonClient;
use crate::{StoreError, StoreResult};

/// Default bound on connection setup and on every request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection settings for [`RemoteStore`].
#[derive(Clone)]
pub struct RemoteConfig {
    endpoint: String,
    api_key: Option<String>,
    data_source: String,
    database: String,
    timeout: Duration,
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("endpoint", &self.endpoint)
            .field("data_source", &self.data_source)
            .field("database", &self.database)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RemoteConfig {
    /// Creates settings for the service at `endpoint` using default names.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: None,
            data_source: "Cluster0".to_owned(),
            database: "shopping_ai".to_owned(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Sets the API key sent in the `api-key` header.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Sets the data source (cluster) name.
    #[must_use]
    pub fn with_data_source(mut self, data_source: impl Into<String>) -> Self {
        self.data_source = data_source.into();
        self
    }

    /// Sets the database name.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Sets the connection and request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns the database name.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Returns the timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Document store reached over HTTPS.
#[derive(Debug)]
pub struct RemoteStore {
    client: JsonClient,
    data_source: String,
    database: String,
}

impl RemoteStore {
    /// Creates a store from `config`. No request is sent until first use.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidConfig`] for a malformed endpoint or API key.
    pub fn new(config: &RemoteConfig) -> StoreResult<Self> {
        let mut client = JsonClient::new(&config.endpoint, config.timeout)?;
        if let Some(api_key) = &config.api_key {
            client = client.with_header("api-key", api_key)?;
        }
        Ok(Self {
            client,
            data_source: config.data_source.clone(),
            database: config.database.clone(),
        })
    }

    fn request(&self, collection: &str, arguments: Value) -> Value {
        let mut body = json!({
            "dataSource": self.data_source,
            "database": self.database,
            "collection": collection,
        });
        if let (Value::Object(body), Value::Object(arguments)) = (&mut body, arguments) {
            body.extend(arguments);
        }
        body
    }

    async fn action<T>(&self, action: &str, collection: &str, arguments: Value) -> StoreResult<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let body = self.request(collection, arguments);
        let response = self.client.post(&format!("action/{action}"), &body).await?;
        serde_json::from_value(response)
            .map_err(|err| StoreError::malformed(format!("unexpected `{action}` response: {err}")))
    }

    /// Deletes each candidate individually and keeps only the ones this call
    /// actually removed, so concurrent drains never return the same document.
    /// A failure after the first claim ends the drain early; documents already
    /// removed are still returned and the rest stay queued.
    async fn claim(&self, collection: &str, candidates: Vec<Document>) -> StoreResult<Vec<Document>> {
        let mut claimed = Vec::with_capacity(candidates.len());
        for document in candidates {
            let Some(raw_id) = document.get(ID_FIELD).cloned() else {
                warn!(collection, "skipping drained document without identifier");
                continue;
            };
            let response: DeleteResponse = match self
                .action("deleteOne", collection, json!({ "filter": { ID_FIELD: raw_id } }))
                .await
            {
                Ok(response) => response,
                Err(err) if claimed.is_empty() => return Err(err),
                Err(err) => {
                    warn!(collection, claimed = claimed.len(), error = %err, "drain interrupted, returning claimed documents");
                    break;
                }
            };
            if response.deleted_count == 1 {
                claimed.push(document);
            } else {
                debug!(collection, "document claimed by a concurrent reader");
            }
        }
        Ok(claimed)
    }
}

#[derive(Debug, Deserialize)]
struct FindResponse {
    #[serde(default)]
    documents: Vec<Document>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertResponse {
    inserted_id: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateResponse {
    #[serde(default)]
    matched_count: u64,
    #[serde(default)]
    upserted_id: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteResponse {
    #[serde(default)]
    deleted_count: u64,
}

fn find_arguments(filter: &Filter, options: &FindOptions) -> Value {
    let mut arguments = json!({ "filter": filter });
    if let Value::Object(map) = &mut arguments {
        if let Some(order) = options.sort() {
            let direction = if order.descending { -1 } else { 1 };
            map.insert("sort".to_owned(), json!({ order.field.clone(): direction }));
        }
        if let Some(limit) = options.max_results() {
            map.insert("limit".to_owned(), Value::from(limit));
        }
    }
    arguments
}

#[async_trait]
impl DocumentStore for RemoteStore {
    async fn ping(&self) -> StoreResult<()> {
        let _: Value = self
            .action("findOne", "short_term", json!({ "filter": {} }))
            .await?;
        Ok(())
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> StoreResult<Vec<Document>> {
        // The Data API reads `limit: 0` as unlimited.
        if options.max_results() == Some(0) {
            return Ok(Vec::new());
        }
        let response: FindResponse = self
            .action("find", collection, find_arguments(filter, options))
            .await?;
        Ok(response.documents)
    }

    async fn insert(&self, collection: &str, document: Document) -> StoreResult<String> {
        let response: InsertResponse = self
            .action("insertOne", collection, json!({ "document": document }))
            .await?;
        plain_id(&response.inserted_id)
            .ok_or_else(|| StoreError::malformed("insertedId is not an identifier"))
    }

    async fn put(
        &self,
        collection: &str,
        filter: &Filter,
        document: Document,
        upsert: bool,
    ) -> StoreResult<PutOutcome> {
        let response: UpdateResponse = self
            .action(
                "updateOne",
                collection,
                json!({
                    "filter": filter,
                    "update": { "$set": document },
                    "upsert": upsert,
                }),
            )
            .await?;
        Ok(PutOutcome {
            matched: response.matched_count,
            upserted_id: response.upserted_id.as_ref().and_then(plain_id),
        })
    }

    async fn delete(&self, collection: &str, filter: &Filter) -> StoreResult<u64> {
        let response: DeleteResponse = self
            .action("deleteMany", collection, json!({ "filter": filter }))
            .await?;
        Ok(response.deleted_count)
    }

    async fn take(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<Document>> {
        let candidates = self
            .find(collection, filter, &FindOptions::default())
            .await?;
        self.claim(collection, candidates).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::filter;

    #[test]
    fn request_carries_routing_fields() {
        let store = RemoteStore::new(
            &RemoteConfig::new("https://data.example.com/app/x/endpoint/data/v1")
                .with_database("memory")
                .with_api_key("secret"),
        )
        .unwrap();
        let body = store.request("messages", json!({ "filter": { "to_agent": "b" } }));
        assert_eq!(body["dataSource"], "Cluster0");
        assert_eq!(body["database"], "memory");
        assert_eq!(body["collection"], "messages");
        assert_eq!(body["filter"]["to_agent"], "b");
    }

    #[test]
    fn find_arguments_encode_sort_and_limit() {
        let arguments = find_arguments(
            &filter([("user_id", "u1")]),
            &FindOptions::default().sort_desc("timestamp").limit(3),
        );
        assert_eq!(arguments["sort"]["timestamp"], -1);
        assert_eq!(arguments["limit"], 3);
        assert_eq!(arguments["filter"]["user_id"], "u1");
    }

    #[test]
    fn update_response_accepts_extended_ids() {
        let response: UpdateResponse = serde_json::from_value(json!({
            "matchedCount": 0,
            "modifiedCount": 0,
            "upsertedId": {"$oid": "65f0c0ffee00000000000001"},
        }))
        .unwrap();
        assert_eq!(
            response.upserted_id.as_ref().and_then(plain_id).as_deref(),
            Some("65f0c0ffee00000000000001")
        );
    }

    #[tokio::test]
    async fn unreachable_service_fails_ping() {
        let store = RemoteStore::new(
            &RemoteConfig::new("http://127.0.0.1:9").with_timeout(Duration::from_millis(500)),
        )
        .unwrap();
        let err = store.ping().await.expect_err("nothing listens there");
        assert!(err.is_connectivity());
    }

    /// Answers one request per connection with the queued replies, in order.
    async fn scripted_service(replies: Vec<(u16, &'static str)>) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for (status, body) in replies {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut request = Vec::new();
                let mut chunk = [0_u8; 4096];
                loop {
                    let read = socket.read(&mut chunk).await.unwrap();
                    request.extend_from_slice(&chunk[..read]);
                    let text = String::from_utf8_lossy(&request);
                    if let Some(split) = text.find("\r\n\r\n") {
                        let length = text[..split]
                            .lines()
                            .find_map(|line| {
                                let (name, value) = line.split_once(':')?;
                                name.eq_ignore_ascii_case("content-length")
                                    .then(|| value.trim().parse::<usize>().ok())
                                    .flatten()
                            })
                            .unwrap_or(0);
                        if request.len() >= split + 4 + length {
                            break;
                        }
                    }
                    if read == 0 {
                        break;
                    }
                }
                let reply = format!(
                    "HTTP/1.1 {status} OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
        });
        format!("http://{address}")
    }

    fn message(id: &str) -> Document {
        match json!({ "_id": id, "to_agent": "b" }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn interrupted_drain_returns_what_it_claimed() {
        let endpoint =
            scripted_service(vec![(200, r#"{"deletedCount":1}"#), (500, r#"{"error":"down"}"#)])
                .await;
        let store = RemoteStore::new(&RemoteConfig::new(endpoint)).unwrap();

        let claimed = store
            .claim("messages", vec![message("m1"), message("m2")])
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0]["_id"], "m1");
    }

    #[tokio::test]
    async fn drain_failing_before_any_claim_is_an_error() {
        let endpoint = scripted_service(vec![(500, r#"{"error":"down"}"#)]).await;
        let store = RemoteStore::new(&RemoteConfig::new(endpoint)).unwrap();

        let err = store
            .claim("messages", vec![message("m1")])
            .await
            .expect_err("nothing was claimed");
        assert!(matches!(err, StoreError::Rejected { status: 500, .. }));
    }

    #[tokio::test]
    async fn zero_limit_finds_nothing_without_asking() {
        let store = RemoteStore::new(
            &RemoteConfig::new("http://127.0.0.1:9").with_timeout(Duration::from_millis(500)),
        )
        .unwrap();
        let found = store
            .find("episodic_log", &Filter::new(), &FindOptions::default().limit(0))
            .await
            .unwrap();
        assert!(found.is_empty());
    }
}

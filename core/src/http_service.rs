/// REST collaborator over HTTP/JSON
///
/// Endpoints (relative to `api_base`):
///   GET  /api/me
///   GET  /api/chat/rooms?user_id=
///   GET  /api/chat/rooms/:room/messages?limit=N&before=ID
///   GET  /api/chat/rooms/:room/last-seen?peer_id=
///   POST /api/chat/rooms/:room/messages   body: OutgoingMessage
///   POST /api/chat/rooms/:room/read       body: {"reader_id","up_to_id"}
///   POST /api/chat/rooms/:room/leave      body: {"actor_id"}
///   POST /api/uploads                     raw bytes, X-File-Name header
use crate::chat_types::Identity;
use crate::config::EngineConfig;
use crate::error::{ChatError, Result};
use crate::normalize::{value_to_id, value_to_u64, RawMessage, RawRoom};
use crate::service::{Asset, ChatService, OutgoingMessage};
use bytes::Bytes;
use http::header;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;
use urlencoding::encode;

type HttpClient = Client<HttpConnector, Full<Bytes>>;

#[derive(Clone)]
pub struct HttpChatService {
    base: String,
    client: HttpClient,
    timeout: Duration,
}

impl HttpChatService {
    pub fn new(base: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            client,
            timeout,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.api_base.clone(), config.request_timeout)
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        content_type: &str,
        body: Vec<u8>,
        file_name: Option<&str>,
    ) -> Result<Bytes> {
        let uri: Uri = format!("{}{}", self.base, path)
            .parse()
            .map_err(|e| ChatError::Http(format!("Invalid URL {}: {}", path, e)))?;

        let mut builder = Request::builder()
            .method(method.clone())
            .uri(uri)
            .header(header::ACCEPT, "application/json")
            .header(header::CONTENT_TYPE, content_type);
        if let Some(name) = file_name {
            builder = builder.header("X-File-Name", encode(name).into_owned());
        }
        let req = builder
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| ChatError::Http(e.to_string()))?;

        debug!("{} {}", method, path);
        let resp = tokio::time::timeout(self.timeout, self.client.request(req))
            .await
            .map_err(|_| ChatError::Timeout(format!("{} {}", method, path)))?
            .map_err(|e| ChatError::Http(e.to_string()))?;

        let status = resp.status();
        let bytes = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| ChatError::Http(e.to_string()))?
            .to_bytes();

        if !status.is_success() {
            return Err(ChatError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        Ok(bytes)
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let bytes = self
            .request(Method::GET, path, "application/json", Vec::new(), None)
            .await?;
        parse_json(&bytes)
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let payload = serde_json::to_vec(body)?;
        let bytes = self
            .request(Method::POST, path, "application/json", payload, None)
            .await?;
        parse_json(&bytes)
    }
}

fn parse_json(bytes: &[u8]) -> Result<Value> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(bytes)?)
}

/// Lists come back bare or wrapped, depending on the endpoint version
fn extract_list(value: Value, keys: &[&str]) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Object(mut map) => keys
            .iter()
            .find_map(|k| match map.remove(*k) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// Rows that fail to parse are skipped, not fatal
fn parse_rows<T: DeserializeOwned>(rows: Vec<Value>, what: &str) -> Vec<T> {
    rows.into_iter()
        .filter_map(|row| match serde_json::from_value(row) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                debug!("Skipping malformed {} row: {}", what, e);
                None
            }
        })
        .collect()
}

/// Message pages keep one record per returned row; an unreadable row becomes
/// an empty record that normalization drops, so the row count still decides
/// whether older history exists
fn parse_page(rows: Vec<Value>) -> Vec<RawMessage> {
    rows.into_iter()
        .map(|row| {
            serde_json::from_value(row).unwrap_or_else(|e| {
                debug!("Unreadable message row: {}", e);
                RawMessage::default()
            })
        })
        .collect()
}

fn first_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| value.get(*k)).filter(|v| !v.is_null())
}

fn room_path(room_id: &str, tail: &str) -> String {
    format!("/api/chat/rooms/{}/{}", encode(room_id), tail)
}

impl ChatService for HttpChatService {
    async fn get_self(&self) -> Result<Identity> {
        let value = self.get_json("/api/me").await?;
        let user = value.get("user").cloned().unwrap_or(value);
        let id = first_field(&user, &["id", "user_id", "userId"])
            .and_then(value_to_id)
            .ok_or_else(|| ChatError::Identity("response carries no user id".to_string()))?;
        let display_name = first_field(&user, &["display_name", "displayName", "nickname", "name"])
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let avatar_ref = first_field(&user, &["avatar_ref", "avatarRef", "avatar_url", "avatarUrl"])
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(Identity {
            id,
            display_name,
            avatar_ref,
        })
    }

    async fn list_rooms(&self, identity_id: &str) -> Result<Vec<RawRoom>> {
        let path = format!("/api/chat/rooms?user_id={}", encode(identity_id));
        let value = self.get_json(&path).await?;
        Ok(parse_rows(extract_list(value, &["rooms", "data", "results"]), "room"))
    }

    async fn list_messages(
        &self,
        room_id: &str,
        page_size: usize,
        before_id: Option<u64>,
    ) -> Result<Vec<RawMessage>> {
        let mut path = format!("{}?limit={}", room_path(room_id, "messages"), page_size);
        if let Some(before) = before_id {
            path.push_str(&format!("&before={}", before));
        }
        let value = self.get_json(&path).await?;
        Ok(parse_page(extract_list(value, &["messages", "data", "results"])))
    }

    async fn get_last_seen(&self, room_id: &str, peer_id: &str) -> Result<u64> {
        let path = format!("{}?peer_id={}", room_path(room_id, "last-seen"), encode(peer_id));
        let value = self.get_json(&path).await?;
        let seen = match &value {
            Value::Number(_) => value_to_u64(&value),
            _ => first_field(
                &value,
                &["last_seen_message_id", "lastSeenMessageId", "last_read_id", "lastReadId"],
            )
            .and_then(value_to_u64),
        };
        Ok(seen.unwrap_or(0))
    }

    async fn post_message(&self, room_id: &str, message: &OutgoingMessage) -> Result<()> {
        let body = serde_json::to_value(message)?;
        self.post_json(&room_path(room_id, "messages"), &body).await?;
        Ok(())
    }

    async fn post_read_advance(&self, room_id: &str, reader_id: &str, up_to_id: u64) -> Result<()> {
        let body = json!({ "reader_id": reader_id, "up_to_id": up_to_id });
        self.post_json(&room_path(room_id, "read"), &body).await?;
        Ok(())
    }

    async fn post_leave(&self, room_id: &str, actor_id: &str) -> Result<()> {
        let body = json!({ "actor_id": actor_id });
        self.post_json(&room_path(room_id, "leave"), &body).await?;
        Ok(())
    }

    async fn upload(&self, asset: &Asset) -> Result<String> {
        let bytes = self
            .request(
                Method::POST,
                "/api/uploads",
                &asset.content_type,
                asset.bytes.clone(),
                Some(&asset.file_name),
            )
            .await?;
        let value = parse_json(&bytes)?;
        first_field(&value, &["ref", "url", "path", "image_url"])
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ChatError::Upload("upload response carries no reference".to_string()))
    }
}

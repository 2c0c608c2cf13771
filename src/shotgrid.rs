//! Blocking REST client for the ShotGrid tracking database.
//!
//! ## Endpoints used
//!
//! ```text
//! POST {url}/api/v1/auth/access_token                       client credentials -> bearer token
//! GET  {url}/api/v1/schema/{entity}/fields/{field}          read_field_schema
//! POST {url}/api/v1/entity/{entity}/_search                 find
//! POST {url}/api/v1/entity/{entity}/_summarize              summarize
//! ```
//!
//! Search and summarize bodies carry filters in the api3 array format, so the
//! requests use the `application/vnd+shotgun.api3_array+json` content type.
//!
//! Timeouts, connection failures and 429/502/503/504 responses are retried
//! with exponential backoff, up to `max_retries` extra attempts. A 401 on an
//! authorized request fetches a fresh token and repeats the request once.

use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::entity::EntityRef;
use crate::error::ClientError;
use crate::evaluator::{QueryExecutor, Summary, SummaryField};
use crate::filter::QueryFilter;
use crate::schema::{FieldSchema, SchemaProvider};

const API_PREFIX: &str = "api/v1";
const ARRAY_FILTER_CONTENT_TYPE: &str = "application/vnd+shotgun.api3_array+json";
const PAGE_SIZE: usize = 500;
const BACKOFF_BASE: Duration = Duration::from_millis(250);

pub struct ShotgridClient {
    http: Client,
    base_url: String,
    script_name: String,
    api_key: String,
    token: Mutex<String>,
    max_retries: u32,
}

impl std::fmt::Debug for ShotgridClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShotgridClient")
            .field("base_url", &self.base_url)
            .field("script_name", &self.script_name)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl ShotgridClient {
    /// Builds the HTTP client and exchanges the script credentials for a
    /// bearer token.
    pub fn connect(config: &AppConfig) -> Result<Self, ClientError> {
        let base_url = config.connection.url.trim_end_matches('/').to_string();
        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|source| ClientError::Http {
                url: base_url.clone(),
                source,
            })?;

        let client = Self {
            http,
            base_url,
            script_name: config.connection.script_name.clone(),
            api_key: config.connection.api_key.clone(),
            token: Mutex::new(String::new()),
            max_retries: config.max_retries,
        };
        client.refresh_token()?;

        info!(url = %client.base_url, script = %client.script_name, "connected");
        Ok(client)
    }

    /// Requests a new bearer token and stores it for later requests.
    fn refresh_token(&self) -> Result<String, ClientError> {
        let auth_url = format!("{}/{}/auth/access_token", self.base_url, API_PREFIX);
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.script_name.as_str()),
            ("client_secret", self.api_key.as_str()),
        ];
        let response = send_with_retry(&auth_url, self.max_retries, || {
            self.http.post(&auth_url).header(ACCEPT, "application/json").form(&form)
        })
        .map_err(|err| match err {
            ClientError::Api { status, message } => ClientError::Auth(format!("{} ({})", message, status)),
            other => other,
        })?;

        let token = response
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::Auth("response carried no access_token".to_string()))?
            .to_string();
        *self.token.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = token.clone();
        Ok(token)
    }

    fn current_token(&self) -> String {
        self.token.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    /// Sends a bearer-authorized request. A 401 answer re-authenticates once
    /// and repeats the request with the new token.
    fn send_authorized<F>(&self, url: &str, build: F) -> Result<Value, ClientError>
    where
        F: Fn(&str) -> RequestBuilder,
    {
        let token = self.current_token();
        match send_with_retry(url, self.max_retries, || build(token.as_str())) {
            Err(ClientError::Api { status: 401, message }) => {
                warn!(url, %message, "access token rejected, re-authenticating");
                let token = self.refresh_token()?;
                send_with_retry(url, self.max_retries, || build(token.as_str()))
            }
            other => other,
        }
    }

    fn entity_url(&self, entity_type: &str, action: &str) -> String {
        format!(
            "{}/{}/entity/{}/{}",
            self.base_url,
            API_PREFIX,
            entity_collection(entity_type),
            action
        )
    }

    fn post_filters(&self, url: &str, body: &Value) -> Result<Value, ClientError> {
        let payload = serde_json::to_vec(body).map_err(|err| ClientError::Decode {
            url: url.to_string(),
            reason: err.to_string(),
        })?;
        self.send_authorized(url, |token| {
            self.http
                .post(url)
                .bearer_auth(token)
                .header(ACCEPT, "application/json")
                .header(CONTENT_TYPE, ARRAY_FILTER_CONTENT_TYPE)
                .body(payload.clone())
        })
    }
}

impl SchemaProvider for ShotgridClient {
    fn read_field_schema(&self, entity_type: &str, field_name: &str) -> Result<FieldSchema, ClientError> {
        let url = format!(
            "{}/{}/schema/{}/fields/{}",
            self.base_url,
            API_PREFIX,
            entity_collection(entity_type),
            field_name
        );
        let response = self.send_authorized(&url, |token| {
            self.http
                .get(&url)
                .bearer_auth(token)
                .header(ACCEPT, "application/json")
        })?;
        let data = take_data(&url, response)?;
        serde_json::from_value(data).map_err(|err| ClientError::Decode {
            url,
            reason: err.to_string(),
        })
    }
}

impl QueryExecutor for ShotgridClient {
    fn find(&self, entity_type: &str, filters: &[QueryFilter], fields: &[&str]) -> Result<Vec<EntityRef>, ClientError> {
        let url = self.entity_url(entity_type, "_search");
        let mut entities = Vec::new();
        let mut page = 1;

        loop {
            let body = json!({
                "filters": filters,
                "fields": fields,
                "page": {"number": page, "size": PAGE_SIZE},
            });
            let records = match take_data(&url, self.post_filters(&url, &body)?)? {
                Value::Array(records) => records,
                other => {
                    return Err(ClientError::Decode {
                        url,
                        reason: format!("expected a record list, got {}", other),
                    })
                }
            };
            let fetched = records.len();
            for record in records {
                entities.push(record_to_entity(&url, record)?);
            }
            debug!(entity_type, page, fetched, "search page");
            if fetched < PAGE_SIZE {
                break;
            }
            page += 1;
        }

        Ok(entities)
    }

    fn summarize(
        &self,
        entity_type: &str,
        filters: &[QueryFilter],
        summary_fields: &[SummaryField],
    ) -> Result<Summary, ClientError> {
        let url = self.entity_url(entity_type, "_summarize");
        let body = json!({
            "filters": filters,
            "summary_fields": summary_fields,
        });
        debug!(entity_type, body = %body, "summarize");
        let data = take_data(&url, self.post_filters(&url, &body)?)?;
        serde_json::from_value(data).map_err(|err| ClientError::Decode {
            url,
            reason: err.to_string(),
        })
    }
}

/// Sends a request built by `build`, retrying transient failures.
fn send_with_retry<F>(url: &str, max_retries: u32, build: F) -> Result<Value, ClientError>
where
    F: Fn() -> RequestBuilder,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let retries_left = attempt <= max_retries;

        match build().send() {
            Ok(response) => {
                let status = response.status();
                if is_retryable_status(status) && retries_left {
                    warn!(url, attempt, status = status.as_u16(), "server busy, retrying");
                    thread::sleep(backoff(attempt));
                    continue;
                }
                let body = response.text().map_err(|source| ClientError::Http {
                    url: url.to_string(),
                    source,
                })?;
                return parse_body(url, status, &body);
            }
            Err(err) if (err.is_timeout() || err.is_connect()) && retries_left => {
                warn!(url, attempt, error = %err, "transient request failure, retrying");
                thread::sleep(backoff(attempt));
            }
            Err(err) if err.is_timeout() => {
                return Err(ClientError::Timeout {
                    url: url.to_string(),
                    attempts: attempt,
                })
            }
            Err(source) => {
                return Err(ClientError::Http {
                    url: url.to_string(),
                    source,
                })
            }
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 502 | 503 | 504)
}

fn backoff(attempt: u32) -> Duration {
    BACKOFF_BASE * 2u32.saturating_pow(attempt.saturating_sub(1))
}

fn parse_body(url: &str, status: StatusCode, body: &str) -> Result<Value, ClientError> {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    if !status.is_success() {
        let message = parsed
            .as_ref()
            .and_then(api_error_message)
            .unwrap_or_else(|| body.trim().to_string());
        return Err(ClientError::Api {
            status: status.as_u16(),
            message,
        });
    }
    parsed.ok_or_else(|| ClientError::Decode {
        url: url.to_string(),
        reason: "response body is not JSON".to_string(),
    })
}

/// Joins the `errors[].detail` (or `title`) entries of an error response.
fn api_error_message(body: &Value) -> Option<String> {
    let errors = body.get("errors")?.as_array()?;
    let messages: Vec<&str> = errors
        .iter()
        .filter_map(|err| {
            err.get("detail")
                .and_then(Value::as_str)
                .filter(|detail| !detail.is_empty())
                .or_else(|| err.get("title").and_then(Value::as_str))
        })
        .collect();
    if messages.is_empty() {
        None
    } else {
        Some(messages.join("; "))
    }
}

fn take_data(url: &str, mut response: Value) -> Result<Value, ClientError> {
    response
        .get_mut("data")
        .map(Value::take)
        .ok_or_else(|| ClientError::Decode {
            url: url.to_string(),
            reason: "response has no 'data' member".to_string(),
        })
}

/// Flattens a REST record (`{id, type, attributes, relationships, links}`)
/// into an entity reference.
fn record_to_entity(url: &str, record: Value) -> Result<EntityRef, ClientError> {
    let decode = |reason: &str| ClientError::Decode {
        url: url.to_string(),
        reason: reason.to_string(),
    };
    let Value::Object(mut record) = record else {
        return Err(decode("record is not an object"));
    };
    let id = record
        .get("id")
        .and_then(Value::as_i64)
        .ok_or_else(|| decode("record has no integer id"))?;
    let entity_type = record
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| decode("record has no type"))?
        .to_string();

    let mut fields = Map::new();
    if let Some(Value::Object(attributes)) = record.remove("attributes") {
        fields.extend(attributes);
    }
    if let Some(Value::Object(relationships)) = record.remove("relationships") {
        for (name, relation) in relationships {
            if let Some(data) = relation.get("data") {
                fields.insert(name, data.clone());
            }
        }
    }

    Ok(EntityRef {
        id,
        entity_type,
        fields,
    })
}

/// REST collection name for an entity type: snake_case, pluralized.
/// `Sequence` -> `sequences`, `CustomEntity01` -> `custom_entity01s`.
pub fn entity_collection(entity_type: &str) -> String {
    let mut snake = String::with_capacity(entity_type.len() + 4);
    for (i, c) in entity_type.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                snake.push('_');
            }
            snake.push(c.to_ascii_lowercase());
        } else {
            snake.push(c);
        }
    }

    if snake.ends_with('s') {
        snake.push_str("es");
    } else if snake.ends_with('y') && !snake.ends_with("ay") && !snake.ends_with("ey") {
        snake.pop();
        snake.push_str("ies");
    } else {
        snake.push('s');
    }
    snake
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::mpsc;

    /// Local HTTP server answering one connection per scripted response.
    /// Each request head is sent back over the returned channel.
    fn scripted_server(responses: Vec<(u16, &'static str)>) -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for (status, body) in responses {
                let (mut stream, _) = listener.accept().unwrap();
                tx.send(read_request(&stream)).unwrap();
                write!(
                    stream,
                    "HTTP/1.1 {} Scripted\r\nContent-Type: application/json\r\n\
                     Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                )
                .unwrap();
            }
        });
        (base_url, rx)
    }

    fn read_request(stream: &TcpStream) -> String {
        let mut reader = BufReader::new(stream);
        let mut head = String::new();
        let mut content_length = 0;
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).unwrap() == 0 {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().unwrap();
                }
            }
            let done = line == "\r\n";
            head.push_str(&line);
            if done {
                break;
            }
        }
        let mut body = vec![0; content_length];
        reader.read_exact(&mut body).unwrap();
        head
    }

    fn http_client(timeout: Duration) -> Client {
        Client::builder().timeout(timeout).build().unwrap()
    }

    fn client_with_token(base_url: &str, token: &str) -> ShotgridClient {
        ShotgridClient {
            http: http_client(Duration::from_secs(5)),
            base_url: base_url.to_string(),
            script_name: "TESTSCRIPT".to_string(),
            api_key: "TESTAPIKEY".to_string(),
            token: Mutex::new(token.to_string()),
            max_retries: 0,
        }
    }

    #[test]
    fn test_unanswered_requests_time_out_after_retries() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/x", listener.local_addr().unwrap());
        thread::spawn(move || {
            // Hold every connection open without replying
            let mut held = Vec::new();
            for stream in listener.incoming() {
                held.push(stream);
            }
        });

        let http = http_client(Duration::from_millis(300));
        let err = send_with_retry(&url, 1, || http.get(&url)).unwrap_err();
        assert!(matches!(err, ClientError::Timeout { attempts: 2, .. }), "got {err:?}");
        assert!(err.to_string().contains("timed out after 2 attempt(s)"));
    }

    #[test]
    fn test_busy_status_is_retried() {
        let (base_url, requests) = scripted_server(vec![
            (503, r#"{"errors": [{"title": "Service Unavailable"}]}"#),
            (200, r#"{"data": {"ok": true}}"#),
        ]);
        let url = format!("{}/x", base_url);
        let http = http_client(Duration::from_secs(5));

        let value = send_with_retry(&url, 1, || http.get(&url)).unwrap();
        assert_eq!(value, json!({"data": {"ok": true}}));
        assert_eq!(requests.try_iter().count(), 2);
    }

    #[test]
    fn test_busy_status_without_retries_left_is_an_api_error() {
        let (base_url, requests) =
            scripted_server(vec![(503, r#"{"errors": [{"title": "Service Unavailable"}]}"#)]);
        let url = format!("{}/x", base_url);
        let http = http_client(Duration::from_secs(5));

        let err = send_with_retry(&url, 0, || http.get(&url)).unwrap_err();
        assert!(matches!(err, ClientError::Api { status: 503, ref message } if message == "Service Unavailable"));
        assert_eq!(requests.try_iter().count(), 1);
    }

    #[test]
    fn test_rejected_token_is_refreshed_once() {
        let (base_url, requests) = scripted_server(vec![
            (401, r#"{"errors": [{"title": "Unauthorized", "detail": "token expired"}]}"#),
            (200, r#"{"token_type": "Bearer", "access_token": "fresh", "expires_in": 600}"#),
            (200, r#"{"data": {"properties": {}}}"#),
        ]);
        let client = client_with_token(&base_url, "stale");

        let schema = client.read_field_schema("Sequence", "sg_cut_duration").unwrap();
        assert_eq!(schema, FieldSchema::default());
        assert_eq!(client.current_token(), "fresh");

        let heads: Vec<String> = requests.try_iter().collect();
        assert_eq!(heads.len(), 3);
        assert!(heads[0].starts_with("GET /api/v1/schema/sequences/fields/sg_cut_duration "));
        assert!(heads[0].contains("Bearer stale"));
        assert!(heads[1].starts_with("POST /api/v1/auth/access_token "));
        assert!(heads[2].contains("Bearer fresh"));
    }

    #[test]
    fn test_second_rejection_is_returned() {
        let unauthorized = r#"{"errors": [{"title": "Unauthorized"}]}"#;
        let (base_url, requests) = scripted_server(vec![
            (401, unauthorized),
            (200, r#"{"access_token": "fresh"}"#),
            (401, unauthorized),
        ]);
        let client = client_with_token(&base_url, "stale");

        let err = client.read_field_schema("Sequence", "code").unwrap_err();
        assert!(matches!(err, ClientError::Api { status: 401, .. }));
        assert_eq!(requests.try_iter().count(), 3);
    }

    #[test]
    fn test_entity_collection() {
        assert_eq!(entity_collection("Sequence"), "sequences");
        assert_eq!(entity_collection("Shot"), "shots");
        assert_eq!(entity_collection("Version"), "versions");
        assert_eq!(entity_collection("CustomEntity01"), "custom_entity01s");
        assert_eq!(entity_collection("HumanUser"), "human_users");
        assert_eq!(entity_collection("Delivery"), "deliveries");
        assert_eq!(entity_collection("Status"), "statuses");
    }

    #[test]
    fn test_error_body_message() {
        let body = json!({"errors": [
            {"status": 400, "title": "Invalid filter", "detail": "field 'sg_nope' does not exist"},
            {"status": 400, "title": "Bad request", "detail": ""}
        ]});
        assert_eq!(
            api_error_message(&body).unwrap(),
            "field 'sg_nope' does not exist; Bad request"
        );
        assert_eq!(api_error_message(&json!({"data": []})), None);
    }

    #[test]
    fn test_parse_body_statuses() {
        let ok = parse_body("u", StatusCode::OK, r#"{"data": {"summaries": {}}}"#).unwrap();
        assert_eq!(ok, json!({"data": {"summaries": {}}}));

        let err = parse_body(
            "u",
            StatusCode::BAD_REQUEST,
            r#"{"errors": [{"title": "Invalid filter"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ClientError::Api { status: 400, ref message } if message == "Invalid filter"));

        let err = parse_body("u", StatusCode::FORBIDDEN, "denied").unwrap_err();
        assert!(matches!(err, ClientError::Api { status: 403, ref message } if message == "denied"));

        assert!(matches!(
            parse_body("u", StatusCode::OK, "<html>").unwrap_err(),
            ClientError::Decode { .. }
        ));
    }

    #[test]
    fn test_record_to_entity_flattens_attributes() {
        let record = json!({
            "type": "Sequence",
            "id": 300,
            "attributes": {"code": "SQ010"},
            "relationships": {"project": {"data": {"id": 85, "type": "Project"}}},
            "links": {"self": "/api/v1/entity/sequences/300"}
        });
        let entity = record_to_entity("u", record).unwrap();
        assert_eq!(entity.id, 300);
        assert_eq!(entity.entity_type, "Sequence");
        assert_eq!(entity.field("code"), json!("SQ010"));
        assert_eq!(entity.field("project"), json!({"id": 85, "type": "Project"}));
        assert_eq!(entity.field("links"), Value::Null);

        assert!(record_to_entity("u", json!({"type": "Sequence"})).is_err());
    }

    #[test]
    fn test_take_data() {
        assert_eq!(take_data("u", json!({"data": [1, 2]})).unwrap(), json!([1, 2]));
        assert!(take_data("u", json!({"links": {}})).is_err());
    }

    #[test]
    fn test_backoff_grows() {
        assert_eq!(backoff(1), Duration::from_millis(250));
        assert_eq!(backoff(2), Duration::from_millis(500));
        assert_eq!(backoff(3), Duration::from_millis(1000));
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_retryable_status(StatusCode::BAD_REQUEST));
    }
}

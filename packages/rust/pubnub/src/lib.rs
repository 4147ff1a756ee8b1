//! PubNub REST channel adapter.
//!
//! Publishing uses the `/publish` endpoint; receiving uses the `/v2/subscribe`
//! long-poll, tracking the timetoken cursor between polls. There is no
//! delivery acknowledgment beyond PubNub's own `[1, "Sent", tt]` reply.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use jobrelay_shared::{PubNubSettings, Publisher, RelayError, Result, Subscriber};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument};
use url::Url;

/// Subscribe long-polls are held open by the server for up to ~280s.
const SUBSCRIBE_TIMEOUT_SECS: u64 = 310;

/// User-Agent string for channel requests.
const USER_AGENT: &str = concat!("jobrelay/", env!("CARGO_PKG_VERSION"));

/// Client for one publish/subscribe key pair.
#[derive(Debug, Clone)]
pub struct PubNubClient {
    publish_http: Client,
    subscribe_http: Client,
    origin: Url,
    publish_key: String,
    subscribe_key: String,
    user_id: String,
}

// ---------------------------------------------------------------------------
// Subscribe wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SubscribeResponse {
    t: Cursor,
    #[serde(default)]
    m: Vec<Envelope>,
}

#[derive(Debug, Deserialize)]
struct Cursor {
    t: String,
    #[serde(default)]
    r: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    /// Channel the message was published on.
    #[serde(default)]
    c: Option<String>,
    /// Message payload.
    d: Value,
}

impl PubNubClient {
    pub fn new(settings: &PubNubSettings) -> Result<Self> {
        let build = |secs: u64| {
            Client::builder()
                .user_agent(USER_AGENT)
                .timeout(Duration::from_secs(secs))
                .build()
                .map_err(|e| RelayError::Transport(format!("failed to build HTTP client: {e}")))
        };

        Ok(Self {
            publish_http: build(settings.publish_timeout_secs)?,
            subscribe_http: build(SUBSCRIBE_TIMEOUT_SECS)?,
            origin: settings.origin.clone(),
            publish_key: settings.publish_key.clone(),
            subscribe_key: settings.subscribe_key.clone(),
            user_id: settings.user_id.clone(),
        })
    }

    /// Open a subscription cursor on `channel`. No request is made until the
    /// first [`Subscriber::next_message`] call.
    pub fn subscribe(&self, channel: impl Into<String>) -> PubNubSubscription {
        PubNubSubscription {
            client: self.clone(),
            channel: channel.into(),
            timetoken: "0".into(),
            region: None,
            buffer: VecDeque::new(),
        }
    }

    /// Build `{origin}/{segments...}`, percent-encoding each segment.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.origin.clone();
        url.path_segments_mut()
            .map_err(|_| RelayError::config(format!("invalid PubNub origin: {}", self.origin)))?
            .pop_if_empty()
            .extend(segments);
        url.query_pairs_mut().append_pair("uuid", &self.user_id);
        Ok(url)
    }
}

#[async_trait]
impl Publisher for PubNubClient {
    #[instrument(skip(self, message))]
    async fn publish(&self, channel: &str, message: &Value) -> Result<()> {
        let payload = serde_json::to_string(message)
            .map_err(|e| RelayError::validation(format!("unserializable message: {e}")))?;
        let url = self.url(&[
            "publish",
            &self.publish_key,
            &self.subscribe_key,
            "0",
            channel,
            "0",
            &payload,
        ])?;

        let response = self
            .publish_http
            .get(url)
            .send()
            .await
            .map_err(|e| RelayError::Transport(format!("publish to {channel}: {e}")))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(RelayError::Transport(format!(
                "publish to {channel}: HTTP {status}: {body}"
            )));
        }

        // Success reply is `[1, "Sent", "<timetoken>"]`.
        let reply: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
        match reply.get(0).and_then(Value::as_i64) {
            Some(1) => {
                debug!(timetoken = ?reply.get(2), "published");
                Ok(())
            }
            _ => Err(RelayError::Transport(format!(
                "publish to {channel}: unexpected reply {body}"
            ))),
        }
    }
}

/// Long-poll cursor over one channel.
#[derive(Debug)]
pub struct PubNubSubscription {
    client: PubNubClient,
    channel: String,
    timetoken: String,
    region: Option<i64>,
    buffer: VecDeque<Value>,
}

impl PubNubSubscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Run one long-poll and buffer whatever it returns.
    async fn poll(&mut self) -> Result<()> {
        let mut url = self.client.url(&[
            "v2",
            "subscribe",
            &self.client.subscribe_key,
            &self.channel,
            "0",
        ])?;
        url.query_pairs_mut().append_pair("tt", &self.timetoken);
        if let Some(region) = self.region {
            url.query_pairs_mut().append_pair("tr", &region.to_string());
        }

        let response = self
            .client
            .subscribe_http
            .get(url)
            .send()
            .await
            .map_err(|e| RelayError::Transport(format!("subscribe to {}: {e}", self.channel)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Transport(format!(
                "subscribe to {}: HTTP {status}: {body}",
                self.channel
            )));
        }

        let parsed: SubscribeResponse = response.json().await.map_err(|e| {
            RelayError::Transport(format!("subscribe to {}: invalid reply: {e}", self.channel))
        })?;

        if self.timetoken == "0" {
            info!(channel = %self.channel, "connected to channel");
        }
        self.timetoken = parsed.t.t;
        self.region = parsed.t.r.or(self.region);

        for envelope in parsed.m {
            if envelope.c.as_deref().is_some_and(|c| c != self.channel) {
                continue;
            }
            self.buffer.push_back(envelope.d);
        }
        Ok(())
    }
}

#[async_trait]
impl Subscriber for PubNubSubscription {
    async fn next_message(&mut self) -> Result<Option<Value>> {
        loop {
            if let Some(message) = self.buffer.pop_front() {
                return Ok(Some(message));
            }
            self.poll().await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, path_regex, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(server: &MockServer) -> PubNubSettings {
        PubNubSettings {
            publish_key: "pub-c-1".into(),
            subscribe_key: "sub-c-1".into(),
            origin: Url::parse(&server.uri()).unwrap(),
            user_id: "job-processor-worker".into(),
            job_channel: "job-requests".into(),
            response_channel: "job-responses".into(),
            reconnect_delay_ms: 10,
            publish_timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn slow_publish_times_out_as_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/publish/.+$"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([1, "Sent", "17000000000000000"]))
                    .set_delay(std::time::Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let client = PubNubClient::new(&PubNubSettings {
            publish_timeout_secs: 1,
            ..settings(&server)
        })
        .unwrap();
        let err = client
            .publish("job-responses", &json!({"success": true}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "transport");
    }

    #[tokio::test]
    async fn publish_encodes_message_in_path() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/publish/pub-c-1/sub-c-1/0/job-responses/0/.+$"))
            .and(query_param("uuid", "job-processor-worker"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([1, "Sent", "17000000000000000"])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = PubNubClient::new(&settings(&server)).unwrap();
        client
            .publish("job-responses", &json!({"status": "success", "note": "a/b c"}))
            .await
            .expect("publish");

        let requests = server.received_requests().await.unwrap();
        let last = requests[0].url.path_segments().unwrap().last().unwrap().to_string();
        // The payload is a single, percent-encoded path segment.
        assert!(last.contains("%22status%22"));
        assert!(!last.contains('/'));
    }

    #[tokio::test]
    async fn publish_rejection_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([0, "Invalid Key", "0"])))
            .mount(&server)
            .await;

        let client = PubNubClient::new(&settings(&server)).unwrap();
        let err = client.publish("job-responses", &json!({})).await.unwrap_err();
        assert!(matches!(err, RelayError::Transport(_)));
    }

    #[tokio::test]
    async fn subscribe_follows_timetoken() {
        let server = MockServer::start().await;
        let sub_path = "/v2/subscribe/sub-c-1/job-requests/0";

        Mock::given(method("GET"))
            .and(path(sub_path))
            .and(query_param("tt", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "t": {"t": "100", "r": 12},
                "m": []
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(sub_path))
            .and(query_param("tt", "100"))
            .and(query_param("tr", "12"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "t": {"t": "101", "r": 12},
                "m": [
                    {"c": "job-requests", "d": {"query": "first"}},
                    {"c": "job-requests", "d": {"query": "second"}}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = PubNubClient::new(&settings(&server)).unwrap();
        let mut sub = client.subscribe("job-requests");

        let first = sub.next_message().await.unwrap().unwrap();
        assert_eq!(first["query"], "first");
        // Second message comes from the buffer without another poll.
        let second = sub.next_message().await.unwrap().unwrap();
        assert_eq!(second["query"], "second");
        assert_eq!(sub.timetoken, "101");
    }

    #[tokio::test]
    async fn subscribe_error_keeps_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = PubNubClient::new(&settings(&server)).unwrap();
        let mut sub = client.subscribe("job-requests");
        assert!(sub.next_message().await.is_err());
        assert_eq!(sub.timetoken, "0");
    }
}

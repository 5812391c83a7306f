// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Default HTTP transport for the collector's track and engage endpoints.

use std::time::Duration;

use async_trait::async_trait;
use base64::prelude::{Engine as _, BASE64_STANDARD};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::error::{Result, TallyError};
use crate::transport::{FlushBatch, Transport};

/// SDK version for identification.
const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the User-Agent sent with every request: `tally-rust/{version}`.
pub fn user_agent() -> String {
	format!("tally-rust/{SDK_VERSION}")
}

/// Posts events to `{server_url}/track` and profile updates to
/// `{server_url}/engage`, each as a form field `data` holding the
/// base64-encoded JSON array of records.
#[derive(Debug, Clone)]
pub struct HttpTransport {
	client: Client,
	server_url: String,
}

impl HttpTransport {
	/// Creates a transport for `server_url` with a per-request timeout.
	pub fn new(server_url: &str, timeout: Duration) -> Result<Self> {
		let parsed =
			Url::parse(server_url).map_err(|e| TallyError::InvalidServerUrl(e.to_string()))?;
		if !matches!(parsed.scheme(), "http" | "https") {
			return Err(TallyError::InvalidServerUrl(format!(
				"unsupported scheme '{}'",
				parsed.scheme()
			)));
		}

		let client = Client::builder()
			.user_agent(user_agent())
			.timeout(timeout)
			.build()?;

		Ok(Self {
			client,
			server_url: server_url.trim_end_matches('/').to_string(),
		})
	}

	async fn post(&self, endpoint: &str, records: &[Value]) -> Result<()> {
		let url = format!("{}/{endpoint}", self.server_url);
		let data = BASE64_STANDARD.encode(serde_json::to_vec(records)?);
		let body = url::form_urlencoded::Serializer::new(String::new())
			.append_pair("data", &data)
			.append_pair("ip", "1")
			.finish();

		debug!(url = %url, count = records.len(), "posting records");

		let response = self
			.client
			.post(&url)
			.header(
				reqwest::header::CONTENT_TYPE,
				"application/x-www-form-urlencoded",
			)
			.body(body)
			.send()
			.await?;

		let status = response.status();
		if status == StatusCode::TOO_MANY_REQUESTS {
			let retry_after = response
				.headers()
				.get(reqwest::header::RETRY_AFTER)
				.and_then(|v| v.to_str().ok())
				.and_then(|s| s.parse().ok());
			return Err(TallyError::RateLimited {
				retry_after_secs: retry_after,
			});
		}

		let message = response.text().await.unwrap_or_default();
		if !status.is_success() {
			return Err(TallyError::ServerError {
				status: status.as_u16(),
				message,
			});
		}

		// The collector answers "0" when it refused the payload.
		if message.trim() == "0" {
			warn!(url = %url, "collector rejected batch");
			return Err(TallyError::ServerError {
				status: status.as_u16(),
				message: "collector rejected batch".to_string(),
			});
		}

		Ok(())
	}
}

#[async_trait]
impl Transport for HttpTransport {
	async fn send(&self, batch: &FlushBatch) -> Result<()> {
		if !batch.events.is_empty() {
			let records: Vec<Value> = batch
				.events
				.iter()
				.map(|event| event.to_wire(&batch.token))
				.collect();
			self.post("track", &records).await?;
		}

		let updates: Vec<Value> = batch
			.profile_updates
			.iter()
			.filter_map(|update| update.to_wire(&batch.token))
			.collect();
		if !updates.is_empty() {
			self.post("engage", &updates).await?;
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tally_core::{Event, ProfileOp, ProfileUpdate, Properties};
	use wiremock::matchers::{body_string_contains, header, method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	fn batch(events: usize, updates: usize) -> FlushBatch {
		FlushBatch {
			token: "tok_123".to_string(),
			events: (0..events)
				.map(|i| Event::new(format!("event{i}"), Properties::new(), "device"))
				.collect(),
			profile_updates: (0..updates)
				.map(|_| ProfileUpdate::new(ProfileOp::ClearCharges, Some("u1".to_string())))
				.collect(),
		}
	}

	fn transport(server: &MockServer) -> HttpTransport {
		HttpTransport::new(&server.uri(), Duration::from_secs(5)).unwrap()
	}

	#[test]
	fn test_rejects_invalid_url() {
		assert!(matches!(
			HttpTransport::new("not a url", Duration::from_secs(1)),
			Err(TallyError::InvalidServerUrl(_))
		));
		assert!(matches!(
			HttpTransport::new("ftp://example.com", Duration::from_secs(1)),
			Err(TallyError::InvalidServerUrl(_))
		));
	}

	#[test]
	fn test_user_agent_format() {
		assert!(user_agent().starts_with("tally-rust/"));
	}

	#[tokio::test]
	async fn test_posts_events_and_updates_to_separate_endpoints() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/track"))
			.and(header("content-type", "application/x-www-form-urlencoded"))
			.and(body_string_contains("data="))
			.respond_with(ResponseTemplate::new(200).set_body_string("1"))
			.expect(1)
			.mount(&server)
			.await;
		Mock::given(method("POST"))
			.and(path("/engage"))
			.respond_with(ResponseTemplate::new(200).set_body_string("1"))
			.expect(1)
			.mount(&server)
			.await;

		transport(&server).send(&batch(2, 1)).await.unwrap();
	}

	#[tokio::test]
	async fn test_payload_is_base64_json() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/track"))
			.respond_with(ResponseTemplate::new(200).set_body_string("1"))
			.mount(&server)
			.await;

		transport(&server).send(&batch(1, 0)).await.unwrap();

		let requests = server.received_requests().await.unwrap();
		let body = String::from_utf8(requests[0].body.clone()).unwrap();
		let data = url::form_urlencoded::parse(body.as_bytes())
			.find(|(k, _)| k == "data")
			.map(|(_, v)| v.into_owned())
			.unwrap();
		let decoded: Value = serde_json::from_slice(&BASE64_STANDARD.decode(data).unwrap()).unwrap();
		assert_eq!(decoded[0]["event"], "event0");
		assert_eq!(decoded[0]["properties"]["token"], "tok_123");
	}

	#[tokio::test]
	async fn test_skips_empty_endpoints() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(200).set_body_string("1"))
			.expect(0)
			.mount(&server)
			.await;

		transport(&server).send(&batch(0, 0)).await.unwrap();
	}

	#[tokio::test]
	async fn test_server_error_is_reported() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
			.mount(&server)
			.await;

		let err = transport(&server).send(&batch(1, 0)).await.unwrap_err();
		assert!(matches!(err, TallyError::ServerError { status: 503, .. }));
		assert!(err.is_retryable());
	}

	#[tokio::test]
	async fn test_rate_limit_reads_retry_after() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "12"))
			.mount(&server)
			.await;

		let err = transport(&server).send(&batch(1, 0)).await.unwrap_err();
		assert_eq!(err.retry_after(), Some(Duration::from_secs(12)));
	}

	#[tokio::test]
	async fn test_zero_body_means_rejected() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(200).set_body_string("0"))
			.mount(&server)
			.await;

		assert!(transport(&server).send(&batch(1, 0)).await.is_err());
	}
}

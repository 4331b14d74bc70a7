//! Channel endpoints.
//!
//! # Responsibilities
//! - Long-poll subscribe: hold the request until one message or the idle timeout
//! - Event-stream subscribe: `text/event-stream` for the life of the connection
//! - Publish, inspect and close channels on the loopback endpoint
//!
//! # Design Decisions
//! - The handler owns the `Subscription`; a client disconnect drops the
//!   handler future and with it the registration
//! - A long-poll timeout is a normal 204, never logged as an error

use std::convert::Infallible;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderValue, Method, Request, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::stream;
use serde_json::json;

use crate::broker::{Broker, DeliveryMode, Message, PollOutcome, Subscription};
use crate::config::BrokerConfig;
use crate::error::GatewayError;

pub const X_CHANNEL_SEQUENCE: &str = "x-channel-sequence";

/// Media type assumed when a publisher sends none.
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain";

/// Broker access plus the knobs its endpoints need.
#[derive(Clone)]
pub struct ChannelService {
    pub broker: Broker,
    long_poll_timeout: Duration,
    keepalive: Duration,
    max_message_size: usize,
    max_body_size: usize,
}

impl ChannelService {
    pub fn new(broker: Broker, config: &BrokerConfig, max_body_size: usize) -> Self {
        Self {
            broker,
            long_poll_timeout: Duration::from_secs(config.long_poll_timeout_secs),
            keepalive: Duration::from_secs(config.stream_keepalive_secs),
            max_message_size: config.max_message_size,
            max_body_size,
        }
    }

    /// Serve a subscribe request.
    pub async fn subscribe(&self, channel: String, mode: DeliveryMode, method: &Method) -> Response {
        if method != Method::GET {
            return method_not_allowed("GET");
        }
        let subscription = self.broker.subscribe(&channel, mode);
        match mode {
            DeliveryMode::LongPoll => self.long_poll(channel, subscription).await,
            DeliveryMode::EventStream => self.event_stream(subscription),
        }
    }

    async fn long_poll(&self, channel: String, subscription: Subscription) -> Response {
        match subscription.poll(self.long_poll_timeout).await {
            PollOutcome::Message(message) => delivery_response(&message),
            PollOutcome::TimedOut => GatewayError::SubscriptionTimedOut { channel }.into_response(),
            PollOutcome::Closed => {
                tracing::debug!(channel = %channel, "Long poll ended by channel close");
                StatusCode::NO_CONTENT.into_response()
            }
        }
    }

    fn event_stream(&self, subscription: Subscription) -> Response {
        let events = stream::unfold(subscription, |mut subscription| async move {
            let message = subscription.recv().await?;
            Some((Ok::<_, Infallible>(stream_event(&message)), subscription))
        });
        Sse::new(events)
            .keep_alive(KeepAlive::new().interval(self.keepalive))
            .into_response()
    }

    /// Serve a request on a publish path.
    pub async fn publish(&self, channel: String, request: Request<Body>) -> Response {
        match *request.method() {
            Method::POST | Method::PUT => {}
            Method::GET | Method::HEAD => return Json(self.broker.channel_info(&channel)).into_response(),
            Method::DELETE => {
                let closed = self.broker.close_channel(&channel);
                return Json(json!({ "channel": channel, "closed": closed })).into_response();
            }
            _ => return method_not_allowed("GET, HEAD, POST, PUT, DELETE"),
        }

        let declared = request
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if let Some(size) = declared.filter(|size| *size > self.max_message_size) {
            return self.too_large(size);
        }

        let content_type = request
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();

        let payload = match axum::body::to_bytes(request.into_body(), self.max_body_size).await {
            Ok(payload) => payload,
            Err(e) => {
                tracing::debug!(channel = %channel, error = %e, "Publish body unreadable");
                return StatusCode::BAD_REQUEST.into_response();
            }
        };
        if payload.len() > self.max_message_size {
            return self.too_large(payload.len());
        }

        let receipt = self.broker.publish(&channel, payload, Some(content_type));
        (StatusCode::ACCEPTED, Json(receipt)).into_response()
    }

    fn too_large(&self, size: usize) -> Response {
        GatewayError::PayloadTooLarge {
            size,
            limit: self.max_message_size,
        }
        .into_response()
    }
}

fn delivery_response(message: &Message) -> Response {
    let content_type = message
        .content_type
        .as_deref()
        .and_then(|v| HeaderValue::from_str(v).ok())
        .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));

    let mut response = Response::new(Body::from(message.payload.clone()));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(X_CHANNEL_SEQUENCE, HeaderValue::from(message.sequence));
    response
}

/// One SSE frame. The event stream is a text protocol: payloads that are not
/// UTF-8 are delivered with invalid sequences replaced by U+FFFD, and line
/// endings are normalised to LF since `data:` lines cannot carry a bare CR.
/// Long-poll delivers the published bytes unchanged.
fn stream_event(message: &Message) -> Event {
    let text = String::from_utf8_lossy(&message.payload);
    let data = text.replace("\r\n", "\n").replace('\r', "\n");
    Event::default().id(message.sequence.to_string()).data(data)
}

fn method_not_allowed(allow: &'static str) -> Response {
    let mut response = StatusCode::METHOD_NOT_ALLOWED.into_response();
    response
        .headers_mut()
        .insert(header::ALLOW, HeaderValue::from_static(allow));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn service() -> ChannelService {
        let config = BrokerConfig {
            long_poll_timeout_secs: 1,
            max_message_size: 16,
            ..BrokerConfig::default()
        };
        ChannelService::new(Broker::new(&config), &config, 1024)
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn post(body: &'static str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn long_poll_delivery_echoes_content_type() {
        let service = service();
        let waiter = {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .subscribe("abc".into(), DeliveryMode::LongPoll, &Method::GET)
                    .await
            })
        };
        while service.broker.channel_info("abc").subscribers == 0 {
            tokio::task::yield_now().await;
        }

        let published = service.publish("abc".into(), post(r#"{"n":1}"#)).await;
        assert_eq!(published.status(), StatusCode::ACCEPTED);
        let receipt: serde_json::Value = serde_json::from_str(&body_string(published).await).unwrap();
        assert_eq!(receipt["delivered"], 1);
        assert_eq!(receipt["sequence"], 1);

        let response = waiter.await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(response.headers()[X_CHANNEL_SEQUENCE], "1");
        assert_eq!(body_string(response).await, r#"{"n":1}"#);
    }

    #[tokio::test]
    async fn idle_long_poll_is_no_content() {
        let response = service()
            .subscribe("quiet".into(), DeliveryMode::LongPoll, &Method::GET)
            .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn oversized_publish_is_rejected() {
        let response = service()
            .publish("abc".into(), post("this body is longer than sixteen bytes"))
            .await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn info_and_close_on_publish_path() {
        let service = service();
        let _subscription = service.broker.subscribe("abc", DeliveryMode::EventStream);

        let info = service
            .publish("abc".into(), Request::builder().method(Method::GET).body(Body::empty()).unwrap())
            .await;
        let info: serde_json::Value = serde_json::from_str(&body_string(info).await).unwrap();
        assert_eq!(info["subscribers"], 1);

        let closed = service
            .publish("abc".into(), Request::builder().method(Method::DELETE).body(Body::empty()).unwrap())
            .await;
        let closed: serde_json::Value = serde_json::from_str(&body_string(closed).await).unwrap();
        assert_eq!(closed["closed"], 1);
        assert_eq!(service.broker.channel_count(), 0);
    }

    #[tokio::test]
    async fn subscribe_requires_get() {
        let response = service()
            .subscribe("abc".into(), DeliveryMode::EventStream, &Method::POST)
            .await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    async fn render(messages: Vec<Message>) -> String {
        let events: Vec<Result<Event, Infallible>> = messages.iter().map(|m| Ok(stream_event(m))).collect();
        body_string(Sse::new(stream::iter(events)).into_response()).await
    }

    #[tokio::test]
    async fn stream_event_normalises_carriage_returns() {
        let message = Message {
            sequence: 7,
            payload: Bytes::from_static(b"line1\r\nline2\rline3"),
            content_type: None,
        };
        let body = render(vec![message]).await;

        assert!(!body.contains('\r'), "{body:?}");
        assert!(body.contains("id: 7\n"), "{body:?}");
        assert_eq!(body.matches("data: ").count(), 3, "{body:?}");
        assert!(body.contains("data: line1\ndata: line2\ndata: line3\n"), "{body:?}");
    }

    #[tokio::test]
    async fn binary_payload_is_exact_on_long_poll_and_replaced_on_stream() {
        let payload = Bytes::from_static(b"ok\xff\xfe");
        let service = service();
        let waiter = {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .subscribe("bin".into(), DeliveryMode::LongPoll, &Method::GET)
                    .await
            })
        };
        while service.broker.channel_info("bin").subscribers == 0 {
            tokio::task::yield_now().await;
        }
        service.broker.publish("bin", payload.clone(), None);

        let response = waiter.await.unwrap();
        let delivered = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(delivered, payload);

        let body = render(vec![Message {
            sequence: 1,
            payload,
            content_type: None,
        }])
        .await;
        assert!(body.contains("data: ok\u{fffd}\u{fffd}\n"), "{body:?}");
    }
}

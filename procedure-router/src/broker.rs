//! Pub/sub broker bridge
//!
//! Realtime sessions on different server instances reach each other through a
//! [`Broker`]: a message published on a channel is delivered to every
//! subscriber of that channel on every instance. The router only relies on that
//! contract; replication and persistence are the broker's business.
//!
//! Two implementations ship with the crate:
//!
//! - [`RestBroker`] talks to a REST pub/sub endpoint over HTTP. Publishing is
//!   `POST {url}/publish/{channel}`; subscribing is a server-sent event stream
//!   from `GET {url}/subscribe/{channel}`.
//! - [`MemoryBroker`] fans out inside the current process. Useful for tests and
//!   single-instance deployments.
//!
//! A [`BrokerFactory`] turns the credentials resolved from the environment at
//! connection time into a broker.

use crate::config::RpcConfig;
use crate::env::Env;
use crate::{RpcError, RpcResult};
use async_trait::async_trait;
use bytes::BytesMut;
use dashmap::DashMap;
use futures::StreamExt;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use url::Url;

/// Buffered messages per subscription before the forwarder applies backpressure.
const SUBSCRIPTION_BUFFER: usize = 256;

// =============================================================================
// Credentials
// =============================================================================

/// Endpoint and access token of the broker.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BrokerCredentials {
    /// Base URL of the REST endpoint
    pub url: String,
    /// Bearer token
    pub token: String,
}

impl BrokerCredentials {
    /// Credentials from explicit values
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
        }
    }

    /// Resolve both values from `env`.
    ///
    /// # Errors
    ///
    /// `SERVICE_UNAVAILABLE` with remediation steps when either value is missing.
    pub fn resolve(env: &Env, config: &RpcConfig) -> RpcResult<Self> {
        match (env.get(&config.broker_url_var), env.get(&config.broker_token_var)) {
            (Some(url), Some(token)) => Ok(Self { url, token }),
            (url, token) => {
                warn!(
                    url_present = url.is_some(),
                    token_present = token.is_some(),
                    "Broker credentials missing from environment"
                );
                Err(RpcError::service_unavailable(missing_credentials_message(config)))
            }
        }
    }
}

impl fmt::Debug for BrokerCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerCredentials")
            .field("url", &self.url)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

fn missing_credentials_message(config: &RpcConfig) -> String {
    format!(
        "Missing required environment variables for realtime connections.\n\n\
         Realtime procedures keep sessions on different server instances in sync \
         through a pub/sub broker, and no broker is configured.\n\n\
         To fix this error:\n\
         1. Provision a REST pub/sub broker and note its endpoint URL and access token\n\
         2. Set {} and {} in the server environment\n\
         3. Restart the server\n",
        config.broker_url_var, config.broker_token_var
    )
}

// =============================================================================
// Broker trait
// =============================================================================

/// Publish/subscribe by channel. Implementations must tolerate concurrent use
/// from any number of sessions.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Deliver `message` to every current subscriber of `channel`
    async fn publish(&self, channel: &str, message: &str) -> RpcResult<()>;

    /// Start receiving the messages published on `channel`
    async fn subscribe(&self, channel: &str) -> RpcResult<BrokerSubscription>;
}

/// Stream of messages from one channel. Dropping it unsubscribes.
#[derive(Debug)]
pub struct BrokerSubscription {
    rx: mpsc::Receiver<String>,
    task: Option<JoinHandle<()>>,
}

impl BrokerSubscription {
    /// Wrap a receiver fed by `task`; the task is aborted when the subscription drops.
    pub fn new(rx: mpsc::Receiver<String>, task: Option<JoinHandle<()>>) -> Self {
        Self { rx, task }
    }

    /// Next message, or `None` once the channel is gone
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

impl Drop for BrokerSubscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Creates brokers from resolved credentials.
pub trait BrokerFactory: Send + Sync + 'static {
    /// Broker for `credentials`
    fn connect(&self, credentials: &BrokerCredentials) -> RpcResult<Arc<dyn Broker>>;
}

// =============================================================================
// In-process broker
// =============================================================================

/// In-process broker over `tokio::sync::broadcast` channels.
///
/// Clones share the same channels. As a [`BrokerFactory`] it ignores the
/// credentials and always hands out itself.
#[derive(Clone)]
pub struct MemoryBroker {
    channels: Arc<DashMap<String, broadcast::Sender<String>>>,
    capacity: usize,
}

impl MemoryBroker {
    /// Broker whose channels buffer 1024 messages per slow subscriber
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Broker with a custom per-channel buffer
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Number of live subscribers on `channel`
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, channel: &str, message: &str) -> RpcResult<()> {
        if let Some(sender) = self.channels.get(channel) {
            // No receivers is not an error: nobody is listening yet.
            let delivered = sender.send(message.to_owned()).unwrap_or(0);
            trace!(channel = %channel, delivered, "Published to memory channel");
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> RpcResult<BrokerSubscription> {
        let source = self
            .channels
            .entry(channel.to_owned())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let mut guard = ChannelGuard {
            channels: self.channels.clone(),
            channel: channel.to_owned(),
            source: Some(source),
        };

        let task = tokio::spawn(async move {
            let Some(source) = guard.source.as_mut() else {
                return;
            };
            loop {
                match source.recv().await {
                    Ok(message) => {
                        if tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(channel = %guard.channel, skipped, "Memory subscriber lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(BrokerSubscription::new(rx, Some(task)))
    }
}

/// Owns one subscriber's receiver. Dropping it, whether the forwarder ends or
/// is aborted, unsubscribes and removes the channel once it has no receivers.
struct ChannelGuard {
    channels: Arc<DashMap<String, broadcast::Sender<String>>>,
    channel: String,
    source: Option<broadcast::Receiver<String>>,
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        drop(self.source.take());
        if self
            .channels
            .remove_if(&self.channel, |_, sender| sender.receiver_count() == 0)
            .is_some()
        {
            trace!(channel = %self.channel, "Released memory channel");
        }
    }
}

impl BrokerFactory for MemoryBroker {
    fn connect(&self, _credentials: &BrokerCredentials) -> RpcResult<Arc<dyn Broker>> {
        Ok(Arc::new(self.clone()))
    }
}

// =============================================================================
// REST broker
// =============================================================================

/// Broker client for a REST pub/sub endpoint.
#[derive(Clone)]
pub struct RestBroker {
    client: reqwest::Client,
    base: Url,
    token: String,
}

impl RestBroker {
    /// Client for `credentials` sharing `client`'s connection pool.
    pub fn new(client: reqwest::Client, credentials: &BrokerCredentials) -> RpcResult<Self> {
        let base = Url::parse(&credentials.url).map_err(|e| {
            RpcError::service_unavailable(format!("Broker URL '{}' is invalid", credentials.url))
                .with_cause(e.to_string())
        })?;
        Ok(Self {
            client,
            base,
            token: credentials.token.clone(),
        })
    }

    fn endpoint(&self, operation: &str, channel: &str) -> RpcResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| RpcError::service_unavailable("Broker URL cannot carry a path"))?
            .pop_if_empty()
            .push(operation)
            .push(channel);
        Ok(url)
    }
}

fn broker_error(action: &str, err: reqwest::Error) -> RpcError {
    RpcError::service_unavailable(format!("Broker {} failed", action)).with_cause(err.to_string())
}

#[async_trait]
impl Broker for RestBroker {
    async fn publish(&self, channel: &str, message: &str) -> RpcResult<()> {
        let url = self.endpoint("publish", channel)?;
        self.client
            .post(url)
            .bearer_auth(&self.token)
            .body(message.to_owned())
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| broker_error("publish", e))?;
        trace!(channel = %channel, "Published to broker");
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> RpcResult<BrokerSubscription> {
        let url = self.endpoint("subscribe", channel)?;
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .header(http::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| broker_error("subscribe", e))?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let channel = channel.to_owned();
        debug!(channel = %channel, "Broker subscription opened");

        let task = tokio::spawn(async move {
            let mut body = response.bytes_stream();
            let mut pending = BytesMut::new();

            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!(channel = %channel, error = %e, "Broker subscription stream failed");
                        break;
                    }
                };
                pending.extend_from_slice(&chunk);

                while let Some(end) = pending.iter().position(|b| *b == b'\n') {
                    let line = pending.split_to(end + 1);
                    let line = String::from_utf8_lossy(&line);
                    if let Some(message) = parse_event_line(line.trim_end(), &channel)
                        && tx.send(message.to_owned()).await.is_err()
                    {
                        return;
                    }
                }
            }
            debug!(channel = %channel, "Broker subscription closed");
        });

        Ok(BrokerSubscription::new(rx, Some(task)))
    }
}

/// Extract the payload of a `data: message,<channel>,<payload>` event line.
///
/// Subscription confirmations and other event kinds yield `None`.
pub(crate) fn parse_event_line<'a>(line: &'a str, channel: &str) -> Option<&'a str> {
    line.strip_prefix("data:")?
        .trim_start()
        .strip_prefix("message,")?
        .strip_prefix(channel)?
        .strip_prefix(',')
}

/// Default factory: one [`RestBroker`] per endpoint, sharing a single HTTP client.
#[derive(Default)]
pub struct RestBrokerFactory {
    client: reqwest::Client,
    brokers: DashMap<BrokerCredentials, Arc<RestBroker>>,
}

impl RestBrokerFactory {
    /// Factory with a default HTTP client
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory using a preconfigured HTTP client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            brokers: DashMap::new(),
        }
    }
}

impl BrokerFactory for RestBrokerFactory {
    fn connect(&self, credentials: &BrokerCredentials) -> RpcResult<Arc<dyn Broker>> {
        if let Some(broker) = self.brokers.get(credentials) {
            return Ok(broker.clone());
        }
        let broker = Arc::new(RestBroker::new(self.client.clone(), credentials)?);
        self.brokers.insert(credentials.clone(), broker.clone());
        Ok(broker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RpcErrorCode;

    #[test]
    fn test_resolve_reports_missing_credentials() {
        let config = RpcConfig::default();
        let env = Env::from_map([("BROKER_REST_URL", "https://broker.example")]);

        let err = BrokerCredentials::resolve(&env, &config).unwrap_err();
        assert_eq!(err.code, RpcErrorCode::ServiceUnavailable);
        assert!(err.message.contains("BROKER_REST_TOKEN"));
    }

    #[test]
    fn test_resolve_with_custom_vars() {
        let config = RpcConfig::default().with_broker_vars("PUBSUB_URL", "PUBSUB_TOKEN");
        let env = Env::from_map([("PUBSUB_URL", "https://b.example"), ("PUBSUB_TOKEN", "t")]);

        let creds = BrokerCredentials::resolve(&env, &config).unwrap();
        assert_eq!(creds, BrokerCredentials::new("https://b.example", "t"));
        assert!(!format!("{:?}", creds).contains("\"t\""));
    }

    #[test]
    fn test_parse_event_line() {
        assert_eq!(
            parse_event_line(r#"data: message,room-1,["chat",{"a":1,"b":2}]"#, "room-1"),
            Some(r#"["chat",{"a":1,"b":2}]"#)
        );
        assert_eq!(parse_event_line("data: subscribe,room-1,1", "room-1"), None);
        assert_eq!(parse_event_line("data: message,room-2,x", "room-1"), None);
        assert_eq!(parse_event_line("", "room-1"), None);
    }

    #[test]
    fn test_rest_endpoint_escapes_channel() {
        let broker = RestBroker::new(
            reqwest::Client::new(),
            &BrokerCredentials::new("https://broker.example/v1/", "t"),
        )
        .unwrap();
        let url = broker.endpoint("publish", "room/1").unwrap();
        assert_eq!(url.as_str(), "https://broker.example/v1/publish/room%2F1");
    }

    #[test]
    fn test_invalid_url_is_unavailable() {
        let err = RestBroker::new(reqwest::Client::new(), &BrokerCredentials::new("nope", "t"))
            .err()
            .unwrap();
        assert_eq!(err.code, RpcErrorCode::ServiceUnavailable);
    }

    #[tokio::test]
    async fn test_memory_broker_fans_out() {
        let broker = MemoryBroker::new();
        let mut a = broker.subscribe("room").await.unwrap();
        let mut b = broker.subscribe("room").await.unwrap();
        let mut other = broker.subscribe("other").await.unwrap();

        broker.publish("room", "hello").await.unwrap();

        assert_eq!(a.recv().await.as_deref(), Some("hello"));
        assert_eq!(b.recv().await.as_deref(), Some("hello"));
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(50), other.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_memory_publish_without_subscribers_is_ok() {
        let broker = MemoryBroker::new();
        assert!(broker.publish("nobody", "x").await.is_ok());
        assert_eq!(broker.subscriber_count("nobody"), 0);
    }

    #[tokio::test]
    async fn test_dropping_subscription_unsubscribes() {
        let broker = MemoryBroker::new();
        let sub = broker.subscribe("room").await.unwrap();
        assert_eq!(broker.subscriber_count("room"), 1);

        drop(sub);
        // The forwarder task is aborted; its receiver goes away once the runtime reaps it.
        for _ in 0..50 {
            if broker.subscriber_count("room") == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(broker.subscriber_count("room"), 0);
    }

    #[tokio::test]
    async fn test_idle_channels_are_released() {
        let broker = MemoryBroker::new();
        let mut subs = Vec::new();
        for i in 0..100 {
            subs.push(broker.subscribe(&format!("room-{}", i)).await.unwrap());
        }
        let shared = broker.subscribe("room-0").await.unwrap();
        assert_eq!(broker.channels.len(), 100);

        drop(subs);
        for _ in 0..50 {
            if broker.channels.len() == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        // room-0 still has a subscriber
        assert_eq!(broker.channels.len(), 1);
        assert_eq!(broker.subscriber_count("room-0"), 1);

        drop(shared);
        for _ in 0..50 {
            if broker.channels.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(broker.channels.is_empty());
    }

    #[test]
    fn test_factories_cache_or_share() {
        let creds = BrokerCredentials::new("https://broker.example", "t");
        let factory = RestBrokerFactory::new();
        factory.connect(&creds).unwrap();
        factory.connect(&creds).unwrap();
        assert_eq!(factory.brokers.len(), 1);

        let memory = MemoryBroker::new();
        assert!(memory.connect(&creds).is_ok());
    }
}

//! Request client - the caller-facing side of request/response.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::{Bus, Message, Publisher, CORRELATION_ID, REPLY_TO};
use crate::config::Config;
use crate::deferred::deferred;
use crate::envelope::Codec;
use crate::error::{RequestError, SetupError};
use crate::responder::validate_routing_key;
use crate::tracker::CorrelationTracker;
use crate::transport::{TransportHandle, TransportStats};
use crate::Reply;

/// Per-request settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Overrides `Config::default_timeout_ms` for this request.
    pub timeout: Option<Duration>,
    /// Extra headers sent with the request. `correlationId` and `replyTo`
    /// are always set by the client and take precedence.
    pub headers: Vec<(String, String)>,
}

impl RequestOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }
}

/// Issues requests and correlates their replies.
///
/// Starting a client binds its reply address; once `start` returns `Ok`
/// the client is ready and every request it issues settles exactly once.
///
/// ## Example
///
/// ```ignore
/// let client = Client::start(bus.clone(), Config::default())?;
///
/// match client.request("v1.users.get", &json!({ "user": "Pat" }), RequestOptions::default()).wait() {
///     Ok(data) => println!("got {data}"),
///     Err(RequestError::Fail(fail)) => println!("invalid input: {}", fail.data),
///     Err(RequestError::Error(e)) => println!("{} ({})", e.message, e.code),
///     Err(other) => println!("round trip failed: {other}"),
/// }
/// ```
pub struct Client<B: Bus> {
    bus: Arc<B>,
    tracker: CorrelationTracker,
    codec: Codec,
    config: Config,
    reply_to: String,
    replies: TransportHandle,
}

impl<B: Bus + 'static> Client<B> {
    /// Bind the reply address and start consuming replies.
    pub fn start(bus: Arc<B>, config: Config) -> Result<Self, SetupError> {
        let reply_to = config.resolve_reply_to();
        validate_routing_key(&reply_to)?;

        let codec = Codec::new(config.default_error_code);
        let tracker = CorrelationTracker::new();
        let replies = tracker.listen(Arc::clone(&bus), &reply_to, config.poll_interval(), codec)?;

        info!(reply_to = %reply_to, "request client ready");
        Ok(Self {
            bus,
            tracker,
            codec,
            config,
            reply_to,
            replies,
        })
    }

    /// Publish a request and return its pending reply.
    ///
    /// The reply resolves with the responder's success data, or rejects with
    /// its error or fail envelope, a timeout, or the publish failure. A
    /// failed publish leaves no pending slot behind.
    pub fn request<T: Serialize + ?Sized>(
        &self,
        routing_key: &str,
        payload: &T,
        options: RequestOptions,
    ) -> Reply {
        let body = match self.codec.encode_request(payload) {
            Ok(body) => body,
            Err(e) => return rejected(e.into()),
        };

        let correlation_id = Uuid::new_v4().to_string();
        let timeout = options.timeout.unwrap_or_else(|| self.config.default_timeout());
        let reply = match self.tracker.register(&correlation_id, routing_key, timeout) {
            Ok(reply) => reply,
            Err(e) => return rejected(e.into()),
        };

        let mut message = Message::new(routing_key, body);
        for (key, value) in options.headers {
            message = message.with_header(key, value);
        }
        let message = message
            .with_header(CORRELATION_ID, &correlation_id)
            .with_header(REPLY_TO, &self.reply_to);

        match self.bus.publish(message) {
            Ok(()) => {
                debug!(correlation_id = %correlation_id, routing_key, "request published");
            }
            Err(e) => {
                warn!(
                    correlation_id = %correlation_id,
                    routing_key,
                    error = %e,
                    "request publish failed"
                );
                self.tracker.reject(&correlation_id, RequestError::Transport(e));
            }
        }

        reply
    }

    /// Publish a request and run `callback` with its outcome.
    ///
    /// The callback runs on whichever thread settles the request: the reply
    /// consumer, the timeout thread, or the caller's own thread when the
    /// publish fails.
    pub fn request_with<T, F>(
        &self,
        routing_key: &str,
        payload: &T,
        options: RequestOptions,
        callback: F,
    ) where
        T: Serialize + ?Sized,
        F: FnOnce(Result<Value, RequestError>) + Send + 'static,
    {
        self.request(routing_key, payload, options).on_settle(callback);
    }

    /// The address this client's replies arrive on.
    pub fn reply_to(&self) -> &str {
        &self.reply_to
    }

    pub fn tracker(&self) -> &CorrelationTracker {
        &self.tracker
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of requests awaiting a reply.
    pub fn pending(&self) -> usize {
        self.tracker.pending()
    }

    /// Stop consuming replies. Pending requests run into their timeouts.
    pub fn stop(self) -> TransportStats {
        self.replies.stop()
    }
}

fn rejected(error: RequestError) -> Reply {
    let (completer, reply) = deferred();
    completer.reject(error);
    reply
}

//! The single entry point the rest of the application uses to reach the backend.
//!
//! Every call walks the same path:
//!
//! 1. Offline: sends go to the offline queue; reads fall back to cache/snapshot
//! 2. Fresh cache entry: return it
//! 3. Identical request in flight: share its result
//! 4. Breaker open for the endpoint family: serve the snapshot or fail fast
//! 5. Network call: record the outcome in breaker and cache
//!
//! Steps 2-4 and the bookkeeping after step 5 are synchronous, so nothing
//! can interleave between a check and the update that follows it.

mod keys;
mod outcome;
#[cfg(test)]
pub mod testing;
pub mod types;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::backend::{ApiRequest, Backend, CallError, EndpointFamily};
use crate::breaker::{Admission, BreakerState, CircuitBreaker};
use crate::cache::{FallbackStore, ResponseCache};
use crate::clock::Clock;
use crate::config::{BreakerConfig, Config};
use crate::connectivity::{ConnectivityMonitor, Subscription};
use crate::dedup::Deduplicator;
use crate::queue::{DrainReport, OfflineQueue, QueuedItem};
use crate::store::LocalStore;

pub use keys::RequestKey;
pub use outcome::{Outcome, Source};
use types::{ChatReply, Conversation, ConversationSummary, ToolInfo};

/// Tunables for a [`Gateway`].
#[derive(Debug, Clone)]
pub struct GatewaySettings {
  pub chat_timeout: Duration,
  pub read_timeout: Duration,
  pub write_timeout: Duration,
  pub tools_ttl: chrono::Duration,
  pub conversations_ttl: chrono::Duration,
  pub fallback_window: chrono::Duration,
  pub breaker: BreakerConfig,
}

impl GatewaySettings {
  pub fn from_config(config: &Config) -> Self {
    Self {
      chat_timeout: Duration::from_secs(config.backend.chat_timeout_secs),
      read_timeout: Duration::from_secs(config.backend.read_timeout_secs),
      write_timeout: Duration::from_secs(config.backend.write_timeout_secs),
      tools_ttl: chrono::Duration::seconds(config.cache.tools_ttl_secs),
      conversations_ttl: chrono::Duration::seconds(config.cache.conversations_ttl_secs),
      fallback_window: chrono::Duration::days(config.cache.fallback_window_days),
      breaker: config.breaker.clone(),
    }
  }
}

impl Default for GatewaySettings {
  fn default() -> Self {
    Self::from_config(&Config::default())
  }
}

/// Per-family breaker state, for status display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerStatus {
  pub family: EndpointFamily,
  pub state: BreakerState,
  pub failures: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayStatus {
  pub online: bool,
  pub queued: usize,
  pub in_flight: usize,
  pub breakers: Vec<BreakerStatus>,
}

/// Checks that a successful response has the shape the caller expects.
type Validator = fn(&Value) -> Result<(), CallError>;

/// A prepared backend call.
struct Call {
  key: RequestKey,
  request: ApiRequest,
  /// Live ttl for cacheable reads; `None` means never cached
  cache_ttl: Option<chrono::Duration>,
  validate: Validator,
}

/// State touched after a network call settles. Shared with the in-flight
/// future so bookkeeping happens exactly once per underlying call.
struct Bookkeeping {
  cache: ResponseCache,
  fallback: FallbackStore,
  breakers: Mutex<HashMap<EndpointFamily, CircuitBreaker>>,
  breaker_config: BreakerConfig,
  clock: Arc<dyn Clock>,
}

impl Bookkeeping {
  fn now(&self) -> DateTime<Utc> {
    self.clock.now()
  }

  fn with_breaker<R>(&self, family: EndpointFamily, f: impl FnOnce(&mut CircuitBreaker) -> R) -> R {
    let mut breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
    let breaker = breakers.entry(family).or_insert_with(|| {
      let (threshold, cooldown) = self.breaker_config.for_family(family);
      CircuitBreaker::new(threshold, cooldown)
    });
    f(breaker)
  }

  fn admit(&self, family: EndpointFamily) -> Admission {
    let now = self.now();
    self.with_breaker(family, |b| b.before_call(now))
  }

  fn record(
    &self,
    key: &RequestKey,
    cache_ttl: Option<chrono::Duration>,
    result: &Result<Value, CallError>,
  ) {
    let family = key.family();
    let now = self.now();
    match result {
      Ok(payload) => {
        self.with_breaker(family, |b| b.on_success());
        if let Some(ttl) = cache_ttl {
          let hash = key.cache_hash();
          self.cache.put(&hash, payload.clone(), ttl, now);
          if let Err(e) = self.fallback.put(&hash, payload.clone(), now) {
            tracing::warn!(request = %key.description(), error = %e, "failed to persist fallback snapshot");
          }
        }
      }
      Err(e) if e.trips_breaker() => {
        tracing::warn!(request = %key.description(), family = family.as_str(), error = %e, "backend call failed");
        self.with_breaker(family, |b| b.on_failure(now));
      }
      Err(e) => {
        tracing::debug!(request = %key.description(), error = %e, "backend rejected request");
      }
    }
  }
}

pub struct Gateway {
  backend: Arc<dyn Backend>,
  monitor: Arc<ConnectivityMonitor>,
  queue: OfflineQueue,
  dedup: Deduplicator<Result<Value, CallError>>,
  books: Arc<Bookkeeping>,
  settings: GatewaySettings,
}

impl Gateway {
  /// Build a gateway. The offline queue is restored from `store`.
  pub fn new(
    backend: Arc<dyn Backend>,
    monitor: Arc<ConnectivityMonitor>,
    store: Arc<dyn LocalStore>,
    clock: Arc<dyn Clock>,
    settings: GatewaySettings,
  ) -> color_eyre::Result<Self> {
    let queue = OfflineQueue::load(Arc::clone(&store))?;
    let books = Arc::new(Bookkeeping {
      cache: ResponseCache::new(),
      fallback: FallbackStore::new(store, settings.fallback_window),
      breakers: Mutex::new(HashMap::new()),
      breaker_config: settings.breaker.clone(),
      clock,
    });

    Ok(Self {
      backend,
      monitor,
      queue,
      dedup: Deduplicator::new(),
      books,
      settings,
    })
  }

  pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
    &self.monitor
  }

  /// Register for online/offline transitions.
  pub fn on_connectivity_change<F>(&self, callback: F) -> Subscription
  where
    F: Fn(bool) + Send + Sync + 'static,
  {
    self.monitor.subscribe(callback)
  }

  /// Send a chat message, or queue it if the backend is unreachable.
  pub async fn send_message(
    &self,
    content: &str,
    conversation_id: Option<&str>,
  ) -> Outcome<ChatReply> {
    let item = QueuedItem::new(
      content.to_string(),
      conversation_id.map(String::from),
      self.books.now(),
    );

    if !self.monitor.is_online() {
      let id = item.id.clone();
      return match self.queue.enqueue(item) {
        Ok(()) => Outcome::queued(id),
        Err(e) => {
          tracing::error!(error = %e, "failed to queue message");
          Outcome::failed(&CallError::Storage(e.to_string()))
        }
      };
    }

    match self.deliver(item).await {
      Ok(reply) => Outcome::fresh(reply),
      Err(e) => Outcome::failed(&e),
    }
  }

  /// Tool capabilities the assistant can use. Cached, with a persisted fallback.
  pub async fn list_tools(&self) -> Outcome<Vec<ToolInfo>> {
    let call = Call {
      key: RequestKey::Tools,
      request: ApiRequest::get("/api/chat/tools", self.settings.read_timeout),
      cache_ttl: Some(self.settings.tools_ttl),
      validate: validate::<Vec<ToolInfo>>,
    };
    self.read(call).await
  }

  pub async fn list_conversations(&self) -> Outcome<Vec<ConversationSummary>> {
    let call = Call {
      key: RequestKey::Conversations,
      request: ApiRequest::get("/api/chat/conversations", self.settings.read_timeout),
      cache_ttl: Some(self.settings.conversations_ttl),
      validate: validate::<Vec<ConversationSummary>>,
    };
    self.read(call).await
  }

  pub async fn get_conversation(&self, id: &str) -> Outcome<Conversation> {
    let call = Call {
      key: RequestKey::Conversation { id: id.to_string() },
      request: ApiRequest::get(
        format!("/api/chat/conversations/{}", id),
        self.settings.read_timeout,
      ),
      cache_ttl: None,
      validate: validate::<Conversation>,
    };
    self.read(call).await
  }

  /// Update conversation metadata (e.g. title). Not queued when offline.
  pub async fn update_conversation(&self, id: &str, patch: Value) -> Outcome<Value> {
    let call = Call {
      key: RequestKey::UpdateConversation {
        id: id.to_string(),
        patch: patch.to_string(),
      },
      request: ApiRequest::patch(
        format!("/api/chat/conversations/{}", id),
        patch,
        self.settings.write_timeout,
      ),
      cache_ttl: None,
      validate: validate::<Value>,
    };

    let outcome = self.write(call).await;
    if outcome.success {
      self
        .books
        .cache
        .invalidate(&RequestKey::Conversations.cache_hash());
    }
    outcome
  }

  /// Clear the assistant's session memory. Not queued when offline.
  pub async fn clear_memory(&self, session_id: Option<&str>) -> Outcome<Value> {
    let call = Call {
      key: RequestKey::ClearMemory {
        session: session_id.map(String::from),
      },
      request: ApiRequest::post(
        "/api/chat/memory/clear",
        json!({ "sessionId": session_id }),
        self.settings.write_timeout,
      ),
      cache_ttl: None,
      validate: validate::<Value>,
    };
    self.write(call).await
  }

  /// Replay the offline queue through the live path.
  pub async fn drain_queue(&self) -> DrainReport {
    self
      .queue
      .drain(|item| async move { self.deliver(item).await.map(|_| ()) })
      .await
  }

  /// Drain the queue every time connectivity comes back.
  pub fn spawn_reconnect_worker(self: &Arc<Self>) -> JoinHandle<()> {
    let gateway = Arc::clone(self);
    tokio::spawn(async move {
      loop {
        gateway.monitor.reconnected().await;
        if gateway.queue.is_empty() {
          continue;
        }
        let report = gateway.drain_queue().await;
        if let Some(reason) = &report.stopped_on {
          tracing::info!(remaining = report.remaining, %reason, "drain interrupted, waiting for next reconnect");
        }
      }
    })
  }

  pub fn queued_messages(&self) -> Vec<QueuedItem> {
    self.queue.items()
  }

  pub fn status(&self) -> GatewayStatus {
    let now = self.books.now();
    let breakers = EndpointFamily::ALL
      .iter()
      .map(|&family| {
        self.books.with_breaker(family, |b| BreakerStatus {
          family,
          state: b.state(now),
          failures: b.failure_count(),
        })
      })
      .collect();

    GatewayStatus {
      online: self.monitor.is_online(),
      queued: self.queue.len(),
      in_flight: self.dedup.in_flight(),
      breakers,
    }
  }

  /// Send one message on the live path. Fails with `Offline` instead of queueing.
  async fn deliver(&self, item: QueuedItem) -> Result<ChatReply, CallError> {
    if !self.monitor.is_online() {
      return Err(CallError::Offline);
    }

    let call = Call {
      key: RequestKey::Message {
        client_id: item.id.clone(),
      },
      request: ApiRequest::post(
        "/api/chat/message",
        json!({
          "content": item.content,
          "conversationId": item.conversation_id,
          "clientMessageId": item.id,
        }),
        self.settings.chat_timeout,
      ),
      cache_ttl: None,
      validate: validate::<ChatReply>,
    };

    let value = self.execute(&call).await?;
    decode(value)
  }

  async fn read<T: DeserializeOwned>(&self, call: Call) -> Outcome<T> {
    let hash = call.key.cache_hash();

    if call.cache_ttl.is_some() {
      if let Some(payload) = self.books.cache.get(&hash, self.books.now()) {
        tracing::debug!(request = %call.key.description(), "cache hit");
        return match decode(payload) {
          Ok(data) => Outcome::cached(data),
          Err(e) => Outcome::failed(&e),
        };
      }
    }

    let result = if self.monitor.is_online() {
      self.execute(&call).await
    } else {
      Err(CallError::Offline)
    };

    match result {
      Ok(value) => match decode(value) {
        Ok(data) => Outcome::fresh(data),
        Err(e) => Outcome::failed(&e),
      },
      Err(e) => self.fall_back(&call, &hash, e),
    }
  }

  async fn write(&self, call: Call) -> Outcome<Value> {
    if !self.monitor.is_online() {
      return Outcome::failed(&CallError::Offline);
    }
    match self.execute(&call).await {
      Ok(value) => Outcome::fresh(value),
      Err(e) => Outcome::failed(&e),
    }
  }

  /// Serve the persisted snapshot for a failed cacheable read, if there is one.
  fn fall_back<T: DeserializeOwned>(&self, call: &Call, hash: &str, error: CallError) -> Outcome<T> {
    let Some(ttl) = call.cache_ttl else {
      return Outcome::failed(&error);
    };
    let Some(hit) = self.books.fallback.get(hash, ttl, self.books.now()) else {
      return Outcome::failed(&error);
    };

    tracing::info!(request = %call.key.description(), stale = hit.stale, cause = %error, "serving fallback snapshot");
    match decode(hit.payload.clone()) {
      Ok(data) => Outcome::fallback(data, &hit, &error),
      Err(_) => Outcome::failed(&error),
    }
  }

  /// Dedup, breaker check and network call, with bookkeeping on settlement.
  async fn execute(&self, call: &Call) -> Result<Value, CallError> {
    let hash = call.key.cache_hash();
    self
      .dedup
      .run(&hash, || {
        let key = call.key.clone();
        let cache_ttl = call.cache_ttl;
        let validate = call.validate;
        let request = call.request.clone();
        let books = Arc::clone(&self.books);
        let backend = Arc::clone(&self.backend);

        // Decided synchronously, before the call is registered as in flight
        let admission = books.admit(key.family());

        async move {
          if let Admission::Blocked { retry_in } = admission {
            tracing::debug!(request = %key.description(), "circuit open, not calling backend");
            return Err(CallError::ServiceBlocked {
              retry_in_secs: retry_in.num_seconds().max(1),
            });
          }

          // A malformed success is a client error: not cached, breaker untouched
          let result = backend
            .call(request)
            .await
            .and_then(|value| validate(&value).map(|()| value));
          books.record(&key, cache_ttl, &result);
          result
        }
      })
      .await
  }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, CallError> {
  serde_json::from_value(value).map_err(malformed)
}

fn validate<T: DeserializeOwned>(value: &Value) -> Result<(), CallError> {
  T::deserialize(value).map(|_| ()).map_err(malformed)
}

fn malformed(e: serde_json::Error) -> CallError {
  CallError::ClientError {
    status: None,
    message: format!("malformed payload: {}", e),
  }
}

//! Async query abstraction for data fetching with caching support.
//!
//! A `Query<T>` runs a cached fetch on the tokio runtime and is polled from the
//! UI tick. Entries served stale carry a pending revalidation; the query keeps
//! polling it and swaps in the fresh data without ever going back to `Loading`.
//!
//! # Example
//!
//! ```ignore
//! let service = service.clone();
//! let mut query = Query::new(move || {
//!     let service = service.clone();
//!     async move { service.list_previas(42).await }
//! });
//!
//! query.fetch();
//!
//! // In event loop tick
//! if query.poll() {
//!     // State changed, trigger re-render
//! }
//! ```

use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use tokio::sync::mpsc;

use crate::cache::{CacheResult, CacheSource, Revalidation};
use crate::error::NetworkError;

/// The state of a query
#[derive(Debug, Clone)]
pub enum QueryState<T> {
  /// Query has not been started
  Idle,
  /// Query is currently fetching data
  Loading,
  /// Query completed successfully
  Success(T),
  /// Query failed with an error
  Error(String),
}

impl<T> QueryState<T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryState::Loading)
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      QueryState::Success(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&str> {
    match self {
      QueryState::Error(e) => Some(e),
      _ => None,
    }
  }
}

type FetchResult<T> = Result<CacheResult<T>, NetworkError>;

/// A boxed future that returns a cached fetch result
type BoxFuture<T> = Pin<Box<dyn Future<Output = FetchResult<T>> + Send>>;

/// A factory function that creates futures for fetching data
type FetcherFn<T> = Box<dyn Fn() -> BoxFuture<T> + Send + Sync>;

/// Async query for data fetching with state management.
///
/// Dropping or refetching a query discards whatever its in-flight fetch or
/// revalidation later produces; the work itself still runs to completion.
pub struct Query<T> {
  state: QueryState<T>,
  fetcher: FetcherFn<T>,
  receiver: Option<mpsc::UnboundedReceiver<FetchResult<T>>>,
  revalidation: Option<Revalidation<T>>,
  source: Option<CacheSource>,
  cached_at: Option<DateTime<Utc>>,
  notice: Option<String>,
}

impl<T: Send + 'static> Query<T> {
  /// Create a new query with the given fetcher function.
  ///
  /// The fetcher is called each time `fetch()` or `refetch()` is invoked.
  pub fn new<F, Fut>(fetcher: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FetchResult<T>> + Send + 'static,
  {
    Self {
      state: QueryState::Idle,
      fetcher: Box::new(move || Box::pin(fetcher())),
      receiver: None,
      revalidation: None,
      source: None,
      cached_at: None,
      notice: None,
    }
  }

  pub fn state(&self) -> &QueryState<T> {
    &self.state
  }

  pub fn data(&self) -> Option<&T> {
    self.state.data()
  }

  pub fn is_loading(&self) -> bool {
    self.state.is_loading()
  }

  pub fn error(&self) -> Option<&str> {
    self.state.error()
  }

  /// Where the current data came from.
  pub fn source(&self) -> Option<CacheSource> {
    self.source
  }

  /// When the shown data was cached; `None` for data straight from the network.
  pub fn cached_at(&self) -> Option<DateTime<Utc>> {
    self.cached_at
  }

  pub fn is_revalidating(&self) -> bool {
    self.revalidation.is_some()
  }

  /// Take the message of a failed background revalidation, if any.
  pub fn take_notice(&mut self) -> Option<String> {
    self.notice.take()
  }

  /// Start fetching data if not already loading.
  pub fn fetch(&mut self) {
    if self.state.is_loading() {
      return;
    }
    self.start_fetch();
  }

  /// Force a refetch, even if already loading or data exists.
  pub fn refetch(&mut self) {
    // Results of the superseded fetch are dropped with their channels
    self.receiver = None;
    self.revalidation = None;
    self.start_fetch();
  }

  /// Poll for results from a pending fetch or revalidation.
  ///
  /// Returns `true` if the state changed. Call this in the event loop tick.
  pub fn poll(&mut self) -> bool {
    self.poll_fetch() | self.poll_revalidation()
  }

  fn poll_fetch(&mut self) -> bool {
    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return false,
    };

    match receiver.try_recv() {
      Ok(Ok(result)) => {
        self.source = Some(result.source);
        self.cached_at = result.cached_at;
        self.revalidation = result.revalidation;
        self.state = QueryState::Success(result.data);
        self.receiver = None;
        true
      }
      Ok(Err(error)) => {
        self.state = QueryState::Error(error.to_string());
        self.receiver = None;
        true
      }
      Err(mpsc::error::TryRecvError::Empty) => false,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        // Sender dropped without sending - treat as error
        self.state = QueryState::Error("Query was cancelled".to_string());
        self.receiver = None;
        true
      }
    }
  }

  fn poll_revalidation(&mut self) -> bool {
    let Some(revalidation) = &mut self.revalidation else {
      return false;
    };

    match revalidation.try_take() {
      None => false,
      Some(Ok(data)) => {
        self.state = QueryState::Success(data);
        self.source = Some(CacheSource::Network);
        self.cached_at = None;
        self.revalidation = None;
        true
      }
      Some(Err(error)) => {
        // Keep showing the stale data
        self.notice = Some(format!("Falha ao atualizar dados: {}", error));
        self.revalidation = None;
        true
      }
    }
  }

  fn start_fetch(&mut self) {
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    self.state = QueryState::Loading;

    let future = (self.fetcher)();
    tokio::spawn(async move {
      let result = future.await;
      // Ignore send errors - receiver may have been dropped
      let _ = tx.send(result);
    });
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("state", &self.state)
      .field("source", &self.source)
      .field("revalidating", &self.revalidation.is_some())
      .finish_non_exhaustive()
  }
}

/// A one-shot write running in the background, polled like a query.
///
/// While one is pending `start` refuses to launch another.
pub struct Mutation<T, E> {
  receiver: Option<mpsc::UnboundedReceiver<Result<T, E>>>,
}

impl<T: Send + 'static, E: Send + 'static> Mutation<T, E> {
  pub fn new() -> Self {
    Self { receiver: None }
  }

  pub fn is_pending(&self) -> bool {
    self.receiver.is_some()
  }

  /// Spawn `future` unless a previous run is still pending. Returns whether it started.
  pub fn start<Fut>(&mut self, future: Fut) -> bool
  where
    Fut: Future<Output = Result<T, E>> + Send + 'static,
  {
    if self.is_pending() {
      return false;
    }
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    tokio::spawn(async move {
      let _ = tx.send(future.await);
    });
    true
  }

  /// The result, once the run finished. A run whose task died reads as finished with no result.
  pub fn poll(&mut self) -> Option<Result<T, E>> {
    let receiver = self.receiver.as_mut()?;
    match receiver.try_recv() {
      Ok(result) => {
        self.receiver = None;
        Some(result)
      }
      Err(mpsc::error::TryRecvError::Empty) => None,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        self.receiver = None;
        None
      }
    }
  }
}

impl<T: Send + 'static, E: Send + 'static> Default for Mutation<T, E> {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheKey, CacheService, ManualClock, MemoryStore};
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Arc;
  use std::time::Duration;

  fn network<T>(data: T) -> FetchResult<T> {
    Ok(CacheResult::from_network(data))
  }

  #[tokio::test]
  async fn test_query_success() {
    let mut query = Query::new(|| async { network(vec![1, 2, 3]) });

    assert!(matches!(query.state(), QueryState::Idle));

    query.fetch();
    assert!(query.is_loading());

    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(query.poll());
    assert_eq!(query.data(), Some(&vec![1, 2, 3]));
    assert_eq!(query.source(), Some(CacheSource::Network));
  }

  #[tokio::test]
  async fn test_query_error() {
    let mut query: Query<i32> =
      Query::new(|| async { Err(NetworkError::Transport("connection refused".to_string())) });

    query.fetch();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(query.poll());
    assert_eq!(query.error(), Some("request failed: connection refused"));
  }

  #[tokio::test]
  async fn test_fetch_while_loading_is_noop() {
    let mut query = Query::new(|| async {
      tokio::time::sleep(Duration::from_millis(100)).await;
      network(42)
    });

    query.fetch();
    assert!(query.is_loading());

    query.fetch();
    assert!(query.is_loading());
  }

  #[tokio::test]
  async fn test_refetch_discards_superseded_result() {
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = counter.clone();

    let mut query = Query::new(move || {
      let counter = counter_clone.clone();
      async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        network(counter.fetch_add(1, Ordering::SeqCst))
      }
    });

    query.fetch();
    tokio::time::sleep(Duration::from_millis(10)).await;

    query.refetch();
    tokio::time::sleep(Duration::from_millis(100)).await;

    query.poll();
    // Both fetches ran, only the second is visible
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert_eq!(query.data(), Some(&1));
  }

  fn stale_cache() -> CacheService {
    let clock = ManualClock::new(1_700_000_000_000);
    let cache = CacheService::with_clock(Arc::new(MemoryStore::new()), Arc::new(clock.clone()));
    cache.set(&CacheKey::Protocols, &vec!["old".to_string()]);
    clock.advance(chrono::Duration::seconds(1));
    cache.record_write();
    cache
  }

  #[tokio::test]
  async fn test_stale_data_replaced_silently() {
    let cache = stale_cache();
    let mut query = Query::new(move || {
      let cache = cache.clone();
      async move {
        cache
          .fetch(&CacheKey::Protocols, || async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(vec!["new".to_string()])
          })
          .await
      }
    });

    query.fetch();
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(query.poll());
    assert_eq!(query.data(), Some(&vec!["old".to_string()]));
    assert_eq!(query.source(), Some(CacheSource::CacheStale));
    assert!(query.is_revalidating());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(query.poll());
    assert!(!query.is_loading());
    assert_eq!(query.data(), Some(&vec!["new".to_string()]));
    assert_eq!(query.take_notice(), None);
  }

  #[tokio::test]
  async fn test_failed_revalidation_keeps_data() {
    let cache = stale_cache();
    let mut query = Query::new(move || {
      let cache = cache.clone();
      async move {
        cache
          .fetch::<Vec<String>, _, _>(&CacheKey::Protocols, || async {
            Err(NetworkError::Transport("timeout".to_string()))
          })
          .await
      }
    });

    query.fetch();
    tokio::time::sleep(Duration::from_millis(20)).await;
    query.poll();
    query.poll();

    assert_eq!(query.data(), Some(&vec!["old".to_string()]));
    assert!(query.take_notice().unwrap().contains("timeout"));
    assert!(!query.is_revalidating());
  }

  #[tokio::test]
  async fn test_mutation_runs_one_at_a_time() {
    let mut mutation: Mutation<u32, String> = Mutation::new();
    assert!(mutation.start(async {
      tokio::time::sleep(Duration::from_millis(20)).await;
      Ok(1)
    }));
    assert!(mutation.is_pending());
    assert!(!mutation.start(async { Ok(2) }));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(mutation.poll(), Some(Ok(1)));
    assert!(!mutation.is_pending());
    assert_eq!(mutation.poll(), None);
  }
}

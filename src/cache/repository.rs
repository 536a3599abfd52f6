//! Cache-or-fetch repository over the local store and the remote source.

use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::api::{ListKey, RemoteError, RemoteSource};
use crate::error::RepositoryError;
use crate::query::Query;
use crate::resource::ResourceStream;
use crate::retry::{self, RetryPolicy};

use super::storage::LocalStore;
use super::traits::{CacheResult, Entity};

/// Single read/write interface over a two-tier store.
///
/// Reads prefer the local store and fall back to the remote source, writing
/// fetched values through. Writes go to the remote source first and are
/// mirrored locally only once accepted. Remote calls run inside the retry
/// loop.
pub struct Repository<T, S, R> {
  storage: Arc<S>,
  remote: Arc<R>,
  retry: RetryPolicy,
  /// How long before a cached list is considered stale
  stale_time: Duration,
  _entity: PhantomData<fn() -> T>,
}

impl<T, S, R> Repository<T, S, R>
where
  T: Entity,
  S: LocalStore,
  R: RemoteSource<T>,
{
  pub fn new(storage: Arc<S>, remote: Arc<R>, retry: RetryPolicy) -> Self {
    Self {
      storage,
      remote,
      retry,
      stale_time: Duration::minutes(5),
      _entity: PhantomData,
    }
  }

  /// Set the stale time for cached lists.
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  fn is_stale(&self, cached_at: DateTime<Utc>) -> bool {
    Utc::now() - cached_at > self.stale_time
  }

  fn failed(operation: &'static str, err: impl Into<RepositoryError>) -> RepositoryError {
    let err = err.into();
    warn!(
      entity = T::entity_type(),
      operation,
      error = %err,
      "repository operation failed"
    );
    err
  }

  /// Get one entity, preferring the local store.
  ///
  /// A local hit returns without touching the remote source.
  pub async fn get(&self, id: i64) -> Result<T, RepositoryError> {
    let cached = self
      .storage
      .get_entity::<T>(id)
      .map_err(|e| Self::failed("get", e))?;

    if let Some(cached) = cached {
      debug!(entity = T::entity_type(), id, "served from local store");
      return Ok(cached.entity);
    }

    self.refresh(id).await
  }

  /// Fetch one entity from the remote source and write it through.
  pub async fn refresh(&self, id: i64) -> Result<T, RepositoryError> {
    let entity = retry::run(&self.retry, "fetch", || self.remote.fetch(id))
      .await
      .map_err(|e| Self::failed("fetch", e))?;

    self
      .storage
      .upsert_entity(&entity)
      .map_err(|e| Self::failed("fetch", e))?;
    debug!(entity = T::entity_type(), id, "wrote through fetched entity");

    Ok(entity)
  }

  /// Create or update remotely, then mirror the accepted entity locally.
  ///
  /// Entities carrying the unsaved id are created; all others are updated.
  pub async fn save(&self, entity: T) -> Result<T, RepositoryError> {
    let accepted = if entity.is_unsaved() {
      retry::run(&self.retry, "create", || self.remote.create(&entity)).await
    } else {
      retry::run(&self.retry, "update", || self.remote.update(&entity)).await
    }
    .map_err(|e| Self::failed("save", e))?;

    self
      .storage
      .upsert_entity(&accepted)
      .map_err(|e| Self::failed("save", e))?;
    debug!(entity = T::entity_type(), id = accepted.id(), "mirrored saved entity");

    Ok(accepted)
  }

  /// Delete remotely, then locally.
  ///
  /// An entity the remote source no longer knows is still removed locally.
  pub async fn delete(&self, id: i64) -> Result<(), RepositoryError> {
    match retry::run(&self.retry, "delete", || self.remote.delete(id)).await {
      Ok(()) | Err(RemoteError::NotFound { .. }) => {}
      Err(e) => return Err(Self::failed("delete", e)),
    }

    self
      .storage
      .delete_entity::<T>(id)
      .map_err(|e| Self::failed("delete", e))?;
    Ok(())
  }

  /// Search the local store only.
  pub fn search(&self, query: &Query) -> Result<Vec<T>, RepositoryError> {
    self
      .storage
      .search_entities(query)
      .map_err(|e| Self::failed("search", e))
  }

  /// Fetch a remote list with cache-first strategy.
  ///
  /// 1. Fresh cached list - return it
  /// 2. Stale cached list - try one refresh, serve the stale list if it fails
  /// 3. Nothing cached - fetch with retries
  pub async fn list(&self, key: &ListKey) -> Result<CacheResult<Vec<T>>, RepositoryError> {
    let hash = key.cache_hash();
    let cached = self
      .storage
      .get_query_result::<T>(&hash)
      .map_err(|e| Self::failed("list", e))?;

    let data = match cached {
      Some(cached) if !self.is_stale(cached.cached_at) => {
        return Ok(CacheResult::from_cache(cached.entities, cached.cached_at));
      }
      Some(cached) => match self.remote.list(key).await {
        Ok(data) => data,
        Err(err) => {
          warn!(
            list = %key.description(),
            error = %err,
            "refresh failed, serving stale list"
          );
          return Ok(CacheResult::offline(cached.entities, cached.cached_at));
        }
      },
      None => retry::run(&self.retry, "list", || self.remote.list(key))
        .await
        .map_err(|e| Self::failed("list", e))?,
    };

    self
      .storage
      .store_query_result(&hash, &key.description(), &data)
      .map_err(|e| Self::failed("list", e))?;

    Ok(CacheResult::from_network(data))
  }
}

impl<T, S, R> Repository<T, S, R>
where
  T: Entity,
  S: LocalStore + 'static,
  R: RemoteSource<T> + 'static,
{
  pub fn observe_get(&self, id: i64) -> ResourceStream<T> {
    let repo = self.clone();
    ResourceStream::spawn(async move { repo.get(id).await })
  }

  pub fn observe_save(&self, entity: T) -> ResourceStream<T> {
    let repo = self.clone();
    ResourceStream::spawn(async move { repo.save(entity).await })
  }

  pub fn observe_delete(&self, id: i64) -> ResourceStream<()> {
    let repo = self.clone();
    ResourceStream::spawn(async move { repo.delete(id).await })
  }

  pub fn observe_search(&self, query: Query) -> ResourceStream<Vec<T>> {
    let repo = self.clone();
    ResourceStream::spawn(async move { repo.search(&query) })
  }

  pub fn observe_list(&self, key: ListKey) -> ResourceStream<CacheResult<Vec<T>>> {
    let repo = self.clone();
    ResourceStream::spawn(async move { repo.list(&key).await })
  }
}

impl<T, S, R> Clone for Repository<T, S, R> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      remote: Arc::clone(&self.remote),
      retry: self.retry,
      stale_time: self.stale_time,
      _entity: PhantomData,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::{FieldErrors, TransportKind};
  use crate::cache::{CacheSource, ConstraintMessages, SqliteStorage, UNSAVED_ID};
  use crate::model::Product;
  use crate::resource::Resource;
  use async_trait::async_trait;
  use futures::StreamExt;
  use std::collections::HashMap;
  use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
  use std::sync::Mutex;

  /// In-memory remote source that counts calls and can be told to fail.
  struct FakeRemote {
    records: Mutex<HashMap<i64, Product>>,
    next_id: AtomicI64,
    /// Number of upcoming calls that time out
    failures: AtomicU32,
    reject: AtomicBool,
    fetches: AtomicU32,
    creates: AtomicU32,
    updates: AtomicU32,
    deletes: AtomicU32,
    lists: AtomicU32,
  }

  impl FakeRemote {
    fn new() -> Self {
      Self {
        records: Mutex::new(HashMap::new()),
        next_id: AtomicI64::new(100),
        failures: AtomicU32::new(0),
        reject: AtomicBool::new(false),
        fetches: AtomicU32::new(0),
        creates: AtomicU32::new(0),
        updates: AtomicU32::new(0),
        deletes: AtomicU32::new(0),
        lists: AtomicU32::new(0),
      }
    }

    fn with(products: &[Product]) -> Self {
      let remote = Self::new();
      {
        let mut records = remote.records.lock().unwrap();
        for p in products {
          records.insert(p.id, p.clone());
        }
      }
      remote
    }

    fn fail_next(&self, n: u32) {
      self.failures.store(n, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), RemoteError> {
      if self.reject.load(Ordering::SeqCst) {
        return Err(RemoteError::Validation {
          status: 400,
          errors: FieldErrors::from_body(br#"{"name": ["required"]}"#).unwrap(),
        });
      }
      let remaining = self.failures.load(Ordering::SeqCst);
      if remaining > 0 {
        self.failures.store(remaining - 1, Ordering::SeqCst);
        return Err(RemoteError::Transport {
          kind: TransportKind::Timeout,
          message: "read timed out".to_string(),
        });
      }
      Ok(())
    }
  }

  #[async_trait]
  impl RemoteSource<Product> for FakeRemote {
    async fn fetch(&self, id: i64) -> Result<Product, RemoteError> {
      self.fetches.fetch_add(1, Ordering::SeqCst);
      self.check()?;
      self
        .records
        .lock()
        .unwrap()
        .get(&id)
        .cloned()
        .ok_or_else(|| RemoteError::NotFound {
          path: format!("products/{}/", id),
        })
    }

    async fn create(&self, entity: &Product) -> Result<Product, RemoteError> {
      self.creates.fetch_add(1, Ordering::SeqCst);
      self.check()?;
      let mut created = entity.clone();
      created.id = self.next_id.fetch_add(1, Ordering::SeqCst);
      self
        .records
        .lock()
        .unwrap()
        .insert(created.id, created.clone());
      Ok(created)
    }

    async fn update(&self, entity: &Product) -> Result<Product, RemoteError> {
      self.updates.fetch_add(1, Ordering::SeqCst);
      self.check()?;
      self
        .records
        .lock()
        .unwrap()
        .insert(entity.id, entity.clone());
      Ok(entity.clone())
    }

    async fn delete(&self, id: i64) -> Result<(), RemoteError> {
      self.deletes.fetch_add(1, Ordering::SeqCst);
      self.check()?;
      self
        .records
        .lock()
        .unwrap()
        .remove(&id)
        .map(|_| ())
        .ok_or_else(|| RemoteError::NotFound {
          path: format!("products/{}/", id),
        })
    }

    async fn list(&self, _key: &ListKey) -> Result<Vec<Product>, RemoteError> {
      self.lists.fetch_add(1, Ordering::SeqCst);
      self.check()?;
      let mut all: Vec<Product> = self.records.lock().unwrap().values().cloned().collect();
      all.sort_by_key(|p| p.id);
      Ok(all)
    }
  }

  fn product(id: i64, name: &str) -> Product {
    Product {
      id,
      name: name.to_string(),
      barcode: None,
      description: None,
      unit: None,
      price_cents: None,
      shop_id: None,
    }
  }

  fn setup(remote: FakeRemote) -> (Repository<Product, SqliteStorage, FakeRemote>, Arc<SqliteStorage>, Arc<FakeRemote>) {
    let storage = Arc::new(SqliteStorage::open_in_memory(ConstraintMessages::default()).unwrap());
    let remote = Arc::new(remote);
    let repo = Repository::new(Arc::clone(&storage), Arc::clone(&remote), RetryPolicy::default());
    (repo, storage, remote)
  }

  #[tokio::test]
  async fn test_get_miss_fetches_once_and_writes_through() {
    let (repo, storage, remote) = setup(FakeRemote::with(&[product(1, "Milk")]));

    let fetched = repo.get(1).await.unwrap();
    assert_eq!(fetched.name, "Milk");
    assert_eq!(remote.fetches.load(Ordering::SeqCst), 1);
    assert!(storage.get_entity::<Product>(1).unwrap().is_some());

    // Second read is served locally.
    repo.get(1).await.unwrap();
    assert_eq!(remote.fetches.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_get_hit_makes_no_remote_call() {
    let (repo, storage, remote) = setup(FakeRemote::new());
    storage.upsert_entity(&product(4, "Bread")).unwrap();

    assert_eq!(repo.get(4).await.unwrap().name, "Bread");
    assert_eq!(remote.fetches.load(Ordering::SeqCst), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_get_retries_transient_failures() {
    let (repo, storage, remote) = setup(FakeRemote::with(&[product(1, "Milk")]));
    remote.fail_next(2);

    assert_eq!(repo.get(1).await.unwrap().name, "Milk");
    assert_eq!(remote.fetches.load(Ordering::SeqCst), 3);
    assert!(storage.get_entity::<Product>(1).unwrap().is_some());
  }

  #[tokio::test(start_paused = true)]
  async fn test_get_exhausted_surfaces_error_without_writing() {
    let (repo, storage, remote) = setup(FakeRemote::with(&[product(1, "Milk")]));
    remote.fail_next(100);

    let err = repo.get(1).await.unwrap_err();
    assert_eq!(err.user_message(), "error.read_timeout");
    assert_eq!(remote.fetches.load(Ordering::SeqCst), 4);
    assert!(storage.get_entity::<Product>(1).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_refresh_bypasses_local_hit() {
    let (repo, storage, remote) = setup(FakeRemote::with(&[product(1, "Fresh milk")]));
    storage.upsert_entity(&product(1, "Old milk")).unwrap();

    assert_eq!(repo.refresh(1).await.unwrap().name, "Fresh milk");
    assert_eq!(remote.fetches.load(Ordering::SeqCst), 1);
    let cached = storage.get_entity::<Product>(1).unwrap().unwrap();
    assert_eq!(cached.entity.name, "Fresh milk");
  }

  #[tokio::test]
  async fn test_save_unsaved_creates_and_mirrors() {
    let (repo, storage, remote) = setup(FakeRemote::new());

    let saved = repo.save(product(UNSAVED_ID, "Eggs")).await.unwrap();

    assert_eq!(saved.id, 100);
    assert_eq!(remote.creates.load(Ordering::SeqCst), 1);
    assert_eq!(remote.updates.load(Ordering::SeqCst), 0);
    assert_eq!(storage.get_entity::<Product>(100).unwrap().unwrap().entity, saved);
  }

  #[tokio::test]
  async fn test_save_existing_updates_and_mirrors() {
    let (repo, storage, remote) = setup(FakeRemote::with(&[product(7, "Tea")]));

    repo.save(product(7, "Green tea")).await.unwrap();

    assert_eq!(remote.updates.load(Ordering::SeqCst), 1);
    assert_eq!(remote.creates.load(Ordering::SeqCst), 0);
    let cached = storage.get_entity::<Product>(7).unwrap().unwrap();
    assert_eq!(cached.entity.name, "Green tea");
  }

  #[tokio::test]
  async fn test_rejected_save_leaves_local_store_untouched() {
    let (repo, storage, remote) = setup(FakeRemote::new());
    storage.upsert_entity(&product(7, "Tea")).unwrap();
    remote.reject.store(true, Ordering::SeqCst);

    let err = repo.save(product(7, "")).await.unwrap_err();

    let fields = err.field_errors().unwrap();
    assert_eq!(fields.get("name"), Some(&["required".to_string()][..]));
    assert_eq!(remote.updates.load(Ordering::SeqCst), 1);
    let cached = storage.get_entity::<Product>(7).unwrap().unwrap();
    assert_eq!(cached.entity.name, "Tea");
  }

  #[tokio::test]
  async fn test_fetched_record_replaces_stale_unique_key_holder() {
    let barcode = Some("4006381333931".to_string());
    // Remotely, product 1 was relabelled and product 2 took its barcode.
    let (repo, storage, remote) = setup(FakeRemote::with(&[
      product(1, "Relabelled"),
      Product {
        barcode: barcode.clone(),
        ..product(2, "Copy")
      },
    ]));
    storage
      .upsert_entity(&Product {
        barcode: barcode.clone(),
        ..product(1, "Original")
      })
      .unwrap();

    let fetched = repo.get(2).await.unwrap();

    assert_eq!(fetched.barcode, barcode);
    assert_eq!(remote.fetches.load(Ordering::SeqCst), 1);
    assert!(storage.get_entity::<Product>(2).unwrap().is_some());
    assert!(storage.get_entity::<Product>(1).unwrap().is_none());

    // The evicted record is read through again on demand.
    assert_eq!(repo.get(1).await.unwrap().name, "Relabelled");
    assert_eq!(remote.fetches.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_delete_removes_remote_then_local() {
    let (repo, storage, remote) = setup(FakeRemote::with(&[product(3, "Jam")]));
    storage.upsert_entity(&product(3, "Jam")).unwrap();

    repo.delete(3).await.unwrap();

    assert_eq!(remote.deletes.load(Ordering::SeqCst), 1);
    assert!(storage.get_entity::<Product>(3).unwrap().is_none());
  }

  #[tokio::test(start_paused = true)]
  async fn test_failed_delete_keeps_local_copy() {
    let (repo, storage, remote) = setup(FakeRemote::with(&[product(3, "Jam")]));
    storage.upsert_entity(&product(3, "Jam")).unwrap();
    remote.fail_next(100);

    let err = repo.delete(3).await.unwrap_err();

    assert_eq!(err.user_message(), "error.read_timeout");
    assert_eq!(remote.deletes.load(Ordering::SeqCst), 4);
    assert!(storage.get_entity::<Product>(3).unwrap().is_some());
  }

  #[tokio::test]
  async fn test_delete_of_remotely_missing_entity_removes_local_copy() {
    let (repo, storage, remote) = setup(FakeRemote::new());
    storage.upsert_entity(&product(3, "Jam")).unwrap();

    repo.delete(3).await.unwrap();

    assert_eq!(remote.deletes.load(Ordering::SeqCst), 1);
    assert!(storage.get_entity::<Product>(3).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_search_truncates_in_storage_order() {
    let (repo, storage, _remote) = setup(FakeRemote::new());
    for id in [8, 3, 5, 1, 9] {
      storage.upsert_entity(&product(id, &format!("Milk {}", id))).unwrap();
    }

    let two = repo.search(&Query::new("milk", 2)).unwrap();
    assert_eq!(two.iter().map(|p| p.id).collect::<Vec<_>>(), vec![8, 3]);

    let all = repo.search(&Query::new("milk", -1)).unwrap();
    assert_eq!(all.len(), 5);
  }

  #[tokio::test]
  async fn test_list_caches_and_serves_stale_when_offline() {
    let (repo, _storage, remote) = setup(FakeRemote::with(&[product(1, "a"), product(2, "b")]));
    let key = ListKey::all::<Product>();

    let first = repo.list(&key).await.unwrap();
    assert_eq!(first.source, CacheSource::Network);
    assert_eq!(first.data.len(), 2);

    let second = repo.list(&key).await.unwrap();
    assert_eq!(second.source, CacheSource::Cache);
    assert_eq!(remote.lists.load(Ordering::SeqCst), 1);

    // Negative stale time: every cached list is stale.
    let repo = repo.with_stale_time(Duration::seconds(-1));
    remote.fail_next(1);
    let offline = repo.list(&key).await.unwrap();
    assert_eq!(offline.source, CacheSource::Offline);
    assert_eq!(offline.data.len(), 2);
    assert_eq!(remote.lists.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_observe_get_emits_loading_then_success() {
    let (repo, _storage, _remote) = setup(FakeRemote::with(&[product(1, "Milk")]));

    let states: Vec<Resource<Product>> = repo.observe_get(1).collect().await;

    assert_eq!(states.len(), 2);
    assert!(states[0].is_loading());
    assert_eq!(states[1].data().map(|p| p.name.as_str()), Some("Milk"));
  }

  #[tokio::test]
  async fn test_observe_save_reports_error() {
    let (repo, _storage, remote) = setup(FakeRemote::new());
    remote.reject.store(true, Ordering::SeqCst);

    let outcome = repo.observe_save(product(UNSAVED_ID, "")).outcome().await;
    assert!(outcome.error().and_then(|e| e.field_errors()).is_some());
  }

  #[tokio::test(start_paused = true)]
  async fn test_dropping_stream_cancels_pending_retry() {
    let (repo, storage, remote) = setup(FakeRemote::with(&[product(1, "Milk")]));
    remote.fail_next(1);

    let mut stream = repo.observe_get(1);
    assert!(stream.next().await.unwrap().is_loading());
    // Let the first attempt fail and the backoff wait begin.
    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    drop(stream);

    tokio::time::sleep(std::time::Duration::from_secs(60)).await;
    assert_eq!(remote.fetches.load(Ordering::SeqCst), 1);
    assert!(storage.get_entity::<Product>(1).unwrap().is_none());
  }
}

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use arc_swap::ArcSwapOption;
use serde::Deserialize;
use serde_json::value::RawValue;
use thiserror::Error;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::http::{Endpoint, ReadBodyError, new_client, read_body_with_limit};
use crate::url::ApiUrl;

const MAX_KEYSET_BODY_SIZE: usize = 64 * 1024;

/// The provider's published signing keys, indexed by key id.
/// Immutable once constructed from a fetch response.
#[derive(Clone, Debug)]
pub struct KeySet {
    keys: Vec<jose_jwk::Jwk>,
}

impl KeySet {
    pub fn new(keys: Vec<jose_jwk::Jwk>) -> Self {
        KeySet { keys }
    }

    fn find(&self, key_id: &str) -> Option<&jose_jwk::Jwk> {
        self.keys
            .iter()
            .find(|jwk| jwk.prm.kid.as_deref() == Some(key_id))
    }
}

/// A fetched key set together with its provenance.
#[derive(Debug)]
pub struct CachedKeySet {
    keys: KeySet,
    fetched_at: SystemTime,
    /// Increases with every successful refresh. Lets a verification flow tell
    /// "the snapshot moved past the one I saw" apart from "still the same
    /// snapshot", independent of clock resolution.
    generation: u64,
}

impl CachedKeySet {
    /// Look up key material. Never performs I/O.
    pub(crate) fn get(&self, key_id: &str) -> Option<&jose_jwk::Jwk> {
        self.keys.find(key_id)
    }

    pub(crate) fn is_fresh(&self, now: SystemTime, ttl: Duration) -> bool {
        now < self.fetched_at + ttl
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum KeySetFetchError {
    #[error("key set request failed: {0}")]
    Http(#[from] reqwest_middleware::Error),

    #[error("could not read key set response: {0}")]
    Read(#[from] ReadBodyError<reqwest::Error>),

    #[error("could not decode key set: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("no usable signing keys in the key set")]
    Empty,

    #[error("key set renewal task aborted: {0}")]
    RenewalAborted(#[from] tokio::task::JoinError),
}

/// How to obtain the provider's current key set.
pub trait FetchKeySet: Clone + Send + Sync + 'static {
    fn fetch_key_set(&self) -> impl Future<Output = Result<KeySet, KeySetFetchError>> + Send;
}

/// Fetches the key set from the provider's published HTTP endpoint.
#[derive(Clone)]
pub struct HttpKeySetFetcher {
    endpoint: Endpoint,
}

impl HttpKeySetFetcher {
    pub fn new(url: ApiUrl) -> Self {
        Self::with_client(url, new_client())
    }

    pub(crate) fn with_client(url: ApiUrl, client: reqwest_middleware::ClientWithMiddleware) -> Self {
        HttpKeySetFetcher {
            endpoint: Endpoint::new(url, client),
        }
    }
}

#[derive(Deserialize)]
struct RawKeySet<'a> {
    /// we parse into raw-value because not all keys a provider publishes are
    /// ones we can parse directly, so we parse them one by one.
    #[serde(borrow)]
    keys: Vec<&'a RawValue>,
}

impl FetchKeySet for HttpKeySetFetcher {
    async fn fetch_key_set(&self) -> Result<KeySet, KeySetFetchError> {
        let resp = self.endpoint.get().send().await.and_then(|r| {
            r.error_for_status()
                .map_err(reqwest_middleware::Error::Reqwest)
        })?;

        let resp: http::Response<reqwest::Body> = resp.into();
        let bytes = read_body_with_limit(resp.into_body(), MAX_KEYSET_BODY_SIZE).await?;

        let raw = serde_json::from_slice::<RawKeySet>(&bytes)?;

        let mut keys = vec![];
        let mut failed = 0;
        for key in raw.keys {
            let key = match serde_json::from_str::<jose_jwk::Jwk>(key.get()) {
                Ok(key) => key,
                Err(e) => {
                    debug!(failed=?e, "could not decode JWK");
                    failed += 1;
                    continue;
                }
            };

            // if `use` (called `cls` in rust) is specified to be something
            // other than signing, we can skip storing it.
            if key
                .prm
                .cls
                .as_ref()
                .is_some_and(|c| *c != jose_jwk::Class::Signing)
            {
                continue;
            }

            keys.push(key);
        }

        keys.shrink_to_fit();

        if failed > 0 {
            warn!(failed, "could not decode some JWKs in the key set");
        }

        if keys.is_empty() {
            return Err(KeySetFetchError::Empty);
        }

        Ok(KeySet::new(keys))
    }
}

/// Shared view of the provider's key set.
///
/// Readers take lock-free snapshots; `refresh` replaces the whole snapshot
/// atomically and is single-flighted, so N flows discovering the same unknown
/// key id cost the provider one fetch, not N.
pub struct KeySetCache<F> {
    fetcher: F,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    entry: Arc<KeySetEntry>,
}

struct KeySetEntry {
    cached: ArcSwapOption<CachedKeySet>,
    /// one permit: the holder owns the in-flight fetch
    renewal: tokio::sync::Semaphore,
    generation: AtomicU64,
}

impl<F: FetchKeySet> KeySetCache<F> {
    pub fn new(fetcher: F, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        KeySetCache {
            fetcher,
            clock,
            ttl,
            entry: Arc::new(KeySetEntry {
                cached: ArcSwapOption::empty(),
                renewal: tokio::sync::Semaphore::new(1),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub(crate) fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The current snapshot, if any. Never performs I/O.
    pub(crate) fn current(&self) -> Option<Arc<CachedKeySet>> {
        self.entry.cached.load_full()
    }

    /// Replace the snapshot with a freshly fetched key set.
    ///
    /// `observed` is the generation of the snapshot the caller last looked at
    /// (`None` for a cold cache). If the snapshot has already moved past it by
    /// the time the renewal permit is acquired, the newer snapshot is returned
    /// without another fetch; that is what bounds a rotation event to a single
    /// fetch across any number of concurrent flows.
    pub(crate) async fn refresh(
        &self,
        observed: Option<u64>,
    ) -> Result<Arc<CachedKeySet>, KeySetFetchError> {
        let permit = RenewalPermit::acquire(&self.entry).await;

        // check that no one beat us to renewing the snapshot while we
        // were waiting for the permit.
        if let Some(cached) = self.entry.cached.load_full() {
            let moved_on = match observed {
                None => true,
                Some(generation) => cached.generation > generation,
            };
            if moved_on {
                return Ok(cached);
            }
        }

        // run the fetch on its own task. if this caller's request is
        // cancelled mid-fetch, the waiters queued on the permit still get a
        // renewed snapshot instead of each fetching for themselves.
        let permit = permit.into_owned();
        let fetcher = self.fetcher.clone();
        let entry = Arc::clone(&self.entry);
        let now = self.clock.now();
        let task = tokio::spawn(async move {
            let _permit = permit;
            let keys = fetcher.fetch_key_set().await?;
            let snapshot = Arc::new(CachedKeySet {
                keys,
                fetched_at: now,
                generation: entry.generation.fetch_add(1, Ordering::Relaxed) + 1,
            });
            entry.cached.swap(Some(Arc::clone(&snapshot)));
            Ok(snapshot)
        });

        task.await?
    }
}

struct RenewalPermit<'a> {
    inner: Option<RenewalPermitInner<'a>>,
}

enum RenewalPermitInner<'a> {
    Owned(Arc<KeySetEntry>),
    Borrowed(&'a Arc<KeySetEntry>),
}

impl RenewalPermit<'_> {
    async fn acquire(from: &Arc<KeySetEntry>) -> RenewalPermit<'_> {
        match from.renewal.acquire().await {
            Ok(permit) => {
                permit.forget();
                RenewalPermit {
                    inner: Some(RenewalPermitInner::Borrowed(from)),
                }
            }
            Err(_) => panic!("semaphore should not be closed"),
        }
    }

    fn into_owned(mut self) -> RenewalPermit<'static> {
        RenewalPermit {
            inner: self.inner.take().map(RenewalPermitInner::into_owned),
        }
    }
}

impl RenewalPermitInner<'_> {
    fn into_owned(self) -> RenewalPermitInner<'static> {
        match self {
            RenewalPermitInner::Owned(entry) => RenewalPermitInner::Owned(entry),
            RenewalPermitInner::Borrowed(entry) => RenewalPermitInner::Owned(Arc::clone(entry)),
        }
    }
}

impl Drop for RenewalPermit<'_> {
    fn drop(&mut self) {
        let entry = match &self.inner {
            None => return,
            Some(RenewalPermitInner::Owned(entry)) => entry,
            Some(RenewalPermitInner::Borrowed(entry)) => *entry,
        };
        entry.renewal.add_permits(1);
    }
}

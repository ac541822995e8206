use std::sync::Arc;

use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::{AuthError, UpstreamError};

use super::fallback::Introspect;
use super::jwks::{CachedKeySet, FetchKeySet, KeySetCache, KeySetFetchError};
use super::token::{self, UnverifiedToken};
use super::verify::{self, ClaimRules, KeyError, VerificationError, VerifiedClaims};

/// Outcome of one verification attempt against one snapshot.
enum Step {
    Done(VerifiedClaims),
    /// not fixable by fetching newer keys; fails the flow immediately
    Terminal(AuthError),
    /// key-identity failure; the provider may have rotated keys
    Rotation(RotationFailure),
}

enum RotationFailure {
    UnknownKey,
    BadSignature(signature::Error),
    AlgorithmMismatch,
    Upstream(KeySetFetchError),
}

impl RotationFailure {
    fn into_error(self) -> AuthError {
        match self {
            RotationFailure::UnknownKey => AuthError::UnknownSigningKey,
            RotationFailure::BadSignature(e) => AuthError::Signature(e),
            RotationFailure::AlgorithmMismatch => {
                AuthError::InvalidKey(KeyError::AlgorithmMismatch)
            }
            RotationFailure::Upstream(e) => AuthError::Upstream(UpstreamError::KeySetFetch(e)),
        }
    }
}

/// How the flow entered its first verification attempt.
enum Loaded {
    Snapshot {
        snap: Arc<CachedKeySet>,
        /// whether acquiring the snapshot already spent this flow's one
        /// refresh (cold cache, or a stale snapshot renewed on entry)
        spent: bool,
    },
    /// cold cache and the initial load failed
    Unavailable(KeySetFetchError),
}

/// The shared verification core both guards are built on.
///
/// Per flow: at most one key-set refresh, and the fallback validator only
/// after the primary path is exhausted on a key-identity failure.
pub(crate) struct Verifier<F, I> {
    cache: KeySetCache<F>,
    fallback: Option<I>,
    rules: ClaimRules,
    clock: Arc<dyn Clock>,
}

impl<F: FetchKeySet, I: Introspect> Verifier<F, I> {
    pub(crate) fn new(
        cache: KeySetCache<F>,
        fallback: Option<I>,
        rules: ClaimRules,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Verifier {
            cache,
            fallback,
            rules,
            clock,
        }
    }

    /// Populate the key-set cache ahead of the first request.
    pub(crate) async fn warm_up(&self) -> Result<(), AuthError> {
        self.cache
            .refresh(None)
            .await
            .map(drop)
            .map_err(|e| AuthError::Upstream(UpstreamError::KeySetFetch(e)))
    }

    pub(crate) async fn verify(&self, raw: &str) -> Result<VerifiedClaims, AuthError> {
        // structurally invalid tokens fail here, before any network work
        let token = token::parse(raw)?;

        let (first, spent, observed) = match self.load_snapshot().await {
            Loaded::Snapshot { snap, spent } => {
                let observed = snap.generation();
                (self.attempt(&token, &snap), spent, Some(observed))
            }
            Loaded::Unavailable(e) => (Step::Rotation(RotationFailure::Upstream(e)), true, None),
        };

        let failure = match first {
            Step::Done(claims) => return Ok(claims),
            Step::Terminal(e) => return Err(e),
            Step::Rotation(failure) => failure,
        };

        // one forced refresh and one final attempt, unless entering the flow
        // already spent the refresh
        let second = if spent {
            Step::Rotation(failure)
        } else {
            debug!(key_id = %token.key_id, "key-identity failure, refreshing key set");
            match self.cache.refresh(observed).await {
                Ok(snap) => self.attempt(&token, &snap),
                Err(e) => Step::Rotation(RotationFailure::Upstream(e)),
            }
        };

        let failure = match second {
            Step::Done(claims) => return Ok(claims),
            Step::Terminal(e) => return Err(e),
            Step::Rotation(failure) => failure,
        };

        self.exhausted(raw, failure).await
    }

    /// Acquire the snapshot for the first attempt. A cold cache loads
    /// lazily; a stale snapshot is renewed before use. Either case counts
    /// as the flow's single refresh.
    async fn load_snapshot(&self) -> Loaded {
        let now = self.clock.now();
        match self.cache.current() {
            Some(snap) if snap.is_fresh(now, self.cache.ttl()) => {
                Loaded::Snapshot { snap, spent: false }
            }
            Some(stale) => match self.cache.refresh(Some(stale.generation())).await {
                Ok(snap) => Loaded::Snapshot { snap, spent: true },
                Err(e) => {
                    // a stale snapshot still verifies keys it already holds
                    warn!(error = %e, "key set refresh failed, serving stale snapshot");
                    Loaded::Snapshot {
                        snap: stale,
                        spent: true,
                    }
                }
            },
            None => match self.cache.refresh(None).await {
                Ok(snap) => Loaded::Snapshot { snap, spent: true },
                Err(e) => Loaded::Unavailable(e),
            },
        }
    }

    fn attempt(&self, token: &UnverifiedToken, snap: &CachedKeySet) -> Step {
        let Some(key) = snap.get(&token.key_id) else {
            return Step::Rotation(RotationFailure::UnknownKey);
        };

        match verify::verify_token(token, key, &self.rules, self.clock.now()) {
            Ok(claims) => Step::Done(claims),
            // a bad signature on a key we do hold may be a rotation race:
            // the provider can re-key an id we cached before the rotation
            Err(VerificationError::BadSignature(e)) => {
                Step::Rotation(RotationFailure::BadSignature(e))
            }
            Err(VerificationError::AlgorithmMismatch) => {
                Step::Rotation(RotationFailure::AlgorithmMismatch)
            }
            Err(VerificationError::Key(e)) => Step::Terminal(AuthError::InvalidKey(e)),
            Err(VerificationError::Claims(e)) => Step::Terminal(AuthError::InvalidClaims(e)),
        }
    }

    /// The primary path is exhausted on a key-identity failure. Hand the raw
    /// token to the provider's introspection endpoint if that is enabled,
    /// otherwise reject.
    async fn exhausted(
        &self,
        raw: &str,
        failure: RotationFailure,
    ) -> Result<VerifiedClaims, AuthError> {
        let primary = failure.into_error();

        let Some(fallback) = &self.fallback else {
            return Err(primary);
        };

        debug!(error = %primary, "primary verification exhausted, trying introspection");
        match fallback.introspect(raw).await {
            Ok(answer) if answer.active => {
                // the provider vouches for the token; its claims are still
                // held to the local issuer/audience/expiry rules
                let claims = verify::validate_claims(
                    &answer.claims,
                    &answer.raw,
                    &self.rules,
                    self.clock.now(),
                )?;
                Ok(claims)
            }
            Ok(_) => {
                debug!("introspection rejected the token");
                Err(primary)
            }
            Err(e) => {
                warn!(error = %e, "introspection fallback failed");
                Err(AuthError::Upstream(UpstreamError::Fallback(e)))
            }
        }
    }
}

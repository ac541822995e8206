use std::time::{Duration, SystemTime};

use jose_jwk::crypto::KeyInfo;
use thiserror::Error;

use crate::auth::identity::AssuranceLevel;
use crate::auth::token::{Claims, UnverifiedToken};
use crate::config::AuthConfig;

/// What the engine demands of every token's claims.
#[derive(Debug, Clone)]
pub(crate) struct ClaimRules {
    pub(crate) issuer: String,
    pub(crate) audience: String,
    pub(crate) clock_skew: Duration,
}

impl ClaimRules {
    pub(crate) fn from_config(config: &AuthConfig) -> Self {
        ClaimRules {
            issuer: config.expected_issuer.clone(),
            audience: config.expected_audience.clone(),
            clock_skew: config.clock_skew_tolerance,
        }
    }
}

/// Claims that survived signature and claim validation.
#[derive(Debug, Clone)]
pub struct VerifiedClaims {
    pub subject: String,
    pub issued_at: SystemTime,
    pub expires_at: SystemTime,
    pub issuer: String,
    pub audience: Vec<String>,
    pub assurance: Option<AssuranceLevel>,
    pub email: Option<String>,
    pub role: Option<String>,
    /// the full claim map as received, for downstream consumers that read
    /// claims this engine does not model
    pub raw: serde_json::Map<String, serde_json::Value>,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ClaimsError {
    #[error("token has expired")]
    Expired,

    #[error("token is not yet valid")]
    NotYetValid,

    #[error("token issuer mismatch")]
    IssuerMismatch,

    #[error("token audience mismatch")]
    AudienceMismatch,

    #[error("required claim `{0}` is missing or malformed")]
    MissingClaim(&'static str),
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum KeyError {
    #[error("invalid P-256 key")]
    InvalidP256Key(jose_jwk::crypto::Error),

    #[error("invalid RSA key")]
    InvalidRsaKey(jose_jwk::crypto::Error),

    #[error("unsupported key type")]
    UnsupportedKeyType,

    #[error("key does not support the declared signature algorithm")]
    AlgorithmMismatch,
}

/// Signature-or-claims verdict for one token/key pair. The rotation recovery
/// controller maps these onto retry-eligible vs terminal outcomes.
#[derive(Debug)]
pub(crate) enum VerificationError {
    /// the signature does not check out against this key
    BadSignature(signature::Error),
    /// the key cannot verify the declared algorithm
    AlgorithmMismatch,
    /// the key material itself is unusable
    Key(KeyError),
    /// the signature is fine, the claims are not
    Claims(ClaimsError),
}

/// Verify `token` against one specific key, then validate its claims.
///
/// Checks run in a fixed order and stop at the first failure: signature,
/// expiry (with skew tolerance), not-before, issuer, audience, required
/// claims.
pub(crate) fn verify_token(
    token: &UnverifiedToken,
    key: &jose_jwk::Jwk,
    rules: &ClaimRules,
    now: SystemTime,
) -> Result<VerifiedClaims, VerificationError> {
    if !key.is_supported(&token.algorithm) {
        return Err(VerificationError::AlgorithmMismatch);
    }

    match &key.key {
        jose_jwk::Key::Ec(key) => {
            verify_ec_signature(token.message.as_bytes(), &token.signature, key)?;
        }
        jose_jwk::Key::Rsa(key) => {
            verify_rsa_signature(
                token.message.as_bytes(),
                &token.signature,
                key,
                &token.algorithm,
            )?;
        }
        _ => return Err(VerificationError::Key(KeyError::UnsupportedKeyType)),
    }

    validate_claims(&token.claims, &token.raw_claims, rules, now)
        .map_err(VerificationError::Claims)
}

/// Claim validation alone, shared with the introspection fallback: claims the
/// provider vouches for remotely are still held to the local rules.
pub(crate) fn validate_claims(
    claims: &Claims,
    raw: &serde_json::Map<String, serde_json::Value>,
    rules: &ClaimRules,
    now: SystemTime,
) -> Result<VerifiedClaims, ClaimsError> {
    if let Some(expires_at) = claims.expires_at {
        if now >= expires_at + rules.clock_skew {
            return Err(ClaimsError::Expired);
        }
    }

    if let Some(not_before) = claims.not_before {
        if not_before >= now + rules.clock_skew {
            return Err(ClaimsError::NotYetValid);
        }
    }

    let issuer = match &claims.issuer {
        Some(issuer) if *issuer == rules.issuer => issuer.clone(),
        _ => return Err(ClaimsError::IssuerMismatch),
    };

    if !claims.audience.0.iter().any(|aud| *aud == rules.audience) {
        return Err(ClaimsError::AudienceMismatch);
    }

    let subject = claims
        .subject
        .clone()
        .ok_or(ClaimsError::MissingClaim("sub"))?;
    let expires_at = claims.expires_at.ok_or(ClaimsError::MissingClaim("exp"))?;
    let issued_at = claims.issued_at.ok_or(ClaimsError::MissingClaim("iat"))?;

    Ok(VerifiedClaims {
        subject,
        issued_at,
        expires_at,
        issuer,
        audience: claims.audience.0.clone(),
        assurance: claims.assurance,
        email: claims.email.clone(),
        role: claims.role.clone(),
        raw: raw.clone(),
    })
}

fn verify_ec_signature(
    data: &[u8],
    sig: &[u8],
    key: &jose_jwk::Ec,
) -> Result<(), VerificationError> {
    use ecdsa::Signature;
    use signature::Verifier;

    match key.crv {
        jose_jwk::EcCurves::P256 => {
            let pk = p256::PublicKey::try_from(key)
                .map_err(|e| VerificationError::Key(KeyError::InvalidP256Key(e)))?;
            let key = p256::ecdsa::VerifyingKey::from(&pk);
            let sig = Signature::from_slice(sig).map_err(VerificationError::BadSignature)?;
            key.verify(data, &sig)
                .map_err(VerificationError::BadSignature)?;
        }
        _ => return Err(VerificationError::Key(KeyError::UnsupportedKeyType)),
    }

    Ok(())
}

fn verify_rsa_signature(
    data: &[u8],
    sig: &[u8],
    key: &jose_jwk::Rsa,
    alg: &jose_jwa::Algorithm,
) -> Result<(), VerificationError> {
    use jose_jwa::{Algorithm, Signing};
    use rsa::RsaPublicKey;
    use rsa::pkcs1v15::{Signature, VerifyingKey};
    use signature::Verifier;

    let key = RsaPublicKey::try_from(key)
        .map_err(|e| VerificationError::Key(KeyError::InvalidRsaKey(e)))?;

    match alg {
        Algorithm::Signing(Signing::Rs256) => {
            let key = VerifyingKey::<sha2::Sha256>::new(key);
            let sig = Signature::try_from(sig).map_err(VerificationError::BadSignature)?;
            key.verify(data, &sig)
                .map_err(VerificationError::BadSignature)?;
        }
        _ => return Err(VerificationError::AlgorithmMismatch),
    }

    Ok(())
}

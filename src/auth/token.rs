use std::time::{Duration, SystemTime};

use serde::de::Visitor;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::auth::identity::AssuranceLevel;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TokenEncodingError {
    #[error(transparent)]
    Base64Decode(#[from] base64::DecodeError),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    #[error("invalid compact form")]
    InvalidCompactForm,

    #[error("missing key id")]
    MissingKeyId,

    #[error("unsupported signature algorithm")]
    UnsupportedAlgorithm,

    #[error("authorization scheme is not Bearer")]
    NotBearer,
}

/// <https://datatracker.ietf.org/doc/html/rfc7515#section-4.1>
#[derive(serde::Deserialize, serde::Serialize)]
pub(crate) struct JwtHeader {
    /// must be a supported alg
    #[serde(rename = "alg")]
    pub(crate) algorithm: jose_jwa::Algorithm,
    /// key id, must be provided for our usecase
    #[serde(rename = "kid")]
    pub(crate) key_id: Option<String>,
}

/// <https://datatracker.ietf.org/doc/html/rfc7519#section-4.1>
///
/// Structural decoding only; nothing here has been checked against the
/// configured issuer/audience or the clock.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct Claims {
    /// Subject of the token (the user)
    #[serde(rename = "sub")]
    pub subject: Option<String>,
    /// Issuer of the token
    #[serde(rename = "iss")]
    pub issuer: Option<String>,
    /// Audience - recipients for which the token is intended
    #[serde(rename = "aud", default)]
    pub audience: OneOrMany,
    /// Expiration - time after which the token is rejected
    #[serde(deserialize_with = "numeric_date_opt", rename = "exp", default)]
    pub expires_at: Option<SystemTime>,
    /// Issued-at time
    #[serde(deserialize_with = "numeric_date_opt", rename = "iat", default)]
    pub issued_at: Option<SystemTime>,
    /// Not before - time before which the token is rejected
    #[serde(deserialize_with = "numeric_date_opt", rename = "nbf", default)]
    pub not_before: Option<SystemTime>,
    /// Authenticator assurance level asserted by the provider
    #[serde(rename = "aal", default, deserialize_with = "assurance_opt")]
    pub assurance: Option<AssuranceLevel>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

/// A structurally valid token. Carries no trust: the signature has not been
/// checked against any key, and the claims have not been validated.
#[derive(Debug)]
pub(crate) struct UnverifiedToken {
    pub(crate) algorithm: jose_jwa::Algorithm,
    pub(crate) key_id: String,
    pub(crate) claims: Claims,
    /// full claim map as received, kept for forward compatibility
    pub(crate) raw_claims: serde_json::Map<String, serde_json::Value>,
    /// `<B64(header)>.<B64(payload)>`, the exact bytes the signature covers
    pub(crate) message: String,
    pub(crate) signature: Vec<u8>,
}

/// Split a compact-form token into its parts and decode them.
///
/// Rejects anything structurally off (bad segment count, undecodable
/// base64/JSON, no key id, an algorithm this engine cannot verify) without
/// touching the network.
pub(crate) fn parse(raw: &str) -> Result<UnverifiedToken, TokenEncodingError> {
    // JWT compact form is defined to be
    // <B64(Header)> || . || <B64(Payload)> || . || <B64(Signature)>
    // where Signature = alg(<B64(Header)> || . || <B64(Payload)>);
    let (message, signature) = raw
        .rsplit_once('.')
        .ok_or(TokenEncodingError::InvalidCompactForm)?;
    let (header, payload) = message
        .split_once('.')
        .ok_or(TokenEncodingError::InvalidCompactForm)?;

    let header = base64::decode_config(header, base64::URL_SAFE_NO_PAD)?;
    let header = serde_json::from_slice::<JwtHeader>(&header)?;

    match header.algorithm {
        jose_jwa::Algorithm::Signing(jose_jwa::Signing::Es256 | jose_jwa::Signing::Rs256) => {}
        _ => return Err(TokenEncodingError::UnsupportedAlgorithm),
    }
    let key_id = header.key_id.ok_or(TokenEncodingError::MissingKeyId)?;

    let payload = base64::decode_config(payload, base64::URL_SAFE_NO_PAD)?;
    let claims = serde_json::from_slice::<Claims>(&payload)?;
    let raw_claims = serde_json::from_slice(&payload)?;

    let signature = base64::decode_config(signature, base64::URL_SAFE_NO_PAD)?;

    Ok(UnverifiedToken {
        algorithm: header.algorithm,
        key_id,
        claims,
        raw_claims,
        message: message.to_owned(),
        signature,
    })
}

/// `OneOrMany` supports parsing either a single item or an array of items.
///
/// Needed for <https://datatracker.ietf.org/doc/html/rfc7519#section-4.1.3>:
/// when a token has one audience, `aud` may be a single string rather than
/// an array of strings.
#[derive(Default, Debug, Clone)]
pub struct OneOrMany(pub Vec<String>);

impl<'de> Deserialize<'de> for OneOrMany {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct OneOrManyVisitor;
        impl<'de> Visitor<'de> for OneOrManyVisitor {
            type Value = OneOrMany;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a single string or an array of strings")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(OneOrMany(vec![v.to_owned()]))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let mut v = vec![];
                while let Some(s) = seq.next_element()? {
                    v.push(s);
                }
                Ok(OneOrMany(v))
            }
        }
        deserializer.deserialize_any(OneOrManyVisitor)
    }
}

fn numeric_date_opt<'de, D: Deserializer<'de>>(d: D) -> Result<Option<SystemTime>, D::Error> {
    let d = <Option<u64>>::deserialize(d)?;
    Ok(d.map(|n| SystemTime::UNIX_EPOCH + Duration::from_secs(n)))
}

fn assurance_opt<'de, D: Deserializer<'de>>(d: D) -> Result<Option<AssuranceLevel>, D::Error> {
    // an unrecognized level is treated as unstated, not as a parse failure
    let s = <Option<String>>::deserialize(d)?;
    Ok(s.as_deref().and_then(AssuranceLevel::from_wire))
}

#[cfg(test)]
#[expect(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::auth::testing::{new_ec_jwk, sign_ec, token_body, T0};

    #[test]
    fn parses_a_signed_token() {
        let (sk, _) = new_ec_jwk("k1");
        let raw = sign_ec("k1", &sk, token_body("user-1", "aal2"));

        let token = parse(&raw).unwrap();
        assert_eq!(token.key_id, "k1");
        assert_eq!(token.claims.subject.as_deref(), Some("user-1"));
        assert_eq!(token.claims.issuer.as_deref(), Some("https://provider.example.com/auth/v1"));
        assert_eq!(token.claims.audience.0, vec!["authenticated"]);
        assert_eq!(token.claims.assurance, Some(AssuranceLevel::MultiFactor));
        assert_eq!(
            token.claims.expires_at,
            Some(SystemTime::UNIX_EPOCH + Duration::from_secs(T0 + 3600))
        );
        // unparsed claims are retained
        assert!(token.raw_claims.contains_key("sid"));
    }

    #[test]
    fn rejects_bad_compact_form() {
        assert!(matches!(
            parse("no-dots-here").unwrap_err(),
            TokenEncodingError::InvalidCompactForm
        ));
        assert!(matches!(
            parse("one.dot").unwrap_err(),
            TokenEncodingError::InvalidCompactForm
        ));
    }

    #[test]
    fn rejects_bad_base64() {
        let err = parse("!!!.!!!.!!!").unwrap_err();
        assert!(matches!(err, TokenEncodingError::Base64Decode(_)));
    }

    #[test]
    fn rejects_missing_key_id() {
        let header =
            base64::encode_config(r#"{"alg":"ES256"}"#, base64::URL_SAFE_NO_PAD);
        let payload = base64::encode_config("{}", base64::URL_SAFE_NO_PAD);
        let err = parse(&format!("{header}.{payload}.AA")).unwrap_err();
        assert!(matches!(err, TokenEncodingError::MissingKeyId));
    }

    #[test]
    fn rejects_unsupported_algorithm() {
        let header = base64::encode_config(
            r#"{"alg":"HS256","kid":"k1"}"#,
            base64::URL_SAFE_NO_PAD,
        );
        let payload = base64::encode_config("{}", base64::URL_SAFE_NO_PAD);
        let err = parse(&format!("{header}.{payload}.AA")).unwrap_err();
        assert!(matches!(err, TokenEncodingError::UnsupportedAlgorithm));
    }

    #[test]
    fn audience_accepts_string_or_array() {
        let one: Claims = serde_json::from_str(r#"{"aud":"authenticated"}"#).unwrap();
        assert_eq!(one.audience.0, vec!["authenticated"]);

        let many: Claims =
            serde_json::from_str(r#"{"aud":["a","authenticated"]}"#).unwrap();
        assert_eq!(many.audience.0, vec!["a", "authenticated"]);
    }

    #[test]
    fn unknown_assurance_is_unstated() {
        let claims: Claims = serde_json::from_str(r#"{"aal":"aal9"}"#).unwrap();
        assert_eq!(claims.assurance, None);
    }
}

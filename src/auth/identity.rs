use std::fmt;

use crate::auth::verify::VerifiedClaims;

/// Strength of the authentication the provider performed for this token,
/// ordered so that stronger levels compare greater.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum AssuranceLevel {
    /// Password or equivalent single-factor login.
    SingleFactor,
    /// The session was confirmed with a second factor.
    MultiFactor,
}

impl AssuranceLevel {
    /// Parse the provider's `aal` claim value.
    pub(crate) fn from_wire(s: &str) -> Option<Self> {
        match s {
            "aal1" => Some(AssuranceLevel::SingleFactor),
            "aal2" => Some(AssuranceLevel::MultiFactor),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AssuranceLevel::SingleFactor => "aal1",
            AssuranceLevel::MultiFactor => "aal2",
        }
    }
}

impl fmt::Display for AssuranceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authenticated principal for a single request.
///
/// Built only from successfully verified claims, scoped to the request, and
/// never persisted or cached.
#[derive(Clone, Debug)]
pub struct IdentityContext {
    pub user_id: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub assurance: AssuranceLevel,
    pub is_anonymous: bool,
}

impl IdentityContext {
    pub(crate) fn from_claims(claims: &VerifiedClaims) -> Self {
        IdentityContext {
            user_id: claims.subject.clone(),
            email: claims.email.clone(),
            role: claims.role.clone(),
            // a token that does not state its assurance counts as single-factor
            assurance: claims.assurance.unwrap_or(AssuranceLevel::SingleFactor),
            is_anonymous: false,
        }
    }

    /// Principal for requests that passed an optional-auth guard without
    /// supplying a credential.
    pub fn anonymous() -> Self {
        IdentityContext {
            user_id: "anonymous".to_owned(),
            email: None,
            role: None,
            assurance: AssuranceLevel::SingleFactor,
            is_anonymous: true,
        }
    }

    pub fn meets_assurance(&self, required: AssuranceLevel) -> bool {
        self.assurance >= required
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered() {
        assert!(AssuranceLevel::SingleFactor < AssuranceLevel::MultiFactor);
    }

    #[test]
    fn wire_form_round_trips() {
        assert_eq!(
            AssuranceLevel::from_wire("aal1"),
            Some(AssuranceLevel::SingleFactor)
        );
        assert_eq!(
            AssuranceLevel::from_wire("aal2"),
            Some(AssuranceLevel::MultiFactor)
        );
        assert_eq!(AssuranceLevel::from_wire("aal3"), None);
        assert_eq!(AssuranceLevel::SingleFactor.as_str(), "aal1");
    }

    #[test]
    fn anonymous_context() {
        let anon = IdentityContext::anonymous();
        assert!(anon.is_anonymous);
        assert!(anon.meets_assurance(AssuranceLevel::SingleFactor));
        assert!(!anon.meets_assurance(AssuranceLevel::MultiFactor));
    }
}

use subtle::ConstantTimeEq;

/// Outcome of checking a caller's credential against the configured secret.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Allow,
    /// No credential in any of the accepted locations.
    Unauthorized,
    /// A credential was found but it is not the configured secret.
    Forbidden,
}

/// Every place a caller may put the shared secret, in precedence order.
#[derive(Debug, Clone, Default)]
pub struct CredentialCandidates {
    pub bearer: Option<String>,
    pub api_key_header: Option<String>,
    pub query: Option<String>,
}

impl CredentialCandidates {
    /// Build candidates from raw transport values. The `Authorization` value
    /// has its `Bearer ` scheme stripped when present.
    pub fn from_raw(
        authorization: Option<&str>,
        api_key_header: Option<&str>,
        query: Option<&str>,
    ) -> Self {
        Self {
            bearer: authorization.map(strip_bearer).map(str::to_string),
            api_key_header: api_key_header.map(str::to_string),
            query: query.map(str::to_string),
        }
    }

    /// First non-empty candidate, if any.
    pub fn provided(&self) -> Option<&str> {
        [&self.bearer, &self.api_key_header, &self.query]
            .into_iter()
            .filter_map(|c| c.as_deref())
            .map(str::trim)
            .find(|c| !c.is_empty())
    }
}

fn strip_bearer(raw: &str) -> &str {
    let raw = raw.trim();
    match raw.split_once(' ') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        None if raw.eq_ignore_ascii_case("bearer") => "",
        _ => raw,
    }
}

/// Shared-secret gate in front of `/mcp` and `/sse`.
///
/// With no secret configured the gate allows everything. That is the intended
/// posture for local use, not a fallback: callers that want auth must set a
/// secret.
#[derive(Clone)]
pub struct AuthGate {
    secret: Option<String>,
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGate")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl AuthGate {
    /// Empty secrets are treated as unset.
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
        }
    }

    pub fn disabled() -> Self {
        Self { secret: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.secret.is_some()
    }

    pub fn authorize(&self, candidates: &CredentialCandidates) -> AuthOutcome {
        let Some(secret) = self.secret.as_deref() else {
            return AuthOutcome::Allow;
        };
        let Some(presented) = candidates.provided() else {
            return AuthOutcome::Unauthorized;
        };
        if bool::from(presented.as_bytes().ct_eq(secret.as_bytes())) {
            AuthOutcome::Allow
        } else {
            AuthOutcome::Forbidden
        }
    }
}

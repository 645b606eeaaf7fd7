//! Token authentication for content hosts serving bundles.

/// Token provider for content host authentication.
#[derive(Debug, Clone, Default)]
pub enum TokenProvider {
    /// Static token (from config or env).
    Static(String),

    /// No authentication.
    #[default]
    None,
}

impl TokenProvider {
    /// Create a static token provider.
    pub fn static_token(token: impl Into<String>) -> Self {
        Self::Static(token.into())
    }

    /// Create from `ASSET_WORKFLOW_TOKEN`; an empty value means no auth.
    pub fn from_env() -> Self {
        match std::env::var("ASSET_WORKFLOW_TOKEN") {
            Ok(token) if !token.is_empty() => Self::Static(token),
            _ => Self::None,
        }
    }

    /// Resolve from an optional configured token, falling back to the environment.
    pub fn from_config(token: Option<&str>) -> Self {
        token
            .map(Self::static_token)
            .unwrap_or_else(Self::from_env)
    }

    /// Get the current token.
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Static(token) => Some(token),
            Self::None => None,
        }
    }

    /// Check if authentication is configured.
    pub fn is_authenticated(&self) -> bool {
        !matches!(self, Self::None)
    }
}

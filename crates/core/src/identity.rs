//! Signed-in identity as reported by the identity provider.

use serde::{Deserialize, Serialize};

use crate::types::{Email, IdentityHandle};

/// Profile of an authenticated user.
///
/// The handle is required; everything else is whatever the provider knows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityProfile {
    pub id: IdentityHandle,
    #[serde(default)]
    pub full_name: Option<String>,
    /// Registered addresses, primary first.
    #[serde(default)]
    pub email_addresses: Vec<Email>,
}

impl IdentityProfile {
    #[must_use]
    pub const fn new(id: IdentityHandle) -> Self {
        Self {
            id,
            full_name: None,
            email_addresses: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_full_name(mut self, full_name: impl Into<String>) -> Self {
        self.full_name = Some(full_name.into());
        self
    }

    #[must_use]
    pub fn with_email(mut self, email: Email) -> Self {
        self.email_addresses.push(email);
        self
    }

    /// First registered address, if any.
    #[must_use]
    pub fn primary_email(&self) -> Option<&Email> {
        self.email_addresses.first()
    }
}

/// Who is looking at the basket.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Identity {
    #[default]
    Anonymous,
    Authenticated(IdentityProfile),
}

impl Identity {
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    #[must_use]
    pub const fn profile(&self) -> Option<&IdentityProfile> {
        match self {
            Self::Authenticated(profile) => Some(profile),
            Self::Anonymous => None,
        }
    }
}

impl From<Option<IdentityProfile>> for Identity {
    fn from(profile: Option<IdentityProfile>) -> Self {
        profile.map_or(Self::Anonymous, Self::Authenticated)
    }
}

/// Use `value` if present and non-blank, otherwise `fallback`.
#[must_use]
pub fn resolve_field(value: Option<&str>, fallback: &str) -> String {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(fallback)
        .to_owned()
}

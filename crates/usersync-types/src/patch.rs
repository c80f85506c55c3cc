//! Field-level pending mutations.
//!
//! A [`UserPatch`] carries only the fields the caller explicitly set. Each
//! field is a [`Patch<T>`]: `Unset` fields are omitted from the serialized
//! payload entirely, while `Set(None)` on a nullable field serializes as
//! `null` and means "clear this value on the server".
//!
//! ```text
//! UserPatch { isPremium: Set(true), displayName: Set(None), locale: Unset }
//!     → {"id":"u1","isPremium":true,"displayName":null}
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use strum::IntoStaticStr;

use crate::ids::UserId;
use crate::user::User;

/// Extra-map key the push token is stored under on a [`User`].
pub const PUSH_TOKEN_KEY: &str = "pushToken";

/// One field of a partial update: either untouched or set to a value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Patch<T> {
    Unset,
    Set(T),
}

impl<T> Patch<T> {
    pub fn is_unset(&self) -> bool {
        matches!(self, Patch::Unset)
    }

    pub fn is_set(&self) -> bool {
        matches!(self, Patch::Set(_))
    }

    pub fn as_set(&self) -> Option<&T> {
        match self {
            Patch::Set(v) => Some(v),
            Patch::Unset => None,
        }
    }
}

impl<T> Default for Patch<T> {
    fn default() -> Self {
        Patch::Unset
    }
}

impl<T: Serialize> Serialize for Patch<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Patch::Set(v) => v.serialize(serializer),
            // Only reachable when a container forgets `skip_serializing_if`.
            Patch::Unset => serializer.serialize_unit(),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Patch<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        T::deserialize(deserializer).map(Patch::Set)
    }
}

/// The pending mutation for one user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPatch {
    pub id: UserId,
    #[serde(default, skip_serializing_if = "Patch::is_unset")]
    pub is_premium: Patch<bool>,
    #[serde(default, skip_serializing_if = "Patch::is_unset")]
    pub display_name: Patch<Option<String>>,
    #[serde(default, skip_serializing_if = "Patch::is_unset")]
    pub locale: Patch<Option<String>>,
    #[serde(default, skip_serializing_if = "Patch::is_unset")]
    pub referred_by: Patch<Option<String>>,
    #[serde(default, skip_serializing_if = "Patch::is_unset")]
    pub push_token: Patch<Option<String>>,
    #[serde(default, skip_serializing_if = "Patch::is_unset")]
    pub onboarding_completed: Patch<bool>,
}

impl UserPatch {
    /// An empty patch for `id`.
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            is_premium: Patch::Unset,
            display_name: Patch::Unset,
            locale: Patch::Unset,
            referred_by: Patch::Unset,
            push_token: Patch::Unset,
            onboarding_completed: Patch::Unset,
        }
    }

    /// Builder form of [`UserPatch::set`].
    pub fn with(mut self, field: UserField) -> Self {
        self.set(field);
        self
    }

    /// Overwrite one field; every other field is left as it was.
    pub fn set(&mut self, field: UserField) {
        match field {
            UserField::IsPremium(v) => self.is_premium = Patch::Set(v),
            UserField::DisplayName(v) => self.display_name = Patch::Set(v),
            UserField::Locale(v) => self.locale = Patch::Set(v),
            UserField::ReferredBy(v) => self.referred_by = Patch::Set(v),
            UserField::PushToken(v) => self.push_token = Patch::Set(v),
            UserField::OnboardingCompleted(v) => self.onboarding_completed = Patch::Set(v),
        }
    }

    /// True when no field is set.
    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }

    /// The set fields, in declaration order.
    pub fn fields(&self) -> Vec<UserField> {
        let mut out = Vec::new();
        if let Patch::Set(v) = self.is_premium {
            out.push(UserField::IsPremium(v));
        }
        if let Patch::Set(v) = &self.display_name {
            out.push(UserField::DisplayName(v.clone()));
        }
        if let Patch::Set(v) = &self.locale {
            out.push(UserField::Locale(v.clone()));
        }
        if let Patch::Set(v) = &self.referred_by {
            out.push(UserField::ReferredBy(v.clone()));
        }
        if let Patch::Set(v) = &self.push_token {
            out.push(UserField::PushToken(v.clone()));
        }
        if let Patch::Set(v) = self.onboarding_completed {
            out.push(UserField::OnboardingCompleted(v));
        }
        out
    }

    /// Names of the set fields, for logging.
    pub fn field_names(&self) -> Vec<&'static str> {
        self.fields().iter().map(|f| f.into()).collect()
    }

    /// Apply the set fields to a user snapshot (what a backend does on update).
    pub fn apply_to(&self, user: &mut User) {
        for field in self.fields() {
            match field {
                UserField::IsPremium(v) => user.is_premium = v,
                UserField::DisplayName(v) => user.display_name = v,
                UserField::Locale(v) => user.locale = v,
                UserField::ReferredBy(v) => user.referred_by = v,
                UserField::OnboardingCompleted(v) => user.onboarding_completed = v,
                UserField::PushToken(Some(token)) => {
                    user.extra.insert(PUSH_TOKEN_KEY.to_string(), token.into());
                }
                UserField::PushToken(None) => {
                    user.extra.remove(PUSH_TOKEN_KEY);
                }
            }
        }
    }
}

/// One typed setter call.
///
/// The wire name of each variant (`isPremium`, `displayName`, ...) is the
/// camelCase key it occupies in a serialized [`UserPatch`].
#[derive(Clone, Debug, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "camelCase")]
pub enum UserField {
    IsPremium(bool),
    DisplayName(Option<String>),
    Locale(Option<String>),
    ReferredBy(Option<String>),
    PushToken(Option<String>),
    OnboardingCompleted(bool),
}

/// Error parsing a `(name, value)` pair into a [`UserField`].
#[derive(Debug, thiserror::Error)]
pub enum FieldError {
    #[error("unknown field '{0}'")]
    UnknownField(String),
    #[error("invalid value '{value}' for field '{field}'")]
    InvalidValue { field: String, value: String },
}

impl UserField {
    /// Wire names of every settable field.
    pub const NAMES: [&'static str; 6] = [
        "isPremium",
        "displayName",
        "locale",
        "referredBy",
        "pushToken",
        "onboardingCompleted",
    ];

    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// Parse a textual setter, e.g. `("isPremium", "true")`.
    ///
    /// Nullable fields treat `""` and `"null"` as an explicit clear.
    pub fn parse(name: &str, value: &str) -> Result<Self, FieldError> {
        let nullable = || match value {
            "" | "null" => None,
            v => Some(v.to_string()),
        };
        let boolean = || {
            value.parse::<bool>().map_err(|_| FieldError::InvalidValue {
                field: name.to_string(),
                value: value.to_string(),
            })
        };

        match name {
            "isPremium" => Ok(UserField::IsPremium(boolean()?)),
            "displayName" => Ok(UserField::DisplayName(nullable())),
            "locale" => Ok(UserField::Locale(nullable())),
            "referredBy" => Ok(UserField::ReferredBy(nullable())),
            "pushToken" => Ok(UserField::PushToken(nullable())),
            "onboardingCompleted" => Ok(UserField::OnboardingCompleted(boolean()?)),
            other => Err(FieldError::UnknownField(other.to_string())),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

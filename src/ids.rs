// src/ids.rs
//
// Every identifier the API hands out carries a type prefix (`appt_`,
// `patient_`, `doctor_`). The database stores only the bare suffix.
// Older clients sent ids without a prefix or with the prefix repeated, so
// parsing tolerates both and always yields exactly one prefix.

use std::fmt;

use uuid::Uuid;

/// Remove every leading copy of `prefix` and return the remaining suffix.
pub fn strip_prefix<'a>(prefix: &str, raw: &'a str) -> &'a str {
    let mut rest = raw.trim();
    while let Some(next) = rest.strip_prefix(prefix) {
        rest = next;
    }
    rest
}

/// Canonical form: `prefix` exactly once, followed by a non-empty suffix.
pub fn canonicalize(prefix: &str, raw: &str) -> Result<String, IdError> {
    let suffix = strip_prefix(prefix, raw);
    if suffix.is_empty() {
        return Err(IdError {
            prefix: prefix.to_string(),
            raw: raw.to_string(),
        });
    }
    if suffix.chars().any(|c| !(c.is_ascii_alphanumeric() || c == '-' || c == '_')) {
        return Err(IdError {
            prefix: prefix.to_string(),
            raw: raw.to_string(),
        });
    }
    Ok(format!("{prefix}{suffix}"))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid identifier {raw:?} (expected {prefix}<id>)")]
pub struct IdError {
    pub prefix: String,
    pub raw: String,
}

macro_rules! prefixed_id {
    ($name:ident, $prefix:literal) => {
        #[derive(
            Debug,
            Clone,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            pub fn parse(raw: &str) -> Result<Self, IdError> {
                canonicalize(Self::PREFIX, raw).map(Self)
            }

            pub fn generate() -> Self {
                Self(format!("{}{}", Self::PREFIX, Uuid::new_v4().simple()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Bare suffix, as stored in the database.
            pub fn suffix(&self) -> &str {
                &self.0[Self::PREFIX.len()..]
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(raw: String) -> Result<Self, Self::Error> {
                Self::parse(&raw)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

prefixed_id!(AppointmentId, "appt_");
prefixed_id!(PatientId, "patient_");
prefixed_id!(DoctorId, "doctor_");

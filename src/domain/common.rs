//! Common types and shared validation for domain models

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::ValidationError;

/// Wrapper type for UUID stored as CHAR(36) in MySQL.
/// sqlx's uuid feature expects BINARY(16); all our keys are CHAR(36).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StringUuid(pub Uuid);

impl StringUuid {
    pub fn new_v4() -> Self {
        StringUuid(Uuid::new_v4())
    }

    pub fn nil() -> Self {
        StringUuid(Uuid::nil())
    }

    /// Parse a UUID string
    pub fn parse_str(s: &str) -> Result<Self, uuid::Error> {
        Ok(StringUuid(Uuid::parse_str(s)?))
    }
}

impl From<Uuid> for StringUuid {
    fn from(uuid: Uuid) -> Self {
        StringUuid(uuid)
    }
}

impl From<StringUuid> for Uuid {
    fn from(s: StringUuid) -> Self {
        s.0
    }
}

impl std::ops::Deref for StringUuid {
    type Target = Uuid;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for StringUuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for StringUuid {
    type Err = uuid::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(StringUuid(Uuid::parse_str(s)?))
    }
}

impl sqlx::Type<sqlx::MySql> for StringUuid {
    fn type_info() -> sqlx::mysql::MySqlTypeInfo {
        <String as sqlx::Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &sqlx::mysql::MySqlTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::MySql>>::compatible(ty)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::MySql> for StringUuid {
    fn decode(value: sqlx::mysql::MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <String as sqlx::Decode<sqlx::MySql>>::decode(value)?;
        let uuid = Uuid::parse_str(&s)?;
        Ok(StringUuid(uuid))
    }
}

impl<'q> sqlx::Encode<'q, sqlx::MySql> for StringUuid {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<u8>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <String as sqlx::Encode<sqlx::MySql>>::encode_by_ref(&self.0.to_string(), buf)
    }
}

lazy_static! {
    static ref HAS_LETTER: Regex = Regex::new(r"[A-Za-z]").unwrap();
    static ref HAS_DIGIT: Regex = Regex::new(r"\d").unwrap();
}

/// Password strength rule: at least 8 characters with a letter and a digit
pub fn validate_password_strength(password: &str) -> Result<(), ValidationError> {
    if password.len() < 8 {
        let mut err = ValidationError::new("password_too_short");
        err.message = Some("Password must be at least 8 characters".into());
        return Err(err);
    }
    if !HAS_LETTER.is_match(password) || !HAS_DIGIT.is_match(password) {
        let mut err = ValidationError::new("password_too_weak");
        err.message = Some("Password must contain a letter and a digit".into());
        return Err(err);
    }
    Ok(())
}

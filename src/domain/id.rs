//! Typed identifiers.
//!
//! Each aggregate gets its own UUID-backed newtype so a `SecretId` can
//! never be handed to a query expecting a `WorkspaceId`. The wrappers
//! serialize as plain strings and bind directly in sqlx queries.

use serde::{Deserialize, Serialize};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::sqlite::{SqliteArgumentValue, SqliteTypeInfo, SqliteValueRef};
use sqlx::{Decode, Encode, Sqlite, Type};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! domain_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Mint a fresh random id.
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Wrap a value read back from the database. No validation:
            /// stored ids were minted by [`new`](Self::new).
            pub fn from_string(value: String) -> Self {
                Self(value)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        // Parsing is for external input (path segments, request bodies) and
        // insists on a well-formed UUID, unlike `from_string`.
        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s)?;
                Ok(Self(s.to_string()))
            }
        }

        // Delegate the sqlx plumbing to String so ids bind and decode like
        // any other text column.
        impl Type<Sqlite> for $name {
            fn type_info() -> SqliteTypeInfo {
                <String as Type<Sqlite>>::type_info()
            }
        }

        impl<'q> Encode<'q, Sqlite> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut Vec<SqliteArgumentValue<'q>>,
            ) -> Result<IsNull, BoxDynError> {
                <String as Encode<'q, Sqlite>>::encode_by_ref(&self.0, buf)
            }
        }

        impl<'r> Decode<'r, Sqlite> for $name {
            fn decode(value: SqliteValueRef<'r>) -> Result<Self, BoxDynError> {
                Ok(Self(<String as Decode<'r, Sqlite>>::decode(value)?))
            }
        }
    };
}

domain_id!(
    /// Unique identifier for a workspace (tenant boundary)
    WorkspaceId
);

domain_id!(
    /// Unique identifier for a logical secret
    SecretId
);

domain_id!(
    /// Unique identifier for an API token
    TokenId
);

domain_id!(
    /// Unique identifier for an audit record
    AuditRecordId
);

#[cfg(feature = "sea-orm")]
use sea_orm::prelude::StringLen;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of an issuance batch.
///
/// `Validated --start--> Processing --(all rows attempted)--> Completed`.
/// There is no failed terminal state: item failures are recorded per row.
///
/// When the `sea-orm` feature is enabled, this enum can be used directly in SeaORM entities.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    /// Archive ingested and mapping validated; nothing issued yet.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "validated"))]
    Validated,
    /// An issuance run is walking the mapping rows.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "processing"))]
    Processing,
    /// Every row has been attempted.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "completed"))]
    Completed,
}

impl BatchStatus {
    pub const ALL: &'static [BatchStatus] = &[Self::Validated, Self::Processing, Self::Completed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validated => "validated",
            Self::Processing => "processing",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for BatchStatus {
    fn default() -> Self {
        Self::Validated
    }
}

/// Outcome of a single mapping row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Issued,
    Failed,
}

/// Error when parsing an invalid status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStatusError {
    invalid: String,
}

impl fmt::Display for ParseStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid status '{}'. Valid values: {}",
            self.invalid,
            BatchStatus::ALL
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

impl std::error::Error for ParseStatusError {}

impl FromStr for BatchStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "validated" => Ok(Self::Validated),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            _ => Err(ParseStatusError {
                invalid: s.to_string(),
            }),
        }
    }
}

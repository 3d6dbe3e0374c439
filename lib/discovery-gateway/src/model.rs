//! Wire models of the downstream metadata and rating services

use serde::{Deserialize, Serialize};
use std::fmt;

/// Movie metadata as served by the metadata service
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub metadata_id: i32,
    pub title: String,
    pub description: String,
    pub director: String,
    pub runtime: i32,
}

/// Identifier of a rated record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Kind of a rated record. Open-ended on the wire; `movie` is the one kind
/// the rating service knows today.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordType(pub String);

impl RecordType {
    pub const MOVIE: &'static str = "movie";

    pub fn movie() -> Self {
        Self(Self::MOVIE.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RatingValue(pub i32);

impl fmt::Display for RatingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A single user's rating of a record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rating {
    pub record_id: RecordId,
    pub record_type: RecordType,
    pub user_id: UserId,
    pub value: RatingValue,
}

/// Aggregated rating as served by the rating service: either a bare number
/// or wrapped as `{"rating": <number>}`.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum AggregatedRating {
    Bare(f64),
    Wrapped { rating: f64 },
}

impl AggregatedRating {
    pub fn value(self) -> f64 {
        match self {
            Self::Bare(v) | Self::Wrapped { rating: v } => v,
        }
    }
}

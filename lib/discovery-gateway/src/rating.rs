use discovery_core::CallContext;
use std::sync::Arc;

use crate::model::AggregatedRating;
use crate::{Rating, RecordId, RecordType, RequestSpec, Result, ServiceGateway};

pub const RATING_SERVICE: &str = "rating";

/// Typed client of the rating service
#[derive(Clone)]
pub struct RatingGateway {
    gateway: Arc<ServiceGateway>,
}

impl RatingGateway {
    pub fn new(gateway: Arc<ServiceGateway>) -> Self {
        Self { gateway }
    }

    /// Aggregated rating of a record. Both the bare and the `{"rating": ..}`
    /// response shapes are accepted.
    pub async fn get_aggregated_rating(
        &self,
        ctx: &CallContext,
        record_id: RecordId,
        record_type: &RecordType,
    ) -> Result<f64> {
        let spec = RequestSpec::get("/rating")
            .query("id", record_id)
            .query("type", record_type);
        let rating: AggregatedRating = self.gateway.call(ctx, RATING_SERVICE, &spec).await?;
        Ok(rating.value())
    }

    /// Store `rating` for the record. Parameters travel in the query string;
    /// the request has no body.
    pub async fn put_rating(
        &self,
        ctx: &CallContext,
        record_id: RecordId,
        record_type: &RecordType,
        rating: &Rating,
    ) -> Result<()> {
        let spec = RequestSpec::put("/rating")
            .query("id", record_id)
            .query("type", record_type)
            .query("userId", &rating.user_id)
            .query("value", rating.value);
        self.gateway.call_unit(ctx, RATING_SERVICE, &spec).await
    }
}

use discovery_core::CallContext;
use std::sync::Arc;

use crate::{Metadata, RequestSpec, Result, ServiceGateway};

pub const METADATA_SERVICE: &str = "metadata";

/// Typed client of the metadata service
#[derive(Clone)]
pub struct MetadataGateway {
    gateway: Arc<ServiceGateway>,
}

impl MetadataGateway {
    pub fn new(gateway: Arc<ServiceGateway>) -> Self {
        Self { gateway }
    }

    /// Fetch the metadata of movie `id`. A 404 is `GatewayError::NotFound`.
    pub async fn get_movie_details(&self, ctx: &CallContext, id: i32) -> Result<Metadata> {
        let spec = RequestSpec::get("/metadata").query("id", id);
        self.gateway.call(ctx, METADATA_SERVICE, &spec).await
    }
}

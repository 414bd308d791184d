//! Service layer for bookflow
//!
//! Business rules the routing engine consults but does not own. Stage
//! handlers reach them through the traits below so deployments can plug in
//! their own venue logic.

pub mod offers;
pub mod rooms;

pub use offers::{format_cents, CatalogOfferComposer, OfferComposer, OfferDraft, OfferLine};
pub use rooms::{CatalogRoomEvaluator, RoomEvaluator};

use crate::config::AppContext;
use std::sync::Arc;

/// The collaborators a request may call into
#[derive(Clone)]
pub struct Services {
    pub rooms: Arc<dyn RoomEvaluator>,
    pub offers: Arc<dyn OfferComposer>,
}

impl Services {
    /// Catalog-backed defaults built from the context's config
    pub fn from_context(app: &AppContext) -> Self {
        Self {
            rooms: Arc::new(CatalogRoomEvaluator::new(app.catalog().clone())),
            offers: Arc::new(CatalogOfferComposer::new(app.catalog().clone())),
        }
    }
}

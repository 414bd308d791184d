//! Room evaluation service
//!
//! Room rules are a collaborator of the routing engine; the engine only
//! depends on the [`RoomEvaluator`] trait.

use crate::config::Catalog;
use crate::models::{Requirements, RoomCandidate, RoomEvaluation};
use crate::Result;
use chrono::{NaiveDate, Utc};

pub trait RoomEvaluator: Send + Sync {
    /// All rooms that fit `requirements` on `date`
    fn evaluate(&self, date: NaiveDate, requirements: &Requirements) -> Result<RoomEvaluation>;

    /// Whether one specific room fits `requirements` on `date`
    fn is_available(
        &self,
        room_id: &str,
        date: NaiveDate,
        requirements: &Requirements,
    ) -> Result<bool>;
}

/// Evaluates rooms against the configured catalog
#[derive(Debug, Clone)]
pub struct CatalogRoomEvaluator {
    catalog: Catalog,
}

impl CatalogRoomEvaluator {
    pub fn new(catalog: Catalog) -> Self {
        Self { catalog }
    }
}

impl RoomEvaluator for CatalogRoomEvaluator {
    fn evaluate(&self, date: NaiveDate, requirements: &Requirements) -> Result<RoomEvaluation> {
        let candidates = self
            .catalog
            .rooms()
            .filter(|room| fits(room.capacity, &room.unavailable, date, requirements))
            .map(|room| RoomCandidate {
                room_id: room.id.clone(),
                name: room.name.clone(),
                capacity: room.capacity,
            })
            .collect();

        Ok(RoomEvaluation {
            date,
            candidates,
            evaluated_at: Utc::now(),
        })
    }

    fn is_available(
        &self,
        room_id: &str,
        date: NaiveDate,
        requirements: &Requirements,
    ) -> Result<bool> {
        Ok(self
            .catalog
            .room(room_id)
            .map(|room| fits(room.capacity, &room.unavailable, date, requirements))
            .unwrap_or(false))
    }
}

fn fits(capacity: u32, unavailable: &[NaiveDate], date: NaiveDate, req: &Requirements) -> bool {
    !unavailable.contains(&date) && req.participants.map_or(true, |n| n <= capacity)
}

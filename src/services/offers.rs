//! Offer composition service

use crate::config::Catalog;
use crate::models::EventRecord;
use crate::Result;

/// A composed offer ready to be sent to the client
#[derive(Debug, Clone, PartialEq)]
pub struct OfferDraft {
    pub room_id: String,
    pub lines: Vec<OfferLine>,
    pub total_cents: u64,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OfferLine {
    pub label: String,
    pub quantity: u32,
    pub amount_cents: u64,
}

pub trait OfferComposer: Send + Sync {
    fn compose(&self, event: &EventRecord) -> Result<OfferDraft>;
}

/// Prices the locked room and line items from the catalog
///
/// Unknown products are listed at zero so the manager notices them.
#[derive(Debug, Clone)]
pub struct CatalogOfferComposer {
    catalog: Catalog,
}

impl CatalogOfferComposer {
    pub fn new(catalog: Catalog) -> Self {
        Self { catalog }
    }
}

impl OfferComposer for CatalogOfferComposer {
    fn compose(&self, event: &EventRecord) -> Result<OfferDraft> {
        let room_id = event
            .locked_room_id
            .clone()
            .ok_or_else(|| anyhow::anyhow!("event {} has no locked room", event.event_id))?;
        let room = self
            .catalog
            .room(&room_id)
            .ok_or_else(|| anyhow::anyhow!("room '{}' is not in the catalog", room_id))?;

        let mut lines = vec![OfferLine {
            label: format!("{} (day rate)", room.name),
            quantity: 1,
            amount_cents: room.day_rate_cents,
        }];
        for item in &event.line_items {
            let unit = self
                .catalog
                .product(&item.name)
                .map(|p| p.unit_price_cents)
                .unwrap_or(0);
            let amount_cents = unit.checked_mul(u64::from(item.quantity)).ok_or_else(|| {
                anyhow::anyhow!("amount for {} x{} overflows", item.name, item.quantity)
            })?;
            lines.push(OfferLine {
                label: item.name.clone(),
                quantity: item.quantity,
                amount_cents,
            });
        }
        let total_cents = lines
            .iter()
            .try_fold(0u64, |total, line| total.checked_add(line.amount_cents))
            .ok_or_else(|| anyhow::anyhow!("offer total for {} overflows", event.event_id))?;

        let mut body = String::new();
        if let Some(date) = event.chosen_date {
            body.push_str(&format!("Offer for {} in {}\n", date, room.name));
        } else {
            body.push_str(&format!("Offer for {}\n", room.name));
        }
        for line in &lines {
            body.push_str(&format!(
                "- {} x{}: {}\n",
                line.label,
                line.quantity,
                format_cents(line.amount_cents)
            ));
        }
        body.push_str(&format!("Total: {}", format_cents(total_cents)));

        Ok(OfferDraft {
            room_id,
            lines,
            total_cents,
            body,
        })
    }
}

pub fn format_cents(cents: u64) -> String {
    format!("{}.{:02}", cents / 100, cents % 100)
}

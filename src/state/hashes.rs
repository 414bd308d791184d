//! Content hashes and the declared invalidation table

use crate::models::{EventRecord, LineItem, Requirements};
use chrono::NaiveDate;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

/// A cached derivation guarded by a stored hash on the event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashDomain {
    Requirements,
    RoomEvaluation,
    Offer,
}

impl HashDomain {
    pub fn key(&self) -> &'static str {
        match self {
            HashDomain::Requirements => "requirements",
            HashDomain::RoomEvaluation => "room_eval",
            HashDomain::Offer => "offer",
        }
    }
}

/// Something a hash domain is derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Date,
    Requirements,
    RoomSelection,
    LineItems,
    Domain(HashDomain),
}

/// Which inputs each domain is computed over
///
/// This is the single place invalidation is declared; routing code clears
/// hashes through [`invalidate`] instead of nulling fields by hand.
pub const DEPENDENCIES: &[(HashDomain, &[Source])] = &[
    (HashDomain::Requirements, &[Source::Requirements]),
    (
        HashDomain::RoomEvaluation,
        &[Source::Date, Source::Requirements],
    ),
    (
        HashDomain::Offer,
        &[
            Source::Domain(HashDomain::RoomEvaluation),
            Source::RoomSelection,
            Source::LineItems,
        ],
    ),
];

/// Every domain that transitively depends on `source`, in table order
pub fn affected_by(source: Source) -> Vec<HashDomain> {
    let mut affected: Vec<HashDomain> = Vec::new();
    let mut frontier = vec![source];

    while let Some(current) = frontier.pop() {
        for (domain, deps) in DEPENDENCIES {
            if deps.contains(&current) && !affected.contains(domain) {
                affected.push(*domain);
                frontier.push(Source::Domain(*domain));
            }
        }
    }

    DEPENDENCIES
        .iter()
        .map(|(domain, _)| *domain)
        .filter(|d| affected.contains(d))
        .collect()
}

/// Clear every stored hash invalidated by a change to `source`
pub fn invalidate(event: &mut EventRecord, source: Source) -> Vec<HashDomain> {
    let cleared = affected_by(source);
    for domain in &cleared {
        set_stored(event, *domain, None);
    }
    if !cleared.is_empty() {
        tracing::debug!(
            event_id = %event.event_id,
            ?source,
            cleared = ?cleared,
            "invalidated dependent hashes"
        );
    }
    cleared
}

pub fn stored(event: &EventRecord, domain: HashDomain) -> Option<&str> {
    match domain {
        HashDomain::Requirements => event.requirements_hash.as_deref(),
        HashDomain::RoomEvaluation => event.room_eval_hash.as_deref(),
        HashDomain::Offer => event.offer_hash.as_deref(),
    }
}

pub fn set_stored(event: &mut EventRecord, domain: HashDomain, hash: Option<String>) {
    match domain {
        HashDomain::Requirements => event.requirements_hash = hash,
        HashDomain::RoomEvaluation => event.room_eval_hash = hash,
        HashDomain::Offer => event.offer_hash = hash,
    }
}

/// Whether the stored hash for `domain` equals `fresh`
///
/// This is the only check that may justify skipping a recomputation.
pub fn matches(event: &EventRecord, domain: HashDomain, fresh: &str) -> bool {
    stored(event, domain) == Some(fresh)
}

pub fn requirements_hash(requirements: &Requirements) -> String {
    let mut special: Vec<String> = requirements
        .special_requirements
        .iter()
        .map(|s| normalize(s))
        .filter(|s| !s.is_empty())
        .collect();
    special.sort();
    special.dedup();

    hash_value(&json!({
        "participants": requirements.participants,
        "seating_layout": requirements.seating_layout.as_deref().map(normalize),
        "start_time": requirements.start_time.as_deref().map(str::trim),
        "end_time": requirements.end_time.as_deref().map(str::trim),
        "special_requirements": special,
    }))
}

pub fn room_eval_hash(date: NaiveDate, requirements: &Requirements) -> String {
    hash_value(&json!({
        "date": date.to_string(),
        "requirements": requirements_hash(requirements),
    }))
}

pub fn offer_hash(room_eval_hash: &str, room_id: &str, line_items: &[LineItem]) -> String {
    hash_value(&json!({
        "room_eval": room_eval_hash,
        "room_id": room_id,
        "line_items": normalized_items(line_items),
    }))
}

/// Order-independent hash of a line item list
pub fn line_items_hash(line_items: &[LineItem]) -> String {
    hash_value(&json!(normalized_items(line_items)))
}

fn normalized_items(line_items: &[LineItem]) -> Vec<(String, u32)> {
    let mut items: Vec<(String, u32)> = line_items
        .iter()
        .map(|item| (normalize(&item.name), item.quantity))
        .collect();
    items.sort();
    items
}

/// `sha256:<hex>` over the canonical serialization of `value`
pub fn hash_value(value: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(value, &mut canonical);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("sha256:{:x}", hasher.finalize())
}

/// Compact JSON with object keys sorted at every level
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

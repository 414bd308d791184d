//! Hash-based evaluation cache
//!
//! Handles the per-domain content hashes stored on each event, including:
//! - Deterministic hashing over canonicalized inputs
//! - The declared dependency table between domains
//! - Chained invalidation when an upstream input changes

pub mod hashes;

pub use hashes::{
    affected_by, invalidate, line_items_hash, matches, offer_hash, requirements_hash,
    room_eval_hash, HashDomain, Source, DEPENDENCIES,
};

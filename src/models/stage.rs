use serde::{Deserialize, Serialize};
use std::fmt;

/// Stage of a booking transaction
///
/// Stages are totally ordered; the discriminant is the stage number used by
/// legacy records (`current_step`).
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// First contact, client and requirements captured
    Intake = 1,
    /// Agreeing on an event date
    DateNegotiation = 2,
    /// Finding and locking a room for the confirmed date
    RoomNegotiation = 3,
    /// Composing and sending the offer
    Offer = 4,
    /// Waiting for the client's answer to the offer
    Negotiation = 5,
    /// Checking every prerequisite before confirmation
    Transition = 6,
    /// Booking confirmed
    Confirmation = 7,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Intake,
        Stage::DateNegotiation,
        Stage::RoomNegotiation,
        Stage::Offer,
        Stage::Negotiation,
        Stage::Transition,
        Stage::Confirmation,
    ];

    pub fn number(&self) -> u8 {
        *self as u8
    }

    pub fn from_number(number: u8) -> Option<Stage> {
        Stage::ALL.iter().copied().find(|s| s.number() == number)
    }

    /// Parse either the snake_case name or the stage number
    pub fn parse(value: &str) -> Option<Stage> {
        let value = value.trim();
        if let Ok(number) = value.parse::<u8>() {
            return Stage::from_number(number);
        }
        let normalized = value.to_lowercase().replace([' ', '-'], "_");
        Stage::ALL
            .iter()
            .copied()
            .find(|s| s.key() == normalized)
    }

    pub fn next(&self) -> Option<Stage> {
        Stage::from_number(self.number() + 1)
    }

    /// Stages strictly between `self` and `other`, in order
    pub fn between(&self, other: Stage) -> impl Iterator<Item = Stage> {
        let (lo, hi) = (self.number(), other.number());
        Stage::ALL
            .into_iter()
            .filter(move |s| s.number() > lo && s.number() < hi)
    }

    pub fn key(&self) -> &'static str {
        match self {
            Stage::Intake => "intake",
            Stage::DateNegotiation => "date_negotiation",
            Stage::RoomNegotiation => "room_negotiation",
            Stage::Offer => "offer",
            Stage::Negotiation => "negotiation",
            Stage::Transition => "transition",
            Stage::Confirmation => "confirmation",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Intake => "Intake",
            Stage::DateNegotiation => "Date negotiation",
            Stage::RoomNegotiation => "Room negotiation",
            Stage::Offer => "Offer",
            Stage::Negotiation => "Negotiation",
            Stage::Transition => "Transition",
            Stage::Confirmation => "Confirmation",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Stage::Intake => "📥",
            Stage::DateNegotiation => "📅",
            Stage::RoomNegotiation => "🏛",
            Stage::Offer => "📝",
            Stage::Negotiation => "🤝",
            Stage::Transition => "🔀",
            Stage::Confirmation => "✅",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

pub mod document;
pub mod event;
pub mod journal;
pub mod message;
pub mod stage;

pub use document::{Client, Document, TaskPayload, TaskRecord, TaskStatus};
pub use event::{
    ApprovalKind, EventRecord, EventStatus, LineItem, OfferRecord, PendingApproval,
    Requirements, RoomCandidate, RoomEvaluation, ThreadState,
};
pub use journal::{ActivityEntry, AuditEntry, Granularity, ACTIVITY_LOG_CAP};
pub use message::{ClientReply, ExtractedFields, InboundMessage};
pub use stage::Stage;

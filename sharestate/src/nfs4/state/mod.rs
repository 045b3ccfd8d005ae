//! Open state: owners, stateids and per-file share reservations
pub mod create;
pub mod owner;
pub mod seqid;
pub mod share;
pub mod stateid;
pub mod table;

pub use create::{CreateModeResolver, Resolved};
pub use owner::{OpenOwner, OpenOwnerRegistry};
pub use share::{Admission, ShareReservation};
pub use stateid::{StateOther, StateRef, StateidIssuer};
pub use table::{ClaimType, FileOpenStateTable, Granted, OpenRecord, PendingOpen};

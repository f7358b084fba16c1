//! # huddle-protocol
//!
//! Wire protocol definitions for the Huddle planning-poker engine.
//!
//! Clients send [`ClientEvent`]s tagged by `event`; the server answers and
//! broadcasts [`ServerFrame`]s tagged by `type` with a `data` payload.
//!
//! ## Events
//!
//! - `fetch_tickets` / `get_current_ticket` - Work queue
//! - `card_selected` - Cast a vote
//! - `start_timer`, `skip_ticket`, `users_estimation`, `final_estimation`,
//!   `ticket_analysis`, `end_game` - Moderator flow control
//!
//! ## Example
//!
//! ```rust
//! use huddle_protocol::{codec, ClientEvent, ServerFrame, WireFormat};
//!
//! let event = codec::decode_text(r#"{"event":"card_selected","card":"5"}"#).unwrap();
//! assert_eq!(event.name(), "card_selected");
//!
//! let encoded = codec::encode(&ServerFrame::Timer(30), WireFormat::Json).unwrap();
//! ```

pub mod codec;
pub mod events;
pub mod frames;

pub use codec::{
    decode_binary, decode_frame_binary, decode_text, encode, Encoded, ProtocolError, WireFormat,
};
pub use events::{ClientEvent, Estimate};
pub use frames::{
    CardSelection, FinalEstimate, Role, ServerFrame, Statistics, VoteState, WorkItem, NOT_VOTED,
};

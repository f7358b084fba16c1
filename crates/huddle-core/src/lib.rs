//! # huddle-core
//!
//! Session registry, voting and event handling for the Huddle planning-poker
//! engine.
//!
//! - **Registry** - Live sessions keyed by board and session id
//! - **Session** - Votes, work queue, countdown and audiences behind one lock
//! - **Protocol** - Admission and inbound event dispatch
//! - **Store** - Authentication and persistence boundary
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│  Protocol   │────▶│  Registry   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                   │                   │
//!        │                   ▼                   ▼
//!  ┌───────────┐      ┌─────────────┐     ┌─────────────┐
//!  │ Audiences │◀─────│   Session   │     │    Store    │
//!  └───────────┘      └─────────────┘     └─────────────┘
//! ```

pub mod audience;
pub mod countdown;
pub mod memory;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod session;
pub mod store;
pub mod vote;

pub use audience::{AudienceKind, Audiences, Broadcast, ConnectionId, Inbox, Outbox};
pub use countdown::{Countdown, CountdownPhase};
pub use memory::{FixtureError, Fixtures, MemoryStore};
pub use protocol::{
    Admission, AdmissionError, DispatchError, Outcome, Rejection, SessionProtocol,
};
pub use queue::WorkQueue;
pub use registry::{RegistryConfig, RegistryError, RegistryStats, SessionRegistry};
pub use session::{Member, Session, SessionError, SessionKey, SessionState};
pub use store::{
    Authenticator, EstimationRecord, Identity, Participant, SessionRecord, SessionStore,
    StoreError,
};
pub use vote::VoteBoard;

//! Training session domain module.
//!
//! Holds the user phase state machine, the session aggregate, transcript
//! messages and the pure dispatch function that decides what an inbound
//! event means in the current phase.

mod context;
mod dispatch;
mod message;
mod phase;
mod session;
mod user;

pub use context::{
    compose_system_prompt, contains_closing_phrase, script_reply_request,
    script_reply_system_prompt, CONTEXT_HEADING, NO_SCRIPTS_FOUND, SCRIPT_REPLY_PROMPT,
};
pub use dispatch::{dispatch, Action, EventKind, PhaseConflict, Transition, UserEvent};
pub use message::{is_gap_free, Message, MessageRole, NewMessage};
pub use phase::SessionPhase;
pub use session::{Session, SessionOutcome};
pub use user::User;

//! Conversation state machine
//!
//! - `types`: session record and wizard states
//! - `intent`: fixed-precedence message classification
//! - `wizard`: pure vacation wizard transitions
//! - `dates`: user date parsing with year roll-over

pub mod dates;
pub mod intent;
pub mod types;
pub mod wizard;

pub use intent::{Intent, IntentClassifier};
pub use types::{ConversationSession, SessionState};
pub use wizard::{WizardStep, Confirmation};

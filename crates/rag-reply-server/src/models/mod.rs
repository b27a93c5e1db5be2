pub mod event;

pub use event::{
    Attachment, Channel, DropReason, InboundEvent, InboundOutcome, MessageKey, OutboundReply,
};

//! HL7 v2 over MLLP: framing, ACK code selection, remote reply-code
//! evaluation, and the inbound/outbound adapters built from them.

pub mod ack;
pub mod framing;
pub mod inbound;
pub mod outbound;
pub mod reply_code;

pub use ack::{ack_code, ValidationOutcome};
pub use framing::{frame, unframe, FramingError, Framer, CR, FS, VT};
pub use inbound::{MllpInboundAdapter, MllpInboundConfig};
pub use outbound::{MllpOutboundAdapter, MllpOutboundConfig};
pub use reply_code::{ReplyAction, ReplyCodeActions, ReplyCodeActionsError};

//! Gateway wire protocol
//!
//! JSON envelope, operation codes, close codes, and payload shapes for the
//! client side of the gateway connection.

mod close_codes;
mod messages;
mod opcodes;
mod payloads;

pub use close_codes::CloseCode;
pub use messages::GatewayMessage;
pub use opcodes::OpCode;
pub use payloads::{
    HelloPayload, IdentifyPayload, IdentifyProperties, ReadyPayload, ResumePayload,
};

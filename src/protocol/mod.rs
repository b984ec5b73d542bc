pub mod messages;
pub mod handshake;
pub mod hub_protocol;
pub mod json;
pub mod negotiate;

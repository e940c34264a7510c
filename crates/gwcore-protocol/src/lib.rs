pub mod anthropic;
pub mod openai;
pub mod protocol;
pub mod sse;

pub use protocol::{detect_client_protocol, Protocol};

pub mod gateway;
pub mod retry;

pub use gateway::{ChatMessage, ChatOptions, ChatRole, LlmGateway};

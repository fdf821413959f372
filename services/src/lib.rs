pub mod direct_chat_service;

pub use direct_chat_service::{DirectChatError, DirectChatService};

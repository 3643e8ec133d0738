pub mod chat;

pub use self::chat::{ChatClient, ChatMessage, ModelEndpoint};

pub mod error;
pub mod extract;
pub mod providers;
pub mod storage;
pub mod template;
pub mod text;

pub use error::AgentError;
pub use extract::ParseError;
pub use providers::*;
pub use storage::JsonStore;

pub mod exchange;
pub mod telegram;

pub use exchange::ExchangeInfoClient;
pub use telegram::TelegramNotifier;

// Re-export commonly used types
pub use exchange::{Candle, PerpMetadata};

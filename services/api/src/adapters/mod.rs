pub mod completion;
pub mod db;
pub mod telegram;

pub use completion::OpenRouterAdapter;
pub use db::PgStore;
pub use telegram::TelegramApi;

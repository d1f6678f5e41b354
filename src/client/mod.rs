pub mod completion_client;
pub mod traits;

pub use completion_client::CompletionClient;
pub use traits::TextCompletion;

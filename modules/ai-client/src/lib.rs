pub mod client;
pub mod schema;
pub mod traits;
pub mod types;

pub use client::OpenAiCompatClient;
pub use schema::StructuredOutput;
pub use traits::{ChatModel, Message, MessageRole, NoopModel};

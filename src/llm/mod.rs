//! Chat-completion gateway (OpenRouter) and the prompts forge sends through it.

pub mod client;
pub mod fallback;
pub mod models;
pub mod normalize;
pub mod prompts;

pub use client::{
    create_http_client, ChatGateway, ChatRequest, CompletionTransport, OpenRouterGateway,
    OpenRouterTransport, OPENROUTER_URL,
};
pub use models::{ChatMessage, Model, ModelSelection, Role};

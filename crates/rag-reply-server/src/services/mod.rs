pub mod backfill;
pub mod booking;
pub mod clock;
pub mod conversation;
pub mod embedding_service;
pub mod i18n;
pub mod llm_service;
pub mod pipeline;
pub mod rag_service;
pub mod resolver;
pub mod retry;
pub mod usage_ledger;

pub use backfill::EmbeddingBackfill;
pub use embedding_service::{EmbeddingProvider, EmbeddingService};
pub use llm_service::{LlmProvider, LlmService};
pub use pipeline::Pipeline;
pub use rag_service::RagService;

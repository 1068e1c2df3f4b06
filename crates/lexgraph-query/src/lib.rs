//! LexGraph Query - star-based retrieval over the legal knowledge graph.
//!
//! [`QueryEngine::process_query`] turns a question into search terms, matches
//! them against concepts and relations, probes the triple store with a few
//! weighted candidate "stars" and ranks the resulting triples as answers.
//! Query rewriting and reranking are optional capabilities.

pub mod capabilities;
pub mod chat;
pub mod engine;
pub mod error;
pub mod rerank;
pub mod scoring;
pub mod stars;
pub mod terms;

pub use capabilities::{AnswerGenerator, QueryRewriter, RerankResult, Reranker};
pub use chat::{OpenAiChatProvider, DEFAULT_CHAT_BASE_URL, DEFAULT_CHAT_MODEL};
pub use engine::{Answer, QueryDebug, QueryEngine, QueryResponse, QueryTimings, MAX_ANSWERS, RERANK_WINDOW};
pub use error::QueryError;
pub use rerank::{CohereReranker, KeyPool, RerankError, DEFAULT_RERANK_ENDPOINT, DEFAULT_RERANK_MODEL};
pub use stars::WeightedStar;

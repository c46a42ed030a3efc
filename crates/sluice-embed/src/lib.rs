//! # sluice-embed
//!
//! Text embedding providers for `vector` field mappings.
//!
//! | Provider | Feature |
//! |:---------|:--------|
//! | OpenAI (and compatible endpoints) | `openai` (default) |
//!
//! ```rust,no_run
//! use sluice_embed::{EmbeddingProvider, EmbeddingRequest};
//! use sluice_embed::openai::OpenAiProvider;
//!
//! # async fn example() -> Result<(), sluice_embed::EmbedError> {
//! let provider = OpenAiProvider::builder()
//!     .api_key("sk-...")
//!     .model("text-embedding-3-small")
//!     .build()?;
//!
//! let response = provider.embed(&EmbeddingRequest::single("hello")).await?;
//! println!("{} dims", response.first_embedding().map(|v| v.len()).unwrap_or(0));
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod provider;
pub mod types;

#[cfg(feature = "openai")]
pub mod openai;

pub use error::{EmbedError, EmbedResult};
pub use provider::EmbeddingProvider;
pub use types::{Embedding, EmbeddingRequest, EmbeddingResponse, EmbeddingUsage};

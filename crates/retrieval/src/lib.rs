pub mod bm25;
pub mod index;
pub mod tokenize;

pub use index::{CapabilityIndex, RetrievalResult, ToolRecord, WorkspaceIndex, MIN_INDEXED_TOOLS};
pub use tokenize::{expand_query, tokenise};

pub mod client;
pub mod hybrid;
pub mod text_search;

pub use client::HybridSearchClient;
pub use hybrid::{ranked_fusion, relative_score_fusion, HybridSource};
pub use text_search::TextSearch;

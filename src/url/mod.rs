//! URL handling module for Trawler
//!
//! This module provides URL normalization, domain extraction, wildcard matching,
//! and the scope predicates that decide which links belong to a crawl.

mod domain;
mod matcher;
mod normalize;
pub mod scope;

// Re-export main functions
pub use domain::{extract_domain, registrable_domain};
pub use matcher::matches_wildcard;
pub use normalize::{normalize, normalize_str};
pub use scope::{crawl_scope, UrlPredicate};

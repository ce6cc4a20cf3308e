pub mod comment_tree;
pub mod engine;
pub mod feed_service;
pub mod mutation_service;
pub mod pg_store;
pub mod score_service;
pub mod store;
pub mod view_cache;
pub mod vote_service;

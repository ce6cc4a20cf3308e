pub mod comments;
pub mod feed;
pub mod posts;

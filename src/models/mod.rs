pub mod comment;
pub mod feed;
pub mod post;
pub mod vote;

pub use comment::*;
pub use feed::*;
pub use post::*;
pub use vote::*;

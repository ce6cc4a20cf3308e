use crate::models::{FeedCursor, PageRequest, Post, PostSort, TimeRange};

/// Decides which feed page to request next and de-duplicates what comes back.
#[derive(Debug)]
pub struct FeedPager {
    cursor: FeedCursor,
    page_size: u32,
    generation: u64,
    in_flight: Option<u64>,
}

impl FeedPager {
    pub fn new(page_size: u32) -> Self {
        Self {
            cursor: FeedCursor::default(),
            page_size: page_size.max(1),
            generation: 0,
            in_flight: None,
        }
    }

    pub fn cursor(&self) -> &FeedCursor {
        &self.cursor
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Back to page one. Responses to earlier requests will be discarded.
    pub fn reset(&mut self) {
        self.cursor.page = 1;
        self.cursor.has_more = true;
        self.cursor.seen_ids.clear();
        self.generation += 1;
        self.in_flight = None;
    }

    pub fn set_sort(&mut self, sort: PostSort) -> bool {
        if self.cursor.sort == sort {
            return false;
        }
        self.cursor.sort = sort;
        self.reset();
        true
    }

    /// Always recorded; only resets the feed when the current sort ranks by
    /// window.
    pub fn set_time_window(&mut self, time_window: TimeRange) -> bool {
        if self.cursor.time_window == time_window {
            return false;
        }
        self.cursor.time_window = time_window;
        if self.cursor.sort.uses_time_window() {
            self.reset();
            return true;
        }
        false
    }

    /// The next request to issue, or `None` when the feed is exhausted or a
    /// request for the current feed is already outstanding.
    pub fn begin_fetch(&mut self) -> Option<PageRequest> {
        if !self.cursor.has_more || self.in_flight == Some(self.generation) {
            return None;
        }

        self.in_flight = Some(self.generation);
        Some(PageRequest {
            generation: self.generation,
            sort: self.cursor.sort,
            time_window: self.cursor.time_window,
            page: self.cursor.page,
            page_size: self.page_size,
        })
    }

    /// Release a request that failed so it can be retried.
    pub fn abort_fetch(&mut self, request: &PageRequest) {
        if self.in_flight == Some(request.generation) {
            self.in_flight = None;
        }
    }

    /// Accept a response. Returns `None` for a response to a feed that has
    /// been reset since the request was issued.
    pub fn complete_fetch(&mut self, request: &PageRequest, posts: Vec<Post>) -> Option<Vec<Post>> {
        if request.generation != self.generation {
            tracing::debug!(
                "Discarding page {} of generation {} (now {})",
                request.page,
                request.generation,
                self.generation
            );
            return None;
        }
        self.in_flight = None;

        if (posts.len() as u32) < request.page_size {
            self.cursor.has_more = false;
        } else {
            self.cursor.page += 1;
        }

        let seen = &mut self.cursor.seen_ids;
        Some(posts.into_iter().filter(|post| seen.insert(post.id)).collect())
    }
}

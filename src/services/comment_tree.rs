use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::{Comment, CommentSort, CommentThread, DELETED_MARKER},
    services::score_service,
};

/// Deepest nesting level a reply may be created at. Roots are depth 0.
pub const MAX_COMMENT_DEPTH: i32 = 5;

/// Depth a new reply under `parent` would be created at.
pub fn reply_depth(parent: Option<&Comment>) -> Result<i32> {
    let Some(parent) = parent else {
        return Ok(0);
    };

    let depth = parent.depth.clamp(0, MAX_COMMENT_DEPTH) + 1;
    if depth > MAX_COMMENT_DEPTH {
        return Err(AppError::MaxDepthExceeded(MAX_COMMENT_DEPTH));
    }

    Ok(depth)
}

#[derive(Debug, Clone)]
pub struct CommentNode {
    pub comment: Comment,
    /// Effective display depth, clamped to [`MAX_COMMENT_DEPTH`].
    pub depth: i32,
    pub children: Vec<usize>,
}

/// Comments of one post arranged as an arena: nodes are addressed by index
/// and children are index lists, so no node owns another.
#[derive(Debug, Clone, Default)]
pub struct CommentForest {
    nodes: Vec<CommentNode>,
    roots: Vec<usize>,
    index: HashMap<Uuid, usize>,
}

impl CommentForest {
    /// Never fails: missing parents, self references and cycles all end up
    /// as extra roots rather than dropping comments.
    pub fn build(comments: Vec<Comment>, sort: CommentSort, now: DateTime<Utc>) -> Self {
        let mut forest = Self {
            nodes: Vec::with_capacity(comments.len()),
            roots: Vec::new(),
            index: HashMap::with_capacity(comments.len()),
        };

        for mut comment in comments {
            if forest.index.contains_key(&comment.id) {
                tracing::debug!("Skipping duplicate comment {}", comment.id);
                continue;
            }
            if comment.is_deleted() {
                comment.content = DELETED_MARKER.to_string();
            }
            forest.index.insert(comment.id, forest.nodes.len());
            forest.nodes.push(CommentNode {
                comment,
                depth: 0,
                children: Vec::new(),
            });
        }

        let mut parent_of: Vec<Option<usize>> = vec![None; forest.nodes.len()];
        for i in 0..forest.nodes.len() {
            let parent = forest.nodes[i]
                .comment
                .parent_comment_id
                .and_then(|parent_id| forest.index.get(&parent_id).copied())
                .filter(|&parent| parent != i);

            match parent {
                Some(parent) => {
                    forest.nodes[parent].children.push(i);
                    parent_of[i] = Some(parent);
                }
                // Orphans and top-level comments alike.
                None => forest.roots.push(i),
            }
        }

        let mut visited = vec![false; forest.nodes.len()];
        for root in forest.roots.clone() {
            forest.assign_depths(root, &mut visited);
        }

        // Whatever is still unvisited hangs off a parent cycle.
        for i in 0..forest.nodes.len() {
            while !visited[i] {
                let member = Self::cycle_member(i, &parent_of);
                if let Some(parent) = parent_of[member].take() {
                    forest.nodes[parent].children.retain(|&child| child != member);
                }
                tracing::warn!(
                    "Comment {} is part of a parent cycle, promoting to root",
                    forest.nodes[member].comment.id
                );
                forest.roots.push(member);
                forest.assign_depths(member, &mut visited);
            }
        }

        forest.sort(sort, now);
        forest
    }

    fn cycle_member(start: usize, parent_of: &[Option<usize>]) -> usize {
        let mut walked = HashSet::new();
        let mut cursor = start;
        while walked.insert(cursor) {
            match parent_of[cursor] {
                Some(parent) => cursor = parent,
                None => break,
            }
        }
        cursor
    }

    fn assign_depths(&mut self, root: usize, visited: &mut [bool]) {
        let mut stack = vec![(root, 0)];
        while let Some((node, depth)) = stack.pop() {
            if visited[node] {
                continue;
            }
            visited[node] = true;
            self.nodes[node].depth = depth;
            let child_depth = (depth + 1).min(MAX_COMMENT_DEPTH);
            for &child in &self.nodes[node].children {
                stack.push((child, child_depth));
            }
        }
    }

    /// Stable re-sort of the roots and every reply list.
    pub fn sort(&mut self, sort: CommentSort, now: DateTime<Utc>) {
        let nodes = &self.nodes;
        let compare = |a: &usize, b: &usize| {
            compare_comments(sort, &nodes[*a].comment, &nodes[*b].comment, now)
        };

        let mut roots = std::mem::take(&mut self.roots);
        roots.sort_by(compare);

        let mut children: Vec<Vec<usize>> = self
            .nodes
            .iter()
            .map(|node| {
                let mut list = node.children.clone();
                list.sort_by(compare);
                list
            })
            .collect();

        self.roots = roots;
        for (node, list) in self.nodes.iter_mut().zip(children.drain(..)) {
            node.children = list;
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> impl Iterator<Item = &CommentNode> {
        self.roots.iter().map(|&i| &self.nodes[i])
    }

    pub fn get(&self, comment_id: Uuid) -> Option<&CommentNode> {
        self.index.get(&comment_id).map(|&i| &self.nodes[i])
    }

    pub fn children_of(&self, comment_id: Uuid) -> Vec<Uuid> {
        self.get(comment_id)
            .map(|node| {
                node.children
                    .iter()
                    .map(|&child| self.nodes[child].comment.id)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn root_ids(&self) -> Vec<Uuid> {
        self.roots().map(|node| node.comment.id).collect()
    }

    /// Nested, render-ready copy of the forest. Nesting stops at
    /// [`MAX_COMMENT_DEPTH`]: everything below a node at that depth is listed
    /// flat under it, in thread order.
    pub fn to_threads(&self) -> Vec<CommentThread> {
        self.roots.iter().map(|&i| self.thread(i)).collect()
    }

    fn thread(&self, i: usize) -> CommentThread {
        let node = &self.nodes[i];
        let replies = if node.depth < MAX_COMMENT_DEPTH {
            node.children.iter().map(|&child| self.thread(child)).collect()
        } else {
            self.descendants(i)
                .into_iter()
                .map(|d| self.render(d, Vec::new()))
                .collect()
        };
        self.render(i, replies)
    }

    // Pre-order, without the node itself.
    fn descendants(&self, i: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack: Vec<usize> = self.nodes[i].children.iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.nodes[next].children.iter().rev().copied());
        }
        out
    }

    fn render(&self, i: usize, replies: Vec<CommentThread>) -> CommentThread {
        let node = &self.nodes[i];
        let comment = &node.comment;
        CommentThread {
            id: comment.id,
            content: comment.content.clone(),
            post_id: comment.post_id,
            author_id: (!comment.is_deleted()).then_some(comment.author_id),
            parent_comment_id: comment.parent_comment_id,
            status: comment.status,
            upvotes: comment.upvotes,
            downvotes: comment.downvotes,
            score: comment.score,
            depth: node.depth,
            created_at: comment.created_at,
            replies,
        }
    }
}

fn compare_comments(sort: CommentSort, a: &Comment, b: &Comment, now: DateTime<Utc>) -> Ordering {
    match sort {
        CommentSort::Best => score_service::best_score(b.score, b.created_at, now)
            .total_cmp(&score_service::best_score(a.score, a.created_at, now)),
        CommentSort::Top => {
            score_service::top_score(b.score).cmp(&score_service::top_score(a.score))
        }
        CommentSort::New => {
            score_service::new_score(b.created_at).cmp(&score_service::new_score(a.created_at))
        }
        CommentSort::Old => a.created_at.cmp(&b.created_at),
        CommentSort::Controversial => score_service::controversy_score(b.upvotes, b.downvotes)
            .total_cmp(&score_service::controversy_score(a.upvotes, a.downvotes)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CommentStatus;
    use chrono::Duration;

    fn id(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn comment(n: u128, parent: Option<u128>) -> Comment {
        Comment {
            id: id(n),
            content: format!("comment {}", n),
            post_id: id(1000),
            author_id: id(2000 + n),
            parent_comment_id: parent.map(id),
            status: CommentStatus::Active,
            upvotes: 0,
            downvotes: 0,
            score: 0,
            controversy_score: 0.0,
            depth: 0,
            created_at: Utc::now(),
        }
    }

    fn scored(n: u128, parent: Option<u128>, up: i32, down: i32, age_hours: i64) -> Comment {
        let mut c = comment(n, parent);
        c.upvotes = up;
        c.downvotes = down;
        c.score = up - down;
        c.created_at = Utc::now() - Duration::hours(age_hours);
        c
    }

    fn chain(len: u128) -> Vec<Comment> {
        (1..=len)
            .map(|n| comment(n, if n == 1 { None } else { Some(n - 1) }))
            .collect()
    }

    #[test]
    fn empty_input_builds_empty_forest() {
        let forest = CommentForest::build(Vec::new(), CommentSort::Best, Utc::now());
        assert!(forest.is_empty());
        assert!(forest.to_threads().is_empty());
    }

    #[test]
    fn six_comment_chain_reaches_depth_five_unclamped() {
        let forest = CommentForest::build(chain(6), CommentSort::Old, Utc::now());
        for n in 1..=6 {
            assert_eq!(forest.get(id(n)).unwrap().depth, (n - 1) as i32);
        }
        assert_eq!(forest.root_ids(), vec![id(1)]);
    }

    #[test]
    fn depth_beyond_limit_is_clamped_not_rejected() {
        let forest = CommentForest::build(chain(8), CommentSort::Old, Utc::now());
        assert_eq!(forest.len(), 8);
        assert_eq!(forest.get(id(6)).unwrap().depth, 5);
        assert_eq!(forest.get(id(7)).unwrap().depth, 5);
        assert_eq!(forest.get(id(8)).unwrap().depth, 5);
        // Structure is still intact below the cap.
        assert_eq!(forest.children_of(id(7)), vec![id(8)]);
    }

    #[test]
    fn threads_stop_nesting_at_max_depth() {
        let forest = CommentForest::build(chain(20_000), CommentSort::Old, Utc::now());
        let threads = forest.to_threads();

        let mut node = &threads[0];
        for level in 0..MAX_COMMENT_DEPTH {
            assert_eq!(node.depth, level);
            assert_eq!(node.replies.len(), 1);
            node = &node.replies[0];
        }
        assert_eq!(node.id, id(6));
        assert_eq!(node.replies.len(), 20_000 - 6);
        assert_eq!(node.replies[0].id, id(7));
        assert_eq!(node.replies.last().unwrap().id, id(20_000));
        assert!(node.replies.iter().all(|r| r.depth == 5 && r.replies.is_empty()));
    }

    #[test]
    fn orphan_is_promoted_to_root() {
        let comments = vec![comment(1, None), comment(2, Some(99)), comment(3, Some(1))];
        let forest = CommentForest::build(comments, CommentSort::Old, Utc::now());

        let roots = forest.root_ids();
        assert!(roots.contains(&id(1)));
        assert!(roots.contains(&id(2)));
        assert_eq!(forest.get(id(2)).unwrap().depth, 0);
        assert_eq!(forest.children_of(id(1)), vec![id(3)]);
    }

    #[test]
    fn all_orphans_still_render() {
        let comments = vec![comment(1, Some(50)), comment(2, Some(51)), comment(3, Some(1))];
        let forest = CommentForest::build(comments, CommentSort::Old, Utc::now());
        let threads = forest.to_threads();
        assert_eq!(threads.len(), 2);
        assert_eq!(forest.children_of(id(1)), vec![id(3)]);
    }

    #[test]
    fn parent_cycles_are_broken_without_losing_comments() {
        let comments = vec![
            comment(1, Some(2)),
            comment(2, Some(1)),
            comment(3, Some(3)),
            comment(4, Some(2)),
        ];
        let forest = CommentForest::build(comments, CommentSort::Old, Utc::now());

        fn count(threads: &[CommentThread]) -> usize {
            threads.iter().map(|t| 1 + count(&t.replies)).sum()
        }
        assert_eq!(count(&forest.to_threads()), 4);
        assert!(forest.root_ids().contains(&id(3)));
    }

    #[test]
    fn deleted_comment_keeps_children() {
        let mut parent = comment(1, None);
        parent.status = CommentStatus::Deleted;
        let comments = vec![parent, comment(2, Some(1)), comment(3, Some(2))];

        let forest = CommentForest::build(comments, CommentSort::Best, Utc::now());
        let threads = forest.to_threads();

        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].content, DELETED_MARKER);
        assert_eq!(threads[0].author_id, None);
        assert_eq!(threads[0].replies.len(), 1);
        assert_eq!(threads[0].replies[0].replies[0].id, id(3));
    }

    #[test]
    fn top_sort_orders_roots_and_replies() {
        let comments = vec![
            scored(1, None, 5, 0, 1),
            scored(2, None, 50, 0, 1),
            scored(3, Some(2), 1, 0, 1),
            scored(4, Some(2), 9, 0, 1),
        ];
        let forest = CommentForest::build(comments, CommentSort::Top, Utc::now());
        assert_eq!(forest.root_ids(), vec![id(2), id(1)]);
        assert_eq!(forest.children_of(id(2)), vec![id(4), id(3)]);
    }

    #[test]
    fn sort_is_stable_for_equal_keys() {
        let comments = vec![
            scored(1, None, 3, 0, 2),
            scored(2, None, 3, 0, 2),
            scored(3, None, 3, 0, 2),
        ];
        let forest = CommentForest::build(comments, CommentSort::Top, Utc::now());
        assert_eq!(forest.root_ids(), vec![id(1), id(2), id(3)]);
    }

    #[test]
    fn best_sort_favours_fresh_comment_over_stale_one() {
        let now = Utc::now();
        let comments = vec![scored(1, None, 40, 0, 48), scored(2, None, 10, 0, 1)];
        let forest = CommentForest::build(comments, CommentSort::Best, now);
        assert_eq!(forest.root_ids(), vec![id(2), id(1)]);
    }

    #[test]
    fn new_and_old_are_mirrors() {
        let comments = vec![scored(1, None, 0, 0, 3), scored(2, None, 0, 0, 1)];
        let forest = CommentForest::build(comments.clone(), CommentSort::New, Utc::now());
        assert_eq!(forest.root_ids(), vec![id(2), id(1)]);
        let forest = CommentForest::build(comments, CommentSort::Old, Utc::now());
        assert_eq!(forest.root_ids(), vec![id(1), id(2)]);
    }

    #[test]
    fn controversial_sort_prefers_even_split() {
        let comments = vec![scored(1, None, 10, 1, 1), scored(2, None, 10, 10, 1)];
        let forest = CommentForest::build(comments, CommentSort::Controversial, Utc::now());
        assert_eq!(forest.root_ids(), vec![id(2), id(1)]);
    }

    #[test]
    fn reply_depth_rejects_beyond_limit() {
        assert_eq!(reply_depth(None).unwrap(), 0);

        let mut parent = comment(1, None);
        parent.depth = 4;
        assert_eq!(reply_depth(Some(&parent)).unwrap(), 5);

        parent.depth = 5;
        assert!(matches!(
            reply_depth(Some(&parent)),
            Err(AppError::MaxDepthExceeded(5))
        ));

        // Legacy rows stored deeper than the limit.
        parent.depth = 9;
        assert!(reply_depth(Some(&parent)).is_err());
    }
}

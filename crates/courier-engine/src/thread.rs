//! Thread reconstruction.
//!
//! Rebuilds a reply tree from the flat parent links with one store query
//! per level (breadth-first), never one per node. Expansion is bounded by a
//! depth limit and a total node cap; nodes at the boundary carry their real
//! direct-reply count and a `truncated` flag so callers can offer
//! "load more".

use std::collections::{HashMap, HashSet};

use tracing::debug;
use uuid::Uuid;

use courier_core::defaults::{THREAD_MAX_DEPTH, THREAD_NODE_CAP};
use courier_core::{Message, MessageStore, Result, ThreadNode};

/// Breadth-first thread builder over a [`MessageStore`].
pub struct ThreadBuilder<'a> {
    store: &'a dyn MessageStore,
    max_depth: usize,
    node_cap: usize,
}

impl<'a> ThreadBuilder<'a> {
    pub fn new(store: &'a dyn MessageStore) -> Self {
        Self {
            store,
            max_depth: THREAD_MAX_DEPTH,
            node_cap: THREAD_NODE_CAP,
        }
    }

    /// Override the expansion bounds. A `max_depth` of 0 returns just the
    /// root with its reply count.
    pub fn with_limits(store: &'a dyn MessageStore, max_depth: usize, node_cap: usize) -> Self {
        Self {
            store,
            max_depth,
            node_cap,
        }
    }

    /// Build the reply tree rooted at `root_id`.
    pub async fn build(&self, root_id: Uuid) -> Result<ThreadNode> {
        let root = self.store.fetch_message(root_id).await?;

        // One children_of call per level. `visited` breaks cycles in corrupt
        // parent graphs; the node cap stops expansion at level granularity
        // so partially-expanded parents never appear without being flagged.
        // `cycle_stopped` collects parents whose children were dropped by
        // the visited filter, so they report honest counts later.
        let mut visited: HashSet<Uuid> = HashSet::from([root_id]);
        let mut children_map: HashMap<Uuid, Vec<Message>> = HashMap::new();
        let mut cycle_stopped: Vec<Uuid> = Vec::new();
        let mut frontier: Vec<Uuid> = vec![root_id];
        let mut fetched = 1usize;
        let mut depth = 0usize;

        while !frontier.is_empty() && depth < self.max_depth {
            let level = self.store.children_of(&frontier).await?;
            let mut fresh: Vec<Message> = Vec::with_capacity(level.len());
            for m in level {
                if visited.contains(&m.id) {
                    if let Some(parent) = m.parent_id {
                        cycle_stopped.push(parent);
                    }
                    continue;
                }
                fresh.push(m);
            }

            if fetched + fresh.len() > self.node_cap {
                break;
            }

            let mut next = Vec::with_capacity(fresh.len());
            for child in fresh {
                visited.insert(child.id);
                fetched += 1;
                next.push(child.id);
                if let Some(parent) = child.parent_id {
                    children_map.entry(parent).or_default().push(child);
                }
            }
            frontier = next;
            depth += 1;
        }

        // Every node whose expansion was cut short — the final frontier
        // (depth bound or node cap) plus the cycle-stopped parents — gets
        // its real direct-reply count in one batched query.
        let mut boundary = frontier;
        boundary.extend(cycle_stopped);
        boundary.sort_unstable();
        boundary.dedup();
        let boundary_counts = if boundary.is_empty() {
            HashMap::new()
        } else {
            self.store.reply_counts(&boundary).await?
        };

        debug!(
            subsystem = "engine",
            op = "build_thread",
            message_id = %root_id,
            depth,
            node_count = fetched,
            "thread reconstructed"
        );

        Ok(assemble(root, &mut children_map, &boundary_counts))
    }
}

fn assemble(
    message: Message,
    children_map: &mut HashMap<Uuid, Vec<Message>>,
    boundary_counts: &HashMap<Uuid, usize>,
) -> ThreadNode {
    let id = message.id;
    let replies: Vec<ThreadNode> = children_map
        .remove(&id)
        .unwrap_or_default()
        .into_iter()
        .map(|c| assemble(c, children_map, boundary_counts))
        .collect();

    // Fully expanded nodes count their materialized replies; nodes whose
    // expansion stopped (depth bound, node cap, cycle guard) carry the
    // store's count instead. `truncated` means "replies exist that were not
    // expanded": a childless node at the depth bound has nothing to load,
    // so it stays unflagged.
    let reply_count = boundary_counts
        .get(&id)
        .copied()
        .unwrap_or_else(|| replies.len())
        .max(replies.len());
    ThreadNode {
        truncated: reply_count > replies.len(),
        message,
        replies,
        reply_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_db::test_fixtures::{sample_message, TestStore};

    async fn send(
        fixture: &TestStore,
        sender: Uuid,
        parent: Option<Uuid>,
        body: &str,
    ) -> Message {
        let mut msg = sample_message(fixture.conversation.id, sender, body);
        msg.parent_id = parent;
        fixture.store.insert_message(&msg, &[]).await.unwrap();
        msg
    }

    #[tokio::test]
    async fn builds_nested_reply_tree_in_order() {
        let fixture = TestStore::with_users(2).await.unwrap();
        let (a, b) = (fixture.users[0].id, fixture.users[1].id);

        let root = send(&fixture, a, None, "root").await;
        let r1 = send(&fixture, b, Some(root.id), "first reply").await;
        let r2 = send(&fixture, a, Some(root.id), "second reply").await;
        let nested = send(&fixture, a, Some(r1.id), "nested").await;

        let tree = ThreadBuilder::new(&fixture.store).build(root.id).await.unwrap();

        assert_eq!(tree.message.id, root.id);
        assert_eq!(tree.reply_count, 2);
        assert!(!tree.truncated);
        assert_eq!(tree.replies[0].message.id, r1.id);
        assert_eq!(tree.replies[1].message.id, r2.id);
        assert_eq!(tree.replies[0].replies[0].message.id, nested.id);
        assert_eq!(tree.replies[0].reply_count, 1);
        assert_eq!(tree.replies[1].reply_count, 0);
    }

    #[tokio::test]
    async fn depth_limit_marks_boundary_truncated_with_real_count() {
        let fixture = TestStore::with_users(2).await.unwrap();
        let a = fixture.users[0].id;

        let root = send(&fixture, a, None, "root").await;
        let child = send(&fixture, a, Some(root.id), "child").await;
        send(&fixture, a, Some(child.id), "grandchild one").await;
        send(&fixture, a, Some(child.id), "grandchild two").await;

        let tree = ThreadBuilder::with_limits(&fixture.store, 1, THREAD_NODE_CAP)
            .build(root.id)
            .await
            .unwrap();

        assert_eq!(tree.replies.len(), 1);
        let boundary = &tree.replies[0];
        assert_eq!(boundary.message.id, child.id);
        assert!(boundary.truncated);
        assert_eq!(boundary.reply_count, 2);
        assert!(boundary.replies.is_empty());
    }

    #[tokio::test]
    async fn zero_depth_returns_root_only() {
        let fixture = TestStore::with_users(2).await.unwrap();
        let a = fixture.users[0].id;
        let root = send(&fixture, a, None, "root").await;
        send(&fixture, a, Some(root.id), "reply").await;

        let tree = ThreadBuilder::with_limits(&fixture.store, 0, THREAD_NODE_CAP)
            .build(root.id)
            .await
            .unwrap();
        assert!(tree.replies.is_empty());
        assert!(tree.truncated);
        assert_eq!(tree.reply_count, 1);
    }

    #[tokio::test]
    async fn node_cap_stops_expansion_at_level_boundary() {
        let fixture = TestStore::with_users(2).await.unwrap();
        let a = fixture.users[0].id;

        let root = send(&fixture, a, None, "root").await;
        for i in 0..5 {
            send(&fixture, a, Some(root.id), &format!("reply {}", i)).await;
        }

        // Cap of 3 cannot hold the root plus five replies, so the level is
        // not expanded at all.
        let tree = ThreadBuilder::with_limits(&fixture.store, 10, 3)
            .build(root.id)
            .await
            .unwrap();
        assert!(tree.replies.is_empty());
        assert!(tree.truncated);
        assert_eq!(tree.reply_count, 5);
    }

    #[tokio::test]
    async fn corrupt_parent_cycle_is_cut_with_honest_count() {
        let fixture = TestStore::with_users(2).await.unwrap();
        let a = fixture.users[0].id;

        // Two messages pointing at each other, the kind of corruption the
        // builder must survive rather than recurse into.
        let mut first = sample_message(fixture.conversation.id, a, "first");
        let mut second = sample_message(fixture.conversation.id, a, "second");
        first.parent_id = Some(second.id);
        second.parent_id = Some(first.id);
        fixture.store.insert_message(&first, &[]).await.unwrap();
        fixture.store.insert_message(&second, &[]).await.unwrap();

        let tree = ThreadBuilder::new(&fixture.store)
            .build(first.id)
            .await
            .unwrap();

        assert_eq!(tree.message.id, first.id);
        assert_eq!(tree.replies.len(), 1);
        // The cycle is cut at `second`: its only "child" is the already
        // visited root, so the branch stops expanding but still reports the
        // reply it has.
        let cut = &tree.replies[0];
        assert_eq!(cut.message.id, second.id);
        assert!(cut.replies.is_empty());
        assert_eq!(cut.reply_count, 1);
        assert!(cut.truncated);
    }

    #[tokio::test]
    async fn childless_node_at_depth_bound_is_not_truncated() {
        let fixture = TestStore::with_users(2).await.unwrap();
        let a = fixture.users[0].id;
        let root = send(&fixture, a, None, "root").await;
        let leaf = send(&fixture, a, Some(root.id), "leaf").await;

        let tree = ThreadBuilder::with_limits(&fixture.store, 1, THREAD_NODE_CAP)
            .build(root.id)
            .await
            .unwrap();

        // Nothing exists below the bound, so there is nothing to load more
        // of and the leaf stays unflagged.
        assert_eq!(tree.replies[0].message.id, leaf.id);
        assert!(!tree.replies[0].truncated);
        assert_eq!(tree.replies[0].reply_count, 0);
    }

    #[tokio::test]
    async fn missing_root_is_an_error() {
        let fixture = TestStore::with_users(2).await.unwrap();
        let err = ThreadBuilder::new(&fixture.store)
            .build(Uuid::now_v7())
            .await
            .unwrap_err();
        assert!(matches!(err, courier_core::Error::MessageNotFound(_)));
    }
}

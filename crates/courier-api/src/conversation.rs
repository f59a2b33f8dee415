//! Threaded conversation retrieval.
//!
//! A thread is fetched one level at a time: every reply of every message on
//! the current level comes back from a single store query, with both
//! participants' usernames joined in. A thread of depth `d` therefore costs
//! `d + 1` queries regardless of how many messages it holds. The tree is
//! then assembled bottom-up from a flat arena, so neither phase recurses.

use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, State, rejection::PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{debug, error, warn};
use uuid::Uuid;

use courier_db::MessageStore;
use courier_db::models::MessageRow;
use courier_types::api::{Claims, ConversationNode};

use crate::auth::AppState;
use crate::convert::{parse_timestamp, parse_uuid};

/// Upper bounds on the work a single thread request may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadLimits {
    pub max_nodes: usize,
    pub max_depth: usize,
}

impl Default for ThreadLimits {
    fn default() -> Self {
        Self {
            max_nodes: 5000,
            max_depth: 256,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ThreadError {
    /// No such message, or the requester did not send it.
    #[error("message not found")]
    NotFound,

    #[error("thread exceeds the limit of {limit} {what}")]
    TooLarge { what: &'static str, limit: usize },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl IntoResponse for ThreadError {
    fn into_response(self) -> Response {
        let status = match &self {
            ThreadError::NotFound => StatusCode::NOT_FOUND,
            ThreadError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ThreadError::Store(e) => {
                error!("Thread lookup failed: {:#}", e);
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        (status, self.to_string()).into_response()
    }
}

struct FlatNode {
    row: MessageRow,
    children: Vec<usize>,
}

impl FlatNode {
    fn into_node(self, replies: Vec<ConversationNode>) -> ConversationNode {
        let row = self.row;
        ConversationNode {
            id: parse_uuid(&row.id, "id", &row.id),
            timestamp: parse_timestamp(&row.created_at, &row.id),
            content: row.content,
            sender: row.sender_username,
            receiver: row.receiver_username,
            replies,
        }
    }
}

/// Resolve the reply tree rooted at `root_id`, which `requester_id` must have sent.
pub fn resolve_thread(
    store: &dyn MessageStore,
    root_id: &str,
    requester_id: &str,
    limits: ThreadLimits,
) -> Result<ConversationNode, ThreadError> {
    let root = store
        .owned_message(root_id, requester_id)?
        .ok_or(ThreadError::NotFound)?;

    // Arena in breadth-first order: a child's index is always above its parent's.
    let mut nodes = vec![FlatNode {
        row: root,
        children: Vec::new(),
    }];
    let mut level = vec![0usize];
    let mut depth = 0usize;

    while !level.is_empty() {
        let parent_ids: Vec<String> = level.iter().map(|&i| nodes[i].row.id.clone()).collect();
        // One row past the budget is enough to know it is exceeded.
        let budget = limits.max_nodes.saturating_sub(nodes.len());
        let replies = store.replies_of_many(&parent_ids, budget.saturating_add(1))?;
        if replies.is_empty() {
            break;
        }

        depth += 1;
        if depth > limits.max_depth {
            return Err(ThreadError::TooLarge {
                what: "levels",
                limit: limits.max_depth,
            });
        }
        if replies.len() > budget {
            return Err(ThreadError::TooLarge {
                what: "messages",
                limit: limits.max_nodes,
            });
        }

        let index_of: HashMap<&str, usize> = parent_ids
            .iter()
            .map(String::as_str)
            .zip(level.iter().copied())
            .collect();

        let mut next = Vec::with_capacity(replies.len());
        for reply in replies {
            let Some(&parent) = reply.parent_id.as_deref().and_then(|p| index_of.get(p)) else {
                warn!("Store returned reply {} outside the requested level", reply.id);
                continue;
            };
            let idx = nodes.len();
            nodes[parent].children.push(idx);
            nodes.push(FlatNode {
                row: reply,
                children: Vec::new(),
            });
            next.push(idx);
        }
        level = next;
    }

    debug!(
        "Resolved thread {}: {} messages, depth {}",
        root_id,
        nodes.len(),
        depth
    );

    let mut built: Vec<Option<ConversationNode>> = Vec::with_capacity(nodes.len());
    built.resize_with(nodes.len(), || None);

    for (idx, node) in nodes.into_iter().enumerate().rev() {
        let replies = node
            .children
            .iter()
            .filter_map(|&child| built[child].take())
            .collect();
        built[idx] = Some(node.into_node(replies));
    }

    built
        .into_iter()
        .next()
        .flatten()
        .ok_or(ThreadError::NotFound)
}

/// GET /conversation/{message_id}
///
/// An id that is not a UUID cannot name a message, so it is reported the
/// same way as a missing one.
pub async fn get_conversation(
    State(state): State<AppState>,
    message_id: Result<Path<Uuid>, PathRejection>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ConversationNode>, ThreadError> {
    let Path(message_id) = message_id.map_err(|e| {
        debug!("Rejected conversation id: {}", e);
        ThreadError::NotFound
    })?;

    // Run the traversal off the async runtime
    let db = state.clone();
    let root_id = message_id.to_string();
    let requester_id = claims.sub.to_string();

    let tree = tokio::task::spawn_blocking(move || {
        resolve_thread(&db.db, &root_id, &requester_id, db.thread_limits)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ThreadError::Store(anyhow::anyhow!("thread task failed: {}", e))
    })??;

    Ok(Json(tree))
}

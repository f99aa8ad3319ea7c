//! Post chain reader
//!
//! Posts link backwards through `Previous`. A walk starts at the head named
//! by a profile, fetches one post per step and stops at the empty pointer or
//! after `max_count` posts, whichever comes first. The count bound is what
//! keeps a malicious cyclic chain finite.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use zebu_core::{ContentId, Post, ZebuError, ZebuResult};
use zebu_transport::ContentStore;

use crate::within;

/// A chain read that stopped early
#[derive(Error, Debug)]
#[error("reading post {id} failed after {} posts: {source}", .partial.len())]
pub struct ChainError {
    /// Post that could not be fetched or decoded
    pub id: ContentId,
    #[source]
    pub source: ZebuError,
    /// Posts read before the failure, newest first
    pub partial: Vec<Post>,
}

/// Lazy walk down a post chain
///
/// Finite and not restartable: once it has failed or run out it yields `None`.
pub struct ChainWalk {
    store: Arc<dyn ContentStore>,
    next_id: Option<ContentId>,
    last_id: Option<ContentId>,
    remaining: usize,
    timeout: Duration,
}

impl ChainWalk {
    pub fn new(
        store: Arc<dyn ContentStore>,
        head: ContentId,
        max_count: usize,
        timeout: Duration,
    ) -> Self {
        ChainWalk {
            store,
            next_id: head.non_empty().cloned(),
            last_id: None,
            remaining: max_count,
            timeout,
        }
    }

    /// Fetch the next older post
    pub async fn next(&mut self) -> Option<ZebuResult<Post>> {
        if self.remaining == 0 {
            self.next_id = None;
        }
        let id = self.next_id.take()?;
        self.last_id = Some(id.clone());

        let fetched = within(self.timeout, self.store.get(&id)).await;
        let post = match fetched.and_then(|bytes| Post::decode(&bytes)) {
            Ok(post) => post,
            Err(error) => {
                self.remaining = 0;
                return Some(Err(error));
            }
        };

        self.remaining -= 1;
        self.next_id = post.previous_id.non_empty().cloned();
        Some(Ok(post))
    }

    /// Id of the post most recently yielded, or that failed
    pub fn last_id(&self) -> Option<&ContentId> {
        self.last_id.as_ref()
    }

    /// Collect the rest of the walk
    pub async fn collect(mut self) -> Result<Vec<Post>, ChainError> {
        let mut posts = Vec::new();
        while let Some(step) = self.next().await {
            match step {
                Ok(post) => posts.push(post),
                Err(source) => {
                    return Err(ChainError {
                        id: self.last_id.unwrap_or_default(),
                        source,
                        partial: posts,
                    })
                }
            }
        }
        Ok(posts)
    }
}

impl std::fmt::Debug for ChainWalk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainWalk")
            .field("next_id", &self.next_id)
            .field("remaining", &self.remaining)
            .finish_non_exhaustive()
    }
}

/// Read up to `max_count` posts starting at `head`, newest first
pub async fn read_chain(
    store: Arc<dyn ContentStore>,
    head: ContentId,
    max_count: usize,
    timeout: Duration,
) -> Result<Vec<Post>, ChainError> {
    let posts = ChainWalk::new(store, head.clone(), max_count, timeout)
        .collect()
        .await;
    if let Err(error) = &posts {
        tracing::warn!(head = %head, failed = %error.id, read = error.partial.len(), error = %error.source, "post chain read failed");
    }
    posts
}

/// Known posts keyed by their body content id
///
/// Lets a re-crawl reuse an already stored post instead of writing a new blob
/// for identical content.
#[derive(Clone, Debug, Default)]
pub struct PostIndex {
    by_content: HashMap<ContentId, ContentId>,
}

impl PostIndex {
    pub fn new() -> Self {
        PostIndex::default()
    }

    /// Index every post reachable from `head`, stopping quietly at the first failure
    pub async fn build(mut walk: ChainWalk) -> Self {
        let mut index = PostIndex::new();
        while let Some(Ok(post)) = walk.next().await {
            if let Some(id) = walk.last_id() {
                index.insert(id.clone(), &post);
            }
        }
        index
    }

    pub fn insert(&mut self, post_id: ContentId, post: &Post) {
        self.by_content.insert(post.content_id.clone(), post_id);
    }

    /// Stored post id for a body, if one is known
    pub fn get(&self, content_id: &ContentId) -> Option<&ContentId> {
        self.by_content.get(content_id)
    }

    pub fn len(&self) -> usize {
        self.by_content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_content.is_empty()
    }
}

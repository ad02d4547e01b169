//! In-memory board
//!
//! Stores posts in a map, enforces version checks on update and lets tests
//! script the similarity verdict and inject concurrent edits.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use btk_common::Safety;
use btk_tagger::board::{
    BoardApi, BoardError, NearMatch, NewPost, Post, PostId, PostUpdate, SimilarityVerdict, UploadToken,
};

#[derive(Default)]
pub struct FakeBoard {
    posts: Mutex<BTreeMap<PostId, Post>>,
    /// Tag name -> category for tags written through the API
    categories: Mutex<BTreeMap<String, String>>,
    verdict: Mutex<SimilarityVerdict>,
    /// Updates that fail with a conflict before one succeeds
    pending_conflicts: AtomicU32,
    /// `get_post` calls that fail with an HTTP error before one succeeds
    pending_outages: AtomicU32,
    pub get_calls: AtomicU32,
    content: Vec<u8>,
    pub created: Mutex<Vec<NewPost>>,
    pub updates: Mutex<Vec<(PostId, PostUpdate)>>,
    pub staged: AtomicU32,
    /// File name and content of every staged upload
    pub staged_files: Mutex<Vec<(String, Vec<u8>)>>,
    pub unreachable: bool,
}

impl FakeBoard {
    pub fn new() -> Self {
        Self {
            content: vec![0x89, b'P', b'N', b'G', 1, 2, 3, 4],
            ..Default::default()
        }
    }

    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::new()
        }
    }

    pub fn with_post(self, post: Post) -> Self {
        self.posts.lock().unwrap().insert(post.id, post);
        self
    }

    pub fn with_category(self, tag: &str, category: &str) -> Self {
        self.categories.lock().unwrap().insert(tag.to_string(), category.to_string());
        self
    }

    fn categorize<'a>(&self, tags: impl IntoIterator<Item = &'a String>) -> BTreeMap<String, String> {
        let categories = self.categories.lock().unwrap();
        tags.into_iter()
            .map(|t| (t.clone(), categories.get(t).cloned().unwrap_or_else(|| "default".to_string())))
            .collect()
    }

    pub fn with_verdict(self, exact_match: Option<u64>, near: &[(u64, f32)]) -> Self {
        *self.verdict.lock().unwrap() = SimilarityVerdict {
            exact_match: exact_match.map(PostId),
            near_matches: near
                .iter()
                .map(|&(id, distance)| NearMatch {
                    post_id: PostId(id),
                    distance,
                })
                .collect(),
        };
        self
    }

    pub fn with_conflicts(self, count: u32) -> Self {
        self.pending_conflicts.store(count, Ordering::SeqCst);
        self
    }

    pub fn with_outages(self, count: u32) -> Self {
        self.pending_outages.store(count, Ordering::SeqCst);
        self
    }

    pub fn post(&self, id: u64) -> Post {
        self.posts.lock().unwrap().get(&PostId(id)).cloned().unwrap()
    }

    pub fn post_count(&self) -> usize {
        self.posts.lock().unwrap().len()
    }
}

/// Post with the given tags (category "default") and safety
pub fn post(id: u64, tags: &[&str], safety: Safety) -> Post {
    Post {
        id: PostId(id),
        version: 1,
        content_url: format!("http://board.test/data/posts/{}.png", id),
        md5: None,
        tags: tags.iter().map(|t| t.to_string()).collect::<BTreeSet<_>>(),
        tag_categories: tags.iter().map(|t| (t.to_string(), "default".to_string())).collect(),
        source: Vec::new(),
        safety,
        relations: Vec::new(),
    }
}

#[async_trait::async_trait]
impl BoardApi for FakeBoard {
    async fn ping(&self) -> Result<(), BoardError> {
        if self.unreachable {
            return Err(BoardError::Http("connection refused".to_string()));
        }
        Ok(())
    }

    async fn search_posts(&self, query: &str) -> Result<Vec<PostId>, BoardError> {
        let posts = self.posts.lock().unwrap();
        let by_id = query
            .split_whitespace()
            .find_map(|term| term.strip_prefix("id:"))
            .and_then(|id| id.parse::<u64>().ok());
        Ok(match by_id {
            Some(id) => posts.keys().filter(|p| p.0 == id).copied().collect(),
            None => posts.keys().copied().collect(),
        })
    }

    async fn get_post(&self, id: PostId) -> Result<Post, BoardError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if self
            .pending_outages
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(BoardError::Http("HTTP 503: Service Unavailable".to_string()));
        }
        self.posts
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| BoardError::NotFound(format!("post {}", id)))
    }

    async fn update_post(&self, id: PostId, update: &PostUpdate) -> Result<Post, BoardError> {
        let tag_categories = self.categorize(&update.tags);
        let mut posts = self.posts.lock().unwrap();
        let post = posts.get_mut(&id).ok_or_else(|| BoardError::NotFound(format!("post {}", id)))?;

        if self
            .pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            // Someone else edited the post meanwhile
            post.version += 1;
            post.tags.insert("edited_elsewhere".to_string());
            post.tag_categories.insert("edited_elsewhere".to_string(), "default".to_string());
            return Err(BoardError::VersionConflict(id));
        }
        if post.version != update.version {
            return Err(BoardError::VersionConflict(id));
        }

        post.version += 1;
        post.tags = update.tags.iter().cloned().collect();
        post.tag_categories = tag_categories;
        post.source = update.source.clone();
        post.safety = update.safety;
        self.updates.lock().unwrap().push((id, update.clone()));
        Ok(post.clone())
    }

    async fn stage_upload(&self, bytes: Vec<u8>, file_name: &str) -> Result<UploadToken, BoardError> {
        let n = self.staged.fetch_add(1, Ordering::SeqCst);
        self.staged_files.lock().unwrap().push((file_name.to_string(), bytes));
        Ok(UploadToken::new(format!("{}-{}", file_name, n)))
    }

    async fn reverse_search(&self, _token: &UploadToken) -> Result<SimilarityVerdict, BoardError> {
        Ok(self.verdict.lock().unwrap().clone())
    }

    async fn create_post(&self, _token: UploadToken, new_post: &NewPost) -> Result<Post, BoardError> {
        let tag_categories = self.categorize(&new_post.tags);
        let mut posts = self.posts.lock().unwrap();
        let id = PostId(posts.keys().last().map_or(1, |p| p.0 + 1));
        let post = Post {
            id,
            version: 1,
            content_url: format!("http://board.test/data/posts/{}.png", id),
            md5: None,
            tags: new_post.tags.iter().cloned().collect(),
            tag_categories,
            source: new_post.source.clone(),
            safety: new_post.safety,
            relations: new_post.relations.clone(),
        };
        posts.insert(id, post.clone());
        self.created.lock().unwrap().push(new_post.clone());
        Ok(post)
    }

    async fn download(&self, _content_url: &str) -> Result<Vec<u8>, BoardError> {
        Ok(self.content.clone())
    }
}

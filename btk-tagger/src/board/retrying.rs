//! Retrying board wrapper
//!
//! [`RetryingBoard`] runs every board request through
//! [`with_retry`] with the run's retry policy and a per-request timeout.
//! Only [`BoardError::is_transient`] errors are retried; timeouts become
//! `BoardError::Http`. Version conflicts and rejected requests return on
//! the first attempt.
//!
//! `ping` is not retried so an unreachable board aborts at startup.
//! `create_post` consumes its upload token and runs once.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{BoardApi, BoardError, NewPost, Post, PostId, PostUpdate, SimilarityVerdict, UploadToken};
use crate::services::retry::{with_retry, RetryPolicy};

pub struct RetryingBoard {
    inner: Arc<dyn BoardApi>,
    policy: RetryPolicy,
    timeout: Duration,
    cancel: CancellationToken,
}

impl RetryingBoard {
    pub fn new(inner: Arc<dyn BoardApi>, policy: RetryPolicy, timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            inner,
            policy,
            timeout,
            cancel,
        }
    }

    async fn retried<F, Fut, T>(&self, operation_name: &str, operation: F) -> Result<T, BoardError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, BoardError>>,
    {
        let timeout = self.timeout;
        with_retry(operation_name, &self.policy, &self.cancel, BoardError::is_transient, || {
            let attempt = operation();
            async move {
                match tokio::time::timeout(timeout, attempt).await {
                    Ok(result) => result,
                    Err(_) => Err(BoardError::Http(format!("timed out after {:?}", timeout))),
                }
            }
        })
        .await
    }
}

#[async_trait::async_trait]
impl BoardApi for RetryingBoard {
    async fn ping(&self) -> Result<(), BoardError> {
        self.inner.ping().await
    }

    async fn search_posts(&self, query: &str) -> Result<Vec<PostId>, BoardError> {
        self.retried("board search", || self.inner.search_posts(query)).await
    }

    async fn get_post(&self, id: PostId) -> Result<Post, BoardError> {
        self.retried("board get post", || self.inner.get_post(id)).await
    }

    async fn update_post(&self, id: PostId, update: &PostUpdate) -> Result<Post, BoardError> {
        self.retried("board update post", || self.inner.update_post(id, update)).await
    }

    async fn stage_upload(&self, bytes: Vec<u8>, file_name: &str) -> Result<UploadToken, BoardError> {
        self.retried("board stage upload", || self.inner.stage_upload(bytes.clone(), file_name))
            .await
    }

    async fn reverse_search(&self, token: &UploadToken) -> Result<SimilarityVerdict, BoardError> {
        self.retried("board reverse search", || self.inner.reverse_search(token)).await
    }

    async fn create_post(&self, token: UploadToken, post: &NewPost) -> Result<Post, BoardError> {
        self.inner.create_post(token, post).await
    }

    async fn download(&self, content_url: &str) -> Result<Vec<u8>, BoardError> {
        self.retried("board download", || self.inner.download(content_url)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use btk_common::Safety;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Board whose `get_post` fails `failures` times before answering
    struct FlakyBoard {
        failures: u32,
        error: fn(PostId) -> BoardError,
        calls: AtomicU32,
    }

    impl FlakyBoard {
        fn new(failures: u32, error: fn(PostId) -> BoardError) -> Self {
            Self {
                failures,
                error,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl BoardApi for FlakyBoard {
        async fn ping(&self) -> Result<(), BoardError> {
            Err(BoardError::Http("connection refused".to_string()))
        }

        async fn search_posts(&self, _query: &str) -> Result<Vec<PostId>, BoardError> {
            Ok(Vec::new())
        }

        async fn get_post(&self, id: PostId) -> Result<Post, BoardError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err((self.error)(id));
            }
            Ok(Post {
                id,
                safety: Safety::Safe,
                ..Default::default()
            })
        }

        async fn update_post(&self, id: PostId, _update: &PostUpdate) -> Result<Post, BoardError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(BoardError::VersionConflict(id))
        }

        async fn stage_upload(&self, _bytes: Vec<u8>, _file_name: &str) -> Result<UploadToken, BoardError> {
            Ok(UploadToken::new("t"))
        }

        async fn reverse_search(&self, _token: &UploadToken) -> Result<SimilarityVerdict, BoardError> {
            Ok(SimilarityVerdict::default())
        }

        async fn create_post(&self, _token: UploadToken, _post: &NewPost) -> Result<Post, BoardError> {
            Err(BoardError::Http("reset".to_string()))
        }

        async fn download(&self, _content_url: &str) -> Result<Vec<u8>, BoardError> {
            Ok(Vec::new())
        }
    }

    fn wrap(inner: Arc<FlakyBoard>) -> RetryingBoard {
        let policy = RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(1),
        };
        RetryingBoard::new(inner, policy, Duration::from_secs(5), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_transient_error_is_retried() {
        let inner = Arc::new(FlakyBoard::new(1, |_| BoardError::Http("HTTP 503".to_string())));
        let post = wrap(inner.clone()).get_post(PostId(3)).await.unwrap();
        assert_eq!(post.id, PostId(3));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_transient_error_stops_at_ceiling() {
        let inner = Arc::new(FlakyBoard::new(10, |_| BoardError::Http("HTTP 503".to_string())));
        assert!(wrap(inner.clone()).get_post(PostId(3)).await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let inner = Arc::new(FlakyBoard::new(10, |id| BoardError::NotFound(format!("post {}", id))));
        assert!(matches!(wrap(inner.clone()).get_post(PostId(3)).await, Err(BoardError::NotFound(_))));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_version_conflict_is_not_retried() {
        let inner = Arc::new(FlakyBoard::new(0, |_| BoardError::Parse(String::new())));
        let update = PostUpdate {
            version: 1,
            tags: vec!["cat".to_string()],
            source: Vec::new(),
            safety: Safety::Safe,
        };
        let result = wrap(inner.clone()).update_post(PostId(3), &update).await;
        assert!(matches!(result, Err(BoardError::VersionConflict(PostId(3)))));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retried_as_transient() {
        struct SlowBoard;

        #[async_trait::async_trait]
        impl BoardApi for SlowBoard {
            async fn ping(&self) -> Result<(), BoardError> {
                Ok(())
            }
            async fn search_posts(&self, _query: &str) -> Result<Vec<PostId>, BoardError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Vec::new())
            }
            async fn get_post(&self, _id: PostId) -> Result<Post, BoardError> {
                Err(BoardError::Parse(String::new()))
            }
            async fn update_post(&self, _id: PostId, _update: &PostUpdate) -> Result<Post, BoardError> {
                Err(BoardError::Parse(String::new()))
            }
            async fn stage_upload(&self, _bytes: Vec<u8>, _file_name: &str) -> Result<UploadToken, BoardError> {
                Err(BoardError::Parse(String::new()))
            }
            async fn reverse_search(&self, _token: &UploadToken) -> Result<SimilarityVerdict, BoardError> {
                Err(BoardError::Parse(String::new()))
            }
            async fn create_post(&self, _token: UploadToken, _post: &NewPost) -> Result<Post, BoardError> {
                Err(BoardError::Parse(String::new()))
            }
            async fn download(&self, _content_url: &str) -> Result<Vec<u8>, BoardError> {
                Err(BoardError::Parse(String::new()))
            }
        }

        let board = RetryingBoard::new(
            Arc::new(SlowBoard),
            RetryPolicy::default(),
            Duration::from_secs(30),
            CancellationToken::new(),
        );
        let err = board.search_posts("tagme").await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_ping_and_create_run_once() {
        let inner = Arc::new(FlakyBoard::new(0, |_| BoardError::Parse(String::new())));
        let board = wrap(inner);
        assert!(board.ping().await.is_err());

        let new_post = NewPost {
            tags: vec!["tagme".to_string()],
            source: Vec::new(),
            safety: Safety::Safe,
            relations: Vec::new(),
        };
        assert!(board.create_post(UploadToken::new("t"), &new_post).await.is_err());
    }
}

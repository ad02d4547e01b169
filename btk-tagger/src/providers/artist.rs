//! Social-media artist resolver
//!
//! Maps a social account (display name, handle) to a canonical artist tag
//! through the Danbooru artist directory. Tries each name in order and
//! stops at the first match.

use std::sync::Arc;

use super::DanbooruClient;
use crate::types::{CandidateResult, ProviderError, ProviderId, ProviderResponse};

pub struct ArtistResolver {
    danbooru: Arc<DanbooruClient>,
}

impl ArtistResolver {
    pub fn new(danbooru: Arc<DanbooruClient>) -> Self {
        Self { danbooru }
    }

    /// Candidate carrying the artist tag, or `NotFound`
    pub async fn lookup(&self, names: &[String]) -> Result<ProviderResponse, ProviderError> {
        for name in names {
            if let Some(artist) = self.danbooru.search_artist(name).await? {
                return Ok(ProviderResponse::single(
                    CandidateResult::new(ProviderId::ArtistResolver).with_tags([artist]),
                ));
            }
        }
        Err(ProviderError::NotFound)
    }
}

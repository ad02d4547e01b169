//! Search query preparation
//!
//! Board search uses `token:value` named filters. Free-form tags that
//! happen to contain a colon (e.g. `re:zero`) must be escaped or the board
//! rejects the query as an unknown token.

/// Named tokens the board understands
const ALLOWED_TOKENS: &[&str] = &[
    "ar",
    "area",
    "aspect-ratio",
    "comment",
    "comment-count",
    "comment-date",
    "comment-time",
    "content-checksum",
    "creation-date",
    "creation-time",
    "date",
    "disliked",
    "edit-date",
    "edit-time",
    "fav",
    "fav-count",
    "fav-date",
    "fav-time",
    "feature-count",
    "feature-date",
    "feature-time",
    "file-size",
    "flag",
    "height",
    "id",
    "image-ar",
    "image-area",
    "image-aspect-ratio",
    "image-height",
    "image-width",
    "last-edit-date",
    "last-edit-time",
    "liked",
    "md5",
    "note-count",
    "note-text",
    "pool",
    "rating",
    "relation-count",
    "safety",
    "score",
    "sha1",
    "sort",
    "source",
    "submit",
    "tag",
    "tag-count",
    "time",
    "tumbleweed",
    "type",
    "upload",
    "uploader",
    "width",
];

/// Page size used when listing posts
pub const PAGE_SIZE: usize = 100;

fn is_allowed_token(token: &str) -> bool {
    let token = token.strip_prefix('-').unwrap_or(token);
    ALLOWED_TOKENS.contains(&token)
}

/// Turn user input into a board query.
///
/// - A bare number selects that post id
/// - Colons in terms whose prefix is not a known token are escaped
/// - Unless `include_videos`, results are restricted to images and animations
pub fn sanitize_query(query: &str, include_videos: bool) -> String {
    let query = query.trim();

    let body = if !query.is_empty() && query.chars().all(|c| c.is_ascii_digit()) {
        format!("id:{}", query)
    } else {
        query
            .split_whitespace()
            .map(|term| match term.split_once(':') {
                Some((token, _)) if !is_allowed_token(token) => term.replace(':', "\\:"),
                _ => term.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" ")
    };

    match (include_videos, body.is_empty()) {
        (true, _) => body,
        (false, true) => "type:image,animation".to_string(),
        (false, false) => format!("type:image,animation {}", body),
    }
}

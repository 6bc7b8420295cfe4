use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub type Id = i64;

/// Stored media discriminator. The serialized form is also what the
/// database holds, and it alone decides the Content-Type served back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "media_kind", rename_all = "UPPERCASE")]
pub enum MediaKind {
    Text,
    Image,
    Gif,
    Video,
}

impl MediaKind {
    pub fn content_type(self) -> &'static str {
        match self {
            MediaKind::Video => "video/mp4",
            MediaKind::Gif => "image/gif",
            // TEXT never reaches the media route; stored avatars and
            // uploaded stills are all served as jpeg.
            _ => "image/jpeg",
        }
    }

    /// Post uploads are classified by the declared content type only:
    /// `video/*` becomes VIDEO, everything else IMAGE.
    pub fn from_upload(content_type: Option<&str>) -> Self {
        match content_type {
            Some(ct) if ct.starts_with("video") => MediaKind::Video,
            _ => MediaKind::Image,
        }
    }
}

/// Which table a media fetch reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaTarget {
    Posts,
    Comments,
    Users,
}

impl MediaTarget {
    pub fn parse(segment: &str) -> Option<Self> {
        match segment {
            "posts" => Some(MediaTarget::Posts),
            "comments" => Some(MediaTarget::Comments),
            "users" => Some(MediaTarget::Users),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedSort {
    #[default]
    Latest,
    Top,
}

impl FeedSort {
    pub fn parse(s: Option<&str>) -> Self {
        match s {
            Some("top") => FeedSort::Top,
            _ => FeedSort::Latest,
        }
    }
}

/// Full user row as the repositories see it; never serialized to clients.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRecord {
    pub id: Id,
    pub name: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub image: Option<String>,
    pub is_admin: bool,
    pub is_approved: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
}

/// Admin user listing row.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct UserSummary {
    pub id: Id,
    pub name: String,
    pub email: String,
    pub is_approved: bool,
    pub created_at: DateTime<Utc>,
}

/// Denormalized author block attached to posts and comments.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Author {
    pub name: String,
    pub image: Option<String>,
}

/// One feed entry: post plus aggregates and the viewer-relative flag.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PostSummary {
    pub id: Id,
    pub title: Option<String>,
    pub description: Option<String>,
    pub media_url: String,
    pub media_kind: MediaKind,
    pub created_at: DateTime<Utc>,
    pub user: Author,
    pub comment_count: i64,
    pub like_count: i64,
    pub is_liked: bool,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub user_id: Id,
    pub title: Option<String>,
    pub description: Option<String>,
    pub media_kind: MediaKind,
    pub media_data: Vec<u8>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CommentView {
    pub id: Id,
    pub content: String,
    pub media_url: Option<String>,
    pub media_kind: MediaKind,
    pub created_at: DateTime<Utc>,
    pub user: Author,
}

#[derive(Debug, Clone)]
pub struct NewComment {
    pub post_id: Id,
    pub user_id: Id,
    pub content: String,
    /// Set for GIF comments, where the external URL itself is the reference.
    pub media_url: Option<String>,
    pub media_kind: MediaKind,
    /// Set only for uploaded IMAGE comments.
    pub media_data: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct TagCount {
    pub name: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegisteredUser {
    pub id: Id,
    pub name: String,
    pub email: String,
    pub is_admin: bool,
    pub is_approved: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Minimal identity echoed back at login next to the token.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Identity {
    pub id: Id,
    pub name: String,
    pub email: String,
    pub image: Option<String>,
    pub is_admin: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    pub token: String,
    pub user: Identity,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreatedPost {
    pub id: Id,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LikeStatus {
    pub liked: bool,
}

/// JSON body fallback for text-only comments.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewCommentBody {
    pub content: Option<String>,
}

use async_trait::async_trait;

use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("internal: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

#[async_trait]
pub trait UserRepo: Send + Sync {
    /// Insert an unapproved, non-admin user. `Conflict` on duplicate email.
    async fn create_user(&self, new: NewUser) -> RepoResult<Id>;
    async fn find_user_by_email(&self, email: &str) -> RepoResult<Option<UserRecord>>;
    async fn list_users(&self) -> RepoResult<Vec<UserSummary>>;
    async fn approve_user(&self, id: Id) -> RepoResult<()>;
    /// Deletes the row; the user's posts, comments and likes go with it.
    async fn delete_user(&self, id: Id) -> RepoResult<()>;
    /// Applies whichever of the two updates is present. The avatar write
    /// also sets the image reference to `/media/users/{id}`.
    async fn update_profile(
        &self,
        id: Id,
        password_hash: Option<String>,
        avatar: Option<Vec<u8>>,
    ) -> RepoResult<()>;
}

#[async_trait]
pub trait PostRepo: Send + Sync {
    async fn list_posts(&self, sort: FeedSort, viewer: Option<Id>) -> RepoResult<Vec<PostSummary>>;
    async fn get_post(&self, id: Id, viewer: Option<Id>) -> RepoResult<PostSummary>;
    /// Insert, synthesize `/media/posts/{id}`, then attach tags
    /// (get-or-insert by name, idempotent join rows). Returns the new id.
    async fn create_post(&self, new: NewPost) -> RepoResult<Id>;
    async fn post_owner(&self, id: Id) -> RepoResult<Id>;
    /// Cascades to the post's comments, likes and tag joins.
    async fn delete_post(&self, id: Id) -> RepoResult<()>;
    /// Flip the (user, post) like row; returns the resulting liked state.
    async fn toggle_like(&self, user_id: Id, post_id: Id) -> RepoResult<bool>;
}

#[async_trait]
pub trait CommentRepo: Send + Sync {
    /// Comments for a post, creation ascending, with author blocks.
    async fn list_comments(&self, post_id: Id) -> RepoResult<Vec<CommentView>>;
    async fn create_comment(&self, new: NewComment) -> RepoResult<CommentView>;
    async fn comment_owner(&self, id: Id) -> RepoResult<Id>;
    async fn delete_comment(&self, id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait TagRepo: Send + Sync {
    /// Tags by usage count descending, zero-use tags included.
    async fn top_tags(&self, limit: i64) -> RepoResult<Vec<TagCount>>;
}

#[async_trait]
pub trait MediaRepo: Send + Sync {
    /// Raw bytes plus stored kind for one row. `NotFound` covers both a
    /// missing row and a row whose payload is empty.
    async fn load_media(&self, target: MediaTarget, id: Id) -> RepoResult<(Vec<u8>, MediaKind)>;
}

pub trait Repo: UserRepo + PostRepo + CommentRepo + TagRepo + MediaRepo {}

impl<T> Repo for T where T: UserRepo + PostRepo + CommentRepo + TagRepo + MediaRepo {}

/// Normalize a raw comma-separated tag string: split, trim, drop empties.
/// Duplicates survive here; the storage layer dedups by unique name.
pub fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

pub fn post_media_url(id: Id) -> String {
    format!("/media/posts/{id}")
}

pub fn comment_media_url(id: Id) -> String {
    format!("/media/comments/{id}")
}

pub fn user_media_url(id: Id) -> String {
    format!("/media/users/{id}")
}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use chrono::{DateTime, Utc};
    use std::collections::HashMap;
    use std::sync::{Arc, RwLock};

    #[derive(Clone)]
    struct UserRow {
        rec: UserRecord,
        image_data: Option<Vec<u8>>,
    }

    #[derive(Clone)]
    struct PostRow {
        id: Id,
        user_id: Id,
        title: Option<String>,
        description: Option<String>,
        media_url: String,
        media_kind: MediaKind,
        media_data: Vec<u8>,
        created_at: DateTime<Utc>,
    }

    #[derive(Clone)]
    struct CommentRow {
        id: Id,
        post_id: Id,
        user_id: Id,
        content: String,
        media_url: Option<String>,
        media_kind: MediaKind,
        media_data: Option<Vec<u8>>,
        created_at: DateTime<Utc>,
    }

    #[derive(Default)]
    struct State {
        users: HashMap<Id, UserRow>,
        posts: HashMap<Id, PostRow>,
        comments: HashMap<Id, CommentRow>,
        likes: Vec<(Id, Id)>,           // (user_id, post_id)
        tags: Vec<(Id, String)>,        // insertion-ordered, unique names
        post_tags: Vec<(Id, Id)>,       // (post_id, tag_id)
        next_id: Id,
    }

    /// In-memory backend: one lock around the whole state, explicit
    /// cascades where the Postgres schema relies on foreign keys.
    #[derive(Clone, Default)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
    }

    impl InMemRepo {
        pub fn new() -> Self {
            Self::default()
        }

        fn next_id(state: &mut State) -> Id {
            state.next_id += 1;
            state.next_id
        }

        fn cascade_post(state: &mut State, post_id: Id) {
            state.comments.retain(|_, c| c.post_id != post_id);
            state.likes.retain(|&(_, p)| p != post_id);
            state.post_tags.retain(|&(p, _)| p != post_id);
        }

        fn author(state: &State, user_id: Id) -> Author {
            match state.users.get(&user_id) {
                Some(u) => Author { name: u.rec.name.clone(), image: u.rec.image.clone() },
                None => Author { name: String::new(), image: None },
            }
        }

        fn summarize(state: &State, p: &PostRow, viewer: Option<Id>) -> PostSummary {
            let comment_count =
                state.comments.values().filter(|c| c.post_id == p.id).count() as i64;
            let like_count = state.likes.iter().filter(|&&(_, pid)| pid == p.id).count() as i64;
            let is_liked = viewer
                .map(|v| state.likes.contains(&(v, p.id)))
                .unwrap_or(false);
            let tags = state
                .post_tags
                .iter()
                .filter(|&&(pid, _)| pid == p.id)
                .filter_map(|&(_, tid)| {
                    state.tags.iter().find(|(id, _)| *id == tid).map(|(_, n)| n.clone())
                })
                .collect();
            PostSummary {
                id: p.id,
                title: p.title.clone(),
                description: p.description.clone(),
                media_url: p.media_url.clone(),
                media_kind: p.media_kind,
                created_at: p.created_at,
                user: Self::author(state, p.user_id),
                comment_count,
                like_count,
                is_liked,
                tags,
            }
        }

        fn comment_view(state: &State, c: &CommentRow) -> CommentView {
            CommentView {
                id: c.id,
                content: c.content.clone(),
                media_url: c.media_url.clone(),
                media_kind: c.media_kind,
                created_at: c.created_at,
                user: Self::author(state, c.user_id),
            }
        }
    }

    #[async_trait]
    impl UserRepo for InMemRepo {
        async fn create_user(&self, new: NewUser) -> RepoResult<Id> {
            let mut s = self.state.write().unwrap();
            if s.users.values().any(|u| u.rec.email == new.email) {
                return Err(RepoError::Conflict);
            }
            let id = Self::next_id(&mut s);
            s.users.insert(
                id,
                UserRow {
                    rec: UserRecord {
                        id,
                        name: new.name,
                        email: new.email,
                        password_hash: Some(new.password_hash),
                        image: None,
                        is_admin: false,
                        is_approved: false,
                        created_at: Utc::now(),
                    },
                    image_data: None,
                },
            );
            Ok(id)
        }

        async fn find_user_by_email(&self, email: &str) -> RepoResult<Option<UserRecord>> {
            let s = self.state.read().unwrap();
            Ok(s.users.values().find(|u| u.rec.email == email).map(|u| u.rec.clone()))
        }

        async fn list_users(&self) -> RepoResult<Vec<UserSummary>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s
                .users
                .values()
                .map(|u| UserSummary {
                    id: u.rec.id,
                    name: u.rec.name.clone(),
                    email: u.rec.email.clone(),
                    is_approved: u.rec.is_approved,
                    created_at: u.rec.created_at,
                })
                .collect();
            v.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
            Ok(v)
        }

        async fn approve_user(&self, id: Id) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            let u = s.users.get_mut(&id).ok_or(RepoError::NotFound)?;
            u.rec.is_approved = true;
            Ok(())
        }

        async fn delete_user(&self, id: Id) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            if s.users.remove(&id).is_none() {
                return Err(RepoError::NotFound);
            }
            let owned: Vec<Id> =
                s.posts.values().filter(|p| p.user_id == id).map(|p| p.id).collect();
            for pid in owned {
                s.posts.remove(&pid);
                Self::cascade_post(&mut s, pid);
            }
            s.comments.retain(|_, c| c.user_id != id);
            s.likes.retain(|&(u, _)| u != id);
            Ok(())
        }

        async fn update_profile(
            &self,
            id: Id,
            password_hash: Option<String>,
            avatar: Option<Vec<u8>>,
        ) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            let u = s.users.get_mut(&id).ok_or(RepoError::NotFound)?;
            if let Some(hash) = password_hash {
                u.rec.password_hash = Some(hash);
            }
            if let Some(bytes) = avatar {
                u.rec.image = Some(user_media_url(id));
                u.image_data = Some(bytes);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl PostRepo for InMemRepo {
        async fn list_posts(
            &self,
            sort: FeedSort,
            viewer: Option<Id>,
        ) -> RepoResult<Vec<PostSummary>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> =
                s.posts.values().map(|p| Self::summarize(&s, p, viewer)).collect();
            match sort {
                FeedSort::Latest => {
                    v.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)))
                }
                FeedSort::Top => v.sort_by(|a, b| {
                    b.like_count
                        .cmp(&a.like_count)
                        .then(b.created_at.cmp(&a.created_at))
                        .then(b.id.cmp(&a.id))
                }),
            }
            Ok(v)
        }

        async fn get_post(&self, id: Id, viewer: Option<Id>) -> RepoResult<PostSummary> {
            let s = self.state.read().unwrap();
            let p = s.posts.get(&id).ok_or(RepoError::NotFound)?;
            Ok(Self::summarize(&s, p, viewer))
        }

        async fn create_post(&self, new: NewPost) -> RepoResult<Id> {
            let mut s = self.state.write().unwrap();
            let id = Self::next_id(&mut s);
            s.posts.insert(
                id,
                PostRow {
                    id,
                    user_id: new.user_id,
                    title: new.title,
                    description: new.description,
                    media_url: post_media_url(id),
                    media_kind: new.media_kind,
                    media_data: new.media_data,
                    created_at: Utc::now(),
                },
            );
            for name in new.tags {
                let tag_id = match s.tags.iter().find(|(_, n)| *n == name) {
                    Some((tid, _)) => *tid,
                    None => {
                        let tid = Self::next_id(&mut s);
                        s.tags.push((tid, name));
                        tid
                    }
                };
                if !s.post_tags.contains(&(id, tag_id)) {
                    s.post_tags.push((id, tag_id));
                }
            }
            Ok(id)
        }

        async fn post_owner(&self, id: Id) -> RepoResult<Id> {
            let s = self.state.read().unwrap();
            s.posts.get(&id).map(|p| p.user_id).ok_or(RepoError::NotFound)
        }

        async fn delete_post(&self, id: Id) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            if s.posts.remove(&id).is_none() {
                return Err(RepoError::NotFound);
            }
            Self::cascade_post(&mut s, id);
            Ok(())
        }

        async fn toggle_like(&self, user_id: Id, post_id: Id) -> RepoResult<bool> {
            let mut s = self.state.write().unwrap();
            if !s.posts.contains_key(&post_id) {
                return Err(RepoError::NotFound);
            }
            if let Some(pos) = s.likes.iter().position(|&pair| pair == (user_id, post_id)) {
                s.likes.remove(pos);
                Ok(false)
            } else {
                s.likes.push((user_id, post_id));
                Ok(true)
            }
        }
    }

    #[async_trait]
    impl CommentRepo for InMemRepo {
        async fn list_comments(&self, post_id: Id) -> RepoResult<Vec<CommentView>> {
            let s = self.state.read().unwrap();
            let mut rows: Vec<_> =
                s.comments.values().filter(|c| c.post_id == post_id).collect();
            rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
            Ok(rows.into_iter().map(|c| Self::comment_view(&s, c)).collect())
        }

        async fn create_comment(&self, new: NewComment) -> RepoResult<CommentView> {
            let mut s = self.state.write().unwrap();
            if !s.posts.contains_key(&new.post_id) {
                return Err(RepoError::NotFound);
            }
            let id = Self::next_id(&mut s);
            // Uploaded images get the self-referential media URL; GIF
            // comments carry the external URL the client supplied.
            let media_url = if new.media_data.is_some() {
                Some(comment_media_url(id))
            } else {
                new.media_url
            };
            let row = CommentRow {
                id,
                post_id: new.post_id,
                user_id: new.user_id,
                content: new.content,
                media_url,
                media_kind: new.media_kind,
                media_data: new.media_data,
                created_at: Utc::now(),
            };
            let view = Self::comment_view(&s, &row);
            s.comments.insert(id, row);
            Ok(view)
        }

        async fn comment_owner(&self, id: Id) -> RepoResult<Id> {
            let s = self.state.read().unwrap();
            s.comments.get(&id).map(|c| c.user_id).ok_or(RepoError::NotFound)
        }

        async fn delete_comment(&self, id: Id) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            s.comments.remove(&id).map(|_| ()).ok_or(RepoError::NotFound)
        }
    }

    #[async_trait]
    impl TagRepo for InMemRepo {
        async fn top_tags(&self, limit: i64) -> RepoResult<Vec<TagCount>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<TagCount> = s
                .tags
                .iter()
                .map(|(tid, name)| TagCount {
                    name: name.clone(),
                    count: s.post_tags.iter().filter(|&&(_, t)| t == *tid).count() as i64,
                })
                .collect();
            v.sort_by(|a, b| b.count.cmp(&a.count).then(a.name.cmp(&b.name)));
            v.truncate(limit as usize);
            Ok(v)
        }
    }

    #[async_trait]
    impl MediaRepo for InMemRepo {
        async fn load_media(
            &self,
            target: MediaTarget,
            id: Id,
        ) -> RepoResult<(Vec<u8>, MediaKind)> {
            let s = self.state.read().unwrap();
            let found = match target {
                MediaTarget::Posts => s
                    .posts
                    .get(&id)
                    .map(|p| (p.media_data.clone(), p.media_kind)),
                MediaTarget::Comments => s
                    .comments
                    .get(&id)
                    .and_then(|c| c.media_data.clone().map(|d| (d, c.media_kind))),
                MediaTarget::Users => s
                    .users
                    .get(&id)
                    .and_then(|u| u.image_data.clone().map(|d| (d, MediaKind::Image))),
            };
            match found {
                Some((bytes, _)) if bytes.is_empty() => Err(RepoError::NotFound),
                Some(pair) => Ok(pair),
                None => Err(RepoError::NotFound),
            }
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use chrono::{DateTime, Utc};
    use sqlx::{Pool, Postgres, Row};

    #[derive(Clone)]
    pub struct PgRepo {
        pool: Pool<Postgres>,
    }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self {
            Self { pool }
        }
    }

    fn internal(e: sqlx::Error) -> RepoError {
        match e {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            other => RepoError::Internal(other.to_string()),
        }
    }

    #[derive(sqlx::FromRow)]
    struct PostAggRow {
        id: Id,
        title: Option<String>,
        description: Option<String>,
        media_url: String,
        media_kind: MediaKind,
        created_at: DateTime<Utc>,
        author_name: String,
        author_image: Option<String>,
        comment_count: i64,
        like_count: i64,
        is_liked: bool,
    }

    impl PostAggRow {
        fn into_summary(self, tags: Vec<String>) -> PostSummary {
            PostSummary {
                id: self.id,
                title: self.title,
                description: self.description,
                media_url: self.media_url,
                media_kind: self.media_kind,
                created_at: self.created_at,
                user: Author { name: self.author_name, image: self.author_image },
                comment_count: self.comment_count,
                like_count: self.like_count,
                is_liked: self.is_liked,
                tags,
            }
        }
    }

    const POST_AGG_SELECT: &str = r#"
        SELECT p.id, p.title, p.description, p.media_url, p.media_kind, p.created_at,
               u.name AS author_name, u.image AS author_image,
               COUNT(DISTINCT c.id) AS comment_count,
               COUNT(DISTINCT l.user_id) AS like_count,
               COALESCE(BOOL_OR(l.user_id = $1), FALSE) AS is_liked
        FROM posts p
        JOIN users u ON u.id = p.user_id
        LEFT JOIN comments c ON c.post_id = p.id
        LEFT JOIN likes l ON l.post_id = p.id
    "#;

    const COMMENT_SELECT: &str = r#"
        SELECT c.id, c.content, c.media_url, c.media_kind, c.created_at,
               u.name AS author_name, u.image AS author_image
        FROM comments c
        JOIN users u ON u.id = c.user_id
    "#;

    #[derive(sqlx::FromRow)]
    struct CommentRow {
        id: Id,
        content: String,
        media_url: Option<String>,
        media_kind: MediaKind,
        created_at: DateTime<Utc>,
        author_name: String,
        author_image: Option<String>,
    }

    impl From<CommentRow> for CommentView {
        fn from(r: CommentRow) -> Self {
            CommentView {
                id: r.id,
                content: r.content,
                media_url: r.media_url,
                media_kind: r.media_kind,
                created_at: r.created_at,
                user: Author { name: r.author_name, image: r.author_image },
            }
        }
    }

    impl PgRepo {
        async fn tags_for_post(&self, post_id: Id) -> RepoResult<Vec<String>> {
            sqlx::query_scalar::<_, String>(
                "SELECT t.name FROM tags t JOIN post_tags pt ON pt.tag_id = t.id \
                 WHERE pt.post_id = $1 ORDER BY pt.ord, pt.tag_id",
            )
            .bind(post_id)
            .fetch_all(&self.pool)
            .await
            .map_err(internal)
        }
    }

    #[async_trait]
    impl UserRepo for PgRepo {
        async fn create_user(&self, new: NewUser) -> RepoResult<Id> {
            sqlx::query_scalar::<_, Id>(
                "INSERT INTO users (name, email, password_hash, is_admin, is_approved) \
                 VALUES ($1, $2, $3, FALSE, FALSE) RETURNING id",
            )
            .bind(&new.name)
            .bind(&new.email)
            .bind(&new.password_hash)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e.as_database_error() {
                Some(db) if db.is_unique_violation() => RepoError::Conflict,
                _ => internal(e),
            })
        }

        async fn find_user_by_email(&self, email: &str) -> RepoResult<Option<UserRecord>> {
            sqlx::query_as::<_, UserRecord>(
                "SELECT id, name, email, password_hash, image, is_admin, is_approved, created_at \
                 FROM users WHERE email = $1",
            )
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)
        }

        async fn list_users(&self) -> RepoResult<Vec<UserSummary>> {
            sqlx::query_as::<_, UserSummary>(
                "SELECT id, name, email, is_approved, created_at FROM users \
                 ORDER BY created_at DESC, id DESC",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(internal)
        }

        async fn approve_user(&self, id: Id) -> RepoResult<()> {
            let res = sqlx::query("UPDATE users SET is_approved = TRUE WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(internal)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }

        async fn delete_user(&self, id: Id) -> RepoResult<()> {
            // Posts, comments, likes and joins fall to the schema cascades.
            let res = sqlx::query("DELETE FROM users WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(internal)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }

        async fn update_profile(
            &self,
            id: Id,
            password_hash: Option<String>,
            avatar: Option<Vec<u8>>,
        ) -> RepoResult<()> {
            let image_url = avatar.as_ref().map(|_| user_media_url(id));
            let res = sqlx::query(
                "UPDATE users SET \
                   password_hash = COALESCE($2, password_hash), \
                   image = COALESCE($3, image), \
                   image_data = COALESCE($4, image_data) \
                 WHERE id = $1",
            )
            .bind(id)
            .bind(password_hash)
            .bind(image_url)
            .bind(avatar)
            .execute(&self.pool)
            .await
            .map_err(internal)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl PostRepo for PgRepo {
        async fn list_posts(
            &self,
            sort: FeedSort,
            viewer: Option<Id>,
        ) -> RepoResult<Vec<PostSummary>> {
            let order = match sort {
                FeedSort::Latest => "ORDER BY p.created_at DESC, p.id DESC",
                FeedSort::Top => "ORDER BY like_count DESC, p.created_at DESC, p.id DESC",
            };
            let sql = format!("{POST_AGG_SELECT} GROUP BY p.id, u.name, u.image {order}");
            let rows = sqlx::query_as::<_, PostAggRow>(&sql)
                .bind(viewer)
                .fetch_all(&self.pool)
                .await
                .map_err(internal)?;
            // Tag fetch stays a per-post second query; the aggregate query
            // and the tag join never mix.
            let mut out = Vec::with_capacity(rows.len());
            for row in rows {
                let tags = self.tags_for_post(row.id).await?;
                out.push(row.into_summary(tags));
            }
            Ok(out)
        }

        async fn get_post(&self, id: Id, viewer: Option<Id>) -> RepoResult<PostSummary> {
            let sql = format!("{POST_AGG_SELECT} WHERE p.id = $2 GROUP BY p.id, u.name, u.image");
            let row = sqlx::query_as::<_, PostAggRow>(&sql)
                .bind(viewer)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(internal)?
                .ok_or(RepoError::NotFound)?;
            let tags = self.tags_for_post(id).await?;
            Ok(row.into_summary(tags))
        }

        async fn create_post(&self, new: NewPost) -> RepoResult<Id> {
            let mut tx = self.pool.begin().await.map_err(internal)?;
            let id = sqlx::query_scalar::<_, Id>(
                "INSERT INTO posts (title, description, media_url, media_kind, media_data, user_id) \
                 VALUES ($1, $2, '', $3, $4, $5) RETURNING id",
            )
            .bind(&new.title)
            .bind(&new.description)
            .bind(new.media_kind)
            .bind(&new.media_data)
            .bind(new.user_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(internal)?;

            // The media reference embeds the generated id, hence the
            // insert-then-update two-step inside one transaction.
            sqlx::query("UPDATE posts SET media_url = $1 WHERE id = $2")
                .bind(post_media_url(id))
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(internal)?;

            for (ord, name) in new.tags.iter().enumerate() {
                sqlx::query("INSERT INTO tags (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
                    .bind(name)
                    .execute(&mut *tx)
                    .await
                    .map_err(internal)?;
                let tag_id = sqlx::query_scalar::<_, Id>("SELECT id FROM tags WHERE name = $1")
                    .bind(name)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(internal)?;
                // ord replays the submitted order in listings; the conflict
                // clause keeps the first position for repeated tags.
                sqlx::query(
                    "INSERT INTO post_tags (post_id, tag_id, ord) VALUES ($1, $2, $3) \
                     ON CONFLICT DO NOTHING",
                )
                .bind(id)
                .bind(tag_id)
                .bind(ord as i32)
                .execute(&mut *tx)
                .await
                .map_err(internal)?;
            }

            tx.commit().await.map_err(internal)?;
            Ok(id)
        }

        async fn post_owner(&self, id: Id) -> RepoResult<Id> {
            sqlx::query_scalar::<_, Id>("SELECT user_id FROM posts WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(internal)?
                .ok_or(RepoError::NotFound)
        }

        async fn delete_post(&self, id: Id) -> RepoResult<()> {
            // Comments, likes and tag joins cascade via foreign keys.
            let res = sqlx::query("DELETE FROM posts WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(internal)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }

        async fn toggle_like(&self, user_id: Id, post_id: Id) -> RepoResult<bool> {
            let mut tx = self.pool.begin().await.map_err(internal)?;
            let exists = sqlx::query("SELECT 1 FROM posts WHERE id = $1")
                .bind(post_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(internal)?;
            if exists.is_none() {
                return Err(RepoError::NotFound);
            }
            let liked = sqlx::query("SELECT 1 FROM likes WHERE user_id = $1 AND post_id = $2")
                .bind(user_id)
                .bind(post_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(internal)?
                .is_some();
            if liked {
                sqlx::query("DELETE FROM likes WHERE user_id = $1 AND post_id = $2")
                    .bind(user_id)
                    .bind(post_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(internal)?;
            } else {
                sqlx::query("INSERT INTO likes (user_id, post_id) VALUES ($1, $2)")
                    .bind(user_id)
                    .bind(post_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(internal)?;
            }
            tx.commit().await.map_err(internal)?;
            Ok(!liked)
        }
    }

    #[async_trait]
    impl CommentRepo for PgRepo {
        async fn list_comments(&self, post_id: Id) -> RepoResult<Vec<CommentView>> {
            let sql = format!(
                "{COMMENT_SELECT} WHERE c.post_id = $1 ORDER BY c.created_at ASC, c.id ASC"
            );
            let rows = sqlx::query_as::<_, CommentRow>(&sql)
                .bind(post_id)
                .fetch_all(&self.pool)
                .await
                .map_err(internal)?;
            Ok(rows.into_iter().map(CommentView::from).collect())
        }

        async fn create_comment(&self, new: NewComment) -> RepoResult<CommentView> {
            let mut tx = self.pool.begin().await.map_err(internal)?;
            let exists = sqlx::query("SELECT 1 FROM posts WHERE id = $1")
                .bind(new.post_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(internal)?;
            if exists.is_none() {
                return Err(RepoError::NotFound);
            }
            let id = sqlx::query_scalar::<_, Id>(
                "INSERT INTO comments (content, media_url, media_kind, media_data, post_id, user_id) \
                 VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
            )
            .bind(&new.content)
            .bind(&new.media_url)
            .bind(new.media_kind)
            .bind(&new.media_data)
            .bind(new.post_id)
            .bind(new.user_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(internal)?;

            if new.media_data.is_some() {
                // Same self-referential two-step as post creation.
                sqlx::query("UPDATE comments SET media_url = $1 WHERE id = $2")
                    .bind(comment_media_url(id))
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .map_err(internal)?;
            }
            tx.commit().await.map_err(internal)?;

            let sql = format!("{COMMENT_SELECT} WHERE c.id = $1");
            let row = sqlx::query_as::<_, CommentRow>(&sql)
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(internal)?;
            Ok(row.into())
        }

        async fn comment_owner(&self, id: Id) -> RepoResult<Id> {
            sqlx::query_scalar::<_, Id>("SELECT user_id FROM comments WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(internal)?
                .ok_or(RepoError::NotFound)
        }

        async fn delete_comment(&self, id: Id) -> RepoResult<()> {
            let res = sqlx::query("DELETE FROM comments WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(internal)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl TagRepo for PgRepo {
        async fn top_tags(&self, limit: i64) -> RepoResult<Vec<TagCount>> {
            sqlx::query_as::<_, TagCount>(
                "SELECT t.name, COUNT(pt.post_id) AS count \
                 FROM tags t LEFT JOIN post_tags pt ON pt.tag_id = t.id \
                 GROUP BY t.id ORDER BY count DESC, t.name ASC LIMIT $1",
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(internal)
        }
    }

    #[async_trait]
    impl MediaRepo for PgRepo {
        async fn load_media(
            &self,
            target: MediaTarget,
            id: Id,
        ) -> RepoResult<(Vec<u8>, MediaKind)> {
            let sql = match target {
                MediaTarget::Posts => {
                    "SELECT media_data AS data, media_kind FROM posts WHERE id = $1"
                }
                MediaTarget::Comments => {
                    "SELECT media_data AS data, media_kind FROM comments WHERE id = $1"
                }
                MediaTarget::Users => {
                    "SELECT image_data AS data, NULL::media_kind AS media_kind FROM users WHERE id = $1"
                }
            };
            let row = sqlx::query(sql)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(internal)?
                .ok_or(RepoError::NotFound)?;

            let data: Option<Vec<u8>> = row.try_get("data").map_err(internal)?;
            let kind: Option<MediaKind> = row.try_get("media_kind").map_err(internal)?;
            match data {
                Some(bytes) if !bytes.is_empty() => Ok((bytes, kind.unwrap_or(MediaKind::Image))),
                _ => Err(RepoError::NotFound),
            }
        }
    }
}

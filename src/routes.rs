use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use actix_multipart::Multipart;
use actix_web::{web, HttpRequest, HttpResponse};
use futures_util::TryStreamExt as _;

use crate::auth::{self, Auth};
use crate::error::ApiError;
use crate::models::*;
use crate::repo::{split_tags, Repo, RepoError};

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .service(web::resource("/register").route(web::post().to(register)))
            .service(web::resource("/login").route(web::post().to(login)))
            .service(
                web::resource("/posts")
                    .route(web::get().to(list_posts))
                    .route(web::post().to(create_post)),
            )
            .service(
                web::resource("/posts/{id}")
                    .route(web::get().to(get_post))
                    .route(web::delete().to(delete_post)),
            )
            .service(
                web::resource("/posts/{id}/comments")
                    .route(web::get().to(list_comments))
                    .route(web::post().to(create_comment)),
            )
            .service(web::resource("/posts/{id}/like").route(web::post().to(toggle_like)))
            .service(web::resource("/comments/{id}").route(web::delete().to(delete_comment)))
            .service(web::resource("/tags").route(web::get().to(top_tags)))
            .service(web::resource("/profile").route(web::patch().to(update_profile)))
            .service(web::resource("/admin/users").route(web::get().to(admin_list_users)))
            .service(
                web::resource("/admin/users/{id}/approve")
                    .route(web::patch().to(admin_approve_user)),
            )
            .service(web::resource("/admin/users/{id}").route(web::delete().to(admin_delete_user))),
    );
    // Media fetch outside the /api scope so <img src="/media/..."> works.
    cfg.route("/media/{kind}/{id}", web::get().to(get_media));
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
}

/// Registration email suffix, overridable for other institutions.
pub fn allowed_email_domain() -> String {
    env::var("EMAIL_DOMAIN").unwrap_or_else(|_| "@supinfo.com".into())
}

const UPLOAD_SIZE_LIMIT: usize = 50 * 1024 * 1024; // 50 MB

/// One uploaded file pulled out of a multipart stream.
pub struct UploadedFile {
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Collected multipart form: text fields by name plus at most one file
/// field (named `file`).
#[derive(Default)]
pub struct UploadForm {
    pub fields: HashMap<String, String>,
    pub file: Option<UploadedFile>,
}

impl UploadForm {
    fn text(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

/// Drain a multipart payload. Both file and text fields are buffered in
/// memory; rows end up as database blobs anyway.
async fn read_upload_form(mut payload: Multipart) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm::default();
    while let Some(mut field) = payload.try_next().await.map_err(|e| {
        log::error!("multipart error: {e}");
        ApiError::Internal
    })? {
        let Some(name) = field.content_disposition().get_name().map(str::to_string) else {
            continue;
        };
        let content_type = field.content_type().map(|m| m.to_string());
        let mut bytes: Vec<u8> = Vec::new();
        while let Some(chunk) = field.try_next().await.map_err(|e| {
            log::error!("multipart read error: {e}");
            ApiError::Internal
        })? {
            if bytes.len() + chunk.len() > UPLOAD_SIZE_LIMIT {
                return Err(ApiError::BadRequest("file too large".into()));
            }
            bytes.extend_from_slice(&chunk);
        }
        if name == "file" {
            if !bytes.is_empty() {
                form.file = Some(UploadedFile { content_type, bytes });
            }
        } else {
            form.fields
                .insert(name, String::from_utf8_lossy(&bytes).into_owned());
        }
    }
    Ok(form)
}

// ---------------- Registration & login -----------------------------------

#[utoipa::path(
    post,
    path = "/api/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created, pending approval", body = RegisteredUser),
        (status = 400, description = "Validation failure or duplicate email")
    )
)]
pub async fn register(
    data: web::Data<AppState>,
    payload: web::Json<RegisterRequest>,
) -> Result<HttpResponse, ApiError> {
    let req = payload.into_inner();
    if req.name.is_empty() || req.email.is_empty() || req.password.is_empty() {
        return Err(ApiError::BadRequest("missing fields".into()));
    }
    let domain = allowed_email_domain();
    if !req.email.ends_with(&domain) {
        return Err(ApiError::BadRequest(format!("email must end with {domain}")));
    }
    if req.name.chars().count() < 3 {
        return Err(ApiError::BadRequest(
            "name must be at least 3 characters".into(),
        ));
    }

    let hash = auth::hash_password(&req.password).map_err(|_| ApiError::Internal)?;
    let id = data
        .repo
        .create_user(NewUser {
            name: req.name.clone(),
            email: req.email.clone(),
            password_hash: hash,
        })
        .await
        .map_err(|e| match e {
            RepoError::Conflict => ApiError::BadRequest("this email is already registered".into()),
            other => other.into(),
        })?;

    Ok(HttpResponse::Created().json(RegisteredUser {
        id,
        name: req.name,
        email: req.email,
        is_admin: false,
        is_approved: false,
    }))
}

#[utoipa::path(
    post,
    path = "/api/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session token", body = LoginResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 403, description = "Account not approved yet")
    )
)]
pub async fn login(
    data: web::Data<AppState>,
    payload: web::Json<LoginRequest>,
) -> Result<HttpResponse, ApiError> {
    let req = payload.into_inner();
    if req.email.is_empty() || req.password.is_empty() {
        return Err(ApiError::Unauthorized);
    }
    let user = data
        .repo
        .find_user_by_email(&req.email)
        .await?
        .ok_or(ApiError::Unauthorized)?;
    let hash = user.password_hash.as_deref().ok_or(ApiError::Unauthorized)?;

    // Approval is checked before the hash comparison, so an unapproved
    // user never learns whether their password was correct.
    if !user.is_approved {
        return Err(ApiError::NotApproved);
    }
    auth::verify_password(&req.password, hash).map_err(|_| ApiError::Unauthorized)?;

    let identity = Identity {
        id: user.id,
        name: user.name,
        email: user.email,
        image: user.image,
        is_admin: user.is_admin,
    };
    let token = auth::create_jwt(&identity).map_err(|_| ApiError::Internal)?;
    Ok(HttpResponse::Ok().json(LoginResponse { token, user: identity }))
}

// ---------------- Feed & posts --------------------------------------------

#[utoipa::path(
    get,
    path = "/api/posts",
    params(("sort" = Option<String>, Query, description = "latest (default) or top")),
    responses((status = 200, description = "Feed", body = [PostSummary]))
)]
pub async fn list_posts(
    req: HttpRequest,
    auth: Option<Auth>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let sort = web::Query::<HashMap<String, String>>::from_query(req.query_string())
        .map(|q| FeedSort::parse(q.get("sort").map(String::as_str)))
        .unwrap_or_default();
    let viewer = auth.as_ref().map(Auth::user_id);
    let posts = data.repo.list_posts(sort, viewer).await?;
    Ok(HttpResponse::Ok().json(posts))
}

#[utoipa::path(
    get,
    path = "/api/posts/{id}",
    params(("id" = Id, Path, description = "Post id")),
    responses(
        (status = 200, description = "Post detail", body = PostSummary),
        (status = 404, description = "Post not found")
    )
)]
pub async fn get_post(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let viewer = auth.as_ref().map(Auth::user_id);
    let post = data.repo.get_post(path.into_inner(), viewer).await?;
    Ok(HttpResponse::Ok().json(post))
}

#[utoipa::path(
    post,
    path = "/api/posts",
    request_body(content = String, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Post created", body = CreatedPost),
        (status = 400, description = "No file uploaded"),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn create_post(
    auth: Auth,
    data: web::Data<AppState>,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let form = read_upload_form(payload).await?;
    let file = form
        .file
        .as_ref()
        .ok_or_else(|| ApiError::BadRequest("no file uploaded".into()))?;
    let media_kind = MediaKind::from_upload(file.content_type.as_deref());
    let tags = form
        .fields
        .get("tags")
        .map(|raw| split_tags(raw))
        .unwrap_or_default();

    let id = data
        .repo
        .create_post(NewPost {
            user_id: auth.user_id(),
            title: form.text("title"),
            description: form.text("description"),
            media_kind,
            media_data: file.bytes.clone(),
            tags,
        })
        .await?;
    Ok(HttpResponse::Created().json(CreatedPost { id }))
}

#[utoipa::path(
    delete,
    path = "/api/posts/{id}",
    params(("id" = Id, Path, description = "Post id")),
    responses(
        (status = 200, description = "Deleted, comments and likes included"),
        (status = 403, description = "Not the owner and not an admin"),
        (status = 404, description = "Post not found")
    )
)]
pub async fn delete_post(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let owner = data.repo.post_owner(id).await?;
    if owner != auth.user_id() && !auth.is_admin() {
        return Err(ApiError::Forbidden);
    }
    data.repo.delete_post(id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({"message": "deleted"})))
}

#[utoipa::path(
    post,
    path = "/api/posts/{id}/like",
    params(("id" = Id, Path, description = "Post id")),
    responses(
        (status = 200, description = "Resulting like state", body = LikeStatus),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Post not found")
    )
)]
pub async fn toggle_like(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let liked = data
        .repo
        .toggle_like(auth.user_id(), path.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(LikeStatus { liked }))
}

// ---------------- Comments ------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/posts/{id}/comments",
    params(("id" = Id, Path, description = "Post id")),
    responses((status = 200, description = "Comments, oldest first", body = [CommentView]))
)]
pub async fn list_comments(
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let comments = data.repo.list_comments(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(comments))
}

#[utoipa::path(
    post,
    path = "/api/posts/{id}/comments",
    params(("id" = Id, Path, description = "Post id")),
    responses(
        (status = 201, description = "Comment created", body = CommentView),
        (status = 400, description = "Empty comment"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Post not found")
    )
)]
pub async fn create_comment(
    auth: Auth,
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    body: web::Payload,
) -> Result<HttpResponse, ApiError> {
    let post_id = path.into_inner();
    let is_multipart = req
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("multipart/form-data"))
        .unwrap_or(false);

    let mut content = String::new();
    let mut media_url: Option<String> = None;
    let mut media_kind = MediaKind::Text;
    let mut media_data: Option<Vec<u8>> = None;

    if is_multipart {
        let form = read_upload_form(Multipart::new(req.headers(), body)).await?;
        content = form.fields.get("content").cloned().unwrap_or_default();
        if let Some(file) = form.file {
            media_kind = MediaKind::Image;
            media_data = Some(file.bytes);
        } else if let Some(gif_url) = form.text("gifUrl") {
            // The external GIF URL is stored verbatim as the reference.
            media_kind = MediaKind::Gif;
            media_url = Some(gif_url);
        }
    } else {
        // JSON fallback for plain text comments.
        let bytes = read_body(body).await?;
        let parsed: NewCommentBody =
            serde_json::from_slice(&bytes).map_err(|_| ApiError::BadRequest("invalid body".into()))?;
        content = parsed.content.unwrap_or_default();
    }

    if content.is_empty() && media_url.is_none() && media_data.is_none() {
        return Err(ApiError::BadRequest("empty comment".into()));
    }

    let mut view = data
        .repo
        .create_comment(NewComment {
            post_id,
            user_id: auth.user_id(),
            content,
            media_url,
            media_kind,
            media_data,
        })
        .await?;
    // The author block comes from the session identity, for immediate
    // client display without a re-fetch.
    view.user = Author { name: auth.0.name.clone(), image: auth.0.image.clone() };
    Ok(HttpResponse::Created().json(view))
}

async fn read_body(mut body: web::Payload) -> Result<Vec<u8>, ApiError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = body.try_next().await.map_err(|e| {
        log::error!("body read error: {e}");
        ApiError::Internal
    })? {
        if bytes.len() + chunk.len() > UPLOAD_SIZE_LIMIT {
            return Err(ApiError::BadRequest("body too large".into()));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

#[utoipa::path(
    delete,
    path = "/api/comments/{id}",
    params(("id" = Id, Path, description = "Comment id")),
    responses(
        (status = 200, description = "Deleted"),
        (status = 403, description = "Not the owner and not an admin"),
        (status = 404, description = "Comment not found")
    )
)]
pub async fn delete_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let owner = data.repo.comment_owner(id).await?;
    if owner != auth.user_id() && !auth.is_admin() {
        return Err(ApiError::Forbidden);
    }
    data.repo.delete_comment(id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({"message": "deleted"})))
}

// ---------------- Media & tags --------------------------------------------

pub async fn get_media(
    data: web::Data<AppState>,
    path: web::Path<(String, Id)>,
) -> Result<HttpResponse, ApiError> {
    let (kind, id) = path.into_inner();
    let target = MediaTarget::parse(&kind)
        .ok_or_else(|| ApiError::BadRequest("invalid media type".into()))?;
    let (bytes, media_kind) = data.repo.load_media(target, id).await?;
    // Bytes for a given id never change, so the response is immutable.
    // Overwritten avatars are the accepted staleness exception.
    Ok(HttpResponse::Ok()
        .insert_header(("Content-Type", media_kind.content_type()))
        .insert_header(("Cache-Control", "public, max-age=31536000, immutable"))
        .body(bytes))
}

#[utoipa::path(
    get,
    path = "/api/tags",
    responses((status = 200, description = "Top 20 tags by usage", body = [TagCount]))
)]
pub async fn top_tags(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let tags = data.repo.top_tags(20).await?;
    Ok(HttpResponse::Ok().json(tags))
}

// ---------------- Profile -------------------------------------------------

#[utoipa::path(
    patch,
    path = "/api/profile",
    request_body(content = String, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Profile updated"),
        (status = 400, description = "Nothing to update"),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn update_profile(
    auth: Auth,
    data: web::Data<AppState>,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let form = read_upload_form(payload).await?;
    let password_hash = match form.text("password") {
        Some(pw) => Some(auth::hash_password(&pw).map_err(|_| ApiError::Internal)?),
        None => None,
    };
    let avatar = form.file.map(|f| f.bytes);
    if password_hash.is_none() && avatar.is_none() {
        return Err(ApiError::BadRequest("nothing to update".into()));
    }
    data.repo
        .update_profile(auth.user_id(), password_hash, avatar)
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({"message": "profile updated"})))
}

// ---------------- Admin moderation ----------------------------------------

macro_rules! ensure_admin {
    ($auth:expr) => {
        if !$auth.is_admin() {
            return Err(ApiError::Forbidden);
        }
    };
}

#[utoipa::path(
    get,
    path = "/api/admin/users",
    responses(
        (status = 200, description = "All users, newest first", body = [UserSummary]),
        (status = 403, description = "Admins only")
    )
)]
pub async fn admin_list_users(
    auth: Auth,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    ensure_admin!(auth);
    let users = data.repo.list_users().await?;
    Ok(HttpResponse::Ok().json(users))
}

#[utoipa::path(
    patch,
    path = "/api/admin/users/{id}/approve",
    params(("id" = Id, Path, description = "User id")),
    responses(
        (status = 200, description = "Approved (idempotent)"),
        (status = 403, description = "Admins only"),
        (status = 404, description = "User not found")
    )
)]
pub async fn admin_approve_user(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    ensure_admin!(auth);
    data.repo.approve_user(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({"message": "user approved"})))
}

#[utoipa::path(
    delete,
    path = "/api/admin/users/{id}",
    params(("id" = Id, Path, description = "User id")),
    responses(
        (status = 200, description = "User deleted, owned content cascades"),
        (status = 400, description = "Self-deletion forbidden"),
        (status = 403, description = "Admins only"),
        (status = 404, description = "User not found")
    )
)]
pub async fn admin_delete_user(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    ensure_admin!(auth);
    let id = path.into_inner();
    if id == auth.user_id() {
        return Err(ApiError::BadRequest("cannot delete yourself".into()));
    }
    data.repo.delete_user(id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({"message": "user deleted"})))
}

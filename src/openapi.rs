use crate::models::{
    Author, CommentView, CreatedPost, Identity, LikeStatus, LoginRequest, LoginResponse,
    MediaKind, NewCommentBody, PostSummary, RegisterRequest, RegisteredUser, TagCount,
    UserSummary,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::register,
        crate::routes::login,
        crate::routes::list_posts,
        crate::routes::get_post,
        crate::routes::create_post,
        crate::routes::delete_post,
        crate::routes::toggle_like,
        crate::routes::list_comments,
        crate::routes::create_comment,
        crate::routes::delete_comment,
        crate::routes::top_tags,
        crate::routes::update_profile,
        crate::routes::admin_list_users,
        crate::routes::admin_approve_user,
        crate::routes::admin_delete_user,
    ),
    components(schemas(
        MediaKind, Author, PostSummary, CommentView, TagCount,
        RegisterRequest, RegisteredUser, LoginRequest, LoginResponse, Identity,
        CreatedPost, LikeStatus, NewCommentBody, UserSummary
    )),
    tags(
        (name = "posts", description = "Feed and post operations"),
        (name = "comments", description = "Comment operations"),
        (name = "admin", description = "Account moderation"),
    )
)]
pub struct ApiDoc;

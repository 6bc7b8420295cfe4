#![cfg(feature = "inmem-store")]

use campusfeed::models::{FeedSort, MediaKind, MediaTarget, NewComment, NewPost, NewUser};
use campusfeed::repo::{inmem::InMemRepo, split_tags, RepoError};
// Bring trait method namespaces into scope so calls on InMemRepo resolve.
use campusfeed::repo::{CommentRepo, MediaRepo, PostRepo, TagRepo, UserRepo};

fn new_user(name: &str) -> NewUser {
    NewUser {
        name: name.into(),
        email: format!("{name}@supinfo.com"),
        password_hash: "$argon2id$fake".into(),
    }
}

fn new_post(user_id: i64, title: &str, tags: &[&str]) -> NewPost {
    NewPost {
        user_id,
        title: Some(title.into()),
        description: None,
        media_kind: MediaKind::Image,
        media_data: b"bytes".to_vec(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
    }
}

fn text_comment(post_id: i64, user_id: i64, content: &str) -> NewComment {
    NewComment {
        post_id,
        user_id,
        content: content.into(),
        media_url: None,
        media_kind: MediaKind::Text,
        media_data: None,
    }
}

#[test]
fn split_tags_trims_and_drops_empties() {
    assert_eq!(split_tags("a, b ,c"), vec!["a", "b", "c"]);
    assert_eq!(split_tags(" a ,, ,a,"), vec!["a", "a"]);
    assert!(split_tags("").is_empty());
    assert!(split_tags(" , ,").is_empty());
}

#[tokio::test]
async fn user_lifecycle_and_email_conflict() {
    let r = InMemRepo::new();

    let id = r.create_user(new_user("ann")).await.unwrap();
    let err = r.create_user(new_user("ann")).await.unwrap_err();
    assert!(matches!(err, RepoError::Conflict));

    let rec = r.find_user_by_email("ann@supinfo.com").await.unwrap().unwrap();
    assert_eq!(rec.id, id);
    assert!(!rec.is_approved);
    assert!(!rec.is_admin);
    assert!(r.find_user_by_email("ghost@supinfo.com").await.unwrap().is_none());

    r.approve_user(id).await.unwrap();
    assert!(r.find_user_by_email("ann@supinfo.com").await.unwrap().unwrap().is_approved);
    assert!(matches!(r.approve_user(4242).await.unwrap_err(), RepoError::NotFound));
}

#[tokio::test]
async fn post_creation_attaches_tags_without_duplicating_rows() {
    let r = InMemRepo::new();
    let uid = r.create_user(new_user("bob")).await.unwrap();

    let p1 = r.create_post(new_post(uid, "one", &["rust", "web"])).await.unwrap();
    let p2 = r.create_post(new_post(uid, "two", &["rust"])).await.unwrap();

    let post = r.get_post(p1, None).await.unwrap();
    assert_eq!(post.media_url, format!("/media/posts/{p1}"));
    assert_eq!(post.tags, vec!["rust", "web"]);
    assert_eq!(post.user.name, "bob");

    // "rust" is one row used twice, "web" one row used once.
    let tags = r.top_tags(20).await.unwrap();
    assert_eq!(tags.len(), 2);
    assert_eq!(tags[0].name, "rust");
    assert_eq!(tags[0].count, 2);
    assert_eq!(tags[1].count, 1);

    assert_eq!(r.post_owner(p2).await.unwrap(), uid);
    assert!(matches!(r.get_post(4242, None).await.unwrap_err(), RepoError::NotFound));
}

#[tokio::test]
async fn post_tags_keep_submitted_order() {
    let r = InMemRepo::new();
    let uid = r.create_user(new_user("hana")).await.unwrap();

    // "zeta" gets the older (lower) tag id here.
    r.create_post(new_post(uid, "first", &["zeta"])).await.unwrap();

    // The reused tag comes second in the next submission and must stay
    // second, not jump ahead on account of its id.
    let pid = r.create_post(new_post(uid, "second", &["alpha", "zeta"])).await.unwrap();
    assert_eq!(r.get_post(pid, None).await.unwrap().tags, vec!["alpha", "zeta"]);
}

#[tokio::test]
async fn tag_limit_caps_the_listing() {
    let r = InMemRepo::new();
    let uid = r.create_user(new_user("cara")).await.unwrap();
    for i in 0..5 {
        r.create_post(new_post(uid, "p", &[&format!("t{i}")])).await.unwrap();
    }
    assert_eq!(r.top_tags(3).await.unwrap().len(), 3);
}

#[tokio::test]
async fn like_toggle_flips_and_counts() {
    let r = InMemRepo::new();
    let uid = r.create_user(new_user("dave")).await.unwrap();
    let pid = r.create_post(new_post(uid, "p", &[])).await.unwrap();

    assert!(r.toggle_like(uid, pid).await.unwrap());
    assert_eq!(r.get_post(pid, Some(uid)).await.unwrap().like_count, 1);
    assert!(r.get_post(pid, Some(uid)).await.unwrap().is_liked);
    assert!(!r.get_post(pid, None).await.unwrap().is_liked);

    assert!(!r.toggle_like(uid, pid).await.unwrap());
    assert_eq!(r.get_post(pid, Some(uid)).await.unwrap().like_count, 0);

    assert!(matches!(r.toggle_like(uid, 4242).await.unwrap_err(), RepoError::NotFound));
}

#[tokio::test]
async fn feed_sorts_latest_and_top() {
    let r = InMemRepo::new();
    let uid = r.create_user(new_user("eve")).await.unwrap();
    let a = r.create_post(new_post(uid, "a", &[])).await.unwrap();
    let b = r.create_post(new_post(uid, "b", &[])).await.unwrap();
    let c = r.create_post(new_post(uid, "c", &[])).await.unwrap();
    r.toggle_like(uid, a).await.unwrap();
    r.toggle_like(100, a).await.unwrap();
    r.toggle_like(uid, b).await.unwrap();

    let latest: Vec<_> = r
        .list_posts(FeedSort::Latest, None)
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(latest, vec![c, b, a]);

    let top: Vec<_> = r
        .list_posts(FeedSort::Top, None)
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(top, vec![a, b, c]);
}

#[tokio::test]
async fn comment_media_url_depends_on_payload_kind() {
    let r = InMemRepo::new();
    let uid = r.create_user(new_user("finn")).await.unwrap();
    let pid = r.create_post(new_post(uid, "p", &[])).await.unwrap();

    // Uploaded image gets the served URL.
    let image = r
        .create_comment(NewComment {
            post_id: pid,
            user_id: uid,
            content: String::new(),
            media_url: None,
            media_kind: MediaKind::Image,
            media_data: Some(b"img".to_vec()),
        })
        .await
        .unwrap();
    assert_eq!(image.media_url.as_deref(), Some(format!("/media/comments/{}", image.id).as_str()));

    // External GIF URL passes through untouched.
    let gif = r
        .create_comment(NewComment {
            post_id: pid,
            user_id: uid,
            content: String::new(),
            media_url: Some("https://gif.example/x.gif".into()),
            media_kind: MediaKind::Gif,
            media_data: None,
        })
        .await
        .unwrap();
    assert_eq!(gif.media_url.as_deref(), Some("https://gif.example/x.gif"));

    let (bytes, kind) = r.load_media(MediaTarget::Comments, image.id).await.unwrap();
    assert_eq!(bytes, b"img");
    assert_eq!(kind, MediaKind::Image);
    // The GIF row stores no bytes, so there is nothing to serve.
    assert!(matches!(
        r.load_media(MediaTarget::Comments, gif.id).await.unwrap_err(),
        RepoError::NotFound
    ));

    assert!(matches!(
        r.create_comment(text_comment(4242, uid, "void")).await.unwrap_err(),
        RepoError::NotFound
    ));
}

#[tokio::test]
async fn deleting_posts_and_users_cascades() {
    let r = InMemRepo::new();
    let uid = r.create_user(new_user("gail")).await.unwrap();
    let pid = r.create_post(new_post(uid, "p", &["solo"])).await.unwrap();
    r.create_comment(text_comment(pid, uid, "hi")).await.unwrap();
    r.toggle_like(uid, pid).await.unwrap();

    r.delete_post(pid).await.unwrap();
    assert!(r.list_comments(pid).await.unwrap().is_empty());
    assert!(matches!(r.delete_post(pid).await.unwrap_err(), RepoError::NotFound));
    // The tag row survives with zero uses.
    assert_eq!(r.top_tags(20).await.unwrap()[0].count, 0);

    let pid2 = r.create_post(new_post(uid, "q", &[])).await.unwrap();
    r.delete_user(uid).await.unwrap();
    assert!(matches!(r.get_post(pid2, None).await.unwrap_err(), RepoError::NotFound));
    assert!(r.find_user_by_email("gail@supinfo.com").await.unwrap().is_none());
}

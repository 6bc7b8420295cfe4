#![cfg(feature = "inmem-store")]

use actix_web::dev::{Service, ServiceResponse};
use actix_web::{test, web, App};
use campusfeed::auth::create_jwt;
use campusfeed::models::Identity;
use campusfeed::repo::inmem::InMemRepo;
use campusfeed::{config, AppState};
use serial_test::serial;
use std::sync::Arc;

fn setup_env() {
    std::env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
    std::env::remove_var("EMAIL_DOMAIN");
}

fn token(id: i64, name: &str, admin: bool) -> String {
    create_jwt(&Identity {
        id,
        name: name.into(),
        email: format!("{name}@supinfo.com"),
        image: None,
        is_admin: admin,
    })
    .unwrap()
}

fn state() -> web::Data<AppState> {
    web::Data::new(AppState { repo: Arc::new(InMemRepo::new()) })
}

async fn register<S>(app: &S, name: &str) -> i64
where
    S: Service<actix_http::Request, Response = ServiceResponse, Error = actix_web::Error>,
{
    let req = test::TestRequest::post()
        .uri("/api/register")
        .set_json(serde_json::json!({
            "name": name,
            "email": format!("{name}@supinfo.com"),
            "password": "pw123456"
        }))
        .to_request();
    let resp = test::call_service(app, req).await;
    assert_eq!(resp.status(), 201);
    let v: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    v["id"].as_i64().unwrap()
}

#[actix_web::test]
#[serial]
async fn admin_routes_reject_ordinary_users() {
    setup_env();
    let app = test::init_service(App::new().app_data(state()).configure(config)).await;
    let plain = token(1, "plain", false);

    for req in [
        test::TestRequest::get().uri("/api/admin/users"),
        test::TestRequest::patch().uri("/api/admin/users/1/approve"),
        test::TestRequest::delete().uri("/api/admin/users/2"),
    ] {
        let resp = test::call_service(
            &app,
            req.insert_header(("Authorization", format!("Bearer {plain}"))).to_request(),
        )
        .await;
        assert_eq!(resp.status(), 403);
    }
}

#[actix_web::test]
#[serial]
async fn user_listing_is_newest_first_with_approval_state() {
    setup_env();
    let app = test::init_service(App::new().app_data(state()).configure(config)).await;
    let first = register(&app, "first").await;
    let second = register(&app, "second").await;
    let admin = token(999, "root", true);

    let req = test::TestRequest::patch()
        .uri(&format!("/api/admin/users/{first}/approve"))
        .insert_header(("Authorization", format!("Bearer {admin}")))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    let req = test::TestRequest::get()
        .uri("/api/admin/users")
        .insert_header(("Authorization", format!("Bearer {admin}")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let v: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let users = v.as_array().unwrap();
    assert_eq!(users.len(), 2);
    assert_eq!(users[0]["id"].as_i64().unwrap(), second);
    assert_eq!(users[0]["is_approved"], false);
    assert_eq!(users[1]["id"].as_i64().unwrap(), first);
    assert_eq!(users[1]["is_approved"], true);
    assert_eq!(users[1]["email"], "first@supinfo.com");
}

#[actix_web::test]
#[serial]
async fn approval_is_idempotent_and_unknown_users_are_404() {
    setup_env();
    let app = test::init_service(App::new().app_data(state()).configure(config)).await;
    let uid = register(&app, "pending").await;
    let admin = token(999, "root", true);

    for _ in 0..2 {
        let req = test::TestRequest::patch()
            .uri(&format!("/api/admin/users/{uid}/approve"))
            .insert_header(("Authorization", format!("Bearer {admin}")))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 200);
    }

    let req = test::TestRequest::patch()
        .uri("/api/admin/users/424242/approve")
        .insert_header(("Authorization", format!("Bearer {admin}")))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

#[actix_web::test]
#[serial]
async fn admins_cannot_delete_their_own_account() {
    setup_env();
    let app = test::init_service(App::new().app_data(state()).configure(config)).await;
    let admin = token(999, "root", true);

    let req = test::TestRequest::delete()
        .uri("/api/admin/users/999")
        .insert_header(("Authorization", format!("Bearer {admin}")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
#[serial]
async fn deleting_a_user_removes_their_content() {
    setup_env();
    let app = test::init_service(App::new().app_data(state()).configure(config)).await;
    let uid = register(&app, "leaver").await;
    let utoken = token(uid, "leaver", false);
    let admin = token(999, "root", true);

    // One post by the doomed user, uploaded as multipart.
    let boundary = "----admintestboundary";
    let mut body: Vec<u8> = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"title\"\r\n\r\nbye\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"p.jpg\"\r\nContent-Type: image/jpeg\r\n\r\nbytes\r\n--{boundary}--\r\n"
        )
        .as_bytes(),
    );
    let req = test::TestRequest::post()
        .uri("/api/posts")
        .insert_header(("Authorization", format!("Bearer {utoken}")))
        .insert_header(("Content-Type", format!("multipart/form-data; boundary={boundary}")))
        .set_payload(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let v: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let post_id = v["id"].as_i64().unwrap();

    let req = test::TestRequest::delete()
        .uri(&format!("/api/admin/users/{uid}"))
        .insert_header(("Authorization", format!("Bearer {admin}")))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    // The post went with the account.
    let req = test::TestRequest::get()
        .uri(&format!("/api/posts/{post_id}"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);

    // Repeat deletion is a 404.
    let req = test::TestRequest::delete()
        .uri(&format!("/api/admin/users/{uid}"))
        .insert_header(("Authorization", format!("Bearer {admin}")))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

#![cfg(feature = "inmem-store")]

use actix_web::{test, web, App};
use campusfeed::repo::inmem::InMemRepo;
use campusfeed::{config, AppState, SecurityHeaders};
use serial_test::serial;
use std::sync::Arc;

fn state() -> web::Data<AppState> {
    web::Data::new(AppState { repo: Arc::new(InMemRepo::new()) })
}

#[actix_web::test]
#[serial]
async fn security_headers_present() {
    std::env::remove_var("ENABLE_HSTS");
    let app = test::init_service(
        App::new()
            .wrap(SecurityHeaders::from_env())
            .app_data(state())
            .configure(config),
    )
    .await;
    let req = test::TestRequest::get().uri("/api/posts").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let headers = resp.headers();
    let csp = headers.get("content-security-policy").unwrap().to_str().unwrap();
    assert!(csp.contains("media-src 'self'"));
    assert_eq!(headers.get("referrer-policy").unwrap(), "no-referrer");
    assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
    assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
    assert!(headers.get("strict-transport-security").is_none()); // not enabled
}

#[actix_web::test]
#[serial]
async fn hsts_enabled_explicitly() {
    let app = test::init_service(
        App::new()
            .wrap(SecurityHeaders::from_env().with_hsts(true))
            .app_data(state())
            .configure(config),
    )
    .await;
    let req = test::TestRequest::get().uri("/api/tags").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let hsts = resp.headers().get("strict-transport-security").unwrap();
    assert!(hsts.to_str().unwrap().contains("max-age="));
}

use actix_cors::Cors;
use actix_web::{middleware::Compress, App, HttpServer};
use utoipa_swagger_ui::SwaggerUi;

mod auth;
mod error;
mod models;
mod openapi;
mod repo;
mod routes;
mod security;

use openapi::ApiDoc;
#[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
use repo::inmem::InMemRepo;
use routes::{config, AppState};
use security::SecurityHeaders;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;
use tracing_actix_web::TracingLogger;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Environment must be set externally; .env is a debug-only convenience.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    // Structured logging comes up first so validation failures land in
    // the log stream rather than bare stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    validate_env_vars();

    info!("Bootstrapping campusfeed server");
    info!(
        "Registration restricted to {}",
        routes::allowed_email_domain()
    );

    #[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
    let repo = {
        info!("Using in-memory repository backend");
        InMemRepo::new()
    };

    #[cfg(feature = "postgres-store")]
    let repo = {
        use sqlx::postgres::PgPoolOptions;
        let db_url =
            std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for postgres-store");
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(&db_url)
            .expect("Failed to create Pg pool");
        if let Err(e) = sqlx::migrate!("./migrations").run(&pool).await {
            eprintln!("Migration failure: {e}");
            std::process::exit(1);
        }
        info!("Using Postgres repository backend");
        repo::pg::PgRepo::new(pool)
    };

    let openapi = ApiDoc::openapi();
    info!("OpenAPI spec generated");

    let server = HttpServer::new(move || {
        let cors = {
            let mut c = Cors::default()
                // local dev frontend ports
                .allowed_origin("http://localhost:5173")
                .allowed_origin("http://127.0.0.1:5173")
                .allowed_origin("http://localhost:3000")
                .allowed_origin("http://127.0.0.1:3000")
                .allow_any_header()
                .allowed_methods(["GET", "POST", "PATCH", "DELETE", "OPTIONS"])
                .supports_credentials()
                .max_age(3600);
            if let Ok(front) = std::env::var("FRONTEND_URL") {
                c = c.allowed_origin(&front);
            }
            c
        };

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(SecurityHeaders::from_env())
            .wrap(cors)
            .configure(config)
            .service(SwaggerUi::new("/docs").url("/docs/openapi.json", openapi.clone()))
            .app_data(actix_web::web::Data::new(AppState {
                repo: Arc::new(repo.clone()),
            }))
    })
    .bind(("0.0.0.0", 8080))?;

    info!("Listening on http://0.0.0.0:8080 (all interfaces)");

    server.run().await
}

/// Validate that required environment variables are set
fn validate_env_vars() {
    let problems = env_validation_errors();
    if !problems.is_empty() {
        for problem in &problems {
            tracing::error!("{problem}");
        }
        tracing::error!("Please copy .env.example to .env and configure it");
        std::process::exit(1);
    }
}

fn env_validation_errors() -> Vec<String> {
    use std::env;

    let mut problems = Vec::new();
    match env::var("JWT_SECRET") {
        Err(_) => problems.push("Missing required environment variable JWT_SECRET".into()),
        Ok(secret) if secret.len() < 32 => {
            problems.push("JWT_SECRET must be at least 32 characters long for security".into())
        }
        Ok(_) => {}
    }
    if cfg!(feature = "postgres-store") && env::var("DATABASE_URL").is_err() {
        problems.push("Missing required environment variable DATABASE_URL".into());
    }
    problems
}

#[cfg(test)]
mod tests {
    use super::env_validation_errors;
    use serial_test::serial;

    #[test]
    #[serial]
    fn env_validation_catches_missing_and_short_secrets() {
        std::env::remove_var("JWT_SECRET");
        assert!(env_validation_errors().iter().any(|p| p.contains("JWT_SECRET")));

        std::env::set_var("JWT_SECRET", "short");
        assert!(env_validation_errors().iter().any(|p| p.contains("32 characters")));

        std::env::set_var("JWT_SECRET", "a-sufficiently-long-secret-value-1234");
        #[cfg(not(feature = "postgres-store"))]
        assert!(env_validation_errors().is_empty());
    }
}

//! Basic session example
//!
//! Usage:
//!   HOMEWIDGET_API_BASE_URL=http://localhost:8000 \
//!   DEMO_EMAIL=demo@example.com DEMO_PASSWORD=secret \
//!   cargo run --example basic_session

use std::sync::Arc;

use homewidget_client::{ApiClient, ApiClientConfig, MemoryTokenStore, Session, SessionStatus};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let email = std::env::var("DEMO_EMAIL").unwrap_or_else(|_| "demo@example.com".to_string());
    let password = std::env::var("DEMO_PASSWORD").unwrap_or_else(|_| "secret".to_string());

    let config = ApiClientConfig::from_env();
    println!("=== HomeWidget Client Example ===");
    println!("Backend: {}", config.base_url);
    println!();

    let store = Arc::new(MemoryTokenStore::new());
    let client = ApiClient::new(config, store);
    let session = Session::attach(client.clone());

    // Try to restore a previous session first (a fresh in-memory store
    // always lands in Unauthenticated without a network call)
    session.bootstrap().await;
    println!("After bootstrap: {:?}", session.status());

    if session.status() != SessionStatus::Authenticated {
        println!("Logging in as {email}...");
        match session.login(&email, &password).await {
            Ok(()) => println!("✓ Logged in"),
            Err(e) => {
                println!("! Login failed: {e}");
                if let Some(msg) = session.error() {
                    println!("  User-facing message: {msg}");
                }
                return Ok(());
            }
        }
    }

    if let Some(user) = session.user() {
        println!("Profile: {} (role {:?})", user.email, user.role);
    }

    // Authenticated resource access runs through the refresh protocol
    match client.get::<serde_json::Value>("/api/home/feed").await {
        Ok(feed) => println!("Feed: {feed}"),
        Err(e) => println!("! Feed request failed: {e}"),
    }

    session.logout().await;
    println!("After logout: {:?}", session.status());

    Ok(())
}

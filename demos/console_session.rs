//! Console session example
//!
//! Usage:
//!   CONSOLE_EMAIL=ops@example.com CONSOLE_PASSWORD=... cargo run --example console_session
//!
//! Reads `CONSOLE_API_URL`, `CONSOLE_TOKEN_STORE`, `CONSOLE_INACTIVITY_SECS`
//! and `CONSOLE_WARNING_SECS` like the library does.

use console_session::{ActivityEvent, SessionConfig, SessionManager};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = SessionConfig::from_env()?;
    println!("=== Console Session Example ===");
    println!("Backend: {}", config.base_url());
    println!("Idle logout after: {:?}", config.inactivity_time());
    println!();

    let session = SessionManager::new(config)?;

    if session.init().await {
        println!("✓ Restored previous session");
    } else {
        let email = std::env::var("CONSOLE_EMAIL")?;
        let password = std::env::var("CONSOLE_PASSWORD")?;

        println!("Logging in as {email}...");
        if let Err(e) = session.login(&email, &password).await {
            println!("✗ {}", e.display_message());
            return Ok(());
        }
        println!("✓ Logged in");
    }
    println!();

    if let Some(user) = session.user() {
        println!("User: {} <{}>", user.name, user.email);
    }
    let roles = session.roles();
    println!("  admin:   {}", roles.is_admin);
    println!("  system:  {}", roles.is_system);
    println!("  dev:     {}", roles.is_dev);
    println!("  network: {}", roles.is_network);
    println!();

    // A host UI forwards its DOM listeners' event names here
    if let Some(event) = ActivityEvent::from_dom_event("keydown") {
        session.record_activity(event);
    }
    if let Some(remaining) = session.time_until_logout() {
        println!("Idle logout in {remaining:?}");
    }

    if std::env::var("CONSOLE_KEEP_SESSION").is_ok() {
        println!("Keeping session for the next run");
    } else {
        session.logout();
        println!("✓ Logged out");
    }

    Ok(())
}

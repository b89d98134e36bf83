//! Basic example using in-memory session store

use salvo::prelude::*;
use salvo_lazy_session::{
    Context, MemoryConfig, MemoryStore, SessionConfig, SessionDepotExt, SessionHandler,
};
use std::time::Duration;

#[handler]
async fn index(depot: &mut Depot) -> String {
    let session = depot.session().expect("Session not found");

    // Get current view count
    let views: i32 = session.get("views").unwrap_or(0);
    session.set("views", views + 1);

    let notice = depot
        .flash()
        .and_then(|flash| flash.get::<String>())
        .map(|msg| format!("\nNotice: {msg}"))
        .unwrap_or_default();

    format!(
        "Hello! You have viewed this page {} time(s).\nSession ID: {}{}",
        views + 1,
        session.id(),
        notice
    )
}

#[handler]
async fn login(req: &mut Request, depot: &mut Depot) -> String {
    let session = depot.session().expect("Session not found");
    let username = req
        .query::<String>("name")
        .unwrap_or_else(|| "anonymous".to_string());

    // New ID on privilege change, data is kept
    if let Err(e) = session.regenerate_id() {
        return format!("Login failed: {e}");
    }
    session.set("user", &username);
    session.set_flash(format!("Welcome back, {username}"));

    format!("Logged in as: {username}")
}

#[handler]
async fn logout(depot: &mut Depot) -> &'static str {
    let session = depot.session().expect("Session not found");
    session.flush();
    session.set_flash("Logged out");
    "Logged out successfully"
}

#[handler]
async fn destroy(depot: &mut Depot) -> &'static str {
    let sid = depot.session().expect("Session not found").id();
    let Some(store) = depot.session_store() else {
        return "No session store";
    };
    match store.destroy(&Context::new(), &sid).await {
        Ok(()) => "Session destroyed",
        Err(_) => "Failed to destroy session",
    }
}

#[tokio::main]
async fn main() {
    // Set up logging
    tracing_subscriber::fmt::init();

    let store = MemoryStore::with_config(
        MemoryConfig::new().with_lifetime(Duration::from_secs(30 * 60)),
    )
    .expect("valid memory store config");

    let config = SessionConfig::new()
        .with_cookie_name("sid")
        .with_gc_interval(Duration::from_secs(60))
        .with_gc_error_handler(|e| tracing::warn!(error = %e, "session gc failed"));

    let session_handler = SessionHandler::new(store, config);

    let router = Router::new()
        .hoop(session_handler)
        .get(index)
        .push(Router::with_path("login").get(login))
        .push(Router::with_path("logout").get(logout))
        .push(Router::with_path("destroy").get(destroy));

    let acceptor = TcpListener::new("127.0.0.1:5800").bind().await;
    println!("Server running at http://127.0.0.1:5800");
    println!("Try these endpoints:");
    println!("  GET /                - View counter");
    println!("  GET /login?name=alice - Log in (regenerates the session ID)");
    println!("  GET /logout          - Clear session data");
    println!("  GET /destroy         - Destroy session");

    Server::new(acceptor).serve(router).await;
}

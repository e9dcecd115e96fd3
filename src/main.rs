use std::sync::Arc;

use learnlab_session::{
    spawn_listener, AuthApi, BackendConfig, JsonFileCache, RestBackend, SessionSnapshot,
    SessionStore,
};

/// Developer probe: resolve the persisted session against the configured
/// backend and, when LEARNLAB_EMAIL / LEARNLAB_PASSWORD are set, attempt a
/// sign-in and report the outcome.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "learnlab_session=debug,session_probe=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let config = BackendConfig::from_env()?;
    let backend = Arc::new(RestBackend::new(&config));
    let cache = Arc::new(JsonFileCache::new(&config.session_file));
    let store = Arc::new(SessionStore::new(backend.clone(), backend.clone(), cache));
    let listener = spawn_listener(store.clone(), backend.events());

    store.initialize().await;
    report("after initialize", &store.snapshot());

    if let (Ok(email), Ok(password)) = (
        std::env::var("LEARNLAB_EMAIL"),
        std::env::var("LEARNLAB_PASSWORD"),
    ) {
        match store.sign_in(&email, &password).await {
            Ok(()) => tracing::info!("sign-in succeeded"),
            Err(err) => tracing::error!(error = %err, "sign-in failed"),
        }
        report("after sign-in", &store.snapshot());
    }

    listener.abort();
    Ok(())
}

fn report(stage: &str, snapshot: &SessionSnapshot) {
    match &snapshot.user {
        Some(user) => println!(
            "{stage}: {} <{}> role={}",
            user.display_name(),
            user.email,
            user.role
        ),
        None => match &snapshot.error {
            Some(error) => println!("{stage}: anonymous ({error})"),
            None => println!("{stage}: anonymous"),
        },
    }
}

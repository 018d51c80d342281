use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use bookings::config::Config;
use bookings::engine::Engine;
use bookings::mail::{LogMailer, MailQueue};
use bookings::repository::PgRepository;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    bookings::observability::init(config.metrics_port)?;

    let repo = PgRepository::connect(&config).await?;
    repo.migrate().await?;

    let (mail, mail_worker) = MailQueue::start(
        config.mail_queue_capacity,
        config.mail_send_timeout,
        Arc::new(LogMailer),
    );
    let engine = Arc::new(Engine::new(Arc::new(repo)).with_mail(mail, config.mail_from.clone()));

    let rooms = engine.list_rooms().await?;
    info!("bookings engine ready");
    info!("  rooms: {}", rooms.iter().map(|r| r.name.as_str()).collect::<Vec<_>>().join(", "));
    info!("  max_connections: {}", config.max_connections);
    info!("  query_timeout: {:?}", config.query_timeout);
    info!("  mail queue: {} messages", config.mail_queue_capacity);
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    // The web layer drives `engine` from here; this host only waits for shutdown.
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }
    info!("shutdown signal received");

    // Dropping the last queue handle lets the worker send its backlog and exit.
    drop(engine);
    info!("draining mail queue...");
    match tokio::time::timeout(Duration::from_secs(10), mail_worker).await {
        Ok(Ok(())) => info!("mail queue drained"),
        Ok(Err(e)) => tracing::error!("mail worker failed: {e}"),
        Err(_) => tracing::warn!("drain timeout, unsent mail dropped"),
    }

    info!("bookings stopped");
    Ok(())
}

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use recruit_notifier::channels::{
    ErrorAlerter, ImapMailbox, LineNotifier, MailSource, Notifier, SlackNotifier, http_client,
};
use recruit_notifier::config::AppConfig;
use recruit_notifier::logging;
use recruit_notifier::pipeline::{Dispatcher, Processor, spawn_processor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let log_dir = std::env::var_os("LOG_DIR")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from);
    let _log_guard = logging::init(log_dir.as_deref()).context("Failed to initialise logging")?;

    let config = AppConfig::from_env().context("Invalid configuration")?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        mode = %config.mode,
        imap = %format!("{}:{}", config.imap.host, config.imap.port),
        user = %config.imap.username,
        interval_secs = config.poll_interval.as_secs(),
        search_days = config.imap.search_days,
        error_alerts = config.error_webhook_url.is_some(),
        run_once = config.run_once,
        "Recruit notifier starting"
    );

    let client = http_client();
    let alerter = Arc::new(ErrorAlerter::new(
        config.error_webhook_url,
        client.clone(),
    ));

    let notifiers: Vec<Arc<dyn Notifier>> = vec![
        Arc::new(SlackNotifier::new(config.slack, client.clone())) as Arc<dyn Notifier>,
        Arc::new(LineNotifier::new(config.line, client)) as Arc<dyn Notifier>,
    ];
    let dispatcher = Dispatcher::new(notifiers, Arc::clone(&alerter));

    let mailbox: Arc<dyn MailSource> = Arc::new(ImapMailbox::new(config.imap));
    let processor = Arc::new(Processor::new(mailbox, dispatcher, alerter, config.mode));

    if config.run_once {
        let Some(report) = processor.run_cycle().await else {
            anyhow::bail!("Single poll cycle failed");
        };
        tracing::info!(?report, "Single cycle finished");
        return Ok(());
    }

    let (handle, shutdown) = spawn_processor(Arc::clone(&processor), config.poll_interval);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested");

    let _ = shutdown.send(true);
    handle.await.context("Poll loop panicked")?;

    Ok(())
}

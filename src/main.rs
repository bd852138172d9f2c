use std::sync::Arc;

use mail_responder::channels::{ImapConnector, MailboxReader, SmtpTransmitter};
use mail_responder::config::ResponderConfig;
use mail_responder::llm::CompletionClient;
use mail_responder::pipeline::{PollSettings, Poller, spawn_poller};
use mail_responder::store::ProcessedIds;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    // Optional daily log file next to stderr output
    let _log_guard = init_tracing();

    let config = match ResponderConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    eprintln!("📬 Mail responder v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   IMAP: {}:{} ({})", config.imap.host, config.imap.port, config.imap.folder);
    eprintln!("   SMTP: {}:{}", config.smtp.host, config.smtp.port);
    eprintln!("   LLM: {} ({})", config.llm.api_url, config.llm.model);
    eprintln!("   Keyword: {:?}", config.filter_keyword);
    eprintln!("   Every: {}s, delivery: {:?}", config.poll_interval.as_secs(), config.delivery);

    let store = ProcessedIds::load(&config.processed_ids_path).await;
    eprintln!(
        "   Processed ids: {} ({} known)\n",
        config.processed_ids_path.display(),
        store.len()
    );

    let reader = MailboxReader::new(
        Arc::new(ImapConnector::new(config.imap.clone())),
        config.imap.folder.clone(),
    );
    let poller = Poller::new(
        reader,
        Arc::new(CompletionClient::new(config.llm.clone())),
        Arc::new(SmtpTransmitter::new(config.smtp.clone())),
        store,
        PollSettings {
            keyword: config.filter_keyword.clone(),
            interval: config.poll_interval,
            delivery: config.delivery,
        },
    );

    let (mut handle, shutdown) = spawn_poller(poller);

    let result = tokio::select! {
        result = &mut handle => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Ctrl-C received, finishing the current cycle");
            shutdown.send_replace(true);
            handle.await
        }
    };

    if let Err(e) = result {
        tracing::error!("Poller task ended unexpectedly: {e}");
        return Err(e.into());
    }

    Ok(())
}

fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let stderr = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    match std::env::var("MAIL_RESPONDER_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "mail-responder.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}

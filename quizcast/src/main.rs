mod surface;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use quizcast_core::ledger::AnswerLedger;
use quizcast_core::logging;
use quizcast_core::models::QuizId;
use quizcast_core::playback::SegmentFeedFactory;
use quizcast_core::transport::{TcpPushChannel, Transport};
use quizcast_core::{Config, ViewerClient, ViewerHandle};

use surface::HeadlessSurface;

/// Live broadcast viewer client: follows the active session, keeps the
/// stream playing, and answers quizzes at most once per device.
#[derive(Debug, Parser)]
#[command(name = "quizcast", version, about)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "QUIZCAST_CONFIG_PATH")]
    config: Option<String>,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration
    let mut config = Config::load(cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {e}"))?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    // 2. Validate configuration (fail fast on misconfigurations)
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    // 3. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("Quizcast viewer starting...");
    info!("API: {}", config.api.base_url);
    info!("Push channel: {}", config.transport.addr);

    // 4. Open the answered-quiz ledger
    let ledger = AnswerLedger::open(&config.ledger.path)?;
    info!(
        path = %config.ledger.path,
        answered = ledger.len(),
        "Answer ledger ready"
    );

    // 5. Bring up the push channel and assemble the client
    let (transport, signals) = TcpPushChannel::connect(config.transport.clone());
    let (client, handle, mut notices) = ViewerClient::new(
        config,
        transport as Arc<dyn Transport>,
        signals,
        Arc::new(HeadlessSurface::new("primary")),
        Arc::new(HeadlessSurface::new("spectator")),
        Arc::new(SegmentFeedFactory),
        ledger,
    );

    let shutdown = CancellationToken::new();
    let client_task = tokio::spawn(client.run(shutdown.clone()));

    // Status notices go straight to the log; a real front end would
    // render them instead
    tokio::spawn(async move {
        while let Some(notice) = notices.recv().await {
            info!("[status] {notice}");
        }
    });

    // 6. Viewer commands from stdin, Ctrl-C to leave
    let stdin_handle = handle.clone();
    let stdin_shutdown = shutdown.clone();
    tokio::spawn(async move {
        run_command_loop(stdin_handle, stdin_shutdown).await;
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    shutdown.cancel();
    if let Err(e) = client_task.await {
        error!("Client task failed: {e}");
    }
    info!("Goodbye");
    Ok(())
}

/// Minimal interactive control surface:
///
/// ```text
/// answer <quiz-id> <option>   submit an answer
/// ask <question text>         send a question to the host
/// live                        jump back to the live edge
/// ```
async fn run_command_loop(handle: ViewerHandle, shutdown: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            () = shutdown.cancelled() => return,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                warn!("stdin read failed: {e}");
                return;
            }
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match trimmed.split_once(' ') {
            Some(("answer", rest)) => match rest.trim().split_once(' ') {
                Some((quiz_id, option)) => match option.trim().parse::<usize>() {
                    Ok(option) => {
                        handle
                            .submit_answer(QuizId::from(quiz_id.trim()), option)
                            .await;
                    }
                    Err(_) => warn!("Usage: answer <quiz-id> <option-number>"),
                },
                None => warn!("Usage: answer <quiz-id> <option-number>"),
            },
            Some(("ask", text)) => handle.send_question(text.trim()).await,
            None if trimmed == "live" => handle.seek_to_live().await,
            _ => warn!("Commands: answer <quiz-id> <option> | ask <text> | live"),
        }
    }
}

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

use finquery_client::{
    poll_session, AnalysisApi, ClientConfig, HttpAnalysisApi, StreamController, StreamQuery,
};
use finquery_observability::{
    emit_event, init_process_logging, redact_text, ObservabilityEvent, ProcessKind,
};
use finquery_types::{AnalysisModel, AnalysisStatus, CreateTaskRequest};

#[derive(Parser, Debug)]
#[command(name = "finquery")]
#[command(about = "Streaming client for the finquery analysis backend")]
struct Cli {
    /// Override the backend base URL from config/env.
    #[arg(long, global = true)]
    base_url: Option<String>,
    /// Bearer credential attached to every request.
    #[arg(long, global = true, env = "FINQUERY_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream an analysis question and print incremental results.
    Ask {
        message: String,
        #[arg(long, default_value = "prophet")]
        model: String,
        /// Continue an existing session instead of starting fresh.
        #[arg(long)]
        session: Option<String>,
        /// Extra conversation context forwarded to the backend.
        #[arg(long)]
        context: Option<String>,
    },
    /// Create an analysis task without streaming; prints the session id.
    Create {
        message: String,
        #[arg(long, default_value = "prophet")]
        model: String,
        #[arg(long)]
        context: Option<String>,
    },
    /// One-shot status snapshot for a session, as JSON.
    Status { session_id: String },
    /// Poll a session until it completes or fails.
    Watch {
        session_id: String,
        #[arg(long, default_value_t = 2000)]
        interval_ms: u64,
    },
    /// Delete a session on the backend. Failures are logged only.
    Delete { session_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let logs_root = dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("finquery");
    let logs_dir = finquery_observability::canonical_logs_dir_from_root(&logs_root);
    let (_log_guard, log_info) = init_process_logging(ProcessKind::Cli, &logs_dir, 14)
        .context("failed to initialize logging")?;
    info!(logs_dir = %log_info.logs_dir, "finquery cli starting");

    let mut config = ClientConfig::load()
        .await
        .context("failed to load client configuration")?;
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url.trim_end_matches('/').to_string();
    }
    if let Some(token) = cli.token {
        config.bearer_token = Some(token);
    }
    config.validate().context("invalid configuration")?;

    let api: Arc<HttpAnalysisApi> = Arc::new(HttpAnalysisApi::new(&config));

    match cli.command {
        Command::Ask {
            message,
            model,
            session,
            context,
        } => {
            let model: AnalysisModel = model
                .parse()
                .map_err(anyhow::Error::msg)
                .context("invalid --model")?;
            run_ask(api, &config, message, model, session, context).await
        }
        Command::Create {
            message,
            model,
            context,
        } => {
            let model: AnalysisModel = model
                .parse()
                .map_err(anyhow::Error::msg)
                .context("invalid --model")?;
            let response = api
                .create_task(&CreateTaskRequest {
                    message,
                    model,
                    context,
                    session_id: None,
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Command::Status { session_id } => {
            let snapshot = api.get_status(&session_id).await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(())
        }
        Command::Watch {
            session_id,
            interval_ms,
        } => run_watch(api, session_id, Duration::from_millis(interval_ms)).await,
        Command::Delete { session_id } => {
            // cleanup only affects backend resource reclamation;
            // failure is not an error for the user
            if let Err(e) = api.delete_session(&session_id).await {
                warn!(%session_id, "failed to delete session: {}", e);
            }
            Ok(())
        }
    }
}

async fn run_ask(
    api: Arc<HttpAnalysisApi>,
    config: &ClientConfig,
    message: String,
    model: AnalysisModel,
    session: Option<String>,
    context: Option<String>,
) -> anyhow::Result<()> {
    emit_event(
        Level::INFO,
        ProcessKind::Cli,
        ObservabilityEvent {
            event: "ask.start",
            component: "cli",
            session_id: session.as_deref(),
            model: Some(model.as_str()),
            status: None,
            error_code: None,
            detail: Some(&redact_text(&message)),
        },
    );

    let mut query = StreamQuery::new(message, model);
    if let Some(session) = session {
        query = query.with_session(session);
    }
    if let Some(context) = context {
        query = query.with_context(context);
    }

    let controller = StreamController::new(api, config.stall_timeout());
    // subscribe first so an update published right after connect is
    // never missed
    let mut updates = controller.subscribe();
    controller.start(query).await?;

    let mut printed_thinking = String::new();
    let mut last_step_message: Option<String> = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\ninterrupted; closing stream");
                controller.cancel().await;
                return Ok(());
            }
            received = updates.recv() => {
                let update = match received {
                    Ok(update) => update,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "update receiver lagged; catching up");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };

                if update.thinking != printed_thinking {
                    if let Some(delta) = update.thinking.strip_prefix(printed_thinking.as_str()) {
                        print!("{}", delta);
                    } else {
                        // accumulated text was rewritten; reprint it
                        print!("\n{}", update.thinking);
                    }
                    std::io::stdout().flush().ok();
                    printed_thinking = update.thinking.clone();
                }

                if update.step_message != last_step_message {
                    if let Some(step_message) = &update.step_message {
                        eprintln!("\n[step {}] {}", update.steps, step_message);
                    }
                    last_step_message = update.step_message.clone();
                }

                if update.is_terminal() {
                    break;
                }
            }
        }
    }

    let final_state = controller.wait().await;
    println!();
    match final_state.status {
        AnalysisStatus::Completed => {
            if let Some(conclusion) = &final_state.data.conclusion {
                println!("conclusion: {}", conclusion);
            }
            if let Some(response) = &final_state.data.conversational_response {
                println!("{}", response);
            }
            if let Some(session_id) = &final_state.session_id {
                println!("session: {}", session_id);
            }
            Ok(())
        }
        AnalysisStatus::Error => {
            let message = final_state
                .error_message
                .as_deref()
                .unwrap_or("analysis failed");
            anyhow::bail!("{}", message);
        }
        other => {
            anyhow::bail!("stream ended in non-terminal status '{}'", other);
        }
    }
}

async fn run_watch(
    api: Arc<HttpAnalysisApi>,
    session_id: String,
    interval: Duration,
) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            canceller.cancel();
        }
    });

    let final_snapshot = poll_session(api.as_ref(), &session_id, interval, &cancel, |snapshot| {
        println!(
            "status={} steps={}{}",
            snapshot.status,
            snapshot.steps,
            snapshot
                .data
                .conclusion
                .as_deref()
                .map(|c| format!(" conclusion={}", c))
                .unwrap_or_default()
        );
    })
    .await?;

    println!("{}", serde_json::to_string_pretty(&final_snapshot)?);
    Ok(())
}

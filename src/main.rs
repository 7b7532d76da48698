use std::{future::Future, process::ExitCode};

use dotenvy::dotenv;
use openai_rag::{
    chat::{ChatCompletion, ChatMessage},
    config::SessionConfig,
    session::RagSession,
    Credentials, OpenAiClient, RagError,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DOCUMENTS: [&str; 2] = ["test_data/keepers.txt", "test_data/storms.txt"];
const QUESTION: &str =
    "Who was keeping the Harrow Point light on the night the Margit ran aground?";

#[tokio::main]
async fn main() -> ExitCode {
    // Make sure you have a file named `.env` with the `OPENAI_KEY` environment variable defined!
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // First Ctrl-C stops the current wait and cancels remote work; a second one exits.
    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling (press Ctrl-C again to exit now)");
            on_ctrl_c.cancel();
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(130);
            }
        }
    });

    match run(cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::from(exit_code(&err))
        }
    }
}

fn exit_code(err: &RagError) -> u8 {
    match err {
        RagError::Config(_) => 2,
        RagError::RunFailed { .. } | RagError::Timeout { .. } | RagError::Cancelled { .. } => 3,
        _ => 1,
    }
}

/// Runs `work` unless `cancel` fires first.
async fn interruptible<T, F>(cancel: &CancellationToken, what: &str, work: F) -> Result<T, RagError>
where
    F: Future<Output = Result<T, RagError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RagError::Cancelled { id: what.to_string() }),
        result = work => result,
    }
}

async fn run(cancel: CancellationToken) -> Result<(), RagError> {
    let credentials = Credentials::from_env()?;
    let config = SessionConfig::from_env()?;
    let client = OpenAiClient::with_request_timeout(credentials, config.request_timeout)?;

    let request = ChatCompletion::builder(
        &config.model,
        [
            ChatMessage::system("You are a helpful assistant."),
            ChatMessage::user("In one sentence, what is retrieval-augmented generation?"),
        ],
    )
    .build()
    .map_err(|err| RagError::config(err.to_string()))?;
    let completion = interruptible(&cancel, "chat completion", async {
        client
            .create_chat_completion(request)
            .await
            .map_err(RagError::from)
    })
    .await?;
    println!("Chat: {}", completion.first_content().unwrap_or_default().trim());

    let mut session = RagSession::new(client, config).with_cancellation(cancel.clone());
    let prepared = interruptible(&cancel, "session setup", session.prepare(&DOCUMENTS)).await?;

    println!("Question: {QUESTION}");
    let answer = session.ask(&prepared.assistant_id, QUESTION).await?;

    let steps = interruptible(&cancel, &answer.run_id, async {
        session
            .client()
            .list_run_steps(&answer.thread_id, &answer.run_id)
            .collect_all()
            .await
            .map_err(RagError::from)
    })
    .await?;
    let retrieved = steps
        .iter()
        .flat_map(|step| step.file_search_results())
        .count();
    info!(retrieved, "file search results");

    println!("Answer: {answer}");
    Ok(())
}

use futures::StreamExt;
use rcompletions::{ClientConfig, CompletionClient, CompletionRequest};
use std::io::Write;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dotenv_loaded = dotenv::dotenv().is_ok();

    rcompletions::logger::init_with_config(
        rcompletions::logger::LoggerConfig::development()
            .with_level(rcompletions::logger::LogLevel::Info),
    )?;

    if dotenv_loaded {
        log::info!(".env file loaded");
    } else {
        log::warn!("No .env file found, using system environment variables");
    }

    let config = ClientConfig::from_env();
    rcompletions::logger::log_client_info(&config);

    let client = match CompletionClient::new(config) {
        Ok(client) => client,
        Err(e) => {
            log::error!("Failed to create completion client: {}", e);
            return Err(e.into());
        }
    };

    let prompt = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "Once upon a time".to_string());

    log::info!("Running blocking completion...");
    {
        let _timer = rcompletions::logger::timer("blocking completion");
        let result = client
            .complete(
                CompletionRequest::new()
                    .with_prompt(prompt.as_str())
                    .with_max_tokens(32)
                    .with_temperature(0.7),
            )
            .await?;

        for choice in &result.choices {
            log::info!(
                "Choice {} ({}): {}",
                choice.index,
                choice.finish_reason.as_deref().unwrap_or("none"),
                choice.text
            );
        }
    }

    log::info!("Running streaming completion...");
    let _timer = rcompletions::logger::timer("streaming completion");
    let mut completions = client
        .complete_stream(
            CompletionRequest::new()
                .with_prompt(prompt.as_str())
                .with_max_tokens(64)
                .with_stop(["\n\n"]),
        )
        .await?;

    if let Some(request_id) = &completions.metadata().request_id {
        log::info!("Streaming request id: {}", request_id);
    }

    let mut stdout = std::io::stdout();
    while let Some(result) = completions.next().await {
        if let Some(text) = result?.text() {
            write!(stdout, "{}", text)?;
            stdout.flush()?;
        }
    }
    writeln!(stdout)?;

    Ok(())
}

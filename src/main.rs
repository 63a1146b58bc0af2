use anyhow::Result;
use clap::Parser;
use std::io::Stdout;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audio_downloader::download::FAILURE_EXIT_CODE;
use audio_downloader::{
    normalize, Cli, Config, DownloadPipeline, EventEmitter, Outcome, YtDlpFetcher,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // stdout carries the event stream, logs go to stderr
    let default_filter = if cli.verbose {
        "audio_downloader=debug"
    } else {
        "audio_downloader=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut emitter = EventEmitter::stdout();

    match run(&cli, &mut emitter).await {
        Ok(outcome) => outcome.exit_code(),
        Err(err) => {
            tracing::error!("{:#}", err);
            if emitter.is_finished() {
                return ExitCode::from(FAILURE_EXIT_CODE);
            }
            let terminated = emitter.emit_failed(&normalize(&format!("{:#}", err)));
            Outcome::Failed(terminated.into_message()).exit_code()
        }
    }
}

async fn run(cli: &Cli, emitter: &mut EventEmitter<Stdout>) -> Result<Outcome> {
    let config = Config::load(cli.config.as_deref())?;
    let audio_format = cli.audio_format.unwrap_or(config.audio.format);

    let fetcher = YtDlpFetcher::new(&config.ytdlp, audio_format, config.audio.quality.clone());

    if cli.verbose && !fetcher.check_availability().await {
        tracing::warn!(
            "{} does not answer --version, the download will probably fail",
            config.ytdlp.path
        );
    }

    let pipeline = DownloadPipeline::new(Box::new(fetcher), audio_format);
    let outcome = pipeline.run(&cli.download_request(), emitter).await?;

    Ok(outcome)
}

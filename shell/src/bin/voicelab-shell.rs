use std::process::ExitCode;

use tokio::signal;
use tracing::{error, info};
use voicelab_core::telemetry::init_tracing;
use voicelab_core::{DownloadStage, TtsRequest, VoiceLabError};
use voicelab_shell::{ShellConfig, ShellServices};

const USAGE: &str = "usage: voicelab-shell [download <model_id> | speak <voice_id> <text...>]";

enum Command {
    Serve,
    Download { model_id: String },
    Speak { voice_id: String, text: String },
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Option<Command> {
    match args.next().as_deref() {
        None => Some(Command::Serve),
        Some("download") => {
            let model_id = args.next()?;
            Some(Command::Download { model_id })
        }
        Some("speak") => {
            let voice_id = args.next()?;
            let text = args.collect::<Vec<_>>().join(" ");
            if text.trim().is_empty() {
                return None;
            }
            Some(Command::Speak { voice_id, text })
        }
        Some(_) => None,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing("info,voicelab_core=info,voicelab_shell=info");

    let Some(command) = parse_args(std::env::args().skip(1)) else {
        eprintln!("{}", USAGE);
        return ExitCode::from(2);
    };

    let services = match ShellServices::new(ShellConfig::load()) {
        Ok(s) => s,
        Err(e) => {
            error!(target: "shell", error = %e, "Failed to set up services");
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let api = match services.initialize().await {
        Ok(api) => api,
        Err(failure) => {
            eprintln!("{}", failure);
            services.shutdown().await.ok();
            return ExitCode::FAILURE;
        }
    };

    let outcome = match command {
        Command::Serve => {
            println!("Voice worker ready at {}", api.base_url());
            info!(target: "shell", "Press Ctrl+C to stop");
            signal::ctrl_c().await.map_err(VoiceLabError::from)
        }
        Command::Download { model_id } => api
            .download_model(&model_id, |evt| {
                let stage = match evt.stage {
                    DownloadStage::Pending => "pending",
                    DownloadStage::Downloading => "downloading",
                    DownloadStage::Completed => "completed",
                    DownloadStage::Failed => "failed",
                };
                match &evt.error {
                    Some(err) => println!("{:>3}% {} ({})", evt.percent, stage, err),
                    None => println!(
                        "{:>3}% {} {}/{} bytes",
                        evt.percent, stage, evt.downloaded_bytes, evt.total_bytes
                    ),
                }
            })
            .await
            .map(|resp| println!("Model stored at {}", resp.path)),
        Command::Speak { voice_id, text } => services
            .synthesize_to_file(&TtsRequest::new(voice_id, text))
            .await
            .map(|path| println!("{}", path.display())),
    };

    let stopped = services.shutdown().await;
    match outcome.and(stopped) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(target: "shell", error = %e, code = e.code(), "Command failed");
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

mod ai;
mod cache;
mod capture;
mod config;
mod error;
mod interactive;
mod session;
#[cfg(test)]
mod test_support;
mod ui;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{
    NarrationModel, NarrationVoice, NarratorConfig, DEFAULT_MAX_TOKENS, DEFAULT_MODEL,
    DEFAULT_PROMPT, DEFAULT_RESIZE, DEFAULT_STRIDE,
};
use crate::session::{Credential, Session, VideoUpload};

#[derive(Parser)]
#[command(name = "voiceover")]
#[command(about = "Narrate videos using OpenAI's vision and speech models", long_about = None)]
struct Cli {
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,
    #[command(flatten)]
    model: ModelArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct ModelArgs {
    #[arg(long, env = "OPENAI_API_BASE", global = true)]
    api_base: Option<String>,
    #[arg(long, default_value = DEFAULT_MODEL, global = true)]
    model: String,
    #[arg(long, default_value_t = DEFAULT_MAX_TOKENS, global = true)]
    max_tokens: u32,
    #[arg(long, default_value_t = DEFAULT_STRIDE as u32, value_parser = clap::value_parser!(u32).range(1..), global = true)]
    stride: u32,
    #[arg(long, default_value_t = DEFAULT_RESIZE, value_parser = clap::value_parser!(u32).range(1..), global = true)]
    resize: u32,
    #[arg(long, default_value = DEFAULT_PROMPT, global = true)]
    prompt: String,
    #[arg(long, value_enum, default_value_t = NarrationVoice::default(), global = true)]
    voice: NarrationVoice,
    #[arg(long, value_enum, default_value_t = NarrationModel::default(), global = true)]
    speech_model: NarrationModel,
}

impl From<ModelArgs> for NarratorConfig {
    fn from(args: ModelArgs) -> Self {
        Self {
            api_base: args.api_base,
            model: args.model,
            max_tokens: args.max_tokens,
            stride: args.stride as usize,
            resize: args.resize,
            prompt: args.prompt,
            voice: args.voice,
            speech_model: args.speech_model,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Process a video, write its narration script and synthesize the audio.
    Narrate {
        input_file: PathBuf,
        #[arg(short, long, default_value = "narration.mp3")]
        output: PathBuf,
        /// Also write the generated script to this file.
        #[arg(long)]
        script_out: Option<PathBuf>,
        /// Write the first extracted frame to this JPEG file.
        #[arg(long)]
        sample_frame: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = Stage::Audio)]
        stop_after: Stage,
    },
    /// Drive the steps one at a time from a prompt.
    Interactive {
        #[arg(short, long, default_value = "narration.mp3")]
        output: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Stage {
    Frames,
    Script,
    Audio,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voiceover=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let credential = Credential::new(cli.api_key.unwrap_or_default());
    let session = Session::new(cli.model.into(), credential);
    let interrupts = ui::Interrupts::install();

    match cli.command {
        Command::Narrate {
            input_file,
            output,
            script_out,
            sample_frame,
            stop_after,
        } => {
            narrate(
                session,
                input_file,
                output,
                script_out,
                sample_frame,
                stop_after,
                &interrupts,
            )
            .await
        }
        Command::Interactive { output } => interactive::run(session, output, &interrupts).await,
    }
}

async fn narrate(
    mut session: Session,
    input_file: PathBuf,
    output: PathBuf,
    script_out: Option<PathBuf>,
    sample_frame: Option<PathBuf>,
    stop_after: Stage,
    interrupts: &ui::Interrupts,
) -> anyhow::Result<()> {
    session.upload(VideoUpload::from_path(&input_file).await?)?;

    ui::process_video(&mut session, sample_frame.as_deref()).await?;
    if stop_after == Stage::Frames {
        return Ok(());
    }

    let script = ui::create_script(&mut session, interrupts).await?;
    if let Some(path) = &script_out {
        tokio::fs::write(path, &script).await?;
        tracing::info!(path = %path.display(), "script written");
    }
    if stop_after == Stage::Script {
        return Ok(());
    }

    ui::produce_audio(&session, &output).await
}

//! Line-oriented session: the user triggers each step by hand, and only the
//! steps whose inputs exist are offered.

use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::session::{Action, Session, VideoUpload};
use crate::ui::{self, Interrupts};

const HELP: &str = "\
Commands:
  load <path>     choose an .mp4 video
  process         extract frames from the loaded video
  script          generate a narration script from the frames
  audio [path]    synthesize the script to an MP3 file
  actions         list what can be done right now
  status          show what the session holds
  forget          drop cached frames for the loaded video
  help            show this text
  quit            leave";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Load(PathBuf),
    Process,
    Script,
    Audio(Option<PathBuf>),
    Actions,
    Status,
    Forget,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = line
            .split_once(char::is_whitespace)
            .map(|(word, rest)| (word, rest.trim()))
            .unwrap_or((line, ""));
        match (word.to_ascii_lowercase().as_str(), rest) {
            ("load", "") => Err("usage: load <path>".to_owned()),
            ("load", path) => Ok(Command::Load(PathBuf::from(path))),
            ("process", "") => Ok(Command::Process),
            ("script", "") => Ok(Command::Script),
            ("audio", "") => Ok(Command::Audio(None)),
            ("audio", path) => Ok(Command::Audio(Some(PathBuf::from(path)))),
            ("actions", "") => Ok(Command::Actions),
            ("status", "") => Ok(Command::Status),
            ("forget", "") => Ok(Command::Forget),
            ("help", "") | ("?", "") => Ok(Command::Help),
            ("quit", "") | ("exit", "") => Ok(Command::Quit),
            _ => Err(format!("unknown command {line:?}, try \"help\"")),
        }
    }
}

fn describe_actions(actions: &[Action]) -> String {
    if actions.is_empty() {
        return "No actions available. Load a video first.".to_owned();
    }
    let names: Vec<String> = actions.iter().map(ToString::to_string).collect();
    format!("Available: {}", names.join(", "))
}

pub(crate) async fn run(
    mut session: Session,
    default_output: PathBuf,
    interrupts: &Interrupts,
) -> anyhow::Result<()> {
    if !session.has_credential() {
        println!("Please enter your OpenAI API Key to proceed (--api-key or OPENAI_API_KEY).");
        return Ok(());
    }

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(message) => {
                println!("{message}");
                continue;
            }
        };

        let outcome = match command {
            Command::Load(path) => match VideoUpload::from_path(&path).await {
                Ok(upload) => session.upload(upload).map_err(anyhow::Error::from),
                Err(err) => Err(err.into()),
            },
            Command::Process => ui::process_video(&mut session, None).await.map(drop),
            Command::Script => ui::create_script(&mut session, interrupts).await.map(drop),
            Command::Audio(path) => {
                let output_path = path.unwrap_or_else(|| default_output.clone());
                ui::produce_audio(&session, &output_path).await
            }
            Command::Actions => {
                println!("{}", describe_actions(&session.available_actions()));
                Ok(())
            }
            Command::Status => {
                match session.current_upload() {
                    Some(upload) => println!("Video: {} ({} bytes)", upload.name, upload.bytes.len()),
                    None => println!("Video: none"),
                }
                match session.truncation() {
                    Some(reason) => println!(
                        "Frames: {} (decoding stopped early: {reason})",
                        session.frames().len()
                    ),
                    None => println!("Frames: {}", session.frames().len()),
                }
                println!("Script: {} chars", session.script().len());
                println!("Cached uploads: {}", session.cached_uploads());
                Ok(())
            }
            Command::Forget => {
                if session.forget_current_upload() {
                    println!("Cached frames dropped.");
                } else {
                    println!("Nothing cached for the current video.");
                }
                Ok(())
            }
            Command::Help => {
                println!("{HELP}");
                Ok(())
            }
            Command::Quit => break,
        };

        if let Err(err) = outcome {
            println!("Error: {err:#}");
        }
    }
    Ok(())
}

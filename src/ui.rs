use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::ai::{self, AUDIO_MIME};
use crate::session::Session;

/// Exit status after an interrupt, as shells report for SIGINT.
const EXIT_INTERRUPTED: i32 = 130;

fn spinner(message: &'static str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

fn clear_spinner(waiting: &mut Option<ProgressBar>) {
    if let Some(spinner) = waiting.take() {
        spinner.finish_and_clear();
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Interrupt {
    Cancelled,
    Exit,
}

/// Process-wide Ctrl-C routing.
///
/// While a script is being generated, Ctrl-C cancels it. At any other time it
/// ends the process.
#[derive(Clone, Default)]
pub(crate) struct Interrupts {
    active: Arc<Mutex<Option<CancellationToken>>>,
}

impl Interrupts {
    /// Starts listening for Ctrl-C. Call once, from inside the runtime.
    pub(crate) fn install() -> Self {
        let interrupts = Self::default();
        let handler = interrupts.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                match handler.interrupt() {
                    Interrupt::Cancelled => {
                        warn!("interrupt received, cancelling script generation")
                    }
                    Interrupt::Exit => std::process::exit(EXIT_INTERRUPTED),
                }
            }
        });
        interrupts
    }

    /// Hands out a token that Ctrl-C cancels for as long as the guard lives.
    fn cancellable(&self) -> Cancellable<'_> {
        let token = CancellationToken::new();
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.clone());
        Cancellable {
            interrupts: self,
            token,
        }
    }

    fn interrupt(&self) -> Interrupt {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        match active.as_ref() {
            Some(token) => {
                token.cancel();
                Interrupt::Cancelled
            }
            None => Interrupt::Exit,
        }
    }
}

struct Cancellable<'a> {
    interrupts: &'a Interrupts,
    token: CancellationToken,
}

impl Drop for Cancellable<'_> {
    fn drop(&mut self) {
        *self
            .interrupts
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}

pub(crate) async fn process_video(
    session: &mut Session,
    sample_frame: Option<&Path>,
) -> anyhow::Result<usize> {
    let spinner = spinner("Processing...");
    let result = session.process_video().await;
    spinner.finish_and_clear();
    let frame_count = result?;
    println!("Processed {frame_count} frames.");

    if let (Some(path), Some(frame)) = (sample_frame, session.frames().first()) {
        tokio::fs::write(path, frame.decode()?).await?;
        println!("Sample frame written to {}", path.display());
    }
    Ok(frame_count)
}

/// Streams the script to stdout as it is generated. Ctrl-C cancels.
pub(crate) async fn create_script(
    session: &mut Session,
    interrupts: &Interrupts,
) -> anyhow::Result<String> {
    let cancellable = interrupts.cancellable();
    let mut waiting = Some(spinner("Crafting the script..."));
    let result = session
        .create_script(&cancellable.token, |fragment, _| {
            clear_spinner(&mut waiting);
            print!("{fragment}");
            let _ = std::io::stdout().flush();
        })
        .await
        .map(str::to_owned);
    clear_spinner(&mut waiting);
    drop(cancellable);
    println!();
    Ok(result?)
}

pub(crate) async fn produce_audio(session: &Session, output_path: &Path) -> anyhow::Result<()> {
    let spinner = spinner("Generating narration...");
    let result = session.produce_audio().await;
    spinner.finish_and_clear();
    let audio = result?;

    ai::save_audio(&audio, output_path)?;
    println!(
        "Narration saved to {} ({} bytes, {AUDIO_MIME})",
        output_path.display(),
        audio.len()
    );
    Ok(())
}

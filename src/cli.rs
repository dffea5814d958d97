use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Args, Parser, Subcommand};

use crate::error::{LipError, LipResult};
use crate::model::{RunConfig, SynthLanguage, TextSource};

/// Global flag indicating that a shutdown signal has been received.
static SHUTDOWN_FLAG: AtomicBool = AtomicBool::new(false);

/// Coordinates graceful Ctrl+C shutdown.
///
/// When a signal is received the controller sets a global `AtomicBool`,
/// which the event loop polls via [`ShutdownController::is_shutting_down`]
/// and forwards to the active run's stop flag.
pub struct ShutdownController;

impl ShutdownController {
    /// Install the Ctrl+C signal handler.
    ///
    /// Errors are non-fatal (signal handling is best-effort), so callers
    /// may choose to log and continue.
    pub fn install() -> LipResult<()> {
        ctrlc::set_handler(move || {
            SHUTDOWN_FLAG.store(true, Ordering::SeqCst);
            tracing::info!("shutdown signal received (Ctrl+C)");
        })
        .map_err(|e| LipError::Io(std::io::Error::other(format!("ctrlc handler: {e}"))))?;
        Ok(())
    }

    /// Returns `true` once a Ctrl+C (or programmatic trigger) has been
    /// received.
    #[must_use]
    pub fn is_shutting_down() -> bool {
        SHUTDOWN_FLAG.load(Ordering::SeqCst)
    }

    /// Programmatically trigger the shutdown flag (testing and internal
    /// cancel paths).
    pub fn trigger_shutdown() {
        SHUTDOWN_FLAG.store(true, Ordering::SeqCst);
    }

    /// Reset the shutdown flag (for testing only).
    #[cfg(test)]
    pub fn reset() {
        SHUTDOWN_FLAG.store(false, Ordering::SeqCst);
    }

    /// The exit code the binary should use when exiting due to a signal.
    #[must_use]
    pub const fn signal_exit_code() -> i32 {
        130 // Convention: 128 + SIGINT(2)
    }
}

#[derive(Debug, Parser)]
#[command(name = "lipbatch")]
#[command(about = "Batch driver for an external lip-sync generator with heuristic transcript resolution")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate one .lip artifact per .wav clip.
    Generate(Box<GenerateArgs>),
    /// Probe mapping coverage without launching the generator.
    TestMapping(TestMappingArgs),
}

#[derive(Debug, Clone, Args)]
pub struct GenerateArgs {
    /// Folder containing the input .wav clips.
    #[arg(long)]
    pub input: PathBuf,

    /// Folder receiving the .lip artifacts.
    #[arg(long)]
    pub output: PathBuf,

    /// Descend into subfolders.
    #[arg(long)]
    pub recursive: bool,

    /// Write all artifacts directly into the output folder instead of
    /// mirroring the input folder structure.
    #[arg(long)]
    pub flatten: bool,

    /// Language flag forwarded to the generator.
    #[arg(long, value_enum, default_value_t = SynthLanguage::UsEnglish)]
    pub language: SynthLanguage,

    /// Optional -GestureExaggeration value, forwarded verbatim.
    #[arg(long)]
    pub gesture: Option<String>,

    /// Where transcript text comes from.
    #[arg(long, value_enum, default_value_t = TextSource::SidecarTxt)]
    pub text_source: TextSource,

    /// Transcript used for every clip (text-source=fixed).
    #[arg(long)]
    pub fixed_text: Option<String>,

    /// Mapping file; repeat for multiple files (text-source=mapping).
    #[arg(long = "mapping-file")]
    pub mapping_files: Vec<PathBuf>,

    /// Directory holding LipGenerator.exe and FonixData.cdf.
    #[arg(long, default_value = "LipGenerator")]
    pub generator_dir: PathBuf,

    /// Print the final run report as JSON.
    #[arg(long)]
    pub json: bool,
}

impl GenerateArgs {
    #[must_use]
    pub fn to_config(&self) -> RunConfig {
        RunConfig {
            input_dir: self.input.clone(),
            output_dir: self.output.clone(),
            recursive: self.recursive,
            preserve_structure: !self.flatten,
            language: self.language,
            gesture: self.gesture.clone(),
            text_source: self.text_source,
            fixed_text: self.fixed_text.clone(),
            mapping_files: self.mapping_files.clone(),
            generator_dir: self.generator_dir.clone(),
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct TestMappingArgs {
    /// Folder containing the input .wav clips.
    #[arg(long)]
    pub input: PathBuf,

    /// Descend into subfolders.
    #[arg(long)]
    pub recursive: bool,

    /// Mapping file; repeat for multiple files.
    #[arg(long = "mapping-file")]
    pub mapping_files: Vec<PathBuf>,

    /// Print the final report as JSON.
    #[arg(long)]
    pub json: bool,
}

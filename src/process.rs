//! Supervision of one generator invocation.
//!
//! The external tool gets one process per clip, polled at a short fixed
//! interval so stop requests stay responsive. Pause never suspends an
//! in-flight process; it only withholds loop progress, which matches the
//! sequential one-process-at-a-time model where pause takes effect at job
//! boundaries.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{LipError, LipResult};
use crate::model::{ExecutionOutcome, Job, RunConfig};

/// Poll interval for the stop/pause flags while a process runs.
pub const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Bound on waiting for the process's output streams to close after exit or
/// termination. Exceeding it force-kills the process.
pub const STREAM_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[must_use]
pub fn command_exists(program: &str) -> bool {
    which::which(program).is_ok()
}

/// Verify the generator directory before any job runs: the executable must
/// exist (or resolve on PATH) and its fixed-name data file must sit beside
/// it.
pub fn check_generator_prereqs(config: &RunConfig) -> LipResult<()> {
    let exe = config.exe_path();
    if !exe.is_file() && !command_exists(&exe.to_string_lossy()) {
        return Err(LipError::MissingExecutable(exe));
    }
    let data_file = config.data_file_path();
    if !data_file.is_file() {
        return Err(LipError::MissingDataFile(data_file));
    }
    Ok(())
}

/// Invocation recipe for the generator, fixed for a whole run.
#[derive(Debug, Clone)]
pub struct GeneratorCommand {
    pub exe: PathBuf,
    /// Working directory; the tool looks up its data file relative to it.
    pub cwd: PathBuf,
    pub language: String,
    pub gesture: Option<String>,
}

impl GeneratorCommand {
    #[must_use]
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            exe: config.exe_path(),
            cwd: config.generator_dir.clone(),
            language: config.language.flag_value().to_owned(),
            gesture: config.gesture_value().map(str::to_owned),
        }
    }

    /// Argument vector after the executable. Order matters to the tool:
    /// audio path, transcript text, then flags.
    #[must_use]
    pub fn argv(&self, job: &Job) -> Vec<String> {
        let mut args = vec![
            job.source.path.to_string_lossy().into_owned(),
            job.text.clone(),
            format!("-Language:{}", self.language),
            format!("-OutputFileName:{}", job.destination.display()),
        ];
        if let Some(gesture) = &self.gesture {
            args.push(format!("-GestureExaggeration:{gesture}"));
        }
        args
    }
}

/// Run the generator for one job under stop/pause control.
///
/// Returns exactly one [`ExecutionOutcome`] whichever terminal state is
/// reached. `Err` means the process could not even be launched; callers
/// record that as a failed outcome and continue the run.
pub fn supervise(
    command: &GeneratorCommand,
    job: &Job,
    stop: &AtomicBool,
    pause: &AtomicBool,
) -> LipResult<ExecutionOutcome> {
    if let Some(parent) = job.destination.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let args = command.argv(job);
    let mut process = Command::new(&command.exe);
    process
        .args(&args)
        .current_dir(&command.cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    hide_console_window(&mut process);

    tracing::debug!(exe = %command.exe.display(), clip = %job.source.path.display(), "launching generator");
    let mut child = process.spawn()?;

    let mut stdout_pipe = child.stdout.take().expect("stdout piped");
    let mut stderr_pipe = child.stderr.take().expect("stderr piped");

    let (stdout_tx, stdout_rx) = std::sync::mpsc::channel();
    let (stderr_tx, stderr_rx) = std::sync::mpsc::channel();

    thread::spawn(move || {
        use std::io::Read;
        let mut buf = Vec::new();
        let _ = stdout_pipe.read_to_end(&mut buf);
        let _ = stdout_tx.send(buf);
    });

    thread::spawn(move || {
        use std::io::Read;
        let mut buf = Vec::new();
        let _ = stderr_pipe.read_to_end(&mut buf);
        let _ = stderr_tx.send(buf);
    });

    let mut was_killed = false;
    loop {
        if stop.load(Ordering::SeqCst) {
            let _ = child.kill();
            was_killed = true;
            break;
        }

        // Paused: the in-flight process keeps running; only stop is honored
        // until the flag clears.
        if pause.load(Ordering::SeqCst) {
            thread::sleep(POLL_INTERVAL);
            continue;
        }

        if child.try_wait()?.is_some() {
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }

    // One close bound covers both streams; the second drain only gets
    // whatever budget the first left over.
    let close_deadline = Instant::now() + STREAM_CLOSE_TIMEOUT;
    let (stdout, timed_out_stdout) = drain_stream(&stdout_rx, &mut child, close_deadline);
    let (stderr, timed_out_stderr) = drain_stream(&stderr_rx, &mut child, close_deadline);
    let timed_out = timed_out_stdout || timed_out_stderr;

    let status = child.wait()?;
    let exit_code = status.code().unwrap_or(-1);
    let canceled = was_killed || timed_out;

    if timed_out {
        tracing::warn!(clip = %job.source.path.display(), "generator output streams did not close in time, killed");
    }

    Ok(ExecutionOutcome {
        job: job.clone(),
        succeeded: !canceled && exit_code == 0,
        canceled,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit_code,
    })
}

/// Wait until `deadline` for one reader thread to deliver its stream; on
/// timeout force-kill the process so the stream closes, then retry briefly.
fn drain_stream(rx: &Receiver<Vec<u8>>, child: &mut Child, deadline: Instant) -> (Vec<u8>, bool) {
    let remaining = deadline.saturating_duration_since(Instant::now());
    match rx.recv_timeout(remaining) {
        Ok(buf) => (buf, false),
        Err(RecvTimeoutError::Timeout) => {
            let _ = child.kill();
            let buf = rx
                .recv_timeout(Duration::from_millis(500))
                .unwrap_or_default();
            (buf, true)
        }
        Err(RecvTimeoutError::Disconnected) => (Vec::new(), false),
    }
}

#[cfg(windows)]
fn hide_console_window(command: &mut Command) {
    use std::os::windows::process::CommandExt;
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    command.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(windows))]
fn hide_console_window(_command: &mut Command) {}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::model::{AudioRecord, Job, RunConfig, SynthLanguage, TextSource};

    fn fake_generator(dir: &Path, script_body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let exe = dir.join("fake_generator.sh");
        std::fs::write(&exe, format!("#!/bin/sh\n{script_body}\n")).expect("write script");
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).expect("chmod");
        exe
    }

    fn command_for(exe: PathBuf, cwd: PathBuf) -> GeneratorCommand {
        GeneratorCommand {
            exe,
            cwd,
            language: "USEnglish".to_owned(),
            gesture: None,
        }
    }

    fn job(dir: &Path) -> Job {
        Job {
            source: AudioRecord::new(dir.join("clip.wav")),
            destination: dir.join("out/clip.lip"),
            text: "Hello there".to_owned(),
            note: String::new(),
        }
    }

    fn flags() -> (AtomicBool, AtomicBool) {
        (AtomicBool::new(false), AtomicBool::new(false))
    }

    #[test]
    fn argv_order_matches_tool_contract() {
        let cmd = GeneratorCommand {
            exe: PathBuf::from("LipGenerator.exe"),
            cwd: PathBuf::from("/gen"),
            language: "German".to_owned(),
            gesture: Some("1.5".to_owned()),
        };
        let dir = tempfile::tempdir().expect("tempdir");
        let args = cmd.argv(&job(dir.path()));
        assert_eq!(args.len(), 5);
        assert!(args[0].ends_with("clip.wav"));
        assert_eq!(args[1], "Hello there");
        assert_eq!(args[2], "-Language:German");
        assert!(args[3].starts_with("-OutputFileName:"));
        assert_eq!(args[4], "-GestureExaggeration:1.5");
    }

    #[test]
    fn argv_omits_gesture_when_unset() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cmd = command_for(PathBuf::from("gen.exe"), dir.path().to_path_buf());
        let args = cmd.argv(&job(dir.path()));
        assert_eq!(args.len(), 4);
    }

    #[test]
    fn generator_command_from_config_trims_gesture() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = RunConfig {
            input_dir: dir.path().to_path_buf(),
            output_dir: dir.path().to_path_buf(),
            recursive: false,
            preserve_structure: false,
            language: SynthLanguage::French,
            gesture: Some(" 2.0 ".to_owned()),
            text_source: TextSource::Filename,
            fixed_text: None,
            mapping_files: Vec::new(),
            generator_dir: dir.path().join("gen"),
        };
        let cmd = GeneratorCommand::from_config(&config);
        assert_eq!(cmd.language, "French");
        assert_eq!(cmd.gesture.as_deref(), Some("2.0"));
        assert_eq!(cmd.cwd, dir.path().join("gen"));
    }

    #[test]
    fn successful_run_collects_output_and_creates_destination_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        // Fourth argument is -OutputFileName:<dest>; write the artifact.
        let exe = fake_generator(
            dir.path(),
            "dest=\"${4#-OutputFileName:}\"\necho generated\necho warn >&2\n: > \"$dest\"",
        );
        let cmd = command_for(exe, dir.path().to_path_buf());
        let job = job(dir.path());
        let (stop, pause) = flags();

        let outcome = supervise(&cmd, &job, &stop, &pause).expect("supervise");
        assert!(outcome.succeeded, "stderr: {}", outcome.stderr);
        assert!(!outcome.canceled);
        assert_eq!(outcome.exit_code, 0);
        assert!(outcome.stdout.contains("generated"));
        assert!(outcome.stderr.contains("warn"));
        assert!(job.destination.exists(), "artifact written by fake tool");
    }

    #[test]
    fn nonzero_exit_is_a_failed_outcome_not_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let exe = fake_generator(dir.path(), "echo boom >&2\nexit 3");
        let cmd = command_for(exe, dir.path().to_path_buf());
        let (stop, pause) = flags();

        let outcome = supervise(&cmd, &job(dir.path()), &stop, &pause).expect("supervise");
        assert!(!outcome.succeeded);
        assert!(!outcome.canceled);
        assert_eq!(outcome.exit_code, 3);
        assert!(outcome.stderr.contains("boom"));
    }

    #[test]
    fn launch_failure_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cmd = command_for(
            dir.path().join("does_not_exist"),
            dir.path().to_path_buf(),
        );
        let (stop, pause) = flags();
        let err = supervise(&cmd, &job(dir.path()), &stop, &pause).expect_err("launch fails");
        assert!(matches!(err, LipError::Io(_)), "got {err:?}");
    }

    #[test]
    fn stop_flag_kills_the_process_promptly() {
        let dir = tempfile::tempdir().expect("tempdir");
        let exe = fake_generator(dir.path(), "sleep 60");
        let cmd = command_for(exe, dir.path().to_path_buf());
        let job = job(dir.path());
        let stop = Arc::new(AtomicBool::new(false));
        let pause = AtomicBool::new(false);

        let stop_setter = Arc::clone(&stop);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(300));
            stop_setter.store(true, Ordering::SeqCst);
        });

        let started = Instant::now();
        let outcome = supervise(&cmd, &job, &stop, &pause).expect("supervise");
        assert!(outcome.canceled);
        assert!(!outcome.succeeded);
        assert!(
            started.elapsed() < Duration::from_secs(10),
            "cancellation must be responsive, took {:?}",
            started.elapsed()
        );
    }

    #[test]
    fn already_set_stop_flag_cancels_before_first_poll() {
        let dir = tempfile::tempdir().expect("tempdir");
        let exe = fake_generator(dir.path(), "sleep 60");
        let cmd = command_for(exe, dir.path().to_path_buf());
        let stop = AtomicBool::new(true);
        let pause = AtomicBool::new(false);

        let started = Instant::now();
        let outcome = supervise(&cmd, &job(dir.path()), &stop, &pause).expect("supervise");
        assert!(outcome.canceled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn pause_does_not_suspend_a_running_process() {
        let dir = tempfile::tempdir().expect("tempdir");
        // Exits on its own even while the supervisor is paused.
        let exe = fake_generator(dir.path(), "echo fine");
        let cmd = command_for(exe, dir.path().to_path_buf());
        let job = job(dir.path());
        let stop = Arc::new(AtomicBool::new(false));
        let pause = Arc::new(AtomicBool::new(true));

        let pause_clear = Arc::clone(&pause);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(600));
            pause_clear.store(false, Ordering::SeqCst);
        });

        let outcome = supervise(&cmd, &job, &stop, &pause).expect("supervise");
        // Once unpaused, the already-exited process is collected normally.
        assert!(outcome.succeeded);
        assert!(outcome.stdout.contains("fine"));
    }

    #[test]
    fn stop_wins_while_paused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let exe = fake_generator(dir.path(), "sleep 60");
        let cmd = command_for(exe, dir.path().to_path_buf());
        let stop = Arc::new(AtomicBool::new(false));
        let pause = AtomicBool::new(true);

        let stop_setter = Arc::clone(&stop);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(300));
            stop_setter.store(true, Ordering::SeqCst);
        });

        let started = Instant::now();
        let outcome = supervise(&cmd, &job(dir.path()), &stop, &pause).expect("supervise");
        assert!(outcome.canceled);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn lingering_pipes_hit_one_shared_close_bound() {
        let dir = tempfile::tempdir().expect("tempdir");
        // The background child inherits the output pipes and keeps them
        // open long after the parent exits.
        let exe = fake_generator(dir.path(), "sleep 60 &\nexit 0");
        let cmd = command_for(exe, dir.path().to_path_buf());
        let (stop, pause) = flags();

        let started = Instant::now();
        let outcome = supervise(&cmd, &job(dir.path()), &stop, &pause).expect("supervise");
        assert!(outcome.canceled, "stream timeout counts as cancellation");
        assert!(!outcome.succeeded);
        assert!(
            started.elapsed() >= STREAM_CLOSE_TIMEOUT,
            "close bound must actually be waited out, took {:?}",
            started.elapsed()
        );
        assert!(
            started.elapsed() < Duration::from_secs(9),
            "both streams share one close bound, took {:?}",
            started.elapsed()
        );
    }

    #[test]
    fn prereq_check_requires_exe_and_data_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let gen_dir = dir.path().join("gen");
        std::fs::create_dir_all(&gen_dir).expect("mkdir");
        let config = RunConfig {
            input_dir: dir.path().to_path_buf(),
            output_dir: dir.path().to_path_buf(),
            recursive: false,
            preserve_structure: false,
            language: SynthLanguage::UsEnglish,
            gesture: None,
            text_source: TextSource::Filename,
            fixed_text: None,
            mapping_files: Vec::new(),
            generator_dir: gen_dir.clone(),
        };

        let err = check_generator_prereqs(&config).expect_err("no exe");
        assert!(matches!(err, LipError::MissingExecutable(_)), "got {err:?}");

        std::fs::write(gen_dir.join("LipGenerator.exe"), b"").expect("exe");
        let err = check_generator_prereqs(&config).expect_err("no data file");
        assert!(matches!(err, LipError::MissingDataFile(_)), "got {err:?}");

        std::fs::write(gen_dir.join("FonixData.cdf"), b"").expect("cdf");
        check_generator_prereqs(&config).expect("prereqs satisfied");
    }

    #[test]
    fn command_exists_for_known_and_absent_binaries() {
        assert!(command_exists("ls"));
        assert!(!command_exists("definitely_not_a_real_binary_xyz_99999"));
    }
}

use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::ScoreError;
use crate::models::{ProposalBox, SourceImage};
use crate::proposals::{ProposalGenerator, ScorerParams};

/// How the four integers on each output line are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoxFormat {
    /// `x, y, width, height`
    #[default]
    Xywh,
    /// `x1, y1, x2, y2`, the layout raw BING windows come in.
    Corners,
}

/// Settings for driving an external scorer executable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CommandSettings {
    pub program: String,
    /// Argument templates. `{image}`, `{model_dir}`, `{base}`, `{window}` and
    /// `{nss}` are substituted per call.
    pub args: Vec<String>,
    pub box_format: BoxFormat,
    pub timeout_secs: Option<u64>,
    /// Exit status the scorer uses to say its model failed to load.
    pub unready_exit_code: i32,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            program: String::new(),
            args: vec![
                "{image}".to_string(),
                "{model_dir}".to_string(),
                "{base}".to_string(),
                "{window}".to_string(),
                "{nss}".to_string(),
            ],
            box_format: BoxFormat::default(),
            timeout_secs: None,
            unready_exit_code: 3,
        }
    }
}

/// Scorer backed by an external program, run once per image.
///
/// The program prints one box per line on stdout. Exit status 0 means the
/// boxes are valid; `unready_exit_code` means the model is missing.
pub struct CommandGenerator {
    settings: CommandSettings,
    model_dir: PathBuf,
    params: ScorerParams,
    unready: AtomicBool,
}

impl CommandGenerator {
    pub fn new(
        settings: CommandSettings,
        model_dir: impl Into<PathBuf>,
        params: ScorerParams,
    ) -> Self {
        let model_dir = model_dir.into();
        let unready = !model_dir_has_assets(&model_dir);
        if unready {
            warn!(
                "Model directory {} is missing or empty; scorer will report unready",
                model_dir.display()
            );
        }

        Self {
            settings,
            model_dir,
            params,
            unready: AtomicBool::new(unready),
        }
    }

    pub fn settings(&self) -> &CommandSettings {
        &self.settings
    }

    /// Expand the argument templates for one image.
    pub fn command_args(&self, image_path: &Path) -> Vec<String> {
        self.settings
            .args
            .iter()
            .map(|arg| {
                arg.replace("{image}", &image_path.display().to_string())
                    .replace("{model_dir}", &self.model_dir.display().to_string())
                    .replace("{base}", &self.params.base.to_string())
                    .replace("{window}", &self.params.window.to_string())
                    .replace("{nss}", &self.params.nss.to_string())
            })
            .collect()
    }

    fn run(&self, image_path: &Path) -> Result<(ExitStatus, String, String), ScoreError> {
        let mut child = Command::new(&self.settings.program)
            .args(self.command_args(image_path))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ScoreError::Spawn {
                program: self.settings.program.clone(),
                source,
            })?;

        // Drain both pipes on their own threads so a chatty scorer can't block on a full pipe.
        let stdout = child.stdout.take().map(spawn_reader);
        let stderr = child.stderr.take().map(spawn_reader);

        let waited = match self.settings.timeout_secs {
            Some(secs) => wait_with_deadline(&mut child, Duration::from_secs(secs)),
            None => child.wait().map_err(ScoreError::from),
        };
        let status = match waited {
            Ok(status) => status,
            Err(e) => {
                // Not joined: a grandchild may still hold the pipes open. Each reader
                // ends on its own once the last writer closes its end.
                drop(stdout);
                drop(stderr);
                return Err(e);
            }
        };

        let stdout = join_reader(stdout)?;
        let stderr = join_reader(stderr)?;
        Ok((status, stdout, stderr))
    }
}

impl ProposalGenerator for CommandGenerator {
    fn propose(&self, source: &SourceImage) -> Result<Vec<ProposalBox>, ScoreError> {
        if self.is_unready() {
            return Err(ScoreError::rejected("model assets not loaded"));
        }

        let (status, stdout, stderr) = self.run(&source.path)?;
        for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
            debug!("[{}] {}", self.settings.program, line);
        }

        match status.code() {
            Some(0) => Ok(parse_boxes(&stdout, self.settings.box_format)),
            Some(code) if code == self.settings.unready_exit_code => {
                self.unready.store(true, Ordering::SeqCst);
                Err(ScoreError::rejected(format!(
                    "scorer exited with {} (model not loaded)",
                    code
                )))
            }
            Some(code) => Err(ScoreError::rejected(format!("scorer exited with {}", code))),
            None => Err(ScoreError::rejected("scorer terminated by signal")),
        }
    }

    fn is_unready(&self) -> bool {
        self.unready.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        &self.settings.program
    }
}

/// Parse scorer output into boxes, keeping line order as rank order.
///
/// Blank lines and `#` comments are ignored; malformed lines are logged and dropped.
pub fn parse_boxes(output: &str, format: BoxFormat) -> Vec<ProposalBox> {
    let mut boxes = Vec::new();

    for (line_no, line) in output.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let values: Result<Vec<i32>, _> = line
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .map(str::parse::<i32>)
            .collect();

        match values.as_deref() {
            Ok([a, b, c, d]) => boxes.push(match format {
                BoxFormat::Xywh => ProposalBox::new(*a, *b, *c, *d),
                BoxFormat::Corners => ProposalBox::from_corners(*a, *b, *c, *d),
            }),
            Ok(other) => warn!(
                "Scorer output line {}: expected 4 values, got {} ({})",
                line_no + 1,
                other.len(),
                line
            ),
            Err(e) => warn!("Scorer output line {}: {} ({})", line_no + 1, e, line),
        }
    }

    boxes
}

fn model_dir_has_assets(dir: &Path) -> bool {
    match std::fs::read_dir(dir) {
        Ok(mut entries) => entries.next().is_some(),
        Err(_) => false,
    }
}

fn spawn_reader<R>(mut pipe: R) -> thread::JoinHandle<std::io::Result<String>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = Vec::new();
        pipe.read_to_end(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    })
}

fn join_reader(
    handle: Option<thread::JoinHandle<std::io::Result<String>>>,
) -> Result<String, ScoreError> {
    match handle {
        Some(handle) => handle
            .join()
            .map_err(|_| ScoreError::Output("pipe reader thread panicked".to_string()))?
            .map_err(ScoreError::from),
        None => Ok(String::new()),
    }
}

fn wait_with_deadline(child: &mut Child, timeout: Duration) -> Result<ExitStatus, ScoreError> {
    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if started.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ScoreError::TimedOut(timeout));
        }
        thread::sleep(Duration::from_millis(10));
    }
}

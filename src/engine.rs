use std::fs;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use log::{debug, info, warn};
use serde::Deserialize;
use thiserror::Error;

use crate::chart::ChartRecord;

const PLANETS_SECTION: &str = "[planets]";
const HOUSES_SECTION: &str = "[houses]";
const ASPECTS_SECTION: &str = "[aspects]";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no calculation engine configured; set `engine` in the config file")]
    Unconfigured,
    #[error("failed to start engine '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("engine '{program}' exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("failed to read engine output {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("engine I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode chart for engine: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("malformed engine output: {0}")]
    Malformed(String),
}

/// Raw description text for one chart, as rendered by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChartDescription {
    pub planets: Vec<String>,
    /// House table including its header line.
    pub houses: String,
    pub aspects: Vec<String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Planets,
    Houses,
    Aspects,
}

impl ChartDescription {
    /// Splits engine output into `[planets]`, `[houses]` and `[aspects]` sections.
    pub fn from_sectioned_text(text: &str) -> Result<Self, EngineError> {
        let mut description = Self::default();
        let mut house_lines = Vec::new();
        let mut section = None;
        let mut saw_houses = false;

        for line in text.lines() {
            match line.trim() {
                PLANETS_SECTION => {
                    section = Some(Section::Planets);
                    continue;
                }
                HOUSES_SECTION => {
                    section = Some(Section::Houses);
                    saw_houses = true;
                    continue;
                }
                ASPECTS_SECTION => {
                    section = Some(Section::Aspects);
                    continue;
                }
                _ => {}
            }

            match section {
                Some(Section::Houses) => house_lines.push(line),
                Some(_) if line.trim().is_empty() => {}
                Some(Section::Planets) => description.planets.push(line.to_owned()),
                Some(Section::Aspects) => description.aspects.push(line.to_owned()),
                None if line.trim().is_empty() => {}
                None => {
                    return Err(EngineError::Malformed(format!(
                        "line outside of any section: {line:?}"
                    )))
                }
            }
        }

        if !saw_houses {
            return Err(EngineError::Malformed(format!(
                "missing {HOUSES_SECTION} section"
            )));
        }
        description.houses = house_lines.join("\n");
        Ok(description)
    }
}

/// The external calculation engine: takes chart parameters, returns text.
pub trait DescriptionEngine {
    fn describe(&mut self, chart: &ChartRecord) -> Result<ChartDescription, EngineError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum EngineConfig {
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
    Fixture {
        path: PathBuf,
    },
}

pub fn engine_from_config(
    config: Option<&EngineConfig>,
) -> Result<Box<dyn DescriptionEngine>, EngineError> {
    match config {
        Some(EngineConfig::Command { program, args }) => {
            Ok(Box::new(CommandEngine::new(program.clone(), args.clone())))
        }
        Some(EngineConfig::Fixture { path }) => Ok(Box::new(FixtureEngine::new(path.clone()))),
        None => Err(EngineError::Unconfigured),
    }
}

/// Runs an external program: chart JSON on stdin, sectioned text on stdout.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
}

impl CommandEngine {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl DescriptionEngine for CommandEngine {
    fn describe(&mut self, chart: &ChartRecord) -> Result<ChartDescription, EngineError> {
        let payload = serde_json::to_vec(chart.data())?;
        debug!("invoking engine '{}' for '{}'", self.program, chart.name());

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| EngineError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(error) = stdin.write_all(&payload) {
                if error.kind() != ErrorKind::BrokenPipe {
                    if let Err(kill_error) = child.kill() {
                        warn!("failed to stop engine '{}': {}", self.program, kill_error);
                    }
                    child.wait()?;
                    return Err(error.into());
                }
                debug!("engine '{}' closed stdin before reading the chart", self.program);
            }
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(EngineError::Failed {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }

        let text = String::from_utf8(output.stdout)
            .map_err(|_| EngineError::Malformed("engine output is not UTF-8".to_owned()))?;
        ChartDescription::from_sectioned_text(&text)
    }
}

/// Serves a recorded engine transcript from disk, whatever the chart.
#[derive(Debug, Clone)]
pub struct FixtureEngine {
    path: PathBuf,
}

impl FixtureEngine {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DescriptionEngine for FixtureEngine {
    fn describe(&mut self, chart: &ChartRecord) -> Result<ChartDescription, EngineError> {
        info!(
            "describing '{}' from fixture {}",
            chart.name(),
            self.path.display()
        );
        let text = fs::read_to_string(&self.path).map_err(|source| EngineError::Read {
            path: self.path.clone(),
            source,
        })?;
        ChartDescription::from_sectioned_text(&text)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::{
        engine_from_config, ChartDescription, CommandEngine, DescriptionEngine, EngineConfig,
        EngineError,
    };
    use crate::chart::{ChartData, ChartRecord};

    const TRANSCRIPT: &str = "\
[planets]
Sun         23          Leo         15          VII

Moon     4     Aries     2     III
[houses]
Houses:
I     14   Aries   3
II    10   Taurus  59
[aspects]
Opposition Sun-Moon
Sextile Mars-Venus
";

    #[test]
    fn sections_split_into_description_parts() {
        let description = ChartDescription::from_sectioned_text(TRANSCRIPT).expect("parse");
        assert_eq!(description.planets.len(), 2);
        assert_eq!(description.planets[1], "Moon     4     Aries     2     III");
        assert_eq!(
            description.houses,
            "Houses:\nI     14   Aries   3\nII    10   Taurus  59"
        );
        assert_eq!(description.aspects, vec!["Opposition Sun-Moon", "Sextile Mars-Venus"]);
    }

    #[test]
    fn missing_house_section_is_malformed() {
        let error = ChartDescription::from_sectioned_text("[planets]\nSun 1 Leo 2 I\n")
            .expect_err("houses are required");
        assert!(matches!(error, EngineError::Malformed(_)));
    }

    #[test]
    fn text_before_first_section_is_malformed() {
        assert!(ChartDescription::from_sectioned_text("stray\n[houses]\nH\n").is_err());
    }

    #[test]
    fn missing_engine_config_is_unconfigured() {
        assert!(matches!(engine_from_config(None), Err(EngineError::Unconfigured)));
    }

    #[cfg(unix)]
    fn shell(script: &str, args: &[&str]) -> CommandEngine {
        let mut all = vec!["-c".to_owned(), script.to_owned(), "engine".to_owned()];
        all.extend(args.iter().map(|arg| (*arg).to_owned()));
        CommandEngine::new("sh", all)
    }

    #[cfg(unix)]
    #[test]
    fn command_engine_reads_chart_on_stdin_and_parses_stdout() {
        let dir = tempdir().expect("tempdir should create");
        let received = dir.path().join("stdin.json");
        let received_arg = received.to_string_lossy().into_owned();
        let script = concat!(
            "cat > \"$1\"; printf '",
            "[planets]\\nSun   23   Leo   15   VII\\n",
            "[houses]\\nHouses:\\nI   14   Aries   3\\n",
            "[aspects]\\nTrine Sun-Moon\\n'",
        );
        let mut engine = shell(script, &[&received_arg]);
        let mut record = ChartRecord::new("natal");
        record.set_timezone_offset(-3);

        let description = engine.describe(&record).expect("engine should succeed");
        assert_eq!(description.planets, vec!["Sun   23   Leo   15   VII"]);
        assert_eq!(description.houses, "Houses:\nI   14   Aries   3");
        assert_eq!(description.aspects, vec!["Trine Sun-Moon"]);

        let chart: ChartData =
            serde_json::from_str(&fs::read_to_string(&received).expect("stdin captured"))
                .expect("stdin should carry chart json");
        assert_eq!(&chart, record.data());
    }

    #[cfg(unix)]
    #[test]
    fn command_engine_nonzero_exit_is_failure() {
        let mut engine = shell("echo 'no ephemeris' >&2; exit 3", &[]);
        let error = engine
            .describe(&ChartRecord::new("natal"))
            .expect_err("exit 3 should fail");
        match error {
            EngineError::Failed { program, stderr, .. } => {
                assert_eq!(program, "sh");
                assert_eq!(stderr, "no ephemeris");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn command_engine_missing_program_is_spawn_error() {
        let mut engine = CommandEngine::new("zodiac-engine-that-does-not-exist", Vec::new());
        let error = engine
            .describe(&ChartRecord::new("natal"))
            .expect_err("spawn should fail");
        assert!(matches!(error, EngineError::Spawn { .. }));
    }

    #[test]
    fn engine_config_parses_tagged_yaml() {
        let config: EngineConfig =
            serde_yaml::from_str("kind: command\nprogram: astro-describe\nargs: [--text]\n")
                .expect("config should parse");
        assert_eq!(
            config,
            EngineConfig::Command {
                program: "astro-describe".to_owned(),
                args: vec!["--text".to_owned()],
            }
        );
    }
}

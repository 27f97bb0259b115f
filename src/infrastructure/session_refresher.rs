use crate::infrastructure::error::InfraError;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Blocking action that renews the stored browser session.
///
/// `Ok(true)` means the session store was rewritten, `Ok(false)` that the
/// action ran but reported failure. Callers on an async runtime must run this
/// off the executor.
pub trait SessionRefresher: Send + Sync {
    fn refresh(&self) -> Result<bool, InfraError>;
}

/// Runs an external program (typically a headless-browser script) and reads
/// its exit status.
#[derive(Debug, Clone)]
pub struct CommandSessionRefresher {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandSessionRefresher {
    /// `command` is the program followed by its arguments.
    pub fn from_command_line(command: &[String]) -> Result<Self, InfraError> {
        let (program, args) = command
            .split_first()
            .filter(|(program, _)| !program.trim().is_empty())
            .ok_or_else(|| {
                InfraError::Refresh("no refresh command configured (session.refreshCommand)".to_string())
            })?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            working_dir: None,
        })
    }

    pub fn with_working_dir(mut self, working_dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(working_dir.into());
        self
    }
}

impl SessionRefresher for CommandSessionRefresher {
    fn refresh(&self) -> Result<bool, InfraError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let output = command.output().map_err(|error| {
            InfraError::Refresh(format!("failed to launch '{}': {error}", self.program))
        })?;
        if output.status.success() {
            tracing::info!(program = %self.program, "session refresh command succeeded");
            return Ok(true);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        tracing::debug!(
            program = %self.program,
            status = ?output.status.code(),
            stderr = %stderr.trim(),
            "session refresh command reported failure"
        );
        Ok(false)
    }
}

/// Refresher for deployments without a refresh action; every call fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledSessionRefresher;

impl SessionRefresher for DisabledSessionRefresher {
    fn refresh(&self) -> Result<bool, InfraError> {
        Err(InfraError::Refresh(
            "no refresh command configured (session.refreshCommand)".to_string(),
        ))
    }
}

/// Refresher chosen from configuration: the external command when one is set.
#[derive(Debug, Clone)]
pub enum ConfiguredRefresher {
    Command(CommandSessionRefresher),
    Disabled(DisabledSessionRefresher),
}

impl ConfiguredRefresher {
    pub fn from_settings(command: &[String], working_dir: impl Into<PathBuf>) -> Self {
        match CommandSessionRefresher::from_command_line(command) {
            Ok(refresher) => ConfiguredRefresher::Command(refresher.with_working_dir(working_dir)),
            Err(_) => ConfiguredRefresher::Disabled(DisabledSessionRefresher),
        }
    }
}

impl SessionRefresher for ConfiguredRefresher {
    fn refresh(&self) -> Result<bool, InfraError> {
        match self {
            ConfiguredRefresher::Command(refresher) => refresher.refresh(),
            ConfiguredRefresher::Disabled(refresher) => refresher.refresh(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|part| part.to_string()).collect()
    }

    #[test]
    fn empty_command_line_is_rejected() {
        assert!(matches!(
            CommandSessionRefresher::from_command_line(&[]),
            Err(InfraError::Refresh(_))
        ));
        assert!(CommandSessionRefresher::from_command_line(&command(&["  "])).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn exit_status_maps_to_refresh_result() {
        let ok = CommandSessionRefresher::from_command_line(&command(&["sh", "-c", "exit 0"]))
            .expect("build refresher");
        assert!(ok.refresh().expect("run"));

        let failed = CommandSessionRefresher::from_command_line(&command(&["sh", "-c", "exit 3"]))
            .expect("build refresher");
        assert!(!failed.refresh().expect("run"));
    }

    #[test]
    fn missing_program_is_refresh_error() {
        let refresher =
            CommandSessionRefresher::from_command_line(&command(&["roomboard-no-such-program"]))
                .expect("build refresher");
        assert!(matches!(refresher.refresh(), Err(InfraError::Refresh(_))));
    }

    #[test]
    fn disabled_refresher_always_fails() {
        assert!(DisabledSessionRefresher.refresh().is_err());
    }

    #[test]
    fn configured_refresher_falls_back_to_disabled() {
        assert!(matches!(
            ConfiguredRefresher::from_settings(&[], "."),
            ConfiguredRefresher::Disabled(_)
        ));
        assert!(matches!(
            ConfiguredRefresher::from_settings(&command(&["true"]), "."),
            ConfiguredRefresher::Command(_)
        ));
    }
}

//! Locating and invoking the external binaries the harness drives.

use std::env;
use std::ffi::{OsStr, OsString};
use std::path::PathBuf;

use crate::error::{HarnessError, HarnessResult};

/// An external tool with an environment variable that can override where it is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tool {
    /// Environment variable holding an explicit path to the tool.
    pub env_var: &'static str,
    /// Name looked up on the user's `PATH` when the environment variable is not set.
    pub default_name: &'static str,
}

/// The differential-application engine.
pub const DELTA_GENERATOR: Tool = Tool {
    env_var: "OTA_DELTA_GENERATOR",
    default_name: "delta_generator",
};

/// The sparse-to-raw image converter.
pub const SIMG2IMG: Tool = Tool {
    env_var: "OTA_SIMG2IMG",
    default_name: "simg2img",
};

/// The remote device shell.
pub const ADB: Tool = Tool {
    env_var: "OTA_ADB",
    default_name: "adb",
};

/// The script that installs an update package onto a device.
pub const UPDATE_DEVICE: Tool = Tool {
    env_var: "OTA_UPDATE_DEVICE",
    default_name: "update_device.py",
};

/// Interpreter that runs [`UPDATE_DEVICE`].
pub const PYTHON: Tool = Tool {
    env_var: "OTA_PYTHON",
    default_name: "python3",
};

impl Tool {
    /// Resolve the path to this tool.
    ///
    /// An explicit path (usually from a CLI flag) wins, then the tool's environment variable, then
    /// a lookup of [`Tool::default_name`] on the user's `PATH`.
    pub fn resolve(&self, explicit: Option<PathBuf>) -> HarnessResult<PathBuf> {
        match explicit {
            Some(path) => self.check_exists(path, "given on the command line"),
            None => self.resolve_from(env::var(self.env_var).ok()),
        }
    }

    fn resolve_from(&self, env_value: Option<String>) -> HarnessResult<PathBuf> {
        let env_var = self.env_var;
        match env_value.as_deref() {
            Some("") => Err(HarnessError::ToolNotFound(format!(
                "'{env_var}' set to empty string"
            ))),
            Some(name) if name == self.default_name => self.lookup_on_path(),
            None => self.lookup_on_path(),
            Some(path) => self.check_exists(PathBuf::from(path), &format!("set by '{env_var}'")),
        }
    }

    fn lookup_on_path(&self) -> HarnessResult<PathBuf> {
        log::debug!(
            "'{}' is not set so looking for '{}' in user's 'PATH'",
            self.env_var,
            self.default_name
        );
        which::which(self.default_name).map_err(|e| {
            HarnessError::ToolNotFound(format!(
                "'{}' not found in PATH ({e}). Install it or set '{}' to the correct path.",
                self.default_name, self.env_var
            ))
        })
    }

    fn check_exists(&self, path: PathBuf, source: &str) -> HarnessResult<PathBuf> {
        if !path.exists() {
            return Err(HarnessError::ToolNotFound(format!(
                "Path to '{}' {source} is '{}' but that path doesn't exist",
                self.default_name,
                path.display()
            )));
        }
        Ok(path)
    }
}

/// A program plus the arguments that always precede the per-call arguments, e.g. an interpreter
/// and the script it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    program: PathBuf,
    leading_args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn with_arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.leading_args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn with_env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.envs
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    pub fn leading_args(&self) -> &[OsString] {
        &self.leading_args
    }

    pub fn envs(&self) -> &[(OsString, OsString)] {
        &self.envs
    }

    /// A blocking [`std::process::Command`] with the leading arguments and environment applied.
    pub fn command(&self) -> std::process::Command {
        let mut cmd = std::process::Command::new(&self.program);
        cmd.args(&self.leading_args);
        cmd.envs(self.envs.iter().map(|(k, v)| (k, v)));
        cmd
    }

    /// Human readable rendering used in logs and error messages.
    pub fn display_with<I, S>(&self, args: I) -> String
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        std::iter::once(self.program.as_os_str().to_os_string())
            .chain(self.leading_args.iter().cloned())
            .chain(args.into_iter().map(|a| a.as_ref().to_os_string()))
            .map(|a| a.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

//! Launcher scripts that swap executables after this process exits
//!
//! A [`RelaunchDescriptor`] says what to move and what to start; a
//! [`LauncherScript`] renders it for one platform. The script runs detached
//! and:
//!
//! 1. moves the old executable into the backup directory, retrying every
//!    second until the file is released
//! 2. copies the new executable into place when `copy_new` is set
//! 3. waits up to 60 s for the service port to stop listening
//! 4. waits for the old process id to disappear
//! 5. starts the new executable from its own directory
//! 6. deletes itself
//!
//! Without a `new_exe` only step 1 and step 6 are rendered (move-on-exit).

use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::constants::PORT_RELEASE_WAIT_SECS;

/// Everything a launcher script is parameterized by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaunchDescriptor {
    pub install_dir: PathBuf,
    pub backup_dir: PathBuf,
    /// Executable to move out of the way; `None` skips the move
    pub old_exe: Option<PathBuf>,
    /// Where `old_exe` goes
    pub backup_dest: Option<PathBuf>,
    /// Executable to start; `None` renders a move-only script
    pub new_exe: Option<PathBuf>,
    /// Process to wait for
    pub pid: u32,
    /// Port to wait for
    pub port: u16,
    /// Copy `new_exe` into `install_dir` and start the copy
    pub copy_new: bool,
}

impl RelaunchDescriptor {
    /// The path the script starts.
    #[must_use]
    pub fn launch_path(&self) -> Option<PathBuf> {
        let new_exe = self.new_exe.as_ref()?;
        if self.copy_new {
            new_exe.file_name().map(|name| self.install_dir.join(name))
        } else {
            Some(new_exe.clone())
        }
    }

    fn move_pair(&self) -> Option<(&Path, &Path)> {
        Some((self.old_exe.as_deref()?, self.backup_dest.as_deref()?))
    }
}

/// Renders and starts a launcher script on one platform.
pub trait LauncherScript: Send + Sync {
    /// File extension, including the dot.
    fn extension(&self) -> &'static str;

    /// Script text for `descriptor`.
    fn render(&self, descriptor: &RelaunchDescriptor) -> String;

    /// Command that runs `script` detached from this process.
    fn command(&self, script: &Path) -> Command;
}

/// `cmd.exe` batch file.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsBatch;

/// POSIX `sh` script.
#[derive(Debug, Clone, Copy, Default)]
pub struct PosixShell;

/// The strategy for the host platform.
#[must_use]
pub fn platform_launcher() -> Box<dyn LauncherScript> {
    if cfg!(windows) {
        Box::new(WindowsBatch)
    } else {
        Box::new(PosixShell)
    }
}

impl LauncherScript for WindowsBatch {
    fn extension(&self) -> &'static str {
        ".bat"
    }

    fn render(&self, d: &RelaunchDescriptor) -> String {
        let mut s = String::from("@echo off\r\nsetlocal enabledelayedexpansion\r\n");
        s.push_str(&format!("cd /d \"{}\"\r\n", d.install_dir.display()));
        s.push_str(&format!(
            "if not exist \"{0}\" mkdir \"{0}\"\r\n",
            d.backup_dir.display()
        ));

        if let Some((old, dest)) = d.move_pair() {
            let old = old.display();
            s.push_str(":WAIT_LOOP\r\ntimeout /t 1 /nobreak >nul\r\n");
            s.push_str(&format!("if exist \"{old}\" (\r\n"));
            s.push_str(&format!("    move /y \"{old}\" \"{}\" >nul\r\n", dest.display()));
            s.push_str(&format!("    if exist \"{old}\" goto WAIT_LOOP\r\n)\r\n"));
        }

        if let (Some(new_exe), Some(launch)) = (&d.new_exe, d.launch_path()) {
            if d.copy_new {
                s.push_str(&format!(
                    "copy /y \"{}\" \"{}\" >nul\r\n",
                    new_exe.display(),
                    launch.display()
                ));
            }
            s.push_str("set /a PORT_WAIT=0\r\n:WAIT_PORT\r\n");
            s.push_str(&format!(
                "netstat -ano | findstr /R /C:\":{} .*LISTENING\" >nul\r\n",
                d.port
            ));
            s.push_str("if %ERRORLEVEL%==0 (\r\n    set /a PORT_WAIT+=1\r\n");
            s.push_str(&format!(
                "    if !PORT_WAIT! GEQ {PORT_RELEASE_WAIT_SECS} goto WAIT_PID\r\n"
            ));
            s.push_str("    timeout /t 1 /nobreak >nul\r\n    goto WAIT_PORT\r\n)\r\n");
            s.push_str(":WAIT_PID\r\n");
            s.push_str(&format!(
                "tasklist /FI \"PID eq {0}\" 2>nul | findstr /R /C:\" {0} \" >nul\r\n",
                d.pid
            ));
            s.push_str(
                "if %ERRORLEVEL%==0 (\r\n    timeout /t 1 /nobreak >nul\r\n    goto WAIT_PID\r\n)\r\n",
            );
            let dir = launch.parent().unwrap_or(&d.install_dir);
            s.push_str(&format!(
                "start \"\" /D \"{}\" \"{}\"\r\n",
                dir.display(),
                launch.display()
            ));
        }

        s.push_str("del \"%~f0\"\r\n");
        s
    }

    fn command(&self, script: &Path) -> Command {
        let mut cmd = Command::new("cmd");
        cmd.arg("/c").arg(script);
        cmd
    }
}

/// Single-quotes `path` for `sh`.
fn sh_quote(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', r"'\''"))
}

impl LauncherScript for PosixShell {
    fn extension(&self) -> &'static str {
        ".sh"
    }

    fn render(&self, d: &RelaunchDescriptor) -> String {
        let mut s = String::from("#!/bin/sh\n");
        s.push_str(&format!("cd {} || exit 1\n", sh_quote(&d.install_dir)));
        s.push_str(&format!("mkdir -p {}\n", sh_quote(&d.backup_dir)));

        if let Some((old, dest)) = d.move_pair() {
            let old = sh_quote(old);
            s.push_str(&format!("while [ -e {old} ]; do\n"));
            s.push_str(&format!("    mv -f {old} {} 2>/dev/null && break\n", sh_quote(dest)));
            s.push_str("    sleep 1\ndone\n");
        }

        if let (Some(new_exe), Some(launch)) = (&d.new_exe, d.launch_path()) {
            if d.copy_new {
                s.push_str(&format!("cp -f {} {}\n", sh_quote(new_exe), sh_quote(&launch)));
                s.push_str(&format!("chmod +x {}\n", sh_quote(&launch)));
            }
            s.push_str("port_busy() {\n");
            s.push_str(&format!(
                "    if command -v ss >/dev/null 2>&1; then ss -ltn 2>/dev/null | grep -q ':{} '\n",
                d.port
            ));
            s.push_str(&format!(
                "    elif command -v lsof >/dev/null 2>&1; then lsof -iTCP:{} -sTCP:LISTEN >/dev/null 2>&1\n",
                d.port
            ));
            s.push_str("    else return 1; fi\n}\n");
            s.push_str("PORT_WAIT=0\n");
            s.push_str(&format!(
                "while port_busy && [ \"$PORT_WAIT\" -lt {PORT_RELEASE_WAIT_SECS} ]; do\n"
            ));
            s.push_str("    PORT_WAIT=$((PORT_WAIT + 1))\n    sleep 1\ndone\n");
            s.push_str(&format!("while kill -0 {} 2>/dev/null; do\n    sleep 1\ndone\n", d.pid));
            let dir = launch.parent().unwrap_or(&d.install_dir);
            s.push_str(&format!(
                "cd {} && nohup {} >/dev/null 2>&1 &\n",
                sh_quote(dir),
                sh_quote(&launch)
            ));
        }

        s.push_str("rm -f \"$0\"\n");
        s
    }

    fn command(&self, script: &Path) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg(script);
        cmd
    }
}

/// Writes `content` to a fresh `<prefix>*<extension>` file in `preferred_dir`,
/// falling back to the temp directory.
pub fn write_script(preferred_dir: &Path, prefix: &str, extension: &str, content: &str) -> Result<PathBuf> {
    let mut last_error = None;
    for dir in [preferred_dir.to_path_buf(), std::env::temp_dir()] {
        let attempt = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(extension)
            .tempfile_in(&dir)
            .and_then(|mut file| {
                file.write_all(content.as_bytes())?;
                file.flush()?;
                file.keep().map_err(|e| e.error)
            });
        match attempt {
            Ok((_, path)) => return Ok(path),
            Err(e) => {
                tracing::debug!("Cannot write launcher script in {}: {}", dir.display(), e);
                last_error = Some(e);
            }
        }
    }

    Err(last_error.map_or_else(
        || anyhow::anyhow!("Failed to create launcher script"),
        |e| anyhow::Error::new(e).context("Failed to create launcher script"),
    ))
}

/// Starts `script` detached.
pub fn start_script(launcher: &dyn LauncherScript, script: &Path) -> Result<()> {
    launcher
        .command(script)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .with_context(|| format!("Failed to start launcher script {}", script.display()))?;
    Ok(())
}

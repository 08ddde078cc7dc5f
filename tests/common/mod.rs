//! Shared fixtures for the reforge integration tests
//!
//! [`Installation`] lays out a complete service installation on top of the
//! library's [`UpstreamFixture`]: an install directory with a "running"
//! executable, a source checkout, and launcher/exit doubles so nothing is
//! ever really relaunched.

// Not every test file uses every helper.
#![allow(dead_code)]

use anyhow::Result;
use futures::future::BoxFuture;
use reforge::config::{AssetEntry, UpdaterConfig};
use reforge::github::{PrCommit, PullRequest, PullRequestSource};
use reforge::relaunch::{LauncherScript, ProcessExit, RelaunchDescriptor, platform_launcher};
use reforge::service::UpdaterService;
use reforge::test_utils::UpstreamFixture;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Renders scripts like the host launcher but never runs them.
pub struct InertLauncher;

impl LauncherScript for InertLauncher {
    fn extension(&self) -> &'static str {
        platform_launcher().extension()
    }

    fn render(&self, descriptor: &RelaunchDescriptor) -> String {
        platform_launcher().render(descriptor)
    }

    fn command(&self, _script: &Path) -> std::process::Command {
        if cfg!(windows) {
            let mut cmd = std::process::Command::new("cmd");
            cmd.args(["/c", "exit", "0"]);
            cmd
        } else {
            std::process::Command::new("true")
        }
    }
}

/// Records the exit code instead of exiting.
pub struct RecordingExit {
    code: AtomicI32,
}

impl RecordingExit {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            code: AtomicI32::new(-1),
        })
    }

    /// `None` until the exit hook was called.
    pub fn code(&self) -> Option<i32> {
        match self.code.load(Ordering::SeqCst) {
            -1 => None,
            code => Some(code),
        }
    }
}

impl ProcessExit for RecordingExit {
    fn exit(&self, code: i32) {
        self.code.store(code, Ordering::SeqCst);
    }
}

/// In-memory PR metadata. Commit lists are registered per PR number.
#[derive(Default)]
pub struct MemorySource {
    prs: Mutex<Vec<PullRequest>>,
    commits: Mutex<HashMap<u64, Vec<PrCommit>>>,
}

impl MemorySource {
    pub fn add_pr(&self, number: u64, title: &str, hashes: &[String]) {
        let pr: PullRequest = serde_json::from_value(serde_json::json!({
            "number": number,
            "title": title,
            "state": "open",
            "created_at": "2024-03-01T10:00:00Z",
            "updated_at": "2024-03-02T10:00:00Z",
            "user": {"login": "contributor"},
            "head": {"sha": hashes.last().cloned().unwrap_or_default()},
        }))
        .expect("valid PR fixture");
        self.prs.lock().unwrap().push(pr);
        self.commits.lock().unwrap().insert(
            number,
            hashes.iter().map(|sha| PrCommit::new(sha.clone(), title)).collect(),
        );
    }
}

impl PullRequestSource for MemorySource {
    fn list_pull_requests<'a>(
        &'a self,
        _state: &'a str,
        _per_page: u32,
    ) -> BoxFuture<'a, Result<Vec<PullRequest>>> {
        let prs = self.prs.lock().unwrap().clone();
        Box::pin(async move { Ok(prs) })
    }

    fn pull_request_commits(&self, number: u64) -> BoxFuture<'_, Result<Vec<PrCommit>>> {
        let commits = self.commits.lock().unwrap().get(&number).cloned();
        Box::pin(async move {
            commits.ok_or_else(|| anyhow::anyhow!("GitHub API returned status 404"))
        })
    }
}

/// Marks `path` executable on Unix.
pub fn make_executable(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
    #[cfg(not(unix))]
    let _ = path;
}

/// A throwaway installation wired to a local upstream.
pub struct Installation {
    pub temp: TempDir,
    pub fixture: UpstreamFixture,
    pub install_dir: PathBuf,
    pub running: PathBuf,
    pub source: Arc<MemorySource>,
    pub exit: Arc<RecordingExit>,
    pub config: UpdaterConfig,
}

impl Installation {
    pub fn new() -> Self {
        reforge::test_utils::init_test_logging(None);

        let temp = TempDir::new().unwrap();
        let fixture = UpstreamFixture::new(&temp.path().join("git")).unwrap();
        let install_dir = temp.path().join("install");
        std::fs::create_dir_all(&install_dir).unwrap();

        let running = install_dir.join(format!("service{}", std::env::consts::EXE_SUFFIX));
        std::fs::write(&running, "running build").unwrap();
        make_executable(&running);

        let mut config = fixture.config();
        config.assets.entries = vec![AssetEntry {
            source: "README.md".to_string(),
            dest: "README.md".to_string(),
            overwrite: true,
            optional: false,
        }];

        Self {
            temp,
            fixture,
            install_dir,
            running,
            source: Arc::new(MemorySource::default()),
            exit: RecordingExit::new(),
            config,
        }
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.install_dir.join("old_versions")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.install_dir.join("applied_prs.json")
    }

    /// Points the build at shell scripts standing in for the compiler and
    /// obfuscator. The fake build writes `built <commit>` to its output.
    #[cfg(unix)]
    pub fn fake_toolchain(&mut self) {
        let bin = self.temp.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();

        let compiler = bin.join("compiler");
        std::fs::write(&compiler, "#!/bin/sh\necho compiler 1.22\n").unwrap();
        make_executable(&compiler);

        let obfuscator = bin.join("obfuscator");
        std::fs::write(
            &obfuscator,
            "#!/bin/sh\nif [ \"$1\" = version ]; then echo obfuscator 0.14; exit 0; fi\n\
             printf 'built %s' \"$REFORGE_BUILD_COMMIT\" > \"$1\"\nchmod +x \"$1\"\n",
        )
        .unwrap();
        make_executable(&obfuscator);

        self.config.build.compiler = compiler.display().to_string();
        self.config.build.obfuscator = obfuscator.display().to_string();
        self.config.build.args = vec!["{output}".to_string()];
    }

    pub fn service(&self) -> UpdaterService {
        UpdaterService::builder(self.config.clone())
            .install_dir(&self.install_dir)
            .work_dir(self.fixture.local().repo_path())
            .running_executable(Some(self.running.clone()))
            .pull_requests(self.source.clone())
            .launcher(Box::new(InertLauncher))
            .process_exit(self.exit.clone())
            .grace_period(Duration::ZERO)
            .build()
            .unwrap()
    }

    /// Reads a tracked file from the source checkout.
    pub fn local_file(&self, name: &str) -> Option<String> {
        std::fs::read_to_string(self.fixture.local().repo_path().join(name)).ok()
    }
}

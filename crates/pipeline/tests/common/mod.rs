//! Scripted stand-ins for git, the metrics analyzer, test runners and the
//! remote services, so whole batches run without network or toolchains.

#![allow(dead_code)]

use async_trait::async_trait;
use repolens_common::{Error, Result};
use repolens_schema::canonical_repo_name;
use repolens_stages::{ArtifactStore, CommandOutput, CommandSpec, Executor, NarrativeBackend};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// How one scripted repository behaves.
#[derive(Debug, Clone, Default)]
pub struct RepoScript {
    pub files: Vec<(&'static str, &'static str)>,
    pub clone_stderr: Option<&'static str>,
    pub metrics: Option<Value>,
    pub test_stdout: &'static str,
    pub test_exit: i32,
    /// The metrics analyzer call panics instead of returning.
    pub panic_in_metrics: bool,
}

impl RepoScript {
    /// A well-kept Python project with passing tests and healthy metrics.
    pub fn healthy() -> Self {
        Self {
            files: vec![
                ("README.md", "# POT\n"),
                ("LICENSE", "MIT\n"),
                ("requirements.txt", "numpy\n"),
                ("tests/test_ot.py", "def test_ok():\n    pass\n"),
            ],
            clone_stderr: None,
            metrics: Some(healthy_metrics()),
            test_stdout: "============ test session starts ============\n\
                          collected 3 items\n\
                          tests/test_ot.py::test_a PASSED\n\
                          tests/test_ot.py::test_b PASSED\n\
                          tests/test_ot.py::test_c PASSED\n\
                          ============ 3 passed in 0.12s ============\n",
            test_exit: 0,
            panic_in_metrics: false,
        }
    }

    /// A repository with a README and nothing else.
    pub fn bare() -> Self {
        Self {
            files: vec![("README.md", "# TARGet\n")],
            clone_stderr: None,
            metrics: Some(bare_metrics()),
            test_stdout: "",
            test_exit: 0,
            panic_in_metrics: false,
        }
    }

    pub fn unreachable() -> Self {
        Self {
            clone_stderr: Some("fatal: repository 'x' not found"),
            ..Self::default()
        }
    }

    pub fn without_metrics(mut self) -> Self {
        self.metrics = None;
        self
    }

    pub fn panicking_metrics(mut self) -> Self {
        self.panic_in_metrics = true;
        self
    }
}

pub fn healthy_metrics() -> Value {
    json!([
        {"name": "repo-primary-license", "result": "MIT"},
        {"name": "repo-includes-readme", "result": true},
        {"name": "repo-includes-contributing", "result": true},
        {"name": "repo-includes-license", "result": true},
        {"name": "repo-includes-common-docs", "result": true},
        {"name": "repo-includes-examples", "result": true},
        {"name": "repo-gh-workflow-success-ratio", "result": 0.96},
        {"name": "repo-unique-contributors", "result": 42}
    ])
}

pub fn bare_metrics() -> Value {
    json!([
        {"name": "repo-primary-license", "result": "NOASSERTION"},
        {"name": "repo-includes-readme", "result": true},
        {"name": "repo-includes-contributing", "result": false},
        {"name": "repo-includes-license", "result": false},
        {"name": "repo-includes-common-docs", "result": false},
        {"name": "repo-includes-examples", "result": false},
        {"name": "repo-unique-contributors", "result": 1}
    ])
}

/// Executor that plays back a script per repository name.
#[derive(Default)]
pub struct ScriptedExecutor {
    repos: HashMap<String, RepoScript>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_repo(mut self, name: &str, script: RepoScript) -> Self {
        self.repos.insert(name.to_string(), script);
        self
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// Commands that mention `needle` in their program or arguments.
    pub fn calls_mentioning(&self, needle: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.display().contains(needle))
            .count()
    }

    fn script_for_path(&self, path: &Path) -> Option<&RepoScript> {
        let name = path.file_name()?.to_string_lossy();
        self.repos.get(name.as_ref())
    }

    fn clone_repo(&self, command: &CommandSpec) -> Result<CommandOutput> {
        let url = &command.args[4];
        let dest = PathBuf::from(&command.args[5]);
        let script = match self.repos.get(&canonical_repo_name(url)) {
            Some(script) => script,
            None => return Ok(exit(128, "", "fatal: could not resolve host")),
        };
        if let Some(stderr) = script.clone_stderr {
            return Ok(exit(128, "", stderr));
        }
        for (file, content) in &script.files {
            let path = dest.join(file);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, content)?;
        }
        std::fs::create_dir_all(&dest)?;
        Ok(exit(0, "", ""))
    }
}

fn exit(code: i32, stdout: &str, stderr: &str) -> CommandOutput {
    CommandOutput {
        exit_code: Some(code),
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn execute(&self, command: &CommandSpec) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(command.clone());

        match command.program.as_str() {
            "git" => self.clone_repo(command),
            "almanack" => {
                let script = command.args.last().and_then(|p| self.script_for_path(Path::new(p)));
                if script.is_some_and(|s| s.panic_in_metrics) {
                    panic!("metrics analyzer blew up");
                }
                match script.and_then(|s| s.metrics.as_ref()) {
                    Some(metrics) => Ok(exit(0, &format!("INFO computing metrics\n{}", metrics), "")),
                    None => Ok(exit(1, "", "Traceback: analysis failed")),
                }
            }
            "python3" if command.args.iter().any(|a| a == "pip") => Ok(exit(0, "", "")),
            "python3" => {
                let script = command.cwd.as_deref().and_then(|p| self.script_for_path(p));
                match script {
                    Some(s) => Ok(exit(s.test_exit, s.test_stdout, "")),
                    None => Ok(exit(5, "", "no tests ran")),
                }
            }
            other => Err(Error::CommandExecution {
                cmd: other.to_string(),
                reason: "not scripted".to_string(),
            }),
        }
    }
}

/// Wraps a [`ScriptedExecutor`] and holds every call open for a
/// per-repository delay, recording how many calls and how many distinct
/// repositories were in flight at once.
pub struct DelayingExecutor {
    inner: ScriptedExecutor,
    default_delay: Duration,
    delays: HashMap<String, Duration>,
    in_flight: AtomicUsize,
    peak_calls: AtomicUsize,
    busy_repos: Mutex<HashMap<String, usize>>,
    peak_repos: AtomicUsize,
    finished: Mutex<Vec<String>>,
}

impl DelayingExecutor {
    pub fn new(inner: ScriptedExecutor, default_delay: Duration) -> Self {
        Self {
            inner,
            default_delay,
            delays: HashMap::new(),
            in_flight: AtomicUsize::new(0),
            peak_calls: AtomicUsize::new(0),
            busy_repos: Mutex::new(HashMap::new()),
            peak_repos: AtomicUsize::new(0),
            finished: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, repo: &str, delay: Duration) -> Self {
        self.delays.insert(repo.to_string(), delay);
        self
    }

    /// Most executor calls running at the same time.
    pub fn peak_calls(&self) -> usize {
        self.peak_calls.load(Ordering::SeqCst)
    }

    /// Most distinct repositories with a call running at the same time.
    pub fn peak_repos(&self) -> usize {
        self.peak_repos.load(Ordering::SeqCst)
    }

    /// Repository of every finished call, in completion order.
    pub fn finished(&self) -> Vec<String> {
        self.finished.lock().unwrap().clone()
    }

    fn repo_of(command: &CommandSpec) -> String {
        if command.program == "git" {
            return canonical_repo_name(&command.args[4]);
        }
        command
            .cwd
            .as_deref()
            .or_else(|| command.args.last().map(Path::new))
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Executor for DelayingExecutor {
    async fn execute(&self, command: &CommandSpec) -> Result<CommandOutput> {
        let repo = Self::repo_of(command);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_calls.fetch_max(running, Ordering::SeqCst);
        {
            let mut busy = self.busy_repos.lock().unwrap();
            *busy.entry(repo.clone()).or_insert(0) += 1;
            self.peak_repos.fetch_max(busy.len(), Ordering::SeqCst);
        }

        let delay = self.delays.get(&repo).copied().unwrap_or(self.default_delay);
        tokio::time::sleep(delay).await;
        let result = self.inner.execute(command).await;

        {
            let mut busy = self.busy_repos.lock().unwrap();
            if let Some(count) = busy.get_mut(&repo) {
                *count -= 1;
                if *count == 0 {
                    busy.remove(&repo);
                }
            }
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.finished.lock().unwrap().push(repo);
        result
    }
}

/// Narrative backend that always answers with the same text.
pub struct CannedNarrative(pub &'static str);

pub const VALID_NARRATIVE: &str = r#"{
  "summary": "Well maintained optimal transport library.",
  "strengths": ["CI", "documentation"],
  "weaknesses": [],
  "recommendations": ["Keep going"],
  "readiness": "Ready"
}"#;

#[async_trait]
impl NarrativeBackend for CannedNarrative {
    fn name(&self) -> &'static str {
        "canned"
    }

    async fn complete(&self, input: &Value) -> Result<String> {
        assert!(input.get("rubric_report").is_some());
        Ok(self.0.to_string())
    }
}

/// In-memory folder tree.
#[derive(Default)]
pub struct MemoryStore {
    folders: Mutex<HashMap<(String, String), String>>,
    uploads: Mutex<Vec<(String, String)>>,
}

impl MemoryStore {
    pub fn uploads(&self) -> Vec<(String, String)> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn folder_count(&self) -> usize {
        self.folders.lock().unwrap().len()
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn find_folder(&self, parent_id: &str, name: &str) -> Result<Option<String>> {
        let folders = self.folders.lock().unwrap();
        Ok(folders.get(&(parent_id.to_string(), name.to_string())).cloned())
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<String> {
        let mut folders = self.folders.lock().unwrap();
        let id = format!("syn{}", 100 + folders.len());
        folders.insert((parent_id.to_string(), name.to_string()), id.clone());
        Ok(id)
    }

    async fn upload_file(&self, folder_id: &str, path: &Path) -> Result<()> {
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        self.uploads.lock().unwrap().push((folder_id.to_string(), name));
        Ok(())
    }
}

//! Scripted command runner for tests and dry runs
//!
//! `FakeRunner` records every invocation and answers from a list of rules
//! matched by command-line prefix. The most recently added matching rule
//! wins; unmatched commands succeed with empty output.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use pb_core::error::RunnerError;
use pb_core::traits::{ChildHandle, CommandOutput, CommandRunner, CommandSpec};

type Responder = Box<dyn Fn(&CommandSpec) -> Result<CommandOutput, RunnerError> + Send + Sync>;

struct Rule {
    prefix: String,
    respond: Responder,
}

/// How spawned children behave
#[derive(Debug, Clone)]
pub enum SpawnBehavior {
    /// The child keeps running until killed
    StayAlive,
    /// The child has already exited with this code
    ExitImmediately(Option<i32>),
    /// Spawning itself fails
    Fail(String),
}

/// Scripted `CommandRunner`
pub struct FakeRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<CommandSpec>>,
    spawned: Mutex<Vec<CommandSpec>>,
    spawn_behavior: Mutex<SpawnBehavior>,
    children: Mutex<Vec<Arc<AtomicBool>>>,
    next_pid: AtomicU32,
}

impl Default for FakeRunner {
    fn default() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            spawned: Mutex::new(Vec::new()),
            spawn_behavior: Mutex::new(SpawnBehavior::StayAlive),
            children: Mutex::new(Vec::new()),
            next_pid: AtomicU32::new(40_000),
        }
    }
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands starting with `prefix` with a fixed output
    pub fn on(&self, prefix: &str, output: CommandOutput) -> &Self {
        self.on_with(prefix, move |_| Ok(output.clone()))
    }

    /// Answer commands starting with `prefix` with a start failure
    pub fn missing(&self, prefix: &str) -> &Self {
        let program = prefix.split_whitespace().next().unwrap_or(prefix).to_string();
        self.on_with(prefix, move |_| {
            Err(RunnerError::NotStarted {
                program: program.clone(),
                reason: "not found".to_string(),
            })
        })
    }

    /// Answer commands starting with `prefix` through a closure
    pub fn on_with<F>(&self, prefix: &str, respond: F) -> &Self
    where
        F: Fn(&CommandSpec) -> Result<CommandOutput, RunnerError> + Send + Sync + 'static,
    {
        self.rules.lock().push(Rule {
            prefix: prefix.to_string(),
            respond: Box::new(respond),
        });
        self
    }

    /// Set how future spawns behave
    pub fn set_spawn_behavior(&self, behavior: SpawnBehavior) {
        *self.spawn_behavior.lock() = behavior;
    }

    /// Every command passed to `run`, in order
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().clone()
    }

    /// Command lines passed to `run`
    pub fn command_lines(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.command_line()).collect()
    }

    /// Number of `run` calls whose command line starts with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.command_line().starts_with(prefix))
            .count()
    }

    /// Every command passed to `spawn`
    pub fn spawned(&self) -> Vec<CommandSpec> {
        self.spawned.lock().clone()
    }

    /// Number of spawned children that were killed
    pub fn killed_children(&self) -> usize {
        self.children
            .lock()
            .iter()
            .filter(|k| k.load(Ordering::SeqCst))
            .count()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, RunnerError> {
        self.calls.lock().push(spec.clone());
        let line = spec.command_line();
        let rules = self.rules.lock();
        match rules.iter().rev().find(|r| line.starts_with(&r.prefix)) {
            Some(rule) => (rule.respond)(spec),
            None => Ok(CommandOutput::ok("")),
        }
    }

    fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn ChildHandle>, RunnerError> {
        self.spawned.lock().push(spec.clone());
        let exit = match self.spawn_behavior.lock().clone() {
            SpawnBehavior::StayAlive => None,
            SpawnBehavior::ExitImmediately(code) => Some(code),
            SpawnBehavior::Fail(reason) => {
                return Err(RunnerError::NotStarted {
                    program: spec.program.clone(),
                    reason,
                })
            }
        };

        let killed = Arc::new(AtomicBool::new(false));
        self.children.lock().push(Arc::clone(&killed));
        Ok(Box::new(FakeChild {
            pid: self.next_pid.fetch_add(1, Ordering::SeqCst),
            exit,
            killed,
        }))
    }
}

/// Child produced by `FakeRunner::spawn`
pub struct FakeChild {
    pid: u32,
    exit: Option<Option<i32>>,
    killed: Arc<AtomicBool>,
}

#[async_trait]
impl ChildHandle for FakeChild {
    fn id(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn try_wait(&mut self) -> std::io::Result<Option<Option<i32>>> {
        if self.killed.load(Ordering::SeqCst) {
            return Ok(Some(None));
        }
        Ok(self.exit)
    }

    async fn kill(&mut self) -> std::io::Result<()> {
        self.killed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

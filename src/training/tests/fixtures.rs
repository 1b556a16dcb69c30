//! Test fixtures for agent scenarios

use anyhow::Result;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use crate::agent::Agent;
use crate::config::AgentConfig;
use crate::training::progress::LineSink;

/// Collects the agent's progress lines
#[derive(Clone, Default)]
pub struct LineCapture {
    lines: Arc<Mutex<Vec<String>>>,
}

impl LineCapture {
    pub fn sink(&self) -> LineSink {
        let lines = self.lines.clone();
        Box::new(move |line: &str| lines.lock().unwrap().push(line.to_string()))
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.lines().iter().filter(|l| l.starts_with(prefix)).count()
    }
}

/// Agent with captured output and a scratch directory
pub struct AgentFixture {
    pub agent: Agent,
    pub capture: LineCapture,
    pub temp_dir: TempDir,
}

impl AgentFixture {
    pub fn new(config: AgentConfig) -> Result<Self> {
        let capture = LineCapture::default();
        let agent = Agent::new(config)?.with_log_sink(capture.sink());
        Ok(Self {
            agent,
            capture,
            temp_dir: tempfile::tempdir()?,
        })
    }
}

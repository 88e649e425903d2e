// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Shared fixtures for the end-to-end job tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{Cursor, Write};
use std::path::Path;
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use zip::write::SimpleFileOptions;

use cifix_sandbox::config::SandboxConfig;
use cifix_sandbox::job::UploadedFile;
use cifix_sandbox::types::{Message, ProviderResponse, ToolCall, ToolDefinition};
use cifix_sandbox::{BoxedProvider, Job, Provider, ProviderError, ProviderFactory, SandboxProcessor};

/// Shared queue of canned model responses plus everything the model was sent.
#[derive(Clone, Default)]
pub struct Script {
    responses: Arc<Mutex<VecDeque<ProviderResponse>>>,
    pub transcripts: Arc<Mutex<Vec<Vec<Message>>>>,
    pub models: Arc<Mutex<Vec<String>>>,
}

impl Script {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
            ..Self::default()
        }
    }

    /// Tool outputs the agent fed back, in order.
    pub fn tool_outputs(&self) -> Vec<String> {
        let transcripts = self.transcripts.lock().unwrap();
        let Some(last) = transcripts.last() else {
            return Vec::new();
        };
        last.iter()
            .filter_map(|m| m.as_blocks())
            .flatten()
            .filter_map(|b| b.content.clone())
            .collect()
    }
}

struct ScriptedProvider {
    script: Script,
    model: String,
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn chat(
        &self,
        messages: &[Message],
        _tools: &[ToolDefinition],
    ) -> Result<ProviderResponse, ProviderError> {
        self.script.transcripts.lock().unwrap().push(messages.to_vec());
        self.script
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::api("script exhausted", 500))
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

impl ProviderFactory for Script {
    fn create(&self, model: &str) -> Result<BoxedProvider, ProviderError> {
        self.models.lock().unwrap().push(model.to_string());
        Ok(Box::new(ScriptedProvider {
            script: self.clone(),
            model: model.to_string(),
        }))
    }
}

pub fn call(id: &str, name: &str, input: serde_json::Value) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        input,
    }
}

/// Config rooted in a throwaway directory with no ambient tokens.
pub fn config(base_dir: &Path) -> SandboxConfig {
    let mut config = SandboxConfig::default();
    config.workspace.base_dir = base_dir.to_path_buf();
    config
}

pub fn zip_upload(filename: &str, entries: &[(&str, &str)]) -> UploadedFile {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in entries {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    let bytes = writer.finish().unwrap().into_inner();
    UploadedFile {
        base64: base64::engine::general_purpose::STANDARD.encode(bytes),
        filename: Some(filename.to_string()),
    }
}

/// Names of the entries in a zip archive.
pub fn zip_entries(bytes: &[u8]) -> Vec<String> {
    let archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    archive.file_names().map(String::from).collect()
}

pub fn zip_read(bytes: &[u8], name: &str) -> String {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut file = archive.by_name(name).unwrap();
    let mut content = String::new();
    std::io::Read::read_to_string(&mut file, &mut content).unwrap();
    content
}

pub async fn wait(processor: &SandboxProcessor, id: &str) -> Job {
    tokio::time::timeout(
        Duration::from_secs(60),
        processor.wait(id, Duration::from_millis(50)),
    )
    .await
    .expect("job did not finish in time")
    .expect("job is registered")
}

pub fn has_binary(name: &str) -> bool {
    Command::new(name)
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}

/// Run git in `dir` with a fixed identity, panicking on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(["-c", "user.name=Test", "-c", "user.email=test@example.com"])
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A bare repository whose `main` holds the given files.
pub fn bare_origin(root: &Path, files: &[(&str, &str)]) -> std::path::PathBuf {
    let origin = root.join("origin.git");
    let seed = root.join("seed");
    std::fs::create_dir_all(&seed).unwrap();
    git(root, &["init", "--bare", origin.to_str().unwrap()]);
    git(&seed, &["init"]);
    for (name, content) in files {
        std::fs::write(seed.join(name), content).unwrap();
    }
    git(&seed, &["add", "-A"]);
    git(&seed, &["commit", "-m", "initial"]);
    git(&seed, &["branch", "-M", "main"]);
    git(&seed, &["push", origin.to_str().unwrap(), "main"]);
    git(&origin, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    origin
}

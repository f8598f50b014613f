//! Built-in tools that operate on the workspace.
//!
//! Every file path is interpreted relative to [`ToolContext::cwd`] and
//! normalized lexically; a path that escapes the workspace is refused
//! before any filesystem access happens.

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::runner::ToolRunner;
use super::typed::{TypedHandler, TypedTool};
use super::ToolContext;
use crate::errors::ToolError;

/// Adds all built-in tools to a runner. Call this after registering
/// external tools so the built-ins win name collisions.
pub fn register_builtins(runner: &mut ToolRunner) {
    runner.register(Arc::new(TypedTool(ReadFile)));
    runner.register(Arc::new(TypedTool(WriteFile)));
    runner.register(Arc::new(TypedTool(DeleteFile)));
    runner.register(Arc::new(TypedTool(ListFiles)));
    runner.register(Arc::new(TypedTool(SearchFiles)));
    runner.register(Arc::new(TypedTool(ModifyFile)));
    runner.register(Arc::new(TypedTool(CreateDir)));
    runner.register(Arc::new(TypedTool(RunCommand)));
}

fn confine(cx: &ToolContext, path: &str) -> Result<PathBuf, ToolError> {
    let mut resolved = cx.cwd.clone();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !resolved.pop() || !resolved.starts_with(&cx.cwd) {
                    return Err(ToolError::Failed(format!(
                        "path {path} escapes the workspace"
                    )));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(ToolError::Failed(format!(
                    "path {path} must be relative to the workspace"
                )));
            }
        }
    }
    if resolved.starts_with(&cx.cwd) {
        Ok(resolved)
    } else {
        Err(ToolError::Failed(format!(
            "path {path} escapes the workspace"
        )))
    }
}

// ---- read_file ----

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReadFileRequest {
    /// Path of the file, relative to the workspace root.
    pub path: String,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ReadFileResponse {
    pub content: String,
}

pub struct ReadFile;

#[async_trait]
impl TypedHandler for ReadFile {
    type Request = ReadFileRequest;
    type Response = ReadFileResponse;

    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file from the workspace."
    }

    async fn run(
        &self,
        cx: &ToolContext,
        request: Self::Request,
    ) -> Result<Self::Response, ToolError> {
        let path = confine(cx, &request.path)?;
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|err| ToolError::Failed(format!("{}: {err}", request.path)))?;
        Ok(ReadFileResponse { content })
    }
}

// ---- write_file ----

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WriteFileRequest {
    /// Path of the file, relative to the workspace root.
    pub path: String,
    /// Full new content of the file.
    pub content: String,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct WriteFileResponse {
    pub bytes_written: u64,
}

pub struct WriteFile;

#[async_trait]
impl TypedHandler for WriteFile {
    type Request = WriteFileRequest;
    type Response = WriteFileResponse;

    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file in the workspace."
    }

    async fn run(
        &self,
        cx: &ToolContext,
        request: Self::Request,
    ) -> Result<Self::Response, ToolError> {
        let path = confine(cx, &request.path)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| ToolError::Failed(err.to_string()))?;
        }
        tokio::fs::write(&path, request.content.as_bytes())
            .await
            .map_err(|err| ToolError::Failed(format!("{}: {err}", request.path)))?;
        Ok(WriteFileResponse {
            bytes_written: request.content.len() as u64,
        })
    }
}

// ---- delete_file ----

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DeleteFileRequest {
    /// Path of the file, relative to the workspace root.
    pub path: String,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct DeleteFileResponse {
    pub deleted: bool,
}

pub struct DeleteFile;

#[async_trait]
impl TypedHandler for DeleteFile {
    type Request = DeleteFileRequest;
    type Response = DeleteFileResponse;

    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a file from the workspace."
    }

    async fn run(
        &self,
        cx: &ToolContext,
        request: Self::Request,
    ) -> Result<Self::Response, ToolError> {
        let path = confine(cx, &request.path)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|err| ToolError::Failed(format!("{}: {err}", request.path)))?;
        Ok(DeleteFileResponse { deleted: true })
    }
}

// ---- list_files ----

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListFilesRequest {
    /// Directory to list, relative to the workspace root. Defaults to the
    /// root itself.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ListFilesResponse {
    pub files: Vec<String>,
}

pub struct ListFiles;

#[async_trait]
impl TypedHandler for ListFiles {
    type Request = ListFilesRequest;
    type Response = ListFilesResponse;

    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List files under a workspace directory, recursively."
    }

    async fn run(
        &self,
        cx: &ToolContext,
        request: Self::Request,
    ) -> Result<Self::Response, ToolError> {
        let root = confine(cx, request.path.as_deref().unwrap_or("."))?;
        let base = root.clone();
        let mut files: Vec<String> = tokio::task::spawn_blocking(move || walk(&base, &base))
            .await
            .map_err(|err| ToolError::Failed(err.to_string()))?
            .map_err(|err| ToolError::Failed(err.to_string()))?
            .into_iter()
            .filter(|(_, is_dir)| !is_dir)
            .map(|(path, _)| path)
            .collect();
        files.sort();
        Ok(ListFilesResponse { files })
    }
}

/// Relative paths of everything under `dir`, with a directory flag.
fn walk(base: &Path, dir: &Path) -> std::io::Result<Vec<(String, bool)>> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        // Hidden entries stay out of listings.
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        let path = entry.path();
        let relative = path
            .strip_prefix(base)
            .unwrap_or(&path)
            .to_string_lossy()
            .into_owned();
        if entry.file_type()?.is_dir() {
            entries.push((relative, true));
            entries.extend(walk(base, &path)?);
        } else {
            entries.push((relative, false));
        }
    }
    Ok(entries)
}

// ---- search_files ----

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchFilesRequest {
    /// Glob pattern matched against paths relative to the workspace root.
    #[serde(default)]
    pub path_pattern: Option<String>,
    /// Regular expression matched against file contents.
    #[serde(default)]
    pub grep: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct FileMatch {
    pub path: String,
    pub is_dir: bool,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct SearchFilesResponse {
    pub files: Vec<FileMatch>,
}

pub struct SearchFiles;

#[async_trait]
impl TypedHandler for SearchFiles {
    type Request = SearchFilesRequest;
    type Response = SearchFilesResponse;

    fn name(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "Find workspace entries by path glob, content regex, or both."
    }

    async fn run(
        &self,
        cx: &ToolContext,
        request: Self::Request,
    ) -> Result<Self::Response, ToolError> {
        if request.path_pattern.is_none() && request.grep.is_none() {
            return Err(ToolError::Failed(
                "either path_pattern or grep must be given".to_string(),
            ));
        }
        let pattern = request
            .path_pattern
            .as_deref()
            .map(glob::Pattern::new)
            .transpose()
            .map_err(|err| ToolError::Failed(format!("bad path_pattern: {err}")))?;
        let matcher = request
            .grep
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|err| ToolError::Failed(format!("bad grep: {err}")))?;

        let root = cx.cwd.clone();
        let entries = tokio::task::spawn_blocking(move || walk(&root, &root))
            .await
            .map_err(|err| ToolError::Failed(err.to_string()))?
            .map_err(|err| ToolError::Failed(err.to_string()))?;

        let mut files = Vec::new();
        for (path, is_dir) in entries {
            if let Some(pattern) = &pattern {
                if !pattern.matches(&path) {
                    continue;
                }
            }
            if let Some(matcher) = &matcher {
                // Content search only makes sense for readable text files.
                if is_dir {
                    continue;
                }
                match tokio::fs::read_to_string(cx.cwd.join(&path)).await {
                    Ok(content) if matcher.is_match(&content) => {}
                    _ => continue,
                }
            }
            files.push(FileMatch { path, is_dir });
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(SearchFilesResponse { files })
    }
}

// ---- modify_file ----

#[derive(Debug, Deserialize, JsonSchema)]
pub struct Modification {
    /// Byte offset where the replaced span starts.
    pub offset: usize,
    /// Length in bytes of the span to replace.
    pub length: usize,
    /// New content for the span.
    pub replace: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ModifyFileRequest {
    /// Path of the file, relative to the workspace root.
    pub path: String,
    /// Spans to replace. They are applied from the highest offset down so
    /// earlier offsets stay valid throughout.
    pub modifications: Vec<Modification>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ModifyFileResponse {
    pub bytes_written: u64,
}

pub struct ModifyFile;

#[async_trait]
impl TypedHandler for ModifyFile {
    type Request = ModifyFileRequest;
    type Response = ModifyFileResponse;

    fn name(&self) -> &str {
        "modify_file"
    }

    fn description(&self) -> &str {
        "Replace byte spans of a workspace file without rewriting the rest."
    }

    async fn run(
        &self,
        cx: &ToolContext,
        request: Self::Request,
    ) -> Result<Self::Response, ToolError> {
        if request.modifications.is_empty() {
            return Err(ToolError::Failed("no modifications given".to_string()));
        }
        let path = confine(cx, &request.path)?;
        let mut content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|err| ToolError::Failed(format!("{}: {err}", request.path)))?;

        let mut ordered: Vec<(usize, &Modification)> =
            request.modifications.iter().enumerate().collect();
        ordered.sort_by(|a, b| b.1.offset.cmp(&a.1.offset));
        for (index, modification) in ordered {
            let end = modification
                .offset
                .checked_add(modification.length)
                .filter(|end| *end <= content.len())
                .ok_or_else(|| {
                    ToolError::Failed(format!("modification {index} is out of bounds"))
                })?;
            if !content.is_char_boundary(modification.offset) || !content.is_char_boundary(end) {
                return Err(ToolError::Failed(format!(
                    "modification {index} splits a character"
                )));
            }
            content.replace_range(modification.offset..end, &modification.replace);
        }

        tokio::fs::write(&path, content.as_bytes())
            .await
            .map_err(|err| ToolError::Failed(format!("{}: {err}", request.path)))?;
        Ok(ModifyFileResponse {
            bytes_written: content.len() as u64,
        })
    }
}

// ---- create_dir ----

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateDirRequest {
    /// Path of the directory, relative to the workspace root.
    pub path: String,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct CreateDirResponse {
    pub created: bool,
}

pub struct CreateDir;

#[async_trait]
impl TypedHandler for CreateDir {
    type Request = CreateDirRequest;
    type Response = CreateDirResponse;

    fn name(&self) -> &str {
        "create_dir"
    }

    fn description(&self) -> &str {
        "Create a directory (and any missing parents) in the workspace."
    }

    async fn run(
        &self,
        cx: &ToolContext,
        request: Self::Request,
    ) -> Result<Self::Response, ToolError> {
        let path = confine(cx, &request.path)?;
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|err| ToolError::Failed(format!("{}: {err}", request.path)))?;
        Ok(CreateDirResponse { created: true })
    }
}

// ---- run_command ----

/// Cap on captured stdout/stderr, per stream. Anything past it is cut with
/// a marker so a chatty command cannot flood the conversation.
pub const MAX_COMMAND_OUTPUT: usize = 64 * 1024;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RunCommandRequest {
    /// Shell command to execute in the workspace root.
    pub command: String,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct RunCommandResponse {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

pub struct RunCommand;

#[async_trait]
impl TypedHandler for RunCommand {
    type Request = RunCommandRequest;
    type Response = RunCommandResponse;

    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Run a shell command in the workspace root and capture its output."
    }

    async fn run(
        &self,
        cx: &ToolContext,
        request: Self::Request,
    ) -> Result<Self::Response, ToolError> {
        // kill_on_drop so the shell dies with us when the dispatch timeout
        // cancels this future.
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&request.command)
            .current_dir(&cx.cwd)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| ToolError::Failed(format!("failed to spawn shell: {err}")))?;
        // A non-zero exit is a result, not a dispatch failure; the model
        // decides what to do with it.
        Ok(RunCommandResponse {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: capture(&output.stdout),
            stderr: capture(&output.stderr),
        })
    }
}

fn capture(bytes: &[u8]) -> String {
    let mut text = String::from_utf8_lossy(bytes).into_owned();
    if text.len() > MAX_COMMAND_OUTPUT {
        let mut end = MAX_COMMAND_OUTPUT;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
        text.push_str("\n[output truncated]");
    }
    text
}

//! The `file-ops` provider: file tools and `file://` resources.
//!
//! Every path a handler touches is resolved and checked against the
//! provider's [`FileOpsOptions`] first:
//!
//! - With `allowed_paths` set, the canonical path must lie under one of them.
//! - Without it, a fixed list of system directories is refused.
//!
//! Paths that do not exist yet (for example the target of `create_file`) are
//! resolved through their nearest existing ancestor, so `..` cannot be used to
//! step outside an allowed directory.
//!
//! File I/O runs on the blocking thread pool.

use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use regex::RegexBuilder;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{parse_options, Provider};
use crate::capability::{
    handler_fn, Arguments, CapabilityDescriptor, Handler, InvocationResult, Output, ParamSpec,
    ParamType,
};

/// Provider id used in the configuration document.
pub const PROVIDER_ID: &str = "file-ops";

/// Directories refused when no `allowed_paths` are configured.
const DENIED_PREFIXES: [&str; 6] = ["/etc", "/bin", "/sbin", "/usr/bin", "/usr/sbin", "/root"];

/// Options accepted under `providers.file-ops.config`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileOpsOptions {
    /// Directories the provider may touch. Empty means anywhere outside the denied system directories.
    #[serde(default)]
    pub allowed_paths: Vec<PathBuf>,

    /// Largest file that may be read or written, in megabytes.
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,

    /// Allowed file extensions including the dot (`.txt`). Empty allows any extension.
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,

    /// Cap on `search_in_files` matches.
    #[serde(default = "default_max_search_results")]
    pub max_search_results: usize,
}

impl Default for FileOpsOptions {
    fn default() -> Self {
        Self {
            allowed_paths: Vec::new(),
            max_file_size_mb: default_max_file_size_mb(),
            allowed_extensions: default_allowed_extensions(),
            max_search_results: default_max_search_results(),
        }
    }
}

const fn default_max_file_size_mb() -> u64 {
    10
}

fn default_allowed_extensions() -> Vec<String> {
    [".txt", ".json", ".csv", ".md", ".py", ".js", ".html", ".xml"]
        .into_iter()
        .map(String::from)
        .collect()
}

const fn default_max_search_results() -> usize {
    100
}

/// Path, extension and size policy shared by all handlers of one provider instance.
#[derive(Debug)]
pub struct FilePolicy {
    allowed_paths: Vec<PathBuf>,
    allowed_extensions: Vec<String>,
    max_file_size: u64,
    max_search_results: usize,
}

impl FilePolicy {
    fn new(options: &FileOpsOptions) -> Self {
        Self {
            allowed_paths: options.allowed_paths.clone(),
            allowed_extensions: options
                .allowed_extensions
                .iter()
                .map(|e| {
                    let e = e.to_ascii_lowercase();
                    if e.starts_with('.') {
                        e
                    } else {
                        format!(".{e}")
                    }
                })
                .collect(),
            max_file_size: options.max_file_size_mb.saturating_mul(1024 * 1024),
            max_search_results: options.max_search_results,
        }
    }

    /// Resolves `raw` to a canonical path and checks it against the allowed directories.
    ///
    /// # Errors
    ///
    /// Returns a message if the path cannot be resolved or is not permitted.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf, String> {
        let path = Path::new(raw);
        if raw.is_empty() {
            return Err("Invalid path: empty".to_string());
        }

        let mut existing = path;
        let mut pending = Vec::new();
        while fs::symlink_metadata(existing).is_err() {
            if matches!(existing.components().next_back(), Some(Component::ParentDir)) {
                return Err(format!("Invalid path '{raw}': cannot resolve '..' in a missing path"));
            }
            let name = existing
                .file_name()
                .ok_or_else(|| format!("Invalid path '{raw}': no filename specified"))?;
            pending.push(name.to_os_string());
            existing = match existing.parent() {
                Some(p) if !p.as_os_str().is_empty() => p,
                _ => Path::new("."),
            };
        }

        let mut canonical = existing
            .canonicalize()
            .map_err(|e| format!("Failed to resolve path '{raw}': {e}"))?;
        for name in pending.into_iter().rev() {
            canonical.push(name);
        }

        if self.allowed_paths.is_empty() {
            if DENIED_PREFIXES.iter().any(|d| canonical.starts_with(d)) {
                return Err(format!("Unsafe file path: {raw}"));
            }
            return Ok(canonical);
        }

        let permitted = self
            .allowed_paths
            .iter()
            .filter_map(|allowed| allowed.canonicalize().ok())
            .any(|allowed| canonical.starts_with(allowed));
        if permitted {
            Ok(canonical)
        } else {
            Err("Access denied: path is outside the configured allowed directories".to_string())
        }
    }

    /// Checks the extension of `path`. `allow_bare` admits files without an extension.
    fn check_extension(&self, path: &Path, allow_bare: bool) -> Result<(), String> {
        if self.allowed_extensions.is_empty() {
            return Ok(());
        }
        match extension_of(path) {
            None if allow_bare => Ok(()),
            None => Err("File extension not allowed: (none)".to_string()),
            Some(ext) if self.allowed_extensions.contains(&ext) => Ok(()),
            Some(ext) => Err(format!("File extension not allowed: {ext}")),
        }
    }

    fn check_size(&self, size: u64) -> Result<(), String> {
        if size > self.max_file_size {
            return Err(format!(
                "File too large: {size} bytes (max: {} bytes)",
                self.max_file_size
            ));
        }
        Ok(())
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_ascii_lowercase()))
}

fn guess_mime_type(path: &Path) -> &'static str {
    match extension_of(path).as_deref() {
        Some(".txt" | ".py" | ".rs") => "text/plain",
        Some(".md") => "text/markdown",
        Some(".json") => "application/json",
        Some(".csv") => "text/csv",
        Some(".js") => "text/javascript",
        Some(".html" | ".htm") => "text/html",
        Some(".xml") => "application/xml",
        Some(".png") => "image/png",
        Some(".jpg" | ".jpeg") => "image/jpeg",
        Some(".pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// File tools and `file://` resources.
#[derive(Debug, Clone)]
pub struct FileOpsProvider {
    policy: Arc<FilePolicy>,
}

impl Default for FileOpsProvider {
    fn default() -> Self {
        Self::new(&FileOpsOptions::default())
    }
}

impl FileOpsProvider {
    /// Creates the provider with explicit options.
    #[must_use]
    pub fn new(options: &FileOpsOptions) -> Self {
        Self {
            policy: Arc::new(FilePolicy::new(options)),
        }
    }

    /// Creates the provider from its option map.
    ///
    /// # Errors
    ///
    /// Returns a message if the options do not deserialise.
    pub fn from_options(options: &Map<String, Value>) -> Result<Self, String> {
        let options: FileOpsOptions = parse_options(options)?;
        if options.max_file_size_mb == 0 {
            return Err("max_file_size_mb must be greater than zero".to_string());
        }
        Ok(Self::new(&options))
    }
}

type FileFn = fn(&FilePolicy, &Arguments) -> Result<Output, String>;

/// Wraps a synchronous file operation into a handler running on the blocking pool.
fn blocking(policy: &Arc<FilePolicy>, op: FileFn) -> Arc<dyn Handler> {
    let policy = Arc::clone(policy);
    handler_fn(move |args: Arguments| {
        let policy = Arc::clone(&policy);
        async move {
            match tokio::task::spawn_blocking(move || op(&policy, &args)).await {
                Ok(result) => InvocationResult::from(result),
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => InvocationResult::failure(e.to_string()),
            }
        }
    })
}

impl Provider for FileOpsProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    #[allow(clippy::too_many_lines)]
    fn descriptors(&self) -> Result<Vec<CapabilityDescriptor>, String> {
        let p = &self.policy;
        let path = || ParamSpec::required("path", ParamType::String);
        let overwrite = || {
            ParamSpec::optional("overwrite", ParamType::Boolean)
                .with_default(json!(false))
                .describe("Replace an existing destination")
        };

        Ok(vec![
            CapabilityDescriptor::tool("create_file", blocking(p, create_file))
                .with_title("Create File")
                .with_category("file")
                .with_description("Create a new file with the given content.")
                .with_param(path().describe("File path to create"))
                .with_param(ParamSpec::required("content", ParamType::String).describe("File content"))
                .with_param(overwrite()),
            CapabilityDescriptor::tool("append_to_file", blocking(p, append_to_file))
                .with_title("Append to File")
                .with_category("file")
                .with_description("Append content to an existing file.")
                .with_param(path().describe("File path"))
                .with_param(ParamSpec::required("content", ParamType::String).describe("Content to append"))
                .with_param(
                    ParamSpec::optional("newline", ParamType::Boolean)
                        .with_default(json!(true))
                        .describe("Insert a newline before the content"),
                ),
            CapabilityDescriptor::tool("delete_file", blocking(p, delete_file))
                .with_title("Delete File")
                .with_category("file")
                .with_description("Delete a file. Requires confirm=true.")
                .with_param(path().describe("File path to delete"))
                .with_param(
                    ParamSpec::optional("confirm", ParamType::Boolean)
                        .with_default(json!(false))
                        .describe("Confirmation flag"),
                ),
            CapabilityDescriptor::tool("copy_file", blocking(p, copy_file))
                .with_title("Copy File")
                .with_category("file")
                .with_description("Copy a file to another location.")
                .with_param(ParamSpec::required("source", ParamType::String).describe("Source file path"))
                .with_param(
                    ParamSpec::required("destination", ParamType::String).describe("Destination file path"),
                )
                .with_param(overwrite()),
            CapabilityDescriptor::tool("move_file", blocking(p, move_file))
                .with_title("Move File")
                .with_category("file")
                .with_description("Move or rename a file.")
                .with_param(ParamSpec::required("source", ParamType::String).describe("Source file path"))
                .with_param(
                    ParamSpec::required("destination", ParamType::String).describe("Destination file path"),
                )
                .with_param(overwrite()),
            CapabilityDescriptor::tool("create_directory", blocking(p, create_directory))
                .with_title("Create Directory")
                .with_category("file")
                .with_description("Create a directory.")
                .with_param(path().describe("Directory path to create"))
                .with_param(
                    ParamSpec::optional("parents", ParamType::Boolean)
                        .with_default(json!(true))
                        .describe("Create missing parent directories"),
                ),
            CapabilityDescriptor::tool("search_in_files", blocking(p, search_in_files))
                .with_title("Search in Files")
                .with_category("search")
                .with_description("Search for a text pattern in files below a directory.")
                .with_param(ParamSpec::required("directory", ParamType::String).describe("Directory to search"))
                .with_param(ParamSpec::required("pattern", ParamType::String).describe("Text or regex to find"))
                .with_param(
                    ParamSpec::optional("file_pattern", ParamType::String)
                        .with_default(json!("*"))
                        .describe("Glob matched against file names, e.g. \"*.txt\""),
                )
                .with_param(
                    ParamSpec::optional("case_sensitive", ParamType::Boolean).with_default(json!(false)),
                )
                .with_param(
                    ParamSpec::optional("regex", ParamType::Boolean)
                        .with_default(json!(false))
                        .describe("Treat pattern as a regular expression"),
                ),
            CapabilityDescriptor::tool("process_csv_file", blocking(p, process_csv_file))
                .with_title("Process CSV File")
                .with_category("data")
                .with_description("Read or analyze a CSV file.")
                .with_param(path().describe("CSV file path"))
                .with_param(ParamSpec::required("operation", ParamType::String).describe("read or analyze"))
                .with_param(
                    ParamSpec::optional("limit", ParamType::Integer).describe("Rows returned by read"),
                ),
            CapabilityDescriptor::tool("process_json_file", blocking(p, process_json_file))
                .with_title("Process JSON File")
                .with_category("data")
                .with_description("Validate, read or inspect a JSON file.")
                .with_param(path().describe("JSON file path"))
                .with_param(
                    ParamSpec::required("operation", ParamType::String)
                        .describe("validate, read, keys or size"),
                ),
            CapabilityDescriptor::resource("file_list", "file://list/{path}", blocking(p, list_directory))?
                .with_title("Directory Listing")
                .with_description("List the contents of a directory.")
                .with_mime_type("application/json"),
            CapabilityDescriptor::resource("file_read", "file://read/{path}", blocking(p, read_file))?
                .with_title("File Contents")
                .with_description("Read a file. Non-UTF-8 content is returned as a base64 blob."),
            CapabilityDescriptor::resource("file_info", "file://info/{path}", blocking(p, file_info))?
                .with_title("File Information")
                .with_description("Size, type, timestamps and permissions of a file or directory.")
                .with_mime_type("application/json"),
        ])
    }
}

fn result(operation: &str, path: &Path, message: String, details: Value) -> Output {
    Output::Json(json!({
        "operation": operation,
        "path": path.display().to_string(),
        "success": true,
        "message": message,
        "details": details,
    }))
}

fn create_file(policy: &FilePolicy, args: &Arguments) -> Result<Output, String> {
    let raw = args.require_str("path")?;
    let content = args.require_str("content")?;
    let overwrite = args.bool("overwrite").unwrap_or(false);

    let path = policy.resolve(raw)?;
    policy.check_extension(&path, false)?;
    policy.check_size(content.len() as u64)?;

    let existed = path.exists();
    if existed && !overwrite {
        return Err(format!(
            "File already exists: {raw} (use overwrite=true to replace)"
        ));
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create file: {e}"))?;
    }
    fs::write(&path, content).map_err(|e| format!("Failed to create file: {e}"))?;

    tracing::info!(path = %path.display(), "Created file");
    Ok(result(
        "create_file",
        &path,
        format!("File created successfully: {raw}"),
        json!({ "size_bytes": content.len(), "overwritten": existed }),
    ))
}

fn append_to_file(policy: &FilePolicy, args: &Arguments) -> Result<Output, String> {
    let raw = args.require_str("path")?;
    let content = args.require_str("content")?;
    let newline = args.bool("newline").unwrap_or(true);

    let path = policy.resolve(raw)?;
    policy.check_extension(&path, true)?;
    let meta = fs::metadata(&path).map_err(|_| format!("File not found: {raw}"))?;
    if !meta.is_file() {
        return Err(format!("Path is not a file: {raw}"));
    }

    let mut data = String::with_capacity(content.len() + 1);
    if newline {
        data.push('\n');
    }
    data.push_str(content);
    policy
        .check_size(meta.len() + data.len() as u64)
        .map_err(|_| "File would be too large after append".to_string())?;

    let mut file = fs::OpenOptions::new()
        .append(true)
        .open(&path)
        .map_err(|e| format!("Failed to append to file: {e}"))?;
    file.write_all(data.as_bytes())
        .map_err(|e| format!("Failed to append to file: {e}"))?;

    tracing::info!(path = %path.display(), bytes = data.len(), "Appended to file");
    Ok(result(
        "append_to_file",
        &path,
        format!("Content appended successfully to: {raw}"),
        json!({ "appended_bytes": content.len(), "newline_added": newline }),
    ))
}

fn delete_file(policy: &FilePolicy, args: &Arguments) -> Result<Output, String> {
    let raw = args.require_str("path")?;
    if !args.bool("confirm").unwrap_or(false) {
        return Err("Deletion requires confirmation (confirm=true)".to_string());
    }

    let path = policy.resolve(raw)?;
    let meta = fs::metadata(&path).map_err(|_| format!("File not found: {raw}"))?;
    if meta.is_dir() {
        return Err(format!("Path is a directory, not a file: {raw}"));
    }
    fs::remove_file(&path).map_err(|e| format!("Failed to delete file: {e}"))?;

    tracing::info!(path = %path.display(), "Deleted file");
    Ok(result(
        "delete_file",
        &path,
        format!("File deleted successfully: {raw}"),
        json!({ "size_bytes": meta.len() }),
    ))
}

/// Resolves and checks the source and destination of a copy or move.
fn transfer_paths(policy: &FilePolicy, args: &Arguments) -> Result<(PathBuf, PathBuf, u64), String> {
    let source = args.require_str("source")?;
    let destination = args.require_str("destination")?;
    let overwrite = args.bool("overwrite").unwrap_or(false);

    let src = policy.resolve(source)?;
    let dst = policy.resolve(destination)?;
    policy.check_extension(&dst, true)?;

    let meta = fs::metadata(&src).map_err(|_| format!("Source file not found: {source}"))?;
    if !meta.is_file() {
        return Err(format!("Source is not a file: {source}"));
    }
    if dst.exists() && !overwrite {
        return Err(format!(
            "Destination exists (use overwrite=true): {destination}"
        ));
    }
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create destination directory: {e}"))?;
    }
    Ok((src, dst, meta.len()))
}

fn copy_file(policy: &FilePolicy, args: &Arguments) -> Result<Output, String> {
    let (src, dst, _) = transfer_paths(policy, args)?;
    let copied = fs::copy(&src, &dst).map_err(|e| format!("Failed to copy file: {e}"))?;

    tracing::info!(source = %src.display(), destination = %dst.display(), "Copied file");
    Ok(Output::Json(json!({
        "operation": "copy_file",
        "path": format!("{} -> {}", src.display(), dst.display()),
        "success": true,
        "message": "File copied successfully",
        "details": {
            "source": src.display().to_string(),
            "destination": dst.display().to_string(),
            "size_bytes": copied,
        },
    })))
}

fn move_file(policy: &FilePolicy, args: &Arguments) -> Result<Output, String> {
    let (src, dst, size) = transfer_paths(policy, args)?;
    if let Err(e) = fs::rename(&src, &dst) {
        tracing::debug!(error = %e, "Rename failed, falling back to copy and remove");
        fs::copy(&src, &dst).map_err(|e| format!("Failed to move file: {e}"))?;
        fs::remove_file(&src).map_err(|e| format!("Failed to move file: {e}"))?;
    }

    tracing::info!(source = %src.display(), destination = %dst.display(), "Moved file");
    Ok(Output::Json(json!({
        "operation": "move_file",
        "path": format!("{} -> {}", src.display(), dst.display()),
        "success": true,
        "message": "File moved successfully",
        "details": {
            "old_path": src.display().to_string(),
            "new_path": dst.display().to_string(),
            "size_bytes": size,
        },
    })))
}

fn create_directory(policy: &FilePolicy, args: &Arguments) -> Result<Output, String> {
    let raw = args.require_str("path")?;
    let parents = args.bool("parents").unwrap_or(true);
    let path = policy.resolve(raw)?;

    if path.exists() {
        if path.is_dir() {
            return Ok(result(
                "create_directory",
                &path,
                format!("Directory already exists: {raw}"),
                Value::Null,
            ));
        }
        return Err(format!("Path exists but is not a directory: {raw}"));
    }

    let created = if parents {
        fs::create_dir_all(&path)
    } else {
        fs::create_dir(&path)
    };
    created.map_err(|e| format!("Failed to create directory: {e}"))?;

    tracing::info!(path = %path.display(), "Created directory");
    Ok(result(
        "create_directory",
        &path,
        format!("Directory created successfully: {raw}"),
        json!({ "parents_created": parents }),
    ))
}

fn search_in_files(policy: &FilePolicy, args: &Arguments) -> Result<Output, String> {
    let raw = args.require_str("directory")?;
    let pattern = args.require_str("pattern")?;
    let file_pattern = args.str("file_pattern").unwrap_or("*");
    let case_sensitive = args.bool("case_sensitive").unwrap_or(false);
    let is_regex = args.bool("regex").unwrap_or(false);

    let dir = policy.resolve(raw)?;
    if !dir.is_dir() {
        return Err(format!("Directory not found: {raw}"));
    }
    let glob = glob::Pattern::new(file_pattern)
        .map_err(|e| format!("Invalid file pattern '{file_pattern}': {e}"))?;
    let source = if is_regex {
        pattern.to_string()
    } else {
        regex::escape(pattern)
    };
    let matcher = RegexBuilder::new(&source)
        .case_insensitive(!case_sensitive)
        .build()
        .map_err(|e| format!("Invalid pattern: {e}"))?;

    let mut matches = Vec::new();
    let mut truncated = false;
    let mut stack = vec![dir.clone()];

    'walk: while let Some(current) = stack.pop() {
        let Ok(entries) = fs::read_dir(&current) else {
            continue;
        };
        let mut entries: Vec<_> = entries.filter_map(Result::ok).collect();
        entries.sort_by_key(fs::DirEntry::file_name);

        for entry in entries {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            let path = entry.path();
            if file_type.is_dir() {
                stack.push(path);
                continue;
            }
            if !file_type.is_file()
                || !glob.matches(&entry.file_name().to_string_lossy())
                || policy.check_extension(&path, false).is_err()
            {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            if policy.check_size(meta.len()).is_err() {
                continue;
            }
            let bytes = match fs::read(&path) {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable file");
                    continue;
                }
            };
            let text = String::from_utf8_lossy(&bytes);
            for (index, line) in text.lines().enumerate() {
                if let Some(found) = matcher.find(line) {
                    if matches.len() == policy.max_search_results {
                        truncated = true;
                        break 'walk;
                    }
                    matches.push(json!({
                        "path": path.display().to_string(),
                        "line_number": index + 1,
                        "line_content": line.trim(),
                        "match_text": found.as_str(),
                    }));
                }
            }
        }
    }

    tracing::debug!(directory = %dir.display(), matches = matches.len(), "Search completed");
    Ok(Output::Json(json!({
        "directory": dir.display().to_string(),
        "pattern": pattern,
        "total_matches": matches.len(),
        "truncated": truncated,
        "matches": matches,
    })))
}

fn read_checked(policy: &FilePolicy, raw: &str, extension: &str) -> Result<(PathBuf, Vec<u8>), String> {
    let path = policy.resolve(raw)?;
    if extension_of(&path).as_deref() != Some(extension) {
        return Err(format!("File is not a {} file: {raw}", &extension[1..]));
    }
    let meta = fs::metadata(&path).map_err(|_| format!("File not found: {raw}"))?;
    policy.check_size(meta.len())?;
    let bytes = fs::read(&path).map_err(|e| format!("Failed to read file: {e}"))?;
    Ok((path, bytes))
}

fn process_csv_file(policy: &FilePolicy, args: &Arguments) -> Result<Output, String> {
    let raw = args.require_str("path")?;
    let operation = args.require_str("operation")?;
    if operation != "read" && operation != "analyze" {
        return Err(format!(
            "Unknown CSV operation: {operation}. Must be one of: read, analyze"
        ));
    }

    let (path, bytes) = read_checked(policy, raw, ".csv")?;
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes.as_slice());
    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| format!("CSV processing failed: {e}"))?
        .iter()
        .map(String::from)
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| format!("CSV processing failed: {e}"))?;
        let row: Map<String, Value> = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.clone(), json!(v)))
            .collect();
        rows.push(Value::Object(row));
    }
    let total = rows.len();

    let out = if operation == "read" {
        let limit = args
            .i64("limit")
            .map_or(total, |l| usize::try_from(l.max(0)).unwrap_or(total));
        rows.truncate(limit);
        json!({
            "operation": "read",
            "path": path.display().to_string(),
            "headers": headers,
            "displayed_rows": rows.len(),
            "total_rows": total,
            "rows": rows,
        })
    } else {
        rows.truncate(3);
        json!({
            "operation": "analyze",
            "path": path.display().to_string(),
            "headers": headers,
            "column_count": headers.len(),
            "total_rows": total,
            "sample_rows": rows,
            "file_size": bytes.len(),
        })
    };
    Ok(Output::Json(out))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn process_json_file(policy: &FilePolicy, args: &Arguments) -> Result<Output, String> {
    let raw = args.require_str("path")?;
    let operation = args.require_str("operation")?;
    if !["validate", "read", "keys", "size"].contains(&operation) {
        return Err(format!(
            "Unknown JSON operation: {operation}. Must be one of: validate, read, keys, size"
        ));
    }

    let (_, bytes) = read_checked(policy, raw, ".json")?;
    let parsed = serde_json::from_slice::<Value>(&bytes);

    let out = match (operation, parsed) {
        ("validate", Ok(_)) => json!({ "operation": "validate", "valid": true, "message": "JSON is valid" }),
        ("validate", Err(e)) => json!({ "operation": "validate", "valid": false, "error": e.to_string() }),
        (_, Err(e)) => return Err(format!("Invalid JSON: {e}")),
        ("read", Ok(data)) => json!({ "operation": "read", "data": data, "file_size": bytes.len() }),
        ("keys", Ok(Value::Object(map))) => {
            json!({ "operation": "keys", "type": "object", "keys": map.keys().collect::<Vec<_>>() })
        }
        ("keys", Ok(Value::Array(items))) => {
            json!({ "operation": "keys", "type": "array", "length": items.len() })
        }
        ("keys", Ok(other)) => json!({ "operation": "keys", "type": json_type_name(&other) }),
        (_, Ok(data)) => {
            let size = match &data {
                Value::Object(m) => m.len(),
                Value::Array(a) => a.len(),
                _ => 1,
            };
            json!({
                "operation": "size",
                "size": size,
                "type": json_type_name(&data),
                "file_size_bytes": bytes.len(),
            })
        }
    };
    Ok(Output::Json(out))
}

fn describe_path(path: &Path) -> Result<Value, std::io::Error> {
    let meta = fs::metadata(path)?;
    let modified = meta
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| DateTime::<Utc>::from(SystemTime::UNIX_EPOCH));

    #[cfg(unix)]
    let permissions = {
        use std::os::unix::fs::PermissionsExt;
        format!("{:o}", meta.permissions().mode() & 0o777)
    };
    #[cfg(not(unix))]
    let permissions = if meta.permissions().readonly() { "r" } else { "rw" }.to_string();

    let readable = if meta.is_dir() {
        fs::read_dir(path).is_ok()
    } else {
        fs::File::open(path).is_ok()
    };

    Ok(json!({
        "name": path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
        "path": path.display().to_string(),
        "size": meta.len(),
        "is_directory": meta.is_dir(),
        "mime_type": if meta.is_dir() { Value::Null } else { json!(guess_mime_type(path)) },
        "last_modified": modified.to_rfc3339(),
        "permissions": permissions,
        "readable": readable,
        "writable": !meta.permissions().readonly(),
    }))
}

fn list_directory(policy: &FilePolicy, args: &Arguments) -> Result<Output, String> {
    let raw = args.require_str("path")?;
    let dir = policy.resolve(raw)?;
    if !dir.exists() {
        return Err(format!("Directory not found: {raw}"));
    }
    if !dir.is_dir() {
        return Err(format!("Path is not a directory: {raw}"));
    }

    let entries = fs::read_dir(&dir).map_err(|e| format!("No permission to list directory: {raw}: {e}"))?;
    let mut files = Vec::new();
    for entry in entries.filter_map(Result::ok) {
        match describe_path(&entry.path()) {
            Ok(info) => files.push(info),
            Err(e) => tracing::warn!(path = %entry.path().display(), error = %e, "Cannot access entry"),
        }
    }
    files.sort_by_key(|f| {
        (
            !f["is_directory"].as_bool().unwrap_or(false),
            f["name"].as_str().unwrap_or_default().to_lowercase(),
        )
    });

    Ok(Output::Json(json!({
        "path": dir.display().to_string(),
        "total_items": files.len(),
        "files": files,
        "parent_directory": dir.parent().map(|p| p.display().to_string()),
    })))
}

fn read_file(policy: &FilePolicy, args: &Arguments) -> Result<Output, String> {
    let raw = args.require_str("path")?;
    let path = policy.resolve(raw)?;
    let meta = fs::metadata(&path).map_err(|_| format!("File not found: {raw}"))?;
    if meta.is_dir() {
        return Err(format!("Path is a directory, not a file: {raw}"));
    }
    policy.check_size(meta.len())?;
    policy.check_extension(&path, true)?;

    let bytes = fs::read(&path).map_err(|e| format!("Failed to read file: {e}"))?;
    tracing::debug!(path = %path.display(), bytes = bytes.len(), "Read file");
    match String::from_utf8(bytes) {
        Ok(text) => Ok(Output::Text(text)),
        Err(e) => Ok(Output::Blob {
            data: e.into_bytes(),
            mime_type: guess_mime_type(&path).to_string(),
        }),
    }
}

fn file_info(policy: &FilePolicy, args: &Arguments) -> Result<Output, String> {
    let raw = args.require_str("path")?;
    let path = policy.resolve(raw)?;
    describe_path(&path)
        .map(Output::Json)
        .map_err(|_| format!("File not found: {raw}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn policy_for(dir: &TempDir) -> FilePolicy {
        FilePolicy::new(&FileOpsOptions {
            allowed_paths: vec![dir.path().to_path_buf()],
            ..FileOpsOptions::default()
        })
    }

    fn args(value: Value) -> Arguments {
        match value {
            Value::Object(map) => Arguments::new(map),
            _ => panic!("test arguments must be an object"),
        }
    }

    fn json_of(output: Output) -> Value {
        match output {
            Output::Json(v) => v,
            other => panic!("expected JSON output, got {other:?}"),
        }
    }

    fn path_in(dir: &TempDir, name: &str) -> String {
        dir.path().join(name).display().to_string()
    }

    #[test]
    fn resolve_rejects_paths_outside_allowed() {
        let dir = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let policy = policy_for(&dir);

        assert!(policy.resolve(&path_in(&dir, "new/nested/file.txt")).is_ok());
        let err = policy.resolve(&path_in(&other, "x.txt")).unwrap_err();
        assert!(err.contains("Access denied"));

        let escape = format!("{}/../{}", dir.path().display(), "escape.txt");
        assert!(policy.resolve(&escape).is_err());
    }

    #[test]
    fn denied_system_directories_without_allowlist() {
        let policy = FilePolicy::new(&FileOpsOptions::default());
        assert!(policy.resolve("/etc/passwd").is_err());
    }

    #[test]
    fn create_append_read_delete() {
        let dir = TempDir::new().unwrap();
        let policy = policy_for(&dir);
        let file = path_in(&dir, "notes.txt");

        create_file(&policy, &args(json!({"path": file, "content": "hello"}))).unwrap();
        let err = create_file(&policy, &args(json!({"path": file, "content": "again"}))).unwrap_err();
        assert!(err.contains("already exists"));

        append_to_file(&policy, &args(json!({"path": file, "content": "world", "newline": true}))).unwrap();
        let Output::Text(text) = read_file(&policy, &args(json!({"path": file}))).unwrap() else {
            panic!("expected text");
        };
        assert_eq!(text, "hello\nworld");

        let err = delete_file(&policy, &args(json!({"path": file}))).unwrap_err();
        assert!(err.contains("confirmation"));
        delete_file(&policy, &args(json!({"path": file, "confirm": true}))).unwrap();
        assert!(!Path::new(&file).exists());
    }

    #[test]
    fn extension_allowlist_applies_to_writes() {
        let dir = TempDir::new().unwrap();
        let policy = policy_for(&dir);
        let err = create_file(&policy, &args(json!({"path": path_in(&dir, "run.sh"), "content": ""})))
            .unwrap_err();
        assert_eq!(err, "File extension not allowed: .sh");
    }

    #[test]
    fn size_limit_applies() {
        let dir = TempDir::new().unwrap();
        let policy = FilePolicy::new(&FileOpsOptions {
            allowed_paths: vec![dir.path().to_path_buf()],
            max_file_size_mb: 1,
            ..FileOpsOptions::default()
        });
        let big = "x".repeat(1024 * 1024 + 1);
        let err = create_file(&policy, &args(json!({"path": path_in(&dir, "big.txt"), "content": big})))
            .unwrap_err();
        assert!(err.starts_with("File too large"));
    }

    #[test]
    fn copy_and_move() {
        let dir = TempDir::new().unwrap();
        let policy = policy_for(&dir);
        let src = path_in(&dir, "a.txt");
        let copy = path_in(&dir, "sub/b.txt");
        let moved = path_in(&dir, "c.txt");
        fs::write(&src, "data").unwrap();

        copy_file(&policy, &args(json!({"source": src, "destination": copy}))).unwrap();
        assert_eq!(fs::read_to_string(&copy).unwrap(), "data");
        assert!(copy_file(&policy, &args(json!({"source": src, "destination": copy}))).is_err());

        move_file(&policy, &args(json!({"source": src, "destination": moved}))).unwrap();
        assert!(!Path::new(&src).exists());
        assert!(Path::new(&moved).exists());
    }

    #[test]
    fn search_finds_case_insensitive_matches() {
        let dir = TempDir::new().unwrap();
        let policy = policy_for(&dir);
        fs::create_dir(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/a.py"), "x = 1\n# TODO: fix\n").unwrap();
        fs::write(dir.path().join("b.txt"), "todo later\n").unwrap();
        fs::write(dir.path().join("c.md"), "nothing\n").unwrap();

        let out = json_of(
            search_in_files(
                &policy,
                &args(json!({"directory": dir.path().display().to_string(), "pattern": "todo"})),
            )
            .unwrap(),
        );
        assert_eq!(out["total_matches"], 2);

        let out = json_of(
            search_in_files(
                &policy,
                &args(json!({
                    "directory": dir.path().display().to_string(),
                    "pattern": "TODO",
                    "file_pattern": "*.py",
                    "case_sensitive": true,
                })),
            )
            .unwrap(),
        );
        assert_eq!(out["total_matches"], 1);
        assert_eq!(out["matches"][0]["line_number"], 2);
    }

    #[test]
    fn csv_read_and_analyze() {
        let dir = TempDir::new().unwrap();
        let policy = policy_for(&dir);
        let file = path_in(&dir, "people.csv");
        fs::write(&file, "name,age\nada,36\nalan,41\ngrace,85\nlinus,28\n").unwrap();

        let out = json_of(
            process_csv_file(&policy, &args(json!({"path": file, "operation": "read", "limit": 2}))).unwrap(),
        );
        assert_eq!(out["total_rows"], 4);
        assert_eq!(out["displayed_rows"], 2);
        assert_eq!(out["rows"][1]["name"], "alan");

        let out = json_of(process_csv_file(&policy, &args(json!({"path": file, "operation": "analyze"}))).unwrap());
        assert_eq!(out["column_count"], 2);
        assert_eq!(out["sample_rows"].as_array().unwrap().len(), 3);

        assert!(process_csv_file(&policy, &args(json!({"path": file, "operation": "sort"}))).is_err());
    }

    #[test]
    fn json_operations() {
        let dir = TempDir::new().unwrap();
        let policy = policy_for(&dir);
        let good = path_in(&dir, "good.json");
        let bad = path_in(&dir, "bad.json");
        fs::write(&good, r#"{"a": 1, "b": [1, 2]}"#).unwrap();
        fs::write(&bad, "{oops").unwrap();

        let out = json_of(process_json_file(&policy, &args(json!({"path": good, "operation": "keys"}))).unwrap());
        assert_eq!(out["keys"], json!(["a", "b"]));
        let out = json_of(process_json_file(&policy, &args(json!({"path": bad, "operation": "validate"}))).unwrap());
        assert_eq!(out["valid"], false);
        assert!(process_json_file(&policy, &args(json!({"path": bad, "operation": "read"}))).is_err());
        let out = json_of(process_json_file(&policy, &args(json!({"path": good, "operation": "size"}))).unwrap());
        assert_eq!(out["size"], 2);
    }

    #[test]
    fn binary_files_are_blobs() {
        let dir = TempDir::new().unwrap();
        let policy = policy_for(&dir);
        let file = path_in(&dir, "data.txt");
        fs::write(&file, [0xff, 0xfe, 0x00]).unwrap();
        let out = read_file(&policy, &args(json!({"path": file}))).unwrap();
        assert!(matches!(out, Output::Blob { ref data, .. } if data == &[0xff, 0xfe, 0x00]));
    }

    #[test]
    fn listing_puts_directories_first() {
        let dir = TempDir::new().unwrap();
        let policy = policy_for(&dir);
        fs::write(dir.path().join("a.txt"), "").unwrap();
        fs::create_dir(dir.path().join("zdir")).unwrap();

        let out = json_of(list_directory(&policy, &args(json!({"path": dir.path().display().to_string()}))).unwrap());
        assert_eq!(out["total_items"], 2);
        assert_eq!(out["files"][0]["name"], "zdir");
        assert_eq!(out["files"][1]["mime_type"], "text/plain");
    }

    #[test]
    fn provider_declares_tools_and_resources() {
        let descriptors = FileOpsProvider::default().descriptors().unwrap();
        assert_eq!(descriptors.len(), 12);
        assert!(descriptors.iter().any(|d| d.name() == "file_read"));
    }
}

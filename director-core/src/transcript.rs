//! Agent transcript reader (C5): a pure, read-only scanner over the agent's
//! per-project JSON-lines transcript files. Never writes; all reads use
//! share-read/share-write file opening so it coexists with the agent's own
//! concurrent writer.

use crate::model::FileVerification;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One line of a transcript file, tolerant of both `message.content` shapes.
/// `summary` is only present on the agent's own `"type":"summary"` lines.
#[derive(Debug, Deserialize)]
struct TranscriptLine {
    #[serde(rename = "type")]
    kind: Option<String>,
    message: Option<TranscriptMessage>,
    summary: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TranscriptMessage {
    content: Option<MessageContent>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    #[serde(rename = "type")]
    kind: Option<String>,
    text: Option<String>,
}

fn extract_text(content: &MessageContent) -> Option<String> {
    match content {
        MessageContent::Text(s) => Some(s.clone()),
        MessageContent::Parts(parts) => {
            let joined = parts
                .iter()
                .filter(|p| p.kind.as_deref() == Some("text"))
                .filter_map(|p| p.text.as_deref())
                .collect::<Vec<_>>()
                .join("");
            if joined.is_empty() {
                None
            } else {
                Some(joined)
            }
        }
    }
}

/// Compute the per-project transcript directory for a repo path, matching
/// the agent's own convention: the repo's absolute path with path separators
/// replaced by `-`, under the transcript root.
pub fn project_transcript_dir(transcripts_root: &Path, repo_path: &Path) -> PathBuf {
    let canonical = repo_path
        .canonicalize()
        .unwrap_or_else(|_| repo_path.to_path_buf());
    let slug = canonical
        .to_string_lossy()
        .replace(['/', '\\'], "-")
        .trim_start_matches('-')
        .to_string();
    transcripts_root.join(format!("-{slug}"))
}

fn open_share_read(path: &Path) -> std::io::Result<BufReader<File>> {
    Ok(BufReader::new(File::open(path)?))
}

/// Stream every user-authored textual prompt out of a transcript, in file
/// order. Tolerates malformed lines by skipping them.
pub fn extract_user_prompts(jsonl_path: &Path) -> std::io::Result<Vec<String>> {
    let reader = open_share_read(jsonl_path)?;
    let mut prompts = Vec::new();

    for (lineno, line) in reader.lines().enumerate() {
        let Ok(line) = line else {
            continue;
        };
        if line.trim().is_empty() {
            continue;
        }
        let parsed: TranscriptLine = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(err) => {
                debug!(lineno, %err, "skipping malformed transcript line");
                continue;
            }
        };
        if parsed.kind.as_deref() != Some("user") {
            continue;
        }
        if let Some(text) = parsed
            .message
            .as_ref()
            .and_then(|m| m.content.as_ref())
            .and_then(extract_text)
        {
            prompts.push(text);
        }
    }

    Ok(prompts)
}

/// The earliest user prompt in a transcript, if any.
pub fn read_first_prompt_from_jsonl(jsonl_path: &Path) -> std::io::Result<Option<String>> {
    Ok(extract_user_prompts(jsonl_path)?.into_iter().next())
}

/// The agent's own recorded summary line, if any. A transcript may carry
/// more than one as the session progresses; the last one wins.
pub fn read_transcript_summary(jsonl_path: &Path) -> std::io::Result<Option<String>> {
    let reader = open_share_read(jsonl_path)?;
    let mut summary = None;

    for (lineno, line) in reader.lines().enumerate() {
        let Ok(line) = line else {
            continue;
        };
        if line.trim().is_empty() {
            continue;
        }
        let parsed: TranscriptLine = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(err) => {
                debug!(lineno, %err, "skipping malformed transcript line");
                continue;
            }
        };
        if parsed.kind.as_deref() == Some("summary") {
            if let Some(text) = parsed.summary {
                summary = Some(text);
            }
        }
    }

    Ok(summary)
}

/// Result of a file-based identity check against a candidate transcript.
#[derive(Debug, Clone)]
pub struct VerifyResult {
    pub status: FileVerification,
    pub first_prompt_snippet: Option<String>,
}

/// Re-check that `agent_session_id`'s transcript file still exists under
/// `repo_path`, has a sufficiently long first prompt, and — if
/// `expected_first_prompt` is given — still matches it.
pub fn verify_session_file(
    transcripts_root: &Path,
    agent_session_id: &str,
    repo_path: &Path,
    expected_first_prompt: Option<&str>,
    min_verification_length: usize,
) -> VerifyResult {
    let dir = project_transcript_dir(transcripts_root, repo_path);
    let jsonl_path = dir.join(format!("{agent_session_id}.jsonl"));

    if !jsonl_path.exists() {
        return VerifyResult {
            status: FileVerification::FileMissing,
            first_prompt_snippet: None,
        };
    }

    let first_prompt = match read_first_prompt_from_jsonl(&jsonl_path) {
        Ok(p) => p,
        Err(err) => {
            warn!(%err, path = %jsonl_path.display(), "failed reading transcript during verification");
            return VerifyResult {
                status: FileVerification::FileMissing,
                first_prompt_snippet: None,
            };
        }
    };

    let Some(first_prompt) = first_prompt else {
        return VerifyResult {
            status: FileVerification::ContentMismatch,
            first_prompt_snippet: None,
        };
    };

    if first_prompt.chars().count() < min_verification_length {
        return VerifyResult {
            status: FileVerification::NotLinked,
            first_prompt_snippet: Some(first_prompt),
        };
    }

    if let Some(expected) = expected_first_prompt {
        if expected != first_prompt {
            return VerifyResult {
                status: FileVerification::ContentMismatch,
                first_prompt_snippet: Some(first_prompt),
            };
        }
    }

    VerifyResult {
        status: FileVerification::Verified,
        first_prompt_snippet: Some(first_prompt),
    }
}

/// Lightweight metadata about one transcript, used for project scans and
/// candidate ordering during terminal-based verification.
#[derive(Debug, Clone)]
pub struct TranscriptSummary {
    pub id: String,
    pub project_path: PathBuf,
    pub jsonl_path: PathBuf,
    pub message_count: usize,
    pub last_modified: std::time::SystemTime,
    pub summary: Option<String>,
    pub first_prompt: Option<String>,
}

/// Enumerate every transcript across every project directory.
pub fn scan_all_projects(transcripts_root: &Path) -> std::io::Result<Vec<TranscriptSummary>> {
    let mut out = Vec::new();
    let Ok(project_dirs) = std::fs::read_dir(transcripts_root) else {
        return Ok(out);
    };
    for project_entry in project_dirs.flatten() {
        if !project_entry.path().is_dir() {
            continue;
        }
        for summary in list_transcripts_in(&project_entry.path())? {
            out.push(summary);
        }
    }
    Ok(out)
}

/// Transcripts within a single project directory, sorted newest-first by
/// modification time — the ordering terminal verification's candidate scan
/// relies on.
pub fn list_transcripts_in(project_dir: &Path) -> std::io::Result<Vec<TranscriptSummary>> {
    let mut out = Vec::new();
    let Ok(entries) = std::fs::read_dir(project_dir) else {
        return Ok(out);
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
            continue;
        }
        let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let last_modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH);

        let prompts = extract_user_prompts(&path).unwrap_or_default();
        let summary = read_transcript_summary(&path).unwrap_or(None);
        out.push(TranscriptSummary {
            id: id.to_string(),
            project_path: project_dir.to_path_buf(),
            jsonl_path: path.clone(),
            message_count: prompts.len(),
            last_modified,
            summary,
            first_prompt: prompts.into_iter().next(),
        });
    }

    out.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
    Ok(out)
}

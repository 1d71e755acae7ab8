//! HuggingFace checkpoint resolution
//!
//! Resolves a model reference to a local GGUF file: a local path is used as-is,
//! a previously downloaded file is reused, anything else is fetched from the Hub.

use crate::error::{AdapterError, Result};
use crate::types::config::{ModelMetadata, Precision};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

const DEFAULT_ENDPOINT: &str = "https://huggingface.co";

/// Parsed HuggingFace model reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HuggingFaceUrl {
    pub repo_id: String,
    pub filename: String,
    pub revision: String,
}

fn sanitize_local_filename(filename: &str) -> Result<String> {
    let invalid_name = || AdapterError::Download(format!("Invalid file name: {:?}", filename));

    let trimmed = filename.trim();
    if trimmed.is_empty() {
        return Err(invalid_name());
    }

    let no_query = trimmed.split('?').next().unwrap_or(trimmed);
    let no_fragment = no_query.split('#').next().unwrap_or(no_query);
    let no_leading = no_fragment.trim_start_matches('/');

    let flattened = no_leading.replace('\\', "/").replace('/', "__");

    let mut sanitized = String::with_capacity(flattened.len());
    for ch in flattened.chars() {
        let invalid = matches!(ch, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*');
        if invalid || ch.is_control() {
            sanitized.push('_');
        } else {
            sanitized.push(ch);
        }
    }

    while sanitized.ends_with('.') || sanitized.ends_with(' ') {
        sanitized.pop();
    }

    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.' || c == '_') {
        return Err(invalid_name());
    }

    Ok(sanitized)
}

impl HuggingFaceUrl {
    /// Parse the supported reference formats
    ///
    /// 1. `https://huggingface.co/owner/repo/blob/<rev>/model.gguf`
    /// 2. `https://huggingface.co/owner/repo/resolve/<rev>/model.gguf`
    /// 3. `owner/repo/model.gguf`
    /// 4. `owner/repo`
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        let url = url.split('?').next().unwrap_or(url);
        let url = url.split('#').next().unwrap_or(url);

        if url.contains("huggingface.co") {
            let path = url
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .trim_start_matches("huggingface.co/");

            let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
            if parts.len() < 2 {
                return Err(AdapterError::Config(format!(
                    "Invalid HuggingFace URL: {}",
                    url
                )));
            }

            let repo_id = format!("{}/{}", parts[0], parts[1]);

            if let Some(pos) = parts.iter().position(|&p| p == "blob" || p == "resolve") {
                if parts.len() > pos + 2 {
                    return Ok(Self {
                        repo_id,
                        filename: parts[pos + 2..].join("/"),
                        revision: parts[pos + 1].to_string(),
                    });
                }
            }

            return Ok(Self {
                repo_id,
                filename: String::new(),
                revision: "main".to_string(),
            });
        }

        let parts: Vec<&str> = url.split('/').filter(|p| !p.is_empty()).collect();
        if parts.len() >= 2 {
            return Ok(Self {
                repo_id: format!("{}/{}", parts[0], parts[1]),
                filename: if parts.len() > 2 {
                    parts[2..].join("/")
                } else {
                    String::new()
                },
                revision: "main".to_string(),
            });
        }

        Err(AdapterError::Config(format!(
            "Could not parse model reference: {:?}",
            url
        )))
    }

    /// Local cache directory for this repository and revision
    pub fn cache_dir(&self, models_dir: &Path) -> Result<PathBuf> {
        Ok(models_dir
            .join(sanitize_local_filename(&self.repo_id)?)
            .join(sanitize_local_filename(&self.revision)?))
    }
}

/// Pick the GGUF file to load from a repository listing
///
/// A file whose name carries the precision tag wins. A repository with a single
/// GGUF file falls back to that file. Anything else is ambiguous.
pub fn select_gguf_file(files: &[String], precision: Precision) -> Result<String> {
    let gguf: Vec<&String> = files
        .iter()
        .filter(|f| f.to_lowercase().ends_with(".gguf"))
        .collect();

    if gguf.is_empty() {
        return Err(AdapterError::Download(
            "No GGUF files found in this repository".to_string(),
        ));
    }

    let tag = precision.tag();
    let tagged: Vec<&&String> = gguf
        .iter()
        .filter(|f| has_precision_tag(f.as_str(), tag))
        .collect();

    match tagged.as_slice() {
        [only] => Ok(only.to_string()),
        [] if gguf.len() == 1 => {
            tracing::warn!(
                "No {} GGUF file found, falling back to the only file: {}",
                tag,
                gguf[0]
            );
            Ok(gguf[0].clone())
        }
        [] => Err(AdapterError::Download(format!(
            "No {} GGUF file found. Please set gguf_file to one of: {}",
            tag,
            join_names(&gguf)
        ))),
        many => Err(AdapterError::Download(format!(
            "Multiple {} GGUF files found. Please set gguf_file to one of: {}",
            tag,
            many.iter().map(|f| f.as_str()).collect::<Vec<_>>().join(", ")
        ))),
    }
}

/// `bf16` must not count as `f16`, so the tag has to stand alone between separators.
fn has_precision_tag(filename: &str, tag: &str) -> bool {
    let name = filename.rsplit('/').next().unwrap_or(filename).to_lowercase();
    let stem = name.strip_suffix(".gguf").unwrap_or(&name);
    stem.split(|c: char| c == '-' || c == '_' || c == '.')
        .any(|part| part == tag)
}

/// Cached file to reuse without asking the Hub
///
/// Only a file carrying the precision tag qualifies. A cached file for another
/// precision is left alone and the repository listing decides instead.
fn cached_gguf_file(files: &[String], precision: Precision) -> Option<String> {
    let tag = precision.tag();
    let mut tagged = files.iter().filter(|f| has_precision_tag(f.as_str(), tag));
    match (tagged.next(), tagged.next()) {
        (Some(only), None) => Some(only.clone()),
        _ => None,
    }
}

fn join_names(files: &[&String]) -> String {
    files
        .iter()
        .map(|f| f.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// GGUF files directly inside a local directory
fn list_local_gguf_files(dir: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() || entry.metadata()?.len() == 0 {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name.to_lowercase().ends_with(".gguf") {
            files.push(name);
        }
    }
    files.sort();
    Ok(files)
}

/// Resolve a model reference to a GGUF file on disk
pub async fn resolve_checkpoint(
    meta: &ModelMetadata,
    precision: Precision,
    models_dir: &Path,
) -> Result<PathBuf> {
    let local = Path::new(meta.repo_id.trim());
    if local.is_file() {
        tracing::info!("Using local checkpoint: {:?}", local);
        return Ok(local.to_path_buf());
    }
    if local.is_dir() {
        let filename = match &meta.gguf_file {
            Some(name) => name.clone(),
            None => select_gguf_file(&list_local_gguf_files(local)?, precision)?,
        };
        let path = local.join(filename);
        tracing::info!("Using local checkpoint: {:?}", path);
        return Ok(path);
    }

    let mut reference = HuggingFaceUrl::parse(&meta.repo_id)?;
    if reference.revision == "main" {
        reference.revision = meta.revision.clone();
    }
    if let Some(file) = &meta.gguf_file {
        reference.filename = file.clone();
    }

    let repo_cache = reference.cache_dir(models_dir)?;

    if reference.filename.is_empty() && repo_cache.is_dir() {
        if let Some(file) = cached_gguf_file(&list_local_gguf_files(&repo_cache)?, precision) {
            let path = repo_cache.join(file);
            tracing::info!("Model already cached: {:?}", path);
            return Ok(path);
        }
    }

    let hub = HubClient::from_env()?;

    if reference.filename.is_empty() {
        let files = hub
            .list_gguf_files(&reference.repo_id, &reference.revision)
            .await?;
        reference.filename = select_gguf_file(&files, precision)?;
    }

    let output_path = repo_cache.join(sanitize_local_filename(&reference.filename)?);
    let mut last_logged = 0u64;
    hub.download(&reference, &output_path, move |downloaded, total| {
        let percent = downloaded * 100 / total.max(1);
        if percent >= last_logged + 10 || downloaded == total {
            last_logged = percent;
            tracing::info!("Downloaded {}% ({})", percent, format_size(downloaded));
        }
    })
    .await
}

/// Thin HuggingFace Hub client
pub struct HubClient {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HubClient {
    /// Build a client honoring `HF_ENDPOINT` and `HF_TOKEN`
    pub fn from_env() -> Result<Self> {
        let endpoint = std::env::var("HF_ENDPOINT")
            .ok()
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let token = std::env::var("HF_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty());

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(3600)) // large checkpoints
            .user_agent(concat!("chat-adapter/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Build the download URL for a file
    pub fn download_url(&self, reference: &HuggingFaceUrl) -> String {
        format!(
            "{}/{}/resolve/{}/{}",
            self.endpoint, reference.repo_id, reference.revision, reference.filename
        )
    }

    /// List GGUF files in a repository
    pub async fn list_gguf_files(&self, repo_id: &str, revision: &str) -> Result<Vec<String>> {
        let api_url = format!(
            "{}/api/models/{}/tree/{}?recursive=true",
            self.endpoint, repo_id, revision
        );

        let response = self.get(&api_url).send().await?;
        if !response.status().is_success() {
            return Err(AdapterError::Download(format!(
                "Listing {} failed with status: {}",
                repo_id,
                response.status()
            )));
        }

        let files: Vec<FileInfo> = response.json().await?;

        Ok(files
            .into_iter()
            .filter(|f| f.kind == "file" && f.path.to_lowercase().ends_with(".gguf"))
            .map(|f| f.path)
            .collect())
    }

    /// Download a file unless a non-empty copy already exists at `output_path`
    pub async fn download(
        &self,
        reference: &HuggingFaceUrl,
        output_path: &Path,
        mut progress_callback: impl FnMut(u64, u64) + Send,
    ) -> Result<PathBuf> {
        if output_path.exists() && fs::metadata(output_path)?.len() > 0 {
            tracing::info!("Model already cached: {:?}", output_path);
            return Ok(output_path.to_path_buf());
        }

        let parent = output_path.parent().ok_or_else(|| {
            AdapterError::Download(format!("Invalid output path: {:?}", output_path))
        })?;
        fs::create_dir_all(parent)?;

        let mut temp_name = output_path.as_os_str().to_owned();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);

        let download_url = self.download_url(reference);
        tracing::info!("Downloading from: {}", download_url);

        let mut response = self.get(&download_url).send().await?;
        if !response.status().is_success() {
            return Err(AdapterError::Download(format!(
                "Download failed with status: {}",
                response.status()
            )));
        }

        let total_size = response.content_length().ok_or_else(|| {
            AdapterError::Download("Could not determine file size".to_string())
        })?;
        tracing::info!("File size: {}", format_size(total_size));

        let written = async {
            let mut temp_file = File::create(&temp_path).await?;
            let mut downloaded: u64 = 0;
            while let Some(chunk) = response.chunk().await? {
                temp_file.write_all(&chunk).await?;
                downloaded += chunk.len() as u64;
                progress_callback(downloaded, total_size);
            }
            temp_file.flush().await?;

            if downloaded != total_size {
                return Err(AdapterError::Download(format!(
                    "Download incomplete: got {} bytes, expected {}",
                    downloaded, total_size
                )));
            }
            Ok::<(), AdapterError>(())
        }
        .await;

        finish_download(&temp_path, output_path, written).await?;
        tracing::info!("Download complete: {:?}", output_path);

        Ok(output_path.to_path_buf())
    }
}

/// Move a finished download into place, or drop the partial file
async fn finish_download(temp_path: &Path, output_path: &Path, written: Result<()>) -> Result<()> {
    if let Err(e) = written {
        if let Err(remove_err) = tokio::fs::remove_file(temp_path).await {
            if remove_err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Could not remove {:?}: {}", temp_path, remove_err);
            }
        }
        return Err(e);
    }
    tokio::fs::rename(temp_path, output_path).await?;
    Ok(())
}

#[derive(Debug, serde::Deserialize)]
struct FileInfo {
    #[serde(rename = "type")]
    kind: String,
    path: String,
}

/// Get a human-readable size string
pub fn format_size(bytes: u64) -> String {
    let bytes = bytes as f64;
    if bytes < 1024.0 {
        format!("{} B", bytes as u64)
    } else if bytes < 1024.0 * 1024.0 {
        format!("{:.2} KB", bytes / 1024.0)
    } else if bytes < 1024.0 * 1024.0 * 1024.0 {
        format!("{:.2} MB", bytes / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(files: &[&str]) -> Vec<String> {
        files.iter().map(|f| f.to_string()).collect()
    }

    #[test]
    fn test_parse_hf_url_full() {
        let url = "https://huggingface.co/Qwen/Qwen2.5-7B-Instruct-GGUF/blob/v1/qwen2.5-7b-instruct-bf16.gguf";
        let parsed = HuggingFaceUrl::parse(url).unwrap();
        assert_eq!(parsed.repo_id, "Qwen/Qwen2.5-7B-Instruct-GGUF");
        assert_eq!(parsed.filename, "qwen2.5-7b-instruct-bf16.gguf");
        assert_eq!(parsed.revision, "v1");
    }

    #[test]
    fn test_parse_hf_url_short() {
        let parsed = HuggingFaceUrl::parse("owner/repo/sub/model-f16.gguf").unwrap();
        assert_eq!(parsed.repo_id, "owner/repo");
        assert_eq!(parsed.filename, "sub/model-f16.gguf");
        assert_eq!(parsed.revision, "main");
    }

    #[test]
    fn test_parse_hf_url_repo_only() {
        let parsed = HuggingFaceUrl::parse("owner/repo").unwrap();
        assert_eq!(parsed.repo_id, "owner/repo");
        assert_eq!(parsed.filename, "");
    }

    #[test]
    fn test_parse_rejects_bare_name() {
        assert!(HuggingFaceUrl::parse("model").is_err());
        assert!(HuggingFaceUrl::parse("https://huggingface.co/owner").is_err());
    }

    #[test]
    fn test_select_tagged_file() {
        let files = names(&["model-Q4_K_M.gguf", "model-BF16.gguf", "model-F16.gguf", "README.md"]);
        assert_eq!(select_gguf_file(&files, Precision::Bf16).unwrap(), "model-BF16.gguf");
        assert_eq!(select_gguf_file(&files, Precision::F16).unwrap(), "model-F16.gguf");
    }

    #[test]
    fn test_select_falls_back_to_single_file() {
        let files = names(&["model-Q8_0.gguf", "config.json"]);
        assert_eq!(select_gguf_file(&files, Precision::Bf16).unwrap(), "model-Q8_0.gguf");
    }

    #[test]
    fn test_select_ambiguous() {
        let files = names(&["a-Q4_0.gguf", "a-Q8_0.gguf"]);
        let err = select_gguf_file(&files, Precision::Bf16).unwrap_err().to_string();
        assert!(err.contains("a-Q4_0.gguf"));
        assert!(err.contains("a-Q8_0.gguf"));

        let files = names(&["a-bf16.gguf", "b-bf16.gguf"]);
        assert!(select_gguf_file(&files, Precision::Bf16).is_err());
    }

    #[test]
    fn test_select_no_gguf() {
        let files = names(&["model.safetensors"]);
        assert!(matches!(
            select_gguf_file(&files, Precision::Bf16),
            Err(AdapterError::Download(_))
        ));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_local_filename("sub/dir/model.gguf").unwrap(), "sub__dir__model.gguf");
        assert_eq!(sanitize_local_filename("owner/repo").unwrap(), "owner__repo");
        assert!(sanitize_local_filename("  ").is_err());
        assert!(sanitize_local_filename("..").is_err());
    }

    #[tokio::test]
    async fn test_resolve_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("tiny-f16.gguf");
        fs::write(&file, b"GGUF").unwrap();

        let meta = ModelMetadata {
            repo_id: file.to_string_lossy().to_string(),
            revision: "main".to_string(),
            gguf_file: None,
        };
        let resolved = resolve_checkpoint(&meta, Precision::Bf16, dir.path()).await.unwrap();
        assert_eq!(resolved, file);
    }

    #[tokio::test]
    async fn test_resolve_local_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("m-bf16.gguf"), b"GGUF").unwrap();
        fs::write(dir.path().join("m-Q4_0.gguf"), b"GGUF").unwrap();

        let meta = ModelMetadata {
            repo_id: dir.path().to_string_lossy().to_string(),
            revision: "main".to_string(),
            gguf_file: None,
        };
        let resolved = resolve_checkpoint(&meta, Precision::Bf16, dir.path()).await.unwrap();
        assert_eq!(resolved, dir.path().join("m-bf16.gguf"));
    }

    #[tokio::test]
    async fn test_resolve_reuses_cache() {
        let models = tempfile::tempdir().unwrap();
        let reference = HuggingFaceUrl::parse("owner/repo").unwrap();
        let cache = reference.cache_dir(models.path()).unwrap();
        assert_eq!(cache, models.path().join("owner__repo").join("main"));
        fs::create_dir_all(&cache).unwrap();
        fs::write(cache.join("repo-bf16.gguf"), b"GGUF").unwrap();
        fs::write(cache.join("repo-bf16.gguf.tmp"), b"partial").unwrap();

        let meta = ModelMetadata {
            repo_id: "owner/repo".to_string(),
            revision: "main".to_string(),
            gguf_file: None,
        };
        let resolved = resolve_checkpoint(&meta, Precision::Bf16, models.path()).await.unwrap();
        assert_eq!(resolved, cache.join("repo-bf16.gguf"));
    }

    #[test]
    fn test_cache_only_reused_for_matching_precision() {
        let cached = names(&["repo-f16.gguf"]);
        assert_eq!(cached_gguf_file(&cached, Precision::Bf16), None);
        assert_eq!(
            cached_gguf_file(&cached, Precision::F16),
            Some("repo-f16.gguf".to_string())
        );

        let untagged = names(&["repo-Q4_0.gguf"]);
        assert_eq!(cached_gguf_file(&untagged, Precision::Bf16), None);

        let both = names(&["a-bf16.gguf", "b-bf16.gguf"]);
        assert_eq!(cached_gguf_file(&both, Precision::Bf16), None);
    }

    #[tokio::test]
    async fn test_failed_download_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join("model-bf16.gguf.tmp");
        let output = dir.path().join("model-bf16.gguf");
        fs::write(&temp, b"partial").unwrap();

        let failed = Err(AdapterError::Download("Download incomplete".to_string()));
        assert!(finish_download(&temp, &output, failed).await.is_err());
        assert!(!temp.exists());
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_finished_download_is_moved_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join("model-bf16.gguf.tmp");
        let output = dir.path().join("model-bf16.gguf");
        fs::write(&temp, b"GGUF").unwrap();

        finish_download(&temp, &output, Ok(())).await.unwrap();
        assert!(!temp.exists());
        assert_eq!(fs::read(&output).unwrap(), b"GGUF");
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.00 GB");
    }
}

use std::{
    fs::{self, File},
    io::{self, Read, Write},
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use anyhow::{anyhow, bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{
    blocking::{Client, Response},
    header::CONTENT_TYPE,
    Url,
};
use sha2::{Digest, Sha256};

use crate::app::{error::GatewayError, settings::DriveSettings};

const CHUNK_SIZE: usize = 32 * 1024;
const HTML_ANSWER: &str =
    "drive returned an HTML page instead of the archive (private file or quota exceeded?)";

static BARE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("bare id regex"));
static ID_IN_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:/folders/|/file/d/|[?&]id=)([A-Za-z0-9_-]+)").expect("drive url regex")
});
static FORM_ACTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<form[^>]*\baction="([^"]+)""#).expect("form action regex"));
static HIDDEN_INPUT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<input[^>]*type="hidden"[^>]*name="([^"]+)"[^>]*value="([^"]*)""#)
        .expect("hidden input regex")
});
static CONFIRM_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"confirm=([0-9A-Za-z_-]+)").expect("confirm token regex"));

/// Normalises a client-supplied drive reference into a bare identifier.
///
/// Accepts the identifier itself or a share URL of the `/folders/<id>`,
/// `/file/d/<id>` or `?id=<id>` shape.
pub fn parse_remote_id(raw: &str) -> Result<String, GatewayError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(GatewayError::ClientInput("id is required".into()));
    }
    if BARE_ID.is_match(trimmed) {
        return Ok(trimmed.to_string());
    }
    ID_IN_URL
        .captures(trimmed)
        .and_then(|captures| captures.get(1))
        .map(|id| id.as_str().to_string())
        .ok_or_else(|| {
            GatewayError::ClientInput(format!("invalid drive identifier {trimmed:?}"))
        })
}

#[derive(Debug)]
pub struct FetchOutcome {
    pub path: PathBuf,
    pub bytes: u64,
    pub checksum: String,
}

pub struct DriveFetcher {
    client: Client,
    base_url: String,
    attempts: u32,
    backoff: Duration,
}

impl DriveFetcher {
    /// Must be called off the async runtime: the blocking client owns its own.
    pub fn new(settings: &DriveSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout())
            .build()
            .context("create http client")?;
        Ok(Self {
            client,
            base_url: settings.base_url.clone(),
            attempts: settings.attempts.max(1),
            backoff: settings.backoff(),
        })
    }

    /// Downloads `remote_id` to `destination`, replacing any existing file.
    pub fn fetch(&self, remote_id: &str, destination: &Path) -> Result<FetchOutcome> {
        let mut delay = self.backoff;
        let mut attempt = 1;
        loop {
            match self.fetch_once(remote_id, destination) {
                Ok(outcome) => return Ok(outcome),
                Err(error) => {
                    let _ = fs::remove_file(destination);
                    if attempt >= self.attempts {
                        return Err(error.context(format!("fetch drive file {remote_id}")));
                    }
                    tracing::warn!(
                        "Drive download attempt {attempt}/{} failed: {error:#}; retrying in {delay:?}",
                        self.attempts
                    );
                    thread::sleep(delay);
                    delay *= 2;
                    attempt += 1;
                }
            }
        }
    }

    fn fetch_once(&self, remote_id: &str, destination: &Path) -> Result<FetchOutcome> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("id", remote_id), ("export", "download")])
            .send()
            .with_context(|| format!("request {}", self.base_url))?
            .error_for_status()
            .context("drive download")?;

        let response = if is_html(&response) {
            let page = response.text().context("read drive confirmation page")?;
            let (url, query) = confirmation_request(&page, &self.base_url, remote_id)
                .ok_or_else(|| anyhow!(HTML_ANSWER))?;
            tracing::debug!("Following drive confirmation form to {url}");
            let confirmed = self
                .client
                .get(&url)
                .query(&query)
                .send()
                .with_context(|| format!("request {url}"))?
                .error_for_status()
                .context("confirmed drive download")?;
            if is_html(&confirmed) {
                bail!(HTML_ANSWER);
            }
            confirmed
        } else {
            response
        };

        let bytes = write_body(response, destination)?;
        let checksum = sha256_hex(destination)?;
        tracing::info!(
            "Downloaded drive file {remote_id} ({bytes} bytes, sha256 {checksum})"
        );
        Ok(FetchOutcome {
            path: destination.to_path_buf(),
            bytes,
            checksum,
        })
    }
}

fn is_html(response: &Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("text/html"))
        .unwrap_or(false)
}

/// Builds the follow-up request for a large-file confirmation page. Relative
/// form actions resolve against `base_url`.
fn confirmation_request(
    page: &str,
    base_url: &str,
    remote_id: &str,
) -> Option<(String, Vec<(String, String)>)> {
    if let Some(action) = FORM_ACTION.captures(page).and_then(|c| c.get(1)) {
        let query = HIDDEN_INPUT
            .captures_iter(page)
            .map(|c| (unescape(&c[1]), unescape(&c[2])))
            .collect();
        let url = Url::parse(base_url)
            .and_then(|base| base.join(&unescape(action.as_str())))
            .ok()?;
        return Some((url.to_string(), query));
    }
    let token = CONFIRM_TOKEN.captures(page)?.get(1)?.as_str().to_string();
    Some((
        base_url.to_string(),
        vec![
            ("id".into(), remote_id.to_string()),
            ("export".into(), "download".into()),
            ("confirm".into(), token),
        ],
    ))
}

fn unescape(value: &str) -> String {
    value.replace("&amp;", "&")
}

fn write_body(mut response: Response, path: &Path) -> Result<u64> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("create staging directory")?;
    }
    let mut file = File::create(path).context("create staging file")?;
    let mut downloaded = 0u64;
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let read = response.read(&mut buffer).context("read download chunk")?;
        if read == 0 {
            break;
        }
        file.write_all(&buffer[..read])
            .context("write download chunk")?;
        downloaded += read as u64;
    }
    file.flush().context("flush staging file")?;
    Ok(downloaded)
}

fn sha256_hex(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("open file for hashing: {}", path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).context("hash downloaded file")?;
    Ok(format!("{:x}", hasher.finalize()))
}

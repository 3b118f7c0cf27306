use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use futures::StreamExt;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{CONTENT_DISPOSITION, REFERER};
use reqwest::Client;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

const FALLBACK_FILENAME: &str = "download.pdf";

/// `filename="..."` / `filename*=UTF-8''...` in Content-Disposition.
static FILENAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)filename\*?=(?:UTF-8'')?"?([^";]+)"?"#).unwrap());

fn filename_from_disposition(disposition: &str) -> Option<String> {
    let m = FILENAME_RE.captures(disposition)?.get(1)?;
    let name = urlencoding::decode(m.as_str())
        .map(|cow| cow.into_owned())
        .unwrap_or_else(|_| m.as_str().to_string());
    let name = name.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Pick the filename for a download: the server-suggested Content-Disposition
/// name first, then the basename of the URL path, then a generic fallback.
/// The result always carries a `.pdf` suffix.
fn derive_filename(disposition: Option<&str>, pdf_url: &Url) -> String {
    if let Some(name) = disposition.and_then(filename_from_disposition) {
        return name;
    }
    let mut name = pdf_url
        .path_segments()
        .and_then(|segments| segments.last())
        .unwrap_or("")
        .to_string();
    if name.is_empty() {
        name = FALLBACK_FILENAME.to_string();
    }
    if !name.to_ascii_lowercase().ends_with(".pdf") {
        name.push_str(".pdf");
    }
    name
}

/// A directory output gets the derived filename inside it; an explicit file
/// path is used as-is, whatever the server suggests.
fn target_path(output: &Path, disposition: Option<&str>, pdf_url: &Url) -> PathBuf {
    if output.is_dir() {
        output.join(derive_filename(disposition, pdf_url))
    } else {
        output.to_path_buf()
    }
}

/// Stream the PDF at `pdf_url` into `output` and return the saved path.
///
/// The body is written chunk by chunk as it arrives off the socket, so large
/// files never reside in memory whole. Interrupted downloads leave the
/// partial file in place.
pub async fn download_pdf(
    client: &Client,
    pdf_url: &Url,
    output: &Path,
    referer: Option<&str>,
) -> Result<PathBuf> {
    let mut request = client.get(pdf_url.clone());
    if let Some(referer) = referer {
        request = request.header(REFERER, referer);
    }
    let response = request
        .send()
        .await
        .context("Download request failed")?
        .error_for_status()
        .context("Server refused the download")?;

    let disposition = response
        .headers()
        .get(CONTENT_DISPOSITION)
        .and_then(|value| value.to_str().ok());
    let out_file = target_path(output, disposition, pdf_url);
    debug!(target: "download", disposition = ?disposition, path = %out_file.display(), "Output path chosen");

    let mut file = File::create(&out_file)
        .await
        .with_context(|| format!("Failed to create {}", out_file.display()))?;

    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Download interrupted while streaming the body")?;
        file.write_all(&chunk)
            .await
            .context("Failed to write output file")?;
        written += chunk.len() as u64;
    }
    file.flush().await.context("Failed to flush output file")?;

    info!(target: "download", bytes = written, path = %out_file.display(), "Download finished");
    Ok(out_file)
}

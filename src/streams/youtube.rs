use std::process::Stdio;

use serde::Deserialize;
use tokio::{io::AsyncReadExt, process::Command};

use super::{Fetcher, Metadata, Stream, StreamError};

/// Fetches video metadata through yt-dlp, the same way a player would.
pub struct YouTubeFetcher;

#[derive(Debug, Deserialize)]
struct VideoInfo {
    #[serde(default)]
    duration: f64,
}

#[async_trait::async_trait]
impl Fetcher for YouTubeFetcher {
    async fn fetch(&self, stream: &Stream) -> Result<Metadata, StreamError> {
        let mut child = Command::new("yt-dlp")
            .arg("--skip-download")
            .arg("-J")
            .args(["--", &stream.url])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| StreamError::ToolUnavailable {
                tool: "yt-dlp",
                reason: e.to_string(),
            })?;

        let mut output = String::new();

        child
            .stdout
            .take()
            .expect("stdout is piped")
            .read_to_string(&mut output)
            .await
            .map_err(|_| StreamError::Unavailable)?;

        let status = child.wait().await.map_err(|_| StreamError::Unavailable)?;

        if !status.success() {
            return Err(StreamError::Unavailable);
        }

        let info: VideoInfo =
            serde_json::from_str(&output).map_err(|source| StreamError::ParseError {
                tool: "yt-dlp",
                source,
            })?;

        Ok(Metadata {
            duration: info.duration,
            raw: serde_json::from_str(&output).unwrap_or_default(),
        })
    }
}

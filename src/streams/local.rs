use std::{path::PathBuf, process::Stdio};

use serde::Deserialize;
use tokio::{io::AsyncReadExt, process::Command};

use super::{Fetcher, Metadata, Stream, StreamError};

/// Probes files in the configured data directory with ffprobe. A url that
/// does not resolve to a readable file is not an error here; playback
/// failure is the client's concern.
pub struct LocalFetcher {
    data_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    format: ProbeFormat,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

impl LocalFetcher {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }
}

#[async_trait::async_trait]
impl Fetcher for LocalFetcher {
    async fn fetch(&self, stream: &Stream) -> Result<Metadata, StreamError> {
        let path = self.data_dir.join(stream.url.trim_start_matches('/'));

        if !path.is_file() {
            return Ok(Metadata::default());
        }

        let mut child = Command::new("ffprobe")
            .args(["-v", "quiet", "-print_format", "json", "-show_format"])
            .arg(&path)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| StreamError::ToolUnavailable {
                tool: "ffprobe",
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

        child.wait().await.map_err(|_| StreamError::Unavailable)?;

        let probe: ProbeOutput =
            serde_json::from_str(&output).map_err(|source| StreamError::ParseError {
                tool: "ffprobe",
                source,
            })?;

        let duration = probe
            .format
            .duration
            .and_then(|d| d.parse().ok())
            .unwrap_or(0.0);

        Ok(Metadata {
            duration,
            raw: serde_json::from_str(&output).unwrap_or_default(),
        })
    }
}

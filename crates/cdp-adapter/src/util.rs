use chromiumoxide::async_process::Child;
use futures::io::{AsyncBufReadExt, BufReader};
use futures::stream::StreamExt;
use tokio::time::{timeout, Duration};

use crate::error::{AdapterError, AdapterErrorKind};

const WS_URL_WAIT: Duration = Duration::from_secs(20);

/// Reads the DevTools websocket url Chromium prints on stderr at startup.
pub async fn extract_ws_url(child: &mut Child) -> Result<String, AdapterError> {
    let stderr = child.stderr.take().ok_or_else(|| {
        AdapterError::new(AdapterErrorKind::CdpIo).with_hint("chromium process has no stderr handle")
    })?;
    let mut lines = BufReader::new(stderr).lines();
    let mut captured = Vec::new();

    let reader = async {
        while let Some(line) = lines.next().await {
            let line = line.map_err(|err| {
                AdapterError::new(AdapterErrorKind::CdpIo).with_hint(err.to_string())
            })?;
            if let Some(ws) = parse_listening_line(&line) {
                return Ok(ws);
            }
            captured.push(line);
        }
        Err(AdapterError::new(AdapterErrorKind::CdpIo).with_hint(format!(
            "chromium exited before printing its devtools url; stderr: {}",
            captured.iter().take(8).cloned().collect::<Vec<_>>().join(" | ")
        )))
    };

    timeout(WS_URL_WAIT, reader).await.map_err(|_| {
        AdapterError::new(AdapterErrorKind::NavTimeout)
            .with_hint("timed out waiting for the devtools websocket url")
    })?
}

fn parse_listening_line(line: &str) -> Option<String> {
    let (_, ws) = line.rsplit_once("listening on ")?;
    let ws = ws.trim();
    (ws.starts_with("ws") && ws.contains("devtools/browser")).then(|| ws.to_string())
}

#[cfg(test)]
mod tests {
    use super::parse_listening_line;

    #[test]
    fn picks_the_browser_endpoint() {
        assert_eq!(
            parse_listening_line("DevTools listening on ws://127.0.0.1:9222/devtools/browser/abc").as_deref(),
            Some("ws://127.0.0.1:9222/devtools/browser/abc")
        );
        assert!(parse_listening_line("[0101/000000.0:ERROR] something else").is_none());
    }
}

use std::io::Read;
use std::path::{Path, PathBuf};

use gitlab_export::webhook::EVENT_HEADER;
use gitlab_export::{Pipe, WebhookRequest};

use super::{CommandResult, Session, open_pipe, open_state};
use crate::config::Config;

pub(crate) struct WebhookArgs {
    pub body: PathBuf,
    pub event: Option<String>,
    pub headers: Vec<String>,
    pub output: Option<PathBuf>,
}

/// Read a file, or stdin for `-`.
pub(crate) fn read_input(path: &Path) -> CommandResult<Vec<u8>> {
    if path == Path::new("-") {
        let mut buf = Vec::new();
        std::io::stdin().read_to_end(&mut buf)?;
        return Ok(buf);
    }
    std::fs::read(path).map_err(|e| format!("failed to read {}: {e}", path.display()).into())
}

/// Parse `Name: value` header arguments. `--event` adds the event header.
fn parse_headers(raw: &[String], event: Option<&str>) -> CommandResult<Vec<(String, String)>> {
    let mut headers = raw
        .iter()
        .map(|h| {
            let (name, value) = h
                .split_once(':')
                .ok_or_else(|| format!("invalid header {h:?}, expected \"Name: value\""))?;
            Ok((name.trim().to_string(), value.trim().to_string()))
        })
        .collect::<Result<Vec<_>, String>>()?;
    if let Some(event) = event {
        headers.retain(|(name, _)| !name.eq_ignore_ascii_case(EVENT_HEADER));
        headers.push((EVENT_HEADER.to_string(), event.to_string()));
    }
    if !headers
        .iter()
        .any(|(name, _)| name.eq_ignore_ascii_case("content-type"))
    {
        headers.push(("Content-Type".to_string(), "application/json".to_string()));
    }
    Ok(headers)
}

pub(crate) async fn handle_webhook(config: &Config, args: WebhookArgs) -> CommandResult {
    let headers = parse_headers(&args.headers, args.event.as_deref())?;
    let request = WebhookRequest::new(headers, read_input(&args.body)?);

    let session = Session::start(config, config.export_options(false, None), None)?;
    let state = open_state(config)?;
    let pipe = open_pipe(args.output.as_deref())?;

    let written = session
        .integration
        .webhook(&session.instance, &request, &pipe, &state)
        .await;
    pipe.close().await?;
    let written = written?;

    tracing::info!(written, "Webhook delivered");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn headers_are_split_and_trimmed() {
        let headers = parse_headers(
            &["X-Gitlab-Token: secret".to_string(), "content-type:application/json".to_string()],
            None,
        )
        .unwrap();
        assert_eq!(
            headers,
            vec![
                ("X-Gitlab-Token".to_string(), "secret".to_string()),
                ("content-type".to_string(), "application/json".to_string()),
            ]
        );
    }

    #[test]
    fn event_flag_replaces_event_header() {
        let headers = parse_headers(
            &["x-gitlab-event: Push Hook".to_string()],
            Some("Merge Request Hook"),
        )
        .unwrap();
        assert!(headers.contains(&(EVENT_HEADER.to_string(), "Merge Request Hook".to_string())));
        assert_eq!(
            headers
                .iter()
                .filter(|(n, _)| n.eq_ignore_ascii_case(EVENT_HEADER))
                .count(),
            1
        );
        assert!(headers.iter().any(|(n, _)| n == "Content-Type"));
    }

    #[test]
    fn malformed_header_is_rejected() {
        assert!(parse_headers(&["no colon here".to_string()], None).is_err());
    }

    #[test]
    fn body_is_read_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hook.json");
        std::fs::write(&path, br#"{"object_kind":"push"}"#).unwrap();

        assert_eq!(read_input(&path).unwrap(), br#"{"object_kind":"push"}"#);
        assert!(read_input(&dir.path().join("missing.json")).is_err());
    }
}

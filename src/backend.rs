//! Git smart-HTTP backend gateway.
//!
//! Clone, fetch and push negotiation is not implemented here. Requests are
//! handed to an external CGI program, `git http-backend` by default, and its
//! output is proxied back verbatim.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::{HeaderName, HeaderValue, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::Response;
use futures_lite::StreamExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use crate::config::BackendConfig;
use crate::stream::reader_stream;
use crate::{Error, Result};

/// Upper bound on the CGI header block.
const MAX_HEADER_BYTES: usize = 64 * 1024;

/// A request destined for the smart-HTTP backend.
pub struct BackendRequest {
    /// HTTP method, passed as `REQUEST_METHOD`.
    pub method: Method,
    /// Request path, e.g. `/demo/info/refs`.
    pub path: String,
    /// Raw query string without the `?`.
    pub query: Option<String>,
    /// Incoming request headers.
    pub headers: HeaderMap,
    /// Identity forwarded by the reverse proxy, if any.
    pub remote_user: Option<String>,
    /// Request body, streamed to the backend's stdin.
    pub body: Body,
}

/// Serves Git smart-HTTP requests.
///
/// Implementations receive the request unmodified and return the response
/// to send back as-is.
#[async_trait]
pub trait SmartHttpBackend: Send + Sync {
    async fn serve(&self, request: BackendRequest) -> Result<Response>;
}

/// Runs a CGI program per request.
#[derive(Debug, Clone)]
pub struct GitHttpBackend {
    project_root: PathBuf,
    program: PathBuf,
    args: Vec<String>,
}

impl GitHttpBackend {
    pub fn new<P: AsRef<Path>>(project_root: P, config: &BackendConfig) -> Self {
        GitHttpBackend {
            project_root: project_root.as_ref().to_path_buf(),
            program: config.program.clone(),
            args: config.args.clone(),
        }
    }

    fn command(&self, request: &BackendRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env("GIT_PROJECT_ROOT", &self.project_root)
            .env("GIT_HTTP_EXPORT_ALL", "1")
            .env("GATEWAY_INTERFACE", "CGI/1.1")
            .env("SERVER_PROTOCOL", "HTTP/1.1")
            .env("REQUEST_METHOD", request.method.as_str())
            .env("PATH_INFO", &request.path)
            .env("QUERY_STRING", request.query.as_deref().unwrap_or(""));

        let cgi_headers = [
            (CONTENT_TYPE, "CONTENT_TYPE"),
            (CONTENT_LENGTH, "CONTENT_LENGTH"),
            (CONTENT_ENCODING, "HTTP_CONTENT_ENCODING"),
            (HeaderName::from_static("git-protocol"), "HTTP_GIT_PROTOCOL"),
        ];
        for (header, var) in cgi_headers {
            match request.headers.get(&header).and_then(|v| v.to_str().ok()) {
                Some(value) => cmd.env(var, value),
                None => cmd.env_remove(var),
            };
        }

        match &request.remote_user {
            Some(user) => cmd.env("REMOTE_USER", user),
            None => cmd.env_remove("REMOTE_USER"),
        };

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl SmartHttpBackend for GitHttpBackend {
    async fn serve(&self, request: BackendRequest) -> Result<Response> {
        let mut child = self.command(&request).spawn().map_err(|e| {
            Error::Backend(format!("failed to start {}: {}", self.program.display(), e))
        })?;
        tracing::debug!(
            method = %request.method,
            path = %request.path,
            user = request.remote_user.as_deref().unwrap_or("-"),
            "spawned smart-HTTP backend"
        );

        let pipes = (child.stdin.take(), child.stdout.take(), child.stderr.take());
        let (Some(stdin), Some(stdout), Some(stderr)) = pipes else {
            return Err(Error::Backend("backend pipes unavailable".into()));
        };

        // Feed the request body while the response is being read, so
        // large pushes never deadlock on a full pipe.
        let mut body = request.body.into_data_stream();
        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(chunk) = body.next().await {
                let written = match chunk {
                    Ok(bytes) => stdin.write_all(&bytes).await,
                    Err(e) => {
                        tracing::warn!(error = %e, "request body aborted");
                        break;
                    }
                };
                if written.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::warn!(target: "git_http_backend", "{}", line);
            }
        });

        let mut stdout = BufReader::new(stdout);
        let (status, headers) = read_cgi_head(&mut stdout).await?;

        tokio::spawn(async move {
            match child.wait().await {
                Ok(exit) if exit.success() => {}
                Ok(exit) => tracing::warn!(%exit, "smart-HTTP backend failed"),
                Err(e) => tracing::warn!(error = %e, "could not reap smart-HTTP backend"),
            }
        });

        let mut response = Response::new(Body::from_stream(reader_stream(stdout)));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

/// Parse the CGI response header block, up to and including the blank line.
///
/// A `Status:` header sets the response status; a `Location:` without
/// one means a redirect. Everything else is copied to the response.
pub async fn read_cgi_head<R>(reader: &mut R) -> Result<(StatusCode, HeaderMap)>
where
    R: AsyncBufRead + Unpin,
{
    let mut status = None;
    let mut headers = HeaderMap::new();
    let mut consumed = 0;

    let mut raw = Vec::new();
    loop {
        raw.clear();
        let n = reader.read_until(b'\n', &mut raw).await?;
        if n == 0 {
            return Err(Error::Backend("backend closed output before headers".into()));
        }
        consumed += n;
        if consumed > MAX_HEADER_BYTES {
            return Err(Error::Backend("backend header block too large".into()));
        }

        let line = std::str::from_utf8(&raw)
            .map_err(|e| Error::Backend(format!("header line is not UTF-8: {}", e)))?;
        let line = line.trim_end_matches(&['\r', '\n'][..]);
        if line.is_empty() {
            break;
        }

        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::Backend(format!("malformed header line {:?}", line)))?;
        let value = value.trim();

        if name.eq_ignore_ascii_case("status") {
            let code = value.split_whitespace().next().unwrap_or("");
            let code = code
                .parse::<u16>()
                .ok()
                .and_then(|c| StatusCode::from_u16(c).ok())
                .ok_or_else(|| Error::Backend(format!("bad status {:?}", value)))?;
            status = Some(code);
            continue;
        }

        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|e| Error::Backend(format!("bad header name: {}", e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::Backend(format!("bad header value: {}", e)))?;
        headers.append(name, value);
    }

    let status = status.unwrap_or(if headers.contains_key("location") {
        StatusCode::FOUND
    } else {
        StatusCode::OK
    });
    Ok((status, headers))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parse_cgi_head() {
        let mut output: &[u8] = b"Status: 404 Not Found\r\n\
            Content-Type: text/plain\r\n\
            Expires: Fri, 01 Jan 1980 00:00:00 GMT\r\n\
            \r\n\
            Repository not exported.\n";

        let (status, headers) = read_cgi_head(&mut output).await.unwrap();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(headers["content-type"], "text/plain");
        assert!(headers.contains_key("expires"));
        assert!(!headers.contains_key("status"));
        // Body is left in the reader.
        assert_eq!(output, b"Repository not exported.\n");
    }

    #[tokio::test]
    async fn parse_cgi_head_defaults() {
        let mut output: &[u8] = b"Content-Type: application/x-git-upload-pack-advertisement\n\n0000";
        let (status, headers) = read_cgi_head(&mut output).await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            headers["content-type"],
            "application/x-git-upload-pack-advertisement"
        );

        let mut redirect: &[u8] = b"Location: /elsewhere\r\n\r\n";
        let (status, _) = read_cgi_head(&mut redirect).await.unwrap();
        assert_eq!(status, StatusCode::FOUND);
    }

    #[tokio::test]
    async fn parse_cgi_head_truncated() {
        let mut output: &[u8] = b"Content-Type: text/plain\r\n";
        assert!(matches!(
            read_cgi_head(&mut output).await,
            Err(Error::Backend(_))
        ));

        let mut garbage: &[u8] = b"not a header\r\n\r\n";
        assert!(matches!(
            read_cgi_head(&mut garbage).await,
            Err(Error::Backend(_))
        ));
    }

    #[tokio::test]
    async fn parse_cgi_head_not_utf8() {
        let mut output: &[u8] = b"Content-Type: text/\xff\xfeplain\r\n\r\nbody";
        let err = read_cgi_head(&mut output).await.unwrap_err();
        assert!(matches!(err, Error::Backend(_)));
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }

    fn request(path: &str, user: Option<&str>, body: &'static str) -> BackendRequest {
        BackendRequest {
            method: Method::POST,
            path: path.to_string(),
            query: Some("service=git-upload-pack".into()),
            headers: HeaderMap::new(),
            remote_user: user.map(str::to_string),
            body: Body::from(body),
        }
    }

    #[tokio::test]
    async fn missing_program() {
        let backend = GitHttpBackend::new(
            "/srv/git",
            &BackendConfig {
                program: PathBuf::from("/nonexistent/git-http-backend"),
                args: vec![],
            },
        );
        let err = backend
            .serve(request("/demo/info/refs", None, ""))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Backend(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn proxies_cgi_program() {
        let script = r#"printf 'Status: 200 OK\r\nContent-Type: text/plain\r\n\r\n'
printf '%s|%s|%s|%s|%s\n' "$REMOTE_USER" "$PATH_INFO" "$QUERY_STRING" "$REQUEST_METHOD" "$GIT_PROJECT_ROOT"
cat"#;
        let backend = GitHttpBackend::new(
            "/srv/git",
            &BackendConfig {
                program: PathBuf::from("/bin/sh"),
                args: vec!["-c".into(), script.into()],
            },
        );

        let response = backend
            .serve(request("/demo/git-upload-pack", Some("alice"), "0000"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/plain");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(
            std::str::from_utf8(&body).unwrap(),
            "alice|/demo/git-upload-pack|service=git-upload-pack|POST|/srv/git\n0000"
        );
    }
}

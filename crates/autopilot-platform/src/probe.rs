//! HTTP endpoint probe.

use std::time::Duration;

use tracing::debug;

use autopilot_core::{EndpointResponse, PlatformError, PlatformResult};

/// Where a probe connects and what it asks for.
#[derive(Debug, PartialEq, Eq)]
struct ProbeTarget {
    /// Connectable host; IPv6 literals without their brackets.
    host: String,
    port: u16,
    /// Value for the `host` header, as written in the URL.
    authority: String,
    path: String,
}

fn parse_target(url: &str) -> PlatformResult<ProbeTarget> {
    let uri: http::Uri = url
        .parse()
        .map_err(|e| PlatformError::operation("check_endpoint", format!("invalid url {url}: {e}")))?;
    if uri.scheme_str() != Some("http") {
        return Err(PlatformError::Unsupported(format!(
            "only plain http endpoints can be probed: {url}"
        )));
    }
    let authority = uri
        .authority()
        .ok_or_else(|| PlatformError::operation("check_endpoint", format!("no host in {url}")))?;
    let host = authority.host();
    let path = uri
        .path_and_query()
        .map(|p| p.as_str())
        .filter(|p| !p.is_empty())
        .unwrap_or("/");
    Ok(ProbeTarget {
        host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
        port: authority.port_u16().unwrap_or(80),
        authority: authority.as_str().to_string(),
        path: path.to_string(),
    })
}

/// GET an endpoint and report its status code and round-trip time.
///
/// Any status is returned as a response; only connection errors and
/// timeouts are errors. Classifying 2xx as healthy is the caller's job.
pub async fn http_probe(url: &str, timeout: Duration) -> PlatformResult<EndpointResponse> {
    let target = parse_target(url)?;
    let started = tokio::time::Instant::now();

    let result = tokio::time::timeout(timeout, async {
        let stream = tokio::net::TcpStream::connect((target.host.as_str(), target.port)).await.map_err(|e| {
            debug!(error = %e, %url, "endpoint probe connection failed");
            PlatformError::operation("check_endpoint", e.to_string())
        })?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| {
                debug!(error = %e, %url, "endpoint probe handshake failed");
                PlatformError::operation("check_endpoint", e.to_string())
            })?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method("GET")
            .uri(target.path.as_str())
            .header("host", target.authority.as_str())
            .header("user-agent", "autopilot-probe/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
            .map_err(|e| PlatformError::operation("check_endpoint", e.to_string()))?;

        let resp = sender.send_request(req).await.map_err(|e| {
            debug!(error = %e, %url, "endpoint probe request failed");
            PlatformError::operation("check_endpoint", e.to_string())
        })?;
        Ok(resp.status().as_u16())
    })
    .await;

    match result {
        Ok(Ok(status_code)) => Ok(EndpointResponse {
            status_code,
            duration_ms: started.elapsed().as_millis() as u64,
        }),
        Ok(Err(e)) => Err(e),
        Err(_) => {
            debug!(%url, "endpoint probe timed out");
            Err(PlatformError::Timeout(url.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn target(host: &str, port: u16, authority: &str, path: &str) -> ProbeTarget {
        ProbeTarget {
            host: host.to_string(),
            port,
            authority: authority.to_string(),
            path: path.to_string(),
        }
    }

    #[test]
    fn missing_port_and_path_get_defaults() {
        assert_eq!(
            parse_target("http://api.internal").unwrap(),
            target("api.internal", 80, "api.internal", "/")
        );
    }

    #[test]
    fn explicit_port_and_query_are_kept() {
        assert_eq!(
            parse_target("http://127.0.0.1:8080/health?deep=1").unwrap(),
            target("127.0.0.1", 8080, "127.0.0.1:8080", "/health?deep=1")
        );
    }

    #[test]
    fn ipv6_literals_connect_without_brackets() {
        assert_eq!(
            parse_target("http://[::1]/health").unwrap(),
            target("::1", 80, "[::1]", "/health")
        );
        assert_eq!(
            parse_target("http://[fe80::2]:9000/").unwrap(),
            target("fe80::2", 9000, "[fe80::2]:9000", "/")
        );
    }

    #[test]
    fn only_plain_http_is_probed() {
        assert!(matches!(
            parse_target("https://secure/health"),
            Err(PlatformError::Unsupported(_))
        ));
        assert!(parse_target("not a url").is_err());
    }

    #[tokio::test]
    async fn probe_to_closed_port_errors() {
        let result = http_probe("http://127.0.0.1:1/healthz", Duration::from_millis(200)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn probe_reports_status_code() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(b"HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\n\r\n")
                .await
                .unwrap();
        });

        let resp = http_probe(&format!("http://{addr}/health"), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(resp.status_code, 503);
    }
}

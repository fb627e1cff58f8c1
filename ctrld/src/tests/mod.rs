
use std::sync::{Arc, Mutex};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hickory_proto::op::Message;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

use crate::resolver::doh::DNS_MESSAGE_CONTENT_TYPE;

/// A plain HTTP/1.1 DoH endpoint on loopback. Every well-formed RFC 8484
/// GET is answered with `status` and `body`; the decoded queries are kept.
pub struct DohStub {
    pub port: u16,
    pub queries: Arc<Mutex<Vec<Message>>>,
    handle: JoinHandle<()>,
}

impl DohStub {
    pub async fn spawn(status: u16, body: Vec<u8>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let queries = Arc::new(Mutex::new(Vec::new()));

        let queries_clone = queries.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let queries = queries_clone.clone();
                let body = body.clone();
                tokio::spawn(async move {
                    serve_one(stream, status, &body, &queries).await;
                });
            }
        });

        Self {
            port,
            queries,
            handle,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("http://127.0.0.1:{}/dns-query", self.port)
    }
}

impl Drop for DohStub {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// Checks the request shape and returns the decoded query, or why not.
fn parse_request(head: &str) -> Result<Message, String> {
    let mut lines = head.split("\r\n");
    let request_line = lines.next().ok_or("empty request")?;
    let mut parts = request_line.split(' ');
    if parts.next() != Some("GET") {
        return Err(format!("not a GET: {}", request_line));
    }
    let target = parts.next().ok_or("missing target")?;
    let encoded = target
        .strip_prefix("/dns-query?dns=")
        .ok_or_else(|| format!("unexpected target: {}", target))?;

    let mut accept_ok = false;
    let mut content_type_ok = false;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("accept") {
            accept_ok = value == DNS_MESSAGE_CONTENT_TYPE;
        } else if name.eq_ignore_ascii_case("content-type") {
            content_type_ok = value == DNS_MESSAGE_CONTENT_TYPE;
        }
    }
    if !accept_ok || !content_type_ok {
        return Err("missing dns-message headers".to_owned());
    }

    let wire = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| format!("bad base64url: {}", e))?;
    Message::from_vec(&wire).map_err(|e| format!("bad dns message: {}", e))
}

async fn serve_one(
    mut stream: TcpStream,
    status: u16,
    body: &[u8],
    queries: &Mutex<Vec<Message>>,
) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }

    let head = String::from_utf8_lossy(&buf).into_owned();
    let (status, body) = match parse_request(&head) {
        Ok(query) => {
            queries.lock().unwrap().push(query);
            (status, body.to_vec())
        }
        Err(why) => (400, why.into_bytes()),
    };

    let mut resp = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        reason(status),
        DNS_MESSAGE_CONTENT_TYPE,
        body.len()
    )
    .into_bytes();
    resp.extend_from_slice(&body);
    let _ = stream.write_all(&resp).await;
    let _ = stream.shutdown().await;
}

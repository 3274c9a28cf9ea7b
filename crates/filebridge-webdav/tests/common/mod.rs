//! In-process WebDAV server backed by a temporary directory.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use filebridge_base::{ServerModel, ServerType};
use percent_encoding::percent_decode_str;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

pub const USER: &str = "alice";
pub const PASSWORD: &str = "secret";

/// `Basic base64("alice:secret")`.
const AUTHORIZATION: &str = "Basic YWxpY2U6c2VjcmV0";

#[derive(Default)]
struct Flags {
    read_only: AtomicBool,
    stall: AtomicBool,
}

pub struct FakeDav {
    pub port: u16,
    pub root: TempDir,
    flags: Arc<Flags>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl FakeDav {
    pub async fn start() -> Self {
        let root = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let flags = Arc::new(Flags::default());
        let requests = Arc::new(Mutex::new(Vec::new()));

        let dir = root.path().to_path_buf();
        let (shared, log) = (flags.clone(), requests.clone());
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let handler = Handler {
                    root: dir.clone(),
                    flags: shared.clone(),
                    requests: log.clone(),
                };
                tokio::spawn(async move {
                    let _ = handler.serve(stream).await;
                });
            }
        });

        Self {
            port,
            root,
            flags,
            requests,
        }
    }

    pub fn server_model(&self, password: &str) -> ServerModel {
        let mut server = ServerModel::new("fake", ServerType::Webdav, "127.0.0.1", USER, password);
        server.port = self.port;
        server.connect_timeout_secs = 2;
        server
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.path().join(relative)
    }

    /// Refuse every write with `403 Forbidden`.
    pub fn read_only(&self) {
        self.flags.read_only.store(true, Ordering::SeqCst);
    }

    /// Send half of every `GET` body, then hang until the client goes away.
    pub fn stall_downloads(&self) {
        self.flags.stall.store(true, Ordering::SeqCst);
    }

    /// Request heads received so far, lowercased.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// The recorded head of the first request using `method`.
    pub fn request(&self, method: &str) -> Option<String> {
        let prefix = format!("{} ", method.to_lowercase());
        self.requests().into_iter().find(|head| head.starts_with(&prefix))
    }
}

struct Request {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Request {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

struct Handler {
    root: PathBuf,
    flags: Arc<Flags>,
    requests: Arc<Mutex<Vec<String>>>,
}

async fn respond(out: &mut OwnedWriteHalf, status: &str, body: &[u8]) -> io::Result<()> {
    let head = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/xml\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        body.len()
    );
    out.write_all(head.as_bytes()).await?;
    out.write_all(body).await?;
    out.shutdown().await
}

async fn read_request(reader: &mut BufReader<OwnedReadHalf>) -> io::Result<Option<Request>> {
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    let mut parts = line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or("/");
    let path = percent_decode_str(target).decode_utf8_lossy().to_string();

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).await?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            headers.push((key.trim().to_lowercase(), value.trim().to_string()));
        }
    }

    let mut request = Request {
        method,
        path,
        headers,
        body: Vec::new(),
    };
    if let Some(length) = request.header("content-length").and_then(|v| v.parse::<usize>().ok()) {
        let mut body = vec![0u8; length];
        reader.read_exact(&mut body).await?;
        request.body = body;
    } else if request
        .header("transfer-encoding")
        .map_or(false, |v| v.eq_ignore_ascii_case("chunked"))
    {
        loop {
            let mut size = String::new();
            reader.read_line(&mut size).await?;
            let size = usize::from_str_radix(size.trim(), 16).unwrap_or(0);
            let mut chunk = vec![0u8; size + 2];
            reader.read_exact(&mut chunk).await?;
            if size == 0 {
                break;
            }
            request.body.extend_from_slice(&chunk[..size]);
        }
    }
    Ok(Some(request))
}

impl Handler {
    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/').trim_end_matches('/'))
    }

    async fn serve(self, stream: TcpStream) -> io::Result<()> {
        let (read, mut out) = stream.into_split();
        let mut reader = BufReader::new(read);
        let Some(request) = read_request(&mut reader).await? else {
            return Ok(());
        };

        let mut head = format!("{} {}", request.method, request.path);
        for (key, value) in &request.headers {
            head.push_str(&format!("\n{}: {}", key, value));
        }
        self.requests.lock().unwrap().push(head.to_lowercase());

        if request.header("authorization") != Some(AUTHORIZATION) {
            return respond(&mut out, "401 Unauthorized", b"").await;
        }
        let writes = ["PUT", "MKCOL", "DELETE", "MOVE", "COPY"];
        if self.flags.read_only.load(Ordering::SeqCst) && writes.contains(&request.method.as_str()) {
            return respond(&mut out, "403 Forbidden", b"").await;
        }

        let target = self.resolve(&request.path);
        match request.method.as_str() {
            "PROPFIND" => {
                if !target.exists() {
                    return respond(&mut out, "404 Not Found", b"").await;
                }
                let depth = request.header("depth").unwrap_or("infinity");
                let body = self.multistatus(&target, depth == "1");
                respond(&mut out, "207 Multi-Status", body.as_bytes()).await
            }
            "GET" => {
                let Ok(bytes) = std::fs::read(&target) else {
                    return respond(&mut out, "404 Not Found", b"").await;
                };
                if self.flags.stall.load(Ordering::SeqCst) {
                    let head = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", bytes.len());
                    out.write_all(head.as_bytes()).await?;
                    out.write_all(&bytes[..bytes.len() / 2]).await?;
                    out.flush().await?;
                    // Hold the response open until the client hangs up.
                    let mut buf = [0u8; 64];
                    while reader.read(&mut buf).await? > 0 {}
                    return Ok(());
                }
                respond(&mut out, "200 OK", &bytes).await
            }
            "PUT" => {
                if !target.parent().map_or(false, Path::is_dir) {
                    return respond(&mut out, "409 Conflict", b"").await;
                }
                let created = !target.exists();
                std::fs::write(&target, &request.body)?;
                let status = if created { "201 Created" } else { "204 No Content" };
                respond(&mut out, status, b"").await
            }
            "MKCOL" => {
                if target.exists() {
                    return respond(&mut out, "405 Method Not Allowed", b"").await;
                }
                match std::fs::create_dir(&target) {
                    Ok(()) => respond(&mut out, "201 Created", b"").await,
                    Err(_) => respond(&mut out, "409 Conflict", b"").await,
                }
            }
            "DELETE" => {
                let removed = if target.is_dir() {
                    std::fs::remove_dir_all(&target)
                } else {
                    std::fs::remove_file(&target)
                };
                match removed {
                    Ok(()) => respond(&mut out, "204 No Content", b"").await,
                    Err(_) => respond(&mut out, "404 Not Found", b"").await,
                }
            }
            "MOVE" | "COPY" => {
                if !target.exists() {
                    return respond(&mut out, "404 Not Found", b"").await;
                }
                let Some(dest) = request
                    .header("destination")
                    .and_then(|d| url::Url::parse(d).ok())
                    .map(|url| percent_decode_str(url.path()).decode_utf8_lossy().to_string())
                else {
                    return respond(&mut out, "400 Bad Request", b"").await;
                };
                let dest = self.resolve(&dest);
                let replaced = dest.exists();
                if replaced {
                    if request.header("overwrite") == Some("F") {
                        return respond(&mut out, "412 Precondition Failed", b"").await;
                    }
                    if dest.is_dir() {
                        std::fs::remove_dir_all(&dest)?;
                    } else {
                        std::fs::remove_file(&dest)?;
                    }
                }
                if request.method == "MOVE" {
                    std::fs::rename(&target, &dest)?;
                } else {
                    copy_tree(&target, &dest)?;
                }
                let status = if replaced { "204 No Content" } else { "201 Created" };
                respond(&mut out, status, b"").await
            }
            _ => respond(&mut out, "501 Not Implemented", b"").await,
        }
    }

    fn multistatus(&self, target: &Path, with_children: bool) -> String {
        let mut body = String::from(r#"<?xml version="1.0" encoding="utf-8"?><d:multistatus xmlns:d="DAV:">"#);
        body.push_str(&self.response(target));
        if with_children && target.is_dir() {
            if let Ok(entries) = std::fs::read_dir(target) {
                for entry in entries.flatten() {
                    body.push_str(&self.response(&entry.path()));
                }
            }
        }
        body.push_str("</d:multistatus>");
        body
    }

    fn response(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap().to_string_lossy().replace('\\', "/");
        let meta = std::fs::metadata(path).unwrap();
        let mut href = format!("/{}", relative).replace(' ', "%20");
        let kind = if meta.is_dir() {
            if !href.ends_with('/') {
                href.push('/');
            }
            "<d:resourcetype><d:collection/></d:resourcetype>".to_string()
        } else {
            format!("<d:resourcetype/><d:getcontentlength>{}</d:getcontentlength>", meta.len())
        };
        format!(
            "<d:response><d:href>{}</d:href><d:propstat><d:prop>{}</d:prop><d:status>HTTP/1.1 200 OK</d:status></d:propstat></d:response>",
            href, kind
        )
    }
}

fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
    if from.is_dir() {
        std::fs::create_dir(to)?;
        for entry in std::fs::read_dir(from)? {
            let entry = entry?;
            copy_tree(&entry.path(), &to.join(entry.file_name()))?;
        }
        Ok(())
    } else {
        std::fs::copy(from, to).map(|_| ())
    }
}

//! In-process FTP server backed by a temporary directory.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use filebridge_base::{ServerModel, ServerType};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};

pub const USER: &str = "alice";
pub const PASSWORD: &str = "secret";

pub struct FakeServer {
    pub port: u16,
    pub root: TempDir,
    sessions: Arc<AtomicUsize>,
    stall: Arc<AtomicBool>,
    ignore_quit: Arc<AtomicBool>,
}

impl FakeServer {
    pub async fn start() -> Self {
        let root = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let sessions = Arc::new(AtomicUsize::new(0));
        let stall = Arc::new(AtomicBool::new(false));
        let ignore_quit = Arc::new(AtomicBool::new(false));

        let dir = root.path().to_path_buf();
        let (counter, stalled, silent) = (sessions.clone(), stall.clone(), ignore_quit.clone());
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let session = Session {
                    root: dir.clone(),
                    stall: stalled.clone(),
                    ignore_quit: silent.clone(),
                };
                let counter = counter.clone();
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let _ = session.serve(stream).await;
                    counter.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        Self {
            port,
            root,
            sessions,
            stall,
            ignore_quit,
        }
    }

    pub fn server_model(&self, password: &str) -> ServerModel {
        let mut server = ServerModel::new("fake", ServerType::Ftp, "127.0.0.1", USER, password);
        server.port = self.port;
        server.connect_timeout_secs = 2;
        server
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.path().join(relative)
    }

    /// Send half of every download, then hang until the client goes away.
    pub fn stall_downloads(&self) {
        self.stall.store(true, Ordering::SeqCst);
    }

    /// Never answer `QUIT`; keep the control connection open until the
    /// client closes it.
    pub fn ignore_quit(&self) {
        self.ignore_quit.store(true, Ordering::SeqCst);
    }

    /// Wait until every control connection has been closed.
    pub async fn wait_idle(&self) -> bool {
        for _ in 0..200 {
            if self.sessions.load(Ordering::SeqCst) == 0 {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

struct Session {
    root: PathBuf,
    stall: Arc<AtomicBool>,
    ignore_quit: Arc<AtomicBool>,
}

async fn reply(out: &mut OwnedWriteHalf, line: &str) -> std::io::Result<()> {
    out.write_all(format!("{}\r\n", line).as_bytes()).await
}

impl Session {
    fn resolve(&self, cwd: &str, arg: &str) -> PathBuf {
        let path = if arg.starts_with('/') {
            arg.to_string()
        } else {
            format!("{}/{}", cwd.trim_end_matches('/'), arg)
        };
        self.root.join(path.trim_start_matches('/'))
    }

    async fn serve(self, stream: TcpStream) -> std::io::Result<()> {
        let (read, mut out) = stream.into_split();
        let mut lines = BufReader::new(read).lines();
        reply(&mut out, "220 fake ftp ready").await?;

        let mut user = String::new();
        let mut logged_in = false;
        let mut cwd = "/".to_string();
        let mut passive: Option<TcpListener> = None;
        let mut rename_from: Option<PathBuf> = None;

        while let Some(line) = lines.next_line().await? {
            let (cmd, arg) = line.split_once(' ').unwrap_or((line.as_str(), ""));
            let cmd = cmd.to_ascii_uppercase();

            match cmd.as_str() {
                "USER" => {
                    user = arg.to_string();
                    reply(&mut out, "331 password required").await?;
                }
                "PASS" => {
                    if user == USER && arg == PASSWORD {
                        logged_in = true;
                        reply(&mut out, "230 logged in").await?;
                    } else {
                        reply(&mut out, "530 login incorrect").await?;
                    }
                }
                "QUIT" => {
                    if self.ignore_quit.load(Ordering::SeqCst) {
                        while lines.next_line().await?.is_some() {}
                        return Ok(());
                    }
                    reply(&mut out, "221 bye").await?;
                    return Ok(());
                }
                _ if !logged_in => reply(&mut out, "530 not logged in").await?,
                "TYPE" => reply(&mut out, "200 type set").await?,
                "PASV" => {
                    let listener = TcpListener::bind("127.0.0.1:0").await?;
                    let port = listener.local_addr()?.port();
                    passive = Some(listener);
                    reply(
                        &mut out,
                        &format!("227 Entering Passive Mode (127,0,0,1,{},{})", port >> 8, port & 0xff),
                    )
                    .await?;
                }
                "CWD" => {
                    let dir = self.resolve(&cwd, arg);
                    if dir.is_dir() {
                        cwd = format!("/{}", dir.strip_prefix(&self.root).unwrap().to_string_lossy());
                        reply(&mut out, "250 ok").await?;
                    } else {
                        reply(&mut out, "550 no such directory").await?;
                    }
                }
                "SIZE" => {
                    let path = self.resolve(&cwd, arg);
                    match std::fs::metadata(&path) {
                        Ok(meta) if meta.is_file() => reply(&mut out, &format!("213 {}", meta.len())).await?,
                        _ => reply(&mut out, "550 no such file").await?,
                    }
                }
                "LIST" => {
                    let Some(listener) = passive.take() else {
                        reply(&mut out, "425 use PASV first").await?;
                        continue;
                    };
                    let dir = self.resolve(&cwd, arg);
                    reply(&mut out, "150 listing").await?;
                    let (mut data, _) = listener.accept().await?;
                    data.write_all(listing(&dir).as_bytes()).await?;
                    data.shutdown().await?;
                    drop(data);
                    reply(&mut out, "226 done").await?;
                }
                "RETR" => {
                    let path = self.resolve(&cwd, arg);
                    let Ok(bytes) = std::fs::read(&path) else {
                        reply(&mut out, "550 no such file").await?;
                        continue;
                    };
                    let Some(listener) = passive.take() else {
                        reply(&mut out, "425 use PASV first").await?;
                        continue;
                    };
                    reply(&mut out, "150 sending").await?;
                    let (mut data, _) = listener.accept().await?;
                    if self.stall.load(Ordering::SeqCst) {
                        data.write_all(&bytes[..bytes.len() / 2]).await?;
                        data.flush().await?;
                        // Hold the transfer open until the client hangs up.
                        while lines.next_line().await?.is_some() {}
                        return Ok(());
                    }
                    data.write_all(&bytes).await?;
                    data.shutdown().await?;
                    drop(data);
                    reply(&mut out, "226 done").await?;
                }
                "STOR" => {
                    let path = self.resolve(&cwd, arg);
                    if !path.parent().map_or(false, Path::is_dir) {
                        reply(&mut out, "553 cannot create file").await?;
                        continue;
                    }
                    let Some(listener) = passive.take() else {
                        reply(&mut out, "425 use PASV first").await?;
                        continue;
                    };
                    reply(&mut out, "150 receiving").await?;
                    let (mut data, _) = listener.accept().await?;
                    let mut bytes = Vec::new();
                    data.read_to_end(&mut bytes).await?;
                    std::fs::write(&path, bytes)?;
                    reply(&mut out, "226 stored").await?;
                }
                "MKD" => match std::fs::create_dir(self.resolve(&cwd, arg)) {
                    Ok(()) => reply(&mut out, &format!("257 \"{}\" created", arg)).await?,
                    Err(_) => reply(&mut out, "550 cannot create").await?,
                },
                "RMD" => match std::fs::remove_dir(self.resolve(&cwd, arg)) {
                    Ok(()) => reply(&mut out, "250 removed").await?,
                    Err(_) => reply(&mut out, "550 cannot remove").await?,
                },
                "DELE" => match std::fs::remove_file(self.resolve(&cwd, arg)) {
                    Ok(()) => reply(&mut out, "250 deleted").await?,
                    Err(_) => reply(&mut out, "550 cannot delete").await?,
                },
                "RNFR" => {
                    let path = self.resolve(&cwd, arg);
                    if path.exists() {
                        rename_from = Some(path);
                        reply(&mut out, "350 ready for RNTO").await?;
                    } else {
                        reply(&mut out, "550 no such file").await?;
                    }
                }
                "RNTO" => {
                    let renamed = match rename_from.take() {
                        Some(from) => std::fs::rename(from, self.resolve(&cwd, arg)).is_ok(),
                        None => false,
                    };
                    if renamed {
                        reply(&mut out, "250 renamed").await?;
                    } else {
                        reply(&mut out, "553 rename failed").await?;
                    }
                }
                _ => reply(&mut out, "502 not implemented").await?,
            }
        }
        Ok(())
    }
}

fn listing(dir: &Path) -> String {
    let mut out = String::from(
        "drwxr-xr-x 2 ftp ftp 4096 Jan 01  2020 .\r\ndrwxr-xr-x 2 ftp ftp 4096 Jan 01  2020 ..\r\n",
    );
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let meta = entry.metadata().unwrap();
            let kind = if meta.is_dir() { 'd' } else { '-' };
            out.push_str(&format!(
                "{}rw-r--r-- 1 ftp ftp {} Jan 01  2020 {}\r\n",
                kind,
                meta.len(),
                entry.file_name().to_string_lossy()
            ));
        }
    }
    out
}

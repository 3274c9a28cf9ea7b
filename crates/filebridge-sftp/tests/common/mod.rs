//! In-process SSH server with the `sftp` subsystem, backed by a temporary
//! directory.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io;
use std::os::unix::fs::{FileExt, MetadataExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use filebridge_base::{ServerModel, ServerType};
use russh::server::{self, Auth, Msg, Session};
use russh::{Channel, ChannelId};
use russh_sftp::protocol::{
    Attrs, Data, File, FileAttributes, Handle, Name, OpenFlags, Status, StatusCode, Version,
};
use tempfile::TempDir;
use tokio::net::TcpListener;

pub const USER: &str = "alice";
pub const PASSWORD: &str = "secret";

pub struct FakeSftp {
    pub port: u16,
    pub root: TempDir,
    sessions: Arc<AtomicUsize>,
    stall: Arc<AtomicBool>,
}

impl FakeSftp {
    pub async fn start() -> Self {
        let root = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let sessions = Arc::new(AtomicUsize::new(0));
        let stall = Arc::new(AtomicBool::new(false));

        let config = Arc::new(server::Config {
            keys: vec![russh_keys::key::KeyPair::generate_ed25519().unwrap()],
            auth_rejection_time: Duration::from_millis(10),
            auth_rejection_time_initial: Some(Duration::from_millis(0)),
            ..Default::default()
        });

        let dir = root.path().to_path_buf();
        let (counter, stalled) = (sessions.clone(), stall.clone());
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let handler = SshHandler {
                    root: dir.clone(),
                    stall: stalled.clone(),
                    channel: None,
                };
                let (config, counter) = (config.clone(), counter.clone());
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    if let Ok(running) = server::run_stream(config, stream, handler).await {
                        let _ = running.await;
                    }
                    counter.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        Self {
            port,
            root,
            sessions,
            stall,
        }
    }

    pub fn server_model(&self, password: &str) -> ServerModel {
        let mut server = ServerModel::new("fake", ServerType::Sftp, "127.0.0.1", USER, password);
        server.port = self.port;
        server.connect_timeout_secs = 5;
        server
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.path().join(relative)
    }

    /// Never answer file reads.
    pub fn stall_downloads(&self) {
        self.stall.store(true, Ordering::SeqCst);
    }

    /// Wait until every SSH connection has been closed.
    pub async fn wait_idle(&self) -> bool {
        for _ in 0..300 {
            if self.sessions.load(Ordering::SeqCst) == 0 {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

struct SshHandler {
    root: PathBuf,
    stall: Arc<AtomicBool>,
    channel: Option<Channel<Msg>>,
}

#[async_trait]
impl server::Handler for SshHandler {
    type Error = russh::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        if user == USER && password == PASSWORD {
            Ok(Auth::Accept)
        } else {
            Ok(Auth::Reject {
                proceed_with_methods: None,
            })
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.channel = Some(channel);
        Ok(true)
    }

    async fn subsystem_request(
        &mut self,
        channel_id: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        match self.channel.take() {
            Some(channel) if name == "sftp" && channel.id() == channel_id => {
                let _ = session.channel_success(channel_id);
                let handler = SftpHandler {
                    root: self.root.clone(),
                    stall: self.stall.clone(),
                    handles: HashMap::new(),
                    next_handle: 0,
                };
                russh_sftp::server::run(channel.into_stream(), handler).await;
            }
            _ => {
                let _ = session.channel_failure(channel_id);
            }
        }
        Ok(())
    }
}

enum Open {
    File(fs::File),
    Dir(Option<Vec<File>>),
}

struct SftpHandler {
    root: PathBuf,
    stall: Arc<AtomicBool>,
    handles: HashMap<String, Open>,
    next_handle: u32,
}

fn ok(id: u32) -> Status {
    Status {
        id,
        status_code: StatusCode::Ok,
        error_message: "Ok".to_string(),
        language_tag: "en-US".to_string(),
    }
}

fn code(error: io::Error) -> StatusCode {
    match error.kind() {
        io::ErrorKind::NotFound => StatusCode::NoSuchFile,
        io::ErrorKind::PermissionDenied => StatusCode::PermissionDenied,
        _ => StatusCode::Failure,
    }
}

fn attributes(path: &Path) -> Result<FileAttributes, StatusCode> {
    let meta = fs::metadata(path).map_err(code)?;
    let mut attrs = FileAttributes::default();
    attrs.size = Some(meta.len());
    attrs.permissions = Some(meta.mode());
    attrs.mtime = Some(meta.mtime() as u32);
    Ok(attrs)
}

impl SftpHandler {
    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    fn insert(&mut self, open: Open) -> String {
        self.next_handle += 1;
        let handle = self.next_handle.to_string();
        self.handles.insert(handle.clone(), open);
        handle
    }
}

#[async_trait]
impl russh_sftp::server::Handler for SftpHandler {
    type Error = StatusCode;

    fn unimplemented(&self) -> Self::Error {
        StatusCode::OpUnsupported
    }

    async fn init(
        &mut self,
        _version: u32,
        _extensions: HashMap<String, String>,
    ) -> Result<Version, Self::Error> {
        Ok(Version::new())
    }

    async fn open(
        &mut self,
        id: u32,
        filename: String,
        pflags: OpenFlags,
        _attrs: FileAttributes,
    ) -> Result<Handle, Self::Error> {
        let file = OpenOptions::new()
            .read(pflags.contains(OpenFlags::READ))
            .write(pflags.contains(OpenFlags::WRITE))
            .create(pflags.contains(OpenFlags::CREATE))
            .truncate(pflags.contains(OpenFlags::TRUNCATE))
            .open(self.resolve(&filename))
            .map_err(code)?;
        let handle = self.insert(Open::File(file));
        Ok(Handle { id, handle })
    }

    async fn close(&mut self, id: u32, handle: String) -> Result<Status, Self::Error> {
        self.handles.remove(&handle);
        Ok(ok(id))
    }

    async fn read(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        len: u32,
    ) -> Result<Data, Self::Error> {
        if self.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let Some(Open::File(file)) = self.handles.get(&handle) else {
            return Err(StatusCode::Failure);
        };
        let mut data = vec![0u8; len as usize];
        let n = file.read_at(&mut data, offset).map_err(code)?;
        if n == 0 {
            return Err(StatusCode::Eof);
        }
        data.truncate(n);
        Ok(Data { id, data })
    }

    async fn write(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        data: Vec<u8>,
    ) -> Result<Status, Self::Error> {
        let Some(Open::File(file)) = self.handles.get(&handle) else {
            return Err(StatusCode::Failure);
        };
        file.write_all_at(&data, offset).map_err(code)?;
        Ok(ok(id))
    }

    async fn stat(&mut self, id: u32, path: String) -> Result<Attrs, Self::Error> {
        let attrs = attributes(&self.resolve(&path))?;
        Ok(Attrs { id, attrs })
    }

    async fn lstat(&mut self, id: u32, path: String) -> Result<Attrs, Self::Error> {
        self.stat(id, path).await
    }

    async fn opendir(&mut self, id: u32, path: String) -> Result<Handle, Self::Error> {
        let dir = self.resolve(&path);
        let mut files = Vec::new();
        for name in [".", ".."] {
            files.push(File {
                filename: name.to_string(),
                longname: name.to_string(),
                attrs: attributes(&dir)?,
            });
        }
        for entry in fs::read_dir(&dir).map_err(code)? {
            let entry = entry.map_err(code)?;
            let filename = entry.file_name().to_string_lossy().to_string();
            files.push(File {
                longname: filename.clone(),
                filename,
                attrs: attributes(&entry.path())?,
            });
        }
        let handle = self.insert(Open::Dir(Some(files)));
        Ok(Handle { id, handle })
    }

    async fn readdir(&mut self, id: u32, handle: String) -> Result<Name, Self::Error> {
        match self.handles.get_mut(&handle) {
            Some(Open::Dir(files)) => match files.take() {
                Some(files) => Ok(Name { id, files }),
                None => Err(StatusCode::Eof),
            },
            _ => Err(StatusCode::Failure),
        }
    }

    async fn remove(&mut self, id: u32, filename: String) -> Result<Status, Self::Error> {
        fs::remove_file(self.resolve(&filename)).map_err(code)?;
        Ok(ok(id))
    }

    async fn mkdir(
        &mut self,
        id: u32,
        path: String,
        _attrs: FileAttributes,
    ) -> Result<Status, Self::Error> {
        fs::create_dir(self.resolve(&path)).map_err(code)?;
        Ok(ok(id))
    }

    async fn rmdir(&mut self, id: u32, path: String) -> Result<Status, Self::Error> {
        fs::remove_dir(self.resolve(&path)).map_err(code)?;
        Ok(ok(id))
    }

    async fn realpath(&mut self, id: u32, path: String) -> Result<Name, Self::Error> {
        Ok(Name {
            id,
            files: vec![File {
                filename: path.clone(),
                longname: path,
                attrs: FileAttributes::default(),
            }],
        })
    }

    /// SFTP v3 servers refuse to rename onto an existing entry.
    async fn rename(
        &mut self,
        id: u32,
        oldpath: String,
        newpath: String,
    ) -> Result<Status, Self::Error> {
        let (from, to) = (self.resolve(&oldpath), self.resolve(&newpath));
        if to.exists() {
            return Err(StatusCode::Failure);
        }
        fs::rename(from, to).map_err(code)?;
        Ok(ok(id))
    }
}

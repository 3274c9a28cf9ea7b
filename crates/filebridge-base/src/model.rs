use std::fmt;
use std::time::Duration;

use encoding_rs::{Encoding, UTF_8};
use serde::{Deserialize, Serialize};

use crate::permission::Permission;

const SCHEME_DELIMITER: &str = "://";

/// Characters that can never appear in a displayable entry name.
const ILLEGAL_CHARACTERS: &[char] = &[
    '/', '\\', ':', '*', '?', '"', '<', '>', '|', '`', '\0', '\n', '\r', '\t',
];

/// Whether `name` is an ordinary entry that may be shown to callers.
///
/// Rejects protocol control entries (`.`, `..`) and names containing
/// characters that cannot round-trip through a path.
pub fn is_valid_file_name(name: &str) -> bool {
    !name.trim().is_empty()
        && name != "."
        && name != ".."
        && !name.contains(ILLEGAL_CHARACTERS)
}

/// Normalize a relative path: forward slashes, a leading `/`, no empty or
/// `.` segments and no trailing slash (except for the root itself).
pub fn normalize_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    for segment in path.split(|c| c == '/' || c == '\\') {
        if segment.is_empty() || segment == "." {
            continue;
        }
        out.push('/');
        out.push_str(segment);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// Location and metadata of one entry on a filesystem.
///
/// Values are immutable snapshots; use [`FileModel::child`] or
/// [`FileModel::sibling`] to derive new locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileModel {
    /// `scheme://` followed by the path relative to the filesystem root.
    pub file_uri: String,
    /// Identity of the filesystem instance this entry belongs to.
    pub filesystem_uuid: String,
    pub size: u64,
    /// Milliseconds since the Unix epoch.
    pub last_modified: i64,
    pub directory: bool,
    pub permission: Permission,
}

impl FileModel {
    pub fn new(scheme: &str, filesystem_uuid: impl Into<String>, path: &str) -> Self {
        Self {
            file_uri: format!("{}{}{}", scheme, SCHEME_DELIMITER, normalize_path(path)),
            filesystem_uuid: filesystem_uuid.into(),
            size: 0,
            last_modified: 0,
            directory: false,
            permission: Permission::EMPTY,
        }
    }

    /// A directory model at `path`, used for default locations.
    pub fn directory(scheme: &str, filesystem_uuid: impl Into<String>, path: &str) -> Self {
        Self {
            directory: true,
            ..Self::new(scheme, filesystem_uuid, path)
        }
    }

    pub fn scheme(&self) -> &str {
        self.file_uri
            .split_once(SCHEME_DELIMITER)
            .map(|(scheme, _)| scheme)
            .unwrap_or_default()
    }

    /// Path relative to the filesystem root, always starting with `/`.
    pub fn path(&self) -> &str {
        match self.file_uri.split_once(SCHEME_DELIMITER) {
            Some((_, path)) if !path.is_empty() => path,
            Some(_) => "/",
            None => &self.file_uri,
        }
    }

    /// Last path segment, empty for the root.
    pub fn name(&self) -> &str {
        self.path().rsplit('/').next().unwrap_or_default()
    }

    pub fn is_root(&self) -> bool {
        self.path() == "/"
    }

    /// Path of the containing directory, `None` for the root.
    pub fn parent_path(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        let path = self.path();
        match path.rfind('/') {
            Some(0) => Some("/"),
            Some(idx) => Some(&path[..idx]),
            None => Some("/"),
        }
    }

    /// An entry named `name` inside this directory.
    pub fn child(&self, name: &str, directory: bool) -> FileModel {
        let path = format!("{}/{}", self.path().trim_end_matches('/'), name);
        FileModel {
            directory,
            ..FileModel::new(self.scheme(), self.filesystem_uuid.clone(), &path)
        }
    }

    /// An entry named `name` in the same directory as this one.
    pub fn sibling(&self, name: &str) -> FileModel {
        let parent = self.parent_path().unwrap_or("/");
        let path = format!("{}/{}", parent.trim_end_matches('/'), name);
        FileModel {
            directory: self.directory,
            ..FileModel::new(self.scheme(), self.filesystem_uuid.clone(), &path)
        }
    }
}

/// One directory level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTree {
    pub parent: FileModel,
    pub children: Vec<FileModel>,
}

/// Per-call parameters for text transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileParams {
    pub charset: &'static Encoding,
}

impl FileParams {
    pub fn new(charset: &'static Encoding) -> Self {
        Self { charset }
    }

    /// Look up a charset by its WHATWG label, e.g. `"windows-1251"`.
    ///
    /// Labels of charsets that cannot be written back (the `replacement`
    /// encoding) return `None`.
    pub fn for_label(label: &str) -> Option<Self> {
        Encoding::for_label(label.trim().as_bytes())
            .filter(|&charset| crate::charset::is_encodable(charset))
            .map(Self::new)
    }
}

impl Default for FileParams {
    fn default() -> Self {
        Self::new(UTF_8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerType {
    Ftp,
    Ftps,
    Sftp,
    Webdav,
    Webdavs,
}

impl ServerType {
    pub fn scheme(self) -> &'static str {
        match self {
            ServerType::Ftp => "ftp",
            ServerType::Ftps => "ftps",
            ServerType::Sftp => "sftp",
            ServerType::Webdav => "webdav",
            ServerType::Webdavs => "webdavs",
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            ServerType::Ftp => 21,
            ServerType::Ftps => 990,
            ServerType::Sftp => 22,
            ServerType::Webdav => 80,
            ServerType::Webdavs => 443,
        }
    }
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

/// Connection descriptor for a remote filesystem.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerModel {
    /// Namespaces every [`FileModel`] produced for this server.
    pub uuid: String,
    pub name: String,
    pub server_type: ServerType,
    pub address: String,
    pub port: u16,

    #[serde(default = "default_initial_dir")]
    pub initial_dir: String,

    pub username: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Trust self-signed certificates (FTPS, WebDAV over TLS)
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

fn default_initial_dir() -> String {
    "/".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

impl ServerModel {
    pub fn new(
        name: impl Into<String>,
        server_type: ServerType,
        address: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            uuid: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            server_type,
            address: address.into(),
            port: server_type.default_port(),
            initial_dir: default_initial_dir(),
            username: username.into(),
            password: password.into(),
            connect_timeout_secs: default_connect_timeout(),
            accept_invalid_certs: false,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    /// `address:port`, bracketing IPv6 literals.
    pub fn endpoint(&self) -> String {
        if self.address.contains(':') && !self.address.starts_with('[') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }
}

impl fmt::Debug for ServerModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerModel")
            .field("uuid", &self.uuid)
            .field("name", &self.name)
            .field("server_type", &self.server_type)
            .field("address", &self.address)
            .field("port", &self.port)
            .field("initial_dir", &self.initial_dir)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use filebridge_base::{
    FileModel, FileParams, FileTree, Filesystem, FsError, Mapper, Result, ServerModel, ServerType,
    StagingArea, Transfer,
};
use futures_util::StreamExt;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Client, Method, RequestBuilder, Response, StatusCode};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};
use url::Url;

use crate::mapper::DavMapper;
use crate::multistatus::{self, PROPFIND_BODY};

/// Bytes escaped inside one path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

fn dav_method(name: &'static str) -> Result<Method> {
    Method::from_bytes(name.as_bytes()).map_err(|_| FsError::Unsupported(name))
}

/// Map a response status for `op` on `path`.
fn check(status: StatusCode, user: &str, path: &str, op: &'static str) -> Result<()> {
    match status.as_u16() {
        200..=299 => Ok(()),
        401 => Err(FsError::authentication(user)),
        405 | 501 => Err(FsError::Unsupported(op)),
        400..=499 => Err(FsError::not_found(path)),
        _ => Err(FsError::connection(format!("{} {} returned {}", op, path, status))),
    }
}

/// WebDAV collection tree over HTTP or HTTPS.
///
/// HTTP is stateless, so there is no login handshake: every request carries
/// basic-auth credentials and a rejected one (401) fails with
/// `Authentication`. A 403 refuses one resource and reports `NotFound`.
/// `rename_file` and `copy_file` send `Overwrite: T`.
pub struct WebDavFilesystem {
    server: ServerModel,
    client: Client,
    base: String,
    staging: StagingArea,
}

impl WebDavFilesystem {
    pub fn new(server: ServerModel, cache_dir: impl Into<PathBuf>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(server.connect_timeout())
            .danger_accept_invalid_certs(server.accept_invalid_certs)
            .build()
            .map_err(|e| FsError::connection(e.to_string()))?;
        let scheme = match server.server_type {
            ServerType::Webdavs => "https",
            _ => "http",
        };
        Ok(Self {
            base: format!("{}://{}", scheme, server.endpoint()),
            server,
            client,
            staging: StagingArea::new(cache_dir),
        })
    }

    /// URL of `model`. Collections end with `/`.
    pub fn url(&self, model: &FileModel) -> Result<Url> {
        let mut path = String::new();
        for segment in model.path().split('/').filter(|s| !s.is_empty()) {
            path.push('/');
            path.extend(utf8_percent_encode(segment, SEGMENT));
        }
        if model.directory || path.is_empty() {
            path.push('/');
        }
        Url::parse(&format!("{}{}", self.base, path))
            .map_err(|e| FsError::connection(format!("invalid url for {}: {}", model.path(), e)))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        debug!("{} {}", method, url);
        let request = self.client.request(method, url);
        if self.server.username.is_empty() {
            request
        } else {
            request.basic_auth(&self.server.username, Some(&self.server.password))
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        request
            .send()
            .await
            .map_err(|e| FsError::connection(format!("{}: {}", self.server.endpoint(), e)))
    }

    /// Send and require a 2xx status.
    async fn execute(&self, request: RequestBuilder, path: &str, op: &'static str) -> Result<Response> {
        let response = self.send(request).await?;
        check(response.status(), &self.server.username, path, op)?;
        Ok(response)
    }

    fn propfind(&self, url: Url, depth: &'static str) -> Result<RequestBuilder> {
        Ok(self
            .request(dav_method("PROPFIND")?, url)
            .header("Depth", depth)
            .header(CONTENT_TYPE, "application/xml; charset=utf-8")
            .body(PROPFIND_BODY))
    }

    /// `MOVE` or `COPY` onto `dest`, replacing it.
    async fn relocate(&self, op: &'static str, source: &FileModel, dest: &FileModel) -> Result<()> {
        let destination = self.url(&FileModel {
            directory: source.directory,
            ..dest.clone()
        })?;
        let request = self
            .request(dav_method(op)?, self.url(source)?)
            .header("Destination", destination.as_str())
            .header("Overwrite", "T")
            .header("Depth", "infinity");
        self.execute(request, source.path(), op).await?;
        Ok(())
    }
}

#[async_trait]
impl Filesystem for WebDavFilesystem {
    fn default_location(&self) -> FileModel {
        FileModel::directory(
            self.server.server_type.scheme(),
            &self.server.uuid,
            &self.server.initial_dir,
        )
    }

    async fn provide_directory(&self, parent: &FileModel) -> Result<FileTree> {
        let url = self.url(&FileModel {
            directory: true,
            ..parent.clone()
        })?;
        let response = self
            .execute(self.propfind(url, "1")?, parent.path(), "PROPFIND")
            .await?;
        let body = response
            .text()
            .await
            .map_err(|e| FsError::connection(e.to_string()))?;
        let entries = multistatus::parse(&body)
            .map_err(|e| FsError::connection(format!("malformed multistatus: {}", e)))?;

        // The collection itself is part of a depth-1 response.
        let children = entries.into_iter().filter(|entry| entry.path != parent.path());
        Ok(DavMapper.to_file_tree(parent, children))
    }

    async fn exists(&self, model: &FileModel) -> Result<bool> {
        let response = self.send(self.propfind(self.url(model)?, "0")?).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check(response.status(), &self.server.username, model.path(), "PROPFIND")?;
        Ok(true)
    }

    async fn create_file(&self, model: &FileModel) -> Result<()> {
        let url = self.url(model)?;
        if model.directory {
            let response = self.send(self.request(dav_method("MKCOL")?, url)).await?;
            if response.status() == StatusCode::METHOD_NOT_ALLOWED {
                return Err(FsError::io(
                    model.path(),
                    io::Error::new(io::ErrorKind::AlreadyExists, "collection exists"),
                ));
            }
            check(response.status(), &self.server.username, model.path(), "MKCOL")?;
        } else {
            let request = self
                .request(Method::PUT, url)
                .header(CONTENT_LENGTH, 0)
                .body(Vec::new());
            self.execute(request, model.path(), "PUT").await?;
        }
        info!("created {}", model.file_uri);
        Ok(())
    }

    async fn rename_file(&self, source: &FileModel, dest: &FileModel) -> Result<()> {
        self.relocate("MOVE", source, dest).await?;
        info!("renamed {} -> {}", source.file_uri, dest.file_uri);
        Ok(())
    }

    async fn delete_file(&self, model: &FileModel) -> Result<()> {
        let request = self.request(Method::DELETE, self.url(model)?);
        self.execute(request, model.path(), "DELETE").await?;
        info!("deleted {}", model.file_uri);
        Ok(())
    }

    async fn copy_file(&self, source: &FileModel, dest: &FileModel) -> Result<()> {
        self.relocate("COPY", source, dest).await?;
        info!("copied {} -> {}", source.file_uri, dest.file_uri);
        Ok(())
    }

    async fn load_file(&self, model: &FileModel, params: &FileParams) -> Result<String> {
        self.staging.load(self, model, params).await
    }

    async fn save_file(&self, model: &FileModel, text: &str, params: &FileParams) -> Result<()> {
        self.staging.save(self, model, text, params).await?;
        info!("saved {}", model.file_uri);
        Ok(())
    }
}

#[async_trait]
impl Transfer for WebDavFilesystem {
    async fn download(&self, model: &FileModel, local: &Path) -> Result<()> {
        let response = self
            .execute(self.request(Method::GET, self.url(model)?), model.path(), "GET")
            .await?;
        let mut file = tokio::fs::File::create(local)
            .await
            .map_err(|e| FsError::io(local, e))?;

        let mut body = response.bytes_stream();
        let mut count = 0;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| FsError::connection(e.to_string()))?;
            file.write_all(&chunk).await.map_err(|e| FsError::io(local, e))?;
            count += chunk.len();
        }
        file.flush().await.map_err(|e| FsError::io(local, e))?;
        debug!("downloaded {} bytes from {}", count, model.path());
        Ok(())
    }

    async fn upload(&self, local: &Path, model: &FileModel) -> Result<()> {
        let file = tokio::fs::File::open(local)
            .await
            .map_err(|e| FsError::io(local, e))?;
        let length = file
            .metadata()
            .await
            .map_err(|e| FsError::io(local, e))?
            .len();

        let request = self
            .request(Method::PUT, self.url(model)?)
            .header(CONTENT_LENGTH, length)
            .body(Body::wrap_stream(ReaderStream::new(file)));
        self.execute(request, model.path(), "PUT").await?;
        debug!("uploaded {} bytes to {}", length, model.path());
        Ok(())
    }
}

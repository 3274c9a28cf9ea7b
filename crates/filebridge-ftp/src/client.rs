//! Minimal FTP client: one control connection plus passive data connections.

use std::io;
use std::net::IpAddr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio_native_tls::TlsConnector;
use tracing::debug;

use crate::error::FtpError;
use crate::reply::{self, Reply};

pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// TLS settings for implicit FTPS: every connection is wrapped from the
/// first byte.
#[derive(Clone)]
pub struct Tls {
    pub connector: TlsConnector,
    pub domain: String,
}

impl Tls {
    pub fn new(domain: &str, accept_invalid_certs: bool) -> Result<Self, FtpError> {
        let connector = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()?;
        Ok(Self {
            connector: TlsConnector::from(connector),
            domain: domain.to_string(),
        })
    }

    async fn wrap(&self, tcp: TcpStream) -> Result<BoxedStream, FtpError> {
        let stream = self.connector.connect(&self.domain, tcp).await?;
        Ok(Box::new(stream))
    }
}

pub struct FtpClient {
    control: BufStream<BoxedStream>,
    peer: IpAddr,
    tls: Option<Tls>,
}

impl FtpClient {
    /// Connect and wait for the `220` greeting.
    pub async fn connect(host: &str, port: u16, tls: Option<Tls>) -> Result<Self, FtpError> {
        let tcp = TcpStream::connect((host, port)).await?;
        let peer = tcp.peer_addr()?.ip();
        let stream: BoxedStream = match &tls {
            Some(tls) => tls.wrap(tcp).await?,
            None => Box::new(tcp),
        };

        let mut client = Self {
            control: BufStream::new(stream),
            peer,
            tls,
        };
        let mut greeting = client.read_reply().await?;
        if greeting.code == 120 {
            greeting = client.read_reply().await?;
        }
        if !greeting.is_completion() {
            return Err(FtpError::rejected(greeting));
        }
        debug!("connected to {}:{}: {}", host, port, greeting.text);
        Ok(client)
    }

    pub fn is_secure(&self) -> bool {
        self.tls.is_some()
    }

    async fn read_reply(&mut self) -> Result<Reply, FtpError> {
        reply::read(&mut self.control).await
    }

    async fn send(&mut self, command: &str) -> Result<(), FtpError> {
        match command.strip_prefix("PASS ") {
            Some(_) => debug!("-> PASS ****"),
            None => debug!("-> {}", command),
        }
        self.control.write_all(command.as_bytes()).await?;
        self.control.write_all(b"\r\n").await?;
        self.control.flush().await?;
        Ok(())
    }

    pub async fn command(&mut self, command: &str) -> Result<Reply, FtpError> {
        self.send(command).await?;
        self.read_reply().await
    }

    /// Send `command` and require a 2xx reply.
    async fn complete(&mut self, command: &str) -> Result<Reply, FtpError> {
        let reply = self.command(command).await?;
        if reply.is_completion() {
            Ok(reply)
        } else {
            Err(FtpError::rejected(reply))
        }
    }

    /// `USER`/`PASS`. A rejection here means bad credentials.
    pub async fn login(&mut self, user: &str, password: &str) -> Result<(), FtpError> {
        let mut reply = self.command(&format!("USER {}", user)).await?;
        if reply.is_intermediate() {
            reply = self.command(&format!("PASS {}", password)).await?;
        }
        if !reply.is_completion() {
            return Err(FtpError::rejected(reply));
        }
        Ok(())
    }

    /// Protect the data channel when the control channel is encrypted, and
    /// switch to binary transfers.
    pub async fn prepare(&mut self) -> Result<(), FtpError> {
        if self.is_secure() {
            self.complete("PBSZ 0").await?;
            self.complete("PROT P").await?;
        }
        self.complete("TYPE I").await?;
        Ok(())
    }

    pub async fn cwd(&mut self, path: &str) -> Result<(), FtpError> {
        self.complete(&format!("CWD {}", path)).await.map(|_| ())
    }

    pub async fn size(&mut self, path: &str) -> Result<u64, FtpError> {
        let reply = self.complete(&format!("SIZE {}", path)).await?;
        reply
            .text
            .trim()
            .parse()
            .map_err(|_| FtpError::Malformed(reply.text.clone()))
    }

    pub async fn mkdir(&mut self, path: &str) -> Result<(), FtpError> {
        self.complete(&format!("MKD {}", path)).await.map(|_| ())
    }

    pub async fn rmdir(&mut self, path: &str) -> Result<(), FtpError> {
        self.complete(&format!("RMD {}", path)).await.map(|_| ())
    }

    pub async fn delete(&mut self, path: &str) -> Result<(), FtpError> {
        self.complete(&format!("DELE {}", path)).await.map(|_| ())
    }

    pub async fn rename(&mut self, from: &str, to: &str) -> Result<(), FtpError> {
        let reply = self.command(&format!("RNFR {}", from)).await?;
        if !reply.is_intermediate() {
            return Err(FtpError::rejected(reply));
        }
        self.complete(&format!("RNTO {}", to)).await.map(|_| ())
    }

    /// Raw `LIST` lines of the directory `path`.
    pub async fn list(&mut self, path: &str) -> Result<Vec<String>, FtpError> {
        // Some servers answer LIST of a missing path with an empty listing.
        self.cwd(path).await?;
        let mut data = self.transfer("LIST").await?;
        let mut bytes = Vec::new();
        read_data(&mut data, &mut bytes).await?;
        drop(data);
        self.finish().await?;

        Ok(String::from_utf8_lossy(&bytes)
            .lines()
            .map(str::to_string)
            .collect())
    }

    pub async fn retrieve<W>(&mut self, path: &str, output: &mut W) -> Result<u64, FtpError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut data = self.transfer(&format!("RETR {}", path)).await?;
        let count = read_data(&mut data, output).await?;
        drop(data);
        self.finish().await?;
        Ok(count)
    }

    pub async fn store<R>(&mut self, path: &str, input: &mut R) -> Result<u64, FtpError>
    where
        R: AsyncRead + Unpin,
    {
        let mut data = self.transfer(&format!("STOR {}", path)).await?;
        let mut buf = vec![0u8; 64 * 1024];
        let mut count = 0u64;
        loop {
            let n = input.read(&mut buf).await.map_err(FtpError::Local)?;
            if n == 0 {
                break;
            }
            data.write_all(&buf[..n]).await?;
            count += n as u64;
        }
        data.shutdown().await?;
        drop(data);
        self.finish().await?;
        Ok(count)
    }

    /// Best-effort `QUIT`.
    pub async fn quit(mut self) {
        if let Err(e) = self.command("QUIT").await {
            debug!("QUIT failed: {}", e);
        }
        let _ = self.control.shutdown().await;
    }

    async fn passive(&mut self) -> Result<TcpStream, FtpError> {
        let port = if self.peer.is_ipv6() {
            let reply = self.complete("EPSV").await?;
            reply::parse_epsv(&reply.text).ok_or(FtpError::Malformed(reply.text))?
        } else {
            let reply = self.complete("PASV").await?;
            // The advertised address is often private; the control peer is
            // reachable.
            let (_, port) = reply::parse_pasv(&reply.text).ok_or(FtpError::Malformed(reply.text))?;
            port
        };
        Ok(TcpStream::connect((self.peer, port)).await?)
    }

    /// Open a data connection, issue `command` on it and wait for the
    /// server to start the transfer.
    async fn transfer(&mut self, command: &str) -> Result<BoxedStream, FtpError> {
        let tcp = self.passive().await?;
        let reply = self.command(command).await?;
        if !reply.is_preliminary() {
            return Err(FtpError::rejected(reply));
        }
        match &self.tls {
            Some(tls) => tls.wrap(tcp).await,
            None => Ok(Box::new(tcp)),
        }
    }

    /// Wait for the `226` that closes a transfer.
    async fn finish(&mut self) -> Result<(), FtpError> {
        let reply = self.read_reply().await?;
        if reply.is_completion() {
            Ok(())
        } else {
            Err(FtpError::rejected(reply))
        }
    }
}

/// Copy a data connection to `output`. Servers commonly close TLS data
/// connections without `close_notify`, which is treated as the end of data.
/// Failures writing `output` are reported as [`FtpError::Local`].
async fn read_data<W>(data: &mut BoxedStream, output: &mut W) -> Result<u64, FtpError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = match data.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };
        output.write_all(&buf[..n]).await.map_err(FtpError::Local)?;
        total += n as u64;
    }
    output.flush().await.map_err(FtpError::Local)?;
    Ok(total)
}

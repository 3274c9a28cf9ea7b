//! Control-channel reply codec (RFC 959 section 4.2).

use std::net::Ipv4Addr;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::trace;

use crate::error::FtpError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub text: String,
}

impl Reply {
    /// 1xx: the command was accepted, another reply follows.
    pub fn is_preliminary(&self) -> bool {
        (100..200).contains(&self.code)
    }

    /// 2xx
    pub fn is_completion(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// 3xx: more information is needed (after `USER` or `RNFR`).
    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }
}

/// Read one reply, joining the lines of a multi-line reply.
pub async fn read<R>(reader: &mut R) -> Result<Reply, FtpError>
where
    R: AsyncBufRead + Unpin,
{
    let first = read_line(reader).await?;
    let (code, separator, text) = split(&first).ok_or_else(|| FtpError::Malformed(first.clone()))?;
    let mut message = text.to_string();

    if separator == '-' {
        loop {
            let line = read_line(reader).await?;
            message.push('\n');
            match split(&line) {
                Some((end, ' ', text)) if end == code => {
                    message.push_str(text);
                    break;
                }
                _ => message.push_str(line.trim_start()),
            }
        }
    }

    trace!("<- {} {}", code, message);
    Ok(Reply {
        code,
        text: message,
    })
}

async fn read_line<R>(reader: &mut R) -> Result<String, FtpError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    if reader.read_until(b'\n', &mut buf).await? == 0 {
        return Err(FtpError::Closed);
    }
    let line = String::from_utf8_lossy(&buf);
    Ok(line.trim_end_matches(|c| c == '\r' || c == '\n').to_string())
}

/// Split `"227 Entering..."` into code, separator and text.
fn split(line: &str) -> Option<(u16, char, &str)> {
    let digits = line.get(..3)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let code = digits.parse().ok()?;
    let separator = match line.as_bytes().get(3) {
        None | Some(b' ') => ' ',
        Some(b'-') => '-',
        Some(_) => return None,
    };
    Some((code, separator, line.get(4..).unwrap_or("")))
}

/// Address and port from a `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)` reply.
pub fn parse_pasv(text: &str) -> Option<(Ipv4Addr, u16)> {
    let start = text.find('(')?;
    let end = start + text[start..].find(')')?;
    let numbers = text[start + 1..end]
        .split(',')
        .map(|n| n.trim().parse::<u8>())
        .collect::<Result<Vec<_>, _>>()
        .ok()?;
    match numbers[..] {
        [a, b, c, d, hi, lo] => Some((Ipv4Addr::new(a, b, c, d), (u16::from(hi) << 8) | u16::from(lo))),
        _ => None,
    }
}

/// Port from a `229 Entering Extended Passive Mode (|||port|)` reply.
pub fn parse_epsv(text: &str) -> Option<u16> {
    let start = text.find('(')?;
    let end = start + text[start..].find(')')?;
    let inner = &text[start + 1..end];
    let delimiter = inner.chars().next()?;
    inner.split(delimiter).nth(3)?.parse().ok()
}

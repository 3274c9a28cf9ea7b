//! `207 Multi-Status` bodies returned by `PROPFIND` (RFC 4918 section 13).

use chrono::DateTime;
use percent_encoding::percent_decode_str;
use roxmltree::{Document, Node};
use url::Url;

const DAV: &str = "DAV:";

/// Properties requested for every listing.
pub const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:resourcetype/>
    <d:getcontentlength/>
    <d:getlastmodified/>
    <d:current-user-privilege-set/>
  </d:prop>
</d:propfind>"#;

/// One `<response>` of a multistatus body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DavEntry {
    /// Decoded absolute path of the resource, without a trailing slash.
    pub path: String,
    pub collection: bool,
    pub content_length: u64,
    /// Milliseconds since the Unix epoch.
    pub last_modified: Option<i64>,
    /// `(read, write)` from `current-user-privilege-set`, when reported.
    pub privileges: Option<(bool, bool)>,
}

impl DavEntry {
    /// Last path segment.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or_default()
    }
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name && n.tag_name().namespace() == Some(DAV))
}

fn children<'a, 'input: 'a>(node: Node<'a, 'input>, name: &'a str) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    node.children()
        .filter(move |n| n.is_element() && n.tag_name().name() == name && n.tag_name().namespace() == Some(DAV))
}

/// Turn an `href` (absolute URL or absolute path) into a decoded path.
pub fn href_path(href: &str) -> String {
    let raw = match Url::parse(href) {
        Ok(url) => url.path().to_string(),
        Err(_) => href.to_string(),
    };
    let decoded = percent_decode_str(&raw).decode_utf8_lossy();
    let trimmed = decoded.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Parse every `<response>` in `body`. Properties are read from the
/// `propstat` blocks with a 2xx status; missing ones keep their defaults.
pub fn parse(body: &str) -> Result<Vec<DavEntry>, roxmltree::Error> {
    let doc = Document::parse(body)?;
    let mut entries = Vec::new();

    for response in children(doc.root_element(), "response") {
        let href = match child(response, "href").and_then(|n| n.text()) {
            Some(href) => href.trim(),
            None => continue,
        };
        let mut entry = DavEntry {
            path: href_path(href),
            collection: false,
            content_length: 0,
            last_modified: None,
            privileges: None,
        };

        for propstat in children(response, "propstat") {
            let ok = child(propstat, "status")
                .and_then(|n| n.text())
                .map_or(true, |status| status.split_whitespace().nth(1).map_or(false, |c| c.starts_with('2')));
            let prop = match child(propstat, "prop") {
                Some(prop) if ok => prop,
                _ => continue,
            };

            if let Some(kind) = child(prop, "resourcetype") {
                entry.collection = child(kind, "collection").is_some();
            }
            if let Some(length) = child(prop, "getcontentlength").and_then(|n| n.text()) {
                entry.content_length = length.trim().parse().unwrap_or_default();
            }
            if let Some(modified) = child(prop, "getlastmodified").and_then(|n| n.text()) {
                entry.last_modified = DateTime::parse_from_rfc2822(modified.trim())
                    .ok()
                    .map(|t| t.timestamp_millis());
            }
            if let Some(set) = child(prop, "current-user-privilege-set") {
                let mut read = false;
                let mut write = false;
                for privilege in children(set, "privilege") {
                    for granted in privilege.children().filter(|n| n.is_element()) {
                        match granted.tag_name().name() {
                            "all" => {
                                read = true;
                                write = true;
                            }
                            "read" => read = true,
                            "write" | "write-content" => write = true,
                            _ => {}
                        }
                    }
                }
                entry.privileges = Some((read, write));
            }
        }
        entries.push(entry);
    }
    Ok(entries)
}

use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::Event;

use crate::error::{NotFound, SyncError, SyncResult};
use crate::sync::BlobStore;
use crate::ui::prelude::*;
use crate::users::KeyBlob;

use super::AzureSession;

const SERVICE: &str = "Azure Blob Storage";
/// Oldest service version accepting bearer tokens is 2017-11-09.
const STORAGE_API_VERSION: &str = "2021-08-06";

/// Read-only client for the container holding the public keys.
pub struct BlobContainer<'a> {
    session: &'a AzureSession,
    token: String,
    account_url: String,
    container: String,
}

impl<'a> BlobContainer<'a> {
    pub fn connect(
        session: &'a AzureSession,
        storage_account: &str,
        container: &str,
    ) -> SyncResult<Self> {
        let token = session.access_token(session.cloud().storage_scope(), SERVICE)?;
        let account_url = format!(
            "https://{storage_account}.{}",
            session.cloud().blob_endpoint_suffix()
        );
        Ok(Self {
            session,
            token,
            account_url,
            container: container.to_string(),
        })
    }

    fn container_url(&self) -> String {
        format!("{}/{}", self.account_url, self.container)
    }

    fn get(&self, url: &str, query: &[(&str, &str)]) -> SyncResult<String> {
        let response = self
            .session
            .http()
            .get(url)
            .query(query)
            .bearer_auth(&self.token)
            .header("x-ms-version", STORAGE_API_VERSION)
            .send()
            .map_err(|e| SyncError::upstream(SERVICE, format!("request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| SyncError::upstream(SERVICE, format!("reading response: {e}")))?;
        if !status.is_success() {
            return Err(SyncError::upstream(
                SERVICE,
                format!("HTTP {status} for {url}: {}", storage_error_code(&body)),
            ));
        }
        Ok(body)
    }
}

impl BlobStore for BlobContainer<'_> {
    fn list_blobs(&self, prefix: Option<&str>, suffix: &str) -> SyncResult<Vec<KeyBlob>> {
        let url = self.container_url();
        emit(
            Level::Debug,
            "blob.list",
            &format!("Retrieve blobs from {url}"),
            None,
        );

        let mut blobs = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let mut query = vec![("restype", "container"), ("comp", "list")];
            if let Some(prefix) = prefix {
                query.push(("prefix", prefix));
            }
            if let Some(marker) = marker.as_deref() {
                query.push(("marker", marker));
            }

            let body = self.get(&url, &query)?;
            let page = parse_listing(&body)?;
            blobs.extend(page.blobs.into_iter().filter(|b| b.name.ends_with(suffix)));

            match page.next_marker {
                Some(next) => marker = Some(next),
                None => break,
            }
        }

        if blobs.is_empty() {
            return Err(NotFound::EmptyContainer {
                container: url,
                prefix: prefix.map(str::to_string),
                suffix: suffix.to_string(),
            }
            .into());
        }
        Ok(blobs)
    }

    fn download_blob(&self, name: &str) -> SyncResult<String> {
        let url = format!("{}/{}", self.container_url(), encode_blob_name(name));
        emit(Level::Debug, "blob.download", &format!("Download blob {url}"), None);
        let body = self.get(&url, &[])?;
        Ok(body.trim().to_string())
    }
}

/// Percent-encode each path segment, keeping the `/` separators.
fn encode_blob_name(name: &str) -> String {
    name.split('/')
        .map(urlencoding::encode)
        .collect::<Vec<_>>()
        .join("/")
}

/// Pull the `<Code>` out of a storage error body, or return the body itself.
fn storage_error_code(body: &str) -> String {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);
    let mut in_code = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => in_code = e.local_name().as_ref() == b"Code",
            Ok(Event::Text(t)) if in_code => {
                if let Ok(code) = t.unescape() {
                    return code.into_owned();
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }
    body.trim().to_string()
}

#[derive(Debug, Default)]
struct ListingPage {
    blobs: Vec<KeyBlob>,
    next_marker: Option<String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    Other,
    Name,
    LastModified,
    NextMarker,
}

/// Parse one `EnumerationResults` page of a List Blobs response.
fn parse_listing(xml: &str) -> SyncResult<ListingPage> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut page = ListingPage::default();
    let mut in_blob = false;
    let mut field = Field::Other;
    let mut name: Option<String> = None;
    let mut last_modified: Option<DateTime<Utc>> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                field = match e.local_name().as_ref() {
                    b"Blob" => {
                        in_blob = true;
                        name = None;
                        last_modified = None;
                        Field::Other
                    }
                    b"Name" if in_blob => Field::Name,
                    b"Last-Modified" if in_blob => Field::LastModified,
                    b"NextMarker" => Field::NextMarker,
                    _ => Field::Other,
                };
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| SyncError::upstream(SERVICE, format!("invalid listing: {e}")))?;
                match field {
                    Field::Name => name = Some(text.into_owned()),
                    Field::LastModified => {
                        last_modified = DateTime::parse_from_rfc2822(&text)
                            .ok()
                            .map(|d| d.with_timezone(&Utc));
                    }
                    Field::NextMarker if !text.is_empty() => {
                        page.next_marker = Some(text.into_owned());
                    }
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"Blob" {
                    in_blob = false;
                    if let Some(name) = name.take() {
                        page.blobs.push(KeyBlob {
                            name,
                            last_modified: last_modified.take(),
                        });
                    }
                }
                field = Field::Other;
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(SyncError::upstream(
                    SERVICE,
                    format!("invalid listing at byte {}: {e}", reader.buffer_position()),
                ));
            }
            _ => {}
        }
    }

    Ok(page)
}

//! Opt-in download of remote images referenced by an HTML body.
//!
//! With `render.fetch_remote_images` enabled, every `<img src="http(s)://…">`
//! is downloaded once per message and embedded as a `data:` URI before
//! layout. A failed or oversized download leaves the URL in place.

use std::collections::HashMap;
use std::io::Read;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::{Error, Result};
use crate::render::html::Token;

/// Downloaded bytes with the content type the server declared.
#[derive(Debug, Clone)]
pub struct RemoteImage {
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Source of remote images.
pub trait ImageFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<RemoteImage>;
}

/// Fetches over HTTP(S) with a per-request timeout and a size cap.
pub struct HttpFetcher {
    agent: ureq::Agent,
    max_bytes: u64,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, max_bytes: u64) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .redirects(5)
            .user_agent(concat!("eml2pdf/", env!("CARGO_PKG_VERSION")))
            .build();
        Self { agent, max_bytes }
    }
}

impl ImageFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<RemoteImage> {
        let failed = |reason: String| Error::resource("image fetch", format!("{url}: {reason}"));
        let response = self
            .agent
            .get(url)
            .call()
            .map_err(|e| failed(e.to_string()))?;
        let content_type = response.content_type().to_ascii_lowercase();
        let mut data = Vec::new();
        response
            .into_reader()
            .take(self.max_bytes + 1)
            .read_to_end(&mut data)
            .map_err(|e| failed(e.to_string()))?;
        if data.len() as u64 > self.max_bytes {
            return Err(failed(format!("larger than {} bytes", self.max_bytes)));
        }
        tracing::debug!(url, bytes = data.len(), content_type = %content_type, "Fetched remote image");
        Ok(RemoteImage { content_type, data })
    }
}

fn is_remote(src: &str) -> bool {
    let src = src.trim_start();
    ["http://", "https://"].iter().any(|scheme| {
        src.get(..scheme.len())
            .is_some_and(|s| s.eq_ignore_ascii_case(scheme))
    })
}

/// The `data:` URI for a download, or `None` when it is not an image.
fn data_uri(image: &RemoteImage) -> Option<String> {
    let sniffed = image::guess_format(&image.data)
        .ok()
        .map(|format| format.to_mime_type().to_string());
    let declared = image.content_type.split(';').next().unwrap_or_default().trim();
    let mime = sniffed.or_else(|| declared.starts_with("image/").then(|| declared.to_string()))?;
    Some(format!("data:{mime};base64,{}", STANDARD.encode(&image.data)))
}

/// Replace remote `<img>` sources in `tokens` with embedded downloads.
///
/// Each distinct URL is requested once. Returns how many images were embedded.
pub fn embed_remote_images(tokens: &mut [Token], fetcher: &dyn ImageFetcher) -> usize {
    let mut fetched: HashMap<String, Option<String>> = HashMap::new();
    let mut embedded = 0;
    for token in tokens.iter_mut() {
        let Token::Start { name, attrs } = token else { continue };
        if name.as_str() != "img" {
            continue;
        }
        let Some((_, src)) = attrs.iter_mut().find(|(k, v)| k == "src" && is_remote(v)) else {
            continue;
        };
        let uri = fetched
            .entry(src.trim().to_string())
            .or_insert_with_key(|url| match fetcher.fetch(url) {
                Ok(image) => {
                    let uri = data_uri(&image);
                    if uri.is_none() {
                        tracing::warn!(url = %url, content_type = %image.content_type, "Remote resource is not an image");
                    }
                    uri
                }
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Cannot fetch remote image");
                    None
                }
            });
        if let Some(uri) = uri {
            *src = uri.clone();
            embedded += 1;
        }
    }
    embedded
}

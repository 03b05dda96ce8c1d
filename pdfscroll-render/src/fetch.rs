//! Turns a source descriptor into document bytes.

use std::fs;
use std::io::Read;

use anyhow::{anyhow, Context, Result};
use pdfscroll_core::{CancelToken, LoadOptions, SourceDescriptor, ViewerError};
use tracing::{debug, instrument};
use url::Url;

/// Fetches the bytes behind `source`. Blocking; run it off the async
/// executor.
#[instrument(skip(options, cancel), fields(kind = ?source.kind()))]
pub fn fetch_source(
    source: &SourceDescriptor,
    options: &LoadOptions,
    cancel: &CancelToken,
) -> Result<Vec<u8>> {
    cancel.check()?;
    let bytes = match source {
        SourceDescriptor::Url(url) => fetch_url(url, options)?,
        SourceDescriptor::Base64(bytes) | SourceDescriptor::Binary(bytes) => bytes.to_vec(),
    };
    cancel.check()?;
    debug!(len = bytes.len(), "document bytes ready");
    Ok(bytes)
}

fn fetch_url(url: &Url, options: &LoadOptions) -> Result<Vec<u8>> {
    match url.scheme() {
        "file" => {
            let path = url
                .to_file_path()
                .map_err(|_| transport(format!("{url} is not a local path")))?;
            fs::read(&path)
                .with_context(|| format!("failed to read {:?}", path))
                .map_err(|err| transport(format!("{err:#}")))
        }
        "http" | "https" => fetch_http(url, options),
        other => Err(transport(format!("unsupported URL scheme {other:?}"))),
    }
}

fn fetch_http(url: &Url, options: &LoadOptions) -> Result<Vec<u8>> {
    if options.with_credentials {
        debug!("credentials are sent only through explicit headers");
    }
    let mut request = ureq::get(url.as_str());
    for (name, value) in &options.http_headers {
        request = request.set(name, value);
    }
    let response = request
        .call()
        .map_err(|err| transport(format!("{url}: {err}")))?;

    let mut bytes = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut bytes)
        .map_err(|err| transport(format!("{url}: {err}")))?;
    if bytes.is_empty() {
        return Err(anyhow!(ViewerError::Transport(format!("{url}: empty response"))));
    }
    Ok(bytes)
}

fn transport(message: String) -> anyhow::Error {
    anyhow!(ViewerError::Transport(message))
}

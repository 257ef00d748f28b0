//! Resumable transfers of remote files.
//!
//! The [`Fetcher`] trait only knows how to open a remote body at a byte
//! offset; [`fetch_resumable`] owns the resume logic on top of it, so every
//! transport gets the same behaviour.
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_LENGTH, RANGE};
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

const BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request for {url} failed: {reason}")]
    Transport { url: String, reason: String },
    #[error("server answered HTTP {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("Operation cancelled by user")]
    Cancelled,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// The answer to a request for a remote body starting at some offset.
pub enum Body {
    /// Data is available. `resumed` is `false` when the server ignored the
    /// requested offset and is sending the body from the start.
    Data {
        reader: Box<dyn Read>,
        len: Option<u64>,
        resumed: bool,
    },
    /// The server reports nothing left past the offset. Servers that
    /// under-report the length answer this way for a complete file.
    Complete,
}

/// A transport able to open a remote body at a byte offset.
pub trait Fetcher {
    fn open(&self, url: &str, offset: u64) -> Result<Body, FetchError>;
}

/// HTTP(S) transport backed by a blocking `reqwest` client.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(concat!("imgrescue/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .timeout(None)
            .build()
            .map_err(|e| FetchError::Transport {
                url: String::new(),
                reason: e.to_string(),
            })?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn open(&self, url: &str, offset: u64) -> Result<Body, FetchError> {
        let mut request = self.client.get(url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }

        let response = request.send().map_err(|e| FetchError::Transport {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        match response.status() {
            StatusCode::RANGE_NOT_SATISFIABLE if offset > 0 => Ok(Body::Complete),
            status if status.is_success() => {
                let len = response
                    .headers()
                    .get(CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok());
                Ok(Body::Data {
                    resumed: offset > 0 && status == StatusCode::PARTIAL_CONTENT,
                    len,
                    reader: Box::new(response),
                })
            }
            status => Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            }),
        }
    }
}

/// Downloads `url` into `dest`, continuing from the length of any partial
/// file already there.
///
/// `on_start` receives the expected final size when the server reports one;
/// `on_progress` receives the number of bytes present in `dest`.
pub fn fetch_resumable<F>(
    fetcher: &dyn Fetcher,
    url: &str,
    dest: &Path,
    running: &Arc<AtomicBool>,
    on_start: impl FnOnce(u64, Option<u64>),
    mut on_progress: F,
) -> Result<u64, FetchError>
where
    F: FnMut(u64),
{
    let existing = match fs::metadata(dest) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
        Err(e) => return Err(e.into()),
    };
    if existing > 0 {
        info!("resuming {} at byte {}", url, existing);
    }

    let (mut reader, len, offset) = match fetcher.open(url, existing)? {
        Body::Complete => {
            debug!("server reports {} already complete", url);
            on_start(existing, Some(existing));
            on_progress(existing);
            return Ok(existing);
        }
        Body::Data {
            reader,
            len,
            resumed,
        } => (reader, len, if resumed { existing } else { 0 }),
    };

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(offset > 0)
        .truncate(offset == 0)
        .open(dest)?;

    on_start(offset, len.map(|l| l + offset));

    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut total = offset;
    loop {
        if !running.load(Ordering::SeqCst) {
            file.flush()?;
            return Err(FetchError::Cancelled);
        }

        let n = reader.read(&mut buffer).map_err(|e| FetchError::Transport {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if n == 0 {
            break;
        }
        file.write_all(&buffer[..n])?;
        total += n as u64;
        on_progress(total);
    }

    file.flush()?;
    debug!("fetched {} bytes of {} into {}", total, url, dest.display());
    Ok(total)
}

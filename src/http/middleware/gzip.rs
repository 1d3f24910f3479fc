//! Gzip response compression.
//!
//! # Responsibilities
//! - Compress buffered response bodies for clients that accept gzip
//! - Skip small bodies, excluded paths/extensions, streamed bodies and
//!   responses that are already encoded
//!
//! # Design Decisions
//! - Raw deflate `Compress` instances are pooled per level and reset on
//!   release; the gzip header and trailer are framed by hand
//! - Compression happens after the chain returns, so it sees the final body

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, VARY};
use axum::http::HeaderValue;
use bytes::Bytes;
use flate2::{Compress, CompressError, Compression, Crc, FlushCompress, Status};
use parking_lot::Mutex;

use crate::error::{Result, RouterError};
use crate::http::context::RouterContext;
use crate::http::middleware::{Middleware, Next};

/// Bodies smaller than this are sent uncompressed.
pub const DEFAULT_MIN_SIZE: usize = 1024;

/// Extensions of formats that are already compressed.
pub const DEFAULT_EXCLUDED_EXTENSIONS: &[&str] = &[
    ".png", ".gif", ".jpeg", ".jpg", ".webp", ".gz", ".zip", ".mp4", ".woff2",
];

/// Idle compressors kept per level.
const MAX_IDLE_PER_LEVEL: usize = 32;

/// Gzip compression middleware.
#[derive(Clone)]
pub struct Gzip {
    level: Compression,
    min_size: usize,
    excluded_paths: Vec<String>,
    excluded_extensions: Vec<String>,
    pool: Arc<CompressorPool>,
}

impl Gzip {
    /// `level` is -1 (library default) or 1 through 9.
    pub fn new(level: i32) -> Result<Self> {
        Ok(Self {
            level: compression_level(level)?,
            min_size: DEFAULT_MIN_SIZE,
            excluded_paths: Vec::new(),
            excluded_extensions: DEFAULT_EXCLUDED_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            pool: Arc::new(CompressorPool::default()),
        })
    }

    pub fn with_min_size(mut self, min_size: usize) -> Self {
        self.min_size = min_size;
        self
    }

    /// Paths starting with any of these prefixes are never compressed.
    pub fn with_excluded_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the default excluded extensions.
    pub fn with_excluded_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_extensions = extensions
            .into_iter()
            .map(|ext| ext.into().to_ascii_lowercase())
            .collect();
        self
    }

    fn is_excluded(&self, path: &str) -> bool {
        if self.excluded_paths.iter().any(|prefix| path.starts_with(prefix.as_str())) {
            return true;
        }
        let path = path.to_ascii_lowercase();
        self.excluded_extensions.iter().any(|ext| path.ends_with(ext.as_str()))
    }

    fn compress_response(&self, ctx: &mut RouterContext) {
        let response = ctx.response();
        if response.headers().contains_key(CONTENT_ENCODING) {
            return;
        }
        let Some(body) = response.body().as_bytes() else {
            return;
        };
        if body.len() < self.min_size {
            return;
        }

        let compressed = match self.gzip(body) {
            Ok(compressed) => compressed,
            Err(err) => {
                tracing::warn!(error = %err, path = %ctx.path(), "gzip compression failed, sending identity");
                return;
            }
        };

        let response = ctx.response_mut();
        response.transform_body(Bytes::from(compressed));
        let headers = response.headers_mut();
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        headers.append(VARY, HeaderValue::from_static("Accept-Encoding"));
        headers.remove(CONTENT_LENGTH);
    }

    /// Gzip-frame `input`: 10-byte header, raw deflate, CRC32, ISIZE.
    fn gzip(&self, input: &[u8]) -> std::result::Result<Vec<u8>, CompressError> {
        let mut out = Vec::with_capacity(input.len() / 2 + 32);
        out.extend_from_slice(&[0x1f, 0x8b, 0x08, 0x00, 0, 0, 0, 0, self.xfl(), 0xff]);

        let mut compressor = self.pool.acquire(self.level);
        let result = deflate_into(&mut compressor, input, &mut out);
        self.pool.release(self.level, compressor);
        result?;

        let mut crc = Crc::new();
        crc.update(input);
        out.extend_from_slice(&crc.sum().to_le_bytes());
        out.extend_from_slice(&crc.amount().to_le_bytes());
        Ok(out)
    }

    fn xfl(&self) -> u8 {
        match self.level.level() {
            9 => 2,
            1 => 4,
            _ => 0,
        }
    }
}

#[async_trait]
impl Middleware for Gzip {
    async fn handle(&self, ctx: &mut RouterContext, next: Next) -> Result<()> {
        if !accepts_gzip(ctx.header(ACCEPT_ENCODING.as_str())) || self.is_excluded(ctx.path()) {
            return next.run(ctx).await;
        }
        let outcome = next.run(ctx).await;
        self.compress_response(ctx);
        outcome
    }
}

fn compression_level(level: i32) -> Result<Compression> {
    match level {
        -1 => Ok(Compression::default()),
        1..=9 => Ok(Compression::new(level as u32)),
        other => Err(RouterError::InvalidConfig(format!(
            "compression level {} out of range (-1 or 1-9)",
            other
        ))),
    }
}

/// `Accept-Encoding` lists gzip with a non-zero quality.
fn accepts_gzip(header: Option<&str>) -> bool {
    let Some(header) = header else {
        return false;
    };
    header.split(',').any(|entry| {
        let mut parts = entry.split(';');
        let coding = parts.next().unwrap_or_default().trim();
        if !coding.eq_ignore_ascii_case("gzip") {
            return false;
        }
        parts
            .filter_map(|param| param.trim().strip_prefix("q="))
            .all(|q| q.trim().parse::<f32>().map(|q| q > 0.0).unwrap_or(false))
    })
}

fn deflate_into(
    compressor: &mut Compress,
    input: &[u8],
    out: &mut Vec<u8>,
) -> std::result::Result<(), CompressError> {
    let start = compressor.total_in();
    loop {
        out.reserve(1024);
        let consumed = (compressor.total_in() - start) as usize;
        let status = compressor.compress_vec(&input[consumed..], out, FlushCompress::Finish)?;
        if status == Status::StreamEnd {
            return Ok(());
        }
    }
}

#[derive(Default)]
struct CompressorPool {
    idle: Mutex<HashMap<u32, Vec<Compress>>>,
}

impl CompressorPool {
    fn acquire(&self, level: Compression) -> Compress {
        self.idle
            .lock()
            .get_mut(&level.level())
            .and_then(Vec::pop)
            .unwrap_or_else(|| Compress::new(level, false))
    }

    fn release(&self, level: Compression, mut compressor: Compress) {
        compressor.reset();
        let mut idle = self.idle.lock();
        let slot = idle.entry(level.level()).or_default();
        if slot.len() < MAX_IDLE_PER_LEVEL {
            slot.push(compressor);
        }
    }
}

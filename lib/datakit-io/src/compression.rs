//! Payload compression.

use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use async_compression::{
    tokio::{bufread::GzipDecoder, write::GzipEncoder},
    Level,
};
use http::HeaderValue;
use pin_project::pin_project;
use tokio::io::{AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _};

static CONTENT_ENCODING_GZIP: HeaderValue = HeaderValue::from_static("gzip");

/// Compression schemes supported by [`Compressor`].
#[derive(Copy, Clone, Debug)]
pub enum CompressionScheme {
    /// No compression.
    Noop,
    /// Gzip.
    Gzip(Level),
}

impl CompressionScheme {
    /// No compression.
    pub const fn noop() -> Self {
        Self::Noop
    }

    /// Gzip compression at the default level.
    pub const fn gzip_default() -> Self {
        Self::Gzip(Level::Default)
    }

    /// Returns `true` if this scheme actually compresses.
    pub const fn is_compressed(&self) -> bool {
        matches!(self, Self::Gzip(_))
    }
}

/// Generic compressor.
///
/// Wraps a writer and compresses everything written to it according to the configured [`CompressionScheme`]. The
/// compressor must be shut down (see `AsyncWriteExt::shutdown`) before the inner writer holds a complete stream.
#[pin_project(project = CompressorProjected)]
pub enum Compressor<W: AsyncWrite> {
    /// No-op compressor.
    Noop(#[pin] W),
    /// Gzip compressor.
    Gzip(#[pin] GzipEncoder<W>),
}

impl<W: AsyncWrite> Compressor<W> {
    /// Creates a new compressor from a given compression scheme and writer.
    pub fn from_scheme(scheme: CompressionScheme, writer: W) -> Self {
        match scheme {
            CompressionScheme::Noop => Self::Noop(writer),
            CompressionScheme::Gzip(level) => Self::Gzip(GzipEncoder::with_quality(writer, level)),
        }
    }

    /// Consumes the compressor, returning the inner writer.
    pub fn into_inner(self) -> W {
        match self {
            Self::Noop(writer) => writer,
            Self::Gzip(encoder) => encoder.into_inner(),
        }
    }

    /// Returns the `Content-Encoding` header value for this compressor, if it compresses.
    pub fn content_encoding(&self) -> Option<HeaderValue> {
        match self {
            Self::Noop(_) => None,
            Self::Gzip(_) => Some(CONTENT_ENCODING_GZIP.clone()),
        }
    }
}

impl<W: AsyncWrite> AsyncWrite for Compressor<W> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<Result<usize, io::Error>> {
        match self.project() {
            CompressorProjected::Noop(writer) => writer.poll_write(cx, buf),
            CompressorProjected::Gzip(encoder) => encoder.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        match self.project() {
            CompressorProjected::Noop(writer) => writer.poll_flush(cx),
            CompressorProjected::Gzip(encoder) => encoder.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        match self.project() {
            CompressorProjected::Noop(writer) => writer.poll_shutdown(cx),
            CompressorProjected::Gzip(encoder) => encoder.poll_shutdown(cx),
        }
    }
}

/// Compresses `data` in one shot.
///
/// # Errors
///
/// If the compressor fails, an error is returned.
pub async fn compress(scheme: CompressionScheme, data: &[u8]) -> io::Result<Vec<u8>> {
    let mut compressor = Compressor::from_scheme(scheme, Vec::with_capacity(data.len() / 4));
    compressor.write_all(data).await?;
    compressor.shutdown().await?;
    Ok(compressor.into_inner())
}

/// Decompresses a complete gzip stream.
///
/// # Errors
///
/// If `data` is not a valid gzip stream, an error is returned.
pub async fn gunzip(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut decoder = GzipDecoder::new(data);
    let mut out = Vec::with_capacity(data.len() * 4);
    decoder.read_to_end(&mut out).await?;
    Ok(out)
}

/// Returns `true` if `data` starts with the gzip magic bytes and the deflate method.
pub fn is_gzip(data: &[u8]) -> bool {
    data.len() >= 3 && data[0] == 0x1f && data[1] == 0x8b && data[2] == 0x08
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn gzip_round_trip() {
        let data = b"cpu,host=a usage=1.5 10\nmem free=2i 20".repeat(50);

        let compressed = compress(CompressionScheme::gzip_default(), &data).await.unwrap();
        assert!(is_gzip(&compressed));
        assert!(compressed.len() < data.len());

        let decompressed = gunzip(&compressed).await.unwrap();
        assert_eq!(decompressed, data);
    }

    #[tokio::test]
    async fn noop_passes_through() {
        let data = b"hello world".to_vec();
        let out = compress(CompressionScheme::noop(), &data).await.unwrap();
        assert_eq!(out, data);
        assert!(!is_gzip(&out));
    }

    #[test]
    fn content_encoding() {
        assert_eq!(
            Compressor::from_scheme(CompressionScheme::gzip_default(), Vec::new()).content_encoding(),
            Some(HeaderValue::from_static("gzip"))
        );
        assert_eq!(
            Compressor::from_scheme(CompressionScheme::noop(), Vec::new()).content_encoding(),
            None
        );
    }

    #[tokio::test]
    async fn gunzip_rejects_garbage() {
        assert!(gunzip(b"definitely not gzip").await.is_err());
    }
}

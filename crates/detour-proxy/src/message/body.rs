//! Message bodies: finite byte buffers or lazy chunk producers.

use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use futures::Stream;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use std::convert::Infallible;
use std::fmt;
use std::io;

/// Body type handed to hyper on both the client and the server side.
pub type HttpBody = UnsyncBoxBody<Bytes, io::Error>;

/// Body of a request or response.
///
/// A body is either held in memory or produced lazily by a stream of chunks.
/// Streamed bodies can be consumed exactly once.
pub struct Body {
    kind: Kind,
}

enum Kind {
    Full(Bytes),
    Stream(BoxStream<'static, io::Result<Bytes>>),
}

impl Body {
    pub fn empty() -> Self {
        Self::from(Bytes::new())
    }

    /// Wrap a lazy producer of chunks.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self {
            kind: Kind::Stream(stream.boxed()),
        }
    }

    /// Wrap an iterator of chunks; chunks are pulled only as the body is sent.
    pub fn from_chunks<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = Bytes>,
        I::IntoIter: Send + 'static,
    {
        Self::from_stream(stream::iter(chunks.into_iter().map(Ok)))
    }

    /// True for an in-memory body with no bytes. Streams are never considered empty.
    pub fn is_empty(&self) -> bool {
        match &self.kind {
            Kind::Full(bytes) => bytes.is_empty(),
            Kind::Stream(_) => false,
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self.kind, Kind::Stream(_))
    }

    /// Exact length for in-memory bodies.
    pub fn len(&self) -> Option<usize> {
        match &self.kind {
            Kind::Full(bytes) => Some(bytes.len()),
            Kind::Stream(_) => None,
        }
    }

    /// The bytes of an in-memory body.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match &self.kind {
            Kind::Full(bytes) => Some(bytes),
            Kind::Stream(_) => None,
        }
    }

    /// Copy of an in-memory body; streams cannot be duplicated.
    pub fn try_clone(&self) -> Option<Self> {
        self.as_bytes().cloned().map(Self::from)
    }

    /// Turn the body into a stream of chunks. Empty chunks are skipped.
    pub fn into_stream(self) -> BoxStream<'static, io::Result<Bytes>> {
        match self.kind {
            Kind::Full(bytes) if bytes.is_empty() => stream::empty().boxed(),
            Kind::Full(bytes) => stream::once(async move { Ok(bytes) }).boxed(),
            Kind::Stream(inner) => inner
                .filter(|chunk| {
                    let keep = !matches!(chunk, Ok(bytes) if bytes.is_empty());
                    async move { keep }
                })
                .boxed(),
        }
    }

    /// Convert into a hyper body without buffering. In-memory bodies keep an
    /// exact size hint; streams are sent chunked.
    pub fn into_http_body(self) -> HttpBody {
        match self.kind {
            Kind::Full(bytes) => Full::new(bytes)
                .map_err(|never: Infallible| match never {})
                .boxed_unsync(),
            Kind::Stream(inner) => StreamBody::new(inner.map_ok(Frame::data)).boxed_unsync(),
        }
    }

    /// Drain the whole body into memory.
    pub async fn collect(self) -> io::Result<Bytes> {
        match self.kind {
            Kind::Full(bytes) => Ok(bytes),
            Kind::Stream(mut inner) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = inner.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Kind::Full(bytes) => f.debug_tuple("Body::Full").field(&bytes.len()).finish(),
            Kind::Stream(_) => f.write_str("Body::Stream"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self {
            kind: Kind::Full(bytes),
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from(Bytes::from(bytes))
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Self::from(Bytes::from(text))
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Self::from(Bytes::from_static(text.as_bytes()))
    }
}

use url::Url;

use crate::context::DavContext;
use crate::error::{ParsingError, ProtocolError, SequenceError};
use crate::mediatype::{negotiate, MediaType};
use crate::types::Error;
use crate::xml::{ElementKind, IRead, QuickXml, Reader};

/// What the transport hands over once the final response is known.
pub struct IncomingResponse<R> {
    /// Request URI after redirects, base for relative references.
    pub uri: Url,
    pub content_type: Option<MediaType>,
    pub body: Option<R>,
}

impl<R> IncomingResponse<R> {
    pub fn new(uri: Url, content_type: Option<MediaType>, body: Option<R>) -> Self {
        Self {
            uri,
            content_type,
            body,
        }
    }

    pub fn from_http(uri: Url, resp: http::Response<Option<R>>) -> Result<Self, ProtocolError> {
        let (parts, body) = resp.into_parts();
        let content_type = match parts.headers.get(http::header::CONTENT_TYPE) {
            None => None,
            Some(raw) => {
                let raw = raw
                    .to_str()
                    .map_err(|_| ProtocolError::UnacceptableContentType("<binary>".into()))?;
                let parsed = raw
                    .parse::<MediaType>()
                    .map_err(|_| ProtocolError::UnacceptableContentType(raw.into()))?;
                Some(parsed)
            }
        };
        Ok(Self::new(uri, content_type, body))
    }
}

/// Common ground of every XML response reader: content negotiation and
/// ownership of the body stream.
pub struct XmlResponseReader<R: IRead> {
    uri: Url,
    cursor: Option<Reader<QuickXml<R>>>,
    has_body: bool,
}

impl<R: IRead> XmlResponseReader<R> {
    pub async fn new(resp: IncomingResponse<R>, ctx: &DavContext) -> Result<Self, ProtocolError> {
        let IncomingResponse {
            uri,
            content_type,
            body,
        } = resp;

        let body = match body {
            Some(body) => body,
            None => {
                tracing::debug!(uri=%uri, "response has no body");
                return Ok(Self {
                    uri,
                    cursor: None,
                    has_body: false,
                });
            }
        };

        let (media_type, charset) =
            negotiate(content_type.as_ref(), &ctx.accepted_types, ctx.negotiation())?;
        if content_type.is_none() {
            tracing::warn!(uri=%uri, "missing content-type, reading the body as {}", media_type);
        }
        tracing::debug!(uri=%uri, media_type=%media_type, charset=%charset, "decoding response body");

        let tokens = QuickXml::with_charset(body, &charset)?;
        let cursor = Reader::new(tokens).await?;
        Ok(Self {
            uri,
            cursor: Some(cursor),
            has_body: true,
        })
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn has_body(&self) -> bool {
        self.has_body
    }

    pub fn cursor(&mut self) -> Result<&mut Reader<QuickXml<R>>, ProtocolError> {
        match (&mut self.cursor, self.has_body) {
            (Some(cursor), _) => Ok(cursor),
            (None, false) => Err(ProtocolError::EmptyBody),
            (None, true) => Err(SequenceError::Closed.into()),
        }
    }

    /// Releases the body stream. Nothing is read.
    pub fn close(&mut self) {
        if self.cursor.take().is_some() {
            tracing::trace!(uri=%self.uri, "response body released");
        }
    }

    pub fn is_released(&self) -> bool {
        self.cursor.is_none()
    }
}

const ERROR: ElementKind = ElementKind::dav("error");

/// Reads a `DAV:error` body, as sent with 403 Forbidden or 409 Conflict.
pub struct ErrorReader<R: IRead> {
    inner: XmlResponseReader<R>,
    error: Option<Error>,
    poisoned: bool,
    closed: bool,
}

impl<R: IRead> ErrorReader<R> {
    pub async fn new(resp: IncomingResponse<R>, ctx: &DavContext) -> Result<Self, ProtocolError> {
        Ok(Self {
            inner: XmlResponseReader::new(resp, ctx).await?,
            error: None,
            poisoned: false,
            closed: false,
        })
    }

    /// The condition codes sent by the server. Read once, then cached.
    pub async fn read_error(&mut self) -> Result<&Error, ProtocolError> {
        if self.closed {
            return Err(SequenceError::Closed.into());
        }
        if self.poisoned {
            return Err(SequenceError::Poisoned.into());
        }

        if self.error.is_none() {
            let cursor = self.inner.cursor()?;
            match cursor.pull::<Error>(ERROR, None, &[]).await {
                Ok(found) => self.error = found,
                Err(e) => return Err(self.poison(e)),
            }
        }
        self.error
            .as_ref()
            .ok_or(ProtocolError::MissingRootElement("error"))
    }

    fn poison(&mut self, e: ParsingError) -> ProtocolError {
        tracing::debug!(uri=%self.inner.uri(), err=%e, "malformed error body");
        self.poisoned = true;
        ProtocolError::MalformedDocument(e)
    }

    /// Consumes what is left of the body then releases it, even when
    /// consuming fails.
    pub async fn close(&mut self) -> Result<(), ProtocolError> {
        if self.closed {
            return Ok(());
        }

        let res = match (self.poisoned, self.inner.cursor()) {
            (false, Ok(cursor)) => cursor.drain().await.map_err(ProtocolError::from),
            _ => Ok(()),
        };
        self.inner.close();
        self.closed = true;
        res
    }
}

impl<R: IRead> Drop for ErrorReader<R> {
    fn drop(&mut self) {
        if !self.closed && !self.inner.is_released() {
            tracing::warn!(uri=%self.inner.uri(), "error reader dropped without being closed");
        }
    }
}

use url::Url;

use crate::context::DavContext;
use crate::error::{ParsingError, ProtocolError, SequenceError};
use crate::response::{IncomingResponse, XmlResponseReader};
use crate::types::{Multistatus, Response};
use crate::xml::{ElementKind, IRead, QuickXml, Reader, Token, DAV_URN};

const MULTISTATUS: ElementKind = ElementKind::dav("multistatus");
const RESPONSE: ElementKind = ElementKind::dav("response");
const MULTISTATUS_PATH: &[ElementKind] = &[MULTISTATUS];

enum State {
    Fresh,
    Streaming { pending: bool, ended: bool },
    Materialized(Multistatus),
    Closed,
    Poisoned,
}

enum Step {
    Entry,
    End,
    NoRoot,
}

/// Reads a 207 Multi-Status body.
///
/// Entries can be pulled one by one with `has_next` / `next_response`, or
/// all at once with `materialize`; both styles can be mixed, the
/// materialized document always holding every entry of the body.
///
/// `close` must be called once done: it consumes the rest of the body so the
/// underlying connection can be reused, then releases it.
pub struct MultistatusReader<R: IRead> {
    inner: XmlResponseReader<R>,
    state: State,
    keep_not_found: bool,
    root_missing: bool,
    // entries already handed out, kept for materialization
    consumed: Vec<Response>,
    // top level children seen while streaming
    trailer: Multistatus,
}

impl<R: IRead> MultistatusReader<R> {
    pub async fn new(resp: IncomingResponse<R>, ctx: &DavContext) -> Result<Self, ProtocolError> {
        Ok(Self {
            inner: XmlResponseReader::new(resp, ctx).await?,
            state: State::Fresh,
            keep_not_found: ctx.keep_not_found_properties,
            root_missing: false,
            consumed: vec![],
            trailer: Multistatus::default(),
        })
    }

    /// Base used to resolve the references of the entries.
    pub fn uri(&self) -> &Url {
        self.inner.uri()
    }

    pub async fn has_next(&mut self) -> Result<bool, ProtocolError> {
        let fresh = match &self.state {
            State::Closed => return Err(SequenceError::Closed.into()),
            State::Poisoned => return Err(SequenceError::Poisoned.into()),
            State::Materialized(_) | State::Streaming { ended: true, .. } => return Ok(false),
            State::Streaming { pending: true, .. } => return Ok(true),
            State::Streaming { .. } => false,
            State::Fresh => true,
        };

        let cursor = self.inner.cursor()?;
        match step(cursor, fresh, &mut self.trailer).await {
            Ok(Step::Entry) => {
                self.state = State::Streaming {
                    pending: true,
                    ended: false,
                };
                Ok(true)
            }
            Ok(Step::End) => {
                self.state = State::Streaming {
                    pending: false,
                    ended: true,
                };
                Ok(false)
            }
            Ok(Step::NoRoot) => {
                tracing::debug!(uri=%self.inner.uri(), "no multistatus element in body");
                self.root_missing = true;
                self.state = State::Streaming {
                    pending: false,
                    ended: true,
                };
                Ok(false)
            }
            Err(e) => Err(self.poison(e)),
        }
    }

    /// The entry found by the last `has_next`. `recycle`, when given, is
    /// overwritten instead of allocating a new entry.
    pub async fn next_response(
        &mut self,
        recycle: Option<Response>,
    ) -> Result<Response, ProtocolError> {
        match &self.state {
            State::Closed => return Err(SequenceError::Closed.into()),
            State::Poisoned => return Err(SequenceError::Poisoned.into()),
            State::Streaming { pending: true, .. } => (),
            _ => return Err(SequenceError::NextWithoutHasNext.into()),
        };

        let cursor = self.inner.cursor()?;
        let pulled = cursor
            .pull::<Response>(RESPONSE, recycle, MULTISTATUS_PATH)
            .await;
        self.state = State::Streaming {
            pending: false,
            ended: false,
        };

        let mut entry = match pulled {
            Ok(Some(entry)) => entry,
            Ok(None) => return Err(self.poison(ParsingError::TagNotFound)),
            Err(e) => return Err(self.poison(e)),
        };
        if let Err(e) = self.prepare(&mut entry) {
            return Err(self.poison(e));
        }

        self.consumed.push(entry.clone());
        Ok(entry)
    }

    /// The whole document. Read once, later calls return the same value.
    pub async fn materialize(&mut self) -> Result<&Multistatus, ProtocolError> {
        match self.state {
            State::Closed => return Err(SequenceError::Closed.into()),
            State::Poisoned => return Err(SequenceError::Poisoned.into()),
            _ => (),
        };
        if !matches!(self.state, State::Materialized(_)) {
            let ms = self.read_remainder().await?;
            self.state = State::Materialized(ms);
        }

        match &self.state {
            State::Materialized(ms) => Ok(ms),
            _ => Err(SequenceError::Poisoned.into()),
        }
    }

    async fn read_remainder(&mut self) -> Result<Multistatus, ProtocolError> {
        if self.root_missing {
            return Err(ProtocolError::MissingRootElement("multistatus"));
        }

        let fresh = matches!(self.state, State::Fresh);
        let trailer = std::mem::take(&mut self.trailer);
        let cursor = self.inner.cursor()?;
        let read = if fresh {
            cursor.pull::<Multistatus>(MULTISTATUS, None, &[]).await
        } else if cursor.at(MULTISTATUS_PATH) {
            trailer.qread_children(cursor).await.map(Some)
        } else {
            Ok(Some(trailer))
        };

        let mut ms = match read {
            Ok(Some(ms)) => ms,
            Ok(None) => {
                self.root_missing = true;
                self.state = State::Streaming {
                    pending: false,
                    ended: true,
                };
                return Err(ProtocolError::MissingRootElement("multistatus"));
            }
            Err(e) => return Err(self.poison(e)),
        };

        for entry in ms.responses.iter_mut() {
            if let Err(e) = self.prepare(entry) {
                return Err(self.poison(e));
            }
        }

        let mut responses = std::mem::take(&mut self.consumed);
        tracing::debug!(
            uri=%self.inner.uri(),
            streamed=responses.len(),
            remaining=ms.responses.len(),
            "multistatus materialized"
        );
        responses.append(&mut ms.responses);
        ms.responses = responses;
        Ok(ms)
    }

    /// Filtering and reference resolution, done once per entry.
    fn prepare(&self, entry: &mut Response) -> Result<(), ParsingError> {
        if !self.keep_not_found {
            entry.retain_found();
        }
        entry.resolve_hrefs(self.inner.uri())?;
        tracing::trace!(href=?entry.href().map(|h| h.as_str()), "multistatus entry");
        Ok(())
    }

    fn poison(&mut self, e: ParsingError) -> ProtocolError {
        tracing::debug!(uri=%self.inner.uri(), err=%e, "malformed multistatus body");
        self.state = State::Poisoned;
        ProtocolError::MalformedDocument(e)
    }

    /// Materializes, consumes the rest of the body, then releases it. The
    /// body is released whatever happens before; the first error is
    /// returned. Calling it again does nothing.
    pub async fn close(&mut self) -> Result<(), ProtocolError> {
        let res = match self.state {
            State::Closed => return Ok(()),
            State::Poisoned => Ok(()),
            _ if !self.inner.has_body() => Ok(()),
            _ => self.finish().await,
        };

        self.inner.close();
        self.state = State::Closed;
        res
    }

    async fn finish(&mut self) -> Result<(), ProtocolError> {
        let materialized = self.materialize().await.map(|_| ());
        let drained = match &self.state {
            State::Poisoned => Ok(()),
            _ => match self.inner.cursor() {
                Ok(cursor) => cursor.drain().await.map_err(ProtocolError::from),
                Err(e) => Err(e),
            },
        };
        materialized.and(drained)
    }
}

impl<R: IRead> Drop for MultistatusReader<R> {
    fn drop(&mut self) {
        if !matches!(self.state, State::Closed) && !self.inner.is_released() {
            tracing::warn!(uri=%self.inner.uri(), "multistatus reader dropped without being closed, body left unread");
        }
    }
}

/// Moves the cursor to the next entry, collecting on the way the top level
/// children that are not entries.
async fn step<R: IRead>(
    cursor: &mut Reader<QuickXml<R>>,
    fresh: bool,
    trailer: &mut Multistatus,
) -> Result<Step, ParsingError> {
    if fresh {
        if !cursor.advance_to_next_sibling(MULTISTATUS, &[]).await? {
            return Ok(Step::NoRoot);
        }
        cursor.open(DAV_URN, "multistatus").await?;
    }

    while cursor.at(MULTISTATUS_PATH) && cursor.parent_has_child() {
        let mut dirty = false;
        cursor
            .maybe_read(&mut trailer.responsedescription, &mut dirty)
            .await?;
        cursor.maybe_read(&mut trailer.sync_token, &mut dirty).await?;
        if dirty {
            continue;
        }

        let foreign = match cursor.peek() {
            Token::Text(_) => true,
            Token::Start(tag) | Token::Empty(tag) => !tag.name.is_kind(&RESPONSE),
            _ => false,
        };
        if !foreign {
            break;
        }
        cursor.skip().await?;
    }

    match cursor
        .advance_to_next_sibling(RESPONSE, MULTISTATUS_PATH)
        .await?
    {
        true => Ok(Step::Entry),
        false => Ok(Step::End),
    }
}

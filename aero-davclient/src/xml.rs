use futures::Future;
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;
use tokio::io::{AsyncBufRead, AsyncWrite};

use super::error::ParsingError;
use super::types::{Attribute, ElementName};

// Constants
pub const DAV_URN: &str = "DAV:";
pub const CAL_URN: &str = "urn:ietf:params:xml:ns:caldav";
pub const CARD_URN: &str = "urn:ietf:params:xml:ns:carddav";
pub const CALSERVER_URN: &str = "http://calendarserver.org/ns/";

// Async traits
pub trait IWrite: AsyncWrite + Unpin + Send {}
impl<T: AsyncWrite + Unpin + Send> IWrite for T {}
pub trait IRead: AsyncBufRead + Unpin {}
impl<T: AsyncBufRead + Unpin> IRead for T {}

// Serialization/Deserialization traits
pub trait QWrite {
    fn qwrite(
        &self,
        xml: &mut Writer<impl IWrite>,
    ) -> impl Future<Output = Result<(), quick_xml::Error>> + Send;
}
pub trait QRead: Sized {
    fn qread(xml: &mut Reader<impl Tokenizer>) -> impl Future<Output = Result<Self, ParsingError>>;

    /// Decode into an existing value, so its allocations can be reused.
    /// The observable result is the same as `qread`.
    fn qread_into(
        &mut self,
        xml: &mut Reader<impl Tokenizer>,
    ) -> impl Future<Output = Result<(), ParsingError>> {
        async move {
            *self = Self::qread(xml).await?;
            Ok(())
        }
    }
}

/// Static name of an element the cursor looks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementKind {
    pub ns: &'static str,
    pub local: &'static str,
}
impl ElementKind {
    pub const fn dav(local: &'static str) -> Self {
        Self { ns: DAV_URN, local }
    }
}

// ---------------

#[derive(Debug, PartialEq, Clone)]
pub struct Tag {
    pub name: ElementName,
    pub attributes: Vec<Attribute>,
}

/// A namespace-resolved XML token.
///
/// Declarations, comments and processing instructions never reach the cursor.
#[derive(Debug, PartialEq, Clone)]
pub enum Token {
    Start(Tag),
    Empty(Tag),
    End(ElementName),
    Text(String),
    Eof,
}

/// The primitive the cursor pulls tokens from.
pub trait Tokenizer {
    fn advance(&mut self) -> impl Future<Output = Result<Token, ParsingError>>;

    /// Consume everything up to and including the end tag matching the last
    /// `Token::Start` returned by `advance`. Every token goes through
    /// `advance`, so namespace scopes opened inside the subtree are closed.
    fn skip_subtree(&mut self) -> impl Future<Output = Result<(), ParsingError>> {
        async move {
            let mut depth = 1usize;
            while depth > 0 {
                match self.advance().await? {
                    Token::Start(_) => depth += 1,
                    Token::End(_) => depth -= 1,
                    Token::Eof => return Err(ParsingError::Eof),
                    _ => (),
                }
            }
            Ok(())
        }
    }
}

/// quick-xml backed tokenizer
pub struct QuickXml<R: IRead> {
    rdr: NsReader<R>,
    buf: Vec<u8>,
}
impl<R: IRead> QuickXml<R> {
    pub fn new(rdr: NsReader<R>) -> Self {
        Self {
            rdr,
            buf: vec![],
        }
    }

    pub fn from_reader(src: R) -> Self {
        Self::new(NsReader::from_reader(src))
    }

    /// quick-xml only decodes UTF-8, other charsets are refused upfront.
    pub fn with_charset(src: R, charset: &str) -> Result<Self, ParsingError> {
        match charset.trim().to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" | "us-ascii" => Ok(Self::from_reader(src)),
            other => Err(ParsingError::UnsupportedCharset(other.into())),
        }
    }
}

fn namespace(ns: ResolveResult) -> Result<Option<String>, ParsingError> {
    match ns {
        ResolveResult::Bound(n) => Ok(Some(std::str::from_utf8(n.into_inner())?.to_string())),
        ResolveResult::Unbound => Ok(None),
        ResolveResult::Unknown(p) => Err(ParsingError::UnknownPrefix(
            String::from_utf8_lossy(&p).into_owned(),
        )),
    }
}

fn tag<R>(rdr: &NsReader<R>, ns: Option<String>, bs: &BytesStart) -> Result<Tag, ParsingError> {
    let name = ElementName {
        ns,
        local: std::str::from_utf8(bs.local_name().into_inner())?.to_string(),
    };

    let mut attributes = vec![];
    for attr in bs.attributes() {
        let attr = attr?;
        if attr.key.as_namespace_binding().is_some() {
            continue;
        }
        let (attr_ns, local) = rdr.resolve_attribute(attr.key);
        let name = ElementName {
            ns: namespace(attr_ns)?,
            local: std::str::from_utf8(local.into_inner())?.to_string(),
        };
        let value = attr.decode_and_unescape_value(rdr)?.into_owned();
        attributes.push(Attribute { name, value });
    }

    Ok(Tag { name, attributes })
}

impl<R: IRead> Tokenizer for QuickXml<R> {
    async fn advance(&mut self) -> Result<Token, ParsingError> {
        loop {
            self.buf.clear();
            let (ns, evt) = self
                .rdr
                .read_resolved_event_into_async(&mut self.buf)
                .await?;
            let ns = namespace(ns)?;
            let token = match evt {
                Event::Start(bs) => Token::Start(tag(&self.rdr, ns, &bs)?),
                Event::Empty(bs) => Token::Empty(tag(&self.rdr, ns, &bs)?),
                Event::End(be) => Token::End(ElementName {
                    ns,
                    local: std::str::from_utf8(be.local_name().into_inner())?.to_string(),
                }),
                Event::Text(escaped) => Token::Text(escaped.unescape()?.into_owned()),
                Event::CData(unescaped) => {
                    Token::Text(std::str::from_utf8(unescaped.as_ref())?.to_string())
                }
                Event::Eof => Token::Eof,
                Event::Decl(_) | Event::PI(_) | Event::Comment(_) | Event::DocType(_) => continue,
            };
            return Ok(token);
        }
    }
}

// ---------------

/// Prefixes used when serializing well-known namespaces.
#[derive(Debug, Clone, PartialEq)]
pub struct NamespaceContext(Vec<(String, String)>);
impl Default for NamespaceContext {
    fn default() -> Self {
        Self(vec![
            (DAV_URN.into(), "D".into()),
            (CAL_URN.into(), "C".into()),
            (CARD_URN.into(), "CARD".into()),
            (CALSERVER_URN.into(), "CS".into()),
        ])
    }
}
impl NamespaceContext {
    pub fn empty() -> Self {
        Self(vec![])
    }

    pub fn with(mut self, uri: impl Into<String>, prefix: impl Into<String>) -> Self {
        self.0.push((uri.into(), prefix.into()));
        self
    }

    pub fn prefix(&self, uri: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(u, _)| u == uri)
            .map(|(_, p)| p.as_str())
    }
}

/// Transform a Rust object into an XML stream of characters
pub struct Writer<T: IWrite> {
    pub q: quick_xml::writer::Writer<T>,
    pub ns_to_apply: Vec<(String, String)>,
    namespaces: NamespaceContext,
    // (uri, prefix) declared by each open element, the first frame is the document
    scopes: Vec<Vec<(String, String)>>,
    generated: usize,
}
impl<T: IWrite> Writer<T> {
    pub fn new(q: quick_xml::writer::Writer<T>, namespaces: NamespaceContext) -> Self {
        Self {
            q,
            ns_to_apply: vec![],
            namespaces,
            scopes: vec![vec![]],
            generated: 0,
        }
    }

    /// Declare `uri` on the next element written; it then stays in scope
    /// for the whole document.
    pub fn use_namespace(&mut self, uri: &str) {
        if self.scopes[0].iter().any(|(u, _)| u == uri) {
            return;
        }
        let prefix = self.assign_prefix(uri);
        self.ns_to_apply
            .push((format!("xmlns:{}", prefix), uri.to_string()));
        self.scopes[0].push((uri.to_string(), prefix));
    }

    pub fn create_dav_element(&mut self, name: &str) -> BytesStart<'static> {
        self.create_element(&ElementName::dav(name), &[])
    }

    /// Build a start tag, declaring inline the namespaces not yet in scope.
    /// Must be balanced by `close` or written with `empty`.
    pub fn create_element(
        &mut self,
        name: &ElementName,
        attributes: &[Attribute],
    ) -> BytesStart<'static> {
        self.scopes.push(vec![]);
        let qname = self.qualify(name);
        let mut start = BytesStart::new(qname);
        let attrs = attributes
            .iter()
            .map(|a| (self.qualify(&a.name), a.value.clone()))
            .collect::<Vec<_>>();
        if !self.ns_to_apply.is_empty() {
            start.extend_attributes(
                self.ns_to_apply
                    .iter()
                    .map(|(k, n)| (k.as_str(), n.as_str())),
            );
            self.ns_to_apply.clear()
        }
        for (k, v) in attrs.iter() {
            start.push_attribute((k.as_str(), v.as_str()));
        }
        start
    }

    pub async fn open(&mut self, start: BytesStart<'static>) -> Result<(), quick_xml::Error> {
        self.q.write_event_async(Event::Start(start)).await
    }

    pub async fn close(&mut self, end: BytesEnd<'_>) -> Result<(), quick_xml::Error> {
        self.scopes.pop();
        self.q.write_event_async(Event::End(end)).await
    }

    pub async fn empty(&mut self, start: BytesStart<'static>) -> Result<(), quick_xml::Error> {
        self.scopes.pop();
        self.q.write_event_async(Event::Empty(start)).await
    }

    fn in_scope(&self, uri: &str) -> Option<&str> {
        self.scopes
            .iter()
            .rev()
            .flatten()
            .find(|(u, _)| u == uri)
            .map(|(_, p)| p.as_str())
    }

    fn prefix_taken(&self, prefix: &str) -> bool {
        self.scopes.iter().flatten().any(|(_, p)| p == prefix)
    }

    fn assign_prefix(&mut self, uri: &str) -> String {
        if let Some(p) = self.namespaces.prefix(uri) {
            if !self.prefix_taken(p) {
                return p.to_string();
            }
        }
        loop {
            let candidate = format!("ns{}", self.generated);
            self.generated += 1;
            if !self.prefix_taken(&candidate) {
                return candidate;
            }
        }
    }

    fn qualify(&mut self, name: &ElementName) -> String {
        let uri = match &name.ns {
            None => return name.local.clone(),
            Some(uri) => uri,
        };
        if let Some(prefix) = self.in_scope(uri) {
            return format!("{}:{}", prefix, name.local);
        }
        let prefix = self.assign_prefix(uri);
        self.ns_to_apply
            .push((format!("xmlns:{}", prefix), uri.clone()));
        if let Some(frame) = self.scopes.last_mut() {
            frame.push((uri.clone(), prefix.clone()));
        }
        format!("{}:{}", prefix, name.local)
    }
}

/// Transform an XML stream of tokens into Rust objects.
///
/// The reader is always one token ahead: `peek` is the token the next
/// decoder will see, `parents` the elements opened and not yet closed.
pub struct Reader<T: Tokenizer> {
    tokens: T,
    cur: Token,
    parents: Vec<Token>,
}
impl<T: Tokenizer> Reader<T> {
    pub async fn new(mut tokens: T) -> Result<Self, ParsingError> {
        let cur = tokens.advance().await?;
        Ok(Self {
            tokens,
            cur,
            parents: vec![],
        })
    }

    /// read one more tag
    async fn next(&mut self) -> Result<Token, ParsingError> {
        let evt = self.tokens.advance().await?;
        Ok(std::mem::replace(&mut self.cur, evt))
    }

    /// skip a node at current level
    pub async fn skip(&mut self) -> Result<Token, ParsingError> {
        match &self.cur {
            Token::Start(_) => {
                self.tokens.skip_subtree().await?;
                self.next().await
            }
            Token::End(_) => Err(ParsingError::WrongToken),
            Token::Eof => Err(ParsingError::Eof),
            _ => self.next().await,
        }
    }

    /// check if this is the desired tag
    fn is_tag(&self, ns: &str, key: &str) -> bool {
        match self.peek() {
            Token::Start(tag) | Token::Empty(tag) => tag.name.is(ns, key),
            Token::End(name) => name.is(ns, key),
            _ => false,
        }
    }

    pub fn parent_has_child(&self) -> bool {
        matches!(self.parents.last(), Some(Token::Start(_)) | None)
    }

    fn ensure_parent_has_child(&self) -> Result<(), ParsingError> {
        match self.parent_has_child() {
            true => Ok(()),
            false => Err(ParsingError::Recoverable),
        }
    }

    pub fn peek(&self) -> &Token {
        &self.cur
    }

    /// Names of the currently open elements, outermost first.
    pub fn path(&self) -> impl Iterator<Item = &ElementName> {
        self.parents.iter().filter_map(|t| match t {
            Token::Start(tag) | Token::Empty(tag) => Some(&tag.name),
            _ => None,
        })
    }

    /// Whether the open elements are exactly `within`.
    pub fn at(&self, within: &[ElementKind]) -> bool {
        self.parents.len() == within.len() && self.matching_depth(within) == within.len()
    }

    fn matching_depth(&self, within: &[ElementKind]) -> usize {
        self.path()
            .zip(within.iter())
            .take_while(|(name, kind)| name.is_kind(kind))
            .count()
    }

    pub async fn tag_string(&mut self) -> Result<String, ParsingError> {
        if !self.parent_has_child() {
            return Ok(String::new());
        }

        let mut acc = String::new();
        loop {
            match self.peek() {
                Token::Text(txt) => {
                    acc.push_str(txt);
                    self.next().await?
                }
                Token::End(_) | Token::Start(_) | Token::Empty(_) => return Ok(acc),
                Token::Eof => return Err(ParsingError::Eof),
            };
        }
    }

    pub async fn maybe_read<N: QRead>(
        &mut self,
        t: &mut Option<N>,
        dirty: &mut bool,
    ) -> Result<(), ParsingError> {
        if !self.parent_has_child() {
            return Ok(());
        }

        match N::qread(self).await {
            Ok(v) => {
                *t = Some(v);
                *dirty = true;
                Ok(())
            }
            Err(ParsingError::Recoverable) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn maybe_push<N: QRead>(
        &mut self,
        t: &mut Vec<N>,
        dirty: &mut bool,
    ) -> Result<(), ParsingError> {
        if !self.parent_has_child() {
            return Ok(());
        }

        match N::qread(self).await {
            Ok(v) => {
                t.push(v);
                *dirty = true;
                Ok(())
            }
            Err(ParsingError::Recoverable) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn find<N: QRead>(&mut self) -> Result<N, ParsingError> {
        self.ensure_parent_has_child()?;

        loop {
            // Try parse
            match N::qread(self).await {
                Err(ParsingError::Recoverable) => (),
                otherwise => return otherwise,
            }

            // If recovered, skip the element
            self.skip().await?;
        }
    }

    pub async fn collect<N: QRead>(&mut self) -> Result<Vec<N>, ParsingError> {
        let mut acc = Vec::new();
        if !self.parent_has_child() {
            return Ok(acc);
        }

        loop {
            match N::qread(self).await {
                Err(ParsingError::Recoverable) => match self.peek() {
                    Token::End(_) => return Ok(acc),
                    _ => {
                        self.skip().await?;
                    }
                },
                Ok(v) => acc.push(v),
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn open(&mut self, ns: &str, key: &str) -> Result<Token, ParsingError> {
        let evt = match self.peek() {
            Token::Empty(_) if self.is_tag(ns, key) => {
                // a self-closed tag is opened without moving:
                // the cursor virtually stays on it until `close`
                self.cur.clone()
            }
            Token::Start(_) if self.is_tag(ns, key) => self.next().await?,
            _ => return Err(ParsingError::Recoverable),
        };

        self.parents.push(evt.clone());
        Ok(evt)
    }

    // find stop tag
    pub async fn close(&mut self) -> Result<Token, ParsingError> {
        // Handle the empty case
        if !self.parent_has_child() {
            self.parents.pop();
            return self.next().await;
        }

        // Handle the start/end case
        loop {
            match self.peek() {
                Token::End(_) => {
                    self.parents.pop();
                    return self.next().await;
                }
                _ => self.skip().await?,
            };
        }
    }

    /// Read the element at the cursor, whatever it is, as a tree.
    pub async fn element(&mut self) -> Result<super::types::Element, ParsingError> {
        use super::types::{Content, Element};

        let mut stack: Vec<Element> = vec![];
        loop {
            let done = match self.peek() {
                Token::Start(tag) => {
                    stack.push(Element {
                        name: tag.name.clone(),
                        attributes: tag.attributes.clone(),
                        children: vec![],
                    });
                    None
                }
                Token::Empty(tag) => Some(Element {
                    name: tag.name.clone(),
                    attributes: tag.attributes.clone(),
                    children: vec![],
                }),
                Token::Text(txt) => {
                    match stack.last_mut() {
                        Some(parent) if !txt.trim().is_empty() => {
                            parent.children.push(Content::Text(txt.clone()))
                        }
                        Some(_) => (),
                        None => return Err(ParsingError::Recoverable),
                    };
                    None
                }
                Token::End(_) => Some(stack.pop().ok_or(ParsingError::WrongToken)?),
                Token::Eof => return Err(ParsingError::Eof),
            };
            self.next().await?;

            if let Some(elem) = done {
                match stack.last_mut() {
                    Some(parent) => parent.children.push(Content::Element(elem)),
                    None => return Ok(elem),
                }
            }
        }
    }

    /// Move to the next element of kind `kind` whose open ancestors are
    /// exactly `within`.
    ///
    /// Returns `false` once the innermost element of `within` has been
    /// closed, the cursor being right after its end tag. Siblings of
    /// another kind are skipped without being decoded.
    pub async fn advance_to_next_sibling(
        &mut self,
        kind: ElementKind,
        within: &[ElementKind],
    ) -> Result<bool, ParsingError> {
        loop {
            let depth = self.parents.len();

            // deeper than the requested scope, climb back
            if self.matching_depth(within) < depth {
                self.close().await?;
                continue;
            }

            // a self-closed ancestor has nothing more to offer
            if !self.parent_has_child() {
                self.close().await?;
                return Ok(false);
            }

            let target = match within.get(depth) {
                Some(ancestor) => ancestor,
                None => &kind,
            };
            match self.peek() {
                Token::Start(_) | Token::Empty(_) if self.is_tag(target.ns, target.local) => {
                    if depth == within.len() {
                        return Ok(true);
                    }
                    self.open(target.ns, target.local).await?;
                }
                Token::End(_) if depth > 0 => {
                    self.close().await?;
                    return Ok(false);
                }
                Token::End(_) => return Err(ParsingError::WrongToken),
                Token::Eof if depth == 0 => return Ok(false),
                Token::Eof => return Err(ParsingError::Eof),
                _ => {
                    self.skip().await?;
                }
            }
        }
    }

    /// Decode the next `kind` element under `within`, `recycle` being
    /// overwritten when provided.
    pub async fn pull<N: QRead>(
        &mut self,
        kind: ElementKind,
        recycle: Option<N>,
        within: &[ElementKind],
    ) -> Result<Option<N>, ParsingError> {
        let positioned = self.at(within) && self.is_tag(kind.ns, kind.local);
        if !positioned && !self.advance_to_next_sibling(kind, within).await? {
            return Ok(None);
        }

        match recycle {
            Some(mut target) => {
                target.qread_into(self).await?;
                Ok(Some(target))
            }
            None => N::qread(self).await.map(Some),
        }
    }

    /// Consume every remaining token of the input.
    pub async fn drain(&mut self) -> Result<(), ParsingError> {
        loop {
            match self.peek() {
                Token::Eof => break,
                Token::Start(_) => {
                    self.skip().await?;
                }
                _ => {
                    self.next().await?;
                }
            }
        }
        self.parents.clear();
        Ok(())
    }
}

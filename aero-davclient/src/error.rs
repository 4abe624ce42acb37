use quick_xml::events::attributes::AttrError;

/// Errors raised while walking the XML token stream.
///
/// `Recoverable` is not a failure: it tells the caller that the element at
/// the cursor is not the one it tried to decode, so another decoder can try.
#[derive(Debug)]
pub enum ParsingError {
    Recoverable,
    MissingChild,
    WrongToken,
    TagNotFound,
    InvalidValue,
    UnknownPrefix(String),
    UnsupportedCharset(String),
    InvalidUrl(url::ParseError),
    Utf8Error(std::str::Utf8Error),
    QuickXml(quick_xml::Error),
    Eof,
}
impl std::fmt::Display for ParsingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Recoverable => write!(f, "Recoverable"),
            Self::MissingChild => write!(f, "Missing child"),
            Self::WrongToken => write!(f, "Wrong token"),
            Self::TagNotFound => write!(f, "Tag not found"),
            Self::InvalidValue => write!(f, "Invalid value"),
            Self::UnknownPrefix(p) => write!(f, "Unknown namespace prefix '{}'", p),
            Self::UnsupportedCharset(c) => write!(f, "Unsupported charset '{}'", c),
            Self::InvalidUrl(_) => write!(f, "Invalid href"),
            Self::Utf8Error(_) => write!(f, "Utf8 Error"),
            Self::QuickXml(_) => write!(f, "Quick XML error"),
            Self::Eof => write!(f, "Found EOF while expecting data"),
        }
    }
}
impl std::error::Error for ParsingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidUrl(e) => Some(e),
            Self::Utf8Error(e) => Some(e),
            Self::QuickXml(e) => Some(e),
            _ => None,
        }
    }
}
impl From<AttrError> for ParsingError {
    fn from(value: AttrError) -> Self {
        Self::QuickXml(value.into())
    }
}
impl From<quick_xml::Error> for ParsingError {
    fn from(value: quick_xml::Error) -> Self {
        Self::QuickXml(value)
    }
}
impl From<std::str::Utf8Error> for ParsingError {
    fn from(value: std::str::Utf8Error) -> Self {
        Self::Utf8Error(value)
    }
}
impl From<url::ParseError> for ParsingError {
    fn from(value: url::ParseError) -> Self {
        Self::InvalidUrl(value)
    }
}

/// Misuse of a reader by its caller, as opposed to a bad server response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SequenceError {
    #[error("next_response called without a preceding successful has_next")]
    NextWithoutHasNext,
    #[error("reader used after close")]
    Closed,
    #[error("reader used after a decoding failure")]
    Poisoned,
}

/// Everything that can go wrong while reading a DAV response or writing a
/// DAV request body.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("missing content-type")]
    MissingContentType,
    #[error("invalid content-type '{0}'")]
    UnacceptableContentType(String),
    #[error("response has no body")]
    EmptyBody,
    #[error("can not read response: {0}")]
    MalformedDocument(#[source] ParsingError),
    #[error("can not read {0} element")]
    MissingRootElement(&'static str),
    #[error(transparent)]
    Sequence(#[from] SequenceError),
    #[error("can not serialize to xml")]
    Encoding(#[source] quick_xml::Error),
}
impl ProtocolError {
    /// True when the error comes from calling the API in the wrong order,
    /// not from the data sent by the server.
    pub fn is_usage_error(&self) -> bool {
        matches!(self, Self::Sequence(_))
    }
}
impl From<ParsingError> for ProtocolError {
    fn from(value: ParsingError) -> Self {
        Self::MalformedDocument(value)
    }
}

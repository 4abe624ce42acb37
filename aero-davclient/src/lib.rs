// utils
pub mod error;
pub mod mediatype;
pub mod xml;

// webdav
pub mod types;
pub mod encoder;
pub mod decoder;

// client
pub mod context;
pub mod response;
pub mod multistatus;
pub mod request;

pub use context::DavContext;
pub use error::{ParsingError, ProtocolError, SequenceError};
pub use mediatype::MediaType;
pub use multistatus::MultistatusReader;
pub use request::XmlRequestBody;
pub use response::{ErrorReader, IncomingResponse, XmlResponseReader};

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::ProtocolError;

/// A parsed `Content-Type` value.
///
/// Type, subtype and parameter names are kept lowercase; parameter values
/// are kept as received, without their surrounding quotes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MediaType {
    pub main_type: String,
    pub sub_type: String,
    pub parameters: BTreeMap<String, String>,
}

impl MediaType {
    pub fn new(main_type: &str, sub_type: &str) -> Self {
        Self {
            main_type: main_type.to_ascii_lowercase(),
            sub_type: sub_type.to_ascii_lowercase(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn application_xml() -> Self {
        Self::new("application", "xml")
    }

    pub fn text_xml() -> Self {
        Self::new("text", "xml")
    }

    pub fn with_parameter(mut self, name: &str, value: impl Into<String>) -> Self {
        self.parameters
            .insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn charset(&self) -> Option<&str> {
        self.parameters.get("charset").map(String::as_str)
    }

    /// Type equality ignoring parameters.
    pub fn same_type(&self, other: &MediaType) -> bool {
        self.main_type.eq_ignore_ascii_case(&other.main_type)
            && self.sub_type.eq_ignore_ascii_case(&other.sub_type)
    }
}

impl FromStr for MediaType {
    type Err = mime::FromStrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parsed = s.trim().parse::<mime::Mime>()?;
        let sub_type = match parsed.suffix() {
            Some(suffix) => format!("{}+{}", parsed.subtype(), suffix),
            None => parsed.subtype().to_string(),
        };
        let parameters = parsed
            .params()
            .map(|(name, value)| {
                (
                    name.as_str().to_ascii_lowercase(),
                    value.as_str().trim_matches('"').to_string(),
                )
            })
            .collect();

        Ok(Self {
            main_type: parsed.type_().as_str().to_ascii_lowercase(),
            sub_type: sub_type.to_ascii_lowercase(),
            parameters,
        })
    }
}

impl TryFrom<String> for MediaType {
    type Error = mime::FromStrError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MediaType> for String {
    fn from(value: MediaType) -> Self {
        value.to_string()
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.main_type, self.sub_type)?;
        for (name, value) in self.parameters.iter() {
            write!(f, "; {}={}", name, value)?;
        }
        Ok(())
    }
}

/// How a response without a declared content type is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negotiation {
    /// The type must be declared.
    Strict,
    /// A missing type is read as the first accepted one.
    Lenient,
}

/// Picks the media type and charset used to decode a body.
///
/// A declared type must be one of `accepted` whatever the mode. The
/// charset falls back to UTF-8 when the declared type has none.
pub fn negotiate(
    declared: Option<&MediaType>,
    accepted: &[MediaType],
    mode: Negotiation,
) -> Result<(MediaType, String), ProtocolError> {
    let declared = match (declared, mode) {
        (Some(declared), _) => declared,
        (None, Negotiation::Strict) => return Err(ProtocolError::MissingContentType),
        (None, Negotiation::Lenient) => {
            let chosen = accepted
                .first()
                .ok_or(ProtocolError::MissingContentType)?;
            return Ok((chosen.clone(), "UTF-8".to_string()));
        }
    };

    if !accepted.iter().any(|a| a.same_type(declared)) {
        return Err(ProtocolError::UnacceptableContentType(declared.to_string()));
    }
    let charset = declared.charset().unwrap_or("UTF-8").to_string();
    Ok((declared.clone(), charset))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accepted() -> Vec<MediaType> {
        vec![MediaType::application_xml(), MediaType::text_xml()]
    }

    #[test]
    fn parse_with_quoted_charset() {
        let mt: MediaType = r#"Text/XML; Charset="utf-8""#.parse().unwrap();
        assert_eq!(mt.main_type, "text");
        assert_eq!(mt.sub_type, "xml");
        assert_eq!(mt.charset(), Some("utf-8"));
        assert!(mt.same_type(&MediaType::text_xml()));
    }

    #[test]
    fn parse_structured_suffix() {
        let mt: MediaType = "application/davmount+xml".parse().unwrap();
        assert_eq!(mt.sub_type, "davmount+xml");
        assert!(!mt.same_type(&MediaType::application_xml()));
    }

    #[test]
    fn strict_accepts_listed_types() {
        let declared = MediaType::text_xml().with_parameter("charset", "utf-8");
        let (mt, charset) = negotiate(Some(&declared), &accepted(), Negotiation::Strict).unwrap();
        assert_eq!(mt, declared);
        assert_eq!(charset, "utf-8");

        let declared = MediaType::application_xml();
        let (_, charset) = negotiate(Some(&declared), &accepted(), Negotiation::Strict).unwrap();
        assert_eq!(charset, "UTF-8");
    }

    #[test]
    fn strict_rejects_other_types() {
        let declared: MediaType = "text/html; charset=utf-8".parse().unwrap();
        let err = negotiate(Some(&declared), &accepted(), Negotiation::Strict).unwrap_err();
        match err {
            ProtocolError::UnacceptableContentType(ct) => assert!(ct.starts_with("text/html")),
            other => panic!("unexpected error {:?}", other),
        }

        assert!(matches!(
            negotiate(None, &accepted(), Negotiation::Strict),
            Err(ProtocolError::MissingContentType)
        ));
    }

    #[test]
    fn lenient_only_relaxes_missing_type() {
        let (mt, charset) = negotiate(None, &accepted(), Negotiation::Lenient).unwrap();
        assert_eq!(mt, MediaType::application_xml());
        assert_eq!(charset, "UTF-8");

        let declared: MediaType = "text/xml; charset=us-ascii".parse().unwrap();
        let (mt, charset) = negotiate(Some(&declared), &accepted(), Negotiation::Lenient).unwrap();
        assert_eq!(mt, declared);
        assert_eq!(charset, "us-ascii");

        for other in ["text/plain; charset=us-ascii", "text/html"] {
            let declared: MediaType = other.parse().unwrap();
            assert!(matches!(
                negotiate(Some(&declared), &accepted(), Negotiation::Lenient),
                Err(ProtocolError::UnacceptableContentType(_))
            ));
        }
    }

    #[test]
    fn serde_as_string() {
        #[derive(Deserialize)]
        struct Conf {
            accept: Vec<MediaType>,
        }
        let conf: Conf = toml::from_str(r#"accept = ["application/xml", "text/xml"]"#).unwrap();
        assert_eq!(conf.accept, accepted());
    }
}

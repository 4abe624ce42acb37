use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::mediatype::{MediaType, Negotiation};
use crate::multistatus::MultistatusReader;
use crate::response::{ErrorReader, IncomingResponse};
use crate::xml::IRead;

/// Client-wide settings shared by every reader it creates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DavContext {
    /// Refuse responses whose content type is missing or not accepted.
    pub strict_content_type: bool,
    /// Keep the propstat groups reporting 404 Not Found.
    pub keep_not_found_properties: bool,
    pub accepted_types: Vec<MediaType>,
}

impl Default for DavContext {
    fn default() -> Self {
        Self {
            strict_content_type: true,
            keep_not_found_properties: false,
            accepted_types: vec![MediaType::application_xml(), MediaType::text_xml()],
        }
    }
}

impl DavContext {
    pub fn from_toml(src: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(src)
    }

    pub fn negotiation(&self) -> Negotiation {
        match self.strict_content_type {
            true => Negotiation::Strict,
            false => Negotiation::Lenient,
        }
    }

    pub async fn multistatus_reader<R: IRead>(
        &self,
        resp: IncomingResponse<R>,
    ) -> Result<MultistatusReader<R>, ProtocolError> {
        MultistatusReader::new(resp, self).await
    }

    pub async fn error_reader<R: IRead>(
        &self,
        resp: IncomingResponse<R>,
    ) -> Result<ErrorReader<R>, ProtocolError> {
        ErrorReader::new(resp, self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let ctx = DavContext::default();
        assert!(ctx.strict_content_type);
        assert!(!ctx.keep_not_found_properties);
        assert_eq!(ctx.negotiation(), Negotiation::Strict);
    }

    #[test]
    fn partial_toml() {
        let ctx = DavContext::from_toml("strict_content_type = false").unwrap();
        assert_eq!(ctx.negotiation(), Negotiation::Lenient);
        assert_eq!(ctx.accepted_types, DavContext::default().accepted_types);

        let ctx = DavContext::from_toml(
            r#"
keep_not_found_properties = true
accepted_types = ["application/xml; charset=utf-8"]
"#,
        )
        .unwrap();
        assert!(ctx.strict_content_type);
        assert!(ctx.keep_not_found_properties);
        assert_eq!(ctx.accepted_types.len(), 1);
        assert_eq!(ctx.accepted_types[0].charset(), Some("utf-8"));
    }

    #[test]
    fn invalid_media_type_in_toml() {
        assert!(DavContext::from_toml(r#"accepted_types = ["not a type"]"#).is_err());
    }
}

use quick_xml::events::{BytesDecl, Event};
use tokio::io::AsyncWriteExt;

use crate::error::ProtocolError;
use crate::mediatype::MediaType;
use crate::xml::{IWrite, NamespaceContext, QWrite, Writer};

/// An XML request body, written on demand into the transport's sink.
///
/// The body is serialized again on every `write_to`, so it can be replayed
/// on a retry or after a redirect.
pub struct XmlRequestBody<T: QWrite> {
    namespaces: NamespaceContext,
    root: T,
    prehints: Vec<String>,
}

impl<T: QWrite> XmlRequestBody<T> {
    pub fn new(root: T) -> Self {
        Self::with_namespaces(NamespaceContext::default(), root, vec![])
    }

    /// `prehints` are namespaces declared upfront on the root element,
    /// other namespaces being declared where they are first used.
    pub fn with_namespaces(namespaces: NamespaceContext, root: T, prehints: Vec<String>) -> Self {
        Self {
            namespaces,
            root,
            prehints,
        }
    }

    pub fn content_type(&self) -> MediaType {
        MediaType::application_xml().with_parameter("charset", "utf-8")
    }

    /// Unknown until written.
    pub fn content_length(&self) -> Option<u64> {
        None
    }

    pub async fn write_to<W: IWrite>(&self, sink: W) -> Result<(), ProtocolError> {
        let q = quick_xml::writer::Writer::new_with_indent(sink, b' ', 4);
        let mut writer = Writer::new(q, self.namespaces.clone());
        for ns in self.prehints.iter() {
            writer.use_namespace(ns);
        }

        writer
            .q
            .write_event_async(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
            .await
            .map_err(ProtocolError::Encoding)?;
        self.root
            .qwrite(&mut writer)
            .await
            .map_err(ProtocolError::Encoding)?;

        let mut sink = writer.q.into_inner();
        sink.flush()
            .await
            .map_err(|e| ProtocolError::Encoding(e.into()))?;
        tracing::trace!("request body written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Element, ElementName};
    use crate::xml::{CAL_URN, DAV_URN};

    fn propfind() -> Element {
        Element::dav("propfind").with_child(
            Element::dav("prop")
                .with_child(Element::dav("getetag"))
                .with_child(Element::new(ElementName::new(CAL_URN, "calendar-data"))),
        )
    }

    #[tokio::test]
    async fn propfind_body() {
        let body = XmlRequestBody::with_namespaces(
            NamespaceContext::default(),
            propfind(),
            vec![DAV_URN.into(), CAL_URN.into()],
        );
        assert_eq!(body.content_type().to_string(), "application/xml; charset=utf-8");
        assert_eq!(body.content_length(), None);

        let mut out = Vec::new();
        body.write_to(&mut out).await.unwrap();
        let expected = r#"<?xml version="1.0" encoding="utf-8"?>
<D:propfind xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav">
    <D:prop>
        <D:getetag/>
        <C:calendar-data/>
    </D:prop>
</D:propfind>"#;
        assert_eq!(std::str::from_utf8(&out).unwrap(), expected);
    }

    #[tokio::test]
    async fn written_twice_identically() {
        let body = XmlRequestBody::new(propfind());
        let (mut first, mut second) = (Vec::new(), Vec::new());
        body.write_to(&mut first).await.unwrap();
        body.write_to(&mut second).await.unwrap();
        assert_eq!(first, second);
        assert!(std::str::from_utf8(&first)
            .unwrap()
            .contains(r#"<C:calendar-data xmlns:C="urn:ietf:params:xml:ns:caldav"/>"#));
    }
}

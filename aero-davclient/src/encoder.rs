use quick_xml::events::{BytesEnd, BytesText, Event};
use quick_xml::Error as QError;

use super::types::*;
use super::xml::{IWrite, QWrite, Writer};

impl QWrite for Href {
    async fn qwrite(&self, xml: &mut Writer<impl IWrite>) -> Result<(), QError> {
        let start = xml.create_dav_element("href");
        let end = start.to_end().into_owned();

        xml.open(start).await?;
        xml.q
            .write_event_async(Event::Text(BytesText::new(&self.0)))
            .await?;
        xml.close(end).await
    }
}

/// Elements are written depth first without recursion, an explicit stack
/// holding the children left to write for every open element.
impl QWrite for Element {
    async fn qwrite(&self, xml: &mut Writer<impl IWrite>) -> Result<(), QError> {
        let mut pending = vec![];
        match start_element(self, xml).await? {
            Some(end) => pending.push((self.children.iter(), end)),
            None => return Ok(()),
        }

        while let Some((children, _)) = pending.last_mut() {
            match children.next() {
                Some(Content::Text(txt)) => {
                    xml.q
                        .write_event_async(Event::Text(BytesText::new(txt)))
                        .await?
                }
                Some(Content::Element(child)) => {
                    if let Some(end) = start_element(child, xml).await? {
                        pending.push((child.children.iter(), end));
                    }
                }
                None => {
                    if let Some((_, end)) = pending.pop() {
                        xml.close(end).await?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Writes the start tag, or the whole element when it has no children.
async fn start_element(
    elem: &Element,
    xml: &mut Writer<impl IWrite>,
) -> Result<Option<BytesEnd<'static>>, QError> {
    let start = xml.create_element(&elem.name, &elem.attributes);
    if elem.children.is_empty() {
        xml.empty(start).await?;
        return Ok(None);
    }

    let end = start.to_end().into_owned();
    xml.open(start).await?;
    Ok(Some(end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::{NamespaceContext, QRead, QuickXml, Reader, CAL_URN, DAV_URN};
    use tokio::io::AsyncWriteExt;

    async fn serialize(elem: &impl QWrite, ctx: NamespaceContext, hints: &[&str]) -> String {
        let mut buffer = Vec::new();
        let mut tokio_buffer = tokio::io::BufWriter::new(&mut buffer);
        let q = quick_xml::writer::Writer::new(&mut tokio_buffer);
        let mut writer = Writer::new(q, ctx);
        for ns in hints {
            writer.use_namespace(ns);
        }

        elem.qwrite(&mut writer).await.expect("xml serialization");
        tokio_buffer.flush().await.expect("tokio buffer flush");
        std::str::from_utf8(buffer.as_slice()).unwrap().into()
    }

    fn calendar_multiget() -> Element {
        Element::new(ElementName::new(CAL_URN, "calendar-multiget"))
            .with_child(
                Element::dav("prop")
                    .with_child(Element::dav("getetag"))
                    .with_child(Element::new(ElementName::new(CAL_URN, "calendar-data"))),
            )
            .with_child(Element::dav("href").with_text("/cal/a.ics"))
            .with_child(Element::dav("href").with_text("/cal/b & c.ics"))
    }

    #[tokio::test]
    async fn namespaces_declared_inline() {
        let got = serialize(&calendar_multiget(), NamespaceContext::default(), &[]).await;
        let expected = r#"<C:calendar-multiget xmlns:C="urn:ietf:params:xml:ns:caldav"><D:prop xmlns:D="DAV:"><D:getetag/><C:calendar-data/></D:prop><D:href xmlns:D="DAV:">/cal/a.ics</D:href><D:href xmlns:D="DAV:">/cal/b &amp; c.ics</D:href></C:calendar-multiget>"#;
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn namespaces_declared_on_root_with_hints() {
        let got = serialize(
            &calendar_multiget(),
            NamespaceContext::default(),
            &[DAV_URN, CAL_URN],
        )
        .await;
        let expected = r#"<C:calendar-multiget xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav"><D:prop><D:getetag/><C:calendar-data/></D:prop><D:href>/cal/a.ics</D:href><D:href>/cal/b &amp; c.ics</D:href></C:calendar-multiget>"#;
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn unknown_namespaces_get_generated_prefixes() {
        let elem = Element::dav("prop")
            .with_child(Element::new(ElementName::new("urn:x", "a")))
            .with_child(
                Element::new(ElementName::new("urn:y", "b"))
                    .with_attribute(ElementName::unqualified("kind"), "plain"),
            );
        let got = serialize(&elem, NamespaceContext::empty(), &[]).await;
        let expected = r#"<ns0:prop xmlns:ns0="DAV:"><ns1:a xmlns:ns1="urn:x"/><ns2:b xmlns:ns2="urn:y" kind="plain"/></ns0:prop>"#;
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn element_read_back() {
        let src = calendar_multiget();
        let got = serialize(&src, NamespaceContext::default(), &[]).await;

        let mut rdr = Reader::new(QuickXml::from_reader(got.as_bytes()))
            .await
            .unwrap();
        let res = Element::qread(&mut rdr).await.unwrap();
        assert_eq!(src, res);
    }

    #[tokio::test]
    async fn href() {
        let got = serialize(&Href("/a b".into()), NamespaceContext::default(), &[DAV_URN]).await;
        assert_eq!(got, r#"<D:href xmlns:D="DAV:">/a b</D:href>"#);
    }
}

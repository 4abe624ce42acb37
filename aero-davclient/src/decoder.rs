use super::error::ParsingError;
use super::types::*;
use super::xml::{QRead, Reader, Token, Tokenizer, DAV_URN};

// ---- ROOT ----

/// Generic response
impl QRead for Multistatus {
    async fn qread(xml: &mut Reader<impl Tokenizer>) -> Result<Self, ParsingError> {
        xml.open(DAV_URN, "multistatus").await?;
        Multistatus::default().qread_children(xml).await
    }
}
impl Multistatus {
    /// Reads what is left of an already opened multistatus element, appending
    /// to `self`, then closes it.
    pub async fn qread_children(
        mut self,
        xml: &mut Reader<impl Tokenizer>,
    ) -> Result<Self, ParsingError> {
        if xml.parent_has_child() {
            loop {
                let mut dirty = false;
                xml.maybe_push(&mut self.responses, &mut dirty).await?;
                xml.maybe_read(&mut self.responsedescription, &mut dirty)
                    .await?;
                xml.maybe_read(&mut self.sync_token, &mut dirty).await?;
                if !dirty {
                    match xml.peek() {
                        Token::End(_) => break,
                        _ => xml.skip().await?,
                    };
                }
            }
        }

        xml.close().await?;
        Ok(self)
    }
}

/// Error response
impl QRead for Error {
    async fn qread(xml: &mut Reader<impl Tokenizer>) -> Result<Self, ParsingError> {
        xml.open(DAV_URN, "error").await?;
        let conditions = xml.collect::<Element>().await?;
        xml.close().await?;
        Ok(Error(conditions))
    }
}

// ---- INNER XML

impl QRead for Response {
    async fn qread(xml: &mut Reader<impl Tokenizer>) -> Result<Self, ParsingError> {
        read_response(xml, Vec::new(), Vec::new()).await
    }

    async fn qread_into(&mut self, xml: &mut Reader<impl Tokenizer>) -> Result<(), ParsingError> {
        let (href, propstat) = match &mut self.status_or_propstat {
            StatusOrPropstat::Status(href, _) => (std::mem::take(href), Vec::new()),
            StatusOrPropstat::PropStat(_, propstat) => (Vec::new(), std::mem::take(propstat)),
        };
        *self = read_response(xml, href, propstat).await?;
        Ok(())
    }
}

async fn read_response(
    xml: &mut Reader<impl Tokenizer>,
    mut href: Vec<Href>,
    mut propstat: Vec<PropStat>,
) -> Result<Response, ParsingError> {
    href.clear();
    propstat.clear();

    xml.open(DAV_URN, "response").await?;
    let (mut status, mut error, mut responsedescription, mut location) =
        (None, None, None, None);

    loop {
        let mut dirty = false;
        xml.maybe_read::<Status>(&mut status, &mut dirty).await?;
        xml.maybe_push::<Href>(&mut href, &mut dirty).await?;
        xml.maybe_push::<PropStat>(&mut propstat, &mut dirty)
            .await?;
        xml.maybe_read::<Error>(&mut error, &mut dirty).await?;
        xml.maybe_read::<ResponseDescription>(&mut responsedescription, &mut dirty)
            .await?;
        xml.maybe_read::<Location>(&mut location, &mut dirty)
            .await?;

        if !dirty {
            match xml.peek() {
                Token::End(_) => break,
                _ => xml.skip().await?,
            };
        }
    }

    xml.close().await?;
    match (status, &propstat[..], &href[..]) {
        (Some(status), &[], &[_, ..]) => Ok(Response {
            status_or_propstat: StatusOrPropstat::Status(href, status),
            error,
            responsedescription,
            location,
        }),
        (None, &[_, ..], &[_, ..]) => Ok(Response {
            status_or_propstat: StatusOrPropstat::PropStat(
                href.into_iter().next().ok_or(ParsingError::MissingChild)?,
                propstat,
            ),
            error,
            responsedescription,
            location,
        }),
        (Some(_), &[_, ..], _) => Err(ParsingError::InvalidValue),
        _ => Err(ParsingError::MissingChild),
    }
}

impl QRead for PropStat {
    async fn qread(xml: &mut Reader<impl Tokenizer>) -> Result<Self, ParsingError> {
        xml.open(DAV_URN, "propstat").await?;

        let (mut m_prop, mut m_status, mut error, mut responsedescription) =
            (None, None, None, None);

        loop {
            let mut dirty = false;
            xml.maybe_read::<PropValue>(&mut m_prop, &mut dirty)
                .await?;
            xml.maybe_read::<Status>(&mut m_status, &mut dirty).await?;
            xml.maybe_read::<Error>(&mut error, &mut dirty).await?;
            xml.maybe_read::<ResponseDescription>(&mut responsedescription, &mut dirty)
                .await?;

            if !dirty {
                match xml.peek() {
                    Token::End(_) => break,
                    _ => xml.skip().await?,
                };
            }
        }

        xml.close().await?;
        match (m_prop, m_status) {
            (Some(prop), Some(status)) => Ok(PropStat {
                prop,
                status,
                error,
                responsedescription,
            }),
            _ => Err(ParsingError::MissingChild),
        }
    }
}

impl QRead for PropValue {
    async fn qread(xml: &mut Reader<impl Tokenizer>) -> Result<Self, ParsingError> {
        xml.open(DAV_URN, "prop").await?;
        let acc = xml.collect::<Element>().await?;
        xml.close().await?;
        Ok(PropValue(acc))
    }
}

impl QRead for Status {
    async fn qread(xml: &mut Reader<impl Tokenizer>) -> Result<Self, ParsingError> {
        xml.open(DAV_URN, "status").await?;
        let fullcode = xml.tag_string().await?;
        let txtcode = fullcode
            .trim()
            .splitn(3, ' ')
            .nth(1)
            .ok_or(ParsingError::InvalidValue)?;
        let code = http::status::StatusCode::from_bytes(txtcode.as_bytes())
            .or(Err(ParsingError::InvalidValue))?;
        xml.close().await?;
        Ok(Status(code))
    }
}

impl QRead for ResponseDescription {
    async fn qread(xml: &mut Reader<impl Tokenizer>) -> Result<Self, ParsingError> {
        xml.open(DAV_URN, "responsedescription").await?;
        let cnt = xml.tag_string().await?;
        xml.close().await?;
        Ok(ResponseDescription(cnt))
    }
}

impl QRead for Location {
    async fn qread(xml: &mut Reader<impl Tokenizer>) -> Result<Self, ParsingError> {
        xml.open(DAV_URN, "location").await?;
        let href = xml.find::<Href>().await?;
        xml.close().await?;
        Ok(Location(href))
    }
}

impl QRead for Href {
    async fn qread(xml: &mut Reader<impl Tokenizer>) -> Result<Self, ParsingError> {
        xml.open(DAV_URN, "href").await?;
        let url = xml.tag_string().await?;
        xml.close().await?;
        Ok(Href(url.trim().to_string()))
    }
}

impl QRead for SyncToken {
    async fn qread(xml: &mut Reader<impl Tokenizer>) -> Result<Self, ParsingError> {
        xml.open(DAV_URN, "sync-token").await?;
        let token = xml.tag_string().await?;
        xml.close().await?;
        Ok(SyncToken(token.trim().to_string()))
    }
}

/// Any element, used for properties and precondition codes
impl QRead for Element {
    async fn qread(xml: &mut Reader<impl Tokenizer>) -> Result<Self, ParsingError> {
        match xml.peek() {
            Token::Start(_) | Token::Empty(_) => xml.element().await,
            _ => Err(ParsingError::Recoverable),
        }
    }
}

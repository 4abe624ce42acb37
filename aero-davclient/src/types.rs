use std::collections::BTreeMap;

use http::StatusCode;
use url::Url;

use super::xml::{ElementKind, DAV_URN};

// ---- Generic XML nodes ----

/// A namespace-resolved element or attribute name.
///
/// `ns` is `None` for names outside any namespace.
#[derive(Debug, PartialEq, Eq, Clone, Hash, PartialOrd, Ord)]
pub struct ElementName {
    pub ns: Option<String>,
    pub local: String,
}
impl ElementName {
    pub fn new(ns: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            ns: Some(ns.into()),
            local: local.into(),
        }
    }

    pub fn dav(local: impl Into<String>) -> Self {
        Self::new(DAV_URN, local)
    }

    pub fn unqualified(local: impl Into<String>) -> Self {
        Self {
            ns: None,
            local: local.into(),
        }
    }

    pub fn is(&self, ns: &str, local: &str) -> bool {
        self.local == local && self.ns.as_deref() == Some(ns)
    }

    pub fn is_kind(&self, kind: &ElementKind) -> bool {
        self.is(kind.ns, kind.local)
    }
}
impl std::fmt::Display for ElementName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.ns {
            Some(ns) => write!(f, "{{{}}}{}", ns, self.local),
            None => write!(f, "{}", self.local),
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct Attribute {
    pub name: ElementName,
    pub value: String,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Content {
    Element(Element),
    Text(String),
}

/// Any XML element, kept as a tree.
///
/// Properties and precondition codes are not interpreted by this crate:
/// they are handed to the caller as they were received.
#[derive(Debug, PartialEq, Clone)]
pub struct Element {
    pub name: ElementName,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Content>,
}
impl Element {
    pub fn new(name: ElementName) -> Self {
        Self {
            name,
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn dav(local: impl Into<String>) -> Self {
        Self::new(ElementName::dav(local))
    }

    pub fn with_attribute(mut self, name: ElementName, value: impl Into<String>) -> Self {
        self.attributes.push(Attribute {
            name,
            value: value.into(),
        });
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(Content::Element(child));
        self
    }

    pub fn with_text(mut self, txt: impl Into<String>) -> Self {
        self.children.push(Content::Text(txt.into()));
        self
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|c| match c {
            Content::Element(e) => Some(e),
            Content::Text(_) => None,
        })
    }

    pub fn child(&self, ns: &str, local: &str) -> Option<&Element> {
        self.elements().find(|e| e.name.is(ns, local))
    }

    /// Concatenated text of the direct children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|c| match c {
                Content::Text(t) => Some(t.as_str()),
                Content::Element(_) => None,
            })
            .collect()
    }
}

// ---- RFC 4918 ----

/// 14.5 error XML Element
///
/// Name:   error
///
/// Purpose:   Error responses, particularly 403 Forbidden and 409
///   Conflict, sometimes need more information to indicate what went
///  wrong.  In these cases, servers MAY return an XML response body
///   with a document element of 'error', containing child elements
///   identifying particular condition codes.
///
/// Description:   Contains at least one XML element, and MUST NOT
///  contain text or mixed content.  Any element that is a child of the
///   'error' element is considered to be a precondition or
///   postcondition code.  Unrecognized elements MUST be ignored.
///
/// <!ELEMENT error ANY >
#[derive(Debug, PartialEq, Clone, Default)]
pub struct Error(pub Vec<Element>);

/// 14.7.  href XML Element
///
/// Name:   href
///
/// Purpose:   MUST contain a URI or a relative reference.
///
/// Description:   There may be limits on the value of 'href' depending
///  on the context of its use.  Refer to the specification text where
///   'href' is used to see what limitations apply in each case.
///
/// Value:   Simple-ref
///
/// <!ELEMENT href (#PCDATA)>
#[derive(Debug, PartialEq, Clone)]
pub struct Href(pub String);
impl Href {
    /// Replaces a possibly relative reference by its absolute form,
    /// following RFC 3986 section 5.2.
    pub fn resolve(&mut self, base: &Url) -> Result<(), url::ParseError> {
        let absolute = base.join(self.0.trim())?;
        self.0 = absolute.into();
        Ok(())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

/// 14.9.  location XML Element
///
/// Name:   location
///
/// Purpose:   HTTP defines the "Location" header (see [RFC2616], Section
///   14.30) for use with some status codes (such as 201 and the 300
///   series codes).  When these codes are used inside a 'multistatus'
///   element, the 'location' element can be used to provide the
///   accompanying Location header value.
///
/// <!ELEMENT location (href)>
#[derive(Debug, PartialEq, Clone)]
pub struct Location(pub Href);

/// 14.16.  multistatus XML Element
///
/// Name:   multistatus
///
/// Purpose:   Contains multiple response messages.
///
/// Description:   The 'responsedescription' element at the top level is
///   used to provide a general message describing the overarching
///   nature of the response.  If this value is available, an
///   application may use it instead of presenting the individual
///   response descriptions contained within the responses.
///
/// <!ELEMENT multistatus (response*, responsedescription?)  >
///
/// RFC 6578 adds a trailing `sync-token` child.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct Multistatus {
    pub responses: Vec<Response>,
    pub responsedescription: Option<ResponseDescription>,
    pub sync_token: Option<SyncToken>,
}

/// 14.18.  prop XML Element
///
/// Name:   prop
///
/// Purpose:   Contains properties related to a resource.
///
/// Description:   A generic container for properties defined on
///   resources.  All elements inside a 'prop' XML element MUST define
///   properties related to the resource, although possible property
///   names are in no way limited to those property names defined in
///   this document or other standards.  This element MUST NOT contain
///   text or mixed content.
///
/// <!ELEMENT prop ANY >
#[derive(Debug, PartialEq, Clone, Default)]
pub struct PropValue(pub Vec<Element>);

/// 14.22 propstat XML Element
///
/// Name:   propstat
///
/// Purpose:   Groups together a prop and status element that is
///   associated with a particular 'href' element.
///
/// Description:   The propstat XML element MUST contain one prop XML
///   element and one status XML element.  The contents of the prop XML
///   element MUST only list the names of properties to which the result
///   in the status element applies.  The optional precondition/
///   postcondition element and 'responsedescription' text also apply to
///   the properties named in 'prop'.
///
/// <!ELEMENT propstat (prop, status, error?, responsedescription?) >
#[derive(Debug, PartialEq, Clone)]
pub struct PropStat {
    pub prop: PropValue,
    pub status: Status,
    pub error: Option<Error>,
    pub responsedescription: Option<ResponseDescription>,
}

/// 14.24.  response XML Element
///
/// Name:   response
///
/// Purpose:   Holds a single response describing the effect of a
///   method on resource and/or its properties.
///
/// Description:   The 'href' element contains an HTTP URL pointing to a
///   WebDAV resource when used in the 'response' container.  A
///   particular 'href' value MUST NOT appear more than once as the
///   child of a 'response' XML element under a 'multistatus' XML
///   element.  This requirement is necessary in order to keep
///   processing costs for a response to linear time.
///
/// <!ELEMENT response (href, ((href*, status)|(propstat+)),
///                     error?, responsedescription? , location?) >
#[derive(Debug, PartialEq, Clone)]
pub struct Response {
    pub status_or_propstat: StatusOrPropstat,
    pub error: Option<Error>,
    pub responsedescription: Option<ResponseDescription>,
    pub location: Option<Location>,
}
#[derive(Debug, PartialEq, Clone)]
pub enum StatusOrPropstat {
    Status(Vec<Href>, Status),
    PropStat(Href, Vec<PropStat>),
}
impl Response {
    /// The resource this entry describes.
    pub fn href(&self) -> Option<&Href> {
        match &self.status_or_propstat {
            StatusOrPropstat::Status(hrefs, _) => hrefs.first(),
            StatusOrPropstat::PropStat(href, _) => Some(href),
        }
    }

    /// The status of the whole entry, when it is not split per property.
    pub fn status(&self) -> Option<StatusCode> {
        match &self.status_or_propstat {
            StatusOrPropstat::Status(_, Status(code)) => Some(*code),
            StatusOrPropstat::PropStat(..) => None,
        }
    }

    pub fn propstats(&self) -> &[PropStat] {
        match &self.status_or_propstat {
            StatusOrPropstat::PropStat(_, propstats) => propstats.as_slice(),
            StatusOrPropstat::Status(..) => &[],
        }
    }

    pub fn properties_by_status(&self) -> BTreeMap<StatusCode, Vec<&Element>> {
        let mut acc: BTreeMap<StatusCode, Vec<&Element>> = BTreeMap::new();
        for propstat in self.propstats() {
            acc.entry(propstat.status.0)
                .or_default()
                .extend(propstat.prop.0.iter());
        }
        acc
    }

    /// Resolves every reference carried by this entry against `base`.
    pub fn resolve_hrefs(&mut self, base: &Url) -> Result<(), url::ParseError> {
        match &mut self.status_or_propstat {
            StatusOrPropstat::Status(hrefs, _) => {
                for href in hrefs.iter_mut() {
                    href.resolve(base)?;
                }
            }
            StatusOrPropstat::PropStat(href, _) => href.resolve(base)?,
        }
        if let Some(Location(href)) = &mut self.location {
            href.resolve(base)?;
        }
        Ok(())
    }

    /// Drops the propstat groups reporting 404 Not Found.
    pub fn retain_found(&mut self) {
        if let StatusOrPropstat::PropStat(_, propstats) = &mut self.status_or_propstat {
            propstats.retain(|p| p.status.0 != StatusCode::NOT_FOUND);
        }
    }
}

/// 14.25.  responsedescription XML Element
///
/// Name:   responsedescription
///
/// Purpose:   Contains information about a status response within a
///   Multi-Status.
///
/// <!ELEMENT responsedescription (#PCDATA) >
#[derive(Debug, PartialEq, Clone)]
pub struct ResponseDescription(pub String);

/// 14.28.  status XML Element
///
/// Name:   status
///
/// Purpose:   Holds a single HTTP status-line.
///
/// Value:   status-line (defined in Section 6.1 of [RFC2616])
///
/// <!ELEMENT status (#PCDATA) >
#[derive(Debug, PartialEq, Clone)]
pub struct Status(pub StatusCode);

// ---- RFC 6578 ----

/// Name:  sync-token
///
/// Namespace:  DAV:
///
/// Purpose:  The synchronization token provided by the server and
/// returned by the client.
///
/// <!ELEMENT sync-token CDATA>
///
/// Used by multistatus
#[derive(Debug, PartialEq, Clone)]
pub struct SyncToken(pub String);

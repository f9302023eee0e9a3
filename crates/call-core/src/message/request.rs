use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::headers::{CSeq, CallId, NameAddr, Uri, Via};
use super::method::Method;
use super::status::StatusCode;

/// Message body together with its Content-Type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Body {
    pub content_type: String,
    pub content: Bytes,
}

impl Body {
    pub fn new(content_type: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            content_type: content_type.into(),
            content: content.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }
}

/// Everything the transport stack needs to build a new out-of-dialog request
#[derive(Debug, Clone)]
pub struct RequestParams {
    pub method: Method,
    pub request_uri: Uri,
    pub call_id: CallId,
    pub cseq: CSeq,
    pub from: NameAddr,
    pub to: NameAddr,
    pub via: Vec<Via>,
    pub max_forwards: u8,
    pub contact: Option<Uri>,
    pub body: Option<Body>,
}

/// A SIP request. Immutable once built by the transport stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub method: Method,
    pub uri: Uri,
    pub call_id: CallId,
    pub cseq: CSeq,
    pub from: NameAddr,
    pub to: NameAddr,
    pub via: Vec<Via>,
    pub max_forwards: u8,
    pub contact: Option<Uri>,
    pub body: Option<Body>,
}

impl Request {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    /// Branch parameter of the top-most Via
    pub fn top_branch(&self) -> Option<&str> {
        self.via.first().and_then(|via| via.branch.as_deref())
    }
}

impl From<RequestParams> for Request {
    fn from(params: RequestParams) -> Self {
        Self {
            method: params.method,
            uri: params.request_uri,
            call_id: params.call_id,
            cseq: params.cseq,
            from: params.from,
            to: params.to,
            via: params.via,
            max_forwards: params.max_forwards,
            contact: params.contact,
            body: params.body,
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {} SIP/2.0", self.method, self.uri)?;
        for via in &self.via {
            writeln!(f, "Via: {}", via)?;
        }
        writeln!(f, "Max-Forwards: {}", self.max_forwards)?;
        writeln!(f, "From: {}", self.from)?;
        writeln!(f, "To: {}", self.to)?;
        writeln!(f, "Call-ID: {}", self.call_id)?;
        writeln!(f, "CSeq: {}", self.cseq)?;
        if let Some(contact) = &self.contact {
            writeln!(f, "Contact: <{}>", contact)?;
        }
        write_body(f, self.body.as_ref())
    }
}

/// A SIP response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: StatusCode,
    pub call_id: CallId,
    pub cseq: CSeq,
    pub from: NameAddr,
    pub to: NameAddr,
    pub via: Vec<Via>,
    pub contact: Option<Uri>,
    pub body: Option<Body>,
}

impl Response {
    /// Response skeleton echoing the dialog-identifying headers of `request`
    /// (RFC 3261 8.2.6.2)
    pub fn from_request(status: StatusCode, request: &Request) -> Self {
        Self {
            status,
            call_id: request.call_id.clone(),
            cseq: request.cseq.clone(),
            from: request.from.clone(),
            to: request.to.clone(),
            via: request.via.clone(),
            contact: None,
            body: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    pub fn top_branch(&self) -> Option<&str> {
        self.via.first().and_then(|via| via.branch.as_deref())
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_contact(mut self, contact: Uri) -> Self {
        self.contact = Some(contact);
        self
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "SIP/2.0 {}", self.status)?;
        for via in &self.via {
            writeln!(f, "Via: {}", via)?;
        }
        writeln!(f, "From: {}", self.from)?;
        writeln!(f, "To: {}", self.to)?;
        writeln!(f, "Call-ID: {}", self.call_id)?;
        writeln!(f, "CSeq: {}", self.cseq)?;
        if let Some(contact) = &self.contact {
            writeln!(f, "Contact: <{}>", contact)?;
        }
        write_body(f, self.body.as_ref())
    }
}

fn write_body(f: &mut fmt::Formatter<'_>, body: Option<&Body>) -> fmt::Result {
    match body {
        Some(body) => {
            writeln!(f, "Content-Type: {}", body.content_type)?;
            writeln!(f, "Content-Length: {}", body.len())?;
            writeln!(f)?;
            f.write_str(&String::from_utf8_lossy(&body.content))
        }
        None => writeln!(f, "Content-Length: 0"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::headers::{Tag, TransportProtocol};

    fn invite() -> Request {
        Request {
            method: Method::Invite,
            uri: Uri::new(Some("bob".into()), "10.0.0.2", Some(5060)),
            call_id: CallId::new("call-1"),
            cseq: CSeq::new(1, Method::Invite),
            from: NameAddr::new(Uri::new(Some("alice".into()), "10.0.0.1", Some(5070)))
                .with_tag(Tag::new("from-tag")),
            to: NameAddr::new(Uri::new(Some("bob".into()), "10.0.0.2", Some(5060))),
            via: vec![Via::new(TransportProtocol::Udp, "10.0.0.1", 5070).with_branch("z9hG4bKabc")],
            max_forwards: 70,
            contact: None,
            body: None,
        }
    }

    #[test]
    fn test_response_echoes_request_headers() {
        let request = invite();
        let response = Response::from_request(StatusCode::Ringing, &request);
        assert_eq!(response.call_id, request.call_id);
        assert_eq!(response.cseq, request.cseq);
        assert_eq!(response.from, request.from);
        assert_eq!(response.top_branch(), Some("z9hG4bKabc"));
        assert!(response.body.is_none());
    }

    #[test]
    fn test_request_display_has_start_line_and_length() {
        let text = invite().to_string();
        assert!(text.starts_with("INVITE sip:bob@10.0.0.2:5060 SIP/2.0"));
        assert!(text.contains("CSeq: 1 INVITE"));
        assert!(text.contains("Content-Length: 0"));
    }
}

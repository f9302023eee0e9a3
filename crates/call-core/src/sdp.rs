//! Static session description offered in INVITEs and answered in 200 OK

use bytes::Bytes;

use crate::message::Body;

/// Content-Type of the session description body
pub const SDP_CONTENT_TYPE: &str = "application/sdp";

/// One audio stream, AMR narrowband in octet-aligned mode
pub const SESSION_DESCRIPTION: &str = "v=0\r\n\
o=rvoip 1906 3217 IN IP4 127.0.0.1\r\n\
s=Talk\r\n\
c=IN IP4 127.0.0.1\r\n\
t=0 0\r\n\
m=audio 7078 RTP/AVP 96\r\n\
a=rtpmap:96 AMR/8000\r\n\
a=fmtp:96 octet-align=1\r\n";

/// Body carrying [`SESSION_DESCRIPTION`]
pub fn session_body() -> Body {
    Body::new(SDP_CONTENT_TYPE, Bytes::from_static(SESSION_DESCRIPTION.as_bytes()))
}

//! ABAP Development Tools (ADT) REST plumbing.
//!
//! - **http**: request/response types and the [`HttpExchange`] seam
//! - **session**: basic auth, `sap-client`, CSRF token lifecycle
//! - **xml**: `asx:abap` payload builder and response tree
//!
//! Everything above this module talks to the server through
//! [`AdtSession`]; nothing else touches the wire.

pub mod http;
pub mod session;
pub mod xml;

pub use http::{HttpExchange, HttpRequest, HttpResponse, ReqwestExchange};
pub use session::{AdtSession, CSRF_FETCH_PATH};
pub use xml::XmlElement;

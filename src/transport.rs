//! CTS transport lookup and creation.
//!
//! Three remote operations back the resolution policies:
//!
//! | operation                        | endpoint                                   |
//! |----------------------------------|--------------------------------------------|
//! | [`create_transport`]             | `POST /sap/bc/adt/cts/transports`          |
//! | [`check_existing_transport`]     | `POST /sap/bc/adt/cts/transportchecks`     |
//! | [`determine_existing_transport`] | `GET /sap/bc/adt/cts/transports?_action=FIND` |
//!
//! [`TransportResolver::resolve`] picks between them according to the active
//! [`TransportPolicy`].
//!
//! [`create_transport`]: TransportResolver::create_transport
//! [`check_existing_transport`]: TransportResolver::check_existing_transport
//! [`determine_existing_transport`]: TransportResolver::determine_existing_transport

use tracing::{debug, info};

use crate::adt::session::remote_error;
use crate::adt::xml::{XmlElement, abap_values_document};
use crate::adt::{AdtSession, HttpExchange, HttpRequest};
use crate::error::{AdtError, TransportError};
use crate::filestore::OBJECTS_PATH;
use crate::model::{ContainerTarget, TransportOptions, TransportPolicy, TransportRef};

pub const TRANSPORTS_PATH: &str = "/sap/bc/adt/cts/transports";
pub const TRANSPORT_CHECKS_PATH: &str = "/sap/bc/adt/cts/transportchecks";

/// `RESULT` value of a transport check that completed.
const CHECK_SUCCESS: &str = "S";
/// Workbench request function class.
const WORKBENCH_FUNCTION: &str = "K";

/// Outcome of a lock check.
///
/// `successful == false` means the check itself did not complete; a completed
/// check with no lock has `successful == true` and no transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportCheck {
    pub transport_no: Option<TransportRef>,
    pub successful: bool,
}

/// Runs transport operations over a borrowed session.
pub struct TransportResolver<'a, E> {
    session: &'a AdtSession<E>,
}

impl<'a, E: HttpExchange> TransportResolver<'a, E> {
    pub fn new(session: &'a AdtSession<E>) -> Self {
        Self { session }
    }

    /// Create a workbench request and return its number.
    pub async fn create_transport(
        &self,
        package: &str,
        text: &str,
    ) -> Result<TransportRef, AdtError> {
        let payload = abap_values_document(&[
            ("OPERATION", "I"),
            ("DEVCLASS", package),
            ("REQUEST_TEXT", text),
        ])?;
        let request = HttpRequest::post(TRANSPORTS_PATH)
            .header("Accept", "*/*")
            .header("Content-Type", "application/xml")
            .body(payload);

        let response = self.session.send(request).await?;
        if response.status != 200 {
            return Err(remote_error("POST", TRANSPORTS_PATH, &response));
        }

        let body = response.text();
        let id = body.trim().rsplit('/').next().unwrap_or_default().trim();
        if id.is_empty() {
            return Err(AdtError::protocol(
                TRANSPORTS_PATH,
                "creation response carried no transport number",
            ));
        }

        info!(transport = id, package, "created transport");
        Ok(TransportRef::new(id))
    }

    /// Ask whether the container's objects are already locked in a transport.
    pub async fn check_existing_transport(
        &self,
        package: &str,
        container: &str,
    ) -> Result<TransportCheck, AdtError> {
        let uri = format!("{OBJECTS_PATH}/{}/$new", urlencoding::encode(container));
        let payload = abap_values_document(&[
            ("PGMID", ""),
            ("OBJECT", ""),
            ("OBJECTNAME", ""),
            ("DEVCLASS", package),
            ("OPERATION", ""),
            ("URI", uri.as_str()),
        ])?;
        debug!(uri = %uri, "checking transport lock");

        let request = HttpRequest::post(TRANSPORT_CHECKS_PATH)
            .header("Content-Type", "application/xml")
            .header("Accept", "application/xml")
            .body(payload);
        let response = self.session.send(request).await?;
        if response.status != 200 {
            return Err(remote_error("POST", TRANSPORT_CHECKS_PATH, &response));
        }

        let check = parse_transport_check(&response.text())?;
        if check.successful {
            match &check.transport_no {
                Some(tr) => debug!(transport = %tr, "objects are locked in transport"),
                None => debug!("no transport lock found for objects"),
            }
        }
        Ok(check)
    }

    /// Find an open workbench request whose description matches `text`.
    pub async fn determine_existing_transport(
        &self,
        text: &str,
    ) -> Result<Option<TransportRef>, AdtError> {
        let request = HttpRequest::get(TRANSPORTS_PATH)
            .query("_action", "FIND")
            .query("trfunction", WORKBENCH_FUNCTION)
            .query("requestText", text)
            .header("Accept", "*/*");
        let response = self.session.send(request).await?;
        if response.status != 200 {
            return Err(remote_error("GET", TRANSPORTS_PATH, &response));
        }

        let found = parse_transport_search(&response.text(), text)?;
        debug!(found = ?found, "transport search finished");
        Ok(found)
    }

    /// Run the decision procedure for `options`.
    ///
    /// Returns `None` only for [`TransportPolicy::NoneRequired`].
    pub async fn resolve(
        &self,
        target: &ContainerTarget,
        options: &TransportOptions,
    ) -> Result<Option<TransportRef>, TransportError> {
        let policy = options.policy.name();
        match &options.policy {
            TransportPolicy::Explicit(id) => Ok(Some(id.clone())),
            TransportPolicy::NoneRequired => Ok(None),
            TransportPolicy::ReuseLocked => {
                let check = self
                    .check_existing_transport(&target.package, &target.container)
                    .await?;
                if !check.successful {
                    return Err(TransportError::CheckIncomplete);
                }
                match check.transport_no {
                    Some(id) => {
                        info!(transport = %id, "reusing transport holding the lock");
                        Ok(Some(id))
                    }
                    None => self.create_if_allowed(target, options, policy).await.map(Some),
                }
            }
            TransportPolicy::ReuseUserOwned => {
                let text = options.text.as_deref().unwrap_or_default();
                match self.determine_existing_transport(text).await? {
                    Some(id) => {
                        info!(transport = %id, "reusing transport matching description");
                        Ok(Some(id))
                    }
                    None => self.create_if_allowed(target, options, policy).await.map(Some),
                }
            }
            TransportPolicy::CreateNew => {
                self.create_if_allowed(target, options, policy).await.map(Some)
            }
        }
    }

    async fn create_if_allowed(
        &self,
        target: &ContainerTarget,
        options: &TransportOptions,
        policy: &'static str,
    ) -> Result<TransportRef, TransportError> {
        if !options.allow_create {
            return Err(TransportError::NoTransport { policy });
        }
        let text = options.text.as_deref().unwrap_or_default();
        Ok(self.create_transport(&target.package, text).await?)
    }
}

/// Interpret a `transportchecks` response body.
pub fn parse_transport_check(body: &str) -> Result<TransportCheck, AdtError> {
    let root = XmlElement::parse(body)?;
    let result = root.value_at(&["asx:values", "DATA", "RESULT"]);
    let transport_no = root
        .value_at(&[
            "asx:values",
            "DATA",
            "LOCKS",
            "CTS_OBJECT_LOCK",
            "LOCK_HOLDER",
            "REQ_HEADER",
            "TRKORR",
        ])
        .map(TransportRef::new);

    Ok(TransportCheck {
        successful: result.as_deref() == Some(CHECK_SUCCESS),
        transport_no,
    })
}

/// Pick the first request header whose description matches `text`.
///
/// Headers without an `AS4TEXT` are taken as already filtered by the server.
/// An empty body means no match.
pub fn parse_transport_search(body: &str, text: &str) -> Result<Option<TransportRef>, AdtError> {
    if body.trim().is_empty() {
        return Ok(None);
    }
    let root = XmlElement::parse(body)?;
    let Some(data) = root.find(&["asx:values", "DATA"]) else {
        return Ok(None);
    };

    let wanted = text.trim();
    Ok(data
        .children_named("CTS_REQ_HEADER")
        .filter(|header| {
            header
                .value_at(&["AS4TEXT"])
                .is_none_or(|description| description == wanted)
        })
        .find_map(|header| header.value_at(&["TRKORR"]))
        .map(TransportRef::new))
}

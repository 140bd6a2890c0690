//! LFS Batch API.
//!
//! The Batch API is how a client asks which objects it has to upload, or
//! where it can download them from.
//! See: https://github.com/git-lfs/git-lfs/blob/main/docs/api/batch.md

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::config::Links;
use crate::store::ObjectStore;
use crate::{Error, Result};

/// Media type of Batch API requests and responses.
pub const LFS_MEDIA_TYPE: &str = "application/vnd.git-lfs+json";

/// The only transfer adapter this server speaks.
pub const BASIC_TRANSFER: &str = "basic";

/// Operation type for batch requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Download objects from the server.
    Download,
    /// Upload objects to the server.
    Upload,
}

impl Operation {
    /// Name of the operation on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Download => "download",
            Operation::Upload => "upload",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "download" => Ok(Operation::Download),
            "upload" => Ok(Operation::Upload),
            other => Err(Error::UnsupportedOperation(other.to_string())),
        }
    }
}

/// A batch request from an LFS client.
///
/// `operation` stays a string so that an unknown operation is reported
/// as [`Error::UnsupportedOperation`] instead of a body parse failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    /// The operation to perform.
    pub operation: String,
    /// The transfer adapters the client supports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfers: Option<Vec<String>>,
    /// Reference information (branch, etc). Accepted and ignored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#ref: Option<RefInfo>,
    /// The objects to operate on.
    pub objects: Vec<BatchRequestObject>,
}

/// Reference information for a batch request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefInfo {
    /// The reference name (e.g., "refs/heads/main").
    pub name: String,
}

/// An object in a batch request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequestObject {
    /// The OID of the object.
    pub oid: String,
    /// The size of the object in bytes. Only meaningful for uploads.
    #[serde(default)]
    pub size: u64,
}

/// A batch response to an LFS client.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResponse {
    /// The transfer adapter to use.
    pub transfer: String,
    /// One entry per requested object, in request order.
    pub objects: Vec<BatchObject>,
}

/// An object in a batch response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchObject {
    /// The OID, echoed exactly as the client sent it.
    pub oid: String,
    /// Object size in bytes. Absent when the entry carries an error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Actions the client has to take, keyed by `upload` / `download`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actions: Option<HashMap<String, Action>>,
    /// Why this object cannot be transferred.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<BatchError>,
}

/// An action (upload/download URL) for an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Action {
    /// The URL for the action.
    pub href: String,
}

/// Per-object error information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchError {
    /// HTTP status code.
    pub code: u16,
    /// Error message.
    pub message: String,
}

impl BatchRequest {
    /// Create a new batch request for downloading objects.
    pub fn download(objects: Vec<BatchRequestObject>) -> Self {
        BatchRequest {
            operation: Operation::Download.to_string(),
            transfers: Some(vec![BASIC_TRANSFER.to_string()]),
            r#ref: None,
            objects,
        }
    }

    /// Create a new batch request for uploading objects.
    pub fn upload(objects: Vec<BatchRequestObject>) -> Self {
        BatchRequest {
            operation: Operation::Upload.to_string(),
            transfers: Some(vec![BASIC_TRANSFER.to_string()]),
            r#ref: None,
            objects,
        }
    }
}

impl BatchRequestObject {
    /// Create a new batch request object.
    pub fn new(oid: &str, size: u64) -> Self {
        BatchRequestObject {
            oid: oid.to_string(),
            size,
        }
    }
}

impl BatchObject {
    fn with_action(oid: &str, size: u64, name: &str, href: String) -> Self {
        BatchObject {
            oid: oid.to_string(),
            size: Some(size),
            actions: Some(HashMap::from([(name.to_string(), Action { href })])),
            error: None,
        }
    }

    fn with_error(oid: &str, code: u16, message: impl Into<String>) -> Self {
        BatchObject {
            oid: oid.to_string(),
            size: None,
            actions: None,
            error: Some(BatchError {
                code,
                message: message.into(),
            }),
        }
    }

    /// Get the download action if available.
    pub fn download_action(&self) -> Option<&Action> {
        self.actions.as_ref()?.get("download")
    }

    /// Get the upload action if available.
    pub fn upload_action(&self) -> Option<&Action> {
        self.actions.as_ref()?.get("upload")
    }

    /// Check if this object has an error.
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Decide, per object, what the client has to do next.
///
/// Only reads from the store. Missing or malformed objects are reported in
/// their own entry; the whole request fails only for an unknown operation,
/// a transfer list without `basic`, or an I/O error.
pub fn negotiate(
    store: &ObjectStore,
    links: &Links,
    repo: &str,
    request: &BatchRequest,
) -> Result<BatchResponse> {
    let operation: Operation = request.operation.parse()?;

    if let Some(transfers) = &request.transfers {
        if !transfers.iter().any(|t| t == BASIC_TRANSFER) {
            return Err(Error::UnsupportedAdapter(transfers.clone()));
        }
    }

    let objects = request
        .objects
        .iter()
        .map(|obj| match operation {
            Operation::Download => download_object(store, links, repo, obj),
            Operation::Upload => upload_object(store, links, repo, obj),
        })
        .collect::<Result<Vec<_>>>()?;

    tracing::debug!(
        repo,
        operation = %operation,
        objects = objects.len(),
        "batch negotiated"
    );

    Ok(BatchResponse {
        transfer: BASIC_TRANSFER.to_string(),
        objects,
    })
}

fn download_object(
    store: &ObjectStore,
    links: &Links,
    repo: &str,
    obj: &BatchRequestObject,
) -> Result<BatchObject> {
    match store.size(&obj.oid) {
        Ok(size) => Ok(BatchObject::with_action(
            &obj.oid,
            size,
            "download",
            links.object_href(repo, &obj.oid),
        )),
        Err(Error::NotFound(_)) => Ok(BatchObject::with_error(
            &obj.oid,
            404,
            "Object does not exist",
        )),
        Err(e @ Error::InvalidOid(_)) => Ok(BatchObject::with_error(&obj.oid, 422, e.to_string())),
        Err(e) => Err(e),
    }
}

fn upload_object(
    store: &ObjectStore,
    links: &Links,
    repo: &str,
    obj: &BatchRequestObject,
) -> Result<BatchObject> {
    match store.contains(&obj.oid) {
        // Already stored: nothing to send.
        Ok(true) => Ok(BatchObject {
            oid: obj.oid.clone(),
            size: Some(obj.size),
            actions: None,
            error: None,
        }),
        Ok(false) => Ok(BatchObject::with_action(
            &obj.oid,
            obj.size,
            "upload",
            links.object_href(repo, &obj.oid),
        )),
        Err(e @ Error::InvalidOid(_)) => Ok(BatchObject::with_error(&obj.oid, 422, e.to_string())),
        Err(e) => Err(e),
    }
}

use crate::error::{Error, Result};
use std::{fmt::Display, time::Duration};
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

/// Script on the camera that reads and writes resources.
pub const RESOURCE_ENDPOINT: &str = "res.php";
/// Script on the camera that serves files from its internal storage.
pub const DOWNLOAD_ENDPOINT: &str = "download.php";
/// What the camera answers to a successful `set`: a quoted empty string.
pub const EMPTY_REPLY: &str = "\"\"";

/// A value written to a resource. The camera has no schema we could check
/// against, everything ends up as a string in a form field.
#[derive(Clone, Debug, PartialEq)]
pub enum ResourceValue {
    Text(String),
    /// Sent as the literal strings `true` / `false`.
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl Display for ResourceValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceValue::Text(text) => write!(f, "{text}"),
            ResourceValue::Bool(flag) => write!(f, "{flag}"),
            ResourceValue::Int(number) => write!(f, "{number}"),
            // Whole numbers keep their `.0`, e.g. `300.0` rather than `300`.
            ResourceValue::Float(number) => write!(f, "{number:?}"),
        }
    }
}

impl From<&str> for ResourceValue {
    fn from(value: &str) -> Self {
        ResourceValue::Text(value.to_string())
    }
}

impl From<String> for ResourceValue {
    fn from(value: String) -> Self {
        ResourceValue::Text(value)
    }
}

impl From<bool> for ResourceValue {
    fn from(value: bool) -> Self {
        ResourceValue::Bool(value)
    }
}

impl From<i64> for ResourceValue {
    fn from(value: i64) -> Self {
        ResourceValue::Int(value)
    }
}

impl From<i32> for ResourceValue {
    fn from(value: i32) -> Self {
        ResourceValue::Int(value.into())
    }
}

impl From<u32> for ResourceValue {
    fn from(value: u32) -> Self {
        ResourceValue::Int(value.into())
    }
}

impl From<f64> for ResourceValue {
    fn from(value: f64) -> Self {
        ResourceValue::Float(value)
    }
}

/// Connection details for one camera. Built once at start up and never
/// changed afterwards; http is stateless so there is nothing to tear down.
#[derive(Clone, Debug)]
pub struct CameraSession {
    /// Always carries a scheme and ends with `/`.
    base_url: Url,
    /// Report unexpected replies to resource writes.
    debug: bool,
    /// Unique identifier, helpful for trouble shooting and logging.
    uuid: Uuid,
}

impl CameraSession {
    /// Create a session for the camera at `url`.
    ///
    /// * `url`: camera address, with or without `http://` and trailing `/`.
    /// * `debug`: log every resource reply that is not the empty reply.
    pub fn new(url: &str, debug: bool) -> Result<Self> {
        Ok(Self {
            base_url: Self::normalise_url(url)?,
            debug,
            uuid: Uuid::new_v4(),
        })
    }

    /// Prefix a scheme when none is given and make sure the path ends in
    /// a separator so that endpoint names can be joined onto it.
    ///
    /// * `url`: user supplied camera address.
    pub fn normalise_url(url: &str) -> Result<Url> {
        let trimmed = url.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidUrl {
                url: url.to_string(),
                reason: String::from("empty"),
            });
        }

        let mut normalised = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("http://{trimmed}")
        };
        if !normalised.ends_with('/') {
            normalised.push('/');
        }

        let parsed = Url::parse(&normalised).map_err(|e| Error::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if parsed.cannot_be_a_base() || parsed.host_str().is_none() {
            return Err(Error::InvalidUrl {
                url: url.to_string(),
                reason: String::from("missing host"),
            });
        }
        Ok(parsed)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Return the unique identifier of the session.
    pub fn get_uuid(&self) -> Uuid {
        self.uuid
    }

    /// `<base>/res.php`
    pub fn resource_url(&self) -> Result<Url> {
        self.join(RESOURCE_ENDPOINT)
    }

    /// `<base>/download.php?file=<camera_path>`
    ///
    /// * `camera_path`: absolute path of the file on the camera.
    pub fn download_url(&self, camera_path: &str) -> Result<Url> {
        let mut url = self.join(DOWNLOAD_ENDPOINT)?;
        url.query_pairs_mut().append_pair("file", camera_path);
        Ok(url)
    }

    fn join(&self, endpoint: &str) -> Result<Url> {
        self.base_url.join(endpoint).map_err(|e| Error::InvalidUrl {
            url: self.base_url.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Outcome of a single download attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum Download {
    /// The whole body of a successful response.
    Ready(Vec<u8>),
    /// The camera answered with an http error status, which it does until
    /// a committed file has been rendered.
    NotReady(u16),
}

/// Get/set access to the camera's resource tree plus its file server.
/// Resource paths are dot delimited strings and are passed through
/// untouched; whether a path exists is for the camera to decide.
pub trait ResourceApi {
    /// Write `value` to `resource` and return the raw reply body.
    fn set_resource(&self, resource: &str, value: &ResourceValue) -> Result<String>;
    /// Read `resource`, returning the raw reply body (a quoted string).
    fn get_resource(&self, resource: &str) -> Result<String>;
    /// Make a single attempt at fetching a file from the camera.
    fn download(&self, camera_path: &str) -> Result<Download>;
}

impl<T: ResourceApi + ?Sized> ResourceApi for &T {
    fn set_resource(&self, resource: &str, value: &ResourceValue) -> Result<String> {
        (**self).set_resource(resource, value)
    }

    fn get_resource(&self, resource: &str) -> Result<String> {
        (**self).get_resource(resource)
    }

    fn download(&self, camera_path: &str) -> Result<Download> {
        (**self).download(camera_path)
    }
}

/// Talks to the camera over http. There are no retries here and status
/// codes of the resource endpoint are not interpreted, a transport error is
/// handed straight back to the caller.
pub struct ResourceClient {
    session: CameraSession,
    http: reqwest::blocking::Client,
}

impl ResourceClient {
    /// Create a client without a request timeout.
    ///
    /// * `session`: the camera to talk to.
    pub fn new(session: CameraSession) -> Result<Self> {
        Self::with_timeout(session, None)
    }

    /// Create a client whose requests give up after `timeout`.
    ///
    /// * `session`: the camera to talk to.
    /// * `timeout`: per request timeout, `None` blocks indefinitely.
    pub fn with_timeout(session: CameraSession, timeout: Option<Duration>) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| Error::Http {
                source,
                url: session.base_url.to_string(),
            })?;
        Ok(Self { session, http })
    }

    pub fn session(&self) -> &CameraSession {
        &self.session
    }

    fn post_form(&self, form: &[(&str, &str)]) -> Result<String> {
        let url = self.session.resource_url()?;
        let to_error = |source| Error::Http {
            source,
            url: url.to_string(),
        };
        self.http
            .post(url.clone())
            .form(form)
            .send()
            .map_err(to_error)?
            .text()
            .map_err(to_error)
    }
}

impl ResourceApi for ResourceClient {
    fn set_resource(&self, resource: &str, value: &ResourceValue) -> Result<String> {
        let value = value.to_string();
        let message = self.post_form(&[
            ("action", "set"),
            ("resource", resource),
            ("value", &value),
        ])?;
        debug!(session = %self.session.uuid, resource, %value, reply = %message, "set resource");

        if message != EMPTY_REPLY && self.session.debug {
            info!("Return message when setting {resource} to {value}: {message}");
        }
        Ok(message)
    }

    fn get_resource(&self, resource: &str) -> Result<String> {
        let message = self.post_form(&[("action", "get"), ("resource", resource)])?;
        debug!(session = %self.session.uuid, resource, reply = %message, "get resource");
        Ok(message)
    }

    fn download(&self, camera_path: &str) -> Result<Download> {
        let url = self.session.download_url(camera_path)?;
        let to_error = |source| Error::Http {
            source,
            url: url.to_string(),
        };
        let response = self.http.get(url.clone()).send().map_err(to_error)?;
        let status = response.status();
        if !status.is_success() {
            debug!(session = %self.session.uuid, camera_path, %status, "file not ready");
            return Ok(Download::NotReady(status.as_u16()));
        }
        let bytes = response.bytes().map_err(to_error)?;
        Ok(Download::Ready(bytes.to_vec()))
    }
}

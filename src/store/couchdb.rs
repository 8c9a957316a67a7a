//! CouchDB store over its HTTP API.
//!
//! Uses a blocking `ureq` agent: ingestion is sequential, so there is
//! nothing for an async runtime to overlap.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use tracing::{debug, info};
use ureq::http::Response;
use ureq::{Agent, Body, RequestBuilder};
use url::Url;

use crate::config::CouchDbConfig;
use crate::error::{MigrateError, Result};
use crate::model::document::{Attachment, DocRef, Document};
use crate::store::{CreateOutcome, DocumentStore};

/// Longest server message quoted back in an error.
const MAX_REASON_LEN: usize = 200;

/// Body of a successful document or attachment `PUT`.
#[derive(Debug, Deserialize)]
struct PutResponse {
    id: String,
    rev: String,
}

/// Body of a CouchDB error response.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    reason: String,
}

/// A connection to one CouchDB database.
pub struct CouchDb {
    agent: Agent,
    base: Url,
    db_name: String,
    authorization: Option<String>,
}

impl CouchDb {
    /// Connect to the configured server and check that the database exists.
    ///
    /// Credentials come from `username`/`password`, or from the URL's user
    /// info when the config leaves `username` empty. They are sent as a basic
    /// `Authorization` header and never appear in logs or errors.
    pub fn connect(config: &CouchDbConfig) -> Result<Self> {
        let mut base = Url::parse(config.server_url.trim()).map_err(|e| MigrateError::InvalidUrl {
            url: config.server_url.clone(),
            reason: e.to_string(),
        })?;
        if base.cannot_be_a_base() {
            return Err(MigrateError::InvalidUrl {
                url: config.server_url.clone(),
                reason: "URL cannot address documents".to_string(),
            });
        }

        let (username, password) = if config.username.is_empty() {
            (
                base.username().to_string(),
                base.password().unwrap_or_default().to_string(),
            )
        } else {
            (config.username.clone(), config.password.clone())
        };
        // Both setters only fail on cannot-be-a-base URLs, ruled out above
        let _ = base.set_username("");
        let _ = base.set_password(None);

        let authorization = (!username.is_empty())
            .then(|| format!("Basic {}", STANDARD.encode(format!("{username}:{password}"))));

        let agent: Agent = Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(config.timeout_secs.map(Duration::from_secs))
            .build()
            .into();

        let client = Self {
            agent,
            base,
            db_name: config.db_name.clone(),
            authorization,
        };

        debug!(
            server = %client.base,
            db = %client.db_name,
            user = %username,
            timeout_secs = ?config.timeout_secs,
            "Connecting to CouchDB"
        );
        client.check_database()?;
        info!(server = %client.base, db = %client.db_name, "Connected to CouchDB");
        Ok(client)
    }

    /// Server URL without credentials.
    pub fn server_url(&self) -> &Url {
        &self.base
    }

    fn check_database(&self) -> Result<()> {
        let url = self.url(&[self.db_name.as_str()]);
        let mut response = self
            .authorize(self.agent.get(url.as_str()))
            .call()
            .map_err(|e| self.unreachable(e))?;

        match response.status().as_u16() {
            200 => Ok(()),
            404 => Err(MigrateError::DatabaseNotFound(self.db_name.clone())),
            401 | 403 => Err(MigrateError::Unauthorized(self.db_name.clone())),
            status => Err(MigrateError::Store {
                operation: "open database",
                id: self.db_name.clone(),
                status,
                reason: error_reason(&mut response),
            }),
        }
    }

    /// Build `<base>/<segments…>`, percent-encoding every segment.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorize<B>(&self, request: RequestBuilder<B>) -> RequestBuilder<B> {
        match &self.authorization {
            Some(value) => request.header("Authorization", value.as_str()),
            None => request,
        }
    }

    fn unreachable(&self, source: ureq::Error) -> MigrateError {
        MigrateError::Unreachable {
            url: self.base.to_string(),
            source: Box::new(source),
        }
    }
}

impl DocumentStore for CouchDb {
    fn name(&self) -> &str {
        &self.db_name
    }

    fn create_if_absent(&mut self, document: &Document<'_>) -> Result<CreateOutcome> {
        let body = serde_json::to_vec(document.fields())?;
        let url = self.url(&[self.db_name.as_str(), document.id()]);

        let mut response = self
            .authorize(self.agent.put(url.as_str()))
            .header("Content-Type", "application/json")
            .send(body.as_slice())
            .map_err(|e| self.unreachable(e))?;

        match response.status().as_u16() {
            201 | 202 => {
                let text = response
                    .body_mut()
                    .read_to_string()
                    .map_err(|e| self.unreachable(e))?;
                let put: PutResponse = serde_json::from_str(&text)?;
                debug!(id = %put.id, rev = %put.rev, "Created document");
                // Attachments go to the ID that was sent, not the echoed one
                Ok(CreateOutcome::Created(DocRef {
                    id: document.id().to_string(),
                    rev: put.rev,
                }))
            }
            409 => Ok(CreateOutcome::Conflict),
            status => Err(MigrateError::Store {
                operation: "create",
                id: document.id().to_string(),
                status,
                reason: error_reason(&mut response),
            }),
        }
    }

    fn attach(&mut self, doc: &DocRef, attachment: &Attachment<'_>) -> Result<()> {
        let mut url = self.url(&[self.db_name.as_str(), doc.id.as_str(), attachment.filename.as_str()]);
        url.query_pairs_mut().append_pair("rev", &doc.rev);

        let mut response = self
            .authorize(self.agent.put(url.as_str()))
            .header("Content-Type", attachment.content_type)
            .send(attachment.data)
            .map_err(|e| self.unreachable(e))?;

        match response.status().as_u16() {
            201 | 202 => {
                debug!(
                    id = %doc.id,
                    filename = %attachment.filename,
                    size = attachment.data.len(),
                    "Attached raw message"
                );
                Ok(())
            }
            status => Err(MigrateError::Store {
                operation: "attach",
                id: doc.id.clone(),
                status,
                reason: error_reason(&mut response),
            }),
        }
    }
}

/// Summarize an error response as `error: reason`.
fn error_reason(response: &mut Response<Body>) -> String {
    let text = response.body_mut().read_to_string().unwrap_or_default();
    match serde_json::from_str::<ErrorResponse>(&text) {
        Ok(err) if err.reason.is_empty() => err.error,
        Ok(err) => format!("{}: {}", err.error, err.reason),
        Err(_) => text.chars().take(MAX_REASON_LEN).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(server_url: &str) -> CouchDb {
        CouchDb {
            agent: Agent::new_with_defaults(),
            base: Url::parse(server_url).unwrap(),
            db_name: "mail".to_string(),
            authorization: None,
        }
    }

    #[test]
    fn test_url_encodes_segments() {
        let c = client("http://localhost:5984");
        let url = c.url(&["mail", "<a/b@example.com>"]);
        assert_eq!(url.as_str(), "http://localhost:5984/mail/%3Ca%2Fb@example.com%3E");
    }

    #[test]
    fn test_url_keeps_base_path() {
        let c = client("https://proxy.example.com/couch/");
        let url = c.url(&["mail"]);
        assert_eq!(url.as_str(), "https://proxy.example.com/couch/mail");
    }

    #[test]
    fn test_connect_rejects_bad_url() {
        let config = CouchDbConfig {
            server_url: "not a url".to_string(),
            db_name: "mail".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            CouchDb::connect(&config),
            Err(MigrateError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_connect_unreachable() {
        // Port 9 (discard) on loopback is closed on any sane test host
        let config = CouchDbConfig {
            server_url: "http://127.0.0.1:9".to_string(),
            db_name: "mail".to_string(),
            timeout_secs: Some(5),
            ..Default::default()
        };
        assert!(matches!(
            CouchDb::connect(&config),
            Err(MigrateError::Unreachable { .. })
        ));
    }
}

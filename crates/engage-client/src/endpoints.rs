//! Endpoint URLs relative to the configured base.

use crate::{ClientError, ClientResult};
use url::Url;

/// Resolves the endpoint URLs.
#[derive(Debug, Clone)]
pub struct Endpoints {
    base: Url,
}

impl Endpoints {
    pub fn new(base: Url) -> ClientResult<Self> {
        if base.cannot_be_a_base() {
            return Err(ClientError::InvalidEndpoint(base.to_string()));
        }
        Ok(Self { base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn login(&self) -> ClientResult<Url> {
        self.join(&["users", "login"])
    }

    pub fn logout(&self) -> ClientResult<Url> {
        self.join(&["users", "logout"])
    }

    pub fn last_mobile_activity(&self) -> ClientResult<Url> {
        self.event("ems_lastMobileActivity")
    }

    /// `events/{name}`, with `name` encoded as a single path segment.
    pub fn event(&self, name: &str) -> ClientResult<Url> {
        self.join(&["events", name])
    }

    fn join(&self, segments: &[&str]) -> ClientResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidEndpoint(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

//! An HTTP client that fetches rules documents.
use reqwest::{StatusCode, Url};

use crate::{rules::parse_rules, rules::LaunchRule, Error, LaunchRulesEngine, Result};

/// Configuration for [`RulesFetcher`].
#[derive(Debug, Clone)]
pub struct RulesFetcherConfig {
    /// Location of the JSON rules document.
    pub url: String,
}

/// A client that fetches rules documents from remote configuration.
pub struct RulesFetcher {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::blocking::Client,
    url: Url,
    /// If we receive a 401 Unauthorized error during a request, the rules location is not
    /// accessible with our credentials. We cache this error so we don't issue additional requests
    /// to the server.
    unauthorized: bool,
}

impl RulesFetcher {
    /// Create a fetcher for `config.url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if the url cannot be parsed.
    pub fn new(config: RulesFetcherConfig) -> Result<RulesFetcher> {
        let url = Url::parse(&config.url).map_err(Error::InvalidUrl)?;
        Ok(RulesFetcher {
            client: reqwest::blocking::Client::new(),
            url,
            unauthorized: false,
        })
    }

    /// Fetch and parse the rules document.
    pub fn fetch_rules(&mut self) -> Result<Vec<LaunchRule>> {
        if self.unauthorized {
            return Err(Error::Unauthorized);
        }

        log::debug!(target: "launch_rules", url = self.url.as_str(); "fetching rules");
        let response = self.client.get(self.url.clone()).send()?;

        let response = response.error_for_status().map_err(|err| {
            if err.status() == Some(StatusCode::UNAUTHORIZED) {
                log::warn!(target: "launch_rules", "not authorized to fetch rules");
                self.unauthorized = true;
                Error::Unauthorized
            } else {
                log::warn!(target: "launch_rules", "received non-200 response while fetching rules: {:?}", err);
                Error::from(err)
            }
        })?;

        let body = response.bytes()?;
        let rules = parse_rules(&body)?;

        log::debug!(target: "launch_rules", count = rules.len(); "successfully fetched rules");

        Ok(rules)
    }

    /// Fetch the rules document once and install it with [`LaunchRulesEngine::replace_rules`].
    ///
    /// On failure the engine keeps its current rules, and cached events stay cached.
    pub fn load_into(&mut self, engine: &LaunchRulesEngine) -> Result<()> {
        let rules = self.fetch_rules()?;
        engine.replace_rules(Some(rules));
        Ok(())
    }
}

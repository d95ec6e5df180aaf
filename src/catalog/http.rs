use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use std::time::Duration;
use url::Url;

use super::{CatalogApi, ClothingCatalogEntry};

/// Where and how to reach the laundry backend.
#[derive(Clone, Debug)]
pub struct HttpCatalogConfig {
    /// Collection root, e.g. `http://127.0.0.1:3000/api/clothes`.
    pub base_url: String,
    pub timeout: Duration,
    /// Sent as `X-Device-Id` on every request.
    pub device_id: String,
    /// Sent as `Authorization: Bearer <token>` when set.
    pub token: Option<String>,
}

/// `CatalogApi` over the backend's REST routes.
pub struct HttpCatalogApi {
    base: Url,
    config: HttpCatalogConfig,
    agent: ureq::Agent,
}

#[derive(Serialize)]
struct WearUpdate {
    #[serde(rename = "wearsBeforeWash")]
    wears_before_wash: u32,
}

#[derive(Serialize)]
struct WornItemsLog<'a> {
    date: String,
    items: &'a [String],
}

impl HttpCatalogApi {
    pub fn new(config: HttpCatalogConfig) -> Result<Self> {
        let base = Url::parse(&config.base_url)
            .with_context(|| format!("invalid backend url {}", config.base_url))?;
        if base.cannot_be_a_base() {
            return Err(anyhow!("backend url {} cannot carry a path", config.base_url));
        }
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(config.timeout)
            .timeout(config.timeout)
            .build();
        Ok(Self {
            base,
            config,
            agent,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base.as_str()
    }

    /// URL of `segment` under the collection root, percent-encoded.
    fn url_for(&self, segment: &str) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("backend url {} cannot carry a path", self.base))?
            .pop_if_empty()
            .push(segment);
        Ok(url)
    }

    fn request(&self, method: &str, url: &Url) -> ureq::Request {
        let request = self
            .agent
            .request_url(method, url)
            .set("X-Device-Id", &self.config.device_id);
        match &self.config.token {
            Some(token) => request.set("Authorization", &format!("Bearer {}", token)),
            None => request,
        }
    }
}

fn call_error(action: &str, err: ureq::Error) -> anyhow::Error {
    match err {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            anyhow!("{} returned status {}: {}", action, code, body.trim())
        }
        ureq::Error::Transport(transport) => anyhow!("{} failed: {}", action, transport),
    }
}

impl CatalogApi for HttpCatalogApi {
    fn fetch_catalog(&self) -> Result<Vec<ClothingCatalogEntry>> {
        let url = self.url_for("clothingcatalog")?;
        let response = self
            .request("GET", &url)
            .call()
            .map_err(|err| call_error("catalog fetch", err))?;
        if response.status() != 200 {
            return Err(anyhow!("catalog fetch returned status {}", response.status()));
        }
        response
            .into_json()
            .context("catalog fetch returned invalid json")
    }

    fn push_wear(&self, name: &str, wears_before_wash: u32) -> Result<()> {
        let url = self.url_for(name)?;
        self.request("PUT", &url)
            .send_json(WearUpdate { wears_before_wash })
            .map_err(|err| call_error(&format!("wear push for {}", name), err))?;
        Ok(())
    }

    fn log_worn_items(&self, date: NaiveDate, items: &[String]) -> Result<()> {
        let url = self.url_for("")?;
        self.request("POST", &url)
            .send_json(WornItemsLog {
                date: date.format("%Y-%m-%d").to_string(),
                items,
            })
            .map_err(|err| call_error("worn items log", err))?;
        Ok(())
    }

    fn laundry_list(&self) -> Result<serde_json::Value> {
        let url = self.url_for("laundrylist")?;
        self.request("GET", &url)
            .call()
            .map_err(|err| call_error("laundry list", err))?
            .into_json()
            .context("laundry list returned invalid json")
    }
}

//! HTTP access to the two portals.
//!
//! One explicitly constructed [`PortalClient`] is built at startup and passed
//! to every fetch operation; headers and the cookie jar never change after
//! construction. All requests are GETs, made sequentially, with a fixed
//! cooperative delay between them via [`PortalClient::pace`].

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER, USER_AGENT};
use reqwest::Client;

use crate::{Result, FETCH_DELAY, PPM_BASE_URL, REGISTRY_BASE_URL, REQUEST_TIMEOUT};

pub struct PortalClient {
    http: Client,
    ppm_base: String,
    registry_base: String,
}

impl PortalClient {
    pub fn new() -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36",
            ),
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("zh-TW,zh;q=0.9,en;q=0.8"));
        let http = Client::builder()
            .default_headers(headers)
            .cookie_store(true)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            ppm_base: PPM_BASE_URL.to_string(),
            registry_base: REGISTRY_BASE_URL.to_string(),
        })
    }

    pub fn ppm_url(&self, path: &str) -> String {
        format!("{}/{}", self.ppm_base, path)
    }

    pub fn registry_url(&self, path: &str) -> String {
        format!("{}/{}", self.registry_base, path)
    }

    pub fn registry_base(&self) -> &str {
        &self.registry_base
    }

    /// Warms up the PPM session cookies by walking the entry pages the site
    /// expects a browser to visit before serving data.
    pub async fn establish_ppm_session(&self) -> Result<()> {
        for path in [
            "Index.aspx",
            "Menu.aspx?ASParam=JTdkWFBYJTE0JTE4NjZpdA==",
            "PLC02.aspx",
        ] {
            self.get_html(&self.ppm_url(path)).await?;
        }
        Ok(())
    }

    pub async fn establish_registry_session(&self) -> Result<()> {
        self.registry_get("information/Query/Pesticide", &[]).await.map(drop)
    }

    pub async fn get_html(&self, url: &str) -> Result<String> {
        let res = self.http.get(url).send().await?.error_for_status()?;
        Ok(res.text().await?)
    }

    /// GET against the registration database. The registry checks the referer
    /// on some views, so every request carries one.
    pub async fn registry_get(&self, path: &str, query: &[(&str, String)]) -> Result<String> {
        let res = self
            .http
            .get(self.registry_url(path))
            .header(REFERER, self.registry_base.as_str())
            .query(query)
            .send()
            .await?
            .error_for_status()?;
        Ok(res.text().await?)
    }

    /// Downloads a binary resource (label images).
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let res = self
            .http
            .get(url)
            .header(REFERER, self.registry_base.as_str())
            .send()
            .await?
            .error_for_status()?;
        Ok(res.bytes().await?.to_vec())
    }

    /// Fixed cooperative delay between successive remote fetches; a policy
    /// constant, not adaptive backoff.
    pub async fn pace(&self) {
        tokio::time::sleep(FETCH_DELAY).await;
    }
}

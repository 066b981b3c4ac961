//! Source database download.

use std::time::Duration;

use crate::Result;

/// Download URL of the ipinfo free country database.
///
/// `{token}` is replaced with the access token.
pub const DEFAULT_SOURCE_URL: &str = "https://ipinfo.io/data/free/country.mmdb?token={token}";

/// Placeholder replaced by the access token.
const TOKEN_PLACEHOLDER: &str = "{token}";

/// Request timeout for the download.
const TIMEOUT: Duration = Duration::from_secs(120);

/// Blocking downloader for the source database.
///
/// The token is passed in explicitly and never read from the environment.
pub struct Downloader {
    client: reqwest::blocking::Client,
    url_template: String,
    token: String,
}

impl Downloader {
    /// Create a downloader for [`DEFAULT_SOURCE_URL`].
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(TIMEOUT)
            .user_agent(concat!("sing-geoip/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            url_template: DEFAULT_SOURCE_URL.to_string(),
            token: token.into(),
        })
    }

    /// Use another URL template.
    pub fn with_url_template(mut self, template: impl Into<String>) -> Self {
        self.url_template = template.into();
        self
    }

    /// The request URL with the token filled in.
    pub fn url(&self) -> String {
        self.url_template.replace(TOKEN_PLACEHOLDER, &self.token)
    }

    /// Fetch the database image.
    ///
    /// Transport failures and non-success statuses fail with
    /// [`crate::Error::Fetch`].
    pub fn download(&self) -> Result<Vec<u8>> {
        log::info!(
            "Downloading {}",
            self.url_template.replace(TOKEN_PLACEHOLDER, "***")
        );

        let response = self.client.get(self.url()).send()?.error_for_status()?;
        let bytes = response.bytes()?;

        log::info!("Downloaded {} bytes", bytes.len());
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_fills_token() {
        let downloader = Downloader::new("secret").unwrap();
        assert_eq!(
            downloader.url(),
            "https://ipinfo.io/data/free/country.mmdb?token=secret"
        );
    }

    #[test]
    fn test_custom_template() {
        let downloader = Downloader::new("abc")
            .unwrap()
            .with_url_template("http://127.0.0.1:1/country.mmdb?t={token}");
        assert_eq!(downloader.url(), "http://127.0.0.1:1/country.mmdb?t=abc");
    }

    #[test]
    fn test_unreachable_host_is_fetch_error() {
        let downloader = Downloader::new("abc")
            .unwrap()
            .with_url_template("http://127.0.0.1:1/country.mmdb?t={token}");
        assert!(matches!(
            downloader.download(),
            Err(crate::Error::Fetch(_))
        ));
    }
}

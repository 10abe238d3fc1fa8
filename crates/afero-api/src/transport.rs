// Shared transport configuration for building reqwest::Client instances.
//
// The API client and the token refresher share timeouts, user agent and
// vendor host selection through this module.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

/// Which white-label Afero cloud to talk to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    /// Hubspace (Home Depot).
    #[default]
    Hubspace,
    /// Myko (Kichler).
    Myko,
}

impl Vendor {
    fn api_host(self) -> &'static str {
        match self {
            Self::Hubspace => "api2.afero.net",
            Self::Myko => "api2.sxz2xlhh.afero.net",
        }
    }

    fn data_host(self) -> &'static str {
        match self {
            Self::Hubspace => "semantics2.afero.net",
            Self::Myko => "semantics2.sxz2xlhh.afero.net",
        }
    }

    fn auth_realm_url(self) -> &'static str {
        match self {
            Self::Hubspace => "https://accounts.hubspaceconnect.com/auth/realms/thd",
            Self::Myko => "https://accounts.mykoapp.com/auth/realms/kfi",
        }
    }

    /// OpenID client id registered for the vendor's mobile app.
    pub fn client_id(self) -> &'static str {
        match self {
            Self::Hubspace => "hubspace_android",
            Self::Myko => "kfi_android",
        }
    }

    /// User agent the vendor's mobile app sends.
    pub fn user_agent(self) -> &'static str {
        match self {
            Self::Hubspace => "Dart/2.15 (dart:io)",
            Self::Myko => "Dart/3.1 (dart:io)",
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hubspace => f.write_str("hubspace"),
            Self::Myko => f.write_str("myko"),
        }
    }
}

impl FromStr for Vendor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hubspace" => Ok(Self::Hubspace),
            "myko" => Ok(Self::Myko),
            other => Err(format!("unknown vendor '{other}' (expected hubspace or myko)")),
        }
    }
}

/// Base URLs for the three Afero surfaces: account/API, data, and OpenID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// `https://api2.afero.net` -- account lookup and state writes.
    pub api_base: Url,
    /// `https://semantics2.afero.net` -- metadevice reads.
    pub data_base: Url,
    /// OpenID token endpoint.
    pub token_url: Url,
    /// OpenID client id.
    pub client_id: String,
}

impl Endpoints {
    /// Production endpoints for a vendor.
    pub fn for_vendor(vendor: Vendor) -> Result<Self, crate::error::Error> {
        Ok(Self {
            api_base: Url::parse(&format!("https://{}", vendor.api_host()))?,
            data_base: Url::parse(&format!("https://{}", vendor.data_host()))?,
            token_url: Url::parse(&format!(
                "{}/protocol/openid-connect/token",
                vendor.auth_realm_url()
            ))?,
            client_id: vendor.client_id().to_owned(),
        })
    }

    /// Point every surface at a single base URL (mock servers, proxies).
    pub fn single_host(base: &str, client_id: &str) -> Result<Self, crate::error::Error> {
        let base = Url::parse(base)?;
        let token_url = base.join("/protocol/openid-connect/token")?;
        Ok(Self {
            api_base: base.clone(),
            data_base: base,
            token_url,
            client_id: client_id.to_owned(),
        })
    }
}

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub vendor: Vendor,
    pub timeout: Duration,
    /// Overrides the vendor's default user agent.
    pub user_agent: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            vendor: Vendor::default(),
            timeout: Duration::from_secs(30),
            user_agent: None,
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, crate::error::Error> {
        let user_agent = self
            .user_agent
            .clone()
            .unwrap_or_else(|| self.vendor.user_agent().to_owned());

        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(user_agent)
            .gzip(true)
            .build()?;
        Ok(client)
    }

    /// Production endpoints for the configured vendor.
    pub fn endpoints(&self) -> Result<Endpoints, crate::error::Error> {
        Endpoints::for_vendor(self.vendor)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn vendor_round_trips_through_display() {
        for vendor in [Vendor::Hubspace, Vendor::Myko] {
            assert_eq!(vendor.to_string().parse::<Vendor>().unwrap(), vendor);
        }
        assert!("philips".parse::<Vendor>().is_err());
    }

    #[test]
    fn hubspace_endpoints() {
        let ep = Endpoints::for_vendor(Vendor::Hubspace).unwrap();
        assert_eq!(ep.api_base.host_str(), Some("api2.afero.net"));
        assert_eq!(ep.data_base.host_str(), Some("semantics2.afero.net"));
        assert_eq!(
            ep.token_url.as_str(),
            "https://accounts.hubspaceconnect.com/auth/realms/thd/protocol/openid-connect/token"
        );
        assert_eq!(ep.client_id, "hubspace_android");
    }

    #[test]
    fn single_host_points_everything_at_base() {
        let ep = Endpoints::single_host("http://127.0.0.1:9000", "test").unwrap();
        assert_eq!(ep.api_base, ep.data_base);
        assert_eq!(ep.token_url.path(), "/protocol/openid-connect/token");
    }
}

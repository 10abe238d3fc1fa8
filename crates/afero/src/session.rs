//! Builds a bridge from the config file, the selected profile and CLI
//! overrides, and persists a rotated refresh token on the way out.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

use afero_api::{AferoAuth, AferoClient};
use afero_config::{Config, Profile};
use afero_core::{Bridge, BridgeConfig};

use crate::cli::{Command, GlobalOpts, WatchArgs};
use crate::error::CliError;

pub type AferoBridge = Bridge<AferoClient, AferoAuth>;

pub struct Session {
    pub bridge: AferoBridge,
    pub profile_name: String,
    /// Token the session started with; `None` if it came from a flag.
    stored_token: Option<SecretString>,
}

impl Session {
    pub fn open(global: &GlobalOpts, command: &Command) -> Result<Self, CliError> {
        let cfg = afero_config::load_config()?;
        let requested = global.profile.as_deref();

        let (profile_name, profile) = match cfg.profile(requested) {
            Ok((name, profile)) => (name, Some(profile)),
            // Without a config file, a token on the command line is enough.
            Err(_) if requested.is_none() && global.refresh_token.is_some() => {
                ("default".to_owned(), None)
            }
            Err(e) => return Err(e.into()),
        };
        let fallback = Profile::default();
        let profile = profile.unwrap_or(&fallback);

        let (refresh_token, stored_token) = match global.refresh_token {
            Some(ref token) => (SecretString::from(token.clone()), None),
            None => {
                let token = afero_config::resolve_refresh_token(profile, &profile_name)?;
                (token.clone(), Some(token))
            }
        };

        let mut transport = afero_config::profile_to_transport_config(&cfg.defaults, profile);
        if let Some(vendor) = global.vendor {
            transport.vendor = vendor;
        }
        if let Some(secs) = global.timeout {
            transport.timeout = Duration::from_secs(secs);
        }

        let bridge_config = bridge_config(&cfg, profile, command)?;

        let http = transport.build_client().map_err(connection_error)?;
        let endpoints = transport.endpoints().map_err(connection_error)?;
        let auth = AferoAuth::new(http.clone(), &endpoints, refresh_token);
        let client = AferoClient::with_client(http, endpoints);
        debug!(vendor = %transport.vendor, profile = %profile_name, "session ready");

        Ok(Self {
            bridge: Bridge::new(client, auth, bridge_config)?,
            profile_name,
            stored_token,
        })
    }

    /// Stop the bridge and keep the profile's refresh token current.
    pub async fn close(&self) {
        self.bridge.stop().await;

        let Some(ref stored) = self.stored_token else {
            return;
        };
        let Some(current) = self.bridge.credentials().refresh_token().await else {
            return;
        };
        if current.expose_secret() == stored.expose_secret() {
            return;
        }
        match afero_config::store_refresh_token(&self.profile_name, &current) {
            Ok(()) => debug!(profile = %self.profile_name, "stored rotated refresh token"),
            Err(e) => warn!(error = %e, "could not store rotated refresh token"),
        }
    }
}

/// Profile knobs, with `watch --interval` taking precedence.
fn bridge_config(
    cfg: &Config,
    profile: &Profile,
    command: &Command,
) -> Result<BridgeConfig, CliError> {
    let mut config = afero_config::profile_to_bridge_config(&cfg.defaults, profile)?;
    if let Command::Watch(WatchArgs {
        interval: Some(secs),
        ..
    }) = command
    {
        config.poll_interval = Duration::from_secs(*secs);
        config.validate()?;
    }
    Ok(config)
}

fn connection_error(err: afero_api::Error) -> CliError {
    CliError::ConnectionFailed {
        reason: err.to_string(),
    }
}

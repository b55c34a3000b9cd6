use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::{cli::Cli, hub::HubConfig, session::SessionConfig};

/// Basic-auth credentials for the translation provider.
#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    #[serde(rename = "Username", alias = "username")]
    pub username: String,
    #[serde(rename = "Password", alias = "password")]
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read credentials file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse credentials file {}", path.display()))
    }
}

/// Flags win over the credentials file; one of the two must be complete.
pub fn resolve_credentials(
    user: Option<String>,
    pass: Option<String>,
    file: Option<&Path>,
) -> Result<Credentials> {
    match (user, pass, file) {
        (Some(username), Some(password), _) => Ok(Credentials { username, password }),
        (_, _, Some(path)) => Credentials::from_file(path),
        (Some(_), None, None) => bail!("--user was given without --pass"),
        (None, Some(_), None) => bail!("--pass was given without --user"),
        (None, None, None) => {
            bail!("translation credentials are required: pass --user and --pass, or --credentials <file>")
        }
    }
}

/// Everything the relay needs once the command line has been validated.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub addr: String,
    pub translate_url: String,
    pub credentials: Credentials,
    pub hub: HubConfig,
    pub session: SessionConfig,
}

impl RelaySettings {
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let credentials =
            resolve_credentials(cli.user, cli.pass, cli.credentials.as_deref())?;
        let translate_timeout = Duration::from_secs(cli.translate_timeout_secs);

        Ok(Self {
            addr: cli.addr,
            translate_url: cli.translate_url,
            credentials,
            hub: HubConfig {
                lane_capacity: cli.lane_capacity,
                translate_timeout,
                ..HubConfig::default()
            },
            session: SessionConfig {
                mailbox_capacity: cli.mailbox_capacity,
            },
        })
    }
}

//! Configuration file discovery and parsing (spec.md §6, detailed in
//! `SPEC_FULL.md` §1 against `source/module/config.c`).

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Error};

pub const DEFAULT_CONFIG_FILE: &str = "/var/hpss/etc/gridftp_hpss_dsi.conf";

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub login_name: Option<String>,
    pub authentication_mech: Option<String>,
    pub authenticator: Option<String>,
    pub quota_support: bool,
    pub uda_checksum_support: bool,
}

/// `$HPSS_DSI_CONFIG_FILE`, else `$HPSS_PATH_ETC/gridftp_hpss_dsi.conf`,
/// else [`DEFAULT_CONFIG_FILE`]. An explicit environment override that
/// isn't readable is a hard error; falling through the other two tiers
/// silently accepts the next one.
pub fn find_config_file() -> Result<PathBuf, Error> {
    if let Ok(path) = std::env::var("HPSS_DSI_CONFIG_FILE") {
        let path = PathBuf::from(path);
        std::fs::metadata(&path)
            .with_context(|| format!("config file {} from HPSS_DSI_CONFIG_FILE is not accessible", path.display()))?;
        return Ok(path);
    }

    if let Ok(etc) = std::env::var("HPSS_PATH_ETC") {
        let candidate = Path::new(&etc).join("gridftp_hpss_dsi.conf");
        if candidate.is_file() {
            return Ok(candidate);
        }
    }

    let default = PathBuf::from(DEFAULT_CONFIG_FILE);
    if default.is_file() {
        Ok(default)
    } else {
        bail!("no readable HPSS DSI config file found");
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "on" | "true" | "yes")
}

/// Parse config file contents already in memory; split out from
/// [`load`] so tests can exercise it without touching the filesystem.
pub fn parse_str(contents: &str) -> Result<Config, Error> {
    let mut config = Config::default();

    for (lineno, line) in contents.lines().enumerate() {
        // A `#` stops the scan right there: everything up to it is
        // tokenized, everything from it on is dropped, matching
        // `config_find_next_word`'s treatment of comments.
        let mut tokens = line.split_whitespace().take_while(|t| !t.starts_with('#'));

        let key = match tokens.next() {
            Some(k) => k,
            None => continue,
        };
        let value = tokens
            .next()
            .ok_or_else(|| anyhow::format_err!("config line {}: missing value for {}", lineno + 1, key))?;
        if tokens.next().is_some() {
            bail!("config line {}: unexpected extra token after value", lineno + 1);
        }

        match key.to_ascii_lowercase().as_str() {
            "loginname" => config.login_name = Some(value.to_string()),
            "authenticationmech" => config.authentication_mech = Some(value.to_string()),
            "authenticator" => config.authenticator = Some(value.to_string()),
            "quotasupport" => config.quota_support = parse_bool(value),
            "udachecksumsupport" => config.uda_checksum_support = parse_bool(value),
            other => bail!("config line {}: unrecognized directive '{}'", lineno + 1, other),
        }
    }

    Ok(config)
}

pub fn load() -> Result<Config, Error> {
    let path = find_config_file()?;
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    parse_str(&contents).with_context(|| format!("parsing config file {}", path.display()))
}

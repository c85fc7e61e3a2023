//! Agent configuration from environment variables and command line flags.
//!
//! Flags win over environment variables, which win over defaults. Anything
//! unparsable is rejected here so the process fails before it binds a socket.

use crate::error::ConfigError;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8080;

/// Which interfaces make it into a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetFilter {
    /// Interfaces with an address, a MAC, or non-zero counters.
    Active,
    All,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub host: IpAddr,
    pub port: u16,
    pub refresh: Duration,
    pub heartbeat: Duration,
    pub source_timeout: Duration,
    pub net_timeout: Duration,
    pub history_len: usize,
    /// Sampling rounds an interface may be missing before its rate state is dropped.
    pub forget_after: u64,
    pub retry: Duration,
    pub client_buffer: usize,
    pub max_lagged: u32,
    pub mounts_of_interest: Vec<String>,
    pub net_filter: NetFilter,
    pub docker_bin: String,
    pub docker_all: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            refresh: Duration::from_millis(2_000),
            heartbeat: Duration::from_millis(15_000),
            source_timeout: Duration::from_millis(3_000),
            net_timeout: Duration::from_millis(3_000),
            history_len: 120,
            forget_after: crate::rate::DEFAULT_FORGET_AFTER,
            retry: Duration::from_millis(5_000),
            client_buffer: 16,
            max_lagged: 5,
            mounts_of_interest: Vec::new(),
            net_filter: NetFilter::Active,
            docker_bin: "docker".into(),
            docker_all: false,
        }
    }
}

/// What `main` should do after parsing.
#[derive(Debug)]
pub enum CliAction {
    Run(AgentConfig),
    Help(String),
}

impl AgentConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Parse from the real process environment and arguments.
    pub fn load() -> Result<CliAction, ConfigError> {
        Self::parse(std::env::args(), |k| std::env::var(k).ok())
    }

    /// Parse from an argument list (program name first) and an env lookup.
    pub fn parse<I, F>(args: I, env: F) -> Result<CliAction, ConfigError>
    where
        I: IntoIterator<Item = String>,
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = AgentConfig::default();
        cfg.apply_env(&env)?;

        let mut it = args.into_iter();
        let prog = it.next().unwrap_or_else(|| "pulsedash_agent".into());
        while let Some(arg) = it.next() {
            let (flag, inline) = match arg.split_once('=') {
                Some((f, v)) if f.starts_with("--") => (f.to_string(), Some(v.to_string())),
                _ => (arg.clone(), None),
            };
            match flag.as_str() {
                "-h" | "--help" => return Ok(CliAction::Help(usage(&prog))),
                "--port" | "-p" => {
                    let v = inline
                        .or_else(|| it.next())
                        .ok_or_else(|| ConfigError::MissingValue(flag.clone()))?;
                    cfg.port = parse_num("--port", &v)?;
                }
                "--host" => {
                    let v = inline
                        .or_else(|| it.next())
                        .ok_or_else(|| ConfigError::MissingValue(flag.clone()))?;
                    cfg.host = parse_host("--host", &v)?;
                }
                "--refresh-ms" => {
                    let v = inline
                        .or_else(|| it.next())
                        .ok_or_else(|| ConfigError::MissingValue(flag.clone()))?;
                    cfg.refresh = parse_millis("--refresh-ms", &v)?;
                }
                _ => return Err(ConfigError::UnexpectedArgument(arg)),
            }
        }
        Ok(CliAction::Run(cfg))
    }

    fn apply_env<F>(&mut self, env: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = env("PULSEDASH_HOST") {
            self.host = parse_host("PULSEDASH_HOST", &v)?;
        }
        if let Some(v) = env("PULSEDASH_PORT") {
            self.port = parse_num("PULSEDASH_PORT", &v)?;
        }
        if let Some(v) = env("PULSEDASH_REFRESH_MS") {
            self.refresh = parse_millis("PULSEDASH_REFRESH_MS", &v)?;
        }
        if let Some(v) = env("PULSEDASH_HEARTBEAT_MS") {
            self.heartbeat = parse_millis("PULSEDASH_HEARTBEAT_MS", &v)?;
        }
        if let Some(v) = env("PULSEDASH_SOURCE_TIMEOUT_MS") {
            self.source_timeout = parse_millis("PULSEDASH_SOURCE_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = env("PULSEDASH_NET_TIMEOUT_MS") {
            self.net_timeout = parse_millis("PULSEDASH_NET_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = env("PULSEDASH_HISTORY_LEN") {
            self.history_len = parse_positive("PULSEDASH_HISTORY_LEN", &v)?;
        }
        if let Some(v) = env("PULSEDASH_RETRY_MS") {
            self.retry = parse_millis("PULSEDASH_RETRY_MS", &v)?;
        }
        if let Some(v) = env("PULSEDASH_CLIENT_BUFFER") {
            self.client_buffer = parse_positive("PULSEDASH_CLIENT_BUFFER", &v)?;
        }
        if let Some(v) = env("PULSEDASH_MAX_LAGGED") {
            self.max_lagged = parse_positive("PULSEDASH_MAX_LAGGED", &v)?;
        }
        if let Some(v) = env("PULSEDASH_FORGET_AFTER") {
            self.forget_after = parse_positive("PULSEDASH_FORGET_AFTER", &v)?;
        }
        if let Some(v) = env("PULSEDASH_MOUNTS") {
            self.mounts_of_interest = v
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = env("PULSEDASH_NET_FILTER") {
            self.net_filter = match v.trim().to_ascii_lowercase().as_str() {
                "active" => NetFilter::Active,
                "all" => NetFilter::All,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "PULSEDASH_NET_FILTER",
                        value: v,
                        reason: "expected `active` or `all`".into(),
                    })
                }
            };
        }
        if let Some(v) = env("PULSEDASH_DOCKER_BIN") {
            if !v.trim().is_empty() {
                self.docker_bin = v.trim().to_string();
            }
        }
        if let Some(v) = env("PULSEDASH_DOCKER_ALL") {
            self.docker_all = parse_flag("PULSEDASH_DOCKER_ALL", &v)?;
        }
        Ok(())
    }
}

fn usage(prog: &str) -> String {
    format!(
        "Usage: {prog} [--host ADDR] [--port PORT|-p PORT] [--refresh-ms MS]\n\
         Environment: PULSEDASH_HOST, PULSEDASH_PORT, PULSEDASH_REFRESH_MS, PULSEDASH_HEARTBEAT_MS,\n\
         PULSEDASH_SOURCE_TIMEOUT_MS, PULSEDASH_NET_TIMEOUT_MS, PULSEDASH_HISTORY_LEN, PULSEDASH_RETRY_MS,\n\
         PULSEDASH_CLIENT_BUFFER, PULSEDASH_MAX_LAGGED, PULSEDASH_FORGET_AFTER, PULSEDASH_MOUNTS, PULSEDASH_NET_FILTER,\n\
         PULSEDASH_DOCKER_BIN, PULSEDASH_DOCKER_ALL"
    )
}

fn parse_num<T: std::str::FromStr>(key: &'static str, v: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    v.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
        key,
        value: v.to_string(),
        reason: e.to_string(),
    })
}

fn parse_positive<T>(key: &'static str, v: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr + Default + PartialEq,
    T::Err: std::fmt::Display,
{
    let n: T = parse_num(key, v)?;
    if n == T::default() {
        return Err(ConfigError::InvalidValue {
            key,
            value: v.to_string(),
            reason: "must be greater than zero".into(),
        });
    }
    Ok(n)
}

fn parse_millis(key: &'static str, v: &str) -> Result<Duration, ConfigError> {
    parse_positive::<u64>(key, v).map(Duration::from_millis)
}

fn parse_flag(key: &'static str, v: &str) -> Result<bool, ConfigError> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: v.to_string(),
            reason: "expected `1`/`true` or `0`/`false`".into(),
        }),
    }
}

fn parse_host(key: &'static str, v: &str) -> Result<IpAddr, ConfigError> {
    parse_num(key, v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn run(args: &[&str], env: &[(&str, &str)]) -> Result<CliAction, ConfigError> {
        let env: HashMap<String, String> = env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let args = std::iter::once("pulsedash_agent".to_string())
            .chain(args.iter().map(|s| s.to_string()));
        AgentConfig::parse(args, |k| env.get(k).cloned())
    }

    fn cfg(args: &[&str], env: &[(&str, &str)]) -> AgentConfig {
        match run(args, env).expect("parse") {
            CliAction::Run(c) => c,
            CliAction::Help(_) => panic!("unexpected help"),
        }
    }

    #[test]
    fn defaults_match_documented_values() {
        let c = cfg(&[], &[]);
        assert_eq!(c.port, 8080);
        assert_eq!(c.refresh, Duration::from_millis(2000));
        assert_eq!(c.heartbeat, Duration::from_millis(15000));
        assert_eq!(c.source_timeout, Duration::from_millis(3000));
        assert_eq!(c.net_timeout, Duration::from_millis(3000));
        assert_eq!(c.history_len, 120);
        assert_eq!(c.forget_after, 1800);
        assert_eq!(c.net_filter, NetFilter::Active);
        assert_eq!(c.docker_bin, "docker");
    }

    #[test]
    fn port_long_short_and_assign() {
        assert_eq!(cfg(&["--port", "9001"], &[]).port, 9001);
        assert_eq!(cfg(&["-p", "9002"], &[]).port, 9002);
        assert_eq!(cfg(&["--port=9003"], &[]).port, 9003);
    }

    #[test]
    fn flags_override_env() {
        let c = cfg(&["--refresh-ms", "500"], &[("PULSEDASH_REFRESH_MS", "1000")]);
        assert_eq!(c.refresh, Duration::from_millis(500));
    }

    #[test]
    fn env_lists_and_filters() {
        let c = cfg(
            &[],
            &[
                ("PULSEDASH_MOUNTS", "/data, /srv ,,"),
                ("PULSEDASH_NET_FILTER", "ALL"),
                ("PULSEDASH_DOCKER_ALL", "1"),
            ],
        );
        assert_eq!(c.mounts_of_interest, vec!["/data", "/srv"]);
        assert_eq!(c.net_filter, NetFilter::All);
        assert!(c.docker_all);
    }

    #[test]
    fn docker_all_accepts_words_and_rejects_garbage() {
        assert!(!cfg(&[], &[("PULSEDASH_DOCKER_ALL", "false")]).docker_all);
        assert!(!cfg(&[], &[("PULSEDASH_DOCKER_ALL", "0")]).docker_all);
        assert!(cfg(&[], &[("PULSEDASH_DOCKER_ALL", "True")]).docker_all);
        let err = run(&[], &[("PULSEDASH_DOCKER_ALL", "off")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "PULSEDASH_DOCKER_ALL",
                ..
            }
        ));
    }

    #[test]
    fn unparsable_interval_is_rejected() {
        let err = run(&[], &[("PULSEDASH_REFRESH_MS", "fast")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "PULSEDASH_REFRESH_MS",
                ..
            }
        ));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(run(&[], &[("PULSEDASH_HISTORY_LEN", "0")]).is_err());
        assert!(run(&[], &[("PULSEDASH_HEARTBEAT_MS", "0")]).is_err());
        assert!(run(&[], &[("PULSEDASH_FORGET_AFTER", "0")]).is_err());
        assert_eq!(cfg(&[], &[("PULSEDASH_FORGET_AFTER", "30")]).forget_after, 30);
    }

    #[test]
    fn missing_flag_value_and_unknown_flags() {
        assert_eq!(
            run(&["--port"], &[]).unwrap_err(),
            ConfigError::MissingValue("--port".into())
        );
        assert!(matches!(
            run(&["--bogus"], &[]).unwrap_err(),
            ConfigError::UnexpectedArgument(_)
        ));
    }

    #[test]
    fn help_returns_usage() {
        match run(&["-h"], &[]).expect("parse") {
            CliAction::Help(text) => assert!(text.contains("--port")),
            CliAction::Run(_) => panic!("expected help"),
        }
    }
}

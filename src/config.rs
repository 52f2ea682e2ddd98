//! Runtime configuration: command line, optional `.env` file, environment.
//!
//! Values already present in the process environment win over the `.env`
//! file; command-line flags win over both.

use crate::services::sync::{
    DEFAULT_POLL_INTERVAL, DEFAULT_POST_WRITE_REFRESH, DEFAULT_RETRY_BUDGET, DEFAULT_WRITE_DEBOUNCE, SyncSettings,
};
use core::fmt;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_SNAPSHOT_FILE: &str = "virtual-stat.json";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliArgs {
    pub env_file: Option<PathBuf>,
    pub demo: bool,
    pub stat: Option<String>,
}

impl CliArgs {
    pub fn parse(args: impl IntoIterator<Item = String>) -> Result<Self, String> {
        let mut cli = CliArgs::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) if flag.starts_with("--") => (flag.to_string(), Some(value.to_string())),
                _ => (arg.clone(), None),
            };
            match flag.as_str() {
                "--env-file" => {
                    if cli.env_file.is_some() {
                        return Err("`--env-file` provided more than once".to_string());
                    }
                    let value = flag_value(&flag, inline, &mut args)?;
                    cli.env_file = Some(PathBuf::from(value));
                }
                "--stat" => cli.stat = Some(flag_value(&flag, inline, &mut args)?),
                "--demo" if inline.is_none() => cli.demo = true,
                "--" => break,
                other => return Err(format!("unrecognised argument: {}", other)),
            }
        }
        Ok(cli)
    }
}

fn flag_value(flag: &str, inline: Option<String>, rest: &mut impl Iterator<Item = String>) -> Result<String, String> {
    match inline.or_else(|| rest.next()) {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(format!("`{}` requires a value", flag)),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayConfig {
    Eweb {
        url: String,
        username: String,
        password: String,
        request_timeout: Duration,
    },
    Demo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub gateway: GatewayConfig,
    /// Stat to fetch at start. Without it the snapshot is the only source.
    pub stat_name: Option<String>,
    pub sync: SyncSettings,
    pub snapshot_file: PathBuf,
}

impl Config {
    pub fn from_env(cli: &CliArgs) -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok(), cli)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>, cli: &CliArgs) -> Result<Self, String> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let demo = cli.demo || var("DEMO_MODE").is_some_and(|v| matches!(v.as_str(), "1" | "true" | "TRUE"));
        let gateway = if demo {
            GatewayConfig::Demo
        } else {
            let require = |key: &str| var(key).ok_or_else(|| format!("Missing {}: set it or run with --demo", key));
            GatewayConfig::Eweb {
                url: require("EWEB_URL")?,
                username: require("EWEB_USERNAME")?,
                // passwords may legitimately contain surrounding spaces
                password: lookup("EWEB_PASSWORD").ok_or("Missing EWEB_PASSWORD: set it or run with --demo")?,
                request_timeout: millis(&var, "REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT)?,
            }
        };

        let retry_budget = match var("RETRY_BUDGET") {
            Some(s) => s.parse::<u32>().map_err(|_| "RETRY_BUDGET must be a non-negative integer".to_string())?,
            None => DEFAULT_RETRY_BUDGET,
        };

        Ok(Config {
            gateway,
            stat_name: cli.stat.clone().or_else(|| var("STAT_NAME")),
            sync: SyncSettings {
                poll_interval: millis(&var, "POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL)?,
                write_debounce: millis(&var, "WRITE_DEBOUNCE_MS", DEFAULT_WRITE_DEBOUNCE)?,
                post_write_refresh: millis(&var, "POST_WRITE_REFRESH_MS", DEFAULT_POST_WRITE_REFRESH)?,
                retry_budget,
            },
            snapshot_file: var("SNAPSHOT_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_FILE)),
        })
    }
}

fn millis(var: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Result<Duration, String> {
    match var(key) {
        Some(s) => s
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| format!("{} must be a whole number of milliseconds", key)),
        None => Ok(default),
    }
}

#[derive(Debug)]
pub enum EnvFileError {
    Io { path: PathBuf, source: std::io::Error },
    Syntax { path: PathBuf, line: usize, message: String },
}

impl Display for EnvFileError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            EnvFileError::Io { path, source } => write!(f, "failed to read {}: {}", path.display(), source),
            EnvFileError::Syntax { path, line, message } => write!(f, "{}:{}: {}", path.display(), line, message),
        }
    }
}

impl std::error::Error for EnvFileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EnvFileError::Io { source, .. } => Some(source),
            EnvFileError::Syntax { .. } => None,
        }
    }
}

/// Read `KEY=value` assignments from a dotenv-style file.
pub fn read_env_file(path: &Path) -> Result<Vec<(String, String)>, EnvFileError> {
    let body = fs::read_to_string(path).map_err(|source| EnvFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut out = Vec::new();
    for (index, line) in body.lines().enumerate() {
        let parsed = parse_line(line).map_err(|message| EnvFileError::Syntax {
            path: path.to_path_buf(),
            line: index + 1,
            message,
        })?;
        out.extend(parsed);
    }
    Ok(out)
}

/// Apply an env file to the process environment without overriding
/// variables that are already set. Returns the number of variables applied.
pub fn apply_env_file(path: &Path) -> Result<usize, EnvFileError> {
    let mut applied = 0;
    for (key, value) in read_env_file(path)? {
        if std::env::var_os(&key).is_none() {
            // Called from main before any other thread exists.
            unsafe {
                std::env::set_var(key, value);
            }
            applied += 1;
        }
    }
    Ok(applied)
}

fn parse_line(line: &str) -> Result<Option<(String, String)>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let line = line.strip_prefix("export ").map(str::trim_start).unwrap_or(line);
    let (key, raw) = line.split_once('=').ok_or("missing '=' in assignment")?;
    let key = key.trim();
    if key.is_empty() {
        return Err("variable name cannot be empty".to_string());
    }
    if key.contains(char::is_whitespace) {
        return Err(format!("variable name contains whitespace: {}", key));
    }
    Ok(Some((key.to_string(), parse_value(raw.trim())?)))
}

fn parse_value(raw: &str) -> Result<String, String> {
    let quote = match raw.chars().next() {
        Some(q @ ('"' | '\'')) => q,
        _ => return Ok(raw.split('#').next().unwrap_or_default().trim_end().to_string()),
    };

    let mut value = String::new();
    let mut chars = raw[1..].chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' if quote == '"' => match chars.next() {
                Some('n') => value.push('\n'),
                Some('t') => value.push('\t'),
                Some('r') => value.push('\r'),
                Some(other) => value.push(other),
                None => return Err("unterminated escape sequence".to_string()),
            },
            c if c == quote => {
                let rest = chars.as_str().trim();
                return if rest.is_empty() || rest.starts_with('#') {
                    Ok(value)
                } else {
                    Err(format!("unexpected characters after closing {} quote", quote))
                };
            }
            c => value.push(c),
        }
    }
    Err(format!("unterminated {}-quoted value", quote))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn args(list: &[&str]) -> Result<CliArgs, String> {
        CliArgs::parse(list.iter().map(|s| s.to_string()))
    }

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn parses_cli_flags() {
        let cli = args(&["--env-file", "site.env", "--stat=vs_Office_12", "--demo"]).expect("args");
        assert_eq!(cli.env_file, Some(PathBuf::from("site.env")));
        assert_eq!(cli.stat.as_deref(), Some("vs_Office_12"));
        assert!(cli.demo);

        assert!(args(&["--env-file"]).is_err());
        assert!(args(&["--env-file=a", "--env-file=b"]).is_err());
        assert!(args(&["--verbose"]).is_err());
        assert_eq!(args(&["--", "--whatever"]).expect("stop"), CliArgs::default());
    }

    #[test]
    fn eweb_config_with_defaults() {
        let cfg = Config::from_lookup(
            lookup(&[("EWEB_URL", "10.0.0.5/enteliweb"), ("EWEB_USERNAME", "op"), ("EWEB_PASSWORD", " pw ")]),
            &CliArgs::default(),
        )
        .expect("config");
        assert_eq!(
            cfg.gateway,
            GatewayConfig::Eweb {
                url: "10.0.0.5/enteliweb".to_string(),
                username: "op".to_string(),
                password: " pw ".to_string(),
                request_timeout: DEFAULT_REQUEST_TIMEOUT,
            }
        );
        assert_eq!(cfg.sync, SyncSettings::default());
        assert_eq!(cfg.snapshot_file, PathBuf::from(DEFAULT_SNAPSHOT_FILE));
        assert_eq!(cfg.stat_name, None);
    }

    #[test]
    fn missing_credentials_need_demo_mode() {
        let err = Config::from_lookup(lookup(&[("EWEB_URL", "host")]), &CliArgs::default()).expect_err("missing");
        assert!(err.contains("EWEB_USERNAME"), "{}", err);

        let cfg = Config::from_lookup(lookup(&[("DEMO_MODE", "true")]), &CliArgs::default()).expect("demo");
        assert_eq!(cfg.gateway, GatewayConfig::Demo);
    }

    #[test]
    fn tunables_and_cli_overrides() {
        let cli = CliArgs {
            demo: true,
            stat: Some("vs_cli".to_string()),
            ..Default::default()
        };
        let cfg = Config::from_lookup(
            lookup(&[
                ("STAT_NAME", "vs_env"),
                ("POLL_INTERVAL_MS", "2500"),
                ("WRITE_DEBOUNCE_MS", "250"),
                ("POST_WRITE_REFRESH_MS", "4000"),
                ("RETRY_BUDGET", "5"),
                ("SNAPSHOT_FILE", "/var/lib/stat.json"),
            ]),
            &cli,
        )
        .expect("config");
        assert_eq!(cfg.stat_name.as_deref(), Some("vs_cli"));
        assert_eq!(cfg.sync.poll_interval, Duration::from_millis(2500));
        assert_eq!(cfg.sync.write_debounce, Duration::from_millis(250));
        assert_eq!(cfg.sync.post_write_refresh, Duration::from_secs(4));
        assert_eq!(cfg.sync.retry_budget, 5);
        assert_eq!(cfg.snapshot_file, PathBuf::from("/var/lib/stat.json"));

        let err = Config::from_lookup(lookup(&[("POLL_INTERVAL_MS", "soon")]), &cli).expect_err("bad number");
        assert!(err.contains("POLL_INTERVAL_MS"));
    }

    #[test]
    fn env_lines() {
        assert_eq!(parse_line("# comment").expect("ok"), None);
        assert_eq!(parse_line("   ").expect("ok"), None);
        assert_eq!(
            parse_line("export EWEB_URL=http://bms # site").expect("ok"),
            Some(("EWEB_URL".to_string(), "http://bms".to_string()))
        );
        assert_eq!(
            parse_line(r#"EWEB_PASSWORD="p\"w #1" # note"#).expect("ok"),
            Some(("EWEB_PASSWORD".to_string(), "p\"w #1".to_string()))
        );
        assert_eq!(
            parse_line("STAT_NAME='vs_a b'").expect("ok"),
            Some(("STAT_NAME".to_string(), "vs_a b".to_string()))
        );
        assert_eq!(parse_line("EMPTY=").expect("ok"), Some(("EMPTY".to_string(), String::new())));
        assert!(parse_line("NOEQUALS").is_err());
        assert!(parse_line("BAD KEY=1").is_err());
        assert!(parse_line("OPEN=\"abc").is_err());
        assert!(parse_line("TRAIL='abc' x").is_err());
    }

    #[test]
    fn env_file_reports_line_numbers() {
        let path = std::env::temp_dir().join(format!("virtual-stat-env-{}", std::process::id()));
        fs::write(&path, "A=1\n\nB\n").expect("write");
        let err = read_env_file(&path).expect_err("syntax");
        assert!(matches!(err, EnvFileError::Syntax { line: 3, .. }), "{}", err);
        fs::write(&path, "A=1\nB='two'\n").expect("write");
        assert_eq!(
            read_env_file(&path).expect("parse"),
            vec![("A".to_string(), "1".to_string()), ("B".to_string(), "two".to_string())]
        );
        let _ = fs::remove_file(&path);
    }
}

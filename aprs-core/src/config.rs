//! Configuration file management for aprs-hub.
//!
//! Reads/writes `~/.aprs-hub/config.yaml` with server bind/database/token
//! settings plus feeder and viewer connection defaults. Command-line
//! flags override anything read here.

use std::path::PathBuf;

/// Full configuration structure.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub feeder: FeederConfig,
    pub viewer: ViewerConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub database: String,
    pub token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FeederConfig {
    pub server: String,
    pub port: u16,
    pub callsign: String,
    pub passcode: String,
    pub filter: Option<String>,
    pub endpoint: String,
}

#[derive(Debug, Clone)]
pub struct ViewerConfig {
    pub server: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub radius_cells: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                bind: "127.0.0.1:8150".into(),
                database: "data/aprs.db".into(),
                token: None,
            },
            feeder: FeederConfig {
                server: "rotate.aprs2.net".into(),
                port: 14580,
                callsign: "N0CALL".into(),
                passcode: "-1".into(),
                filter: None,
                endpoint: "http://127.0.0.1:8150".into(),
            },
            viewer: ViewerConfig {
                server: "http://127.0.0.1:8150".into(),
                latitude: None,
                longitude: None,
                radius_cells: 1,
            },
        }
    }
}

/// Get the config directory path (`~/.aprs-hub/`).
pub fn config_dir() -> PathBuf {
    dirs_home().join(".aprs-hub")
}

/// Get the config file path.
pub fn config_file() -> PathBuf {
    config_dir().join("config.yaml")
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load config from `~/.aprs-hub/config.yaml`.
///
/// Returns default config if file doesn't exist.
pub fn load_config() -> Config {
    let path = config_file();
    if !path.exists() {
        return Config::default();
    }

    let text = match std::fs::read_to_string(&path) {
        Ok(t) => t,
        Err(_) => return Config::default(),
    };

    parse_config(&text).unwrap_or_default()
}

/// Save config to `~/.aprs-hub/config.yaml`.
pub fn save_config(config: &Config) -> std::io::Result<PathBuf> {
    let dir = config_dir();
    std::fs::create_dir_all(&dir)?;

    let path = config_file();
    let text = serialize_config(config);
    std::fs::write(&path, text)?;

    Ok(path)
}

/// Parse simple YAML-like config text.
fn parse_config(text: &str) -> Option<Config> {
    let mut config = Config::default();
    let mut current_section: Option<String> = None;

    for line in text.lines() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }

        let is_indented = line.starts_with("  ") || line.starts_with('\t');

        if let Some((key, val)) = stripped.split_once(':') {
            let key = key.trim();
            let val = val.trim();

            if !is_indented {
                current_section = if val.is_empty() {
                    Some(key.to_string())
                } else {
                    None
                };
            } else if let Some(ref section) = current_section {
                match section.as_str() {
                    "server" => match key {
                        "bind" => {
                            if let Some(v) = parse_string_value(val) {
                                config.server.bind = v;
                            }
                        }
                        "database" => {
                            if let Some(v) = parse_string_value(val) {
                                config.server.database = v;
                            }
                        }
                        "token" => config.server.token = parse_string_value(val),
                        _ => {}
                    },
                    "feeder" => match key {
                        "server" => {
                            if let Some(v) = parse_string_value(val) {
                                config.feeder.server = v;
                            }
                        }
                        "port" => {
                            if let Ok(v) = val.parse::<u16>() {
                                config.feeder.port = v;
                            }
                        }
                        "callsign" => {
                            if let Some(v) = parse_string_value(val) {
                                config.feeder.callsign = v;
                            }
                        }
                        "passcode" => {
                            if let Some(v) = parse_string_value(val) {
                                config.feeder.passcode = v;
                            }
                        }
                        "filter" => config.feeder.filter = parse_string_value(val),
                        "endpoint" => {
                            if let Some(v) = parse_string_value(val) {
                                config.feeder.endpoint = v;
                            }
                        }
                        _ => {}
                    },
                    "viewer" => match key {
                        "server" => {
                            if let Some(v) = parse_string_value(val) {
                                config.viewer.server = v;
                            }
                        }
                        "latitude" => config.viewer.latitude = parse_float_value(val),
                        "longitude" => config.viewer.longitude = parse_float_value(val),
                        "radius_cells" => {
                            if let Ok(v) = val.parse::<u32>() {
                                config.viewer.radius_cells = v;
                            }
                        }
                        _ => {}
                    },
                    _ => {}
                }
            }
        }
    }

    Some(config)
}

fn parse_string_value(val: &str) -> Option<String> {
    if val == "null" || val == "~" || val.is_empty() {
        return None;
    }
    // Strip quotes
    if (val.starts_with('"') && val.ends_with('"'))
        || (val.starts_with('\'') && val.ends_with('\''))
    {
        return Some(val[1..val.len() - 1].to_string());
    }
    Some(val.to_string())
}

fn parse_float_value(val: &str) -> Option<f64> {
    if val == "null" || val == "~" || val.is_empty() {
        return None;
    }
    val.parse().ok()
}

/// Serialize config to YAML-like text.
fn serialize_config(config: &Config) -> String {
    let mut lines = vec!["# aprs-hub configuration".to_string(), String::new()];

    lines.push("server:".into());
    lines.push(format!("  bind: \"{}\"", config.server.bind));
    lines.push(format!("  database: \"{}\"", config.server.database));
    match &config.server.token {
        Some(token) => lines.push(format!("  token: \"{token}\"")),
        None => lines.push("  token: null".into()),
    }
    lines.push(String::new());

    lines.push("feeder:".into());
    lines.push(format!("  server: \"{}\"", config.feeder.server));
    lines.push(format!("  port: {}", config.feeder.port));
    lines.push(format!("  callsign: \"{}\"", config.feeder.callsign));
    lines.push(format!("  passcode: \"{}\"", config.feeder.passcode));
    match &config.feeder.filter {
        Some(filter) => lines.push(format!("  filter: \"{filter}\"")),
        None => lines.push("  filter: null".into()),
    }
    lines.push(format!("  endpoint: \"{}\"", config.feeder.endpoint));
    lines.push(String::new());

    lines.push("viewer:".into());
    lines.push(format!("  server: \"{}\"", config.viewer.server));
    match config.viewer.latitude {
        Some(v) => lines.push(format!("  latitude: {v}")),
        None => lines.push("  latitude: null".into()),
    }
    match config.viewer.longitude {
        Some(v) => lines.push(format!("  longitude: {v}")),
        None => lines.push("  longitude: null".into()),
    }
    lines.push(format!("  radius_cells: {}", config.viewer.radius_cells));

    lines.join("\n") + "\n"
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

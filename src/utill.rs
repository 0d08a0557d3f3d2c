//! Various utility and helper functions used across the coordinator, observer
//! and admin RPC.

use std::{
    collections::HashMap,
    io::{BufReader, Read, Write},
    net::TcpStream,
    path::{Path, PathBuf},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::NetError;

/// Interval between coordinator/observer loop ticks.
#[cfg(feature = "integration-test")]
pub const HEART_BEAT_INTERVAL: Duration = Duration::from_millis(100);
/// Interval between coordinator/observer loop ticks.
#[cfg(not(feature = "integration-test"))]
pub const HEART_BEAT_INTERVAL: Duration = Duration::from_millis(500);

/// Funding outputs below this many sats get a dust warning in the logs.
pub const DUST_WARN_SATS: u64 = 1000;

/// Terminal swaps and their processed txids are evicted after this long.
pub const RETIREMENT_SECS: u64 = 24 * 60 * 60;

/// Current time as seconds since the UNIX epoch.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Returns the default coordinator data directory (`~/.assetswap/coordinator`).
pub fn get_coordinator_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".assetswap").join("coordinator")
}

/// Initializes the global logger.
///
/// Respects `RUST_LOG` when set, otherwise uses the provided filter level.
pub fn setup_logger(filter: log::LevelFilter) {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(filter.as_str()),
    );
    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {} - {}",
                buf.timestamp_seconds(),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .try_init()
        .ok();
}

/// Parses a flat TOML file into a key → value map.
///
/// Section headers are skipped; values keep only the text between optional
/// surrounding quotes. Unparseable lines are ignored so a stale config file
/// never prevents startup.
pub fn parse_toml(path: &Path) -> std::io::Result<HashMap<String, String>> {
    let content = std::fs::read_to_string(path)?;
    let mut map = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('[') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim().to_string();
            let value = value.trim().trim_matches('"').to_string();
            map.insert(key, value);
        }
    }
    Ok(map)
}

/// Parses a config field from the map, falling back to `default` when the key
/// is missing or the value fails to parse.
pub fn parse_field<T: std::str::FromStr>(value: Option<&String>, default: T) -> T {
    value
        .and_then(|value| value.parse::<T>().ok())
        .unwrap_or(default)
}

/// Reads a length-prefixed CBOR message from the stream.
pub fn read_message(reader: &mut impl Read) -> Result<Vec<u8>, NetError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let length = u32::from_be_bytes(len_buf) as usize;
    if length == 0 {
        return Err(NetError::ReachedEOF);
    }
    let mut buffer = vec![0u8; length];
    reader.read_exact(&mut buffer)?;
    Ok(buffer)
}

/// Serializes the message as CBOR and writes it length-prefixed to the stream.
pub fn send_message(socket: &mut TcpStream, message: &impl Serialize) -> Result<(), NetError> {
    let msg_bytes = serde_cbor::ser::to_vec(message)?;
    let msg_len = (msg_bytes.len() as u32).to_be_bytes();
    let mut to_send = Vec::with_capacity(msg_bytes.len() + msg_len.len());
    to_send.extend(msg_len);
    to_send.extend(msg_bytes);
    socket.write_all(&to_send)?;
    socket.flush()?;
    Ok(())
}

/// Reads one CBOR message from the stream and deserializes it.
pub fn recv_message<T: DeserializeOwned>(socket: &TcpStream) -> Result<T, NetError> {
    let mut reader = BufReader::new(socket);
    let bytes = read_message(&mut reader)?;
    Ok(serde_cbor::from_slice(&bytes)?)
}

/// Parses a `user:password` pair from a CLI argument.
pub fn parse_proxy_auth(s: &str) -> Result<(String, String), String> {
    let parts: Vec<_> = s.split(':').collect();
    if parts.len() != 2 {
        return Err("Invalid format, expected user:password".to_string());
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}

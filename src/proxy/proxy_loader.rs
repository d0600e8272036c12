use std::io::ErrorKind;
use std::path::Path;

use tracing::debug;
use tracing::warn;

use super::ProxyEndpoint;
use crate::Error;
use crate::RequesterIdentity;
use crate::Result;

/// Reads proxy endpoints from `path`.
///
/// One proxy per line as `address[;email[;tool_id]]`. Blank lines and lines
/// starting with `#` are ignored, addresses without a scheme are treated as
/// `http://`. A missing file is not an error: the caller gets an empty list
/// and falls back to direct connections.
pub fn load_proxy_file(path: &Path) -> Result<Vec<ProxyEndpoint>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(
                "proxy file {} not found, connecting directly",
                path.display()
            );
            return Ok(Vec::new());
        }
        Err(e) => {
            return Err(Error::ProxyFile {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        }
    };

    let mut endpoints = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let endpoint =
            parse_proxy_line(endpoints.len(), line).map_err(|reason| Error::ProxyFile {
                path: path.to_path_buf(),
                reason: format!("line {}: {}", line_no + 1, reason),
            })?;
        endpoints.push(endpoint);
    }

    debug!("loaded {} proxies from {}", endpoints.len(), path.display());
    Ok(endpoints)
}

pub(crate) fn parse_proxy_line(
    id: usize,
    line: &str,
) -> std::result::Result<ProxyEndpoint, String> {
    let mut fields = line.split(';').map(str::trim);

    let raw_address = fields.next().unwrap_or_default();
    if raw_address.is_empty() {
        return Err("missing proxy address".into());
    }
    let address = if raw_address.contains("://") {
        raw_address.to_string()
    } else {
        format!("http://{raw_address}")
    };
    let parsed = url::Url::parse(&address).map_err(|e| format!("invalid proxy address {raw_address}: {e}"))?;
    if parsed.host_str().is_none() {
        return Err(format!("proxy address {raw_address} has no host"));
    }

    let email = fields.next().filter(|v| !v.is_empty()).map(str::to_string);
    let tool_id = fields.next().filter(|v| !v.is_empty()).map(str::to_string);
    let identity = RequesterIdentity { tool_id, email };

    Ok(ProxyEndpoint {
        id,
        address,
        identity: (!identity.is_empty()).then_some(identity),
    })
}

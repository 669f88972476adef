use super::tunnel::TunnelSpec;

/// Parse a local TCP forward specification (`ssh -L` syntax).
///
/// Format: `[bind_address:]port:host:hostport`. An empty or `*` bind address
/// listens on every interface; IPv6 literals must be bracketed.
pub fn parse_local_tcp(spec: &str) -> crate::SshResult<TunnelSpec> {
    let fields = split_colon_parts(spec);
    let (bind_address, rest) = match fields.len() {
        4 => (Some(bind_host(&fields[0])?), &fields[1..]),
        3 => (None, &fields[..]),
        _ => {
            return Err(crate::SshCoreError::invalid_forward(
                "local TCP",
                "spec must be [bind_address:]port:host:hostport",
            ));
        }
    };
    Ok(TunnelSpec {
        bind_address,
        bind_port: parse_port(&rest[0])?,
        target_host: host_or_err("local TCP", &rest[1])?,
        target_port: parse_port(&rest[2])?,
    })
}

/// Parse `host[:port]`, accepting bracketed IPv6 literals.
///
/// The port falls back to `default_port` when omitted.
pub fn parse_host_port(input: &str, default_port: u16) -> crate::SshResult<(String, u16)> {
    let fields = split_colon_parts(input);
    match fields.as_slice() {
        [host] => Ok((host_or_err("address", host)?, default_port)),
        [host, port] => Ok((host_or_err("address", host)?, parse_port(port)?)),
        _ => Err(crate::SshCoreError::invalid_forward(
            "address",
            "expected host[:port]; wrap IPv6 literals in brackets",
        )),
    }
}

const WILDCARD_BIND: &str = "0.0.0.0";

fn bind_host(value: &str) -> crate::SshResult<String> {
    match value.trim() {
        "" | "*" => Ok(WILDCARD_BIND.to_string()),
        other => host_or_err("local TCP", other),
    }
}

fn host_or_err(kind: &'static str, value: &str) -> crate::SshResult<String> {
    match normalize_host(value) {
        Some(host) if host.is_empty() => Err(crate::SshCoreError::invalid_forward(kind, "host must not be empty")),
        Some(host) => Ok(host),
        None => Err(crate::SshCoreError::invalid_forward(
            kind,
            format!("`{}` is not a valid host; wrap IPv6 literals in brackets", value.trim()),
        )),
    }
}

fn parse_port(value: &str) -> crate::SshResult<u16> {
    value
        .trim()
        .parse::<u16>()
        .map_err(|_| crate::SshCoreError::InvalidPort(value.to_string()))
}

/// Strips IPv6 brackets. `None` means the value is malformed: a colon or a
/// stray bracket outside of one balanced `[...]` pair.
fn normalize_host(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if let Some(inner) = trimmed.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
        return (!inner.contains(['[', ']'])).then(|| inner.to_string());
    }
    (!trimmed.contains([':', '[', ']'])).then(|| trimmed.to_string())
}

/// Splits on colons outside brackets. Empty fields are kept so that
/// `fe80::1` yields three fields rather than two.
fn split_colon_parts(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut bracket_depth = 0usize;
    for ch in input.chars() {
        match ch {
            ':' if bracket_depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            '[' => {
                bracket_depth += 1;
                current.push(ch);
            }
            ']' => {
                bracket_depth = bracket_depth.saturating_sub(1);
                current.push(ch);
            }
            _ => current.push(ch),
        }
    }
    parts.push(current.trim().to_string());
    parts
}

#[cfg(test)]
#[path = "parsing_tests.rs"]
mod tests;

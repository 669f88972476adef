//! Unit tests for forwarding spec parsing.

use super::*;

#[test]
fn parses_local_forward_with_bind_host() {
    let spec = parse_local_tcp("localhost:1600:localhost:1500").unwrap();
    assert_eq!(spec.bind_address.as_deref(), Some("localhost"));
    assert_eq!(spec.bind_port, 1600);
    assert_eq!(spec.target_host, "localhost");
    assert_eq!(spec.target_port, 1500);
}

#[test]
fn parses_local_forward_without_bind_host() {
    let spec = parse_local_tcp("2222:server:22").unwrap();
    assert_eq!(spec.bind_address, None);
    assert_eq!(spec.bind_port, 2222);
    assert_eq!(spec.target_host, "server");
    assert_eq!(spec.target_port, 22);
}

#[test]
fn parses_bracketed_ipv6_hosts() {
    let spec = parse_local_tcp("[::1]:8080:[fd00::2]:80").unwrap();
    assert_eq!(spec.bind_address.as_deref(), Some("::1"));
    assert_eq!(spec.target_host, "fd00::2");
    assert_eq!(spec.target_port, 80);
}

#[test]
fn rejects_malformed_local_forward() {
    let err = parse_local_tcp("bad-spec").unwrap_err();
    assert!(err.to_string().contains("invalid local TCP forward spec"), "{err}");
    let err = parse_local_tcp("1600:host:notaport").unwrap_err();
    assert!(matches!(err, crate::SshCoreError::InvalidPort(_)), "{err:?}");
}

#[test]
fn host_port_falls_back_to_default() {
    assert_eq!(parse_host_port("example.com", 22).unwrap(), ("example.com".to_string(), 22));
    assert_eq!(parse_host_port("example.com:2200", 22).unwrap(), ("example.com".to_string(), 2200));
    assert_eq!(parse_host_port("[::1]:2222", 22).unwrap(), ("::1".to_string(), 2222));
    assert!(parse_host_port("a:b:c", 22).is_err());
}

#[test]
fn unbracketed_ipv6_hosts_are_rejected() {
    // Splitting used to collapse the empty field, reading these as host:port.
    for input in ["fe80::1", "::1", "fe80::1:2200"] {
        let err = parse_host_port(input, 22).unwrap_err();
        assert!(
            matches!(err, crate::SshCoreError::InvalidForwardSpec { .. }),
            "{input}: {err:?}"
        );
    }
    assert_eq!(parse_host_port("[fe80::1]", 22).unwrap(), ("fe80::1".to_string(), 22));
    assert!(parse_host_port("[::1", 22).is_err());
    assert!(parse_host_port("", 22).is_err());
    assert!(matches!(
        parse_host_port("host:", 22).unwrap_err(),
        crate::SshCoreError::InvalidPort(_)
    ));
}

#[test]
fn empty_bind_field_means_every_interface() {
    let spec = parse_local_tcp(":1600:host:80").unwrap();
    assert_eq!(spec.bind_address.as_deref(), Some("0.0.0.0"));
    assert_eq!(spec.bind_port, 1600);
    assert_eq!(spec.target_host, "host");
    assert_eq!(spec.target_port, 80);

    let spec = parse_local_tcp("*:1600:host:80").unwrap();
    assert_eq!(spec.bind_address.as_deref(), Some("0.0.0.0"));
}

#[test]
fn empty_or_unbracketed_fields_in_local_forward_are_rejected() {
    let err = parse_local_tcp("1600::80").unwrap_err();
    assert!(err.to_string().contains("host must not be empty"), "{err}");
    assert!(parse_local_tcp("::1:1600:host:80").is_err());
    assert!(parse_local_tcp("1600:fd00::2:80").is_err());
    assert!(parse_local_tcp("1600:[fd00::2:80").is_err());
}

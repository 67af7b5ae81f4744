//! Integration tests for metrics server configuration.

use tailcast_core::config::MetricsConfig;
use tailcast_daemon::metrics_server;

fn metrics_config(listen_addr: &str, port: u16, endpoint: &str) -> MetricsConfig {
    MetricsConfig {
        enabled: true,
        listen_addr: listen_addr.to_owned(),
        port,
        endpoint: endpoint.to_owned(),
    }
}

#[test]
fn test_scrape_addr_from_valid_config() {
    // Given: A valid metrics configuration
    let config = metrics_config("127.0.0.1", 19464, "/metrics");

    // When: Resolving the scrape address
    let addr = metrics_server::scrape_addr(&config).expect("address should resolve");

    // Then: It combines listen_addr and port
    assert_eq!(addr.to_string(), "127.0.0.1:19464");
}

#[test]
fn test_scrape_addr_rejects_invalid_ip() {
    let config = metrics_config("999.999.999.999", 9464, "/metrics");
    let err = metrics_server::scrape_addr(&config).expect_err("invalid IP must fail");
    assert!(err.to_string().contains("invalid metrics listen address"));
}

#[test]
fn test_scrape_addr_rejects_custom_endpoint() {
    let config = metrics_config("127.0.0.1", 9464, "/prometheus");
    let err = metrics_server::scrape_addr(&config).expect_err("custom endpoint must fail");
    assert!(err.to_string().contains("/prometheus"));
}

#[test]
fn test_install_fails_before_binding_on_bad_endpoint() {
    // Given: A config that fails validation
    let config = metrics_config("127.0.0.1", 9464, "/stats");

    // When: Installing
    let result = metrics_server::install_metrics_recorder(&config);

    // Then: No recorder is installed and an error is returned
    assert!(result.is_err());
}

#[cfg(test)]
mod tests {
    use crate::config::*;
    use clap::Parser;
    use std::time::Duration;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["kuisp"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let config = parse(&[]);
        assert_eq!(config.port, 80);
        assert_eq!(config.www, PathBuf::from("."));
        assert_eq!(config.www_prefix, "/");
        assert!(config.serve_www);
        assert!(config.services.is_empty());
        assert!(config.max_age.is_none());
        assert_eq!(config.access_log_format, AccessLogFormat::Combined);
        assert!(!config.tls_enabled());
    }

    #[test]
    fn test_config_validation_valid() {
        let config = parse(&[]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_repeatable_flags() {
        let config = parse(&[
            "-s",
            "/api/=http://api:8080",
            "--service",
            "/auth/=https://auth",
            "-c",
            "conf.tmpl=conf.json",
            "--ca-cert",
            "a.pem",
            "--ca-cert",
            "b.pem",
        ]);
        assert_eq!(
            config.services,
            vec!["/api/=http://api:8080", "/auth/=https://auth"]
        );
        assert_eq!(config.config_files, vec!["conf.tmpl=conf.json"]);
        assert_eq!(config.ca_certs.len(), 2);
    }

    #[test]
    fn test_serve_www_toggle() {
        assert!(parse(&["--serve-www"]).serve_www);
        let config = parse(&["--serve-www=false"]);
        assert!(!config.serve_www);
        assert_eq!(config.static_prefix(), None);
    }

    #[test]
    fn test_max_age_duration() {
        let config = parse(&["--max-age", "24h"]);
        let max_age: Duration = config.max_age.unwrap().into();
        assert_eq!(max_age, Duration::from_secs(86400));

        assert!(Config::try_parse_from(["kuisp", "--max-age", "soon"]).is_err());
    }

    #[test]
    fn test_config_validation_invalid_prefix() {
        let config = parse(&["--www-prefix", "static/"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_invalid_default_page() {
        assert!(parse(&["-d", "pages/default.html"]).validate().is_err());
        assert!(parse(&["-d", ""]).validate().is_err());
        assert!(parse(&["-d", "default.html"]).validate().is_ok());
        assert!(parse(&["-d", "/"]).validate().is_err());
    }

    #[test]
    fn test_default_page_leading_slash_is_dropped() {
        let config = parse(&["-d", "/index.html"]);
        assert!(config.validate().is_ok());
        assert_eq!(config.default_page_name(), Some("index.html"));

        assert_eq!(parse(&["-d", "app.html"]).default_page_name(), Some("app.html"));
        assert_eq!(parse(&[]).default_page_name(), None);
    }

    #[test]
    fn test_config_validation_lone_tls_file() {
        assert!(parse(&["--tls-cert", "cert.pem"]).validate().is_err());
        assert!(parse(&["--tls-key", "key.pem"]).validate().is_err());

        let config = parse(&["--tls-cert", "cert.pem", "--tls-key", "key.pem"]);
        assert!(config.validate().is_ok());
        assert!(config.tls_enabled());
    }

    #[test]
    fn test_listen_address_parsing() {
        let config = parse(&["--host", "127.0.0.1", "-p", "8080"]);
        assert_eq!(
            config.listen_address().unwrap(),
            "127.0.0.1:8080".parse::<SocketAddr>().unwrap()
        );

        let config = parse(&["--host", "::1", "-p", "8443"]);
        assert_eq!(
            config.listen_address().unwrap(),
            "[::1]:8443".parse::<SocketAddr>().unwrap()
        );

        let config = parse(&["--host", "not-an-address"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_access_log_format_values() {
        assert_eq!(
            parse(&["--access-log-format", "json"]).access_log_format,
            AccessLogFormat::Json
        );
        assert_eq!(
            parse(&["--access-log-format", "common"]).access_log_format,
            AccessLogFormat::Common
        );
    }
}

use super::ProxyConfig;

/// Parses the directive file format:
///
/// ```text
/// # comment
/// listen_port 12345;
/// cache_capacity 1000;
/// worker_threads 16;
/// event_log_path logs/proxy.log;
/// backlog 10;
/// ```
///
/// Every directive is `name value ;`. Unknown directives and missing
/// semicolons are errors so a typo cannot silently fall back to a default.
pub fn parse_config(text: &str) -> Result<ProxyConfig, String> {
    let mut cfg = ProxyConfig::default();

    for directive in tokenize(text) {
        let [name, value] = match directive.as_slice() {
            [n, v] => [n.as_str(), v.as_str()],
            [n] => return Err(format!("Directive '{n}' is missing a value")),
            [] => continue,
            other => {
                return Err(format!(
                    "Directive '{}' has too many tokens (missing semicolon?)",
                    other[0]
                ))
            }
        };

        match name {
            "listen_port" => cfg.listen_port = parse_number(name, value)?,
            "backlog" => cfg.backlog = parse_number(name, value)?,
            "cache_capacity" => cfg.cache_capacity = parse_number(name, value)?,
            "worker_threads" => cfg.worker_threads = parse_number(name, value)?,
            "event_log_path" => cfg.event_log_path = value.to_string(),
            other => return Err(format!("Unknown directive '{other}'")),
        }
    }

    Ok(cfg)
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("Directive '{name}' has a non-numeric value '{value}'"))
}

/// Splits the file into semicolon-terminated directives, each a token list.
/// `#` starts a comment running to end of line.
fn tokenize(text: &str) -> Vec<Vec<String>> {
    let mut directives = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut token = String::new();
    let mut in_comment = false;

    for c in text.chars() {
        if in_comment {
            if c == '\n' {
                in_comment = false;
            }
            continue;
        }
        match c {
            '#' => in_comment = true,
            ';' => {
                if !token.is_empty() {
                    current.push(std::mem::take(&mut token));
                }
                directives.push(std::mem::take(&mut current));
            }
            c if c.is_whitespace() => {
                if !token.is_empty() {
                    current.push(std::mem::take(&mut token));
                }
            }
            c => token.push(c),
        }
    }

    // A trailing directive without its closing semicolon is still delivered
    // rather than dropped.
    if !token.is_empty() {
        current.push(token);
    }
    if !current.is_empty() {
        directives.push(current);
    }

    directives
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Happy path ──────────────────────────────────────────────────────────

    #[test]
    fn test_valid_config_parses_successfully() {
        let text = r#"
            # proxy settings
            listen_port 8888;
            backlog 32;
            cache_capacity 50;
            worker_threads 4;
            event_log_path /tmp/events.log;
        "#;
        let cfg = parse_config(text).expect("config should parse");
        assert_eq!(cfg.listen_port, 8888);
        assert_eq!(cfg.backlog, 32);
        assert_eq!(cfg.cache_capacity, 50);
        assert_eq!(cfg.worker_threads, 4);
        assert_eq!(cfg.event_log_path, "/tmp/events.log");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let cfg = parse_config("").expect("empty config should parse");
        assert_eq!(cfg.listen_port, 12345);
        assert_eq!(cfg.backlog, 10);
        assert_eq!(cfg.cache_capacity, 1000);
    }

    #[test]
    fn test_comment_only_lines_are_ignored() {
        let cfg = parse_config("# just a comment\n# another\nlisten_port 9999;\n").unwrap();
        assert_eq!(cfg.listen_port, 9999);
    }

    // ── Errors ──────────────────────────────────────────────────────────────

    #[test]
    fn test_unknown_directive_is_rejected() {
        let err = parse_config("frobnicate 3;").unwrap_err();
        assert!(
            err.contains("frobnicate"),
            "Error should name the directive: {err}"
        );
    }

    #[test]
    fn test_missing_semicolon_is_rejected() {
        let err = parse_config("listen_port 8080\nbacklog 10;").unwrap_err();
        assert!(
            err.contains("listen_port"),
            "Error should mention the first directive: {err}"
        );
    }

    #[test]
    fn test_non_numeric_port_is_rejected() {
        let err = parse_config("listen_port eighty;").unwrap_err();
        assert!(err.contains("listen_port"), "{err}");
        assert!(err.contains("eighty"), "{err}");
    }
}

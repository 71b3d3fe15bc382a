//! Filename sanitization and content-type mapping for stored documents.

/// Makes a label safe as one path component.
///
/// Path separators, reserved characters and whitespace collapse into single
/// underscores; leading and trailing underscores are dropped. Dot-only names
/// (`.`, `..`) come back empty.
#[must_use]
pub fn sanitize_component(value: &str) -> String {
    let mut out = String::new();
    let mut prev_sep = false;
    for ch in value.chars() {
        let mapped = match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\'' => '_',
            c if c.is_whitespace() || c.is_control() => '_',
            c if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') => c,
            _ => '_',
        };
        if mapped == '_' {
            if !prev_sep {
                out.push('_');
                prev_sep = true;
            }
        } else {
            out.push(mapped);
            prev_sep = false;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.chars().all(|c| c == '.') {
        return String::new();
    }
    trimmed.to_string()
}

/// File extension (without dot) for a Content-Type header value.
#[must_use]
pub fn extension_from_content_type(content_type: &str) -> &'static str {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase();

    match mime.as_str() {
        "application/pdf" => "pdf",
        "text/html" => "html",
        "text/plain" => "txt",
        "application/xml" | "text/xml" => "xml",
        "application/json" => "json",
        "image/jpeg" => "jpg",
        "image/png" => "png",
        _ => "bin",
    }
}

/// Content-Type to serve for a stored extension.
#[must_use]
pub fn content_type_for_extension(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "pdf" => "application/pdf",
        "html" => "text/html; charset=utf-8",
        "txt" => "text/plain; charset=utf-8",
        "xml" => "application/xml",
        "json" => "application/json",
        "jpg" => "image/jpeg",
        "png" => "image/png",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_component_replaces_separators() {
        assert_eq!(sanitize_component("DLHC01/2024: list"), "DLHC01_2024_list");
        assert_eq!(sanitize_component("a\\b"), "a_b");
        assert_eq!(sanitize_component("  Court No. 3  "), "Court_No._3");
    }

    #[test]
    fn test_sanitize_component_rejects_traversal() {
        assert_eq!(sanitize_component(".."), "");
        assert_eq!(sanitize_component("../../etc"), ".._.._etc");
        assert!(!sanitize_component("../../etc").contains('/'));
    }

    #[test]
    fn test_extension_from_content_type() {
        assert_eq!(extension_from_content_type("application/pdf"), "pdf");
        assert_eq!(extension_from_content_type("text/html; charset=UTF-8"), "html");
        assert_eq!(extension_from_content_type("application/x-unknown"), "bin");
    }

    #[test]
    fn test_content_type_for_extension() {
        assert_eq!(content_type_for_extension("PDF"), "application/pdf");
        assert_eq!(content_type_for_extension("bin"), "application/octet-stream");
    }
}

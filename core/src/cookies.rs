//! `Set-Cookie` rewriting for cookies relayed to the browser.
//!
//! Upstream cookies can arrive as one string with several directives joined
//! by `" Secure, "`, an artifact of how the fetch layer folds repeated
//! headers. Both functions split that string back into directives.

const DIRECTIVE_SEPARATOR: &str = " Secure, ";
const ATTRIBUTE_SEPARATOR: &str = "; ";

/// Split `raw` into directives, each carrying the `Secure` attribute.
pub fn ensure_secure(raw: &str) -> Vec<String> {
    raw.split(DIRECTIVE_SEPARATOR)
        .map(str::trim)
        .filter(|directive| !directive.is_empty())
        .map(|directive| {
            if has_secure(directive) {
                directive.to_string()
            } else if directive.ends_with(';') {
                format!("{directive} Secure")
            } else {
                format!("{directive}; Secure")
            }
        })
        .collect()
}

/// Point every `Domain` attribute at `localhost`, then apply
/// `ensure_secure`. Used in development, where the upstream domain would
/// not validate against the local host.
pub fn rewrite_domain(raw: &str) -> Vec<String> {
    let rewritten = raw
        .split(ATTRIBUTE_SEPARATOR)
        .map(|segment| {
            if segment.trim_start().to_ascii_lowercase().starts_with("domain=") {
                "Domain=localhost"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join(ATTRIBUTE_SEPARATOR);
    ensure_secure(&rewritten)
}

fn has_secure(directive: &str) -> bool {
    directive
        .split(';')
        .skip(1)
        .any(|attribute| attribute.trim().eq_ignore_ascii_case("secure"))
}

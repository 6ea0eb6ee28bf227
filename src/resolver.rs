use lsm_plugin::error::{LsmError, Result};
use url::{ParseError, Url};

/// Query key naming the backend plugin in the registration URI.
pub const FORWARD_KEY: &str = "forward";

/// Extracts the backend plugin from `scheme://?forward=<name>` and returns
/// the address to connect to, `<name>://`.
pub fn resolve_backend(uri: &str) -> Result<String> {
    // special schemes (http, ftp, ...) insist on a host; `scheme://?...` has none
    match Url::parse(uri) {
        Ok(_) | Err(ParseError::EmptyHost) => {}
        Err(e) => return Err(LsmError::invalid_argument(format!("invalid uri '{uri}': {e}"))),
    }
    let raw = uri.split_once('?').map(|(_, query)| query).unwrap_or_default();
    let raw = raw.split_once('#').map_or(raw, |(query, _)| query);

    let parts: Vec<&str> = raw.split('=').collect();
    match parts.as_slice() {
        [key, name] if *key == FORWARD_KEY => Ok(format!("{name}://")),
        _ => Err(LsmError::invalid_argument(format!(
            "expected query string to be '{FORWARD_KEY}=<otherplugin>' got {raw}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsm_plugin::error::ErrorCode;

    #[test]
    fn forward_target_becomes_an_address() {
        assert_eq!(resolve_backend("tank://?forward=mock").unwrap(), "mock://");
        assert_eq!(resolve_backend("fwd://host/path?forward=sim").unwrap(), "sim://");
        assert_eq!(resolve_backend("tank://?forward=mock#frag").unwrap(), "mock://");
        for scheme in ["http", "https", "ws", "wss", "ftp"] {
            let uri = format!("{scheme}://?forward=mock");
            assert_eq!(resolve_backend(&uri).unwrap(), "mock://", "{uri}");
        }
    }

    #[test]
    fn other_query_shapes_are_rejected() {
        for (uri, raw) in [
            ("tank://?backend=mock", "backend=mock"),
            ("tank://?forward", "forward"),
            ("tank://?forward=a=b", "forward=a=b"),
            ("tank://?forward=mock&x=y", "forward=mock&x=y"),
            ("tank://", ""),
            ("http://?backend=mock", "backend=mock"),
        ] {
            let err = resolve_backend(uri).unwrap_err();
            assert_eq!(err.code, ErrorCode::InvalidArgument, "{uri}");
            assert_eq!(
                err.message,
                format!("expected query string to be 'forward=<otherplugin>' got {raw}")
            );
        }
    }

    #[test]
    fn unparsable_uri_is_an_invalid_argument() {
        let err = resolve_backend("no scheme here").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgument);
    }
}

//! Vault URIs: `cryptomator:/<internal path>?vault=<vault root>`.

use std::path::{Path, PathBuf};

use percent_encoding::percent_decode_str;
use url::Url;

use crate::error::FsError;
use crate::provider::SCHEME;

const VAULT_PARAM: &str = "vault";

fn invalid(uri: &str, reason: impl Into<String>) -> FsError {
    FsError::InvalidUri {
        uri: uri.to_string(),
        reason: reason.into(),
    }
}

/// URI addressing `segments` inside the vault at `vault_root`.
pub fn create_uri<'a>(
    vault_root: &Path,
    segments: impl IntoIterator<Item = &'a str>,
) -> Result<Url, FsError> {
    let base = format!("{SCHEME}:/");
    let mut url = Url::parse(&base).map_err(|e| invalid(&base, e.to_string()))?;
    url.path_segments_mut()
        .map_err(|()| invalid(&base, "cannot be a base"))?
        .clear()
        .extend(segments);
    url.query_pairs_mut()
        .append_pair(VAULT_PARAM, &vault_root.to_string_lossy());
    Ok(url)
}

/// Split a vault URI into its vault root and absolute internal path.
pub fn parse_uri(uri: &Url) -> Result<(PathBuf, String), FsError> {
    let raw = uri.as_str();
    if uri.scheme() != SCHEME {
        return Err(invalid(raw, format!("scheme must be '{SCHEME}'")));
    }
    let vault = uri
        .query_pairs()
        .find(|(key, _)| key == VAULT_PARAM)
        .map(|(_, value)| PathBuf::from(value.into_owned()))
        .ok_or_else(|| invalid(raw, "missing vault parameter"))?;
    if vault.as_os_str().is_empty() {
        return Err(invalid(raw, "empty vault parameter"));
    }

    let mut path = String::from("/");
    let segments = uri
        .path_segments()
        .ok_or_else(|| invalid(raw, "cannot be a base"))?;
    for segment in segments.filter(|s| !s.is_empty()) {
        let decoded = percent_decode_str(segment)
            .decode_utf8()
            .map_err(|e| invalid(raw, e.to_string()))?;
        if !path.ends_with('/') {
            path.push('/');
        }
        path.push_str(&decoded);
    }
    Ok((vault, path))
}

/// Parse and split a URI string.
pub fn parse_uri_str(uri: &str) -> Result<(PathBuf, String), FsError> {
    let url = Url::parse(uri).map_err(|e| invalid(uri, e.to_string()))?;
    parse_uri(&url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let root = Path::new("/home/user/My Vault");
        let uri = create_uri(root, ["docs", "a b.txt"]).unwrap();
        assert_eq!(uri.scheme(), "cryptomator");

        let (vault, path) = parse_uri(&uri).unwrap();
        assert_eq!(vault, root);
        assert_eq!(path, "/docs/a b.txt");
    }

    #[test]
    fn test_root_path() {
        let uri = create_uri(Path::new("/v"), std::iter::empty()).unwrap();
        assert_eq!(parse_uri(&uri).unwrap().1, "/");
    }

    #[test]
    fn test_special_characters_survive() {
        let root = Path::new("/tmp/a&b=c?d");
        let names = ["100%", "what?", "#hash", "\u{e9}t\u{e9}"];
        let uri = create_uri(root, names).unwrap();

        let reparsed = Url::parse(uri.as_str()).unwrap();
        let (vault, path) = parse_uri(&reparsed).unwrap();
        assert_eq!(vault, root);
        assert_eq!(path, format!("/{}", names.join("/")));
    }

    #[test]
    fn test_rejects_foreign_scheme_and_missing_vault() {
        assert!(matches!(
            parse_uri_str("file:///tmp/x"),
            Err(FsError::InvalidUri { .. })
        ));
        assert!(matches!(
            parse_uri_str("cryptomator:/a/b"),
            Err(FsError::InvalidUri { .. })
        ));
    }
}

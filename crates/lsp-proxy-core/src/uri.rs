//! Pure URI rewriting over a decoded JSON value tree (spec §4.3).
//!
//! The walker is data-driven (spec §9): a small closed table of field
//! names the LSP schema uses for document URIs, rather than per-method
//! rewriting. Array elements inherit the key context of their parent
//! object, and the `changes` map (`WorkspaceEdit.changes`) is special-cased
//! because its *keys*, not a nested field, are themselves URIs.

use serde_json::Value;

/// Closed set of object keys the LSP schema uses to carry a document URI.
const URI_KEYS: &[&str] = &[
    "uri",
    "targetUri",
    "newUri",
    "oldUri",
    "rootUri",
    "documentUri",
    "baseUri",
];

/// Walks `value` in place, passing every string found under a URI-bearing
/// key (or as a `changes`-map key) through `translate`.
pub fn rewrite_uris(value: &mut Value, translate: &dyn Fn(&str) -> String) {
    match value {
        Value::Object(map) => {
            if let Some(Value::Object(changes)) = map.get_mut("changes") {
                let old = std::mem::take(changes);
                let mut rewritten = serde_json::Map::with_capacity(old.len());
                for (key, mut entry) in old {
                    rewrite_uris(&mut entry, translate);
                    rewritten.insert(translate(&key), entry);
                }
                *changes = rewritten;
            }

            for (key, entry) in map.iter_mut() {
                if key == "changes" {
                    continue;
                }
                if URI_KEYS.contains(&key.as_str()) {
                    if let Value::String(s) = entry {
                        *s = translate(s);
                        continue;
                    }
                }
                rewrite_uris(entry, translate);
            }
        }
        Value::Array(items) => {
            for item in items {
                rewrite_uris(item, translate);
            }
        }
        _ => {}
    }
}

/// Strips a `file://`-prefixed client-space root from `uri` and returns the
/// relative suffix (including its leading `/`), or `None` if `uri` isn't
/// under that root.
fn strip_prefix<'a>(uri: &'a str, root: &str) -> Option<&'a str> {
    let root = root.trim_end_matches('/');
    uri.strip_prefix(root)
        .filter(|rest| rest.is_empty() || rest.starts_with('/'))
}

fn file_uri(path: &str) -> String {
    format!("file://{path}")
}

/// Translates a client-space URI (rooted at `client_root`, a `file://`
/// URI) into a server-space URI (rooted at `cache_dir`, a filesystem
/// path). URIs outside `client_root`, or not a local `file://` URI, pass
/// through unchanged (spec §4.3, §8).
pub fn client_to_server(uri: &str, client_root: &str, cache_dir: &str) -> String {
    match strip_prefix(uri, client_root) {
        Some(rest) => file_uri(&format!("{}{rest}", cache_dir.trim_end_matches('/'))),
        None => uri.to_string(),
    }
}

/// The inverse of [`client_to_server`]. `client_root` is already a
/// `file://` URI (spec §3), so the reconstructed URI is just its prefix
/// plus the relative suffix, not a second `file://`-wrapped value.
pub fn server_to_client(uri: &str, client_root: &str, cache_dir: &str) -> String {
    match strip_prefix(uri, &file_uri(cache_dir)) {
        Some(rest) => format!("{}{rest}", client_root.trim_end_matches('/')),
        None => uri.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CLIENT_ROOT: &str = "file:///ws";
    const CACHE_DIR: &str = "/tmp/c/SID";

    #[test]
    fn rewrites_plain_uri_field() {
        let mut v = json!({"textDocument": {"uri": "file:///ws/a.py"}});
        rewrite_uris(&mut v, &|u| client_to_server(u, CLIENT_ROOT, CACHE_DIR));
        assert_eq!(v["textDocument"]["uri"], "file:///tmp/c/SID/a.py");
    }

    #[test]
    fn rewrites_array_elements() {
        let mut v = json!({"items": [{"uri": "file:///ws/a.py"}, {"uri": "file:///ws/b.py"}]});
        rewrite_uris(&mut v, &|u| client_to_server(u, CLIENT_ROOT, CACHE_DIR));
        assert_eq!(v["items"][0]["uri"], "file:///tmp/c/SID/a.py");
        assert_eq!(v["items"][1]["uri"], "file:///tmp/c/SID/b.py");
    }

    #[test]
    fn rewrites_changes_map_keys() {
        let mut v = json!({"changes": {"file:///ws/a.py": [{"newText": "x"}]}});
        rewrite_uris(&mut v, &|u| client_to_server(u, CLIENT_ROOT, CACHE_DIR));
        assert!(v["changes"].get("file:///tmp/c/SID/a.py").is_some());
        assert!(v["changes"].get("file:///ws/a.py").is_none());
    }

    #[test]
    fn leaves_non_matching_uri_unchanged() {
        let mut v = json!({"uri": "file:///other/a.py"});
        rewrite_uris(&mut v, &|u| client_to_server(u, CLIENT_ROOT, CACHE_DIR));
        assert_eq!(v["uri"], "file:///other/a.py");
    }

    #[test]
    fn roundtrip_law_holds() {
        let original = "file:///ws/nested/dir/a.py";
        let server = client_to_server(original, CLIENT_ROOT, CACHE_DIR);
        assert_eq!(server, "file:///tmp/c/SID/nested/dir/a.py");
        let back = server_to_client(&server, CLIENT_ROOT, CACHE_DIR);
        assert_eq!(back, original);
    }

    #[test]
    fn server_to_client_does_not_double_wrap_the_scheme() {
        let server = "file:///tmp/c/SID/nested/a.py";
        assert_eq!(
            server_to_client(server, CLIENT_ROOT, CACHE_DIR),
            "file:///ws/nested/a.py"
        );
    }

    #[test]
    fn preserves_relative_suffix_byte_for_byte() {
        let original = "file:///ws/a/b/c.rs";
        let server = client_to_server(original, CLIENT_ROOT, CACHE_DIR);
        assert_eq!(server.strip_prefix(&file_uri(CACHE_DIR)).unwrap(), "/a/b/c.rs");
    }
}

//! Registrable-domain extraction for circuit breaking
//!
//! Domain blocks operate on the registrable domain rather than the full
//! hostname so that `www.pref.nara.lg.jp` and `pref.nara.lg.jp` share one
//! health record.

use url::Url;

/// Extract the registrable domain key from a URL.
///
/// Government hosts under `*.go.jp` / `*.lg.jp` keep three labels (e.g.
/// `pref.nara.lg.jp`); everything else keeps two. Unparseable URLs map to
/// `"unknown"` so a malformed row can never panic the scheduler.
pub fn extract_domain_key(url: &str) -> String {
    let host = match Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_lowercase)) {
        Some(host) => host,
        None => return "unknown".to_string(),
    };

    let parts: Vec<&str> = host.split('.').collect();
    let n = parts.len();

    if n >= 3 && (parts[n - 2] == "go" || parts[n - 2] == "lg") {
        return parts[n - 3..].join(".");
    }
    if n >= 2 {
        return parts[n - 2..].join(".");
    }
    host
}

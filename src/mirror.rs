use tracing::debug;

use crate::config::DownloadConfig;

/// Well-known upstream host fragments and the mirror path suffix that
/// replaces them. First match wins. Entries with no suffix are only
/// reachable through proxy mode, where the proxy receives the full
/// original URL and routes it itself.
const REPLACEMENTS: &[(&str, Option<&str>)] = &[
    ("resources.download.minecraft.net", Some("assets")),
    ("libraries.minecraft.net", Some("maven")),
    ("maven.fabricmc.net", Some("maven")),
    ("launchermeta.mojang.com", Some("")),
    ("launcher.mojang.com", Some("")),
    ("files.minecraftforge.net", Some("")),
    ("meta.fabricmc.net", Some("fabric-meta")),
    ("maven.neoforged.net/releases", Some("maven")),
    ("maven.quiltmc.org/repository/release", Some("maven")),
    ("meta.quiltmc.org", Some("quilt-meta")),
    ("edge.forgecdn.net", None),
    ("mediafilez.forgecdn.net", None),
];

/// Remap a request URL onto the configured mirror, if any applies.
///
/// Rewriting is skipped entirely when the configured source is the default
/// upstream or when no mirror base is configured. URLs that already point
/// at the mirror are left alone.
pub fn rewrite_url(url: &str, config: &DownloadConfig) -> String {
    if config.uses_default_upstream() {
        return url.to_string();
    }

    let base = normalize_mirror_base(&config.mirror_base);
    if base.is_empty() {
        return url.to_string();
    }

    for (fragment, suffix) in REPLACEMENTS {
        let Some(position) = url.find(fragment) else {
            continue;
        };
        if url.contains(&base) {
            // already rewritten, nothing to do
            return url.to_string();
        }

        if config.proxy_mode {
            // the proxy receives the full original URL as a path suffix
            let rewritten = format!("{base}{url}");
            debug!("Proxying {url} through {base}");
            return rewritten;
        }

        if let Some(suffix) = suffix {
            let rewritten = splice(&base, suffix, &url[position + fragment.len()..]);
            debug!("Rewrote {url} to {rewritten}");
            return rewritten;
        }
        // proxy-only entry in plain mode: keep scanning
    }

    url.to_string()
}

/// Replace the scheme-and-fragment prefix of a URL with `base + suffix`,
/// collapsing the separator when the suffix is empty.
fn splice(base: &str, suffix: &str, rest: &str) -> String {
    let mut out = String::with_capacity(base.len() + suffix.len() + rest.len());
    out.push_str(base);
    out.push_str(suffix);
    if out.ends_with('/') && rest.starts_with('/') {
        out.pop();
    }
    out.push_str(rest);
    out
}

/// Trim the configured base, upgrade it to HTTPS and make sure it carries a
/// trailing separator. An empty result disables rewriting.
fn normalize_mirror_base(raw: &str) -> String {
    let mut base = raw.trim().to_string();
    if base.is_empty() {
        return base;
    }
    if let Some(rest) = base.strip_prefix("http://") {
        base = format!("https://{rest}");
    } else if !base.starts_with("https://") {
        base = format!("https://{base}");
    }
    if !base.ends_with('/') {
        base.push('/');
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mirror_config(base: &str, proxy_mode: bool) -> DownloadConfig {
        DownloadConfig {
            source: "mirror".to_string(),
            mirror_base: base.to_string(),
            proxy_mode,
            ..DownloadConfig::default()
        }
    }

    #[test]
    fn test_default_source_never_rewrites() {
        let config = DownloadConfig {
            mirror_base: "https://mirror.example/".to_string(),
            ..DownloadConfig::default()
        };
        let url = "https://libraries.minecraft.net/x.jar";
        assert_eq!(rewrite_url(url, &config), url);
    }

    #[test]
    fn test_empty_base_never_rewrites() {
        let config = mirror_config("", false);
        for url in [
            "https://libraries.minecraft.net/x.jar",
            "https://resources.download.minecraft.net/ab/abcd",
            "https://example.com/unrelated",
        ] {
            assert_eq!(rewrite_url(url, &config), url);
        }
    }

    #[test]
    fn test_maven_mapping() {
        let config = mirror_config("https://mirror.example/", false);
        assert_eq!(
            rewrite_url("https://libraries.minecraft.net/x.jar", &config),
            "https://mirror.example/maven/x.jar"
        );
    }

    #[test]
    fn test_root_mapping_collapses_separator() {
        let config = mirror_config("https://mirror.example/", false);
        assert_eq!(
            rewrite_url("https://launchermeta.mojang.com/mc/game/manifest.json", &config),
            "https://mirror.example/mc/game/manifest.json"
        );
    }

    #[test]
    fn test_first_match_wins() {
        let config = mirror_config("https://mirror.example/", false);
        assert_eq!(
            rewrite_url("https://resources.download.minecraft.net/ab/abcd", &config),
            "https://mirror.example/assets/ab/abcd"
        );
    }

    #[test]
    fn test_http_base_upgraded_to_https() {
        let config = mirror_config("http://mirror.example", false);
        assert_eq!(
            rewrite_url("https://libraries.minecraft.net/x.jar", &config),
            "https://mirror.example/maven/x.jar"
        );
    }

    #[test]
    fn test_bare_host_base_gets_scheme_and_slash() {
        let config = mirror_config("mirror.example", false);
        assert_eq!(
            rewrite_url("https://meta.quiltmc.org/v3/versions", &config),
            "https://mirror.example/quilt-meta/v3/versions"
        );
    }

    #[test]
    fn test_already_mirrored_url_left_alone() {
        let config = mirror_config("https://mirror.example/", false);
        let url = "https://mirror.example/maven/x.jar";
        assert_eq!(rewrite_url(url, &config), url);
    }

    #[test]
    fn test_proxy_mode_wraps_whole_url() {
        let config = mirror_config("https://mirror.example/", true);
        assert_eq!(
            rewrite_url("https://libraries.minecraft.net/x.jar", &config),
            "https://mirror.example/https://libraries.minecraft.net/x.jar"
        );
    }

    #[test]
    fn test_forgecdn_only_rewritten_in_proxy_mode() {
        let url = "https://edge.forgecdn.net/files/1/2/mod.jar";
        let plain = mirror_config("https://mirror.example/", false);
        assert_eq!(rewrite_url(url, &plain), url);

        let proxied = mirror_config("https://mirror.example/", true);
        assert_eq!(
            rewrite_url(url, &proxied),
            "https://mirror.example/https://edge.forgecdn.net/files/1/2/mod.jar"
        );
    }

    #[test]
    fn test_unknown_host_untouched() {
        let config = mirror_config("https://mirror.example/", false);
        let url = "https://example.com/file.bin";
        assert_eq!(rewrite_url(url, &config), url);
    }
}

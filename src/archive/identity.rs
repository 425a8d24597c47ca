use sha2::{Digest, Sha256};

use crate::util::identity_url;

/// Content address of an item: SHA-256 over its site, source, title and URL.
///
/// Site, source and title are compared trimmed and case-insensitively; the
/// URL goes through normalization with its query pairs ordered, so tracking
/// parameters and parameter order never change the id. Publish and sighting
/// times play no part.
pub fn item_id(site_id: &str, source: &str, title: &str, url: &str) -> String {
    let input = format!(
        "{}||{}||{}||{}",
        site_id.trim().to_lowercase(),
        source.trim().to_lowercase(),
        title.trim().to_lowercase(),
        identity_url(url)
    );
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_id_shape() {
        let id = item_id("opmlrss", "Blog", "Hello", "https://example.com/a");
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_case_and_whitespace_insensitive() {
        let a = item_id("opmlrss", "Blog", "Hello World", "https://Example.com/a/");
        let b = item_id(" OPMLRSS ", "blog", "  hello world", "https://example.com/a");
        assert_eq!(a, b);
    }

    #[test]
    fn test_tracking_and_query_order_ignored() {
        let a = item_id("s", "src", "t", "https://ex.com/p?a=1&b=2&utm_source=rss");
        let b = item_id("s", "src", "t", "https://ex.com/p?b=2&a=1#frag");
        assert_eq!(a, b);
    }

    #[test]
    fn test_distinct_fields_distinct_ids() {
        let base = item_id("s", "src", "t", "https://ex.com/p");
        assert_ne!(base, item_id("s2", "src", "t", "https://ex.com/p"));
        assert_ne!(base, item_id("s", "src2", "t", "https://ex.com/p"));
        assert_ne!(base, item_id("s", "src", "t2", "https://ex.com/p"));
        assert_ne!(base, item_id("s", "src", "t", "https://ex.com/q"));
        assert_ne!(base, item_id("s", "src", "t", "https://ex.com/p?id=1"));
    }

    proptest! {
        #[test]
        fn prop_query_order_never_changes_id(
            pairs in proptest::collection::vec(("[a-z]{1,4}", "[a-z0-9]{0,4}"), 1..5)
        ) {
            let forward: Vec<String> = pairs.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            let mut reversed = forward.clone();
            reversed.reverse();

            let a = item_id("s", "src", "t", &format!("https://ex.com/p?{}", forward.join("&")));
            let b = item_id("s", "src", "t", &format!("https://ex.com/p?{}", reversed.join("&")));
            prop_assert_eq!(a, b);
        }

        #[test]
        fn prop_title_case_never_changes_id(title in "[a-zA-Z ]{1,20}") {
            let a = item_id("s", "src", &title, "https://ex.com/p");
            let b = item_id("s", "src", &title.to_uppercase(), "https://ex.com/p");
            prop_assert_eq!(a, b);
        }
    }
}

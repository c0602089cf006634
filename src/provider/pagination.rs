//! `Link` header pagination shared by the GitHub and Docker providers

use reqwest::Url;
use reqwest::header::{HeaderMap, LINK};

/// Upper bound on pages followed for a single repository
pub const MAX_PAGES: usize = 200;

/// Extract the `rel="next"` target, resolved against the current page URL
pub fn next_link(headers: &HeaderMap, current: &Url) -> Option<Url> {
    let value = headers.get(LINK)?.to_str().ok()?;

    value.split(',').find_map(|entry| {
        let mut parts = entry.split(';');
        let target = parts
            .next()?
            .trim()
            .strip_prefix('<')?
            .strip_suffix('>')?;

        let is_next = parts.any(|param| {
            let param = param.trim();
            param == "rel=\"next\"" || param == "rel=next"
        });

        if is_next {
            current.join(target).ok()
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use rstest::rstest;

    fn headers(link: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(LINK, HeaderValue::from_str(link).unwrap());
        headers
    }

    #[rstest]
    #[case(
        r#"<https://api.github.com/repositories/1/tags?page=2>; rel="next", <https://api.github.com/repositories/1/tags?page=9>; rel="last""#,
        Some("https://api.github.com/repositories/1/tags?page=2")
    )]
    #[case(
        r#"<https://api.github.com/repositories/1/tags?page=1>; rel="prev""#,
        None
    )]
    #[case(
        r#"</v2/library/nginx/tags/list?n=100&last=1.25>; rel="next""#,
        Some("https://registry.example.com/v2/library/nginx/tags/list?n=100&last=1.25")
    )]
    #[case(r#"garbage"#, None)]
    fn next_link_returns_expected(#[case] link: &str, #[case] expected: Option<&str>) {
        let current = Url::parse("https://registry.example.com/v2/library/nginx/tags/list?n=100")
            .unwrap();

        assert_eq!(
            next_link(&headers(link), &current).map(|url| url.to_string()),
            expected.map(|s| s.to_string())
        );
    }

    #[test]
    fn next_link_returns_none_without_header() {
        let current = Url::parse("https://api.github.com/repos/a/b/tags").unwrap();

        assert_eq!(next_link(&HeaderMap::new(), &current), None);
    }
}

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;
use std::sync::LazyLock;

// Same unreserved set as encodeURIComponent.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

static IMAGE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"image/(\w+)").expect("static image id pattern"));

pub fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, COMPONENT).to_string()
}

pub fn track_search_url(api_base: &str, query: &str) -> String {
    format!(
        "{}/v1/search?q={}&type=track&include_external=audio",
        api_base.trim_end_matches('/'),
        encode_component(query)
    )
}

pub fn connections_url(api_base: &str) -> String {
    format!("{}/users/@me/connections", api_base.trim_end_matches('/'))
}

pub fn connection_access_token_url(api_base: &str, kind: &str, id: &str) -> String {
    format!(
        "{}/users/@me/connections/{}/{}/access-token",
        api_base.trim_end_matches('/'),
        encode_component(kind),
        encode_component(id)
    )
}

pub fn cover_image_id(image_url: &str) -> Option<String> {
    IMAGE_ID
        .captures(image_url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::{connection_access_token_url, cover_image_id, track_search_url};

    #[test]
    fn search_url_escapes_query_like_a_browser() {
        let url = track_search_url("https://api.spotify.com/", "AC/DC - Back In Black (Live)");
        assert_eq!(
            url,
            "https://api.spotify.com/v1/search?q=AC%2FDC%20-%20Back%20In%20Black%20(Live)&type=track&include_external=audio"
        );
    }

    #[test]
    fn token_url_includes_connection_identity() {
        let url = connection_access_token_url("https://discord.com/api/v9", "spotify", "abc123");
        assert_eq!(
            url,
            "https://discord.com/api/v9/users/@me/connections/spotify/abc123/access-token"
        );
    }

    #[test]
    fn cover_id_comes_from_image_path() {
        assert_eq!(
            cover_image_id("https://i.scdn.co/image/ab67616d0000b273deadbeef").as_deref(),
            Some("ab67616d0000b273deadbeef")
        );
        assert_eq!(cover_image_id("https://example.com/cover.jpg"), None);
    }
}

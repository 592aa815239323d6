//! Feed Endpoint
//!
//! Builds the WebSocket URL of the real-time device feed.

use url::form_urlencoded;

/// API version prefix the feed lives under
pub const API_BASE: &str = "/api/v2";

/// Path of the real-time device feed below [`API_BASE`]
pub const FEED_PATH: &str = "/devices/realtime-data/ws";

/// The server's default page size; large enough for one device type
pub const PAGE_SIZE: u32 = 100;

/// Where the feed is and which devices it should carry.
///
/// Only the device-type filter is part of the URL. Narrowing to individual
/// device codes would mean a new connection for every selection change, so
/// the feed keeps one stable connection per device type instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEndpoint {
    /// `host[:port]` of the backend
    pub host: String,
    /// Scheme of the page/console the feed serves; `https` selects `wss`
    pub page_scheme: String,
    pub device_type: Option<String>,
}

impl FeedEndpoint {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            page_scheme: "http".to_string(),
            device_type: None,
        }
    }

    pub fn with_page_scheme(mut self, scheme: &str) -> Self {
        self.page_scheme = scheme.to_string();
        self
    }

    pub fn with_device_type(mut self, device_type: Option<String>) -> Self {
        self.device_type = device_type;
        self
    }

    pub fn socket_scheme(&self) -> &'static str {
        if self.page_scheme.eq_ignore_ascii_case("https") {
            "wss"
        } else {
            "ws"
        }
    }

    /// Full feed URL. Empty tokens and device types are left out.
    pub fn build_url(&self, token: Option<&str>) -> String {
        let mut query = form_urlencoded::Serializer::new(String::new());

        if let Some(token) = token.filter(|t| !t.is_empty()) {
            query.append_pair("token", token);
        }
        if let Some(device_type) = self.device_type.as_deref().filter(|t| !t.is_empty()) {
            query.append_pair("type_code", device_type);
        }
        query.append_pair("page_size", &PAGE_SIZE.to_string());

        format!(
            "{}://{}{}{}?{}",
            self.socket_scheme(),
            self.host,
            API_BASE,
            FEED_PATH,
            query.finish()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_with_token_and_type() {
        let endpoint = FeedEndpoint::new("plant.example.com:8001")
            .with_page_scheme("https")
            .with_device_type(Some("welding".to_string()));

        assert_eq!(
            endpoint.build_url(Some("abc.def")),
            "wss://plant.example.com:8001/api/v2/devices/realtime-data/ws?token=abc.def&type_code=welding&page_size=100"
        );
    }

    #[test]
    fn test_url_without_token_or_type() {
        let endpoint = FeedEndpoint::new("localhost:8001");
        assert_eq!(
            endpoint.build_url(None),
            "ws://localhost:8001/api/v2/devices/realtime-data/ws?page_size=100"
        );
        assert_eq!(endpoint.build_url(Some("")), endpoint.build_url(None));
    }

    #[test]
    fn test_query_values_are_encoded() {
        let endpoint = FeedEndpoint::new("localhost:8001")
            .with_device_type(Some("arc welder".to_string()));
        let url = endpoint.build_url(Some("a+b/c="));
        assert!(url.contains("token=a%2Bb%2Fc%3D"));
        assert!(url.contains("type_code=arc+welder"));
    }

    #[test]
    fn test_device_type_change_changes_url() {
        let welding = FeedEndpoint::new("h:1").with_device_type(Some("welding".into()));
        let cutting = welding.clone().with_device_type(Some("cutting".into()));
        assert_ne!(welding.build_url(None), cutting.build_url(None));
    }
}

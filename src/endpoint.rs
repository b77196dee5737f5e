/// WebSocket 엔드포인트 파서
/// ws:// / wss:// URL을 호스트, 포트, 보안 여부로 분해한다. 부수효과 없는 순수 함수.

use crate::errors::{Result, SocketError};
use std::fmt;
use url::Url;

const WS_SCHEME: &str = "ws://";
const WSS_SCHEME: &str = "wss://";
const DEFAULT_WS_PORT: u16 = 80;
const DEFAULT_WSS_PORT: u16 = 443;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    raw_url: String,
    host: String,
    port: u16,
    is_secure: bool,
}

impl EndpointDescriptor {
    pub fn parse(url: &str) -> Result<Self> {
        let (is_secure, remaining) = if has_prefix_ignore_case(url, WSS_SCHEME) {
            (true, &url[WSS_SCHEME.len()..])
        } else if has_prefix_ignore_case(url, WS_SCHEME) {
            (false, &url[WS_SCHEME.len()..])
        } else {
            return Err(SocketError::InvalidScheme(url.to_string()));
        };

        // 호스트는 첫 ':' 또는 '/' 이전까지
        let host_end = remaining
            .find(|c| c == ':' || c == '/')
            .unwrap_or(remaining.len());
        let host = &remaining[..host_end];
        if host.is_empty() {
            return Err(SocketError::InvalidHost(url.to_string()));
        }

        let rest = &remaining[host_end..];
        let port = match rest.strip_prefix(':') {
            Some(after_colon) => {
                let digits = &after_colon[..after_colon.find('/').unwrap_or(after_colon.len())];
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(SocketError::InvalidPort(url.to_string()));
                }
                digits
                    .parse::<u16>()
                    .map_err(|_| SocketError::InvalidPort(url.to_string()))?
            }
            None if is_secure => DEFAULT_WSS_PORT,
            None => DEFAULT_WS_PORT,
        };

        Ok(Self {
            raw_url: url.to_string(),
            host: host.to_string(),
            port,
            is_secure,
        })
    }

    pub fn raw_url(&self) -> &str {
        &self.raw_url
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_secure(&self) -> bool {
        self.is_secure
    }

    /// 핸드셰이크 요청용 URL. 스킴을 소문자로 정규화한 뒤 url 크레이트로 검증한다.
    pub fn request_url(&self) -> Result<Url> {
        let scheme_len = if self.is_secure { WSS_SCHEME.len() } else { WS_SCHEME.len() };
        let scheme = if self.is_secure { WSS_SCHEME } else { WS_SCHEME };
        let normalized = format!("{}{}", scheme, &self.raw_url[scheme_len..]);
        Url::parse(&normalized)
            .map_err(|e| SocketError::HandshakeFailed(format!("요청 URL 생성 실패 ({}): {}", normalized, e)))
    }
}

impl fmt::Display for EndpointDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.is_secure { "wss" } else { "ws" };
        write!(f, "{}://{}:{}", scheme, self.host, self.port)
    }
}

fn has_prefix_ignore_case(url: &str, prefix: &str) -> bool {
    url.len() >= prefix.len()
        && url.is_char_boundary(prefix.len())
        && url[..prefix.len()].eq_ignore_ascii_case(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_ports_by_scheme() {
        let plain = EndpointDescriptor::parse("ws://localhost/ws").unwrap();
        assert_eq!(plain.host(), "localhost");
        assert_eq!(plain.port(), 80);
        assert!(!plain.is_secure());

        let secure = EndpointDescriptor::parse("wss://ws.okx.com/ws/v5/public").unwrap();
        assert_eq!(secure.host(), "ws.okx.com");
        assert_eq!(secure.port(), 443);
        assert!(secure.is_secure());
    }

    #[test]
    fn test_explicit_port_and_path() {
        let ep = EndpointDescriptor::parse("wss://wspap.okx.com:8443/ws/v5/public?brokerId=9999").unwrap();
        assert_eq!(ep.host(), "wspap.okx.com");
        assert_eq!(ep.port(), 8443);
        assert_eq!(ep.raw_url(), "wss://wspap.okx.com:8443/ws/v5/public?brokerId=9999");
        assert_eq!(ep.to_string(), "wss://wspap.okx.com:8443");
    }

    #[test]
    fn test_host_without_path() {
        let ep = EndpointDescriptor::parse("ws://127.0.0.1:9001").unwrap();
        assert_eq!(ep.host(), "127.0.0.1");
        assert_eq!(ep.port(), 9001);

        let ep = EndpointDescriptor::parse("wss://stream.binance.com").unwrap();
        assert_eq!(ep.host(), "stream.binance.com");
        assert_eq!(ep.port(), 443);
    }

    #[test]
    fn test_scheme_is_case_insensitive() {
        let ep = EndpointDescriptor::parse("WSS://Example.com/feed").unwrap();
        assert!(ep.is_secure());
        assert_eq!(ep.host(), "Example.com");
        assert_eq!(ep.request_url().unwrap().scheme(), "wss");
    }

    #[test]
    fn test_invalid_scheme() {
        for url in ["http://example.com", "example.com:443", "wss:/example.com", "", "tcp://host:1"] {
            assert!(
                matches!(EndpointDescriptor::parse(url), Err(SocketError::InvalidScheme(_))),
                "{} 는 InvalidScheme 이어야 함",
                url
            );
        }
    }

    #[test]
    fn test_invalid_host() {
        assert!(matches!(EndpointDescriptor::parse("ws://"), Err(SocketError::InvalidHost(_))));
        assert!(matches!(EndpointDescriptor::parse("wss:///path"), Err(SocketError::InvalidHost(_))));
        assert!(matches!(EndpointDescriptor::parse("ws://:8080/x"), Err(SocketError::InvalidHost(_))));
    }

    #[test]
    fn test_invalid_port() {
        for url in ["ws://host:abc", "ws://host:/path", "wss://host:12a4/x", "ws://host:70000"] {
            assert!(
                matches!(EndpointDescriptor::parse(url), Err(SocketError::InvalidPort(_))),
                "{} 는 InvalidPort 이어야 함",
                url
            );
        }
    }
}

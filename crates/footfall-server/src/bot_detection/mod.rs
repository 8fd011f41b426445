//! Heuristic bot scoring for inbound page views.

use crate::tracker::request::RequestInfo;

/// Score at or above which a request is treated as a bot.
const BOT_THRESHOLD: i32 = 50;

/// Prefetch and link-preview markers sent instead of a real page view.
const PREFETCH_HEADERS: [(&str, &str); 4] = [
    ("purpose", "prefetch"),
    ("sec-purpose", "prefetch"),
    ("x-purpose", "preview"),
    ("x-moz", "prefetch"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotClassification {
    pub is_bot: bool,
    pub score: i32,
    pub reason: Option<&'static str>,
}

fn ua_signature_score(user_agent: &str) -> Option<i32> {
    let ua = user_agent.to_ascii_lowercase();
    let signatures = [
        "bot",
        "spider",
        "crawler",
        "googlebot",
        "bingbot",
        "duckduckbot",
        "yandexbot",
        "baiduspider",
        "ahrefsbot",
        "semrushbot",
        "mj12bot",
        "headlesschrome",
        "phantomjs",
        "lighthouse",
        "python-requests",
        "curl/",
        "wget/",
        "go-http-client",
        "libwww-perl",
        "urllib",
        "httpclient",
    ];
    if signatures.iter().any(|sig| ua.contains(sig)) {
        Some(90)
    } else {
        None
    }
}

fn is_crawler(user_agent: &str) -> bool {
    woothee::parser::Parser::new()
        .parse(user_agent)
        .is_some_and(|result| result.category == "crawler")
}

fn is_prefetch(request: &RequestInfo) -> bool {
    PREFETCH_HEADERS.iter().any(|(name, marker)| {
        request
            .header(name)
            .is_some_and(|value| value.to_ascii_lowercase().contains(marker))
    })
}

pub fn classify(request: &RequestInfo) -> BotClassification {
    let user_agent = request.user_agent();
    let mut score = 0_i32;
    let mut primary_reason: Option<(&'static str, i32)> = None;
    let mut bump = |reason: &'static str, value: i32| {
        score = (score + value).clamp(0, 100);
        if primary_reason
            .map(|(_, existing)| value > existing)
            .unwrap_or(true)
        {
            primary_reason = Some((reason, value));
        }
    };

    if user_agent.is_empty() {
        bump("empty_user_agent", 100);
    }
    if let Some(value) = ua_signature_score(user_agent) {
        bump("ua_signature", value);
    }
    if !user_agent.is_empty() && is_crawler(user_agent) {
        bump("crawler", 90);
    }
    if is_prefetch(request) {
        bump("prefetch", 100);
    }

    let is_bot = score >= BOT_THRESHOLD;
    BotClassification {
        is_bot,
        score,
        reason: if is_bot {
            primary_reason.map(|(reason, _)| reason)
        } else {
            None
        },
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;

    fn request(headers: &[(&str, &str)]) -> RequestInfo {
        let mut builder = Request::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        RequestInfo::from(&builder.body(()).expect("request"))
    }

    #[test]
    fn plain_user_agents_pass() {
        let verdict = classify(&request(&[("user-agent", "valid")]));
        assert!(!verdict.is_bot);
        assert_eq!(verdict.score, 0);

        let verdict = classify(&request(&[(
            "user-agent",
            "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0",
        )]));
        assert!(!verdict.is_bot);
    }

    #[test]
    fn empty_user_agent_is_a_bot() {
        let verdict = classify(&request(&[]));
        assert!(verdict.is_bot);
        assert_eq!(verdict.reason, Some("empty_user_agent"));
    }

    #[test]
    fn signatures_and_crawlers_are_bots() {
        for ua in [
            "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)",
            "curl/8.4.0",
            "python-requests/2.31",
        ] {
            assert!(classify(&request(&[("user-agent", ua)])).is_bot, "{ua}");
        }
    }

    #[test]
    fn prefetch_requests_are_dropped() {
        let verdict = classify(&request(&[("user-agent", "valid"), ("purpose", "prefetch")]));
        assert!(verdict.is_bot);
        assert_eq!(verdict.reason, Some("prefetch"));
    }
}

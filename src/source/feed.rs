use serde_json::Value;

use super::{Cursor, Page, SourceError};

pub(super) fn parse_reels_page(
    raw: &str,
    incoming: &Cursor,
    count: usize,
) -> Result<Page, SourceError> {
    let parsed: Value = serde_json::from_str(raw)
        .map_err(|err| SourceError::Fetch(format!("invalid reels response: {err}")))?;

    if body_requires_login(&parsed) {
        return Err(SourceError::AuthRequired);
    }
    if parsed.get("status").and_then(Value::as_str) == Some("fail") {
        let message = parsed
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown failure");
        return Err(SourceError::Fetch(format!("reels request rejected: {message}")));
    }

    let Some(items) = parsed.get("items").and_then(Value::as_array) else {
        return Err(SourceError::Fetch(
            "reels response has no items array".to_string(),
        ));
    };

    let medias = items
        .iter()
        .map(|item| item.get("media").unwrap_or(item))
        .take(count)
        .collect::<Vec<_>>();

    let next_cursor = medias
        .last()
        .and_then(|media| media_pk(media))
        .map(Cursor::After)
        .unwrap_or_else(|| incoming.clone());

    let urls = medias
        .iter()
        .filter_map(|media| playable_url(media))
        .collect();

    Ok(Page { urls, next_cursor })
}

pub(super) fn body_requires_login(parsed: &Value) -> bool {
    parsed.get("message").and_then(Value::as_str) == Some("login_required")
        || parsed.get("require_login").and_then(Value::as_bool) == Some(true)
}

pub(super) fn raw_requires_login(raw: &str) -> bool {
    serde_json::from_str::<Value>(raw)
        .map(|parsed| body_requires_login(&parsed))
        .unwrap_or(false)
}

fn media_pk(media: &Value) -> Option<String> {
    match media.get("pk")? {
        Value::String(pk) if !pk.trim().is_empty() => Some(pk.trim().to_string()),
        Value::Number(pk) => Some(pk.to_string()),
        _ => None,
    }
}

fn playable_url(media: &Value) -> Option<String> {
    let url = media
        .pointer("/video_versions/0/url")
        .or_else(|| media.get("video_url"))?
        .as_str()?
        .trim();
    (!url.is_empty()).then(|| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reel(pk: u64, url: Option<&str>) -> String {
        match url {
            Some(url) => format!(
                r#"{{"media":{{"pk":{pk},"video_versions":[{{"url":"{url}","width":720}}]}}}}"#
            ),
            None => format!(r#"{{"media":{{"pk":{pk},"image_versions2":{{}}}}}}"#),
        }
    }

    fn body(items: &[String]) -> String {
        format!(
            r#"{{"items":[{}],"paging_info":{{"max_id":"x","more_available":true}},"status":"ok"}}"#,
            items.join(",")
        )
    }

    #[test]
    fn keeps_feed_order_and_uses_last_item_as_cursor() {
        let raw = body(&[
            reel(11, Some("https://cdn.test/a.mp4")),
            reel(12, Some("https://cdn.test/b.mp4")),
            reel(13, Some("https://cdn.test/c.mp4")),
        ]);
        let page = parse_reels_page(&raw, &Cursor::Start, 10).expect("page parses");
        assert_eq!(
            page.urls,
            vec![
                "https://cdn.test/a.mp4",
                "https://cdn.test/b.mp4",
                "https://cdn.test/c.mp4"
            ]
        );
        assert_eq!(page.next_cursor, Cursor::After("13".to_string()));
    }

    #[test]
    fn filters_items_without_video_but_still_advances_cursor() {
        let raw = body(&[reel(21, Some("https://cdn.test/a.mp4")), reel(22, None)]);
        let page = parse_reels_page(&raw, &Cursor::Start, 10).expect("page parses");
        assert_eq!(page.urls, vec!["https://cdn.test/a.mp4"]);
        assert_eq!(page.next_cursor, Cursor::After("22".to_string()));
    }

    #[test]
    fn truncates_to_requested_count() {
        let raw = body(&[
            reel(1, Some("https://cdn.test/1.mp4")),
            reel(2, Some("https://cdn.test/2.mp4")),
            reel(3, Some("https://cdn.test/3.mp4")),
        ]);
        let page = parse_reels_page(&raw, &Cursor::Start, 2).expect("page parses");
        assert_eq!(page.urls.len(), 2);
        assert_eq!(page.next_cursor, Cursor::After("2".to_string()));
    }

    #[test]
    fn empty_feed_keeps_incoming_cursor() {
        let incoming = Cursor::After("99".to_string());
        let page = parse_reels_page(&body(&[]), &incoming, 5).expect("empty page is valid");
        assert!(page.urls.is_empty());
        assert_eq!(page.next_cursor, incoming);
    }

    #[test]
    fn accepts_string_pks_and_bare_media_items() {
        let raw = r#"{"items":[{"pk":"3301","video_url":"https://cdn.test/v.mp4"}]}"#;
        let page = parse_reels_page(raw, &Cursor::Start, 5).expect("page parses");
        assert_eq!(page.urls, vec!["https://cdn.test/v.mp4"]);
        assert_eq!(page.next_cursor, Cursor::After("3301".to_string()));
    }

    #[test]
    fn login_required_body_maps_to_auth_required() {
        let raw = r#"{"message":"login_required","status":"fail"}"#;
        assert_eq!(
            parse_reels_page(raw, &Cursor::Start, 5),
            Err(SourceError::AuthRequired)
        );
        assert!(raw_requires_login(raw));
        assert!(!raw_requires_login("not json"));
    }

    #[test]
    fn malformed_responses_are_fetch_errors() {
        assert!(matches!(
            parse_reels_page("<html>", &Cursor::Start, 5),
            Err(SourceError::Fetch(_))
        ));
        assert!(matches!(
            parse_reels_page(r#"{"status":"ok"}"#, &Cursor::Start, 5),
            Err(SourceError::Fetch(_))
        ));
        assert!(matches!(
            parse_reels_page(
                r#"{"status":"fail","message":"feedback_required"}"#,
                &Cursor::Start,
                5
            ),
            Err(SourceError::Fetch(message)) if message.contains("feedback_required")
        ));
    }
}

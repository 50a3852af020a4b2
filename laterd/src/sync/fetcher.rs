use later_core::{LaterClient, LaterError, SavedItem};
use thiserror::Error;
use time::{Duration, OffsetDateTime, UtcOffset};

use super::cursor::PageCursor;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{}", user_message(.0))]
    Api(#[from] LaterError),
    #[error("Failed to calculate the since boundary")]
    SinceBoundary,
}

fn user_message(err: &LaterError) -> String {
    err.user_message()
}

/// Pulls pages of the remote inbox and keeps the run's cursor current.
pub struct PageFetcher {
    client: LaterClient,
}

impl PageFetcher {
    pub fn new(client: LaterClient) -> Self {
        Self { client }
    }

    /// Fetches the page at the cursor's offset. On success the cursor
    /// records the outcome and total and advances past the page; on
    /// failure only the failed outcome is recorded.
    pub async fn fetch_page(
        &self,
        cursor: &mut PageCursor,
        since: i64,
    ) -> Result<Vec<SavedItem>, FetchError> {
        match self
            .client
            .get_saved_items(since, cursor.page_size(), cursor.offset())
            .await
        {
            Ok(page) => {
                cursor.record_outcome(true);
                cursor.record_total(page.total);
                cursor.advance();
                Ok(page.items)
            }
            Err(err) => {
                cursor.record_outcome(false);
                Err(err.into())
            }
        }
    }
}

/// Unix time of the most recent Monday 00:00 UTC (ISO-8601 week start).
/// Every list request of a run is bounded by this value; it is computed
/// once per run, and a failure here fails the run before any network
/// call.
pub fn monday_start_unix(now: OffsetDateTime) -> Result<i64, FetchError> {
    let today = now.to_offset(UtcOffset::UTC).date();
    let days_back = i64::from(today.weekday().number_days_from_monday());
    let monday = today
        .checked_sub(Duration::days(days_back))
        .ok_or(FetchError::SinceBoundary)?;
    Ok(monday.midnight().assume_utc().unix_timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn monday_boundary_for_a_midweek_date() {
        let since = monday_start_unix(datetime!(2025-05-07 10:30 UTC)).unwrap();
        assert_eq!(since, 1_746_403_200); // 2025-05-05 00:00:00 UTC
    }

    #[test]
    fn monday_maps_to_its_own_midnight() {
        let since = monday_start_unix(datetime!(2025-05-05 23:59 UTC)).unwrap();
        assert_eq!(since, 1_746_403_200);
    }

    #[test]
    fn sunday_maps_back_to_the_preceding_monday() {
        let since = monday_start_unix(datetime!(2025-05-11 00:00 UTC)).unwrap();
        assert_eq!(since, 1_746_403_200);
    }

    #[tokio::test]
    async fn successful_fetch_advances_cursor_and_records_total() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/get"))
            .and(body_partial_json(json!({ "offset": 0, "count": 30 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "list": {
                    "10": {
                        "item_id": "10",
                        "resolved_title": "A title",
                        "resolved_url": "https://example.com/a",
                        "favorite": "0",
                        "is_article": "1",
                        "has_video": "0",
                        "time_added": "1700000000",
                        "time_updated": "1700000100"
                    }
                },
                "total": "45"
            })))
            .mount(&server)
            .await;

        let client = LaterClient::with_base_url(&server.uri(), "consumer", "token").unwrap();
        let fetcher = PageFetcher::new(client);
        let mut cursor = PageCursor::new(30);

        let items = fetcher.fetch_page(&mut cursor, 0).await.unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(cursor.offset(), 30);
        assert!(cursor.last_request_succeeded());
        assert!(!cursor.is_paging_finished());
    }

    #[tokio::test]
    async fn failed_fetch_records_outcome_and_leaves_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/get"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = LaterClient::with_base_url(&server.uri(), "consumer", "token").unwrap();
        let fetcher = PageFetcher::new(client);
        let mut cursor = PageCursor::new(30);

        let err = fetcher.fetch_page(&mut cursor, 0).await.unwrap_err();

        assert_eq!(err.to_string(), "Failed to parse response.");
        assert_eq!(cursor.offset(), 0);
        assert!(!cursor.last_request_succeeded());
    }
}

use crate::auth::AuthError;
use crate::models::{validate_record, AudioFeatures, RecordValidation};
use crate::provider::{FeatureSource, ProviderError, TokenProvider};
use log::{error, info, warn};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Hard cap on ids per request imposed by the audio-features endpoint.
pub const MAX_BATCH_SIZE: usize = 100;

/// Retry policy knobs for the batched fetch.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Ids per remote call, clamped to `MAX_BATCH_SIZE`.
    pub batch_size: usize,
    /// Total attempts allowed per batch for transient failures.
    pub max_retries: u32,
    /// Wait between transient retries, and rate-limit wait when the server
    /// does not suggest one.
    pub retry_delay: Duration,
    /// Rate-limit waits allowed per batch. `None` retries forever, which is
    /// the reference behavior but risks unbounded suspension under
    /// sustained throttling.
    pub rate_limit_retries: Option<u32>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            batch_size: MAX_BATCH_SIZE,
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            rate_limit_retries: Some(10),
        }
    }
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("failed to obtain an access token: {0}")]
    Token(#[source] AuthError),
    #[error("token refresh failed: {0}")]
    TokenRefresh(#[source] AuthError),
    #[error("access token rejected again after refresh: {0}")]
    AuthRejected(String),
    #[error("rate-limit budget exhausted after {waits} waits on batch {batch}")]
    RateLimitBudgetExhausted { batch: usize, waits: u32 },
    #[error("batch {batch} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        batch: usize,
        attempts: u32,
        #[source]
        source: ProviderError,
    },
}

/// Fatal fetch outcome.
///
/// `partial` always has the full input length: records from batches that
/// completed before the failure, then null markers for everything at and
/// after the failed batch.
#[derive(Debug)]
pub struct FetchFailure {
    pub error: FetchError,
    pub partial: Vec<Option<AudioFeatures>>,
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

impl std::error::Error for FetchFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Fetches audio features for ordered id lists in bounded-size batches,
/// masking transient remote failures behind a per-batch retry policy.
pub struct FeatureFetcher<S, T> {
    source: S,
    tokens: T,
    config: FetchConfig,
}

impl<S: FeatureSource, T: TokenProvider> FeatureFetcher<S, T> {
    pub fn new(source: S, tokens: T) -> Self {
        Self {
            source,
            tokens,
            config: FetchConfig::default(),
        }
    }

    pub fn with_config(mut self, mut config: FetchConfig) -> Self {
        config.batch_size = config.batch_size.clamp(1, MAX_BATCH_SIZE);
        self.config = config;
        self
    }

    /// Fetches one validated feature record (or null marker) per input id,
    /// in input order.
    ///
    /// Batches are fetched strictly sequentially. Per batch the policy is:
    /// one token refresh on an authentication failure, a server-paced wait on
    /// rate limiting, and up to `max_retries` attempts for anything else.
    pub async fn fetch_features(
        &self,
        ids: &[String],
    ) -> Result<Vec<Option<AudioFeatures>>, FetchFailure> {
        let mut results: Vec<Option<AudioFeatures>> = Vec::with_capacity(ids.len());
        if ids.is_empty() {
            return Ok(results);
        }

        let total_batches = ids.len().div_ceil(self.config.batch_size);
        info!(
            "fetching audio features for {} tracks in {} batches",
            ids.len(),
            total_batches
        );

        for (batch_index, batch) in ids.chunks(self.config.batch_size).enumerate() {
            match self.fetch_batch_with_retry(batch_index, batch).await {
                Ok(records) => results.extend(records),
                Err(error) => {
                    error!("aborting fetch on batch {}: {}", batch_index, error);
                    let mut partial = results;
                    partial.resize(ids.len(), None);
                    return Err(FetchFailure { error, partial });
                }
            }
        }

        Ok(results)
    }

    async fn fetch_batch_with_retry(
        &self,
        batch_index: usize,
        batch: &[String],
    ) -> Result<Vec<Option<AudioFeatures>>, FetchError> {
        // The token is re-read at every batch boundary; only the refresh
        // path below replaces it.
        let mut token = self
            .tokens
            .access_token()
            .await
            .map_err(FetchError::Token)?;

        let mut transient_attempts = 0u32;
        let mut rate_limit_waits = 0u32;
        let mut refreshed = false;

        loop {
            match self.source.fetch_batch(&token, batch).await {
                Ok(raw_records) => {
                    if raw_records.len() != batch.len() {
                        let mismatch = ProviderError::Transient(format!(
                            "expected {} records, got {}",
                            batch.len(),
                            raw_records.len()
                        ));
                        transient_attempts += 1;
                        if transient_attempts >= self.config.max_retries {
                            return Err(FetchError::RetriesExhausted {
                                batch: batch_index,
                                attempts: transient_attempts,
                                source: mismatch,
                            });
                        }
                        warn!(
                            "short response on batch {} (attempt {}/{}), retrying",
                            batch_index, transient_attempts, self.config.max_retries
                        );
                        tokio::time::sleep(self.config.retry_delay).await;
                        continue;
                    }

                    return Ok(raw_records
                        .into_iter()
                        .map(|raw| raw.and_then(|value| match validate_record(value) {
                            RecordValidation::Valid(features) => Some(features),
                            RecordValidation::Invalid { missing } => {
                                warn!(
                                    "dropping feature record missing: {}",
                                    missing.join(", ")
                                );
                                None
                            }
                            RecordValidation::Malformed(reason) => {
                                warn!("dropping malformed feature record: {}", reason);
                                None
                            }
                        }))
                        .collect());
                }
                Err(ProviderError::Unauthorized(detail)) => {
                    if refreshed {
                        return Err(FetchError::AuthRejected(detail));
                    }
                    info!(
                        "access token rejected on batch {}, refreshing once",
                        batch_index
                    );
                    token = self
                        .tokens
                        .refresh()
                        .await
                        .map_err(FetchError::TokenRefresh)?;
                    refreshed = true;
                }
                Err(ProviderError::RateLimited { retry_after }) => {
                    if let Some(budget) = self.config.rate_limit_retries {
                        if rate_limit_waits >= budget {
                            return Err(FetchError::RateLimitBudgetExhausted {
                                batch: batch_index,
                                waits: rate_limit_waits,
                            });
                        }
                    }
                    rate_limit_waits += 1;
                    let wait = retry_after.unwrap_or(self.config.retry_delay);
                    warn!(
                        "rate limited on batch {}, waiting {}s",
                        batch_index,
                        wait.as_secs()
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(source @ ProviderError::Transient(_)) => {
                    transient_attempts += 1;
                    if transient_attempts >= self.config.max_retries {
                        return Err(FetchError::RetriesExhausted {
                            batch: batch_index,
                            attempts: transient_attempts,
                            source,
                        });
                    }
                    warn!(
                        "transient failure on batch {} (attempt {}/{}): {}",
                        batch_index, transient_attempts, self.config.max_retries, source
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::AccessToken;
    use crate::track::normalize_track_id;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    type ScriptedResponse = Result<Vec<Option<Value>>, ProviderError>;

    /// Feature source that replays a fixed script of responses and records
    /// the token and ids of every call it receives.
    struct ScriptedSource {
        responses: Mutex<VecDeque<ScriptedResponse>>,
        calls: Mutex<Vec<(String, Vec<String>)>>,
    }

    impl ScriptedSource {
        fn new(responses: Vec<ScriptedResponse>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(String, Vec<String>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl<'a> FeatureSource for &'a ScriptedSource {
        async fn fetch_batch(
            &self,
            token: &AccessToken,
            ids: &[String],
        ) -> Result<Vec<Option<Value>>, ProviderError> {
            self.calls
                .lock()
                .unwrap()
                .push((token.secret().to_string(), ids.to_vec()));
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| panic!("scripted source ran out of responses"))
        }
    }

    struct FakeTokens {
        refreshes: AtomicUsize,
        fail_refresh: bool,
    }

    impl FakeTokens {
        fn new() -> Self {
            Self {
                refreshes: AtomicUsize::new(0),
                fail_refresh: false,
            }
        }

        fn failing_refresh() -> Self {
            Self {
                refreshes: AtomicUsize::new(0),
                fail_refresh: true,
            }
        }

        fn refresh_count(&self) -> usize {
            self.refreshes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl<'a> TokenProvider for &'a FakeTokens {
        async fn access_token(&self) -> Result<AccessToken, AuthError> {
            Ok(AccessToken::new("token-0"))
        }

        async fn refresh(&self) -> Result<AccessToken, AuthError> {
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst);
            if self.fail_refresh {
                return Err(AuthError::TokenEndpoint {
                    status: 400,
                    body: "invalid_grant".to_string(),
                });
            }
            Ok(AccessToken::new(format!("token-{}", n + 1)))
        }
    }

    fn full_record(id: &str) -> Value {
        json!({
            "danceability": 0.5,
            "energy": 0.6,
            "key": 7,
            "loudness": -6.5,
            "mode": 1,
            "speechiness": 0.04,
            "acousticness": 0.1,
            "instrumentalness": 0.0,
            "liveness": 0.12,
            "valence": 0.3,
            "tempo": 120.0,
            "duration_ms": 200000,
            "id": id
        })
    }

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("id{}", i)).collect()
    }

    fn quick_config() -> FetchConfig {
        // Short delays keep paused-clock tests readable.
        FetchConfig {
            retry_delay: Duration::from_millis(10),
            ..FetchConfig::default()
        }
    }

    #[tokio::test]
    async fn test_empty_input_makes_no_calls() {
        let source = ScriptedSource::new(vec![]);
        let tokens = FakeTokens::new();
        let fetcher = FeatureFetcher::new(&source, &tokens);

        let results = fetcher.fetch_features(&[]).await.unwrap();
        assert!(results.is_empty());
        assert!(source.calls().is_empty());
    }

    #[tokio::test]
    async fn test_normalized_pair_yields_record_and_null() {
        // Scenario: ["spotify:track:abc", "xyz"] -> ["abc", "xyz"], one full
        // record and one record missing tempo.
        let raw_ids = ["spotify:track:abc".to_string(), "xyz".to_string()];
        let normalized: Vec<String> = raw_ids.iter().map(|id| normalize_track_id(id)).collect();
        assert_eq!(normalized, vec!["abc".to_string(), "xyz".to_string()]);

        let mut incomplete = full_record("xyz");
        incomplete.as_object_mut().unwrap().remove("tempo");
        let source = ScriptedSource::new(vec![Ok(vec![
            Some(full_record("abc")),
            Some(incomplete),
        ])]);
        let tokens = FakeTokens::new();
        let fetcher = FeatureFetcher::new(&source, &tokens);

        let results = fetcher.fetch_features(&normalized).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_some());
        assert!(results[1].is_none());
        assert_eq!(source.calls()[0].1, normalized);
    }

    #[tokio::test]
    async fn test_input_splits_at_batch_size() {
        let input = ids(MAX_BATCH_SIZE + 1);
        let source = ScriptedSource::new(vec![
            Ok(input[..MAX_BATCH_SIZE]
                .iter()
                .map(|id| Some(full_record(id)))
                .collect()),
            Ok(vec![Some(full_record(&input[MAX_BATCH_SIZE]))]),
        ]);
        let tokens = FakeTokens::new();
        let fetcher = FeatureFetcher::new(&source, &tokens);

        let results = fetcher.fetch_features(&input).await.unwrap();
        assert_eq!(results.len(), input.len());
        assert!(results.iter().all(Option::is_some));

        let calls = source.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1.len(), MAX_BATCH_SIZE);
        assert_eq!(calls[1].1.len(), 1);
    }

    #[tokio::test]
    async fn test_auth_failure_refreshes_once_then_retries_same_batch() {
        let input = ids(2);
        let source = ScriptedSource::new(vec![
            Err(ProviderError::Unauthorized("expired".to_string())),
            Ok(input.iter().map(|id| Some(full_record(id))).collect()),
        ]);
        let tokens = FakeTokens::new();
        let fetcher = FeatureFetcher::new(&source, &tokens);

        let results = fetcher.fetch_features(&input).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(tokens.refresh_count(), 1);

        let calls = source.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, "token-0");
        assert_eq!(calls[1].0, "token-1");
        assert_eq!(calls[0].1, calls[1].1);
    }

    #[tokio::test]
    async fn test_second_auth_failure_after_refresh_is_fatal() {
        let input = ids(1);
        let source = ScriptedSource::new(vec![
            Err(ProviderError::Unauthorized("expired".to_string())),
            Err(ProviderError::Unauthorized("still rejected".to_string())),
        ]);
        let tokens = FakeTokens::new();
        let fetcher = FeatureFetcher::new(&source, &tokens);

        let failure = fetcher.fetch_features(&input).await.unwrap_err();
        assert!(matches!(failure.error, FetchError::AuthRejected(_)));
        assert_eq!(tokens.refresh_count(), 1);
        assert_eq!(failure.partial, vec![None]);
    }

    #[tokio::test]
    async fn test_failed_refresh_is_fatal() {
        let input = ids(1);
        let source = ScriptedSource::new(vec![Err(ProviderError::Unauthorized(
            "expired".to_string(),
        ))]);
        let tokens = FakeTokens::failing_refresh();
        let fetcher = FeatureFetcher::new(&source, &tokens);

        let failure = fetcher.fetch_features(&input).await.unwrap_err();
        assert!(matches!(failure.error, FetchError::TokenRefresh(_)));
        assert_eq!(source.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_waits_server_duration_and_preserves_order() {
        let input = ids(3);
        let source = ScriptedSource::new(vec![
            Err(ProviderError::RateLimited {
                retry_after: Some(Duration::from_secs(7)),
            }),
            Ok(input.iter().map(|id| Some(full_record(id))).collect()),
        ]);
        let tokens = FakeTokens::new();
        let fetcher = FeatureFetcher::new(&source, &tokens);

        let started = tokio::time::Instant::now();
        let results = fetcher.fetch_features(&input).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(7));

        for (i, record) in results.iter().enumerate() {
            let features = record.as_ref().expect("record should be present");
            assert_eq!(features.extra["id"], json!(format!("id{}", i)));
        }
        assert_eq!(tokens.refresh_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_budget_exhaustion_is_fatal() {
        let input = ids(1);
        let source = ScriptedSource::new(vec![
            Err(ProviderError::RateLimited { retry_after: None }),
            Err(ProviderError::RateLimited { retry_after: None }),
            Err(ProviderError::RateLimited { retry_after: None }),
        ]);
        let tokens = FakeTokens::new();
        let fetcher = FeatureFetcher::new(&source, &tokens).with_config(FetchConfig {
            rate_limit_retries: Some(2),
            ..quick_config()
        });

        let failure = fetcher.fetch_features(&input).await.unwrap_err();
        match failure.error {
            FetchError::RateLimitBudgetExhausted { waits, .. } => assert_eq!(waits, 2),
            other => panic!("expected rate-limit exhaustion, got {:?}", other),
        }
        assert_eq!(source.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_within_budget_recover() {
        let input = ids(1);
        let source = ScriptedSource::new(vec![
            Err(ProviderError::Transient("502".to_string())),
            Err(ProviderError::Transient("timeout".to_string())),
            Ok(vec![Some(full_record("id0"))]),
        ]);
        let tokens = FakeTokens::new();
        let fetcher = FeatureFetcher::new(&source, &tokens).with_config(quick_config());

        let results = fetcher.fetch_features(&input).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_some());
        assert_eq!(source.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_transient_budget_keeps_completed_batches() {
        let input = ids(3);
        let source = ScriptedSource::new(vec![
            Ok(input[..2].iter().map(|id| Some(full_record(id))).collect()),
            Err(ProviderError::Transient("500".to_string())),
            Err(ProviderError::Transient("500".to_string())),
            Err(ProviderError::Transient("500".to_string())),
        ]);
        let tokens = FakeTokens::new();
        let fetcher = FeatureFetcher::new(&source, &tokens).with_config(FetchConfig {
            batch_size: 2,
            ..quick_config()
        });

        let failure = fetcher.fetch_features(&input).await.unwrap_err();
        match &failure.error {
            FetchError::RetriesExhausted {
                batch, attempts, ..
            } => {
                assert_eq!(*batch, 1);
                assert_eq!(*attempts, 3);
            }
            other => panic!("expected exhausted retries, got {:?}", other),
        }

        // First batch's records are retained, the failed remainder is null.
        assert_eq!(failure.partial.len(), 3);
        assert!(failure.partial[0].is_some());
        assert!(failure.partial[1].is_some());
        assert!(failure.partial[2].is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_response_counts_as_transient() {
        let input = ids(2);
        let source = ScriptedSource::new(vec![
            Ok(vec![Some(full_record("id0"))]),
            Ok(vec![Some(full_record("id0"))]),
            Ok(vec![Some(full_record("id0"))]),
        ]);
        let tokens = FakeTokens::new();
        let fetcher = FeatureFetcher::new(&source, &tokens).with_config(quick_config());

        let failure = fetcher.fetch_features(&input).await.unwrap_err();
        assert!(matches!(
            failure.error,
            FetchError::RetriesExhausted { attempts: 3, .. }
        ));
    }

    #[tokio::test]
    async fn test_null_records_from_remote_stay_null() {
        let input = ids(2);
        let source = ScriptedSource::new(vec![Ok(vec![None, Some(full_record("id1"))])]);
        let tokens = FakeTokens::new();
        let fetcher = FeatureFetcher::new(&source, &tokens);

        let results = fetcher.fetch_features(&input).await.unwrap();
        assert!(results[0].is_none());
        assert!(results[1].is_some());
    }
}

//! Language-model caller.
//!
//! Two ways of obtaining a completion: a host-sampling capability injected
//! at boot by the transport layer, or a direct HTTP call to a
//! chat-completions provider.  The fallback chain is a small state machine
//! — try sampling, try direct, fail — with the policy picked by
//! `config.llm.mode`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use palace_config::{LlmConfig, LlmMode};
use palace_memory::PalaceError;
use serde_json::json;
use tracing::{debug, warn};

/// Host-sampling capability: `(system_prompt, user_message, max_tokens) →
/// completion text`.  Stored as an `Arc` closure so the transport layer can
/// inject whatever it has without this crate knowing about framing.
pub type SamplingFn = Arc<
    dyn Fn(String, String, u32) -> Pin<Box<dyn Future<Output = Result<String>> + Send>>
        + Send
        + Sync,
>;

pub struct LlmCaller {
    config: LlmConfig,
    sampling: Option<SamplingFn>,
    client: reqwest::Client,
}

impl LlmCaller {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            config,
            sampling: None,
            client: reqwest::Client::new(),
        }
    }

    /// Inject the host-sampling capability.  Without it, `sampling` mode
    /// always fails and `auto` goes straight to the direct path.
    pub fn with_sampling(mut self, sampling: SamplingFn) -> Self {
        self.sampling = Some(sampling);
        self
    }

    pub fn mode(&self) -> LlmMode {
        self.config.mode
    }

    /// Cheap availability probe: is any path worth attempting?
    /// Degraded flows (retrieval without synthesis, digest no-op) branch on
    /// this instead of paying for a doomed call.
    pub fn is_available(&self) -> bool {
        match self.config.mode {
            LlmMode::Sampling => self.sampling.is_some(),
            LlmMode::Direct => !self.config.api_key.is_empty(),
            LlmMode::Auto => self.sampling.is_some() || !self.config.api_key.is_empty(),
        }
    }

    /// Single-turn completion at temperature 0.3.
    pub async fn ask(
        &self,
        system_prompt: &str,
        user_message: &str,
        max_tokens: Option<u32>,
    ) -> Result<String> {
        let max_tokens = max_tokens.unwrap_or(self.config.max_tokens);
        match self.config.mode {
            LlmMode::Sampling => self.ask_sampling(system_prompt, user_message, max_tokens).await,
            LlmMode::Direct => self.ask_direct(system_prompt, user_message, max_tokens).await,
            LlmMode::Auto => {
                match self.ask_sampling(system_prompt, user_message, max_tokens).await {
                    Ok(text) => Ok(text),
                    Err(err) => {
                        debug!(%err, "host sampling failed, falling back to direct provider");
                        self.ask_direct(system_prompt, user_message, max_tokens).await
                    }
                }
            }
        }
    }

    async fn ask_sampling(
        &self,
        system_prompt: &str,
        user_message: &str,
        max_tokens: u32,
    ) -> Result<String> {
        let sampling = self.sampling.as_ref().ok_or_else(|| {
            PalaceError::LlmUnavailable("no host sampling capability injected".to_string())
        })?;
        let fut = sampling(system_prompt.to_string(), user_message.to_string(), max_tokens);
        tokio::time::timeout(Duration::from_secs(self.config.timeout_secs), fut)
            .await
            .map_err(|_| {
                PalaceError::LlmUnavailable(format!(
                    "host sampling timed out after {}s",
                    self.config.timeout_secs
                ))
            })?
    }

    async fn ask_direct(
        &self,
        system_prompt: &str,
        user_message: &str,
        max_tokens: u32,
    ) -> Result<String> {
        if self.config.api_key.is_empty() {
            return Err(PalaceError::LlmUnavailable(
                "no API key configured (llm.api_key / PALACE_API_KEY)".to_string(),
            )
            .into());
        }

        let body = json!({
            "model": self.config.model,
            "max_tokens": max_tokens,
            "temperature": 0.3,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_message},
            ],
        });

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .json(&body)
            .send()
            .await
            .map_err(|e| PalaceError::LlmUnavailable(format!("provider request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(%status, "provider returned an error");
            return Err(PalaceError::LlmUnavailable(format!(
                "provider returned {status}: {}",
                text.chars().take(200).collect::<String>()
            ))
            .into());
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PalaceError::LlmMalformed(format!("non-JSON provider reply: {e}")))?;
        let content = payload
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| {
                PalaceError::LlmMalformed(
                    "provider reply missing choices[0].message.content".to_string(),
                )
            })?;
        Ok(content.to_string())
    }
}

/// Build a sampling closure from a plain async function, for tests and
/// embedders that already have a completion source in-process.
pub fn sampling_from_fn<F, Fut>(f: F) -> SamplingFn
where
    F: Fn(String, String, u32) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String>> + Send + 'static,
{
    Arc::new(move |system, user, max_tokens| Box::pin(f(system, user, max_tokens)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(mode: LlmMode) -> LlmConfig {
        LlmConfig {
            mode,
            api_key: String::new(),
            ..LlmConfig::default()
        }
    }

    #[tokio::test]
    async fn sampling_mode_without_capability_fails() {
        let caller = LlmCaller::new(config(LlmMode::Sampling));
        assert!(!caller.is_available());
        let err = caller.ask("sys", "user", None).await.unwrap_err();
        assert!(err.to_string().contains("unavailable"));
    }

    #[tokio::test]
    async fn sampling_capability_is_used() {
        let caller = LlmCaller::new(config(LlmMode::Sampling)).with_sampling(sampling_from_fn(
            |system, user, _max| async move { Ok(format!("{system}|{user}")) },
        ));
        assert!(caller.is_available());
        let out = caller.ask("sys", "hello", Some(16)).await.unwrap();
        assert_eq!(out, "sys|hello");
    }

    #[tokio::test]
    async fn auto_falls_back_to_direct_and_reports_both_failed() {
        // Sampling errors; direct has no key → the final error is the
        // direct path's unavailability.
        let caller = LlmCaller::new(config(LlmMode::Auto)).with_sampling(sampling_from_fn(
            |_s, _u, _m| async move { anyhow::bail!("host refused") },
        ));
        let err = caller.ask("sys", "user", None).await.unwrap_err();
        assert!(err.to_string().contains("API key"));
    }

    #[tokio::test]
    async fn direct_mode_without_key_is_unavailable() {
        let caller = LlmCaller::new(config(LlmMode::Direct));
        assert!(!caller.is_available());
        assert!(caller.ask("s", "u", None).await.is_err());
    }
}

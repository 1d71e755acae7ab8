//! Generation options
//!
//! `GenerateArgs` is what a request may override; `GenerationConfig` is the
//! complete option set handed to the model after merging overrides over defaults.

use crate::error::{AdapterError, Result};
use crate::types::model::{SpecialTokens, TokenId};
use serde::{Deserialize, Deserializer, Serialize};

pub const DEFAULT_MAX_NEW_TOKENS: usize = 1024;
pub const DEFAULT_REPETITION_PENALTY: f32 = 1.2;

/// One or more end-of-sequence token ids
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EosTokenIds {
    Single(TokenId),
    Many(Vec<TokenId>),
}

impl EosTokenIds {
    pub fn ids(&self) -> &[TokenId] {
        match self {
            EosTokenIds::Single(id) => std::slice::from_ref(id),
            EosTokenIds::Many(ids) => ids,
        }
    }

    pub fn contains(&self, id: TokenId) -> bool {
        self.ids().contains(&id)
    }
}

impl From<TokenId> for EosTokenIds {
    fn from(id: TokenId) -> Self {
        EosTokenIds::Single(id)
    }
}

/// Distinguishes an explicit `null` (`Some(None)`) from an absent key (`None`).
fn deserialize_some<'de, T, D>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Per-request generation overrides
///
/// Every field is optional. Keys that are not recognized are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenerateArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_new_tokens: Option<usize>,
    #[serde(
        default,
        deserialize_with = "deserialize_some",
        skip_serializing_if = "Option::is_none"
    )]
    pub temperature: Option<Option<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repetition_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub do_sample: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_cache: Option<bool>,
    #[serde(
        default,
        deserialize_with = "deserialize_some",
        skip_serializing_if = "Option::is_none"
    )]
    pub eos_token_id: Option<Option<EosTokenIds>>,
    #[serde(
        default,
        deserialize_with = "deserialize_some",
        skip_serializing_if = "Option::is_none"
    )]
    pub pad_token_id: Option<Option<TokenId>>,
    #[serde(
        default,
        deserialize_with = "deserialize_some",
        skip_serializing_if = "Option::is_none"
    )]
    pub top_k: Option<Option<u32>>,
    #[serde(
        default,
        deserialize_with = "deserialize_some",
        skip_serializing_if = "Option::is_none"
    )]
    pub top_p: Option<Option<f32>>,
    #[serde(
        default,
        deserialize_with = "deserialize_some",
        skip_serializing_if = "Option::is_none"
    )]
    pub seed: Option<Option<u32>>,
}

/// Fully resolved generation options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Maximum number of tokens to generate after the prompt
    pub max_new_tokens: usize,
    /// Sampling temperature; `None` leaves the distribution untouched
    pub temperature: Option<f32>,
    /// Penalty applied to logits of tokens already present in the sequence
    pub repetition_penalty: f32,
    /// Sample from the distribution instead of picking the most likely token
    pub do_sample: bool,
    /// Reuse the key-value cache between decoding steps
    pub use_cache: bool,
    /// Tokens that stop generation once emitted
    pub eos_token_id: Option<EosTokenIds>,
    /// Only meaningful for batched generation; single sequences never pad
    pub pad_token_id: Option<TokenId>,
    pub top_k: Option<u32>,
    pub top_p: Option<f32>,
    pub seed: Option<u32>,
}

impl GenerationConfig {
    /// Default options for a tokenizer
    pub fn defaults(special: &SpecialTokens) -> Self {
        Self {
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
            temperature: None,
            repetition_penalty: DEFAULT_REPETITION_PENALTY,
            do_sample: false,
            use_cache: true,
            eos_token_id: special.eos_token_id.map(EosTokenIds::from),
            pad_token_id: special.pad_token_id,
            top_k: None,
            top_p: None,
            seed: None,
        }
    }

    /// Overlay the keys present in `args`; absent keys keep their current value
    pub fn merge(mut self, args: &GenerateArgs) -> Self {
        if let Some(v) = args.max_new_tokens {
            self.max_new_tokens = v;
        }
        if let Some(v) = args.temperature {
            self.temperature = v;
        }
        if let Some(v) = args.repetition_penalty {
            self.repetition_penalty = v;
        }
        if let Some(v) = args.do_sample {
            self.do_sample = v;
        }
        if let Some(v) = args.use_cache {
            self.use_cache = v;
        }
        if let Some(v) = &args.eos_token_id {
            self.eos_token_id = v.clone();
        }
        if let Some(v) = args.pad_token_id {
            self.pad_token_id = v;
        }
        if let Some(v) = args.top_k {
            self.top_k = v;
        }
        if let Some(v) = args.top_p {
            self.top_p = v;
        }
        if let Some(v) = args.seed {
            self.seed = v;
        }
        self
    }

    /// Defaults merged with optional overrides, then validated
    pub fn resolve(special: &SpecialTokens, args: Option<&GenerateArgs>) -> Result<Self> {
        let config = match args {
            Some(args) => Self::defaults(special).merge(args),
            None => Self::defaults(special),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_new_tokens == 0 {
            return Err(invalid("max_new_tokens must be at least 1"));
        }
        if !self.repetition_penalty.is_finite() || self.repetition_penalty <= 0.0 {
            return Err(invalid(format!(
                "repetition_penalty must be a positive number, got {}",
                self.repetition_penalty
            )));
        }
        if self.do_sample {
            self.validate_sampling()?;
        }
        Ok(())
    }

    /// Greedy decoding never reads these, so they are only checked when sampling
    fn validate_sampling(&self) -> Result<()> {
        if let Some(t) = self.temperature {
            if !t.is_finite() || t <= 0.0 {
                return Err(invalid(format!(
                    "temperature must be a positive number, got {}",
                    t
                )));
            }
        }
        if let Some(p) = self.top_p {
            if p.is_nan() || p <= 0.0 || p > 1.0 {
                return Err(invalid(format!("top_p must be in (0, 1], got {}", p)));
            }
        }
        if self.top_k == Some(0) {
            return Err(invalid("top_k must be at least 1"));
        }
        Ok(())
    }

    pub fn is_eos(&self, token: TokenId) -> bool {
        self.eos_token_id
            .as_ref()
            .is_some_and(|eos| eos.contains(token))
    }
}

fn invalid(msg: impl Into<String>) -> AdapterError {
    AdapterError::InvalidRequest(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn special() -> SpecialTokens {
        SpecialTokens {
            eos_token_id: Some(2),
            eos_token: "</s>".to_string(),
            pad_token_id: None,
        }
    }

    #[test]
    fn test_defaults() {
        let config = GenerationConfig::defaults(&special());
        assert_eq!(config.max_new_tokens, 1024);
        assert_eq!(config.temperature, None);
        assert_eq!(config.repetition_penalty, 1.2);
        assert!(!config.do_sample);
        assert!(config.use_cache);
        assert_eq!(config.eos_token_id, Some(EosTokenIds::Single(2)));
        assert_eq!(config.pad_token_id, None);
    }

    #[test]
    fn test_resolve_without_args_equals_defaults() {
        let resolved = GenerationConfig::resolve(&special(), None).unwrap();
        assert_eq!(resolved, GenerationConfig::defaults(&special()));

        let empty = GenerateArgs::default();
        let resolved = GenerationConfig::resolve(&special(), Some(&empty)).unwrap();
        assert_eq!(resolved, GenerationConfig::defaults(&special()));
    }

    #[test]
    fn test_merge_keeps_unsupplied_defaults() {
        let args: GenerateArgs = serde_json::from_str(r#"{"max_new_tokens": 10}"#).unwrap();
        let merged = GenerationConfig::defaults(&special()).merge(&args);

        let mut expected = GenerationConfig::defaults(&special());
        expected.max_new_tokens = 10;
        assert_eq!(merged, expected);
    }

    #[test]
    fn test_merge_overrides_every_key() {
        let args: GenerateArgs = serde_json::from_str(
            r#"{
                "max_new_tokens": 64,
                "temperature": 0.7,
                "repetition_penalty": 1.0,
                "do_sample": true,
                "use_cache": false,
                "eos_token_id": [2, 32000],
                "pad_token_id": 0,
                "top_k": 40,
                "top_p": 0.9,
                "seed": 7
            }"#,
        )
        .unwrap();
        let merged = GenerationConfig::defaults(&special()).merge(&args);
        assert_eq!(merged.max_new_tokens, 64);
        assert_eq!(merged.temperature, Some(0.7));
        assert_eq!(merged.repetition_penalty, 1.0);
        assert!(merged.do_sample);
        assert!(!merged.use_cache);
        assert_eq!(merged.eos_token_id, Some(EosTokenIds::Many(vec![2, 32000])));
        assert_eq!(merged.pad_token_id, Some(0));
        assert_eq!(merged.top_k, Some(40));
        assert_eq!(merged.top_p, Some(0.9));
        assert_eq!(merged.seed, Some(7));
    }

    #[test]
    fn test_explicit_null_overrides_default() {
        let args: GenerateArgs = serde_json::from_str(r#"{"eos_token_id": null}"#).unwrap();
        assert_eq!(args.eos_token_id, Some(None));
        let merged = GenerationConfig::defaults(&special()).merge(&args);
        assert_eq!(merged.eos_token_id, None);
        assert!(!merged.is_eos(2));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let parsed: std::result::Result<GenerateArgs, _> =
            serde_json::from_str(r#"{"max_new_tokens": 5, "num_beams": 4}"#);
        let err = parsed.unwrap_err().to_string();
        assert!(err.contains("num_beams"));
    }

    #[test]
    fn test_validation() {
        let base = GenerationConfig::defaults(&special());

        let mut config = base.clone();
        config.max_new_tokens = 0;
        assert!(matches!(
            config.validate(),
            Err(AdapterError::InvalidRequest(_))
        ));

        let mut config = base.clone();
        config.repetition_penalty = f32::NAN;
        assert!(config.validate().is_err());

        let mut sampling = base;
        sampling.do_sample = true;

        let mut config = sampling.clone();
        config.temperature = Some(0.0);
        assert!(config.validate().is_err());

        let mut config = sampling.clone();
        config.top_p = Some(1.5);
        assert!(config.validate().is_err());

        let mut config = sampling;
        config.top_k = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_greedy_ignores_sampling_knobs() {
        let args: GenerateArgs =
            serde_json::from_str(r#"{"temperature": 0.0, "top_p": 0.0, "top_k": 0}"#).unwrap();
        let config = GenerationConfig::resolve(&special(), Some(&args)).unwrap();
        assert!(!config.do_sample);
        assert_eq!(config.temperature, Some(0.0));

        let mut sampled = args;
        sampled.do_sample = Some(true);
        assert!(matches!(
            GenerationConfig::resolve(&special(), Some(&sampled)),
            Err(AdapterError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_eos_ids() {
        let single = EosTokenIds::Single(2);
        assert_eq!(single.ids(), &[2]);
        let many: EosTokenIds = serde_json::from_str("[2, 7]").unwrap();
        assert!(many.contains(7));
        assert!(!many.contains(3));
    }
}

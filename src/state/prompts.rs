use std::sync::Arc;

use rand::seq::IndexedRandom;

use crate::{config::AppConfig, state::room::Language};

/// Chooses the letter each round is played on.
pub trait PromptSource: Send + Sync {
    /// Draw the next prompt, avoiding the ones in `used` while possible.
    fn next_prompt(&self, language: Language, used: &[&str]) -> String;
}

/// Random letters drawn from the configured per-language alphabets.
#[derive(Debug, Clone)]
pub struct AlphabetPrompts {
    config: Arc<AppConfig>,
}

impl AlphabetPrompts {
    /// Draw from the alphabets of `config`.
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self { config }
    }
}

impl PromptSource for AlphabetPrompts {
    fn next_prompt(&self, language: Language, used: &[&str]) -> String {
        self.config
            .unused_prompts(language, used)
            .choose(&mut rand::rng())
            .map(|prompt| (*prompt).to_string())
            .unwrap_or_else(|| "A".to_string())
    }
}

/// Deterministic sequence of prompts, cycling once exhausted.
#[derive(Debug, Clone)]
pub struct FixedPrompts {
    prompts: Vec<String>,
}

impl FixedPrompts {
    /// Cycle through `prompts` in order.
    pub fn new<I, S>(prompts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prompts: prompts.into_iter().map(Into::into).collect(),
        }
    }
}

impl PromptSource for FixedPrompts {
    fn next_prompt(&self, _language: Language, used: &[&str]) -> String {
        if self.prompts.is_empty() {
            return "A".to_string();
        }
        self.prompts[used.len() % self.prompts.len()].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alphabet_prompts_avoid_used_letters() {
        let prompts = AlphabetPrompts::new(Arc::new(AppConfig::default()));
        let alphabet: Vec<String> = AppConfig::default().alphabet(Language::Es).to_vec();
        let used: Vec<&str> = alphabet[1..].iter().map(String::as_str).collect();
        for _ in 0..10 {
            assert_eq!(prompts.next_prompt(Language::Es, &used), alphabet[0]);
        }
    }

    #[test]
    fn fixed_prompts_follow_round_count() {
        let prompts = FixedPrompts::new(["K", "Q"]);
        assert_eq!(prompts.next_prompt(Language::En, &[]), "K");
        assert_eq!(prompts.next_prompt(Language::En, &["K"]), "Q");
        assert_eq!(prompts.next_prompt(Language::En, &["K", "Q"]), "K");
    }
}

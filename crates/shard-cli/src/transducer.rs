//! [`LlmTransducer`] – NL input to [`ParsedIntent`] via the attached LLM.
//!
//! Returns `Err` on malformed or exhausted model output so Perception's own
//! regex verb-family fallback takes over; this transducer never falls back
//! itself.

use std::sync::Arc;

use async_trait::async_trait;
use kernel_api::{KernelApiError, LlmClient, ParsedIntent, Transducer, TransducerOutput};
use serde::Deserialize;
use shard_types::Atom;

const SYSTEM_PROMPT: &str = "Parse the operator's input into a single JSON object \
    {category, verb, target, constraint, confidence}. category and verb are short \
    lowercase words; target and constraint may be null; confidence is a float in \
    [0,1]. Reply with the JSON object alone, no prose.";

fn default_confidence() -> f64 {
    0.5
}

#[derive(Debug, Deserialize)]
struct RawIntent {
    category: String,
    verb: String,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    constraint: Option<String>,
    #[serde(default = "default_confidence")]
    confidence: f64,
}

pub struct LlmTransducer {
    llm: Arc<dyn LlmClient>,
}

impl LlmTransducer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        LlmTransducer { llm }
    }
}

#[async_trait]
impl Transducer for LlmTransducer {
    async fn parse_intent_with_gcd(
        &self,
        input: &str,
        history: &[String],
        max_retries: u32,
    ) -> Result<TransducerOutput, KernelApiError> {
        let user_prompt = if history.is_empty() {
            input.to_string()
        } else {
            format!("Prior turns:\n{}\n\nCurrent input: {}", history.join("\n"), input)
        };

        let mut last_err = KernelApiError::Serialization("transducer made no attempts".to_string());
        for _ in 0..=max_retries {
            let reply = self.llm.complete_with_system(SYSTEM_PROMPT, &user_prompt).await?;
            match serde_json::from_str::<RawIntent>(reply.trim()) {
                Ok(raw) => {
                    return Ok(TransducerOutput {
                        intent: ParsedIntent {
                            category: Atom::new(raw.category),
                            verb: Atom::new(raw.verb),
                            target: raw.target,
                            constraint: raw.constraint,
                            confidence: raw.confidence.clamp(0.0, 1.0),
                        },
                        mangle_updates: Vec::new(),
                    });
                }
                Err(e) => last_err = KernelApiError::Serialization(e.to_string()),
            }
        }
        Err(last_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_api::mock::ScriptedLlmClient;

    #[tokio::test]
    async fn parses_well_formed_json_reply() {
        let llm = Arc::new(ScriptedLlmClient::new(
            r#"{"category":"instruction","verb":"read","target":"main.rs","confidence":0.9}"#,
        ));
        let transducer = LlmTransducer::new(llm);
        let out = transducer.parse_intent_with_gcd("read main.rs", &[], 2).await.unwrap();
        assert_eq!(out.intent.verb.stripped(), "read");
        assert_eq!(out.intent.target.as_deref(), Some("main.rs"));
    }

    #[tokio::test]
    async fn malformed_reply_exhausts_retries_and_errors() {
        let llm = Arc::new(ScriptedLlmClient::new("not json"));
        let transducer = LlmTransducer::new(llm);
        let result = transducer.parse_intent_with_gcd("whatever", &[], 1).await;
        assert!(result.is_err());
    }
}

use super::*;
use crate::llm::{extract_json, GenerateRequest, LlmError, LlmManager};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

const SYSTEM_PROMPT: &str = "You are playing the word game Codenames with a team of humans and \
    other AI players. Play to win, keep messages short and friendly, and always answer with a \
    single JSON object exactly in the requested shape, without any other text.";

/// Collaborator backed by a configured LLM provider
pub struct LlmAgent {
    llm: Arc<LlmManager>,
    /// "provider:model"; None uses the first configured provider
    model_id: Option<String>,
    timeout: Duration,
    max_tokens: u32,
}

#[derive(Debug, serde::Deserialize)]
struct RawWordDecision {
    approved: bool,
    #[serde(default = "default_confidence")]
    confidence: f64,
}

#[derive(Debug, serde::Deserialize)]
struct RawMetaDecision {
    action: String,
    #[serde(default = "default_confidence")]
    confidence: f64,
    #[serde(default)]
    reasoning: Option<String>,
}

fn default_confidence() -> f64 {
    0.5
}

impl LlmAgent {
    pub fn new(
        llm: Arc<LlmManager>,
        model_id: Option<String>,
        timeout: Duration,
        max_tokens: u32,
    ) -> Self {
        Self {
            llm,
            model_id,
            timeout,
            max_tokens,
        }
    }

    async fn ask<T: DeserializeOwned>(&self, prompt: String) -> LlmResult<T> {
        let request = GenerateRequest {
            system_prompt: SYSTEM_PROMPT.to_string(),
            prompt,
            json: true,
            max_tokens: Some(self.max_tokens),
            timeout: self.timeout,
            model_override: None,
        };
        let response = self.llm.generate(self.model_id.as_deref(), request).await?;
        tracing::debug!(
            model = %response.metadata.model,
            latency_ms = response.metadata.latency_ms,
            "Agent reply received"
        );
        parse_reply(&response.text)
    }
}

fn parse_reply<T: DeserializeOwned>(text: &str) -> LlmResult<T> {
    let json = extract_json(text)?;
    serde_json::from_str(json).map_err(|e| LlmError::ParseError(e.to_string()))
}

#[async_trait]
impl AgentCollaborator for LlmAgent {
    async fn get_clue(&self, ctx: &GameContext) -> LlmResult<ClueSuggestion> {
        let prompt = format!(
            "{}\nGive your team a one-word clue that links as many of your own unrevealed \
             words as possible while avoiding the other team's words and the assassin. The \
             clue must not be a word on the board.\n\
             Reply as {{\"word\": \"<clue>\", \"number\": <how many words it links>}}",
            ctx.describe()
        );
        let clue: ClueSuggestion = self.ask(prompt).await?;
        if clue.word.trim().is_empty() || clue.word.trim().contains(char::is_whitespace) {
            return Err(LlmError::ParseError(format!(
                "Clue is not a single word: {:?}",
                clue.word
            )));
        }
        Ok(clue)
    }

    async fn discuss(&self, ctx: &GameContext) -> LlmResult<DiscussionReply> {
        let prompt = format!(
            "{}\nDiscuss the clue with your team. Suggest the board words you think it points \
             to, each with a confidence between 0 and 1.\n\
             Reply as {{\"message\": \"<what you say>\", \"suggestions\": \
             [{{\"word\": \"<board word>\", \"confidence\": <0..1>}}]}}",
            ctx.describe()
        );
        let mut reply: DiscussionReply = self.ask(prompt).await?;
        reply.suggestions.retain(|s| ctx.is_guessable(&s.word));
        for s in &mut reply.suggestions {
            s.word = s.word.trim().to_uppercase();
            s.confidence = s.confidence.clamp(0.0, 1.0);
        }
        Ok(reply)
    }

    async fn vote_on_word(&self, ctx: &GameContext, word: &str) -> LlmResult<WordDecision> {
        let prompt = format!(
            "{}\nShould your team guess {}? Reply as {{\"approved\": true|false, \
             \"confidence\": <0..1>}}",
            ctx.describe(),
            word
        );
        let raw: RawWordDecision = self.ask(prompt).await?;
        Ok(WordDecision {
            approved: raw.approved,
            confidence: raw.confidence.clamp(0.0, 1.0),
        })
    }

    async fn vote_on_meta(&self, ctx: &GameContext) -> LlmResult<MetaDecision> {
        let prompt = format!(
            "{}\nYour team just guessed correctly. Decide whether to keep guessing \
             (\"continue\"), pass the turn (\"end_turn\"), or talk it over first \
             (\"discuss_more\").\n\
             Reply as {{\"action\": \"continue\"|\"end_turn\"|\"discuss_more\", \
             \"confidence\": <0..1>, \"reasoning\": \"<one sentence>\"}}",
            ctx.describe()
        );
        let raw: RawMetaDecision = self.ask(prompt).await?;
        let action = raw
            .action
            .parse::<MetaAction>()
            .map_err(LlmError::ParseError)?;
        Ok(MetaDecision {
            action,
            confidence: raw.confidence.clamp(0.0, 1.0),
            reasoning: raw.reasoning.filter(|r| !r.trim().is_empty()),
        })
    }

    fn name(&self) -> &str {
        self.model_id.as_deref().unwrap_or("default")
    }
}

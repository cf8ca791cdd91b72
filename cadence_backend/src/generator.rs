use anyhow::Result;
use async_trait::async_trait;
use rand::seq::SliceRandom;

use crate::llm_client::{LlmClient, Message};
use crate::platform::{ActionCategory, Snippet, Target};

const MAX_PROMPT_SNIPPETS: usize = 10;
const MAX_SNIPPET_CHARS: usize = 400;

/// Produces the text for an action. An empty string means nothing usable was produced.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(
        &self,
        target: &Target,
        snippets: &[Snippet],
        category: ActionCategory,
    ) -> Result<String>;
}

/// Ways of framing the request; one is picked per generation so output does
/// not settle into a single register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Balanced,
    Supportive,
    Candid,
}

impl Framing {
    const ALL: [Framing; 3] = [Framing::Balanced, Framing::Supportive, Framing::Candid];

    fn guidance(self) -> &'static str {
        match self {
            Framing::Balanced => {
                "Weigh the situation from more than one perspective, say where you land and why, \
                 and ground the reasoning in specific details from the text."
            }
            Framing::Supportive => {
                "Acknowledge the feelings involved, point out anything concerning, \
                 and suggest a practical next step."
            }
            Framing::Candid => {
                "Be direct and honest about the actions described without attacking anyone, \
                 and keep the view forward-looking."
            }
        }
    }
}

pub struct LlmContentGenerator {
    client: LlmClient,
    system_prompt: String,
}

impl LlmContentGenerator {
    pub fn new(client: LlmClient, system_prompt: String) -> Self {
        Self {
            client,
            system_prompt,
        }
    }
}

#[async_trait]
impl ContentGenerator for LlmContentGenerator {
    async fn generate(
        &self,
        target: &Target,
        snippets: &[Snippet],
        category: ActionCategory,
    ) -> Result<String> {
        let framing = *Framing::ALL
            .choose(&mut rand::thread_rng())
            .unwrap_or(&Framing::Balanced);
        tracing::debug!(
            "Generating {} for {} with {:?} framing via {}",
            category,
            target.id,
            framing,
            self.client.model()
        );

        let messages = vec![
            Message::system(self.system_prompt.clone()),
            Message::user(build_prompt(target, snippets, category, framing)),
        ];
        let raw = self.client.generate(messages).await?;
        Ok(raw.trim().to_string())
    }
}

pub fn build_prompt(
    target: &Target,
    snippets: &[Snippet],
    category: ActionCategory,
    framing: Framing,
) -> String {
    let discussion = if snippets.is_empty() {
        "(no other responses yet)".to_string()
    } else {
        snippets
            .iter()
            .take(MAX_PROMPT_SNIPPETS)
            .map(|s| format!("- [{}] {}", s.score, truncate(&s.body, MAX_SNIPPET_CHARS)))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let task = match category {
        ActionCategory::NewItem => "Write a top-level response to this post.",
        ActionCategory::Reply => "Write a reply to this remark, continuing the conversation.",
    };

    format!(
        "Title: {}\nTopic: {}\nText: {}\n\nOther responses (score in brackets):\n{}\n\n{}\n{}\nKeep it concise (20-60 words). Return only the response text.",
        target.title, target.origin, target.body, discussion, task, framing.guidance()
    )
}

fn truncate(input: &str, max_chars: usize) -> String {
    let mut out: String = input.chars().take(max_chars).collect();
    if input.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn target() -> Target {
        Target {
            id: "p1".to_string(),
            thread_id: "p1".to_string(),
            title: "Moving out early".to_string(),
            body: "My roommate wants to leave before the lease ends.".to_string(),
            score: 12,
            origin: "advice".to_string(),
            url: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn prompt_includes_target_and_scored_snippets() {
        let snippets = vec![Snippet {
            body: "Talk to the landlord first".to_string(),
            score: 42,
        }];
        let prompt = build_prompt(&target(), &snippets, ActionCategory::NewItem, Framing::Balanced);
        assert!(prompt.contains("Title: Moving out early"));
        assert!(prompt.contains("Topic: advice"));
        assert!(prompt.contains("- [42] Talk to the landlord first"));
        assert!(prompt.contains("top-level response"));
    }

    #[test]
    fn reply_prompt_without_snippets_notes_empty_discussion() {
        let prompt = build_prompt(&target(), &[], ActionCategory::Reply, Framing::Candid);
        assert!(prompt.contains("(no other responses yet)"));
        assert!(prompt.contains("reply to this remark"));
    }

    #[test]
    fn long_snippets_are_truncated() {
        let long = "y".repeat(MAX_SNIPPET_CHARS + 50);
        assert_eq!(truncate(&long, MAX_SNIPPET_CHARS).chars().count(), MAX_SNIPPET_CHARS + 3);
        assert_eq!(truncate("short", MAX_SNIPPET_CHARS), "short");
    }
}

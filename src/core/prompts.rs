//! Prompt templates and evaluation parsing

use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

use crate::core::errors::{GatewayError, Result};
use crate::core::models::{AudienceType, PracticeFeedback};

fn audience_prompt(audience: AudienceType) -> &'static str {
    match audience {
        AudienceType::Parent => "You are explaining to a parent who has no technical background. Use simple, everyday analogies and avoid jargon completely.",
        AudienceType::Partner => "You are explaining to a romantic partner who is curious but not technical. Use relatable examples and keep it conversational.",
        AudienceType::Friend => "You are explaining to a friend who is interested but not in tech. Use casual language and fun analogies.",
        AudienceType::Child => "You are explaining to a 10-year-old child. Use very simple words, fun examples, and make it easy to understand.",
        AudienceType::Boss => "You are explaining to your boss or superior at work who may not be technical. Use professional language, business analogies, and focus on impact and outcomes.",
    }
}

/// Full prompt for rewriting `technical_text` for `audience`
pub fn translation_prompt(technical_text: &str, audience: AudienceType) -> String {
    format!(
        "{}\n\n\
         Your task is to take technical concepts and explain them in a way that is:\n\
         1. Easy to understand for the target audience\n\
         2. Accurate but simplified\n\
         3. Engaging and relatable\n\
         4. Free of technical jargon\n\n\
         Keep the explanation concise (2-3 paragraphs maximum).\n\n\
         Explain this technical concept: {}",
        audience_prompt(audience),
        technical_text
    )
}

const EVALUATION_PROMPT: &str = r#"You are an expert at evaluating how well someone explains technical concepts to non-technical audiences.

Evaluate the explanation based on:
1. Clarity (0-25 points): Is it easy to understand?
2. Accuracy (0-25 points): Is the core concept correct?
3. Engagement (0-25 points): Is it interesting and relatable?
4. Simplicity (0-25 points): Does it avoid unnecessary jargon?

Provide:
- A total score out of 100
- Brief feedback (2-3 sentences)
- 2-3 specific suggestions for improvement

Format your response as JSON:
{
  "score": <number>,
  "feedback": "<string>",
  "suggestions": ["<string>", "<string>", "<string>"]
}"#;

/// Full prompt for scoring a practice explanation
pub fn evaluation_prompt(user_explanation: &str, challenge: Option<&str>) -> String {
    let body = match challenge {
        Some(challenge) => format!(
            "Challenge: {}\n\nUser's explanation: {}",
            challenge, user_explanation
        ),
        None => format!("Evaluate this explanation: {}", user_explanation),
    };

    format!("{}\n\n{}", EVALUATION_PROMPT, body)
}

/// Models answer with either naming; `explanation` and `improvements` win
/// when both are present.
#[derive(Deserialize)]
struct RawFeedback {
    score: f64,
    #[serde(default)]
    feedback: Option<String>,
    #[serde(default)]
    explanation: Option<String>,
    #[serde(default)]
    suggestions: Option<Vec<String>>,
    #[serde(default)]
    improvements: Option<Vec<String>>,
}

fn code_fence() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| Regex::new(r"```(?:json)?\n?").expect("static regex"))
}

/// Parse the model's evaluation, tolerating markdown code fences
pub fn parse_feedback(raw: &str) -> Result<PracticeFeedback> {
    let cleaned = code_fence().replace_all(raw, "");
    let parsed: RawFeedback = serde_json::from_str(cleaned.trim()).map_err(|e| {
        GatewayError::UpstreamStreamError {
            message: format!("Could not parse evaluation: {}", e),
        }
    })?;

    Ok(PracticeFeedback {
        score: parsed.score.round().clamp(0.0, 100.0) as u32,
        feedback: parsed
            .explanation
            .filter(|text| !text.is_empty())
            .or(parsed.feedback)
            .unwrap_or_default(),
        suggestions: parsed.improvements.or(parsed.suggestions).unwrap_or_default(),
    })
}

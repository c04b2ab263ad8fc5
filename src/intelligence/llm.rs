use openai_api_rs::v1::{api::OpenAIClient, chat_completion, common::GPT4_O};

use crate::error::Error;

pub fn create_openai_client() -> Result<OpenAIClient, Error> {
    let api_key = std::env::var("OPENROUTER_API_KEY")
        .map_err(|_| Error::Config("OPENROUTER_API_KEY not set".to_string()))?;
    OpenAIClient::builder()
        .with_endpoint("https://openrouter.ai/api/v1")
        .with_api_key(api_key)
        .build()
        .map_err(|e| Error::Config(format!("Failed to build LLM client: {}", e)))
}

pub struct Completion {
    pub text: String,
    pub tokens_used: i64,
}

/// Single-turn text completion. Both the briefing writer and the profile
/// analyzer go through here with their own temperature/token settings.
pub async fn complete_text(
    prompt: &str,
    temperature: f64,
    max_tokens: i64,
) -> Result<Completion, Error> {
    let client = create_openai_client()?;
    let request = chat_completion::ChatCompletionRequest::new(
        GPT4_O.to_string(),
        vec![chat_completion::ChatCompletionMessage {
            role: chat_completion::MessageRole::user,
            content: chat_completion::Content::Text(prompt.to_string()),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }],
    )
    .temperature(temperature)
    .max_tokens(max_tokens);

    let result = client
        .chat_completion(request)
        .await
        .map_err(|e| Error::Generation(format!("Chat completion failed: {}", e)))?;

    let tokens_used = result.usage.total_tokens as i64;
    let text = result
        .choices
        .first()
        .and_then(|choice| choice.message.content.clone())
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| Error::Generation("Empty completion response".to_string()))?;

    Ok(Completion { text, tokens_used })
}

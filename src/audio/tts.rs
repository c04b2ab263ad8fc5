use chrono::Utc;
use serde_json::json;

use crate::audio::storage::BlobStorage;
use crate::error::Error;

const WORDS_PER_MINUTE: f64 = 130.0;

pub struct SynthesizedAudio {
    pub url: String,
    pub duration_seconds: u32,
}

/// Spoken duration estimate at roughly 130 words per minute.
pub fn estimate_duration_seconds(text: &str) -> u32 {
    let words = text.split_whitespace().count() as f64;
    (words / WORDS_PER_MINUTE * 60.0).ceil() as u32
}

/// Synthesizes the script through ElevenLabs, stores the MP3 under a
/// per-user timestamped key, and returns a 24h signed URL plus duration.
pub async fn synthesize_audio(
    storage: &BlobStorage,
    script: &str,
    user_email: &str,
) -> Result<SynthesizedAudio, Error> {
    let api_key = std::env::var("ELEVENLABS_API_KEY")
        .map_err(|_| Error::Config("ELEVENLABS_API_KEY not set".to_string()))?;
    let voice_id = std::env::var("BRIEFING_VOICE_ID")
        .map_err(|_| Error::Config("BRIEFING_VOICE_ID not set".to_string()))?;

    let response = reqwest::Client::new()
        .post(format!(
            "https://api.elevenlabs.io/v1/text-to-speech/{}",
            voice_id
        ))
        .header("xi-api-key", api_key)
        .json(&json!({
            "text": script,
            "model_id": "eleven_multilingual_v2",
            "voice_settings": {
                "stability": 0.5,
                "similarity_boost": 0.75,
            },
        }))
        .send()
        .await
        .map_err(|e| Error::Synthesis(format!("TTS request failed: {}", e)))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Synthesis(format!(
            "TTS failed ({}): {}",
            status, body
        )));
    }

    let audio = response
        .bytes()
        .await
        .map_err(|e| Error::Synthesis(format!("TTS body read failed: {}", e)))?;
    if audio.is_empty() {
        return Err(Error::Synthesis("TTS returned no audio".to_string()));
    }

    let key = format!("{}/{}.mp3", user_email, Utc::now().timestamp_millis());
    storage.put(&key, &audio).await?;

    Ok(SynthesizedAudio {
        url: storage.signed_url(&key),
        duration_seconds: estimate_duration_seconds(script),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_rounds_up() {
        // 130 words is exactly a minute; 131 tips into the next second.
        let minute = vec!["palabra"; 130].join(" ");
        assert_eq!(estimate_duration_seconds(&minute), 60);
        let over = vec!["palabra"; 131].join(" ");
        assert_eq!(estimate_duration_seconds(&over), 61);
    }

    #[test]
    fn empty_script_is_zero_seconds() {
        assert_eq!(estimate_duration_seconds(""), 0);
    }
}

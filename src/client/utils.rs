use ai_therapist_types::audio::{
    VOICE_AUDIO_FIELD, VOICE_AUDIO_FILE_NAME, VOICE_AUDIO_MIME, VOICE_IS_FIRST_FIELD,
    VOICE_SESSION_FIELD,
};
use reqwest::multipart::{Form, Part};

use crate::client::config::Config;
use crate::client::VoiceTurn;

pub fn build_url(config: &Config, path: &str) -> String {
    format!("{}{}", config.base_url(), path)
}

pub fn build_voice_form(turn: &VoiceTurn) -> reqwest::Result<Form> {
    let audio = Part::bytes(turn.audio().as_bytes().to_vec())
        .file_name(VOICE_AUDIO_FILE_NAME)
        .mime_str(VOICE_AUDIO_MIME)?;

    let mut form = Form::new()
        .part(VOICE_AUDIO_FIELD, audio)
        .text(VOICE_IS_FIRST_FIELD, turn.is_first().to_string());
    if let Some(session_id) = turn.session_id() {
        form = form.text(VOICE_SESSION_FIELD, session_id.as_str().to_string());
    }
    Ok(form)
}

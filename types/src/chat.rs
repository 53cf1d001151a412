use crate::audio::Base64EncodedAudioBytes;
use crate::banner::CrisisBanner;
use crate::session::SessionId;

/// Body of `POST /chat/text`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TextTurnRequest {
    /// What the user typed. Empty only for the opening turn.
    user_input: String,

    /// Set on the synthetic opening turn that fetches the greeting.
    is_first: bool,

    /// Omitted until the backend has issued one.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    session_id: Option<SessionId>,
}

impl TextTurnRequest {
    pub fn new(user_input: &str) -> Self {
        Self {
            user_input: user_input.to_string(),
            is_first: false,
            session_id: None,
        }
    }

    pub fn with_first_turn(mut self, is_first: bool) -> Self {
        self.is_first = is_first;
        self
    }

    pub fn with_session_id(mut self, session_id: Option<SessionId>) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn user_input(&self) -> &str {
        &self.user_input
    }

    pub fn is_first(&self) -> bool {
        self.is_first
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }
}

/// Response body shared by `/chat/text` and `/chat/voice`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Reply {
    reply_text: String,

    /// Synthesized speech for `reply_text`, base64 of a WAV file.
    #[serde(default)]
    reply_audio_base64: Option<Base64EncodedAudioBytes>,

    #[serde(default)]
    crisis: bool,

    /// The session the reply belongs to; callers adopt it as current.
    #[serde(default)]
    session_id: Option<SessionId>,

    #[serde(default)]
    banner: Option<CrisisBanner>,
}

impl Reply {
    pub fn new(reply_text: &str) -> Self {
        Self {
            reply_text: reply_text.to_string(),
            reply_audio_base64: None,
            crisis: false,
            session_id: None,
            banner: None,
        }
    }

    pub fn with_audio(mut self, audio: Base64EncodedAudioBytes) -> Self {
        self.reply_audio_base64 = Some(audio);
        self
    }

    pub fn with_crisis(mut self, crisis: bool) -> Self {
        self.crisis = crisis;
        self
    }

    pub fn with_session_id(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_banner(mut self, banner: CrisisBanner) -> Self {
        self.banner = Some(banner);
        self
    }

    pub fn reply_text(&self) -> &str {
        &self.reply_text
    }

    pub fn reply_audio_base64(&self) -> Option<&str> {
        self.reply_audio_base64.as_deref()
    }

    pub fn crisis(&self) -> bool {
        self.crisis
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    pub fn banner(&self) -> Option<&CrisisBanner> {
        self.banner.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opening_request_omits_missing_session() {
        let request = TextTurnRequest::new("").with_first_turn(true);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json, serde_json::json!({ "user_input": "", "is_first": true }));
    }

    #[test]
    fn request_carries_session_when_known() {
        let request = TextTurnRequest::new("hello").with_session_id(Some(SessionId::new("S1")));
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["session_id"], "S1");
        assert_eq!(json["is_first"], false);
    }

    #[test]
    fn reply_accepts_structured_banner_and_extra_fields() {
        let body = r#"{
            "reply_text": "You're not alone.",
            "reply_audio_url": null,
            "crisis": true,
            "banner": {
                "message": "It sounds like you might be going through a really difficult time.",
                "helpline": { "international": "Find your local helpline at https://findahelpline.com" }
            },
            "session_id": "S1"
        }"#;
        let reply: Reply = serde_json::from_str(body).unwrap();
        assert!(reply.crisis());
        assert_eq!(reply.session_id(), Some(&SessionId::new("S1")));
        assert!(reply.reply_audio_base64().is_none());

        let banner = reply.banner().unwrap();
        assert!(banner.message().starts_with("It sounds like"));
        assert_eq!(banner.helplines().count(), 1);
    }

    #[test]
    fn reply_accepts_plain_banner_and_null_session() {
        let body = r#"{ "reply_text": "hi", "crisis": false, "session_id": null, "banner": "take care" }"#;
        let reply: Reply = serde_json::from_str(body).unwrap();
        assert_eq!(reply.banner(), Some(&CrisisBanner::Text("take care".to_string())));
        assert!(reply.session_id().is_none());
        assert_eq!(reply.banner().unwrap().helplines().count(), 0);
    }
}

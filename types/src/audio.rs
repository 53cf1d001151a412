/// Audio data encoded as base64
pub type Base64EncodedAudioBytes = String;

/// Multipart field carrying the recorded clip on `/chat/voice`.
pub const VOICE_AUDIO_FIELD: &str = "audio";
/// File name reported for the recorded clip.
pub const VOICE_AUDIO_FILE_NAME: &str = "clip.wav";
/// Content type of the recorded clip.
pub const VOICE_AUDIO_MIME: &str = "audio/wav";
/// Multipart text field carrying the first-turn flag ("true" / "false").
pub const VOICE_IS_FIRST_FIELD: &str = "is_first";
/// Multipart text field carrying the session id, omitted when there is none.
pub const VOICE_SESSION_FIELD: &str = "session_id";

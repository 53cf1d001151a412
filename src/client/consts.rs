pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

pub const TEXT_TURN_PATH: &str = "/chat/text";
pub const VOICE_TURN_PATH: &str = "/chat/voice";

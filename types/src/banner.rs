use std::collections::BTreeMap;

/// Optional banner attached to a reply, usually alongside `crisis: true`.
///
/// Backends send either a bare string or an object with a message and a map of
/// region -> helpline text.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum CrisisBanner {
    Text(String),
    Structured {
        message: String,
        #[serde(default)]
        helpline: BTreeMap<String, String>,
    },
}

impl CrisisBanner {
    pub fn message(&self) -> &str {
        match self {
            CrisisBanner::Text(message) => message,
            CrisisBanner::Structured { message, .. } => message,
        }
    }

    pub fn helplines(&self) -> impl Iterator<Item = (&str, &str)> {
        let helpline = match self {
            CrisisBanner::Text(_) => None,
            CrisisBanner::Structured { helpline, .. } => Some(helpline),
        };
        helpline
            .into_iter()
            .flat_map(|map| map.iter().map(|(region, text)| (region.as_str(), text.as_str())))
    }
}

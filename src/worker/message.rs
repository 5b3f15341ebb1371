//! Inbound message payloads
//!
//! Pages post either objects or compact arrays:
//!
//! ```text
//! {"urls": ["/build/a.js"]}
//! {"type": "prefetch", "base": "/build/", "urls": ["a.js", "b.js"]}
//! {"type": "graph", "base": "/build/"}
//! {"type": "ping"}
//! ["prefetch", "/build/", "a.js", "b.js"]
//! ["graph", "/build/", ...]
//! ["ping"]
//! ```
//!
//! Anything else is not an instruction and is dropped by the drainer.

use serde::Deserialize;
use serde_json::Value;

/// A parsed prefetch instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Fetch and store each URL, in order
    Prefetch {
        /// Directory the URLs are relative to (origin when absent)
        base: Option<String>,
        urls: Vec<String>,
    },
    /// Intercept `.js` resources under this base from now on
    RegisterBase(String),
    /// Liveness probe
    Ping,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Tagged {
    Prefetch {
        urls: Vec<String>,
        #[serde(default)]
        base: Option<String>,
    },
    Graph {
        base: String,
    },
    Ping,
}

#[derive(Deserialize)]
struct UrlList {
    urls: Vec<String>,
}

impl Instruction {
    /// Parse a message payload, returning `None` for unrecognized shapes
    pub fn from_payload(payload: &Value) -> Option<Self> {
        match payload {
            Value::Object(map) if map.contains_key("type") => {
                let tagged = Tagged::deserialize(payload).ok()?;
                Some(match tagged {
                    Tagged::Prefetch { urls, base } => Self::Prefetch { base, urls },
                    Tagged::Graph { base } => Self::RegisterBase(base),
                    Tagged::Ping => Self::Ping,
                })
            }
            Value::Object(_) => {
                let list = UrlList::deserialize(payload).ok()?;
                Some(Self::Prefetch {
                    base: None,
                    urls: list.urls,
                })
            }
            Value::Array(items) => Self::from_tuple(items),
            _ => None,
        }
    }

    fn from_tuple(items: &[Value]) -> Option<Self> {
        let (command, rest) = items.split_first()?;
        match command.as_str()? {
            "ping" => Some(Self::Ping),
            "graph" => {
                let base = rest.first()?.as_str()?;
                Some(Self::RegisterBase(base.to_string()))
            }
            "prefetch" => {
                let (base, names) = rest.split_first()?;
                let urls = names
                    .iter()
                    .map(|name| name.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()?;
                Some(Self::Prefetch {
                    base: Some(base.as_str()?.to_string()),
                    urls,
                })
            }
            _ => None,
        }
    }

    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Prefetch { .. } => "prefetch",
            Self::RegisterBase(_) => "graph",
            Self::Ping => "ping",
        }
    }
}

//! Wire types shared by the streaming and fallback endpoints

use serde::{Deserialize, Serialize};

/// Administrative location attached to a query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    #[serde(default)]
    pub province: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub district: Option<String>,
}

impl Location {
    pub fn new(
        province: impl Into<String>,
        city: impl Into<String>,
        district: Option<String>,
    ) -> Self {
        Self {
            province: Some(province.into()),
            city: Some(city.into()),
            district,
        }
    }

    /// Human readable form, e.g. `山东省济南市历下区`
    pub fn label(&self) -> String {
        [&self.province, &self.city, &self.district]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.province.is_none() && self.city.is_none() && self.district.is_none()
    }
}

/// Raw geographic position reported by a location capability
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Everything the backend needs to answer one question.
///
/// Built once per session and never mutated after the channel opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryContext {
    question: String,
    location: Option<Location>,
}

impl QueryContext {
    /// Returns `None` for empty or whitespace-only questions.
    pub fn new(question: &str, location: Option<Location>) -> Option<Self> {
        let question = question.trim();
        if question.is_empty() {
            return None;
        }
        Some(Self {
            question: question.to_string(),
            location: location.filter(|l| !l.is_empty()),
        })
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn location(&self) -> Option<&Location> {
        self.location.as_ref()
    }

    /// Query parameters for the streaming endpoint, absent fields omitted
    pub fn stream_params(&self) -> Vec<(&'static str, &str)> {
        let mut params = vec![("question", self.question.as_str())];
        if let Some(location) = &self.location {
            if let Some(city) = &location.city {
                params.push(("city", city.as_str()));
            }
            if let Some(province) = &location.province {
                params.push(("province", province.as_str()));
            }
            if let Some(district) = &location.district {
                params.push(("district", district.as_str()));
            }
        }
        params
    }

    /// JSON body for the fallback endpoint
    pub fn fallback_body(&self) -> FallbackRequestBody<'_> {
        FallbackRequestBody {
            question: &self.question,
            return_sources: true,
            location: self.location.as_ref(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FallbackRequestBody<'a> {
    pub question: &'a str,
    pub return_sources: bool,
    pub location: Option<&'a Location>,
}

/// One retrieved document backing an answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub source: String,
    #[serde(default)]
    pub similarity: f64,
}

/// A product picked by the backend's subsidy recommender
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendedProduct {
    pub name: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub subsidy: f64,
}

/// Purchase plan attached to recommendation answers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    #[serde(default)]
    pub selected_products: Vec<RecommendedProduct>,
    #[serde(default)]
    pub total_subsidy: f64,
    #[serde(default)]
    pub final_cost: f64,
}

/// Final answer produced by either endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultPayload {
    pub answer: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default, deserialize_with = "nullable_vec")]
    pub sources: Vec<SourceRef>,
    #[serde(default)]
    pub recommendation: Option<Recommendation>,
    #[serde(default)]
    pub intent_type: Option<String>,
    #[serde(default)]
    pub rejected: bool,
}

impl ResultPayload {
    #[cfg(test)]
    pub fn new(answer: impl Into<String>, confidence: f64, sources: Vec<SourceRef>) -> Self {
        Self {
            answer: answer.into(),
            confidence,
            sources,
            recommendation: None,
            intent_type: None,
            rejected: false,
        }
    }
}

fn nullable_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// One JSON frame as sent by the streaming endpoint
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireFrame {
    Chunk {
        content: String,
    },
    Complete {
        result: ResultPayload,
    },
    Error {
        #[serde(default)]
        message: String,
    },
    Start {
        #[serde(default)]
        message: String,
    },
    Intent {
        #[serde(default)]
        message: String,
    },
    Retrieval {
        #[serde(default)]
        message: String,
    },
    Generating {
        #[serde(default)]
        message: String,
    },
    #[serde(other)]
    Unknown,
}

/// Backend processing stage announced before any answer text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    Start,
    Intent,
    Retrieval,
    Generating,
}

/// Event delivered by a stream channel to its listener
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Chunk { content: String },
    Complete { result: ResultPayload },
    Error { message: String },
    Progress { stage: ProgressStage, message: String },
}

impl StreamEvent {
    /// `complete` and `error` end the channel
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Complete { .. } | StreamEvent::Error { .. })
    }
}

impl WireFrame {
    pub fn into_event(self) -> Option<StreamEvent> {
        let event = match self {
            WireFrame::Chunk { content } => StreamEvent::Chunk { content },
            WireFrame::Complete { result } => StreamEvent::Complete { result },
            WireFrame::Error { message } => StreamEvent::Error { message },
            WireFrame::Start { message } => StreamEvent::Progress {
                stage: ProgressStage::Start,
                message,
            },
            WireFrame::Intent { message } => StreamEvent::Progress {
                stage: ProgressStage::Intent,
                message,
            },
            WireFrame::Retrieval { message } => StreamEvent::Progress {
                stage: ProgressStage::Retrieval,
                message,
            },
            WireFrame::Generating { message } => StreamEvent::Progress {
                stage: ProgressStage::Generating,
                message,
            },
            WireFrame::Unknown => return None,
        };
        Some(event)
    }
}

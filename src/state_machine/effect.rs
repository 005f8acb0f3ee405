//! Effects produced by state transitions

/// Effects to be executed by the session host after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Append the user's question to the transcript
    AppendUserMessage { text: String },

    /// Open the stream channel for the session's query
    OpenChannel,

    /// Close the session's stream channel
    CloseChannel,

    /// Restart the typewriter over the running text
    Reveal { text: String },

    /// Stop the typewriter and clear its buffer
    CancelReveal,

    /// Issue the single-shot fallback request
    RequestFallback,

    /// Append the final assistant message; answers with `Event::Committed`
    Commit { text: String },

    /// Notify observers of the new state
    PublishState,

    /// Notify observers of backend progress
    PublishProgress { message: String },
}

impl Effect {
    pub fn commit(text: impl Into<String>) -> Self {
        Effect::Commit { text: text.into() }
    }
}

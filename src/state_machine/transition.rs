//! Pure state transition function

use super::{Effect, Event, Outcome, SessionState};
use crate::accumulator::ChunkAccumulator;
use crate::client::wire::{Recommendation, ResultPayload};
use std::fmt::Write;
use thiserror::Error;

/// Shown when the stream breaks after partial text was revealed
pub const FAILURE_NOTICE: &str = "抱歉，回答生成过程中断，请稍后重试。";

/// Shown when both the stream and the fallback request failed
pub const UNAVAILABLE_NOTICE: &str = "抱歉，服务暂时不可用，请稍后再试。";

/// Sources listed under an answer
const MAX_LISTED_SOURCES: usize = 2;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: SessionState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: SessionState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// An event the current state does not accept
///
/// Carries the state back unchanged so the caller can keep it.
#[derive(Debug, Error, PartialEq)]
#[error("Unexpected event {event} in state {}", .state.name())]
pub struct TransitionError {
    pub state: SessionState,
    pub event: &'static str,
}

/// Pure transition function
///
/// Given the same inputs it always produces the same outputs, with no I/O.
/// The state is taken by value so the running answer text is moved, not
/// copied, on every chunk.
pub fn transition(state: SessionState, event: Event) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        // ============================================================
        // Submission
        // ============================================================
        (SessionState::Idle | SessionState::Terminal { .. }, Event::Submitted { question }) => {
            Ok(start_session(ChunkAccumulator::new(), question, false))
        }

        // A new question supersedes the one in flight, reusing its buffer
        (SessionState::Streaming { mut received }, Event::Submitted { question }) => {
            received.reset();
            Ok(start_session(received, question, true))
        }

        (
            SessionState::FallingBack | SessionState::Completing { .. },
            Event::Submitted { question },
        ) => Ok(start_session(ChunkAccumulator::new(), question, true)),

        // ============================================================
        // Stream channel
        // ============================================================
        (SessionState::Streaming { mut received }, Event::Chunk { content }) => {
            let text = received.append(&content).to_string();
            Ok(TransitionResult::new(SessionState::Streaming { received })
                .with_effect(Effect::Reveal { text }))
        }

        (SessionState::Streaming { received }, Event::Progress { message, .. }) => {
            Ok(TransitionResult::new(SessionState::Streaming { received })
                .with_effect(Effect::PublishProgress { message }))
        }

        (SessionState::Streaming { .. }, Event::StreamComplete { result }) => Ok(
            TransitionResult::new(SessionState::Completing {
                outcome: Outcome::Answered,
            })
            .with_effect(Effect::CloseChannel)
            .with_effect(Effect::CancelReveal)
            .with_effect(Effect::PublishState)
            .with_effect(Effect::commit(compose_answer(&result))),
        ),

        // Nothing shown yet: recover through the single-shot request
        (SessionState::Streaming { received }, Event::StreamError { .. })
            if received.is_empty() =>
        {
            Ok(TransitionResult::new(SessionState::FallingBack)
                .with_effect(Effect::CloseChannel)
                .with_effect(Effect::PublishState)
                .with_effect(Effect::RequestFallback))
        }

        // Partial text already shown: never retry
        (SessionState::Streaming { .. }, Event::StreamError { .. }) => Ok(TransitionResult::new(
            SessionState::Completing {
                outcome: Outcome::Interrupted,
            },
        )
        .with_effect(Effect::CloseChannel)
        .with_effect(Effect::CancelReveal)
        .with_effect(Effect::PublishState)
        .with_effect(Effect::commit(FAILURE_NOTICE))),

        // ============================================================
        // Fallback
        // ============================================================
        (SessionState::FallingBack, Event::FallbackSucceeded { result }) => Ok(
            TransitionResult::new(SessionState::Completing {
                outcome: Outcome::Recovered,
            })
            .with_effect(Effect::PublishState)
            .with_effect(Effect::commit(compose_answer(&result))),
        ),

        (SessionState::FallingBack, Event::FallbackFailed { .. }) => Ok(TransitionResult::new(
            SessionState::Completing {
                outcome: Outcome::Unavailable,
            },
        )
        .with_effect(Effect::PublishState)
        .with_effect(Effect::commit(UNAVAILABLE_NOTICE))),

        // ============================================================
        // Commit
        // ============================================================
        (SessionState::Completing { outcome }, Event::Committed) => Ok(TransitionResult::new(
            SessionState::Terminal { outcome },
        )
        .with_effect(Effect::PublishState)),

        // Late stream events, a second stream error while falling back,
        // and fallback results outside FallingBack are all dropped here.
        (state, event) => Err(TransitionError {
            event: event.name(),
            state,
        }),
    }
}

fn start_session(
    received: ChunkAccumulator,
    question: String,
    superseding: bool,
) -> TransitionResult {
    let mut result = TransitionResult::new(SessionState::Streaming { received });
    if superseding {
        result = result
            .with_effect(Effect::CloseChannel)
            .with_effect(Effect::CancelReveal);
    }
    result
        .with_effect(Effect::AppendUserMessage { text: question })
        .with_effect(Effect::PublishState)
        .with_effect(Effect::OpenChannel)
}

/// Final assistant text for a result payload
///
/// A question the backend declined carries only its explanation.
pub fn compose_answer(result: &ResultPayload) -> String {
    let mut text = result.answer.clone();
    if result.rejected {
        return text;
    }
    let _ = write!(text, "\n\n置信度：{}", format_percent(result.confidence));

    if !result.sources.is_empty() {
        text.push_str("\n\n【参考来源】");
        for (i, source) in result.sources.iter().take(MAX_LISTED_SOURCES).enumerate() {
            let _ = write!(
                text,
                "\n{}. {}（相关度：{}）",
                i + 1,
                source.source,
                format_percent(source.similarity)
            );
        }
    }

    if let Some(recommendation) = &result.recommendation {
        append_recommendation(&mut text, recommendation);
    }
    text
}

fn append_recommendation(text: &mut String, recommendation: &Recommendation) {
    if recommendation.selected_products.is_empty() {
        return;
    }
    text.push_str("\n\n【推荐详情】");
    for product in &recommendation.selected_products {
        let _ = write!(
            text,
            "\n- {}：¥{}，补贴¥{}",
            product.name,
            format_amount(product.price),
            format_amount(product.subsidy)
        );
    }
    let _ = write!(
        text,
        "\n合计补贴：¥{}\n实付金额：¥{}",
        format_amount(recommendation.total_subsidy),
        format_amount(recommendation.final_cost)
    );
}

/// A [0,1] ratio as a percentage with at most one decimal: 0.92 → "92%", 0.925 → "92.5%"
#[allow(clippy::cast_possible_truncation)] // Clamped to [0, 1000]
pub fn format_percent(ratio: f64) -> String {
    let ratio = if ratio.is_finite() {
        ratio.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let tenths = (ratio * 1000.0).round() as i64;
    if tenths % 10 == 0 {
        format!("{}%", tenths / 10)
    } else {
        format!("{}.{}%", tenths / 10, tenths % 10)
    }
}

/// Whole amounts without decimals, otherwise two places
fn format_amount(amount: f64) -> String {
    if amount.fract().abs() < f64::EPSILON {
        format!("{amount:.0}")
    } else {
        format!("{amount:.2}")
    }
}

//! Question engine: adaptive practice questions with escalating feedback.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::completion::{CompletionClient, CompletionRequest, ModelTier};
use crate::error::{Result, TutorError};
use crate::prompts::Prompt;
use crate::store::{Question, Store};
use crate::structured::{parse_as, parse_object};
use crate::video::{VideoPipeline, VideoResult};

/// Lowest difficulty.
pub const MIN_DIFFICULTY: u8 = 1;

/// Highest difficulty.
pub const MAX_DIFFICULTY: u8 = 10;

/// Previous questions shown to the model to avoid repeats.
pub const PREVIOUS_QUESTION_WINDOW: usize = 5;

/// Wrong answers after which a video is offered.
pub const VIDEO_OFFER_ATTEMPTS: u32 = 3;

/// Hint used when the model's hint cannot be recovered.
pub const FALLBACK_HINT: &str = "Try breaking down the problem into smaller steps.";

const QUESTION_MAX_TOKENS: u32 = 1024;
const VALIDATION_MAX_TOKENS: u32 = 1024;
const HINT_MAX_TOKENS: u32 = 512;

/// Difficulty for the next question when the caller does not pick one:
/// one level per three questions already asked, capped at the maximum.
pub fn derive_difficulty(question_count: usize) -> u8 {
    let level = 1 + question_count / 3;
    u8::try_from(level.min(usize::from(MAX_DIFFICULTY))).unwrap_or(MAX_DIFFICULTY)
}

/// Clamps a caller-supplied difficulty into `[1, 10]`.
pub fn clamp_difficulty(requested: i64) -> u8 {
    let clamped = requested.clamp(i64::from(MIN_DIFFICULTY), i64::from(MAX_DIFFICULTY));
    u8::try_from(clamped).unwrap_or(MAX_DIFFICULTY)
}

/// Feedback escalation for a judged answer.
///
/// `hint` is only consulted on the second wrong attempt.
pub fn escalate_feedback(
    correct: bool,
    attempts: u32,
    model_feedback: &str,
    hint: Option<&str>,
) -> String {
    if correct {
        return model_feedback.to_string();
    }
    match attempts {
        0 | 1 => "Incorrect. Please try again.".to_string(),
        2 => format!(
            "Not quite right. Here's a hint: {}",
            hint.unwrap_or(FALLBACK_HINT)
        ),
        _ => format!("That's not correct. {model_feedback}"),
    }
}

/// Whether to offer an explanation video.
pub const fn should_offer_video(correct: bool, attempts: u32) -> bool {
    !correct && attempts >= VIDEO_OFFER_ATTEMPTS
}

/// A freshly generated question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextQuestion {
    /// Persisted question id.
    pub question_id: String,
    /// Question text.
    pub question: String,
    /// Topic label.
    pub topic: String,
    /// Difficulty used.
    pub difficulty: u8,
}

/// Verdict on a submitted answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerVerdict {
    /// Whether the answer was judged correct.
    pub correct: bool,
    /// Attempts including this one.
    pub attempts: u32,
    /// Feedback for the student.
    pub feedback: String,
    /// Whether to offer an explanation video.
    pub offer_video: bool,
    /// Question text.
    pub question: String,
    /// Topic label.
    pub topic: String,
}

#[derive(Debug, Deserialize)]
struct GeneratedQuestion {
    question: String,
    #[serde(default)]
    topic: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Judgement {
    correct: bool,
    #[serde(default)]
    feedback: String,
}

/// Generates, judges, and explains practice questions.
#[derive(Clone)]
pub struct QuestionEngine {
    store: Arc<dyn Store>,
    completion: Arc<dyn CompletionClient>,
    video: VideoPipeline,
    topic: String,
}

impl std::fmt::Debug for QuestionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuestionEngine")
            .field("topic", &self.topic)
            .field("video", &self.video)
            .finish_non_exhaustive()
    }
}

impl QuestionEngine {
    /// Creates an engine generating questions about `topic`.
    pub fn new(
        store: Arc<dyn Store>,
        completion: Arc<dyn CompletionClient>,
        video: VideoPipeline,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            store,
            completion,
            video,
            topic: topic.into(),
        }
    }

    /// The video pipeline used for explanations.
    pub const fn video(&self) -> &VideoPipeline {
        &self.video
    }

    /// Generates and persists the next question of a session.
    ///
    /// # Errors
    ///
    /// [`TutorError::SessionNotFound`] for unknown sessions, plus store,
    /// completion, and malformed-output failures.
    #[instrument(skip(self))]
    pub async fn next_question(
        &self,
        session_id: &str,
        difficulty: Option<i64>,
    ) -> Result<NextQuestion> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| TutorError::SessionNotFound(session_id.to_string()))?;

        let asked = self.store.list_questions(session_id).await?;
        let difficulty = difficulty.map_or_else(|| derive_difficulty(asked.len()), clamp_difficulty);
        let previous: Vec<String> = asked
            .iter()
            .skip(asked.len().saturating_sub(PREVIOUS_QUESTION_WINDOW))
            .map(|q| q.question.clone())
            .collect();

        let prompt = Prompt::GenerateQuestion {
            topic: &self.topic,
            difficulty,
            previous_questions: &previous,
        }
        .render();
        let reply = self
            .completion
            .complete(CompletionRequest::prompt(
                ModelTier::Fast,
                prompt,
                QUESTION_MAX_TOKENS,
            ))
            .await?;
        let generated: GeneratedQuestion = parse_as(&reply)?;
        let topic = generated
            .topic
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| self.topic.clone());

        let question = Question {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            user_id: session.user_id,
            question: generated.question,
            topic,
            difficulty,
            attempts: 0,
            created_at: Utc::now(),
        };
        self.store.insert_question(&question).await?;
        info!(question_id = %question.id, difficulty, "Question generated");

        Ok(NextQuestion {
            question_id: question.id,
            question: question.question,
            topic: question.topic,
            difficulty,
        })
    }

    /// Judges an answer, records the attempt, and escalates feedback.
    ///
    /// # Errors
    ///
    /// [`TutorError::QuestionNotFound`] when the question does not exist in
    /// this session, plus store, completion, and malformed-output failures.
    #[instrument(skip(self, answer))]
    pub async fn validate_answer(
        &self,
        session_id: &str,
        question_id: &str,
        answer: &str,
    ) -> Result<AnswerVerdict> {
        let question = self.load_question(session_id, question_id).await?;

        let prompt = Prompt::ValidateAnswer {
            question: &question.question,
            user_answer: answer,
        }
        .render();
        let reply = self
            .completion
            .complete(CompletionRequest::prompt(
                ModelTier::Fast,
                prompt,
                VALIDATION_MAX_TOKENS,
            ))
            .await?;
        let judgement: Judgement = parse_as(&reply)?;

        let attempts = question.attempts + 1;
        self.store.set_question_attempts(question_id, attempts).await?;

        let hint = if !judgement.correct && attempts == 2 {
            Some(self.hint(&question.question, answer).await?)
        } else {
            None
        };
        let feedback =
            escalate_feedback(judgement.correct, attempts, &judgement.feedback, hint.as_deref());
        let offer_video = should_offer_video(judgement.correct, attempts);
        info!(correct = judgement.correct, attempts, offer_video, "Answer judged");

        Ok(AnswerVerdict {
            correct: judgement.correct,
            attempts,
            feedback,
            offer_video,
            question: question.question,
            topic: question.topic,
        })
    }

    /// Asks the model for a hint, falling back to a generic one when the
    /// reply cannot be used.
    ///
    /// # Errors
    ///
    /// Completion failures only.
    pub async fn hint(&self, question: &str, answer: &str) -> Result<String> {
        let prompt = Prompt::GenerateHint {
            question,
            user_answer: answer,
        }
        .render();
        let reply = self
            .completion
            .complete(CompletionRequest::prompt(
                ModelTier::Fast,
                prompt,
                HINT_MAX_TOKENS,
            ))
            .await?;
        let hint = parse_object(&reply)
            .ok()
            .and_then(|object| object.get("hint").and_then(|v| v.as_str().map(str::to_string)));
        Ok(hint.unwrap_or_else(|| {
            warn!("Hint reply unusable, using fallback");
            FALLBACK_HINT.to_string()
        }))
    }

    /// Renders an explanation video for a question of the session.
    ///
    /// Lookup failures are reported as a failed result, like pipeline
    /// failures.
    #[instrument(skip(self))]
    pub async fn generate_video(&self, session_id: &str, question_id: &str) -> VideoResult {
        match self.load_question(session_id, question_id).await {
            Ok(question) => self.video.generate(&question.question).await,
            Err(e) => {
                warn!(error = %e, "Video requested for unknown question");
                VideoResult::failed(uuid::Uuid::new_v4().to_string(), e.to_string())
            }
        }
    }

    async fn load_question(&self, session_id: &str, question_id: &str) -> Result<Question> {
        self.store
            .get_question(question_id)
            .await?
            .filter(|q| q.session_id == session_id)
            .ok_or_else(|| TutorError::QuestionNotFound(question_id.to_string()))
    }
}

//! Prompt templates.
//!
//! Each [`Prompt`] renders to the single user message sent to the model.
//! Templates use `{name}` placeholders; substitution is one pass, so values
//! that happen to contain braces are inserted verbatim.

/// Prefix for question generation requests.
const QUESTION_PREAMBLE: &str = "You are a mathematics teaching assistant. Generate educational questions.";

/// Prefix for answer validation requests.
const VALIDATION_PREAMBLE: &str =
    "You are a mathematics teaching assistant. Evaluate answers fairly and provide constructive feedback.";

/// System prompt for free-form tutoring chat.
pub const CHAT_SYSTEM_PROMPT: &str = "You are a helpful mathematics teaching assistant specializing in long division. Help students understand the step-by-step process, explain remainders, and guide them through solving division problems. Answer questions clearly and concisely.";

const GENERATE_QUESTION: &str = r#"{preamble}

Write one new {topic} practice problem at difficulty {difficulty} on a scale from 1 (easiest) to 10 (hardest).
Lower difficulties use small divisors and no remainders; higher difficulties use multi-digit divisors and remainders.

Questions already asked in this session (do not repeat them or reuse their numbers):
{previous_questions}

Reply ONLY with strict JSON: {"question": string, "topic": string}"#;

const VALIDATE_ANSWER: &str = r#"{preamble}

Question: {question}
Student answer: {user_answer}

Decide whether the answer is mathematically correct. Accept equivalent forms such as "12 R 3", "12 remainder 3" or a correct decimal.
Reply ONLY with strict JSON: {"correct": boolean, "feedback": string}
The feedback is one or two encouraging sentences addressed to the student."#;

const GENERATE_HINT: &str = r#"A student is working on this problem:
{question}

Their latest answer was: {user_answer}

Give ONE short hint (under 30 words) that points at the next step without revealing the final answer.
Reply ONLY with strict JSON: {"hint": string}"#;

const EXPLAIN_SOLUTION: &str = r#"Explain step by step how to solve this problem for a student who has answered it wrong three times:
{question}

Keep it under 150 words. Name every intermediate value so that each step can be shown on screen.
Reply ONLY with strict JSON: {"explanation": string}"#;

const GENERATE_ANIMATION: &str = r#"Write a Manim Community Edition program that animates this explanation.

Problem: {question}

Explanation:
{explanation}

Requirements:
- A single Python file that starts with `from manim import *`.
- Exactly one scene: `class ExplanationScene(Scene):` with a `construct` method.
- Use only Text, MathTex, VGroup and basic shapes; no external assets, audio, or network access.
- Use plain ASCII in every string literal.
- Keep the animation under 60 seconds and fit all content inside the frame.

Reply with the Python code only."#;

/// A prompt ready to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt<'a> {
    /// Ask for a new practice question.
    GenerateQuestion {
        /// Subject area.
        topic: &'a str,
        /// Difficulty in `[1, 10]`.
        difficulty: u8,
        /// Recently asked question texts, oldest first.
        previous_questions: &'a [String],
    },
    /// Ask whether an answer is correct.
    ValidateAnswer {
        /// Question text.
        question: &'a str,
        /// What the student submitted.
        user_answer: &'a str,
    },
    /// Ask for a hint after a wrong answer.
    GenerateHint {
        /// Question text.
        question: &'a str,
        /// What the student submitted.
        user_answer: &'a str,
    },
    /// Ask for a narrated walkthrough of the solution.
    ExplainSolution {
        /// Question text.
        question: &'a str,
    },
    /// Ask for an animation program illustrating an explanation.
    GenerateAnimation {
        /// Question text.
        question: &'a str,
        /// Walkthrough produced by [`Prompt::ExplainSolution`].
        explanation: &'a str,
    },
}

impl Prompt<'_> {
    /// Renders the prompt to a user message.
    pub fn render(&self) -> String {
        match self {
            Self::GenerateQuestion {
                topic,
                difficulty,
                previous_questions,
            } => fill(
                GENERATE_QUESTION,
                &[
                    ("preamble", QUESTION_PREAMBLE),
                    ("topic", *topic),
                    ("difficulty", difficulty.to_string().as_str()),
                    ("previous_questions", bullet_list(previous_questions).as_str()),
                ],
            ),
            Self::ValidateAnswer {
                question,
                user_answer,
            } => fill(
                VALIDATE_ANSWER,
                &[
                    ("preamble", VALIDATION_PREAMBLE),
                    ("question", *question),
                    ("user_answer", *user_answer),
                ],
            ),
            Self::GenerateHint {
                question,
                user_answer,
            } => fill(
                GENERATE_HINT,
                &[("question", *question), ("user_answer", *user_answer)],
            ),
            Self::ExplainSolution { question } => fill(EXPLAIN_SOLUTION, &[("question", *question)]),
            Self::GenerateAnimation {
                question,
                explanation,
            } => fill(
                GENERATE_ANIMATION,
                &[("question", *question), ("explanation", *explanation)],
            ),
        }
    }
}

fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        return "(none yet)".to_string();
    }
    items
        .iter()
        .map(|item| format!("- {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Replaces `{name}` with the matching value; unknown names stay literal.
fn fill(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let name_len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after.len());
        let value = after[name_len..]
            .starts_with('}')
            .then(|| vars.iter().find(|(name, _)| *name == &after[..name_len]))
            .flatten();
        if let Some((_, value)) = value {
            out.push_str(value);
            rest = &after[name_len + 1..];
        } else {
            out.push('{');
            rest = after;
        }
    }
    out.push_str(rest);
    out
}
